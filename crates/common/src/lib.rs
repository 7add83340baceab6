pub mod config;
pub mod error;
pub mod exchange;
pub mod precision;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use exchange::ExchangeGateway;
pub use precision::MarketPrecision;
pub use store::{MemoryStore, Store};
pub use types::*;
