pub mod manager;

pub use manager::{Reservation, ResourceManager};
