use thiserror::Error;

/// Binance code for "Timestamp for this request is outside of the recvWindow".
/// The only invalid-nonce cause that resolves itself on retry.
pub const TIMESTAMP_OUTSIDE_RECV_WINDOW: i64 = -1021;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Exchange API error: {0}")]
    Exchange(String),

    /// Nonce/timestamp rejected by the exchange. `code` is the exchange's
    /// machine-readable error code when the response carried one.
    #[error("Invalid nonce (code {code:?}): {message}")]
    InvalidNonce { code: Option<i64>, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the gateway retry loop may try this call again.
    ///
    /// Only the clock-skew flavour of invalid nonce qualifies. An invalid
    /// nonce carrying any other code is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::InvalidNonce { code: None, .. } => true,
            Error::InvalidNonce { code: Some(code), .. } => *code == TIMESTAMP_OUTSIDE_RECV_WINDOW,
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
