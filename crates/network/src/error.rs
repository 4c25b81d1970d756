use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetError>;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// The remote answered, but with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl NetError {
    /// Errors worth retrying: the request may never have reached the remote.
    pub fn is_transient(&self) -> bool {
        match self {
            NetError::Connection(_) | NetError::Http(_) => true,
            NetError::Status { status, .. } => *status >= 500 || *status == 429,
            NetError::Config(_) | NetError::Decode(_) => false,
        }
    }
}
