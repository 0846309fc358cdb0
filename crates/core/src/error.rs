use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Opening a remote link failed.
    #[error("Connect error on link {link}: {reason}")]
    Connect { link: String, reason: String },

    /// A transport write failed.
    #[error("Send error on link {link}: {reason}")]
    Send { link: String, reason: String },

    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    #[error("Link {0} is already connecting")]
    AlreadyConnecting(String),

    #[error("No available agent role (wanted {0})")]
    NoAvailableRole(String),

    #[error("Link {0} is closed")]
    LinkClosed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transport and link failures are reported as link state, not returned to
    /// façade callers.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. } | Error::Send { .. } | Error::LinkClosed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
