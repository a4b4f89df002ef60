use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CarbotaxError {
    #[error("invalid identifier at index {index}: {message}")]
    InvalidIdentifier { index: usize, message: String },

    #[error("invalid identifier kind: {0}")]
    InvalidIdentifierKind(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid taxonomy.key_prefix {prefix:?}: {message}")]
    InvalidKeyPrefix { prefix: String, message: String },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("server returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response shape: {0}")]
    Parse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("interrupted by user")]
    Interrupted,
}

impl CarbotaxError {
    pub fn is_transient(&self) -> bool {
        match self {
            CarbotaxError::Timeout(_) | CarbotaxError::Http(_) => true,
            CarbotaxError::Status { .. } => self.is_server_error(),
            _ => false,
        }
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, CarbotaxError::Status { status, .. } if (500..600).contains(status))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, CarbotaxError::Status { status: 429, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(CarbotaxError::Timeout("slow".to_string()).is_transient());
        assert!(CarbotaxError::Http("reset".to_string()).is_transient());
        let server = CarbotaxError::Status {
            status: 503,
            message: String::new(),
        };
        assert!(server.is_transient());
        assert!(server.is_server_error());

        let limited = CarbotaxError::Status {
            status: 429,
            message: String::new(),
        };
        assert!(!limited.is_transient());
        assert!(limited.is_rate_limited());

        let missing = CarbotaxError::Status {
            status: 404,
            message: String::new(),
        };
        assert!(!missing.is_transient());
        assert!(!CarbotaxError::Interrupted.is_transient());
        assert!(!CarbotaxError::Parse("bad".to_string()).is_transient());
    }
}
