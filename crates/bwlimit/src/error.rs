use std::io;

/// Why a wait for tokens ended without admitting the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ThrottleError {
    #[error("wait for bandwidth was cancelled")]
    Cancelled,
    #[error("deadline exceeded while waiting for bandwidth")]
    DeadlineExceeded,
}

impl From<ThrottleError> for io::Error {
    fn from(e: ThrottleError) -> Self {
        let kind = match e {
            ThrottleError::Cancelled => io::ErrorKind::Other,
            ThrottleError::DeadlineExceeded => io::ErrorKind::TimedOut,
        };
        io::Error::new(kind, e)
    }
}
