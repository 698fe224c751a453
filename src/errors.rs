use std::io;

use crate::codec::DecodeError;

/// All error types that can occur when interacting with CozyLife devices.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A network socket operation failed while communicating with a device.
    ///
    /// Timeouts are reported through this variant with
    /// [`io::ErrorKind::TimedOut`].
    #[error("socket {action} error: {source:?}")]
    Socket {
        action: String,
        #[source]
        source: io::Error,
    },

    /// A frame received from a device could not be decoded.
    #[error("protocol decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The device answered with a reply of the wrong kind for the request.
    #[error("unexpected reply while waiting for {0}")]
    UnexpectedReply(&'static str),

    /// Attempted to send a control request with no data points set.
    #[error("invalid control payload; no data points set")]
    NoPoints,

    /// No session is registered for the given device.
    #[error("device {0} not found in registry")]
    DeviceNotFound(String),

    /// A manually configured device address could not be parsed.
    #[error("invalid device address: {input:?}")]
    InvalidAddress { input: String },
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, source: io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            source,
        }
    }

    /// Create a socket error representing an expired deadline
    pub fn timeout(action: &str) -> Self {
        Error::Socket {
            action: action.to_string(),
            source: io::Error::new(io::ErrorKind::TimedOut, "operation timed out"),
        }
    }

    /// Create a new invalid address error
    pub fn invalid_address(input: &str) -> Self {
        Error::InvalidAddress {
            input: input.to_string(),
        }
    }

    /// Whether this error was caused by an expired deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Socket { source, .. } if source.kind() == io::ErrorKind::TimedOut
        )
    }

    /// Whether this error is recoverable by reconnecting and retrying.
    ///
    /// Network failures and malformed replies degrade a session but never
    /// the process; configuration and lookup errors do not clear on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Socket { .. } | Error::Decode(_) | Error::UnexpectedReply(_)
        )
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let err = Error::timeout("receive");
        assert!(err.is_timeout());
        assert!(err.is_transient());

        let err = Error::socket(
            "connect",
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert!(!err.is_timeout());
        assert!(err.is_transient());
    }

    #[test]
    fn test_non_transient_errors() {
        assert!(!Error::NoPoints.is_transient());
        assert!(!Error::invalid_address("not-an-ip").is_transient());
        assert!(!Error::DeviceNotFound("ABC123".into()).is_transient());
    }
}
