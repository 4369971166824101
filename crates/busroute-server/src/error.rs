//! Node error types.

use std::fmt;

use crate::driver_error::DriverError;

/// Errors that can occur in the node runtime.
#[derive(Debug)]
pub enum NodeError {
    /// Configuration error (unreadable file, bad address, role mismatch).
    ///
    /// Fatal: prevents startup. Fix the node file and restart.
    Config(String),

    /// Transport/network error (bind failure, I/O error).
    ///
    /// Fatal at startup (address in use); on a running node these surface
    /// as closed links instead.
    Transport(String),

    /// Protocol error (packet that cannot be encoded).
    Protocol(String),

    /// Driver error.
    ///
    /// Wraps errors from event processing. See `DriverError` for details.
    Driver(DriverError),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Driver(err) => write!(f, "driver error: {err}"),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Driver(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DriverError> for NodeError {
    fn from(err: DriverError) -> Self {
        Self::Driver(err)
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<busroute_proto::ProtocolError> for NodeError {
    fn from(err: busroute_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_error_display() {
        let err = NodeError::Config("missing bus_id".to_string());
        assert_eq!(err.to_string(), "configuration error: missing bus_id");

        let err = NodeError::from(DriverError::UnknownLink(3));
        assert_eq!(err.to_string(), "driver error: traffic on unregistered link 3");
        assert!(std::error::Error::source(&err).is_some());
    }
}
