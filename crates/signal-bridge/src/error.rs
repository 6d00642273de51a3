//! Error taxonomy for bridge operations.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use signal_rpc::ClientError;
use thiserror::Error;

/// Errors surfaced by the messaging operations.
///
/// None of these cross the tool boundary as a failure: the operation table
/// turns each one into an `{"error": ...}` result.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Daemon unreachable or the link dropped mid-call.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A call exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The daemon sent something we could not interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The recipient could not be resolved (daemon text passed through verbatim).
    #[error("{0}")]
    RecipientResolution(String),

    /// Any other error reported by the daemon, verbatim.
    #[error("{0}")]
    Daemon(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl BridgeError {
    /// Stable error code, mirrors the transport's codes.
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::Connection(_) => "CONNECT_FAILED",
            BridgeError::Timeout(_) => "TIMEOUT",
            BridgeError::Protocol(_) => "PROTOCOL_ERROR",
            BridgeError::RecipientResolution(_) => "RECIPIENT_NOT_FOUND",
            BridgeError::Daemon(_) => "DAEMON_ERROR",
            BridgeError::InvalidArgument(_) => "INVALID_ARGUMENT",
        }
    }
}

impl From<ClientError> for BridgeError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Connection(msg) => BridgeError::Connection(msg),
            ClientError::Closed => BridgeError::Connection("connection closed".to_string()),
            ClientError::Timeout(method) => BridgeError::Timeout(method),
            ClientError::Protocol(msg) => BridgeError::Protocol(msg),
            ClientError::Serialize(e) => BridgeError::Protocol(e.to_string()),
            ClientError::Rpc { message, .. } => BridgeError::Daemon(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_message_is_verbatim() {
        let err: BridgeError = ClientError::Rpc {
            code: -1,
            message: "Unregistered user \"+15550000000\"".to_string(),
            data: None,
        }
        .into();
        assert_eq!(err.to_string(), "Unregistered user \"+15550000000\"");
        assert_eq!(err.error_code(), "DAEMON_ERROR");
    }

    #[test]
    fn test_closed_maps_to_connection() {
        let err: BridgeError = ClientError::Closed.into();
        assert!(matches!(err, BridgeError::Connection(_)));
    }
}
