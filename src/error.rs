//! Error types surfaced by the heart-rate client.

use thiserror::Error;

/// Failure reported by a [`crate::adapter::BleAdapter`] implementation.
///
/// Backends carry very different native error types (`btleplug::Error`,
/// platform status codes, mock failures), so the capability boundary reduces
/// them to a human-readable reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct AdapterError(pub String);

impl AdapterError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<btleplug::Error> for AdapterError {
    fn from(e: btleplug::Error) -> Self {
        Self(e.to_string())
    }
}

/// Every failure the client can surface to the application layer.
///
/// Errors raised while establishing a session (`ConnectFailed` through
/// `SubscribeFailed`) are terminal for that session. `MalformedPayload` is
/// local to a single notification and never tears a session down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PulseError {
    #[error("Bluetooth adapter is not powered on")]
    AdapterUnavailable,

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    #[error("no services found on the device")]
    NoServicesFound,

    #[error("service {0} not found on the device")]
    ServiceNotFound(String),

    #[error("characteristic {0} not found in the service")]
    CharacteristicNotFound(String),

    #[error("failed to subscribe to notifications: {0}")]
    SubscribeFailed(String),

    #[error("malformed payload: need {needed} bytes, got {len}")]
    MalformedPayload { len: usize, needed: usize },

    #[error("failed to send data: {0}")]
    WriteFailed(String),

    #[error("device {0} disconnected unexpectedly")]
    UnexpectedDisconnect(String),

    #[error("a session is already active")]
    SessionActive,

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("no device is connected")]
    NotConnected,

    #[error("client has shut down")]
    Closed,
}

impl PulseError {
    /// `true` for errors that end a connection session.
    pub fn is_session_terminal(&self) -> bool {
        matches!(
            self,
            PulseError::ConnectFailed(_)
                | PulseError::NoServicesFound
                | PulseError::ServiceNotFound(_)
                | PulseError::CharacteristicNotFound(_)
                | PulseError::SubscribeFailed(_)
                | PulseError::UnexpectedDisconnect(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PulseError::MalformedPayload { len: 1, needed: 2 };
        assert_eq!(err.to_string(), "malformed payload: need 2 bytes, got 1");

        let err = PulseError::ScanFailed("radio busy".into());
        assert_eq!(err.to_string(), "scan failed: radio busy");

        let err = PulseError::ConnectFailed(AdapterError::new("timed out").to_string());
        assert_eq!(err.to_string(), "failed to connect: timed out");
    }

    #[test]
    fn test_session_terminal_classification() {
        assert!(PulseError::NoServicesFound.is_session_terminal());
        assert!(PulseError::SubscribeFailed("x".into()).is_session_terminal());
        assert!(!PulseError::MalformedPayload { len: 0, needed: 2 }.is_session_terminal());
        assert!(!PulseError::WriteFailed("x".into()).is_session_terminal());
    }
}
