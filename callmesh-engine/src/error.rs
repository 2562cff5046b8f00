use thiserror::Error;

/// Capture failures reported by a [`crate::media::CaptureBackend`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission to capture {0} was denied")]
    PermissionDenied(String),

    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("relay connection closed")]
    Closed,

    #[error("relay connection failed: {0}")]
    Connect(String),

    #[error("relay rejected request: {0}")]
    Rejected(String),
}

/// Errors surfaced to the application. Everything that does not prevent a call
/// from starting is absorbed inside the engine and only logged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("signaling transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("another call is already in progress")]
    Busy,

    #[error("there is no incoming call to answer")]
    NoIncomingCall,

    #[error("there is no active call")]
    NoActiveCall,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("call engine has stopped")]
    EngineStopped,
}

impl From<MediaError> for CallError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::PermissionDenied(what) => CallError::PermissionDenied(what),
            MediaError::DeviceUnavailable(what) => CallError::DeviceUnavailable(what),
        }
    }
}

impl From<RelayError> for CallError {
    fn from(err: RelayError) -> Self {
        CallError::TransportUnavailable(err.to_string())
    }
}
