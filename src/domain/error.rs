use crate::domain::models::MessageSeverity;
use thiserror::Error;

/// Failures surfaced by the streaming engine.
///
/// Payload decoding never fails, so there is no variant for it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("bluetooth permission denied: {0}")]
    PermissionDenied(String),

    #[error("bluetooth radio is unavailable: {0}")]
    RadioUnavailable(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("reconnect attempts exceeded after {attempts} tries")]
    ReconnectExhausted { attempts: usize },

    #[error("no notifiable characteristic produced data")]
    DiscoveryExhausted,

    #[error("device rejected the start command on {characteristic}; it may need to be paired first")]
    WriteRejected { characteristic: String },

    #[error("not connected to a device")]
    NotConnected,

    #[error("bluetooth error: {0}")]
    Platform(String),
}

impl StreamError {
    /// Whether this error belongs in the user-facing error slot.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, StreamError::Platform(_))
    }

    pub fn severity(&self) -> MessageSeverity {
        match self {
            StreamError::NotConnected => MessageSeverity::Warning,
            _ => MessageSeverity::Error,
        }
    }
}

/// The single current-error slot shown to the user.
///
/// A newer error replaces the older one; it only clears on dismissal.
#[derive(Debug, Clone, Default)]
pub struct ErrorSlot {
    current: Option<StreamError>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, error: StreamError) {
        self.current = Some(error);
    }

    pub fn current(&self) -> Option<&StreamError> {
        self.current.as_ref()
    }

    pub fn dismiss(&mut self) -> Option<StreamError> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_display() {
        let err = StreamError::ReconnectExhausted { attempts: 5 };
        assert_eq!(err.to_string(), "reconnect attempts exceeded after 5 tries");

        let err = StreamError::DiscoveryExhausted;
        assert_eq!(
            err.to_string(),
            "no notifiable characteristic produced data"
        );

        let err = StreamError::WriteRejected {
            characteristic: "fff2".to_string(),
        };
        assert!(err.to_string().contains("paired"));
    }

    #[test]
    fn test_error_slot_keeps_latest_until_dismissed() {
        let mut slot = ErrorSlot::new();
        assert!(slot.current().is_none());

        slot.set(StreamError::NotConnected);
        slot.set(StreamError::DiscoveryExhausted);
        assert_eq!(slot.current(), Some(&StreamError::DiscoveryExhausted));

        assert_eq!(slot.dismiss(), Some(StreamError::DiscoveryExhausted));
        assert!(slot.current().is_none());
        assert_eq!(slot.dismiss(), None);
    }

    #[test]
    fn test_platform_errors_stay_out_of_the_slot() {
        assert!(!StreamError::Platform("gatt busy".into()).is_user_visible());
        assert!(StreamError::RadioUnavailable("off".into()).is_user_visible());
        assert_eq!(
            StreamError::NotConnected.severity(),
            MessageSeverity::Warning
        );
    }
}
