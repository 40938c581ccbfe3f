use std::fmt::Display;

use crate::publication::{ADMIN_ACTION, BACK_PRESSURED, CLOSED, NOT_CONNECTED};

/// A specialized error type for log publication operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// An I/O error occurred while creating or mapping the log.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration value was invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// No subscriber has been seen recently; the stream is not flowing.
    #[error("publication is not connected to a subscriber")]
    NotConnected,
    /// The slowest consumer's position limit has been reached.
    #[error("back pressured by the consumer position limit")]
    BackPressured,
    /// An administrative action (term rotation) occurred; retry the call.
    #[error("administration action in progress, retry")]
    AdminAction,
    /// The publication has been closed and must no longer be used.
    #[error("publication is closed")]
    Closed,
    /// Message is too long to ever fit the log, even fragmented.
    #[error("message length {length} exceeds max message length {max}")]
    MaxMessageLength { length: usize, max: usize },
    /// Claim is too long for a single frame within the MTU.
    #[error("claim length {length} exceeds max payload length {max}")]
    MaxPayloadLength { length: usize, max: usize },
    /// Invalid state transition or operation.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The shared log state no longer matches the single-writer contract.
    #[error("log corruption: {0}")]
    Corruption(String),
}

impl LogError {
    /// Create an invalid configuration error from a displayable value.
    pub fn invalid_config<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::InvalidConfig(msg.to_string())
    }

    /// Create an invalid state error from a displayable value.
    pub fn invalid_state<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::InvalidState(msg.to_string())
    }

    /// Create a corruption error from a displayable value.
    pub fn corruption<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::Corruption(msg.to_string())
    }

    /// Numeric sentinel code for the control-protocol conditions, where one
    /// exists. Successful offers return non-negative stream positions, so
    /// these codes never collide with a real position.
    pub fn position_code(&self) -> Option<i64> {
        match self {
            LogError::NotConnected => Some(NOT_CONNECTED),
            LogError::BackPressured => Some(BACK_PRESSURED),
            LogError::AdminAction => Some(ADMIN_ACTION),
            LogError::Closed => Some(CLOSED),
            _ => None,
        }
    }

    /// True for conditions a caller is expected to retry after.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LogError::NotConnected | LogError::BackPressured | LogError::AdminAction
        )
    }
}

/// A Result type alias for log publication operations.
pub type LogResult<T> = Result<T, LogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_helper() {
        let err = LogError::invalid_config("bad term length");
        assert!(matches!(err, LogError::InvalidConfig(msg) if msg == "bad term length"));
    }

    #[test]
    fn sentinel_codes_match_the_control_protocol() {
        assert_eq!(LogError::NotConnected.position_code(), Some(-1));
        assert_eq!(LogError::BackPressured.position_code(), Some(-2));
        assert_eq!(LogError::AdminAction.position_code(), Some(-3));
        assert_eq!(LogError::Closed.position_code(), Some(-4));
        assert_eq!(
            LogError::MaxPayloadLength { length: 1, max: 0 }.position_code(),
            None
        );
    }

    #[test]
    fn transient_classification() {
        assert!(LogError::BackPressured.is_transient());
        assert!(LogError::AdminAction.is_transient());
        assert!(!LogError::Closed.is_transient());
        assert!(!LogError::corruption("stale tail").is_transient());
    }
}
