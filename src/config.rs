use serde::{Deserialize, Serialize};

use crate::error::LogResult;
use crate::frame;
use crate::layout;

/// Default term length (64 KiB), the smallest the layout allows.
const DEFAULT_TERM_LENGTH: usize = layout::TERM_MIN_LENGTH;

/// Default MTU. Sized so a frame rides a typical UDP datagram once the
/// media driver forwards it.
const DEFAULT_MTU_LENGTH: usize = 1408;

/// Parameters a log is created with. Term length and MTU are fixed for the
/// life of the log; there is no reconfiguration path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Length in bytes of each of the three term buffers. Power of two,
    /// between 64 KiB and 1 GiB.
    pub term_length: usize,
    /// Maximum transmission unit: caps a single frame, header included.
    /// Multiple of the frame alignment.
    pub mtu_length: usize,
    /// Term id the stream starts at. Position zero is the start of this
    /// term.
    pub initial_term_id: i32,
    /// Session the publication writes under; stamped into every frame.
    pub session_id: i32,
    /// Stream within the channel; stamped into every frame.
    pub stream_id: i32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            term_length: DEFAULT_TERM_LENGTH,
            mtu_length: DEFAULT_MTU_LENGTH,
            initial_term_id: 0,
            session_id: 0,
            stream_id: 0,
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> LogResult<()> {
        layout::check_term_length(self.term_length)?;
        layout::check_mtu_length(self.mtu_length, self.term_length)?;
        Ok(())
    }

    /// Total length of the mapped log file.
    pub fn log_length(&self) -> usize {
        self.term_length * layout::PARTITION_COUNT + layout::LOG_META_DATA_LENGTH
    }

    /// Largest payload that fits a single frame.
    pub fn max_payload_length(&self) -> usize {
        self.mtu_length - frame::HEADER_LENGTH
    }

    /// Largest message accepted, fragmented across frames.
    pub fn max_message_length(&self) -> usize {
        frame::compute_max_message_length(self.term_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = LogConfig::default();
        cfg.validate().expect("default config");
        assert_eq!(cfg.log_length(), 3 * 64 * 1024 + layout::LOG_META_DATA_LENGTH);
        assert_eq!(cfg.max_payload_length(), 1408 - 32);
        assert_eq!(cfg.max_message_length(), 8 * 1024);
    }

    #[test]
    fn rejects_unaligned_mtu() {
        let cfg = LogConfig {
            mtu_length: 1400,
            ..LogConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_power_of_two_term() {
        let cfg = LogConfig {
            term_length: 80 * 1024,
            ..LogConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
