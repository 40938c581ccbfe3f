//! Layout of the log's metadata block and the raw-tail words.
//!
//! The log file is three equal term buffers followed by this metadata
//! block. Every field here is shared across processes; access goes through
//! [`LogBuffer`] with the orderings each field needs.

use crate::buffer::LogBuffer;
use crate::error::{LogError, LogResult};
use crate::frame;

/// Number of term partitions rotated round-robin.
pub const PARTITION_COUNT: usize = 3;

/// Smallest allowed term length (64 KiB).
pub const TERM_MIN_LENGTH: usize = 64 * 1024;

/// Largest allowed term length (1 GiB).
pub const TERM_MAX_LENGTH: usize = 1024 * 1024 * 1024;

pub const TERM_TAIL_COUNTERS_OFFSET: usize = 0;
pub const LOG_ACTIVE_PARTITION_INDEX_OFFSET: usize = 24;
pub const LOG_INITIAL_TERM_ID_OFFSET: usize = 28;
pub const LOG_MTU_LENGTH_OFFSET: usize = 32;
pub const LOG_TERM_LENGTH_OFFSET: usize = 36;
pub const LOG_TIME_OF_LAST_SM_OFFSET: usize = 40;
pub const LOG_DEFAULT_FRAME_HEADER_OFFSET: usize = 48;

/// Total length of the metadata block at the end of the log file.
pub const LOG_META_DATA_LENGTH: usize = 128;

/// Byte offset of a partition's raw-tail word within the metadata block.
#[inline]
pub const fn tail_counter_offset(partition_index: usize) -> usize {
    TERM_TAIL_COUNTERS_OFFSET + partition_index * 8
}

/// Pack `(term_id, tail_offset)` into a raw-tail word.
#[inline]
pub const fn pack_tail(term_id: i32, tail_offset: i32) -> i64 {
    ((term_id as i64) << 32) | (tail_offset as u32 as i64)
}

/// Term id from a raw-tail word.
#[inline]
pub const fn term_id(raw_tail: i64) -> i32 {
    (raw_tail >> 32) as i32
}

/// Tail offset from a raw-tail word, clamped to the term length. The clamp
/// is defensive: the writer never stores a tail past the term, but readers
/// must not trust that.
#[inline]
pub fn term_offset(raw_tail: i64, term_length: usize) -> i32 {
    let tail = raw_tail & 0xFFFF_FFFF;
    tail.min(term_length as i64) as i32
}

/// Round-robin successor of a partition index.
#[inline]
pub const fn next_partition_index(index: usize) -> usize {
    (index + 1) % PARTITION_COUNT
}

/// Stream position at which a term begins. Term-id arithmetic wraps at i32
/// like the on-wire field it comes from.
#[inline]
pub fn compute_term_begin_position(
    term_id: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    let term_count = term_id.wrapping_sub(initial_term_id) as i64;
    term_count << position_bits_to_shift
}

/// Stream position of `(term_id, term_offset)`.
#[inline]
pub fn compute_position(
    term_id: i32,
    term_offset: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    compute_term_begin_position(term_id, position_bits_to_shift, initial_term_id)
        + term_offset as i64
}

pub fn check_term_length(term_length: usize) -> LogResult<()> {
    if !(TERM_MIN_LENGTH..=TERM_MAX_LENGTH).contains(&term_length) {
        return Err(LogError::invalid_config(format!(
            "term length {term_length} outside [{TERM_MIN_LENGTH}, {TERM_MAX_LENGTH}]"
        )));
    }
    if !term_length.is_power_of_two() {
        return Err(LogError::invalid_config(format!(
            "term length {term_length} is not a power of two"
        )));
    }
    Ok(())
}

pub fn check_mtu_length(mtu_length: usize, term_length: usize) -> LogResult<()> {
    if mtu_length % frame::FRAME_ALIGNMENT != 0 {
        return Err(LogError::invalid_config(format!(
            "MTU {mtu_length} is not a multiple of the frame alignment"
        )));
    }
    if mtu_length < frame::HEADER_LENGTH + frame::FRAME_ALIGNMENT {
        return Err(LogError::invalid_config(format!(
            "MTU {mtu_length} leaves no room for a payload"
        )));
    }
    if mtu_length > term_length {
        return Err(LogError::invalid_config(format!(
            "MTU {mtu_length} exceeds term length {term_length}"
        )));
    }
    Ok(())
}

pub fn active_partition_index(meta: &LogBuffer) -> usize {
    meta.get_i32(LOG_ACTIVE_PARTITION_INDEX_OFFSET) as usize
}

pub fn active_partition_index_volatile(meta: &LogBuffer) -> usize {
    meta.get_i32_volatile(LOG_ACTIVE_PARTITION_INDEX_OFFSET) as usize
}

pub fn set_active_partition_index_ordered(meta: &LogBuffer, index: usize) {
    meta.put_i32_ordered(LOG_ACTIVE_PARTITION_INDEX_OFFSET, index as i32);
}

pub fn initial_term_id(meta: &LogBuffer) -> i32 {
    meta.get_i32(LOG_INITIAL_TERM_ID_OFFSET)
}

pub fn mtu_length(meta: &LogBuffer) -> usize {
    meta.get_i32(LOG_MTU_LENGTH_OFFSET) as usize
}

pub fn term_length(meta: &LogBuffer) -> usize {
    meta.get_i32(LOG_TERM_LENGTH_OFFSET) as usize
}

/// Raw tail of the currently active partition, observed with acquire
/// semantics. Readers use this for the external position view.
pub fn raw_tail_volatile(meta: &LogBuffer) -> i64 {
    let index = active_partition_index_volatile(meta);
    meta.get_i64_volatile(tail_counter_offset(index))
}

pub fn time_of_last_status_message(meta: &LogBuffer) -> i64 {
    meta.get_i64_volatile(LOG_TIME_OF_LAST_SM_OFFSET)
}

/// Stamped by the media driver when a status message arrives; exposed here
/// for that side of the boundary and for tests.
pub fn set_time_of_last_status_message_ordered(meta: &LogBuffer, timestamp_ms: i64) {
    meta.put_i64_ordered(LOG_TIME_OF_LAST_SM_OFFSET, timestamp_ms);
}

pub fn default_frame_header(meta: &LogBuffer) -> [u8; frame::HEADER_LENGTH] {
    let mut header = [0u8; frame::HEADER_LENGTH];
    meta.get_bytes(LOG_DEFAULT_FRAME_HEADER_OFFSET, &mut header);
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_tail_packing_round_trip() {
        let raw = pack_tail(7, 4096);
        assert_eq!(term_id(raw), 7);
        assert_eq!(term_offset(raw, 64 * 1024), 4096);

        let raw = pack_tail(-3, 0);
        assert_eq!(term_id(raw), -3);
        assert_eq!(term_offset(raw, 64 * 1024), 0);
    }

    #[test]
    fn term_offset_clamps_to_term_length() {
        let raw = pack_tail(1, (64 * 1024 + 4096) as i32);
        assert_eq!(term_offset(raw, 64 * 1024), 64 * 1024);
    }

    #[test]
    fn partition_indexes_rotate_round_robin() {
        assert_eq!(next_partition_index(0), 1);
        assert_eq!(next_partition_index(1), 2);
        assert_eq!(next_partition_index(2), 0);
    }

    #[test]
    fn position_computation() {
        let bits = (64usize * 1024).trailing_zeros();
        assert_eq!(compute_position(0, 0, bits, 0), 0);
        assert_eq!(compute_position(0, 128, bits, 0), 128);
        assert_eq!(compute_position(1, 0, bits, 0), 64 * 1024);
        assert_eq!(compute_position(3, 96, bits, 1), 2 * 64 * 1024 + 96);
    }

    #[test]
    fn position_survives_term_id_wrap() {
        let bits = (64usize * 1024).trailing_zeros();
        let initial = i32::MAX - 1;
        let wrapped = initial.wrapping_add(3);
        assert_eq!(
            compute_term_begin_position(wrapped, bits, initial),
            3 * 64 * 1024
        );
    }

    #[test]
    fn term_length_validation() {
        assert!(check_term_length(64 * 1024).is_ok());
        assert!(check_term_length(1024 * 1024 * 1024).is_ok());
        assert!(check_term_length(32 * 1024).is_err());
        assert!(check_term_length(96 * 1024).is_err());
        assert!(check_term_length(2 * 1024 * 1024 * 1024).is_err());
    }

    #[test]
    fn mtu_validation() {
        assert!(check_mtu_length(4096, 64 * 1024).is_ok());
        assert!(check_mtu_length(1408, 64 * 1024).is_ok());
        assert!(check_mtu_length(1400, 64 * 1024).is_err());
        assert!(check_mtu_length(32, 64 * 1024).is_err());
        assert!(check_mtu_length(128 * 1024, 64 * 1024).is_err());
    }
}
