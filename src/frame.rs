//! Bit-exact layout of a data frame within a term buffer.
//!
//! ```text
//! 0                   8        12        16        20        24
//! +---------+---+---+----+--------+---------+---------+---------+--------+
//! | length  | v | f | ty | t_off  | session | stream  | term_id | resv'd |
//! |  i32    | u8| u8| u16|  i32   |  i32    |  i32    |  i32    |  i64   |
//! +---------+---+---+----+--------+---------+---------+---------+--------+
//! 32: payload...
//! ```
//!
//! All fields little-endian. `length` is negative while the frame is under
//! construction and positive once published; the publish is a release store
//! and readers use an acquire load, so a positive length carries the header
//! and payload bytes with it.

use crate::buffer::LogBuffer;

/// Length of a frame header in bytes.
pub const HEADER_LENGTH: usize = 32;

/// Frames are laid out on this alignment within a term.
pub const FRAME_ALIGNMENT: usize = 32;

/// Flag for the first fragment of a message.
pub const BEGIN_FRAGMENT_FLAG: u8 = 0x80;

/// Flag for the last fragment of a message.
pub const END_FRAGMENT_FLAG: u8 = 0x40;

/// Both fragment flags; a message that fits one frame carries these.
pub const UNFRAGMENTED: u8 = BEGIN_FRAGMENT_FLAG | END_FRAGMENT_FLAG;

/// Frame type for padding at the end of a term.
pub const HDR_TYPE_PAD: u16 = 0x00;

/// Frame type for application data.
pub const HDR_TYPE_DATA: u16 = 0x01;

/// Current frame format version.
pub const FRAME_VERSION: u8 = 1;

pub const FRAME_LENGTH_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const FLAGS_OFFSET: usize = 5;
pub const TYPE_OFFSET: usize = 6;
pub const TERM_OFFSET_OFFSET: usize = 8;
pub const SESSION_ID_OFFSET: usize = 12;
pub const STREAM_ID_OFFSET: usize = 16;
pub const TERM_ID_OFFSET: usize = 20;
pub const RESERVED_VALUE_OFFSET: usize = 24;

/// Largest message the log accepts, fragmented or not, for a term length.
/// Bounded so a single message cannot monopolize a term.
pub const MAX_MESSAGE_LENGTH_LIMIT: usize = 16 * 1024 * 1024;

/// Total aligned space a payload of `payload_length` occupies in a term.
#[inline]
pub const fn aligned_frame_length(payload_length: usize) -> usize {
    (payload_length + HEADER_LENGTH + (FRAME_ALIGNMENT - 1)) & !(FRAME_ALIGNMENT - 1)
}

/// Round a raw frame length (header included) up to the frame alignment.
#[inline]
pub const fn align_frame(frame_length: usize) -> usize {
    (frame_length + (FRAME_ALIGNMENT - 1)) & !(FRAME_ALIGNMENT - 1)
}

/// Maximum message length for a term: an eighth of the term, capped.
#[inline]
pub const fn compute_max_message_length(term_length: usize) -> usize {
    let bound = term_length / 8;
    if bound < MAX_MESSAGE_LENGTH_LIMIT {
        bound
    } else {
        MAX_MESSAGE_LENGTH_LIMIT
    }
}

/// Publish a frame's length, making header and payload visible to readers.
#[inline]
pub fn frame_length_ordered(term: &LogBuffer, frame_offset: usize, frame_length: i32) {
    term.put_i32_ordered(frame_offset + FRAME_LENGTH_OFFSET, frame_length);
}

/// Read a frame's length with acquire semantics. Non-positive means the
/// frame is not yet available.
#[inline]
pub fn frame_length_volatile(term: &LogBuffer, frame_offset: usize) -> i32 {
    term.get_i32_volatile(frame_offset + FRAME_LENGTH_OFFSET)
}

#[inline]
pub fn frame_type(term: &LogBuffer, frame_offset: usize) -> u16 {
    term.get_u16(frame_offset + TYPE_OFFSET)
}

#[inline]
pub fn set_frame_type(term: &LogBuffer, frame_offset: usize, frame_type: u16) {
    term.put_u16(frame_offset + TYPE_OFFSET, frame_type);
}

#[inline]
pub fn frame_flags(term: &LogBuffer, frame_offset: usize) -> u8 {
    term.get_u8(frame_offset + FLAGS_OFFSET)
}

#[inline]
pub fn set_frame_flags(term: &LogBuffer, frame_offset: usize, flags: u8) {
    term.put_u8(frame_offset + FLAGS_OFFSET, flags);
}

#[inline]
pub fn is_padding_frame(term: &LogBuffer, frame_offset: usize) -> bool {
    frame_type(term, frame_offset) == HDR_TYPE_PAD
}

#[inline]
pub fn has_begin_flag(flags: u8) -> bool {
    flags & BEGIN_FRAGMENT_FLAG != 0
}

#[inline]
pub fn has_end_flag(flags: u8) -> bool {
    flags & END_FRAGMENT_FLAG != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr::NonNull;

    #[test]
    fn aligned_length_rounds_up_to_frame_alignment() {
        assert_eq!(aligned_frame_length(0), 32);
        assert_eq!(aligned_frame_length(1), 64);
        assert_eq!(aligned_frame_length(32), 64);
        assert_eq!(aligned_frame_length(33), 96);
        assert_eq!(aligned_frame_length(96), 128);
        assert_eq!(aligned_frame_length(100), 160);
    }

    #[test]
    fn max_message_length_is_an_eighth_of_the_term_capped() {
        assert_eq!(compute_max_message_length(64 * 1024), 8 * 1024);
        assert_eq!(compute_max_message_length(1024 * 1024 * 1024), MAX_MESSAGE_LENGTH_LIMIT);
    }

    #[test]
    fn flag_predicates() {
        assert!(has_begin_flag(UNFRAGMENTED));
        assert!(has_end_flag(UNFRAGMENTED));
        assert!(has_begin_flag(BEGIN_FRAGMENT_FLAG));
        assert!(!has_end_flag(BEGIN_FRAGMENT_FLAG));
        assert!(!has_begin_flag(0));
    }

    #[test]
    fn frame_field_round_trip() {
        let mut backing = vec![0u64; 16];
        let term = crate::buffer::LogBuffer::wrap(
            NonNull::new(backing.as_mut_ptr() as *mut u8).unwrap(),
            128,
        );

        set_frame_type(&term, 32, HDR_TYPE_PAD);
        set_frame_flags(&term, 32, UNFRAGMENTED);
        frame_length_ordered(&term, 32, 96);

        assert!(is_padding_frame(&term, 32));
        assert_eq!(frame_flags(&term, 32), UNFRAGMENTED);
        assert_eq!(frame_length_volatile(&term, 32), 96);
        assert!(!is_padding_frame(&term, 0));
    }
}
