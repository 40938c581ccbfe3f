//! Single-writer append into one term partition.
//!
//! The appender keeps no cursor of its own: the publication passes in the
//! `(term_id, term_offset)` it expects, and the raw-tail word in the shared
//! metadata is the arbiter. Reservation is a compare-and-set from the
//! expected tail, so a log touched by anything other than its one writer
//! surfaces as [`LogError::Corruption`] instead of silent damage.

use tracing::warn;

use crate::buffer::LogBuffer;
use crate::error::{LogError, LogResult};
use crate::frame;
use crate::header::HeaderWriter;
use crate::layout;

/// Resulting-offset sentinel: the reservation would cross the term end.
/// The remainder has been padded and the caller must rotate terms.
pub(crate) const TRIPPED: i32 = -1;

/// Optional per-frame callback computing the header's reserved value. Runs
/// after the frame's payload is copied, so it may observe the final bytes.
pub type ReservedValueSupplier<'a> = &'a dyn Fn(&[u8]) -> i64;

/// A successfully reserved frame region, handed back from [`TermAppender::claim`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClaimedRegion {
    pub resulting_offset: i32,
    pub frame_offset: usize,
    pub frame_length: usize,
}

pub(crate) enum ClaimResult {
    Claimed(ClaimedRegion),
    Tripped,
}

pub(crate) struct TermAppender {
    term_buffer: LogBuffer,
    meta_data_buffer: LogBuffer,
    tail_counter_offset: usize,
}

impl TermAppender {
    pub fn new(
        term_buffer: LogBuffer,
        meta_data_buffer: LogBuffer,
        partition_index: usize,
    ) -> Self {
        Self {
            term_buffer,
            meta_data_buffer,
            tail_counter_offset: layout::tail_counter_offset(partition_index),
        }
    }

    #[inline]
    pub fn term_buffer(&self) -> &LogBuffer {
        &self.term_buffer
    }

    #[inline]
    pub fn raw_tail(&self) -> i64 {
        self.meta_data_buffer.get_i64(self.tail_counter_offset)
    }

    /// Seed this partition's tail for a new term when the publication
    /// rotates onto it.
    pub fn tail_term_id(&self, next_term_id: i32) {
        self.meta_data_buffer
            .put_i64_ordered(self.tail_counter_offset, layout::pack_tail(next_term_id, 0));
    }

    /// Append a message that fits in a single frame. Returns the new term
    /// offset, or [`TRIPPED`].
    pub fn append_unfragmented_message(
        &self,
        term_id: i32,
        term_offset: i32,
        header: &HeaderWriter,
        msg: &[u8],
        reserved_value_supplier: Option<ReservedValueSupplier<'_>>,
    ) -> LogResult<i32> {
        let frame_length = msg.len() + frame::HEADER_LENGTH;
        let aligned_length = frame::align_frame(frame_length);

        let resulting_offset = self.reserve(term_id, term_offset, aligned_length, header)?;
        if resulting_offset == TRIPPED {
            return Ok(TRIPPED);
        }

        let frame_offset = term_offset as usize;
        header.write(&self.term_buffer, frame_offset, frame_length, term_id);
        self.term_buffer
            .put_bytes(frame_offset + frame::HEADER_LENGTH, msg);

        if let Some(supplier) = reserved_value_supplier {
            let payload = self
                .term_buffer
                .slice(frame_offset + frame::HEADER_LENGTH, msg.len());
            let value = supplier(payload);
            self.term_buffer
                .put_i64(frame_offset + frame::RESERVED_VALUE_OFFSET, value);
        }

        frame::frame_length_ordered(&self.term_buffer, frame_offset, frame_length as i32);
        Ok(resulting_offset)
    }

    /// Append a message as a run of fragments, each up to
    /// `max_payload_length` bytes. The whole run is reserved in one tail
    /// update and every fragment lands in this term, or none do.
    pub fn append_fragmented_message(
        &self,
        term_id: i32,
        term_offset: i32,
        header: &HeaderWriter,
        msg: &[u8],
        max_payload_length: usize,
        reserved_value_supplier: Option<ReservedValueSupplier<'_>>,
    ) -> LogResult<i32> {
        debug_assert!(msg.len() > max_payload_length);

        let num_max_payloads = msg.len() / max_payload_length;
        let remaining_payload = msg.len() % max_payload_length;
        let last_frame_length = if remaining_payload > 0 {
            frame::align_frame(remaining_payload + frame::HEADER_LENGTH)
        } else {
            0
        };
        let required_length =
            num_max_payloads * (max_payload_length + frame::HEADER_LENGTH) + last_frame_length;

        let resulting_offset = self.reserve(term_id, term_offset, required_length, header)?;
        if resulting_offset == TRIPPED {
            return Ok(TRIPPED);
        }

        let mut flags = frame::BEGIN_FRAGMENT_FLAG;
        let mut frame_offset = term_offset as usize;
        let mut src_offset = 0usize;
        let mut remaining = msg.len();

        loop {
            let bytes_to_write = remaining.min(max_payload_length);
            let frame_length = bytes_to_write + frame::HEADER_LENGTH;

            header.write(&self.term_buffer, frame_offset, frame_length, term_id);
            self.term_buffer.put_bytes(
                frame_offset + frame::HEADER_LENGTH,
                &msg[src_offset..src_offset + bytes_to_write],
            );

            remaining -= bytes_to_write;
            if remaining == 0 {
                flags |= frame::END_FRAGMENT_FLAG;
            }
            frame::set_frame_flags(&self.term_buffer, frame_offset, flags);

            if let Some(supplier) = reserved_value_supplier {
                let payload = self
                    .term_buffer
                    .slice(frame_offset + frame::HEADER_LENGTH, bytes_to_write);
                let value = supplier(payload);
                self.term_buffer
                    .put_i64(frame_offset + frame::RESERVED_VALUE_OFFSET, value);
            }

            frame::frame_length_ordered(&self.term_buffer, frame_offset, frame_length as i32);

            if remaining == 0 {
                break;
            }
            flags = 0;
            frame_offset += frame::align_frame(frame_length);
            src_offset += bytes_to_write;
        }

        Ok(resulting_offset)
    }

    /// Reserve a frame for zero-copy filling. The header is written with
    /// the in-progress sentinel; the claim's commit publishes it.
    pub fn claim(
        &self,
        term_id: i32,
        term_offset: i32,
        header: &HeaderWriter,
        length: usize,
    ) -> LogResult<ClaimResult> {
        let frame_length = length + frame::HEADER_LENGTH;
        let aligned_length = frame::align_frame(frame_length);

        let resulting_offset = self.reserve(term_id, term_offset, aligned_length, header)?;
        if resulting_offset == TRIPPED {
            return Ok(ClaimResult::Tripped);
        }

        let frame_offset = term_offset as usize;
        header.write(&self.term_buffer, frame_offset, frame_length, term_id);

        Ok(ClaimResult::Claimed(ClaimedRegion {
            resulting_offset,
            frame_offset,
            frame_length,
        }))
    }

    /// Move the raw tail forward by `required` bytes, or trip the term.
    ///
    /// The relaxed load is for observation only; the CAS that claims the
    /// region publishes with release so position observers see it. A term
    /// id mismatch or a CAS failure means some other party wrote our tail.
    fn reserve(
        &self,
        term_id: i32,
        term_offset: i32,
        required: usize,
        header: &HeaderWriter,
    ) -> LogResult<i32> {
        let term_length = self.term_buffer.capacity();
        let raw_tail = self.raw_tail();
        let observed_term_id = layout::term_id(raw_tail);
        let observed_tail = (raw_tail & 0xFFFF_FFFF) as usize;

        if observed_term_id != term_id {
            warn!(
                expected = term_id,
                observed = observed_term_id,
                "raw tail carries a stale term id"
            );
            return Err(LogError::corruption(format!(
                "raw tail term id {observed_term_id} does not match expected {term_id}"
            )));
        }

        if observed_tail >= term_length {
            // Already at the end of the term; nothing left to pad.
            return Ok(TRIPPED);
        }

        if observed_tail != term_offset as usize {
            warn!(
                expected = term_offset,
                observed = observed_tail,
                "raw tail diverged from the writer's offset"
            );
            return Err(LogError::corruption(format!(
                "raw tail offset {observed_tail} does not match expected {term_offset}"
            )));
        }

        let frame_offset = term_offset as usize;
        if frame_offset + required > term_length {
            let new_tail = layout::pack_tail(term_id, term_length as i32);
            if !self
                .meta_data_buffer
                .compare_and_set_i64(self.tail_counter_offset, raw_tail, new_tail)
            {
                return Err(LogError::corruption("raw tail changed under the writer"));
            }

            let padding_length = term_length - frame_offset;
            header.write(&self.term_buffer, frame_offset, padding_length, term_id);
            frame::set_frame_type(&self.term_buffer, frame_offset, frame::HDR_TYPE_PAD);
            frame::set_frame_flags(&self.term_buffer, frame_offset, frame::UNFRAGMENTED);
            frame::frame_length_ordered(&self.term_buffer, frame_offset, padding_length as i32);
            return Ok(TRIPPED);
        }

        let resulting_offset = frame_offset + required;
        let new_tail = layout::pack_tail(term_id, resulting_offset as i32);
        if !self
            .meta_data_buffer
            .compare_and_set_i64(self.tail_counter_offset, raw_tail, new_tail)
        {
            return Err(LogError::corruption("raw tail changed under the writer"));
        }

        Ok(resulting_offset as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::test_support::temp_log;

    const TERM_LENGTH: usize = 64 * 1024;

    fn appender_fixture() -> (tempfile::TempDir, crate::log_buffers::LogBuffers) {
        temp_log(&LogConfig {
            initial_term_id: 3,
            session_id: 9,
            stream_id: 77,
            ..LogConfig::default()
        })
    }

    fn appender_for(log: &crate::log_buffers::LogBuffers) -> (TermAppender, HeaderWriter) {
        let appender = TermAppender::new(log.term_buffer(0), log.meta_data_buffer(), 0);
        let header = HeaderWriter::new(layout::default_frame_header(&log.meta_data_buffer()));
        (appender, header)
    }

    #[test]
    fn unfragmented_append_publishes_a_frame() {
        let (_tmp, log) = appender_fixture();
        let (appender, header) = appender_for(&log);
        let msg = [7u8; 100];

        let resulting = appender
            .append_unfragmented_message(3, 0, &header, &msg, None)
            .expect("append");

        assert_eq!(resulting, 160); // 100 + 32 header, aligned to 32
        let term = appender.term_buffer();
        assert_eq!(frame::frame_length_volatile(term, 0), 132);
        assert_eq!(frame::frame_flags(term, 0), frame::UNFRAGMENTED);
        assert_eq!(term.get_i32(frame::TERM_ID_OFFSET), 3);
        assert_eq!(term.get_i32(frame::TERM_OFFSET_OFFSET), 0);
        assert_eq!(term.get_i32(frame::SESSION_ID_OFFSET), 9);
        assert_eq!(term.slice(frame::HEADER_LENGTH, 100), &msg[..]);
        assert_eq!(appender.raw_tail(), layout::pack_tail(3, 160));
    }

    #[test]
    fn zero_length_message_still_writes_a_header_only_frame() {
        let (_tmp, log) = appender_fixture();
        let (appender, header) = appender_for(&log);

        let resulting = appender
            .append_unfragmented_message(3, 0, &header, &[], None)
            .expect("append");

        assert_eq!(resulting, frame::FRAME_ALIGNMENT as i32);
        assert_eq!(
            frame::frame_length_volatile(appender.term_buffer(), 0),
            frame::HEADER_LENGTH as i32
        );
    }

    #[test]
    fn reserved_value_supplier_observes_the_copied_payload() {
        let (_tmp, log) = appender_fixture();
        let (appender, header) = appender_for(&log);
        let msg = [5u8; 16];

        let supplier = |payload: &[u8]| -> i64 { payload.iter().map(|b| *b as i64).sum() };
        appender
            .append_unfragmented_message(3, 0, &header, &msg, Some(&supplier))
            .expect("append");

        assert_eq!(
            appender.term_buffer().get_i64(frame::RESERVED_VALUE_OFFSET),
            16 * 5
        );
    }

    #[test]
    fn straddling_append_pads_the_remainder_and_trips() {
        let (_tmp, log) = appender_fixture();
        let (appender, header) = appender_for(&log);
        let near_end = (TERM_LENGTH - 64) as i32;
        log.meta_data_buffer().put_i64(
            layout::tail_counter_offset(0),
            layout::pack_tail(3, near_end),
        );

        let resulting = appender
            .append_unfragmented_message(3, near_end, &header, &[1u8; 100], None)
            .expect("append");

        assert_eq!(resulting, TRIPPED);
        let term = appender.term_buffer();
        let frame_offset = near_end as usize;
        assert_eq!(frame::frame_length_volatile(term, frame_offset), 64);
        assert!(frame::is_padding_frame(term, frame_offset));
        assert_eq!(appender.raw_tail(), layout::pack_tail(3, TERM_LENGTH as i32));
    }

    #[test]
    fn tail_at_term_end_trips_without_padding() {
        let (_tmp, log) = appender_fixture();
        let (appender, header) = appender_for(&log);
        log.meta_data_buffer().put_i64(
            layout::tail_counter_offset(0),
            layout::pack_tail(3, TERM_LENGTH as i32),
        );

        let resulting = appender
            .append_unfragmented_message(3, TERM_LENGTH as i32, &header, &[1u8; 8], None)
            .expect("append");

        assert_eq!(resulting, TRIPPED);
        // No padding frame: the first word of the term is untouched.
        assert_eq!(frame::frame_length_volatile(appender.term_buffer(), 0), 0);
    }

    #[test]
    fn stale_term_id_is_corruption() {
        let (_tmp, log) = appender_fixture();
        let (appender, header) = appender_for(&log);

        let err = appender
            .append_unfragmented_message(4, 0, &header, &[0u8; 8], None)
            .unwrap_err();
        assert!(matches!(err, LogError::Corruption(_)));
    }

    #[test]
    fn diverged_tail_offset_is_corruption() {
        let (_tmp, log) = appender_fixture();
        let (appender, header) = appender_for(&log);

        let err = appender
            .append_unfragmented_message(3, 64, &header, &[0u8; 8], None)
            .unwrap_err();
        assert!(matches!(err, LogError::Corruption(_)));
    }

    #[test]
    fn fragmented_append_flags_first_and_last() {
        let (_tmp, log) = appender_fixture();
        let (appender, header) = appender_for(&log);
        let max_payload = 1376;
        let msg: Vec<u8> = (0..4000u32).map(|i| i as u8).collect();

        let resulting = appender
            .append_fragmented_message(3, 0, &header, &msg, max_payload, None)
            .expect("append");

        // 1376 + 1376 + 1248 across three frames.
        assert_eq!(resulting, (2 * 1408 + 1280) as i32);

        let term = appender.term_buffer();
        let mut offsets = Vec::new();
        let mut offset = 0usize;
        while offset < resulting as usize {
            let frame_length = frame::frame_length_volatile(term, offset);
            assert!(frame_length > 0);
            offsets.push((offset, frame_length, frame::frame_flags(term, offset)));
            offset += frame::align_frame(frame_length as usize);
        }

        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets[0].1, (1376 + 32) as i32);
        assert_eq!(offsets[0].2, frame::BEGIN_FRAGMENT_FLAG);
        assert_eq!(offsets[1].1, (1376 + 32) as i32);
        assert_eq!(offsets[1].2, 0);
        assert_eq!(offsets[2].1, (1248 + 32) as i32);
        assert_eq!(offsets[2].2, frame::END_FRAGMENT_FLAG);

        // Payload bytes reassemble to the original message.
        let mut reassembled = Vec::new();
        for (offset, frame_length, _) in &offsets {
            reassembled.extend_from_slice(
                term.slice(
                    offset + frame::HEADER_LENGTH,
                    *frame_length as usize - frame::HEADER_LENGTH,
                ),
            );
        }
        assert_eq!(reassembled, msg);
    }

    #[test]
    fn fragmented_append_with_exact_multiple_ends_on_a_full_frame() {
        let (_tmp, log) = appender_fixture();
        let (appender, header) = appender_for(&log);
        let max_payload = 1376;
        let msg = vec![9u8; 2 * max_payload];

        let resulting = appender
            .append_fragmented_message(3, 0, &header, &msg, max_payload, None)
            .expect("append");
        assert_eq!(resulting, (2 * 1408) as i32);

        let term = appender.term_buffer();
        assert_eq!(frame::frame_flags(term, 0), frame::BEGIN_FRAGMENT_FLAG);
        assert_eq!(frame::frame_flags(term, 1408), frame::END_FRAGMENT_FLAG);
    }

    #[test]
    fn claim_reserves_and_leaves_the_frame_unpublished() {
        let (_tmp, log) = appender_fixture();
        let (appender, header) = appender_for(&log);

        let region = match appender.claim(3, 0, &header, 256).expect("claim") {
            ClaimResult::Claimed(region) => region,
            ClaimResult::Tripped => panic!("unexpected trip"),
        };

        assert_eq!(region.resulting_offset, 288);
        assert_eq!(region.frame_offset, 0);
        assert_eq!(region.frame_length, 288);
        // Sentinel length until committed.
        assert_eq!(
            frame::frame_length_volatile(appender.term_buffer(), 0),
            -288
        );
        assert_eq!(appender.raw_tail(), layout::pack_tail(3, 288));
    }

    #[test]
    fn tail_term_id_seeds_a_fresh_term() {
        let (_tmp, log) = appender_fixture();
        let (appender, _header) = appender_for(&log);

        appender.tail_term_id(4);
        assert_eq!(appender.raw_tail(), layout::pack_tail(4, 0));
    }
}
