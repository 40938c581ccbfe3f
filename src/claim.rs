use crate::buffer::LogBuffer;
use crate::frame;

/// A claimed frame awaiting its payload.
///
/// Returned by `ExclusivePublication::try_claim`; borrows the term buffer,
/// so the claim cannot outlive the publication's mapping and the
/// publication cannot append again while a claim is open. The header is
/// already written with a negative length; nothing is visible to consumers
/// until [`commit`](BufferClaim::commit).
///
/// `commit` and `abort` consume the claim, so a second resolution is
/// unrepresentable. Dropping an unresolved claim aborts the frame - the
/// region becomes padding consumers skip - and flags the bug in debug
/// builds.
#[must_use = "a claimed frame must be committed or aborted"]
#[derive(Debug)]
pub struct BufferClaim<'a> {
    term_buffer: &'a LogBuffer,
    frame_offset: usize,
    frame_length: usize,
    position: i64,
    resolved: bool,
}

impl<'a> BufferClaim<'a> {
    pub(crate) fn new(
        term_buffer: &'a LogBuffer,
        frame_offset: usize,
        frame_length: usize,
        position: i64,
    ) -> Self {
        Self {
            term_buffer,
            frame_offset,
            frame_length,
            position,
            resolved: false,
        }
    }

    /// Stream position the frame will occupy once committed.
    #[inline]
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Payload length in bytes.
    #[inline]
    pub fn length(&self) -> usize {
        self.frame_length - frame::HEADER_LENGTH
    }

    /// Offset of the payload within the term buffer.
    #[inline]
    pub fn offset(&self) -> usize {
        self.frame_offset + frame::HEADER_LENGTH
    }

    /// Mutable view of the payload region.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.term_buffer.slice_mut(self.offset(), self.length())
    }

    /// Write the header's reserved value.
    pub fn set_reserved_value(&mut self, value: i64) {
        self.term_buffer
            .put_i64(self.frame_offset + frame::RESERVED_VALUE_OFFSET, value);
    }

    pub fn reserved_value(&self) -> i64 {
        self.term_buffer
            .get_i64(self.frame_offset + frame::RESERVED_VALUE_OFFSET)
    }

    /// Publish the frame to consumers.
    pub fn commit(mut self) {
        frame::frame_length_ordered(
            self.term_buffer,
            self.frame_offset,
            self.frame_length as i32,
        );
        self.resolved = true;
    }

    /// Void the frame: consumers observe padding of the claimed length and
    /// skip it.
    pub fn abort(mut self) {
        self.abort_in_place();
    }

    fn abort_in_place(&mut self) {
        frame::set_frame_type(self.term_buffer, self.frame_offset, frame::HDR_TYPE_PAD);
        frame::set_frame_flags(self.term_buffer, self.frame_offset, frame::UNFRAGMENTED);
        frame::frame_length_ordered(
            self.term_buffer,
            self.frame_offset,
            self.frame_length as i32,
        );
        self.resolved = true;
    }
}

impl Drop for BufferClaim<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.abort_in_place();
            debug_assert!(false, "claimed frame dropped without commit or abort");
        }
    }
}
