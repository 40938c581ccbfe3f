use crate::buffer::LogBuffer;
use crate::frame;

/// Stamps frame headers from the log's default header template.
///
/// The template carries the fields that never change for a publication
/// (version, flags, type, session id, stream id). `write` lays it down and
/// patches the per-frame fields, leaving the length negative so readers
/// treat the frame as under construction until the appender publishes the
/// positive length with a release store.
#[derive(Debug, Clone)]
pub struct HeaderWriter {
    template: [u8; frame::HEADER_LENGTH],
}

impl HeaderWriter {
    pub fn new(default_header: [u8; frame::HEADER_LENGTH]) -> Self {
        Self {
            template: default_header,
        }
    }

    /// Write a header for a frame of `frame_length` bytes (header included,
    /// before alignment) at `frame_offset`.
    pub fn write(&self, term: &LogBuffer, frame_offset: usize, frame_length: usize, term_id: i32) {
        term.put_bytes(frame_offset, &self.template);

        let aligned = frame::align_frame(frame_length) as i32;
        term.put_i32(frame_offset + frame::FRAME_LENGTH_OFFSET, -aligned);
        term.put_i32(
            frame_offset + frame::TERM_OFFSET_OFFSET,
            frame_offset as i32,
        );
        term.put_i32(frame_offset + frame::TERM_ID_OFFSET, term_id);
    }

    pub fn session_id(&self) -> i32 {
        self.template_i32(frame::SESSION_ID_OFFSET)
    }

    pub fn stream_id(&self) -> i32 {
        self.template_i32(frame::STREAM_ID_OFFSET)
    }

    fn template_i32(&self, offset: usize) -> i32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.template[offset..offset + 4]);
        i32::from_le_bytes(bytes)
    }
}
