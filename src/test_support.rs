//! Shared fixtures for unit and integration tests: a temp-backed log, a
//! scriptable conductor, and a frame reader that walks published frames
//! the way a consumer would.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::buffer::LogBuffer;
use crate::conductor::ConductorLink;
use crate::error::LogResult;
use crate::frame;

/// Create a log file inside a fresh temp dir. The dir guard keeps the file
/// alive for the test's duration. Integration tests build their own; this
/// one serves the in-crate unit tests.
#[cfg(test)]
pub(crate) fn temp_log(
    config: &crate::config::LogConfig,
) -> (tempfile::TempDir, crate::log_buffers::LogBuffers) {
    let tmp = tempfile::TempDir::new().expect("tempdir");
    let path = tmp.path().join("publication.log");
    let log = crate::log_buffers::LogBuffers::create(&path, config).expect("create log");
    (tmp, log)
}

/// A conductor whose liveness answer and clock the test scripts directly.
pub struct StubConductor {
    lock: ReentrantMutex<()>,
    connected: AtomicBool,
    now_ms: AtomicI64,
    liveness_timeout_ms: i64,
    released: Mutex<Vec<i64>>,
    destinations: Mutex<Vec<(i64, String)>>,
}

impl StubConductor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: ReentrantMutex::new(()),
            connected: AtomicBool::new(true),
            now_ms: AtomicI64::new(0),
            liveness_timeout_ms: 5_000,
            released: Mutex::new(Vec::new()),
            destinations: Mutex::new(Vec::new()),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn advance_clock_ms(&self, delta: i64) {
        self.now_ms.fetch_add(delta, Ordering::AcqRel);
    }

    pub fn released_registrations(&self) -> Vec<i64> {
        self.released.lock().clone()
    }

    pub fn destinations(&self) -> Vec<(i64, String)> {
        self.destinations.lock().clone()
    }
}

impl ConductorLink for StubConductor {
    fn client_lock(&self) -> &ReentrantMutex<()> {
        &self.lock
    }

    fn is_publication_connected(&self, time_of_last_status_ms: i64) -> bool {
        let now = self.now_ms.load(Ordering::Acquire);
        self.connected.load(Ordering::Acquire)
            && now - time_of_last_status_ms <= self.liveness_timeout_ms
    }

    fn release_publication(&self, registration_id: i64) {
        self.released.lock().push(registration_id);
    }

    fn add_destination(&self, registration_id: i64, endpoint: &str) -> LogResult<()> {
        self.destinations
            .lock()
            .push((registration_id, endpoint.to_string()));
        Ok(())
    }

    fn remove_destination(&self, registration_id: i64, endpoint: &str) -> LogResult<()> {
        self.destinations
            .lock()
            .retain(|(id, ep)| !(*id == registration_id && ep == endpoint));
        Ok(())
    }
}

/// A published frame as a consumer sees it.
#[derive(Debug, Clone)]
pub struct FrameView {
    pub frame_offset: usize,
    pub frame_length: i32,
    pub frame_type: u16,
    pub flags: u8,
    pub term_offset: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub term_id: i32,
    pub reserved_value: i64,
    pub payload: Vec<u8>,
}

/// Walk the published frames of a term from `offset`, stopping at the
/// first unpublished slot. Reads lengths with acquire semantics, as a real
/// consumer must.
pub fn read_frames(term: &LogBuffer, mut offset: usize) -> Vec<FrameView> {
    let mut frames = Vec::new();
    while offset < term.capacity() {
        let frame_length = frame::frame_length_volatile(term, offset);
        if frame_length <= 0 {
            break;
        }
        let payload_length = frame_length as usize - frame::HEADER_LENGTH;
        let mut payload = vec![0u8; payload_length];
        term.get_bytes(offset + frame::HEADER_LENGTH, &mut payload);

        frames.push(FrameView {
            frame_offset: offset,
            frame_length,
            frame_type: frame::frame_type(term, offset),
            flags: frame::frame_flags(term, offset),
            term_offset: term.get_i32(offset + frame::TERM_OFFSET_OFFSET),
            session_id: term.get_i32(offset + frame::SESSION_ID_OFFSET),
            stream_id: term.get_i32(offset + frame::STREAM_ID_OFFSET),
            term_id: term.get_i32(offset + frame::TERM_ID_OFFSET),
            reserved_value: term.get_i64(offset + frame::RESERVED_VALUE_OFFSET),
            payload,
        });

        offset += frame::align_frame(frame_length as usize);
    }
    frames
}

/// Reassemble the payload of the message beginning at `offset`, following
/// fragment flags until END.
pub fn reassemble_message(term: &LogBuffer, offset: usize) -> Vec<u8> {
    let mut message = Vec::new();
    for view in read_frames(term, offset) {
        if view.frame_type == frame::HDR_TYPE_PAD {
            continue;
        }
        if message.is_empty() {
            assert!(
                frame::has_begin_flag(view.flags),
                "first fragment missing BEGIN"
            );
        }
        message.extend_from_slice(&view.payload);
        if frame::has_end_flag(view.flags) {
            break;
        }
    }
    message
}
