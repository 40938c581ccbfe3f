//! Position counters shared between the writer, the media driver and
//! observers.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::buffer::LogBuffer;
use crate::layout;

/// A position some other party advances; the writer only reads it. The
/// load carries acquire semantics so the writer observes everything the
/// advancing side published before the move.
pub trait ReadablePosition: Send + Sync {
    fn get_volatile(&self) -> i64;
}

/// An `AtomicI64`-backed position. The media driver (or a test standing in
/// for it) advances the consumer limit through one of these.
#[derive(Debug, Default)]
pub struct AtomicPosition {
    value: AtomicI64,
}

impl AtomicPosition {
    pub fn new(initial: i64) -> Arc<Self> {
        Arc::new(Self {
            value: AtomicI64::new(initial),
        })
    }

    pub fn set_ordered(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }
}

impl ReadablePosition for AtomicPosition {
    fn get_volatile(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }
}

/// Cross-thread view of a publication's stream position, read from the
/// shared metadata rather than the writer's local state. Across a rotation
/// the two can briefly disagree; treat this as a hint.
#[derive(Clone)]
pub struct PositionObserver {
    log: Arc<crate::log_buffers::LogBuffers>,
    closed: Arc<AtomicBool>,
    initial_term_id: i32,
    position_bits_to_shift: u32,
}

impl PositionObserver {
    pub(crate) fn new(
        log: Arc<crate::log_buffers::LogBuffers>,
        closed: Arc<AtomicBool>,
        initial_term_id: i32,
        position_bits_to_shift: u32,
    ) -> Self {
        Self {
            log,
            closed,
            initial_term_id,
            position_bits_to_shift,
        }
    }

    /// Current stream position, or `None` once the publication is closed.
    pub fn position(&self) -> Option<i64> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let meta = self.log.meta_data_buffer();
        Some(observe_position(
            &meta,
            self.log.term_length(),
            self.position_bits_to_shift,
            self.initial_term_id,
        ))
    }
}

/// Read the active partition's raw tail and fold it into a stream position.
pub(crate) fn observe_position(
    meta: &LogBuffer,
    term_length: usize,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    let raw_tail = layout::raw_tail_volatile(meta);
    let term_offset = layout::term_offset(raw_tail, term_length);
    layout::compute_position(
        layout::term_id(raw_tail),
        term_offset,
        position_bits_to_shift,
        initial_term_id,
    )
}
