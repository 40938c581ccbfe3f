//! The exclusive publication: single-writer orchestration of partition
//! selection, back-pressure, fragmentation and term rotation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::appender::{ClaimResult, TermAppender, TRIPPED};
use crate::claim::BufferClaim;
use crate::conductor::ConductorLink;
use crate::error::{LogError, LogResult};
use crate::frame;
use crate::header::HeaderWriter;
use crate::layout;
use crate::log_buffers::LogBuffers;
use crate::position::{observe_position, PositionObserver, ReadablePosition};

pub use crate::appender::ReservedValueSupplier;

/// The publication has not yet seen an active subscriber.
pub const NOT_CONNECTED: i64 = -1;

/// The consumer position limit prevented the offer.
pub const BACK_PRESSURED: i64 = -2;

/// An administration action (term rotation) intervened; retry.
pub const ADMIN_ACTION: i64 = -3;

/// The publication is closed and must no longer be used.
pub const CLOSED: i64 = -4;

/// Writer-local cursor into the log. Only the append path reads or writes
/// it, always through `&mut self`; the shared truth lives in the metadata's
/// raw tails.
#[derive(Debug, Clone, Copy)]
struct WriterState {
    active_partition_index: usize,
    term_id: i32,
    term_offset: i32,
    term_begin_position: i64,
}

/// Single-writer publisher onto a shared-memory term-rotating log.
///
/// `offer`, `try_claim` and `close` require `&mut self`: one thread owns
/// the append path. `position`, `position_limit`, `is_connected` and
/// `is_closed` take `&self` and touch only shared atomics, so a borrow of
/// the publication (or a [`PositionObserver`]) may watch from elsewhere.
pub struct ExclusivePublication {
    conductor: Arc<dyn ConductorLink>,
    channel: String,
    stream_id: i32,
    session_id: i32,
    initial_term_id: i32,
    registration_id: i64,
    max_message_length: usize,
    max_payload_length: usize,
    position_bits_to_shift: u32,

    state: WriterState,
    is_closed: Arc<AtomicBool>,

    appenders: [TermAppender; layout::PARTITION_COUNT],
    header_writer: HeaderWriter,
    position_limit: Arc<dyn ReadablePosition>,
    log_buffers: Arc<LogBuffers>,
}

impl ExclusivePublication {
    /// Wire a publication onto an opened log. Normally called from the
    /// conductor's registration handoff.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conductor: Arc<dyn ConductorLink>,
        channel: impl Into<String>,
        stream_id: i32,
        session_id: i32,
        position_limit: Arc<dyn ReadablePosition>,
        log_buffers: Arc<LogBuffers>,
        registration_id: i64,
    ) -> LogResult<Self> {
        let term_length = log_buffers.term_length();
        layout::check_term_length(term_length)?;

        let meta = log_buffers.meta_data_buffer();
        let mtu_length = layout::mtu_length(&meta);
        layout::check_mtu_length(mtu_length, term_length)?;

        let [term_0, term_1, term_2] = log_buffers.term_buffers();
        let appenders = [
            TermAppender::new(term_0, log_buffers.meta_data_buffer(), 0),
            TermAppender::new(term_1, log_buffers.meta_data_buffer(), 1),
            TermAppender::new(term_2, log_buffers.meta_data_buffer(), 2),
        ];

        let initial_term_id = layout::initial_term_id(&meta);
        let position_bits_to_shift = term_length.trailing_zeros();
        let active_partition_index = layout::active_partition_index(&meta);
        if active_partition_index >= layout::PARTITION_COUNT {
            return Err(LogError::corruption(format!(
                "active partition index {active_partition_index} out of range"
            )));
        }

        let raw_tail = appenders[active_partition_index].raw_tail();
        let term_id = layout::term_id(raw_tail);
        let term_offset = layout::term_offset(raw_tail, term_length);
        let term_begin_position =
            layout::compute_term_begin_position(term_id, position_bits_to_shift, initial_term_id);

        let channel = channel.into();
        debug!(
            %channel,
            stream_id,
            session_id,
            term_id,
            term_offset,
            "exclusive publication attached"
        );

        Ok(Self {
            conductor,
            channel,
            stream_id,
            session_id,
            initial_term_id,
            registration_id,
            max_message_length: frame::compute_max_message_length(term_length),
            max_payload_length: mtu_length - frame::HEADER_LENGTH,
            position_bits_to_shift,
            state: WriterState {
                active_partition_index,
                term_id,
                term_offset,
                term_begin_position,
            },
            is_closed: Arc::new(AtomicBool::new(false)),
            appenders,
            header_writer: HeaderWriter::new(layout::default_frame_header(&meta)),
            position_limit,
            log_buffers,
        })
    }

    /// Media address the publication delivers to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    /// Term id the stream started at; positions are relative to it.
    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    pub fn term_buffer_length(&self) -> usize {
        self.log_buffers.term_length()
    }

    /// Largest message `offer` accepts, fragmented across frames.
    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    /// Largest payload a single frame (and so `try_claim`) accepts.
    pub fn max_payload_length(&self) -> usize {
        self.max_payload_length
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    /// Whether a subscriber has been heard from recently.
    pub fn is_connected(&self) -> bool {
        !self.is_closed()
            && self
                .conductor
                .is_publication_connected(self.time_of_last_status_message())
    }

    /// Non-blocking publish of a message. Ok is the new stream position;
    /// transient conditions surface as [`LogError::NotConnected`],
    /// [`LogError::BackPressured`] and [`LogError::AdminAction`] (retry),
    /// terminal close as [`LogError::Closed`].
    pub fn offer(&mut self, msg: &[u8]) -> LogResult<i64> {
        self.offer_with_reserved(msg, None)
    }

    /// As [`offer`](Self::offer), with a per-frame reserved-value supplier
    /// run after each fragment's payload is copied.
    pub fn offer_with_reserved(
        &mut self,
        msg: &[u8],
        reserved_value_supplier: Option<ReservedValueSupplier<'_>>,
    ) -> LogResult<i64> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }

        let limit = self.position_limit.get_volatile();
        let position = self.state.term_begin_position + self.state.term_offset as i64;
        if position >= limit {
            return Err(self.back_pressure_status());
        }

        let appender = &self.appenders[self.state.active_partition_index];
        let result = if msg.len() <= self.max_payload_length {
            appender.append_unfragmented_message(
                self.state.term_id,
                self.state.term_offset,
                &self.header_writer,
                msg,
                reserved_value_supplier,
            )?
        } else {
            if msg.len() > self.max_message_length {
                return Err(LogError::MaxMessageLength {
                    length: msg.len(),
                    max: self.max_message_length,
                });
            }
            appender.append_fragmented_message(
                self.state.term_id,
                self.state.term_offset,
                &self.header_writer,
                msg,
                self.max_payload_length,
                reserved_value_supplier,
            )?
        };

        self.new_position(result)
    }

    /// Claim a frame for zero-copy writing. The returned [`BufferClaim`]
    /// borrows the publication; commit it (or abort it) to publish and
    /// release the borrow. Only single-frame claims are supported.
    pub fn try_claim(&mut self, length: usize) -> LogResult<BufferClaim<'_>> {
        if length > self.max_payload_length {
            return Err(LogError::MaxPayloadLength {
                length,
                max: self.max_payload_length,
            });
        }
        if self.is_closed() {
            return Err(LogError::Closed);
        }

        let limit = self.position_limit.get_volatile();
        let position = self.state.term_begin_position + self.state.term_offset as i64;
        if position >= limit {
            return Err(self.back_pressure_status());
        }

        let result = self.appenders[self.state.active_partition_index].claim(
            self.state.term_id,
            self.state.term_offset,
            &self.header_writer,
            length,
        )?;

        match result {
            ClaimResult::Tripped => {
                self.rotate_term();
                Err(LogError::AdminAction)
            }
            ClaimResult::Claimed(region) => {
                self.state.term_offset = region.resulting_offset;
                let position = self.state.term_begin_position + region.resulting_offset as i64;
                let term_buffer =
                    self.appenders[self.state.active_partition_index].term_buffer();
                Ok(BufferClaim::new(
                    term_buffer,
                    region.frame_offset,
                    region.frame_length,
                    position,
                ))
            }
        }
    }

    /// Stream position observed from the shared metadata (acquire). Around
    /// a rotation this may briefly trail the writer's own cursor; treat it
    /// as a hint.
    pub fn position(&self) -> LogResult<i64> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }
        let meta = self.log_buffers.meta_data_buffer();
        Ok(observe_position(
            &meta,
            self.log_buffers.term_length(),
            self.position_bits_to_shift,
            self.initial_term_id,
        ))
    }

    /// Position beyond which offers are back-pressured. A guide, not a
    /// guarantee.
    pub fn position_limit(&self) -> LogResult<i64> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }
        Ok(self.position_limit.get_volatile())
    }

    /// Cross-thread position view decoupled from the writer's borrow.
    pub fn observer(&self) -> PositionObserver {
        PositionObserver::new(
            Arc::clone(&self.log_buffers),
            Arc::clone(&self.is_closed),
            self.initial_term_id,
            self.position_bits_to_shift,
        )
    }

    /// Add a destination to a multi-destination-cast publication.
    pub fn add_destination(&self, endpoint: &str) -> LogResult<()> {
        let _guard = self.conductor.client_lock().lock();
        debug!(endpoint, registration_id = self.registration_id, "adding destination");
        self.conductor
            .add_destination(self.registration_id, endpoint)
    }

    /// Remove a previously added destination.
    pub fn remove_destination(&self, endpoint: &str) -> LogResult<()> {
        let _guard = self.conductor.client_lock().lock();
        debug!(endpoint, registration_id = self.registration_id, "removing destination");
        self.conductor
            .remove_destination(self.registration_id, endpoint)
    }

    /// Release the publication through the conductor. Idempotent.
    pub fn close(&mut self) {
        let conductor = Arc::clone(&self.conductor);
        let _guard = conductor.client_lock().lock();
        self.release();
    }

    /// Force-release regardless of who initiated it. Called by `close` and
    /// by the conductor's own reclaim path, under the client lock.
    pub fn release(&mut self) {
        if !self.is_closed.swap(true, Ordering::AcqRel) {
            debug!(
                channel = %self.channel,
                registration_id = self.registration_id,
                "exclusive publication released"
            );
            self.conductor.release_publication(self.registration_id);
        }
    }

    fn time_of_last_status_message(&self) -> i64 {
        layout::time_of_last_status_message(&self.log_buffers.meta_data_buffer())
    }

    fn back_pressure_status(&self) -> LogError {
        if self
            .conductor
            .is_publication_connected(self.time_of_last_status_message())
        {
            LogError::BackPressured
        } else {
            LogError::NotConnected
        }
    }

    fn new_position(&mut self, resulting_offset: i32) -> LogResult<i64> {
        if resulting_offset > 0 {
            self.state.term_offset = resulting_offset;
            return Ok(self.state.term_begin_position + resulting_offset as i64);
        }

        if resulting_offset == TRIPPED {
            self.rotate_term();
        }
        Err(LogError::AdminAction)
    }

    /// Advance to the next partition for the next term. The tail seed goes
    /// first so the partition is coherent before the active index flips.
    fn rotate_term(&mut self) {
        let next_index = layout::next_partition_index(self.state.active_partition_index);
        let next_term_id = self.state.term_id.wrapping_add(1);

        self.state.term_offset = 0;
        self.state.active_partition_index = next_index;
        self.state.term_id = next_term_id;
        self.state.term_begin_position = layout::compute_term_begin_position(
            next_term_id,
            self.position_bits_to_shift,
            self.initial_term_id,
        );

        self.appenders[next_index].tail_term_id(next_term_id);
        layout::set_active_partition_index_ordered(
            &self.log_buffers.meta_data_buffer(),
            next_index,
        );

        debug!(
            term_id = next_term_id,
            partition = next_index,
            "rotated to next term"
        );
    }
}

impl std::fmt::Debug for ExclusivePublication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusivePublication")
            .field("channel", &self.channel)
            .field("stream_id", &self.stream_id)
            .field("session_id", &self.session_id)
            .field("term_id", &self.state.term_id)
            .field("term_offset", &self.state.term_offset)
            .field("closed", &self.is_closed())
            .finish()
    }
}
