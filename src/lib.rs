//! Exclusive publisher onto a shared-memory log partitioned into rotating
//! terms.
//!
//! One process writes; subscribers and a media driver in other processes
//! read. The log is three equal term buffers plus a metadata block, mapped
//! from a single file. The writer appends framed messages into the active
//! term, fragmenting anything over the MTU, and rotates to the next
//! partition when a term fills. A consumer-managed position limit applies
//! back-pressure.
//!
//! The append path is wait-free: a bounded number of atomic operations,
//! no locks, no allocation. Lifecycle operations (`close`, destination
//! management) go through the client conductor under its lock.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use termlog::{AtomicPosition, ExclusivePublication, LogBuffers, LogConfig, LogError};
//! # fn conductor() -> Arc<dyn termlog::ConductorLink> { unimplemented!() }
//!
//! # fn main() -> Result<(), LogError> {
//! let config = LogConfig::default();
//! let log = Arc::new(LogBuffers::create("stream.log".as_ref(), &config)?);
//! let limit = AtomicPosition::new(i64::MAX);
//!
//! let mut publication = ExclusivePublication::new(
//!     conductor(),
//!     "channel:endpoint",
//!     config.stream_id,
//!     config.session_id,
//!     limit,
//!     log,
//!     1,
//! )?;
//!
//! match publication.offer(b"hello") {
//!     Ok(position) => println!("published at {position}"),
//!     Err(err) if err.is_transient() => { /* retry */ }
//!     Err(err) => return Err(err),
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod claim;
pub mod conductor;
pub mod config;
pub mod error;
pub mod frame;
pub mod layout;
pub mod log_buffers;
pub mod position;
pub mod publication;
pub mod test_support;

mod appender;
mod header;

pub use buffer::LogBuffer;
pub use claim::BufferClaim;
pub use conductor::ConductorLink;
pub use config::LogConfig;
pub use error::{LogError, LogResult};
pub use log_buffers::LogBuffers;
pub use position::{AtomicPosition, PositionObserver, ReadablePosition};
pub use publication::{
    ExclusivePublication, ReservedValueSupplier, ADMIN_ACTION, BACK_PRESSURED, CLOSED,
    NOT_CONNECTED,
};
