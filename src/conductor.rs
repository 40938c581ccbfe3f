//! Seam to the client-side conductor.
//!
//! The conductor owns the driver control protocol, the clock used for
//! subscriber liveness and the client lock serializing lifecycle calls.
//! The publication only consumes this trait; the real conductor lives with
//! the rest of the client machinery.

use parking_lot::ReentrantMutex;

use crate::error::LogResult;

pub trait ConductorLink: Send + Sync {
    /// Reentrant lock serializing every conductor interaction. Lifecycle
    /// operations on the publication take it; the append path never does.
    fn client_lock(&self) -> &ReentrantMutex<()>;

    /// Whether a subscriber was heard from recently enough, judged against
    /// the conductor's clock. `time_of_last_status_ms` is the metadata's
    /// last status-message timestamp.
    fn is_publication_connected(&self, time_of_last_status_ms: i64) -> bool;

    /// Hand the publication back; called at most once per registration.
    fn release_publication(&self, registration_id: i64);

    /// Add a destination to a multi-destination-cast publication.
    fn add_destination(&self, registration_id: i64, endpoint: &str) -> LogResult<()>;

    /// Remove a previously added destination.
    fn remove_destination(&self, registration_id: i64, endpoint: &str) -> LogResult<()>;
}
