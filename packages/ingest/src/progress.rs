//! Progress reporting for long-running ingest and warehouse operations.
//!
//! [`ProgressCallback`] keeps the readers and loaders independent of how
//! progress is drawn. The CLI supplies an `indicatif` implementation; tests
//! and library callers use [`NullProgress`].

/// Receives progress updates from a long-running operation.
pub trait ProgressCallback: Send + Sync {
    /// Sets the total expected units of work, when known.
    fn set_total(&self, total: u64);

    /// Advances progress by `delta` units.
    fn inc(&self, delta: u64);

    fn set_message(&self, msg: String);

    /// Marks the operation complete with a final message.
    fn finish(&self, msg: String);
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}
