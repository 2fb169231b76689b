//! Progress-callback trait for job and batch lifecycle events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ServiceConfigBuilder::progress_callback`] to observe
//! conversions as they run. Callers can forward events to a terminal
//! progress bar, a channel or a log without the library knowing how.
//!
//! # Example
//!
//! ```rust
//! use any2md::{ConversionProgressCallback, ServiceConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_job_complete(&self, filename: &str, success: bool, elapsed_ms: u64) {
//!         let done = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("#{done} {filename}: ok={success} in {elapsed_ms}ms");
//!     }
//! }
//!
//! let config = ServiceConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { finished: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::adapter::ParseTier;
use std::sync::Arc;

/// Called by the service as jobs and batches progress.
///
/// Implementations must be `Send + Sync`: jobs of one batch run
/// concurrently, so `on_job_*` and `on_tier_failed` may fire from several
/// tasks at once. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before the jobs of a batch are scheduled.
    fn on_batch_start(&self, total_jobs: usize) {
        let _ = total_jobs;
    }

    /// Called when a job has been admitted and its pipeline starts.
    fn on_job_start(&self, filename: &str) {
        let _ = filename;
    }

    /// Called when one parse tier fails and the pipeline escalates.
    fn on_tier_failed(&self, filename: &str, tier: ParseTier, error: &str) {
        let _ = (filename, tier, error);
    }

    /// Called when a job reaches a terminal state.
    ///
    /// # Arguments
    /// * `success`   : false for `error` results
    /// * `elapsed_ms`: wall time since the job was admitted
    fn on_job_complete(&self, filename: &str, success: bool, elapsed_ms: u64) {
        let _ = (filename, success, elapsed_ms);
    }

    /// Called once after every job of a batch has a result.
    fn on_batch_complete(&self, total_jobs: usize, successful: usize) {
        let _ = (total_jobs, successful);
    }
}

/// A no-op implementation, the default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ServiceConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_job_start("a.pdf");
        cb.on_tier_failed("a.pdf", ParseTier::Full, "bad xref");
        cb.on_job_complete("a.pdf", true, 12);
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_job_start("x.pdf");
        cb.on_job_complete("x.pdf", true, 1);
    }
}
