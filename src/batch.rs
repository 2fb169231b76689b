//! Batch coordination: fan a list of jobs out over the admission gate and
//! collect one result per input, in input order.

use crate::admission::AdmissionController;
use crate::error::ConvertError;
use crate::output::{BatchResult, ConversionResult, ResultMetadata};
use crate::pipeline::Pipeline;
use crate::progress::ProgressCallback;
use crate::request::{ConversionJob, RejectedFile};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Runs many jobs concurrently, never more than the admission capacity.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    pipeline: Pipeline,
    admission: AdmissionController,
    admission_timeout: Duration,
}

impl BatchCoordinator {
    pub fn new(
        pipeline: Pipeline,
        admission: AdmissionController,
        admission_timeout: Duration,
    ) -> Self {
        Self {
            pipeline,
            admission,
            admission_timeout,
        }
    }

    /// Convert every entry. Rejected entries become error results in place.
    ///
    /// `concurrency` is a hint, clamped to `1..=capacity`; `None` means the
    /// full admission capacity.
    pub async fn run(
        &self,
        entries: Vec<Result<ConversionJob, RejectedFile>>,
        concurrency: Option<usize>,
        progress: &ProgressCallback,
    ) -> BatchResult {
        let started = Instant::now();
        let total = entries.len();
        let capacity = self.admission.capacity();
        let width = concurrency.unwrap_or(capacity).clamp(1, capacity);
        progress.on_batch_start(total);
        info!("Starting batch: {} file(s), {} at a time", total, width);

        let limiter = Arc::new(Semaphore::new(width));
        let mut slots: Vec<Option<ConversionResult>> = Vec::with_capacity(total);
        let mut filenames = Vec::with_capacity(total);
        let mut tasks = JoinSet::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let job = match entry {
                Ok(job) => job,
                Err(rejected) => {
                    warn!("Skipping '{}': {}", rejected.filename, rejected.error);
                    filenames.push(rejected.filename.clone());
                    slots.push(Some(ConversionResult::rejected(
                        rejected.filename,
                        &rejected.error,
                    )));
                    continue;
                }
            };
            filenames.push(job.filename.clone());
            slots.push(None);

            let limiter = Arc::clone(&limiter);
            let admission = self.admission.clone();
            let pipeline = self.pipeline.clone();
            let patience = self.admission_timeout;
            tasks.spawn(async move {
                let result = run_one(limiter, admission, pipeline, job, patience).await;
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!("Batch task ended abnormally: {}", e),
            }
        }

        let results: Vec<ConversionResult> = slots
            .into_iter()
            .zip(filenames)
            .map(|(slot, filename)| {
                slot.unwrap_or_else(|| {
                    let err = ConvertError::Internal("conversion task was cancelled".into());
                    ConversionResult::rejected(filename, &err)
                })
            })
            .collect();

        let batch = BatchResult::from_results(results, started.elapsed().as_millis() as u64);
        info!(
            "Batch complete: {}/{} succeeded in {}ms",
            batch.summary.successful, batch.summary.total, batch.summary.duration_ms
        );
        progress.on_batch_complete(batch.summary.total, batch.summary.successful);
        batch
    }
}

/// One job: batch slot, then admission, then the pipeline. Any failure,
/// panics included, comes back as an error result.
async fn run_one(
    limiter: Arc<Semaphore>,
    admission: AdmissionController,
    pipeline: Pipeline,
    job: ConversionJob,
    patience: Duration,
) -> ConversionResult {
    let filename = job.filename.clone();
    let metadata = ResultMetadata {
        filename: job.filename.clone(),
        file_type: Some(job.format),
        file_size: job.bytes.len() as u64,
        options: Some(job.options.clone()),
        ..Default::default()
    };

    let _slot = match limiter.acquire_owned().await {
        Ok(slot) => slot,
        Err(_) => {
            let err = ConvertError::Internal("batch limiter closed".into());
            return ConversionResult::failed(metadata, &err);
        }
    };
    let _permit = match admission.acquire(patience).await {
        Ok(permit) => permit,
        Err(err) => return ConversionResult::failed(metadata, &err),
    };

    match AssertUnwindSafe(pipeline.run(job)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!("Conversion of '{}' panicked: {}", filename, reason);
            let err = ConvertError::Internal(format!("conversion panicked: {reason}"));
            ConversionResult::failed(metadata, &err)
        }
    }
}
