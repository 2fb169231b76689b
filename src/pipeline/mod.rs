//! Pipeline stages for document-to-Markdown conversion.
//!
//! Each submodule implements one step; [`Pipeline::run`] drives a single
//! [`ConversionJob`] through all of them in order.
//!
//! ## Data Flow
//!
//! ```text
//! Normalized ─▶ LanguageResolved ─▶ HeaderFooterStripped ─▶ Parsed ─▶ ImagesExtracted ─▶ Assembled ─▶ Done
//!     │               │                     │                 │              │               │
//!     └───────────────┴─────────────────────┴────── Errored ──┴──────────────┴───────────────┘
//! ```
//!
//! 1. language sniffing (PDF with `auto` only) on a short text sample
//! 2. header/footer detection over the leading pages' layout
//! 3. [`fallback`]: three-tier parse, each call on the blocking pool under
//!    the stage deadline
//! 4. [`images`]: raw images into the [`ContentStore`]
//! 5. [`assemble`]: Markdown, HTML or JSON, then [`postprocess`] cleanup

pub mod assemble;
pub mod fallback;
pub mod images;
pub mod postprocess;

use crate::adapter::{AdapterRegistry, ParseRequest, ParseTier, ParserAdapter};
use crate::config::ServiceConfig;
use crate::document::UnitKind;
use crate::error::ConvertError;
use crate::language::LanguageSniffer;
use crate::output::{ConversionResult, ResultMetadata, ResultStatus};
use crate::repetition::{RepetitionDetector, SuppressionSet};
use crate::request::{ConversionJob, DocumentFormat};
use crate::store::{ContentStore, ExtractedImage};
use assemble::Rendered;
use fallback::{run_blocking, run_tiers};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Position of a job in the conversion state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Normalized,
    LanguageResolved,
    HeaderFooterStripped,
    Parsed,
    ImagesExtracted,
    Assembled,
    Done,
    Errored,
}

/// Drives one job from normalised input to a [`ConversionResult`].
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Arc<ServiceConfig>,
    registry: AdapterRegistry,
    store: Arc<ContentStore>,
    sniffer: LanguageSniffer,
    detector: RepetitionDetector,
}

struct Converted {
    images: Vec<ExtractedImage>,
    rendered: Rendered,
}

impl Pipeline {
    pub fn new(
        config: Arc<ServiceConfig>,
        registry: AdapterRegistry,
        store: Arc<ContentStore>,
    ) -> Self {
        let sniffer = LanguageSniffer::new(config.default_language.clone());
        let detector = RepetitionDetector {
            band_fraction: config.band_fraction,
            sample_pages: config.header_footer_sample_pages,
            min_repetitions: config.min_repetitions,
        };
        Self {
            config,
            registry,
            store,
            sniffer,
            detector,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    /// Convert one job. Never fails: errors become an `error` result with
    /// the metadata gathered up to the failing stage, and the job's session
    /// is purged.
    pub async fn run(&self, job: ConversionJob) -> ConversionResult {
        let started = Instant::now();
        let progress = Arc::clone(&self.config.progress_callback);
        progress.on_job_start(&job.filename);
        info!(
            "Starting conversion: {} ({}, {} bytes)",
            job.filename,
            job.format,
            job.bytes.len()
        );

        let mut metadata = ResultMetadata {
            filename: job.filename.clone(),
            file_type: Some(job.format),
            file_size: job.bytes.len() as u64,
            options: Some(job.options.clone()),
            session_id: Some(job.session),
            ..Default::default()
        };

        let filename = job.filename.clone();
        let session = job.session;
        let include_content = job.options.include_content;
        let outcome = self.execute(job, &mut metadata).await;
        metadata.processing_time_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Converted { images, rendered }) => {
                metadata.stage = Stage::Done;
                let status = if metadata.images_dropped > 0 {
                    ResultStatus::Partial
                } else {
                    ResultStatus::Success
                };
                let (content, pages) = if include_content {
                    (Some(rendered.content), rendered.pages)
                } else {
                    (None, None)
                };
                info!(
                    "Conversion complete: {} via {}, {} unit(s), {} image(s), {}ms",
                    filename,
                    metadata
                        .tier_used
                        .map_or_else(|| "-".to_string(), |t| t.to_string()),
                    metadata.units_converted,
                    metadata.images_extracted,
                    metadata.processing_time_ms
                );
                ConversionResult {
                    status,
                    metadata,
                    images,
                    content,
                    pages,
                    error: None,
                }
            }
            Err(err) => {
                warn!(
                    "Conversion failed: {} after {:?}: {}",
                    filename, metadata.last_stage, err
                );
                match self.store.purge(session).await {
                    Ok(n) if n > 0 => debug!("Released {} image(s) of failed job {}", n, filename),
                    Ok(_) | Err(ConvertError::NotFound { .. }) => {}
                    Err(e) => warn!("Could not purge session {}: {}", session, e),
                }
                ConversionResult::failed(metadata, &err)
            }
        };

        let elapsed_ms = result.metadata.processing_time_ms;
        progress.on_job_complete(&filename, result.is_success(), elapsed_ms);
        result
    }

    async fn execute(
        &self,
        job: ConversionJob,
        metadata: &mut ResultMetadata,
    ) -> Result<Converted, ConvertError> {
        let adapter = self
            .registry
            .get(job.format)
            .ok_or_else(|| ConvertError::UnsupportedFormat {
                filename: job.filename.clone(),
                extension: job.format.extension().to_string(),
            })?;
        let options = &job.options;
        let deadline = self.config.stage_timeout;

        // ── Language ─────────────────────────────────────────────────────
        let languages = if !options.languages.is_auto() {
            options.languages.codes().to_vec()
        } else if job.format == DocumentFormat::Pdf {
            let code = self.sniff_language(&adapter, &job).await?;
            metadata.detected_language = Some(code.clone());
            vec![code]
        } else {
            Vec::new()
        };
        metadata.languages = languages.clone();
        metadata.last_stage = Stage::LanguageResolved;

        // ── Header / footer ──────────────────────────────────────────────
        let suppression = if options.remove_header_footer {
            self.detect_repetition(&adapter, &job).await?
        } else {
            SuppressionSet::default()
        };
        metadata.suppressed_signatures = suppression.len();
        metadata.last_stage = Stage::HeaderFooterStripped;

        // ── Parse ────────────────────────────────────────────────────────
        let base = ParseRequest::new(ParseTier::Full, options)
            .with_suppression(suppression, self.config.band_fraction)
            .with_languages(languages);
        let run = run_tiers(
            Arc::clone(&adapter),
            job.bytes.clone(),
            &base,
            deadline,
            &job.filename,
            &self.config.progress_callback,
        )
        .await;
        metadata.attempts = run.attempts;
        let (document, tier) = run.outcome?;
        drop(job.bytes);

        metadata.tier_used = Some(tier);
        metadata.degraded = tier != ParseTier::Full;
        metadata.unit_kind = Some(document.kind);
        match document.kind {
            UnitKind::Sheet => metadata.sheet_count = Some(document.total_units),
            UnitKind::Page | UnitKind::Section => metadata.page_count = Some(document.total_units),
        }
        metadata.paragraph_count = document.paragraph_count;
        metadata.units_converted = document.units.len();
        metadata.title = document.title.clone();
        metadata.last_stage = Stage::Parsed;

        // ── Images ───────────────────────────────────────────────────────
        let stored = if options.extract_images && tier.allows_images() {
            let stored = images::store_images(
                &self.store,
                job.session,
                &document,
                options.images_mandatory,
            )
            .await?;
            metadata.images_extracted = stored.unique().len();
            metadata.images_dropped = stored.dropped;
            stored
        } else {
            images::StoredImages::default()
        };
        metadata.last_stage = Stage::ImagesExtracted;

        // ── Assemble ─────────────────────────────────────────────────────
        let rendered = assemble::assemble(&document, &stored, options, &job.filename);
        metadata.last_stage = Stage::Assembled;

        Ok(Converted {
            images: stored.into_unique(),
            rendered,
        })
    }

    /// Best effort: a sampling failure falls back to the default language,
    /// only a timeout is fatal.
    async fn sniff_language(
        &self,
        adapter: &Arc<dyn ParserAdapter>,
        job: &ConversionJob,
    ) -> Result<String, ConvertError> {
        let adapter = Arc::clone(adapter);
        let bytes = job.bytes.clone();
        let (pages, chars) = (
            self.config.language_sample_pages,
            self.config.language_sample_chars,
        );
        let sample = run_blocking("language sampling", self.config.stage_timeout, move || {
            adapter.sample_text(&bytes, pages, chars)
        })
        .await?;

        let code = match sample {
            Ok(text) => self.sniffer.detect(&text),
            Err(e) => {
                warn!("{}: language sampling failed, using default: {}", job.filename, e);
                self.config.default_language.clone()
            }
        };
        debug!("{}: language resolved to '{}'", job.filename, code);
        Ok(code)
    }

    /// Best effort like [`Self::sniff_language`].
    async fn detect_repetition(
        &self,
        adapter: &Arc<dyn ParserAdapter>,
        job: &ConversionJob,
    ) -> Result<SuppressionSet, ConvertError> {
        let adapter = Arc::clone(adapter);
        let bytes = job.bytes.clone();
        let sample_pages = self.detector.sample_pages;
        let layout = run_blocking("layout", self.config.stage_timeout, move || {
            adapter.layout(&bytes, sample_pages)
        })
        .await?;

        match layout {
            Ok(pages) => {
                let candidates = self.detector.detect(&pages);
                for c in &candidates {
                    debug!(
                        "{}: suppressing {:?} {:?} seen on {} page(s)",
                        job.filename, c.band, c.signature, c.occurrences
                    );
                }
                Ok(SuppressionSet::from_candidates(&candidates))
            }
            Err(e) => {
                warn!("{}: layout unavailable, keeping headers and footers: {}", job.filename, e);
                Ok(SuppressionSet::default())
            }
        }
    }
}
