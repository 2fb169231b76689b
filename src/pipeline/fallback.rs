//! Three-tier parse fallback.
//!
//! ```text
//! Attempt(Full) ──fail──▶ Attempt(Conservative) ──fail──▶ Attempt(Minimal) ──fail──▶ Exhausted
//!      │ ok                     │ ok                            │ ok
//!      ▼                        ▼                               ▼
//!  Succeeded               Succeeded (degraded)           Succeeded (degraded)
//! ```
//!
//! Any attempt that exceeds the stage deadline ends the run with a
//! [`ConvertError::Timeout`]; a parser that hangs once will hang again.

use crate::adapter::{ParseRequest, ParseTier, ParserAdapter};
use crate::document::ParsedDocument;
use crate::error::{ConvertError, ParseError, TierFailure};
use crate::output::TierAttempt;
use crate::progress::ProgressCallback;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{debug, warn};

/// Where the fallback currently stands.
#[derive(Debug)]
enum TierState {
    Attempt(ParseTier),
    Succeeded {
        document: ParsedDocument,
        tier: ParseTier,
    },
    Exhausted,
    Aborted(ConvertError),
}

/// Outcome of a fallback run, with every attempt recorded.
#[derive(Debug)]
pub struct FallbackRun {
    pub attempts: Vec<TierAttempt>,
    pub outcome: Result<(ParsedDocument, ParseTier), ConvertError>,
}

/// Run `f` on the blocking pool under `deadline`.
///
/// The outer error is the deadline; the inner one is the adapter's own
/// failure, with a panic reported as [`ParseError::Panicked`]. A timed-out
/// task keeps its blocking thread until it returns on its own.
pub(crate) async fn run_blocking<T, F>(
    stage: &str,
    deadline: Duration,
    f: F,
) -> Result<Result<T, ParseError>, ConvertError>
where
    F: FnOnce() -> Result<T, ParseError> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(deadline, handle).await {
        Err(_) => Err(ConvertError::Timeout {
            stage: stage.to_string(),
            secs: deadline.as_secs(),
        }),
        Ok(Err(join)) => Ok(Err(ParseError::Panicked(panic_message(join)))),
        Ok(Ok(result)) => Ok(result),
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Parse `bytes` starting at tier 1, escalating on each failure.
pub async fn run_tiers(
    adapter: Arc<dyn ParserAdapter>,
    bytes: Bytes,
    base: &ParseRequest,
    deadline: Duration,
    filename: &str,
    progress: &ProgressCallback,
) -> FallbackRun {
    let mut attempts = Vec::with_capacity(ParseTier::ORDER.len());
    let mut failures = Vec::new();
    let mut state = TierState::Attempt(ParseTier::Full);

    let outcome = loop {
        state = match state {
            TierState::Attempt(tier) => {
                let request = ParseRequest {
                    tier,
                    extract_images: base.extract_images && tier.allows_images(),
                    ..base.clone()
                };
                let adapter = Arc::clone(&adapter);
                let bytes = bytes.clone();
                let started = Instant::now();
                let stage = format!("parse ({tier})");
                let result = run_blocking(&stage, deadline, move || {
                    adapter.parse(&bytes, &request)
                })
                .await;
                let duration_ms = started.elapsed().as_millis() as u64;

                match result {
                    Ok(Ok(document)) => {
                        debug!(
                            "{}: {} parsed {} unit(s) in {}ms",
                            filename,
                            tier,
                            document.units.len(),
                            duration_ms
                        );
                        attempts.push(TierAttempt {
                            tier,
                            success: true,
                            error: None,
                            duration_ms,
                        });
                        TierState::Succeeded { document, tier }
                    }
                    Ok(Err(error)) => {
                        warn!("{}: {} failed: {}", filename, tier, error);
                        progress.on_tier_failed(filename, tier, &error.to_string());
                        attempts.push(TierAttempt {
                            tier,
                            success: false,
                            error: Some(error.to_string()),
                            duration_ms,
                        });
                        failures.push(TierFailure { tier, error });
                        tier.next().map_or(TierState::Exhausted, TierState::Attempt)
                    }
                    Err(timeout) => {
                        warn!("{}: {}", filename, timeout);
                        attempts.push(TierAttempt {
                            tier,
                            success: false,
                            error: Some(timeout.to_string()),
                            duration_ms,
                        });
                        TierState::Aborted(timeout)
                    }
                }
            }
            TierState::Succeeded { document, tier } => break Ok((document, tier)),
            TierState::Exhausted => {
                break Err(ConvertError::ParseFailure {
                    filename: filename.to_string(),
                    failures: std::mem::take(&mut failures),
                })
            }
            TierState::Aborted(err) => break Err(err),
        };
    };

    FallbackRun { attempts, outcome }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Block, ContentUnit, DocumentInfo, UnitKind};
    use crate::options::ConversionOptions;
    use crate::progress::NoopProgressCallback;
    use std::sync::Mutex;

    /// Fails every tier listed in `fail`, records the tiers it saw.
    struct Scripted {
        fail: Vec<ParseTier>,
        seen: Mutex<Vec<(ParseTier, bool)>>,
        panic_on_full: bool,
    }

    impl Scripted {
        fn failing(fail: &[ParseTier]) -> Arc<Self> {
            Arc::new(Self {
                fail: fail.to_vec(),
                seen: Mutex::new(Vec::new()),
                panic_on_full: false,
            })
        }
    }

    impl ParserAdapter for Scripted {
        fn parse(&self, _: &[u8], req: &ParseRequest) -> Result<ParsedDocument, ParseError> {
            self.seen.lock().unwrap().push((req.tier, req.extract_images));
            if self.panic_on_full && req.tier == ParseTier::Full {
                panic!("bad glyph table");
            }
            if self.fail.contains(&req.tier) {
                return Err(ParseError::Failed(format!("scripted failure at {}", req.tier)));
            }
            let mut unit = ContentUnit::new(0, "Page 1");
            unit.blocks.push(Block::Paragraph("ok".into()));
            Ok(ParsedDocument {
                kind: UnitKind::Page,
                units: vec![unit],
                total_units: 1,
                paragraph_count: None,
                title: None,
            })
        }

        fn inspect(&self, _: &[u8]) -> Result<DocumentInfo, ParseError> {
            Ok(DocumentInfo::default())
        }
    }

    fn progress() -> ProgressCallback {
        Arc::new(NoopProgressCallback)
    }

    fn base() -> ParseRequest {
        ParseRequest::new(ParseTier::Full, &ConversionOptions::default())
    }

    #[tokio::test]
    async fn first_tier_success_is_not_degraded() {
        let adapter = Scripted::failing(&[]);
        let run = run_tiers(adapter, Bytes::new(), &base(), Duration::from_secs(5), "a.pdf", &progress()).await;
        let (_, tier) = run.outcome.unwrap();
        assert_eq!(tier, ParseTier::Full);
        assert_eq!(run.attempts.len(), 1);
    }

    #[tokio::test]
    async fn escalates_until_a_tier_succeeds() {
        let adapter = Scripted::failing(&[ParseTier::Full, ParseTier::Conservative]);
        let run = run_tiers(
            adapter.clone(),
            Bytes::new(),
            &base(),
            Duration::from_secs(5),
            "a.pdf",
            &progress(),
        )
        .await;
        let (_, tier) = run.outcome.unwrap();
        assert_eq!(tier, ParseTier::Minimal);
        assert_eq!(run.attempts.len(), 3);
        assert!(!run.attempts[0].success);
        assert!(run.attempts[2].success);
        let seen = adapter.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (ParseTier::Full, true),
                (ParseTier::Conservative, true),
                (ParseTier::Minimal, false)
            ]
        );
    }

    #[tokio::test]
    async fn all_tiers_failing_reports_every_reason() {
        let adapter = Scripted::failing(&ParseTier::ORDER);
        let run = run_tiers(adapter, Bytes::new(), &base(), Duration::from_secs(5), "x.pdf", &progress()).await;
        let err = run.outcome.unwrap_err();
        assert_eq!(err.code(), "PROCESSING_FAILED");
        assert_eq!(err.tier_failures().len(), 3);
        assert_eq!(run.attempts.len(), 3);
    }

    #[tokio::test]
    async fn panic_counts_as_a_tier_failure() {
        let adapter = Arc::new(Scripted {
            fail: vec![],
            seen: Mutex::new(Vec::new()),
            panic_on_full: true,
        });
        let run = run_tiers(adapter, Bytes::new(), &base(), Duration::from_secs(5), "p.pdf", &progress()).await;
        let (_, tier) = run.outcome.unwrap();
        assert_eq!(tier, ParseTier::Conservative);
        let first = run.attempts[0].error.as_deref().unwrap();
        assert!(first.contains("bad glyph table"), "got: {first}");
    }

    #[tokio::test]
    async fn run_blocking_times_out() {
        let result = run_blocking("sleepy", Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");
        assert!(err.to_string().contains("sleepy"));
    }
}
