//! Batch coordination and admission control through `ConversionService`.

use any2md::document::{Block, ContentUnit, DocumentInfo, ParsedDocument, UnitKind};
use any2md::{
    AdapterRegistry, ConversionProgressCallback, ConversionResponse, ConversionService,
    ConvertError, DocumentFormat, FileContent, FileEntry, OptionOverrides, ParseError,
    ParseRequest, ParseTier, ParserAdapter, RawRequest, ResultStatus, ServiceConfig,
};
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sleeps while parsing and records how many parses overlapped. Content
/// containing `broken` fails every tier.
#[derive(Default)]
struct SlowPdf {
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ParserAdapter for SlowPdf {
    fn parse(&self, bytes: &[u8], _: &ParseRequest) -> Result<ParsedDocument, ParseError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(80));
        self.running.fetch_sub(1, Ordering::SeqCst);

        if bytes.windows(6).any(|w| w == b"broken") {
            return Err(ParseError::Failed("xref table damaged".into()));
        }
        let mut unit = ContentUnit::new(0, "Page 1");
        unit.blocks.push(Block::Paragraph(String::from_utf8_lossy(bytes).into_owned()));
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

fn service(adapter: Arc<SlowPdf>, capacity: usize, dir: &std::path::Path) -> ConversionService {
    let config = ServiceConfig::builder()
        .max_concurrent_jobs(capacity)
        .admission_timeout(Duration::from_secs(10))
        .image_dir(dir)
        .build()
        .unwrap();
    ConversionService::with_registry(
        config,
        AdapterRegistry::new().register(DocumentFormat::Pdf, adapter),
    )
}

fn pdf(name: &str, body: &'static [u8]) -> FileEntry {
    FileEntry::new(name, FileContent::Binary(Bytes::from_static(body)))
}

#[tokio::test]
async fn batch_keeps_order_isolates_failures_and_respects_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(SlowPdf::default());
    let service = service(Arc::clone(&adapter), 2, dir.path());

    let request = RawRequest::Batch {
        files: vec![
            pdf("a.pdf", b"%PDF-1.4 alpha"),
            pdf("b.pdf", b"%PDF-1.4 broken"),
            FileEntry::new("notes.txt", FileContent::Binary(Bytes::from_static(b"hello"))),
            pdf("c.pdf", b"%PDF-1.4 gamma"),
        ],
        global_options: OptionOverrides {
            remove_header_footer: Some(false),
            ..Default::default()
        },
    };
    let ConversionResponse::Batch(batch) = service.convert(request).await.unwrap() else {
        panic!("batch request produced a single result");
    };

    assert_eq!(batch.summary.total, 4);
    assert_eq!(batch.summary.successful, 2);
    assert_eq!(batch.summary.failed, 2);

    let names: Vec<&str> = batch
        .results
        .iter()
        .map(|r| r.metadata.filename.as_str())
        .collect();
    assert_eq!(names, ["a.pdf", "b.pdf", "notes.txt", "c.pdf"]);

    assert_eq!(batch.results[0].status, ResultStatus::Success);
    assert!(batch.results[0].content.as_deref().unwrap().contains("alpha"));
    assert_eq!(
        batch.results[1].error.as_ref().unwrap().code,
        "PROCESSING_FAILED"
    );
    assert_eq!(
        batch.results[2].error.as_ref().unwrap().code,
        "UNSUPPORTED_FORMAT"
    );
    assert_eq!(batch.results[3].status, ResultStatus::Success);

    // Two parses overlapped and the third reused a freed slot; the rejected
    // .txt never took one.
    assert_eq!(adapter.max_running.load(Ordering::SeqCst), 2);
    assert_eq!(service.admission().peak(), 2);
    assert_eq!(service.admission().admitted(), 3);
    assert_eq!(service.admission().active(), 0);
}

#[tokio::test]
async fn concurrency_hint_narrows_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(SlowPdf::default());
    let service = service(Arc::clone(&adapter), 4, dir.path());

    let files = vec![
        pdf("1.pdf", b"%PDF-1.4 one"),
        pdf("2.pdf", b"%PDF-1.4 two"),
        pdf("3.pdf", b"%PDF-1.4 three"),
    ];
    let entries = match service
        .normalize(RawRequest::Batch {
            files,
            global_options: Default::default(),
        })
        .unwrap()
    {
        any2md::request::NormalizedRequest::Batch(entries) => entries,
        other => panic!("unexpected {other:?}"),
    };

    let batch = service.convert_batch(entries, Some(1)).await;
    assert_eq!(batch.summary.successful, 3);
    assert_eq!(adapter.max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn single_request_times_out_waiting_for_a_slot() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig::builder()
        .max_concurrent_jobs(1)
        .admission_timeout(Duration::from_millis(50))
        .image_dir(dir.path())
        .build()
        .unwrap();
    let service = ConversionService::with_registry(
        config,
        AdapterRegistry::new().register(DocumentFormat::Pdf, Arc::new(SlowPdf::default())),
    );

    let _held = service
        .admission()
        .acquire(Duration::from_secs(1))
        .await
        .unwrap();
    let request = RawRequest::Single {
        filename: Some("late.pdf".into()),
        content: Some(FileContent::Binary(Bytes::from_static(b"%PDF-1.4 late"))),
        options: Default::default(),
    };
    let err = service.convert(request).await.unwrap_err();
    assert!(matches!(err, ConvertError::AdmissionTimeout { .. }), "{err:?}");
    assert_eq!(err.code(), "ADMISSION_TIMEOUT");
}

#[tokio::test]
async fn request_level_validation_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(Arc::new(SlowPdf::default()), 2, dir.path());

    let request = RawRequest::Batch {
        files: Vec::new(),
        global_options: Default::default(),
    };
    let err = service.convert(request).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn status_counts_processed_documents() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(Arc::new(SlowPdf::default()), 2, dir.path());

    let request = RawRequest::Batch {
        files: vec![pdf("a.pdf", b"%PDF-1.4 a"), pdf("b.pdf", b"%PDF-1.4 b")],
        global_options: Default::default(),
    };
    service.convert(request).await.unwrap();

    let status = service.status();
    assert_eq!(status.total_processed, 2);
    assert_eq!(status.capacity, 2);
    assert_eq!(status.active_jobs, 0);
    assert_eq!(status.supported_formats, vec!["pdf", "docx", "xlsx", "xls"]);
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl ConversionProgressCallback for Recorder {
    fn on_batch_start(&self, total_jobs: usize) {
        self.events.lock().unwrap().push(format!("batch {total_jobs}"));
    }

    fn on_tier_failed(&self, filename: &str, tier: ParseTier, _error: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{filename} failed {}", tier.number()));
    }

    fn on_job_complete(&self, filename: &str, success: bool, _elapsed_ms: u64) {
        self.events.lock().unwrap().push(format!("{filename} done {success}"));
    }

    fn on_batch_complete(&self, total_jobs: usize, successful: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("batch done {successful}/{total_jobs}"));
    }
}

#[tokio::test]
async fn progress_callback_sees_tiers_jobs_and_batch() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let config = ServiceConfig::builder()
        .max_concurrent_jobs(1)
        .image_dir(dir.path())
        .progress_callback(Arc::clone(&recorder) as Arc<dyn ConversionProgressCallback>)
        .build()
        .unwrap();
    let service = ConversionService::with_registry(
        config,
        AdapterRegistry::new().register(DocumentFormat::Pdf, Arc::new(SlowPdf::default())),
    );

    let request = RawRequest::Batch {
        files: vec![pdf("ok.pdf", b"%PDF-1.4 fine"), pdf("bad.pdf", b"%PDF-1.4 broken")],
        global_options: Default::default(),
    };
    service.convert(request).await.unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("batch 2"));
    assert_eq!(events.last().map(String::as_str), Some("batch done 1/2"));
    for expected in [
        "ok.pdf done true",
        "bad.pdf failed 1",
        "bad.pdf failed 2",
        "bad.pdf failed 3",
        "bad.pdf done false",
    ] {
        assert!(events.iter().any(|e| e == expected), "{expected} missing from {events:?}");
    }
}
