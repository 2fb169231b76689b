//! Pipeline integration tests driven through `ConversionService` with a
//! scripted PDF adapter, so every stage runs without a pdfium library.

use any2md::document::{
    Block, ContentUnit, DocumentInfo, LayoutBlock, PageLayout, ParsedDocument, RawImage, Region,
    UnitKind,
};
use any2md::options::LanguagesInput;
use any2md::repetition::Band;
use any2md::store::content_hash;
use any2md::{
    AdapterRegistry, ConversionResponse, ConversionResult, ConversionService, DocumentFormat,
    FileContent, OptionOverrides, ParseError, ParseRequest, ParseTier, ParserAdapter, RawRequest,
    ResultStatus, ServiceConfig,
};
use bytes::Bytes;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const HEADER: &str = "ACME Corp Annual Report";
const LOGO: &[u8] = b"\x89PNG\r\n\x1a\nlogo-bytes";

/// A fake PDF backend: three pages, each with a repeated header, one body
/// paragraph and the same logo image.
#[derive(Default)]
struct FakePdf {
    fail: Vec<ParseTier>,
    parse_delay: Option<Duration>,
    sample: String,
    seen_languages: Mutex<Vec<Vec<String>>>,
}

impl FakePdf {
    fn pages() -> Vec<(Region, String)> {
        (1..=3)
            .flat_map(|p| {
                [
                    (Region::new(0.02, 0.06), HEADER.to_string()),
                    (Region::new(0.3, 0.5), format!("Body of page {p}")),
                ]
            })
            .collect()
    }
}

impl ParserAdapter for FakePdf {
    fn layout(&self, _: &[u8], sample_pages: usize) -> Result<Vec<PageLayout>, ParseError> {
        Ok((0..3.min(sample_pages))
            .map(|index| PageLayout {
                index,
                blocks: vec![
                    LayoutBlock::text(Region::new(0.02, 0.06), HEADER),
                    LayoutBlock::text(Region::new(0.3, 0.5), format!("Body of page {}", index + 1)),
                ],
            })
            .collect())
    }

    fn sample_text(&self, _: &[u8], _: usize, _: usize) -> Result<String, ParseError> {
        Ok(self.sample.clone())
    }

    fn parse(&self, _: &[u8], request: &ParseRequest) -> Result<ParsedDocument, ParseError> {
        self.seen_languages
            .lock()
            .unwrap()
            .push(request.languages.clone());
        if let Some(delay) = self.parse_delay {
            std::thread::sleep(delay);
        }
        if self.fail.contains(&request.tier) {
            return Err(ParseError::Failed(format!("cannot read at {}", request.tier)));
        }

        let blocks = Self::pages();
        let units = (0..3)
            .map(|index| {
                let mut unit = ContentUnit::new(index, format!("Page {}", index + 1));
                for (region, text) in &blocks[index * 2..index * 2 + 2] {
                    let suppressed = Band::classify(*region, request.band_fraction)
                        .is_some_and(|band| request.suppression.suppresses_text(band, text));
                    if !suppressed {
                        unit.blocks.push(Block::Paragraph(text.clone()));
                    }
                }
                if request.extract_images {
                    unit.blocks.push(Block::Image(0));
                    unit.images.push(RawImage {
                        sequence: 0,
                        bytes: Bytes::from_static(LOGO),
                        width: 120,
                        height: 40,
                    });
                }
                unit
            })
            .collect();
        Ok(ParsedDocument {
            kind: UnitKind::Page,
            units,
            total_units: 3,
            paragraph_count: None,
            title: Some("Annual Report".into()),
        })
    }

    fn inspect(&self, _: &[u8]) -> Result<DocumentInfo, ParseError> {
        Ok(DocumentInfo {
            unit_count: 3,
            unit_kind: Some(UnitKind::Page),
            ..Default::default()
        })
    }
}

fn service_with(adapter: Arc<FakePdf>, image_dir: &Path, stage_timeout: Duration) -> ConversionService {
    let config = ServiceConfig::builder()
        .image_dir(image_dir)
        .public_base_url("/images")
        .stage_timeout(stage_timeout)
        .build()
        .unwrap();
    let registry = AdapterRegistry::new().register(DocumentFormat::Pdf, adapter);
    ConversionService::with_registry(config, registry)
}

async fn convert(service: &ConversionService, options: OptionOverrides) -> ConversionResult {
    let request = RawRequest::Single {
        filename: Some("report.pdf".into()),
        content: Some(FileContent::Binary(Bytes::from_static(b"%PDF-1.7\n%fake"))),
        options,
    };
    match service.convert(request).await.unwrap() {
        ConversionResponse::Single(result) => result,
        ConversionResponse::Batch(_) => panic!("single request produced a batch"),
    }
}

#[tokio::test]
async fn full_tier_conversion_strips_header_and_dedupes_images() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with(Arc::new(FakePdf::default()), dir.path(), Duration::from_secs(5));

    let result = convert(&service, OptionOverrides::default()).await;
    assert_eq!(result.status, ResultStatus::Success, "{:?}", result.error);
    let content = result.content.as_deref().unwrap();
    assert!(!content.contains(HEADER), "{content}");
    assert!(content.contains("Body of page 2"));
    assert_eq!(content.matches("![Image 1 from page").count(), 3);

    let meta = &result.metadata;
    assert_eq!(meta.tier_used, Some(ParseTier::Full));
    assert!(!meta.degraded);
    assert_eq!(meta.page_count, Some(3));
    assert_eq!(meta.suppressed_signatures, 1);
    assert_eq!(meta.images_extracted, 1);
    assert_eq!(result.images.len(), 1);
    assert!(result.images[0].url.starts_with("/images/"));
    assert_eq!(result.pages.as_ref().map(Vec::len), Some(3));
    assert_eq!(meta.title.as_deref(), Some("Annual Report"));
}

#[tokio::test]
async fn keeping_headers_leaves_repeated_content() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with(Arc::new(FakePdf::default()), dir.path(), Duration::from_secs(5));

    let options = OptionOverrides {
        remove_header_footer: Some(false),
        ..Default::default()
    };
    let result = convert(&service, options).await;
    assert_eq!(result.content.unwrap().matches(HEADER).count(), 3);
    assert_eq!(result.metadata.suppressed_signatures, 0);
}

#[tokio::test]
async fn failing_full_tier_degrades_to_conservative() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(FakePdf {
        fail: vec![ParseTier::Full],
        ..Default::default()
    });
    let service = service_with(adapter, dir.path(), Duration::from_secs(5));

    let result = convert(&service, OptionOverrides::default()).await;
    assert_eq!(result.status, ResultStatus::Success);
    assert_eq!(result.metadata.tier_used, Some(ParseTier::Conservative));
    assert!(result.metadata.degraded);
    let attempts = &result.metadata.attempts;
    assert_eq!(attempts.len(), 2);
    assert!(!attempts[0].success);
    assert!(attempts[1].success);
}

#[tokio::test]
async fn minimal_tier_carries_no_images() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(FakePdf {
        fail: vec![ParseTier::Full, ParseTier::Conservative],
        ..Default::default()
    });
    let service = service_with(adapter, dir.path(), Duration::from_secs(5));

    let result = convert(&service, OptionOverrides::default()).await;
    assert_eq!(result.metadata.tier_used, Some(ParseTier::Minimal));
    assert!(result.images.is_empty());
    assert!(!result.content.unwrap().contains("!["));
}

#[tokio::test]
async fn every_tier_failing_is_an_error_result() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(FakePdf {
        fail: ParseTier::ORDER.to_vec(),
        ..Default::default()
    });
    let service = service_with(adapter, dir.path(), Duration::from_secs(5));

    let result = convert(&service, OptionOverrides::default()).await;
    assert_eq!(result.status, ResultStatus::Error);
    assert!(result.content.is_none());
    let error = result.error.unwrap();
    assert_eq!(error.code, "PROCESSING_FAILED");
    assert_eq!(error.tier_failures.len(), 3);
    assert_eq!(result.metadata.attempts.len(), 3);
    assert!(result.metadata.tier_used.is_none());
}

#[tokio::test]
async fn slow_parse_times_out_without_escalating() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(FakePdf {
        parse_delay: Some(Duration::from_millis(600)),
        ..Default::default()
    });
    let service = service_with(Arc::clone(&adapter), dir.path(), Duration::from_millis(100));

    let result = convert(&service, OptionOverrides::default()).await;
    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(result.error.as_ref().unwrap().code, "TIMEOUT");
    assert_eq!(adapter.seen_languages.lock().unwrap().len(), 1);

    // The slot is back and nothing of the session survives.
    assert_eq!(service.admission().active(), 0);
    let session = result.metadata.session_id.unwrap();
    assert!(service.store().images(session).is_empty());
    let err = service
        .store()
        .get(session, &content_hash(LOGO))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    assert!(!dir.path().join(session.to_string()).exists());
}

#[tokio::test]
async fn cyrillic_sample_resolves_to_russian() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(FakePdf {
        sample: "Годовой отчёт компании за прошлый год и планы на будущее".into(),
        ..Default::default()
    });
    let service = service_with(Arc::clone(&adapter), dir.path(), Duration::from_secs(5));

    let result = convert(&service, OptionOverrides::default()).await;
    assert_eq!(result.metadata.detected_language.as_deref(), Some("ru"));
    assert_eq!(result.metadata.languages, vec!["ru".to_string()]);
    assert_eq!(adapter.seen_languages.lock().unwrap()[0], vec!["ru".to_string()]);
}

#[tokio::test]
async fn declared_languages_skip_detection() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(FakePdf {
        sample: "Годовой отчёт компании".into(),
        ..Default::default()
    });
    let service = service_with(Arc::clone(&adapter), dir.path(), Duration::from_secs(5));

    let options = OptionOverrides {
        languages: Some(LanguagesInput::One("de, en".into())),
        ..Default::default()
    };
    let result = convert(&service, options).await;
    assert!(result.metadata.detected_language.is_none());
    assert_eq!(
        adapter.seen_languages.lock().unwrap()[0],
        vec!["de".to_string(), "en".to_string()]
    );
}

#[tokio::test]
async fn include_content_false_keeps_metadata_only() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with(Arc::new(FakePdf::default()), dir.path(), Duration::from_secs(5));

    let options = OptionOverrides {
        include_content: Some(false),
        ..Default::default()
    };
    let result = convert(&service, options).await;
    assert_eq!(result.status, ResultStatus::Success);
    assert!(result.content.is_none());
    assert!(result.pages.is_none());
    assert_eq!(result.metadata.units_converted, 3);
}

#[tokio::test]
async fn unwritable_image_store_is_partial_unless_mandatory() {
    let dir = tempfile::tempdir().unwrap();
    let blocked = dir.path().join("not-a-dir");
    std::fs::write(&blocked, b"file in the way").unwrap();
    let service = service_with(Arc::new(FakePdf::default()), &blocked, Duration::from_secs(5));

    let lenient = convert(&service, OptionOverrides::default()).await;
    assert_eq!(lenient.status, ResultStatus::Partial);
    assert_eq!(lenient.metadata.images_dropped, 3);
    assert!(lenient.content.unwrap().contains("Body of page 1"));

    let strict = convert(
        &service,
        OptionOverrides {
            images_mandatory: Some(true),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(strict.status, ResultStatus::Error);
    assert_eq!(strict.error.unwrap().code, "STORAGE_ERROR");
}

#[tokio::test]
async fn stored_images_are_served_and_purged_by_session() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with(Arc::new(FakePdf::default()), dir.path(), Duration::from_secs(5));

    let result = convert(&service, OptionOverrides::default()).await;
    let session = result.metadata.session_id.unwrap();
    let image = &result.images[0];
    let bytes = service.image(session, &image.file_name()).await.unwrap();
    assert_eq!(&bytes[..], LOGO);

    assert_eq!(service.purge_session(session).await.unwrap(), 1);
    assert!(service.image(session, &image.hash).await.is_err());
}

#[tokio::test]
async fn html_output_wraps_pages() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with(Arc::new(FakePdf::default()), dir.path(), Duration::from_secs(5));

    let options = OptionOverrides {
        output_format: Some("html".into()),
        extract_images: Some(false),
        ..Default::default()
    };
    let result = convert(&service, options).await;
    let html = result.content.unwrap();
    assert!(html.contains("<p>Body of page 1</p>"), "{html}");
    assert!(!html.contains("<img"));
}
