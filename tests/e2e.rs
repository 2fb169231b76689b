//! End-to-end tests against real documents in `./test_cases/`.
//!
//! These load the pdfium shared library, so they are gated behind the
//! `E2E_ENABLED` environment variable and skip when no sample is present.
//!
//! Run with:
//!   E2E_ENABLED=1 ANY2MD_PDFIUM_DIR=. cargo test --test e2e -- --nocapture

use any2md::{
    ConversionResponse, ConversionService, FileContent, OptionOverrides, RawRequest,
    ResultStatus, ServiceConfig,
};
use bytes::Bytes;
use std::path::PathBuf;

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// First PDF under `test_cases/`, if any.
fn first_pdf() -> Option<PathBuf> {
    let mut pdfs: Vec<PathBuf> = std::fs::read_dir(test_cases_dir())
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")))
        .collect();
    pdfs.sort();
    pdfs.into_iter().next()
}

/// Skip unless E2E_ENABLED is set and a sample PDF exists.
macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        match first_pdf() {
            Some(p) => p,
            None => {
                println!("SKIP: no PDF found in {}", test_cases_dir().display());
                return;
            }
        }
    }};
}

fn service(image_dir: &std::path::Path) -> ConversionService {
    let mut builder = ServiceConfig::builder().image_dir(image_dir);
    if let Ok(dir) = std::env::var("ANY2MD_PDFIUM_DIR") {
        builder = builder.pdfium_library_dir(dir);
    }
    ConversionService::new(builder.build().unwrap())
}

fn assert_markdown_quality(md: &str, context: &str) {
    assert!(!md.trim().is_empty(), "[{context}] Markdown is empty");
    assert!(md.ends_with('\n'), "[{context}] Markdown must end with a newline");
    assert!(
        !md.contains("\n\n\n"),
        "[{context}] Output has consecutive blank lines"
    );
    for ch in ['\u{200B}', '\u{FEFF}', '\u{200C}', '\u{200D}', '\u{2060}'] {
        assert!(
            !md.contains(ch),
            "[{context}] Output contains invisible char U+{:04X}",
            ch as u32
        );
    }
}

#[tokio::test]
async fn test_inspect_real_pdf() {
    let path = e2e_skip_unless_ready!();
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    let bytes = Bytes::from(std::fs::read(&path).unwrap());
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    let report = service
        .inspect(&name, &FileContent::Binary(bytes))
        .await
        .unwrap();

    println!("{}: {} pages", name, report.info.unit_count);
    assert!(report.info.unit_count > 0);
    assert_eq!(report.info.page_sizes.len(), report.info.unit_count);
}

#[tokio::test]
async fn test_convert_real_pdf_first_pages() {
    let path = e2e_skip_unless_ready!();
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    let request = RawRequest::Single {
        filename: Some(name.clone()),
        content: Some(FileContent::Binary(Bytes::from(std::fs::read(&path).unwrap()))),
        options: OptionOverrides {
            end_page: Some(2),
            ..Default::default()
        },
    };
    let ConversionResponse::Single(result) = service.convert(request).await.unwrap() else {
        panic!("single request produced a batch");
    };

    assert_ne!(result.status, ResultStatus::Error, "{:?}", result.error);
    let md = result.content.as_deref().unwrap();
    println!(
        "{}: tier {:?}, {} units, languages {:?}",
        name, result.metadata.tier_used, result.metadata.units_converted, result.metadata.languages
    );
    assert_markdown_quality(md, &name);
    assert!(result.metadata.units_converted <= 2);
    assert!(!result.metadata.languages.is_empty());
}
