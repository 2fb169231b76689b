//! # any2md
//!
//! Convert PDF, Word and Excel documents to Markdown, HTML or JSON, behind
//! one service shared by a CLI, an HTTP server and a tool-call server.
//!
//! ## Why this crate?
//!
//! Conversion libraries each handle one format and fail in their own ways.
//! This crate wraps them behind one adapter contract and adds what a shared
//! service needs on top of them: bounded concurrency, a three-tier parse
//! fallback, repeated header/footer removal and per-request image storage.
//!
//! ## Pipeline Overview
//!
//! ```text
//! request
//!  │
//!  ├─ 1. Normalise   decode, validate, merge per-file → global → default options
//!  ├─ 2. Admit       wait for one of N conversion slots
//!  ├─ 3. Language    sniff a short text sample (PDF, `auto` only)
//!  ├─ 4. Margins     detect repeated header/footer content
//!  ├─ 5. Parse       tier 1 → tier 2 → tier 3, each on the blocking pool
//!  ├─ 6. Images      content-addressed store, one arena per session
//!  └─ 7. Assemble    Markdown / HTML / JSON + metadata
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use any2md::{ConversionService, FileContent, FileEntry, RawRequest, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ConversionService::new(ServiceConfig::default());
//!     let bytes = std::fs::read("report.pdf")?;
//!     let request = RawRequest::Batch {
//!         files: vec![FileEntry::new("report.pdf", FileContent::Binary(bytes.into()))],
//!         global_options: Default::default(),
//!     };
//!     let response = service.convert(request).await?;
//!     println!("{}", serde_json::to_string_pretty(&response)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | `any2md` and `any2md-mcp` binaries (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | `any2md-server` HTTP binary (axum + tower-http) |
//!
//! Disable both when using only the library:
//! ```toml
//! any2md = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod adapter;
pub mod admission;
pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod input;
pub mod language;
pub mod options;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod repetition;
pub mod request;
pub mod service;
pub mod store;
pub mod tools;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use adapter::{AdapterRegistry, ParseRequest, ParseTier, ParserAdapter, PdfiumBinding};
pub use admission::{AdmissionController, AdmissionPermit};
pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use document::{DocumentInfo, ParsedDocument};
pub use error::{ConvertError, ErrorKind, ParseError};
pub use options::{ConversionOptions, OptionOverrides, OutputFormat, PageRange};
pub use output::{BatchResult, BatchSummary, ConversionResult, ResultMetadata, ResultStatus};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use request::{DocumentFormat, FileContent, FileEntry, RawRequest, SessionId};
pub use service::{ConversionResponse, ConversionService};
pub use store::{ContentStore, ExtractedImage};
