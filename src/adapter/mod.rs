//! Parser adapters: the narrow contract between the pipeline and the
//! per-format parsing libraries.
//!
//! Adapters are synchronous and CPU-bound; the pipeline always calls them
//! from `spawn_blocking` under a deadline. A call either returns complete
//! content or a [`ParseError`], never a partial result.
//!
//! ```text
//! pdf  → PdfAdapter   (pdfium-render)
//! docx → DocxAdapter  (zip + quick-xml)
//! xlsx → SheetAdapter (calamine)
//! xls  → SheetAdapter (calamine)
//! ```

pub mod docx;
pub mod pdf;
pub mod sheet;

use crate::config::ServiceConfig;
use crate::document::{DocumentInfo, PageLayout, ParsedDocument};
use crate::error::ParseError;
use crate::options::{ConversionOptions, PageRange};
use crate::repetition::SuppressionSet;
use crate::request::DocumentFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use docx::DocxAdapter;
pub use pdf::{PdfAdapter, PdfiumBinding};
pub use sheet::SheetAdapter;

// ── Fidelity tiers ───────────────────────────────────────────────────────

/// Fidelity level of one parse attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseTier {
    /// Full structure: headings, lists, tables, images.
    Full,
    /// Same parser, simplified structure reconstruction.
    Conservative,
    /// Raw text only; no images, no structure.
    Minimal,
}

impl ParseTier {
    pub const ORDER: [ParseTier; 3] = [Self::Full, Self::Conservative, Self::Minimal];

    /// The next, lower-fidelity tier.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Full => Some(Self::Conservative),
            Self::Conservative => Some(Self::Minimal),
            Self::Minimal => None,
        }
    }

    /// 1-based tier number.
    pub fn number(self) -> u8 {
        match self {
            Self::Full => 1,
            Self::Conservative => 2,
            Self::Minimal => 3,
        }
    }

    pub fn allows_images(self) -> bool {
        !matches!(self, Self::Minimal)
    }
}

impl fmt::Display for ParseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Full => "full",
            Self::Conservative => "conservative",
            Self::Minimal => "minimal",
        };
        write!(f, "tier {} ({})", self.number(), name)
    }
}

// ── Parse request ────────────────────────────────────────────────────────

/// Everything an adapter needs for one `parse` call.
#[derive(Debug, Clone)]
pub struct ParseRequest {
    pub tier: ParseTier,
    pub page_range: PageRange,
    pub suppression: SuppressionSet,
    /// Margin band height used when matching `suppression`.
    pub band_fraction: f32,
    /// Resolved languages; empty when detection was skipped.
    pub languages: Vec<String>,
    pub extract_images: bool,
    pub preserve_formatting: bool,
    pub include_formulas: bool,
    pub sheet_names: Option<Vec<String>>,
}

impl ParseRequest {
    pub fn new(tier: ParseTier, options: &ConversionOptions) -> Self {
        Self {
            tier,
            page_range: options.page_range,
            suppression: SuppressionSet::default(),
            band_fraction: 0.15,
            languages: options.languages.codes().to_vec(),
            extract_images: options.extract_images && tier.allows_images(),
            preserve_formatting: options.preserve_formatting,
            include_formulas: options.include_formulas,
            sheet_names: options.sheet_names.clone(),
        }
    }

    pub fn with_suppression(mut self, suppression: SuppressionSet, band_fraction: f32) -> Self {
        self.suppression = suppression;
        self.band_fraction = band_fraction;
        self
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }
}

/// Structural limits applied by the concrete adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterLimits {
    pub pdf_max_pages: usize,
    pub excel_max_rows: usize,
    pub excel_max_sheets: usize,
    pub min_image_dimension: u32,
    pub max_image_size: u64,
    /// Largest decompressed container part (DOCX XML, media).
    pub max_part_size: u64,
}

impl AdapterLimits {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            pdf_max_pages: config.pdf_max_pages,
            excel_max_rows: config.excel_max_rows,
            excel_max_sheets: config.excel_max_sheets,
            min_image_dimension: config.min_image_dimension,
            max_image_size: config.max_image_size,
            max_part_size: config.max_file_size,
        }
    }
}

impl Default for AdapterLimits {
    fn default() -> Self {
        Self::from_config(&ServiceConfig::default())
    }
}

// ── Contract ─────────────────────────────────────────────────────────────

/// One parsing backend.
///
/// `layout` and `sample_text` are optional capabilities: the defaults
/// report nothing, which disables header/footer detection and language
/// sniffing for that format.
pub trait ParserAdapter: Send + Sync {
    /// Positioned blocks of the first `sample_pages` pages.
    fn layout(&self, bytes: &[u8], sample_pages: usize) -> Result<Vec<PageLayout>, ParseError> {
        let _ = (bytes, sample_pages);
        Ok(Vec::new())
    }

    /// Plain text of the first `pages` pages, truncated to `chars` characters.
    fn sample_text(&self, bytes: &[u8], pages: usize, chars: usize) -> Result<String, ParseError> {
        let _ = (bytes, pages, chars);
        Ok(String::new())
    }

    /// Parse the document at `request.tier`.
    fn parse(&self, bytes: &[u8], request: &ParseRequest) -> Result<ParsedDocument, ParseError>;

    /// Structural facts without a full parse.
    fn inspect(&self, bytes: &[u8]) -> Result<DocumentInfo, ParseError>;
}

/// Maps each input format to its adapter.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<DocumentFormat, Arc<dyn ParserAdapter>>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut formats: Vec<_> = self.adapters.keys().map(|k| k.extension()).collect();
        formats.sort_unstable();
        f.debug_struct("AdapterRegistry").field("formats", &formats).finish()
    }
}

impl AdapterRegistry {
    /// An empty registry; every format is unsupported until registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in adapters for every supported format.
    pub fn with_defaults(config: &ServiceConfig) -> Self {
        let limits = AdapterLimits::from_config(config);
        let pdfium = PdfiumBinding::new(config.pdfium_library_dir.clone());
        let sheets: Arc<dyn ParserAdapter> = Arc::new(SheetAdapter::new(limits));
        Self::new()
            .register(DocumentFormat::Pdf, Arc::new(PdfAdapter::new(pdfium, limits)))
            .register(DocumentFormat::Docx, Arc::new(DocxAdapter::new(limits)))
            .register(DocumentFormat::Xlsx, Arc::clone(&sheets))
            .register(DocumentFormat::Xls, sheets)
    }

    pub fn register(mut self, format: DocumentFormat, adapter: Arc<dyn ParserAdapter>) -> Self {
        self.adapters.insert(format, adapter);
        self
    }

    pub fn get(&self, format: DocumentFormat) -> Option<Arc<dyn ParserAdapter>> {
        self.adapters.get(&format).cloned()
    }
}

/// Truncate `text` to at most `chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &mut String, chars: usize) {
    if let Some((idx, _)) = text.char_indices().nth(chars) {
        text.truncate(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_escalate_in_order() {
        assert_eq!(ParseTier::Full.next(), Some(ParseTier::Conservative));
        assert_eq!(ParseTier::Conservative.next(), Some(ParseTier::Minimal));
        assert_eq!(ParseTier::Minimal.next(), None);
        assert_eq!(ParseTier::Minimal.to_string(), "tier 3 (minimal)");
    }

    #[test]
    fn minimal_tier_never_extracts_images() {
        let opts = ConversionOptions::default();
        assert!(ParseRequest::new(ParseTier::Full, &opts).extract_images);
        assert!(!ParseRequest::new(ParseTier::Minimal, &opts).extract_images);
    }

    #[test]
    fn default_registry_covers_every_format() {
        let registry = AdapterRegistry::with_defaults(&ServiceConfig::default());
        for format in DocumentFormat::ALL {
            assert!(registry.get(format).is_some(), "{format} missing");
        }
        assert!(AdapterRegistry::new().get(DocumentFormat::Pdf).is_none());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let mut s = "привет мир".to_string();
        truncate_chars(&mut s, 6);
        assert_eq!(s, "привет");
        let mut short = "ab".to_string();
        truncate_chars(&mut short, 10);
        assert_eq!(short, "ab");
    }
}
