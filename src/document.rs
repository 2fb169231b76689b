//! Structured content exchanged between parser adapters and the pipeline.
//!
//! Adapters produce these types; nothing in here knows about any concrete
//! file format.

use bytes::Bytes;
use serde::Serialize;

// ── Layout (input to the repetition detector) ────────────────────────────

/// Vertical extent of a block as fractions of its page height, measured
/// from the top edge: `0.0 ≤ top ≤ bottom ≤ 1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub top: f32,
    pub bottom: f32,
}

impl Region {
    pub fn new(top: f32, bottom: f32) -> Self {
        let top = top.clamp(0.0, 1.0);
        let bottom = bottom.clamp(top, 1.0);
        Self { top, bottom }
    }

    /// Build from absolute coordinates on a page of `height` units.
    pub fn from_absolute(top: f32, bottom: f32, height: f32) -> Self {
        if height <= 0.0 {
            return Self::new(0.0, 1.0);
        }
        Self::new(top / height, bottom / height)
    }
}

/// What a positioned block holds.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutContent {
    Text(String),
    /// An image, identified by the SHA-256 of its bytes.
    Image { hash: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBlock {
    pub region: Region,
    pub content: LayoutContent,
}

impl LayoutBlock {
    pub fn text(region: Region, text: impl Into<String>) -> Self {
        Self {
            region,
            content: LayoutContent::Text(text.into()),
        }
    }

    pub fn image(region: Region, hash: impl Into<String>) -> Self {
        Self {
            region,
            content: LayoutContent::Image { hash: hash.into() },
        }
    }
}

/// Positioned blocks of one page (or page-equivalent section).
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub index: usize,
    pub blocks: Vec<LayoutBlock>,
}

// ── Parsed content ───────────────────────────────────────────────────────

/// What a [`ContentUnit`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Page,
    Section,
    Sheet,
}

/// One structural element of a unit, in reading order.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading { level: u8, text: String },
    /// Paragraph text; may already carry inline `**bold**` / `*italic*`.
    Paragraph(String),
    ListItem {
        depth: usize,
        ordered: bool,
        text: String,
    },
    /// First row is the header row.
    Table(Vec<Vec<String>>),
    /// Reference to `ContentUnit::images[i].sequence`.
    Image(usize),
    /// Unstructured text, emitted verbatim.
    Raw(String),
}

/// Image bytes as found in the document, before storage.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub sequence: usize,
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
}

/// A page, section or sheet of a parsed document.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentUnit {
    pub index: usize,
    pub label: String,
    pub blocks: Vec<Block>,
    pub images: Vec<RawImage>,
}

impl ContentUnit {
    pub fn new(index: usize, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
            blocks: Vec::new(),
            images: Vec::new(),
        }
    }
}

/// The complete output of one successful adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub kind: UnitKind,
    pub units: Vec<ContentUnit>,
    /// Units in the source document, before any range filtering.
    pub total_units: usize,
    /// Paragraph count for word-processing documents.
    pub paragraph_count: Option<usize>,
    pub title: Option<String>,
}

impl ParsedDocument {
    pub fn image_count(&self) -> usize {
        self.units.iter().map(|u| u.images.len()).sum()
    }
}

/// Cheap structural facts about a document, without a full parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentInfo {
    pub unit_count: usize,
    pub unit_kind: Option<UnitKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub has_images: bool,
    /// Page width × height in points (PDF only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub page_sizes: Vec<(f32, f32)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sheet_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paragraph_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_count: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_from_absolute_normalises() {
        let r = Region::from_absolute(10.0, 50.0, 100.0);
        assert_eq!(r, Region::new(0.1, 0.5));
        assert_eq!(Region::from_absolute(1.0, 2.0, 0.0), Region::new(0.0, 1.0));
    }

    #[test]
    fn region_clamps_inverted_bounds() {
        let r = Region::new(0.8, 0.2);
        assert_eq!(r.top, 0.8);
        assert_eq!(r.bottom, 0.8);
    }
}
