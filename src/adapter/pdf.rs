//! PDF adapter backed by pdfium.
//!
//! pdfium reports coordinates with the origin at the bottom-left corner;
//! everything here is converted to top-down distances before it leaves the
//! module.

use super::{truncate_chars, AdapterLimits, ParseRequest, ParseTier, ParserAdapter};
use crate::document::{
    Block, ContentUnit, DocumentInfo, LayoutBlock, PageLayout, ParsedDocument, RawImage, Region,
    UnitKind,
};
use crate::error::ParseError;
use crate::repetition::{Band, Signature};
use crate::store::content_hash;
use bytes::Bytes;
use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use regex::Regex;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::{debug, info};

/// Segments whose tops differ by less than this (points) share a line.
const LINE_TOLERANCE: f32 = 2.0;
/// Lines checked for suppressed text at each end of a page in minimal mode.
const MINIMAL_EDGE_LINES: usize = 3;

static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:([•▪◦·\-*–])|(\d{1,3}[.)]))\s+(.*)$").unwrap());

/// Owned handle describing where the pdfium library lives.
///
/// Binding happens per call on the blocking thread that uses it, so the
/// handle itself is cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBinding {
    library_dir: Option<PathBuf>,
}

impl PdfiumBinding {
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self { library_dir }
    }

    fn bind(&self) -> Result<Pdfium, ParseError> {
        let bindings = match &self.library_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| ParseError::BackendUnavailable(format!("{e:?}")))?;
        Ok(Pdfium::new(bindings))
    }
}

/// [`ParserAdapter`] for PDF documents.
#[derive(Debug, Clone)]
pub struct PdfAdapter {
    pdfium: PdfiumBinding,
    limits: AdapterLimits,
}

impl PdfAdapter {
    pub fn new(pdfium: PdfiumBinding, limits: AdapterLimits) -> Self {
        Self { pdfium, limits }
    }
}

fn open<'a>(pdfium: &'a Pdfium, bytes: &'a [u8]) -> Result<PdfDocument<'a>, ParseError> {
    pdfium.load_pdf_from_byte_slice(bytes, None).map_err(|e| {
        let detail = format!("{e:?}");
        if detail.contains("Password") || detail.contains("password") {
            ParseError::Encrypted
        } else {
            ParseError::corrupt(detail)
        }
    })
}

fn pdf_err(e: PdfiumError) -> ParseError {
    ParseError::Failed(format!("{e:?}"))
}

/// One visual line, top-down coordinates in points.
#[derive(Debug, Clone)]
struct Line {
    text: String,
    top: f32,
    bottom: f32,
}

impl Line {
    fn height(&self) -> f32 {
        (self.bottom - self.top).max(0.1)
    }
}

struct PageImage {
    top: f32,
    bottom: f32,
    hash: String,
    png: Vec<u8>,
    width: u32,
    height: u32,
}

fn page_lines(page: &PdfPage) -> Result<Vec<Line>, ParseError> {
    let height = page.height().value;
    let text = page.text().map_err(pdf_err)?;
    let mut lines: Vec<Line> = Vec::new();

    for segment in text.segments().iter() {
        let content = segment.text();
        if content.trim().is_empty() {
            continue;
        }
        let bounds = segment.bounds();
        let top = height - bounds.top().value;
        let bottom = height - bounds.bottom().value;
        match lines.last_mut() {
            Some(line) if (line.top - top).abs() < LINE_TOLERANCE => {
                if !line.text.ends_with(' ') && !content.starts_with(' ') {
                    line.text.push(' ');
                }
                line.text.push_str(&content);
                line.top = line.top.min(top);
                line.bottom = line.bottom.max(bottom);
            }
            _ => lines.push(Line {
                text: content,
                top,
                bottom,
            }),
        }
    }
    for line in &mut lines {
        line.text = line.text.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    Ok(lines)
}

fn page_images(page: &PdfPage, limits: &AdapterLimits) -> Vec<PageImage> {
    let height = page.height().value;
    let mut images = Vec::new();

    for object in page.objects().iter() {
        let Some(image_object) = object.as_image_object() else {
            continue;
        };
        let Ok(image) = image_object.get_raw_image() else {
            debug!("Skipping undecodable image object");
            continue;
        };
        if image.width().min(image.height()) < limits.min_image_dimension {
            continue;
        }
        let mut png = Vec::new();
        if image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .is_err()
        {
            continue;
        }
        if png.len() as u64 > limits.max_image_size {
            debug!("Skipping {}-byte image over the size limit", png.len());
            continue;
        }
        let (top, bottom) = match object.bounds() {
            Ok(b) => (height - b.top().value, height - b.bottom().value),
            Err(_) => (0.0, height),
        };
        images.push(PageImage {
            top,
            bottom,
            hash: content_hash(&png),
            png,
            width: image.width(),
            height: image.height(),
        });
    }
    images
}

fn band_of(top: f32, bottom: f32, page_height: f32, fraction: f32) -> Option<Band> {
    Band::classify(Region::from_absolute(top, bottom, page_height), fraction)
}

fn median_line_height(lines: &[Line]) -> f32 {
    let mut heights: Vec<f32> = lines.iter().map(Line::height).collect();
    if heights.is_empty() {
        return 1.0;
    }
    heights.sort_by(|a, b| a.total_cmp(b));
    heights[heights.len() / 2]
}

/// Group lines into paragraphs on vertical gaps larger than a line.
fn paragraphs(lines: &[Line]) -> Vec<Vec<&Line>> {
    let median = median_line_height(lines);
    let mut groups: Vec<Vec<&Line>> = Vec::new();
    for line in lines {
        let starts_new = match groups.last().and_then(|g| g.last()) {
            Some(prev) => line.top - prev.bottom > median * 0.9,
            None => true,
        };
        if starts_new {
            groups.push(vec![line]);
        } else if let Some(group) = groups.last_mut() {
            group.push(line);
        }
    }
    groups
}

fn join_lines(lines: &[&Line]) -> String {
    let mut out = String::new();
    for line in lines {
        if out.ends_with('-') {
            out.pop();
        } else if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&line.text);
    }
    out
}

/// Full-fidelity classification of one paragraph group.
fn classify(group: &[&Line], median: f32) -> Vec<Block> {
    if group.len() == 1 {
        let line = group[0];
        let ratio = line.height() / median;
        let chars = line.text.chars().count();
        if ratio >= 1.3 && chars <= 120 {
            let level = if ratio >= 1.8 { 1 } else { 2 };
            return vec![Block::Heading {
                level,
                text: line.text.clone(),
            }];
        }
    }
    if group.iter().all(|l| LIST_MARKER.is_match(&l.text)) {
        return group
            .iter()
            .filter_map(|l| LIST_MARKER.captures(&l.text))
            .map(|caps| Block::ListItem {
                depth: 0,
                ordered: caps.get(2).is_some(),
                text: caps.get(3).map_or("", |m| m.as_str()).to_string(),
            })
            .collect();
    }
    vec![Block::Paragraph(join_lines(group))]
}

impl PdfAdapter {
    fn parse_page(
        &self,
        page: &PdfPage,
        index: usize,
        request: &ParseRequest,
        band_fraction: f32,
    ) -> Result<ContentUnit, ParseError> {
        let mut unit = ContentUnit::new(index, format!("Page {}", index + 1));
        let height = page.height().value;
        let suppression = &request.suppression;

        if request.tier == ParseTier::Minimal {
            let text = page.text().map_err(pdf_err)?.all();
            let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
            let n = lines.len();
            let kept: Vec<&str> = lines
                .into_iter()
                .enumerate()
                .filter(|(i, l)| {
                    let at_edge = *i < MINIMAL_EDGE_LINES || *i + MINIMAL_EDGE_LINES >= n;
                    !(at_edge && suppression.matches_any_text(l))
                })
                .map(|(_, l)| l.trim_end())
                .collect();
            if !kept.is_empty() {
                unit.blocks.push(Block::Raw(kept.join("\n")));
            }
            return Ok(unit);
        }

        let lines: Vec<Line> = page_lines(page)?
            .into_iter()
            .filter(|l| {
                !band_of(l.top, l.bottom, height, band_fraction)
                    .is_some_and(|band| suppression.suppresses_text(band, &l.text))
            })
            .collect();
        let median = median_line_height(&lines);

        let mut positioned: Vec<(f32, Vec<Block>)> = paragraphs(&lines)
            .into_iter()
            .map(|group| {
                let top = group[0].top;
                let blocks = match request.tier {
                    ParseTier::Full => classify(&group, median),
                    _ => vec![Block::Paragraph(join_lines(&group))],
                };
                (top, blocks)
            })
            .collect();

        if request.extract_images {
            for image in page_images(page, &self.limits) {
                let suppressed = band_of(image.top, image.bottom, height, band_fraction)
                    .is_some_and(|band| {
                        suppression.suppresses(band, &Signature::Image(image.hash.clone()))
                    });
                if suppressed {
                    continue;
                }
                let sequence = unit.images.len();
                unit.images.push(RawImage {
                    sequence,
                    bytes: Bytes::from(image.png),
                    width: image.width,
                    height: image.height,
                });
                positioned.push((image.top, vec![Block::Image(sequence)]));
            }
        }

        positioned.sort_by(|a, b| a.0.total_cmp(&b.0));
        unit.blocks = positioned.into_iter().flat_map(|(_, b)| b).collect();
        Ok(unit)
    }
}

impl ParserAdapter for PdfAdapter {
    fn layout(&self, bytes: &[u8], sample_pages: usize) -> Result<Vec<PageLayout>, ParseError> {
        let pdfium = self.pdfium.bind()?;
        let document = open(&pdfium, bytes)?;
        let mut layouts = Vec::new();

        for (index, page) in document.pages().iter().enumerate().take(sample_pages) {
            let height = page.height().value;
            let mut blocks: Vec<LayoutBlock> = page_lines(&page)?
                .into_iter()
                .map(|l| LayoutBlock::text(Region::from_absolute(l.top, l.bottom, height), l.text))
                .collect();
            blocks.extend(page_images(&page, &self.limits).into_iter().map(|img| {
                LayoutBlock::image(Region::from_absolute(img.top, img.bottom, height), img.hash)
            }));
            layouts.push(PageLayout { index, blocks });
        }
        Ok(layouts)
    }

    fn sample_text(&self, bytes: &[u8], pages: usize, chars: usize) -> Result<String, ParseError> {
        let pdfium = self.pdfium.bind()?;
        let document = open(&pdfium, bytes)?;
        let mut sample = String::new();
        for page in document.pages().iter().take(pages) {
            sample.push_str(&page.text().map_err(pdf_err)?.all());
            sample.push('\n');
            if sample.chars().count() >= chars {
                break;
            }
        }
        truncate_chars(&mut sample, chars);
        Ok(sample)
    }

    fn parse(&self, bytes: &[u8], request: &ParseRequest) -> Result<ParsedDocument, ParseError> {
        let pdfium = self.pdfium.bind()?;
        let document = open(&pdfium, bytes)?;
        let pages = document.pages();
        let total = pages.len() as usize;
        if total > self.limits.pdf_max_pages {
            return Err(ParseError::LimitExceeded {
                what: "page".into(),
                actual: total,
                limit: self.limits.pdf_max_pages,
            });
        }

        let range = request.page_range.clip(total);
        info!("PDF loaded: {} pages, converting {:?} at {}", total, range, request.tier);

        let mut units = Vec::with_capacity(range.len());
        for index in range {
            let page = pages.get(index as u16).map_err(pdf_err)?;
            units.push(self.parse_page(&page, index, request, request.band_fraction)?);
        }

        let title = document
            .metadata()
            .get(PdfDocumentMetadataTagType::Title)
            .map(|t| t.value().to_string())
            .filter(|t| !t.trim().is_empty());

        Ok(ParsedDocument {
            kind: UnitKind::Page,
            units,
            total_units: total,
            paragraph_count: None,
            title,
        })
    }

    fn inspect(&self, bytes: &[u8]) -> Result<DocumentInfo, ParseError> {
        let pdfium = self.pdfium.bind()?;
        let document = open(&pdfium, bytes)?;
        let metadata = document.metadata();
        let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
            metadata
                .get(tag)
                .map(|t| t.value().to_string())
                .filter(|v| !v.is_empty())
        };

        let pages = document.pages();
        let page_sizes = pages
            .iter()
            .map(|p| (p.width().value, p.height().value))
            .collect();
        let has_images = pages.iter().any(|p| {
            p.objects()
                .iter()
                .any(|o| o.object_type() == PdfPageObjectType::Image)
        });

        Ok(DocumentInfo {
            unit_count: pages.len() as usize,
            unit_kind: Some(UnitKind::Page),
            title: get_meta(PdfDocumentMetadataTagType::Title),
            author: get_meta(PdfDocumentMetadataTagType::Author),
            has_images,
            page_sizes,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repetition::SuppressionSet;

    fn line(text: &str, top: f32, bottom: f32) -> Line {
        Line {
            text: text.into(),
            top,
            bottom,
        }
    }

    #[test]
    fn paragraphs_split_on_vertical_gaps() {
        let lines = vec![
            line("First line of a", 100.0, 110.0),
            line("paragraph.", 112.0, 122.0),
            line("Second paragraph.", 150.0, 160.0),
        ];
        let groups = paragraphs(&lines);
        assert_eq!(groups.len(), 2);
        assert_eq!(join_lines(&groups[0]), "First line of a paragraph.");
    }

    #[test]
    fn hyphenated_line_breaks_are_joined() {
        let a = line("conver-", 0.0, 10.0);
        let b = line("sion", 11.0, 21.0);
        assert_eq!(join_lines(&[&a, &b]), "conversion");
    }

    #[test]
    fn tall_single_line_becomes_heading() {
        let title = line("Annual Report", 50.0, 70.0);
        let blocks = classify(&[&title], 10.0);
        assert_eq!(
            blocks,
            vec![Block::Heading {
                level: 1,
                text: "Annual Report".into()
            }]
        );
    }

    #[test]
    fn bullet_lines_become_list_items() {
        let a = line("• apples", 0.0, 10.0);
        let b = line("2) pears", 11.0, 21.0);
        let blocks = classify(&[&a, &b], 10.0);
        assert_eq!(
            blocks,
            vec![
                Block::ListItem {
                    depth: 0,
                    ordered: false,
                    text: "apples".into()
                },
                Block::ListItem {
                    depth: 0,
                    ordered: true,
                    text: "pears".into()
                },
            ]
        );
    }

    #[test]
    fn band_of_uses_top_down_fractions() {
        assert_eq!(band_of(10.0, 30.0, 800.0, 0.15), Some(Band::Header));
        assert_eq!(band_of(760.0, 780.0, 800.0, 0.15), Some(Band::Footer));
        assert_eq!(band_of(300.0, 320.0, 800.0, 0.15), None);
    }

    #[test]
    fn suppression_is_band_scoped() {
        let mut set = SuppressionSet::default();
        set.insert(Band::Footer, Signature::Text("Page footer".into()));
        assert!(band_of(770.0, 790.0, 800.0, 0.15)
            .is_some_and(|b| set.suppresses_text(b, "Page  footer")));
        assert!(!band_of(10.0, 20.0, 800.0, 0.15)
            .is_some_and(|b| set.suppresses_text(b, "Page footer")));
    }

    /// Requires a pdfium binary; run with `E2E_ENABLED=1`.
    #[test]
    fn garbage_bytes_are_rejected_by_pdfium() {
        if std::env::var("E2E_ENABLED").is_err() {
            return;
        }
        let adapter = PdfAdapter::new(PdfiumBinding::default(), AdapterLimits::default());
        let request = ParseRequest::new(ParseTier::Full, &Default::default());
        assert!(adapter.parse(b"%PDF-1.7 not really", &request).is_err());
    }
}
