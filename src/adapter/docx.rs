//! Word (`.docx`) adapter: reads `word/document.xml` straight out of the
//! OOXML container.
//!
//! Word files carry no rendered geometry, so pages are approximated:
//! explicit page breaks, section breaks and Word's own
//! `lastRenderedPageBreak` markers split the body into sections. Within a
//! section, up to two leading items sit in the header band and up to two
//! trailing items in the footer band (see [`band_positions`]).

use super::{truncate_chars, AdapterLimits, ParseRequest, ParseTier, ParserAdapter};
use crate::document::{
    Block, ContentUnit, DocumentInfo, LayoutBlock, PageLayout, ParsedDocument, RawImage, Region,
    UnitKind,
};
use crate::error::ParseError;
use crate::repetition::{Band, Signature};
use crate::store::content_hash;
use bytes::Bytes;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tracing::{debug, info};
use zip::result::ZipError;
use zip::ZipArchive;

const DOCUMENT_PART: &str = "word/document.xml";
const RELS_PART: &str = "word/_rels/document.xml.rels";
const CORE_PART: &str = "docProps/core.xml";

/// [`ParserAdapter`] for Word documents.
#[derive(Debug, Clone)]
pub struct DocxAdapter {
    limits: AdapterLimits,
}

impl DocxAdapter {
    pub fn new(limits: AdapterLimits) -> Self {
        Self { limits }
    }
}

// ── Body model ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
struct Run {
    text: String,
    bold: bool,
    italic: bool,
}

#[derive(Debug, Clone, Default)]
struct Paragraph {
    style: Option<String>,
    list_level: Option<usize>,
    runs: Vec<Run>,
    /// Relationship ids of embedded images.
    images: Vec<String>,
    break_before: bool,
    break_after: bool,
}

impl Paragraph {
    fn plain_text(&self) -> String {
        let text: String = self.runs.iter().map(|r| r.text.as_str()).collect();
        text.trim().to_string()
    }

    fn heading_level(&self) -> Option<u8> {
        let style = self.style.as_deref()?.to_ascii_lowercase();
        if style == "title" {
            return Some(1);
        }
        let digits = style.strip_prefix("heading")?;
        digits.parse::<u8>().ok().map(|l| l.clamp(1, 6))
    }

    fn is_ordered_list(&self) -> bool {
        self.style
            .as_deref()
            .is_some_and(|s| s.to_ascii_lowercase().contains("number"))
    }

    /// Text with inline emphasis as Markdown markers.
    fn formatted_text(&self) -> String {
        let mut merged: Vec<Run> = Vec::new();
        for run in &self.runs {
            match merged.last_mut() {
                Some(last) if last.bold == run.bold && last.italic == run.italic => {
                    last.text.push_str(&run.text)
                }
                _ => merged.push(run.clone()),
            }
        }
        let mut out = String::new();
        for run in merged {
            let marker = match (run.bold, run.italic) {
                (true, true) => "***",
                (true, false) => "**",
                (false, true) => "*",
                (false, false) => "",
            };
            let core = run.text.trim();
            if marker.is_empty() || core.is_empty() {
                out.push_str(&run.text);
                continue;
            }
            let lead = &run.text[..run.text.len() - run.text.trim_start().len()];
            let trail = &run.text[run.text.trim_end().len()..];
            out.push_str(lead);
            out.push_str(marker);
            out.push_str(core);
            out.push_str(marker);
            out.push_str(trail);
        }
        out.trim().to_string()
    }
}

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Vec<String>>,
    images: Vec<String>,
}

#[derive(Debug, Clone)]
enum Item {
    Para(Paragraph),
    Table(Table),
}

impl Item {
    fn image_ids(&self) -> &[String] {
        match self {
            Item::Para(p) => &p.images,
            Item::Table(t) => &t.images,
        }
    }

    fn signature_text(&self) -> Option<String> {
        match self {
            Item::Para(p) => Some(p.plain_text()),
            Item::Table(_) => None,
        }
    }
}

/// Band of each of `n` items in one section.
///
/// One item is body; two are header + footer; three are header, body,
/// footer; from four on, the first two and the last two are banded.
fn band_positions(n: usize) -> Vec<Option<Band>> {
    match n {
        0 => Vec::new(),
        1 => vec![None],
        2 => vec![Some(Band::Header), Some(Band::Footer)],
        3 => vec![Some(Band::Header), None, Some(Band::Footer)],
        _ => (0..n)
            .map(|i| {
                if i < 2 {
                    Some(Band::Header)
                } else if i + 2 >= n {
                    Some(Band::Footer)
                } else {
                    None
                }
            })
            .collect(),
    }
}

fn band_region(band: Option<Band>) -> Region {
    match band {
        Some(Band::Header) => Region::new(0.0, 0.01),
        Some(Band::Footer) => Region::new(0.99, 1.0),
        None => Region::new(0.5, 0.5),
    }
}

// ── XML ──────────────────────────────────────────────────────────────────

fn attr(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| {
            let raw = String::from_utf8_lossy(&a.value);
            unescape(&raw).ok().map(|v| v.into_owned())
        })
}

/// `<w:b/>` is on unless `w:val` says otherwise.
fn toggle_on(e: &BytesStart) -> bool {
    !matches!(attr(e, b"val").as_deref(), Some("0" | "false" | "off" | "none"))
}

#[derive(Default)]
struct BodyParser {
    items: Vec<Item>,
    para: Option<Paragraph>,
    run: Option<Run>,
    in_text: bool,
    in_ppr: bool,
    table_depth: usize,
    table: Table,
    row: Vec<String>,
    cell: String,
}

impl BodyParser {
    fn start(&mut self, e: &BytesStart, empty: bool) {
        match e.local_name().as_ref() {
            b"p" => {
                self.para = Some(Paragraph::default());
                if empty {
                    self.end_paragraph();
                }
            }
            b"pPr" if !empty => self.in_ppr = true,
            b"pStyle" if self.in_ppr => {
                if let Some(p) = self.para.as_mut() {
                    p.style = attr(e, b"val");
                }
            }
            b"numPr" if self.in_ppr => {
                if let Some(p) = self.para.as_mut() {
                    p.list_level.get_or_insert(0);
                }
            }
            b"ilvl" if self.in_ppr => {
                if let Some(p) = self.para.as_mut() {
                    p.list_level = Some(attr(e, b"val").and_then(|v| v.parse().ok()).unwrap_or(0));
                }
            }
            b"pageBreakBefore" if self.in_ppr && toggle_on(e) => {
                if let Some(p) = self.para.as_mut() {
                    p.break_before = true;
                }
            }
            b"sectPr" if self.in_ppr => {
                if let Some(p) = self.para.as_mut() {
                    p.break_after = true;
                }
            }
            b"r" if !empty => self.run = Some(Run::default()),
            b"b" if !self.in_ppr => {
                if let Some(r) = self.run.as_mut() {
                    r.bold = toggle_on(e);
                }
            }
            b"i" if !self.in_ppr => {
                if let Some(r) = self.run.as_mut() {
                    r.italic = toggle_on(e);
                }
            }
            b"t" if !empty => self.in_text = true,
            b"tab" if !self.in_ppr => self.push_text(" "),
            b"br" => {
                if attr(e, b"type").as_deref() == Some("page") {
                    if let Some(p) = self.para.as_mut() {
                        p.break_after = true;
                    }
                } else {
                    self.push_text(" ");
                }
            }
            b"lastRenderedPageBreak" => {
                if let Some(p) = self.para.as_mut() {
                    if p.plain_text().is_empty() {
                        p.break_before = true;
                    } else {
                        p.break_after = true;
                    }
                }
            }
            b"blip" => {
                if let Some(id) = attr(e, b"embed") {
                    self.push_image(id);
                }
            }
            b"imagedata" => {
                if let Some(id) = attr(e, b"id") {
                    self.push_image(id);
                }
            }
            b"tbl" if !empty => {
                self.table_depth += 1;
                if self.table_depth == 1 {
                    self.table = Table::default();
                }
            }
            b"tr" if self.table_depth == 1 && !empty => self.row.clear(),
            b"tc" if self.table_depth == 1 && !empty => self.cell.clear(),
            _ => {}
        }
    }

    fn end(&mut self, local: &[u8]) {
        match local {
            b"t" => self.in_text = false,
            b"pPr" => self.in_ppr = false,
            b"r" => {
                if let (Some(run), Some(p)) = (self.run.take(), self.para.as_mut()) {
                    if !run.text.is_empty() {
                        p.runs.push(run);
                    }
                }
            }
            b"p" => self.end_paragraph(),
            b"tc" if self.table_depth == 1 => {
                self.row.push(self.cell.trim().to_string());
                self.cell.clear();
            }
            b"tr" if self.table_depth == 1 => {
                let row = std::mem::take(&mut self.row);
                self.table.rows.push(row);
            }
            b"tbl" => {
                self.table_depth = self.table_depth.saturating_sub(1);
                if self.table_depth == 0 {
                    let table = std::mem::take(&mut self.table);
                    self.items.push(Item::Table(table));
                }
            }
            _ => {}
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(r) = self.run.as_mut() {
            r.text.push_str(text);
        }
    }

    fn push_image(&mut self, id: String) {
        if self.table_depth > 0 {
            self.table.images.push(id);
        } else if let Some(p) = self.para.as_mut() {
            p.images.push(id);
        }
    }

    fn end_paragraph(&mut self) {
        let Some(para) = self.para.take() else {
            return;
        };
        if self.table_depth > 0 {
            let text = para.plain_text();
            if !text.is_empty() {
                if !self.cell.is_empty() {
                    self.cell.push(' ');
                }
                self.cell.push_str(&text);
            }
            return;
        }
        let keep = !para.plain_text().is_empty() || !para.images.is_empty();
        if keep {
            self.items.push(Item::Para(para));
        } else if para.break_before || para.break_after {
            // An empty paragraph that only carries a break still splits pages.
            self.items.push(Item::Para(para));
        }
    }
}

fn parse_body(xml: &str) -> Result<Vec<Item>, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);
    let mut buf = Vec::new();
    let mut parser = BodyParser::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => parser.start(&e, false),
            Ok(Event::Empty(e)) => parser.start(&e, true),
            Ok(Event::End(e)) => parser.end(e.local_name().as_ref()),
            Ok(Event::Text(t)) if parser.in_text => {
                let text = t.unescape().map_err(ParseError::corrupt)?;
                parser.push_text(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::corrupt(format!(
                    "document.xml at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(parser.items)
}

/// Split items into sections on page and section breaks.
fn split_sections(items: Vec<Item>) -> Vec<Vec<Item>> {
    let mut sections: Vec<Vec<Item>> = vec![Vec::new()];
    for item in items {
        let (before, after) = match &item {
            Item::Para(p) => (p.break_before, p.break_after),
            Item::Table(_) => (false, false),
        };
        let is_content = match &item {
            Item::Para(p) => !p.plain_text().is_empty() || !p.images.is_empty(),
            Item::Table(_) => true,
        };
        if before && sections.last().is_some_and(|s| !s.is_empty()) {
            sections.push(Vec::new());
        }
        if is_content {
            if let Some(section) = sections.last_mut() {
                section.push(item);
            }
        }
        if after && sections.last().is_some_and(|s| !s.is_empty()) {
            sections.push(Vec::new());
        }
    }
    if sections.len() > 1 && sections.last().is_some_and(|s| s.is_empty()) {
        sections.pop();
    }
    sections
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, ParseError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut rels = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let external = attr(&e, b"TargetMode").as_deref() == Some("External");
                if let (false, Some(id), Some(target)) =
                    (external, attr(&e, b"Id"), attr(&e, b"Target"))
                {
                    let path = match target.strip_prefix('/') {
                        Some(abs) => abs.to_string(),
                        None => format!("word/{}", target.trim_start_matches("./")),
                    };
                    rels.insert(id, path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::corrupt(format!("relationships: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

fn parse_core_properties(xml: &str) -> (Option<String>, Option<String>) {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut current: Option<&'static str> = None;
    let (mut title, mut author) = (None, None);
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                current = match e.local_name().as_ref() {
                    b"title" => Some("title"),
                    b"creator" => Some("creator"),
                    _ => None,
                }
            }
            Ok(Event::Text(t)) => {
                let value = t.unescape().map(|v| v.trim().to_string()).unwrap_or_default();
                if !value.is_empty() {
                    match current {
                        Some("title") => title = Some(value),
                        Some("creator") => author = Some(value),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    (title, author)
}

// ── Container ────────────────────────────────────────────────────────────

struct Package {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    part_limit: u64,
}

impl Package {
    fn open(bytes: &[u8], part_limit: u64) -> Result<Self, ParseError> {
        let archive = ZipArchive::new(Cursor::new(bytes.to_vec()))
            .map_err(|e| ParseError::corrupt(format!("not a zip container: {e}")))?;
        Ok(Self {
            archive,
            part_limit,
        })
    }

    /// One part's bytes, `None` when the entry is absent. Never reads more
    /// than `part_limit + 1` bytes whatever size the entry header declares.
    fn read(&mut self, name: &str) -> Result<Option<Vec<u8>>, ParseError> {
        let limit = self.part_limit;
        let exceeded = |actual: u64| ParseError::LimitExceeded {
            what: format!("{name} size"),
            actual: usize::try_from(actual).unwrap_or(usize::MAX),
            limit: usize::try_from(limit).unwrap_or(usize::MAX),
        };

        let file = match self.archive.by_name(name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(ParseError::corrupt(format!("{name}: {e}"))),
        };
        if file.size() > limit {
            return Err(exceeded(file.size()));
        }
        let mut data = Vec::new();
        file.take(limit.saturating_add(1))
            .read_to_end(&mut data)
            .map_err(|e| ParseError::corrupt(format!("{name}: {e}")))?;
        if data.len() as u64 > limit {
            return Err(exceeded(data.len() as u64));
        }
        Ok(Some(data))
    }

    fn read_string(&mut self, name: &str) -> Result<Option<String>, ParseError> {
        Ok(self
            .read(name)?
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    fn body(&mut self) -> Result<Vec<Item>, ParseError> {
        let xml = self
            .read_string(DOCUMENT_PART)?
            .ok_or_else(|| ParseError::corrupt(format!("missing {DOCUMENT_PART}")))?;
        parse_body(&xml)
    }

    fn relationships(&mut self) -> Result<HashMap<String, String>, ParseError> {
        match self.read_string(RELS_PART)? {
            Some(xml) => parse_relationships(&xml),
            None => Ok(HashMap::new()),
        }
    }

    fn has_media(&self) -> bool {
        self.archive.file_names().any(|n| n.starts_with("word/media/"))
    }
}

/// Image bytes for one relationship id, with their hash.
struct Media<'a> {
    package: &'a mut Package,
    rels: &'a HashMap<String, String>,
    cache: HashMap<String, Option<(Bytes, String)>>,
}

impl<'a> Media<'a> {
    fn new(package: &'a mut Package, rels: &'a HashMap<String, String>) -> Self {
        Self {
            package,
            rels,
            cache: HashMap::new(),
        }
    }

    fn get(&mut self, id: &str) -> Option<(Bytes, String)> {
        if let Some(hit) = self.cache.get(id) {
            return hit.clone();
        }
        let loaded = self
            .rels
            .get(id)
            .and_then(|path| match self.package.read(path) {
                Ok(data) => data,
                Err(e) => {
                    debug!("Skipping media part {}: {}", path, e);
                    None
                }
            })
            .map(|data| {
                let hash = content_hash(&data);
                (Bytes::from(data), hash)
            });
        self.cache.insert(id.to_string(), loaded.clone());
        loaded
    }
}

fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

// ── Adapter ──────────────────────────────────────────────────────────────

impl DocxAdapter {
    fn unit_images(
        &self,
        ids: &[String],
        band: Option<Band>,
        request: &ParseRequest,
        media: &mut Media<'_>,
        unit: &mut ContentUnit,
    ) {
        if !request.extract_images {
            return;
        }
        for id in ids {
            let Some((bytes, hash)) = media.get(id) else {
                debug!("Image relationship {} has no media part", id);
                continue;
            };
            if band.is_some_and(|b| request.suppression.suppresses(b, &Signature::Image(hash.clone()))) {
                continue;
            }
            if bytes.len() as u64 > self.limits.max_image_size {
                continue;
            }
            let (width, height) = image_dimensions(&bytes).unwrap_or((0, 0));
            if width > 0 && width.min(height) < self.limits.min_image_dimension {
                continue;
            }
            let sequence = unit.images.len();
            unit.images.push(RawImage {
                sequence,
                bytes,
                width,
                height,
            });
            unit.blocks.push(Block::Image(sequence));
        }
    }

    fn build_unit(
        &self,
        index: usize,
        section: &[Item],
        request: &ParseRequest,
        media: &mut Media<'_>,
    ) -> ContentUnit {
        let mut unit = ContentUnit::new(index, format!("Section {}", index + 1));
        let positions = band_positions(section.len());
        let mut raw_lines: Vec<String> = Vec::new();

        for (item, band) in section.iter().zip(positions) {
            let suppressed_text = band.is_some_and(|b| {
                item.signature_text()
                    .is_some_and(|t| request.suppression.suppresses_text(b, &t))
            });

            match (item, request.tier) {
                (Item::Para(p), ParseTier::Minimal) => {
                    if !suppressed_text {
                        raw_lines.push(p.plain_text());
                    }
                }
                (Item::Table(t), ParseTier::Minimal) => {
                    raw_lines.extend(t.rows.iter().map(|r| r.join(" | ")));
                }
                (Item::Para(p), tier) => {
                    if !suppressed_text {
                        unit.blocks.push(paragraph_block(p, tier, request.preserve_formatting));
                    }
                    self.unit_images(&p.images, band, request, media, &mut unit);
                }
                (Item::Table(t), ParseTier::Full) => {
                    if !t.rows.is_empty() {
                        unit.blocks.push(Block::Table(t.rows.clone()));
                    }
                    self.unit_images(&t.images, band, request, media, &mut unit);
                }
                (Item::Table(t), _) => {
                    for row in &t.rows {
                        unit.blocks.push(Block::Paragraph(row.join(" | ")));
                    }
                    self.unit_images(&t.images, band, request, media, &mut unit);
                }
            }
        }

        raw_lines.retain(|l| !l.is_empty());
        if !raw_lines.is_empty() {
            unit.blocks.push(Block::Raw(raw_lines.join("\n")));
        }
        unit
    }
}

fn paragraph_block(p: &Paragraph, tier: ParseTier, preserve_formatting: bool) -> Block {
    let text = if tier == ParseTier::Full && preserve_formatting {
        p.formatted_text()
    } else {
        p.plain_text()
    };
    if let Some(level) = p.heading_level() {
        return Block::Heading {
            level,
            text: p.plain_text(),
        };
    }
    match (tier, p.list_level) {
        (ParseTier::Full, Some(depth)) => Block::ListItem {
            depth,
            ordered: p.is_ordered_list(),
            text,
        },
        _ => Block::Paragraph(text),
    }
}

impl ParserAdapter for DocxAdapter {
    fn layout(&self, bytes: &[u8], sample_pages: usize) -> Result<Vec<PageLayout>, ParseError> {
        let mut package = Package::open(bytes, self.limits.max_part_size)?;
        let rels = package.relationships()?;
        let sections = split_sections(package.body()?);
        let mut media = Media::new(&mut package, &rels);

        let mut layouts = Vec::new();
        for (index, section) in sections.iter().enumerate().take(sample_pages) {
            let mut blocks = Vec::new();
            for (item, band) in section.iter().zip(band_positions(section.len())) {
                let region = band_region(band);
                if let Some(text) = item.signature_text() {
                    blocks.push(LayoutBlock::text(region, text));
                }
                for id in item.image_ids() {
                    if let Some((_, hash)) = media.get(id) {
                        blocks.push(LayoutBlock::image(region, hash));
                    }
                }
            }
            layouts.push(PageLayout { index, blocks });
        }
        Ok(layouts)
    }

    fn sample_text(&self, bytes: &[u8], pages: usize, chars: usize) -> Result<String, ParseError> {
        let mut package = Package::open(bytes, self.limits.max_part_size)?;
        let sections = split_sections(package.body()?);
        let mut sample = String::new();
        for item in sections.iter().take(pages).flatten() {
            if let Some(text) = item.signature_text() {
                sample.push_str(&text);
                sample.push('\n');
            }
        }
        truncate_chars(&mut sample, chars);
        Ok(sample)
    }

    fn parse(&self, bytes: &[u8], request: &ParseRequest) -> Result<ParsedDocument, ParseError> {
        let mut package = Package::open(bytes, self.limits.max_part_size)?;
        let rels = package.relationships()?;
        let items = package.body()?;
        let paragraph_count = items
            .iter()
            .filter(|i| matches!(i, Item::Para(p) if !p.plain_text().is_empty()))
            .count();
        let sections = split_sections(items);
        let total = sections.len();
        let range = request.page_range.clip(total);
        info!(
            "DOCX loaded: {} section(s), {} paragraph(s), converting {:?} at {}",
            total, paragraph_count, range, request.tier
        );

        let mut media = Media::new(&mut package, &rels);
        let units = range
            .map(|index| self.build_unit(index, &sections[index], request, &mut media))
            .collect();

        Ok(ParsedDocument {
            kind: UnitKind::Section,
            units,
            total_units: total,
            paragraph_count: Some(paragraph_count),
            title: None,
        })
    }

    fn inspect(&self, bytes: &[u8]) -> Result<DocumentInfo, ParseError> {
        let mut package = Package::open(bytes, self.limits.max_part_size)?;
        let items = package.body()?;
        let (title, author) = package
            .read_string(CORE_PART)
            .ok()
            .flatten()
            .map(|xml| parse_core_properties(&xml))
            .unwrap_or_default();
        let paragraph_count = items
            .iter()
            .filter(|i| matches!(i, Item::Para(p) if !p.plain_text().is_empty()))
            .count();
        let table_count = items.iter().filter(|i| matches!(i, Item::Table(_))).count();

        Ok(DocumentInfo {
            unit_count: split_sections(items).len(),
            unit_kind: Some(UnitKind::Section),
            title,
            author,
            has_images: package.has_media(),
            paragraph_count: Some(paragraph_count),
            table_count: Some(table_count),
            ..Default::default()
        })
    }
}
