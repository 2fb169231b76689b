//! Output assembly: parsed blocks + stored image URLs → Markdown, HTML or
//! JSON.

use super::images::StoredImages;
use super::postprocess::clean_markdown;
use crate::document::{Block, ContentUnit, ParsedDocument};
use crate::options::{ConversionOptions, OutputFormat};
use crate::output::PageContent;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

/// Separator placed between pages of paginated Markdown.
pub const PAGE_SEPARATOR: &str = "\n\n---\n\n";

/// Rendered output of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub content: String,
    pub pages: Option<Vec<PageContent>>,
}

/// Render `document` in the requested output format.
pub fn assemble(
    document: &ParsedDocument,
    images: &StoredImages,
    options: &ConversionOptions,
    filename: &str,
) -> Rendered {
    match options.output_format {
        OutputFormat::Markdown => assemble_markdown(document, images, options.paginate),
        OutputFormat::Html => assemble_html(document, images, options.paginate, filename),
        OutputFormat::Json => assemble_json(document, images, options.paginate, filename),
    }
}

fn image_alt(sequence: usize, page: usize) -> String {
    format!("Image {} from page {}", sequence + 1, page + 1)
}

// ── Markdown ─────────────────────────────────────────────────────────────

fn escape_cell(cell: &str) -> String {
    cell.replace('|', "\\|").replace('\n', "<br>")
}

fn markdown_table(rows: &[Vec<String>]) -> String {
    let Some(header) = rows.first() else {
        return String::new();
    };
    let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let line = |row: &[String]| {
        let cells: Vec<String> = (0..width)
            .map(|i| escape_cell(row.get(i).map_or("", String::as_str)))
            .collect();
        format!("| {} |", cells.join(" | "))
    };
    let mut out = vec![line(header), format!("|{}", " --- |".repeat(width))];
    out.extend(rows.iter().skip(1).map(|r| line(r)));
    out.join("\n")
}

fn markdown_unit(unit: &ContentUnit, images: &StoredImages) -> String {
    let mut out = String::new();
    let mut previous_was_list = false;
    for block in &unit.blocks {
        let (text, is_list) = match block {
            Block::Heading { level, text } => {
                (format!("{} {}", "#".repeat(*level as usize), text), false)
            }
            Block::Paragraph(text) | Block::Raw(text) => (text.clone(), false),
            Block::ListItem {
                depth,
                ordered,
                text,
            } => {
                let marker = if *ordered { "1." } else { "-" };
                (format!("{}{} {}", "  ".repeat(*depth), marker, text), true)
            }
            Block::Table(rows) => (markdown_table(rows), false),
            Block::Image(sequence) => match images.get(unit.index, *sequence) {
                Some(img) => (format!("![{}]({})", image_alt(*sequence, unit.index), img.url), false),
                None => continue,
            },
        };
        if text.trim().is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str(if previous_was_list && is_list { "\n" } else { "\n\n" });
        }
        out.push_str(&text);
        previous_was_list = is_list;
    }
    clean_markdown(&out)
}

fn assemble_markdown(document: &ParsedDocument, images: &StoredImages, paginate: bool) -> Rendered {
    let pages: Vec<PageContent> = document
        .units
        .iter()
        .map(|unit| PageContent {
            index: unit.index,
            label: unit.label.clone(),
            content: markdown_unit(unit, images),
        })
        .collect();
    let separator = if paginate { PAGE_SEPARATOR } else { "\n\n" };
    let joined = pages
        .iter()
        .map(|p| p.content.trim_end())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(separator);
    Rendered {
        content: clean_markdown(&joined),
        pages: paginate.then_some(pages),
    }
}

// ── HTML ─────────────────────────────────────────────────────────────────

static RE_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static RE_ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*]+)\*").unwrap());
static RE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").unwrap());

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Escape, then turn inline Markdown emphasis into tags.
fn inline_html(text: &str) -> String {
    let s = escape_html(text);
    let s = RE_CODE.replace_all(&s, "<code>$1</code>");
    let s = RE_BOLD.replace_all(&s, "<strong>$1</strong>");
    RE_ITALIC.replace_all(&s, "<em>$1</em>").into_owned()
}

fn html_unit(unit: &ContentUnit, images: &StoredImages) -> String {
    let mut out = Vec::new();
    let mut open_list: Option<&'static str> = None;
    for block in &unit.blocks {
        let list_tag = match block {
            Block::ListItem { ordered: true, .. } => Some("ol"),
            Block::ListItem { .. } => Some("ul"),
            _ => None,
        };
        if open_list != list_tag {
            if let Some(tag) = open_list {
                out.push(format!("</{tag}>"));
            }
            if let Some(tag) = list_tag {
                out.push(format!("<{tag}>"));
            }
            open_list = list_tag;
        }
        match block {
            Block::Heading { level, text } => {
                let level = (*level).clamp(1, 6);
                out.push(format!("<h{level}>{}</h{level}>", inline_html(text)));
            }
            Block::Paragraph(text) => out.push(format!("<p>{}</p>", inline_html(text))),
            Block::Raw(text) => out.push(format!("<pre>{}</pre>", escape_html(text))),
            Block::ListItem { depth, text, .. } => out.push(format!(
                "<li data-depth=\"{depth}\">{}</li>",
                inline_html(text)
            )),
            Block::Table(rows) => {
                let mut table = String::from("<table>");
                for (i, row) in rows.iter().enumerate() {
                    let tag = if i == 0 { "th" } else { "td" };
                    table.push_str("<tr>");
                    for cell in row {
                        table.push_str(&format!("<{tag}>{}</{tag}>", escape_html(cell)));
                    }
                    table.push_str("</tr>");
                }
                table.push_str("</table>");
                out.push(table);
            }
            Block::Image(sequence) => {
                if let Some(img) = images.get(unit.index, *sequence) {
                    out.push(format!(
                        "<img src=\"{}\" alt=\"{}\"/>",
                        escape_html(&img.url),
                        image_alt(*sequence, unit.index)
                    ));
                }
            }
        }
    }
    if let Some(tag) = open_list {
        out.push(format!("</{tag}>"));
    }
    out.join("\n")
}

fn assemble_html(
    document: &ParsedDocument,
    images: &StoredImages,
    paginate: bool,
    filename: &str,
) -> Rendered {
    let pages: Vec<PageContent> = document
        .units
        .iter()
        .map(|unit| PageContent {
            index: unit.index,
            label: unit.label.clone(),
            content: format!(
                "<section data-index=\"{}\">\n{}\n</section>",
                unit.index,
                html_unit(unit, images)
            ),
        })
        .collect();
    let separator = if paginate { "\n<hr/>\n" } else { "\n" };
    let body = pages
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join(separator);
    let title = document.title.as_deref().unwrap_or(filename);
    let content = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\"/>\n<title>{}</title>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape_html(title),
        body
    );
    Rendered {
        content,
        pages: paginate.then_some(pages),
    }
}

// ── JSON ─────────────────────────────────────────────────────────────────

fn json_block(block: &Block, unit: &ContentUnit, images: &StoredImages) -> Option<Value> {
    let value = match block {
        Block::Heading { level, text } => json!({"type": "heading", "level": level, "text": text}),
        Block::Paragraph(text) => json!({"type": "paragraph", "text": text}),
        Block::Raw(text) => json!({"type": "text", "text": text}),
        Block::ListItem {
            depth,
            ordered,
            text,
        } => json!({"type": "list_item", "depth": depth, "ordered": ordered, "text": text}),
        Block::Table(rows) => json!({"type": "table", "rows": rows}),
        Block::Image(sequence) => {
            let img = images.get(unit.index, *sequence)?;
            json!({
                "type": "image",
                "url": img.url,
                "hash": img.hash,
                "alt": image_alt(*sequence, unit.index),
            })
        }
    };
    Some(value)
}

fn json_unit(unit: &ContentUnit, images: &StoredImages) -> Value {
    let blocks: Vec<Value> = unit
        .blocks
        .iter()
        .filter_map(|b| json_block(b, unit, images))
        .collect();
    json!({"index": unit.index, "label": unit.label, "blocks": blocks})
}

fn assemble_json(
    document: &ParsedDocument,
    images: &StoredImages,
    paginate: bool,
    filename: &str,
) -> Rendered {
    let units: Vec<Value> = document.units.iter().map(|u| json_unit(u, images)).collect();
    let pages = paginate.then(|| {
        document
            .units
            .iter()
            .zip(&units)
            .map(|(unit, value)| PageContent {
                index: unit.index,
                label: unit.label.clone(),
                content: value.to_string(),
            })
            .collect()
    });
    let doc = json!({
        "filename": filename,
        "title": document.title,
        "kind": document.kind,
        "units": units,
    });
    let content = serde_json::to_string_pretty(&doc).unwrap_or_else(|_| doc.to_string());
    Rendered { content, pages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{RawImage, UnitKind};
    use crate::store::ExtractedImage;
    use bytes::Bytes;
    use std::path::PathBuf;

    fn doc(units: Vec<ContentUnit>) -> ParsedDocument {
        ParsedDocument {
            kind: UnitKind::Page,
            total_units: units.len(),
            units,
            paragraph_count: None,
            title: None,
        }
    }

    fn unit(index: usize, blocks: Vec<Block>) -> ContentUnit {
        ContentUnit {
            index,
            label: format!("Page {}", index + 1),
            blocks,
            images: Vec::new(),
        }
    }

    fn stored(page: usize, sequence: usize) -> StoredImages {
        let mut images = StoredImages::default();
        images.insert(page, sequence, ExtractedImage {
            hash: "abc".into(),
            page,
            sequence,
            size: 3,
            path: PathBuf::from("/tmp/abc.png"),
            url: "http://h/static/s/abc.png".into(),
            extension: "png".into(),
        });
        images
    }

    #[test]
    fn paginated_markdown_uses_separator_and_page_list() {
        let d = doc(vec![
            unit(0, vec![Block::Paragraph("one".into())]),
            unit(1, vec![Block::Paragraph("two".into())]),
        ]);
        let r = assemble_markdown(&d, &StoredImages::default(), true);
        assert_eq!(r.content, "one\n\n---\n\ntwo\n");
        let pages = r.pages.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].content, "two\n");
        assert_eq!(pages[1].label, "Page 2");
    }

    #[test]
    fn unpaginated_markdown_has_no_page_list() {
        let d = doc(vec![
            unit(0, vec![Block::Paragraph("one".into())]),
            unit(1, vec![Block::Paragraph("two".into())]),
        ]);
        let r = assemble_markdown(&d, &StoredImages::default(), false);
        assert_eq!(r.content, "one\n\ntwo\n");
        assert!(r.pages.is_none());
    }

    #[test]
    fn lists_tables_and_images_render() {
        let mut u = unit(
            2,
            vec![
                Block::Heading {
                    level: 2,
                    text: "Parts".into(),
                },
                Block::ListItem {
                    depth: 0,
                    ordered: false,
                    text: "a".into(),
                },
                Block::ListItem {
                    depth: 1,
                    ordered: true,
                    text: "b".into(),
                },
                Block::Table(vec![vec!["k".into(), "v|x".into()], vec!["1".into()]]),
                Block::Image(0),
                Block::Image(1),
            ],
        );
        u.images.push(RawImage {
            sequence: 0,
            bytes: Bytes::from_static(b"x"),
            width: 1,
            height: 1,
        });
        let md = markdown_unit(&u, &stored(2, 0));
        assert_eq!(
            md,
            "## Parts\n\n- a\n  1. b\n\n| k | v\\|x |\n| --- | --- |\n| 1 |  |\n\n![Image 1 from page 3](http://h/static/s/abc.png)\n"
        );
    }

    #[test]
    fn html_escapes_and_converts_emphasis() {
        let u = unit(0, vec![Block::Paragraph("**a** <b> *c*".into())]);
        let html = html_unit(&u, &StoredImages::default());
        assert_eq!(html, "<p><strong>a</strong> &lt;b&gt; <em>c</em></p>");
    }

    #[test]
    fn json_lists_units_and_blocks() {
        let d = doc(vec![unit(0, vec![Block::Raw("text".into())])]);
        let r = assemble_json(&d, &StoredImages::default(), false, "f.pdf");
        let v: Value = serde_json::from_str(&r.content).unwrap();
        assert_eq!(v["filename"], "f.pdf");
        assert_eq!(v["units"][0]["blocks"][0]["type"], "text");
        assert_eq!(v["kind"], "page");
    }
}
