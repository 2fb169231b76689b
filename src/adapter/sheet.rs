//! Spreadsheet (`.xlsx`, `.xls`) adapter backed by calamine.
//!
//! Every selected sheet becomes one [`ContentUnit`] holding a `## {sheet}`
//! heading followed by the sheet's used range as a table.

use super::{AdapterLimits, ParseRequest, ParseTier, ParserAdapter};
use crate::document::{Block, ContentUnit, DocumentInfo, ParsedDocument, UnitKind};
use crate::error::ParseError;
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader, Sheets};
use std::io::Cursor;
use tracing::{info, warn};

/// [`ParserAdapter`] for Excel workbooks.
#[derive(Debug, Clone)]
pub struct SheetAdapter {
    limits: AdapterLimits,
}

impl SheetAdapter {
    pub fn new(limits: AdapterLimits) -> Self {
        Self { limits }
    }
}

type Workbook = Sheets<Cursor<Vec<u8>>>;

fn open(bytes: &[u8]) -> Result<Workbook, ParseError> {
    open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(|e| {
        let detail = e.to_string();
        if detail.to_ascii_lowercase().contains("password")
            || detail.to_ascii_lowercase().contains("encrypt")
        {
            ParseError::Encrypted
        } else {
            ParseError::corrupt(detail)
        }
    })
}

/// Display text for one cell.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Spreadsheet column letters for a zero-based index (`0 → A`, `27 → AB`).
fn column_name(mut index: u32) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// Non-empty rows of `range`, with empty trailing columns removed.
fn table_rows(range: &Range<Data>, max_rows: usize) -> (Vec<Vec<String>>, usize) {
    let mut rows: Vec<Vec<String>> = range
        .rows()
        .map(|r| r.iter().map(cell_text).collect::<Vec<_>>())
        .filter(|r| r.iter().any(|c| !c.is_empty()))
        .collect();
    let total = rows.len();
    rows.truncate(max_rows);

    let width = rows
        .iter()
        .filter_map(|r| r.iter().rposition(|c| !c.is_empty()))
        .max()
        .map_or(0, |w| w + 1);
    for row in &mut rows {
        row.truncate(width);
        row.resize(width, String::new());
    }
    (rows, total)
}

impl SheetAdapter {
    fn selected_sheets(
        &self,
        workbook: &Workbook,
        wanted: Option<&[String]>,
    ) -> Result<Vec<String>, ParseError> {
        let all = workbook.sheet_names();
        if all.len() > self.limits.excel_max_sheets {
            return Err(ParseError::LimitExceeded {
                what: "sheet".into(),
                actual: all.len(),
                limit: self.limits.excel_max_sheets,
            });
        }
        let Some(wanted) = wanted else {
            return Ok(all);
        };
        for name in wanted.iter().filter(|w| !all.contains(*w)) {
            warn!("Requested sheet '{}' not found in workbook", name);
        }
        let selected: Vec<String> = all.into_iter().filter(|n| wanted.contains(n)).collect();
        if selected.is_empty() {
            return Err(ParseError::Failed(format!(
                "none of the requested sheets exist: {}",
                wanted.join(", ")
            )));
        }
        Ok(selected)
    }

    fn formula_blocks(&self, workbook: &mut Workbook, sheet: &str) -> Vec<Block> {
        let Ok(formulas) = workbook.worksheet_formula(sheet) else {
            return Vec::new();
        };
        let (row0, col0) = formulas.start().unwrap_or((0, 0));
        let items: Vec<Block> = formulas
            .cells()
            .filter(|(_, _, f)| !f.trim().is_empty())
            .map(|(r, c, f)| Block::ListItem {
                depth: 0,
                ordered: false,
                text: format!(
                    "`{}{}`: `={}`",
                    column_name(col0 + c as u32),
                    row0 + r as u32 + 1,
                    f.trim_start_matches('=')
                ),
            })
            .collect();
        if items.is_empty() {
            return items;
        }
        let mut blocks = vec![Block::Heading {
            level: 3,
            text: "Formulas".into(),
        }];
        blocks.extend(items);
        blocks
    }
}

impl ParserAdapter for SheetAdapter {
    fn parse(&self, bytes: &[u8], request: &ParseRequest) -> Result<ParsedDocument, ParseError> {
        let mut workbook = open(bytes)?;
        let sheets = self.selected_sheets(&workbook, request.sheet_names.as_deref())?;
        let range = request.page_range.clip(sheets.len());
        info!(
            "Workbook loaded: {} sheet(s) selected, converting {:?} at {}",
            sheets.len(),
            range,
            request.tier
        );

        let mut units = Vec::with_capacity(range.len());
        for index in range {
            let name = &sheets[index];
            let data = workbook
                .worksheet_range(name)
                .map_err(|e| ParseError::corrupt(format!("sheet '{name}': {e}")))?;
            let (rows, total_rows) = table_rows(&data, self.limits.excel_max_rows);

            let mut unit = ContentUnit::new(index, name.clone());
            unit.blocks.push(Block::Heading {
                level: 2,
                text: name.clone(),
            });

            if rows.is_empty() {
                unit.blocks.push(Block::Paragraph("*Empty sheet*".into()));
                units.push(unit);
                continue;
            }

            match request.tier {
                ParseTier::Minimal => {
                    let text = rows
                        .iter()
                        .map(|r| r.join("\t").trim_end().to_string())
                        .collect::<Vec<_>>()
                        .join("\n");
                    unit.blocks.push(Block::Raw(text));
                }
                _ => unit.blocks.push(Block::Table(rows)),
            }
            if total_rows > self.limits.excel_max_rows {
                unit.blocks.push(Block::Paragraph(format!(
                    "*Showing the first {} of {} rows.*",
                    self.limits.excel_max_rows, total_rows
                )));
            }
            if request.tier == ParseTier::Full && request.include_formulas {
                unit.blocks.extend(self.formula_blocks(&mut workbook, name));
            }
            units.push(unit);
        }

        Ok(ParsedDocument {
            kind: UnitKind::Sheet,
            units,
            total_units: sheets.len(),
            paragraph_count: None,
            title: None,
        })
    }

    fn inspect(&self, bytes: &[u8]) -> Result<DocumentInfo, ParseError> {
        let workbook = open(bytes)?;
        let sheet_names = workbook.sheet_names();
        Ok(DocumentInfo {
            unit_count: sheet_names.len(),
            unit_kind: Some(UnitKind::Sheet),
            sheet_names,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(27), "AB");
        assert_eq!(column_name(701), "ZZ");
        assert_eq!(column_name(702), "AAA");
    }

    #[test]
    fn cell_text_formats_numbers() {
        assert_eq!(cell_text(&Data::Float(3.0)), "3");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::Int(-7)), "-7");
        assert_eq!(cell_text(&Data::String("  x ".into())), "x");
        assert_eq!(cell_text(&Data::Empty), "");
        assert_eq!(cell_text(&Data::Bool(true)), "true");
    }

    #[test]
    fn table_rows_drop_blank_rows_and_trailing_columns() {
        let mut range: Range<Data> = Range::new((0, 0), (3, 3));
        range.set_value((0, 0), Data::String("Name".into()));
        range.set_value((0, 1), Data::String("Qty".into()));
        range.set_value((2, 0), Data::String("Bolt".into()));
        range.set_value((2, 1), Data::Float(12.0));
        let (rows, total) = table_rows(&range, 100);
        assert_eq!(total, 2);
        assert_eq!(
            rows,
            vec![
                vec!["Name".to_string(), "Qty".to_string()],
                vec!["Bolt".to_string(), "12".to_string()]
            ]
        );
    }

    #[test]
    fn table_rows_truncate_to_limit() {
        let mut range: Range<Data> = Range::new((0, 0), (4, 0));
        for r in 0..5 {
            range.set_value((r, 0), Data::Int(r as i64));
        }
        let (rows, total) = table_rows(&range, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(total, 5);
    }

    #[test]
    fn garbage_is_corrupt() {
        let adapter = SheetAdapter::new(AdapterLimits::default());
        let request = ParseRequest::new(ParseTier::Full, &Default::default());
        assert!(adapter.parse(b"PK\x03\x04garbage", &request).is_err());
    }
}
