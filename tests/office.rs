//! Word and Excel conversions through the built-in adapters.

use any2md::document::UnitKind;
use any2md::{
    ConversionResponse, ConversionResult, ConversionService, FileContent, OptionOverrides,
    RawRequest, ResultStatus, ServiceConfig,
};
use bytes::Bytes;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;

fn zip_parts(parts: &[(&str, String)]) -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, body) in parts {
            zip.start_file(*name, opts).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    Bytes::from(buf.into_inner())
}

fn para(text: &str) -> String {
    format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
}

const PAGE_BREAK: &str = r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#;

/// Four sections, each closing with the same confidentiality footer.
fn report_docx() -> Bytes {
    let mut body = String::new();
    for section in 1..=4 {
        body.push_str(&para(&format!("Quarter {section} summary")));
        body.push_str(&para(&format!("Revenue grew in quarter {section}.")));
        body.push_str(&para("Company Confidential"));
        if section < 4 {
            body.push_str(PAGE_BREAK);
        }
    }
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    );
    zip_parts(&[("word/document.xml", document)])
}

fn inventory_xlsx() -> Bytes {
    let workbook = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets>
    <sheet name="Inventory" sheetId="1" r:id="rId1"/>
    <sheet name="Notes" sheetId="2" r:id="rId2"/>
  </sheets>
</workbook>"#;
    let rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
  <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/>
</Relationships>"#;
    let inventory = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
  <row r="1"><c r="A1" t="inlineStr"><is><t>Item</t></is></c><c r="B1" t="inlineStr"><is><t>Qty</t></is></c></row>
  <row r="2"><c r="A2" t="inlineStr"><is><t>Bolt</t></is></c><c r="B2"><v>12</v></c></row>
  <row r="3"><c r="A3" t="inlineStr"><is><t>Total</t></is></c><c r="B3"><f>SUM(B2:B2)</f><v>12</v></c></row>
</sheetData></worksheet>"#;
    let notes = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
  <row r="1"><c r="A1" t="inlineStr"><is><t>Checked by audit</t></is></c></row>
</sheetData></worksheet>"#;
    zip_parts(&[
        ("xl/workbook.xml", workbook.to_string()),
        ("xl/_rels/workbook.xml.rels", rels.to_string()),
        ("xl/worksheets/sheet1.xml", inventory.to_string()),
        ("xl/worksheets/sheet2.xml", notes.to_string()),
    ])
}

fn service(dir: &std::path::Path) -> ConversionService {
    ConversionService::new(ServiceConfig::builder().image_dir(dir).build().unwrap())
}

async fn convert(
    service: &ConversionService,
    filename: &str,
    bytes: Bytes,
    options: OptionOverrides,
) -> ConversionResult {
    let request = RawRequest::Single {
        filename: Some(filename.into()),
        content: Some(FileContent::Binary(bytes)),
        options,
    };
    match service.convert(request).await.unwrap() {
        ConversionResponse::Single(result) => result,
        ConversionResponse::Batch(_) => panic!("single request produced a batch"),
    }
}

#[tokio::test]
async fn word_footer_repeated_across_sections_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    let result = convert(&service, "report.docx", report_docx(), OptionOverrides::default()).await;
    assert_eq!(result.status, ResultStatus::Success, "{:?}", result.error);
    let content = result.content.unwrap();
    assert!(!content.contains("Company Confidential"), "{content}");
    assert!(content.contains("Revenue grew in quarter 3."));

    let meta = result.metadata;
    assert_eq!(meta.unit_kind, Some(UnitKind::Section));
    assert_eq!(meta.page_count, Some(4));
    assert!(meta.suppressed_signatures >= 1);
    assert!(meta.languages.is_empty());
}

#[tokio::test]
async fn word_page_range_selects_sections() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    let options = OptionOverrides {
        start_page: Some(1),
        end_page: Some(3),
        remove_header_footer: Some(false),
        ..Default::default()
    };
    let result = convert(&service, "report.docx", report_docx(), options).await;
    assert_eq!(result.metadata.units_converted, 2);
    let content = result.content.unwrap();
    assert!(!content.contains("Quarter 1 summary"));
    assert!(content.contains("Quarter 2 summary"));
    assert!(content.contains("Quarter 3 summary"));
    assert!(!content.contains("Quarter 4 summary"));
}

#[tokio::test]
async fn workbook_renders_tables_and_formulas() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    let result = convert(&service, "stock.xlsx", inventory_xlsx(), OptionOverrides::default()).await;
    assert_eq!(result.status, ResultStatus::Success, "{:?}", result.error);
    let content = result.content.unwrap();
    assert!(content.contains("## Inventory"), "{content}");
    assert!(content.contains("| Bolt | 12 |"));
    assert!(content.contains("=SUM(B2:B2)"));
    assert!(content.contains("Checked by audit"));
    assert_eq!(result.metadata.unit_kind, Some(UnitKind::Sheet));
    assert_eq!(result.metadata.sheet_count, Some(2));
}

#[tokio::test]
async fn workbook_sheet_selection_and_formula_toggle() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    let options = OptionOverrides {
        sheet_names: Some(vec!["Inventory".into(), "Missing".into()]),
        include_formulas: Some(false),
        ..Default::default()
    };
    let result = convert(&service, "stock.xlsx", inventory_xlsx(), options).await;
    assert_eq!(result.status, ResultStatus::Success, "{:?}", result.error);
    let content = result.content.unwrap();
    assert!(content.contains("Bolt"));
    assert!(!content.contains("Checked by audit"));
    assert!(!content.contains("=SUM"));
    assert_eq!(result.metadata.units_converted, 1);

    let none_exist = OptionOverrides {
        sheet_names: Some(vec!["Missing".into()]),
        ..Default::default()
    };
    let failed = convert(&service, "stock.xlsx", inventory_xlsx(), none_exist).await;
    assert_eq!(failed.status, ResultStatus::Error);
}

#[tokio::test]
async fn inspect_reports_workbook_sheets() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    let report = service
        .inspect("stock.xlsx", &FileContent::Binary(inventory_xlsx()))
        .await
        .unwrap();
    assert_eq!(report.info.sheet_names, vec!["Inventory", "Notes"]);
    assert_eq!(report.info.unit_count, 2);
}
