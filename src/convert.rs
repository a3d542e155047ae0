//! CSV -> XLSX conversion.
//!
//! The workbook is deliberately minimal: one sheet, inline strings, no
//! styling. Cell values beginning with `=`, `+`, `-`, or `@` are prefixed
//! with `'` so an exported sheet cannot smuggle a live formula into
//! whatever spreadsheet application opens it later.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use zip::write::FileOptions;
use zip::ZipWriter;

use crate::config::ConversionPolicy;
use crate::error::OrganizerError;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

/// Convert one CSV file into a single-sheet XLSX workbook at `dst`.
/// The workbook is written to a temporary sibling first and renamed into
/// place, so a crash mid-write never leaves a half-written file visible
/// under the final name.
pub fn csv_to_xlsx(
    src: &Path,
    dst: &Path,
    conversion: &ConversionPolicy,
) -> Result<(), OrganizerError> {
    let encoding = conversion.encoding.as_str();
    if !encoding.eq_ignore_ascii_case("utf-8") && !encoding.eq_ignore_ascii_case("utf8") {
        return Err(OrganizerError::Config(format!(
            "Unsupported conversion encoding: {}",
            encoding
        )));
    }
    if !conversion.delimiter.is_ascii() {
        return Err(OrganizerError::Config(format!(
            "Conversion delimiter must be ASCII: {:?}",
            conversion.delimiter
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(conversion.delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .from_path(src)
        .map_err(|e| OrganizerError::Conversion {
            src: src.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| OrganizerError::Conversion {
            src: src.to_path_buf(),
            reason: e.to_string(),
        })?;
        rows.push(record.iter().map(sanitize_cell).collect());
    }

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = dst.with_extension("xlsx.tmp");
    write_workbook(&tmp, &conversion.sheet_name, &rows)?;
    fs::rename(&tmp, dst)?;
    Ok(())
}

/// Neutralize formula-trigger prefixes (spreadsheet formula injection).
fn sanitize_cell(cell: &str) -> String {
    if cell.starts_with(['=', '+', '-', '@']) {
        format!("'{}", cell)
    } else {
        cell.to_string()
    }
}

fn write_workbook(path: &Path, sheet_name: &str, rows: &[Vec<String>]) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut archive = ZipWriter::new(BufWriter::new(file));
    let options: FileOptions = FileOptions::default();

    archive.start_file("[Content_Types].xml", options).map_err(zip_io)?;
    archive.write_all(CONTENT_TYPES.as_bytes())?;

    archive.start_file("_rels/.rels", options).map_err(zip_io)?;
    archive.write_all(ROOT_RELS.as_bytes())?;

    archive.start_file("xl/workbook.xml", options).map_err(zip_io)?;
    write!(
        archive,
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        xml_escape(sheet_name)
    )?;

    archive
        .start_file("xl/_rels/workbook.xml.rels", options)
        .map_err(zip_io)?;
    archive.write_all(WORKBOOK_RELS.as_bytes())?;

    archive
        .start_file("xl/worksheets/sheet1.xml", options)
        .map_err(zip_io)?;
    let mut sheet = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (row_index, row) in rows.iter().enumerate() {
        sheet.push_str(&format!("<row r=\"{}\">", row_index + 1));
        for (col_index, cell) in row.iter().enumerate() {
            sheet.push_str(&format!(
                "<c r=\"{}{}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
                column_name(col_index),
                row_index + 1,
                xml_escape(cell)
            ));
        }
        sheet.push_str("</row>");
    }
    sheet.push_str("</sheetData></worksheet>");
    archive.write_all(sheet.as_bytes())?;

    let mut inner = archive.finish().map_err(zip_io)?;
    inner.flush()?;
    Ok(())
}

fn zip_io(e: zip::result::ZipError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e)
}

/// Spreadsheet column letters: 0 -> A, 25 -> Z, 26 -> AA.
fn column_name(mut index: usize) -> String {
    let mut name = String::new();
    loop {
        name.insert(0, (b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

// ── Tests ───────────────────────────────────────────────────
