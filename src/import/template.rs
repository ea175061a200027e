//! Batch template workbook generation
//!
//! Produces the downloadable XLSX that authors fill in for batch imports.
//! The workbook is written by hand as OOXML parts (inline strings only, no
//! shared-string table) so the output has no spreadsheet engine behind it
//! and round-trips cleanly through the batch sheet reader.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{AppError, Result};

use super::types::MAX_BATCH_ROWS;

/// One spreadsheet cell for workbook assembly
#[derive(Debug, Clone)]
pub(crate) enum Cell {
    Text(String),
    Number(f64),
    Bool(bool),
    Empty,
}

/// Build the template workbook offered at the template download endpoint
pub fn batch_template_xlsx() -> Result<Vec<u8>> {
    let instructions = vec![
        vec![Cell::Text("Fableport batch chapter import".to_string())],
        vec![],
        vec![Cell::Text(
            "Fill in the Chapters sheet, one row per chapter, then upload this file on the batch import screen."
                .to_string(),
        )],
        vec![Cell::Text(
            "Chapter Number: required, greater than zero. Decimals mark side chapters, for example 2.5."
                .to_string(),
        )],
        vec![Cell::Text("Title: required. Shown in the table of contents.".to_string())],
        vec![Cell::Text(
            "Content: required. Plain text or simple HTML such as <p> and <em>.".to_string(),
        )],
        vec![Cell::Text(
            "Premium and Published: TRUE or FALSE. Blank cells count as FALSE.".to_string(),
        )],
        vec![Cell::Text(format!(
            "Keep the header row in place and fill at most {} chapter rows below it.",
            MAX_BATCH_ROWS
        ))],
    ];

    let chapters = vec![
        vec![
            Cell::Text("Chapter Number".to_string()),
            Cell::Text("Title".to_string()),
            Cell::Text("Content".to_string()),
            Cell::Text("Premium".to_string()),
            Cell::Text("Published".to_string()),
        ],
        vec![
            Cell::Number(1.0),
            Cell::Text("The Beginning".to_string()),
            Cell::Text("<p>Every story starts somewhere.</p>".to_string()),
            Cell::Text("FALSE".to_string()),
            Cell::Text("TRUE".to_string()),
        ],
        vec![
            Cell::Number(2.0),
            Cell::Text("Rising Action".to_string()),
            Cell::Text("<p>Then everything got more complicated.</p>".to_string()),
            Cell::Text("FALSE".to_string()),
            Cell::Text("TRUE".to_string()),
        ],
        vec![
            Cell::Number(2.5),
            Cell::Text("Interlude".to_string()),
            Cell::Text("<p>A quiet scene between the numbered chapters.</p>".to_string()),
            Cell::Text("FALSE".to_string()),
            Cell::Text("FALSE".to_string()),
        ],
    ];

    build_workbook(&[("Instructions", instructions), ("Chapters", chapters)])
}

/// Assemble a complete XLSX archive from named sheets
pub(crate) fn build_workbook(sheets: &[(&str, Vec<Vec<Cell>>)]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut content_types = String::from(concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
        "<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">",
        "<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>",
        "<Default Extension=\"xml\" ContentType=\"application/xml\"/>",
        "<Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>",
        "<Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/>",
    ));
    let mut workbook_sheets = String::new();
    let mut workbook_rels = String::new();

    for (index, (name, _)) in sheets.iter().enumerate() {
        let sheet_no = index + 1;
        content_types.push_str(&format!(
            "<Override PartName=\"/xl/worksheets/sheet{}.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>",
            sheet_no
        ));
        workbook_sheets.push_str(&format!(
            "<sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>",
            html_escape::encode_double_quoted_attribute(name),
            sheet_no,
            sheet_no
        ));
        workbook_rels.push_str(&format!(
            "<Relationship Id=\"rId{}\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" Target=\"worksheets/sheet{}.xml\"/>",
            sheet_no, sheet_no
        ));
    }
    content_types.push_str("</Types>");

    let styles_rid = sheets.len() + 1;
    workbook_rels.push_str(&format!(
        "<Relationship Id=\"rId{}\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles\" Target=\"styles.xml\"/>",
        styles_rid
    ));

    let root_rels = concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
        "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
        "<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"xl/workbook.xml\"/>",
        "</Relationships>"
    );

    let workbook_xml = format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
            "<workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" ",
            "xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">",
            "<sheets>{}</sheets></workbook>"
        ),
        workbook_sheets
    );

    let workbook_rels_xml = format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
            "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">{}</Relationships>"
        ),
        workbook_rels
    );

    // Enough of a stylesheet for spreadsheet apps to open the file
    let styles_xml = concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
        "<styleSheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">",
        "<fonts count=\"1\"><font><sz val=\"11\"/><name val=\"Calibri\"/></font></fonts>",
        "<fills count=\"1\"><fill><patternFill patternType=\"none\"/></fill></fills>",
        "<borders count=\"1\"><border/></borders>",
        "<cellStyleXfs count=\"1\"><xf/></cellStyleXfs>",
        "<cellXfs count=\"1\"><xf xfId=\"0\"/></cellXfs>",
        "</styleSheet>"
    );

    write_entry(&mut zip, "[Content_Types].xml", content_types.as_bytes(), options)?;
    write_entry(&mut zip, "_rels/.rels", root_rels.as_bytes(), options)?;
    write_entry(&mut zip, "xl/workbook.xml", workbook_xml.as_bytes(), options)?;
    write_entry(
        &mut zip,
        "xl/_rels/workbook.xml.rels",
        workbook_rels_xml.as_bytes(),
        options,
    )?;
    write_entry(&mut zip, "xl/styles.xml", styles_xml.as_bytes(), options)?;

    for (index, (_, rows)) in sheets.iter().enumerate() {
        let path = format!("xl/worksheets/sheet{}.xml", index + 1);
        let xml = worksheet_xml(rows);
        write_entry(&mut zip, &path, xml.as_bytes(), options)?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| AppError::Internal(format!("failed to finalize workbook: {}", e)))?;
    Ok(cursor.into_inner())
}

fn write_entry(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    path: &str,
    bytes: &[u8],
    options: SimpleFileOptions,
) -> Result<()> {
    zip.start_file(path, options)
        .map_err(|e| AppError::Internal(format!("failed to start workbook entry {}: {}", path, e)))?;
    zip.write_all(bytes)?;
    Ok(())
}

fn worksheet_xml(rows: &[Vec<Cell>]) -> String {
    let mut xml = String::from(concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
        "<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">",
        "<sheetData>"
    ));

    for (row_index, row) in rows.iter().enumerate() {
        let row_no = row_index + 1;
        xml.push_str(&format!("<row r=\"{}\">", row_no));
        for (col_index, cell) in row.iter().enumerate() {
            let reference = cell_reference(row_no, col_index);
            match cell {
                Cell::Text(text) => xml.push_str(&format!(
                    "<c r=\"{}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
                    reference,
                    html_escape::encode_text(text)
                )),
                Cell::Number(value) => {
                    xml.push_str(&format!("<c r=\"{}\"><v>{}</v></c>", reference, value))
                }
                Cell::Bool(value) => xml.push_str(&format!(
                    "<c r=\"{}\" t=\"b\"><v>{}</v></c>",
                    reference,
                    if *value { 1 } else { 0 }
                )),
                Cell::Empty => {}
            }
        }
        xml.push_str("</row>");
    }

    xml.push_str("</sheetData></worksheet>");
    xml
}

/// A1-style reference for a zero-based column in a one-based row
fn cell_reference(row: usize, col: usize) -> String {
    let mut letters = String::new();
    let mut remainder = col;
    loop {
        letters.insert(0, (b'A' + (remainder % 26) as u8) as char);
        if remainder < 26 {
            break;
        }
        remainder = remainder / 26 - 1;
    }
    format!("{}{}", letters, row)
}
