//! Builders for synthetic DOCX and XLSX files used across import tests

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::template::{build_workbook, Cell};

const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml";

/// Assembles a minimal but structurally honest DOCX archive
pub(crate) struct DocxBuilder {
    body: String,
    relationships: Vec<(String, String)>,
    media: Vec<(String, Vec<u8>)>,
}

impl DocxBuilder {
    pub fn new() -> Self {
        Self {
            body: String::new(),
            relationships: Vec::new(),
            media: Vec::new(),
        }
    }

    pub fn heading(self, level: u8, text: &str) -> Self {
        let style = format!("Heading{}", level);
        self.styled_paragraph(&style, text)
    }

    pub fn styled_paragraph(mut self, style: &str, text: &str) -> Self {
        self.body.push_str(&format!(
            "<w:p><w:pPr><w:pStyle w:val=\"{}\"/></w:pPr><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
            style,
            xml_text(text)
        ));
        self
    }

    pub fn paragraph(mut self, text: &str) -> Self {
        self.body.push_str(&format!(
            "<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
            xml_text(text)
        ));
        self
    }

    /// Four runs: plain, bold, plain, italic
    pub fn formatted_paragraph(mut self, lead: &str, bold: &str, mid: &str, italic: &str) -> Self {
        self.body.push_str(&format!(
            concat!(
                "<w:p>",
                "<w:r><w:t xml:space=\"preserve\">{}</w:t></w:r>",
                "<w:r><w:rPr><w:b/></w:rPr><w:t xml:space=\"preserve\">{}</w:t></w:r>",
                "<w:r><w:t xml:space=\"preserve\">{}</w:t></w:r>",
                "<w:r><w:rPr><w:i/></w:rPr><w:t xml:space=\"preserve\">{}</w:t></w:r>",
                "</w:p>"
            ),
            xml_text(lead),
            xml_text(bold),
            xml_text(mid),
            xml_text(italic)
        ));
        self
    }

    /// A paragraph holding a single inline drawing referencing `rid`
    pub fn image_paragraph(mut self, rid: &str) -> Self {
        self.body.push_str(&format!(
            concat!(
                "<w:p><w:r><w:drawing><wp:inline><a:graphic><a:graphicData>",
                "<pic:pic><pic:blipFill><a:blip r:embed=\"{}\"/></pic:blipFill></pic:pic>",
                "</a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p>"
            ),
            rid
        ));
        self
    }

    /// Register an image part and its relationship entry
    pub fn media(mut self, rid: &str, path: &str, bytes: &[u8]) -> Self {
        self.relationships.push((rid.to_string(), path.to_string()));
        self.media.push((format!("word/{}", path), bytes.to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let document = format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
                "<w:document ",
                "xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\" ",
                "xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\" ",
                "xmlns:wp=\"http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing\" ",
                "xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" ",
                "xmlns:pic=\"http://schemas.openxmlformats.org/drawingml/2006/picture\">",
                "<w:body>{}</w:body></w:document>"
            ),
            self.body
        );

        let rels: String = self
            .relationships
            .iter()
            .map(|(id, target)| {
                format!(
                    "<Relationship Id=\"{}\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/image\" Target=\"{}\"/>",
                    id, target
                )
            })
            .collect();
        let rels_xml = format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
                "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">{}</Relationships>"
            ),
            rels
        );

        let content_types = format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
                "<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">",
                "<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>",
                "<Default Extension=\"xml\" ContentType=\"application/xml\"/>",
                "<Default Extension=\"png\" ContentType=\"image/png\"/>",
                "<Default Extension=\"jpeg\" ContentType=\"image/jpeg\"/>",
                "<Override PartName=\"/word/document.xml\" ContentType=\"{}\"/>",
                "</Types>"
            ),
            DOCX_CONTENT_TYPE
        );

        let root_rels = concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
            "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
            "<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"word/document.xml\"/>",
            "</Relationships>"
        );

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        zip.start_file("[Content_Types].xml", options).unwrap();
        zip.write_all(content_types.as_bytes()).unwrap();
        zip.start_file("_rels/.rels", options).unwrap();
        zip.write_all(root_rels.as_bytes()).unwrap();
        zip.start_file("word/document.xml", options).unwrap();
        zip.write_all(document.as_bytes()).unwrap();
        zip.start_file("word/_rels/document.xml.rels", options).unwrap();
        zip.write_all(rels_xml.as_bytes()).unwrap();
        for (path, bytes) in &self.media {
            zip.start_file(path.as_str(), options).unwrap();
            zip.write_all(bytes).unwrap();
        }

        zip.finish().unwrap().into_inner()
    }
}

fn xml_text(text: &str) -> String {
    html_escape::encode_text(text).into_owned()
}

/// A 4x4 opaque PNG, enough for thumbnail and data-URI tests
pub(crate) fn tiny_png_bytes() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([180, 40, 40, 255]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// A workbook whose single sheet carries the given rows
pub(crate) fn workbook_with_sheet(sheet_name: &str, rows: Vec<Vec<Cell>>) -> Vec<u8> {
    build_workbook(&[(sheet_name, rows)]).unwrap()
}

/// A well-formed batch sheet: header row plus one row per entry
/// (number, title, content, premium, published)
pub(crate) fn batch_sheet(entries: &[(f64, &str, &str, bool, bool)]) -> Vec<u8> {
    let mut rows = vec![header_row()];
    for (number, title, content, premium, published) in entries {
        rows.push(vec![
            Cell::Number(*number),
            Cell::Text(title.to_string()),
            Cell::Text(content.to_string()),
            Cell::Bool(*premium),
            Cell::Bool(*published),
        ]);
    }
    workbook_with_sheet("Chapters", rows)
}

pub(crate) fn header_row() -> Vec<Cell> {
    vec![
        Cell::Text("Chapter Number".to_string()),
        Cell::Text("Title".to_string()),
        Cell::Text("Content".to_string()),
        Cell::Text("Premium".to_string()),
        Cell::Text("Published".to_string()),
    ]
}
