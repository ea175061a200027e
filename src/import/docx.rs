//! DOCX manuscript parsing
//!
//! A DOCX file is a zip container; the document body lives in
//! `word/document.xml` and embedded images are referenced through the
//! relationships part and stored under `word/media/`. The parser streams
//! the body XML and produces a flat list of blocks: headings (from
//! `Heading*`/`Title` paragraph styles) and paragraphs rendered as HTML
//! with bold/italic runs and images inlined as base64 data URIs.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use base64::Engine as _;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;

use super::types::ImportError;

/// One block of document content
#[derive(Debug, Clone, PartialEq)]
pub enum DocBlock {
    /// A styled heading paragraph; text may be empty for a blank heading
    Heading { level: u8, text: String },
    /// A body paragraph rendered as inline HTML
    Paragraph { html: String },
}

/// Parse result: blocks in document order plus non-fatal warnings
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub blocks: Vec<DocBlock>,
    pub warnings: Vec<String>,
}

/// Parse a DOCX buffer into blocks
///
/// Fails with `UnsupportedFormat` when the buffer is not a DOCX container
/// and `ParseFailure` for decode faults inside a recognized container.
pub fn parse_docx(data: &[u8]) -> Result<ParsedDocument, ImportError> {
    let cursor = Cursor::new(data);
    let mut archive = zip::ZipArchive::new(cursor).map_err(|_| {
        ImportError::UnsupportedFormat("not a DOCX container (zip archive expected)".to_string())
    })?;

    let document_xml = match read_part(&mut archive, "word/document.xml") {
        Some(bytes) => String::from_utf8(bytes)
            .map_err(|e| ImportError::ParseFailure(format!("document.xml is not UTF-8: {}", e)))?,
        None => {
            return Err(ImportError::UnsupportedFormat(
                "missing word/document.xml (not a DOCX file)".to_string(),
            ))
        }
    };

    let mut warnings = Vec::new();

    let relationships = match read_part(&mut archive, "word/_rels/document.xml.rels") {
        Some(bytes) => match String::from_utf8(bytes) {
            Ok(xml) => parse_relationships(&xml)?,
            Err(_) => {
                warnings.push("relationships part is not UTF-8; images skipped".to_string());
                HashMap::new()
            }
        },
        None => HashMap::new(),
    };

    let media = load_media(&mut archive, &relationships, &mut warnings);

    let mut walker = DocumentWalker::new(&media, warnings);
    let mut reader = Reader::from_str(&document_xml);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => walker.open(&e),
            Ok(Event::Empty(e)) => {
                walker.open(&e);
                walker.close(e.local_name().as_ref());
            }
            Ok(Event::End(e)) => walker.close(e.local_name().as_ref()),
            Ok(Event::Text(t)) => walker.text(&t)?,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ImportError::ParseFailure(format!(
                    "malformed document.xml at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(walker.finish())
}

fn read_part(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> Option<Vec<u8>> {
    let mut file = archive.by_name(name).ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).ok()?;
    Some(buf)
}

/// A parsed relationship entry from document.xml.rels
struct Relationship {
    rel_type: String,
    target: String,
    external: bool,
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, Relationship>, ImportError> {
    let mut map = HashMap::new();
    let mut reader = Reader::from_str(xml);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    let id = local_attr(&e, b"Id");
                    let target = local_attr(&e, b"Target");
                    if let (Some(id), Some(target)) = (id, target) {
                        map.insert(
                            id,
                            Relationship {
                                rel_type: local_attr(&e, b"Type").unwrap_or_default(),
                                target,
                                external: local_attr(&e, b"TargetMode").as_deref()
                                    == Some("External"),
                            },
                        );
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ImportError::ParseFailure(format!(
                    "malformed relationships part: {}",
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(map)
}

/// Load every image relationship's bytes as a ready-to-embed data URI
///
/// Entries mapped to `None` were recognized but could not be loaded; a
/// warning has already been recorded for them.
fn load_media(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    relationships: &HashMap<String, Relationship>,
    warnings: &mut Vec<String>,
) -> HashMap<String, Option<String>> {
    let mut media = HashMap::new();

    for (id, rel) in relationships {
        if !rel.rel_type.contains("image") {
            continue;
        }

        if rel.external {
            warnings.push(format!(
                "image relationship {} targets an external resource; skipped",
                id
            ));
            media.insert(id.clone(), None);
            continue;
        }

        let path = resolve_part_path(&rel.target);
        match read_part(archive, &path) {
            Some(bytes) => {
                let mime = mime_guess::from_path(&path).first_or_octet_stream();
                let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                media.insert(
                    id.clone(),
                    Some(format!("data:{};base64,{}", mime.essence_str(), encoded)),
                );
            }
            None => {
                warnings.push(format!("image part {} could not be read; skipped", path));
                media.insert(id.clone(), None);
            }
        }
    }

    media
}

/// Resolve a relationship target to an archive part path
///
/// Targets are relative to `word/` unless they climb out with `../` or
/// start from the package root.
fn resolve_part_path(target: &str) -> String {
    let target = target.trim_start_matches('/');
    if let Some(rest) = target.strip_prefix("../") {
        rest.to_string()
    } else if target.starts_with("word/") {
        target.to_string()
    } else {
        format!("word/{}", target)
    }
}

fn local_attr(e: &BytesStart, name: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        let key = attr.key.as_ref();
        let local = key.split(|&b| b == b':').last().unwrap_or(key);
        if local == name {
            if let Ok(value) = attr.unescape_value() {
                return Some(value.into_owned());
            }
        }
    }
    None
}

/// Toggle properties like `<w:b/>` default to on unless val says otherwise
fn on_off(e: &BytesStart) -> bool {
    match local_attr(e, b"val") {
        Some(v) => !matches!(v.as_str(), "false" | "0" | "none"),
        None => true,
    }
}

fn heading_level_from_style(style: &str) -> Option<u8> {
    let s = style.trim().to_ascii_lowercase();
    if s == "title" {
        return Some(1);
    }
    if let Some(rest) = s.strip_prefix("heading") {
        let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
        let level = digits.parse::<u8>().unwrap_or(1);
        return Some(level.clamp(1, 6));
    }
    None
}

/// Streaming state for one pass over document.xml
struct DocumentWalker<'a> {
    media: &'a HashMap<String, Option<String>>,
    blocks: Vec<DocBlock>,
    warnings: Vec<String>,
    in_paragraph: bool,
    in_paragraph_props: bool,
    in_text: bool,
    paragraph_style: Option<String>,
    paragraph_html: String,
    paragraph_text: String,
    paragraph_has_image: bool,
    run_bold: bool,
    run_italic: bool,
}

impl<'a> DocumentWalker<'a> {
    fn new(media: &'a HashMap<String, Option<String>>, warnings: Vec<String>) -> Self {
        Self {
            media,
            blocks: Vec::new(),
            warnings,
            in_paragraph: false,
            in_paragraph_props: false,
            in_text: false,
            paragraph_style: None,
            paragraph_html: String::new(),
            paragraph_text: String::new(),
            paragraph_has_image: false,
            run_bold: false,
            run_italic: false,
        }
    }

    fn open(&mut self, e: &BytesStart) {
        match e.local_name().as_ref() {
            b"p" => {
                self.in_paragraph = true;
                self.paragraph_style = None;
                self.paragraph_html.clear();
                self.paragraph_text.clear();
                self.paragraph_has_image = false;
                self.run_bold = false;
                self.run_italic = false;
            }
            b"pPr" => self.in_paragraph_props = true,
            b"pStyle" if self.in_paragraph_props => {
                self.paragraph_style = local_attr(e, b"val");
            }
            b"r" if !self.in_paragraph_props => {
                self.run_bold = false;
                self.run_italic = false;
            }
            // Run toggles inside pPr belong to the paragraph mark, not to text
            b"b" if self.in_paragraph && !self.in_paragraph_props => {
                self.run_bold = on_off(e);
            }
            b"i" if self.in_paragraph && !self.in_paragraph_props => {
                self.run_italic = on_off(e);
            }
            b"t" if self.in_paragraph => self.in_text = true,
            b"br" if self.in_paragraph && !self.in_paragraph_props => {
                self.paragraph_html.push_str("<br />");
                self.paragraph_text.push('\n');
            }
            b"tab" if self.in_paragraph && !self.in_paragraph_props => {
                self.paragraph_html.push(' ');
                self.paragraph_text.push(' ');
            }
            b"blip" => {
                if let Some(rid) = local_attr(e, b"embed") {
                    self.push_image(&rid);
                }
            }
            b"imagedata" => {
                if let Some(rid) = local_attr(e, b"id") {
                    self.push_image(&rid);
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, local_name: &[u8]) {
        match local_name {
            b"p" => self.flush_paragraph(),
            b"pPr" => self.in_paragraph_props = false,
            b"r" => {
                self.run_bold = false;
                self.run_italic = false;
            }
            b"t" => self.in_text = false,
            _ => {}
        }
    }

    fn text(&mut self, t: &BytesText) -> Result<(), ImportError> {
        if !self.in_text || !self.in_paragraph {
            return Ok(());
        }

        let raw = t
            .unescape()
            .map_err(|e| ImportError::ParseFailure(format!("bad text content: {}", e)))?;

        let mut piece = html_escape::encode_text(raw.as_ref()).into_owned();
        if self.run_italic {
            piece = format!("<em>{}</em>", piece);
        }
        if self.run_bold {
            piece = format!("<strong>{}</strong>", piece);
        }

        self.paragraph_html.push_str(&piece);
        self.paragraph_text.push_str(raw.as_ref());

        Ok(())
    }

    fn push_image(&mut self, rid: &str) {
        if !self.in_paragraph {
            return;
        }
        match self.media.get(rid) {
            Some(Some(data_uri)) => {
                self.paragraph_html
                    .push_str(&format!("<img src=\"{}\" />", data_uri));
                self.paragraph_has_image = true;
            }
            Some(None) => {} // already warned during media loading
            None => {
                self.warnings
                    .push(format!("image relationship {} could not be resolved", rid));
            }
        }
    }

    fn flush_paragraph(&mut self) {
        if !self.in_paragraph {
            return;
        }
        self.in_paragraph = false;

        let text = self.paragraph_text.trim().to_string();

        if let Some(style) = self.paragraph_style.take() {
            if let Some(level) = heading_level_from_style(&style) {
                // Empty headings still surface as blocks so the splitter
                // can drop the whole dangling section they introduce
                self.blocks.push(DocBlock::Heading { level, text });
                return;
            }
        }

        if !text.is_empty() || self.paragraph_has_image {
            self.blocks.push(DocBlock::Paragraph {
                html: self.paragraph_html.trim().to_string(),
            });
        }
    }

    fn finish(self) -> ParsedDocument {
        ParsedDocument {
            blocks: self.blocks,
            warnings: self.warnings,
        }
    }
}
