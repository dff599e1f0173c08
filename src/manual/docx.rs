//! `.docx` ingestion
//!
//! A `.docx` file is a zip archive. Paragraph text comes from
//! `word/document.xml`; each `<w:drawing>` references an image part through a
//! relationship id resolved in `word/_rels/document.xml.rels`.

use super::{ImageContent, ManualContent};
use base64::Engine as _;
use quick_xml::escape;
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use thiserror::Error;

const DOCUMENT_PART: &str = "word/document.xml";
const RELATIONSHIPS_PART: &str = "word/_rels/document.xml.rels";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("unsupported file format \"{file_name}\", please upload a .docx file")]
    UnsupportedFormat { file_name: String },
    #[error("could not process the document: {0}")]
    Parse(String),
    #[error("could not read the file: {0}")]
    Read(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for DocumentError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => DocumentError::Read(io),
            other => DocumentError::Parse(other.to_string()),
        }
    }
}

/// Turns an uploaded document into manual content
pub trait DocumentParser: Send + Sync {
    fn parse_document(&self, file_name: &str, bytes: &[u8]) -> Result<ManualContent, DocumentError>;
}

/// Read and parse a document from disk
pub fn read_document(
    parser: &dyn DocumentParser,
    path: &Path,
) -> Result<ManualContent, DocumentError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = std::fs::read(path)?;
    parser.parse_document(&file_name, &bytes)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DocxParser;

impl DocumentParser for DocxParser {
    fn parse_document(&self, file_name: &str, bytes: &[u8]) -> Result<ManualContent, DocumentError> {
        if !has_docx_extension(file_name) {
            return Err(DocumentError::UnsupportedFormat {
                file_name: file_name.to_string(),
            });
        }

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        let document = read_part(&mut archive, DOCUMENT_PART)?
            .ok_or_else(|| DocumentError::Parse(format!("missing {DOCUMENT_PART}")))?;
        let relationships = match read_part(&mut archive, RELATIONSHIPS_PART)? {
            Some(rels) => parse_relationships(&rels)?,
            None => HashMap::new(),
        };

        let body = extract_body(&document)?;

        let mut images = Vec::new();
        for drawing in body.drawings {
            let embed = drawing.embed.unwrap_or_default();
            let Some(target) = relationships.get(&embed) else {
                tracing::warn!(rel_id = %embed, "drawing references unknown relationship");
                continue;
            };
            let part_name = part_path(target);
            let Some(data) = read_binary_part(&mut archive, &part_name)? else {
                tracing::warn!(part = %part_name, "drawing references missing image part");
                continue;
            };

            let mime = mime_guess::from_path(&part_name).first_or_octet_stream();
            if mime.type_() != "image" {
                continue;
            }

            let description = drawing
                .description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| format!("Image {} from the document", images.len() + 1));
            images.push(ImageContent {
                src: format!(
                    "data:{mime};base64,{}",
                    base64::engine::general_purpose::STANDARD.encode(&data)
                ),
                description,
            });
        }

        tracing::info!(
            file_name = %file_name,
            text_len = body.text.len(),
            images = images.len(),
            "Parsed document"
        );

        Ok(ManualContent {
            text: body.text,
            images,
            file_name: file_name.to_string(),
        })
    }
}

fn has_docx_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("docx"))
}

fn read_part<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, DocumentError> {
    let Some(bytes) = read_binary_part(archive, name)? else {
        return Ok(None);
    };
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| DocumentError::Parse(format!("{name} is not valid UTF-8: {e}")))
}

fn read_binary_part<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, DocumentError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| DocumentError::Parse(format!("{name}: {e}")))?;
    Ok(Some(buf))
}

/// Relationship targets are relative to `word/` unless absolute
fn part_path(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("word/{target}"),
    }
}

fn parse_error(e: &dyn std::fmt::Display) -> DocumentError {
    DocumentError::Parse(e.to_string())
}

/// Raw XML text or attribute bytes with entity references resolved
fn decode(raw: &[u8]) -> Result<String, DocumentError> {
    let raw = std::str::from_utf8(raw).map_err(|e| parse_error(&e))?;
    escape::unescape(raw)
        .map(Cow::into_owned)
        .map_err(|e| parse_error(&e))
}

/// A general reference (`&amp;`, `&#65;`) reported between text events
fn decode_reference(name: &[u8]) -> Result<String, DocumentError> {
    let name = std::str::from_utf8(name).map_err(|e| parse_error(&e))?;
    let reference = format!("&{name};");
    // Entities declared in a DTD are kept verbatim
    Ok(escape::unescape(&reference).map_or(reference.clone(), Cow::into_owned))
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, DocumentError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| parse_error(&e))?;
        if attr.key.as_ref() == name {
            return decode(&attr.value).map(Some);
        }
    }
    Ok(None)
}

/// Internal relationship id to target path
fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, DocumentError> {
    let mut reader = Reader::from_str(xml);
    let mut relationships = HashMap::new();

    loop {
        match reader.read_event().map_err(|e| parse_error(&e))? {
            XmlEvent::Start(e) | XmlEvent::Empty(e)
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if attribute(&e, b"TargetMode")?.as_deref() == Some("External") {
                    continue;
                }
                if let (Some(id), Some(target)) =
                    (attribute(&e, b"Id")?, attribute(&e, b"Target")?)
                {
                    relationships.insert(id, target);
                }
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    Ok(relationships)
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Drawing {
    embed: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Default)]
struct Body {
    text: String,
    drawings: Vec<Drawing>,
}

/// Paragraph text and drawings of `word/document.xml`, in document order
fn extract_body(xml: &str) -> Result<Body, DocumentError> {
    let mut reader = Reader::from_str(xml);
    let mut body = Body::default();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut drawing: Option<Drawing> = None;

    loop {
        match reader.read_event().map_err(|e| parse_error(&e))? {
            XmlEvent::Start(e) => match e.name().as_ref() {
                b"w:t" => in_text = true,
                b"w:drawing" => drawing = Some(Drawing::default()),
                _ => read_drawing_attributes(&e, drawing.as_mut())?,
            },
            XmlEvent::Empty(e) => match e.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" | b"w:cr" => current.push('\n'),
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => read_drawing_attributes(&e, drawing.as_mut())?,
            },
            XmlEvent::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                b"w:drawing" => {
                    if let Some(finished) = drawing.take().filter(|d| d.embed.is_some()) {
                        body.drawings.push(finished);
                    }
                }
                _ => {}
            },
            XmlEvent::Text(text) if in_text => current.push_str(&decode(&text)?),
            XmlEvent::GeneralRef(reference) if in_text => {
                current.push_str(&decode_reference(&reference)?);
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    body.text = paragraphs.join("\n").trim().to_string();
    Ok(body)
}

fn read_drawing_attributes(
    element: &BytesStart<'_>,
    drawing: Option<&mut Drawing>,
) -> Result<(), DocumentError> {
    let Some(drawing) = drawing else {
        return Ok(());
    };
    match element.name().as_ref() {
        b"wp:docPr" => drawing.description = attribute(element, b"descr")?,
        b"a:blip" => drawing.embed = attribute(element, b"r:embed")?,
        _ => {}
    }
    Ok(())
}
