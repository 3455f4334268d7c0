use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::extractors::{ExtractError, FileFormat, TextExtractor};

const DOCUMENT_XML: &str = "word/document.xml";

/// Reads the main WordprocessingML part out of the DOCX zip container.
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn format(&self) -> FileFormat {
        FileFormat::Docx
    }

    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let _span = tracing::info_span!("extractor.docx", size_bytes = bytes.len()).entered();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ExtractError::failed(FileFormat::Docx, format!("not a zip archive: {e}")))?;

        let mut document_xml = archive.by_name(DOCUMENT_XML).map_err(|e| {
            ExtractError::failed(FileFormat::Docx, format!("missing {DOCUMENT_XML}: {e}"))
        })?;

        let mut xml = String::new();
        document_xml.read_to_string(&mut xml).map_err(|e| {
            ExtractError::failed(FileFormat::Docx, format!("failed to read {DOCUMENT_XML}: {e}"))
        })?;

        parse_document_xml(&xml)
    }
}

/// Collects `w:t` runs, one line per non-empty `w:p` paragraph.
fn parse_document_xml(xml: &str) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(xml);

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text_element = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = true,
                b"p" => current.clear(),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = false,
                b"p" => {
                    let paragraph = current.trim();
                    if !paragraph.is_empty() {
                        paragraphs.push(paragraph.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_text_element => {
                let decoded = e.unescape().map_err(|err| {
                    ExtractError::failed(FileFormat::Docx, format!("bad text run: {err}"))
                })?;
                current.push_str(&decoded);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractError::failed(
                    FileFormat::Docx,
                    format!("XML parsing error at position {}: {e}", reader.buffer_position()),
                ));
            }
            _ => {}
        }
    }

    Ok(paragraphs.join("\n"))
}
