use std::panic;

use crate::extractors::sniff::looks_like_pdf;
use crate::extractors::{ExtractError, FileFormat, TextExtractor};

/// PDF text layer extraction via `pdf-extract`. Scanned (image-only) PDFs come back
/// empty and surface as `EmptyDocument`; there is no OCR fallback.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn format(&self) -> FileFormat {
        FileFormat::Pdf
    }

    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let _span = tracing::info_span!("extractor.pdf", size_bytes = bytes.len()).entered();

        if !looks_like_pdf(bytes) {
            return Err(ExtractError::failed(FileFormat::Pdf, "missing %PDF- header"));
        }

        // pdf-extract panics on some malformed font and xref tables.
        match panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(ExtractError::failed(FileFormat::Pdf, e.to_string())),
            Err(_) => {
                tracing::warn!("pdf-extract panicked while decoding upload");
                Err(ExtractError::failed(
                    FileFormat::Pdf,
                    "PDF decoder aborted on malformed content",
                ))
            }
        }
    }
}
