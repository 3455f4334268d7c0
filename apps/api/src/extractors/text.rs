use crate::extractors::{ExtractError, FileFormat, TextExtractor};

/// UTF-8 plain text. Other encodings are rejected rather than guessed.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn format(&self) -> FileFormat {
        FileFormat::Txt
    }

    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

        let text = std::str::from_utf8(bytes).map_err(|e| {
            ExtractError::failed(
                FileFormat::Txt,
                format!("not valid UTF-8 at byte {}", e.valid_up_to()),
            )
        })?;

        if text.contains('\0') {
            return Err(ExtractError::failed(FileFormat::Txt, "contains NUL bytes"));
        }

        Ok(text.to_string())
    }
}
