//! Magic-byte detection, used only when the upload does not say what it is.

use crate::extractors::FileFormat;

/// PDF readers accept the header anywhere in the first KiB.
const PDF_HEADER_WINDOW: usize = 1024;
const ZIP_LOCAL_FILE_MAGIC: &[u8] = b"PK\x03\x04";

pub fn sniff(bytes: &[u8]) -> Option<FileFormat> {
    if looks_like_pdf(bytes) {
        Some(FileFormat::Pdf)
    } else if looks_like_docx(bytes) {
        Some(FileFormat::Docx)
    } else if looks_like_text(bytes) {
        Some(FileFormat::Txt)
    } else {
        None
    }
}

pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    contains(window, b"%PDF-")
}

fn looks_like_docx(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_LOCAL_FILE_MAGIC) && contains(bytes, b"word/document.xml")
}

fn looks_like_text(bytes: &[u8]) -> bool {
    !bytes.is_empty() && !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
