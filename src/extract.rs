//! Text extraction for submitted files (plain text, Markdown, PDF, DOCX, PPTX).
//!
//! [`ContentExtractor`] implements the core [`TextExtractor`] trait. Parsing
//! is CPU-bound, so it runs on the blocking pool. Paragraph boundaries in
//! Office formats are emitted as blank lines so the chunker can respect them.

use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use docsim_core::store::TextExtractor;
use quick_xml::events::Event;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_UNKNOWN: &str = "application/octet-stream";

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("text is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// Guess a content type from the file extension.
pub fn content_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("txt") | Some("text") => MIME_TEXT,
        Some("md") | Some("markdown") => MIME_MARKDOWN,
        Some("pdf") => MIME_PDF,
        Some("docx") => MIME_DOCX,
        Some("pptx") => MIME_PPTX,
        _ => MIME_UNKNOWN,
    }
}

pub fn is_supported(content_type: &str) -> bool {
    content_type != MIME_UNKNOWN && extract_fn(content_type).is_some()
}

type ExtractFn = fn(&[u8]) -> Result<String, ExtractError>;

fn extract_fn(content_type: &str) -> Option<ExtractFn> {
    // Ignore parameters such as `; charset=utf-8`.
    let base = content_type.split(';').next().unwrap_or("").trim();
    match base {
        MIME_TEXT | MIME_MARKDOWN => Some(extract_utf8 as ExtractFn),
        MIME_PDF => Some(extract_pdf as ExtractFn),
        MIME_DOCX => Some(extract_docx as ExtractFn),
        MIME_PPTX => Some(extract_pptx as ExtractFn),
        _ => None,
    }
}

/// Extract plain text synchronously.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    let f = extract_fn(content_type)
        .ok_or_else(|| ExtractError::UnsupportedContentType(content_type.to_string()))?;
    f(bytes)
}

/// The app's [`TextExtractor`].
#[derive(Debug, Clone, Default)]
pub struct ContentExtractor;

impl ContentExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtractor for ContentExtractor {
    async fn extract(&self, bytes: &[u8], content_type: &str) -> anyhow::Result<String> {
        let bytes = bytes.to_vec();
        let content_type = content_type.to_string();
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, &content_type)).await??;
        Ok(text)
    }
}

fn extract_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    let text = String::from_utf8(bytes.to_vec())?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn open_zip(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    ooxml_text(&xml, "\n\n")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let mut slides: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    slides.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut parts = Vec::with_capacity(slides.len());
    for name in slides {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = ooxml_text(&xml, "\n")?;
        if !text.trim().is_empty() {
            parts.push(text.trim().to_string());
        }
    }
    Ok(parts.join("\n\n"))
}

/// Collect the text of `<*:t>` runs, ending each `<*:p>` with `paragraph_sep`.
fn ooxml_text(xml: &[u8], paragraph_sep: &str) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut out = String::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let line = paragraph.trim();
                    if !line.is_empty() {
                        if !out.is_empty() {
                            out.push_str(paragraph_sep);
                        }
                        out.push_str(line);
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push(' '),
                b"br" => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let tail = paragraph.trim();
    if !tail.is_empty() {
        if !out.is_empty() {
            out.push_str(paragraph_sep);
        }
        out.push_str(tail);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, String)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn docx(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
            .collect();
        zip_with(&[(
            "word/document.xml",
            format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            ),
        )])
    }

    #[test]
    fn test_content_type_for_path() {
        assert_eq!(content_type_for_path(Path::new("a/b.TXT")), MIME_TEXT);
        assert_eq!(content_type_for_path(Path::new("notes.md")), MIME_MARKDOWN);
        assert_eq!(content_type_for_path(Path::new("x.pdf")), MIME_PDF);
        assert_eq!(content_type_for_path(Path::new("x.docx")), MIME_DOCX);
        assert_eq!(content_type_for_path(Path::new("x.bin")), MIME_UNKNOWN);
        assert!(!is_supported(MIME_UNKNOWN));
        assert!(is_supported("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_plain_text_strips_bom() {
        let text = extract_text("\u{feff}hello".as_bytes(), MIME_TEXT).unwrap();
        assert_eq!(text, "hello");
    }

    #[test]
    fn test_invalid_utf8() {
        let err = extract_text(&[0xff, 0xfe, 0x00], MIME_TEXT).unwrap_err();
        assert!(matches!(err, ExtractError::Encoding(_)));
    }

    #[test]
    fn test_unsupported_content_type() {
        let err = extract_text(b"foo", MIME_UNKNOWN).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn test_invalid_pdf() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_docx_paragraphs_become_blank_lines() {
        let bytes = docx(&["First paragraph.", "Second &amp; last."]);
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "First paragraph.\n\nSecond & last.");
    }

    #[test]
    fn test_docx_without_document_xml() {
        let bytes = zip_with(&[("other.xml", "<x/>".to_string())]);
        let err = extract_text(&bytes, MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let slide = |t: &str| {
            format!(
                "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>",
                t
            )
        };
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", slide("ten")),
            ("ppt/slides/slide2.xml", slide("two")),
            ("ppt/slides/slide1.xml", slide("one")),
        ]);
        let text = extract_text(&bytes, MIME_PPTX).unwrap();
        assert_eq!(text, "one\n\ntwo\n\nten");
    }

    #[tokio::test]
    async fn test_async_extractor() {
        let text = ContentExtractor::new()
            .extract(b"plain words", MIME_TEXT)
            .await
            .unwrap();
        assert_eq!(text, "plain words");

        let err = ContentExtractor::new()
            .extract(b"x", MIME_UNKNOWN)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }
}
