//! Shared fixtures for unit tests: generated documents, a local HTTP stub and a
//! scripted `LlmClient`.

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use lopdf::{dictionary, Document, Object, Stream};

use crate::llm_client::{CompletionOptions, LlmClient, LlmError, LlmProvider, RawLlmResponse};

/// Builds a text-layer PDF with one page per slice, one line per string.
pub fn sample_pdf(pages: &[&[&str]]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for lines in pages {
        let mut content = String::from("BT\n/F1 12 Tf\n72 720 Td\n14 TL\n");
        for line in lines.iter() {
            let escaped = line
                .replace('\\', "\\\\")
                .replace('(', "\\(")
                .replace(')', "\\)");
            content.push_str(&format!("({escaped}) Tj\nT*\n"));
        }
        content.push_str("ET\n");

        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("serialize sample pdf");
    out
}

/// Builds a minimal DOCX container with one `w:p` per paragraph.
pub fn sample_docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| {
            let escaped = p
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;");
            format!("<w:p><w:r><w:t xml:space=\"preserve\">{escaped}</w:t></w:r></w:p>")
        })
        .collect();
    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{body}</w:body></w:document>"
    );
    let content_types = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
        <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
        <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
        <Override PartName=\"/word/document.xml\" \
        ContentType=\"application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml\"/>\
        </Types>";

    let mut buf = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("[Content_Types].xml", options)
            .expect("start content types");
        zip.write_all(content_types.as_bytes())
            .expect("write content types");
        zip.start_file("word/document.xml", options)
            .expect("start document");
        zip.write_all(document.as_bytes()).expect("write document");
        zip.finish().expect("finish docx");
    }
    buf.into_inner()
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_stub_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub server");
    let addr = listener.local_addr().expect("stub server address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}

pub fn test_options() -> CompletionOptions {
    CompletionOptions {
        model: "test-model".to_string(),
        max_output_tokens: 1024,
        temperature: 0.0,
        timeout_ms: 5_000,
    }
}

#[derive(Debug, Clone)]
pub enum StubReply {
    Text(String),
    Timeout,
    Api(u16),
    Invalid,
}

/// Scripted provider. Replies are consumed in order; the last one repeats.
pub struct StubLlm {
    replies: Vec<StubReply>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl StubLlm {
    pub fn new(replies: Vec<StubReply>) -> Self {
        assert!(!replies.is_empty(), "StubLlm needs at least one reply");
        Self {
            replies,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: impl Into<String>) -> Self {
        Self::new(vec![StubReply::Text(text.into())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for StubLlm {
    fn provider(&self) -> LlmProvider {
        LlmProvider::Gemini
    }

    async fn complete(
        &self,
        prompt: &str,
        _system: &str,
        options: &CompletionOptions,
    ) -> Result<RawLlmResponse, LlmError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let reply = self.replies[index.min(self.replies.len() - 1)].clone();
        match reply {
            StubReply::Text(text) => Ok(RawLlmResponse {
                text,
                provider: LlmProvider::Gemini,
                model: options.model.clone(),
                latency: Duration::from_millis(1),
                input_tokens: None,
                output_tokens: None,
            }),
            StubReply::Timeout => Err(LlmError::Timeout {
                timeout_ms: options.timeout_ms,
            }),
            StubReply::Api(status) => Err(LlmError::Api {
                status,
                message: "stubbed failure".to_string(),
            }),
            StubReply::Invalid => Err(LlmError::InvalidResponse("stubbed garbage".to_string())),
        }
    }
}
