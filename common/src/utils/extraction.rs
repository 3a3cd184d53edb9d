use bytes::Bytes;
use tracing::debug;

/// An uploaded document before any processing: original file name plus raw
/// bytes, exactly what the transport layer hands over.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub file_name: String,
    pub bytes: Bytes,
}

impl RawDocument {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// One page of extracted text. Plain-text documents are a single page 0;
/// PDF pages keep their zero-based position so chunk identifiers can carry
/// the page number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub page: u32,
    pub text: String,
}

/// File extensions treated as plain text, mirroring the formats the service
/// accepts alongside PDFs.
const TEXT_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".py", ".js", ".ts", ".java", ".c", ".cpp", ".go", ".rs", ".log", ".cfg",
    ".json", ".yaml", ".yml",
];

/// Extracts text from an uploaded document.
///
/// Unsupported or corrupt content yields pages with empty text rather than
/// an error; a single unreadable file must never fail a whole ingestion
/// call.
pub async fn extract_document_text(document: &RawDocument) -> Vec<ExtractedPage> {
    let lowered = document.file_name.to_ascii_lowercase();

    if lowered.ends_with(".pdf") {
        return extract_pdf_pages(document.bytes.clone()).await;
    }

    if TEXT_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext)) {
        return vec![ExtractedPage {
            page: 0,
            text: String::from_utf8_lossy(&document.bytes).into_owned(),
        }];
    }

    // Unknown extension: accept it when it decodes as UTF-8, otherwise
    // treat it as unsupported binary content.
    match std::str::from_utf8(&document.bytes) {
        Ok(text) => vec![ExtractedPage {
            page: 0,
            text: text.to_owned(),
        }],
        Err(_) => {
            debug!(
                file_name = %document.file_name,
                "unsupported binary content, extracting nothing"
            );
            vec![ExtractedPage {
                page: 0,
                text: String::new(),
            }]
        }
    }
}

/// Joins all pages into one context unit, used for the supplementary
/// document on the query path.
pub fn flatten_pages(pages: &[ExtractedPage]) -> String {
    pages
        .iter()
        .map(|p| p.text.as_str())
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Per-page PDF extraction through lopdf, with a whole-document
/// pdf-extract fallback when the page structure is unreadable.
async fn extract_pdf_pages(bytes: Bytes) -> Vec<ExtractedPage> {
    let result = tokio::task::spawn_blocking(move || {
        match lopdf::Document::load_mem(&bytes) {
            Ok(doc) => {
                let pages: Vec<ExtractedPage> = doc
                    .get_pages()
                    .keys()
                    .map(|page_number| ExtractedPage {
                        // lopdf pages are 1-based; chunk ids use 0-based.
                        page: page_number.saturating_sub(1),
                        text: doc.extract_text(&[*page_number]).unwrap_or_default(),
                    })
                    .collect();
                if pages.is_empty() {
                    vec![ExtractedPage {
                        page: 0,
                        text: String::new(),
                    }]
                } else {
                    pages
                }
            }
            Err(err) => {
                debug!(error = %err, "lopdf failed, falling back to pdf-extract");
                let text = pdf_extract::extract_text_from_mem(&bytes).unwrap_or_default();
                vec![ExtractedPage { page: 0, text }]
            }
        }
    })
    .await;

    result.unwrap_or_else(|err| {
        debug!(error = %err, "pdf extraction task panicked, extracting nothing");
        vec![ExtractedPage {
            page: 0,
            text: String::new(),
        }]
    })
}
