use common::{error::AppError, utils::extraction::ExtractedPage};
use text_splitter::{ChunkConfig, TextSplitter};

/// A bounded text span with its deterministic identifier, ready for
/// embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChunk {
    /// `{source}_page{page}_chunk{seq}`; the identifier doubles as the
    /// vector record id, so re-chunking the same document hits the same
    /// records.
    pub id: String,
    pub text: String,
    pub source: String,
    pub page: u32,
    /// Position of the chunk across the whole document, all pages counted
    /// together.
    pub seq: u32,
}

/// Splits an extracted document into fixed-size overlapping chunks.
///
/// Size and overlap are configuration constants, never derived from the
/// document. Blank spans are dropped without consuming a sequence number,
/// which keeps identifiers stable for unchanged input.
pub fn split_document(
    source: &str,
    pages: &[ExtractedPage],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<DocumentChunk>, AppError> {
    if chunk_size == 0 {
        return Err(AppError::Validation("chunk_size must be positive".into()));
    }
    if chunk_overlap >= chunk_size {
        return Err(AppError::Validation(format!(
            "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
        )));
    }

    let chunk_config = ChunkConfig::new(chunk_size)
        .with_overlap(chunk_overlap)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?;
    let splitter = TextSplitter::new(chunk_config);

    let mut chunks = Vec::new();
    let mut seq: u32 = 0;

    for page in pages {
        for piece in splitter.chunks(&page.text) {
            if piece.trim().is_empty() {
                continue;
            }
            chunks.push(DocumentChunk {
                id: format!("{source}_page{}_chunk{seq}", page.page),
                text: piece.to_owned(),
                source: source.to_owned(),
                page: page.page,
                seq,
            });
            seq += 1;
        }
    }

    Ok(chunks)
}
