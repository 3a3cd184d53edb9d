#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunking;
pub mod pipeline;

pub use chunking::{split_document, DocumentChunk};
pub use pipeline::{DocumentOutcome, IngestReport, IngestTarget, IngestionPipeline};
