#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod models;
pub mod pipeline;
pub mod prompt;

pub use models::{ModelDispatch, ProviderDispatch};
pub use pipeline::{ContextSource, QueryOutcome, QueryPipeline, StageTimings};
