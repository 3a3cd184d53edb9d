pub mod cache;
pub mod config;
pub mod embedding;
pub mod extraction;
pub mod vault;
