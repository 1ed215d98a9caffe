pub mod config;
pub mod context_memory;
pub mod ingestion;
pub mod metadata_extraction;
pub mod models;
pub mod ocr;
pub mod services;
pub mod utils;

pub use config::Config;
