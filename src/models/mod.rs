// Re-export all model types for ease of use

pub mod document;
pub mod metadata;

pub use document::*;
pub use metadata::*;
