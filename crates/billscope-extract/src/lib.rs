//! Bill parameter extraction: text normalization, rule engine, confidence
//! scoring, and the language-model fallback.

pub mod confidence;
mod error;
mod extractor;
pub mod llm;
pub mod normalize;
mod patterns;
pub mod rules;

pub use error::{ExternalServiceError, ExtractionError};
pub use extractor::{
    Extraction, ExtractionOutcome, ExtractionWarning, ExternalCallRecord, Extractor, Merged,
    extract, extract_parameters, merge_llm,
};
pub use llm::{AnthropicClient, LlmClient, LlmParameters};
