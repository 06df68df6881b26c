//! Structured payload extraction from model output

mod extract;
mod validator;

pub use extract::extract_structured_block;
pub use validator::{ResponseValidator, ValidatedPayload, DEFAULT_CONFIDENCE_THRESHOLD};

use crate::assessment::StageRole;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Empty response")]
    Empty,
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("Response contains none of the required {0} fields")]
    NoRequiredFields(StageRole),
}
