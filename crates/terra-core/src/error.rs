use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidInput,
}

#[derive(Debug, Clone)]
pub struct TerraError {
    pub code: ErrorCode,
    pub message: String,
}

impl TerraError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }
}

impl fmt::Display for TerraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for TerraError {}

/// Why a single (tile, layer) fetch did not produce bytes. None of these is
/// fatal to the pipeline; each ends in a terminal per-layer status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("no data for this tile")]
    NotFound,
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type FetchOutcome = Result<Vec<u8>, FetchError>;
