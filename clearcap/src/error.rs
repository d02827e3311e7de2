use thiserror::Error;

use crate::providers::ProviderError;

#[derive(Error, Debug)]
pub enum ClearcapError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Preprocessing error: {0}")]
    Preprocess(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("OCR unavailable: {0}")]
    OcrUnavailable(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ClearcapError {
    /// Caller contract violations are the only errors that escape the pipeline.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, ClearcapError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, ClearcapError>;
