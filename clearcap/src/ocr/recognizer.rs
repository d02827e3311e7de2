use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leptess::{LepTess, Variable};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::OcrConfig;
use crate::error::{ClearcapError, Result};

/// Tesseract page segmentation modes that make sense for captchas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMode {
    SingleBlock,
    #[default]
    SingleLine,
    SingleWord,
    SingleChar,
    RawLine,
}

impl SegmentationMode {
    pub fn psm(&self) -> u8 {
        match self {
            Self::SingleBlock => 6,
            Self::SingleLine => 7,
            Self::SingleWord => 8,
            Self::SingleChar => 10,
            Self::RawLine => 13,
        }
    }
}

impl fmt::Display for SegmentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleBlock => write!(f, "single_block"),
            Self::SingleLine => write!(f, "single_line"),
            Self::SingleWord => write!(f, "single_word"),
            Self::SingleChar => write!(f, "single_char"),
            Self::RawLine => write!(f, "raw_line"),
        }
    }
}

impl FromStr for SegmentationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single_block" | "6" => Ok(Self::SingleBlock),
            "single_line" | "7" => Ok(Self::SingleLine),
            "single_word" | "8" => Ok(Self::SingleWord),
            "single_char" | "10" => Ok(Self::SingleChar),
            "raw_line" | "13" => Ok(Self::RawLine),
            _ => Err(format!("Unknown segmentation mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognitionParams {
    pub segmentation: SegmentationMode,
    pub char_whitelist: Option<String>,
}

/// Text and self-reported confidence (0..=100) from one recognition call.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
}

/// The OCR engine boundary. Implementations must be safe to share between
/// concurrent invocations.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, image: &[u8], params: &RecognitionParams) -> Result<Recognition>;
}

enum TesseractBackend {
    Local { tesseract: Arc<Mutex<LepTess>> },
    Unavailable { reason: String },
}

/// Local recognizer backed by Tesseract via leptess.
pub struct TesseractRecognizer {
    backend: TesseractBackend,
    timeout: Duration,
}

fn create_tesseract(config: &OcrConfig) -> std::result::Result<LepTess, String> {
    LepTess::new(config.tessdata_path.as_deref(), &config.languages).map_err(|e| e.to_string())
}

impl TesseractRecognizer {
    /// Never fails: a missing Tesseract install degrades to an unavailable
    /// recognizer whose every call returns `OcrUnavailable`.
    pub fn new(config: &OcrConfig) -> Self {
        let backend = match create_tesseract(config) {
            Ok(lt) => {
                info!(languages = %config.languages, "Tesseract OCR initialized");
                TesseractBackend::Local {
                    tesseract: Arc::new(Mutex::new(lt)),
                }
            }
            Err(e) => {
                let reason = format!("Tesseract not available: {e}");
                warn!("{}", reason);
                TesseractBackend::Unavailable { reason }
            }
        };

        Self {
            backend,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            backend: TesseractBackend::Unavailable {
                reason: reason.to_string(),
            },
            timeout: Duration::from_secs(OcrConfig::default().timeout_secs),
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.backend, TesseractBackend::Unavailable { .. })
    }

    async fn recognize_internal(
        &self,
        image: &[u8],
        params: &RecognitionParams,
    ) -> Result<Recognition> {
        match &self.backend {
            TesseractBackend::Local { tesseract } => {
                let bytes = image.to_vec();
                let params = params.clone();
                let tesseract = Arc::clone(tesseract);

                tokio::task::spawn_blocking(move || -> Result<Recognition> {
                    let mut lt = tesseract.blocking_lock();
                    let psm = params.segmentation.psm().to_string();
                    lt.set_variable(Variable::TesseditPagesegMode, &psm)
                        .map_err(|e| {
                            ClearcapError::Ocr(format!("Failed to set segmentation mode: {e}"))
                        })?;
                    lt.set_variable(
                        Variable::TesseditCharWhitelist,
                        params.char_whitelist.as_deref().unwrap_or(""),
                    )
                    .map_err(|e| ClearcapError::Ocr(format!("Failed to set whitelist: {e}")))?;
                    lt.set_image_from_mem(&bytes)
                        .map_err(|e| ClearcapError::Ocr(format!("Failed to set image: {e}")))?;
                    let text = lt
                        .get_utf8_text()
                        .map_err(|e| ClearcapError::Ocr(format!("Failed to extract text: {e}")))?;
                    let confidence = lt.mean_text_conf().clamp(0, 100) as f32;

                    Ok(Recognition {
                        text: text.trim().to_string(),
                        confidence,
                    })
                })
                .await
                .map_err(|e| ClearcapError::Ocr(format!("OCR task panicked: {e}")))?
            }
            TesseractBackend::Unavailable { reason } => {
                Err(ClearcapError::OcrUnavailable(reason.clone()))
            }
        }
    }
}

#[async_trait]
impl Recognizer for TesseractRecognizer {
    async fn recognize(&self, image: &[u8], params: &RecognitionParams) -> Result<Recognition> {
        let result =
            tokio::time::timeout(self.timeout, self.recognize_internal(image, params)).await;

        match result {
            Ok(inner_result) => inner_result,
            Err(_) => Err(ClearcapError::Ocr(format!(
                "OCR operation timed out after {} seconds",
                self.timeout.as_secs()
            ))),
        }
    }
}
