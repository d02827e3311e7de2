use std::sync::Arc;

use futures::{stream, Stream, StreamExt};
use tracing::{debug, warn};

use crate::config::OcrConfig;
use crate::models::{ImageArtifact, LocalResult, RecognitionAttempt};

use super::correction::{correct_text, CorrectionMode};
use super::preprocessing::{apply_variant, variants, PreprocessConfig};
use super::recognizer::{RecognitionParams, Recognizer};

/// Knobs for one local multi-pass run.
#[derive(Debug, Clone)]
pub struct LocalOptions {
    pub multi_pass: bool,
    pub correction: CorrectionMode,
    pub params: RecognitionParams,
    /// Passes in flight at once. Results are still collected in catalogue order.
    pub max_concurrent_passes: usize,
}

impl Default for LocalOptions {
    fn default() -> Self {
        Self::from_config(&OcrConfig::default())
    }
}

impl LocalOptions {
    pub fn from_config(config: &OcrConfig) -> Self {
        Self {
            multi_pass: config.multi_pass,
            correction: if config.aggressive_correction {
                CorrectionMode::Aggressive
            } else {
                CorrectionMode::Conservative
            },
            params: RecognitionParams {
                segmentation: config.segmentation,
                char_whitelist: config.char_whitelist.clone(),
            },
            max_concurrent_passes: config.max_concurrent_passes.max(1),
        }
    }
}

/// Runs every preprocessing variant through the recognizer and keeps the
/// most confident reading.
#[derive(Clone)]
pub struct LocalResolver {
    recognizer: Arc<dyn Recognizer>,
}

impl LocalResolver {
    pub fn new(recognizer: Arc<dyn Recognizer>) -> Self {
        Self { recognizer }
    }

    pub async fn resolve(&self, image: &ImageArtifact, options: &LocalOptions) -> LocalResult {
        let passes: std::pin::Pin<Box<dyn Stream<Item = RecognitionAttempt> + Send + '_>> =
            Box::pin(
                stream::iter(variants(options.multi_pass))
                    .map(|variant| self.attempt(image, variant, options))
                    .buffered(options.max_concurrent_passes.max(1)),
            );
        let attempts: Vec<RecognitionAttempt> = passes.collect().await;

        let result = select_best(attempts);
        debug!(
            success = result.success,
            confidence = result.confidence,
            winner = ?result.winning_config,
            "Local multi-pass finished"
        );
        result
    }

    async fn attempt(
        &self,
        image: &ImageArtifact,
        variant: &PreprocessConfig,
        options: &LocalOptions,
    ) -> RecognitionAttempt {
        let prepared = prepare(image, *variant).await;

        match self.recognizer.recognize(&prepared, &options.params).await {
            Ok(recognition) => {
                let corrected_text = correct_text(&recognition.text, options.correction);
                let confidence = if recognition.confidence.is_nan() {
                    0.0
                } else {
                    recognition.confidence.clamp(0.0, 100.0)
                };
                debug!(
                    variant = variant.name,
                    raw = %recognition.text,
                    corrected = %corrected_text,
                    confidence,
                    "Recognition pass complete"
                );
                let error = corrected_text
                    .is_empty()
                    .then(|| "No text recognized".to_string());

                RecognitionAttempt {
                    config_name: variant.name.to_string(),
                    raw_text: recognition.text,
                    corrected_text,
                    confidence,
                    error,
                }
            }
            Err(e) => {
                warn!(variant = variant.name, error = %e, "Recognition pass failed");
                RecognitionAttempt::failed(variant.name, e.to_string())
            }
        }
    }
}

/// Transform off the async executor; on failure fall back to the raw bytes
/// for this pass only.
async fn prepare(image: &ImageArtifact, variant: PreprocessConfig) -> Vec<u8> {
    let source = image.bytes().to_vec();
    let transformed = tokio::task::spawn_blocking(move || apply_variant(&source, &variant)).await;

    match transformed {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            warn!(variant = variant.name, error = %e, "Preprocessing failed, using original image");
            image.bytes().to_vec()
        }
        Err(e) => {
            warn!(
                variant = variant.name,
                error = %e,
                "Preprocessing task panicked, using original image"
            );
            image.bytes().to_vec()
        }
    }
}

/// Highest confidence among attempts with text; ties keep the earlier attempt.
pub fn select_best(attempts: Vec<RecognitionAttempt>) -> LocalResult {
    let mut best: Option<usize> = None;
    for (index, attempt) in attempts.iter().enumerate() {
        if !attempt.has_text() {
            continue;
        }
        match best {
            Some(current) if attempts[current].confidence >= attempt.confidence => {}
            _ => best = Some(index),
        }
    }

    match best {
        Some(index) => {
            let winner = &attempts[index];
            LocalResult {
                success: true,
                text: winner.corrected_text.clone(),
                confidence: winner.confidence,
                winning_config: Some(winner.config_name.clone()),
                attempts,
            }
        }
        None => LocalResult {
            success: false,
            text: String::new(),
            confidence: 0.0,
            winning_config: None,
            attempts,
        },
    }
}
