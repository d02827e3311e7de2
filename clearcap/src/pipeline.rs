//! Top-level orchestration: local OCR, confidence gate, then the paid
//! provider cascade.

use std::sync::Arc;

use nanoid::nanoid;
use tracing::{info, info_span, Instrument};

use crate::cascade::{Cascade, CascadeOutcome};
use crate::config::Config;
use crate::error::{ClearcapError, Result};
use crate::gate::{ConfidenceGate, GateDecision};
use crate::models::{
    Diagnostics, ImageArtifact, LocalResult, Method, ProviderCredentials, ResolutionResult,
};
use crate::ocr::{
    CorrectionMode, LocalOptions, LocalResolver, RecognitionParams, Recognizer, SegmentationMode,
};
use crate::providers::{
    build_providers, order_providers, CaptchaProvider, CaptchaTask, TaskCategory,
};

/// Confidence reported when a paid provider returns the answer.
pub const EXTERNAL_CONFIDENCE: f32 = 100.0;

pub const ALL_PROVIDERS_FAILED: &str = "all providers failed";

/// Per-request overrides of the configured local OCR behaviour.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub multi_pass: Option<bool>,
    pub aggressive: Option<bool>,
    pub segmentation: Option<SegmentationMode>,
    pub char_whitelist: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub image: ImageArtifact,
    /// Falls back to the configured threshold.
    pub confidence_threshold: Option<f32>,
    pub expected_length: Option<usize>,
    pub credentials: ProviderCredentials,
    pub options: ResolveOptions,
}

impl ResolveRequest {
    pub fn new(image: ImageArtifact) -> Self {
        Self {
            image,
            confidence_threshold: None,
            expected_length: None,
            credentials: ProviderCredentials::default(),
            options: ResolveOptions::default(),
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    pub fn with_expected_length(mut self, length: usize) -> Self {
        self.expected_length = Some(length);
        self
    }

    pub fn with_credentials(mut self, credentials: ProviderCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }
}

/// A token captcha (reCAPTCHA, hCaptcha) to hand straight to providers.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub task: CaptchaTask,
    pub credentials: ProviderCredentials,
}

/// Cheap to clone; holds only read-only configuration and shared handles.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    local: LocalResolver,
    cascade: Cascade,
}

impl Pipeline {
    /// `providers` are used in the order given.
    pub fn new(
        config: Config,
        recognizer: Arc<dyn Recognizer>,
        providers: Vec<Arc<dyn CaptchaProvider>>,
    ) -> Self {
        let cascade = Cascade::new(providers, &config.cascade);
        Self {
            config: Arc::new(config),
            local: LocalResolver::new(recognizer),
            cascade,
        }
    }

    /// Build every known provider and arrange them by the configured priority.
    pub fn from_config(config: Config, recognizer: Arc<dyn Recognizer>) -> Result<Self> {
        let providers = order_providers(
            build_providers(&config.providers)?,
            &config.cascade.provider_order,
        );
        info!(
            providers = ?providers.iter().map(|p| p.id()).collect::<Vec<_>>(),
            "Provider cascade configured"
        );
        Ok(Self::new(config, recognizer, providers))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn resolve(&self, request: ResolveRequest) -> Result<ResolutionResult> {
        let threshold = request
            .confidence_threshold
            .unwrap_or(self.config.gate.confidence_threshold);
        validate_image_request(&request, threshold)?;

        let span = info_span!(
            "resolve",
            invocation_id = %nanoid!(),
            image_bytes = request.image.len(),
            format = %request.image.format(),
        );
        self.resolve_validated(request, threshold).instrument(span).await
    }

    async fn resolve_validated(
        &self,
        request: ResolveRequest,
        threshold: f32,
    ) -> Result<ResolutionResult> {
        let options = self.local_options(&request.options);
        let local = self.local.resolve(&request.image, &options).await;

        let gate = ConfidenceGate::new(threshold, request.expected_length);
        let reason = match gate.evaluate(&local) {
            GateDecision::Sufficient => {
                info!(confidence = local.confidence, "Local OCR accepted");
                return Ok(local_result(local, Method::LocalOcr, None, Vec::new()));
            }
            GateDecision::Insufficient(reason) => reason,
        };
        info!(reason = %reason, "Local OCR below the gate");

        if !self.cascade.can_attempt(&request.credentials) {
            let warning = format!(
                "local confidence {} below threshold {}, supply provider credentials for higher accuracy",
                local.confidence, threshold
            );
            return Ok(local_result(local, Method::LocalOcrOnly, Some(warning), Vec::new()));
        }

        let task = CaptchaTask::image(request.image.bytes(), request.expected_length);
        let CascadeOutcome { solved, log } = self.cascade.run(&task, &request.credentials).await;

        Ok(match solved {
            Some(solved) => ResolutionResult {
                success: true,
                text: solved.solution.answer,
                confidence: EXTERNAL_CONFIDENCE,
                method: Method::External(solved.provider),
                warning: None,
                diagnostics: Diagnostics {
                    local: Some(local),
                    cascade: log,
                },
            },
            None => {
                info!("Falling back to the local reading");
                local_result(
                    local,
                    Method::FallbackLocal,
                    Some(ALL_PROVIDERS_FAILED.to_string()),
                    log,
                )
            }
        })
    }

    /// Token captchas have no local stage: providers or nothing.
    pub async fn solve_token(&self, request: TokenRequest) -> Result<ResolutionResult> {
        validate_token_task(&request.task)?;

        let span = info_span!(
            "solve_token",
            invocation_id = %nanoid!(),
            category = %request.task.category(),
        );

        async move {
            if !self.cascade.can_attempt(&request.credentials) {
                return Ok(unsolved(
                    "no provider credentials supplied".to_string(),
                    Vec::new(),
                ));
            }

            let CascadeOutcome { solved, log } =
                self.cascade.run(&request.task, &request.credentials).await;
            Ok(match solved {
                Some(solved) => ResolutionResult {
                    success: true,
                    text: solved.solution.answer,
                    confidence: EXTERNAL_CONFIDENCE,
                    method: Method::External(solved.provider),
                    warning: None,
                    diagnostics: Diagnostics {
                        local: None,
                        cascade: log,
                    },
                },
                None => unsolved(ALL_PROVIDERS_FAILED.to_string(), log),
            })
        }
        .instrument(span)
        .await
    }

    fn local_options(&self, overrides: &ResolveOptions) -> LocalOptions {
        let base = LocalOptions::from_config(&self.config.ocr);
        LocalOptions {
            multi_pass: overrides.multi_pass.unwrap_or(base.multi_pass),
            correction: match overrides.aggressive {
                Some(true) => CorrectionMode::Aggressive,
                Some(false) => CorrectionMode::Conservative,
                None => base.correction,
            },
            params: RecognitionParams {
                segmentation: overrides.segmentation.unwrap_or(base.params.segmentation),
                char_whitelist: overrides
                    .char_whitelist
                    .clone()
                    .or(base.params.char_whitelist),
            },
            max_concurrent_passes: base.max_concurrent_passes,
        }
    }
}

fn validate_image_request(request: &ResolveRequest, threshold: f32) -> Result<()> {
    if request.image.is_empty() {
        return Err(ClearcapError::Validation("image bytes are empty".to_string()));
    }
    if !(0.0..=100.0).contains(&threshold) {
        return Err(ClearcapError::Validation(format!(
            "confidence threshold must be within 0..=100, got {threshold}"
        )));
    }
    if request.expected_length == Some(0) {
        return Err(ClearcapError::Validation(
            "expected length must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_token_task(task: &CaptchaTask) -> Result<()> {
    let (site_key, page_url) = match task {
        CaptchaTask::ImageToText { .. } => {
            return Err(ClearcapError::Validation(format!(
                "{} tasks go through resolve, not solve_token",
                TaskCategory::ImageToText
            )))
        }
        CaptchaTask::RecaptchaV2 {
            site_key, page_url, ..
        }
        | CaptchaTask::RecaptchaV3 {
            site_key, page_url, ..
        }
        | CaptchaTask::HCaptcha { site_key, page_url } => (site_key, page_url),
    };

    if site_key.trim().is_empty() {
        return Err(ClearcapError::Validation("site key is empty".to_string()));
    }
    url::Url::parse(page_url)
        .map_err(|e| ClearcapError::Validation(format!("invalid page URL {page_url}: {e}")))?;

    if let CaptchaTask::RecaptchaV3 { min_score, .. } = task {
        if !(0.0..=1.0).contains(min_score) {
            return Err(ClearcapError::Validation(format!(
                "min score must be within 0..=1, got {min_score}"
            )));
        }
    }
    Ok(())
}

fn local_result(
    local: LocalResult,
    method: Method,
    warning: Option<String>,
    cascade: Vec<crate::models::CascadeAttempt>,
) -> ResolutionResult {
    ResolutionResult {
        success: local.success,
        text: local.text.clone(),
        confidence: local.confidence,
        method,
        warning,
        diagnostics: Diagnostics {
            local: Some(local),
            cascade,
        },
    }
}

fn unsolved(warning: String, cascade: Vec<crate::models::CascadeAttempt>) -> ResolutionResult {
    ResolutionResult {
        success: false,
        text: String::new(),
        confidence: 0.0,
        method: Method::Unsolved,
        warning: Some(warning),
        diagnostics: Diagnostics {
            local: None,
            cascade,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Pipeline {
        Pipeline::new(
            Config::default(),
            Arc::new(crate::ocr::TesseractRecognizer::unavailable("test")),
            Vec::new(),
        )
    }

    fn tiny_image() -> ImageArtifact {
        ImageArtifact::from_bytes(vec![1, 2, 3])
    }

    #[tokio::test]
    async fn test_empty_image_is_rejected() {
        let err = pipeline()
            .resolve(ResolveRequest::new(ImageArtifact::from_bytes(Vec::new())))
            .await
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_threshold_out_of_range_is_rejected() {
        let request = ResolveRequest::new(tiny_image()).with_threshold(101.0);
        assert!(matches!(
            pipeline().resolve(request).await,
            Err(ClearcapError::Validation(_))
        ));

        let request = ResolveRequest::new(tiny_image()).with_threshold(f32::NAN);
        assert!(pipeline().resolve(request).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_expected_length_is_rejected() {
        let request = ResolveRequest::new(tiny_image()).with_expected_length(0);
        assert!(matches!(
            pipeline().resolve(request).await,
            Err(ClearcapError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_ocr_without_credentials_is_local_only() {
        let result = pipeline()
            .resolve(ResolveRequest::new(tiny_image()))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.method, Method::LocalOcrOnly);
        let local = result.diagnostics.local.unwrap();
        assert!(local
            .attempts
            .iter()
            .all(|a| a.error.as_deref().is_some_and(|e| e.contains("OCR unavailable"))));
    }

    #[test]
    fn test_image_task_rejected_by_solve_token() {
        let err = validate_token_task(&CaptchaTask::image(b"png", None)).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_token_task_validation() {
        let ok = CaptchaTask::RecaptchaV3 {
            site_key: "6Lc".into(),
            page_url: "https://n1.yclients.com".into(),
            action: None,
            min_score: 0.3,
        };
        assert!(validate_token_task(&ok).is_ok());

        let bad_url = CaptchaTask::HCaptcha {
            site_key: "k".into(),
            page_url: "not a url".into(),
        };
        assert!(validate_token_task(&bad_url).is_err());

        let bad_score = CaptchaTask::RecaptchaV3 {
            site_key: "6Lc".into(),
            page_url: "https://example.com".into(),
            action: None,
            min_score: 1.5,
        };
        assert!(validate_token_task(&bad_score).is_err());
    }

    #[test]
    fn test_local_options_overrides() {
        let options = pipeline().local_options(&ResolveOptions {
            multi_pass: Some(false),
            aggressive: Some(true),
            segmentation: Some(SegmentationMode::SingleWord),
            char_whitelist: Some("0123456789".to_string()),
        });
        assert!(!options.multi_pass);
        assert_eq!(options.correction, CorrectionMode::Aggressive);
        assert_eq!(options.params.segmentation, SegmentationMode::SingleWord);
        assert_eq!(options.params.char_whitelist.as_deref(), Some("0123456789"));
    }
}
