use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::ocr::SegmentationMode;
use crate::providers::{ANTI_CAPTCHA, CAPMONSTER, CAPSOLVER, TWO_CAPTCHA};

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Gate threshold in 0..=100; non-finite input falls back to `default`.
fn parse_threshold(var: &str, default: f32) -> f32 {
    let threshold = parse_env_or(var, default);
    if !threshold.is_finite() {
        tracing::warn!("Invalid value '{}' for {}: not finite. Using default.", threshold, var);
        return default;
    }
    threshold.clamp(0.0, 100.0)
}

/// Parse `CASCADE_PROVIDER_ORDER`.
/// Format: comma-separated provider ids, highest priority first, e.g. `capsolver,2captcha`
fn parse_provider_order(raw: &str) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for id in raw.split(',').map(|s| s.trim().to_lowercase()) {
        if id.is_empty() {
            continue;
        }
        if order.contains(&id) {
            tracing::warn!("Duplicate provider '{}' in CASCADE_PROVIDER_ORDER, skipping", id);
            continue;
        }
        order.push(id);
    }
    order
}

pub const DEFAULT_PROVIDER_ORDER: &str = "capsolver,2captcha,anticaptcha,capmonster";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub ocr: OcrConfig,
    pub gate: GateConfig,
    pub cascade: CascadeConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    pub languages: String,
    pub tessdata_path: Option<String>,
    pub timeout_secs: u64,
    pub segmentation: SegmentationMode,
    pub char_whitelist: Option<String>,
    pub multi_pass: bool,
    pub aggressive_correction: bool,
    pub max_concurrent_passes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CascadeConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub provider_order: Vec<String>,
}

impl CascadeConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Endpoints and polling behaviour shared by every solving service.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub twocaptcha_base_url: Option<String>,
    pub anticaptcha_base_url: Option<String>,
    pub capsolver_base_url: Option<String>,
    pub capmonster_base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    pub initial_poll_delay_ms: u64,
}

impl ProvidersConfig {
    pub fn base_url_override(&self, provider: &str) -> Option<&str> {
        match provider {
            TWO_CAPTCHA => self.twocaptcha_base_url.as_deref(),
            ANTI_CAPTCHA => self.anticaptcha_base_url.as_deref(),
            CAPSOLVER => self.capsolver_base_url.as_deref(),
            CAPMONSTER => self.capmonster_base_url.as_deref(),
            _ => None,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: "eng".to_string(),
            tessdata_path: None,
            timeout_secs: 30,
            segmentation: SegmentationMode::SingleLine,
            char_whitelist: None,
            multi_pass: true,
            aggressive_correction: false,
            max_concurrent_passes: 1,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 85.0,
        }
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 2000,
            provider_order: parse_provider_order(DEFAULT_PROVIDER_ORDER),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            twocaptcha_base_url: None,
            anticaptcha_base_url: None,
            capsolver_base_url: None,
            capmonster_base_url: None,
            request_timeout_secs: 30,
            poll_interval_ms: 5000,
            max_polls: 24,
            initial_poll_delay_ms: 5000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            ocr: OcrConfig {
                languages: env::var("OCR_LANGUAGES").unwrap_or(defaults.ocr.languages),
                tessdata_path: env::var("OCR_TESSDATA_PATH").ok(),
                timeout_secs: parse_env_or("OCR_TIMEOUT", defaults.ocr.timeout_secs),
                segmentation: parse_env_or("OCR_SEGMENTATION", defaults.ocr.segmentation),
                char_whitelist: env::var("OCR_CHAR_WHITELIST")
                    .ok()
                    .filter(|s| !s.is_empty()),
                multi_pass: parse_env_or("OCR_MULTI_PASS", defaults.ocr.multi_pass),
                aggressive_correction: parse_env_or(
                    "OCR_AGGRESSIVE",
                    defaults.ocr.aggressive_correction,
                ),
                max_concurrent_passes: parse_env_or::<usize>(
                    "OCR_MAX_CONCURRENT",
                    defaults.ocr.max_concurrent_passes,
                )
                .max(1),
            },
            gate: GateConfig {
                confidence_threshold: parse_threshold(
                    "CONFIDENCE_THRESHOLD",
                    defaults.gate.confidence_threshold,
                ),
            },
            cascade: CascadeConfig {
                max_retries: parse_env_or("CASCADE_MAX_RETRIES", defaults.cascade.max_retries)
                    .max(1),
                retry_delay_ms: parse_env_or(
                    "CASCADE_RETRY_DELAY_MS",
                    defaults.cascade.retry_delay_ms,
                ),
                provider_order: env::var("CASCADE_PROVIDER_ORDER")
                    .map(|raw| parse_provider_order(&raw))
                    .unwrap_or(defaults.cascade.provider_order),
            },
            providers: ProvidersConfig {
                twocaptcha_base_url: parse_env_opt("TWOCAPTCHA_BASE_URL"),
                anticaptcha_base_url: parse_env_opt("ANTICAPTCHA_BASE_URL"),
                capsolver_base_url: parse_env_opt("CAPSOLVER_BASE_URL"),
                capmonster_base_url: parse_env_opt("CAPMONSTER_BASE_URL"),
                request_timeout_secs: parse_env_or(
                    "PROVIDER_TIMEOUT",
                    defaults.providers.request_timeout_secs,
                ),
                poll_interval_ms: parse_env_or(
                    "PROVIDER_POLL_INTERVAL_MS",
                    defaults.providers.poll_interval_ms,
                ),
                max_polls: parse_env_or("PROVIDER_MAX_POLLS", defaults.providers.max_polls)
                    .max(1),
                initial_poll_delay_ms: parse_env_or(
                    "PROVIDER_INITIAL_DELAY_MS",
                    defaults.providers.initial_poll_delay_ms,
                ),
            },
        }
    }
}
