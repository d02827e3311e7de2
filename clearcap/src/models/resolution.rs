use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One (image, preprocessing config) recognition pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecognitionAttempt {
    pub config_name: String,
    pub raw_text: String,
    pub corrected_text: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecognitionAttempt {
    pub fn failed(config_name: &str, error: String) -> Self {
        Self {
            config_name: config_name.to_string(),
            raw_text: String::new(),
            corrected_text: String::new(),
            confidence: 0.0,
            error: Some(error),
        }
    }

    pub fn has_text(&self) -> bool {
        !self.corrected_text.is_empty()
    }
}

/// Outcome of the local multi-pass stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalResult {
    pub success: bool,
    pub text: String,
    pub confidence: f32,
    pub winning_config: Option<String>,
    pub attempts: Vec<RecognitionAttempt>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Skipped,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One entry of the cascade attempt log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CascadeAttempt {
    pub provider: String,
    pub retry_index: u32,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl CascadeAttempt {
    pub fn success(provider: &str, retry_index: u32) -> Self {
        Self {
            provider: provider.to_string(),
            retry_index,
            outcome: AttemptOutcome::Success,
            error_detail: None,
        }
    }

    pub fn failure(provider: &str, retry_index: u32, detail: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            retry_index,
            outcome: AttemptOutcome::Failure,
            error_detail: Some(detail.into()),
        }
    }

    pub fn skipped(provider: &str, detail: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            retry_index: 0,
            outcome: AttemptOutcome::Skipped,
            error_detail: Some(detail.into()),
        }
    }
}

/// How the final answer was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    LocalOcr,
    LocalOcrOnly,
    External(String),
    FallbackLocal,
    /// Token requests have no local stage to fall back on.
    Unsolved,
}

impl Method {
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::External(provider) => Some(provider),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalOcr => write!(f, "local_ocr"),
            Self::LocalOcrOnly => write!(f, "local_ocr_only"),
            Self::External(provider) => write!(f, "external_{provider}"),
            Self::FallbackLocal => write!(f, "fallback_local"),
            Self::Unsolved => write!(f, "unsolved"),
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_ocr" => Ok(Self::LocalOcr),
            "local_ocr_only" => Ok(Self::LocalOcrOnly),
            "fallback_local" => Ok(Self::FallbackLocal),
            "unsolved" => Ok(Self::Unsolved),
            other => match other.strip_prefix("external_") {
                Some(provider) if !provider.is_empty() => Ok(Self::External(provider.to_string())),
                _ => Err(format!("Unknown resolution method: {s}")),
            },
        }
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalResult>,
    pub cascade: Vec<CascadeAttempt>,
}

/// The single result returned for every top-level invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolutionResult {
    pub success: bool,
    pub text: String,
    pub confidence: f32,
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub diagnostics: Diagnostics,
}

impl ResolutionResult {
    /// True when at least one paid provider was actually called.
    pub fn used_providers(&self) -> bool {
        self.diagnostics
            .cascade
            .iter()
            .any(|entry| entry.outcome != AttemptOutcome::Skipped)
    }
}
