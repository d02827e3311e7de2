use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    ImageToText,
    RecaptchaV2,
    RecaptchaV3,
    HCaptcha,
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageToText => write!(f, "image_to_text"),
            Self::RecaptchaV2 => write!(f, "recaptcha_v2"),
            Self::RecaptchaV3 => write!(f, "recaptcha_v3"),
            Self::HCaptcha => write!(f, "hcaptcha"),
        }
    }
}

/// A captcha to hand to a solving service, carrying only the fields its
/// category needs on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptchaTask {
    ImageToText {
        /// Base64 without a `data:` prefix.
        body: String,
        case_sensitive: bool,
        /// Exact answer length, when known.
        length: Option<usize>,
    },
    RecaptchaV2 {
        site_key: String,
        page_url: String,
        invisible: bool,
    },
    RecaptchaV3 {
        site_key: String,
        page_url: String,
        action: Option<String>,
        min_score: f64,
    },
    HCaptcha {
        site_key: String,
        page_url: String,
    },
}

impl CaptchaTask {
    pub fn image(bytes: &[u8], length: Option<usize>) -> Self {
        Self::ImageToText {
            body: STANDARD.encode(bytes),
            case_sensitive: false,
            length,
        }
    }

    pub fn category(&self) -> TaskCategory {
        match self {
            Self::ImageToText { .. } => TaskCategory::ImageToText,
            Self::RecaptchaV2 { .. } => TaskCategory::RecaptchaV2,
            Self::RecaptchaV3 { .. } => TaskCategory::RecaptchaV3,
            Self::HCaptcha { .. } => TaskCategory::HCaptcha,
        }
    }
}
