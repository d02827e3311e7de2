use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::ProvidersConfig;
use crate::error::Result;

use super::{
    classify_status, http_client, normalize_base_url, CaptchaProvider, CaptchaTask, PollPolicy,
    PollStatus, ProviderError, Solution, Submission, TaskHandle, TWO_CAPTCHA,
};

pub const DEFAULT_BASE_URL: &str = "https://2captcha.com";

const NOT_READY: &str = "CAPCHA_NOT_READY";

/// Capacity and throttling codes; the same key may succeed a moment later.
const TRANSIENT_CODES: &[&str] = &[
    "ERROR_NO_SLOT_AVAILABLE",
    "MAX_USER_TURN",
    "ERROR_TOO_MUCH_REQUESTS",
    "ERROR_IP_BANNED_TEMP",
];

const REJECTED_CODES: &[&str] = &[
    "ERROR_WRONG_USER_KEY",
    "ERROR_KEY_DOES_NOT_EXIST",
    "ERROR_ZERO_BALANCE",
    "ERROR_IP_NOT_ALLOWED",
    "ERROR_IP_BANNED",
    "ERROR_ZERO_CAPTCHA_FILESIZE",
    "ERROR_TOO_BIG_CAPTCHA_FILESIZE",
    "ERROR_WRONG_FILE_EXTENSION",
    "ERROR_IMAGE_TYPE_NOT_SUPPORTED",
    "ERROR_UPLOAD",
    "ERROR_GOOGLEKEY",
    "ERROR_PAGEURL",
    "ERROR_BAD_PARAMETERS",
];

/// `in.php` and `res.php` both answer with this envelope when `json=1`.
#[derive(Debug, Deserialize)]
struct Envelope {
    status: u8,
    #[serde(default)]
    request: serde_json::Value,
    #[serde(default)]
    error_text: Option<String>,
}

impl Envelope {
    fn request_text(&self) -> String {
        match &self.request {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    fn error_detail(&self) -> String {
        let code = self.request_text();
        match &self.error_text {
            Some(text) if !text.is_empty() => format!("{code}: {text}"),
            _ => code,
        }
    }
}

fn classify_code(code: &str, detail: String) -> ProviderError {
    if TRANSIENT_CODES.contains(&code) {
        ProviderError::Transient(detail)
    } else if REJECTED_CODES.contains(&code) {
        ProviderError::Rejected(detail)
    } else {
        ProviderError::Transient(detail)
    }
}

/// Form fields for `in.php`, minus the key.
fn submit_fields(task: &CaptchaTask) -> Vec<(&'static str, String)> {
    match task {
        CaptchaTask::ImageToText {
            body,
            case_sensitive,
            length,
        } => {
            let mut fields = vec![
                ("method", "base64".to_string()),
                ("body", body.clone()),
                ("regsense", u8::from(*case_sensitive).to_string()),
            ];
            if let Some(len) = length {
                fields.push(("min_len", len.to_string()));
                fields.push(("max_len", len.to_string()));
            }
            fields
        }
        CaptchaTask::RecaptchaV2 {
            site_key,
            page_url,
            invisible,
        } => vec![
            ("method", "userrecaptcha".to_string()),
            ("googlekey", site_key.clone()),
            ("pageurl", page_url.clone()),
            ("invisible", u8::from(*invisible).to_string()),
        ],
        CaptchaTask::RecaptchaV3 {
            site_key,
            page_url,
            action,
            min_score,
        } => {
            let mut fields = vec![
                ("method", "userrecaptcha".to_string()),
                ("version", "v3".to_string()),
                ("googlekey", site_key.clone()),
                ("pageurl", page_url.clone()),
                ("min_score", min_score.to_string()),
            ];
            if let Some(action) = action {
                fields.push(("action", action.clone()));
            }
            fields
        }
        CaptchaTask::HCaptcha { site_key, page_url } => vec![
            ("method", "hcaptcha".to_string()),
            ("sitekey", site_key.clone()),
            ("pageurl", page_url.clone()),
        ],
    }
}

/// 2captcha's legacy form API.
#[derive(Clone)]
pub struct TwoCaptchaClient {
    client: Client,
    base_url: String,
    policy: PollPolicy,
}

impl TwoCaptchaClient {
    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        let base_url = config
            .base_url_override(TWO_CAPTCHA)
            .unwrap_or(DEFAULT_BASE_URL);

        Ok(Self {
            client: http_client(config)?,
            base_url: normalize_base_url(base_url)?,
            policy: PollPolicy::from_config(config),
        })
    }

    async fn read_envelope(
        &self,
        response: reqwest::Response,
    ) -> std::result::Result<Envelope, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        response
            .json::<Envelope>()
            .await
            .map_err(|e| ProviderError::Transient(format!("Failed to parse response: {e}")))
    }
}

#[async_trait]
impl CaptchaProvider for TwoCaptchaClient {
    fn id(&self) -> &str {
        TWO_CAPTCHA
    }

    fn poll_policy(&self, task: &CaptchaTask) -> PollPolicy {
        self.policy.for_task(task)
    }

    async fn submit(
        &self,
        task: &CaptchaTask,
        credential: &str,
    ) -> std::result::Result<Submission, ProviderError> {
        let mut form = vec![
            ("key", credential.to_string()),
            ("json", "1".to_string()),
        ];
        form.extend(submit_fields(task));

        let response = self
            .client
            .post(format!("{}/in.php", self.base_url))
            .form(&form)
            .send()
            .await?;
        let envelope = self.read_envelope(response).await?;

        if envelope.status != 1 {
            let code = envelope.request_text();
            return Err(classify_code(&code, envelope.error_detail()));
        }

        let task_id = envelope.request_text();
        if task_id.is_empty() {
            return Err(ProviderError::Transient(
                "Submit succeeded without a task id".to_string(),
            ));
        }
        debug!(provider = TWO_CAPTCHA, task_id = %task_id, "Task submitted");
        Ok(Submission::Queued(TaskHandle { task_id }))
    }

    async fn poll(&self, handle: &TaskHandle, credential: &str) -> PollStatus {
        let response = self
            .client
            .get(format!("{}/res.php", self.base_url))
            .query(&[
                ("key", credential),
                ("action", "get"),
                ("id", handle.task_id.as_str()),
                ("json", "1"),
            ])
            .send()
            .await;

        let envelope = match response {
            Ok(resp) => match self.read_envelope(resp).await {
                Ok(envelope) => envelope,
                Err(ProviderError::Rejected(detail)) => return PollStatus::Failed(detail),
                Err(e) => {
                    debug!(provider = TWO_CAPTCHA, error = %e, "Poll failed, will retry");
                    return PollStatus::Pending;
                }
            },
            Err(e) => {
                debug!(provider = TWO_CAPTCHA, error = %e, "Poll request failed, will retry");
                return PollStatus::Pending;
            }
        };

        let text = envelope.request_text();
        match envelope.status {
            1 if !text.is_empty() => PollStatus::Ready(Solution { answer: text }),
            1 => PollStatus::Failed("Empty answer".to_string()),
            _ if text == NOT_READY => PollStatus::Pending,
            _ => PollStatus::Failed(envelope.error_detail()),
        }
    }
}
