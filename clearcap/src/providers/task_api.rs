use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ProvidersConfig;
use crate::error::Result;

use super::{
    classify_status, http_client, normalize_base_url, CaptchaProvider, CaptchaTask, PollPolicy,
    PollStatus, ProviderError, Solution, Submission, TaskCategory, TaskHandle, ANTI_CAPTCHA,
    CAPMONSTER, CAPSOLVER,
};

/// Services speaking the `createTask` / `getTaskResult` JSON protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskApiFlavor {
    AntiCaptcha,
    CapSolver,
    CapMonster,
}

impl TaskApiFlavor {
    pub fn id(&self) -> &'static str {
        match self {
            Self::AntiCaptcha => ANTI_CAPTCHA,
            Self::CapSolver => CAPSOLVER,
            Self::CapMonster => CAPMONSTER,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::AntiCaptcha => "https://api.anti-captcha.com",
            Self::CapSolver => "https://api.capsolver.com",
            Self::CapMonster => "https://api.capmonster.cloud",
        }
    }

    /// Wire task type name, or `None` when the service has no such task.
    pub fn task_type(&self, category: TaskCategory) -> Option<&'static str> {
        TASK_TYPES
            .iter()
            .find(|(flavor, cat, _)| flavor == self && *cat == category)
            .map(|(_, _, name)| *name)
    }
}

const TASK_TYPES: &[(TaskApiFlavor, TaskCategory, &str)] = &[
    (TaskApiFlavor::AntiCaptcha, TaskCategory::ImageToText, "ImageToTextTask"),
    (TaskApiFlavor::AntiCaptcha, TaskCategory::RecaptchaV2, "RecaptchaV2TaskProxyless"),
    (TaskApiFlavor::AntiCaptcha, TaskCategory::RecaptchaV3, "RecaptchaV3TaskProxyless"),
    (TaskApiFlavor::AntiCaptcha, TaskCategory::HCaptcha, "HCaptchaTaskProxyless"),
    (TaskApiFlavor::CapSolver, TaskCategory::ImageToText, "ImageToTextTask"),
    (TaskApiFlavor::CapSolver, TaskCategory::RecaptchaV2, "ReCaptchaV2TaskProxyLess"),
    (TaskApiFlavor::CapSolver, TaskCategory::RecaptchaV3, "ReCaptchaV3TaskProxyLess"),
    (TaskApiFlavor::CapMonster, TaskCategory::ImageToText, "ImageToTextTask"),
    (TaskApiFlavor::CapMonster, TaskCategory::RecaptchaV2, "RecaptchaV2TaskProxyless"),
    (TaskApiFlavor::CapMonster, TaskCategory::RecaptchaV3, "RecaptchaV3TaskProxyless"),
    (TaskApiFlavor::CapMonster, TaskCategory::HCaptcha, "HCaptchaTaskProxyless"),
];

const TRANSIENT_CODES: &[&str] = &[
    "ERROR_NO_SLOT_AVAILABLE",
    "ERROR_SERVICE_UNAVALIABLE",
    "ERROR_TOO_MUCH_REQUESTS",
    "ERROR_RATE_LIMIT",
];

const REJECTED_CODES: &[&str] = &[
    "ERROR_KEY_DOES_NOT_EXIST",
    "ERROR_INVALID_CLIENTKEY",
    "ERROR_ZERO_BALANCE",
    "ERROR_IP_NOT_ALLOWED",
    "ERROR_IP_BLOCKED",
    "ERROR_ZERO_CAPTCHA_FILESIZE",
    "ERROR_TOO_BIG_CAPTCHA_FILESIZE",
    "ERROR_IMAGE_TYPE_NOT_SUPPORTED",
    "ERROR_TASK_NOT_SUPPORTED",
    "ERROR_INVALID_TASK_TYPE",
    "ERROR_INVALID_TASK_DATA",
    "ERROR_TASK_ABSENT",
    "ERROR_RECAPTCHA_INVALID_SITEKEY",
    "ERROR_RECAPTCHA_INVALID_DOMAIN",
];

fn classify_code(code: &str, detail: String) -> ProviderError {
    if TRANSIENT_CODES.contains(&code) {
        ProviderError::Transient(detail)
    } else if REJECTED_CODES.contains(&code) {
        ProviderError::Rejected(detail)
    } else {
        ProviderError::Transient(detail)
    }
}

/// Shared by `createTask` and `getTaskResult` responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    task_id: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    solution: Option<Value>,
}

impl TaskResponse {
    fn error_code(&self) -> &str {
        self.error_code.as_deref().unwrap_or("UNKNOWN_ERROR")
    }

    fn error_detail(&self) -> String {
        match &self.error_description {
            Some(desc) if !desc.is_empty() => format!("{}: {desc}", self.error_code()),
            _ => self.error_code().to_string(),
        }
    }

    fn is_ready(&self) -> bool {
        self.status.as_deref() == Some("ready")
    }

    fn task_id(&self) -> Option<String> {
        match self.task_id.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Image text, reCAPTCHA token or generic token, whichever is present.
    fn answer(&self) -> Option<String> {
        let solution = self.solution.as_ref()?;
        ["text", "gRecaptchaResponse", "token"]
            .iter()
            .find_map(|key| solution.get(key).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Task payload in the service's vocabulary.
fn task_payload(
    flavor: TaskApiFlavor,
    task: &CaptchaTask,
) -> std::result::Result<Value, ProviderError> {
    let category = task.category();
    let task_type = flavor
        .task_type(category)
        .ok_or(ProviderError::Unsupported(category))?;

    let mut payload = match task {
        CaptchaTask::ImageToText {
            body,
            case_sensitive,
            length,
        } => {
            let mut payload = json!({ "body": body, "case": case_sensitive });
            if let Some(len) = length {
                payload["minLength"] = json!(len);
                payload["maxLength"] = json!(len);
            }
            payload
        }
        CaptchaTask::RecaptchaV2 {
            site_key,
            page_url,
            invisible,
        } => json!({
            "websiteURL": page_url,
            "websiteKey": site_key,
            "isInvisible": invisible,
        }),
        CaptchaTask::RecaptchaV3 {
            site_key,
            page_url,
            action,
            min_score,
        } => {
            let mut payload = json!({
                "websiteURL": page_url,
                "websiteKey": site_key,
                "minScore": min_score,
            });
            if let Some(action) = action {
                payload["pageAction"] = json!(action);
            }
            payload
        }
        CaptchaTask::HCaptcha { site_key, page_url } => json!({
            "websiteURL": page_url,
            "websiteKey": site_key,
        }),
    };
    payload["type"] = json!(task_type);
    Ok(payload)
}

/// Ids go back the way they came: numeric when they look numeric.
fn task_id_value(task_id: &str) -> Value {
    match task_id.parse::<u64>() {
        Ok(n) => json!(n),
        Err(_) => json!(task_id),
    }
}

/// Client for anti-captcha, CapSolver and CapMonster Cloud.
#[derive(Clone)]
pub struct TaskApiClient {
    flavor: TaskApiFlavor,
    client: Client,
    base_url: String,
    policy: PollPolicy,
}

impl TaskApiClient {
    pub fn new(flavor: TaskApiFlavor, config: &ProvidersConfig) -> Result<Self> {
        let base_url = config
            .base_url_override(flavor.id())
            .unwrap_or(flavor.default_base_url());

        Ok(Self {
            flavor,
            client: http_client(config)?,
            base_url: normalize_base_url(base_url)?,
            policy: PollPolicy::from_config(config),
        })
    }

    pub fn flavor(&self) -> TaskApiFlavor {
        self.flavor
    }

    async fn call(
        &self,
        method: &str,
        body: &Value,
    ) -> std::result::Result<TaskResponse, ProviderError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        response
            .json::<TaskResponse>()
            .await
            .map_err(|e| ProviderError::Transient(format!("Failed to parse response: {e}")))
    }
}

#[async_trait]
impl CaptchaProvider for TaskApiClient {
    fn id(&self) -> &str {
        self.flavor.id()
    }

    fn poll_policy(&self, task: &CaptchaTask) -> PollPolicy {
        self.policy.for_task(task)
    }

    async fn submit(
        &self,
        task: &CaptchaTask,
        credential: &str,
    ) -> std::result::Result<Submission, ProviderError> {
        let body = json!({
            "clientKey": credential,
            "task": task_payload(self.flavor, task)?,
        });

        let response = self.call("createTask", &body).await?;
        if response.error_id != 0 {
            return Err(classify_code(response.error_code(), response.error_detail()));
        }

        if response.is_ready() {
            if let Some(answer) = response.answer() {
                debug!(provider = self.id(), "Task solved on submit");
                return Ok(Submission::Solved(Solution { answer }));
            }
        }

        let task_id = response.task_id().ok_or_else(|| {
            ProviderError::Transient("createTask succeeded without a taskId".to_string())
        })?;
        debug!(provider = self.id(), task_id = %task_id, "Task submitted");
        Ok(Submission::Queued(TaskHandle { task_id }))
    }

    async fn poll(&self, handle: &TaskHandle, credential: &str) -> PollStatus {
        let body = json!({
            "clientKey": credential,
            "taskId": task_id_value(&handle.task_id),
        });

        let response = match self.call("getTaskResult", &body).await {
            Ok(response) => response,
            Err(ProviderError::Rejected(detail)) => return PollStatus::Failed(detail),
            Err(e) => {
                debug!(provider = self.id(), error = %e, "Poll failed, will retry");
                return PollStatus::Pending;
            }
        };

        if response.error_id != 0 {
            if TRANSIENT_CODES.contains(&response.error_code()) {
                return PollStatus::Pending;
            }
            return PollStatus::Failed(response.error_detail());
        }

        if !response.is_ready() {
            return PollStatus::Pending;
        }

        match response.answer() {
            Some(answer) => PollStatus::Ready(Solution { answer }),
            None => PollStatus::Failed("Ready without a solution".to_string()),
        }
    }
}
