//! Paid captcha solving services
//!
//! Every service hides behind [`CaptchaProvider`]: `submit` a task, then
//! `poll` the returned handle until it is ready. Two wire shapes exist:
//! - `two_captcha`: form submit to `in.php`, poll `res.php` by id
//! - `task_api`: JSON `createTask` / `getTaskResult`, shared by
//!   anti-captcha, CapSolver and CapMonster Cloud
//!
//! The bounded wait loop lives once in `poll`; adapters only interpret a
//! single response.

mod poll;
mod task;
mod task_api;
mod two_captcha;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ProvidersConfig;
use crate::error::Result;

pub use poll::{poll_until_done, ProviderTask, TaskOutcome, TaskState};
pub use task::{CaptchaTask, TaskCategory};
pub use task_api::{TaskApiClient, TaskApiFlavor};
pub use two_captcha::TwoCaptchaClient;

pub const TWO_CAPTCHA: &str = "2captcha";
pub const ANTI_CAPTCHA: &str = "anticaptcha";
pub const CAPSOLVER: &str = "capsolver";
pub const CAPMONSTER: &str = "capmonster";

pub const KNOWN_PROVIDERS: &[&str] = &[TWO_CAPTCHA, ANTI_CAPTCHA, CAPSOLVER, CAPMONSTER];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Bad key, zero balance, malformed task. Retrying with the same
    /// credential cannot help.
    #[error("Provider rejected the request: {0}")]
    Rejected(String),

    #[error("Task category not supported: {0}")]
    Unsupported(TaskCategory),

    /// Capacity, rate limits, network trouble.
    #[error("Transient provider error: {0}")]
    Transient(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transient(format!("HTTP request failed: {e}"))
    }
}

/// Map a non-2xx HTTP status onto the retry taxonomy.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = format!("{status} - {}", body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Transient(detail)
    } else {
        ProviderError::Rejected(detail)
    }
}

/// Provider-side task id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub task_id: String,
}

/// The answer returned by a provider: captcha text or a response token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Queued(TaskHandle),
    /// Some services answer image tasks inside the create call.
    Solved(Solution),
}

/// Normalised result of one poll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Ready(Solution),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub max_polls: u32,
}

/// Token captchas take several times longer than images to come back.
const TOKEN_INITIAL_DELAY_FACTOR: u32 = 3;

impl PollPolicy {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_poll_delay_ms),
            interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: config.max_polls.max(1),
        }
    }

    pub fn for_task(self, task: &CaptchaTask) -> Self {
        match task.category() {
            TaskCategory::ImageToText => self,
            _ => Self {
                initial_delay: self.initial_delay * TOKEN_INITIAL_DELAY_FACTOR,
                ..self
            },
        }
    }

    /// Longest time a single submitted task can be polled.
    pub fn budget(&self) -> Duration {
        self.initial_delay + self.interval * self.max_polls.saturating_sub(1)
    }
}

/// Uniform contract over one external solving service.
#[async_trait]
pub trait CaptchaProvider: Send + Sync {
    fn id(&self) -> &str;

    fn poll_policy(&self, task: &CaptchaTask) -> PollPolicy;

    async fn submit(
        &self,
        task: &CaptchaTask,
        credential: &str,
    ) -> std::result::Result<Submission, ProviderError>;

    async fn poll(&self, handle: &TaskHandle, credential: &str) -> PollStatus;
}

/// Instantiate every known provider from configuration.
pub fn build_providers(config: &ProvidersConfig) -> Result<Vec<Arc<dyn CaptchaProvider>>> {
    Ok(vec![
        Arc::new(TwoCaptchaClient::new(config)?),
        Arc::new(TaskApiClient::new(TaskApiFlavor::AntiCaptcha, config)?),
        Arc::new(TaskApiClient::new(TaskApiFlavor::CapSolver, config)?),
        Arc::new(TaskApiClient::new(TaskApiFlavor::CapMonster, config)?),
    ])
}

/// Arrange providers by priority. Ids in `order` without a provider are
/// logged and dropped; providers missing from `order` are not used.
pub fn order_providers(
    providers: Vec<Arc<dyn CaptchaProvider>>,
    order: &[String],
) -> Vec<Arc<dyn CaptchaProvider>> {
    let mut ordered = Vec::with_capacity(order.len());
    for id in order {
        match providers.iter().find(|p| p.id().eq_ignore_ascii_case(id)) {
            Some(provider) => ordered.push(Arc::clone(provider)),
            None => tracing::warn!(provider = %id, "Unknown provider in priority order, ignoring"),
        }
    }
    ordered
}

pub(crate) fn http_client(config: &ProvidersConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(|e| {
            crate::error::ClearcapError::Config(format!("Failed to create HTTP client: {e}"))
        })
}

/// Validate a base URL and strip any trailing slash.
pub(crate) fn normalize_base_url(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw)?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}
