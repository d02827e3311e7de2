//! Sequential fallback over paid providers with bounded retries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::CascadeConfig;
use crate::models::{CascadeAttempt, ProviderCredentials};
use crate::providers::{
    poll_until_done, CaptchaProvider, CaptchaTask, ProviderTask, Solution, Submission,
    TaskOutcome,
};

/// Winning provider and its answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solved {
    pub provider: String,
    pub solution: Solution,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub solved: Option<Solved>,
    pub log: Vec<CascadeAttempt>,
}

/// Outcome of one submit-and-poll round against a single provider.
enum Round {
    Solved(Solution),
    Retry(String),
    GiveUp(String),
}

#[derive(Clone)]
pub struct Cascade {
    providers: Vec<Arc<dyn CaptchaProvider>>,
    max_retries: u32,
    retry_delay: Duration,
}

impl Cascade {
    /// `providers` must already be in priority order.
    pub fn new(providers: Vec<Arc<dyn CaptchaProvider>>, config: &CascadeConfig) -> Self {
        Self {
            providers,
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
        }
    }

    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.id())
    }

    /// True when at least one provider in the chain has a credential.
    pub fn can_attempt(&self, credentials: &ProviderCredentials) -> bool {
        self.provider_ids().any(|id| credentials.contains(id))
    }

    pub async fn run(
        &self,
        task: &CaptchaTask,
        credentials: &ProviderCredentials,
    ) -> CascadeOutcome {
        let mut log = Vec::new();

        for provider in &self.providers {
            let id = provider.id();
            let Some(credential) = credentials.get(id) else {
                log.push(CascadeAttempt::skipped(id, "no credential supplied"));
                continue;
            };

            for retry_index in 0..self.max_retries {
                if retry_index > 0 && !self.retry_delay.is_zero() {
                    tokio::time::sleep(self.retry_delay).await;
                }

                match attempt(provider.as_ref(), task, credential).await {
                    Round::Solved(solution) => {
                        info!(provider = id, retry_index, "Provider solved the captcha");
                        log.push(CascadeAttempt::success(id, retry_index));
                        return CascadeOutcome {
                            solved: Some(Solved {
                                provider: id.to_string(),
                                solution,
                            }),
                            log,
                        };
                    }
                    Round::Retry(detail) => {
                        warn!(
                            provider = id,
                            retry_index,
                            error = %detail,
                            "Provider attempt failed"
                        );
                        log.push(CascadeAttempt::failure(id, retry_index, detail));
                    }
                    Round::GiveUp(detail) => {
                        warn!(
                            provider = id,
                            retry_index,
                            error = %detail,
                            "Provider rejected the task, moving on"
                        );
                        log.push(CascadeAttempt::failure(id, retry_index, detail));
                        break;
                    }
                }
            }
        }

        CascadeOutcome { solved: None, log }
    }
}

async fn attempt(provider: &dyn CaptchaProvider, task: &CaptchaTask, credential: &str) -> Round {
    let handle = match provider.submit(task, credential).await {
        Ok(Submission::Solved(solution)) => return Round::Solved(solution),
        Ok(Submission::Queued(handle)) => handle,
        Err(e) if e.is_retryable() => return Round::Retry(e.to_string()),
        Err(e) => return Round::GiveUp(e.to_string()),
    };

    let policy = provider.poll_policy(task);
    let tracked = ProviderTask::submitted(provider.id(), handle);
    let outcome = poll_until_done(tracked, &policy, |handle| {
        let handle = handle.clone();
        async move { provider.poll(&handle, credential).await }
    })
    .await;

    match outcome {
        TaskOutcome::Ready(solution) => Round::Solved(solution),
        TaskOutcome::Failed(reason) => Round::Retry(reason),
        TaskOutcome::TimedOut { polls } => Round::Retry(format!("Timed out after {polls} polls")),
    }
}
