use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::{PollPolicy, PollStatus, Solution, TaskHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Submitted,
    Pending,
    Ready,
    Failed,
    TimedOut,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::TimedOut)
    }
}

/// A submitted task being tracked until it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct ProviderTask {
    provider_id: String,
    handle: TaskHandle,
    state: TaskState,
}

impl ProviderTask {
    pub fn submitted(provider_id: &str, handle: TaskHandle) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            handle,
            state: TaskState::Submitted,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    fn transition(&mut self, next: TaskState) {
        debug_assert!(!self.state.is_terminal(), "task already terminal");
        debug!(
            provider = %self.provider_id,
            task_id = %self.handle.task_id,
            from = ?self.state,
            to = ?next,
            "Task state change"
        );
        self.state = next;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Ready(Solution),
    Failed(String),
    TimedOut { polls: u32 },
}

async fn wait(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Poll `check` until it reports a terminal status or `policy.max_polls`
/// requests have been made. The task is consumed: once terminal it is gone.
///
/// Dropping the returned future stops polling; nothing is sent to the
/// provider.
pub async fn poll_until_done<F, Fut>(
    mut task: ProviderTask,
    policy: &PollPolicy,
    mut check: F,
) -> TaskOutcome
where
    F: FnMut(&TaskHandle) -> Fut,
    Fut: Future<Output = PollStatus>,
{
    wait(policy.initial_delay).await;

    for poll_index in 0..policy.max_polls {
        if poll_index > 0 {
            wait(policy.interval).await;
        }

        match check(&task.handle).await {
            PollStatus::Pending => {
                if task.state != TaskState::Pending {
                    task.transition(TaskState::Pending);
                }
            }
            PollStatus::Ready(solution) => {
                task.transition(TaskState::Ready);
                return TaskOutcome::Ready(solution);
            }
            PollStatus::Failed(reason) => {
                task.transition(TaskState::Failed);
                return TaskOutcome::Failed(reason);
            }
        }
    }

    task.transition(TaskState::TimedOut);
    TaskOutcome::TimedOut {
        polls: policy.max_polls,
    }
}
