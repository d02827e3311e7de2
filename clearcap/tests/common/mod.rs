#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use clearcap::config::Config;
use clearcap::error::{ClearcapError, Result};
use clearcap::models::ImageArtifact;
use clearcap::ocr::{Recognition, RecognitionParams, Recognizer};
use clearcap::providers::{
    CaptchaProvider, CaptchaTask, PollPolicy, PollStatus, ProviderError, Solution, Submission,
    TaskHandle,
};

/// A small grayscale PNG; content is irrelevant to scripted recognizers.
pub fn captcha_png() -> ImageArtifact {
    let img = image::GrayImage::from_fn(120, 40, |x, y| {
        image::Luma([if (x / 10 + y / 10) % 2 == 0 { 30 } else { 220 }])
    });
    let mut bytes = Vec::new();
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("Failed to encode test PNG");
    ImageArtifact::from_bytes(bytes)
}

/// Defaults with no waiting between cascade retries.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.cascade.retry_delay_ms = 0;
    config.providers.initial_poll_delay_ms = 0;
    config.providers.poll_interval_ms = 0;
    config.providers.max_polls = 3;
    config
}

/// Replays readings in call order, then repeats `fallback` if set.
pub struct ScriptedRecognizer {
    script: Mutex<VecDeque<Result<Recognition>>>,
    fallback: Option<Recognition>,
    pub calls: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new(script: Vec<Result<Recognition>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Every pass reads the same text at the same confidence.
    pub fn always(text: &str, confidence: f32) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(reading(text, confidence)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn reading(text: &str, confidence: f32) -> Recognition {
    Recognition {
        text: text.to_string(),
        confidence,
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, _image: &[u8], _params: &RecognitionParams) -> Result<Recognition> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(scripted), _) => scripted,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(ClearcapError::Ocr("script exhausted".to_string())),
        }
    }
}

enum Behaviour {
    /// Transient submit failure `failures` times, then a task that polls ready.
    FailThenSolve { failures: usize, answer: String },
    Reject,
    NeverReady,
}

/// In-memory provider with call counters.
pub struct MockProvider {
    id: &'static str,
    behaviour: Behaviour,
    pub submits: AtomicUsize,
    pub polls: AtomicUsize,
}

impl MockProvider {
    fn build(id: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            id,
            behaviour,
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        })
    }

    pub fn solves_after(id: &'static str, failures: usize, answer: &str) -> Arc<Self> {
        Self::build(
            id,
            Behaviour::FailThenSolve {
                failures,
                answer: answer.to_string(),
            },
        )
    }

    pub fn always_failing(id: &'static str) -> Arc<Self> {
        Self::solves_after(id, usize::MAX, "")
    }

    pub fn rejecting(id: &'static str) -> Arc<Self> {
        Self::build(id, Behaviour::Reject)
    }

    pub fn never_ready(id: &'static str) -> Arc<Self> {
        Self::build(id, Behaviour::NeverReady)
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

pub fn as_providers(providers: &[&Arc<MockProvider>]) -> Vec<Arc<dyn CaptchaProvider>> {
    providers
        .iter()
        .map(|p| Arc::clone(*p) as Arc<dyn CaptchaProvider>)
        .collect()
}

#[async_trait]
impl CaptchaProvider for MockProvider {
    fn id(&self) -> &str {
        self.id
    }

    fn poll_policy(&self, _task: &CaptchaTask) -> PollPolicy {
        PollPolicy {
            initial_delay: Duration::ZERO,
            interval: Duration::from_millis(10),
            max_polls: 3,
        }
    }

    async fn submit(
        &self,
        _task: &CaptchaTask,
        _credential: &str,
    ) -> std::result::Result<Submission, ProviderError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::FailThenSolve { failures, .. } if n < *failures => Err(
                ProviderError::Transient("ERROR_NO_SLOT_AVAILABLE".to_string()),
            ),
            Behaviour::Reject => Err(ProviderError::Rejected("ERROR_WRONG_USER_KEY".to_string())),
            _ => Ok(Submission::Queued(TaskHandle {
                task_id: format!("{}-{n}", self.id),
            })),
        }
    }

    async fn poll(&self, _handle: &TaskHandle, _credential: &str) -> PollStatus {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::FailThenSolve { answer, .. } => PollStatus::Ready(Solution {
                answer: answer.clone(),
            }),
            _ => PollStatus::Pending,
        }
    }
}
