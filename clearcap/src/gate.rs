use std::fmt;

use crate::models::LocalResult;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsufficientReason {
    NoText,
    LowConfidence { confidence: f32, threshold: f32 },
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for InsufficientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoText => write!(f, "no text recognized"),
            Self::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence} below threshold {threshold}"),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "expected {expected} characters, got {actual}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    Sufficient,
    Insufficient(InsufficientReason),
}

impl GateDecision {
    pub fn is_sufficient(&self) -> bool {
        matches!(self, Self::Sufficient)
    }
}

/// Decides whether a local reading is good enough to skip paid providers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceGate {
    pub threshold: f32,
    pub expected_length: Option<usize>,
}

impl ConfidenceGate {
    pub fn new(threshold: f32, expected_length: Option<usize>) -> Self {
        Self {
            threshold,
            expected_length,
        }
    }

    pub fn evaluate(&self, local: &LocalResult) -> GateDecision {
        if !local.success || local.text.is_empty() {
            return GateDecision::Insufficient(InsufficientReason::NoText);
        }

        if local.confidence < self.threshold {
            return GateDecision::Insufficient(InsufficientReason::LowConfidence {
                confidence: local.confidence,
                threshold: self.threshold,
            });
        }

        if let Some(expected) = self.expected_length {
            // Characters, not bytes.
            let actual = local.text.chars().count();
            if actual != expected {
                return GateDecision::Insufficient(InsufficientReason::LengthMismatch {
                    expected,
                    actual,
                });
            }
        }

        GateDecision::Sufficient
    }
}
