//! Confidence-gated captcha resolution.
//!
//! A captcha image is first read locally by running several preprocessing
//! variants through OCR. When the best reading clears the confidence gate it
//! is returned as is; otherwise the paid providers are tried in priority order
//! with bounded retries, falling back to the local reading if all of them fail.

pub mod cascade;
pub mod config;
pub mod error;
pub mod gate;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod providers;

pub use config::Config;
pub use error::{ClearcapError, Result};
pub use models::{ImageArtifact, Method, ProviderCredentials, ResolutionResult};
pub use pipeline::{Pipeline, ResolveOptions, ResolveRequest, TokenRequest};
