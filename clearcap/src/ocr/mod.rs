//! Local recognition stage
//!
//! Everything needed to read a captcha without paying anybody:
//! - `preprocessing`: the fixed variant catalogue and the image transforms
//! - `recognizer`: the `Recognizer` trait plus a Tesseract implementation
//! - `correction`: glyph clean-up of raw recognizer output
//! - `resolver`: runs every variant and keeps the most confident reading
//!
//! # Usage
//!
//! ```rust,ignore
//! let recognizer = Arc::new(TesseractRecognizer::new(&config.ocr));
//! let local = LocalResolver::new(recognizer)
//!     .resolve(&image, &LocalOptions::from_config(&config.ocr))
//!     .await;
//! ```

mod correction;
mod preprocessing;
mod recognizer;
mod resolver;

pub use correction::{correct_text, CorrectionMode};
pub use preprocessing::{apply_variant, variants, PreprocessConfig};
pub use recognizer::{
    Recognition, RecognitionParams, Recognizer, SegmentationMode, TesseractRecognizer,
};
pub use resolver::{select_best, LocalOptions, LocalResolver};
