use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormatTag {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Webp,
    #[default]
    Unknown,
}

impl ImageFormatTag {
    /// Sniff the format from magic bytes.
    pub fn detect(bytes: &[u8]) -> Self {
        match image::guess_format(bytes) {
            Ok(image::ImageFormat::Png) => Self::Png,
            Ok(image::ImageFormat::Jpeg) => Self::Jpeg,
            Ok(image::ImageFormat::Gif) => Self::Gif,
            Ok(image::ImageFormat::Bmp) => Self::Bmp,
            Ok(image::ImageFormat::WebP) => Self::Webp,
            _ => Self::Unknown,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Webp => "image/webp",
            Self::Unknown => "application/octet-stream",
        }
    }
}

impl fmt::Display for ImageFormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::Gif => write!(f, "gif"),
            Self::Bmp => write!(f, "bmp"),
            Self::Webp => write!(f, "webp"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Raw captcha image as handed over by the caller.
///
/// There are no mutating accessors: every pipeline stage reads the same bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    bytes: Vec<u8>,
    format: ImageFormatTag,
}

impl ImageArtifact {
    pub fn new(bytes: Vec<u8>, format: ImageFormatTag) -> Self {
        Self { bytes, format }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let format = ImageFormatTag::detect(&bytes);
        Self { bytes, format }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormatTag {
        self.format
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

impl fmt::Debug for ImageArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageArtifact")
            .field("len", &self.bytes.len())
            .field("format", &self.format)
            .finish()
    }
}
