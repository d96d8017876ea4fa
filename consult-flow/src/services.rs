use async_trait::async_trait;
use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::error::{ConsultError, Result, ServiceResult};

/// Longest text handed to speech synthesis, in characters
pub const SPEECH_CHAR_LIMIT: usize = 200;

/// An uploaded image that passed format sniffing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    bytes: Vec<u8>,
    format: ImageFormat,
}

impl ImageUpload {
    /// Accept PNG, JPEG or WebP bytes.
    ///
    /// The format is sniffed from the bytes. A declared content type, when
    /// present, must agree with what the bytes contain.
    pub fn from_bytes(bytes: Vec<u8>, declared_type: Option<&str>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(ConsultError::UnsupportedImage("empty upload".to_string()));
        }

        let format = image::guess_format(&bytes)
            .map_err(|_| ConsultError::UnsupportedImage("unrecognized image data".to_string()))?;

        if !matches!(
            format,
            ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP
        ) {
            return Err(ConsultError::UnsupportedImage(format!("{:?}", format)));
        }

        if let Some(declared) = declared_type {
            let declared = declared
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            if !declared.is_empty() && declared != "application/octet-stream" {
                let matches = ImageFormat::from_mime_type(&declared) == Some(format)
                    || (declared == "image/jpg" && format == ImageFormat::Jpeg);
                if !matches {
                    return Err(ConsultError::UnsupportedImage(format!(
                        "declared {} but received {:?}",
                        declared, format
                    )));
                }
            }
        }

        Ok(Self { bytes, format })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

/// Synthesized audio ready for playback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechClip {
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Generative model used for replies, image descriptions and report summaries
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> ServiceResult<String>;

    async fn describe_image(&self, instruction: &str, image: &ImageUpload)
    -> ServiceResult<String>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> ServiceResult<SpeechClip>;
}

/// Synthesizer for deployments without a speech backend
pub struct SilentSpeech;

#[async_trait]
impl SpeechSynthesizer for SilentSpeech {
    async fn synthesize(&self, _text: &str) -> ServiceResult<SpeechClip> {
        Err(crate::error::ServiceError::unavailable(
            "speech synthesis is not configured",
        ))
    }
}

/// The leading part of `text` that is sent to speech synthesis
pub fn speech_excerpt(text: &str) -> &str {
    match text.char_indices().nth(SPEECH_CHAR_LIMIT) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
