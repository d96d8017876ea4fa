use anyhow::Context as _;
use async_trait::async_trait;
use consult_flow::{ServiceError, ServiceResult, SpeechClip, SpeechSynthesizer};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::classify_reqwest_error;
use crate::config::SpeechConfig;

const DEFAULT_AUDIO_MIME: &str = "audio/mpeg";

/// Text-to-speech over an OpenAI-compatible `/audio/speech` endpoint
pub struct HttpSpeechSynthesizer {
    http: Client,
    config: SpeechConfig,
}

impl HttpSpeechSynthesizer {
    pub fn new(config: SpeechConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client for speech synthesis")?;
        Ok(Self { http, config })
    }

    fn payload(&self, text: &str) -> Value {
        json!({
            "model": self.config.model,
            "voice": self.config.voice,
            "input": text,
            "response_format": "mp3"
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> ServiceResult<SpeechClip> {
        let response = self
            .http
            .post(format!(
                "{}/audio/speech",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_key)
            .json(&self.payload(text))
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::rejected(
                status.as_u16(),
                "speech request failed",
            ));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("audio/"))
            .unwrap_or(DEFAULT_AUDIO_MIME)
            .to_string();

        let bytes = response.bytes().await.map_err(classify_reqwest_error)?;
        if bytes.is_empty() {
            return Err(ServiceError::malformed("speech response had no audio"));
        }

        debug!(size = bytes.len(), mime_type = %mime_type, "Speech synthesized");
        Ok(SpeechClip {
            mime_type,
            bytes: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn payload_carries_voice_and_text() {
        let synthesizer = HttpSpeechSynthesizer::new(SpeechConfig {
            api_key: "key".to_string(),
            base_url: "http://localhost:9".to_string(),
            model: "tts-1".to_string(),
            voice: "fable".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        let payload = synthesizer.payload("Image analyzed");
        assert_eq!(payload["input"], "Image analyzed");
        assert_eq!(payload["voice"], "fable");
        assert_eq!(payload["response_format"], "mp3");
    }
}
