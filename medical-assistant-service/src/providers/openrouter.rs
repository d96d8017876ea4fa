use anyhow::Context as _;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use consult_flow::{ImageUpload, LanguageModel, ServiceError, ServiceResult};
use reqwest::Client;
use rig::{client::CompletionClient, completion::Prompt, providers::openrouter};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::classify_reqwest_error;
use crate::config::ModelConfig;

const VISION_MAX_TOKENS: u32 = 1000;

/// OpenRouter-backed model: text prompts go through a rig agent, image
/// descriptions through the chat completions endpoint with a data URL.
pub struct OpenRouterModel {
    client: openrouter::Client,
    http: Client,
    config: ModelConfig,
}

impl OpenRouterModel {
    pub fn new(config: ModelConfig) -> anyhow::Result<Self> {
        let client = openrouter::Client::new(&config.api_key);
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client for OpenRouter")?;
        Ok(Self {
            client,
            http,
            config,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    async fn complete(&self, prompt: &str) -> ServiceResult<String> {
        debug!(model = %self.config.model, prompt_length = prompt.len(), "Calling model");

        let agent = self.client.agent(&self.config.model).build();
        let response = tokio::time::timeout(self.config.timeout, agent.prompt(prompt.to_string()))
            .await
            .map_err(|_| {
                ServiceError::timeout(format!(
                    "no reply within {}s",
                    self.config.timeout.as_secs()
                ))
            })?
            .map_err(|e| ServiceError::transport(e.to_string()))?;

        info!(response_length = response.len(), "Model reply received");
        Ok(response)
    }

    async fn describe_image(
        &self,
        instruction: &str,
        image: &ImageUpload,
    ) -> ServiceResult<String> {
        let payload = vision_payload(&self.config.model, instruction, image);

        let response = self
            .http
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::rejected(
                status.as_u16(),
                format!("vision request failed: {}", body),
            ));
        }

        let response_json: Value = response.json().await.map_err(classify_reqwest_error)?;
        let content = extract_message_content(&response_json)?;

        info!(
            summary_length = content.len(),
            "Image analysis received"
        );
        Ok(content)
    }
}

fn vision_payload(model: &str, instruction: &str, image: &ImageUpload) -> Value {
    json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": instruction },
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!(
                                "data:{};base64,{}",
                                image.mime_type(),
                                STANDARD.encode(image.bytes())
                            )
                        }
                    }
                ]
            }
        ],
        "max_tokens": VISION_MAX_TOKENS
    })
}

/// Pull the assistant text out of a chat completions response
fn extract_message_content(response: &Value) -> ServiceResult<String> {
    let content = response["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .ok_or_else(|| ServiceError::malformed("Invalid response format from LLM"))?;

    if content.is_empty() {
        return Err(ServiceError::malformed("LLM returned empty content"));
    }
    Ok(content.to_string())
}
