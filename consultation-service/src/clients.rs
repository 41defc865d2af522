//! Real collaborator clients: rig/OpenRouter reasoning, plus OpenRouter
//! chat-completions calls for audio transcription and image findings.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use consult_flow::{ReasoningClient, Role, TranscriptionClient, Turn, VisionClient};
use reqwest::Client;
use rig::client::CompletionClient;
use rig::completion::{Chat, Message};
use rig::providers::openrouter;
use serde_json::{Value, json};
use tracing::info;

const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_REASONING_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_AUDIO_MODEL: &str = "openai/gpt-4o-audio-preview";
const DEFAULT_VISION_MODEL: &str = "openai/gpt-4.1-mini";
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Reasoning over the consultation dialogue via a rig openrouter agent.
pub struct OpenRouterReasoner {
    api_key: String,
    model: String,
}

impl OpenRouterReasoner {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow!("OPENROUTER_API_KEY not set"))?;
        Ok(Self {
            api_key,
            model: env_or("REASONING_MODEL", DEFAULT_REASONING_MODEL),
        })
    }
}

#[async_trait]
impl ReasoningClient for OpenRouterReasoner {
    async fn complete(&self, preamble: &str, history: &[Turn]) -> anyhow::Result<String> {
        // The newest user turn becomes the prompt; everything before it is
        // replayed as chat history.
        let (prompt, prior) = match history.split_last() {
            Some((last, prior)) if last.role == Role::User => (last.content.as_str(), prior),
            _ => return Err(anyhow!("dialogue does not end with a user turn")),
        };

        let chat_history: Vec<Message> = prior
            .iter()
            .map(|turn| match turn.role {
                Role::User => Message::user(turn.content.clone()),
                Role::Assistant => Message::assistant(turn.content.clone()),
            })
            .collect();

        let client = openrouter::Client::new(&self.api_key);
        let agent = client.agent(&self.model).preamble(preamble).build();

        let response = agent.chat(prompt, chat_history).await?;
        info!(
            "Reasoning model returned {} characters over {} prior turns",
            response.len(),
            prior.len()
        );
        Ok(response)
    }
}

/// Shared chat-completions call for the multimodal clients.
async fn call_openrouter(
    http: &Client,
    api_key: &str,
    model: &str,
    content: Vec<Value>,
    max_tokens: u32,
) -> anyhow::Result<String> {
    let payload = json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": content
            }
        ],
        "max_tokens": max_tokens
    });

    let response = http
        .post(OPENROUTER_CHAT_URL)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&payload)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(anyhow!("LLM API request failed: {}", response.status()));
    }

    let response_json: Value = response.json().await?;
    let content = response_json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| anyhow!("Invalid response format from LLM"))?;

    Ok(content.to_string())
}

/// Voice transcription through an audio-capable chat model.
pub struct OpenRouterTranscription {
    http: Client,
    api_key: String,
    model: String,
}

impl OpenRouterTranscription {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow!("OPENROUTER_API_KEY not set"))?;
        Ok(Self {
            http: Client::builder().timeout(CLIENT_TIMEOUT).build()?,
            api_key,
            model: env_or("AUDIO_MODEL", DEFAULT_AUDIO_MODEL),
        })
    }
}

#[async_trait]
impl TranscriptionClient for OpenRouterTranscription {
    async fn transcribe(&self, audio: &[u8]) -> anyhow::Result<String> {
        let encoded = STANDARD.encode(audio);
        let content = vec![
            json!({
                "type": "text",
                "text": "Transcribe this recording verbatim. It is a patient describing \
                         their symptoms. Return only the transcript text."
            }),
            json!({
                "type": "input_audio",
                "input_audio": {
                    "data": encoded,
                    "format": "mp3"
                }
            }),
        ];

        let transcript =
            call_openrouter(&self.http, &self.api_key, &self.model, content, 1000).await?;
        info!(
            "Transcribed {} bytes of audio into {} characters",
            audio.len(),
            transcript.len()
        );
        Ok(transcript)
    }
}

/// Objective-findings extraction from a patient-supplied image URL.
pub struct OpenRouterVision {
    http: Client,
    api_key: String,
    model: String,
}

impl OpenRouterVision {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow!("OPENROUTER_API_KEY not set"))?;
        Ok(Self {
            http: Client::builder().timeout(CLIENT_TIMEOUT).build()?,
            api_key,
            model: env_or("VISION_MODEL", DEFAULT_VISION_MODEL),
        })
    }
}

#[async_trait]
impl VisionClient for OpenRouterVision {
    async fn extract(&self, image_url: &str, instruction: &str) -> anyhow::Result<String> {
        let content = vec![
            json!({
                "type": "text",
                "text": instruction
            }),
            json!({
                "type": "image_url",
                "image_url": {
                    "url": image_url
                }
            }),
        ];

        call_openrouter(&self.http, &self.api_key, &self.model, content, 1000).await
    }
}
