use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatRequest, LineBuffer, WireMessage};

/// Timeout for the model-listing probe.
const LIST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
    top_k: u32,
    top_p: f32,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    options: OllamaOptions,
    stream: bool,
}

#[derive(Deserialize, Default)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaResponseMessage>,
}

#[derive(Deserialize)]
struct OllamaChatChunk {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn chat_body<'a>(request: &'a ChatRequest, stream: bool) -> OllamaChatRequest<'a> {
        OllamaChatRequest {
            model: &request.model,
            messages: &request.messages,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: 2048,
                top_k: 40,
                top_p: 0.9,
            },
            stream,
        }
    }

    async fn post_chat(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&Self::chat_body(request, stream))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama chat request failed with status {}: {}", status, text));
        }

        Ok(response)
    }

    /// Request a whole reply. A reply without a message yields an empty string.
    pub async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let response = self.post_chat(request, false).await?;
        let chat_response: OllamaChatResponse = response.json().await?;
        Ok(chat_response.message.unwrap_or_default().content)
    }

    /// Request a streamed reply. Ollama streams one JSON object per line.
    pub async fn chat_stream<F>(&self, request: &ChatRequest, mut on_fragment: F) -> Result<()>
    where
        F: FnMut(&str) + Send,
    {
        let response = self.post_chat(request, true).await?;

        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = body.next().await {
            for line in lines.push(&chunk?) {
                if handle_chunk_line(&line, &mut on_fragment)? {
                    return Ok(());
                }
            }
        }
        if let Some(line) = lines.finish() {
            handle_chunk_line(&line, &mut on_fragment)?;
        }

        Ok(())
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).timeout(LIST_TIMEOUT).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("Failed to list models: {}", response.status()));
        }

        let models_response: OllamaModelsResponse = response.json().await?;
        let model_names: Vec<String> = models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect();

        Ok(model_names)
    }
}

/// Parse one streamed line, forwarding its text. Returns `true` once the
/// server marks the reply done.
fn handle_chunk_line<F>(line: &str, on_fragment: &mut F) -> Result<bool>
where
    F: FnMut(&str),
{
    if line.trim().is_empty() {
        return Ok(false);
    }

    let chunk: OllamaChatChunk = serde_json::from_str(line)?;
    if let Some(error) = chunk.error {
        return Err(anyhow!("Ollama stream error: {}", error));
    }
    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            on_fragment(&message.content);
        }
    }

    Ok(chunk.done)
}
