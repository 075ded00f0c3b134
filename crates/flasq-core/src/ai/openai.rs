use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::{ChatRequest, LineBuffer, WireMessage};

const LIST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChunk {
    #[serde(default)]
    choices: Vec<OpenAIChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct OpenAIChunkChoice {
    #[serde(default)]
    delta: OpenAIDelta,
}

#[derive(Deserialize, Default)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIModel {
    id: String,
}

#[derive(Deserialize)]
struct OpenAIModelsResponse {
    data: Vec<OpenAIModel>,
}

/// Client for servers exposing the OpenAI-compatible `/v1` API
/// (llama.cpp, vLLM, LM Studio, Ollama's compatibility layer, ...).
#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAIClient {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    async fn post_chat(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let body = OpenAIRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            top_p: 0.9,
            max_tokens: 2048,
            stream,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("OpenAI API error {}: {}", status, text));
        }

        Ok(response)
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let response = self.post_chat(request, false).await?;
        let openai_response: OpenAIResponse = response.json().await?;
        Ok(openai_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    /// Request a streamed reply delivered as Server-Sent Events.
    pub async fn chat_stream<F>(&self, request: &ChatRequest, mut on_fragment: F) -> Result<()>
    where
        F: FnMut(&str) + Send,
    {
        let response = self.post_chat(request, true).await?;

        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = body.next().await {
            for line in lines.push(&chunk?) {
                if handle_event_line(&line, &mut on_fragment)? {
                    return Ok(());
                }
            }
        }
        if let Some(line) = lines.finish() {
            handle_event_line(&line, &mut on_fragment)?;
        }

        Ok(())
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/v1/models", self.base_url);

        let response = self
            .authorized(self.client.get(&url))
            .timeout(LIST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Failed to list models: {}", response.status()));
        }

        let models_response: OpenAIModelsResponse = response.json().await?;
        Ok(models_response.data.into_iter().map(|m| m.id).collect())
    }
}

/// Handle one SSE line. Only `data:` fields carry content; returns `true` on
/// the `[DONE]` sentinel.
fn handle_event_line<F>(line: &str, on_fragment: &mut F) -> Result<bool>
where
    F: FnMut(&str),
{
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(false);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(false);
    }
    if data == "[DONE]" {
        return Ok(true);
    }

    let chunk: OpenAIChunk = serde_json::from_str(data)?;
    if let Some(error) = chunk.error {
        return Err(anyhow!("OpenAI stream error: {}", error_message(&error)));
    }
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            on_fragment(&content);
        }
    }

    Ok(false)
}

/// Servers send either `{"error": "text"}` or `{"error": {"message": ..}}`.
fn error_message(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(text) => text.clone(),
        other => other
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}
