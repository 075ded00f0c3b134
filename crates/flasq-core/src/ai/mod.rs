pub mod ollama;
pub mod openai;

pub use ollama::OllamaClient;
pub use openai::OpenAIClient;

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::provider::Provider;

/// A message as sent to the inference server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

impl WireMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// Everything a chat call needs, independent of the server API style.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub temperature: f32,
}

/// Client for whichever API style the server speaks.
#[derive(Clone)]
pub enum InferenceClient {
    Ollama(OllamaClient),
    OpenAI(OpenAIClient),
}

impl InferenceClient {
    pub fn new(provider: Provider, base_url: &str, api_key: Option<&str>) -> Self {
        match provider {
            Provider::Ollama => InferenceClient::Ollama(OllamaClient::new(base_url)),
            Provider::OpenAI => InferenceClient::OpenAI(OpenAIClient::new(base_url, api_key)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let api_key = Some(config.openai_api_key.as_str()).filter(|k| !k.is_empty());
        Self::new(config.provider(), config.ollama_base_url.as_str(), api_key)
    }

    pub fn provider(&self) -> Provider {
        match self {
            InferenceClient::Ollama(_) => Provider::Ollama,
            InferenceClient::OpenAI(_) => Provider::OpenAI,
        }
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        match self {
            InferenceClient::Ollama(client) => client.list_models().await,
            InferenceClient::OpenAI(client) => client.list_models().await,
        }
    }

    /// Request a whole reply.
    pub async fn chat(&self, request: &ChatRequest) -> Result<String> {
        match self {
            InferenceClient::Ollama(client) => client.chat(request).await,
            InferenceClient::OpenAI(client) => client.chat(request).await,
        }
    }

    /// Request a streamed reply, calling `on_fragment` for each text fragment.
    pub async fn chat_stream<F>(&self, request: &ChatRequest, on_fragment: F) -> Result<()>
    where
        F: FnMut(&str) + Send,
    {
        match self {
            InferenceClient::Ollama(client) => client.chat_stream(request, on_fragment).await,
            InferenceClient::OpenAI(client) => client.chat_stream(request, on_fragment).await,
        }
    }
}

/// Splits a chunked byte stream into complete lines.
///
/// Bytes are buffered until a `\n` arrives, so multi-byte UTF-8 sequences split
/// across network chunks decode correctly.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed a chunk, returning every line it completed (without `\r\n`/`\n`).
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// Flush a trailing line that was not newline-terminated.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
