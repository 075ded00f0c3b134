//! Session-scoped chat state.
//!
//! A [`ChatSession`] owns one browser session's transcript and chat settings.
//! It is passed by value into the relay and handed back when the turn ends, so
//! nothing about a session lives in shared globals.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Shown instead of a reply when the inference call fails.
pub const ERROR_NOTICE: &str =
    "Sorry, I couldn't reach the model server just now. Please try again in a moment.";

/// Shown when the server answers successfully but with no text.
pub const EMPTY_REPLY: &str = "Sorry, I could not generate a response.";

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    AwaitingResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("a reply is still being generated")]
    Busy,
}

/// Per-session knobs chosen in the sidebar.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
}

impl ChatSettings {
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;

    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            temperature: Self::DEFAULT_TEMPERATURE,
        }
    }

    pub fn set_temperature(&mut self, temperature: f32) {
        if temperature.is_finite() {
            self.temperature = temperature.clamp(0.0, 1.0);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    transcript_id: Uuid,
    messages: Vec<ChatMessage>,
    phase: SessionPhase,
    reply_in_progress: bool,
    settings: ChatSettings,
}

impl ChatSession {
    pub fn new(settings: ChatSettings) -> Self {
        Self {
            transcript_id: Uuid::new_v4(),
            messages: Vec::new(),
            phase: SessionPhase::Idle,
            reply_in_progress: false,
            settings,
        }
    }

    /// Identifies this transcript; a cleared chat gets a fresh one.
    pub fn transcript_id(&self) -> Uuid {
        self.transcript_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_awaiting(&self) -> bool {
        self.phase == SessionPhase::AwaitingResponse
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ChatSettings {
        &mut self.settings
    }

    /// The most recent `limit` messages, oldest first.
    pub fn recent_messages(&self, limit: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(limit);
        &self.messages[start..]
    }

    /// A new empty transcript keeping this session's settings.
    pub fn cleared(&self) -> Self {
        Self::new(self.settings.clone())
    }

    /// Accept a user message and start waiting for the reply.
    pub fn begin_turn(&mut self, text: &str) -> Result<(), SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if self.is_awaiting() {
            return Err(SessionError::Busy);
        }

        self.messages.push(ChatMessage::user(text));
        self.phase = SessionPhase::AwaitingResponse;
        self.reply_in_progress = false;
        Ok(())
    }

    /// Append a reply fragment to the in-progress assistant message.
    pub fn push_fragment(&mut self, fragment: &str) {
        if !self.is_awaiting() {
            return;
        }

        if self.reply_in_progress {
            if let Some(last) = self.messages.last_mut() {
                last.content.push_str(fragment);
            }
        } else {
            self.messages.push(ChatMessage::assistant(fragment));
            self.reply_in_progress = true;
        }
    }

    /// Close the turn successfully.
    pub fn finish_turn(&mut self) {
        if !self.is_awaiting() {
            return;
        }

        let has_text = self.reply_in_progress
            && self
                .messages
                .last()
                .is_some_and(|m| !m.content.trim().is_empty());

        if !has_text {
            self.settle_reply(EMPTY_REPLY);
        }
        self.end_turn();
    }

    /// Close the turn with the error notice in place of the reply.
    pub fn fail_turn(&mut self) {
        if !self.is_awaiting() {
            return;
        }

        self.settle_reply(ERROR_NOTICE);
        self.end_turn();
    }

    fn settle_reply(&mut self, content: &str) {
        if self.reply_in_progress {
            if let Some(last) = self.messages.last_mut() {
                last.content = content.to_string();
                return;
            }
        }
        self.messages.push(ChatMessage::assistant(content));
    }

    fn end_turn(&mut self) {
        self.phase = SessionPhase::Idle;
        self.reply_in_progress = false;
    }
}
