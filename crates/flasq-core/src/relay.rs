//! Forwarding a session's turn to the inference server.

use tracing::{debug, warn};

use crate::ai::{ChatRequest, InferenceClient, WireMessage};
use crate::state::ChatSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Replied,
    Failed { reason: String },
}

/// A session handed back by the relay, idle again.
#[derive(Debug, Clone)]
pub struct CompletedTurn {
    pub session: ChatSession,
    pub outcome: TurnOutcome,
}

#[derive(Clone)]
pub struct ChatRelay {
    client: InferenceClient,
    history_window: Option<usize>,
}

impl ChatRelay {
    pub fn new(client: InferenceClient) -> Self {
        Self {
            client,
            history_window: None,
        }
    }

    /// Send only the last `history_window` transcript messages instead of the
    /// whole transcript. The pending user message is always included.
    pub fn with_history_window(mut self, history_window: usize) -> Self {
        self.history_window = Some(history_window.max(1));
        self
    }

    pub fn client(&self) -> &InferenceClient {
        &self.client
    }

    /// Build the server request for the session's pending turn.
    pub fn request_for(&self, session: &ChatSession) -> ChatRequest {
        let settings = session.settings();

        let history = match self.history_window {
            Some(limit) => session.recent_messages(limit),
            None => session.messages(),
        };

        let mut messages = Vec::with_capacity(history.len() + 1);
        if !settings.system_prompt.trim().is_empty() {
            messages.push(WireMessage::new("system", &settings.system_prompt));
        }
        messages.extend(history.iter().map(|m| WireMessage::new(m.role.as_str(), &m.content)));

        ChatRequest {
            model: settings.model.clone(),
            messages,
            temperature: settings.temperature,
        }
    }

    /// Complete the turn begun with [`ChatSession::begin_turn`].
    ///
    /// With `stream` set, every fragment is appended to the in-progress reply
    /// and passed to `on_fragment` as it arrives; otherwise the whole reply is
    /// delivered as one fragment. Failures never escape: the session comes back
    /// with the error notice as its reply.
    pub async fn complete<F>(&self, mut session: ChatSession, stream: bool, mut on_fragment: F) -> CompletedTurn
    where
        F: FnMut(&str) + Send,
    {
        if !session.is_awaiting() {
            return CompletedTurn {
                session,
                outcome: TurnOutcome::Replied,
            };
        }

        let request = self.request_for(&session);
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            stream,
            "relaying chat turn"
        );

        let result = if stream {
            self.client
                .chat_stream(&request, |fragment| {
                    session.push_fragment(fragment);
                    on_fragment(fragment);
                })
                .await
        } else {
            self.client.chat(&request).await.map(|reply| {
                if !reply.is_empty() {
                    session.push_fragment(&reply);
                    on_fragment(&reply);
                }
            })
        };

        let outcome = match result {
            Ok(()) => {
                session.finish_turn();
                TurnOutcome::Replied
            }
            Err(e) => {
                warn!(model = %request.model, error = %e, "chat request failed");
                session.fail_turn();
                TurnOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        CompletedTurn { session, outcome }
    }
}
