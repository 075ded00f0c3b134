//! Browser sessions, keyed by cookie.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use flasq_core::{ChatSession, ChatSettings, SessionError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "flasq_session";

/// Idle sessions older than this are dropped when new ones are opened.
const IDLE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

struct SessionEntry {
    session: ChatSession,
    last_seen: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TurnError {
    /// The id was never opened, or its session has been pruned.
    #[error("unknown session")]
    UnknownSession,
    #[error(transparent)]
    Rejected(#[from] SessionError),
}

/// What a submission asks to change before its turn starts.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub message: String,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Clone)]
pub struct SessionStore {
    defaults: ChatSettings,
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
}

impl SessionStore {
    pub fn new(defaults: ChatSettings) -> Self {
        Self {
            defaults,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Find the session for `id`, creating one if it is unknown.
    ///
    /// Returns the id in use, a snapshot of the session, and whether it was created.
    pub async fn open(&self, id: Option<&str>) -> (String, ChatSession, bool) {
        let mut sessions = self.sessions.lock().await;

        if let Some(id) = id {
            if let Some(entry) = sessions.get_mut(id) {
                entry.last_seen = Instant::now();
                return (id.to_string(), entry.session.clone(), false);
            }
        }

        prune_idle(&mut sessions);

        let id = Uuid::new_v4().to_string();
        let session = ChatSession::new(self.defaults.clone());
        sessions.insert(
            id.clone(),
            SessionEntry {
                session: session.clone(),
                last_seen: Instant::now(),
            },
        );
        debug!(session = %id, live = sessions.len(), "opened chat session");
        (id, session, true)
    }

    /// Apply the submission's settings and start its turn.
    ///
    /// The stored session stays `AwaitingResponse` until [`SessionStore::finish`]
    /// brings the relay's result back, which is what rejects overlapping turns.
    pub async fn begin_turn(&self, id: &str, request: &TurnRequest) -> Result<ChatSession, TurnError> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.get_mut(id).ok_or(TurnError::UnknownSession)?;
        entry.last_seen = Instant::now();

        let session = &mut entry.session;
        if session.is_awaiting() {
            return Err(SessionError::Busy.into());
        }

        let mut updated = session.clone();
        apply_settings(&mut updated, request);
        updated.begin_turn(&request.message)?;

        *session = updated.clone();
        Ok(updated)
    }

    /// Store a session coming back from the relay.
    ///
    /// Returns `false` when the transcript was cleared while the reply was in
    /// flight; the late reply is then discarded.
    pub async fn finish(&self, id: &str, session: ChatSession) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(id) {
            Some(entry) if entry.session.transcript_id() == session.transcript_id() => {
                entry.session = session;
                entry.last_seen = Instant::now();
                true
            }
            _ => {
                debug!(session = %id, "discarding reply for a cleared transcript");
                false
            }
        }
    }

    /// Start a fresh transcript for `id`, keeping its settings.
    pub async fn clear(&self, id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get_mut(id) {
            entry.session = entry.session.cleared();
            entry.last_seen = Instant::now();
        }
    }

    pub async fn snapshot(&self, id: &str) -> Option<ChatSession> {
        self.sessions.lock().await.get(id).map(|e| e.session.clone())
    }
}

fn apply_settings(session: &mut ChatSession, request: &TurnRequest) {
    let settings = session.settings_mut();
    if let Some(model) = request.model.as_deref().filter(|m| !m.trim().is_empty()) {
        settings.model = model.trim().to_string();
    }
    if let Some(prompt) = &request.system_prompt {
        settings.system_prompt = prompt.clone();
    }
    if let Some(temperature) = request.temperature {
        settings.set_temperature(temperature);
    }
}

fn prune_idle(sessions: &mut HashMap<String, SessionEntry>) {
    let before = sessions.len();
    sessions.retain(|_, entry| entry.session.is_awaiting() || entry.last_seen.elapsed() < IDLE_TTL);
    let pruned = before - sessions.len();
    if pruned > 0 {
        debug!(pruned, "pruned idle chat sessions");
    }
}

/// The session id carried by the request's cookie header, if any.
pub fn session_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(id: &str) -> String {
    format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn store() -> SessionStore {
        SessionStore::new(ChatSettings::new("llama3.2:1b", "sys"))
    }

    fn turn(message: &str) -> TurnRequest {
        TurnRequest {
            message: message.to_string(),
            ..TurnRequest::default()
        }
    }

    #[tokio::test]
    async fn test_open_creates_then_reuses() {
        let store = store();
        let (id, session, created) = store.open(None).await;
        assert!(created);
        assert!(session.messages().is_empty());

        let (same_id, _, created) = store.open(Some(&id)).await;
        assert!(!created);
        assert_eq!(same_id, id);

        let (other_id, _, created) = store.open(Some("stale-cookie")).await;
        assert!(created);
        assert_ne!(other_id, "stale-cookie");
    }

    #[tokio::test]
    async fn test_overlapping_turn_is_rejected() {
        let store = store();
        let (id, _, _) = store.open(None).await;

        let pending = store.begin_turn(&id, &turn("first")).await.unwrap();
        assert!(pending.is_awaiting());
        assert_eq!(
            store.begin_turn(&id, &turn("second")).await.unwrap_err(),
            TurnError::Rejected(SessionError::Busy)
        );

        let stored = store.snapshot(&id).await.unwrap();
        assert_eq!(stored.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_turn_leaves_store_untouched() {
        let store = store();
        let (id, _, _) = store.open(None).await;

        let err = store.begin_turn(&id, &turn("  ")).await.unwrap_err();
        assert_eq!(err, TurnError::Rejected(SessionError::EmptyMessage));
        assert!(!store.snapshot(&id).await.unwrap().is_awaiting());
    }

    #[tokio::test]
    async fn test_turn_for_unopened_session_is_refused() {
        let store = store();

        let err = store.begin_turn("never-opened", &turn("hi")).await.unwrap_err();
        assert_eq!(err, TurnError::UnknownSession);
        assert!(store.snapshot("never-opened").await.is_none());
    }

    #[tokio::test]
    async fn test_turn_applies_settings() {
        let store = store();
        let (id, _, _) = store.open(None).await;
        let request = TurnRequest {
            message: "hi".to_string(),
            model: Some("qwen2.5:7b".to_string()),
            system_prompt: Some("be terse".to_string()),
            temperature: Some(0.2),
        };

        let session = store.begin_turn(&id, &request).await.unwrap();
        assert_eq!(session.settings().model, "qwen2.5:7b");
        assert_eq!(session.settings().system_prompt, "be terse");
        assert_eq!(session.settings().temperature, 0.2);
    }

    #[tokio::test]
    async fn test_finish_stores_reply_and_unblocks() {
        let store = store();
        let (id, _, _) = store.open(None).await;

        let mut session = store.begin_turn(&id, &turn("hi")).await.unwrap();
        session.push_fragment("hello");
        session.finish_turn();
        assert!(store.finish(&id, session).await);

        let stored = store.snapshot(&id).await.unwrap();
        assert_eq!(stored.messages().len(), 2);
        assert!(store.begin_turn(&id, &turn("again")).await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_discards_late_reply() {
        let store = store();
        let (id, _, _) = store.open(None).await;

        let mut session = store.begin_turn(&id, &turn("hi")).await.unwrap();
        store.clear(&id).await;
        session.push_fragment("late");
        session.finish_turn();

        assert!(!store.finish(&id, session).await);
        let stored = store.snapshot(&id).await.unwrap();
        assert!(stored.messages().is_empty());
        assert!(!stored.is_awaiting());
    }

    #[test]
    fn test_session_id_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; flasq_session=abc-123; x=y"));
        assert_eq!(session_id_from(&headers).as_deref(), Some("abc-123"));

        headers.insert(COOKIE, HeaderValue::from_static("flasq_session="));
        assert_eq!(session_id_from(&headers), None);
        assert_eq!(session_id_from(&HeaderMap::new()), None);
    }
}
