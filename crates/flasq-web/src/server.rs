//! The chat page and the endpoints its form posts to.
//!
//! ## Routes
//!
//! - `GET /`: render the page for this browser's session
//! - `POST /chat`: submit a message without JavaScript (whole reply, then redirect)
//! - `POST /chat/stream`: submit a message and stream the reply as SSE
//! - `POST /clear`: start a fresh transcript

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use flasq_core::{
    list_models_or_default, ChatRelay, ChatSession, ChatSettings, Config, InferenceClient,
    SessionError, TurnOutcome, ERROR_NOTICE,
};
use futures_util::stream::Stream;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use crate::page::{PageRenderer, PageView};
use crate::sessions::{session_cookie, session_id_from, SessionStore, TurnError, TurnRequest};

const BUSY_NOTICE: &str = "A reply is still being generated. Please wait for it to finish.";
const EMPTY_NOTICE: &str = "Please enter a message.";
const EXPIRED_NOTICE: &str = "Your session has expired. Please reload the page.";

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    relay: ChatRelay,
    sessions: SessionStore,
    pages: Arc<PageRenderer>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, minijinja::Error> {
        let client = InferenceClient::from_config(&config);
        let defaults = ChatSettings::new(config.default_model.as_str(), config.system_prompt.as_str());

        let mut relay = ChatRelay::new(client);
        if let Some(limit) = config.history_limit() {
            relay = relay.with_history_window(limit);
        }

        Ok(Self {
            relay,
            sessions: SessionStore::new(defaults),
            pages: Arc::new(PageRenderer::new()?),
            config: Arc::new(config),
        })
    }
}

/// Fields posted by the chat form.
#[derive(Debug, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    message: String,
    model: Option<String>,
    system_prompt: Option<String>,
    temperature: Option<f32>,
}

impl From<ChatForm> for TurnRequest {
    fn from(form: ChatForm) -> Self {
        TurnRequest {
            message: form.message,
            model: form.model,
            system_prompt: form.system_prompt,
            temperature: form.temperature,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/chat", post(handle_chat))
        .route("/chat/stream", post(handle_chat_stream))
        .route("/clear", post(handle_clear))
        .with_state(state)
}

/// Bind `{host}:{port}` and serve until the process exits.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    let addr: SocketAddr = listener.local_addr()?;

    info!(
        "{} listening on http://{addr} (model server: {})",
        state.config.app_name.as_str(),
        state.config.ollama_base_url.as_str()
    );

    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn with_session_cookie(mut response: Response, id: &str, created: bool) -> Response {
    if created {
        match HeaderValue::from_str(&session_cookie(id)) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "could not encode session cookie"),
        }
    }
    response
}

async fn render_page(state: &AppState, session: &ChatSession, notice: Option<&str>) -> Response {
    let choices = list_models_or_default(state.relay.client(), state.config.default_model.as_str())
        .await
        .prefer(&session.settings().model);

    let server_name = state.relay.client().provider().display_name();
    let view = PageView::new(&state.config, server_name, &choices, session, notice);

    match state.pages.render(&view) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!(error = %e, "failed to render chat page");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render page").into_response()
        }
    }
}

fn sse_text(name: &'static str, text: &str) -> Event {
    // JSON keeps newlines in model output from splitting the SSE data field.
    let data = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string());
    Event::default().event(name).data(data)
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// `GET /`: the chat page.
async fn handle_index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let cookie = session_id_from(&headers);
    let (id, session, created) = state.sessions.open(cookie.as_deref()).await;

    let response = render_page(&state, &session, None).await;
    with_session_cookie(response, &id, created)
}

/// `POST /chat`: form submission without JavaScript.
async fn handle_chat(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<ChatForm>) -> Response {
    let cookie = session_id_from(&headers);
    let (id, _, created) = state.sessions.open(cookie.as_deref()).await;

    let session = match state.sessions.begin_turn(&id, &form.into()).await {
        Ok(session) => session,
        Err(TurnError::UnknownSession) => {
            return with_session_cookie(Redirect::to("/").into_response(), &id, created);
        }
        Err(TurnError::Rejected(e)) => {
            let notice = match e {
                SessionError::Busy => BUSY_NOTICE,
                SessionError::EmptyMessage => EMPTY_NOTICE,
            };
            let current = state.sessions.snapshot(&id).await;
            let response = match current {
                Some(session) => render_page(&state, &session, Some(notice)).await,
                None => Redirect::to("/").into_response(),
            };
            return with_session_cookie(response, &id, created);
        }
    };

    let fallback = session.clone();
    let handle = spawn_turn(&state, &id, session, false, |_| {});
    settle_turn(&state, &id, fallback, handle).await;

    with_session_cookie(Redirect::to("/").into_response(), &id, created)
}

/// `POST /chat/stream`: submission whose reply streams back as SSE.
///
/// Emits `fragment` events as text arrives, then a single `done` or `failed`
/// event carrying the final assistant message.
async fn handle_chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ChatForm>,
) -> Response {
    let cookie = session_id_from(&headers);
    let (id, _, created) = state.sessions.open(cookie.as_deref()).await;

    let session = match state.sessions.begin_turn(&id, &form.into()).await {
        Ok(session) => session,
        Err(TurnError::Rejected(SessionError::Busy)) => {
            return with_session_cookie((StatusCode::CONFLICT, BUSY_NOTICE).into_response(), &id, created);
        }
        Err(TurnError::Rejected(SessionError::EmptyMessage)) => {
            return with_session_cookie((StatusCode::BAD_REQUEST, EMPTY_NOTICE).into_response(), &id, created);
        }
        Err(TurnError::UnknownSession) => {
            return with_session_cookie((StatusCode::GONE, EXPIRED_NOTICE).into_response(), &id, created);
        }
    };

    let stream = relay_events(state, id.clone(), session);
    let response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    with_session_cookie(response, &id, created)
}

/// Relay a turn on its own task and store the result from there.
///
/// The request that started the turn may be dropped at any point (the browser
/// navigated away, the connection closed); the session still goes back to
/// idle. Resolves to the outcome and the final assistant message.
fn spawn_turn<F>(
    state: &AppState,
    id: &str,
    session: ChatSession,
    stream: bool,
    on_fragment: F,
) -> JoinHandle<(TurnOutcome, String)>
where
    F: FnMut(&str) + Send + 'static,
{
    let state = state.clone();
    let id = id.to_string();

    tokio::spawn(async move {
        let turn = state.relay.complete(session, stream, on_fragment).await;
        let reply = turn
            .session
            .messages()
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        state.sessions.finish(&id, turn.session).await;
        (turn.outcome, reply)
    })
}

/// Wait for a turn task. If the task died before storing its session, store
/// `pending` failed instead so the session does not stay busy.
async fn settle_turn(
    state: &AppState,
    id: &str,
    pending: ChatSession,
    handle: JoinHandle<(TurnOutcome, String)>,
) -> (TurnOutcome, String) {
    match handle.await {
        Ok(result) => result,
        Err(e) => {
            error!(session = %id, error = %e, "chat relay task failed");
            let mut session = pending;
            session.fail_turn();
            state.sessions.finish(id, session).await;
            (TurnOutcome::Failed { reason: e.to_string() }, ERROR_NOTICE.to_string())
        }
    }
}

/// Run the turn and turn its progress into SSE events.
///
/// Emits `fragment` events while the reply streams, then `done` or `failed`.
fn relay_events(
    state: AppState,
    id: String,
    session: ChatSession,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();

    let fragments = tx.clone();
    let pending = session.clone();
    let handle = spawn_turn(&state, &id, session, true, move |fragment| {
        let _ = fragments.send(sse_text("fragment", fragment));
    });

    tokio::spawn(async move {
        let (outcome, reply) = settle_turn(&state, &id, pending, handle).await;
        let event = match outcome {
            TurnOutcome::Replied => sse_text("done", &reply),
            TurnOutcome::Failed { .. } => sse_text("failed", &reply),
        };
        let _ = tx.send(event);
    });

    UnboundedReceiverStream::new(rx).map(Ok)
}

/// `POST /clear`: begin a new, empty transcript.
async fn handle_clear(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(id) = session_id_from(&headers) {
        state.sessions.clear(&id).await;
    }
    Redirect::to("/").into_response()
}
