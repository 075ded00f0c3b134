//! Ollama API contract tests
//!
//! These tests run the client, model lister and relay against a mock Ollama
//! server and check the request shapes and transcript outcomes.

use flasq_core::{
    list_models_or_default, ChatMessage, ChatRelay, ChatRole, ChatSession, ChatSettings,
    InferenceClient, OllamaClient, TurnOutcome, ERROR_NOTICE,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DEFAULT_MODEL: &str = "llama3.2:1b";

fn client(server: &MockServer) -> InferenceClient {
    InferenceClient::Ollama(OllamaClient::new(&server.uri()))
}

fn session() -> ChatSession {
    ChatSession::new(ChatSettings::new(DEFAULT_MODEL, "You are Flasq."))
}

fn ndjson(chunks: &[(&str, bool)]) -> String {
    chunks
        .iter()
        .map(|(content, done)| {
            json!({
                "model": DEFAULT_MODEL,
                "message": {"role": "assistant", "content": content},
                "done": done
            })
            .to_string()
                + "\n"
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Model listing
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_models_preserves_server_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {"name": "qwen2.5:7b", "size": 1},
                {"name": "llama3.2:1b", "size": 2},
                {"name": "mistral:latest", "size": 3}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let choices = list_models_or_default(&client(&server), DEFAULT_MODEL).await;

    assert_eq!(choices.models, vec!["qwen2.5:7b", "llama3.2:1b", "mistral:latest"]);
    assert_eq!(choices.selected_model(), DEFAULT_MODEL);
    assert!(choices.reachable);
}

#[tokio::test]
async fn test_list_models_error_status_falls_back_to_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let choices = list_models_or_default(&client(&server), DEFAULT_MODEL).await;

    assert_eq!(choices.models, vec![DEFAULT_MODEL]);
    assert_eq!(choices.selected, 0);
    assert!(!choices.reachable);
}

#[tokio::test]
async fn test_list_models_malformed_body_falls_back_to_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
        .mount(&server)
        .await;

    let choices = list_models_or_default(&client(&server), DEFAULT_MODEL).await;
    assert_eq!(choices.models, vec![DEFAULT_MODEL]);
}

#[tokio::test]
async fn test_list_models_unreachable_server_falls_back_to_default() {
    let client = InferenceClient::Ollama(OllamaClient::new("http://127.0.0.1:9"));
    let choices = list_models_or_default(&client, DEFAULT_MODEL).await;

    assert_eq!(choices.models, vec![DEFAULT_MODEL]);
    assert!(!choices.reachable);
}

// ────────────────────────────────────────────────────────────────────────────
// Chat relay
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_streamed_fragments_concatenate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"stream": true, "model": DEFAULT_MODEL})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(ndjson(&[("Hel", false), ("lo", false), ("", true)]), "application/x-ndjson"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session();
    session.begin_turn("Say hello").unwrap();

    let mut fragments = Vec::new();
    let turn = ChatRelay::new(client(&server))
        .complete(session, true, |f| fragments.push(f.to_string()))
        .await;

    assert_eq!(turn.outcome, TurnOutcome::Replied);
    assert_eq!(fragments, vec!["Hel", "lo"]);
    assert_eq!(
        turn.session.messages(),
        &[ChatMessage::user("Say hello"), ChatMessage::assistant("Hello")]
    );
}

#[tokio::test]
async fn test_whole_reply_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": DEFAULT_MODEL,
            "stream": false,
            "messages": [
                {"role": "system", "content": "You are Flasq."},
                {"role": "user", "content": "What is Rust?"}
            ],
            "options": {"num_predict": 2048, "top_k": 40}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": DEFAULT_MODEL,
            "message": {"role": "assistant", "content": "A systems language."},
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session();
    session.begin_turn("What is Rust?").unwrap();
    let turn = ChatRelay::new(client(&server)).complete(session, false, |_| {}).await;

    assert_eq!(turn.outcome, TurnOutcome::Replied);
    assert_eq!(turn.session.messages()[1], ChatMessage::assistant("A systems language."));
}

#[tokio::test]
async fn test_error_status_appends_notice_and_keeps_user_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "model 'x' not found"})))
        .mount(&server)
        .await;

    let mut session = session();
    session.begin_turn("earlier").unwrap();
    session.push_fragment("reply");
    session.finish_turn();
    let before = session.messages().len();

    session.begin_turn("hello?").unwrap();
    let turn = ChatRelay::new(client(&server)).complete(session, true, |_| {}).await;

    let messages = turn.session.messages();
    assert_eq!(messages.len(), before + 2);
    assert_eq!(messages[before], ChatMessage::user("hello?"));
    assert_eq!(messages[before + 1], ChatMessage::assistant(ERROR_NOTICE));
    match turn.outcome {
        TurnOutcome::Failed { reason } => assert!(reason.contains("404")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_error_line_replaces_partial_reply() {
    let server = MockServer::start().await;
    let body = ndjson(&[("Partial", false)]) + "{\"error\":\"out of memory\"}\n";
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let mut session = session();
    session.begin_turn("hi").unwrap();
    let turn = ChatRelay::new(client(&server)).complete(session, true, |_| {}).await;

    assert!(matches!(turn.outcome, TurnOutcome::Failed { .. }));
    assert_eq!(turn.session.messages().len(), 2);
    assert_eq!(turn.session.messages()[1].content, ERROR_NOTICE);
}

#[tokio::test]
async fn test_successive_turns_alternate_roles() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(ndjson(&[("ok", false), ("", true)]), "application/x-ndjson"),
        )
        .expect(3)
        .mount(&server)
        .await;

    let relay = ChatRelay::new(client(&server));
    let mut session = session();
    for i in 0..3 {
        session.begin_turn(&format!("message {i}")).unwrap();
        session = relay.complete(session, true, |_| {}).await.session;
    }

    let messages = session.messages();
    assert_eq!(messages.len(), 6);
    for (i, message) in messages.iter().enumerate() {
        let expected = if i % 2 == 0 { ChatRole::User } else { ChatRole::Assistant };
        assert_eq!(message.role, expected);
    }
    assert_eq!(messages[4].content, "message 2");
}

#[tokio::test]
async fn test_history_is_sent_with_each_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "system", "content": "You are Flasq."},
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "one"},
                {"role": "user", "content": "second"}
            ]
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(ndjson(&[("two", true)]), "application/x-ndjson"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session();
    session.begin_turn("first").unwrap();
    session.push_fragment("one");
    session.finish_turn();
    session.begin_turn("second").unwrap();

    let turn = ChatRelay::new(client(&server)).complete(session, true, |_| {}).await;
    assert_eq!(turn.session.messages()[3], ChatMessage::assistant("two"));
}
