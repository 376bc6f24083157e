//! Mock for `POST /messages`, matching the upstream shape the gateway's
//! Anthropic dispatcher posts to (`x-api-key`/`anthropic-version` headers).

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::routing::post;
use futures::stream;
use serde_json::{Value, json};

use super::{MockResponse, MockState, spawn};

pub struct AnthropicMock {
    pub base_url: String,
    state: Arc<MockState<Request>>,
    _handle: tokio::task::JoinHandle<()>,
}

#[derive(Clone)]
pub struct Request {
    pub body: Value,
    pub api_key: Option<String>,
    pub anthropic_version: Option<String>,
}

impl AnthropicMock {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let router = axum::Router::new().route("/messages", post(handle)).with_state(state.clone());
        let (base_url, handle) = spawn(router).await;

        Self {
            base_url,
            state,
            _handle: handle,
        }
    }

    pub async fn queue_text_response(&self, model: &str, text: &str) {
        let body = json!({
            "id": "msg_mock",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": text}],
            "model": model,
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 10, "output_tokens": 5},
        });
        self.state.responses.lock().await.push(MockResponse::Json { status: 200, body });
    }

    pub async fn queue_tool_use_response(&self, model: &str, tool_name: &str, input: Value) {
        let body = json!({
            "id": "msg_mock_tool",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "tool_use", "id": "toolu_mock", "name": tool_name, "input": input}],
            "model": model,
            "stop_reason": "tool_use",
            "stop_sequence": null,
            "usage": {"input_tokens": 10, "output_tokens": 5},
        });
        self.state.responses.lock().await.push(MockResponse::Json { status: 200, body });
    }

    /// Queue a streamed response following the Anthropic event sequence:
    /// `message_start`, a `content_block_delta` per entry in `deltas`, then
    /// `message_delta`/`message_stop`.
    pub async fn queue_stream_response(&self, model: &str, deltas: &[&str]) {
        let mut events = vec![
            json!({
                "type": "message_start",
                "message": {
                    "id": "msg_mock_stream", "type": "message", "role": "assistant",
                    "content": [], "model": model, "stop_reason": null, "stop_sequence": null,
                    "usage": {"input_tokens": 10, "output_tokens": 0},
                },
            })
            .to_string(),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}).to_string(),
        ];
        for delta in deltas {
            events.push(
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": delta}}).to_string(),
            );
        }
        events.push(json!({"type": "content_block_stop", "index": 0}).to_string());
        events.push(json!({"type": "message_delta", "delta": {"stop_reason": "end_turn", "stop_sequence": null}, "usage": {"output_tokens": deltas.len()}}).to_string());
        events.push(json!({"type": "message_stop"}).to_string());

        self.state.responses.lock().await.push(MockResponse::Sse { events });
    }

    pub async fn queue_error(&self, status: u16, message: &str) {
        let body = json!({"type": "error", "error": {"type": "invalid_request_error", "message": message}});
        self.state.responses.lock().await.push(MockResponse::Json { status, body });
    }

    pub async fn received_requests(&self) -> Vec<Request> {
        self.state.received.lock().await.clone()
    }
}

async fn handle(State(state): State<Arc<MockState<Request>>>, headers: HeaderMap, Json(body): Json<Value>) -> axum::response::Response {
    use axum::response::IntoResponse;

    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string);
    let anthropic_version = headers.get("anthropic-version").and_then(|v| v.to_str().ok()).map(str::to_string);
    state.received.lock().await.push(Request {
        body,
        api_key,
        anthropic_version,
    });
    state.next_call_index();

    let queued = {
        let mut responses = state.responses.lock().await;
        if responses.is_empty() { None } else { Some(responses.remove(0)) }
    };

    match queued.unwrap_or_else(|| MockResponse::Json {
        status: 500,
        body: json!({"type": "error", "error": {"type": "test_error", "message": "no mock response queued"}}),
    }) {
        MockResponse::Json { status, body } => {
            (axum::http::StatusCode::from_u16(status).unwrap(), Json(body)).into_response()
        }
        MockResponse::Sse { events } => {
            let stream = stream::iter(events.into_iter().map(|data| Ok::<_, std::convert::Infallible>(Event::default().data(data))));
            Sse::new(stream).into_response()
        }
    }
}
