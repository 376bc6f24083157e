//! Mock for `POST /chat/completions`, matching the upstream shape the
//! gateway's OpenAI dispatcher posts to (`Authorization: Bearer`, JSON body).

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::routing::post;
use futures::stream;
use serde_json::{Value, json};

use super::{MockResponse, MockState, spawn};

pub struct OpenAiMock {
    pub base_url: String,
    state: Arc<MockState<Value>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl OpenAiMock {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let router = axum::Router::new()
            .route("/chat/completions", post(handle))
            .with_state(state.clone());
        let (base_url, handle) = spawn(router).await;

        Self {
            base_url,
            state,
            _handle: handle,
        }
    }

    /// Queue a single-choice completion with `content` as the assistant text.
    pub async fn queue_text_response(&self, model: &str, content: &str) {
        let body = json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "created": 0,
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
        });
        self.state.responses.lock().await.push(MockResponse::Json { status: 200, body });
    }

    /// Queue a tool-call completion, with `arguments` as a raw JSON-encoded string.
    pub async fn queue_tool_call_response(&self, model: &str, tool_name: &str, arguments: &str) {
        let body = json!({
            "id": "chatcmpl-mock-tool",
            "object": "chat.completion",
            "created": 0,
            "model": model,
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_mock",
                        "type": "function",
                        "function": {"name": tool_name, "arguments": arguments},
                    }],
                },
                "finish_reason": "tool_calls",
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
        });
        self.state.responses.lock().await.push(MockResponse::Json { status: 200, body });
    }

    /// Queue a streamed response: one SSE `data:` event per content delta,
    /// terminated by `[DONE]`.
    pub async fn queue_stream_response(&self, model: &str, deltas: &[&str]) {
        let mut events: Vec<String> = deltas
            .iter()
            .map(|delta| {
                json!({
                    "id": "chatcmpl-mock-stream",
                    "object": "chat.completion.chunk",
                    "created": 0,
                    "model": model,
                    "choices": [{"index": 0, "delta": {"content": delta}, "finish_reason": null}],
                })
                .to_string()
            })
            .collect();
        events.push(
            json!({
                "id": "chatcmpl-mock-stream",
                "object": "chat.completion.chunk",
                "created": 0,
                "model": model,
                "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
            })
            .to_string(),
        );
        events.push("[DONE]".to_string());
        self.state.responses.lock().await.push(MockResponse::Sse { events });
    }

    pub async fn queue_error(&self, status: u16, message: &str) {
        let body = json!({"error": {"message": message, "type": "invalid_request_error", "code": status}});
        self.state.responses.lock().await.push(MockResponse::Json { status, body });
    }

    /// All request bodies received so far, in order.
    pub async fn received_requests(&self) -> Vec<Value> {
        self.state.received.lock().await.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.call_count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

async fn handle(State(state): State<Arc<MockState<Value>>>, Json(body): Json<Value>) -> axum::response::Response {
    use axum::response::IntoResponse;

    state.received.lock().await.push(body);
    state.next_call_index();

    let queued = {
        let mut responses = state.responses.lock().await;
        if responses.is_empty() { None } else { Some(responses.remove(0)) }
    };
    match queued.unwrap_or_else(|| MockResponse::Json {
        status: 500,
        body: json!({"error": {"message": "no mock response queued", "type": "test_error", "code": 500}}),
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
