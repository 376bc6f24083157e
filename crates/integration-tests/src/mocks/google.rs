//! Mock for `POST /models/{model}:generateContent` and the `:streamGenerateContent`
//! variant, matching Gemini's URL-addressed model/key convention.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::routing::post;
use futures::stream;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{MockResponse, MockState, spawn};

pub struct GoogleMock {
    pub base_url: String,
    state: Arc<MockState<Request>>,
    _handle: tokio::task::JoinHandle<()>,
}

#[derive(Clone)]
pub struct Request {
    pub model_and_action: String,
    pub api_key: Option<String>,
    pub body: Value,
}

#[derive(Deserialize)]
struct KeyParam {
    key: Option<String>,
}

impl GoogleMock {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let router = axum::Router::new()
            .route("/models/{model_and_action}", post(handle))
            .with_state(state.clone());
        let (base_url, handle) = spawn(router).await;

        Self {
            base_url,
            state,
            _handle: handle,
        }
    }

    pub async fn queue_text_response(&self, text: &str) {
        let body = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP",
                "index": 0,
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15},
        });
        self.state.responses.lock().await.push(MockResponse::Json { status: 200, body });
    }

    pub async fn queue_stream_response(&self, deltas: &[&str]) {
        let events = deltas
            .iter()
            .map(|delta| {
                json!({
                    "candidates": [{"content": {"role": "model", "parts": [{"text": delta}]}, "index": 0}],
                })
                .to_string()
            })
            .collect();
        self.state.responses.lock().await.push(MockResponse::Sse { events });
    }

    pub async fn queue_error(&self, status: u16, message: &str) {
        let body = json!({"error": {"code": status, "message": message, "status": "INVALID_ARGUMENT"}});
        self.state.responses.lock().await.push(MockResponse::Json { status, body });
    }

    pub async fn received_requests(&self) -> Vec<Request> {
        self.state.received.lock().await.clone()
    }
}

async fn handle(
    State(state): State<Arc<MockState<Request>>>,
    Path(model_and_action): Path<String>,
    Query(params): Query<KeyParam>,
    Json(body): Json<Value>,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    state.received.lock().await.push(Request {
        model_and_action,
        api_key: params.key,
        body,
    });
    state.next_call_index();

    let queued = {
        let mut responses = state.responses.lock().await;
        if responses.is_empty() { None } else { Some(responses.remove(0)) }
    };

    match queued.unwrap_or_else(|| MockResponse::Json {
        status: 500,
        body: json!({"error": {"code": 500, "message": "no mock response queued", "status": "INTERNAL"}}),
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
