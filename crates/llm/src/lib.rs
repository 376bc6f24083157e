//! Multi-provider LLM gateway core: request translation, model routing,
//! streaming, and the handful of ambient endpoints (token counting, model
//! listing and capabilities) that sit alongside the two completion paths.

use std::{
    collections::VecDeque,
    convert::Infallible,
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    extract::{Json, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Sse, sse::Event},
    routing::{get, post},
};
use axum_serde::Sonic;
use futures::StreamExt;
use messages::{anthropic, openai};

mod channel;
mod error;
mod estimator;
mod http_client;
mod messages;
pub mod provider;
mod request;
mod router;
mod server;
mod session;
mod streaming;
mod tool_call_parser;
mod tool_name_mapper;

pub use error::{AnthropicResult, LlmError, LlmResult as Result};
use server::{GatewayState, ModelCapabilities};
use streaming::AnthropicStreamEmitter;

use crate::messages::unified;
use crate::provider::ChatCompletionStream;

/// Upstream chunks idle for longer than this close the stream with an error event.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Keepalive cadence for the Anthropic SSE `ping` event.
const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Creates an axum router for LLM endpoints.
pub async fn router(config: &config::Config) -> anyhow::Result<Router> {
    let state: Arc<GatewayState> = Arc::new(GatewayState::new(config)?);
    state.spawn_session_sweep();

    let mut router = Router::new();

    if config.llm.protocols.openai.enabled {
        let openai_routes = Router::new()
            .route("/v1/chat/completions", post(chat_completions))
            .route("/v1/models", get(list_models))
            .with_state(state.clone());

        router = router.nest(&config.llm.protocols.openai.path, openai_routes);
    }

    if config.llm.protocols.anthropic.enabled {
        let anthropic_routes = Router::new()
            .route("/v1/messages", post(anthropic_messages))
            .route("/v1/messages/count_tokens", post(count_tokens))
            .route("/v1/models", get(anthropic_list_models))
            .route("/v1/models/capabilities", get(model_capabilities))
            .with_state(state.clone());

        router = router.nest(&config.llm.protocols.anthropic.path, anthropic_routes);
    }

    Ok(router)
}

/// Handle chat completion requests.
///
/// This endpoint supports both streaming and non-streaming responses.
/// When `stream: true` is set in the request, the response is sent as
/// Server-Sent Events (SSE). Otherwise, a standard JSON response is returned.
async fn chat_completions(
    State(server): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Sonic(request): Sonic<openai::ChatCompletionRequest>,
) -> Result<impl IntoResponse> {
    log::debug!("OpenAI chat completions handler called for model: {}", request.model);
    log::debug!("Request has {} messages", request.messages.len());
    log::debug!("Streaming: {}", request.stream.unwrap_or(false));

    let context = request::extract_context(&headers, None);

    if request.stream.unwrap_or(false) {
        let unified_request = unified::UnifiedRequest::from(request);
        let stream = server.completions_stream(unified_request, &context).await?;

        let event_stream = idle_guarded(stream).map(move |result| {
            let event = match result {
                Ok(unified_chunk) => {
                    let openai_chunk = openai::ChatCompletionChunk::from(unified_chunk);
                    let json = sonic_rs::to_string(&openai_chunk).unwrap_or_else(|e| {
                        log::error!("Failed to serialize chunk: {e}");
                        r#"{"error":"serialization failed"}"#.to_string()
                    });

                    Event::default().data(json)
                }
                Err(e) => {
                    log::error!("Stream error: {e}");
                    Event::default().data(format!(r#"{{"error":"{e}"}}"#))
                }
            };

            Ok::<_, Infallible>(event)
        });

        let with_done = event_stream.chain(futures::stream::once(async { Ok::<_, Infallible>(Event::default().data("[DONE]")) }));

        log::debug!("Returning streaming response");
        Ok(sse_response(with_done))
    } else {
        let unified_request = unified::UnifiedRequest::from(request);
        let unified_response = server.completions(unified_request, &context).await?;
        let response = openai::ChatCompletionResponse::from(unified_response);

        log::debug!("Chat completion successful, returning response with {} choices", response.choices.len());

        Ok(Json(response).into_response())
    }
}

/// Handle list models requests.
async fn list_models(State(server): State<Arc<GatewayState>>) -> Result<impl IntoResponse> {
    let response = openai::ModelsResponse::from(server.models());

    log::debug!("Returning {} models", response.data.len());
    Ok(Json(response))
}

/// Handle Anthropic messages requests.
///
/// This endpoint supports both streaming and non-streaming responses.
/// When `stream: true` is set in the request, the response is sent as
/// Server-Sent Events (SSE). Otherwise, a standard JSON response is returned.
async fn anthropic_messages(
    State(server): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Sonic(request): Sonic<anthropic::AnthropicChatRequest>,
) -> AnthropicResult<impl IntoResponse> {
    log::debug!("Anthropic messages handler called for model: {}", request.model);
    log::debug!("Request has {} messages", request.messages.len());
    log::debug!("Streaming: {}", request.stream.unwrap_or(false));

    let context = request::extract_context(&headers, None);
    let unified_request = unified::UnifiedRequest::from(request);

    if unified_request.stream.unwrap_or(false) {
        let message_id = format!("msg_{}", uuid::Uuid::new_v4());
        let model = unified_request.model.clone();
        let stream = server.completions_stream(unified_request, &context).await?;
        let event_stream = anthropic_sse_stream(stream, message_id, model);

        log::debug!("Returning Anthropic streaming response");
        Ok(sse_response(event_stream))
    } else {
        let unified_response = server.completions(unified_request, &context).await?;
        let anthropic_response = anthropic::AnthropicChatResponse::from(unified_response);

        log::debug!("Anthropic messages completion successful");

        Ok(Json(anthropic_response).into_response())
    }
}

/// Handle `/v1/messages/count_tokens`: answered entirely from the local
/// token estimator, never forwarded upstream.
async fn count_tokens(Sonic(request): Sonic<CountTokensRequest>) -> AnthropicResult<impl IntoResponse> {
    let unified_request = unified::UnifiedRequest {
        model: request.model,
        messages: request.messages.into_iter().map(unified::UnifiedMessage::from).collect(),
        system: request.system,
        max_tokens: None,
        temperature: None,
        top_p: None,
        top_k: None,
        frequency_penalty: None,
        presence_penalty: None,
        stop_sequences: None,
        stream: None,
        tools: None,
        tool_choice: None,
        parallel_tool_calls: None,
        metadata: None,
        thinking: None,
    };

    let model = unified_request.model.clone();
    let input_tokens = estimator::count_request(&unified_request, &model);

    Ok(Json(CountTokensResponse { input_tokens }))
}

/// Body for `POST /v1/messages/count_tokens`.
#[derive(Debug, serde::Deserialize)]
struct CountTokensRequest {
    model: String,
    messages: Vec<anthropic::AnthropicMessage>,
    #[serde(default)]
    system: Option<String>,
}

#[derive(Debug, serde::Serialize)]
struct CountTokensResponse {
    input_tokens: u32,
}

/// Handle Anthropic list models requests.
async fn anthropic_list_models(State(server): State<Arc<GatewayState>>) -> AnthropicResult<impl IntoResponse> {
    let anthropic_response = anthropic::AnthropicModelsResponse::from(server.models());

    log::debug!("Returning {} models for Anthropic", anthropic_response.data.len());
    Ok(Json(anthropic_response))
}

/// `GET /v1/models/capabilities`.
async fn model_capabilities(State(server): State<Arc<GatewayState>>) -> Result<impl IntoResponse> {
    let capabilities: Vec<ModelCapabilities> = server.capabilities();
    Ok(Json(capabilities))
}

/// Wraps a chunk stream so that an upstream that goes silent for longer than
/// [`STREAM_IDLE_TIMEOUT`] closes with an error rather than hanging the
/// connection forever.
fn idle_guarded(stream: ChatCompletionStream) -> impl futures::Stream<Item = crate::Result<unified::UnifiedChunk>> {
    futures::stream::unfold(stream, |mut stream| async move {
        match tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.next()).await {
            Ok(Some(item)) => Some((item, stream)),
            Ok(None) => None,
            Err(_) => Some((Err(LlmError::UpstreamTimeout("upstream idle for too long".to_string())), stream)),
        }
    })
}

/// Folds a unified chunk stream into a conforming Anthropic SSE event
/// sequence, interleaving a `ping` event every [`PING_INTERVAL`] and closing
/// with an error event if the upstream goes idle for [`STREAM_IDLE_TIMEOUT`].
fn anthropic_sse_stream(
    stream: ChatCompletionStream,
    message_id: String,
    model: String,
) -> impl futures::Stream<Item = std::result::Result<Event, Infallible>> {
    struct State {
        stream: ChatCompletionStream,
        emitter: AnthropicStreamEmitter,
        model: String,
        pending: VecDeque<Event>,
        interval: tokio::time::Interval,
        done: bool,
    }

    let mut interval = tokio::time::interval(PING_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let state = State {
        stream,
        emitter: AnthropicStreamEmitter::new(message_id),
        model,
        pending: VecDeque::new(),
        interval,
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(to_sse_event(&event)), state));
            }

            if state.done {
                return None;
            }

            tokio::select! {
                biased;

                next = tokio::time::timeout(STREAM_IDLE_TIMEOUT, state.stream.next()) => match next {
                    Ok(Some(Ok(chunk))) => {
                        for event in state.emitter.translate(chunk) {
                            state.pending.push_back(event);
                        }
                        if state.pending.is_empty() {
                            continue;
                        }
                    }
                    Ok(Some(Err(err))) => {
                        log::error!("Stream error: {err}");
                        if let Some(event) = state.emitter.ensure_started(&state.model) {
                            state.pending.push_back(event);
                        }
                        let anthropic_error = anthropic::AnthropicError::from(err);
                        state.pending.push_back(anthropic::AnthropicStreamEvent::Error { error: anthropic_error.error });
                        state.done = true;
                    }
                    Ok(None) => {
                        state.done = true;
                        continue;
                    }
                    Err(_) => {
                        log::warn!("Anthropic stream idle for {:?}, closing", STREAM_IDLE_TIMEOUT);
                        if let Some(event) = state.emitter.ensure_started(&state.model) {
                            state.pending.push_back(event);
                        }
                        state.pending.push_back(anthropic::AnthropicStreamEvent::Error {
                            error: anthropic::AnthropicErrorDetails {
                                error_type: "timeout_error".to_string(),
                                message: "stream idle for too long".to_string(),
                            },
                        });
                        state.done = true;
                    }
                },
                _ = state.interval.tick() => {
                    state.pending.push_back(anthropic::AnthropicStreamEvent::Ping);
                }
            }
        }
    })
}

fn to_sse_event(event: &anthropic::AnthropicStreamEvent) -> Event {
    let event_name = match event {
        anthropic::AnthropicStreamEvent::MessageStart { .. } => "message_start",
        anthropic::AnthropicStreamEvent::ContentBlockStart { .. } => "content_block_start",
        anthropic::AnthropicStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        anthropic::AnthropicStreamEvent::ContentBlockStop { .. } => "content_block_stop",
        anthropic::AnthropicStreamEvent::MessageDelta { .. } => "message_delta",
        anthropic::AnthropicStreamEvent::MessageStop => "message_stop",
        anthropic::AnthropicStreamEvent::Ping => "ping",
        anthropic::AnthropicStreamEvent::Error { .. } => "error",
    };

    let json = sonic_rs::to_string(event).unwrap_or_else(|e| {
        log::error!("Failed to serialize Anthropic streaming event: {e}");
        r#"{"type":"error","error":{"type":"internal_error","message":"serialization failed"}}"#.to_string()
    });

    Event::default().event(event_name).data(json)
}

/// Builds an SSE response with the headers a reverse-proxy-fronted deployment
/// needs beyond what `axum::response::Sse` sets on its own, so buffering
/// proxies don't hold the stream open until it completes.
fn sse_response<S>(stream: S) -> axum::response::Response
where
    S: futures::Stream<Item = std::result::Result<Event, Infallible>> + Send + 'static,
{
    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}
