//! Per-dialect upstream dispatch.
//!
//! Each submodule speaks one wire dialect directly against its upstream
//! (Anthropic Messages, OpenAI Chat Completions, Google `generateContent`)
//! using the [`messages`](crate::messages) conversions — there is no
//! provider-private wire-type layer duplicating what `messages` already
//! models.

pub(crate) mod anthropic;
pub(crate) mod google;
pub(crate) mod openai;

use std::pin::Pin;

use config::ChannelConfig;
use futures::Stream;

use crate::messages::unified::{UnifiedChunk, UnifiedRequest, UnifiedResponse};
use crate::request::RequestContext;

pub(crate) type ChatCompletionStream = Pin<Box<dyn Stream<Item = crate::Result<UnifiedChunk>> + Send>>;

/// Send a unified request to a channel's upstream and translate the reply
/// back to unified form.
pub(crate) async fn dispatch(
    channel: &ChannelConfig,
    router_config: &config::RouterConfig,
    request: UnifiedRequest,
    context: &RequestContext,
) -> crate::Result<UnifiedResponse> {
    match channel.provider {
        config::ProviderKind::Anthropic => anthropic::chat_completion(channel, request, context).await,
        config::ProviderKind::Openai => openai::chat_completion(channel, router_config, request, context).await,
        config::ProviderKind::Google => google::chat_completion(channel, request, context).await,
    }
}

/// Send a unified request to a channel's upstream and return a stream of
/// unified chunks.
pub(crate) async fn dispatch_stream(
    channel: &ChannelConfig,
    router_config: &config::RouterConfig,
    request: UnifiedRequest,
    context: &RequestContext,
) -> crate::Result<ChatCompletionStream> {
    match channel.provider {
        config::ProviderKind::Anthropic => anthropic::chat_completion_stream(channel, request, context).await,
        config::ProviderKind::Openai => openai::chat_completion_stream(channel, router_config, request, context).await,
        config::ProviderKind::Google => google::chat_completion_stream(channel, request, context).await,
    }
}

/// Map a `reqwest` transport failure onto our error taxonomy, distinguishing
/// a timed-out round trip from any other connection failure.
pub(crate) fn connection_error(provider: &str, err: reqwest::Error) -> crate::error::LlmError {
    use crate::error::LlmError;

    if err.is_timeout() {
        LlmError::UpstreamTimeout(format!("{provider} request timed out: {err}"))
    } else {
        LlmError::ConnectionError(format!("Failed to reach {provider}: {err}"))
    }
}

/// Map an HTTP status code from an upstream provider onto our error taxonomy.
pub(crate) fn status_to_error(status: u16, body: String) -> crate::error::LlmError {
    use crate::error::LlmError;

    match status {
        401 => LlmError::AuthenticationFailed(body),
        403 => LlmError::InsufficientQuota(body),
        404 => LlmError::ModelNotFound(body),
        429 => LlmError::RateLimitExceeded { message: body },
        400 => LlmError::InvalidRequest(body),
        500..=599 => LlmError::InternalError(Some(body)),
        _ => LlmError::ProviderApiError { status, message: body },
    }
}
