//! Gateway-wide state and request handling: channel selection, routing,
//! provider dispatch, and optional session-store bookkeeping, wired
//! together behind one `GatewayState` shared across requests.

use std::sync::Arc;

use config::{LlmConfig, ProviderKind};

use crate::messages::unified::{
    UnifiedContentContainer, UnifiedMessage, UnifiedModel, UnifiedModelsResponse, UnifiedObjectType, UnifiedRequest,
    UnifiedResponse, UnifiedRole,
};
use crate::provider::{self, ChatCompletionStream};
use crate::request::RequestContext;
use crate::router::{self, RoutingDecision};
use crate::session::SessionStore;
use crate::{channel, estimator};

pub(crate) struct GatewayState {
    config: LlmConfig,
    sessions: Option<SessionStore>,
}

impl GatewayState {
    pub(crate) fn new(config: &config::Config) -> anyhow::Result<Self> {
        config.validate()?;

        let sessions = config.llm.session.enabled.then(|| SessionStore::new(config.llm.session.clone()));

        Ok(Self {
            config: config.llm.clone(),
            sessions,
        })
    }

    pub(crate) fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Spawns the periodic TTL sweep as a background task tied to this
    /// state's lifetime. No-op when the session store is disabled.
    pub(crate) fn spawn_session_sweep(self: &Arc<Self>) {
        let Some(ttl) = self.sessions.is_some().then(|| self.config.session.ttl_seconds) else {
            return;
        };
        // Sweep at a quarter of the TTL so an idle session is never retained
        // much longer than configured, without scanning on every request.
        let period = std::time::Duration::from_secs((ttl / 4).max(1));
        let state = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Some(store) = &state.sessions {
                    let removed = store.sweep_expired();
                    if removed > 0 {
                        log::debug!("session TTL sweep evicted {removed} idle session(s)");
                    }
                }
            }
        });
    }

    /// Route, select a channel, apply session history, and issue a unary
    /// completion request.
    pub(crate) async fn completions(&self, request: UnifiedRequest, context: &RequestContext) -> crate::Result<UnifiedResponse> {
        let (decision, channel_name, channel) = self.prepare(&request, context)?;
        log::debug!(
            "routing request to model '{}' via channel '{channel_name}' (strategy: {})",
            decision.routed_model,
            decision.strategy_id
        );

        let mut request = self.apply_session_history(request, context);
        request.model = decision.routed_model;

        let span = context.new_span("llm:chat_completion");
        span.add_property(|| ("gen_ai.request.model", request.model.clone()));
        span.add_property(|| ("gen_ai.system", channel.provider.to_string()));

        let response = {
            use fastrace::future::FutureExt;
            provider::dispatch(channel, &self.config.router, request.clone(), context)
                .in_span(span)
                .await?
        };

        if let Some(store) = &self.sessions {
            record_turn(store, context, &request, &response);
        }

        Ok(response)
    }

    /// Same as [`Self::completions`] but returns a stream of unified chunks
    /// for the caller to fold into its own wire dialect's SSE shape.
    pub(crate) async fn completions_stream(
        &self,
        request: UnifiedRequest,
        context: &RequestContext,
    ) -> crate::Result<ChatCompletionStream> {
        let (decision, channel_name, channel) = self.prepare(&request, context)?;
        log::debug!(
            "routing streaming request to model '{}' via channel '{channel_name}' (strategy: {})",
            decision.routed_model,
            decision.strategy_id
        );

        let mut request = self.apply_session_history(request, context);
        request.model = decision.routed_model;

        let span = context.new_span("llm:chat_completion_stream");
        span.add_property(|| ("gen_ai.request.model", request.model.clone()));
        span.add_property(|| ("gen_ai.system", channel.provider.to_string()));

        use fastrace::future::FutureExt;
        provider::dispatch_stream(channel, &self.config.router, request, context)
            .in_span(span)
            .await
    }

    fn prepare<'a>(
        &'a self,
        request: &UnifiedRequest,
        context: &RequestContext,
    ) -> crate::Result<(RoutingDecision, &'a str, &'a config::ChannelConfig)> {
        let decision = router::route(request, &self.config.router);
        let (channel_name, channel) = channel::select(&self.config, context, &decision.routed_model, decision.provider_override)?;
        Ok((decision, channel_name, channel))
    }

    /// If the session store is enabled and the caller sent a single new
    /// turn (the common "continue this conversation" shape), prepend the
    /// session's retained history. Callers that already resend full history
    /// themselves are left untouched — recording still happens so a future
    /// single-turn call from the same `(project_path, user_id)` picks up
    /// where this one left off.
    fn apply_session_history(&self, mut request: UnifiedRequest, context: &RequestContext) -> UnifiedRequest {
        let Some(store) = &self.sessions else {
            return request;
        };

        if request.messages.len() > 1 {
            return request;
        }

        let session = store.get_or_create(&context.project_path, &context.user_id);
        if session.messages.is_empty() {
            return request;
        }

        let mut history = session.messages;
        history.extend(request.messages.drain(..));
        request.messages = history;
        request
    }

    /// Build the combined model listing across all configured channels plus
    /// the router's named aliases.
    pub(crate) fn models(&self) -> UnifiedModelsResponse {
        let mut models = Vec::new();

        for (channel_name, channel) in &self.config.providers {
            if !channel.enabled {
                continue;
            }
            for model_id in channel.models_mapping.keys() {
                if channel.model_filter.as_ref().is_some_and(|filter| !filter.is_match(model_id)) {
                    continue;
                }
                models.push(UnifiedModel {
                    id: model_id.clone(),
                    object_type: UnifiedObjectType::Model,
                    display_name: model_id.clone(),
                    created: 0,
                    owned_by: channel_name.clone(),
                });
            }
        }

        for (alias, description) in router_aliases(&self.config.router) {
            models.push(UnifiedModel {
                id: alias.to_string(),
                object_type: UnifiedObjectType::Model,
                display_name: format!("{alias} ({description})"),
                created: 0,
                owned_by: "router".to_string(),
            });
        }

        UnifiedModelsResponse {
            object_type: UnifiedObjectType::List,
            models,
            has_more: false,
        }
    }

    /// Per-model capability facts driving `GET /v1/models/capabilities`,
    /// derived from the same router configuration the strategy chain
    /// itself reads, so the two are never inconsistent.
    pub(crate) fn capabilities(&self) -> Vec<ModelCapabilities> {
        let mut out = Vec::new();

        for (channel_name, channel) in &self.config.providers {
            if !channel.enabled {
                continue;
            }
            for model_id in channel.models_mapping.keys() {
                if channel.model_filter.as_ref().is_some_and(|filter| !filter.is_match(model_id)) {
                    continue;
                }
                out.push(ModelCapabilities::for_provider(model_id.clone(), channel_name.clone(), channel.provider));
            }
        }

        out
    }
}

/// `{model id, provider, supports_tools, supports_thinking, supports_vision, context_window}` for a routable model.
#[derive(Debug, Clone, serde::Serialize)]
pub(crate) struct ModelCapabilities {
    pub model: String,
    pub provider: String,
    pub supports_tools: bool,
    pub supports_thinking: bool,
    pub supports_vision: bool,
    pub context_window: u32,
}

impl ModelCapabilities {
    fn for_provider(model: String, provider_name: String, provider: ProviderKind) -> Self {
        let (supports_thinking, context_window) = match provider {
            ProviderKind::Anthropic => (true, 200_000),
            ProviderKind::Openai => (false, 128_000),
            ProviderKind::Google => (false, 1_000_000),
        };

        Self {
            model,
            provider: provider_name,
            supports_tools: true,
            supports_thinking,
            supports_vision: true,
            context_window,
        }
    }
}

fn router_aliases(config: &config::RouterConfig) -> Vec<(&'static str, &'static str)> {
    let mut aliases = Vec::new();
    if config.default.is_some() {
        aliases.push(("default", "default fallback"));
    }
    if config.background.is_some() {
        aliases.push(("background", "small/cheap model"));
    }
    if config.think.is_some() {
        aliases.push(("think", "reasoning model"));
    }
    if config.long_context.is_some() {
        aliases.push(("long_context", "long-context model"));
    }
    if config.web_search.is_some() {
        aliases.push(("web_search", "web-search-capable model"));
    }
    if config.tool_use.is_some() {
        aliases.push(("tool_use", "tool-capable model"));
    }
    aliases
}

fn record_turn(store: &SessionStore, context: &RequestContext, request: &UnifiedRequest, response: &UnifiedResponse) {
    let model = request.model.clone();

    if let Some(last) = request.messages.last() {
        let tokens = estimator::count_text(&message_text(last), &model);
        if let Err(err) = store.append(&context.project_path, &context.user_id, last.clone(), tokens) {
            log::warn!("failed to record inbound turn in session store: {err}");
        }
    }

    let Some(choice) = response.choices.first() else { return };
    if let Err(err) = store.append(
        &context.project_path,
        &context.user_id,
        choice.message.clone(),
        response.usage.completion_tokens,
    ) {
        log::warn!("failed to record outbound turn in session store: {err}");
    }
}

fn message_text(message: &UnifiedMessage) -> String {
    match &message.content {
        UnifiedContentContainer::Text(text) => text.clone(),
        UnifiedContentContainer::Blocks(_) => String::new(),
    }
}

/// Shared app state handed to every axum handler.
pub(crate) type SharedState = Arc<GatewayState>;

#[cfg(test)]
mod tests {
    use super::*;

    fn config_without_session() -> config::Config {
        toml::from_str(indoc::indoc! {r#"
            [llm.providers.default]
            provider = "openai"
            api_key = "sk-test"

            [llm.router]
            default = "gpt-4o"
        "#})
        .unwrap()
    }

    #[test]
    fn models_lists_configured_aliases() {
        let config = config_without_session();
        let state = GatewayState::new(&config).unwrap();
        let models = state.models();
        assert!(models.models.iter().any(|m| m.id == "default"));
    }

    #[test]
    fn capabilities_marks_anthropic_models_as_thinking_capable() {
        let config: config::Config = toml::from_str(indoc::indoc! {r#"
            [llm.providers.default]
            provider = "anthropic"
            api_key = "sk-test"

            [llm.providers.default.models_mapping.claude]
        "#})
        .unwrap();
        let state = GatewayState::new(&config).unwrap();
        let caps = state.capabilities();
        assert!(caps.iter().any(|c| c.model == "claude" && c.supports_thinking));
    }

    #[test]
    fn session_disabled_leaves_messages_untouched() {
        let config = config_without_session();
        let state = GatewayState::new(&config).unwrap();
        let request = UnifiedRequest {
            model: "gpt-4o".to_string(),
            messages: vec![UnifiedMessage {
                role: UnifiedRole::User,
                content: UnifiedContentContainer::Text("hi".to_string()),
                tool_calls: None,
                tool_call_id: None,
            }],
            system: None,
            max_tokens: Some(100),
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
        let context = RequestContext::default();
        let result = state.apply_session_history(request, &context);
        assert_eq!(result.messages.len(), 1);
    }
}
