//! Content-aware model routing.
//!
//! Decides which configured model alias a request should actually target,
//! independent of which upstream channel ultimately serves it (see
//! [`crate::channel`] for that half). Strategies run in a fixed order; the
//! first one that matches wins and the rest are skipped.

use config::{ProviderKind, RouterConfig};

use crate::estimator;
use crate::messages::unified::{UnifiedContentContainer, UnifiedRequest};

/// The outcome of a routing decision, carried alongside the request for
/// logging — every field here is meant to show up in a structured log line
/// explaining why a particular backend model was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RoutingDecision {
    /// The model name the caller originally sent.
    pub original_model: String,
    /// The model name the gateway will dispatch with.
    pub routed_model: String,
    /// Human-readable explanation, identical to `strategy_id` in this
    /// implementation — kept as two fields to match what gets logged.
    pub reason: &'static str,
    /// The strategy that produced this decision.
    pub strategy_id: &'static str,
    pub token_count: u32,
    pub has_tools: bool,
    pub has_thinking: bool,
    pub message_count: usize,
    /// Set only by the `/model provider,name` command: restricts channel
    /// selection to channels speaking this dialect, overriding the
    /// caller-key-based eligibility channel selection would otherwise use
    /// alone.
    pub provider_override: Option<ProviderKind>,
}

const ALIASES: &[&str] = &["default", "background", "think", "long_context", "web_search"];

/// `claude-3-5-haiku` and equivalents are the usual "small model" markers a
/// caller sends when it wants background/cheap routing without spelling out
/// the `background` alias.
const BACKGROUND_MODEL_MARKERS: &[&str] = &["claude-3-5-haiku", "claude-3-haiku", "gpt-4o-mini", "gpt-3.5"];

/// Route a request to a concrete model name, running the seven-strategy
/// chain in order: an inline `/model provider,name` command overrides
/// everything; then an explicit comma-separated list; a literal alias
/// naming one of the configured router slots; tool-use; long-context;
/// web-search; background; thinking; and finally the configured default.
pub(crate) fn route(request: &UnifiedRequest, config: &RouterConfig) -> RoutingDecision {
    let token_count = estimator::count_input_tokens(request);
    let has_tools = request.tools.as_ref().is_some_and(|tools| !tools.is_empty());
    let has_thinking = request.thinking.unwrap_or(false);
    let message_count = request.messages.len();

    let decide = |routed_model: String, reason: &'static str| RoutingDecision {
        original_model: request.model.clone(),
        routed_model,
        reason,
        strategy_id: reason,
        token_count,
        has_tools,
        has_thinking,
        message_count,
        provider_override: None,
    };

    if let Some((model, provider)) = model_command_override(request) {
        let mut decision = decide(model, "model_command");
        decision.provider_override = provider;
        return decision;
    }

    if let Some(model) = pass_through_comma_list(request) {
        return decide(model, "comma_separated_models");
    }

    if let Some(model) = literal_alias(request, config) {
        return decide(model, "explicit_alias");
    }

    if config.enable_tool_use_detection
        && has_tools
        && let Some(model) = config.tool_use.clone()
    {
        return decide(model, "tool_use");
    }

    if config.enable_dynamic_routing_detection {
        if let Some(model) = long_context(token_count, config) {
            return decide(model, "long_context");
        }

        if config.enable_web_search_detection
            && let Some(model) = web_search(request, config)
        {
            return decide(model, "web_search");
        }

        if let Some(model) = background(request, config) {
            return decide(model, "background");
        }

        if has_thinking
            && let Some(model) = config.think.clone()
        {
            return decide(model, "thinking");
        }
    }

    decide(config.default.clone().unwrap_or_else(|| request.model.clone()), "default")
}

/// A `/model provider,name` command embedded in the first user message
/// overrides every other strategy. The command is stripped from nowhere —
/// it's a routing instruction, not content the backend needs to see — so
/// callers are expected to put it on its own line.
///
/// The part before the comma names a dialect (`openai`/`anthropic`/
/// `google`), not a model — it narrows channel selection to that provider,
/// the model name is everything after the comma. A command with no comma,
/// or whose provider half isn't recognised, is treated as a plain model
/// name override with no channel restriction.
fn model_command_override(request: &UnifiedRequest) -> Option<(String, Option<ProviderKind>)> {
    const COMMAND_PREFIX: &str = "/model ";

    request.messages.iter().find_map(|message| {
        let text = match &message.content {
            UnifiedContentContainer::Text(text) => text.as_str(),
            UnifiedContentContainer::Blocks(_) => return None,
        };

        text.lines().find_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix(COMMAND_PREFIX)?;
            let rest = rest.trim();
            if rest.is_empty() {
                return None;
            }

            match rest.split_once(',') {
                Some((provider, name)) if !name.trim().is_empty() => match parse_provider(provider.trim()) {
                    Some(provider) => Some((name.trim().to_string(), Some(provider))),
                    None => Some((rest.to_string(), None)),
                },
                _ => Some((rest.to_string(), None)),
            }
        })
    })
}

fn parse_provider(name: &str) -> Option<ProviderKind> {
    match name.to_ascii_lowercase().as_str() {
        "openai" => Some(ProviderKind::Openai),
        "anthropic" => Some(ProviderKind::Anthropic),
        "google" => Some(ProviderKind::Google),
        _ => None,
    }
}

/// `"model": "gpt-4o,gpt-4o-mini"` is returned unchanged — the
/// `RoutingDecision` records the caller's fallback list verbatim. Picking
/// the first element for the actual upstream dispatch happens downstream,
/// in [`crate::channel::resolve_model_name`], since that's a per-dialect
/// converter concern rather than a routing one.
fn pass_through_comma_list(request: &UnifiedRequest) -> Option<String> {
    let (_, rest) = request.model.split_once(',')?;
    if rest.trim().is_empty() {
        return None;
    }
    Some(request.model.clone())
}

fn literal_alias(request: &UnifiedRequest, config: &RouterConfig) -> Option<String> {
    let lower = request.model.to_ascii_lowercase();
    if !ALIASES.contains(&lower.as_str()) {
        return None;
    }

    match lower.as_str() {
        "default" => config.default.clone(),
        "background" => config.background.clone(),
        "think" => config.think.clone(),
        "long_context" => config.long_context.clone(),
        "web_search" => config.web_search.clone(),
        _ => unreachable!("checked against ALIASES above"),
    }
}

fn long_context(token_count: u32, config: &RouterConfig) -> Option<String> {
    let target = config.long_context.clone()?;
    (token_count > config.long_context_threshold).then_some(target)
}

fn web_search(request: &UnifiedRequest, config: &RouterConfig) -> Option<String> {
    let target = config.web_search.clone()?;
    let tools = request.tools.as_ref()?;
    let has_web_search_tool = tools
        .iter()
        .any(|tool| tool.function.name.eq_ignore_ascii_case("websearch") || tool.function.name.eq_ignore_ascii_case("web_search"));

    has_web_search_tool.then_some(target)
}

fn background(request: &UnifiedRequest, config: &RouterConfig) -> Option<String> {
    let target = config.background.clone()?;
    let lower = request.model.to_ascii_lowercase();
    let is_background_marker = BACKGROUND_MODEL_MARKERS.iter().any(|marker| lower.starts_with(marker));
    is_background_marker.then_some(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::{UnifiedFunction, UnifiedMessage, UnifiedRole, UnifiedTool};

    fn base_request(model: &str) -> UnifiedRequest {
        UnifiedRequest {
            model: model.to_string(),
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
        }
    }

    fn config_with(default: &str) -> RouterConfig {
        toml::from_str(&format!(
            r#"default = "{default}"
            background = "claude-3-5-haiku"
            think = "claude-3-opus"
            long_context = "gemini-1.5-pro"
            web_search = "gpt-4o-search"
            tool_use = "gpt-4o-tools""#
        ))
        .unwrap()
    }

    #[test]
    fn model_command_overrides_every_other_strategy() {
        let mut request = base_request("gpt-4o");
        request.messages[0].content = UnifiedContentContainer::Text("/model anthropic,claude-3-opus\nhow's the weather?".to_string());
        let decision = route(&request, &config_with("gpt-4o"));
        assert_eq!(decision.routed_model, "claude-3-opus");
        assert_eq!(decision.strategy_id, "model_command");
        assert_eq!(decision.provider_override, Some(ProviderKind::Anthropic));
    }

    #[test]
    fn model_command_without_provider_prefix_has_no_override() {
        let mut request = base_request("gpt-4o");
        request.messages[0].content = UnifiedContentContainer::Text("/model o1-preview".to_string());
        let decision = route(&request, &config_with("gpt-4o"));
        assert_eq!(decision.routed_model, "o1-preview");
        assert_eq!(decision.provider_override, None);
    }

    #[test]
    fn comma_list_is_returned_unchanged() {
        let decision = route(&base_request("gpt-4o,gpt-4o-mini"), &config_with("gpt-4o"));
        assert_eq!(decision.routed_model, "gpt-4o,gpt-4o-mini");
        assert_eq!(decision.reason, "comma_separated_models");
    }

    #[test]
    fn literal_alias_resolves_to_configured_slot() {
        let decision = route(&base_request("think"), &config_with("gpt-4o"));
        assert_eq!(decision.routed_model, "claude-3-opus");
        assert_eq!(decision.reason, "explicit_alias");
    }

    #[test]
    fn tool_bearing_request_routes_to_tool_use_slot() {
        let mut request = base_request("gpt-4o");
        request.tools = Some(vec![UnifiedTool {
            function: UnifiedFunction {
                name: "get_weather".to_string(),
                description: "Get the weather".to_string(),
                parameters: serde_json::json!({"type": "object"}),
                strict: None,
            },
        }]);
        let decision = route(&request, &config_with("gpt-4o"));
        assert_eq!(decision.routed_model, "gpt-4o-tools");
        assert_eq!(decision.reason, "tool_use");
        assert!(decision.has_tools);
    }

    #[test]
    fn long_request_routes_to_long_context_slot() {
        let mut request = base_request("gpt-4o");
        request.system = Some("x".repeat(400_000));
        let decision = route(&request, &config_with("gpt-4o"));
        assert_eq!(decision.routed_model, "gemini-1.5-pro");
        assert_eq!(decision.reason, "long_context");
    }

    #[test]
    fn web_search_tool_routes_to_web_search_slot() {
        let mut request = base_request("gpt-4o");
        request.tools = Some(vec![UnifiedTool {
            function: UnifiedFunction {
                name: "WebSearch".to_string(),
                description: "search the web".to_string(),
                parameters: serde_json::json!({"type": "object"}),
                strict: None,
            },
        }]);
        let decision = route(&request, &config_with("gpt-4o"));
        assert_eq!(decision.routed_model, "gpt-4o-search");
        assert_eq!(decision.reason, "web_search");
    }

    #[test]
    fn small_model_marker_routes_to_background_slot() {
        let decision = route(&base_request("claude-3-5-haiku-20241022"), &config_with("gpt-4o"));
        assert_eq!(decision.routed_model, "claude-3-5-haiku");
        assert_eq!(decision.reason, "background");
    }

    #[test]
    fn thinking_flag_routes_to_think_slot() {
        let mut request = base_request("gpt-4o");
        request.thinking = Some(true);
        let decision = route(&request, &config_with("gpt-4o"));
        assert_eq!(decision.routed_model, "claude-3-opus");
        assert_eq!(decision.reason, "thinking");
        assert!(decision.has_thinking);
    }

    #[test]
    fn unmatched_request_falls_back_to_default() {
        let decision = route(&base_request("some-unrelated-model"), &config_with("gpt-4o"));
        assert_eq!(decision.routed_model, "gpt-4o");
        assert_eq!(decision.reason, "default");
    }

    #[test]
    fn routing_is_deterministic_for_identical_input() {
        let config = config_with("gpt-4o");
        let a = route(&base_request("some-unrelated-model"), &config);
        let b = route(&base_request("some-unrelated-model"), &config);
        assert_eq!(a, b);
    }
}
