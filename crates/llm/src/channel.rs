//! Channel selection: which configured upstream credential/endpoint pair
//! services a given request.
//!
//! This is deliberately separate from [`crate::router`]: the router decides
//! *which model* to target from request content, this decides *which
//! channel* — provider, base URL, API key — gets to serve it, based on the
//! caller-facing `custom_key` the request presented (if any).

use config::{ChannelConfig, LlmConfig, ProviderKind};
use secrecy::ExposeSecret;

use crate::error::LlmError;
use crate::request::RequestContext;

/// Select the channel that should serve this request.
///
/// If the caller presented a key, only channels whose `custom_key` matches
/// it are eligible — an unrecognized key is an authentication failure
/// rather than a silent fallback to an unrestricted channel. If the caller
/// presented no key, only channels with no `custom_key` configured are
/// eligible (a channel gated behind a custom key is invisible to anonymous
/// callers). If the routing decision carries a `provider_override` (from a
/// `/model provider,name` command), candidates are further narrowed to
/// channels speaking that dialect — an override naming a provider with no
/// eligible channel is an authentication failure, same as an empty
/// candidate set from key matching. A channel whose `model_filter` regex
/// doesn't match the routed model is likewise ineligible — the filter gates
/// which models a channel will serve at all, not just which it advertises.
/// Among eligible, enabled channels, the highest `priority` wins; ties
/// break on configuration order. `weight` is reserved for future load
/// distribution across equal-priority channels and currently has no effect
/// here beyond that tie-break.
pub(crate) fn select<'a>(
    config: &'a LlmConfig,
    context: &RequestContext,
    routed_model: &str,
    provider_override: Option<ProviderKind>,
) -> crate::Result<(&'a str, &'a ChannelConfig)> {
    let caller_key = context.caller_key.as_ref().map(|key| key.expose_secret());
    let candidate_model = first_model_candidate(routed_model);

    let eligible: Vec<(&str, &ChannelConfig)> = config
        .providers
        .iter()
        .filter(|(_, channel)| channel.enabled)
        .filter(|(_, channel)| match (&channel.custom_key, caller_key) {
            (Some(configured), Some(presented)) => configured.expose_secret() == presented,
            (None, None) => true,
            _ => false,
        })
        .filter(|(_, channel)| provider_override.is_none_or(|provider| channel.provider == provider))
        .map(|(name, channel)| (name.as_str(), channel))
        .collect();

    if eligible.is_empty() {
        return Err(if caller_key.is_some() {
            LlmError::AuthenticationFailed("no channel configured for the presented key".to_string())
        } else if provider_override.is_some() {
            LlmError::AuthenticationFailed("no channel configured for the requested provider".to_string())
        } else {
            LlmError::AuthenticationFailed("no default channel configured for unauthenticated requests".to_string())
        });
    }

    let mut candidates: Vec<(&str, &ChannelConfig)> = eligible
        .into_iter()
        .filter(|(_, channel)| channel.model_filter.as_ref().is_none_or(|filter| filter.is_match(candidate_model)))
        .collect();

    if candidates.is_empty() {
        return Err(LlmError::ModelNotFound(candidate_model.to_string()));
    }

    candidates.sort_by(|a, b| b.1.priority.cmp(&a.1.priority));

    Ok(candidates[0])
}

/// The first element of a comma-separated model list, or the whole string
/// if there's no comma — the actual model identifier a channel is being
/// asked to serve, as opposed to the caller's full fallback list.
fn first_model_candidate(routed_model: &str) -> &str {
    routed_model.split(',').next().unwrap_or(routed_model).trim()
}

/// Resolve a channel's upstream model name for a router-chosen model alias,
/// applying that channel's `models_mapping` rename if one is configured.
///
/// The router's comma-list pass-through strategy returns the caller's model
/// string unchanged so it still shows up verbatim in the `RoutingDecision`;
/// picking the first element for the actual upstream dispatch is a
/// per-dialect converter concern, done here since every provider's
/// `prepare_request` already funnels through this function as its one
/// choke point for turning a routed model into an upstream-bound name.
pub(crate) fn resolve_model_name(channel: &ChannelConfig, routed_model: &str) -> String {
    let routed_model = first_model_candidate(routed_model);

    channel
        .models_mapping
        .get(routed_model)
        .and_then(|mapping| mapping.rename.clone())
        .unwrap_or_else(|| routed_model.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config_from(toml: &str) -> LlmConfig {
        toml::from_str(toml).expect("valid config")
    }

    fn context_with_key(key: Option<&str>) -> RequestContext {
        RequestContext {
            caller_key: key.map(|k| SecretString::from(k.to_string())),
            ..Default::default()
        }
    }

    #[test]
    fn unauthenticated_request_picks_keyless_channel() {
        let config = config_from(indoc::indoc! {r#"
            [providers.default]
            provider = "openai"
            api_key = "sk-upstream"
        "#});

        let (name, _) = select(&config, &context_with_key(None), "gpt-4o", None).unwrap();
        assert_eq!(name, "default");
    }

    #[test]
    fn matching_custom_key_selects_its_channel() {
        let config = config_from(indoc::indoc! {r#"
            [providers.team_a]
            provider = "anthropic"
            api_key = "sk-upstream-a"
            custom_key = "caller-key-a"

            [providers.team_b]
            provider = "anthropic"
            api_key = "sk-upstream-b"
            custom_key = "caller-key-b"
        "#});

        let (name, channel) = select(&config, &context_with_key(Some("caller-key-b")), "claude-3-opus", None).unwrap();
        assert_eq!(name, "team_b");
        assert_eq!(channel.api_key.as_ref().unwrap().expose_secret(), "sk-upstream-b");
    }

    #[test]
    fn unknown_custom_key_is_rejected() {
        let config = config_from(indoc::indoc! {r#"
            [providers.team_a]
            provider = "anthropic"
            api_key = "sk-upstream-a"
            custom_key = "caller-key-a"
        "#});

        let err = select(&config, &context_with_key(Some("wrong-key")), "claude-3-opus", None).unwrap_err();
        assert!(matches!(err, LlmError::AuthenticationFailed(_)));
    }

    #[test]
    fn higher_priority_channel_wins_among_eligible() {
        let config = config_from(indoc::indoc! {r#"
            [providers.low]
            provider = "openai"
            api_key = "sk-low"
            priority = 1

            [providers.high]
            provider = "openai"
            api_key = "sk-high"
            priority = 10
        "#});

        let (name, _) = select(&config, &context_with_key(None), "gpt-4o", None).unwrap();
        assert_eq!(name, "high");
    }

    #[test]
    fn provider_override_narrows_to_matching_channel() {
        let config = config_from(indoc::indoc! {r#"
            [providers.openai_default]
            provider = "openai"
            api_key = "sk-openai"

            [providers.anthropic_default]
            provider = "anthropic"
            api_key = "sk-anthropic"
        "#});

        let (name, _) = select(&config, &context_with_key(None), "claude-3-opus", Some(ProviderKind::Anthropic)).unwrap();
        assert_eq!(name, "anthropic_default");
    }

    #[test]
    fn provider_override_with_no_matching_channel_is_rejected() {
        let config = config_from(indoc::indoc! {r#"
            [providers.default]
            provider = "openai"
            api_key = "sk-openai"
        "#});

        let err = select(&config, &context_with_key(None), "gemini-pro", Some(ProviderKind::Google)).unwrap_err();
        assert!(matches!(err, LlmError::AuthenticationFailed(_)));
    }

    #[test]
    fn model_filter_excludes_non_matching_channel() {
        let config = config_from(indoc::indoc! {r#"
            [providers.gpt_only]
            provider = "openai"
            api_key = "sk-openai"
            model_filter = "^gpt-4"
        "#});

        let err = select(&config, &context_with_key(None), "gpt-3.5-turbo", None).unwrap_err();
        assert!(matches!(err, LlmError::ModelNotFound(model) if model == "gpt-3.5-turbo"));
    }

    #[test]
    fn model_filter_allows_matching_channel() {
        let config = config_from(indoc::indoc! {r#"
            [providers.gpt_only]
            provider = "openai"
            api_key = "sk-openai"
            model_filter = "^gpt-4"
        "#});

        let (name, _) = select(&config, &context_with_key(None), "gpt-4o", None).unwrap();
        assert_eq!(name, "gpt_only");
    }

    #[test]
    fn resolve_model_name_picks_first_element_of_comma_list() {
        let config = config_from(indoc::indoc! {r#"
            [providers.default]
            provider = "openai"
            api_key = "sk-upstream"
        "#});

        let channel = &config.providers["default"];
        assert_eq!(resolve_model_name(channel, "gpt-4,gpt-3.5-turbo"), "gpt-4");
    }

    #[test]
    fn models_mapping_rename_overrides_routed_alias() {
        let config = config_from(indoc::indoc! {r#"
            [providers.default]
            provider = "openai"
            api_key = "sk-upstream"

            [providers.default.models_mapping.think]
            rename = "o1-preview"
        "#});

        let channel = &config.providers["default"];
        assert_eq!(resolve_model_name(channel, "think"), "o1-preview");
        assert_eq!(resolve_model_name(channel, "gpt-4o"), "gpt-4o");
    }
}
