//! Configuration shapes for the LLM gateway.
//!
//! The core does not own persistence for any of this — an external config
//! store supplies the key/value pairs enumerated in the gateway's external
//! interface docs (`router.*`, `channel.*`) — but it owns the typed shape it
//! deserializes those keys into.

use std::{borrow::Cow, fmt, time::Duration};

use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

/// Case-insensitive regex filter for matching model identifiers against a channel.
#[derive(Clone)]
pub struct ModelFilter {
    regex: Regex,
}

impl ModelFilter {
    fn new(pattern: &str) -> Result<Self, String> {
        let trimmed = pattern.trim();

        if trimmed.is_empty() {
            return Err("model_filter cannot be empty".to_string());
        }

        let regex = RegexBuilder::new(trimmed)
            .case_insensitive(true)
            .build()
            .map_err(|err| format!("invalid model_filter regex: {err}"))?;

        Ok(Self { regex })
    }

    /// The original pattern string.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Whether the supplied model identifier matches the pattern.
    pub fn is_match(&self, model: &str) -> bool {
        self.regex.is_match(model)
    }
}

impl fmt::Debug for ModelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelFilter").field("pattern", &self.pattern()).finish()
    }
}

impl<'de> Deserialize<'de> for ModelFilter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pattern = Cow::<'de, str>::deserialize(deserializer)?;
        ModelFilter::new(pattern.as_ref()).map_err(serde::de::Error::custom)
    }
}

/// Which wire dialect a configured channel speaks upstream.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Openai,
    Anthropic,
    Google,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        };
        f.write_str(name)
    }
}

/// Per-model override within a channel (`channel.*.models_mapping`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelMapping {
    /// The actual upstream model name, if it differs from the alias key.
    pub rename: Option<String>,
}

/// One configured backend credential/endpoint pair.
///
/// This is the typed mirror of the `channel.*` keys from the external config
/// store's schema: `{provider, base_url, api_key, custom_key, timeout,
/// max_retries, weight, priority, enabled, models_mapping}`.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub provider: ProviderKind,
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    /// Caller-facing key clients present via `x-api-key`/`Authorization` to select this channel.
    pub custom_key: Option<SecretString>,
    pub timeout: Duration,
    /// Advisory only — the core performs no cross-provider retry orchestration (non-goal).
    pub max_retries: u32,
    pub weight: u32,
    pub priority: i32,
    pub enabled: bool,
    pub model_filter: Option<ModelFilter>,
    pub models_mapping: IndexMap<String, ModelMapping>,
}

impl<'de> Deserialize<'de> for ChannelConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "snake_case")]
        struct Raw {
            provider: ProviderKind,
            #[serde(default)]
            base_url: Option<String>,
            #[serde(default)]
            api_key: Option<SecretString>,
            #[serde(default)]
            custom_key: Option<SecretString>,
            #[serde(default = "default_timeout")]
            timeout: Timeout,
            #[serde(default)]
            max_retries: u32,
            #[serde(default = "default_weight")]
            weight: u32,
            #[serde(default)]
            priority: i32,
            #[serde(default = "default_true")]
            enabled: bool,
            #[serde(default)]
            model_filter: Option<ModelFilter>,
            #[serde(default)]
            models_mapping: IndexMap<String, ModelMapping>,
        }

        let raw = Raw::deserialize(deserializer)?;

        Ok(Self {
            provider: raw.provider,
            base_url: raw.base_url,
            api_key: raw.api_key,
            custom_key: raw.custom_key,
            timeout: raw.timeout.0,
            max_retries: raw.max_retries,
            weight: raw.weight,
            priority: raw.priority,
            enabled: raw.enabled,
            model_filter: raw.model_filter,
            models_mapping: raw.models_mapping,
        })
    }
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> Timeout {
    Timeout(Duration::from_secs(120))
}

struct Timeout(Duration);

impl<'de> Deserialize<'de> for Timeout {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        duration_str::parse(&raw).map(Timeout).map_err(serde::de::Error::custom)
    }
}

/// Ordered strategy-chain tuning consumed by the model router (`router.*` keys).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    /// Strategy 7 — always-applicable fallback.
    pub default: Option<String>,
    /// Strategy 5 — small/cheap model for background-marked requests.
    pub background: Option<String>,
    /// Strategy 6 — reasoning-capable model for `thinking: true` requests.
    pub think: Option<String>,
    /// Strategy 3 — model for requests whose estimated tokens exceed the threshold.
    pub long_context: Option<String>,
    /// Strategy 4 — model for requests carrying a `web_search` tool.
    pub web_search: Option<String>,
    /// Strategy 2 — tool-capable model for any request carrying tool definitions.
    /// Not one of the originally enumerated `router.*` keys; added so the
    /// full seven-strategy chain has somewhere to route to (see DESIGN.md).
    pub tool_use: Option<String>,
    pub long_context_threshold: u32,
    pub enable_web_search_detection: bool,
    pub enable_tool_use_detection: bool,
    pub enable_dynamic_routing_detection: bool,
    /// Ceiling the OpenAI-bound converter clamps `max_tokens` to.
    pub openai_max_tokens_ceiling: u32,
    /// Whether a file/shell-operation tool with `tool_choice: auto` (or
    /// unset) is silently upgraded to `required` on the OpenAI-bound path.
    /// Defaults to `true`; set `false` to send the caller's `tool_choice`
    /// unchanged.
    pub openai_upgrade_file_tool_choice: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default: None,
            background: None,
            think: None,
            long_context: None,
            web_search: None,
            tool_use: None,
            long_context_threshold: 60_000,
            enable_web_search_detection: true,
            enable_tool_use_detection: true,
            enable_dynamic_routing_detection: true,
            openai_max_tokens_ceiling: 16_384,
            openai_upgrade_file_tool_choice: true,
        }
    }
}

/// Conversation session store tuning. The store is disabled entirely when `enabled = false`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub enabled: bool,
    pub max_sessions: usize,
    pub max_messages_per_session: usize,
    pub token_budget_per_session: u32,
    pub ttl_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_sessions: 1_000,
            max_messages_per_session: 200,
            token_budget_per_session: 100_000,
            ttl_seconds: 3_600,
        }
    }
}

/// One inbound protocol mount (`/v1/messages` vs. `/v1/chat/completions`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    pub enabled: bool,
    /// Mount prefix; empty means the endpoints live at their bare, unprefixed paths.
    pub path: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: String::new(),
        }
    }
}

/// Which of the four inbound endpoint groups are enabled, and under what mount.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolsConfig {
    pub anthropic: ProtocolConfig,
    pub openai: ProtocolConfig,
}

/// Top-level LLM gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    enabled: bool,
    pub protocols: ProtocolsConfig,
    pub providers: IndexMap<String, ChannelConfig>,
    pub router: RouterConfig,
    pub session: SessionConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protocols: ProtocolsConfig::default(),
            providers: IndexMap::new(),
            router: RouterConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl LlmConfig {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn has_providers(&self) -> bool {
        self.providers.values().any(|p| p.enabled)
    }

    pub fn has_protocol_endpoints(&self) -> bool {
        self.protocols.anthropic.enabled || self.protocols.openai.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_filter_is_case_insensitive() {
        let filter: ModelFilter = toml::from_str(r#"pattern = "^gpt-4.*""#)
            .map(|v: toml::Value| v["pattern"].as_str().unwrap().to_string())
            .map(|pattern| ModelFilter::new(&pattern).unwrap())
            .unwrap();

        assert!(filter.is_match("GPT-4-Turbo"));
        assert!(!filter.is_match("claude-3"));
    }

    #[test]
    fn channel_config_defaults() {
        let toml = indoc::indoc! {r#"
            provider = "openai"
            api_key = "sk-test"
        "#};

        let channel: ChannelConfig = toml::from_str(toml).unwrap();

        assert_eq!(channel.provider, ProviderKind::Openai);
        assert!(channel.enabled);
        assert_eq!(channel.weight, 1);
        assert_eq!(channel.timeout, std::time::Duration::from_secs(120));
    }

    #[test]
    fn router_config_defaults() {
        let config: RouterConfig = toml::from_str("").unwrap();

        assert_eq!(config.long_context_threshold, 60_000);
        assert_eq!(config.openai_max_tokens_ceiling, 16_384);
        assert!(config.enable_tool_use_detection);
    }
}
