use std::path::Path;

use anyhow::bail;
use indoc::indoc;
use serde::Deserialize;

use crate::Config;
use crate::dynamic_string;

/// Load and validate the gateway configuration from a TOML file.
///
/// String values may reference `{{ env.VAR }}` to pull secrets like API
/// keys from the environment instead of the file on disk.
pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let mut raw_config: toml::Value = toml::from_str(&content)?;
    dynamic_string::expand(&mut raw_config)?;
    let config = Config::deserialize(raw_config)?;

    validate_has_downstreams(&config)?;

    Ok(config)
}

/// Validates that the configuration has at least one enabled channel and one enabled endpoint.
pub(crate) fn validate_has_downstreams(config: &Config) -> anyhow::Result<()> {
    if !config.llm.enabled() {
        return Ok(());
    }

    if !config.llm.has_providers() {
        bail!(indoc! {r#"
            No LLM channels configured. The gateway requires at least one enabled backend channel to function.

            Example configuration:

              [llm.providers.openai]
              provider = "openai"
              api_key = "{{ env.OPENAI_API_KEY }}"
        "#});
    }

    if !config.llm.has_protocol_endpoints() {
        bail!(indoc! {r#"
            LLM channels are configured but no protocol endpoints are enabled. At least one of
            [llm.protocols.anthropic] or [llm.protocols.openai] must have `enabled = true`.
        "#});
    }

    Ok(())
}
