//! Typed configuration shapes for the LLM gateway.
//!
//! This crate owns the *shape* the gateway core deserializes its
//! configuration into; the persistent store behind it (encryption-at-rest
//! for secrets, hot reload, the admin console that edits it) lives outside
//! the core and is not modeled here.

mod dynamic_string;
mod error;
mod llm;
mod loader;
mod server;

use std::path::Path;

pub use error::Error;
pub use llm::{
    ChannelConfig, LlmConfig, ModelFilter, ModelMapping, ProtocolConfig, ProtocolsConfig, ProviderKind, RouterConfig,
    SessionConfig,
};
pub use server::ServerConfig;
use serde::Deserialize;

/// Root configuration for the gateway binary.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
}

impl Config {
    /// Load configuration from a TOML file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validate that the configuration has at least one usable channel and endpoint.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate_has_downstreams(self)
    }
}
