use std::path::PathBuf;

use clap::Parser;

/// Multi-provider LLM gateway: translates OpenAI, Anthropic, and Google wire
/// formats onto configured upstream channels.
#[derive(Debug, Parser)]
#[command(name = "llm-gateway", version)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "LLM_GATEWAY_CONFIG", default_value = "gateway.toml")]
    pub config: PathBuf,

    /// Log filter, e.g. "info" or "llm=debug,config=warn".
    #[arg(long, env = "LLM_GATEWAY_LOG", default_value = "info")]
    pub log: String,
}
