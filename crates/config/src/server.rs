use serde::Deserialize;

/// Bind-address configuration for the operational binary.
///
/// TLS termination, the reverse proxy, and authentication middleware are all
/// external collaborators (see the crate-level docs); this struct only
/// carries what the gateway needs to open a listening socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_address: Option<std::net::SocketAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { listen_address: None }
    }
}
