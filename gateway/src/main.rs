use clap::Parser;

use args::Args;

mod args;
mod logger;

const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init(&args.log);

    let config = config::Config::load(&args.config)?;
    let listen_address = config
        .server
        .listen_address
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.parse().expect("valid default listen address"));

    let router = llm::router(&config).await?;
    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    log::info!("llm gateway listening on {listen_address}");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("shutting down");
}
