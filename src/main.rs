//! Autofix Agent - autonomous code remediation loop

use autofix_agent::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Rustls 0.23+ needs an explicit crypto provider for HTTPS
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        tracing::debug!("Rustls crypto provider already installed");
    }

    // INFO for this crate by default, override with RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,autofix_agent=info")),
        )
        .init();

    cli::run().await
}
