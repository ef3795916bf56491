use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Pick a crypto provider before any TLS usage; both the RPC listener
    // and the upstream HTTP client speak rustls.
    let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();

    let config = warden_agent::AgentConfig::parse();

    // Use JSON logs in production (WARDEN_LOG_JSON=1), human-readable otherwise.
    let json_logs = std::env::var("WARDEN_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive(config.log_level.parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        policy_dir = %config.policy_files_dir.display(),
        "starting warden agent"
    );
    if config.tls_enabled() {
        tracing::info!("tls enabled on the rpc listener");
    }

    warden_agent::Daemon::new(config).run().await
}
