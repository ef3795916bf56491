//! Daemon lifecycle: maintainer loops, the RPC server, and shutdown.
//!
//! Three long-lived tasks run next to the RPC server:
//!
//! 1. the policy-refresh loop, which also sweeps the token cache;
//! 2. the download loop, which pokes the external policy retriever;
//! 3. the supervisor itself, which merges maintainer failures with OS
//!    signals.
//!
//! The first failure on the merged channel — or SIGINT/SIGTERM — flips the
//! shared shutdown watch; the RPC server stops accepting, drains in-flight
//! connections, and the process exits (non-zero on failure, zero on a
//! clean signal).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::config::AgentConfig;
use crate::downloader::{NoopDownloader, PolicyDownloader};
use crate::engine::DecisionContext;
use crate::keystore::KeyStore;
use crate::policy::{PolicyIndex, PolicyLoader};
use crate::rpc::{self, RpcServer};
use crate::token_cache::TokenCache;
use crate::zts::ZtsClient;

pub struct Daemon {
    config: AgentConfig,
    downloader: Arc<dyn PolicyDownloader>,
}

impl Daemon {
    pub fn new(config: AgentConfig) -> Daemon {
        Daemon {
            config,
            downloader: Arc::new(NoopDownloader),
        }
    }

    /// Replace the download trigger (deployments with a real updater).
    pub fn with_downloader(mut self, downloader: Arc<dyn PolicyDownloader>) -> Daemon {
        self.downloader = downloader;
        self
    }

    /// Run until a fatal error or a shutdown signal.
    pub async fn run(self) -> anyhow::Result<()> {
        let config = &self.config;

        std::fs::create_dir_all(&config.policy_files_dir).with_context(|| {
            format!(
                "cannot create policy directory {}",
                config.policy_files_dir.display()
            )
        })?;

        let keystore = Arc::new(
            KeyStore::load(&config.key_store_file).context("unable to load key store")?,
        );
        let index = Arc::new(PolicyIndex::new());
        let token_cache = Arc::new(TokenCache::new(config.cleanup_token_interval as i64));
        let ctx = Arc::new(DecisionContext::new(
            keystore.clone(),
            index.clone(),
            token_cache.clone(),
            config.validation_params(),
        ));
        let zts = ZtsClient::from_config(config, &keystore.zts_url)
            .context("unable to build upstream token client")?
            .map(Arc::new);

        let (fatal_tx, mut fatal_rx) = mpsc::channel::<String>(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Policy refresh + token-cache sweep.
        let loader = PolicyLoader::new(config.policy_files_dir.clone(), keystore, index);
        tokio::spawn(refresh_loop(
            loader,
            token_cache,
            Duration::from_secs(config.cleanup_token_interval),
            fatal_tx.clone(),
            shutdown_rx.clone(),
        ));

        // External download trigger.
        tokio::spawn(download_loop(
            self.downloader.clone(),
            Duration::from_secs(config.zpu_download_interval),
            fatal_tx.clone(),
            shutdown_rx.clone(),
        ));

        // RPC server.
        let port = config.resolve_port();
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("unable to bind rpc listener on port {port}"))?;
        let acceptor = rpc::build_tls_acceptor(config).context("unable to configure tls")?;
        if acceptor.is_some() {
            tracing::info!(port, mtls = !config.ca_path.is_empty(), "rpc listening with tls");
        } else {
            tracing::info!(port, "rpc listening");
        }
        let server = Arc::new(RpcServer::new(ctx, zts, acceptor));
        let server_task = tokio::spawn({
            let fatal_tx = fatal_tx.clone();
            let shutdown_rx = shutdown_rx.clone();
            async move {
                if let Err(e) = server.serve(listener, shutdown_rx).await {
                    let _ = fatal_tx.send(format!("rpc server failed: {e}")).await;
                }
            }
        });

        // Supervisor: first fatal or first signal wins.
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("unable to install SIGTERM handler")?;
        let outcome = tokio::select! {
            fatal = fatal_rx.recv() => {
                let reason = fatal.unwrap_or_else(|| "failure channel closed".to_string());
                tracing::error!(%reason, "shutting down after fatal error");
                Err(anyhow::anyhow!(reason))
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
                Ok(())
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                Ok(())
            }
        };

        let _ = shutdown_tx.send(true);
        let _ = server_task.await;
        tracing::info!("shutdown complete");
        outcome
    }
}

/// List the policy directory, load what changed, sweep the token cache,
/// sleep. Directory-level failures escalate; per-file failures are logged
/// inside the loader and retried next tick.
async fn refresh_loop(
    mut loader: PolicyLoader,
    token_cache: Arc<TokenCache>,
    interval: Duration,
    fatal_tx: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        token_cache.sweep();
        if let Err(e) = loader.refresh() {
            if fatal_tx.send(e.to_string()).await.is_err() {
                return;
            }
        }
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn download_loop(
    downloader: Arc<dyn PolicyDownloader>,
    interval: Duration,
    fatal_tx: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if let Err(e) = downloader.download() {
            if fatal_tx.send(e.to_string()).await.is_err() {
                return;
            }
        }
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
