//! Trigger for the external policy retrieval pipeline.
//!
//! The agent never fetches policy itself; something out of process
//! materializes signed policy files into the watched directory. The
//! download loop pokes that collaborator on a fixed interval through this
//! trait so deployments can plug in their updater of choice.

#[derive(Debug, thiserror::Error)]
#[error("policy download failed: {0}")]
pub struct DownloadError(pub String);

pub trait PolicyDownloader: Send + Sync {
    fn download(&self) -> Result<(), DownloadError>;
}

/// Default downloader for deployments where policy files arrive by other
/// means (volume mounts, sidecar updaters).
pub struct NoopDownloader;

impl PolicyDownloader for NoopDownloader {
    fn download(&self) -> Result<(), DownloadError> {
        tracing::debug!("no policy downloader configured");
        Ok(())
    }
}
