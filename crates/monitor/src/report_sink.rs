//! Report socket
//!
//! Serves the inventory report on a Unix domain socket. Every connection
//! gets one freshly rendered report, then the server closes it. Clients
//! never send anything.

use anyhow::{Context, Result, anyhow};
use inventory::ReportRenderer;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// Unix socket server handing out reports
#[derive(Debug)]
pub struct ReportServer {
    listener: UnixListener,
    path: PathBuf,
    renderer: ReportRenderer,
}

impl ReportServer {
    /// Bind the report socket at `path`
    ///
    /// A leftover socket file from a previous run is replaced; a socket
    /// that still accepts connections means another monitor is running.
    pub async fn bind(path: &Path, renderer: ReportRenderer) -> Result<Self> {
        if path.exists() {
            if UnixStream::connect(path).await.is_ok() {
                return Err(anyhow!(
                    "Report socket {} is in use by another process",
                    path.display()
                ));
            }
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket: {}", path.display()))?;
            debug!("Removed stale report socket {}", path.display());
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create socket directory: {}", parent.display())
            })?;
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind report socket: {}", path.display()))?;

        info!("Serving reports on {}", path.display());
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            renderer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` completes
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Report server stopping");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let renderer = self.renderer.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve_report(stream, renderer).await {
                                    warn!("Failed to serve report: {:#}", e);
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Failed to accept report connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl Drop for ReportServer {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed report socket {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove report socket {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Write one rendered report and close the stream
///
/// Rendering takes the store read lock, so it runs on the blocking pool.
async fn serve_report(mut stream: UnixStream, renderer: ReportRenderer) -> Result<()> {
    let report = tokio::task::spawn_blocking(move || renderer.render())
        .await
        .context("Report rendering task failed")?;

    stream
        .write_all(report.as_bytes())
        .await
        .context("Failed to write report")?;
    stream.shutdown().await.context("Failed to close report stream")?;
    Ok(())
}

/// Fetch a report from a running monitor
pub async fn query_report(path: &Path) -> Result<String> {
    let mut stream = UnixStream::connect(path)
        .await
        .with_context(|| format!("Failed to connect to report socket: {}", path.display()))?;

    let mut report = String::new();
    stream
        .read_to_string(&mut report)
        .await
        .context("Failed to read report")?;
    Ok(report)
}
