//! A local stand-in for the S3 and Lambda endpoints of LocalStack.
//!
//! Buckets and objects are kept in memory. Functions are `provided.*` runtime zips:
//! on the first invocation the zip is extracted, `bootstrap` is started as a child process
//! and talks to a per-function Lambda Runtime API served by this crate.

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use state::EmulatorState;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub mod config;
mod error;
mod handlers;
mod model;
mod runtime;
mod state;

pub use config::EmulatorConfig;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A running emulator. Dropping it without [EmulatorHandle::shutdown] leaves the server running
/// until the tokio runtime stops.
#[derive(Debug)]
pub struct EmulatorHandle {
    local_addr: SocketAddr,
    work_dir: PathBuf,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl EmulatorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A temporary work dir is removed by [EmulatorHandle::shutdown].
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// E.g. `http://127.0.0.1:4566`, ready for `AWS_ENDPOINT_URL`.
    pub fn endpoint_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stops accepting connections, kills all running functions and removes a temporary work dir.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.server.await {
            error!("Emulator server task failed: {e}");
        }
    }
}

/// Binds the listener and starts serving in the background.
pub async fn start(config: EmulatorConfig) -> Result<EmulatorHandle, Error> {
    // the temp dir lives in the server task and goes away with it
    let (work_dir, temp_dir) = match &config.work_dir {
        Some(v) => {
            tokio::fs::create_dir_all(v).await?;
            (v.clone(), None)
        }
        None => {
            let temp_dir = tempfile::Builder::new().prefix("cloud-emulator-").tempdir()?;
            (temp_dir.path().to_path_buf(), Some(temp_dir))
        }
    };

    let listener = TcpListener::bind(config.listener).await?;
    let local_addr = listener.local_addr()?;
    let state = Arc::new(EmulatorState::new(config, format!("http://{local_addr}"), work_dir.clone()));

    info!("Listening on {local_addr}, work dir {}", work_dir.display());

    let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        loop {
            let stream = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        error!("Failed to accept a connection: {e}");
                        continue;
                    }
                },
                _ = &mut shutdown_rx => break,
            };

            let io = TokioIo::new(stream);
            let state = state.clone();

            // Spawn a tokio task to serve multiple connections concurrently
            tokio::task::spawn(async move {
                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service_fn(move |req| handlers::cloud_api_handler(req, state.clone())))
                    .await
                {
                    error!("Error serving TCP connection: {:?}", err);
                }
            });
        }

        let stopped = state.remove_all_functions();
        debug!("Stopped {stopped} function(s)");

        if let Some(temp_dir) = temp_dir {
            if let Err(e) = temp_dir.close() {
                error!("Failed to remove the work dir: {e}");
            }
        }
        info!("Emulator on {local_addr} stopped");
    });

    Ok(EmulatorHandle {
        local_addr,
        work_dir,
        shutdown,
        server,
    })
}
