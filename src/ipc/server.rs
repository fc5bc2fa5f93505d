//! IPC server: local socket listener and per-connection tasks.

use std::io;
use std::sync::Arc;

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::tokio::Stream;
use interprocess::local_socket::ListenerOptions;
use tokio::sync::Semaphore;

use super::framing::{read_frame, write_frame};
use super::handler::ChatHandler;
use super::socket_name;

/// Server tuning.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: String,
    pub frame_limit: usize,
    pub max_connections: usize,
}

/// Bind the socket and serve until ctrl-c.
pub async fn run(handler: Arc<ChatHandler>, config: ServerConfig) -> io::Result<()> {
    // A previous unclean shutdown can leave the socket file behind.
    #[cfg(unix)]
    {
        let path = std::path::Path::new(&config.socket_path);
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }

    let name = socket_name(&config.socket_path)?;
    let listener = ListenerOptions::new().name(name).create_tokio()?;
    let limiter = Arc::new(Semaphore::new(config.max_connections));
    tracing::info!(socket = %config.socket_path, "listening");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            conn = listener.accept() => {
                let stream = match conn {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let Ok(permit) = Arc::clone(&limiter).try_acquire_owned() else {
                    tracing::warn!(max = config.max_connections, "connection limit reached; rejecting");
                    continue;
                };
                let handler = Arc::clone(&handler);
                let frame_limit = config.frame_limit;
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = serve_connection(stream, handler, frame_limit).await {
                        tracing::debug!(error = %e, "connection ended with error");
                    }
                });
            }
        }
    }

    #[cfg(unix)]
    {
        let _ = std::fs::remove_file(&config.socket_path);
    }
    Ok(())
}

/// Drive one connection: frames in, frames out, until the peer hangs up.
async fn serve_connection(
    stream: Stream,
    handler: Arc<ChatHandler>,
    frame_limit: usize,
) -> io::Result<()> {
    let (mut recv, mut send) = stream.split();
    while let Some(frame) = read_frame(&mut recv, frame_limit).await? {
        let response = handler.process(&frame).await;
        write_frame(&mut send, &response).await?;
    }
    Ok(())
}
