//! One-shot IPC client for the CLI subcommands.

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::tokio::Stream;
use thiserror::Error;

use super::framing::{read_frame, write_frame};
use super::protocol::{self, ProtocolError, Request, Response, MAX_MESSAGE_SIZE};
use super::socket_name;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connect(std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server closed the connection")]
    Closed,
}

/// Connects per request; the protocol is strict request/response, so there
/// is nothing to keep alive between calls.
pub struct IpcClient {
    socket_path: String,
}

impl IpcClient {
    pub fn new(socket_path: String) -> Self {
        Self { socket_path }
    }

    /// Send one request and await its response.
    pub async fn request(&self, request: &Request) -> Result<Response, ClientError> {
        let name = socket_name(&self.socket_path)?;
        let stream = Stream::connect(name).await.map_err(ClientError::Connect)?;
        let (mut recv, mut send) = stream.split();
        let bytes = protocol::encode_request(request)?;
        write_frame(&mut send, &bytes).await?;
        let frame = read_frame(&mut recv, MAX_MESSAGE_SIZE)
            .await?
            .ok_or(ClientError::Closed)?;
        Ok(protocol::decode_response(&frame)?)
    }
}
