//! IPC surface for Kiln.
//!
//! Named pipe / Unix socket only; the request layer speaks length-prefixed
//! JSON frames defined in [`protocol`].

mod client;
mod framing;
mod handler;
pub mod protocol;
mod server;

pub use client::{ClientError, IpcClient};
pub use handler::ChatHandler;
pub use protocol::{ProtocolError, Request, Response};
pub use server::{run as run_server, ServerConfig};

use interprocess::local_socket::Name;

/// Map a configured socket path to a platform socket name.
#[cfg(unix)]
pub(crate) fn socket_name(path: &str) -> std::io::Result<Name<'_>> {
    use interprocess::local_socket::{GenericFilePath, ToFsName};
    path.to_fs_name::<GenericFilePath>()
}

#[cfg(windows)]
pub(crate) fn socket_name(path: &str) -> std::io::Result<Name<'_>> {
    use interprocess::local_socket::{GenericNamespaced, ToNsName};
    path.to_ns_name::<GenericNamespaced>()
}
