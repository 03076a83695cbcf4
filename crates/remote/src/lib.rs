//! Remote execution: submit a DAG with its files to a server, follow its
//! events, stop it, and receive the outcome.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod tls;

pub use client::{bundle_files, Client, RemoteRun, StopHandle};
pub use config::{ClientSettings, DisconnectPolicy, ServerSettings, TlsSettings, DEFAULT_BIND};
pub use error::{RemoteError, RemoteResult};
pub use protocol::{BundledFile, ClientMessage, ServerMessage};
pub use server::{stage_files, Server};
pub use tls::{fingerprint, ClientTls, PeerAllowList, ServerTls};
