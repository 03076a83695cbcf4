//! The submitting side of the remote protocol.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use engine::{DagDocument, Event, RunOutcome};
use futures::stream::{SplitSink, SplitStream};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{RemoteError, RemoteResult};
use crate::protocol::{self, BundledFile, ClientMessage, ServerMessage};
use crate::tls::ClientTls;

/// Any byte stream the protocol can run over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

type Connection = Framed<Box<dyn Transport>, LengthDelimitedCodec>;
type Writer = Arc<Mutex<SplitSink<Connection, bytes::Bytes>>>;

// ---------------------------------------------------------------------------
// File bundling
// ---------------------------------------------------------------------------

/// Read `paths` (files or directories, recursively) into bundled files.
///
/// Paths below `base` are bundled relative to it; other relative paths are
/// bundled as given.
pub fn bundle_files(base: &Path, paths: &[PathBuf]) -> RemoteResult<Vec<BundledFile>> {
    let mut bundled = Vec::new();
    for path in paths {
        let full = if path.is_absolute() {
            path.clone()
        } else {
            base.join(path)
        };
        collect(base, &full, &mut bundled)?;
    }
    Ok(bundled)
}

fn collect(base: &Path, path: &Path, out: &mut Vec<BundledFile>) -> RemoteResult<()> {
    if path.is_dir() {
        let mut entries = std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort();
        for entry in entries {
            collect(base, &entry, out)?;
        }
        return Ok(());
    }
    let relative = path
        .strip_prefix(base)
        .map_err(|_| RemoteError::UnsafePath(path.display().to_string()))?;
    let name = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    let contents = std::fs::read(path)?;
    debug!(file = %name, bytes = contents.len(), "bundling");
    out.push(BundledFile::new(name, &contents));
    Ok(())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A connection ready to submit one DAG.
pub struct Client {
    connection: Connection,
}

impl Client {
    /// Connect over TCP, wrapping the stream in TLS when `tls` is given.
    pub async fn connect(addr: &str, tls: Option<&ClientTls>) -> RemoteResult<Self> {
        let tcp = TcpStream::connect(addr).await?;
        let io: Box<dyn Transport> = match tls {
            Some(tls) => Box::new(tls.connect(tcp).await?),
            None => Box::new(tcp),
        };
        info!(%addr, tls = tls.is_some(), "connected");
        Ok(Self::over(io))
    }

    /// Speak the protocol over an already established stream.
    pub fn over(io: impl Transport + 'static) -> Self {
        let io: Box<dyn Transport> = Box::new(io);
        Self {
            connection: protocol::framed(io),
        }
    }

    /// Send `EXECUTE` and wait for the server's verdict.
    ///
    /// # Errors
    /// [`RemoteError::Rejected`] with every validation error when the server
    /// refuses the document.
    pub async fn submit(
        mut self,
        document: DagDocument,
        files: Vec<BundledFile>,
    ) -> RemoteResult<RemoteRun> {
        protocol::send(&mut self.connection, &ClientMessage::Execute { document, files }).await?;

        let run_id = match protocol::recv(&mut self.connection).await? {
            Some(ServerMessage::Accepted { run_id }) => run_id,
            Some(ServerMessage::Rejected { errors }) => return Err(RemoteError::Rejected(errors)),
            Some(ServerMessage::Error { message }) => return Err(RemoteError::Server(message)),
            Some(other) => {
                return Err(RemoteError::Protocol(format!(
                    "expected ACCEPTED or REJECTED, got {other:?}"
                )))
            }
            None => return Err(RemoteError::ConnectionClosed),
        };
        info!(%run_id, "run accepted");

        let (sink, stream) = self.connection.split();
        Ok(RemoteRun {
            run_id,
            writer: Arc::new(Mutex::new(sink)),
            reader: stream,
            outcome: None,
        })
    }
}

/// Asks the server to stop a run; cheap to clone and send across tasks.
#[derive(Clone)]
pub struct StopHandle {
    writer: Writer,
}

impl StopHandle {
    pub async fn stop(&self) -> RemoteResult<()> {
        let mut writer = self.writer.lock().await;
        protocol::send(&mut *writer, &ClientMessage::Stop).await
    }
}

/// An accepted run whose events are arriving.
pub struct RemoteRun {
    run_id: Uuid,
    writer: Writer,
    reader: SplitStream<Connection>,
    outcome: Option<RunOutcome>,
}

impl RemoteRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            writer: Arc::clone(&self.writer),
        }
    }

    /// The next event; `None` once `DONE` has arrived.
    ///
    /// # Errors
    /// [`RemoteError::ConnectionClosed`] if the connection ends before `DONE`.
    pub async fn next_event(&mut self) -> RemoteResult<Option<Event>> {
        if self.outcome.is_some() {
            return Ok(None);
        }
        match protocol::recv(&mut self.reader).await? {
            Some(ServerMessage::Event(event)) => Ok(Some(event)),
            Some(ServerMessage::Done(outcome)) => {
                info!(run_id = %self.run_id, state = ?outcome.state, "run done");
                self.outcome = Some(outcome);
                Ok(None)
            }
            Some(ServerMessage::Error { message }) => Err(RemoteError::Server(message)),
            Some(other) => Err(RemoteError::Protocol(format!(
                "unexpected {other:?} during a run"
            ))),
            None => Err(RemoteError::ConnectionClosed),
        }
    }

    /// Drain the remaining events and return them with the outcome.
    pub async fn collect(mut self) -> RemoteResult<(Vec<Event>, RunOutcome)> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await? {
            events.push(event);
        }
        self.finish().await.map(|outcome| (events, outcome))
    }

    /// Discard remaining events and return the outcome.
    pub async fn finish(mut self) -> RemoteResult<RunOutcome> {
        while self.next_event().await?.is_some() {}
        self.outcome.ok_or(RemoteError::ConnectionClosed)
    }
}
