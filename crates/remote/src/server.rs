//! The remote execution server.
//!
//! One TCP (optionally TLS) connection is one session and one run. Sessions
//! are independent: each stages its files into its own temporary directory
//! and runs with its own slot budgets.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use engine::{EngineError, EventStream, ExecutorConfig, RunOutcome, WorkflowExecutor};
use futures::StreamExt;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DisconnectPolicy, ServerSettings};
use crate::error::{RemoteError, RemoteResult};
use crate::protocol::{self, BundledFile, ClientMessage, ServerMessage};
use crate::tls::ServerTls;

/// Write `files` below `root`, creating directories as needed.
///
/// # Errors
/// [`RemoteError::UnsafePath`] for absolute or escaping paths; nothing is
/// written in that case.
pub async fn stage_files(root: &Path, files: &[BundledFile]) -> RemoteResult<()> {
    let mut decoded = Vec::with_capacity(files.len());
    for file in files {
        decoded.push((root.join(file.relative_path()?), file.decode()?));
    }
    for (path, contents) in decoded {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await?;
    }
    Ok(())
}

/// Accepts sessions and runs their DAGs.
#[derive(Clone)]
pub struct Server {
    executor: WorkflowExecutor,
    policy: DisconnectPolicy,
    tls: Option<ServerTls>,
}

impl Server {
    /// Build a server; loads TLS material when `settings.tls` is set.
    pub fn new(executor: WorkflowExecutor, settings: &ServerSettings) -> RemoteResult<Self> {
        let executor = match settings.stop_grace_ms {
            Some(ms) => {
                let config = ExecutorConfig {
                    stop_grace: Duration::from_millis(ms),
                };
                executor.with_config(config)
            }
            None => executor,
        };
        let tls = settings.tls.as_ref().map(ServerTls::from_settings).transpose()?;
        if tls.is_none() {
            warn!("serving without TLS: the channel is plaintext and unauthenticated");
        }
        Ok(Self {
            executor,
            policy: settings.disconnect_policy,
            tls,
        })
    }

    /// Accept connections until `shutdown` fires.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> RemoteResult<()> {
        info!(addr = %listener.local_addr()?, policy = %self.policy, tls = self.tls.is_some(), "server listening");
        let server = Arc::new(self);
        loop {
            let (tcp, peer) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = shutdown.cancelled() => {
                    info!("server shutting down");
                    return Ok(());
                }
            };
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                let result = match &server.tls {
                    Some(tls) => match tls.accept(tcp).await {
                        Ok(stream) => server.session(stream).await,
                        Err(e) => Err(e),
                    },
                    None => server.session(tcp).await,
                };
                match result {
                    Ok(()) => debug!(%peer, "session closed"),
                    Err(e) => warn!(%peer, "session ended with error: {e}"),
                }
            });
        }
    }

    /// Run one session over an established connection.
    #[instrument(skip_all)]
    pub async fn session<IO>(&self, io: IO) -> RemoteResult<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut framed = protocol::framed(io);

        let (document, files) = match protocol::recv(&mut framed).await? {
            Some(ClientMessage::Execute { document, files }) => (document, files),
            Some(ClientMessage::Stop) => {
                let message = "STOP received before EXECUTE".to_owned();
                protocol::send(&mut framed, &ServerMessage::Error { message: message.clone() }).await?;
                return Err(RemoteError::Protocol(message));
            }
            None => return Ok(()),
        };

        let staging = TempDir::new()?;
        if let Err(e) = stage_files(staging.path(), &files).await {
            protocol::send(
                &mut framed,
                &ServerMessage::Rejected {
                    errors: vec![e.to_string()],
                },
            )
            .await?;
            return Ok(());
        }

        let prepared = match self.executor.prepare(&document, staging.path()) {
            Ok(prepared) => prepared,
            Err(errors) => {
                info!(errors = errors.0.len(), "submission rejected");
                let errors = errors.iter().map(ToString::to_string).collect();
                protocol::send(&mut framed, &ServerMessage::Rejected { errors }).await?;
                return Ok(());
            }
        };

        let run_id = prepared.run_id();
        info!(%run_id, files = files.len(), "submission accepted");
        protocol::send(&mut framed, &ServerMessage::Accepted { run_id }).await?;

        let (events, mut rx) = EventStream::channel(run_id);
        let stop = CancellationToken::new();
        let run = tokio::spawn({
            let executor = self.executor.clone();
            let stop = stop.clone();
            async move { executor.run(prepared, events, stop).await }
        });

        let (mut sink, mut stream) = framed.split();
        let mut connected = true;
        let disconnected = |connected: &mut bool| {
            *connected = false;
            match self.policy {
                DisconnectPolicy::Cancel => {
                    warn!(%run_id, "client disconnected, stopping run");
                    stop.cancel();
                }
                DisconnectPolicy::Finish => {
                    warn!(%run_id, "client disconnected, finishing run headless");
                }
            }
        };

        // The receiver ends once the run and every item context are gone.
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) if connected => {
                        if let Err(e) = protocol::send(&mut sink, &ServerMessage::Event(event)).await {
                            debug!("event delivery failed: {e}");
                            disconnected(&mut connected);
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
                incoming = protocol::recv::<_, ClientMessage, _>(&mut stream), if connected => match incoming {
                    Ok(Some(ClientMessage::Stop)) => {
                        info!(%run_id, "stop requested by client");
                        stop.cancel();
                    }
                    Ok(Some(ClientMessage::Execute { .. })) => {
                        warn!(%run_id, "second EXECUTE in one session ignored");
                        let message = "a run is already in progress on this session".to_owned();
                        if protocol::send(&mut sink, &ServerMessage::Error { message }).await.is_err() {
                            disconnected(&mut connected);
                        }
                    }
                    Ok(None) => disconnected(&mut connected),
                    Err(e) => {
                        debug!("client stream failed: {e}");
                        disconnected(&mut connected);
                    }
                },
            }
        }

        let outcome: RunOutcome = match run.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return self.fail_session(&mut sink, connected, e).await,
            Err(e) => {
                let e = EngineError::Internal(format!("run task failed: {e}"));
                return self.fail_session(&mut sink, connected, e).await;
            }
        };
        info!(%run_id, state = ?outcome.state, "run finished");

        if connected {
            protocol::send(&mut sink, &ServerMessage::Done(outcome)).await?;
            futures::SinkExt::close(&mut sink).await?;
        }
        // Only now may the staged inputs go away.
        drop(staging);
        Ok(())
    }

    async fn fail_session<S>(&self, sink: &mut S, connected: bool, e: EngineError) -> RemoteResult<()>
    where
        S: futures::Sink<bytes::Bytes, Error = std::io::Error> + Unpin,
    {
        error!("run failed: {e}");
        if connected {
            protocol::send(sink, &ServerMessage::Error { message: e.to_string() }).await?;
        }
        Err(RemoteError::Server(e.to_string()))
    }
}
