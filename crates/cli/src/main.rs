//! `workflow-engine` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: check a DAG document and print its layers.
//! - `run`: run a DAG document locally, streaming events as JSON lines.
//! - `serve`: start the remote execution server.
//! - `submit`: run a DAG document on a remote server.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engine::{DagDocument, Event, EventStream, ExecutorConfig, RunOutcome, RunState, WorkflowExecutor};
use nodes::ItemRegistry;
use remote::{ClientSettings, ClientTls, DisconnectPolicy, Server, ServerSettings};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "workflow-engine",
    about = "DAG workflow engine with local and remote execution",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a DAG document without running it.
    Validate {
        /// Path to the DAG JSON file.
        path: PathBuf,
    },
    /// Run a DAG document on this machine.
    Run {
        path: PathBuf,
        /// Directory relative item paths resolve against (default: the document's directory).
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Write auto-included filter selections back into the document.
        #[arg(long)]
        save: bool,
    },
    /// Start the remote execution server.
    Serve {
        /// TOML server configuration.
        #[arg(long, env = "WORKFLOW_SERVER_CONFIG")]
        config: Option<PathBuf>,
        #[arg(long, env = "WORKFLOW_BIND")]
        bind: Option<SocketAddr>,
        /// `cancel` or `finish`.
        #[arg(long, env = "WORKFLOW_DISCONNECT_POLICY")]
        disconnect_policy: Option<DisconnectPolicy>,
    },
    /// Run a DAG document on a remote server.
    Submit {
        path: PathBuf,
        #[arg(long, env = "WORKFLOW_SERVER", default_value = remote::DEFAULT_BIND)]
        server: String,
        /// Files or directories to bundle, relative to the document.
        #[arg(long = "include")]
        include: Vec<PathBuf>,
        /// TOML client configuration with a `[tls]` table.
        #[arg(long, env = "WORKFLOW_CLIENT_CONFIG")]
        tls_config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let executor = WorkflowExecutor::new(ItemRegistry::with_builtins(), ExecutorConfig::from_env());

    match cli.command {
        Command::Validate { path } => validate(&executor, &path),
        Command::Run {
            path,
            work_dir,
            save,
        } => run(&executor, &path, work_dir, save).await,
        Command::Serve {
            config,
            bind,
            disconnect_policy,
        } => serve(executor, config, bind, disconnect_policy).await,
        Command::Submit {
            path,
            server,
            include,
            tls_config,
        } => submit(&path, &server, &include, tls_config).await,
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn load_document(path: &Path) -> Result<DagDocument> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("{} is not a DAG document", path.display()))
}

fn document_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn validate(executor: &WorkflowExecutor, path: &Path) -> Result<()> {
    let document = load_document(path)?;
    match executor.prepare(&document, document_dir(path)) {
        Ok(prepared) => {
            println!("✅ DAG is valid. Layers:");
            for (rank, layer) in prepared.graph().topological_layers().iter().enumerate() {
                let names: Vec<&str> = layer.iter().map(String::as_str).collect();
                println!("  {rank}: {}", names.join(", "));
            }
            Ok(())
        }
        Err(errors) => {
            for error in errors.iter() {
                eprintln!("❌ {error}");
            }
            bail!("{} validation error(s)", errors.0.len())
        }
    }
}

fn print_event(event: &Event) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

fn report(outcome: &RunOutcome) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    if outcome.state != RunState::Succeeded {
        bail!("run {} ended {:?}", outcome.run_id, outcome.state);
    }
    Ok(())
}

/// Cancel `token` on the first Ctrl-C.
fn stop_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            token.cancel();
        }
    });
}

async fn run(executor: &WorkflowExecutor, path: &Path, work_dir: Option<PathBuf>, save: bool) -> Result<()> {
    let mut document = load_document(path)?;
    let work_dir = work_dir.unwrap_or_else(|| document_dir(path));
    let prepared = match executor.prepare(&document, work_dir) {
        Ok(prepared) => prepared,
        Err(errors) => {
            for error in errors.iter() {
                eprintln!("❌ {error}");
            }
            bail!("{} validation error(s)", errors.0.len());
        }
    };

    let (events, mut rx) = EventStream::channel(prepared.run_id());
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event)?;
        }
        anyhow::Ok(())
    });

    let stop = CancellationToken::new();
    stop_on_ctrl_c(stop.clone());
    let outcome = executor.run(prepared, events, stop).await?;
    printer.await.context("event printer panicked")??;

    if save {
        document.apply_link_updates(&outcome.links);
        let json = serde_json::to_string_pretty(&document)?;
        std::fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
        info!(path = %path.display(), "saved link selections");
    }
    report(&outcome)
}

async fn serve(
    executor: WorkflowExecutor,
    config: Option<PathBuf>,
    bind: Option<SocketAddr>,
    disconnect_policy: Option<DisconnectPolicy>,
) -> Result<()> {
    let mut settings = match &config {
        Some(path) => ServerSettings::load(path)
            .with_context(|| format!("loading server config {}", path.display()))?,
        None => ServerSettings::default(),
    };
    if let Some(bind) = bind {
        settings.bind = bind;
    }
    if let Some(policy) = disconnect_policy {
        settings.disconnect_policy = policy;
    }

    let server = Server::new(executor, &settings).context("configuring server")?;
    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("cannot bind {}", settings.bind))?;

    let shutdown = CancellationToken::new();
    stop_on_ctrl_c(shutdown.clone());
    server.serve(listener, shutdown).await?;
    Ok(())
}

async fn submit(path: &Path, server: &str, include: &[PathBuf], tls_config: Option<PathBuf>) -> Result<()> {
    let document = load_document(path)?;
    let files = remote::bundle_files(&document_dir(path), include).context("bundling files")?;

    let tls = match &tls_config {
        Some(config) => {
            let settings = ClientSettings::load(config)
                .with_context(|| format!("loading client config {}", config.display()))?;
            let Some(tls) = settings.tls else {
                bail!("{} has no [tls] table", config.display());
            };
            let host = server.rsplit_once(':').map_or(server, |(host, _)| host);
            Some(ClientTls::from_settings(&tls, host)?)
        }
        None => None,
    };

    let client = remote::Client::connect(server, tls.as_ref())
        .await
        .with_context(|| format!("cannot reach {server}"))?;
    let mut run = client.submit(document, files).await?;
    info!(run_id = %run.run_id(), "submitted");

    let stop = CancellationToken::new();
    stop_on_ctrl_c(stop.clone());
    let handle = run.stop_handle();
    tokio::spawn(async move {
        stop.cancelled().await;
        if let Err(e) = handle.stop().await {
            warn!("could not send STOP: {e}");
        }
    });

    while let Some(event) = run.next_event().await? {
        print_event(&event)?;
    }
    report(&run.finish().await?)
}
