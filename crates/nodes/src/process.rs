//! `process`: runs an external program.
//!
//! Argument placeholders:
//! - `{inputs}` expands to the locations of all forward input resources;
//! - `{sinks}` expands to the locations of all upstream (sink) resources.
//!
//! The item holds the write turn on every linked sink for as long as the
//! program runs, and the child is killed if the run is stopped.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::registry::ItemRegistry;
use crate::resource::{ItemInputs, Resource, ResourceKind};
use crate::traits::{
    ExecutionPlan, ExecutionResult, ItemContext, ItemExecutor, ItemSpec, OutputStream,
};
use crate::ItemError;

#[derive(Debug, Deserialize)]
struct ProcessConfig {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    outputs: Vec<OutputFile>,
    /// Run inside a persistent console slot.
    #[serde(default)]
    console: bool,
}

#[derive(Debug, Deserialize)]
struct OutputFile {
    label: String,
    location: String,
    #[serde(default)]
    kind: ResourceKind,
}

/// External program launcher.
pub struct ProcessItem {
    node_id: String,
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    outputs: Vec<Resource>,
    console: bool,
    /// PID of the running child, signalled by `stop`.
    child_pid: Mutex<Option<u32>>,
}

impl ProcessItem {
    pub fn from_spec(spec: &ItemSpec<'_>) -> Result<Self, ItemError> {
        let config: ProcessConfig = spec.parse_config()?;
        if config.program.trim().is_empty() {
            return Err(ItemError::Config(format!(
                "node '{}': program must not be empty",
                spec.node_id
            )));
        }
        let outputs = config
            .outputs
            .into_iter()
            .map(|out| {
                let location = match out.kind {
                    ResourceKind::File => spec.resolve(&out.location).display().to_string(),
                    _ => out.location,
                };
                Resource {
                    kind: out.kind,
                    ..Resource::file(spec.node_id, out.label, location)
                }
            })
            .collect();
        Ok(Self {
            node_id: spec.node_id.to_owned(),
            program: config.program,
            args: config.args,
            cwd: config.cwd.map(|cwd| spec.resolve(cwd)),
            env: config.env,
            outputs,
            console: config.console,
            child_pid: Mutex::new(None),
        })
    }

    fn expand_args(&self, inputs: &ItemInputs) -> Vec<String> {
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            match arg.as_str() {
                "{inputs}" => args.extend(inputs.forward_locations()),
                "{sinks}" => args.extend(inputs.backward.iter().map(|r| r.location.clone())),
                _ => args.push(arg.clone()),
            }
        }
        args
    }
}

async fn pump_lines<R>(reader: Option<R>, ctx: &ItemContext, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        ctx.emit(stream, &line);
    }
}

#[async_trait]
impl ItemExecutor for ProcessItem {
    fn kind(&self) -> &str {
        "process"
    }

    fn uses_console_slot(&self) -> bool {
        self.console
    }

    async fn prepare(
        &self,
        inputs: ItemInputs,
        ctx: &ItemContext,
    ) -> Result<ExecutionPlan, ItemError> {
        let working_dir = self.cwd.clone().unwrap_or_else(|| ctx.work_dir.clone());
        if !working_dir.is_dir() {
            return Err(ItemError::Preparation(format!(
                "working directory '{}' does not exist",
                working_dir.display()
            )));
        }
        Ok(ExecutionPlan {
            program: Some(self.program.clone()),
            args: self.expand_args(&inputs),
            working_dir: Some(working_dir),
            env: self.env.clone(),
            inputs,
            payload: json!(null),
        })
    }

    async fn execute(
        &self,
        plan: ExecutionPlan,
        ctx: &ItemContext,
    ) -> Result<ExecutionResult, ItemError> {
        let program = plan
            .program
            .ok_or_else(|| ItemError::Execution("plan has no program".to_owned()))?;

        let _writes = ctx.begin_all_writes().await?;

        let mut command = Command::new(&program);
        command
            .args(&plan.args)
            .envs(&plan.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &plan.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ItemError::Execution(format!("failed to start '{program}': {e}")))?;
        *self.child_pid.lock().unwrap_or_else(|e| e.into_inner()) = child.id();
        debug!(node = %self.node_id, pid = ?child.id(), %program, "process started");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run = async {
            tokio::join!(
                pump_lines(stdout, ctx, OutputStream::Stdout),
                pump_lines(stderr, ctx, OutputStream::Stderr),
            );
            child.wait().await
        };

        // Returning early drops the child, which kills it.
        let status = tokio::select! {
            status = run => Some(status),
            _ = ctx.cancel.cancelled() => None,
        };
        *self.child_pid.lock().unwrap_or_else(|e| e.into_inner()) = None;
        let status = status.ok_or(ItemError::Cancelled)??;

        match status.code() {
            Some(code) => Ok(ExecutionResult {
                exit_code: Some(code),
                output: json!({ "program": program }),
            }),
            None => Err(ItemError::Execution(format!(
                "'{program}' was terminated by a signal"
            ))),
        }
    }

    fn stop(&self) {
        let pid = *self.child_pid.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pid) = pid {
            terminate(&self.node_id, pid);
        }
    }

    fn advertise_resources(&self, _result: &ExecutionResult) -> Vec<Resource> {
        self.outputs.clone()
    }
}

/// Ask the child to exit; cancellation kills it outright afterwards.
#[cfg(unix)]
fn terminate(node_id: &str, pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => debug!(node = %node_id, pid, "sent SIGTERM"),
        Err(e) => warn!(node = %node_id, pid, "SIGTERM failed: {e}"),
    }
}

#[cfg(not(unix))]
fn terminate(node_id: &str, pid: u32) {
    debug!(node = %node_id, pid, "no stop signal on this platform, waiting for cancellation");
}

pub fn register(registry: &mut ItemRegistry) {
    registry.register("process", |spec| {
        Ok(Arc::new(ProcessItem::from_spec(spec)?) as Arc<dyn ItemExecutor>)
    });
}
