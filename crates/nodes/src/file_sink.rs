//! `file-sink`: a destination file other items write into in link order.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::registry::ItemRegistry;
use crate::resource::{ItemInputs, Resource};
use crate::traits::{ExecutionPlan, ExecutionResult, ItemContext, ItemExecutor, ItemSpec};
use crate::ItemError;

#[derive(Debug, Deserialize)]
struct FileSinkConfig {
    path: PathBuf,
    #[serde(default = "default_label")]
    label: String,
}

fn default_label() -> String {
    "sink".to_owned()
}

/// Resource sink backed by one file.
///
/// Writers find the destination among their upstream resources; the sink
/// itself only advertises the file and truncates it on purge.
pub struct FileSinkItem {
    node_id: String,
    label: String,
    path: PathBuf,
}

impl FileSinkItem {
    pub fn from_spec(spec: &ItemSpec<'_>) -> Result<Self, ItemError> {
        let config: FileSinkConfig = spec.parse_config()?;
        Ok(Self {
            node_id: spec.node_id.to_owned(),
            label: config.label,
            path: spec.resolve(config.path),
        })
    }

    fn resource(&self) -> Resource {
        Resource::file(&self.node_id, &self.label, self.path.display().to_string())
    }
}

#[async_trait]
impl ItemExecutor for FileSinkItem {
    fn kind(&self) -> &str {
        "file-sink"
    }

    fn uses_process_slot(&self) -> bool {
        false
    }

    fn upstream_resources(&self) -> Vec<Resource> {
        vec![self.resource()]
    }

    async fn prepare(
        &self,
        inputs: ItemInputs,
        _ctx: &ItemContext,
    ) -> Result<ExecutionPlan, ItemError> {
        Ok(ExecutionPlan::from_inputs(inputs))
    }

    async fn execute(
        &self,
        _plan: ExecutionPlan,
        _ctx: &ItemContext,
    ) -> Result<ExecutionResult, ItemError> {
        if tokio::fs::metadata(&self.path).await.is_err() {
            tokio::fs::write(&self.path, b"").await?;
        }
        Ok(ExecutionResult::success())
    }

    fn advertise_resources(&self, _result: &ExecutionResult) -> Vec<Resource> {
        vec![self.resource()]
    }

    async fn purge(&self) -> Result<(), ItemError> {
        tokio::fs::write(&self.path, b"").await?;
        Ok(())
    }
}

pub fn register(registry: &mut ItemRegistry) {
    registry.register("file-sink", |spec| {
        Ok(Arc::new(FileSinkItem::from_spec(spec)?) as Arc<dyn ItemExecutor>)
    });
}
