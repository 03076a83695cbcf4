//! `file-set`: advertises a fixed set of files and database URLs.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::registry::ItemRegistry;
use crate::resource::{FilterType, ItemInputs, Resource, ResourceKind};
use crate::traits::{ExecutionPlan, ExecutionResult, ItemContext, ItemExecutor, ItemSpec};
use crate::ItemError;

#[derive(Debug, Deserialize)]
struct FileSetConfig {
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    label: String,
    location: String,
    #[serde(default)]
    kind: ResourceKind,
    #[serde(default)]
    scenarios: Option<BTreeSet<String>>,
    #[serde(default)]
    alternatives: Option<BTreeSet<String>>,
}

/// Static resource provider.
pub struct FileSetItem {
    resources: Vec<Resource>,
}

impl FileSetItem {
    pub fn from_spec(spec: &ItemSpec<'_>) -> Result<Self, ItemError> {
        let config: FileSetConfig = spec.parse_config()?;
        let resources = config
            .files
            .into_iter()
            .map(|entry| {
                let location = match entry.kind {
                    ResourceKind::File => spec.resolve(&entry.location).display().to_string(),
                    _ => entry.location,
                };
                let mut resource = Resource {
                    kind: entry.kind,
                    ..Resource::file(spec.node_id, entry.label, location)
                };
                if let Some(scenarios) = entry.scenarios {
                    resource = resource.with_tags(FilterType::Scenario, scenarios);
                }
                if let Some(alternatives) = entry.alternatives {
                    resource = resource.with_tags(FilterType::Alternative, alternatives);
                }
                resource
            })
            .collect();
        Ok(Self { resources })
    }
}

#[async_trait]
impl ItemExecutor for FileSetItem {
    fn kind(&self) -> &str {
        "file-set"
    }

    fn uses_process_slot(&self) -> bool {
        false
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
        for resource in self.resources.iter().filter(|r| r.kind == ResourceKind::File) {
            if tokio::fs::metadata(&resource.location).await.is_err() {
                return Err(ItemError::Execution(format!(
                    "file '{}' ({}) does not exist",
                    resource.location, resource.label
                )));
            }
        }
        Ok(ExecutionResult::success())
    }

    fn advertise_resources(&self, _result: &ExecutionResult) -> Vec<Resource> {
        self.resources.clone()
    }
}

pub fn register(registry: &mut ItemRegistry) {
    registry.register("file-set", |spec| {
        Ok(Arc::new(FileSetItem::from_spec(spec)?) as Arc<dyn ItemExecutor>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::DiscardOutput;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    #[tokio::test]
    async fn advertises_tagged_resources_relative_to_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.csv"), "a,b\n").unwrap();
        let config = json!({
            "files": [
                { "label": "data", "location": "data.csv" },
                { "label": "db", "location": "sqlite:///x.sqlite", "kind": "database",
                  "scenarios": ["base", "high"] }
            ]
        });
        let spec = ItemSpec {
            node_id: "inputs",
            config: &config,
            work_dir: dir.path(),
        };
        let item = FileSetItem::from_spec(&spec).unwrap();
        let ctx = ItemContext::new(
            Uuid::new_v4(),
            "inputs",
            dir.path(),
            CancellationToken::new(),
            Arc::new(DiscardOutput),
        );
        let result = item.execute(ExecutionPlan::default(), &ctx).await.unwrap();
        let resources = item.advertise_resources(&result);

        assert_eq!(resources.len(), 2);
        assert_eq!(
            resources[0].location,
            dir.path().join("data.csv").display().to_string()
        );
        assert_eq!(resources[1].kind, ResourceKind::Database);
        assert_eq!(
            resources[1].tags_of(FilterType::Scenario).unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn missing_file_fails_execution() {
        let dir = tempfile::tempdir().unwrap();
        let config = json!({ "files": [{ "label": "gone", "location": "gone.txt" }] });
        let spec = ItemSpec {
            node_id: "inputs",
            config: &config,
            work_dir: dir.path(),
        };
        let item = FileSetItem::from_spec(&spec).unwrap();
        let ctx = ItemContext::new(
            Uuid::new_v4(),
            "inputs",
            dir.path(),
            CancellationToken::new(),
            Arc::new(DiscardOutput),
        );
        assert!(item.execute(ExecutionPlan::default(), &ctx).await.is_err());
    }
}
