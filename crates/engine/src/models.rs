//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a DAG submission looks like
//! in memory. They serialize to and from the JSON document the authoring
//! tool produces and the remote protocol carries.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use nodes::FilterType;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// NodeDefinition
// ---------------------------------------------------------------------------

/// A single item in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier within this DAG (referenced by links).
    pub id: String,
    /// Maps to a registered item factory.
    pub kind: String,
    /// Arbitrary configuration passed to the item factory.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

// ---------------------------------------------------------------------------
// LinkDefinition
// ---------------------------------------------------------------------------

/// Whether a link carries resources or closes a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    #[default]
    Normal,
    /// Back edge from a loop condition to the loop's first node.
    Loop,
}

/// Per-link resource filter and write configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub filter_type: FilterType,
    /// Selected scenario/alternative ids; `None` lets everything through.
    pub selected: Option<BTreeSet<String>>,
    /// Ids this link has already seen from its source.
    pub known_filters: BTreeSet<String>,
    pub check_new_filters_automatically: bool,
    /// Require at least one selected id.
    pub filter_validation: bool,
    /// Position of this link's writes into a shared sink.
    pub write_index: u32,
    pub purge_before_write: bool,
}

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDefinition {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub kind: LinkKind,
    #[serde(default)]
    pub filter: FilterConfig,
}

impl LinkDefinition {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: LinkKind::Normal,
            filter: FilterConfig::default(),
        }
    }

    /// A loop edge from `condition` back to `entry`.
    pub fn looping(condition: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::Loop,
            ..Self::new(condition, entry)
        }
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_write_index(mut self, index: u32) -> Self {
        self.filter.write_index = index;
        self
    }

    pub fn is_loop(&self) -> bool {
        self.kind == LinkKind::Loop
    }
}

// ---------------------------------------------------------------------------
// RunSettings
// ---------------------------------------------------------------------------

/// A slot budget: `"unlimited"`, `"auto"` (available parallelism) or a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotLimit {
    Unlimited,
    Auto,
    Fixed(usize),
}

impl SlotLimit {
    /// The concrete permit count, `None` for no limit.
    pub fn resolve(self) -> Option<usize> {
        match self {
            Self::Unlimited => None,
            Self::Auto => Some(num_cpus::get().max(1)),
            Self::Fixed(n) => Some(n),
        }
    }
}

impl fmt::Display for SlotLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Auto => f.write_str("auto"),
            Self::Fixed(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for SlotLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unlimited" | "none" => Ok(Self::Unlimited),
            "auto" => Ok(Self::Auto),
            other => other
                .parse::<usize>()
                .map(Self::Fixed)
                .map_err(|_| format!("invalid slot limit '{s}'")),
        }
    }
}

impl Serialize for SlotLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Fixed(n) => {
                serializer.serialize_u64(u64::try_from(*n).map_err(serde::ser::Error::custom)?)
            }
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for SlotLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u64),
            Word(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Count(n) => usize::try_from(n)
                .map(Self::Fixed)
                .map_err(serde::de::Error::custom),
            Raw::Word(word) => word.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Global run settings carried by the DAG document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub max_concurrent_processes: SlotLimit,
    pub max_open_consoles: SlotLimit,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_concurrent_processes: SlotLimit::Auto,
            max_open_consoles: SlotLimit::Unlimited,
        }
    }
}

// ---------------------------------------------------------------------------
// DagDocument
// ---------------------------------------------------------------------------

/// A complete DAG submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagDocument {
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub links: Vec<LinkDefinition>,
    #[serde(default)]
    pub settings: RunSettings,
}

impl DagDocument {
    /// Convenience constructor for testing.
    pub fn new(nodes: Vec<NodeDefinition>, links: Vec<LinkDefinition>) -> Self {
        Self {
            nodes,
            links,
            settings: RunSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the filter configuration of links matching `updated` by
    /// (source, target), e.g. after auto-included filters were returned by a run.
    pub fn apply_link_updates(&mut self, updated: &[LinkDefinition]) {
        for link in &mut self.links {
            if let Some(new) = updated
                .iter()
                .find(|u| u.source == link.source && u.target == link.target)
            {
                link.filter = new.filter.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_parses_with_defaults() {
        let doc: DagDocument = serde_json::from_value(json!({
            "nodes": [
                { "id": "a", "kind": "mock" },
                { "id": "b", "kind": "mock", "config": { "delay_ms": 5 } }
            ],
            "links": [
                { "source": "a", "target": "b",
                  "filter": { "selected": ["base"], "write_index": 2 } },
                { "source": "b", "target": "a", "kind": "loop" }
            ],
            "settings": { "max_concurrent_processes": 2, "max_open_consoles": "unlimited" }
        }))
        .unwrap();

        assert_eq!(doc.links[0].filter.write_index, 2);
        assert_eq!(doc.links[0].filter.filter_type, FilterType::Scenario);
        assert!(doc.links[1].is_loop());
        assert_eq!(doc.settings.max_concurrent_processes, SlotLimit::Fixed(2));
        assert_eq!(doc.settings.max_open_consoles, SlotLimit::Unlimited);
    }

    #[test]
    fn slot_limit_round_trips_words_and_counts() {
        for limit in [SlotLimit::Auto, SlotLimit::Unlimited, SlotLimit::Fixed(3)] {
            let text = serde_json::to_string(&limit).unwrap();
            assert_eq!(serde_json::from_str::<SlotLimit>(&text).unwrap(), limit);
        }
        assert!("lots".parse::<SlotLimit>().is_err());
    }

    #[test]
    fn slot_limit_counts_must_fit_the_platform() {
        assert!(serde_json::from_str::<SlotLimit>("-1").is_err());
        let huge = serde_json::from_str::<SlotLimit>(&u64::MAX.to_string());
        match usize::try_from(u64::MAX) {
            Ok(n) => assert_eq!(huge.unwrap(), SlotLimit::Fixed(n)),
            Err(_) => assert!(huge.is_err()),
        }
    }

    #[test]
    fn link_updates_replace_filters_by_endpoints() {
        let mut doc = DagDocument::new(
            vec![NodeDefinition::new("a", "mock"), NodeDefinition::new("b", "mock")],
            vec![LinkDefinition::new("a", "b")],
        );
        let mut updated = LinkDefinition::new("a", "b");
        updated.filter.known_filters.insert("base".into());
        doc.apply_link_updates(&[updated.clone()]);
        assert_eq!(doc.links[0], updated);
    }
}
