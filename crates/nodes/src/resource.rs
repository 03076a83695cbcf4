//! Resources: the opaque handles items hand to their neighbours.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// What a resource's `location` points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A path on the local file system.
    #[default]
    File,
    /// A database URL.
    Database,
    /// Any other URL.
    Url,
}

/// The two mutually exclusive filter families a link can select on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    #[default]
    Scenario,
    Alternative,
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scenario => f.write_str("scenario"),
            Self::Alternative => f.write_str("alternative"),
        }
    }
}

/// The selection a link applied to a resource on its way to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedFilter {
    pub filter_type: FilterType,
    pub selected: BTreeSet<String>,
}

/// A reference to a file or database produced or consumed by an item.
///
/// The engine never opens a resource; it only routes references between
/// linked items and narrows their filter tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// ID of the node that advertised this resource.
    pub provider: String,
    /// Human readable name, unique per provider.
    pub label: String,
    #[serde(default)]
    pub kind: ResourceKind,
    /// File-system path or URL.
    pub location: String,
    /// Scenario/alternative identifiers this resource is valid under.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<FilterType, BTreeSet<String>>,
    /// Set by the engine when the resource crossed a filtering link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<AppliedFilter>,
}

impl Resource {
    /// A plain file resource.
    pub fn file(
        provider: impl Into<String>,
        label: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            label: label.into(),
            kind: ResourceKind::File,
            location: location.into(),
            tags: BTreeMap::new(),
            filter: None,
        }
    }

    /// A database resource.
    pub fn database(
        provider: impl Into<String>,
        label: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            kind: ResourceKind::Database,
            ..Self::file(provider, label, url)
        }
    }

    /// Tag the resource as valid under the given identifiers of one filter type.
    pub fn with_tags<I, S>(mut self, filter_type: FilterType, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(filter_type)
            .or_default()
            .extend(tags.into_iter().map(Into::into));
        self
    }

    /// Tags of one filter type, if the resource declares any.
    pub fn tags_of(&self, filter_type: FilterType) -> Option<&BTreeSet<String>> {
        self.tags.get(&filter_type)
    }
}

/// Resources handed to an item's `prepare`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInputs {
    /// Filtered resources advertised by direct predecessors.
    pub forward: Vec<Resource>,
    /// Resources advertised upstream by direct successors (e.g. sink destinations).
    pub backward: Vec<Resource>,
}

impl ItemInputs {
    /// Locations of all forward resources, in delivery order.
    pub fn forward_locations(&self) -> Vec<String> {
        self.forward.iter().map(|r| r.location.clone()).collect()
    }
}
