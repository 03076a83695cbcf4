//! Resource filter layer: narrows what crosses a link.
//!
//! A link of filter type `T` computes its selection as
//! `selected ∩ available` (or `available` when nothing is selected), where
//! `available` is the union of the `T` tags on the source's resources.
//! Tagged resources outside the selection are dropped; untagged ones pass.

use std::collections::BTreeSet;

use nodes::{AppliedFilter, Resource};

use crate::error::FilterError;
use crate::models::LinkDefinition;

/// What crossed the link, and whether the link configuration changed.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredResources {
    pub resources: Vec<Resource>,
    /// The computed selection.
    pub selection: BTreeSet<String>,
    /// Tags added to the link's selection by auto-include.
    pub newly_included: BTreeSet<String>,
}

/// Union of the `filter_type` tags on `resources`.
pub fn available_filters(link: &LinkDefinition, resources: &[Resource]) -> BTreeSet<String> {
    resources
        .iter()
        .filter_map(|r| r.tags_of(link.filter.filter_type))
        .flatten()
        .cloned()
        .collect()
}

/// Filter `resources` for delivery across `link`.
///
/// Auto-include updates `link` in place before the selection is computed and
/// validated, so a newly seen tag can satisfy `filter_validation`.
///
/// # Errors
/// [`FilterError::EmptyFilter`] when validation is on and the computed
/// selection is empty.
pub fn apply_link_filter(
    link: &mut LinkDefinition,
    resources: &[Resource],
) -> Result<FilteredResources, FilterError> {
    let available = available_filters(link, resources);

    let mut newly_included = BTreeSet::new();
    if link.filter.check_new_filters_automatically {
        newly_included = available
            .difference(&link.filter.known_filters)
            .cloned()
            .collect();
        if let Some(selected) = link.filter.selected.as_mut() {
            selected.extend(newly_included.iter().cloned());
        }
        link.filter.known_filters.extend(newly_included.iter().cloned());
    }

    let selection: BTreeSet<String> = match &link.filter.selected {
        Some(selected) => selected.intersection(&available).cloned().collect(),
        None => available.clone(),
    };

    if link.filter.filter_validation && selection.is_empty() {
        return Err(FilterError::EmptyFilter {
            from: link.source.clone(),
            to: link.target.clone(),
            filter_type: link.filter.filter_type,
        });
    }

    let filter_type = link.filter.filter_type;
    let resources = resources
        .iter()
        .filter_map(|resource| match resource.tags_of(filter_type) {
            None => Some(resource.clone()),
            Some(tags) => {
                let matched: BTreeSet<String> = tags.intersection(&selection).cloned().collect();
                if matched.is_empty() {
                    return None;
                }
                Some(Resource {
                    filter: Some(AppliedFilter {
                        filter_type,
                        selected: matched,
                    }),
                    ..resource.clone()
                })
            }
        })
        .collect();

    Ok(FilteredResources {
        resources,
        selection,
        newly_included,
    })
}
