//! The graph model: build and validate a DAG before executing it.
//!
//! Rules enforced by [`Graph::build`]:
//! 1. Node IDs must be unique.
//! 2. Every link must reference valid node IDs (both `source` and `target`).
//! 3. At most one link per ordered (source, target) pair.
//! 4. With loop links removed the graph must be acyclic.
//! 5. A loop link's target must lead to its source (the loop condition).
//! 6. Write indices into shared sinks must be satisfiable in graph order.
//!
//! Every violation is collected; callers get the full list, not the first.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::{ValidationError, ValidationErrors};
use crate::models::{LinkDefinition, NodeDefinition};

/// A validated DAG with adjacency maps and topological layers.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: BTreeMap<String, NodeDefinition>,
    links: Vec<LinkDefinition>,
    predecessors: HashMap<String, Vec<String>>,
    successors: HashMap<String, Vec<String>>,
    loop_successors: HashMap<String, Vec<String>>,
    link_positions: HashMap<(String, String), usize>,
    layers: Vec<BTreeSet<String>>,
    rank: HashMap<String, usize>,
    dispatch_rank: HashMap<String, usize>,
    loop_bodies: HashMap<String, BTreeSet<String>>,
}

impl Graph {
    /// Build the graph, collecting every structural problem.
    ///
    /// # Errors
    /// [`ValidationErrors`] holding one entry per detected issue.
    pub fn build(
        nodes: Vec<NodeDefinition>,
        links: Vec<LinkDefinition>,
    ) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        // -------------------------------------------------------------------
        // 1. Ensure node IDs are unique
        // -------------------------------------------------------------------
        let mut node_map: BTreeMap<String, NodeDefinition> = BTreeMap::new();
        for node in nodes {
            if node_map.contains_key(&node.id) {
                errors.push(ValidationError::DuplicateNodeId(node.id.clone()));
                continue;
            }
            node_map.insert(node.id.clone(), node);
        }

        // -------------------------------------------------------------------
        // 2./3. Validate link endpoints and uniqueness
        // -------------------------------------------------------------------
        let mut kept: Vec<LinkDefinition> = Vec::with_capacity(links.len());
        let mut link_positions: HashMap<(String, String), usize> = HashMap::new();
        for link in links {
            let mut dangling = false;
            for (node_id, side) in [(&link.source, "source"), (&link.target, "target")] {
                if !node_map.contains_key(node_id) {
                    errors.push(ValidationError::DanglingReference {
                        from: link.source.clone(),
                        to: link.target.clone(),
                        node_id: node_id.clone(),
                        side,
                    });
                    dangling = true;
                }
            }
            if dangling {
                continue;
            }
            let key = (link.source.clone(), link.target.clone());
            if link_positions.contains_key(&key) {
                errors.push(ValidationError::DuplicateLink {
                    from: link.source.clone(),
                    to: link.target.clone(),
                });
                continue;
            }
            link_positions.insert(key, kept.len());
            kept.push(link);
        }

        let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
        let mut successors: HashMap<String, Vec<String>> = HashMap::new();
        let mut loop_successors: HashMap<String, Vec<String>> = HashMap::new();
        for id in node_map.keys() {
            predecessors.entry(id.clone()).or_default();
            successors.entry(id.clone()).or_default();
        }
        for link in &kept {
            if link.is_loop() {
                loop_successors
                    .entry(link.source.clone())
                    .or_default()
                    .push(link.target.clone());
            } else {
                successors
                    .entry(link.source.clone())
                    .or_default()
                    .push(link.target.clone());
                predecessors
                    .entry(link.target.clone())
                    .or_default()
                    .push(link.source.clone());
            }
        }
        for list in predecessors
            .values_mut()
            .chain(successors.values_mut())
            .chain(loop_successors.values_mut())
        {
            list.sort();
        }

        // -------------------------------------------------------------------
        // 4. Layered topological sort (Kahn's algorithm) without loop links
        // -------------------------------------------------------------------
        let ids: Vec<&str> = node_map.keys().map(String::as_str).collect();
        let edges: HashMap<&str, Vec<&str>> = successors
            .iter()
            .map(|(k, v)| (k.as_str(), v.iter().map(String::as_str).collect()))
            .collect();
        let layers = kahn_layers(&ids, &edges);
        let sorted: usize = layers.iter().map(BTreeSet::len).sum();
        if sorted != node_map.len() {
            errors.push(ValidationError::Cycle {
                nodes: cyclic_nodes(&ids, &edges),
            });
            // Loop and write-order checks need an acyclic graph.
            return Err(errors);
        }

        let mut rank = HashMap::with_capacity(node_map.len());
        for (index, layer) in layers.iter().enumerate() {
            for id in layer {
                rank.insert(id.clone(), index);
            }
        }

        let mut graph = Self {
            nodes: node_map,
            links: kept,
            predecessors,
            successors,
            loop_successors,
            link_positions,
            layers,
            dispatch_rank: rank.clone(),
            rank,
            loop_bodies: HashMap::new(),
        };

        // -------------------------------------------------------------------
        // 5. Loop bodies
        // -------------------------------------------------------------------
        let loop_links: Vec<(String, String)> = graph
            .links
            .iter()
            .filter(|l| l.is_loop())
            .map(|l| (l.source.clone(), l.target.clone()))
            .collect();
        for (condition, entry) in loop_links {
            let ancestors = graph.ancestors(&condition);
            if entry != condition && !ancestors.contains(&entry) {
                errors.push(ValidationError::InvalidLoop { condition, entry });
                continue;
            }
            let mut body: BTreeSet<String> = graph
                .descendants(&entry)
                .intersection(&ancestors)
                .cloned()
                .collect();
            body.insert(entry);
            body.insert(condition.clone());
            graph.loop_bodies.entry(condition).or_default().extend(body);
        }

        // -------------------------------------------------------------------
        // 6. Write order: lower-index writers finish before higher-index ones
        // -------------------------------------------------------------------
        match graph.write_precedence() {
            Ok(layers) => {
                for (index, layer) in layers.iter().enumerate() {
                    for id in layer {
                        graph.dispatch_rank.insert(id.clone(), index);
                    }
                }
            }
            Err(conflict) => errors.push(conflict),
        }

        errors.into_result().map(|()| graph)
    }

    /// Layers of the graph formed by normal links plus an edge from every
    /// lower-index writer to every higher-index writer of the same target.
    fn write_precedence(&self) -> Result<Vec<BTreeSet<String>>, ValidationError> {
        let mut edges: HashMap<&str, Vec<&str>> = self
            .successors
            .iter()
            .map(|(k, v)| (k.as_str(), v.iter().map(String::as_str).collect()))
            .collect();
        let mut order_edges: Vec<(&str, &str, &str)> = Vec::new();
        for target in self.nodes.keys() {
            let writers: Vec<&LinkDefinition> = self.incoming_links(target).collect();
            for low in &writers {
                for high in &writers {
                    if low.filter.write_index < high.filter.write_index {
                        order_edges.push((low.source.as_str(), high.source.as_str(), target));
                        edges
                            .entry(low.source.as_str())
                            .or_default()
                            .push(high.source.as_str());
                    }
                }
            }
        }
        let ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        if order_edges.is_empty() {
            return Ok(self.layers.clone());
        }
        let layers = kahn_layers(&ids, &edges);
        if layers.iter().map(BTreeSet::len).sum::<usize>() == ids.len() {
            return Ok(layers);
        }
        let stuck = cyclic_nodes(&ids, &edges);
        let sinks: BTreeSet<&str> = order_edges
            .iter()
            .filter(|(low, high, _)| {
                stuck.iter().any(|s| s == low) && stuck.iter().any(|s| s == high)
            })
            .map(|(_, _, sink)| *sink)
            .collect();
        Err(ValidationError::WriteOrderConflict {
            sink: sinks.into_iter().collect::<Vec<_>>().join(", "),
            nodes: stuck,
        })
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.get(id)
    }

    /// All nodes, ordered by ID.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeDefinition> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All links in submission order (invalid ones dropped).
    pub fn links(&self) -> &[LinkDefinition] {
        &self.links
    }

    pub fn link(&self, source: &str, target: &str) -> Option<&LinkDefinition> {
        self.link_position(source, target).map(|i| &self.links[i])
    }

    /// Index of a link in [`Graph::links`].
    pub fn link_position(&self, source: &str, target: &str) -> Option<usize> {
        self.link_positions
            .get(&(source.to_owned(), target.to_owned()))
            .copied()
    }

    /// Normal links ending at `target`.
    pub fn incoming_links<'a>(
        &'a self,
        target: &'a str,
    ) -> impl Iterator<Item = &'a LinkDefinition> + 'a {
        self.direct_predecessors(target)
            .iter()
            .filter_map(move |source| self.link(source, target))
    }

    /// Normal links starting at `source`.
    pub fn outgoing_links<'a>(
        &'a self,
        source: &'a str,
    ) -> impl Iterator<Item = &'a LinkDefinition> + 'a {
        self.direct_successors(source)
            .iter()
            .filter_map(move |target| self.link(source, target))
    }

    /// Sources of normal links into `id`, sorted.
    pub fn direct_predecessors(&self, id: &str) -> &[String] {
        self.predecessors.get(id).map_or(&[], Vec::as_slice)
    }

    /// Targets of normal links out of `id`, sorted.
    pub fn direct_successors(&self, id: &str) -> &[String] {
        self.successors.get(id).map_or(&[], Vec::as_slice)
    }

    /// Targets of loop links out of `id`, sorted.
    pub fn loop_successors(&self, id: &str) -> &[String] {
        self.loop_successors.get(id).map_or(&[], Vec::as_slice)
    }

    pub fn is_loop_condition(&self, id: &str) -> bool {
        !self.loop_successors(id).is_empty()
    }

    /// Nodes re-run when the loop condition `condition` asks for another iteration.
    pub fn loop_body(&self, condition: &str) -> Option<&BTreeSet<String>> {
        self.loop_bodies.get(condition)
    }

    /// Layers of mutually independent nodes, in dependency order.
    pub fn topological_layers(&self) -> &[BTreeSet<String>] {
        &self.layers
    }

    /// Layer index of a node; only used to break ties deterministically.
    pub fn rank(&self, id: &str) -> usize {
        self.rank.get(id).copied().unwrap_or(usize::MAX)
    }

    /// Scheduling priority: the layer index once writers into a shared target
    /// are ordered by write index. Equals [`Graph::rank`] without ordered writes.
    pub fn dispatch_rank(&self, id: &str) -> usize {
        self.dispatch_rank.get(id).copied().unwrap_or(usize::MAX)
    }

    /// Every node reachable from `id` over normal links, excluding `id`.
    pub fn descendants(&self, id: &str) -> BTreeSet<String> {
        self.reach(id, &self.successors)
    }

    /// Every node that reaches `id` over normal links, excluding `id`.
    pub fn ancestors(&self, id: &str) -> BTreeSet<String> {
        self.reach(id, &self.predecessors)
    }

    fn reach(&self, start: &str, adjacency: &HashMap<String, Vec<String>>) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in adjacency.get(current).into_iter().flatten() {
                if seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
        seen.remove(start);
        seen
    }
}

/// Kahn's algorithm, one id-sorted set per layer. Nodes on or behind a cycle
/// never reach in-degree zero and are left out.
fn kahn_layers(ids: &[&str], edges: &HashMap<&str, Vec<&str>>) -> Vec<BTreeSet<String>> {
    let mut in_degree: HashMap<&str, usize> = ids.iter().map(|&id| (id, 0)).collect();
    for targets in edges.values() {
        for &target in targets {
            *in_degree.entry(target).or_insert(0) += 1;
        }
    }

    let mut current: BTreeSet<&str> = in_degree
        .iter()
        .filter(|&(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut layers = Vec::new();
    while !current.is_empty() {
        let mut next = BTreeSet::new();
        for &node in &current {
            for &neighbour in edges.get(node).into_iter().flatten() {
                let degree = in_degree.entry(neighbour).or_insert(0);
                *degree -= 1;
                if *degree == 0 {
                    next.insert(neighbour);
                }
            }
        }
        layers.push(current.iter().map(|&id| id.to_owned()).collect());
        current = next;
    }
    layers
}

/// Nodes that lie on a cycle (or between cycles), sorted.
fn cyclic_nodes(ids: &[&str], edges: &HashMap<&str, Vec<&str>>) -> Vec<String> {
    let sorted: HashSet<String> = kahn_layers(ids, edges).into_iter().flatten().collect();
    let mut remaining: BTreeSet<&str> = ids
        .iter()
        .copied()
        .filter(|id| !sorted.contains(*id))
        .collect();

    // Peel off nodes that merely hang below a cycle.
    loop {
        let sinks: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|node| {
                !edges
                    .get(node)
                    .into_iter()
                    .flatten()
                    .any(|next| remaining.contains(next))
            })
            .collect();
        if sinks.is_empty() {
            break;
        }
        for node in sinks {
            remaining.remove(node);
        }
    }
    remaining.into_iter().map(str::to_owned).collect()
}
