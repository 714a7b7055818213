//! Bounded instance previews for renderers.

use std::collections::{BTreeMap, BTreeSet};

use ahash::{AHashMap, AHashSet};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use super::{InstanceGraph, InstanceGraphEdge, InstanceGraphNode, NetworkModel};
use crate::{
    class::{ClassId, ClassKind, InstanceQuery},
    config::SampleConfig,
    errors::ModelError,
    item::{InstanceId, ItemKey},
    table::BuildOutcome,
};

/// Sampled instances keyed by their class-relative identity.
pub type InstanceSample = BTreeMap<InstanceId, ItemKey>;

/// Bookkeeping for one sampling pass.
struct SampleState<'a> {
    config: &'a SampleConfig,
    sample: InstanceSample,
    counts: BTreeMap<ClassId, usize>,
    /// Rows of each class not drawn yet, already shuffled.
    pools: BTreeMap<ClassId, Vec<ItemKey>>,
    sizes: BTreeMap<ClassId, usize>,
}

impl SampleState<'_> {
    fn is_full(&self) -> bool {
        self.sample.len() >= self.config.seed_limit
    }

    /// A class is under-represented while it has fewer instances than both
    /// `class_count` and its row count.
    fn under_represented(&self) -> Vec<ClassId> {
        self.sizes
            .iter()
            .filter(|(class_id, size)| {
                let have = self.counts.get(*class_id).copied().unwrap_or(0);
                have < self.config.class_count.min(**size)
            })
            .map(|(class_id, _)| class_id.clone())
            .collect()
    }

    fn insert(&mut self, instance: InstanceId, key: ItemKey) -> bool {
        if self.is_full() || self.sample.contains_key(&instance) {
            return false;
        }
        *self.counts.entry(instance.class_id.clone()).or_default() += 1;
        self.sample.insert(instance, key);
        true
    }
}

impl NetworkModel {
    /// Draws a preview of the model's instances.
    ///
    /// Repeatedly picks a random undrawn row from an under-represented class
    /// and pulls in up to `cluster_limit` neighbors of each newly added
    /// instance, depth first, until `seed_limit` instances are sampled or
    /// no class is under-represented. Returns `None` when a build was
    /// cancelled or a sampled item was evicted during the walk.
    pub fn instance_sample<R: Rng + ?Sized>(
        &mut self,
        config: &SampleConfig,
        rng: &mut R,
    ) -> Result<Option<InstanceSample>, ModelError> {
        let mut state = SampleState {
            config,
            sample: InstanceSample::new(),
            counts: BTreeMap::new(),
            pools: BTreeMap::new(),
            sizes: BTreeMap::new(),
        };
        for class_id in self.class_ids() {
            let table_id = self.class(&class_id)?.table_id.clone();
            let mut rows = match self.build_cache(&table_id)? {
                BuildOutcome::Ready(rows) => rows,
                BuildOutcome::Cancelled => {
                    warn!(class = %class_id, "sampling aborted: build cancelled");
                    return Ok(None);
                }
            };
            rows.shuffle(rng);
            state.sizes.insert(class_id.clone(), rows.len());
            state.pools.insert(class_id, rows);
        }

        while !state.is_full() {
            let wanted: Vec<ClassId> = state
                .under_represented()
                .into_iter()
                .filter(|class_id| state.pools.get(class_id).is_some_and(|pool| !pool.is_empty()))
                .collect();
            if wanted.is_empty() {
                break;
            }
            let class_id = &wanted[rng.gen_range(0..wanted.len())];
            let Some(seed) = state.pools.get_mut(class_id).and_then(Vec::pop) else {
                continue;
            };
            let Some(instance) = self.instance_id(seed) else {
                warn!(class = %class_id, "sampling aborted: seed item evicted");
                return Ok(None);
            };
            if !state.insert(instance, seed) {
                continue;
            }
            if !self.populate_sample(seed, &mut state)? {
                warn!(class = %class_id, "sampling aborted: neighbor walk cancelled");
                return Ok(None);
            }
        }

        if state.sample.values().any(|&key| !self.items.contains(key)) {
            warn!("sampling aborted: sampled item evicted");
            return Ok(None);
        }
        debug!(instances = state.sample.len(), classes = state.counts.len(), "sampled instances");
        Ok(Some(state.sample))
    }

    /// Depth-first neighbor expansion from `seed`. False on cancellation.
    fn populate_sample(&mut self, seed: ItemKey, state: &mut SampleState<'_>) -> Result<bool, ModelError> {
        let mut stack = vec![seed];
        while let Some(key) = stack.pop() {
            if state.is_full() {
                break;
            }
            let wanted = state.under_represented();
            if wanted.is_empty() {
                break;
            }
            let query = InstanceQuery {
                class_ids: Some(wanted.clone()),
                limit: None,
            };
            let neighbors = match self.instance_neighbors(key, &query)? {
                BuildOutcome::Ready(neighbors) => neighbors,
                BuildOutcome::Cancelled => return Ok(false),
            };
            let mut pulled = 0;
            for neighbor in neighbors {
                if pulled >= state.config.cluster_limit {
                    break;
                }
                let Some(instance) = self.instance_id(neighbor) else {
                    return Ok(false);
                };
                if !wanted.contains(&instance.class_id) {
                    continue;
                }
                if state.insert(instance, neighbor) {
                    pulled += 1;
                    stack.push(neighbor);
                }
            }
        }
        Ok(true)
    }

    /// Completes a sample so it renders sensibly: every sampled edge gets an
    /// endpoint on each connected side that has none sampled, and every edge
    /// between two sampled nodes is added.
    pub fn fill_instance_sample(&mut self, sample: &InstanceSample) -> Result<BuildOutcome<InstanceSample>, ModelError> {
        let mut filled = sample.clone();
        let mut keys: AHashSet<ItemKey> = sample.values().copied().collect();
        let unbounded = InstanceQuery::default();

        let mut edges = Vec::new();
        let mut nodes = Vec::new();
        for (instance, &key) in sample {
            match self.class(&instance.class_id)?.kind {
                ClassKind::Edge(_) => edges.push(key),
                ClassKind::Node(_) => nodes.push(key),
                ClassKind::Generic {} => {}
            }
        }

        for &edge in &edges {
            for side_nodes in [
                self.instance_source_nodes(edge, &unbounded)?,
                self.instance_target_nodes(edge, &unbounded)?,
            ] {
                let BuildOutcome::Ready(side_nodes) = side_nodes else {
                    return Ok(BuildOutcome::Cancelled);
                };
                if side_nodes.iter().any(|node| keys.contains(node)) {
                    continue;
                }
                if let Some(&node) = side_nodes.first() {
                    let Some(instance) = self.instance_id(node) else {
                        return Ok(BuildOutcome::Cancelled);
                    };
                    keys.insert(node);
                    nodes.push(node);
                    filled.insert(instance, node);
                }
            }
        }

        for &node in &nodes {
            let BuildOutcome::Ready(node_edges) = self.instance_edges(node, &unbounded)? else {
                return Ok(BuildOutcome::Cancelled);
            };
            for edge in node_edges {
                if keys.contains(&edge) {
                    continue;
                }
                let BuildOutcome::Ready(ends) = self.instance_neighbors(edge, &unbounded)? else {
                    return Ok(BuildOutcome::Cancelled);
                };
                let sampled_ends = ends.iter().filter(|end| keys.contains(end)).count();
                let self_loop = ends.len() == 1 && ends[0] == node;
                if sampled_ends >= 2 || self_loop {
                    let Some(instance) = self.instance_id(edge) else {
                        return Ok(BuildOutcome::Cancelled);
                    };
                    keys.insert(edge);
                    filled.insert(instance, edge);
                }
            }
        }
        Ok(BuildOutcome::Ready(filled))
    }

    /// Flattens a sample into node and edge arrays. An edge end whose class
    /// is not connected gets a placeholder node of its own.
    pub fn instance_sample_to_graph(&mut self, sample: &InstanceSample) -> Result<BuildOutcome<InstanceGraph>, ModelError> {
        let mut graph = InstanceGraph::default();
        let mut node_lookup: AHashMap<ItemKey, usize> = AHashMap::new();
        let mut edge_instances = Vec::new();

        for (instance, &key) in sample {
            if !self.items.contains(key) {
                return Ok(BuildOutcome::Cancelled);
            }
            if let ClassKind::Edge(_) = self.class(&instance.class_id)?.kind {
                edge_instances.push((instance.clone(), key));
                continue;
            }
            node_lookup.insert(key, graph.nodes.len());
            graph.nodes.push(InstanceGraphNode {
                id: instance.export_id(),
                class_id: Some(instance.class_id.clone()),
                index: Some(instance.index.clone()),
                label: self.item_label(key).unwrap_or_default(),
                dummy: false,
            });
        }

        let unbounded = InstanceQuery::default();
        for (instance, key) in edge_instances {
            let links = self.edge_links(&instance.class_id)?.clone();
            let mut ends: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
            for (slot, class_id) in [&links.source_class_id, &links.target_class_id].into_iter().enumerate() {
                if class_id.is_none() {
                    let dummy = graph.nodes.len();
                    graph.nodes.push(InstanceGraphNode {
                        id: format!("{}_dummy{slot}", instance.export_id()),
                        class_id: None,
                        index: None,
                        label: String::new(),
                        dummy: true,
                    });
                    ends[slot].push(dummy);
                    continue;
                }
                let found = if slot == 0 {
                    self.instance_source_nodes(key, &unbounded)?
                } else {
                    self.instance_target_nodes(key, &unbounded)?
                };
                let BuildOutcome::Ready(found) = found else {
                    return Ok(BuildOutcome::Cancelled);
                };
                let mut seen = BTreeSet::new();
                ends[slot].extend(
                    found
                        .iter()
                        .filter_map(|node| node_lookup.get(node).copied())
                        .filter(|index| seen.insert(*index)),
                );
            }
            let pairs: Vec<(usize, usize)> = ends[0]
                .iter()
                .flat_map(|&source| ends[1].iter().map(move |&target| (source, target)))
                .collect();
            let multiple = pairs.len() > 1;
            for (n, (source, target)) in pairs.into_iter().enumerate() {
                let id = if multiple {
                    format!("{}_{n}", instance.export_id())
                } else {
                    instance.export_id()
                };
                graph.edges.push(InstanceGraphEdge {
                    id,
                    class_id: instance.class_id.clone(),
                    index: instance.index.clone(),
                    source,
                    target,
                    directed: links.directed,
                });
            }
        }
        Ok(BuildOutcome::Ready(graph))
    }
}
