//! Walking from one item to related items along class connections.

use ahash::AHashSet;

use super::{ClassId, ClassKind, EdgeRole, EdgeSide};
use crate::{
    errors::ModelError,
    item::{InstanceId, ItemKey},
    model::NetworkModel,
    rules::value_to_key,
    table::{BuildOutcome, TableId},
};

/// Optional bounds for instance traversal.
#[derive(Clone, Debug, Default)]
pub struct InstanceQuery {
    /// Only follow connections to these classes.
    pub class_ids: Option<Vec<ClassId>>,
    pub limit: Option<usize>,
}

impl InstanceQuery {
    pub fn limit(limit: usize) -> Self {
        Self {
            class_ids: None,
            limit: Some(limit),
        }
    }

    fn allows(&self, class_id: &ClassId) -> bool {
        self.class_ids.as_ref().is_none_or(|ids| ids.contains(class_id))
    }

    fn remaining(&self, found: usize) -> Option<usize> {
        self.limit.map(|limit| limit.saturating_sub(found))
    }

    fn is_full(&self, found: usize) -> bool {
        self.limit.is_some_and(|limit| found >= limit)
    }
}

/// Appends `found` to `out` without repeats.
fn merge(out: &mut Vec<ItemKey>, seen: &mut AHashSet<ItemKey>, found: Vec<ItemKey>) {
    for key in found {
        if seen.insert(key) {
            out.push(key);
        }
    }
}

impl NetworkModel {
    /// Class of the item's table, if any.
    pub fn item_class(&self, key: ItemKey) -> Option<ClassId> {
        let item = self.items.get(key)?;
        self.class_for_table(item.table_id())
    }

    pub fn instance_id(&self, key: ItemKey) -> Option<InstanceId> {
        let item = self.items.get(key)?;
        Some(InstanceId {
            class_id: self.class_for_table(item.table_id())?,
            index: item.index.clone(),
        })
    }

    /// The row attribute named by the class's `labelAttr` annotation, else
    /// the index.
    pub fn item_label(&self, key: ItemKey) -> Option<String> {
        let item = self.items.get(key)?;
        let label_attr = self
            .item_class(key)
            .and_then(|class_id| self.classes.get(&class_id))
            .and_then(|class| class.annotations.get("labelAttr"))
            .and_then(|value| value.as_str().map(str::to_string));
        Some(match label_attr.and_then(|attr| item.row.get(&attr)) {
            Some(value) => value_to_key(value),
            None => item.index.to_string(),
        })
    }

    /// Builds every table of `chain`, then follows the item's links hop by
    /// hop, depth first. An item evicted meanwhile reports cancellation.
    pub fn iterate_across_connections(
        &mut self,
        key: ItemKey,
        chain: &[TableId],
        limit: Option<usize>,
    ) -> Result<BuildOutcome<Vec<ItemKey>>, ModelError> {
        for table_id in chain {
            if self.build_cache(table_id)?.is_cancelled() {
                return Ok(BuildOutcome::Cancelled);
            }
        }
        if !self.items.contains(key) {
            return Ok(BuildOutcome::Cancelled);
        }
        let mut out = Vec::new();
        let mut seen = AHashSet::new();
        let mut stack = vec![(key, 0usize)];
        while let Some((current, depth)) = stack.pop() {
            if limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
            let Some(hop) = chain.get(depth) else {
                if seen.insert(current) {
                    out.push(current);
                }
                continue;
            };
            let Some(item) = self.items.get(current) else {
                continue;
            };
            for &next in item.connected_in(hop).iter().rev() {
                stack.push((next, depth + 1));
            }
        }
        Ok(BuildOutcome::Ready(out))
    }

    fn walk_into(
        &mut self,
        key: ItemKey,
        chain: &[TableId],
        query: &InstanceQuery,
        out: &mut Vec<ItemKey>,
        seen: &mut AHashSet<ItemKey>,
    ) -> Result<bool, ModelError> {
        match self.iterate_across_connections(key, chain, query.remaining(out.len()))? {
            BuildOutcome::Ready(found) => {
                merge(out, seen, found);
                Ok(true)
            }
            BuildOutcome::Cancelled => Ok(false),
        }
    }

    /// Edge items attached to a node item.
    pub fn instance_edges(
        &mut self,
        key: ItemKey,
        query: &InstanceQuery,
    ) -> Result<BuildOutcome<Vec<ItemKey>>, ModelError> {
        let Some(node_id) = self.item_class(key) else {
            return Ok(BuildOutcome::Ready(Vec::new()));
        };
        let edge_ids = match &self.class(&node_id)?.kind {
            ClassKind::Node(links) => links.edge_class_ids.iter().filter(|id| query.allows(id)).cloned().collect::<Vec<_>>(),
            _ => return Ok(BuildOutcome::Ready(Vec::new())),
        };
        let mut out = Vec::new();
        let mut seen = AHashSet::new();
        for edge_id in edge_ids {
            let role = self.edge_role(&node_id, &edge_id)?;
            let edge_table = self.class(&edge_id)?.table_id.clone();
            let links = self.edge_links(&edge_id)?.clone();
            let mut chains = Vec::new();
            if matches!(role, Some(EdgeRole::Source | EdgeRole::Both)) {
                chains.push(links.source_table_ids.clone());
            }
            if matches!(role, Some(EdgeRole::Target | EdgeRole::Both)) {
                chains.push(links.target_table_ids.clone());
            }
            for side_chain in chains {
                let chain: Vec<TableId> = side_chain
                    .into_iter()
                    .rev()
                    .chain(std::iter::once(edge_table.clone()))
                    .collect();
                if !self.walk_into(key, &chain, query, &mut out, &mut seen)? {
                    return Ok(BuildOutcome::Cancelled);
                }
                if query.is_full(out.len()) {
                    return Ok(BuildOutcome::Ready(out));
                }
            }
        }
        Ok(BuildOutcome::Ready(out))
    }

    fn instance_end_nodes(
        &mut self,
        key: ItemKey,
        side: EdgeSide,
        query: &InstanceQuery,
    ) -> Result<BuildOutcome<Vec<ItemKey>>, ModelError> {
        let Some(edge_id) = self.item_class(key) else {
            return Ok(BuildOutcome::Ready(Vec::new()));
        };
        let Some(links) = self.class(&edge_id)?.edge_links() else {
            return Ok(BuildOutcome::Ready(Vec::new()));
        };
        let Some(node_id) = links.class_id(side).cloned() else {
            return Ok(BuildOutcome::Ready(Vec::new()));
        };
        if !query.allows(&node_id) {
            return Ok(BuildOutcome::Ready(Vec::new()));
        }
        let mut chain = links.table_ids(side).to_vec();
        chain.push(self.class(&node_id)?.table_id.clone());
        self.iterate_across_connections(key, &chain, query.limit)
    }

    pub fn instance_source_nodes(
        &mut self,
        key: ItemKey,
        query: &InstanceQuery,
    ) -> Result<BuildOutcome<Vec<ItemKey>>, ModelError> {
        self.instance_end_nodes(key, EdgeSide::Source, query)
    }

    pub fn instance_target_nodes(
        &mut self,
        key: ItemKey,
        query: &InstanceQuery,
    ) -> Result<BuildOutcome<Vec<ItemKey>>, ModelError> {
        self.instance_end_nodes(key, EdgeSide::Target, query)
    }

    /// Edges of a node item, or both ends of an edge item.
    pub fn instance_neighbors(
        &mut self,
        key: ItemKey,
        query: &InstanceQuery,
    ) -> Result<BuildOutcome<Vec<ItemKey>>, ModelError> {
        let Some(class_id) = self.item_class(key) else {
            return Ok(BuildOutcome::Ready(Vec::new()));
        };
        match self.class(&class_id)?.kind {
            ClassKind::Node(_) => self.instance_edges(key, query),
            ClassKind::Edge(_) => {
                let mut out = Vec::new();
                let mut seen = AHashSet::new();
                for side in [EdgeSide::Source, EdgeSide::Target] {
                    let bounded = InstanceQuery {
                        class_ids: query.class_ids.clone(),
                        limit: query.remaining(out.len()),
                    };
                    match self.instance_end_nodes(key, side, &bounded)? {
                        BuildOutcome::Ready(found) => merge(&mut out, &mut seen, found),
                        BuildOutcome::Cancelled => return Ok(BuildOutcome::Cancelled),
                    }
                    if query.is_full(out.len()) {
                        break;
                    }
                }
                Ok(BuildOutcome::Ready(out))
            }
            ClassKind::Generic {} => Ok(BuildOutcome::Ready(Vec::new())),
        }
    }

    /// Node items one edge away from a node item.
    pub fn instance_neighbor_nodes(
        &mut self,
        key: ItemKey,
        query: &InstanceQuery,
    ) -> Result<BuildOutcome<Vec<ItemKey>>, ModelError> {
        let edges = match self.instance_edges(key, &InstanceQuery::default())? {
            BuildOutcome::Ready(edges) => edges,
            BuildOutcome::Cancelled => return Ok(BuildOutcome::Cancelled),
        };
        let unbounded = InstanceQuery {
            class_ids: query.class_ids.clone(),
            limit: None,
        };
        let mut out = Vec::new();
        let mut seen = AHashSet::new();
        seen.insert(key);
        for edge in edges {
            for side in [EdgeSide::Source, EdgeSide::Target] {
                match self.instance_end_nodes(edge, side, &unbounded)? {
                    BuildOutcome::Ready(found) => merge(&mut out, &mut seen, found),
                    BuildOutcome::Cancelled => return Ok(BuildOutcome::Cancelled),
                }
                if query.is_full(out.len()) {
                    out.truncate(query.limit.unwrap_or(out.len()));
                    return Ok(BuildOutcome::Ready(out));
                }
            }
        }
        Ok(BuildOutcome::Ready(out))
    }
}
