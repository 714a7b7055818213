//! Node class editing: connecting nodes, collapsing a node into an edge and
//! projecting edges across paths.

use tracing::debug;

use super::{ClassId, ClassKind, ClassSpec, EdgeLinks, EdgeRole, EdgeSide};
use crate::{errors::ModelError, model::NetworkModel, table::TableId};

/// One incident edge seen from a node: the table chain leading away from
/// the node through the edge, and the class at the far end.
struct OutwardHop {
    chain: Vec<TableId>,
    other: Option<ClassId>,
    role: EdgeSide,
    directed: bool,
}

impl NetworkModel {
    pub(crate) fn require_node(&self, class_id: &ClassId) -> Result<(), ModelError> {
        match self.class(class_id)?.kind {
            ClassKind::Node(_) => Ok(()),
            _ => Err(ModelError::contract(format!("{class_id} is not a node class"))),
        }
    }

    pub fn edge_class_ids(&self, node_id: &ClassId) -> Result<Vec<ClassId>, ModelError> {
        self.class(node_id)?
            .node_links()
            .map(|links| links.edge_class_ids.iter().cloned().collect())
            .ok_or_else(|| ModelError::contract(format!("{node_id} is not a node class")))
    }

    pub fn edge_role(&self, node_id: &ClassId, edge_id: &ClassId) -> Result<Option<EdgeRole>, ModelError> {
        let links = self.edge_links(edge_id)?;
        let is_source = links.source_class_id.as_ref() == Some(node_id);
        let is_target = links.target_class_id.as_ref() == Some(node_id);
        Ok(match (is_source, is_target) {
            (true, true) => Some(EdgeRole::Both),
            (true, false) => Some(EdgeRole::Source),
            (false, true) => Some(EdgeRole::Target),
            (false, false) => None,
        })
    }

    pub(crate) fn register_edge(&mut self, node_id: &ClassId, edge_id: &ClassId) -> Result<(), ModelError> {
        let links = self
            .class_mut(node_id)?
            .node_links_mut()
            .ok_or_else(|| ModelError::contract(format!("{node_id} is not a node class")))?;
        links.edge_class_ids.insert(edge_id.clone());
        Ok(())
    }

    /// Creates an edge class between two node classes. With an attribute a
    /// side is promoted on it first; if both sides land on the same table
    /// that table serves as the edge table directly.
    pub fn connect_to_node_class(
        &mut self,
        node_id: &ClassId,
        other_id: &ClassId,
        attribute: Option<&str>,
        other_attribute: Option<&str>,
    ) -> Result<ClassId, ModelError> {
        self.require_node(node_id)?;
        self.require_node(other_id)?;
        let this_table = self.class(node_id)?.table_id.clone();
        let other_table = self.class(other_id)?.table_id.clone();
        let this_hash = match attribute {
            Some(attribute) => self.promote(&this_table, attribute)?,
            None => this_table,
        };
        let other_hash = match other_attribute {
            Some(attribute) => self.promote(&other_table, attribute)?,
            None => other_table,
        };

        let (edge_table, source_table_ids, target_table_ids) = if this_hash == other_hash {
            (this_hash, Vec::new(), Vec::new())
        } else {
            let connected = self.connect(&this_hash, &[other_hash.clone()])?;
            let source = if attribute.is_some() { vec![this_hash] } else { Vec::new() };
            let target = if other_attribute.is_some() { vec![other_hash] } else { Vec::new() };
            (connected, source, target)
        };

        let edge_id = self.create_class(ClassSpec::edge(
            edge_table,
            EdgeLinks {
                source_class_id: Some(node_id.clone()),
                source_table_ids,
                target_class_id: Some(other_id.clone()),
                target_table_ids,
                ..EdgeLinks::default()
            },
        ))?;
        self.register_edge(node_id, &edge_id)?;
        self.register_edge(other_id, &edge_id)?;
        debug!(source = %node_id, target = %other_id, edge = %edge_id, "connected node classes");
        Ok(edge_id)
    }

    pub fn connect_to_edge_class(
        &mut self,
        node_id: &ClassId,
        edge_id: &ClassId,
        side: EdgeSide,
        node_attribute: Option<&str>,
        edge_attribute: Option<&str>,
    ) -> Result<(), ModelError> {
        self.connect_side(edge_id, side, node_id, node_attribute, edge_attribute)
    }

    /// Joins a node class derived by expand/unroll back to its parent node
    /// class with a parent/child edge.
    pub fn connect_to_child_node_class(&mut self, parent_id: &ClassId, child_id: &ClassId) -> Result<ClassId, ModelError> {
        self.require_node(parent_id)?;
        self.require_node(child_id)?;
        let parent_table = self.class(parent_id)?.table_id.clone();
        let child_table = self.class(child_id)?.table_id.clone();
        let edge_table = self.connect_parent_child(&parent_table, &child_table)?;
        let edge_id = self.create_class(ClassSpec::edge(
            edge_table,
            EdgeLinks {
                source_class_id: Some(parent_id.clone()),
                target_class_id: Some(child_id.clone()),
                ..EdgeLinks::default()
            },
        ))?;
        self.register_edge(parent_id, &edge_id)?;
        self.register_edge(child_id, &edge_id)?;
        Ok(edge_id)
    }

    pub fn disconnect_all_edges(&mut self, node_id: &ClassId) -> Result<(), ModelError> {
        for edge_id in self.edge_class_ids(node_id)? {
            if !self.classes.contains_key(&edge_id) {
                continue;
            }
            match self.edge_role(node_id, &edge_id)? {
                Some(EdgeRole::Source) => self.disconnect_side(&edge_id, EdgeSide::Source)?,
                Some(EdgeRole::Target) => self.disconnect_side(&edge_id, EdgeSide::Target)?,
                Some(EdgeRole::Both) => {
                    self.disconnect_side(&edge_id, EdgeSide::Source)?;
                    self.disconnect_side(&edge_id, EdgeSide::Target)?;
                }
                None => {}
            }
        }
        if let Some(links) = self.class_mut(node_id)?.node_links_mut() {
            links.edge_class_ids.clear();
        }
        self.notify_update();
        Ok(())
    }

    fn outward_hop(&self, node_id: &ClassId, edge_id: &ClassId) -> Result<OutwardHop, ModelError> {
        let edge = self.class(edge_id)?;
        let links = self.edge_links(edge_id)?;
        let (role, near, far, other) = match self.edge_role(node_id, edge_id)? {
            Some(EdgeRole::Source) => (
                EdgeSide::Source,
                &links.source_table_ids,
                &links.target_table_ids,
                links.target_class_id.clone(),
            ),
            Some(EdgeRole::Target) => (
                EdgeSide::Target,
                &links.target_table_ids,
                &links.source_table_ids,
                links.source_class_id.clone(),
            ),
            // Both ends are the class being collapsed, so nothing lies beyond.
            Some(EdgeRole::Both) => {
                return Ok(OutwardHop {
                    chain: Vec::new(),
                    other: None,
                    role: EdgeSide::Source,
                    directed: false,
                });
            }
            None => {
                return Err(ModelError::contract(format!("{edge_id} is not connected to {node_id}")));
            }
        };
        let chain = match other {
            Some(_) => near
                .iter()
                .rev()
                .cloned()
                .chain(std::iter::once(edge.table_id.clone()))
                .chain(far.iter().cloned())
                .collect(),
            None => Vec::new(),
        };
        Ok(OutwardHop {
            chain,
            other,
            role,
            directed: links.directed,
        })
    }

    /// Turns a node class into an edge class with the same id. One incident
    /// edge gives a self-edge on the far class, two give an edge between
    /// their far ends, more leave a floating edge. A self-loop on the node
    /// has no far end and leaves its side of the new edge unconnected.
    pub(crate) fn interpret_node_as_edges(&mut self, node_id: &ClassId) -> Result<ClassId, ModelError> {
        let edge_ids = self.edge_class_ids(node_id)?;
        let links = match edge_ids.as_slice() {
            [only] => {
                let hop = self.outward_hop(node_id, only)?;
                EdgeLinks {
                    source_class_id: hop.other.clone(),
                    source_table_ids: hop.chain.clone(),
                    target_class_id: hop.other,
                    target_table_ids: hop.chain,
                    directed: hop.directed,
                    swapped_direction: false,
                }
            }
            [first, second] => {
                let mut incoming = self.outward_hop(node_id, first)?;
                let mut outgoing = self.outward_hop(node_id, second)?;
                let mut directed = false;
                if incoming.directed && outgoing.directed {
                    if incoming.role == EdgeSide::Target && outgoing.role == EdgeSide::Source {
                        directed = true;
                    } else if incoming.role == EdgeSide::Source && outgoing.role == EdgeSide::Target {
                        std::mem::swap(&mut incoming, &mut outgoing);
                        directed = true;
                    }
                }
                EdgeLinks {
                    source_class_id: incoming.other,
                    source_table_ids: incoming.chain,
                    target_class_id: outgoing.other,
                    target_table_ids: outgoing.chain,
                    directed,
                    swapped_direction: false,
                }
            }
            _ => EdgeLinks::default(),
        };

        self.disconnect_all_edges(node_id)?;
        let source = links.source_class_id.clone();
        let target = links.target_class_id.clone();
        self.replace_class_kind(node_id, ClassKind::Edge(links))?;
        for end in [source, target].into_iter().flatten() {
            self.register_edge(&end, node_id)?;
        }
        Ok(node_id.clone())
    }

    /// Index of the table to use as an edge table within `chain`: static
    /// tables first, then the one closest to the middle.
    pub(crate) fn pick_pivot(&self, chain: &[TableId]) -> Result<usize, ModelError> {
        let mut statics = Vec::new();
        for (index, table_id) in chain.iter().enumerate() {
            if self.table(table_id)?.kind.is_static() {
                statics.push(index);
            }
        }
        let candidates: Vec<usize> = if statics.is_empty() {
            (0..chain.len()).collect()
        } else {
            statics
        };
        candidates
            .into_iter()
            .min_by_key(|&index| (2 * index).abs_diff(chain.len()))
            .ok_or_else(|| ModelError::contract("cannot pick a pivot from an empty table chain"))
    }

    /// Creates an edge class from `node_id` to the last class of `path`,
    /// which alternates edge and node classes.
    pub fn project_new_edge(&mut self, node_id: &ClassId, path: &[ClassId]) -> Result<ClassId, ModelError> {
        self.require_node(node_id)?;
        let Some(target_id) = path.last() else {
            return Err(ModelError::contract("invalid class path: empty"));
        };
        if path.len() < 2 {
            return Err(ModelError::contract("invalid class path: too short"));
        }
        self.require_node(target_id)?;

        let mut order: Vec<TableId> = Vec::new();
        let mut previous = node_id.clone();
        for class_id in path {
            let class = self.class(class_id)?;
            match &class.kind {
                ClassKind::Node(_) => order.push(class.table_id.clone()),
                ClassKind::Edge(links) => {
                    let (near, far) = match self.edge_role(&previous, class_id)? {
                        Some(EdgeRole::Source | EdgeRole::Both) => (&links.source_table_ids, &links.target_table_ids),
                        Some(EdgeRole::Target) => (&links.target_table_ids, &links.source_table_ids),
                        None => {
                            return Err(ModelError::contract(format!(
                                "invalid class path: {class_id} does not touch {previous}"
                            )));
                        }
                    };
                    order.extend(near.iter().rev().cloned());
                    order.push(class.table_id.clone());
                    order.extend(far.iter().cloned());
                }
                ClassKind::Generic {} => {
                    return Err(ModelError::contract(format!("invalid class path: {class_id} is generic")));
                }
            }
            previous = class_id.clone();
        }
        order.pop();

        let (edge_table, source_table_ids, target_table_ids) = if order.is_empty() {
            let source_table = self.class(node_id)?.table_id.clone();
            let target_table = self.class(target_id)?.table_id.clone();
            (self.connect(&source_table, &[target_table])?, Vec::new(), Vec::new())
        } else {
            let pivot = self.pick_pivot(&order)?;
            (
                order[pivot].clone(),
                order[..pivot].iter().rev().cloned().collect(),
                order[pivot + 1..].to_vec(),
            )
        };
        let edge_id = self.create_class(ClassSpec::edge(
            edge_table,
            EdgeLinks {
                source_class_id: Some(node_id.clone()),
                source_table_ids,
                target_class_id: Some(target_id.clone()),
                target_table_ids,
                ..EdgeLinks::default()
            },
        ))?;
        self.register_edge(node_id, &edge_id)?;
        self.register_edge(target_id, &edge_id)?;
        Ok(edge_id)
    }
}
