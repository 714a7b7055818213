//! Edge class editing: attaching ends, direction, and splitting an edge
//! class back into a node class with two edges.

use tracing::debug;

use super::{ClassId, ClassKind, ClassSpec, EdgeLinks, EdgeSide, NodeLinks};
use crate::{errors::ModelError, model::NetworkModel, table::TableId};

/// Result of cutting a table chain at its pivot.
struct ChainSplit {
    edge_table: TableId,
    /// From the pivot toward the far node class.
    node_side: Vec<TableId>,
    /// From the pivot toward the class being split.
    edge_side: Vec<TableId>,
}

impl NetworkModel {
    pub fn edge_links(&self, edge_id: &ClassId) -> Result<&EdgeLinks, ModelError> {
        self.class(edge_id)?
            .edge_links()
            .ok_or_else(|| ModelError::contract(format!("{edge_id} is not an edge class")))
    }

    fn edge_links_mut(&mut self, edge_id: &ClassId) -> Result<&mut EdgeLinks, ModelError> {
        self.class_mut(edge_id)?
            .edge_links_mut()
            .ok_or_else(|| ModelError::contract(format!("{edge_id} is not an edge class")))
    }

    pub fn connect_source(
        &mut self,
        edge_id: &ClassId,
        node_id: &ClassId,
        node_attribute: Option<&str>,
        edge_attribute: Option<&str>,
    ) -> Result<(), ModelError> {
        self.connect_side(edge_id, EdgeSide::Source, node_id, node_attribute, edge_attribute)
    }

    pub fn connect_target(
        &mut self,
        edge_id: &ClassId,
        node_id: &ClassId,
        node_attribute: Option<&str>,
        edge_attribute: Option<&str>,
    ) -> Result<(), ModelError> {
        self.connect_side(edge_id, EdgeSide::Target, node_id, node_attribute, edge_attribute)
    }

    /// Attaches `node_id` to one end of the edge, replacing any class that
    /// was there. The chain is `[edge promotion?, join, node promotion?]`.
    /// Tables are derived before any link changes, so a failed call leaves
    /// both classes as they were.
    pub(crate) fn connect_side(
        &mut self,
        edge_id: &ClassId,
        side: EdgeSide,
        node_id: &ClassId,
        node_attribute: Option<&str>,
        edge_attribute: Option<&str>,
    ) -> Result<(), ModelError> {
        self.require_node(node_id)?;
        self.edge_links(edge_id)?;
        if [node_attribute, edge_attribute].into_iter().flatten().any(str::is_empty) {
            return Err(ModelError::contract(format!("connecting {edge_id} requires non-empty attributes")));
        }

        let edge_table = self.class(edge_id)?.table_id.clone();
        let node_table = self.class(node_id)?.table_id.clone();
        let edge_hash = match edge_attribute {
            Some(attribute) => self.promote(&edge_table, attribute)?,
            None => edge_table,
        };
        let node_hash = match node_attribute {
            Some(attribute) => self.promote(&node_table, attribute)?,
            None => node_table,
        };
        let connected = self.connect(&edge_hash, &[node_hash.clone()])?;

        let mut chain = Vec::with_capacity(3);
        if edge_attribute.is_some() {
            chain.push(edge_hash);
        }
        chain.push(connected);
        if node_attribute.is_some() {
            chain.push(node_hash);
        }

        if self.edge_links(edge_id)?.class_id(side).is_some() {
            self.disconnect_side(edge_id, side)?;
        }
        self.register_edge(node_id, edge_id)?;
        self.edge_links_mut(edge_id)?.set_side(side, Some(node_id.clone()), chain);
        debug!(edge = %edge_id, node = %node_id, ?side, "connected edge end");
        self.notify_update();
        Ok(())
    }

    pub fn disconnect_source(&mut self, edge_id: &ClassId) -> Result<(), ModelError> {
        self.disconnect_side(edge_id, EdgeSide::Source)
    }

    pub fn disconnect_target(&mut self, edge_id: &ClassId) -> Result<(), ModelError> {
        self.disconnect_side(edge_id, EdgeSide::Target)
    }

    pub(crate) fn disconnect_side(&mut self, edge_id: &ClassId, side: EdgeSide) -> Result<(), ModelError> {
        let links = self.edge_links_mut(edge_id)?;
        let Some(node_id) = links.class_id(side).cloned() else {
            return Ok(());
        };
        links.set_side(side, None, Vec::new());
        let still_attached = links.class_id(side.opposite()) == Some(&node_id);
        if !still_attached {
            if let Some(node) = self.classes.get_mut(&node_id).and_then(|c| c.node_links_mut()) {
                node.edge_class_ids.remove(edge_id);
            }
        }
        self.notify_update();
        Ok(())
    }

    /// Cycles undirected → directed → directed with ends swapped →
    /// undirected (swapping the ends back). `Some(false)` goes straight to
    /// undirected; `Some(true)` only directs an undirected edge.
    pub fn toggle_direction(&mut self, edge_id: &ClassId, directed: Option<bool>) -> Result<(), ModelError> {
        let links = self.edge_links_mut(edge_id)?;
        match directed {
            Some(false) => {
                if links.swapped_direction {
                    links.swap_sides();
                }
                links.directed = false;
                links.swapped_direction = false;
            }
            Some(true) => {
                if !links.directed {
                    links.directed = true;
                    links.swapped_direction = false;
                }
            }
            None => {
                if !links.directed {
                    links.directed = true;
                    links.swapped_direction = false;
                } else if !links.swapped_direction {
                    links.swap_sides();
                    links.swapped_direction = true;
                } else {
                    links.swap_sides();
                    links.directed = false;
                    links.swapped_direction = false;
                }
            }
        }
        self.notify_update();
        Ok(())
    }

    fn split_table_chain(
        &mut self,
        own_table: &TableId,
        chain: &[TableId],
        other_id: &ClassId,
    ) -> Result<ChainSplit, ModelError> {
        if chain.is_empty() {
            let other_table = self.class(other_id)?.table_id.clone();
            return Ok(ChainSplit {
                edge_table: self.connect(own_table, &[other_table])?,
                node_side: Vec::new(),
                edge_side: Vec::new(),
            });
        }
        let pivot = self.pick_pivot(chain)?;
        Ok(ChainSplit {
            edge_table: chain[pivot].clone(),
            node_side: chain[pivot + 1..].to_vec(),
            edge_side: chain[..pivot].iter().rev().cloned().collect(),
        })
    }

    /// Turns an edge class into a node class with the same id, with a new
    /// edge class toward each former end.
    pub(crate) fn interpret_edge_as_nodes(&mut self, edge_id: &ClassId) -> Result<ClassId, ModelError> {
        let links = self.edge_links(edge_id)?.clone();
        let own_table = self.class(edge_id)?.table_id.clone();
        self.disconnect_side(edge_id, EdgeSide::Source)?;
        self.disconnect_side(edge_id, EdgeSide::Target)?;
        self.replace_class_kind(edge_id, ClassKind::Node(NodeLinks::default()))?;

        if let Some(source_id) = &links.source_class_id {
            let split = self.split_table_chain(&own_table, &links.source_table_ids, source_id)?;
            let new_edge = self.create_class(ClassSpec::edge(
                split.edge_table,
                EdgeLinks {
                    source_class_id: Some(source_id.clone()),
                    source_table_ids: split.node_side,
                    target_class_id: Some(edge_id.clone()),
                    target_table_ids: split.edge_side,
                    directed: links.directed,
                    swapped_direction: false,
                },
            ))?;
            self.register_edge(source_id, &new_edge)?;
            self.register_edge(edge_id, &new_edge)?;
        }
        if let Some(target_id) = &links.target_class_id {
            let split = self.split_table_chain(&own_table, &links.target_table_ids, target_id)?;
            let new_edge = self.create_class(ClassSpec::edge(
                split.edge_table,
                EdgeLinks {
                    source_class_id: Some(edge_id.clone()),
                    source_table_ids: split.edge_side,
                    target_class_id: Some(target_id.clone()),
                    target_table_ids: split.node_side,
                    directed: links.directed,
                    swapped_direction: false,
                },
            ))?;
            self.register_edge(edge_id, &new_edge)?;
            self.register_edge(target_id, &new_edge)?;
        }
        Ok(edge_id.clone())
    }

    /// Gives a class derived from an edge class the same ends, reached
    /// through the original edge table.
    pub(crate) fn copy_edge_connections(&mut self, original_id: &ClassId, new_id: &ClassId) -> Result<(), ModelError> {
        let Some(links) = self.class(original_id)?.edge_links().cloned() else {
            return Ok(());
        };
        let original_table = self.class(original_id)?.table_id.clone();
        let mut copied = EdgeLinks {
            directed: links.directed,
            ..EdgeLinks::default()
        };
        for side in [EdgeSide::Source, EdgeSide::Target] {
            if let Some(node_id) = links.class_id(side) {
                let chain = std::iter::once(original_table.clone())
                    .chain(links.table_ids(side).iter().cloned())
                    .collect();
                copied.set_side(side, Some(node_id.clone()), chain);
            }
        }
        let ends: Vec<ClassId> = [copied.source_class_id.clone(), copied.target_class_id.clone()]
            .into_iter()
            .flatten()
            .collect();
        *self.edge_links_mut(new_id)? = copied;
        for node_id in ends {
            self.register_edge(&node_id, new_id)?;
        }
        Ok(())
    }
}
