//! Operations every class supports, whatever its kind.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::{ClassId, ClassKind, ClassSpec, EdgeLinks, EdgeSide, NodeLinks};
use crate::{
    errors::ModelError,
    item::ItemIndex,
    model::NetworkModel,
    rules::Reducer,
    table::{BuildOutcome, BuildStep, TableId},
};

impl NetworkModel {
    /// Custom name, else a name built from the table lineage (edges use
    /// their endpoint names when both ends are connected).
    pub fn class_name(&self, class_id: &ClassId) -> Result<String, ModelError> {
        let class = self.class(class_id)?;
        if let Some(name) = &class.class_name {
            return Ok(name.clone());
        }
        if let Some(links) = class.edge_links() {
            if let (Some(source), Some(target)) = (&links.source_class_id, &links.target_class_id) {
                if source != class_id && target != class_id {
                    let arrow = if links.directed { "→" } else { "—" };
                    return Ok(format!(
                        "{} {arrow} {}",
                        self.class_name(source)?,
                        self.class_name(target)?
                    ));
                }
            }
        }
        self.table_name(&class.table_id)
    }

    /// `node_PeopleAndPlaces` style identifier for generated code and exports.
    pub fn variable_name(&self, class_id: &ClassId) -> Result<String, ModelError> {
        let prefix = match self.class(class_id)?.kind {
            ClassKind::Generic {} => "generic",
            ClassKind::Node(_) => "node",
            ClassKind::Edge(_) => "edge",
        };
        let words: String = self
            .class_name(class_id)?
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect();
        Ok(format!("{prefix}_{words}"))
    }

    pub fn set_class_name(&mut self, class_id: &ClassId, name: Option<&str>) -> Result<(), ModelError> {
        self.class_mut(class_id)?.class_name = name.map(str::to_string);
        self.notify_update();
        Ok(())
    }

    pub fn set_class_annotation(&mut self, class_id: &ClassId, key: &str, value: Value) -> Result<(), ModelError> {
        self.class_mut(class_id)?.annotations.insert(key.to_string(), value);
        self.notify_update();
        Ok(())
    }

    pub fn delete_class_annotation(&mut self, class_id: &ClassId, key: &str) -> Result<(), ModelError> {
        self.class_mut(class_id)?.annotations.remove(key);
        self.notify_update();
        Ok(())
    }

    /// Replaces the kind in place, keeping id, table, name and annotations.
    pub(crate) fn replace_class_kind(&mut self, class_id: &ClassId, kind: ClassKind) -> Result<(), ModelError> {
        let table_id = {
            let class = self.class_mut(class_id)?;
            class.kind = kind;
            class.table_id.clone()
        };
        self.reset_table(&table_id)?;
        debug!(class = %class_id, "reinterpreted class");
        self.notify_update();
        Ok(())
    }

    /// Drops every connection of a node or edge class.
    fn disconnect_class(&mut self, class_id: &ClassId) -> Result<(), ModelError> {
        match &self.class(class_id)?.kind {
            ClassKind::Generic {} => {}
            ClassKind::Node(_) => self.disconnect_all_edges(class_id)?,
            ClassKind::Edge(_) => {
                self.disconnect_side(class_id, EdgeSide::Source)?;
                self.disconnect_side(class_id, EdgeSide::Target)?;
            }
        }
        Ok(())
    }

    pub fn interpret_as_generic(&mut self, class_id: &ClassId) -> Result<ClassId, ModelError> {
        self.disconnect_class(class_id)?;
        self.replace_class_kind(class_id, ClassKind::Generic {})?;
        Ok(class_id.clone())
    }

    pub fn interpret_as_nodes(&mut self, class_id: &ClassId) -> Result<ClassId, ModelError> {
        match &self.class(class_id)?.kind {
            ClassKind::Node(_) => Ok(class_id.clone()),
            ClassKind::Generic {} => {
                self.replace_class_kind(class_id, ClassKind::Node(NodeLinks::default()))?;
                Ok(class_id.clone())
            }
            ClassKind::Edge(_) => self.interpret_edge_as_nodes(class_id),
        }
    }

    /// Node classes collapse onto the classes beyond their incident edges. A
    /// self-loop on the node has no far end, so its side of the new edge
    /// stays unconnected.
    pub fn interpret_as_edges(&mut self, class_id: &ClassId) -> Result<ClassId, ModelError> {
        match &self.class(class_id)?.kind {
            ClassKind::Edge(_) => Ok(class_id.clone()),
            ClassKind::Generic {} => {
                self.replace_class_kind(class_id, ClassKind::Edge(EdgeLinks::default()))?;
                Ok(class_id.clone())
            }
            ClassKind::Node(_) => self.interpret_node_as_edges(class_id),
        }
    }

    /// A new, unconnected class of the same kind on `table_id`.
    fn derive_class(&mut self, class_id: &ClassId, table_id: TableId) -> Result<ClassId, ModelError> {
        let kind = self.class(class_id)?.kind.empty_like();
        self.create_class(ClassSpec::new(table_id, kind))
    }

    fn is_node(&self, class_id: &ClassId) -> Result<bool, ModelError> {
        Ok(matches!(self.class(class_id)?.kind, ClassKind::Node(_)))
    }

    /// Node classes get a new node class connected back to this one.
    pub fn class_promote(&mut self, class_id: &ClassId, attribute: &str) -> Result<ClassId, ModelError> {
        let table_id = self.class(class_id)?.table_id.clone();
        let promoted = self.promote(&table_id, attribute)?;
        let new_class = self.derive_class(class_id, promoted)?;
        if self.is_node(class_id)? {
            self.connect_to_node_class(class_id, &new_class, Some(attribute), None)?;
        }
        Ok(new_class)
    }

    pub fn class_aggregate(
        &mut self,
        class_id: &ClassId,
        attribute: &str,
        reducers: BTreeMap<String, Reducer>,
    ) -> Result<ClassId, ModelError> {
        let table_id = self.class(class_id)?.table_id.clone();
        let aggregated = self.aggregate(&table_id, attribute, reducers)?;
        let new_class = self.derive_class(class_id, aggregated)?;
        if self.is_node(class_id)? {
            self.connect_to_node_class(class_id, &new_class, Some(attribute), None)?;
        }
        Ok(new_class)
    }

    /// Node classes get a child node class joined by a parent/child edge.
    pub fn class_expand(
        &mut self,
        class_id: &ClassId,
        attribute: &str,
        delimiter: Option<&str>,
    ) -> Result<ClassId, ModelError> {
        let table_id = self.class(class_id)?.table_id.clone();
        let expanded = self.expand(&table_id, attribute, delimiter)?;
        let new_class = self.derive_class(class_id, expanded)?;
        if self.is_node(class_id)? {
            self.connect_to_child_node_class(class_id, &new_class)?;
        }
        Ok(new_class)
    }

    pub fn class_unroll(&mut self, class_id: &ClassId, attribute: &str) -> Result<ClassId, ModelError> {
        let table_id = self.class(class_id)?.table_id.clone();
        let unrolled = self.unroll(&table_id, attribute)?;
        let new_class = self.derive_class(class_id, unrolled)?;
        if self.is_node(class_id)? {
            self.connect_to_child_node_class(class_id, &new_class)?;
        }
        Ok(new_class)
    }

    fn classes_for_tables(&mut self, class_id: &ClassId, tables: Vec<TableId>) -> Result<Vec<ClassId>, ModelError> {
        let mut classes = Vec::with_capacity(tables.len());
        for table_id in tables {
            let new_class = self.derive_class(class_id, table_id)?;
            self.copy_edge_connections(class_id, &new_class)?;
            classes.push(new_class);
        }
        Ok(classes)
    }

    pub fn class_closed_facet(
        &mut self,
        class_id: &ClassId,
        attribute: &str,
        values: &[Value],
    ) -> Result<Vec<ClassId>, ModelError> {
        let table_id = self.class(class_id)?.table_id.clone();
        let tables = self.closed_facet(&table_id, attribute, values)?;
        self.classes_for_tables(class_id, tables)
    }

    pub fn class_open_facet(
        &mut self,
        class_id: &ClassId,
        attribute: &str,
        limit: Option<usize>,
    ) -> Result<BuildOutcome<Vec<ClassId>>, ModelError> {
        let table_id = self.class(class_id)?.table_id.clone();
        let mut cursor = self.open_facet(&table_id, attribute, limit)?;
        let mut tables = Vec::new();
        loop {
            match cursor.next(self)? {
                BuildStep::Item(table) => tables.push(table),
                BuildStep::Exhausted => break,
                BuildStep::Cancelled => return Ok(BuildOutcome::Cancelled),
            }
        }
        self.classes_for_tables(class_id, tables).map(BuildOutcome::Ready)
    }

    pub fn class_closed_transpose(
        &mut self,
        class_id: &ClassId,
        indexes: &[ItemIndex],
    ) -> Result<Vec<ClassId>, ModelError> {
        let table_id = self.class(class_id)?.table_id.clone();
        let tables = self.closed_transpose(&table_id, indexes)?;
        let mut classes = Vec::with_capacity(tables.len());
        for table in tables {
            classes.push(self.derive_class(class_id, table)?);
        }
        Ok(classes)
    }

    pub fn class_open_transpose(
        &mut self,
        class_id: &ClassId,
        limit: Option<usize>,
    ) -> Result<BuildOutcome<Vec<ClassId>>, ModelError> {
        let table_id = self.class(class_id)?.table_id.clone();
        let mut cursor = self.open_transpose(&table_id, limit)?;
        let mut classes = Vec::new();
        loop {
            match cursor.next(self)? {
                BuildStep::Item(table) => classes.push(self.derive_class(class_id, table)?),
                BuildStep::Exhausted => return Ok(BuildOutcome::Ready(classes)),
                BuildStep::Cancelled => return Ok(BuildOutcome::Cancelled),
            }
        }
    }

    /// Disconnects, deregisters, then collects tables nothing reaches.
    pub fn delete_class(&mut self, class_id: &ClassId) -> Result<(), ModelError> {
        self.disconnect_class(class_id)?;
        self.classes.remove(class_id);
        debug!(class = %class_id, "deleted class");
        self.optimize_tables()?;
        self.notify_update();
        Ok(())
    }
}
