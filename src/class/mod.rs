//! Classes attach generic, node or edge semantics to a table.
//!
//! Node and edge classes reference each other by id. The mirror invariant
//! (an edge's source or target node lists the edge in `edge_class_ids`) is
//! kept by the connect and disconnect operations in [`node`] and [`edge`]
//! and nowhere else.

mod edge;
mod generic;
mod instance;
mod node;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{errors::ModelError, table::TableId};

pub use instance::InstanceQuery;

/// Identifier of a class, `class<N>` for generated ids.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(String);

impl ClassId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClassId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLinks {
    #[serde(default)]
    pub edge_class_ids: BTreeSet<ClassId>,
}

/// Connections of an edge class. Table chains run from the table next to
/// the edge's own table toward the node's table, excluding both.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeLinks {
    #[serde(default)]
    pub source_class_id: Option<ClassId>,
    #[serde(default)]
    pub source_table_ids: Vec<TableId>,
    #[serde(default)]
    pub target_class_id: Option<ClassId>,
    #[serde(default)]
    pub target_table_ids: Vec<TableId>,
    #[serde(default)]
    pub directed: bool,
    #[serde(default)]
    pub swapped_direction: bool,
}

impl EdgeLinks {
    pub fn class_id(&self, side: EdgeSide) -> Option<&ClassId> {
        match side {
            EdgeSide::Source => self.source_class_id.as_ref(),
            EdgeSide::Target => self.target_class_id.as_ref(),
        }
    }

    pub fn table_ids(&self, side: EdgeSide) -> &[TableId] {
        match side {
            EdgeSide::Source => &self.source_table_ids,
            EdgeSide::Target => &self.target_table_ids,
        }
    }

    pub(crate) fn set_side(&mut self, side: EdgeSide, class_id: Option<ClassId>, table_ids: Vec<TableId>) {
        match side {
            EdgeSide::Source => {
                self.source_class_id = class_id;
                self.source_table_ids = table_ids;
            }
            EdgeSide::Target => {
                self.target_class_id = class_id;
                self.target_table_ids = table_ids;
            }
        }
    }

    pub(crate) fn swap_sides(&mut self) {
        std::mem::swap(&mut self.source_class_id, &mut self.target_class_id);
        std::mem::swap(&mut self.source_table_ids, &mut self.target_table_ids);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClassKind {
    #[serde(rename = "GenericClass")]
    Generic {},
    #[serde(rename = "NodeClass")]
    Node(NodeLinks),
    #[serde(rename = "EdgeClass")]
    Edge(EdgeLinks),
}

impl ClassKind {
    pub const TAGS: [&'static str; 3] = ["GenericClass", "NodeClass", "EdgeClass"];

    pub fn type_tag(&self) -> &'static str {
        match self {
            ClassKind::Generic {} => "GenericClass",
            ClassKind::Node(_) => "NodeClass",
            ClassKind::Edge(_) => "EdgeClass",
        }
    }

    /// A kind of the same variant without any connections.
    pub fn empty_like(&self) -> Self {
        match self {
            ClassKind::Generic {} => ClassKind::Generic {},
            ClassKind::Node(_) => ClassKind::Node(NodeLinks::default()),
            ClassKind::Edge(_) => ClassKind::Edge(EdgeLinks::default()),
        }
    }
}

/// One class of a model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub(crate) class_id: ClassId,
    pub(crate) table_id: TableId,
    #[serde(default)]
    pub(crate) class_name: Option<String>,
    #[serde(default)]
    pub(crate) annotations: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub(crate) kind: ClassKind,
}

impl Class {
    pub fn class_id(&self) -> &ClassId {
        &self.class_id
    }

    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    pub fn custom_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    pub fn annotations(&self) -> &BTreeMap<String, Value> {
        &self.annotations
    }

    pub fn kind(&self) -> &ClassKind {
        &self.kind
    }

    pub fn type_tag(&self) -> &'static str {
        self.kind.type_tag()
    }

    pub fn node_links(&self) -> Option<&NodeLinks> {
        match &self.kind {
            ClassKind::Node(links) => Some(links),
            _ => None,
        }
    }

    pub fn edge_links(&self) -> Option<&EdgeLinks> {
        match &self.kind {
            ClassKind::Edge(links) => Some(links),
            _ => None,
        }
    }

    pub(crate) fn node_links_mut(&mut self) -> Option<&mut NodeLinks> {
        match &mut self.kind {
            ClassKind::Node(links) => Some(links),
            _ => None,
        }
    }

    pub(crate) fn edge_links_mut(&mut self) -> Option<&mut EdgeLinks> {
        match &mut self.kind {
            ClassKind::Edge(links) => Some(links),
            _ => None,
        }
    }

    /// Own table, or any table of an edge's source or target chain.
    pub fn references_table(&self, table_id: &TableId) -> bool {
        if self.table_id == *table_id {
            return true;
        }
        self.edge_links().is_some_and(|links| {
            links.source_table_ids.contains(table_id) || links.target_table_ids.contains(table_id)
        })
    }
}

/// Options for [`NetworkModel::create_class`](crate::NetworkModel::create_class).
#[derive(Clone, Debug)]
pub struct ClassSpec {
    pub class_id: Option<ClassId>,
    /// Replace an existing class with the same id and keep the table even
    /// if another class already owns it.
    pub overwrite: bool,
    pub table_id: TableId,
    pub class_name: Option<String>,
    pub annotations: BTreeMap<String, Value>,
    pub kind: ClassKind,
}

impl ClassSpec {
    pub fn new(table_id: TableId, kind: ClassKind) -> Self {
        Self {
            class_id: None,
            overwrite: false,
            table_id,
            class_name: None,
            annotations: BTreeMap::new(),
            kind,
        }
    }

    pub fn generic(table_id: TableId) -> Self {
        Self::new(table_id, ClassKind::Generic {})
    }

    pub fn node(table_id: TableId) -> Self {
        Self::new(table_id, ClassKind::Node(NodeLinks::default()))
    }

    pub fn edge(table_id: TableId, links: EdgeLinks) -> Self {
        Self::new(table_id, ClassKind::Edge(links))
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.class_name = Some(name.into());
        self
    }
}

/// Which end of an edge class a node attaches to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeSide {
    Source,
    Target,
}

impl EdgeSide {
    pub fn opposite(self) -> Self {
        match self {
            EdgeSide::Source => EdgeSide::Target,
            EdgeSide::Target => EdgeSide::Source,
        }
    }
}

impl FromStr for EdgeSide {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(EdgeSide::Source),
            "target" => Ok(EdgeSide::Target),
            other => Err(ModelError::contract(format!("unknown connection side: {other}"))),
        }
    }
}

/// Role a node class plays for one of its edge classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeRole {
    Source,
    Target,
    Both,
}
