//! Tables: derivable, cacheable, id-keyed sequences of wrapped items.
//!
//! A [`Table`] holds its kind-specific parameters ([`TableKind`]), the
//! post-processing pipeline applied to every raw item (derived attributes,
//! suppression, filters) and its cache state. Tables never point at their
//! parents; the model finds parents by scanning `derived_tables`.

mod cache;
mod derive;
mod producer;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    item::ItemIndex,
    rules::{AttributeRule, FilterRule, Reducer},
};

pub use cache::{BuildOutcome, BuildStep, CurrentData, TableCursor};
pub use derive::{OpenFacetCursor, OpenTransposeCursor};

pub(crate) use cache::CacheState;

/// Identifier of a table, `table<N>` for generated ids.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(String);

impl TableId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TableId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Kind-specific parameters. The serde tag doubles as the persisted `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TableKind {
    #[serde(rename = "StaticTable")]
    Static { name: String, data: Vec<Value> },
    #[serde(rename = "StaticDictTable")]
    StaticDict {
        name: String,
        data: Map<String, Value>,
    },
    #[serde(rename = "PromotedTable")]
    Promoted { attribute: String },
    #[serde(rename = "AggregatedTable")]
    Aggregated {
        attribute: String,
        #[serde(default)]
        reducers: BTreeMap<String, Reducer>,
    },
    #[serde(rename = "FacetedTable")]
    Faceted { attribute: String, value: Value },
    #[serde(rename = "ConnectedTable")]
    Connected {},
    #[serde(rename = "TransposedTable")]
    Transposed { index: ItemIndex },
    #[serde(rename = "DuplicatedTable")]
    Duplicated {},
    #[serde(rename = "ExpandedTable")]
    Expanded { attribute: String, delimiter: String },
    #[serde(rename = "UnrolledTable")]
    Unrolled { attribute: String },
    #[serde(rename = "ParentChildTable")]
    ParentChild {},
}

impl TableKind {
    /// Every persisted table tag.
    pub const TAGS: [&'static str; 11] = [
        "StaticTable",
        "StaticDictTable",
        "PromotedTable",
        "AggregatedTable",
        "FacetedTable",
        "ConnectedTable",
        "TransposedTable",
        "DuplicatedTable",
        "ExpandedTable",
        "UnrolledTable",
        "ParentChildTable",
    ];

    pub fn type_tag(&self) -> &'static str {
        match self {
            TableKind::Static { .. } => "StaticTable",
            TableKind::StaticDict { .. } => "StaticDictTable",
            TableKind::Promoted { .. } => "PromotedTable",
            TableKind::Aggregated { .. } => "AggregatedTable",
            TableKind::Faceted { .. } => "FacetedTable",
            TableKind::Connected {} => "ConnectedTable",
            TableKind::Transposed { .. } => "TransposedTable",
            TableKind::Duplicated {} => "DuplicatedTable",
            TableKind::Expanded { .. } => "ExpandedTable",
            TableKind::Unrolled { .. } => "UnrolledTable",
            TableKind::ParentChild {} => "ParentChildTable",
        }
    }

    /// Raw source tables; never collected by `optimize_tables`.
    pub fn is_static(&self) -> bool {
        matches!(self, TableKind::Static { .. } | TableKind::StaticDict { .. })
    }

    /// Kinds that must resolve to exactly one parent table.
    pub fn requires_single_parent(&self) -> bool {
        matches!(
            self,
            TableKind::Promoted { .. }
                | TableKind::Aggregated { .. }
                | TableKind::Faceted { .. }
                | TableKind::Transposed { .. }
                | TableKind::Duplicated {}
                | TableKind::Expanded { .. }
                | TableKind::Unrolled { .. }
        )
    }

    /// The attribute a single-attribute derivation reads, if any.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            TableKind::Promoted { attribute }
            | TableKind::Aggregated { attribute, .. }
            | TableKind::Faceted { attribute, .. }
            | TableKind::Expanded { attribute, .. }
            | TableKind::Unrolled { attribute } => Some(attribute),
            _ => None,
        }
    }
}

/// One table of a model.
#[derive(Debug, Serialize, Deserialize)]
pub struct Table {
    pub(crate) table_id: TableId,
    #[serde(flatten)]
    pub(crate) kind: TableKind,
    #[serde(default, rename = "attributes")]
    pub(crate) expected_attributes: BTreeSet<String>,
    #[serde(default)]
    pub(crate) derived_tables: BTreeSet<TableId>,
    #[serde(default)]
    pub(crate) derived_attribute_functions: BTreeMap<String, AttributeRule>,
    #[serde(default)]
    pub(crate) suppressed_attributes: BTreeSet<String>,
    #[serde(default)]
    pub(crate) suppress_index: bool,
    #[serde(default)]
    pub(crate) index_filter: Option<FilterRule>,
    #[serde(default)]
    pub(crate) attribute_filters: BTreeMap<String, FilterRule>,
    #[serde(skip)]
    pub(crate) observed_attributes: BTreeSet<String>,
    #[serde(skip)]
    pub(crate) cache: CacheState,
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl Table {
    pub(crate) fn new(table_id: TableId, kind: TableKind) -> Self {
        Self {
            table_id,
            kind,
            expected_attributes: BTreeSet::new(),
            derived_tables: BTreeSet::new(),
            derived_attribute_functions: BTreeMap::new(),
            suppressed_attributes: BTreeSet::new(),
            suppress_index: false,
            index_filter: None,
            attribute_filters: BTreeMap::new(),
            observed_attributes: BTreeSet::new(),
            cache: CacheState::default(),
            generation: 0,
        }
    }

    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    pub fn kind(&self) -> &TableKind {
        &self.kind
    }

    pub fn type_tag(&self) -> &'static str {
        self.kind.type_tag()
    }

    pub fn derived_tables(&self) -> &BTreeSet<TableId> {
        &self.derived_tables
    }

    pub fn suppressed_attributes(&self) -> &BTreeSet<String> {
        &self.suppressed_attributes
    }

    pub fn suppress_index(&self) -> bool {
        self.suppress_index
    }

    pub fn index_filter(&self) -> Option<&FilterRule> {
        self.index_filter.as_ref()
    }

    pub fn attribute_filters(&self) -> &BTreeMap<String, FilterRule> {
        &self.attribute_filters
    }

    pub fn derived_attribute_functions(&self) -> &BTreeMap<String, AttributeRule> {
        &self.derived_attribute_functions
    }

    /// Expected, observed and derived attribute names, sorted. Index-derived
    /// attributes are left out while the index is suppressed.
    pub fn attributes(&self) -> BTreeSet<String> {
        let mut all: BTreeSet<String> = self
            .expected_attributes
            .union(&self.observed_attributes)
            .cloned()
            .collect();
        all.extend(
            self.derived_attribute_functions
                .iter()
                .filter(|(_, rule)| !(self.suppress_index && matches!(rule, AttributeRule::Index)))
                .map(|(attribute, _)| attribute.clone()),
        );
        all
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.cache, CacheState::Complete(_))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Options for [`NetworkModel::create_table`](crate::NetworkModel::create_table).
#[derive(Clone, Debug)]
pub struct TableSpec {
    /// Explicit id; honored only together with `overwrite` or when free.
    pub table_id: Option<TableId>,
    pub overwrite: bool,
    pub kind: TableKind,
    pub attributes: BTreeSet<String>,
}

impl TableSpec {
    pub fn new(kind: TableKind) -> Self {
        Self {
            table_id: None,
            overwrite: false,
            kind,
            attributes: BTreeSet::new(),
        }
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_id(mut self, table_id: TableId, overwrite: bool) -> Self {
        self.table_id = Some(table_id);
        self.overwrite = overwrite;
        self
    }
}
