//! Lazy, cached table lineage with node/edge graph modeling.
//!
//! netmodel turns heterogeneous source rows into a lineage graph of derived
//! tables and layers graph semantics on top, producing navigable network
//! models for visualization tools.
//!
//! # Features
//!
//! - **Table derivations**: promote, aggregate, facet, transpose, expand,
//!   unroll, connect, parent/child joins and duplicates, all idempotent
//! - **Lazy caching**: builds run on demand, are shared by every cursor on a
//!   table and are cancelled cleanly by a reset
//! - **Class layer**: generic, node and edge classes with mirrored
//!   node↔edge bookkeeping and topology-preserving reinterpretation
//! - **Exports**: instance samples, class and table graphs, a canonical dump
//!   for structural comparison and a model of the model's own schema
//! - **Persistence**: serde records saved to in-memory or SQLite blob stores
//!
//! # Quick Start
//!
//! ```rust
//! use netmodel::{NetworkModel, ModelError};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), ModelError> {
//! let mut model = NetworkModel::new("demo");
//! let people = model.add_static_table(
//!     "people",
//!     json!([{"name": "Ada", "city": "Oslo"}, {"name": "Bo", "city": "Oslo"}]),
//!     ["name", "city"],
//! )?;
//! let people = model.interpret_as_nodes(&people)?;
//! let cities = model.class_promote(&people, "city")?;
//! let table = model.class(&cities)?.table_id().clone();
//! assert_eq!(model.count_rows(&table)?, 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Public API Organization
//!
//! ## Core Types
//! - [`NetworkModel`] - Owner of every table, class and item
//! - [`Table`], [`TableKind`], [`TableSpec`] - Tables and their derivation kinds
//! - [`Class`], [`ClassKind`], [`ClassSpec`] - Graph semantics over tables
//! - [`WrappedItem`], [`ItemArena`] - Rows and their cross-table links
//!
//! ## Configuration
//! - [`ModelConfig`], [`SampleConfig`], [`StoreConfig`]
//!
//! ## Persistence
//! - [`BlobStore`], [`MemoryBlobStore`], [`SqliteBlobStore`]
//! - [`ModelRecord`] - Serialized model
//!
//! ## Utilities
//! - [`ModelError`] - Error handling
//! - [`import::import_text`] - Text file importers
//! - [`rules`] - Data-described attribute and filter rules

pub mod class;
pub mod cli;
pub mod config;
pub mod errors;
pub mod import;
pub mod item;
pub mod model;
pub mod rules;
pub mod schema;
pub mod store;
pub mod table;

pub use class::{
    Class, ClassId, ClassKind, ClassSpec, EdgeLinks, EdgeRole, EdgeSide, InstanceQuery, NodeLinks,
};
pub use config::{ModelConfig, SampleConfig, StoreConfig};
pub use errors::ModelError;
pub use import::{TextFile, import_text};
pub use item::{InstanceId, ItemArena, ItemIndex, ItemKey, WrappedItem};
pub use model::{
    ClassConnection, ClassSummary, ConnectionLocation, EventBus, GraphOptions, InstanceGraph,
    InstanceGraphEdge, InstanceGraphNode, InstanceSample, ListenerId, ModelEvent, ModelRecord,
    NetworkModel, NetworkModelGraph, PersistenceTrigger, TableDependencyGraph, TableLink,
    TableSummary,
};
pub use rules::{AttributeRule, CompareOp, FilterRule, Reducer, RuleRegistry};
pub use store::{BlobStore, MemoryBlobStore, SqliteBlobStore};
pub use table::{
    BuildOutcome, BuildStep, CurrentData, OpenFacetCursor, OpenTransposeCursor, Table, TableCursor,
    TableId, TableKind, TableSpec,
};
