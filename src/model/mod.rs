//! The [`NetworkModel`]: owner of every table, class and item.
//!
//! Tables and classes live in id-keyed maps and refer to each other only by
//! id. Structural edits notify listeners with [`ModelEvent::Update`] and
//! re-arm the debounced persistence trigger.

mod events;
mod export;
mod persist;
mod sample;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde_json::Value;
use tracing::{debug, info};

use crate::{
    class::{Class, ClassId, ClassSpec},
    config::ModelConfig,
    errors::ModelError,
    item::{ItemArena, ItemKey, WrappedItem},
    rules::RuleRegistry,
    table::{Table, TableId, TableKind, TableSpec},
};

pub use events::{EventBus, ListenerId, ModelEvent};
pub use export::{
    ClassConnection, ClassSummary, ConnectionLocation, GraphOptions, InstanceGraph, InstanceGraphEdge,
    InstanceGraphNode, NetworkModelGraph, TableDependencyGraph, TableLink, TableSummary,
};
pub use persist::{ModelRecord, PersistenceTrigger};
pub use sample::InstanceSample;

pub struct NetworkModel {
    pub(crate) model_id: String,
    pub(crate) name: String,
    pub(crate) annotations: BTreeMap<String, Value>,
    pub(crate) tables: BTreeMap<TableId, Table>,
    pub(crate) classes: BTreeMap<ClassId, Class>,
    pub(crate) items: ItemArena,
    pub(crate) next_table_id: u64,
    pub(crate) next_class_id: u64,
    pub(crate) rules: RuleRegistry,
    pub(crate) events: EventBus,
    pub(crate) persistence: PersistenceTrigger,
    pub(crate) config: ModelConfig,
}

impl fmt::Debug for NetworkModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkModel")
            .field("model_id", &self.model_id)
            .field("name", &self.name)
            .field("tables", &self.tables.len())
            .field("classes", &self.classes.len())
            .field("items", &self.items.len())
            .finish()
    }
}

impl NetworkModel {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self::with_config(model_id, ModelConfig::default())
    }

    pub fn with_config(model_id: impl Into<String>, config: ModelConfig) -> Self {
        Self::with_registry(model_id, config, RuleRegistry::new())
    }

    /// Models built from clones of one registry share callbacks.
    pub fn with_registry(model_id: impl Into<String>, config: ModelConfig, rules: RuleRegistry) -> Self {
        let model_id = model_id.into();
        Self {
            name: model_id.clone(),
            model_id,
            annotations: BTreeMap::new(),
            tables: BTreeMap::new(),
            classes: BTreeMap::new(),
            items: ItemArena::new(),
            next_table_id: 1,
            next_class_id: 1,
            rules,
            events: EventBus::default(),
            persistence: PersistenceTrigger::new(config.save_debounce),
            config,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn annotations(&self) -> &BTreeMap<String, Value> {
        &self.annotations
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn items(&self) -> &ItemArena {
        &self.items
    }

    pub fn item(&self, key: ItemKey) -> Option<&WrappedItem> {
        self.items.get(key)
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.keys().cloned().collect()
    }

    pub fn class_ids(&self) -> Vec<ClassId> {
        self.classes.keys().cloned().collect()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.values()
    }

    pub fn table(&self, table_id: &TableId) -> Result<&Table, ModelError> {
        self.tables
            .get(table_id)
            .ok_or_else(|| ModelError::not_found(format!("table {table_id}")))
    }

    pub(crate) fn table_mut(&mut self, table_id: &TableId) -> Result<&mut Table, ModelError> {
        self.tables
            .get_mut(table_id)
            .ok_or_else(|| ModelError::not_found(format!("table {table_id}")))
    }

    pub fn class(&self, class_id: &ClassId) -> Result<&Class, ModelError> {
        self.classes
            .get(class_id)
            .ok_or_else(|| ModelError::not_found(format!("class {class_id}")))
    }

    pub(crate) fn class_mut(&mut self, class_id: &ClassId) -> Result<&mut Class, ModelError> {
        self.classes
            .get_mut(class_id)
            .ok_or_else(|| ModelError::not_found(format!("class {class_id}")))
    }

    /// Emits [`ModelEvent::Update`] and re-arms the save trigger.
    pub(crate) fn notify_update(&mut self) {
        self.events.emit(&ModelEvent::Update);
        self.persistence.arm();
    }

    pub fn is_unsaved(&self) -> bool {
        self.persistence.is_armed()
    }

    fn fresh_table_id(&mut self) -> TableId {
        loop {
            let candidate = TableId::from(format!("table{}", self.next_table_id));
            self.next_table_id += 1;
            if !self.tables.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn fresh_class_id(&mut self) -> ClassId {
        loop {
            let candidate = ClassId::from(format!("class{}", self.next_class_id));
            self.next_class_id += 1;
            if !self.classes.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn create_table(&mut self, spec: TableSpec) -> Result<TableId, ModelError> {
        let table_id = match spec.table_id {
            Some(id) if spec.overwrite || !self.tables.contains_key(&id) => {
                if self.tables.contains_key(&id) {
                    self.reset_table(&id)?;
                }
                id
            }
            _ => self.fresh_table_id(),
        };
        let derived = self
            .tables
            .get(&table_id)
            .map(|existing| existing.derived_tables.clone())
            .unwrap_or_default();
        let mut table = Table::new(table_id.clone(), spec.kind);
        table.expected_attributes = spec.attributes;
        table.derived_tables = derived;
        self.tables.insert(table_id.clone(), table);
        self.notify_update();
        Ok(table_id)
    }

    /// A class on a table another class already owns gets a duplicate of the
    /// table instead, unless `overwrite` is set.
    pub fn create_class(&mut self, spec: ClassSpec) -> Result<ClassId, ModelError> {
        self.table(&spec.table_id)?;
        let class_id = match spec.class_id {
            Some(id) if spec.overwrite || !self.classes.contains_key(&id) => id,
            _ => self.fresh_class_id(),
        };
        let mut table_id = spec.table_id;
        if !spec.overwrite {
            if let Some(owner) = self.class_for_table(&table_id) {
                if owner != class_id {
                    table_id = self.unowned_duplicate(&table_id)?;
                }
            }
        }
        let class = Class {
            class_id: class_id.clone(),
            table_id,
            class_name: spec.class_name,
            annotations: spec.annotations,
            kind: spec.kind,
        };
        debug!(class = %class_id, table = %class.table_id, kind = class.type_tag(), "created class");
        self.classes.insert(class_id.clone(), class);
        self.notify_update();
        Ok(class_id)
    }

    /// Creates a static source table plus a generic class over it. Arrays
    /// become a `StaticTable`, objects a `StaticDictTable`.
    pub fn add_static_table<I, S>(&mut self, name: &str, data: Value, attributes: I) -> Result<ClassId, ModelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kind = match data {
            Value::Array(rows) => TableKind::Static {
                name: name.to_string(),
                data: rows,
            },
            Value::Object(rows) => TableKind::StaticDict {
                name: name.to_string(),
                data: rows,
            },
            other => {
                return Err(ModelError::invalid_input(format!(
                    "static table data must be an array or object, got {other}"
                )));
            }
        };
        let table_id = self.create_table(TableSpec::new(kind).with_attributes(attributes))?;
        self.create_class(ClassSpec::generic(table_id).named(name))
    }

    /// Force-deletes every non-static table that no class's table, source
    /// chain or target chain reaches through parent links.
    pub fn optimize_tables(&mut self) -> Result<usize, ModelError> {
        let mut queue: VecDeque<TableId> = VecDeque::new();
        for class in self.classes.values() {
            queue.push_back(class.table_id.clone());
            if let Some(links) = class.edge_links() {
                queue.extend(links.source_table_ids.iter().cloned());
                queue.extend(links.target_table_ids.iter().cloned());
            }
        }
        let mut reachable = BTreeSet::new();
        while let Some(table_id) = queue.pop_front() {
            if !self.tables.contains_key(&table_id) || !reachable.insert(table_id.clone()) {
                continue;
            }
            queue.extend(self.parent_tables(&table_id)?);
        }
        let doomed: Vec<TableId> = self
            .tables
            .values()
            .filter(|t| !t.kind.is_static() && !reachable.contains(&t.table_id))
            .map(|t| t.table_id.clone())
            .collect();
        for table_id in &doomed {
            self.delete_table(table_id, true)?;
        }
        if !doomed.is_empty() {
            info!(model = %self.model_id, removed = doomed.len(), "optimized tables");
        }
        Ok(doomed.len())
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
        self.notify_update();
    }

    pub fn annotate(&mut self, key: &str, value: Value) {
        self.annotations.insert(key.to_string(), value);
        self.notify_update();
    }

    pub fn delete_annotation(&mut self, key: &str) {
        self.annotations.remove(key);
        self.notify_update();
    }

    /// First class, in id order, whose display name is `name`.
    pub fn find_class(&self, name: &str) -> Result<Option<ClassId>, ModelError> {
        for class_id in self.classes.keys() {
            if self.class_name(class_id)? == name {
                return Ok(Some(class_id.clone()));
            }
        }
        Ok(None)
    }
}
