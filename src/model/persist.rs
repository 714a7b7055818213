//! Model records, the debounced save trigger and blob store round trips.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{ModelEvent, NetworkModel};
use crate::{
    class::{Class, ClassId, ClassKind},
    config::ModelConfig,
    errors::ModelError,
    rules::RuleRegistry,
    store::BlobStore,
    table::{Table, TableId, TableKind},
};

/// Serialized form of a model. Every table and class entry carries a `type`
/// tag naming its kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model_id: String,
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, Value>,
    #[serde(default)]
    pub tables: BTreeMap<String, Value>,
    #[serde(default)]
    pub classes: BTreeMap<String, Value>,
}

/// Coalesces structural changes into one pending save that becomes due
/// once no change happened for `debounce`.
#[derive(Clone, Debug)]
pub struct PersistenceTrigger {
    debounce: Duration,
    armed_at: Option<Instant>,
    changes: u64,
}

impl PersistenceTrigger {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            armed_at: None,
            changes: 0,
        }
    }

    pub fn arm(&mut self) {
        self.armed_at = Some(Instant::now());
        self.changes += 1;
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    /// Changes coalesced since the last save.
    pub fn pending_changes(&self) -> u64 {
        self.changes
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.armed_at
            .is_some_and(|armed| now.saturating_duration_since(armed) >= self.debounce)
    }

    pub fn disarm(&mut self) {
        self.armed_at = None;
        self.changes = 0;
    }
}

fn check_tag(entry: &Value, known: &[&str], what: &str, id: &str) -> Result<(), ModelError> {
    match entry.get("type").and_then(Value::as_str) {
        Some(tag) if known.contains(&tag) => Ok(()),
        Some(tag) => Err(ModelError::unknown_type(format!("{what} {id} has type {tag}"))),
        None => Err(ModelError::unknown_type(format!("{what} {id} has no type tag"))),
    }
}

/// One past the largest `<prefix><N>` suffix among `ids`.
fn next_counter<'a>(ids: impl Iterator<Item = &'a str>, prefix: &str) -> u64 {
    ids.filter_map(|id| id.strip_prefix(prefix)?.parse::<u64>().ok())
        .max()
        .map_or(1, |max| max + 1)
}

impl NetworkModel {
    pub fn to_record(&self) -> Result<ModelRecord, ModelError> {
        let mut tables = BTreeMap::new();
        for (id, table) in &self.tables {
            tables.insert(id.to_string(), serde_json::to_value(table)?);
        }
        let mut classes = BTreeMap::new();
        for (id, class) in &self.classes {
            classes.insert(id.to_string(), serde_json::to_value(class)?);
        }
        Ok(ModelRecord {
            model_id: self.model_id.clone(),
            name: self.name.clone(),
            annotations: self.annotations.clone(),
            tables,
            classes,
        })
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string(&self.to_record()?)?)
    }

    /// Rebuilds a model. Every type tag is checked before any entity is
    /// created, so an unknown tag fails the whole load.
    pub fn from_record(record: ModelRecord, config: ModelConfig, rules: RuleRegistry) -> Result<Self, ModelError> {
        for (id, entry) in &record.tables {
            check_tag(entry, &TableKind::TAGS, "table", id)?;
        }
        for (id, entry) in &record.classes {
            check_tag(entry, &ClassKind::TAGS, "class", id)?;
        }

        let mut model = NetworkModel::with_registry(record.model_id, config, rules);
        model.name = record.name;
        model.annotations = record.annotations;
        for (id, entry) in record.tables {
            let table: Table = serde_json::from_value(entry)?;
            if table.table_id.as_str() != id {
                return Err(ModelError::serialization(format!(
                    "table stored under {id} claims id {}",
                    table.table_id
                )));
            }
            model.tables.insert(TableId::from(id), table);
        }
        for (id, entry) in record.classes {
            let class: Class = serde_json::from_value(entry)?;
            if class.class_id.as_str() != id {
                return Err(ModelError::serialization(format!(
                    "class stored under {id} claims id {}",
                    class.class_id
                )));
            }
            model.table(&class.table_id)?;
            model.classes.insert(ClassId::from(id), class);
        }
        model.next_table_id = next_counter(model.tables.keys().map(TableId::as_str), "table");
        model.next_class_id = next_counter(model.classes.keys().map(ClassId::as_str), "class");
        Ok(model)
    }

    pub fn from_json(text: &str, config: ModelConfig, rules: RuleRegistry) -> Result<Self, ModelError> {
        let record: ModelRecord = serde_json::from_str(text)?;
        Self::from_record(record, config, rules)
    }

    /// Writes the model under its id and clears the pending-save state.
    pub fn save(&mut self, store: &dyn BlobStore) -> Result<(), ModelError> {
        let body = self.to_json()?;
        store.put(&self.model_id, &body)?;
        let coalesced = self.persistence.pending_changes();
        self.persistence.disarm();
        info!(model = %self.model_id, bytes = body.len(), coalesced, "saved model");
        self.events.emit(&ModelEvent::Saved);
        Ok(())
    }

    /// Saves when the debounce interval has elapsed since the last change.
    /// Returns whether a save happened.
    pub fn poll_save(&mut self, store: &dyn BlobStore, now: Instant) -> Result<bool, ModelError> {
        if !self.persistence.is_due(now) {
            return Ok(false);
        }
        self.save(store)?;
        Ok(true)
    }

    pub fn load(
        store: &dyn BlobStore,
        model_id: &str,
        config: ModelConfig,
        rules: RuleRegistry,
    ) -> Result<Self, ModelError> {
        let body = store
            .get(model_id)?
            .ok_or_else(|| ModelError::not_found(format!("model {model_id}")))?;
        let model = Self::from_json(&body, config, rules)?;
        info!(
            model = %model_id,
            tables = model.tables.len(),
            classes = model.classes.len(),
            "loaded model"
        );
        Ok(model)
    }

    /// Persists several models in one store call.
    pub fn save_all(store: &dyn BlobStore, models: &mut [NetworkModel]) -> Result<(), ModelError> {
        let mut entries = Vec::with_capacity(models.len());
        for model in models.iter() {
            entries.push((model.model_id.clone(), model.to_json()?));
        }
        store.bulk_put(&entries)?;
        for model in models.iter_mut() {
            model.persistence.disarm();
            model.events.emit(&ModelEvent::Saved);
        }
        info!(count = entries.len(), "saved models");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_waits_for_quiet_period() {
        let mut trigger = PersistenceTrigger::new(Duration::from_millis(50));
        assert!(!trigger.is_due(Instant::now()));
        trigger.arm();
        trigger.arm();
        assert_eq!(trigger.pending_changes(), 2);
        assert!(!trigger.is_due(Instant::now()));
        assert!(trigger.is_due(Instant::now() + Duration::from_millis(60)));
        trigger.disarm();
        assert!(!trigger.is_armed());
    }

    #[test]
    fn test_next_counter_skips_foreign_ids() {
        let ids = ["table3", "table12", "custom", "tableX"];
        assert_eq!(next_counter(ids.into_iter(), "table"), 13);
        assert_eq!(next_counter(std::iter::empty(), "class"), 1);
    }
}
