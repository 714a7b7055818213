//! Per-table cache states and the pull-driven build loop.
//!
//! A table is `Absent` until something reads it. The first read starts a
//! `Partial` build that owns the table's single producer; every cursor on
//! the table advances that same producer and reads from the shared buffer.
//! Only draining the producer promotes the buffer to `Complete`.
//!
//! Cancellation is detected through the table's generation counter, which
//! every reset bumps. A cursor whose generation no longer matches reports
//! [`BuildStep::Cancelled`] instead of data.

use std::collections::BTreeSet;

use ahash::AHashMap;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{
    producer::{Producer, ProducerStep},
    TableId,
};
use crate::{
    errors::ModelError,
    item::{ItemIndex, ItemKey},
    model::{ModelEvent, NetworkModel},
    rules::AttributeRule,
};

/// Items in yield order plus an index lookup into that order.
#[derive(Debug, Default)]
pub(crate) struct ItemBuffer {
    pub(crate) items: Vec<ItemKey>,
    pub(crate) lookup: AHashMap<ItemIndex, usize>,
}

impl ItemBuffer {
    fn push(&mut self, index: ItemIndex, key: ItemKey) {
        let position = self.items.len();
        self.items.push(key);
        self.lookup.entry(index).or_insert(position);
    }

    fn get(&self, index: &ItemIndex) -> Option<ItemKey> {
        self.lookup.get(index).map(|&pos| self.items[pos])
    }
}

#[derive(Debug)]
pub(crate) struct PartialBuild {
    pub(crate) buffer: ItemBuffer,
    /// `None` while a pump has the producer checked out.
    pub(crate) producer: Option<Producer>,
}

#[derive(Debug, Default)]
pub(crate) enum CacheState {
    #[default]
    Absent,
    Partial(PartialBuild),
    Complete(ItemBuffer),
}

/// Result of polling a cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildStep<T> {
    Item(T),
    Exhausted,
    /// The table was reset while the cursor was live.
    Cancelled,
}

/// Result of an operation that drains a build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildOutcome<T> {
    Ready(T),
    Cancelled,
}

impl<T> BuildOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BuildOutcome::Cancelled)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            BuildOutcome::Ready(value) => Some(value),
            BuildOutcome::Cancelled => None,
        }
    }

    /// Demands the value, turning cancellation into
    /// [`ModelError::CancelledBuild`].
    pub fn into_result(self, table_id: &TableId) -> Result<T, ModelError> {
        match self {
            BuildOutcome::Ready(value) => Ok(value),
            BuildOutcome::Cancelled => Err(ModelError::cancelled(table_id)),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> BuildOutcome<U> {
        match self {
            BuildOutcome::Ready(value) => BuildOutcome::Ready(f(value)),
            BuildOutcome::Cancelled => BuildOutcome::Cancelled,
        }
    }
}

/// Restartable pull cursor over a table's rows.
///
/// Cursors hold no borrow of the model; each poll takes `&mut NetworkModel`
/// and may advance the table's shared build.
#[derive(Clone, Debug)]
pub struct TableCursor {
    table_id: TableId,
    generation: u64,
    position: usize,
    limit: Option<usize>,
}

impl TableCursor {
    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn next(&mut self, model: &mut NetworkModel) -> Result<BuildStep<ItemKey>, ModelError> {
        if self.limit.is_some_and(|limit| self.position >= limit) {
            return Ok(BuildStep::Exhausted);
        }
        loop {
            let table = model.table(&self.table_id)?;
            if table.generation != self.generation {
                return Ok(BuildStep::Cancelled);
            }
            match &table.cache {
                CacheState::Complete(buffer) => {
                    return Ok(match buffer.items.get(self.position) {
                        Some(&key) => {
                            self.position += 1;
                            BuildStep::Item(key)
                        }
                        None => BuildStep::Exhausted,
                    });
                }
                CacheState::Partial(build) if self.position < build.buffer.items.len() => {
                    let key = build.buffer.items[self.position];
                    self.position += 1;
                    return Ok(BuildStep::Item(key));
                }
                _ => {}
            }
            if model.pump(&self.table_id)? == Pump::Cancelled {
                return Ok(BuildStep::Cancelled);
            }
        }
    }
}

/// Snapshot of whatever a table has produced so far.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CurrentData {
    pub items: Vec<ItemKey>,
    pub complete: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Pump {
    Progress,
    Complete,
    Cancelled,
}

impl NetworkModel {
    /// Opens a cursor. With `reset` the table (and its descendants) is reset
    /// first so the cursor sees a fresh build.
    pub fn iterate(
        &mut self,
        table_id: &TableId,
        limit: Option<usize>,
        reset: bool,
    ) -> Result<TableCursor, ModelError> {
        if reset {
            self.reset_table(table_id)?;
        }
        let generation = self.table(table_id)?.generation;
        Ok(TableCursor {
            table_id: table_id.clone(),
            generation,
            position: 0,
            limit,
        })
    }

    pub fn collect_items(
        &mut self,
        table_id: &TableId,
        limit: Option<usize>,
    ) -> Result<BuildOutcome<Vec<ItemKey>>, ModelError> {
        let mut cursor = self.iterate(table_id, limit, false)?;
        let mut items = Vec::new();
        loop {
            match cursor.next(self)? {
                BuildStep::Item(key) => items.push(key),
                BuildStep::Exhausted => return Ok(BuildOutcome::Ready(items)),
                BuildStep::Cancelled => return Ok(BuildOutcome::Cancelled),
            }
        }
    }

    /// Runs the table's build to completion and returns the cached items.
    pub fn build_cache(&mut self, table_id: &TableId) -> Result<BuildOutcome<Vec<ItemKey>>, ModelError> {
        let generation = self.table(table_id)?.generation;
        loop {
            let table = self.table(table_id)?;
            if table.generation != generation {
                return Ok(BuildOutcome::Cancelled);
            }
            if let CacheState::Complete(buffer) = &table.cache {
                return Ok(BuildOutcome::Ready(buffer.items.clone()));
            }
            if self.pump(table_id)? == Pump::Cancelled {
                return Ok(BuildOutcome::Cancelled);
            }
        }
    }

    pub fn count_rows(&mut self, table_id: &TableId) -> Result<usize, ModelError> {
        self.build_cache(table_id)?
            .into_result(table_id)
            .map(|items| items.len())
    }

    /// Finds the item with `index`, building only as far as needed.
    pub fn get_item(
        &mut self,
        table_id: &TableId,
        index: &ItemIndex,
    ) -> Result<BuildOutcome<Option<ItemKey>>, ModelError> {
        let generation = self.table(table_id)?.generation;
        loop {
            let table = self.table(table_id)?;
            if table.generation != generation {
                return Ok(BuildOutcome::Cancelled);
            }
            match &table.cache {
                CacheState::Complete(buffer) => return Ok(BuildOutcome::Ready(buffer.get(index))),
                CacheState::Partial(build) => {
                    if let Some(key) = build.buffer.get(index) {
                        return Ok(BuildOutcome::Ready(Some(key)));
                    }
                }
                CacheState::Absent => {}
            }
            if self.pump(table_id)? == Pump::Cancelled {
                return Ok(BuildOutcome::Cancelled);
            }
        }
    }

    pub fn current_data(&self, table_id: &TableId) -> Result<CurrentData, ModelError> {
        Ok(match &self.table(table_id)?.cache {
            CacheState::Absent => CurrentData::default(),
            CacheState::Partial(build) => CurrentData {
                items: build.buffer.items.clone(),
                complete: false,
            },
            CacheState::Complete(buffer) => CurrentData {
                items: buffer.items.clone(),
                complete: true,
            },
        })
    }

    /// Lookup in a complete cache only; used by joins after their parents
    /// were built.
    pub(crate) fn cached_lookup(&self, table_id: &TableId, index: &ItemIndex) -> Option<ItemKey> {
        match &self.tables.get(table_id)?.cache {
            CacheState::Complete(buffer) => buffer.get(index),
            _ => None,
        }
    }

    /// Evicts every cached, buffered and in-flight item of the table and its
    /// descendants and bumps their generations.
    pub fn reset_table(&mut self, table_id: &TableId) -> Result<(), ModelError> {
        self.table(table_id)?;
        let mut queue = vec![table_id.clone()];
        let mut seen = BTreeSet::new();
        while let Some(id) = queue.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(table) = self.tables.get_mut(&id) else {
                continue;
            };
            let previous = std::mem::take(&mut table.cache);
            table.generation += 1;
            queue.extend(table.derived_tables.iter().cloned());
            match previous {
                CacheState::Absent => {}
                CacheState::Partial(build) => {
                    warn!(table = %id, buffered = build.buffer.items.len(), "cancelling in-flight build");
                    for key in build.buffer.items {
                        self.items.evict(key);
                    }
                    if let Some(producer) = build.producer {
                        producer.discard(&mut self.items);
                    }
                }
                CacheState::Complete(buffer) => {
                    for key in buffer.items {
                        self.items.evict(key);
                    }
                }
            }
            debug!(table = %id, "table reset");
            self.events.emit(&ModelEvent::TableReset(id));
        }
        Ok(())
    }

    /// Creates a raw item for `table_id`, linked to every key in `links`.
    pub(crate) fn wrap_item(
        &mut self,
        table_id: &TableId,
        index: ItemIndex,
        row: Map<String, Value>,
        links: &[ItemKey],
        parent_index: Option<ItemIndex>,
    ) -> ItemKey {
        let key = self.items.insert(table_id.clone(), index, row, parent_index);
        for &other in links {
            self.items.connect(key, other);
        }
        key
    }

    fn start_build(&mut self, table_id: &TableId) -> Result<(), ModelError> {
        let producer = Producer::for_table(self, table_id)?;
        debug!(table = %table_id, "starting build");
        let table = self.table_mut(table_id)?;
        table.cache = CacheState::Partial(PartialBuild {
            buffer: ItemBuffer::default(),
            producer: Some(producer),
        });
        Ok(())
    }

    fn build_is_current(&self, table_id: &TableId, generation: u64) -> bool {
        self.tables
            .get(table_id)
            .is_some_and(|t| t.generation == generation && matches!(t.cache, CacheState::Partial(_)))
    }

    /// Advances the table's build until one more item is buffered, the build
    /// completes, or it is cancelled.
    pub(crate) fn pump(&mut self, table_id: &TableId) -> Result<Pump, ModelError> {
        if matches!(self.table(table_id)?.cache, CacheState::Absent) {
            self.start_build(table_id)?;
        }
        let table = self.table_mut(table_id)?;
        let generation = table.generation;
        let mut producer = match &mut table.cache {
            CacheState::Complete(_) => return Ok(Pump::Complete),
            CacheState::Partial(build) => build.producer.take().ok_or_else(|| {
                ModelError::contract(format!("re-entrant build of {table_id}"))
            })?,
            CacheState::Absent => {
                return Err(ModelError::contract(format!("build of {table_id} did not start")));
            }
        };

        loop {
            let step = match producer.step(self, table_id) {
                Ok(step) => step,
                Err(err) => {
                    self.abandon_build(table_id, generation, producer);
                    return Err(err);
                }
            };
            if !self.build_is_current(table_id, generation) {
                if let ProducerStep::Yield(key) = step {
                    self.items.evict(key);
                }
                producer.discard(&mut self.items);
                return Ok(Pump::Cancelled);
            }
            match step {
                ProducerStep::Yield(key) => match self.finish_item(table_id, key) {
                    Ok(true) => {
                        let index = match self.items.get(key) {
                            Some(item) => item.index.clone(),
                            None => continue,
                        };
                        if let Some(CacheState::Partial(build)) =
                            self.tables.get_mut(table_id).map(|t| &mut t.cache)
                        {
                            build.buffer.push(index, key);
                            build.producer = Some(producer);
                        }
                        return Ok(Pump::Progress);
                    }
                    Ok(false) => continue,
                    Err(err) => {
                        self.items.evict(key);
                        self.abandon_build(table_id, generation, producer);
                        return Err(err);
                    }
                },
                ProducerStep::Done => {
                    self.complete_build(table_id);
                    return Ok(Pump::Complete);
                }
                ProducerStep::Cancelled => {
                    producer.discard(&mut self.items);
                    self.reset_table(table_id)?;
                    return Ok(Pump::Cancelled);
                }
            }
        }
    }

    /// Derived attributes, observation, suppression, then filters. Returns
    /// whether the item is kept; rejected items are evicted.
    fn finish_item(&mut self, table_id: &TableId, key: ItemKey) -> Result<bool, ModelError> {
        let table = self
            .tables
            .get_mut(table_id)
            .ok_or_else(|| ModelError::not_found(format!("table {table_id}")))?;
        let item = self
            .items
            .get(key)
            .ok_or_else(|| ModelError::contract(format!("stale item in build of {table_id}")))?;

        let mut derived = Vec::with_capacity(table.derived_attribute_functions.len());
        for (attribute, rule) in &table.derived_attribute_functions {
            if table.suppress_index && matches!(rule, AttributeRule::Index) {
                continue;
            }
            derived.push((attribute.clone(), rule.evaluate(item, &self.items, &self.rules)?));
        }

        let Some(item) = self.items.get_mut(key) else {
            return Ok(false);
        };
        for (attribute, value) in derived {
            item.row.insert(attribute, value);
        }
        for attribute in item.row.keys() {
            if !table.observed_attributes.contains(attribute) {
                table.observed_attributes.insert(attribute.clone());
            }
        }
        for attribute in &table.suppressed_attributes {
            item.row.remove(attribute);
        }

        let mut keep = match &table.index_filter {
            Some(filter) if !table.suppress_index => {
                let index = Value::String(item.index.to_string());
                filter.matches(Some(&index), &self.rules)?
            }
            _ => true,
        };
        if keep {
            for (attribute, filter) in &table.attribute_filters {
                if !filter.matches(item.row.get(attribute), &self.rules)? {
                    keep = false;
                    break;
                }
            }
        }
        if !keep {
            self.items.evict(key);
        }
        Ok(keep)
    }

    fn complete_build(&mut self, table_id: &TableId) {
        let Some(table) = self.tables.get_mut(table_id) else {
            return;
        };
        if let CacheState::Partial(build) = std::mem::take(&mut table.cache) {
            debug!(table = %table_id, items = build.buffer.items.len(), "build complete");
            table.cache = CacheState::Complete(build.buffer);
            self.events.emit(&ModelEvent::CacheBuilt(table_id.clone()));
        }
    }

    /// Drops a failed build so the next read starts over.
    fn abandon_build(&mut self, table_id: &TableId, generation: u64, producer: Producer) {
        producer.discard(&mut self.items);
        if !self.build_is_current(table_id, generation) {
            return;
        }
        warn!(table = %table_id, "discarding failed build");
        if let Some(table) = self.tables.get_mut(table_id) {
            if let CacheState::Partial(build) = std::mem::take(&mut table.cache) {
                for key in build.buffer.items {
                    self.items.evict(key);
                }
            }
        }
    }
}
