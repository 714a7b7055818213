//! Raw item producers, one per table kind.
//!
//! A producer yields unfinished items one at a time; the build loop in
//! `cache` applies the table's post-processing and buffers them. Items a
//! producer created but has not yielded yet are owned by the producer and
//! evicted by [`Producer::discard`].

use std::collections::{BTreeMap, VecDeque};

use ahash::{AHashMap, AHashSet};
use serde_json::{Map, Value};

use super::{cache::TableCursor, BuildOutcome, BuildStep, TableId, TableKind};
use crate::{
    errors::ModelError,
    item::{ItemArena, ItemIndex, ItemKey},
    model::NetworkModel,
    rules::{value_to_key, Reducer},
};

#[derive(Debug)]
pub(crate) enum ProducerStep {
    Yield(ItemKey),
    Done,
    /// A parent build was cancelled underneath this one.
    Cancelled,
}

#[derive(Debug)]
pub(crate) enum Producer {
    Static { next: usize },
    StaticDict { keys: Vec<String>, next: usize },
    Group(GroupState),
    Faceted(FanOut),
    Expanded(FanOut),
    Unrolled(FanOut),
    Transposed(TransposeState),
    Connected(Option<JoinState>),
    ParentChild(Option<ParentChildState>),
    Duplicated { parent: TableCursor },
}

/// Promoted and aggregated tables: drain the parent, then hand out groups.
#[derive(Debug)]
pub(crate) struct GroupState {
    parent: TableCursor,
    attribute: String,
    reducers: BTreeMap<String, Reducer>,
    groups: Vec<ItemKey>,
    lookup: AHashMap<ItemIndex, ItemKey>,
    drained: bool,
    next: usize,
}

/// How a fan-out names its children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChildIndex {
    /// Children reuse the parent's index.
    Inherit,
    /// Children are numbered in build order and remember the parent's index.
    Numbered,
}

/// Single-parent kinds that turn one parent row into zero or more children.
#[derive(Debug)]
pub(crate) struct FanOut {
    parent: TableCursor,
    pending: VecDeque<Map<String, Value>>,
    current: Option<(ItemKey, ItemIndex)>,
    next_index: usize,
}

#[derive(Debug)]
pub(crate) struct TransposeState {
    parent_table: TableId,
    index: ItemIndex,
    pending: Option<(ItemKey, VecDeque<(String, Value)>)>,
}

#[derive(Debug)]
pub(crate) struct JoinState {
    parents: Vec<TableId>,
    base: Vec<ItemKey>,
    position: usize,
    emitted: AHashSet<ItemIndex>,
}

#[derive(Debug)]
pub(crate) struct ParentChildState {
    parent_table: TableId,
    child: TableCursor,
    next_index: usize,
}

fn object_or_value(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut row = Map::new();
            row.insert(String::from("value"), other);
            row
        }
    }
}

impl Producer {
    pub(crate) fn for_table(model: &mut NetworkModel, table_id: &TableId) -> Result<Self, ModelError> {
        let kind = model.table(table_id)?.kind.clone();
        let single_parent = if kind.requires_single_parent() {
            Some(model.single_parent(table_id)?)
        } else {
            None
        };
        let parent_cursor = |model: &mut NetworkModel| -> Result<TableCursor, ModelError> {
            match &single_parent {
                Some(parent) => model.iterate(parent, None, false),
                None => Err(ModelError::contract(format!("{table_id} has no parent"))),
            }
        };
        Ok(match kind {
            TableKind::Static { .. } => Producer::Static { next: 0 },
            TableKind::StaticDict { data, .. } => Producer::StaticDict {
                keys: data.keys().cloned().collect(),
                next: 0,
            },
            TableKind::Promoted { attribute } => Producer::Group(GroupState {
                parent: parent_cursor(model)?,
                attribute,
                reducers: BTreeMap::new(),
                groups: Vec::new(),
                lookup: AHashMap::new(),
                drained: false,
                next: 0,
            }),
            TableKind::Aggregated { attribute, reducers } => Producer::Group(GroupState {
                parent: parent_cursor(model)?,
                attribute,
                reducers,
                groups: Vec::new(),
                lookup: AHashMap::new(),
                drained: false,
                next: 0,
            }),
            TableKind::Faceted { .. } => Producer::Faceted(FanOut::new(parent_cursor(model)?)),
            TableKind::Expanded { .. } => Producer::Expanded(FanOut::new(parent_cursor(model)?)),
            TableKind::Unrolled { .. } => Producer::Unrolled(FanOut::new(parent_cursor(model)?)),
            TableKind::Transposed { index } => Producer::Transposed(TransposeState {
                parent_table: single_parent
                    .clone()
                    .ok_or_else(|| ModelError::contract(format!("{table_id} has no parent")))?,
                index,
                pending: None,
            }),
            TableKind::Duplicated {} => Producer::Duplicated {
                parent: parent_cursor(model)?,
            },
            TableKind::Connected {} => Producer::Connected(None),
            TableKind::ParentChild {} => Producer::ParentChild(None),
        })
    }

    pub(crate) fn step(
        &mut self,
        model: &mut NetworkModel,
        table_id: &TableId,
    ) -> Result<ProducerStep, ModelError> {
        match self {
            Producer::Static { next } => {
                let row = match &model.table(table_id)?.kind {
                    TableKind::Static { data, .. } => data.get(*next).cloned(),
                    _ => return Err(ModelError::contract(format!("{table_id} is not a static table"))),
                };
                let Some(row) = row else {
                    return Ok(ProducerStep::Done);
                };
                let index = ItemIndex::from(*next);
                *next += 1;
                let key = model.wrap_item(table_id, index, object_or_value(row), &[], None);
                Ok(ProducerStep::Yield(key))
            }
            Producer::StaticDict { keys, next } => {
                let Some(name) = keys.get(*next).cloned() else {
                    return Ok(ProducerStep::Done);
                };
                *next += 1;
                let row = match &model.table(table_id)?.kind {
                    TableKind::StaticDict { data, .. } => data.get(&name).cloned().unwrap_or(Value::Null),
                    _ => return Err(ModelError::contract(format!("{table_id} is not a dictionary table"))),
                };
                let key = model.wrap_item(table_id, ItemIndex::from(name), object_or_value(row), &[], None);
                Ok(ProducerStep::Yield(key))
            }
            Producer::Group(state) => state.step(model, table_id),
            Producer::Faceted(fan) => {
                let (attribute, value) = match &model.table(table_id)?.kind {
                    TableKind::Faceted { attribute, value } => (attribute.clone(), value.clone()),
                    _ => return Err(ModelError::contract(format!("{table_id} is not faceted"))),
                };
                fan.step(model, table_id, ChildIndex::Inherit, |row| {
                    let matches = row.get(&attribute).is_some_and(|v| *v == value);
                    if matches { vec![row.clone()] } else { Vec::new() }
                })
            }
            Producer::Expanded(fan) => {
                let (attribute, delimiter) = match &model.table(table_id)?.kind {
                    TableKind::Expanded { attribute, delimiter } => (attribute.clone(), delimiter.clone()),
                    _ => return Err(ModelError::contract(format!("{table_id} is not expanded"))),
                };
                fan.step(model, table_id, ChildIndex::Numbered, |row| split_rows(row, &attribute, &delimiter))
            }
            Producer::Unrolled(fan) => {
                let attribute = match &model.table(table_id)?.kind {
                    TableKind::Unrolled { attribute } => attribute.clone(),
                    _ => return Err(ModelError::contract(format!("{table_id} is not unrolled"))),
                };
                fan.step(model, table_id, ChildIndex::Numbered, |row| unroll_rows(row, &attribute))
            }
            Producer::Transposed(state) => state.step(model, table_id),
            Producer::Connected(state) => {
                if state.is_none() {
                    match JoinState::start(model, table_id)? {
                        BuildOutcome::Ready(join) => *state = Some(join),
                        BuildOutcome::Cancelled => return Ok(ProducerStep::Cancelled),
                    }
                }
                match state {
                    Some(join) => join.step(model, table_id),
                    None => Ok(ProducerStep::Done),
                }
            }
            Producer::ParentChild(state) => {
                if state.is_none() {
                    *state = Some(ParentChildState::start(model, table_id)?);
                }
                match state {
                    Some(join) => join.step(model, table_id),
                    None => Ok(ProducerStep::Done),
                }
            }
            Producer::Duplicated { parent } => {
                let original = match parent.next(model)? {
                    BuildStep::Item(key) => key,
                    BuildStep::Exhausted => return Ok(ProducerStep::Done),
                    BuildStep::Cancelled => return Ok(ProducerStep::Cancelled),
                };
                let (index, row, parent_index, mut links) = {
                    let item = model
                        .items
                        .get(original)
                        .ok_or_else(|| ModelError::contract(format!("stale parent item in {table_id}")))?;
                    (
                        item.index.clone(),
                        item.row.clone(),
                        item.parent_index().cloned(),
                        item.all_connected(),
                    )
                };
                links.push(original);
                let key = model.wrap_item(table_id, index, row, &links, parent_index);
                model.items.register_duplicate(original, key);
                Ok(ProducerStep::Yield(key))
            }
        }
    }

    /// Evicts every item the producer created but never yielded.
    pub(crate) fn discard(self, items: &mut ItemArena) {
        if let Producer::Group(state) = self {
            for key in state.groups.into_iter().skip(state.next) {
                items.evict(key);
            }
        }
    }
}

impl GroupState {
    fn step(&mut self, model: &mut NetworkModel, table_id: &TableId) -> Result<ProducerStep, ModelError> {
        while !self.drained {
            let parent_key = match self.parent.next(model)? {
                BuildStep::Item(key) => key,
                BuildStep::Exhausted => {
                    self.drained = true;
                    break;
                }
                BuildStep::Cancelled => return Ok(ProducerStep::Cancelled),
            };
            let parent_row = model
                .items
                .get(parent_key)
                .map(|item| item.row.clone())
                .ok_or_else(|| ModelError::contract(format!("stale parent item in {table_id}")))?;
            let value = parent_row.get(&self.attribute).cloned().unwrap_or(Value::Null);
            let index = ItemIndex::from(value_to_key(&value));

            match self.lookup.get(&index) {
                Some(&group) => {
                    model.items.connect(group, parent_key);
                    if let Some(item) = model.items.get_mut(group) {
                        for (attribute, reducer) in &self.reducers {
                            let folded = reducer.fold(item.row.get(attribute), &parent_row);
                            item.row.insert(attribute.clone(), folded);
                        }
                    }
                }
                None => {
                    let mut row = Map::new();
                    row.insert(self.attribute.clone(), value);
                    for (attribute, reducer) in &self.reducers {
                        row.insert(attribute.clone(), reducer.fold(None, &parent_row));
                    }
                    let group = model.wrap_item(table_id, index.clone(), row, &[parent_key], None);
                    self.lookup.insert(index, group);
                    self.groups.push(group);
                }
            }
        }
        match self.groups.get(self.next) {
            Some(&key) => {
                self.next += 1;
                Ok(ProducerStep::Yield(key))
            }
            None => Ok(ProducerStep::Done),
        }
    }
}

impl FanOut {
    fn new(parent: TableCursor) -> Self {
        Self {
            parent,
            pending: VecDeque::new(),
            current: None,
            next_index: 0,
        }
    }

    /// `rows_for` maps one parent row to the rows of its children.
    fn step<F>(
        &mut self,
        model: &mut NetworkModel,
        table_id: &TableId,
        naming: ChildIndex,
        rows_for: F,
    ) -> Result<ProducerStep, ModelError>
    where
        F: Fn(&Map<String, Value>) -> Vec<Map<String, Value>>,
    {
        loop {
            if let (Some(row), Some((parent_key, parent_index))) = (self.pending.pop_front(), &self.current) {
                let (index, parent_index) = match naming {
                    ChildIndex::Inherit => (parent_index.clone(), None),
                    ChildIndex::Numbered => {
                        self.next_index += 1;
                        (ItemIndex::from(self.next_index - 1), Some(parent_index.clone()))
                    }
                };
                let key = model.wrap_item(table_id, index, row, &[*parent_key], parent_index);
                return Ok(ProducerStep::Yield(key));
            }
            let parent_key = match self.parent.next(model)? {
                BuildStep::Item(key) => key,
                BuildStep::Exhausted => return Ok(ProducerStep::Done),
                BuildStep::Cancelled => return Ok(ProducerStep::Cancelled),
            };
            let item = model
                .items
                .get(parent_key)
                .ok_or_else(|| ModelError::contract(format!("stale parent item in {table_id}")))?;
            self.pending = rows_for(&item.row).into();
            self.current = Some((parent_key, item.index.clone()));
        }
    }
}

fn split_rows(row: &Map<String, Value>, attribute: &str, delimiter: &str) -> Vec<Map<String, Value>> {
    let text = match row.get(attribute) {
        None | Some(Value::Null) => return Vec::new(),
        Some(value) => value_to_key(value),
    };
    text.split(delimiter)
        .map(|piece| {
            let mut child = Map::new();
            child.insert(attribute.to_string(), Value::String(piece.to_string()));
            child
        })
        .collect()
}

fn unroll_rows(row: &Map<String, Value>, attribute: &str) -> Vec<Map<String, Value>> {
    let Some(Value::Array(values)) = row.get(attribute) else {
        return Vec::new();
    };
    values
        .iter()
        .map(|value| match value {
            Value::Object(map) => map.clone(),
            other => {
                let mut child = Map::new();
                child.insert(attribute.to_string(), other.clone());
                child
            }
        })
        .collect()
}

impl TransposeState {
    fn step(&mut self, model: &mut NetworkModel, table_id: &TableId) -> Result<ProducerStep, ModelError> {
        if self.pending.is_none() {
            let parent_key = match model.get_item(&self.parent_table, &self.index)? {
                BuildOutcome::Ready(Some(key)) => key,
                BuildOutcome::Ready(None) => return Ok(ProducerStep::Done),
                BuildOutcome::Cancelled => return Ok(ProducerStep::Cancelled),
            };
            let entries = model
                .items
                .get(parent_key)
                .map(|item| item.row.clone().into_iter().collect::<VecDeque<_>>())
                .unwrap_or_default();
            self.pending = Some((parent_key, entries));
        }
        let Some((parent_key, entries)) = &mut self.pending else {
            return Ok(ProducerStep::Done);
        };
        let Some((attribute, value)) = entries.pop_front() else {
            return Ok(ProducerStep::Done);
        };
        let parent_key = *parent_key;
        let key = model.wrap_item(
            table_id,
            ItemIndex::from(attribute),
            object_or_value(value),
            &[parent_key],
            None,
        );
        Ok(ProducerStep::Yield(key))
    }
}

impl JoinState {
    fn start(model: &mut NetworkModel, table_id: &TableId) -> Result<BuildOutcome<Self>, ModelError> {
        let parents = model.parent_tables(table_id)?;
        for parent in &parents {
            if model.build_cache(parent)?.is_cancelled() {
                return Ok(BuildOutcome::Cancelled);
            }
        }
        let base = match parents.first() {
            Some(first) => model.current_data(first)?.items,
            None => Vec::new(),
        };
        Ok(BuildOutcome::Ready(Self {
            parents,
            base,
            position: 0,
            emitted: AHashSet::new(),
        }))
    }

    fn step(&mut self, model: &mut NetworkModel, table_id: &TableId) -> Result<ProducerStep, ModelError> {
        'rows: while self.position < self.base.len() {
            for parent in &self.parents {
                if !model.table(parent)?.is_complete() {
                    return Ok(ProducerStep::Cancelled);
                }
            }
            let base_key = self.base[self.position];
            self.position += 1;
            let Some(index) = model.items.get(base_key).map(|item| item.index.clone()) else {
                return Ok(ProducerStep::Cancelled);
            };
            if self.emitted.contains(&index) {
                continue;
            }
            let mut links = vec![base_key];
            for other in self.parents.iter().skip(1) {
                match model.cached_lookup(other, &index) {
                    Some(key) => links.push(key),
                    None => continue 'rows,
                }
            }
            self.emitted.insert(index.clone());
            let key = model.wrap_item(table_id, index, Map::new(), &links, None);
            return Ok(ProducerStep::Yield(key));
        }
        Ok(ProducerStep::Done)
    }
}

impl ParentChildState {
    fn start(model: &mut NetworkModel, table_id: &TableId) -> Result<Self, ModelError> {
        let parents = model.parent_tables(table_id)?;
        let [first, second] = parents.as_slice() else {
            return Err(ModelError::contract(format!(
                "{table_id} needs exactly two parent tables, found {}",
                parents.len()
            )));
        };
        let (parent_table, child_table) = if model.parent_tables(second)?.contains(first) {
            (first.clone(), second.clone())
        } else if model.parent_tables(first)?.contains(second) {
            (second.clone(), first.clone())
        } else {
            return Err(ModelError::contract(format!(
                "{table_id}: neither {first} nor {second} is the parent of the other"
            )));
        };
        Ok(Self {
            parent_table,
            child: model.iterate(&child_table, None, false)?,
            next_index: 0,
        })
    }

    fn step(&mut self, model: &mut NetworkModel, table_id: &TableId) -> Result<ProducerStep, ModelError> {
        loop {
            let child_key = match self.child.next(model)? {
                BuildStep::Item(key) => key,
                BuildStep::Exhausted => return Ok(ProducerStep::Done),
                BuildStep::Cancelled => return Ok(ProducerStep::Cancelled),
            };
            let Some(parent_index) = model.items.get(child_key).and_then(|item| item.parent_index().cloned())
            else {
                continue;
            };
            let parent_key = match model.get_item(&self.parent_table, &parent_index)? {
                BuildOutcome::Ready(Some(key)) => key,
                BuildOutcome::Ready(None) => continue,
                BuildOutcome::Cancelled => return Ok(ProducerStep::Cancelled),
            };
            let index = ItemIndex::from(self.next_index);
            self.next_index += 1;
            let key = model.wrap_item(table_id, index, Map::new(), &[parent_key, child_key], None);
            return Ok(ProducerStep::Yield(key));
        }
    }
}
