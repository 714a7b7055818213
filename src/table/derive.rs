//! Derivation calls, pipeline edits and lineage introspection.
//!
//! Derivations are idempotent: asking a parent for a child it already has
//! (same kind, same constructor fields) returns the existing table.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::debug;

use super::{BuildStep, TableCursor, TableId, TableKind, TableSpec};
use crate::{
    class::ClassId,
    errors::ModelError,
    item::ItemIndex,
    model::NetworkModel,
    rules::{value_to_key, AttributeRule, FilterRule, Reducer},
};

fn require_attribute(operation: &str, attribute: &str) -> Result<(), ModelError> {
    if attribute.is_empty() {
        return Err(ModelError::contract(format!("{operation} requires an attribute")));
    }
    Ok(())
}

/// Lazily discovers attribute values of a parent table and yields the
/// faceted table of each value the first time it is seen.
#[derive(Debug)]
pub struct OpenFacetCursor {
    parent: TableCursor,
    attribute: String,
    seen: Vec<Value>,
}

impl OpenFacetCursor {
    pub fn next(&mut self, model: &mut NetworkModel) -> Result<BuildStep<TableId>, ModelError> {
        loop {
            let key = match self.parent.next(model)? {
                BuildStep::Item(key) => key,
                BuildStep::Exhausted => return Ok(BuildStep::Exhausted),
                BuildStep::Cancelled => return Ok(BuildStep::Cancelled),
            };
            let Some(value) = model.items.get(key).and_then(|item| item.row.get(&self.attribute).cloned())
            else {
                continue;
            };
            if self.seen.contains(&value) {
                continue;
            }
            self.seen.push(value.clone());
            let parent_id = self.parent.table_id().clone();
            return model.facet(&parent_id, &self.attribute, value).map(BuildStep::Item);
        }
    }
}

/// Yields the transposed table of every parent row in turn.
#[derive(Debug)]
pub struct OpenTransposeCursor {
    parent: TableCursor,
}

impl OpenTransposeCursor {
    pub fn next(&mut self, model: &mut NetworkModel) -> Result<BuildStep<TableId>, ModelError> {
        let key = match self.parent.next(model)? {
            BuildStep::Item(key) => key,
            BuildStep::Exhausted => return Ok(BuildStep::Exhausted),
            BuildStep::Cancelled => return Ok(BuildStep::Cancelled),
        };
        let index = model
            .items
            .get(key)
            .map(|item| item.index.clone())
            .ok_or_else(|| ModelError::contract("open transpose read a stale item"))?;
        let parent_id = self.parent.table_id().clone();
        model.transpose(&parent_id, index).map(BuildStep::Item)
    }
}

impl NetworkModel {
    /// Tables whose `derived_tables` contain `table_id`, in id order.
    pub fn parent_tables(&self, table_id: &TableId) -> Result<Vec<TableId>, ModelError> {
        self.table(table_id)?;
        Ok(self
            .tables
            .values()
            .filter(|t| t.derived_tables.contains(table_id))
            .map(|t| t.table_id.clone())
            .collect())
    }

    pub(crate) fn single_parent(&self, table_id: &TableId) -> Result<TableId, ModelError> {
        let parents = self.parent_tables(table_id)?;
        match parents.as_slice() {
            [parent] => Ok(parent.clone()),
            _ => Err(ModelError::contract(format!(
                "{table_id} must have exactly one parent table, found {}",
                parents.len()
            ))),
        }
    }

    pub fn derived_tables(&self, table_id: &TableId) -> Result<Vec<TableId>, ModelError> {
        Ok(self.table(table_id)?.derived_tables.iter().cloned().collect())
    }

    /// Has derived tables, or is some class's own, source or target table.
    pub fn table_in_use(&self, table_id: &TableId) -> Result<bool, ModelError> {
        if !self.table(table_id)?.derived_tables.is_empty() {
            return Ok(true);
        }
        Ok(self.classes.values().any(|class| class.references_table(table_id)))
    }

    pub fn class_for_table(&self, table_id: &TableId) -> Option<ClassId> {
        self.classes
            .values()
            .find(|class| class.table_id == *table_id)
            .map(|class| class.class_id.clone())
    }

    pub fn table_attributes(&self, table_id: &TableId) -> Result<BTreeSet<String>, ModelError> {
        Ok(self.table(table_id)?.attributes())
    }

    /// Human-readable name derived from the lineage.
    pub fn table_name(&self, table_id: &TableId) -> Result<String, ModelError> {
        self.table_name_inner(table_id, &mut Vec::new())
    }

    fn table_name_inner(&self, table_id: &TableId, stack: &mut Vec<TableId>) -> Result<String, ModelError> {
        if stack.contains(table_id) {
            return Err(ModelError::contract(format!("derivation cycle through {table_id}")));
        }
        stack.push(table_id.clone());
        let parents = self.parent_tables(table_id)?;
        let mut parent_names = Vec::with_capacity(parents.len());
        for parent in &parents {
            parent_names.push(self.table_name_inner(parent, stack)?);
        }
        stack.pop();
        let parent_name = parent_names.first().cloned().unwrap_or_default();

        Ok(match &self.table(table_id)?.kind {
            TableKind::Static { name, .. } | TableKind::StaticDict { name, .. } => name.clone(),
            TableKind::Promoted { attribute } => format!("{parent_name}.{attribute}"),
            TableKind::Aggregated { attribute, .. } => format!("{parent_name}.Σ{attribute}"),
            TableKind::Faceted { attribute, value } => {
                format!("[{attribute}={}]", value_to_key(value))
            }
            TableKind::Transposed { index } => format!("ᵀ{index}"),
            TableKind::Expanded { attribute, .. } => format!("{parent_name}.{attribute}↤"),
            TableKind::Unrolled { attribute } => format!("{parent_name}.{attribute}⇊"),
            TableKind::Duplicated {} => format!("{parent_name}*"),
            TableKind::Connected {} => parent_names.join("⨯"),
            TableKind::ParentChild {} => parent_names.join("/"),
        })
    }

    /// Canonical, id-independent signature of a table and its lineage.
    pub fn table_sort_hash(&self, table_id: &TableId) -> Result<String, ModelError> {
        self.sort_hash_inner(table_id, &mut Vec::new())
    }

    fn sort_hash_inner(&self, table_id: &TableId, stack: &mut Vec<TableId>) -> Result<String, ModelError> {
        if stack.contains(table_id) {
            return Err(ModelError::contract(format!("derivation cycle through {table_id}")));
        }
        stack.push(table_id.clone());
        let mut parent_hashes = Vec::new();
        for parent in self.parent_tables(table_id)? {
            parent_hashes.push(self.sort_hash_inner(&parent, stack)?);
        }
        stack.pop();
        parent_hashes.sort();

        let table = self.table(table_id)?;
        let params = match &table.kind {
            TableKind::Static { name, .. } | TableKind::StaticDict { name, .. } => name.clone(),
            other => serde_json::to_string(other)?,
        };
        let pipeline = serde_json::to_string(&(
            &table.derived_attribute_functions,
            &table.suppressed_attributes,
            &table.suppress_index,
            &table.index_filter,
            &table.attribute_filters,
        ))?;
        Ok(format!(
            "{}({params})[{}]{pipeline}",
            table.type_tag(),
            parent_hashes.join(",")
        ))
    }

    fn existing_child(&self, parent: &TableId, kind: &TableKind) -> Option<TableId> {
        let table = self.tables.get(parent)?;
        table
            .derived_tables
            .iter()
            .find(|id| self.tables.get(*id).is_some_and(|child| child.kind == *kind))
            .cloned()
    }

    fn derive_or_reuse(&mut self, parent: &TableId, kind: TableKind) -> Result<TableId, ModelError> {
        self.table(parent)?;
        if let Some(existing) = self.existing_child(parent, &kind) {
            return Ok(existing);
        }
        self.derive_table(parent, kind)
    }

    /// Always creates a fresh child table.
    pub(crate) fn derive_table(&mut self, parent: &TableId, kind: TableKind) -> Result<TableId, ModelError> {
        self.table(parent)?;
        let tag = kind.type_tag();
        let child = self.create_table(TableSpec::new(kind))?;
        self.table_mut(parent)?.derived_tables.insert(child.clone());
        debug!(parent = %parent, child = %child, kind = tag, "derived table");
        self.notify_update();
        Ok(child)
    }

    pub fn promote(&mut self, table_id: &TableId, attribute: &str) -> Result<TableId, ModelError> {
        require_attribute("promote", attribute)?;
        self.derive_or_reuse(
            table_id,
            TableKind::Promoted {
                attribute: attribute.to_string(),
            },
        )
    }

    pub fn aggregate(
        &mut self,
        table_id: &TableId,
        attribute: &str,
        reducers: BTreeMap<String, Reducer>,
    ) -> Result<TableId, ModelError> {
        require_attribute("aggregate", attribute)?;
        self.derive_or_reuse(
            table_id,
            TableKind::Aggregated {
                attribute: attribute.to_string(),
                reducers,
            },
        )
    }

    /// `delimiter` falls back to the model's configured default.
    pub fn expand(
        &mut self,
        table_id: &TableId,
        attribute: &str,
        delimiter: Option<&str>,
    ) -> Result<TableId, ModelError> {
        require_attribute("expand", attribute)?;
        let delimiter = delimiter.map_or_else(|| self.config.default_delimiter.clone(), str::to_string);
        if delimiter.is_empty() {
            return Err(ModelError::contract("expand requires a non-empty delimiter"));
        }
        self.derive_or_reuse(
            table_id,
            TableKind::Expanded {
                attribute: attribute.to_string(),
                delimiter,
            },
        )
    }

    pub fn unroll(&mut self, table_id: &TableId, attribute: &str) -> Result<TableId, ModelError> {
        require_attribute("unroll", attribute)?;
        self.derive_or_reuse(
            table_id,
            TableKind::Unrolled {
                attribute: attribute.to_string(),
            },
        )
    }

    pub(crate) fn facet(&mut self, table_id: &TableId, attribute: &str, value: Value) -> Result<TableId, ModelError> {
        require_attribute("facet", attribute)?;
        self.derive_or_reuse(
            table_id,
            TableKind::Faceted {
                attribute: attribute.to_string(),
                value,
            },
        )
    }

    pub fn closed_facet(
        &mut self,
        table_id: &TableId,
        attribute: &str,
        values: &[Value],
    ) -> Result<Vec<TableId>, ModelError> {
        values
            .iter()
            .map(|value| self.facet(table_id, attribute, value.clone()))
            .collect()
    }

    /// `limit` bounds the number of parent rows scanned.
    pub fn open_facet(
        &mut self,
        table_id: &TableId,
        attribute: &str,
        limit: Option<usize>,
    ) -> Result<OpenFacetCursor, ModelError> {
        require_attribute("open facet", attribute)?;
        Ok(OpenFacetCursor {
            parent: self.iterate(table_id, limit, false)?,
            attribute: attribute.to_string(),
            seen: Vec::new(),
        })
    }

    pub(crate) fn transpose(&mut self, table_id: &TableId, index: ItemIndex) -> Result<TableId, ModelError> {
        self.derive_or_reuse(table_id, TableKind::Transposed { index })
    }

    pub fn closed_transpose(
        &mut self,
        table_id: &TableId,
        indexes: &[ItemIndex],
    ) -> Result<Vec<TableId>, ModelError> {
        indexes
            .iter()
            .map(|index| self.transpose(table_id, index.clone()))
            .collect()
    }

    pub fn open_transpose(
        &mut self,
        table_id: &TableId,
        limit: Option<usize>,
    ) -> Result<OpenTransposeCursor, ModelError> {
        Ok(OpenTransposeCursor {
            parent: self.iterate(table_id, limit, false)?,
        })
    }

    fn existing_join(&self, kind: &TableKind, parents: &BTreeSet<TableId>) -> Result<Option<TableId>, ModelError> {
        let Some(first) = parents.first() else {
            return Ok(None);
        };
        for candidate in self.derived_tables(first)? {
            if self.table(&candidate)?.kind != *kind {
                continue;
            }
            let candidate_parents: BTreeSet<TableId> = self.parent_tables(&candidate)?.into_iter().collect();
            if candidate_parents == *parents {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    fn derive_join(&mut self, kind: TableKind, parents: BTreeSet<TableId>) -> Result<TableId, ModelError> {
        for parent in &parents {
            self.table(parent)?;
        }
        if let Some(existing) = self.existing_join(&kind, &parents)? {
            return Ok(existing);
        }
        let tag = kind.type_tag();
        let child = self.create_table(TableSpec::new(kind))?;
        for parent in &parents {
            self.table_mut(parent)?.derived_tables.insert(child.clone());
        }
        debug!(child = %child, parents = parents.len(), kind = tag, "derived join table");
        self.notify_update();
        Ok(child)
    }

    /// Joins `table_id` with `others` on item index.
    pub fn connect(&mut self, table_id: &TableId, others: &[TableId]) -> Result<TableId, ModelError> {
        let mut parents: BTreeSet<TableId> = others.iter().cloned().collect();
        parents.insert(table_id.clone());
        self.derive_join(TableKind::Connected {}, parents)
    }

    /// Joins a child table (expanded or unrolled from `parent`) back to
    /// `parent` through each child item's parent index.
    pub fn connect_parent_child(&mut self, parent: &TableId, child: &TableId) -> Result<TableId, ModelError> {
        if !self.parent_tables(child)?.contains(parent) {
            return Err(ModelError::contract(format!("{parent} is not the parent of {child}")));
        }
        let parents: BTreeSet<TableId> = [parent.clone(), child.clone()].into_iter().collect();
        self.derive_join(TableKind::ParentChild {}, parents)
    }

    pub fn duplicate(&mut self, table_id: &TableId) -> Result<TableId, ModelError> {
        self.derive_or_reuse(table_id, TableKind::Duplicated {})
    }

    /// A duplicate that no class owns yet, reused when one exists.
    pub(crate) fn unowned_duplicate(&mut self, table_id: &TableId) -> Result<TableId, ModelError> {
        let unowned = self
            .derived_tables(table_id)?
            .into_iter()
            .find(|id| {
                self.tables
                    .get(id)
                    .is_some_and(|t| matches!(t.kind, TableKind::Duplicated {}))
                    && self.class_for_table(id).is_none()
            });
        match unowned {
            Some(id) => Ok(id),
            None => self.derive_table(table_id, TableKind::Duplicated {}),
        }
    }

    fn edit_pipeline<F>(&mut self, table_id: &TableId, edit: F) -> Result<(), ModelError>
    where
        F: FnOnce(&mut super::Table),
    {
        edit(self.table_mut(table_id)?);
        self.reset_table(table_id)?;
        self.notify_update();
        Ok(())
    }

    pub fn derive_attribute(
        &mut self,
        table_id: &TableId,
        attribute: &str,
        rule: AttributeRule,
    ) -> Result<(), ModelError> {
        require_attribute("derive attribute", attribute)?;
        self.edit_pipeline(table_id, |table| {
            table.derived_attribute_functions.insert(attribute.to_string(), rule);
        })
    }

    pub fn remove_derived_attribute(&mut self, table_id: &TableId, attribute: &str) -> Result<(), ModelError> {
        self.edit_pipeline(table_id, |table| {
            table.derived_attribute_functions.remove(attribute);
            table.observed_attributes.remove(attribute);
        })
    }

    pub fn suppress_attribute(&mut self, table_id: &TableId, attribute: &str) -> Result<(), ModelError> {
        self.edit_pipeline(table_id, |table| {
            table.suppressed_attributes.insert(attribute.to_string());
        })
    }

    pub fn unsuppress_attribute(&mut self, table_id: &TableId, attribute: &str) -> Result<(), ModelError> {
        self.edit_pipeline(table_id, |table| {
            table.suppressed_attributes.remove(attribute);
        })
    }

    /// Hides the item index from the pipeline: index-derived attributes are
    /// not computed and the index filter no longer applies.
    pub fn set_suppress_index(&mut self, table_id: &TableId, suppress: bool) -> Result<(), ModelError> {
        self.edit_pipeline(table_id, |table| table.suppress_index = suppress)
    }

    /// `attribute: None` filters on the item index.
    pub fn add_filter(
        &mut self,
        table_id: &TableId,
        attribute: Option<&str>,
        rule: FilterRule,
    ) -> Result<(), ModelError> {
        self.edit_pipeline(table_id, |table| match attribute {
            Some(attribute) => {
                table.attribute_filters.insert(attribute.to_string(), rule);
            }
            None => table.index_filter = Some(rule),
        })
    }

    pub fn remove_filter(&mut self, table_id: &TableId, attribute: Option<&str>) -> Result<(), ModelError> {
        self.edit_pipeline(table_id, |table| match attribute {
            Some(attribute) => {
                table.attribute_filters.remove(attribute);
            }
            None => table.index_filter = None,
        })
    }

    /// Fails with [`ModelError::InUse`] unless forced; the table then stays
    /// registered.
    pub fn delete_table(&mut self, table_id: &TableId, force: bool) -> Result<(), ModelError> {
        if !force && self.table_in_use(table_id)? {
            return Err(ModelError::in_use(format!("table {table_id}")));
        }
        self.reset_table(table_id)?;
        for table in self.tables.values_mut() {
            table.derived_tables.remove(table_id);
        }
        self.tables.remove(table_id);
        debug!(table = %table_id, force, "deleted table");
        self.notify_update();
        Ok(())
    }
}
