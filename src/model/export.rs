//! Schema-level exports: class and table graphs, the canonical dump and
//! the model-of-the-model.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::NetworkModel;
use crate::{
    class::{ClassId, EdgeSide},
    errors::ModelError,
    item::ItemIndex,
    table::{TableId, TableKind},
};

/// Options for [`NetworkModel::network_model_graph`].
#[derive(Clone, Debug, Default)]
pub struct GraphOptions {
    /// Add a placeholder node for every unconnected edge end.
    pub include_dummies: bool,
    /// Restrict the graph to these classes; connections to other classes
    /// count as unconnected.
    pub class_ids: Option<Vec<ClassId>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClassSummary {
    pub class_id: Option<ClassId>,
    pub class_name: String,
    pub class_type: String,
    pub table_id: Option<TableId>,
    pub dummy: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionLocation {
    Source,
    Target,
}

impl ConnectionLocation {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionLocation::Source => "source",
            ConnectionLocation::Target => "target",
        }
    }
}

/// One end of an edge class. `source`/`target` index `classes`; the edge
/// class is always the target of its own connections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClassConnection {
    pub id: String,
    pub source: usize,
    pub target: usize,
    pub directed: bool,
    pub location: ConnectionLocation,
    pub dummy: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NetworkModelGraph {
    pub classes: Vec<ClassSummary>,
    pub class_lookup: BTreeMap<ClassId, usize>,
    pub class_connections: Vec<ClassConnection>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub table_id: TableId,
    pub table_type: String,
    pub name: String,
    pub attributes: Vec<String>,
    pub complete: bool,
}

/// Parent to derived table, as indices into `tables`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TableLink {
    pub source: usize,
    pub target: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TableDependencyGraph {
    pub tables: Vec<TableSummary>,
    pub table_lookup: BTreeMap<TableId, usize>,
    pub table_links: Vec<TableLink>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstanceGraphNode {
    pub id: String,
    pub class_id: Option<ClassId>,
    pub index: Option<ItemIndex>,
    pub label: String,
    pub dummy: bool,
}

/// `source`/`target` index `nodes`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstanceGraphEdge {
    pub id: String,
    pub class_id: ClassId,
    pub index: ItemIndex,
    pub source: usize,
    pub target: usize,
    pub directed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InstanceGraph {
    pub nodes: Vec<InstanceGraphNode>,
    pub edges: Vec<InstanceGraphEdge>,
}

/// Replaces the string at `field` with its dense index.
fn remap_id(object: &mut Map<String, Value>, field: &str, lookup: &BTreeMap<String, usize>) {
    if let Some(Value::String(id)) = object.get(field) {
        let mapped = lookup.get(id).map_or(Value::Null, |&index| json!(index));
        object.insert(field.to_string(), mapped);
    }
}

/// Remaps every id of the array at `field`; `sort` is for set-valued fields.
fn remap_ids(object: &mut Map<String, Value>, field: &str, lookup: &BTreeMap<String, usize>, sort: bool) {
    let Some(Value::Array(ids)) = object.get(field) else {
        return;
    };
    let mut mapped: Vec<Option<usize>> = ids
        .iter()
        .map(|id| id.as_str().and_then(|id| lookup.get(id).copied()))
        .collect();
    if sort {
        mapped.sort();
    }
    object.insert(field.to_string(), json!(mapped));
}

/// Orders `(key, id)` pairs by key. Equal keys keep their input order, which
/// callers make id-independent before getting here.
fn canonical_order<I>(mut keyed: Vec<(String, I)>) -> Vec<I> {
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, id)| id).collect()
}

impl NetworkModel {
    pub fn network_model_graph(&self, options: &GraphOptions) -> Result<NetworkModelGraph, ModelError> {
        let included = |class_id: &ClassId| {
            options
                .class_ids
                .as_ref()
                .is_none_or(|ids| ids.contains(class_id))
        };
        let mut graph = NetworkModelGraph::default();
        for class in self.classes.values().filter(|c| included(&c.class_id)) {
            graph.class_lookup.insert(class.class_id.clone(), graph.classes.len());
            graph.classes.push(ClassSummary {
                class_id: Some(class.class_id.clone()),
                class_name: self.class_name(&class.class_id)?,
                class_type: class.type_tag().to_string(),
                table_id: Some(class.table_id.clone()),
                dummy: false,
            });
        }

        for class in self.classes.values().filter(|c| included(&c.class_id)) {
            let Some(links) = class.edge_links() else {
                continue;
            };
            let edge_index = graph.class_lookup[&class.class_id];
            for (side, location) in [
                (EdgeSide::Source, ConnectionLocation::Source),
                (EdgeSide::Target, ConnectionLocation::Target),
            ] {
                let node = links
                    .class_id(side)
                    .and_then(|node_id| Some((node_id, *graph.class_lookup.get(node_id)?)));
                match node {
                    Some((node_id, node_index)) => {
                        graph.class_connections.push(ClassConnection {
                            id: format!("{}>{node_id}:{}", class.class_id, location.as_str()),
                            source: node_index,
                            target: edge_index,
                            directed: links.directed,
                            location,
                            dummy: false,
                        });
                    }
                    None if options.include_dummies => {
                        let dummy_index = graph.classes.len();
                        graph.classes.push(ClassSummary {
                            class_id: None,
                            class_name: String::new(),
                            class_type: String::from("Dummy"),
                            table_id: None,
                            dummy: true,
                        });
                        graph.class_connections.push(ClassConnection {
                            id: format!("dummy{dummy_index}"),
                            source: dummy_index,
                            target: edge_index,
                            directed: links.directed,
                            location,
                            dummy: true,
                        });
                    }
                    None => {}
                }
            }
        }
        Ok(graph)
    }

    pub fn table_dependency_graph(&self) -> Result<TableDependencyGraph, ModelError> {
        let mut graph = TableDependencyGraph::default();
        for table in self.tables.values() {
            graph.table_lookup.insert(table.table_id.clone(), graph.tables.len());
            graph.tables.push(TableSummary {
                table_id: table.table_id.clone(),
                table_type: table.type_tag().to_string(),
                name: self.table_name(&table.table_id)?,
                attributes: table.attributes().into_iter().collect(),
                complete: table.is_complete(),
            });
        }
        for table in self.tables.values() {
            let source = graph.table_lookup[&table.table_id];
            for derived in &table.derived_tables {
                if let Some(&target) = graph.table_lookup.get(derived) {
                    graph.table_links.push(TableLink { source, target });
                }
            }
        }
        Ok(graph)
    }

    /// Sort keys of every table. Tables whose lineage hashes tie are told
    /// apart by the class that owns them, by their children's hashes and,
    /// for static tables, by their data.
    fn table_dump_keys(&self) -> Result<Vec<(String, TableId)>, ModelError> {
        let mut base = BTreeMap::new();
        for table_id in self.tables.keys() {
            base.insert(table_id.clone(), self.table_sort_hash(table_id)?);
        }
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for hash in base.values() {
            *counts.entry(hash.as_str()).or_default() += 1;
        }
        let mut keys = Vec::with_capacity(base.len());
        for (table_id, hash) in &base {
            if counts[hash.as_str()] == 1 {
                keys.push((hash.clone(), table_id.clone()));
                continue;
            }
            let table = self.table(table_id)?;
            let owner = match self.class_for_table(table_id) {
                Some(class_id) => format!("{}:{}", self.class(&class_id)?.type_tag(), self.class_name(&class_id)?),
                None => String::new(),
            };
            let children: BTreeSet<&str> = table
                .derived_tables
                .iter()
                .filter_map(|child| base.get(child).map(String::as_str))
                .collect();
            let children: Vec<&str> = children.into_iter().collect();
            let data = match &table.kind {
                TableKind::Static { data, .. } => serde_json::to_string(data)?,
                TableKind::StaticDict { data, .. } => serde_json::to_string(data)?,
                _ => String::new(),
            };
            keys.push((
                format!("{hash}<{owner}>{{{}}}#{data}", children.join(",")),
                table_id.clone(),
            ));
        }
        Ok(keys)
    }

    /// Tables that still tie after [`Self::table_dump_keys`] are told apart
    /// by their owning class's annotations and the edge classes chaining
    /// through them. Twins that tie even then keep id order.
    fn table_dump_order(&self) -> Result<Vec<TableId>, ModelError> {
        let keys = self.table_dump_keys()?;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for (key, _) in &keys {
            *counts.entry(key.as_str()).or_default() += 1;
        }
        let mut refined = Vec::with_capacity(keys.len());
        for (key, table_id) in &keys {
            if counts[key.as_str()] == 1 {
                refined.push((key.clone(), table_id.clone()));
                continue;
            }
            let mut referrers: Vec<String> = Vec::new();
            for class in self.classes.values() {
                if &class.table_id == table_id {
                    referrers.push(format!("own:{}", serde_json::to_string(&class.annotations)?));
                }
                let chained = class.edge_links().is_some_and(|links| {
                    links.source_table_ids.contains(table_id) || links.target_table_ids.contains(table_id)
                });
                if chained {
                    referrers.push(format!("chain:{}", self.class_name(&class.class_id)?));
                }
            }
            referrers.sort();
            refined.push((format!("{key}|{}", referrers.join("|")), table_id.clone()));
        }
        Ok(canonical_order(refined))
    }

    /// Canonical pretty JSON of the model structure. Tables are ordered by
    /// sort hash, classes by type, name and table position, and every id is
    /// replaced by its position, so two
    /// models that differ only in id numbering dump identically. Static
    /// table data is left out.
    pub fn model_dump(&self) -> Result<String, ModelError> {
        let table_order = self.table_dump_order()?;
        let table_lookup: BTreeMap<String, usize> = table_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), i))
            .collect();

        let mut class_keys = Vec::with_capacity(self.classes.len());
        for class in self.classes.values() {
            let key = format!(
                "{}:{}:{:08}",
                class.type_tag(),
                self.class_name(&class.class_id)?,
                table_lookup.get(class.table_id.as_str()).copied().unwrap_or(usize::MAX)
            );
            class_keys.push((key, class.class_id.clone()));
        }
        let class_order = canonical_order(class_keys);

        let class_lookup: BTreeMap<String, usize> = class_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), i))
            .collect();

        let mut tables = Vec::with_capacity(table_order.len());
        for table_id in &table_order {
            let Value::Object(mut object) = serde_json::to_value(self.table(table_id)?)? else {
                return Err(ModelError::serialization(format!("table {table_id} is not an object")));
            };
            object.remove("data");
            remap_id(&mut object, "table_id", &table_lookup);
            remap_ids(&mut object, "derived_tables", &table_lookup, true);
            tables.push(Value::Object(object));
        }

        let mut classes = Vec::with_capacity(class_order.len());
        for class_id in &class_order {
            let Value::Object(mut object) = serde_json::to_value(self.class(class_id)?)? else {
                return Err(ModelError::serialization(format!("class {class_id} is not an object")));
            };
            remap_id(&mut object, "class_id", &class_lookup);
            remap_id(&mut object, "table_id", &table_lookup);
            remap_id(&mut object, "source_class_id", &class_lookup);
            remap_id(&mut object, "target_class_id", &class_lookup);
            remap_ids(&mut object, "source_table_ids", &table_lookup, false);
            remap_ids(&mut object, "target_table_ids", &table_lookup, false);
            remap_ids(&mut object, "edge_class_ids", &class_lookup, true);
            classes.push(Value::Object(object));
        }

        let dump = json!({
            "name": self.name,
            "annotations": self.annotations,
            "tables": tables,
            "classes": classes,
        });
        Ok(serde_json::to_string_pretty(&dump)?)
    }

    /// A new model whose data is this model's schema: a node class of
    /// classes, an edge class of class connections, a node class of tables
    /// and an edge class of derivation links, with each class joined to its
    /// table.
    pub fn create_schema_model(&self) -> Result<NetworkModel, ModelError> {
        let class_graph = self.network_model_graph(&GraphOptions::default())?;
        let table_graph = self.table_dependency_graph()?;

        let mut class_rows = Map::new();
        for summary in &class_graph.classes {
            if let (Some(class_id), Some(table_id)) = (&summary.class_id, &summary.table_id) {
                class_rows.insert(
                    class_id.to_string(),
                    json!({
                        "className": summary.class_name,
                        "type": summary.class_type,
                        "tableId": table_id.as_str(),
                    }),
                );
            }
        }
        let class_id_at = |index: usize| {
            class_graph
                .classes
                .get(index)
                .and_then(|summary| summary.class_id.as_ref())
                .map(ClassId::to_string)
        };
        let connection_rows: Vec<Value> = class_graph
            .class_connections
            .iter()
            .filter(|connection| !connection.dummy)
            .map(|connection| {
                json!({
                    "id": connection.id,
                    "source": class_id_at(connection.source),
                    "target": class_id_at(connection.target),
                    "directed": connection.directed,
                    "location": connection.location,
                })
            })
            .collect();

        let mut table_rows = Map::new();
        for summary in &table_graph.tables {
            table_rows.insert(
                summary.table_id.to_string(),
                json!({
                    "name": summary.name,
                    "type": summary.table_type,
                    "attributes": summary.attributes,
                }),
            );
        }
        let link_rows: Vec<Value> = table_graph
            .table_links
            .iter()
            .map(|link| {
                json!({
                    "source": table_graph.tables[link.source].table_id.as_str(),
                    "target": table_graph.tables[link.target].table_id.as_str(),
                })
            })
            .collect();

        let mut schema = NetworkModel::with_registry(
            format!("{}_schema", self.model_id),
            self.config.clone(),
            self.rules.clone(),
        );
        schema.name = format!("{} schema", self.name);

        let classes = schema.add_static_table("classes", Value::Object(class_rows), ["className", "type", "tableId"])?;
        let classes = schema.interpret_as_nodes(&classes)?;
        let connections = schema.add_static_table(
            "connections",
            Value::Array(connection_rows),
            ["id", "source", "target", "directed", "location"],
        )?;
        let connections = schema.interpret_as_edges(&connections)?;
        schema.connect_to_edge_class(&classes, &connections, EdgeSide::Source, None, Some("source"))?;
        schema.connect_to_edge_class(&classes, &connections, EdgeSide::Target, None, Some("target"))?;
        schema.toggle_direction(&connections, Some(true))?;

        let tables = schema.add_static_table("tables", Value::Object(table_rows), ["name", "type", "attributes"])?;
        let tables = schema.interpret_as_nodes(&tables)?;
        let links = schema.add_static_table("links", Value::Array(link_rows), ["source", "target"])?;
        let links = schema.interpret_as_edges(&links)?;
        schema.connect_to_edge_class(&tables, &links, EdgeSide::Source, None, Some("source"))?;
        schema.connect_to_edge_class(&tables, &links, EdgeSide::Target, None, Some("target"))?;
        schema.toggle_direction(&links, Some(true))?;

        let owns = schema.connect_to_node_class(&classes, &tables, Some("tableId"), None)?;
        schema.set_class_name(&owns, Some("class table"))?;
        debug!(
            model = %self.model_id,
            classes = class_graph.classes.len(),
            tables = table_graph.tables.len(),
            "built schema model"
        );
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order_keeps_ties_stable() {
        let keyed = vec![
            ("b".to_string(), "t1".to_string()),
            ("a".to_string(), "t3".to_string()),
            ("b".to_string(), "t2".to_string()),
        ];
        assert_eq!(canonical_order(keyed), vec!["t3", "t1", "t2"]);
    }

    #[test]
    fn test_remap_ids_sorts_sets_only() {
        let lookup: BTreeMap<String, usize> = [("x".to_string(), 1), ("y".to_string(), 0)].into_iter().collect();
        let mut object = Map::new();
        object.insert("chain".into(), json!(["x", "y"]));
        object.insert("set".into(), json!(["x", "y"]));
        object.insert("id".into(), json!("y"));
        remap_ids(&mut object, "chain", &lookup, false);
        remap_ids(&mut object, "set", &lookup, true);
        remap_id(&mut object, "id", &lookup);
        assert_eq!(object["chain"], json!([1, 0]));
        assert_eq!(object["set"], json!([0, 1]));
        assert_eq!(object["id"], json!(0));
    }
}
