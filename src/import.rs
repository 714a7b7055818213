//! Turning uploaded text files into static tables.
//!
//! Decoding bytes into text happens elsewhere; this module only parses
//! already-decoded text. Every importer ends in
//! [`NetworkModel::add_static_table`], so an import always yields one new
//! generic class.

use std::collections::BTreeSet;

use csv::ReaderBuilder;
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::{class::ClassId, errors::ModelError, model::NetworkModel};

/// A decoded upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextFile {
    pub name: String,
    /// Lower- or upper-case extension without the dot.
    pub extension: String,
    pub text: String,
}

impl TextFile {
    pub fn new(name: impl Into<String>, extension: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
            text: text.into(),
        }
    }

    /// Splits the extension off a file name: `people.csv` → (`people`, `csv`).
    pub fn from_path_name(file_name: &str, text: impl Into<String>) -> Self {
        let (name, extension) = file_name.rsplit_once('.').unwrap_or((file_name, ""));
        Self::new(name, extension, text)
    }

    fn table_name(&self) -> &str {
        let suffix_len = self.extension.len() + 1;
        if self.name.len() > suffix_len
            && self.name.to_ascii_lowercase().ends_with(&format!(".{}", self.extension.to_ascii_lowercase()))
        {
            &self.name[..self.name.len() - suffix_len]
        } else {
            &self.name
        }
    }
}

/// Parses `file` by extension and registers it as a static table with a
/// generic class named after the file.
pub fn import_text(model: &mut NetworkModel, file: &TextFile) -> Result<ClassId, ModelError> {
    let name = file.table_name().to_string();
    let (data, attributes) = match file.extension.to_ascii_lowercase().as_str() {
        "csv" => delimited_rows(&file.text, b',')?,
        "tsv" => delimited_rows(&file.text, b'\t')?,
        "json" => json_rows(&file.text)?,
        "treejson" => tree_rows(&file.text)?,
        "topojson" => topology_rows(&file.text)?,
        other => {
            return Err(ModelError::invalid_input(format!(
                "cannot import .{other} files"
            )));
        }
    };
    debug!(file = %name, extension = %file.extension, attributes = attributes.len(), "imported file");
    model.add_static_table(&name, data, attributes)
}

/// Numbers and booleans become typed values; everything else stays text.
pub fn infer_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Some(number) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        if !trimmed.is_empty() && trimmed.chars().any(|c| c.is_ascii_digit()) {
            return Value::Number(number);
        }
    }
    match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// Reads a header row plus records. Quoting follows RFC 4180; blank and
/// ragged records are skipped.
fn delimited_rows(text: &str, delimiter: u8) -> Result<(Value, Vec<String>), ModelError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let header: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    if header.iter().all(String::is_empty) {
        return Ok((Value::Array(Vec::new()), Vec::new()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.len() != header.len() {
            warn!(
                line = record.position().map_or(0, |pos| pos.line()),
                fields = record.len(),
                expected = header.len(),
                "skipped ragged row"
            );
            continue;
        }
        let row: Map<String, Value> = header.iter().cloned().zip(record.iter().map(infer_value)).collect();
        rows.push(Value::Object(row));
    }
    Ok((Value::Array(rows), header))
}

/// Union of the keys of every object in `rows`.
fn object_keys<'a>(rows: impl Iterator<Item = &'a Value>) -> Vec<String> {
    let mut keys = BTreeSet::new();
    for row in rows {
        if let Value::Object(object) = row {
            keys.extend(object.keys().cloned());
        }
    }
    keys.into_iter().collect()
}

fn json_rows(text: &str) -> Result<(Value, Vec<String>), ModelError> {
    let data: Value = serde_json::from_str(text)?;
    let attributes = match &data {
        Value::Array(rows) => object_keys(rows.iter()),
        Value::Object(rows) => object_keys(rows.values()),
        other => {
            return Err(ModelError::invalid_input(format!(
                "json import needs an array or object, got {other}"
            )));
        }
    };
    Ok((data, attributes))
}

/// Flattens a `children` tree depth first. Each row gets a `parent`
/// attribute holding its parent's row position, `null` for roots.
fn tree_rows(text: &str) -> Result<(Value, Vec<String>), ModelError> {
    let root: Value = serde_json::from_str(text)?;
    let roots = match root {
        Value::Array(roots) => roots,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(ModelError::invalid_input(format!(
                "treejson import needs an object or array, got {other}"
            )));
        }
    };

    let mut rows: Vec<Value> = Vec::new();
    let mut stack: Vec<(Value, Option<usize>)> = roots.into_iter().rev().map(|node| (node, None)).collect();
    while let Some((node, parent)) = stack.pop() {
        let Value::Object(mut object) = node else {
            return Err(ModelError::invalid_input("treejson nodes must be objects"));
        };
        let children = match object.remove("children") {
            Some(Value::Array(children)) => children,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(ModelError::invalid_input(format!(
                    "treejson children must be an array, got {other}"
                )));
            }
        };
        object.insert(String::from("parent"), parent.map_or(Value::Null, Value::from));
        let position = rows.len();
        rows.push(Value::Object(object));
        for child in children.into_iter().rev() {
            stack.push((child, Some(position)));
        }
    }
    let attributes = object_keys(rows.iter());
    Ok((Value::Array(rows), attributes))
}

/// One row per geometry of every topology object: the geometry's
/// properties plus its `id` and the `object` it belongs to.
fn topology_rows(text: &str) -> Result<(Value, Vec<String>), ModelError> {
    let topology: Value = serde_json::from_str(text)?;
    let objects = topology
        .get("objects")
        .and_then(Value::as_object)
        .ok_or_else(|| ModelError::invalid_input("topojson import needs an objects map"))?;

    let mut rows = Vec::new();
    for (object_name, object) in objects {
        let geometries: Vec<&Value> = match object.get("geometries").and_then(Value::as_array) {
            Some(geometries) => geometries.iter().collect(),
            None => vec![object],
        };
        for geometry in geometries {
            let mut row = geometry
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            row.insert(
                String::from("id"),
                geometry.get("id").cloned().unwrap_or(Value::Null),
            );
            row.insert(String::from("object"), Value::String(object_name.clone()));
            rows.push(Value::Object(row));
        }
    }
    let attributes = object_keys(rows.iter());
    Ok((Value::Array(rows), attributes))
}
