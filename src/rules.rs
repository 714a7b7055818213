//! Data-described rules for derived attributes, filters and group reducers.
//!
//! Rules persist as plain serde data. Logic that cannot be described with
//! the built-in variants goes through a name-keyed [`RuleRegistry`]; only
//! the name is stored, and a missing name fails the build that needs it.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    errors::ModelError,
    item::{ItemArena, WrappedItem},
    table::TableId,
};

/// Computes a derived attribute from an item and the items it links to.
pub type DeriveFn = dyn Fn(&WrappedItem, &ItemArena) -> Value + Send + Sync;

/// Decides whether an attribute value (or index) passes a filter.
pub type FilterFn = dyn Fn(Option<&Value>) -> bool + Send + Sync;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum AttributeRule {
    Constant {
        value: Value,
    },
    Copy {
        attribute: String,
    },
    Index,
    Concat {
        attributes: Vec<String>,
        separator: String,
    },
    /// Number of items linked from the table with the given id.
    ConnectedCount {
        table_id: TableId,
    },
    Callback {
        name: String,
    },
}

impl AttributeRule {
    pub fn evaluate(
        &self,
        item: &WrappedItem,
        arena: &ItemArena,
        registry: &RuleRegistry,
    ) -> Result<Value, ModelError> {
        match self {
            AttributeRule::Constant { value } => Ok(value.clone()),
            AttributeRule::Copy { attribute } => {
                Ok(item.row.get(attribute).cloned().unwrap_or(Value::Null))
            }
            AttributeRule::Index => Ok(Value::String(item.index.to_string())),
            AttributeRule::Concat {
                attributes,
                separator,
            } => {
                let parts: Vec<String> = attributes
                    .iter()
                    .map(|attr| item.row.get(attr).map(value_to_key).unwrap_or_default())
                    .collect();
                Ok(Value::String(parts.join(separator)))
            }
            AttributeRule::ConnectedCount { table_id } => {
                let count = item.connected_in(table_id).len();
                Ok(Value::from(count as u64))
            }
            AttributeRule::Callback { name } => {
                let func = registry.derive_fn(name)?;
                Ok(func(item, arena))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FilterRule {
    Compare { op: CompareOp, value: Value },
    OneOf { values: Vec<Value> },
    Exists,
    Not { inner: Box<FilterRule> },
    Callback { name: String },
}

impl FilterRule {
    pub fn eq(value: impl Into<Value>) -> Self {
        FilterRule::Compare {
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    pub fn compare(op: CompareOp, value: impl Into<Value>) -> Self {
        FilterRule::Compare {
            op,
            value: value.into(),
        }
    }

    pub fn negate(self) -> Self {
        FilterRule::Not {
            inner: Box::new(self),
        }
    }

    /// `value` is `None` when the row lacks the filtered attribute.
    pub fn matches(&self, value: Option<&Value>, registry: &RuleRegistry) -> Result<bool, ModelError> {
        match self {
            FilterRule::Compare { op, value: expected } => Ok(match value {
                Some(actual) => compare(*op, actual, expected),
                None => *op == CompareOp::Ne,
            }),
            FilterRule::OneOf { values } => {
                Ok(value.is_some_and(|actual| values.iter().any(|v| loose_eq(actual, v))))
            }
            FilterRule::Exists => Ok(value.is_some_and(|v| !v.is_null())),
            FilterRule::Not { inner } => Ok(!inner.matches(value, registry)?),
            FilterRule::Callback { name } => {
                let func = registry.filter_fn(name)?;
                Ok(func(value))
            }
        }
    }
}

fn compare(op: CompareOp, actual: &Value, expected: &Value) -> bool {
    match op {
        CompareOp::Eq => loose_eq(actual, expected),
        CompareOp::Ne => !loose_eq(actual, expected),
        CompareOp::Contains => match actual {
            Value::String(s) => s.contains(&value_to_key(expected)),
            Value::Array(items) => items.iter().any(|v| loose_eq(v, expected)),
            Value::Object(map) => map.contains_key(&value_to_key(expected)),
            _ => false,
        },
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let Some(ordering) = order_values(actual, expected) else {
                return false;
            };
            match op {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }
        }
    }
}

/// Numbers compare numerically (also when one side is a numeric string).
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn order_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Stringifies a value the way group keys and join keys are formed:
/// strings stay bare, everything else uses its JSON text.
pub fn value_to_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::from("null"),
        other => other.to_string(),
    }
}

/// Folds one contributing row into an aggregated row attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reduce", rename_all = "snake_case")]
pub enum Reducer {
    Count,
    Sum { attribute: String },
    Min { attribute: String },
    Max { attribute: String },
    First { attribute: String },
    Last { attribute: String },
    Collect { attribute: String },
}

impl Reducer {
    /// `acc` is `None` for the first row of a group.
    pub fn fold(&self, acc: Option<&Value>, row: &Map<String, Value>) -> Value {
        match self {
            Reducer::Count => {
                let current = acc.and_then(Value::as_u64).unwrap_or(0);
                Value::from(current + 1)
            }
            Reducer::Sum { attribute } => {
                let current = acc.and_then(Value::as_f64).unwrap_or(0.0);
                let add = row.get(attribute).and_then(as_number).unwrap_or(0.0);
                number_value(current + add)
            }
            Reducer::Min { attribute } | Reducer::Max { attribute } => {
                let Some(candidate) = row.get(attribute) else {
                    return acc.cloned().unwrap_or(Value::Null);
                };
                match acc {
                    None | Some(Value::Null) => candidate.clone(),
                    Some(current) => {
                        let wanted = if matches!(self, Reducer::Min { .. }) {
                            Ordering::Less
                        } else {
                            Ordering::Greater
                        };
                        if order_values(candidate, current) == Some(wanted) {
                            candidate.clone()
                        } else {
                            current.clone()
                        }
                    }
                }
            }
            Reducer::First { attribute } => match acc {
                Some(existing) => existing.clone(),
                None => row.get(attribute).cloned().unwrap_or(Value::Null),
            },
            Reducer::Last { attribute } => row
                .get(attribute)
                .cloned()
                .unwrap_or_else(|| acc.cloned().unwrap_or(Value::Null)),
            Reducer::Collect { attribute } => {
                let mut values = match acc {
                    Some(Value::Array(items)) => items.clone(),
                    _ => Vec::new(),
                };
                values.push(row.get(attribute).cloned().unwrap_or(Value::Null));
                Value::Array(values)
            }
        }
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

#[derive(Default)]
struct RegistryInner {
    derive: AHashMap<String, Arc<DeriveFn>>,
    filters: AHashMap<String, Arc<FilterFn>>,
}

/// Shared, name-keyed callback registry.
///
/// Cloning is cheap; clones see each other's registrations.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_derive<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(&WrappedItem, &ItemArena) -> Value + Send + Sync + 'static,
    {
        self.inner.write().derive.insert(name.into(), Arc::new(func));
    }

    pub fn register_filter<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        self.inner.write().filters.insert(name.into(), Arc::new(func));
    }

    pub fn derive_fn(&self, name: &str) -> Result<Arc<DeriveFn>, ModelError> {
        self.inner
            .read()
            .derive
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::unknown_callback(format!("derive function {name}")))
    }

    pub fn filter_fn(&self, name: &str) -> Result<Arc<FilterFn>, ModelError> {
        self.inner
            .read()
            .filters
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::unknown_callback(format!("filter function {name}")))
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        let mut derive: Vec<&String> = inner.derive.keys().collect();
        let mut filters: Vec<&String> = inner.filters.keys().collect();
        derive.sort();
        filters.sort();
        f.debug_struct("RuleRegistry")
            .field("derive", &derive)
            .field("filters", &filters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_compare_numbers_across_representations() {
        let registry = RuleRegistry::new();
        let rule = FilterRule::compare(CompareOp::Gt, 3);
        assert!(rule.matches(Some(&json!("4")), &registry).unwrap());
        assert!(!rule.matches(Some(&json!(2)), &registry).unwrap());
        assert!(!rule.matches(None, &registry).unwrap());
    }

    #[test]
    fn test_not_and_one_of() {
        let registry = RuleRegistry::new();
        let rule = FilterRule::OneOf {
            values: vec![json!("a"), json!("b")],
        }
        .negate();
        assert!(rule.matches(Some(&json!("c")), &registry).unwrap());
        assert!(!rule.matches(Some(&json!("a")), &registry).unwrap());
    }

    #[test]
    fn test_missing_callback_is_reported() {
        let registry = RuleRegistry::new();
        let rule = FilterRule::Callback {
            name: "nope".into(),
        };
        let err = rule.matches(Some(&json!(1)), &registry).unwrap_err();
        assert!(matches!(err, ModelError::UnknownCallback(_)));
    }

    #[test]
    fn test_registered_filter_is_shared_between_clones() {
        let registry = RuleRegistry::new();
        let clone = registry.clone();
        clone.register_filter("even", |v| v.and_then(Value::as_i64).is_some_and(|n| n % 2 == 0));
        let rule = FilterRule::Callback {
            name: "even".into(),
        };
        assert!(rule.matches(Some(&json!(4)), &registry).unwrap());
    }

    #[test]
    fn test_reducers_fold_rows() {
        let rows = [row(json!({"n": 3})), row(json!({"n": 1})), row(json!({"n": 5}))];
        let reducers = [
            Reducer::Count,
            Reducer::Sum { attribute: "n".into() },
            Reducer::Min { attribute: "n".into() },
            Reducer::Max { attribute: "n".into() },
            Reducer::First { attribute: "n".into() },
            Reducer::Collect { attribute: "n".into() },
        ];
        let results: Vec<Value> = reducers
            .iter()
            .map(|reducer| {
                let mut acc: Option<Value> = None;
                for r in &rows {
                    acc = Some(reducer.fold(acc.as_ref(), r));
                }
                acc.unwrap()
            })
            .collect();
        assert_eq!(
            results,
            vec![json!(3), json!(9), json!(1), json!(5), json!(3), json!([3, 1, 5])]
        );
    }

    #[test]
    fn test_value_to_key() {
        assert_eq!(value_to_key(&json!("x")), "x");
        assert_eq!(value_to_key(&json!(7)), "7");
        assert_eq!(value_to_key(&json!(true)), "true");
        assert_eq!(value_to_key(&Value::Null), "null");
    }
}
