//! Filter and update model shared by every backend
//!
//! Paths are dotted (`stock.reserved`, `subcategories.id`). When a path
//! crosses an array, the remaining segments are evaluated against each
//! element, and an equality clause also matches an array that contains the
//! value. This is the subset of document-database semantics the projections
//! rely on.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde_json::{Map, Number, Value};

use crate::error::{StoreError, StoreResult};

/// A stored document. The key `_id` holds the aggregate id.
pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";

/// Id of `document`, if it carries a string `_id`
pub fn document_id(document: &Document) -> Option<&str> {
    document.get(ID_FIELD).and_then(Value::as_str)
}

/// Serialize `value` into a document; fails unless it maps to an object.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(document) => Ok(document),
        other => Err(serde_json::Error::custom(format!(
            "expected an object, got {other}"
        ))),
    }
}

pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(document))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
}

/// Conjunction of clauses; the empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().eq(ID_FIELD, id.into())
    }

    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq(path.into(), value.into()));
        self
    }

    pub fn ne(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Ne(path.into(), value.into()));
        self
    }

    pub fn is_in<V: Into<Value>>(
        mut self,
        path: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.clauses.push(Clause::In(
            path.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Eq(path, value) => path_equals(document, path, value),
            Clause::Ne(path, value) => !path_equals(document, path, value),
            Clause::In(path, values) => values.iter().any(|v| path_equals(document, path, v)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(String, Value),
    Unset(String),
    Inc(String, i64),
    Push(String, Value),
    /// Remove array elements equal to the value; an object value removes
    /// elements whose fields include all of its fields.
    Pull(String, Value),
    AddToSet(String, Value),
}

impl UpdateOp {
    pub fn path(&self) -> &str {
        match self {
            UpdateOp::Set(path, _)
            | UpdateOp::Unset(path)
            | UpdateOp::Inc(path, _)
            | UpdateOp::Push(path, _)
            | UpdateOp::Pull(path, _)
            | UpdateOp::AddToSet(path, _) => path,
        }
    }
}

/// Field-level partial update, applied atomically per document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(path.into(), value.into()));
        self
    }

    /// `set` for every `(path, value)` pair
    pub fn set_all<K, V>(self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        fields
            .into_iter()
            .fold(self, |update, (path, value)| update.set(path, value))
    }

    /// `set` only when `value` is present
    pub fn set_some<V: Into<Value>>(self, path: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.set(path, value),
            None => self,
        }
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(path.into()));
        self
    }

    pub fn inc(mut self, path: impl Into<String>, delta: i64) -> Self {
        self.ops.push(UpdateOp::Inc(path.into(), delta));
        self
    }

    pub fn push(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Push(path.into(), value.into()));
        self
    }

    pub fn pull(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Pull(path.into(), value.into()));
        self
    }

    pub fn add_to_set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::AddToSet(path.into(), value.into()));
        self
    }

    /// Append every operation of `other`.
    pub fn merge(mut self, other: Update) -> Self {
        self.ops.extend(other.ops);
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every operation to `document` in order.
    pub fn apply(&self, document: &mut Document) -> StoreResult<()> {
        for op in &self.ops {
            apply_op(document, op)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
}

fn path_equals(document: &Document, path: &str, expected: &Value) -> bool {
    let parts = segments(path);
    let Some((head, rest)) = parts.split_first() else {
        return false;
    };
    let mut found = Vec::new();
    if let Some(value) = document.get(*head) {
        collect(value, rest, &mut found);
    }
    found.iter().any(|value| {
        values_equal(value, expected)
            || matches!(value, Value::Array(items) if items.iter().any(|item| values_equal(item, expected)))
    })
}

fn segments(path: &str) -> Vec<&str> {
    path.split('.').collect()
}

fn collect<'a>(value: &'a Value, path: &[&str], found: &mut Vec<&'a Value>) {
    let Some((head, rest)) = path.split_first() else {
        found.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(*head) {
                collect(child, rest, found);
            }
        }
        Value::Array(items) => match head.parse::<usize>() {
            Ok(index) => {
                if let Some(child) = items.get(index) {
                    collect(child, rest, found);
                }
            }
            Err(_) => {
                for item in items {
                    collect(item, path, found);
                }
            }
        },
        _ => {}
    }
}

/// Equality with integers and floats of the same value treated as equal.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn element_matches(element: &Value, pattern: &Value) -> bool {
    match (element, pattern) {
        (Value::Object(fields), Value::Object(wanted)) => wanted
            .iter()
            .all(|(key, value)| fields.get(key).is_some_and(|f| values_equal(f, value))),
        _ => values_equal(element, pattern),
    }
}

/// Parent object of `path`, creating intermediate objects as needed.
fn parent_mut<'a>(
    document: &'a mut Document,
    path: &str,
) -> StoreResult<(&'a mut Document, String)> {
    let parts = segments(path);
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| StoreError::invalid_update(path, "empty path"))?;

    let mut current = document;
    for part in parents {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(map) => map,
            _ => return Err(StoreError::invalid_update(path, format!("'{part}' is not an object"))),
        };
    }
    Ok((current, last.to_string()))
}

fn array_mut<'a>(document: &'a mut Document, path: &str) -> StoreResult<&'a mut Vec<Value>> {
    let (parent, field) = parent_mut(document, path)?;
    match parent
        .entry(field)
        .or_insert_with(|| Value::Array(Vec::new()))
    {
        Value::Array(items) => Ok(items),
        _ => Err(StoreError::invalid_update(path, "not an array")),
    }
}

fn apply_op(document: &mut Document, op: &UpdateOp) -> StoreResult<()> {
    match op {
        UpdateOp::Set(path, value) => {
            let (parent, field) = parent_mut(document, path)?;
            parent.insert(field, value.clone());
        }
        UpdateOp::Unset(path) => {
            let (parent, field) = parent_mut(document, path)?;
            parent.remove(&field);
        }
        UpdateOp::Inc(path, delta) => {
            let (parent, field) = parent_mut(document, path)?;
            let next = match parent.get(&field) {
                None | Some(Value::Null) => Value::from(*delta),
                Some(Value::Number(current)) => increment(current, *delta)
                    .ok_or_else(|| StoreError::invalid_update(path, "increment overflows"))?,
                Some(_) => return Err(StoreError::invalid_update(path, "not a number")),
            };
            parent.insert(field, next);
        }
        UpdateOp::Push(path, value) => array_mut(document, path)?.push(value.clone()),
        UpdateOp::AddToSet(path, value) => {
            let items = array_mut(document, path)?;
            if !items.iter().any(|item| values_equal(item, value)) {
                items.push(value.clone());
            }
        }
        UpdateOp::Pull(path, pattern) => {
            let (parent, field) = parent_mut(document, path)?;
            match parent.get_mut(&field) {
                None => {}
                Some(Value::Array(items)) => items.retain(|item| !element_matches(item, pattern)),
                Some(_) => return Err(StoreError::invalid_update(path, "not an array")),
            }
        }
    }
    Ok(())
}

fn increment(current: &Number, delta: i64) -> Option<Value> {
    if let Some(value) = current.as_i64() {
        return value.checked_add(delta).map(Value::from);
    }
    current
        .as_f64()
        .and_then(|value| Number::from_f64(value + delta as f64))
        .map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_to_document_requires_object() {
        #[derive(Serialize)]
        struct Category {
            #[serde(rename = "_id")]
            id: String,
        }

        let document = to_document(&Category { id: "c-1".into() }).unwrap();
        assert_eq!(document_id(&document), Some("c-1"));
        assert!(to_document(&42).is_err());
    }

    #[test]
    fn test_filter_by_nested_path() {
        let product = doc(json!({ "_id": "p-1", "stock": { "available": 3 } }));

        assert!(Filter::by_id("p-1").matches(&product));
        assert!(Filter::new().eq("stock.available", 3).matches(&product));
        assert!(!Filter::new().eq("stock.available", 4).matches(&product));
        assert!(Filter::new().matches(&product));
    }

    #[test]
    fn test_filter_matches_array_elements() {
        let category = doc(json!({
            "_id": "c-1",
            "tags": ["sale", "new"],
            "subcategories": [{ "id": "c-2" }, { "id": "c-3" }]
        }));

        assert!(Filter::new().eq("tags", "sale").matches(&category));
        assert!(Filter::new().eq("subcategories.id", "c-3").matches(&category));
        assert!(Filter::new().ne("subcategories.id", "c-9").matches(&category));
        assert!(Filter::new().is_in("_id", ["c-0", "c-1"]).matches(&category));
    }

    #[test]
    fn test_integer_and_float_compare_equal() {
        let product = doc(json!({ "price": 10 }));
        assert!(Filter::new().eq("price", 10.0).matches(&product));
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut customer = doc(json!({ "_id": "c-1" }));
        Update::new()
            .set("personalData.email", "a@b.com")
            .set("emailVerified", false)
            .apply(&mut customer)
            .unwrap();

        assert_eq!(customer["personalData"]["email"], "a@b.com");
        assert_eq!(customer["emailVerified"], false);
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut customer = doc(json!({ "personalData": "oops" }));
        let err = Update::new()
            .set("personalData.email", "a@b.com")
            .apply(&mut customer)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidUpdate { .. }));
    }

    #[test]
    fn test_inc_starts_from_zero_and_adds() {
        let mut category = doc(json!({ "_id": "c-1" }));
        let update = Update::new().inc("productCount", 1);
        update.apply(&mut category).unwrap();
        update.apply(&mut category).unwrap();
        Update::new().inc("productCount", -3).apply(&mut category).unwrap();

        assert_eq!(category["productCount"], -1);
    }

    #[test]
    fn test_inc_rejects_strings() {
        let mut category = doc(json!({ "productCount": "many" }));
        assert!(Update::new().inc("productCount", 1).apply(&mut category).is_err());
    }

    #[test]
    fn test_array_operators() {
        let mut category = doc(json!({ "_id": "c-1" }));
        Update::new()
            .add_to_set("subcategories", json!({ "id": "c-2", "name": "Phones" }))
            .add_to_set("subcategories", json!({ "id": "c-2", "name": "Phones" }))
            .push("subcategories", json!({ "id": "c-3", "name": "Tablets" }))
            .apply(&mut category)
            .unwrap();
        assert_eq!(category["subcategories"].as_array().unwrap().len(), 2);

        Update::new()
            .pull("subcategories", json!({ "id": "c-2" }))
            .pull("missing", "x")
            .apply(&mut category)
            .unwrap();
        assert_eq!(category["subcategories"], json!([{ "id": "c-3", "name": "Tablets" }]));
    }

    #[test]
    fn test_unset_and_set_some() {
        let mut product = doc(json!({ "_id": "p-1", "description": "old" }));
        Update::new()
            .unset("description")
            .set_some("name", Some("Phone"))
            .set_some("brand", None::<String>)
            .apply(&mut product)
            .unwrap();

        assert!(!product.contains_key("description"));
        assert!(!product.contains_key("brand"));
        assert_eq!(product["name"], "Phone");
    }
}
