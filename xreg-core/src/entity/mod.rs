//! The generic entity core: property-path set/get over a flat property bag,
//! typed scalascoercion driven by the model engine, and dirty tracking for
//! transactional commit. Grounded in `examples/original_source/registry/db.go`'s
//! generic `Entity` (`Get`/`Find`/`Refresh`/`sSet`) and its reflection-based
//! `SetProp`, replaced here (per the spec's design notes) with an explicit,
//! model-driven coercion path instead of runtime reflection.

pub mod version;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::model::{get_attribute_type, path::parse_path, AttrType, Attribute, ResolvedAttr};

/// The four concrete entity levels of the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Registry,
    Group,
    Resource,
    Version,
}

/// A single scalar leaf value stored under a composite property name
/// (`labels.stage`, `arr[0]`). Containers are never stored directly: they
/// are flattened into their leaves by [`Entity::set_save`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Decimal(f64),
    Str(String),
}

impl PropValue {
    pub fn as_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::UInt(u) => serde_json::Value::from(*u),
            Self::Decimal(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Str(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// The three mutually exclusive content references a Version may carry.
pub const CONTENT_PROP: &str = "#resource";
pub const CONTENT_URL_PROP: &str = "#resourceURL";
pub const CONTENT_PROXY_URL_PROP: &str = "#resourceProxyURL";

/// A generic registry entity: Registry, Group, Resource or Version.
/// Composition, not inheritance — callers that need group/resource-specific
/// behavior wrap an `Entity` and delegate.
#[derive(Clone, Debug)]
pub struct Entity {
    pub kind: EntityKind,
    /// Opaque system id (storage primary key), stable across renames.
    pub id: String,
    /// User-facing UID, unique among siblings at this level.
    pub uid: String,
    /// Slash-joined UID path from the registry root.
    pub path: String,
    /// Slash-joined plural path from the registry root.
    pub abstract_path: String,
    pub epoch: u64,
    props: BTreeMap<String, PropValue>,
    dirty: BTreeSet<String>,
    deleted: BTreeSet<String>,
}

impl Entity {
    pub fn new(kind: EntityKind, id: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            uid: uid.into(),
            path: String::new(),
            abstract_path: String::new(),
            epoch: 0,
            props: BTreeMap::new(),
            dirty: BTreeSet::new(),
            deleted: BTreeSet::new(),
        }
    }

    /// Loads a property bag fetched from storage, clearing dirty/deleted
    /// state — used by `refresh()`.
    pub fn load_props(&mut self, props: BTreeMap<String, PropValue>) {
        self.props = props;
        self.dirty.clear();
        self.deleted.clear();
    }

    pub fn get(&self, path: &str) -> Option<&PropValue> {
        self.props.get(path)
    }

    /// Every property whose name is `path` or a descendant of it
    /// (`path.` / `path[` prefix), used both for read-projection and for
    /// cascading deletes of non-leaf paths.
    pub fn get_subtree(&self, path: &str) -> BTreeMap<&str, &PropValue> {
        self.props
            .iter()
            .filter(|(k, _)| *k == path || k.starts_with(&format!("{path}.")) || k.starts_with(&format!("{path}[")))
            .map(|(k, v)| (k.as_str(), v))
            .collect()
    }

    pub fn dirty_paths(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(|s| s.as_str())
    }

    pub fn deleted_paths(&self) -> impl Iterator<Item = &str> {
        self.deleted.iter().map(|s| s.as_str())
    }

    pub fn mark_clean(&mut self) {
        self.dirty.clear();
        self.deleted.clear();
    }

    /// §4.2 `set`: validate `path` against `root_attrs`, coerce `value`
    /// per the resolved attribute type, stage the change (dirty tracking)
    /// without touching storage. A `null` value deletes the path and all
    /// of its descendants.
    pub fn set(&mut self, root_attrs: &HashMap<String, Attribute>, path: &str, value: serde_json::Value) -> Result<(), RegistryError> {
        if value.is_null() {
            return Ok(self.delete_path(path));
        }
        if path == CONTENT_PROP || path == CONTENT_URL_PROP || path == CONTENT_PROXY_URL_PROP {
            self.set_content_ref(path, value);
            return Ok(());
        }
        let leaves = flatten(path, &value);
        for (leaf_path, leaf_value) in leaves {
            let resolved = get_attribute_type(root_attrs, &leaf_path)?;
            let coerced = coerce_scalar(&leaf_value, &resolved)?;
            self.props.insert(leaf_path.clone(), coerced);
            self.dirty.insert(leaf_path);
        }
        Ok(())
    }

    /// §4.2 `set_save`: atomic set + persist + refresh. The persist/refresh
    /// half is the storage layer's responsibility (it owns the connection);
    /// this marks the write as ready to flush immediately rather than
    /// batched with other staged changes.
    pub fn set_save(&mut self, root_attrs: &HashMap<String, Attribute>, path: &str, value: serde_json::Value) -> Result<(), RegistryError> {
        self.set(root_attrs, path, value)?;
        self.epoch += 1;
        Ok(())
    }

    /// Setting any of `#resource`/`#resourceURL`/`#resourceProxyURL` clears
    /// the other two — §4.2 mutual exclusion.
    fn set_content_ref(&mut self, path: &str, value: serde_json::Value) {
        for other in [CONTENT_PROP, CONTENT_URL_PROP, CONTENT_PROXY_URL_PROP] {
            if other != path {
                self.delete_path(other);
            }
        }
        if let serde_json::Value::String(s) = value {
            self.props.insert(path.to_string(), PropValue::Str(s));
        } else {
            // #resource carries opaque bytes out-of-band (the content
            // store), so this marker property only ever holds a content id.
            self.props.insert(path.to_string(), PropValue::Str(value.to_string()));
        }
        self.dirty.insert(path.to_string());
    }

    pub fn delete_path(&mut self, path: &str) {
        let victims: Vec<String> = self
            .props
            .keys()
            .filter(|k| *k == path || k.starts_with(&format!("{path}.")) || k.starts_with(&format!("{path}[")))
            .cloned()
            .collect();
        for v in victims {
            self.props.remove(&v);
            self.dirty.remove(&v);
            self.deleted.insert(v);
        }
    }
}

/// Expands a JSON value into its leaf property paths using the composite
/// naming scheme (`a.b`, `a[0]`, `a[0].b`). Scalars expand to themselves.
fn flatten(prefix: &str, value: &serde_json::Value) -> Vec<(String, serde_json::Value)> {
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .flat_map(|(k, v)| flatten(&format!("{prefix}.{k}"), v))
            .collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .enumerate()
            .flat_map(|(i, v)| flatten(&format!("{prefix}[{i}]"), v))
            .collect(),
        scalar => vec![(prefix.to_string(), scalar.clone())],
    }
}

/// §4.2 typed coercion rules, plus enum-membership enforcement (§9) when the
/// resolved attribute declares one — the value must already have the right
/// shape, so membership is checked against the raw JSON, not the coerced
/// [`PropValue`].
pub fn coerce_scalar(value: &serde_json::Value, resolved: &ResolvedAttr) -> Result<PropValue, RegistryError> {
    let coerced = coerce_scalar_typed(value, resolved.attr_type)?;
    if let Some(allowed) = &resolved.enum_values {
        if !allowed.iter().any(|v| v == value) {
            return Err(RegistryError::bad_request(format!(
                "value {value} is not one of the declared enum values"
            )));
        }
    }
    Ok(coerced)
}

fn coerce_scalar_typed(value: &serde_json::Value, attr_type: AttrType) -> Result<PropValue, RegistryError> {
    use serde_json::Value;
    match attr_type {
        AttrType::Boolean => value
            .as_bool()
            .map(PropValue::Bool)
            .ok_or_else(|| RegistryError::bad_request("expected a boolean value")),
        AttrType::Integer => {
            if let Some(i) = value.as_i64() {
                Ok(PropValue::Int(i))
            } else if let Some(f) = value.as_f64() {
                if f.fract() == 0.0 {
                    Ok(PropValue::Int(f as i64))
                } else {
                    Err(RegistryError::bad_request("expected a whole-valued integer"))
                }
            } else {
                Err(RegistryError::bad_request("expected an integer value"))
            }
        }
        AttrType::UInteger => {
            let as_int = if let Some(u) = value.as_u64() {
                Some(u)
            } else if let Some(f) = value.as_f64() {
                if f.fract() == 0.0 && f >= 0.0 {
                    Some(f as u64)
                } else {
                    None
                }
            } else {
                None
            };
            as_int.map(PropValue::UInt).ok_or_else(|| RegistryError::bad_request("expected a non-negative integer value"))
        }
        AttrType::Decimal => value
            .as_f64()
            .map(PropValue::Decimal)
            .ok_or_else(|| RegistryError::bad_request("expected a numeric value")),
        AttrType::Timestamp => match value {
            Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|_| PropValue::Str(s.clone()))
                .map_err(|_| RegistryError::bad_request(format!("'{s}' is not a valid RFC3339 timestamp"))),
            _ => Err(RegistryError::bad_request("expected an RFC3339 timestamp string")),
        },
        AttrType::String | AttrType::Uri | AttrType::UriReference | AttrType::UriTemplate | AttrType::Url => match value {
            Value::String(s) => Ok(PropValue::Str(s.clone())),
            _ => Err(RegistryError::bad_request("expected a string value")),
        },
        AttrType::Any => Ok(json_to_prop_best_effort(value)),
        AttrType::Map | AttrType::Array | AttrType::Object => {
            Err(RegistryError::internal("coerce_scalar called on a container type; flatten first"))
        }
    }
}

fn json_to_prop_best_effort(value: &serde_json::Value) -> PropValue {
    match value {
        serde_json::Value::Bool(b) => PropValue::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                PropValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                PropValue::UInt(u)
            } else {
                PropValue::Decimal(n.as_f64().unwrap_or_default())
            }
        }
        other => PropValue::Str(other.to_string()),
    }
}

/// Validates (without coercing) that `path` is a syntactically well-formed
/// property path; used by the HTTP surface to reject `filter=`/`inline=`
/// path specs early.
pub fn validate_path_syntax(path: &str) -> Result<(), RegistryError> {
    parse_path(path).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn attrs() -> HashMap<String, Attribute> {
        use crate::model::{AttrType, Item};
        let mut m = HashMap::new();
        m.insert("name".to_string(), Attribute::new("name", AttrType::String));
        let mut labels = Attribute::new("labels", AttrType::Map);
        labels.item = Some(Item { item_type: AttrType::String, attributes: Default::default(), item: None });
        m.insert("labels".to_string(), labels);
        let mut arr = Attribute::new("arr", AttrType::Array);
        arr.item = Some(Item { item_type: AttrType::String, attributes: Default::default(), item: None });
        m.insert("arr".to_string(), arr);
        m
    }

    #[test]
    fn set_then_get_scalar() {
        let mut e = Entity::new(EntityKind::Resource, "1", "f1");
        e.set(&attrs(), "name", serde_json::json!("hello")).unwrap();
        assert_eq!(e.get("name"), Some(&PropValue::Str("hello".into())));
    }

    #[test]
    fn nil_deletes_map_entry() {
        let mut e = Entity::new(EntityKind::Resource, "1", "f1");
        e.set(&attrs(), "labels.stage", serde_json::json!("prod")).unwrap();
        assert!(e.get("labels.stage").is_some());
        e.set(&attrs(), "labels.stage", serde_json::Value::Null).unwrap();
        assert!(e.get("labels.stage").is_none());
    }

    #[test]
    fn nil_on_container_deletes_all_descendants() {
        let mut e = Entity::new(EntityKind::Resource, "1", "f1");
        e.set(&attrs(), "arr[0]", serde_json::json!("x")).unwrap();
        e.set(&attrs(), "arr[1]", serde_json::json!("y")).unwrap();
        assert_eq!(e.get_subtree("arr").len(), 2);
        e.set(&attrs(), "arr", serde_json::Value::Null).unwrap();
        assert_eq!(e.get_subtree("arr").len(), 0);
    }

    #[test]
    fn resource_ref_mutual_exclusion() {
        let mut e = Entity::new(EntityKind::Version, "1", "v1");
        e.set(&attrs(), CONTENT_URL_PROP, serde_json::json!("https://example.com/f")).unwrap();
        assert!(e.get(CONTENT_URL_PROP).is_some());
        e.set(&attrs(), CONTENT_PROP, serde_json::json!("abc")).unwrap();
        assert!(e.get(CONTENT_URL_PROP).is_none());
        assert!(e.get(CONTENT_PROP).is_some());
    }

    #[test]
    fn type_mismatch_is_bad_request() {
        let mut e = Entity::new(EntityKind::Resource, "1", "f1");
        assert!(e.set(&attrs(), "name", serde_json::json!(42)).is_err());
    }

    #[test]
    fn enum_violation_is_bad_request() {
        use crate::model::AttrType;
        let mut m = attrs();
        let mut visibility = Attribute::new("visibility", AttrType::String);
        visibility.enum_values = Some(vec![serde_json::json!("public"), serde_json::json!("private")]);
        m.insert("visibility".to_string(), visibility);

        let mut e = Entity::new(EntityKind::Resource, "1", "f1");
        let err = e.set(&m, "visibility", serde_json::json!("secret")).unwrap_err();
        assert_eq!(err.kind(), "bad_request");
        assert!(e.get("visibility").is_none());

        e.set(&m, "visibility", serde_json::json!("public")).unwrap();
        assert_eq!(e.get("visibility"), Some(&PropValue::Str("public".into())));
    }
}
