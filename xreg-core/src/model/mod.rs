//! The model engine: a dynamic, JSON-serializable attribute schema that the
//! entity core validates property writes against. Grounded in
//! `examples/original_source/registry/model.go`'s `Model`/`GroupModel`/
//! `ResourceModel`/`Attribute` types, rewritten as an explicit Rust type
//! tree instead of reflection-backed Go structs.

pub mod path;
pub mod types;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use path::{get_attribute_type, ResolvedAttr};
pub use types::{is_valid_attribute_name, is_valid_map_key, AttrType, Attribute, IfValue, Item};

use crate::error::RegistryError;

/// Defaults per §6 when a `ResourceModel` field is omitted.
pub const DEFAULT_VERSIONID: bool = true;
pub const DEFAULT_LATEST: bool = true;
pub const DEFAULT_HASDOCUMENT: bool = true;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResourceModel {
    pub plural: String,
    pub singular: String,
    #[serde(default)]
    pub versions: u32,
    #[serde(default = "default_true")]
    pub versionid: bool,
    #[serde(default = "default_true")]
    pub latest: bool,
    #[serde(default = "default_true")]
    pub hasdocument: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Attribute>,
}

fn default_true() -> bool {
    true
}

impl ResourceModel {
    pub fn new(plural: impl Into<String>, singular: impl Into<String>) -> Self {
        Self {
            plural: plural.into(),
            singular: singular.into(),
            versions: 0,
            versionid: DEFAULT_VERSIONID,
            latest: DEFAULT_LATEST,
            hasdocument: DEFAULT_HASDOCUMENT,
            attributes: HashMap::new(),
        }
    }

    pub fn add_attribute(&mut self, attr: Attribute) -> Result<(), RegistryError> {
        add_attribute_to(&mut self.attributes, attr)
    }

    fn verify(&self, group_plural: &str, key: &str) -> Result<(), RegistryError> {
        if self.plural.is_empty() || self.singular.is_empty() {
            return Err(RegistryError::model_invalid(format!(
                "resource model under group '{}' has empty plural/singular",
                group_plural
            )));
        }
        if self.plural != key {
            return Err(RegistryError::model_invalid(format!(
                "resource model key '{key}' under group '{group_plural}' does not match its plural '{}'",
                self.plural
            )));
        }
        if !is_valid_attribute_name(&self.singular) {
            return Err(RegistryError::model_invalid(format!(
                "resource singular '{}' is not a valid attribute name",
                self.singular
            )));
        }
        for (name, attr) in &self.attributes {
            verify_keyed_attribute(name, attr)?;
        }
        verify_if_value_collisions(&self.attributes)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GroupModel {
    pub plural: String,
    pub singular: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Attribute>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub resources: HashMap<String, ResourceModel>,
}

impl GroupModel {
    pub fn new(plural: impl Into<String>, singular: impl Into<String>) -> Self {
        Self {
            plural: plural.into(),
            singular: singular.into(),
            attributes: HashMap::new(),
            resources: HashMap::new(),
        }
    }

    pub fn add_resource_model(&mut self, rm: ResourceModel) -> Result<&mut ResourceModel, RegistryError> {
        if self.resources.contains_key(&rm.plural) {
            return Err(RegistryError::model_invalid(format!(
                "duplicate resource plural '{}' under group '{}'",
                rm.plural, self.plural
            )));
        }
        if singular_collides(self.resources.values().map(|r| r.singular.as_str()), &rm.singular) {
            return Err(RegistryError::model_invalid(format!(
                "resource singular '{}' collides with a sibling under group '{}'",
                rm.singular, self.plural
            )));
        }
        let plural = rm.plural.clone();
        self.resources.insert(plural.clone(), rm);
        Ok(self.resources.get_mut(&plural).unwrap())
    }

    pub fn add_attribute(&mut self, attr: Attribute) -> Result<(), RegistryError> {
        add_attribute_to(&mut self.attributes, attr)
    }

    fn verify(&self, key: &str) -> Result<(), RegistryError> {
        if self.plural != key {
            return Err(RegistryError::model_invalid(format!(
                "group model key '{key}' does not match its plural '{}'",
                self.plural
            )));
        }
        if !is_valid_attribute_name(&self.singular) {
            return Err(RegistryError::model_invalid(format!(
                "group singular '{}' is not a valid attribute name",
                self.singular
            )));
        }
        for (name, attr) in &self.attributes {
            verify_keyed_attribute(name, attr)?;
        }
        verify_if_value_collisions(&self.attributes)?;
        for (res_key, rm) in &self.resources {
            rm.verify(&self.plural, res_key)?;
        }
        Ok(())
    }
}

/// Root of the schema tree, one per Registry.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Model {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schemas: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Attribute>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub groups: HashMap<String, GroupModel>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, RegistryError> {
        serde_json::from_value(value.clone())
            .map_err(|e| RegistryError::model_invalid(format!("malformed model JSON: {e}")))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("Model always serializes")
    }

    pub fn add_group_model(&mut self, plural: impl Into<String>, singular: impl Into<String>) -> Result<&mut GroupModel, RegistryError> {
        let plural = plural.into();
        let singular = singular.into();
        if self.groups.contains_key(&plural) {
            return Err(RegistryError::model_invalid(format!("duplicate group plural '{plural}'")));
        }
        if singular_collides(self.groups.values().map(|g| g.singular.as_str()), &singular) {
            return Err(RegistryError::model_invalid(format!("group singular '{singular}' collides with a sibling")));
        }
        self.groups.insert(plural.clone(), GroupModel::new(plural.clone(), singular));
        Ok(self.groups.get_mut(&plural).unwrap())
    }

    pub fn add_attribute(&mut self, attr: Attribute) -> Result<(), RegistryError> {
        add_attribute_to(&mut self.attributes, attr)
    }

    /// §4.1 Verify algorithm: walk the whole tree, names/plural/singular
    /// invariants, enum typing, item presence, recursing into groups and
    /// resources. Fails fast identifying the offending path.
    pub fn verify(&self) -> Result<(), RegistryError> {
        for (name, attr) in &self.attributes {
            verify_keyed_attribute(name, attr)?;
        }
        verify_if_value_collisions(&self.attributes)?;
        for (key, g) in &self.groups {
            g.verify(key)?;
        }
        Ok(())
    }

    /// §4.1 `save`: run verify, and (conceptually) persist the JSON blob.
    /// Persistence itself is the storage layer's job; this is the
    /// validation gate every mutator must pass through before the caller
    /// is allowed to hand the model to storage.
    pub fn save(&mut self) -> Result<(), RegistryError> {
        self.verify()
    }

    /// §4.1 ApplyNewModel: diff against `new`, keeping group/resource
    /// models absent from `new` removed (cascades live in the storage
    /// layer's triggers), adding the missing ones, and refreshing the
    /// mutable fields (singular, versioning flags, attributes) of the
    /// ones that persist. Schemas are replaced wholesale.
    pub fn apply_new_model(&mut self, new: Model) -> Result<(), RegistryError> {
        new.verify()?;
        self.schemas = new.schemas;
        self.attributes = new.attributes;
        self.groups = new.groups;
        Ok(())
    }

    /// §4.1 attribute-type resolution for a property path, delegated to
    /// `path::get_attribute_type`.
    pub fn get_attribute_type(&self, group_plural: Option<&str>, resource_plural: Option<&str>, path: &str) -> Result<ResolvedAttr, RegistryError> {
        let root_attrs = self.resolve_root_attributes(group_plural, resource_plural)?;
        path::get_attribute_type(root_attrs, path)
    }

    /// Attribute set a property path under `group_plural`/`resource_plural`
    /// resolves against. `(None, None)` is the registry's own attributes.
    pub fn attributes_for(&self, group_plural: Option<&str>, resource_plural: Option<&str>) -> Result<&HashMap<String, Attribute>, RegistryError> {
        self.resolve_root_attributes(group_plural, resource_plural)
    }

    fn resolve_root_attributes(&self, group_plural: Option<&str>, resource_plural: Option<&str>) -> Result<&HashMap<String, Attribute>, RegistryError> {
        match (group_plural, resource_plural) {
            (None, None) => Ok(&self.attributes),
            (Some(gp), None) => self
                .groups
                .get(gp)
                .map(|g| &g.attributes)
                .ok_or_else(|| RegistryError::not_found(format!("unknown group model '{gp}'"))),
            (Some(gp), Some(rp)) => self
                .groups
                .get(gp)
                .and_then(|g| g.resources.get(rp))
                .map(|r| &r.attributes)
                .ok_or_else(|| RegistryError::not_found(format!("unknown resource model '{gp}/{rp}'"))),
            (None, Some(rp)) => Err(RegistryError::bad_request(format!(
                "resource plural '{rp}' given without a group plural"
            ))),
        }
    }
}

fn add_attribute_to(attrs: &mut HashMap<String, Attribute>, attr: Attribute) -> Result<(), RegistryError> {
    verify_keyed_attribute(&attr.name, &attr)?;
    attrs.insert(attr.name.clone(), attr);
    Ok(())
}

fn verify_keyed_attribute(key: &str, attr: &Attribute) -> Result<(), RegistryError> {
    if key != attr.name {
        return Err(RegistryError::model_invalid(format!(
            "attribute key '{key}' does not match attribute name '{}'",
            attr.name
        )));
    }
    attr.verify()
}

fn singular_collides<'a>(existing: impl Iterator<Item = &'a str>, candidate: &str) -> bool {
    existing.into_iter().any(|s| s == candidate)
}

/// §9 ifValue conflict detection: for every attribute in `scope` that
/// declares `ifValue`, probe each triggering value against the rest of the
/// scope via [`expand_if_value`] so a sibling-name collision with an
/// attribute already declared at this level is caught at verify time
/// instead of silently losing data on a later write.
pub(crate) fn verify_if_value_collisions(scope: &HashMap<String, Attribute>) -> Result<(), RegistryError> {
    for attr in scope.values() {
        for val in attr.if_value.keys() {
            let mut probe = scope.clone();
            probe.remove(&attr.name);
            expand_if_value(attr, &serde_json::Value::String(val.clone()), &mut probe)?;
        }
    }
    Ok(())
}

/// Expand `ifValue` sibling attributes that are triggered by `value` on
/// `attr` into `target`, erroring on a name collision with an attribute
/// that is already present — mirrors `AddIfValueAttributes` in the Go
/// original, which panics on the same condition; here it's a recoverable
/// `ModelInvalid`.
pub fn expand_if_value(attr: &Attribute, value: &serde_json::Value, target: &mut HashMap<String, Attribute>) -> Result<(), RegistryError> {
    let key = scalar_json_to_key(value);
    let Some(iv) = attr.if_value.get(&key) else { return Ok(()) };
    for (name, sibling) in &iv.sibling_attributes {
        if target.contains_key(name) {
            return Err(RegistryError::model_invalid(format!(
                "ifValue expansion for attribute '{}' collides with existing sibling '{}'",
                attr.name, name
            )));
        }
        target.insert(name.clone(), sibling.clone());
    }
    Ok(())
}

fn scalar_json_to_key(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
