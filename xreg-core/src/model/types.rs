use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::RegistryError;

/// The xRegistry attribute type lattice: scalars, the three container kinds,
/// and the `ANY` escape hatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrType {
    Boolean,
    Decimal,
    Integer,
    UInteger,
    String,
    Timestamp,
    Uri,
    UriReference,
    UriTemplate,
    Url,
    Map,
    Array,
    Object,
    Any,
}

impl AttrType {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Map | Self::Array | Self::Object | Self::Any)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Self::Map | Self::Array | Self::Object)
    }
}

/// Schema for the elements of a MAP/ARRAY, or the fixed body of an OBJECT.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "type")]
    pub item_type: AttrType,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Attribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Box<Item>>,
}

impl Default for AttrType {
    fn default() -> Self {
        Self::Any
    }
}

/// A conditional bundle of sibling attributes injected when the parent
/// attribute equals the triggering value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IfValue {
    #[serde(default)]
    pub sibling_attributes: HashMap<String, Attribute>,
}

/// A single named, typed slot in an object schema.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: AttrType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub clientrequired: bool,
    #[serde(default)]
    pub serverrequired: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
    #[serde(default, rename = "ifValue", skip_serializing_if = "HashMap::is_empty")]
    pub if_value: HashMap<String, IfValue>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, attr_type: AttrType) -> Self {
        Self { name: name.into(), attr_type, ..Default::default() }
    }

    /// §4.1 per-attribute validation: name shape, required-flag consistency,
    /// enum typing, item presence for containers.
    pub fn verify(&self) -> Result<(), RegistryError> {
        if !is_valid_attribute_name(&self.name) && self.name != "*" {
            return Err(RegistryError::model_invalid(format!(
                "invalid attribute name '{}'",
                self.name
            )));
        }
        if self.clientrequired && !self.serverrequired {
            return Err(RegistryError::model_invalid(format!(
                "attribute '{}' is clientrequired but not serverrequired",
                self.name
            )));
        }
        if let Some(values) = &self.enum_values {
            if !self.attr_type.is_scalar() {
                return Err(RegistryError::model_invalid(format!(
                    "attribute '{}' declares enum on a non-scalar type",
                    self.name
                )));
            }
            for v in values {
                if !json_matches_type(v, self.attr_type) {
                    return Err(RegistryError::model_invalid(format!(
                        "attribute '{}' enum value {} does not match type {:?}",
                        self.name, v, self.attr_type
                    )));
                }
            }
        }
        match (self.attr_type.is_container(), &self.item) {
            (true, None) => Err(RegistryError::model_invalid(format!(
                "attribute '{}' is type {:?} but declares no item",
                self.name, self.attr_type
            ))),
            (false, Some(_)) => Err(RegistryError::model_invalid(format!(
                "attribute '{}' is scalar type {:?} but declares an item",
                self.name, self.attr_type
            ))),
            _ => Ok(()),
        }?;
        if let Some(item) = &self.item {
            verify_item(item)?;
        }
        for (val, iv) in &self.if_value {
            for (name, attr) in &iv.sibling_attributes {
                if name != &attr.name {
                    return Err(RegistryError::model_invalid(format!(
                        "ifValue['{}'] sibling key '{}' does not match attribute name '{}'",
                        val, name, attr.name
                    )));
                }
                attr.verify()?;
            }
        }
        Ok(())
    }
}

fn verify_item(item: &Item) -> Result<(), RegistryError> {
    if item.item_type.is_container() && item.item.is_none() && item.attributes.is_empty() {
        return Err(RegistryError::model_invalid(format!(
            "item of type {:?} declares neither nested item nor attributes",
            item.item_type
        )));
    }
    for (name, attr) in &item.attributes {
        if name != &attr.name {
            return Err(RegistryError::model_invalid(format!(
                "item attribute key '{}' does not match attribute name '{}'",
                name, attr.name
            )));
        }
        attr.verify()?;
    }
    super::verify_if_value_collisions(&item.attributes)?;
    if let Some(nested) = &item.item {
        verify_item(nested)?;
    }
    Ok(())
}

fn json_matches_type(v: &serde_json::Value, t: AttrType) -> bool {
    use serde_json::Value;
    match t {
        AttrType::Boolean => v.is_boolean(),
        AttrType::Decimal => v.is_number(),
        AttrType::Integer => v.is_i64() || v.is_u64(),
        AttrType::UInteger => v.is_u64() || matches!(v, Value::Number(n) if n.as_i64().map(|i| i >= 0).unwrap_or(false)),
        AttrType::String
        | AttrType::Timestamp
        | AttrType::Uri
        | AttrType::UriReference
        | AttrType::UriTemplate
        | AttrType::Url => v.is_string(),
        AttrType::Map | AttrType::Array | AttrType::Object | AttrType::Any => true,
    }
}

/// `^[a-z_][a-z0-9_./]{0,62}$` per §3.
pub fn is_valid_attribute_name(name: &str) -> bool {
    static RE_SRC: &str = r"^[a-z_][a-z0-9_./]{0,62}$";
    regex_matches(RE_SRC, name)
}

/// `^[a-z0-9][a-z0-9_.\-]{0,62}$` per §3.
pub fn is_valid_map_key(key: &str) -> bool {
    static RE_SRC: &str = r"^[a-z0-9][a-z0-9_.\-]{0,62}$";
    regex_matches(RE_SRC, key)
}

fn regex_matches(src: &str, s: &str) -> bool {
    regex::Regex::new(src)
        .expect("static regex is valid")
        .is_match(s)
}
