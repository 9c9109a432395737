//! Property-path grammar and attribute-type resolution.
//!
//! ```text
//! PATH  := SEG ('.' SEG | '[' INDEX ']' | '[' QKEY ']')*
//! SEG   := attribute-name | map-key
//! INDEX := non-negative integer
//! QKEY  := "'" any-chars "'"
//! ```

use std::collections::HashMap;

use super::types::{is_valid_map_key, AttrType, Attribute, Item};
use crate::error::RegistryError;

#[derive(Clone, Debug, PartialEq)]
pub enum PathSegment {
    Name(String),
    Index(u64),
    Key(String),
}

/// Parses a property path into its segments. The single point that enforces
/// the grammar above; name/key validity against the model regexes happens
/// while walking, not here.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, RegistryError> {
    if path.is_empty() {
        return Err(RegistryError::bad_request("empty property path"));
    }
    let mut segments = Vec::new();
    let (first, mut rest) = split_plain_segment(path)?;
    segments.push(PathSegment::Name(first));
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('.') {
            let (seg, next) = split_plain_segment(stripped)?;
            segments.push(PathSegment::Name(seg));
            rest = next;
        } else if let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped
                .find(']')
                .ok_or_else(|| RegistryError::bad_request(format!("unterminated '[' in path '{path}'")))?;
            let inner = &stripped[..close];
            if let Some(quoted) = inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
                segments.push(PathSegment::Key(quoted.to_string()));
            } else {
                let idx: u64 = inner
                    .parse()
                    .map_err(|_| RegistryError::bad_request(format!("invalid array index '{inner}' in path '{path}'")))?;
                segments.push(PathSegment::Index(idx));
            }
            rest = &stripped[close + 1..];
        } else {
            return Err(RegistryError::bad_request(format!("unexpected character in path '{path}' at '{rest}'")));
        }
    }
    Ok(segments)
}

fn split_plain_segment(s: &str) -> Result<(String, &str), RegistryError> {
    let end = s.find(['.', '[']).unwrap_or(s.len());
    if end == 0 {
        return Err(RegistryError::bad_request("empty path segment"));
    }
    Ok((s[..end].to_string(), &s[end..]))
}

/// The type an attribute resolution ends on, carrying its `enum` set along
/// so callers can check membership without re-walking the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedAttr {
    pub attr_type: AttrType,
    pub enum_values: Option<Vec<serde_json::Value>>,
}

impl ResolvedAttr {
    fn scalar(attr_type: AttrType) -> Self {
        Self { attr_type, enum_values: None }
    }

    fn any() -> Self {
        Self::scalar(AttrType::Any)
    }
}

enum Cursor<'a> {
    Object(&'a HashMap<String, Attribute>, bool),
    Map(&'a Item),
    Array(&'a Item),
    Resolved(ResolvedAttr),
}

/// Walks `root_attrs` following `path`, resolving the final attribute's type
/// and enum set. A leading `#` on the first segment denotes an
/// internal/private property and short-circuits to `ANY` without further
/// model checking. The root scope is always strict: an unmodeled top-level
/// attribute is `BadRequest` unless a `*` wildcard attribute is declared;
/// deeper scopes inherit strictness from the `Attribute.strict` flag of the
/// OBJECT attribute they nest under.
pub fn get_attribute_type(root_attrs: &HashMap<String, Attribute>, path: &str) -> Result<ResolvedAttr, RegistryError> {
    let segments = parse_path(path)?;
    if let Some(PathSegment::Name(n)) = segments.first() {
        if n.starts_with('#') {
            return Ok(ResolvedAttr::any());
        }
    }
    let mut cursor = Cursor::Object(root_attrs, true);
    let last = segments.len() - 1;
    for (i, seg) in segments.iter().enumerate() {
        cursor = step(cursor, seg, i == last)?;
        if let Cursor::Resolved(r) = cursor {
            return Ok(r);
        }
    }
    // Reached only if `step` returned a non-Resolved cursor on the last
    // segment, which `descend_*` never does.
    Err(RegistryError::internal("path resolution did not terminate"))
}

fn step<'a>(cursor: Cursor<'a>, seg: &PathSegment, is_last: bool) -> Result<Cursor<'a>, RegistryError> {
    match cursor {
        Cursor::Object(attrs, strict) => {
            let name = match seg {
                PathSegment::Name(n) => n,
                _ => return Err(RegistryError::bad_request("expected an attribute name, found an index/key")),
            };
            match attrs.get(name).or_else(|| attrs.get("*")) {
                Some(attr) => descend_attr(attr, is_last),
                None if strict => Err(RegistryError::bad_request(format!(
                    "unknown attribute '{name}' in strict mode"
                ))),
                None => Ok(Cursor::Resolved(ResolvedAttr::any())),
            }
        }
        Cursor::Map(item) => {
            let key = match seg {
                PathSegment::Key(k) | PathSegment::Name(k) => k,
                PathSegment::Index(_) => return Err(RegistryError::bad_request("expected a map key, found an index")),
            };
            if !is_valid_map_key(key) {
                return Err(RegistryError::bad_request(format!("invalid map key '{key}'")));
            }
            descend_item(item, is_last)
        }
        Cursor::Array(item) => {
            match seg {
                PathSegment::Index(_) => {}
                _ => return Err(RegistryError::bad_request("expected a non-negative array index")),
            }
            descend_item(item, is_last)
        }
        Cursor::Resolved(_) => unreachable!("get_attribute_type stops on Resolved"),
    }
}

fn descend_attr(attr: &Attribute, is_last: bool) -> Result<Cursor<'_>, RegistryError> {
    if attr.attr_type == AttrType::Any {
        return Ok(Cursor::Resolved(ResolvedAttr::any()));
    }
    if is_last {
        return Ok(Cursor::Resolved(ResolvedAttr { attr_type: attr.attr_type, enum_values: attr.enum_values.clone() }));
    }
    let item = attr
        .item
        .as_ref()
        .ok_or_else(|| RegistryError::internal(format!("attribute '{}' missing item for container type", attr.name)))?;
    match attr.attr_type {
        AttrType::Object => Ok(Cursor::Object(&item.attributes, attr.strict)),
        AttrType::Map => Ok(Cursor::Map(item)),
        AttrType::Array => Ok(Cursor::Array(item)),
        _ => Err(RegistryError::bad_request(format!("path continues past scalar attribute '{}'", attr.name))),
    }
}

fn descend_item(item: &Item, is_last: bool) -> Result<Cursor<'_>, RegistryError> {
    if item.item_type == AttrType::Any {
        return Ok(Cursor::Resolved(ResolvedAttr::any()));
    }
    if is_last {
        return Ok(Cursor::Resolved(ResolvedAttr::scalar(item.item_type)));
    }
    match item.item_type {
        AttrType::Object => Ok(Cursor::Object(&item.attributes, false)),
        AttrType::Map => {
            let nested = item
                .item
                .as_deref()
                .ok_or_else(|| RegistryError::internal("map item missing nested item schema"))?;
            Ok(Cursor::Map(nested))
        }
        AttrType::Array => {
            let nested = item
                .item
                .as_deref()
                .ok_or_else(|| RegistryError::internal("array item missing nested item schema"))?;
            Ok(Cursor::Array(nested))
        }
        _ => Err(RegistryError::bad_request("path continues past scalar element")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn string_attr(name: &str) -> Attribute {
        Attribute::new(name, AttrType::String)
    }

    #[rstest]
    #[case("name", vec![PathSegment::Name("name".into())])]
    #[case("labels.stage", vec![PathSegment::Name("labels".into()), PathSegment::Name("stage".into())])]
    #[case("arr[0]", vec![PathSegment::Name("arr".into()), PathSegment::Index(0)])]
    #[case("arr[0].c['k']", vec![
        PathSegment::Name("arr".into()), PathSegment::Index(0),
        PathSegment::Name("c".into()), PathSegment::Key("k".into()),
    ])]
    fn parses_paths(#[case] path: &str, #[case] expected: Vec<PathSegment>) {
        assert_eq!(parse_path(path).unwrap(), expected);
    }

    #[test]
    fn resolves_scalar_attribute() {
        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), string_attr("name"));
        assert_eq!(get_attribute_type(&attrs, "name").unwrap().attr_type, AttrType::String);
    }

    #[test]
    fn resolves_wildcard_fallback() {
        let mut attrs = HashMap::new();
        attrs.insert("*".to_string(), string_attr("*"));
        assert_eq!(get_attribute_type(&attrs, "whatever").unwrap().attr_type, AttrType::String);
    }

    #[test]
    fn resolves_map_of_strings() {
        let mut attrs = HashMap::new();
        let mut labels = Attribute::new("labels", AttrType::Map);
        labels.item = Some(Item { item_type: AttrType::String, attributes: HashMap::new(), item: None });
        attrs.insert("labels".to_string(), labels);
        assert_eq!(get_attribute_type(&attrs, "labels.stage").unwrap().attr_type, AttrType::String);
    }

    #[test]
    fn resolves_array_of_objects() {
        let mut attrs = HashMap::new();
        let mut nested = HashMap::new();
        nested.insert("k".to_string(), Attribute::new("k", AttrType::Integer));
        let mut arr = Attribute::new("arr", AttrType::Array);
        arr.item = Some(Item { item_type: AttrType::Object, attributes: nested, item: None });
        attrs.insert("arr".to_string(), arr);
        assert_eq!(get_attribute_type(&attrs, "arr[3].k").unwrap().attr_type, AttrType::Integer);
    }

    #[test]
    fn private_property_shortcircuits_to_any() {
        let attrs = HashMap::new();
        assert_eq!(get_attribute_type(&attrs, "#resource").unwrap().attr_type, AttrType::Any);
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let attrs = HashMap::new();
        let err = get_attribute_type(&attrs, "nope").unwrap_err();
        assert_eq!(err.kind(), "bad_request");
    }

    #[test]
    fn any_attribute_shortcircuits_rest_of_path() {
        let mut attrs = HashMap::new();
        attrs.insert("ext".to_string(), Attribute::new("ext", AttrType::Any));
        assert_eq!(get_attribute_type(&attrs, "ext.anything.goes[3]").unwrap().attr_type, AttrType::Any);
    }

    #[test]
    fn resolves_enum_values_on_a_scalar_attribute() {
        let mut attrs = HashMap::new();
        let mut visibility = string_attr("visibility");
        visibility.enum_values = Some(vec![serde_json::json!("public"), serde_json::json!("private")]);
        attrs.insert("visibility".to_string(), visibility);
        let resolved = get_attribute_type(&attrs, "visibility").unwrap();
        assert_eq!(resolved.attr_type, AttrType::String);
        assert_eq!(resolved.enum_values.unwrap().len(), 2);
    }

    #[test]
    fn non_strict_object_attribute_permits_unmodeled_nested_names() {
        let mut nested = HashMap::new();
        nested.insert("known".to_string(), Attribute::new("known", AttrType::String));
        let mut ext = Attribute::new("ext", AttrType::Object);
        ext.strict = false;
        ext.item = Some(Item { item_type: AttrType::Object, attributes: nested, item: None });
        let mut attrs = HashMap::new();
        attrs.insert("ext".to_string(), ext);
        assert_eq!(get_attribute_type(&attrs, "ext.whatever").unwrap().attr_type, AttrType::Any);
    }

    #[test]
    fn strict_object_attribute_rejects_unmodeled_nested_names() {
        let mut nested = HashMap::new();
        nested.insert("known".to_string(), Attribute::new("known", AttrType::String));
        let mut strict = Attribute::new("strict", AttrType::Object);
        strict.strict = true;
        strict.item = Some(Item { item_type: AttrType::Object, attributes: nested, item: None });
        let mut attrs = HashMap::new();
        attrs.insert("strict".to_string(), strict);
        let err = get_attribute_type(&attrs, "strict.whatever").unwrap_err();
        assert_eq!(err.kind(), "bad_request");
    }
}
