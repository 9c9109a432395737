//! Query / projection engine (§4.5): compiles the xRegistry URL grammar and
//! its query parameters (`inline`, `filter`, `meta`, `specversion`) into a
//! traversal plan over the tree the storage layer's `full_tree` view
//! materializes. Pure, storage-agnostic logic so it can be unit tested
//! without a database.

use xreg_core::RegistryError;

/// A parsed URL path per the grammar in §6:
/// `/[reg-<regUID>]/[<groupPlural>/<groupUID>[/<resPlural>/<resUID>[/versions/<verUID>]]]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePath {
    pub registry_uid: Option<String>,
    /// `/<groupPlural>` — the collection of every Group of that plural.
    pub group_plural_only: Option<String>,
    pub group: Option<(String, String)>,
    /// `/<groupPlural>/<groupUID>/<resPlural>` — the collection of every
    /// Resource of that plural under `group`.
    pub resource_plural_only: Option<String>,
    pub resource: Option<(String, String)>,
    /// `true` when the path ends in the literal `versions` collection
    /// (`.../versions` or `.../versions/<verUID>`).
    pub versions_collection: bool,
    pub version_uid: Option<String>,
}

pub fn parse_resource_path(path: &str) -> Result<ResourcePath, RegistryError> {
    let trimmed = path.trim_matches('/');
    let mut segs: Vec<&str> = if trimmed.is_empty() { Vec::new() } else { trimmed.split('/').collect() };
    let mut out = ResourcePath::default();

    if let Some(first) = segs.first() {
        if let Some(uid) = first.strip_prefix("reg-") {
            out.registry_uid = Some(uid.to_string());
            segs.remove(0);
        }
    }
    if segs.is_empty() {
        return Ok(out);
    }
    if segs.len() == 1 {
        out.group_plural_only = Some(segs[0].to_string());
        return Ok(out);
    }
    out.group = Some((segs[0].to_string(), segs[1].to_string()));
    if segs.len() == 2 {
        return Ok(out);
    }
    if segs.len() == 3 {
        out.resource_plural_only = Some(segs[2].to_string());
        return Ok(out);
    }
    out.resource = Some((segs[2].to_string(), segs[3].to_string()));
    if segs.len() == 4 {
        return Ok(out);
    }
    if segs[4] != "versions" {
        return Err(RegistryError::bad_request(format!("expected 'versions' segment in path '{path}'")));
    }
    out.versions_collection = true;
    if segs.len() == 5 {
        return Ok(out);
    }
    if segs.len() != 6 {
        return Err(RegistryError::bad_request(format!("trailing segments after version uid in path '{path}'")));
    }
    out.version_uid = Some(segs[5].to_string());
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineSpec {
    /// `inline` with no value, or `inline=*`: expand everything.
    All,
    /// `inline=a,b.c`: expand exactly these collections/paths.
    Paths(Vec<String>),
}

/// One `path[=value]` clause of a `filter=` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterClause {
    pub path: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pub inline: Option<InlineSpec>,
    /// Each inner `Vec` is one `filter=` parameter (AND of its clauses);
    /// the outer `Vec` holds every `filter=` parameter (OR across them).
    pub filter: Vec<Vec<FilterClause>>,
    pub meta: bool,
    pub specversion: Option<String>,
}

/// Parses a raw query string (already split from the path, no leading `?`)
/// into [`QueryParams`]. Unknown parameters are ignored, matching the
/// original's permissive query handling.
pub fn parse_query_params(query: &str) -> QueryParams {
    let mut out = QueryParams::default();
    for pair in query.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (pair, None),
        };
        match key {
            "meta" => out.meta = true,
            "specversion" => out.specversion = value.map(|v| v.to_string()),
            "inline" => {
                out.inline = Some(match value {
                    None | Some("") | Some("*") => InlineSpec::All,
                    Some(v) => InlineSpec::Paths(v.split(',').map(|s| s.to_string()).collect()),
                });
            }
            "filter" => {
                if let Some(v) = value {
                    let clauses = v
                        .split(',')
                        .map(|clause| match clause.split_once('=') {
                            Some((p, val)) => FilterClause { path: p.to_string(), value: Some(val.to_string()) },
                            None => FilterClause { path: clause.to_string(), value: None },
                        })
                        .collect();
                    out.filter.push(clauses);
                }
            }
            _ => {}
        }
    }
    out
}

/// §4.5 filter semantics: an entity is kept iff it satisfies every clause of
/// at least one `filter=` expression. `*` as a value suffix requests a
/// prefix match.
pub fn matches_filters(props: &std::collections::BTreeMap<String, xreg_core::PropValue>, filters: &[Vec<FilterClause>]) -> bool {
    if filters.is_empty() {
        return true;
    }
    filters.iter().any(|clauses| clauses.iter().all(|c| matches_clause(props, c)))
}

fn prop_as_string(v: &xreg_core::PropValue) -> String {
    match v {
        xreg_core::PropValue::Str(s) => s.clone(),
        other => other.as_json().to_string(),
    }
}

fn matches_clause(props: &std::collections::BTreeMap<String, xreg_core::PropValue>, clause: &FilterClause) -> bool {
    let Some(found) = props.get(&clause.path) else { return false };
    match &clause.value {
        None => true,
        Some(expected) => {
            let actual = prop_as_string(found);
            if let Some(prefix) = expected.strip_suffix('*') {
                actual.starts_with(prefix)
            } else {
                actual == *expected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_default_registry() {
        assert_eq!(parse_resource_path("/").unwrap(), ResourcePath::default());
    }

    #[test]
    fn parses_named_registry_and_resource() {
        let p = parse_resource_path("/reg-T/dirs/d1/files/f1").unwrap();
        assert_eq!(p.registry_uid.as_deref(), Some("T"));
        assert_eq!(p.group, Some(("dirs".to_string(), "d1".to_string())));
        assert_eq!(p.resource, Some(("files".to_string(), "f1".to_string())));
    }

    #[test]
    fn parses_version_path() {
        let p = parse_resource_path("/dirs/d1/files/f1/versions/2").unwrap();
        assert!(p.versions_collection);
        assert_eq!(p.version_uid.as_deref(), Some("2"));
    }

    #[test]
    fn parses_group_collection_path() {
        let p = parse_resource_path("/dirs").unwrap();
        assert_eq!(p.group_plural_only.as_deref(), Some("dirs"));
        assert!(p.group.is_none());
    }

    #[test]
    fn parses_resource_collection_path() {
        let p = parse_resource_path("/dirs/d1/files").unwrap();
        assert_eq!(p.group, Some(("dirs".to_string(), "d1".to_string())));
        assert_eq!(p.resource_plural_only.as_deref(), Some("files"));
        assert!(p.resource.is_none());
    }

    #[test]
    fn parses_inline_all_and_specific_paths() {
        assert_eq!(parse_query_params("inline").inline, Some(InlineSpec::All));
        assert_eq!(parse_query_params("inline=*").inline, Some(InlineSpec::All));
        assert_eq!(
            parse_query_params("inline=a,b.c").inline,
            Some(InlineSpec::Paths(vec!["a".to_string(), "b.c".to_string()]))
        );
    }

    #[test]
    fn parses_meta_and_specversion() {
        let q = parse_query_params("meta&specversion=1.0-rc1");
        assert!(q.meta);
        assert_eq!(q.specversion.as_deref(), Some("1.0-rc1"));
    }

    #[test]
    fn parses_conjunctive_and_disjunctive_filters() {
        let q = parse_query_params("filter=labels.stage=prod,owner=alice&filter=tier=gold");
        assert_eq!(q.filter.len(), 2);
        assert_eq!(q.filter[0].len(), 2);
        assert_eq!(q.filter[1][0].path, "tier");
    }

    #[test]
    fn filter_matches_equality_and_prefix() {
        use std::collections::BTreeMap;
        use xreg_core::PropValue;
        let mut props = BTreeMap::new();
        props.insert("labels.stage".to_string(), PropValue::Str("production".to_string()));

        let eq = vec![vec![FilterClause { path: "labels.stage".into(), value: Some("production".into()) }]];
        assert!(matches_filters(&props, &eq));

        let prefix = vec![vec![FilterClause { path: "labels.stage".into(), value: Some("prod*".into()) }]];
        assert!(matches_filters(&props, &prefix));

        let miss = vec![vec![FilterClause { path: "labels.stage".into(), value: Some("staging".into()) }]];
        assert!(!matches_filters(&props, &miss));
    }

    #[test]
    fn no_filters_means_everything_matches() {
        let props = std::collections::BTreeMap::new();
        assert!(matches_filters(&props, &[]));
    }
}
