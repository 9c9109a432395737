//! Row types for every base table, plus the small amount of glue that lets
//! a [`VersionRow`] participate in `xreg_core::entity::version`'s
//! cap-eviction/latest-selection logic. Grounded in the teacher's ORM
//! struct style (`#[derive(Queryable, Identifiable, Insertable)]` paired
//! with a `#[diesel(table_name = ...)]` attribute).

use chrono::NaiveDateTime;
use diesel::prelude::*;
use xreg_core::entity::version::VersionRecord;
use xreg_core::{EntityKind, PropValue};

use super::schema::*;

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = registries)]
pub struct RegistryRow {
    pub id: String,
    pub uid: String,
    pub epoch: i64,
    pub model_json: serde_json::Value,
    pub created_at: NaiveDateTime,
    pub modified_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = registries)]
pub struct NewRegistryRow<'a> {
    pub id: &'a str,
    pub uid: &'a str,
    pub model_json: serde_json::Value,
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = groups)]
pub struct GroupRow {
    pub id: String,
    pub registry_id: String,
    pub model_plural: String,
    pub uid: String,
    pub path: String,
    pub abstract_path: String,
    pub epoch: i64,
    pub created_at: NaiveDateTime,
    pub modified_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = groups)]
pub struct NewGroupRow<'a> {
    pub id: &'a str,
    pub registry_id: &'a str,
    pub model_plural: &'a str,
    pub uid: &'a str,
    pub path: &'a str,
    pub abstract_path: &'a str,
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = resources)]
pub struct ResourceRow {
    pub id: String,
    pub group_id: String,
    pub model_plural: String,
    pub uid: String,
    pub path: String,
    pub abstract_path: String,
    pub latest_id: Option<String>,
    pub epoch: i64,
    pub created_at: NaiveDateTime,
    pub modified_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = resources)]
pub struct NewResourceRow<'a> {
    pub id: &'a str,
    pub group_id: &'a str,
    pub model_plural: &'a str,
    pub uid: &'a str,
    pub path: &'a str,
    pub abstract_path: &'a str,
    pub latest_id: Option<&'a str>,
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = versions)]
pub struct VersionRow {
    pub id: String,
    pub resource_id: String,
    pub uid: String,
    pub path: String,
    pub abstract_path: String,
    pub seq: i64,
    pub resource_url: Option<String>,
    pub resource_proxy_url: Option<String>,
    pub resource_content_id: Option<String>,
    pub content_type: Option<String>,
    pub epoch: i64,
    pub created_at: NaiveDateTime,
    pub modified_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = versions)]
pub struct NewVersionRow<'a> {
    pub id: &'a str,
    pub resource_id: &'a str,
    pub uid: &'a str,
    pub path: &'a str,
    pub abstract_path: &'a str,
    pub seq: i64,
}

impl VersionRecord for VersionRow {
    fn id(&self) -> &str {
        &self.id
    }

    fn seq(&self) -> i64 {
        self.seq
    }
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = resource_contents)]
pub struct ResourceContentRow {
    pub id: String,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = resource_contents)]
pub struct NewResourceContentRow<'a> {
    pub id: &'a str,
    pub content: &'a [u8],
    pub content_type: Option<&'a str>,
}

#[derive(Queryable, Identifiable, Debug, Clone)]
#[diesel(table_name = props, primary_key(entity_id, prop_name))]
pub struct PropRow {
    pub entity_id: String,
    pub prop_name: String,
    pub prop_value: serde_json::Value,
    pub prop_type: String,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = props)]
pub struct NewPropRow<'a> {
    pub entity_id: &'a str,
    pub prop_name: &'a str,
    pub prop_value: serde_json::Value,
    pub prop_type: &'a str,
}

impl PropRow {
    pub fn to_prop_value(&self) -> Option<PropValue> {
        serde_json::from_value(self.prop_value.clone()).ok()
    }
}

/// Names a table row belongs to, used by the visitor that replaces the
/// original's reflection-based `SetProp` (§9 design note).
pub fn table_for_kind(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Registry => "registries",
        EntityKind::Group => "groups",
        EntityKind::Resource => "resources",
        EntityKind::Version => "versions",
    }
}
