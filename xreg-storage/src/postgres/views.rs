//! Read access to the logical views declared in the init migration.
//! `full_tree` is the single scan-target §4.4 describes for any subtree
//! read; everything the query/projection engine needs comes from one
//! query against it, filtered by `path` prefix.

use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::QueryableByName;
use diesel_async::RunQueryDsl;

use xreg_core::RegistryError;

use super::storage_error_from_diesel;
use super::PostgresGateway;

/// One row of the `full_tree` view: an entity joined with (at most) one of
/// its properties. A full subtree read groups many rows by `e_id`.
#[derive(QueryableByName, Debug, Clone)]
pub struct FullTreeRow {
    #[diesel(sql_type = Text)]
    pub reg_id: String,
    #[diesel(sql_type = BigInt)]
    pub level: i64,
    #[diesel(sql_type = Nullable<Text>)]
    pub plural: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub parent_id: Option<String>,
    #[diesel(sql_type = Text)]
    pub e_id: String,
    #[diesel(sql_type = Text)]
    pub uid: String,
    #[diesel(sql_type = Text)]
    pub abstract_path: String,
    #[diesel(sql_type = Text)]
    pub path: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub prop_name: Option<String>,
    #[diesel(sql_type = Nullable<diesel::sql_types::Jsonb>)]
    pub prop_value: Option<serde_json::Value>,
    #[diesel(sql_type = Nullable<Text>)]
    pub prop_type: Option<String>,
}

impl PostgresGateway {
    /// Every row of `full_tree` whose `path` is `prefix` or a descendant of
    /// it (`prefix/...`), ordered as the view itself orders them
    /// (`path, prop_name`) so callers can group contiguous rows into
    /// entities without re-sorting.
    pub async fn full_tree_subtree(&self, prefix: &str) -> Result<Vec<FullTreeRow>, RegistryError> {
        let mut conn = self.conn().await?;
        let pattern = format!("{prefix}%");
        diesel::sql_query(
            "SELECT reg_id, level, plural, parent_id, e_id, uid, abstract_path, path, prop_name, prop_value, prop_type \
             FROM full_tree WHERE path = $1 OR path LIKE $2 ORDER BY path, prop_name",
        )
        .bind::<Text, _>(prefix)
        .bind::<Text, _>(format!("{pattern}/%"))
        .load(&mut conn)
        .await
        .map_err(storage_error_from_diesel)
    }

    /// Direct children of `prefix` only (one level), used for non-inlined
    /// collection rendering (`{url, count}` per §4.5).
    pub async fn entities_direct_children(&self, prefix: &str) -> Result<Vec<FullTreeRow>, RegistryError> {
        let mut conn = self.conn().await?;
        diesel::sql_query(
            "SELECT reg_id, level, plural, parent_id, e_id, uid, abstract_path, path, prop_name, prop_value, prop_type \
             FROM full_tree WHERE parent_id = (SELECT e_id FROM entities WHERE path = $1) ORDER BY path, prop_name",
        )
        .bind::<Text, _>(prefix)
        .load(&mut conn)
        .await
        .map_err(storage_error_from_diesel)
    }
}
