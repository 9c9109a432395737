//! PostgreSQL-backed implementation of the persistence layer (§4.4): a
//! connection-pooled gateway over the normalized `props` table and the
//! logical views (`entities`, `full_tree`, ...) declared in
//! `migrations/2024-01-01-000000_init/up.sql`.
//!
//! Grounded in the teacher's `PostgresGateway` (process-wide
//! `diesel-async` + `deadpool` pool, `embed_migrations!`, a
//! `storage_error_from_diesel` mapping helper) generalized from a
//! blockchain-indexing domain to a generic property-tree domain.

pub mod orm;
pub mod schema;
pub mod views;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::{debug, info};

use xreg_core::entity::version::{evict_candidate, select_latest};
use xreg_core::{Entity, EntityKind, PropValue, RegistryError};

use orm::{
    GroupRow, NewGroupRow, NewPropRow, NewRegistryRow, NewResourceRow, NewVersionRow, PropRow, RegistryRow,
    ResourceRow, VersionRow,
};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

#[derive(Clone, Debug)]
pub struct PostgresConfig {
    pub database_url: String,
    pub pool_size: usize,
}

pub type DbPool = Pool<AsyncPgConnection>;
type Conn<'a> = Object<AsyncPgConnection>;

/// The single process-wide gateway; cheap to clone (it only wraps a pool
/// handle).
#[derive(Clone)]
pub struct PostgresGateway {
    pool: DbPool,
}

impl PostgresGateway {
    pub async fn new(config: &PostgresConfig) -> Result<Self, RegistryError> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| RegistryError::internal(format!("failed to build connection pool: {e}")))?;
        info!(pool_size = config.pool_size, "connected to postgres");
        Ok(Self { pool })
    }

    /// Runs embedded migrations using a dedicated blocking connection, since
    /// `diesel_migrations::MigrationHarness` requires a synchronous
    /// `diesel::Connection`, not `AsyncPgConnection`.
    pub async fn run_migrations(database_url: &str) -> Result<(), RegistryError> {
        let url = database_url.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = diesel::pg::PgConnection::establish(&url)
                .map_err(|e| RegistryError::internal(format!("failed to connect for migrations: {e}")))?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| RegistryError::internal(format!("migration failed: {e}")))?;
            Ok::<(), RegistryError>(())
        })
        .await
        .map_err(|e| RegistryError::internal(format!("migration task panicked: {e}")))??;
        Ok(())
    }

    async fn conn(&self) -> Result<Conn<'_>, RegistryError> {
        self.pool
            .get()
            .await
            .map_err(|e| RegistryError::internal(format!("failed to acquire db connection: {e}")))
    }

    // ---- Registry ----------------------------------------------------

    pub async fn create_registry(&self, id: &str, uid: &str, model_json: serde_json::Value) -> Result<RegistryRow, RegistryError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(schema::registries::table)
            .values(NewRegistryRow { id, uid, model_json })
            .get_result(&mut conn)
            .await
            .map_err(storage_error_from_diesel)
    }

    pub async fn get_registry_by_uid(&self, uid: &str) -> Result<RegistryRow, RegistryError> {
        use schema::registries::dsl;
        let mut conn = self.conn().await?;
        dsl::registries
            .filter(dsl::uid.eq(uid))
            .first(&mut conn)
            .await
            .map_err(storage_error_from_diesel)
    }

    pub async fn save_model(&self, registry_id: &str, model_json: serde_json::Value) -> Result<(), RegistryError> {
        use schema::registries::dsl;
        let mut conn = self.conn().await?;
        diesel::update(dsl::registries.filter(dsl::id.eq(registry_id)))
            .set((dsl::model_json.eq(model_json), dsl::modified_at.eq(Utc::now().naive_utc())))
            .execute(&mut conn)
            .await
            .map_err(storage_error_from_diesel)?;
        Ok(())
    }

    pub async fn delete_registry(&self, id: &str) -> Result<(), RegistryError> {
        use schema::registries::dsl;
        let mut conn = self.conn().await?;
        let affected = diesel::delete(dsl::registries.filter(dsl::id.eq(id)))
            .execute(&mut conn)
            .await
            .map_err(storage_error_from_diesel)?;
        if affected == 0 {
            return Err(RegistryError::not_found(format!("registry '{id}' does not exist")));
        }
        Ok(())
    }

    // ---- Group ---------------------------------------------------------

    pub async fn create_group(&self, row: NewGroupRow<'_>) -> Result<GroupRow, RegistryError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(schema::groups::table)
            .values(&row)
            .get_result(&mut conn)
            .await
            .map_err(storage_error_from_diesel)
    }

    pub async fn get_group(&self, registry_id: &str, plural: &str, uid: &str) -> Result<GroupRow, RegistryError> {
        use schema::groups::dsl;
        let mut conn = self.conn().await?;
        dsl::groups
            .filter(dsl::registry_id.eq(registry_id))
            .filter(dsl::model_plural.eq(plural))
            .filter(dsl::uid.eq(uid))
            .first(&mut conn)
            .await
            .map_err(storage_error_from_diesel)
    }

    /// §4.5 collection listing: every Group of `plural` under a registry.
    pub async fn list_groups(&self, registry_id: &str, plural: &str) -> Result<Vec<GroupRow>, RegistryError> {
        use schema::groups::dsl;
        let mut conn = self.conn().await?;
        dsl::groups
            .filter(dsl::registry_id.eq(registry_id))
            .filter(dsl::model_plural.eq(plural))
            .load(&mut conn)
            .await
            .map_err(storage_error_from_diesel)
    }

    pub async fn delete_group(&self, id: &str) -> Result<(), RegistryError> {
        use schema::groups::dsl;
        let mut conn = self.conn().await?;
        let affected = diesel::delete(dsl::groups.filter(dsl::id.eq(id)))
            .execute(&mut conn)
            .await
            .map_err(storage_error_from_diesel)?;
        if affected == 0 {
            return Err(RegistryError::not_found(format!("group '{id}' does not exist")));
        }
        Ok(())
    }

    // ---- Resource / Version --------------------------------------------

    /// Creates a bare Resource row with no Version — used by a metadata-only
    /// `PUT ...?meta` that establishes a Resource's properties before any
    /// content has been uploaded.
    pub async fn create_resource_only(&self, row: NewResourceRow<'_>) -> Result<ResourceRow, RegistryError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(schema::resources::table)
            .values(&row)
            .get_result(&mut conn)
            .await
            .map_err(storage_error_from_diesel)
    }

    /// Creates a Resource together with its first Version, per §4.3
    /// `Group::add_resource`.
    pub async fn create_resource_with_first_version(
        &self,
        resource: NewResourceRow<'_>,
        first_version: NewVersionRow<'_>,
    ) -> Result<(ResourceRow, VersionRow), RegistryError> {
        let mut conn = self.conn().await?;
        conn.transaction(|conn| {
            Box::pin(async move {
                let resource_row: ResourceRow = diesel::insert_into(schema::resources::table)
                    .values(&resource)
                    .get_result(conn)
                    .await?;
                let version_row: VersionRow = diesel::insert_into(schema::versions::table)
                    .values(&first_version)
                    .get_result(conn)
                    .await?;
                use schema::resources::dsl;
                diesel::update(dsl::resources.filter(dsl::id.eq(&resource_row.id)))
                    .set(dsl::latest_id.eq(&version_row.id))
                    .execute(conn)
                    .await?;
                Ok((resource_row, version_row))
            })
        })
        .await
        .map_err(storage_error_from_diesel)
    }

    /// §4.3 `Resource::add_version` + version-cap eviction: inserts a new
    /// Version, recomputes `latest_id` (sticky unless the resource model
    /// is newest-wins), and evicts the oldest non-latest Version once
    /// `versions_cap` is exceeded.
    pub async fn add_version(
        &self,
        resource_id: &str,
        new_version: NewVersionRow<'_>,
        versions_cap: u32,
        sticky_latest: bool,
    ) -> Result<VersionRow, RegistryError> {
        use schema::resources::dsl as rdsl;
        use schema::versions::dsl as vdsl;
        let mut conn = self.conn().await?;
        conn.transaction(|conn| {
            Box::pin(async move {
                let inserted: VersionRow = diesel::insert_into(schema::versions::table)
                    .values(&new_version)
                    .get_result(conn)
                    .await?;

                let resource: ResourceRow = rdsl::resources.filter(rdsl::id.eq(resource_id)).first(conn).await?;
                let all_versions: Vec<VersionRow> = vdsl::versions.filter(vdsl::resource_id.eq(resource_id)).load(conn).await?;

                let sticky_id = if sticky_latest { resource.latest_id.as_deref() } else { None };
                if let Some(new_latest) = select_latest(&all_versions, sticky_id) {
                    if Some(new_latest.id.as_str()) != resource.latest_id.as_deref() {
                        diesel::update(rdsl::resources.filter(rdsl::id.eq(resource_id)))
                            .set(rdsl::latest_id.eq(&new_latest.id))
                            .execute(conn)
                            .await?;
                    }
                    if let Some(victim) = evict_candidate(&all_versions, versions_cap, &new_latest.id) {
                        debug!(version_id = %victim.id, "evicting version past retention cap");
                        diesel::delete(vdsl::versions.filter(vdsl::id.eq(&victim.id))).execute(conn).await?;
                    }
                }
                Ok(inserted)
            })
        })
        .await
        .map_err(storage_error_from_diesel)
    }

    pub async fn find_version(&self, resource_id: &str, uid: &str) -> Result<VersionRow, RegistryError> {
        use schema::versions::dsl;
        let mut conn = self.conn().await?;
        dsl::versions
            .filter(dsl::resource_id.eq(resource_id))
            .filter(dsl::uid.eq(uid))
            .first(&mut conn)
            .await
            .map_err(storage_error_from_diesel)
    }

    pub async fn latest_version(&self, resource_id: &str) -> Result<VersionRow, RegistryError> {
        use schema::resources::dsl as rdsl;
        use schema::versions::dsl as vdsl;
        let mut conn = self.conn().await?;
        let resource: ResourceRow = rdsl::resources.filter(rdsl::id.eq(resource_id)).first(&mut conn).await.map_err(storage_error_from_diesel)?;
        let latest_id = resource
            .latest_id
            .ok_or_else(|| RegistryError::internal(format!("resource '{resource_id}' has no latest version")))?;
        vdsl::versions.filter(vdsl::id.eq(latest_id)).first(&mut conn).await.map_err(storage_error_from_diesel)
    }

    pub async fn get_resource(&self, group_id: &str, plural: &str, uid: &str) -> Result<ResourceRow, RegistryError> {
        use schema::resources::dsl;
        let mut conn = self.conn().await?;
        dsl::resources
            .filter(dsl::group_id.eq(group_id))
            .filter(dsl::model_plural.eq(plural))
            .filter(dsl::uid.eq(uid))
            .first(&mut conn)
            .await
            .map_err(storage_error_from_diesel)
    }

    /// §4.5 collection listing: every Resource of `plural` under a group.
    pub async fn list_resources(&self, group_id: &str, plural: &str) -> Result<Vec<ResourceRow>, RegistryError> {
        use schema::resources::dsl;
        let mut conn = self.conn().await?;
        dsl::resources
            .filter(dsl::group_id.eq(group_id))
            .filter(dsl::model_plural.eq(plural))
            .load(&mut conn)
            .await
            .map_err(storage_error_from_diesel)
    }

    pub async fn list_versions(&self, resource_id: &str) -> Result<Vec<VersionRow>, RegistryError> {
        use schema::versions::dsl;
        let mut conn = self.conn().await?;
        dsl::versions
            .filter(dsl::resource_id.eq(resource_id))
            .order(dsl::seq.asc())
            .load(&mut conn)
            .await
            .map_err(storage_error_from_diesel)
    }

    pub async fn create_content(&self, id: &str, bytes: &[u8], content_type: Option<&str>) -> Result<orm::ResourceContentRow, RegistryError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(schema::resource_contents::table)
            .values(orm::NewResourceContentRow { id, content: bytes, content_type })
            .get_result(&mut conn)
            .await
            .map_err(storage_error_from_diesel)
    }

    pub async fn get_content(&self, content_id: &str) -> Result<orm::ResourceContentRow, RegistryError> {
        use schema::resource_contents::dsl;
        let mut conn = self.conn().await?;
        dsl::resource_contents.filter(dsl::id.eq(content_id)).first(&mut conn).await.map_err(storage_error_from_diesel)
    }

    /// Points a Version at a previously stored content blob, mirroring the
    /// `Insertable`/`AsChangeset` pattern used elsewhere in this gateway.
    pub async fn set_version_content(&self, version_id: &str, content_id: &str, content_type: Option<&str>) -> Result<(), RegistryError> {
        use schema::versions::dsl;
        let mut conn = self.conn().await?;
        diesel::update(dsl::versions.filter(dsl::id.eq(version_id)))
            .set((dsl::resource_content_id.eq(content_id), dsl::content_type.eq(content_type)))
            .execute(&mut conn)
            .await
            .map_err(storage_error_from_diesel)?;
        Ok(())
    }

    /// §4.3 `Resource::set_default`: repoints `latest_id`, failing if the
    /// version does not belong to this resource.
    pub async fn set_default_version(&self, resource_id: &str, version_id: &str) -> Result<(), RegistryError> {
        use schema::resources::dsl as rdsl;
        use schema::versions::dsl as vdsl;
        let mut conn = self.conn().await?;
        let owned: i64 = vdsl::versions
            .filter(vdsl::id.eq(version_id))
            .filter(vdsl::resource_id.eq(resource_id))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(storage_error_from_diesel)?;
        if owned == 0 {
            return Err(RegistryError::bad_request(format!("version '{version_id}' does not belong to resource '{resource_id}'")));
        }
        diesel::update(rdsl::resources.filter(rdsl::id.eq(resource_id)))
            .set(rdsl::latest_id.eq(version_id))
            .execute(&mut conn)
            .await
            .map_err(storage_error_from_diesel)?;
        Ok(())
    }

    /// §4.3 `delete_version`: if the deleted version was latest, the newest
    /// remaining version becomes latest; if none remain, the Resource
    /// itself is deleted.
    pub async fn delete_version(&self, resource_id: &str, version_id: &str) -> Result<(), RegistryError> {
        use schema::resources::dsl as rdsl;
        use schema::versions::dsl as vdsl;
        let mut conn = self.conn().await?;
        conn.transaction(|conn| {
            Box::pin(async move {
                diesel::delete(vdsl::versions.filter(vdsl::id.eq(version_id))).execute(conn).await?;
                let remaining: Vec<VersionRow> = vdsl::versions.filter(vdsl::resource_id.eq(resource_id)).load(conn).await?;
                if remaining.is_empty() {
                    diesel::delete(rdsl::resources.filter(rdsl::id.eq(resource_id))).execute(conn).await?;
                } else if let Some(successor) = xreg_core::entity::version::successor_after_delete(&remaining) {
                    diesel::update(rdsl::resources.filter(rdsl::id.eq(resource_id)))
                        .set(rdsl::latest_id.eq(&successor.id))
                        .execute(conn)
                        .await?;
                }
                Ok(())
            })
        })
        .await
        .map_err(storage_error_from_diesel)
    }

    // ---- Properties ------------------------------------------------------

    pub async fn get_props(&self, entity_id: &str) -> Result<BTreeMap<String, PropValue>, RegistryError> {
        use schema::props::dsl;
        let mut conn = self.conn().await?;
        let rows: Vec<PropRow> = dsl::props.filter(dsl::entity_id.eq(entity_id)).load(&mut conn).await.map_err(storage_error_from_diesel)?;
        Ok(rows.into_iter().filter_map(|r| r.to_prop_value().map(|v| (r.prop_name, v))).collect())
    }

    /// Flushes every dirty/deleted property on `entity` (an in-memory
    /// `xreg_core::Entity`) to the `props` table, and bumps the owning
    /// row's own `epoch`/`modified_at` to match the in-memory bump
    /// `Entity::set_save` already made — all in one transaction. The
    /// storage half of `Entity::set_save` (§4.2).
    pub async fn flush_entity(&self, entity: &Entity) -> Result<(), RegistryError> {
        let mut conn = self.conn().await?;
        let entity_id = entity.id.clone();
        let kind = entity.kind;
        let to_delete: Vec<String> = entity.deleted_paths().map(String::from).collect();
        let to_upsert: Vec<(String, PropValue)> = entity
            .dirty_paths()
            .filter_map(|p| entity.get(p).map(|v| (p.to_string(), v.clone())))
            .collect();
        conn.transaction(|conn| {
            Box::pin(async move {
                use schema::props::dsl;
                if !to_delete.is_empty() {
                    diesel::delete(dsl::props.filter(dsl::entity_id.eq(&entity_id)).filter(dsl::prop_name.eq_any(&to_delete)))
                        .execute(conn)
                        .await?;
                }
                for (name, value) in &to_upsert {
                    let row = NewPropRow {
                        entity_id: &entity_id,
                        prop_name: name,
                        prop_value: value.as_json(),
                        prop_type: prop_type_tag(value),
                    };
                    diesel::insert_into(dsl::props)
                        .values(&row)
                        .on_conflict((dsl::entity_id, dsl::prop_name))
                        .do_update()
                        .set(&row)
                        .execute(conn)
                        .await?;
                }
                let now = Utc::now().naive_utc();
                match kind {
                    EntityKind::Registry => {
                        use schema::registries::dsl as rdsl;
                        diesel::update(rdsl::registries.filter(rdsl::id.eq(&entity_id)))
                            .set((rdsl::epoch.eq(rdsl::epoch + 1), rdsl::modified_at.eq(now)))
                            .execute(conn)
                            .await?;
                    }
                    EntityKind::Group => {
                        use schema::groups::dsl as gdsl;
                        diesel::update(gdsl::groups.filter(gdsl::id.eq(&entity_id)))
                            .set((gdsl::epoch.eq(gdsl::epoch + 1), gdsl::modified_at.eq(now)))
                            .execute(conn)
                            .await?;
                    }
                    EntityKind::Resource => {
                        use schema::resources::dsl as rdsl;
                        diesel::update(rdsl::resources.filter(rdsl::id.eq(&entity_id)))
                            .set((rdsl::epoch.eq(rdsl::epoch + 1), rdsl::modified_at.eq(now)))
                            .execute(conn)
                            .await?;
                    }
                    EntityKind::Version => {
                        use schema::versions::dsl as vdsl;
                        diesel::update(vdsl::versions.filter(vdsl::id.eq(&entity_id)))
                            .set((vdsl::epoch.eq(vdsl::epoch + 1), vdsl::modified_at.eq(now)))
                            .execute(conn)
                            .await?;
                    }
                }
                Ok(())
            })
        })
        .await
        .map_err(storage_error_from_diesel)
    }

    /// §5 cancellation: a handle used by the HTTP layer to bound an
    /// outbound proxy fetch retry/backoff window; kept here since it shares
    /// the gateway's lifetime, not because it touches the database.
    pub fn default_timeout() -> Duration {
        Duration::from_secs(30)
    }
}

fn prop_type_tag(value: &PropValue) -> &'static str {
    match value {
        PropValue::Bool(_) => "boolean",
        PropValue::Int(_) => "integer",
        PropValue::UInt(_) => "uinteger",
        PropValue::Decimal(_) => "decimal",
        PropValue::Str(_) => "string",
    }
}

/// Maps a raw Diesel error onto the registry's error kinds, mirroring the
/// teacher's `storage_error_from_diesel`: a unique-violation becomes a
/// `Conflict`, `NotFound` stays `NotFound`, everything else is `Internal`.
pub fn storage_error_from_diesel(err: diesel::result::Error) -> RegistryError {
    use diesel::result::{DatabaseErrorKind, Error};
    match err {
        Error::NotFound => RegistryError::not_found("no matching row"),
        Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            RegistryError::conflict(info.message().to_string())
        }
        Error::DatabaseError(DatabaseErrorKind::CheckViolation, info) => {
            RegistryError::conflict(info.message().to_string())
        }
        other => RegistryError::internal(other.to_string()),
    }
}

/// Entity kind implied by which of `EntityKind` owns `entity_id` — used
/// where the storage layer must decide which base table to join against.
pub fn kind_hint(kind: EntityKind) -> &'static str {
    orm::table_for_kind(kind)
}
