//! Integration tests against a real Postgres instance (`DATABASE_URL`),
//! grounded in the teacher's `contract_state.rs` test style: a `setup_db`
//! helper plus one `#[tokio::test]` per behavior. Each test cleans up by
//! deleting its own registry, which cascades to every descendant row.

use std::collections::BTreeMap;

use uuid::Uuid;

use super::orm::{NewGroupRow, NewResourceRow, NewVersionRow};
use super::PostgresGateway;
use xreg_core::{Entity, EntityKind, PropValue};

async fn setup_gateway() -> PostgresGateway {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for storage tests");
    PostgresGateway::new(&super::PostgresConfig { database_url, pool_size: 2 }).await.expect("gateway connects")
}

fn uid() -> String {
    Uuid::new_v4().to_string()
}

#[tokio::test]
async fn registry_round_trip() {
    let gw = setup_gateway().await;
    let id = uid();
    let registry_uid = uid();
    let created = gw.create_registry(&id, &registry_uid, serde_json::json!({})).await.unwrap();
    let fetched = gw.get_registry_by_uid(&registry_uid).await.unwrap();
    assert_eq!(created.id, fetched.id);
    assert_eq!(fetched.epoch, 0);

    gw.delete_registry(&id).await.unwrap();
    assert!(gw.get_registry_by_uid(&registry_uid).await.is_err());
}

#[tokio::test]
async fn group_and_resource_creation() {
    let gw = setup_gateway().await;
    let registry_id = uid();
    gw.create_registry(&registry_id, &uid(), serde_json::json!({})).await.unwrap();

    let group_id = uid();
    let group_uid = uid();
    gw.create_group(NewGroupRow {
        id: &group_id,
        registry_id: &registry_id,
        model_plural: "dirs",
        uid: &group_uid,
        path: &group_uid,
        abstract_path: "dirs",
    })
    .await
    .unwrap();
    let fetched_group = gw.get_group(&registry_id, "dirs", &group_uid).await.unwrap();
    assert_eq!(fetched_group.id, group_id);

    let resource_id = uid();
    let resource_uid = uid();
    let version_id = uid();
    let version_uid = uid();
    let (resource, version) = gw
        .create_resource_with_first_version(
            NewResourceRow {
                id: &resource_id,
                group_id: &group_id,
                model_plural: "files",
                uid: &resource_uid,
                path: &format!("{group_uid}/{resource_uid}"),
                abstract_path: "files",
                latest_id: None,
            },
            NewVersionRow {
                id: &version_id,
                resource_id: &resource_id,
                uid: &version_uid,
                path: &format!("{group_uid}/{resource_uid}/{version_uid}"),
                abstract_path: "versions",
                seq: 1,
            },
        )
        .await
        .unwrap();
    assert_eq!(resource.latest_id.as_deref(), Some(version.id.as_str()));

    let latest = gw.latest_version(&resource_id).await.unwrap();
    assert_eq!(latest.id, version.id);

    gw.delete_registry(&registry_id).await.unwrap();
}

#[tokio::test]
async fn add_version_promotes_newest_and_evicts_past_cap() {
    let gw = setup_gateway().await;
    let registry_id = uid();
    gw.create_registry(&registry_id, &uid(), serde_json::json!({})).await.unwrap();
    let group_id = uid();
    gw.create_group(NewGroupRow {
        id: &group_id,
        registry_id: &registry_id,
        model_plural: "dirs",
        uid: &uid(),
        path: "d",
        abstract_path: "dirs",
    })
    .await
    .unwrap();

    let resource_id = uid();
    let v1 = uid();
    let (resource, _) = gw
        .create_resource_with_first_version(
            NewResourceRow {
                id: &resource_id,
                group_id: &group_id,
                model_plural: "files",
                uid: &uid(),
                path: "d/f",
                abstract_path: "files",
                latest_id: None,
            },
            NewVersionRow { id: &v1, resource_id: &resource_id, uid: "1", path: "d/f/1", abstract_path: "versions", seq: 1 },
        )
        .await
        .unwrap();
    let _ = resource;

    let v2 = uid();
    let inserted_v2 = gw
        .add_version(
            &resource_id,
            NewVersionRow { id: &v2, resource_id: &resource_id, uid: "2", path: "d/f/2", abstract_path: "versions", seq: 2 },
            1,
            false,
        )
        .await
        .unwrap();
    let latest = gw.latest_version(&resource_id).await.unwrap();
    assert_eq!(latest.id, inserted_v2.id, "newest version should become latest when not sticky");

    let remaining = gw.list_versions(&resource_id).await.unwrap();
    assert_eq!(remaining.len(), 1, "versions_cap=1 should have evicted the superseded version");
    assert_eq!(remaining[0].id, inserted_v2.id);

    gw.delete_registry(&registry_id).await.unwrap();
}

#[tokio::test]
async fn delete_version_promotes_successor_then_deletes_empty_resource() {
    let gw = setup_gateway().await;
    let registry_id = uid();
    gw.create_registry(&registry_id, &uid(), serde_json::json!({})).await.unwrap();
    let group_id = uid();
    gw.create_group(NewGroupRow {
        id: &group_id,
        registry_id: &registry_id,
        model_plural: "dirs",
        uid: &uid(),
        path: "d",
        abstract_path: "dirs",
    })
    .await
    .unwrap();

    let resource_id = uid();
    let v1 = uid();
    gw.create_resource_with_first_version(
        NewResourceRow {
            id: &resource_id,
            group_id: &group_id,
            model_plural: "files",
            uid: &uid(),
            path: "d/f",
            abstract_path: "files",
            latest_id: None,
        },
        NewVersionRow { id: &v1, resource_id: &resource_id, uid: "1", path: "d/f/1", abstract_path: "versions", seq: 1 },
    )
    .await
    .unwrap();
    let v2 = uid();
    let inserted_v2 = gw
        .add_version(
            &resource_id,
            NewVersionRow { id: &v2, resource_id: &resource_id, uid: "2", path: "d/f/2", abstract_path: "versions", seq: 2 },
            0,
            false,
        )
        .await
        .unwrap();

    gw.delete_version(&resource_id, &inserted_v2.id).await.unwrap();
    let latest = gw.latest_version(&resource_id).await.unwrap();
    assert_eq!(latest.id, v1, "deleting latest promotes the newest remaining version");

    gw.delete_version(&resource_id, &v1).await.unwrap();
    // the resource itself is gone once its last version is deleted
    let remaining = gw.list_versions(&resource_id).await.unwrap();
    assert!(remaining.is_empty());

    gw.delete_registry(&registry_id).await.unwrap();
}

#[tokio::test]
async fn flush_entity_persists_and_round_trips_props() {
    let gw = setup_gateway().await;
    let registry_id = uid();
    gw.create_registry(&registry_id, &uid(), serde_json::json!({})).await.unwrap();
    let group_id = uid();
    gw.create_group(NewGroupRow {
        id: &group_id,
        registry_id: &registry_id,
        model_plural: "dirs",
        uid: &uid(),
        path: "d",
        abstract_path: "dirs",
    })
    .await
    .unwrap();

    let mut entity = Entity::new(EntityKind::Group, group_id.clone(), "d");
    // #-prefixed paths short-circuit model lookup (§4.1 private properties),
    // so an empty attribute map is fine here.
    let attrs = std::collections::HashMap::new();
    entity.set(&attrs, "#note", serde_json::json!("hello")).unwrap();
    gw.flush_entity(&entity).await.unwrap();

    let props: BTreeMap<String, PropValue> = gw.get_props(&group_id).await.unwrap();
    assert_eq!(props.get("#note"), Some(&PropValue::Str("hello".to_string())));

    gw.delete_registry(&registry_id).await.unwrap();
}
