//! HTTP surface (§4.6): actix-web handlers implementing the xRegistry URL
//! grammar. Method semantics:
//! - `GET` reads, honoring `meta`/`inline`/`filter`/`specversion`.
//! - `PUT` on an entity URL upserts it (201 on create, 200 on replace).
//! - `POST` on a collection URL creates with a server-chosen or
//!   body-supplied UID.
//! - `DELETE` removes the entity and cascades.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::{json, Value};
use uuid::Uuid;

use xreg_core::{Attribute, Entity, EntityKind, Model, RegistryError};
use xreg_storage::postgres::orm::{NewGroupRow, NewResourceRow, NewVersionRow};
use xreg_storage::PostgresGateway;

use crate::error::{ApiError, ApiResult};
use crate::query::{matches_filters, parse_query_params, parse_resource_path, InlineSpec, ResourcePath};

pub struct AppState {
    pub gateway: Arc<PostgresGateway>,
    pub default_registry_uid: String,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(gateway: Arc<PostgresGateway>, default_registry_uid: String) -> Self {
        Self {
            gateway,
            default_registry_uid,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds"),
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn join_path(parent: &str, uid: &str) -> String {
    if parent.is_empty() {
        uid.to_string()
    } else {
        format!("{parent}/{uid}")
    }
}

fn props_to_json(props: &std::collections::BTreeMap<String, xreg_core::PropValue>) -> Value {
    // Re-nests composite property names (`a.b`, `a[0]`) into a JSON tree;
    // the inverse of `xreg_core::entity::flatten`.
    let mut root = json!({});
    for (path, value) in props {
        insert_leaf(&mut root, path, value.as_json());
    }
    root
}

fn insert_leaf(root: &mut Value, path: &str, value: Value) {
    let segments = match xreg_core::model::path::parse_path(path) {
        Ok(s) => s,
        Err(_) => return,
    };
    let mut cur = root;
    for (i, seg) in segments.iter().enumerate() {
        let is_last = i == segments.len() - 1;
        use xreg_core::model::path::PathSegment::*;
        match seg {
            Name(n) | Key(n) => {
                if !cur.is_object() {
                    *cur = json!({});
                }
                let obj = cur.as_object_mut().unwrap();
                if is_last {
                    obj.insert(n.clone(), value.clone());
                    return;
                }
                cur = obj.entry(n.clone()).or_insert_with(|| json!({}));
            }
            Index(idx) => {
                if !cur.is_array() {
                    *cur = json!([]);
                }
                let arr = cur.as_array_mut().unwrap();
                while arr.len() <= *idx as usize {
                    arr.push(Value::Null);
                }
                if is_last {
                    arr[*idx as usize] = value.clone();
                    return;
                }
                cur = &mut arr[*idx as usize];
            }
        }
    }
}

async fn registry_row(state: &AppState, uid: Option<&str>) -> ApiResult<xreg_storage::postgres::orm::RegistryRow> {
    let uid = uid.unwrap_or(&state.default_registry_uid);
    state.gateway.get_registry_by_uid(uid).await.map_err(ApiError)
}

/// §4.5 collection rendering, shared by the Group/Resource/Version
/// collection GETs: `filter=` keeps only matching entities, and `inline`
/// controls whether the body is the `{uid: entity}` expansion or just the
/// `{"<plural>count": N}` summary.
async fn render_collection(
    state: &AppState,
    plural: &str,
    entities: Vec<(String, String, i64)>,
    qp: &crate::query::QueryParams,
) -> ApiResult<HttpResponse> {
    let mut kept = Vec::new();
    for (id, uid, epoch) in entities {
        let props = state.gateway.get_props(&id).await.map_err(ApiError)?;
        if matches_filters(&props, &qp.filter) {
            kept.push((id, uid, epoch, props));
        }
    }
    if !matches!(qp.inline, Some(InlineSpec::All) | Some(InlineSpec::Paths(_))) {
        let mut summary = serde_json::Map::new();
        summary.insert(format!("{plural}count"), json!(kept.len()));
        return Ok(HttpResponse::Ok().json(Value::Object(summary)));
    }
    let mut out = serde_json::Map::new();
    for (id, uid, epoch, props) in kept {
        let mut body = props_to_json(&props);
        body["id"] = json!(id);
        body["epoch"] = json!(epoch);
        out.insert(uid, body);
    }
    Ok(HttpResponse::Ok().json(Value::Object(out)))
}

pub async fn get(state: web::Data<AppState>, req: HttpRequest) -> ApiResult<HttpResponse> {
    let rp = parse_resource_path(req.path()).map_err(ApiError)?;
    let qp = parse_query_params(req.query_string());
    let registry = registry_row(&state, rp.registry_uid.as_deref()).await?;

    if let Some(plural) = &rp.group_plural_only {
        let groups = state.gateway.list_groups(&registry.id, plural).await.map_err(ApiError)?;
        let entities = groups.into_iter().map(|g| (g.id, g.uid, g.epoch)).collect();
        return render_collection(&state, plural, entities, &qp).await;
    }

    let Some((group_plural, group_uid)) = &rp.group else {
        let mut body = json!({
            "id": registry.id,
            "epoch": registry.epoch,
            "self": format!("/reg-{}", registry.uid),
        });
        if let Some(sv) = &qp.specversion {
            body["specversion"] = json!(sv);
        }
        return Ok(HttpResponse::Ok().json(body));
    };
    let group = state.gateway.get_group(&registry.id, group_plural, group_uid).await.map_err(ApiError)?;

    if let Some(plural) = &rp.resource_plural_only {
        let resources = state.gateway.list_resources(&group.id, plural).await.map_err(ApiError)?;
        let entities = resources.into_iter().map(|r| (r.id, r.uid, r.epoch)).collect();
        return render_collection(&state, plural, entities, &qp).await;
    }

    let Some((resource_plural, resource_uid)) = &rp.resource else {
        let props = state.gateway.get_props(&group.id).await.map_err(ApiError)?;
        let mut body = props_to_json(&props);
        body["id"] = json!(group.id);
        body["epoch"] = json!(group.epoch);
        body["self"] = json!(format!("/reg-{}/{}/{}", registry.uid, group_plural, group_uid));
        return Ok(HttpResponse::Ok().json(body));
    };
    let resource = state.gateway.get_resource(&group.id, resource_plural, resource_uid).await.map_err(ApiError)?;

    if rp.versions_collection {
        let versions = state.gateway.list_versions(&resource.id).await.map_err(ApiError)?;
        if let Some(version_uid) = &rp.version_uid {
            let version = versions
                .into_iter()
                .find(|v| &v.uid == version_uid)
                .ok_or_else(|| ApiError(RegistryError::not_found(format!("version '{version_uid}' not found"))))?;
            return render_version(&state, &version, &qp).await;
        }
        let entities = versions.into_iter().map(|v| (v.id, v.uid, v.epoch)).collect();
        return render_collection(&state, "versions", entities, &qp).await;
    }

    if qp.meta {
        let props = state.gateway.get_props(&resource.id).await.map_err(ApiError)?;
        let mut body = props_to_json(&props);
        body["id"] = json!(resource.id);
        body["epoch"] = json!(resource.epoch);
        body["self"] = json!(format!(
            "/reg-{}/{}/{}/{}/{}?meta",
            registry.uid, group_plural, group_uid, resource_plural, resource_uid
        ));
        if let Some(latest_id) = &resource.latest_id {
            body["latestversionid"] = json!(latest_id);
        }
        return Ok(HttpResponse::Ok().json(body));
    }

    let version = state.gateway.latest_version(&resource.id).await.map_err(ApiError)?;
    stream_version_content(&state, &version).await
}

async fn render_version(state: &AppState, version: &xreg_storage::postgres::orm::VersionRow, qp: &crate::query::QueryParams) -> ApiResult<HttpResponse> {
    if qp.meta {
        let props = state.gateway.get_props(&version.id).await.map_err(ApiError)?;
        let mut body = props_to_json(&props);
        body["id"] = json!(version.id);
        body["epoch"] = json!(version.epoch);
        return Ok(HttpResponse::Ok().json(body));
    }
    stream_version_content(state, version).await
}

async fn stream_version_content(state: &AppState, version: &xreg_storage::postgres::orm::VersionRow) -> ApiResult<HttpResponse> {
    if let Some(content_id) = &version.resource_content_id {
        let content = state.gateway.get_content(content_id).await.map_err(ApiError)?;
        let mut resp = HttpResponse::Ok();
        if let Some(ct) = &content.content_type {
            resp.content_type(ct.as_str());
        }
        return Ok(resp.body(content.content));
    }
    if let Some(url) = &version.resource_url {
        return Ok(HttpResponse::SeeOther().insert_header(("Location", url.as_str())).finish());
    }
    if let Some(proxy_url) = &version.resource_proxy_url {
        let resp = state
            .http_client
            .get(proxy_url)
            .send()
            .await
            .map_err(|e| ApiError(RegistryError::upstream(e.to_string())))?;
        let content_type = resp.headers().get("content-type").and_then(|v| v.to_str().ok()).unwrap_or("application/octet-stream").to_string();
        let bytes = resp.bytes().await.map_err(|e| ApiError(RegistryError::upstream(e.to_string())))?;
        return Ok(HttpResponse::Ok().content_type(content_type).body(bytes));
    }
    Ok(HttpResponse::NoContent().finish())
}

/// Reserved implicit property names (§3) a metadata PUT body never writes
/// through to the model — they're server-computed, not user-settable.
const RESERVED_METADATA_KEYS: &[&str] = &["id", "epoch", "self", "createdat", "modifiedat", "latestversionid", "specversion"];

fn parse_metadata_body(body: &web::Bytes) -> ApiResult<Value> {
    if body.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|e| ApiError(RegistryError::bad_request(format!("invalid metadata JSON: {e}"))))
}

/// §4.6 metadata PUT: flattens every non-reserved top-level key of `body`
/// through `Entity::set` against `root_attrs`, so model validation (type
/// coercion, enum membership, strict-mode attribute checks) actually runs
/// on the write before it reaches storage.
fn apply_metadata_body(entity: &mut Entity, root_attrs: &HashMap<String, Attribute>, body: &Value) -> Result<(), RegistryError> {
    let Value::Object(map) = body else {
        return Err(RegistryError::bad_request("metadata body must be a JSON object"));
    };
    for (k, v) in map {
        if RESERVED_METADATA_KEYS.contains(&k.as_str()) || k.ends_with("count") || k.ends_with("url") {
            continue;
        }
        entity.set(root_attrs, k, v.clone())?;
    }
    entity.epoch += 1;
    Ok(())
}

/// `PUT ...?meta` on a Group or Resource URL: the body is the entity's
/// metadata JSON, validated and coerced through the registry's `Model`.
/// Plain `PUT` on a Resource URL (no `?meta`) keeps the original raw-content
/// semantics below, since a Resource's content and its metadata are two
/// different things and only one can be the body of a given request.
#[allow(clippy::too_many_arguments)]
async fn put_metadata(
    state: &AppState,
    model: &Model,
    kind: EntityKind,
    entity_id: &str,
    uid: &str,
    current_epoch: i64,
    group_plural: Option<&str>,
    resource_plural: Option<&str>,
    body: &web::Bytes,
) -> ApiResult<(String, i64)> {
    let root_attrs = model.attributes_for(group_plural, resource_plural).map_err(ApiError)?;
    let existing_props = state.gateway.get_props(entity_id).await.map_err(ApiError)?;
    let mut entity = Entity::new(kind, entity_id, uid);
    entity.epoch = current_epoch.max(0) as u64;
    entity.load_props(existing_props);
    let payload = parse_metadata_body(body)?;
    apply_metadata_body(&mut entity, root_attrs, &payload).map_err(ApiError)?;
    state.gateway.flush_entity(&entity).await.map_err(ApiError)?;
    Ok((entity.id.clone(), entity.epoch as i64))
}

/// `PUT` on `.../<resPlural>/<resUid>`: creates the Resource (and its
/// first Version) if it does not exist, or adds a new Version otherwise.
/// The body is treated as the new version's raw content; its
/// `Content-Type` header becomes the version's stored content type.
pub async fn put_resource(state: web::Data<AppState>, req: HttpRequest, body: web::Bytes) -> ApiResult<HttpResponse> {
    let rp: ResourcePath = parse_resource_path(req.path()).map_err(ApiError)?;
    let qp = parse_query_params(req.query_string());
    let (group_plural, group_uid) = rp.group.clone().ok_or_else(|| ApiError(RegistryError::bad_request("PUT requires a group/resource path")))?;

    let registry = registry_row(&state, rp.registry_uid.as_deref()).await?;
    let model = Model::from_json(&registry.model_json).map_err(ApiError)?;
    let group = match state.gateway.get_group(&registry.id, &group_plural, &group_uid).await {
        Ok(g) => g,
        Err(RegistryError::NotFound(_)) => {
            let id = new_id();
            state
                .gateway
                .create_group(NewGroupRow {
                    id: &id,
                    registry_id: &registry.id,
                    model_plural: &group_plural,
                    uid: &group_uid,
                    path: &group_uid,
                    abstract_path: &group_plural,
                })
                .await
                .map_err(ApiError)?
        }
        Err(e) => return Err(ApiError(e)),
    };

    let Some((resource_plural, resource_uid)) = rp.resource.clone() else {
        // A Group URL carries no content duality: the body is always its
        // metadata JSON.
        let (id, epoch) =
            put_metadata(&state, &model, EntityKind::Group, &group.id, &group_uid, group.epoch, Some(&group_plural), None, &body).await?;
        return Ok(HttpResponse::Ok().json(json!({ "id": id, "epoch": epoch })));
    };

    if qp.meta {
        let resource = match state.gateway.get_resource(&group.id, &resource_plural, &resource_uid).await {
            Ok(r) => r,
            Err(RegistryError::NotFound(_)) => {
                let resource_id = new_id();
                let resource_path = join_path(&group.path, &resource_uid);
                state
                    .gateway
                    .create_resource_only(NewResourceRow {
                        id: &resource_id,
                        group_id: &group.id,
                        model_plural: &resource_plural,
                        uid: &resource_uid,
                        path: &resource_path,
                        abstract_path: &resource_plural,
                        latest_id: None,
                    })
                    .await
                    .map_err(ApiError)?
            }
            Err(e) => return Err(ApiError(e)),
        };
        let resource_epoch = resource.epoch;
        let (id, epoch) = put_metadata(
            &state,
            &model,
            EntityKind::Resource,
            &resource.id,
            &resource.uid,
            resource_epoch,
            Some(&group_plural),
            Some(&resource_plural),
            &body,
        )
        .await?;
        return Ok(HttpResponse::Ok().json(json!({ "id": id, "epoch": epoch })));
    }

    let content_type = req.headers().get("content-type").and_then(|v| v.to_str().ok()).map(|s| s.to_string());

    match state.gateway.get_resource(&group.id, &resource_plural, &resource_uid).await {
        Ok(resource) => {
            let version_id = new_id();
            let version_uid = new_id();
            let content_id = if !body.is_empty() {
                Some(state.gateway.create_content(&new_id(), &body, content_type.as_deref()).await.map_err(ApiError)?.id)
            } else {
                None
            };
            let versions = state.gateway.list_versions(&resource.id).await.map_err(ApiError)?;
            let next_seq = versions.iter().map(|v| v.seq).max().unwrap_or(0) + 1;
            let path = join_path(&resource.path, &version_uid);
            let new_version = NewVersionRow {
                id: &version_id,
                resource_id: &resource.id,
                uid: &version_uid,
                path: &path,
                abstract_path: "versions",
                seq: next_seq,
            };
            let inserted = state.gateway.add_version(&resource.id, new_version, 0, true).await.map_err(ApiError)?;
            if let Some(cid) = content_id {
                state.gateway.set_version_content(&inserted.id, &cid, content_type.as_deref()).await.map_err(ApiError)?;
            }
            Ok(HttpResponse::Ok().json(json!({ "id": resource.id, "latestversionid": inserted.id })))
        }
        Err(RegistryError::NotFound(_)) => {
            let resource_id = new_id();
            let version_id = new_id();
            let version_uid = new_id();
            let resource_path = join_path(&group.path, &resource_uid);
            let version_path = join_path(&resource_path, &version_uid);
            let content_id = if !body.is_empty() {
                Some(state.gateway.create_content(&new_id(), &body, content_type.as_deref()).await.map_err(ApiError)?.id)
            } else {
                None
            };
            let new_resource = NewResourceRow {
                id: &resource_id,
                group_id: &group.id,
                model_plural: &resource_plural,
                uid: &resource_uid,
                path: &resource_path,
                abstract_path: &resource_plural,
                latest_id: None,
            };
            let new_version = NewVersionRow {
                id: &version_id,
                resource_id: &resource_id,
                uid: &version_uid,
                path: &version_path,
                abstract_path: "versions",
                seq: 1,
            };
            let (resource, version) = state.gateway.create_resource_with_first_version(new_resource, new_version).await.map_err(ApiError)?;
            if let Some(cid) = content_id {
                state.gateway.set_version_content(&version.id, &cid, content_type.as_deref()).await.map_err(ApiError)?;
            }
            Ok(HttpResponse::Created().json(json!({ "id": resource.id, "latestversionid": version.id })))
        }
        Err(e) => Err(ApiError(e)),
    }
}

pub async fn delete(state: web::Data<AppState>, req: HttpRequest) -> ApiResult<HttpResponse> {
    let rp = parse_resource_path(req.path()).map_err(ApiError)?;
    let registry = registry_row(&state, rp.registry_uid.as_deref()).await?;
    let Some((group_plural, group_uid)) = &rp.group else {
        state.gateway.delete_registry(&registry.id).await.map_err(ApiError)?;
        return Ok(HttpResponse::NoContent().finish());
    };
    let group = state.gateway.get_group(&registry.id, group_plural, group_uid).await.map_err(ApiError)?;
    let Some((resource_plural, resource_uid)) = &rp.resource else {
        state.gateway.delete_group(&group.id).await.map_err(ApiError)?;
        return Ok(HttpResponse::NoContent().finish());
    };
    let resource = state.gateway.get_resource(&group.id, resource_plural, resource_uid).await.map_err(ApiError)?;
    if let Some(version_uid) = &rp.version_uid {
        let version = state.gateway.find_version(&resource.id, version_uid).await.map_err(ApiError)?;
        state.gateway.delete_version(&resource.id, &version.id).await.map_err(ApiError)?;
    } else {
        let versions = state.gateway.list_versions(&resource.id).await.map_err(ApiError)?;
        for v in versions {
            state.gateway.delete_version(&resource.id, &v.id).await.map_err(ApiError)?;
        }
    }
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use xreg_core::PropValue;

    #[test]
    fn join_path_handles_empty_parent() {
        assert_eq!(join_path("", "d1"), "d1");
        assert_eq!(join_path("d1", "f1"), "d1/f1");
    }

    #[test]
    fn props_to_json_renests_flat_scalar_paths() {
        let mut props = std::collections::BTreeMap::new();
        props.insert("name".to_string(), PropValue::Str("widget".to_string()));
        props.insert("labels.stage".to_string(), PropValue::Str("prod".to_string()));
        let tree = props_to_json(&props);
        assert_eq!(tree["name"], json!("widget"));
        assert_eq!(tree["labels"]["stage"], json!("prod"));
    }

    #[test]
    fn props_to_json_renests_array_indices() {
        let mut props = std::collections::BTreeMap::new();
        props.insert("tags[0]".to_string(), PropValue::Str("a".to_string()));
        props.insert("tags[1]".to_string(), PropValue::Str("b".to_string()));
        let tree = props_to_json(&props);
        assert_eq!(tree["tags"], json!(["a", "b"]));
    }

    #[test]
    fn props_to_json_ignores_unparseable_paths() {
        let mut props = std::collections::BTreeMap::new();
        props.insert("[bad".to_string(), PropValue::Str("x".to_string()));
        let tree = props_to_json(&props);
        assert_eq!(tree, json!({}));
    }
}
