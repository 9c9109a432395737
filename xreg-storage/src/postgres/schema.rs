//! Diesel table definitions mirroring `migrations/2024-01-01-000000_init/up.sql`.
//! The logical views (`entities`, `full_tree`, `leaves`, ...) are queried via
//! `diesel::sql_query` in [`super::views`] rather than declared here, since
//! Diesel's `table!` macro models base tables, not arbitrary SQL views.

diesel::table! {
    registries (id) {
        id -> Text,
        uid -> Text,
        epoch -> BigInt,
        model_json -> Jsonb,
        created_at -> Timestamp,
        modified_at -> Timestamp,
    }
}

diesel::table! {
    schemas (registry_id, url) {
        registry_id -> Text,
        url -> Text,
    }
}

diesel::table! {
    groups (id) {
        id -> Text,
        registry_id -> Text,
        model_plural -> Text,
        uid -> Text,
        path -> Text,
        abstract_path -> Text,
        epoch -> BigInt,
        created_at -> Timestamp,
        modified_at -> Timestamp,
    }
}

diesel::table! {
    resources (id) {
        id -> Text,
        group_id -> Text,
        model_plural -> Text,
        uid -> Text,
        path -> Text,
        abstract_path -> Text,
        latest_id -> Nullable<Text>,
        epoch -> BigInt,
        created_at -> Timestamp,
        modified_at -> Timestamp,
    }
}

diesel::table! {
    versions (id) {
        id -> Text,
        resource_id -> Text,
        uid -> Text,
        path -> Text,
        abstract_path -> Text,
        seq -> BigInt,
        resource_url -> Nullable<Text>,
        resource_proxy_url -> Nullable<Text>,
        resource_content_id -> Nullable<Text>,
        content_type -> Nullable<Text>,
        epoch -> BigInt,
        created_at -> Timestamp,
        modified_at -> Timestamp,
    }
}

diesel::table! {
    resource_contents (id) {
        id -> Text,
        content -> Binary,
        content_type -> Nullable<Text>,
    }
}

diesel::table! {
    props (entity_id, prop_name) {
        entity_id -> Text,
        prop_name -> Text,
        prop_value -> Jsonb,
        prop_type -> Text,
    }
}

diesel::joinable!(groups -> registries (registry_id));
diesel::joinable!(resources -> groups (group_id));
diesel::joinable!(versions -> resources (resource_id));
diesel::joinable!(schemas -> registries (registry_id));

diesel::allow_tables_to_appear_in_same_query!(registries, schemas, groups, resources, versions, props, resource_contents,);
