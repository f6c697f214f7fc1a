use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use serving_plane::{
    ExportDatabase, FilterType, Instance, InstanceRequest, InstanceScope, ListArgs, ListEntity,
    ListQuery, ServingStore, SqliteServingStore, StoreError, Value,
};
use uuid::Uuid;

fn store() -> SqliteServingStore {
    let store = SqliteServingStore::open(":memory:").expect("store");
    store.ensure_schema().expect("schema");
    store
}

fn database(id: &str, owner: &str, public: bool, deployment: &str) -> ExportDatabase {
    ExportDatabase {
        id: id.to_string(),
        name: format!("db {id}"),
        description: String::new(),
        db_type: "influxdb".to_string(),
        deployment: deployment.to_string(),
        url: "http://influx:8086".to_string(),
        ew_filter_topic: "filter-influx".to_string(),
        public,
        user_id: owner.to_string(),
    }
}

fn instance(name: &str, owner: &str, database_id: &str, generated: bool) -> Instance {
    let request = InstanceRequest {
        name: name.to_string(),
        description: format!("{name} export"),
        topic: "urn_infai_ses_service_1".to_string(),
        filter: "device-1".to_string(),
        filter_type: FilterType::Device,
        time_path: "value.time".to_string(),
        values: vec![
            Value {
                name: "temperature".to_string(),
                value_type: "float".to_string(),
                path: "value.temp".to_string(),
                tag: false,
            },
            Value {
                name: "room".to_string(),
                value_type: "string".to_string(),
                path: "value.room".to_string(),
                tag: true,
            },
        ],
        export_database_id: database_id.to_string(),
        offset: "largest".to_string(),
        generated,
        ..InstanceRequest::default()
    };
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("timestamp");
    Instance::from_request(Uuid::new_v4(), Uuid::new_v4(), &request, owner, now)
}

fn args(pairs: &[(&str, &str)]) -> ListArgs {
    let mut args: ListArgs = HashMap::new();
    for (key, value) in pairs {
        args.insert(key.to_string(), vec![value.to_string()]);
    }
    args
}

fn query(entity: ListEntity, pairs: &[(&str, &str)], user: &str) -> ListQuery {
    ListQuery::parse(entity, &args(pairs), user).expect("query")
}

#[test]
fn instance_roundtrip_loads_values_and_database() {
    let store = store();
    store.insert_export_database(&database("db-1", "alice", false, "external")).expect("db");
    let created = instance("weather", "alice", "db-1", false);
    store.insert_instance(&created).expect("insert");

    let loaded = store
        .find_instance(created.id, &InstanceScope::All)
        .expect("find")
        .expect("present");
    assert_eq!(loaded.name, "weather");
    assert_eq!(loaded.values.len(), 2);
    assert_eq!(loaded.created_at, created.created_at);
    assert_eq!(loaded.measurement, created.id.to_string());
    assert_eq!(
        loaded.export_database.map(|db| db.id),
        Some("db-1".to_string())
    );
}

#[test]
fn instance_requires_existing_export_database() {
    let store = store();
    let err = store
        .insert_instance(&instance("orphan", "alice", "missing", false))
        .expect_err("foreign key");
    assert!(matches!(err, StoreError::Constraint(_)));
}

#[test]
fn scopes_restrict_lookups() {
    let store = store();
    store.insert_export_database(&database("db-1", "alice", true, "external")).expect("db");
    let owned = instance("mine", "alice", "db-1", false);
    store.insert_instance(&owned).expect("insert");

    let as_owner = InstanceScope::OwnedBy("alice".to_string());
    let as_other = InstanceScope::OwnedBy("bob".to_string());
    assert!(store.find_instance(owned.id, &as_owner).expect("find").is_some());
    assert!(store.find_instance(owned.id, &as_other).expect("find").is_none());
    assert!(store
        .find_instance(owned.id, &InstanceScope::Ids(vec![owned.id]))
        .expect("find")
        .is_some());
    assert!(store
        .find_instance(owned.id, &InstanceScope::Ids(Vec::new()))
        .expect("find")
        .is_none());
}

#[test]
fn listing_applies_filters_order_and_pagination() {
    let store = store();
    store.insert_export_database(&database("db-1", "alice", false, "external")).expect("db");
    for name in ["charlie", "alpha", "bravo", "delta"] {
        store
            .insert_instance(&instance(name, "alice", "db-1", name == "delta"))
            .expect("insert");
    }
    store
        .insert_instance(&instance("alpha-foreign", "bob", "db-1", false))
        .expect("insert");

    let scope = InstanceScope::OwnedBy("alice".to_string());
    let page = store
        .list_instances(
            &scope,
            &query(
                ListEntity::Instances,
                &[("order", "name:asc"), ("limit", "2"), ("offset", "1")],
                "alice",
            ),
        )
        .expect("list");
    assert_eq!(page.total, 4);
    let names: Vec<&str> = page.items.iter().map(|item| item.name.as_str()).collect();
    assert_eq!(names, vec!["bravo", "charlie"]);

    let generated = store
        .list_instances(&scope, &query(ListEntity::Instances, &[("generated", "true")], "alice"))
        .expect("list");
    assert_eq!(generated.total, 1);
    assert_eq!(generated.items[0].name, "delta");

    let searched = store
        .list_instances(&InstanceScope::All, &query(ListEntity::Instances, &[("search", "alpha")], "alice"))
        .expect("list");
    assert_eq!(searched.total, 2);
}

#[test]
fn internal_only_filter_uses_database_deployment() {
    let store = store();
    store.insert_export_database(&database("internal-db", "alice", false, "internal")).expect("db");
    store.insert_export_database(&database("external-db", "alice", false, "external")).expect("db");
    store.insert_instance(&instance("inside", "alice", "internal-db", false)).expect("insert");
    store.insert_instance(&instance("outside", "alice", "external-db", false)).expect("insert");

    let page = store
        .list_instances(
            &InstanceScope::All,
            &query(ListEntity::Instances, &[("internal_only", "true")], "alice"),
        )
        .expect("list");
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].name, "inside");
}

#[test]
fn id_listing_and_existence_checks() {
    let store = store();
    store.insert_export_database(&database("db-1", "alice", false, "external")).expect("db");
    let first = instance("one", "alice", "db-1", false);
    let second = instance("two", "alice", "db-1", false);
    store.insert_instance(&first).expect("insert");
    store.insert_instance(&second).expect("insert");

    let mut ids = store.instance_ids(10, 0).expect("ids");
    ids.sort();
    let mut expected = vec![first.id.to_string(), second.id.to_string()];
    expected.sort();
    assert_eq!(ids, expected);
    assert_eq!(store.instance_ids(1, 1).expect("ids").len(), 1);

    let probe = vec![first.id.to_string(), Uuid::new_v4().to_string()];
    let existing = store.existing_instance_ids(&probe).expect("existing");
    assert_eq!(existing.len(), 1);
    assert!(existing.contains(&first.id.to_string()));

    assert!(store.delete_instance(first.id).expect("delete"));
    assert!(!store.delete_instance(first.id).expect("delete again"));
}

#[test]
fn export_database_visibility() {
    let store = store();
    store.insert_export_database(&database("private-a", "alice", false, "external")).expect("db");
    store.insert_export_database(&database("public-a", "alice", true, "external")).expect("db");
    store.insert_export_database(&database("private-b", "bob", false, "external")).expect("db");

    assert!(store.find_export_database("private-a", Some("bob")).expect("find").is_none());
    assert!(store.find_export_database("public-a", Some("bob")).expect("find").is_some());
    assert!(store.find_export_database("private-a", None).expect("find").is_some());

    let visible = store
        .list_export_databases("bob", &query(ListEntity::ExportDatabases, &[("order", "id:asc")], "bob"))
        .expect("list");
    let ids: Vec<&str> = visible.items.iter().map(|db| db.id.as_str()).collect();
    assert_eq!(ids, vec!["private-b", "public-a"]);

    let owned = store
        .list_export_databases("bob", &query(ListEntity::ExportDatabases, &[("owner", "true")], "bob"))
        .expect("list");
    assert_eq!(owned.total, 1);
    assert_eq!(store.all_export_databases().expect("all").len(), 3);
}
