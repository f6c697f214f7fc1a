mod common;

use std::sync::atomic::Ordering;

use serving_kernel::{BatchStatus, ServingError};
use serving_plane::{InstanceScope, PermissionStore, Rights, ServingStore};
use uuid::Uuid;

use common::*;

#[test]
fn create_persists_row_grants_permission_and_provisions() {
    let fixture = fixture_with_permissions();
    seed_database(&fixture, "db-1", "alice", false);

    let instance = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect("create");

    assert_eq!(instance.user_id, "alice");
    assert_eq!(instance.database, "alice");
    assert_eq!(instance.measurement, instance.id.to_string());
    assert_eq!(instance.service_handle, format!("handle-{}", instance.id));
    let stored = fixture
        .store
        .find_instance(instance.id, &InstanceScope::All)
        .expect("find")
        .expect("row");
    assert_eq!(stored.application_id, instance.application_id);
    assert!(fixture
        .permissions
        .check_permission("alice-token", &instance.id.to_string(), Rights::ADMINISTRATE)
        .expect("check"));

    let created = fixture.driver.created.lock();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].1.data, r#"{"temperature:float":"value.temperature"}"#);
    assert_eq!(created[0].1.tags, r#"{"station:string":"value.station"}"#);
}

#[test]
fn create_with_unknown_database_is_rejected_before_provisioning() {
    let fixture = fixture_with_permissions();

    let err = fixture
        .orchestrator
        .create_instance(&request("missing"), &alice())
        .expect_err("validation");

    assert!(matches!(err, ServingError::Validation(_)));
    assert_eq!(fixture.driver.create_count(), 0);
    assert!(fixture.permissions.resource_ids().is_empty());
    assert_eq!(fixture.store.inner.instance_count(), 0);
}

#[test]
fn driver_failure_leaves_no_row_and_no_permission() {
    let fixture = fixture_with_permissions();
    seed_database(&fixture, "db-1", "alice", false);
    fixture.driver.fail_creates.store(true, Ordering::SeqCst);

    let err = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect_err("provisioning");

    assert!(matches!(err, ServingError::Provisioning(_)));
    assert_eq!(fixture.driver.create_count(), 3);
    assert_eq!(fixture.sleeper.count(), 2);
    assert_eq!(fixture.store.inner.instance_count(), 0);
    assert!(fixture.permissions.resource_ids().is_empty());
}

#[test]
fn store_failure_deprovisions_and_removes_permission() {
    let fixture = fixture_with_permissions();
    seed_database(&fixture, "db-1", "alice", false);
    fixture.store.fail_inserts.store(true, Ordering::SeqCst);

    let err = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect_err("store");

    assert!(matches!(err, ServingError::Store(_)));
    let created = fixture.driver.created.lock().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(*fixture.driver.deleted.lock(), vec![created[0].0]);
    assert!(fixture.permissions.resource_ids().is_empty());
}

#[test]
fn private_database_of_another_owner_is_rejected() {
    let fixture = fixture_with_permissions();
    seed_database(&fixture, "private-a", "alice", false);
    seed_database(&fixture, "public-a", "alice", true);

    let err = fixture
        .orchestrator
        .create_instance(&request("private-a"), &bob())
        .expect_err("not accessible");
    assert!(matches!(err, ServingError::Validation(_)));
    assert!(fixture.permissions.resource_ids().is_empty());
    assert_eq!(fixture.driver.create_count(), 0);

    let instance = fixture
        .orchestrator
        .create_instance(&request("public-a"), &bob())
        .expect("public database");
    assert_eq!(instance.user_id, "bob");
}

#[test]
fn source_access_is_checked_first() {
    let fixture = fixture_with(FixtureOptions {
        open_access: false,
        ..FixtureOptions::default()
    });
    seed_database(&fixture, "db-1", "alice", false);

    let err = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect_err("denied");
    assert!(matches!(err, ServingError::AccessDenied(_)));
    assert_eq!(fixture.driver.create_count(), 0);

    fixture.access.grant("alice-token", "device-1");
    fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect("granted");
}

#[test]
fn update_changes_application_id_only_with_offset() {
    let fixture = fixture();
    seed_database(&fixture, "db-1", "alice", false);
    let original = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect("create");

    let mut renamed = request("db-1");
    renamed.name = "renamed".to_string();
    let updated = fixture
        .orchestrator
        .update_instance(original.id, &renamed, &alice())
        .expect("update");
    assert_eq!(updated.id, original.id);
    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.application_id, original.application_id);
    assert_eq!(updated.created_at, original.created_at);

    let mut rewound = renamed.clone();
    rewound.offset = "smallest".to_string();
    let restarted = fixture
        .orchestrator
        .update_instance(original.id, &rewound, &alice())
        .expect("update");
    assert_ne!(restarted.application_id, original.application_id);
    assert_eq!(fixture.driver.delete_count(), 2);
    assert_eq!(fixture.driver.create_count(), 3);
    assert_eq!(fixture.store.inner.instance_count(), 1);
}

#[test]
fn update_keeps_old_instance_when_delete_fails() {
    let fixture = fixture();
    seed_database(&fixture, "db-1", "alice", false);
    let original = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect("create");
    fixture.driver.fail_deletes.store(true, Ordering::SeqCst);

    let mut renamed = request("db-1");
    renamed.name = "renamed".to_string();
    let err = fixture
        .orchestrator
        .update_instance(original.id, &renamed, &alice())
        .expect_err("delete fails");
    assert!(matches!(err, ServingError::Provisioning(_)));
    let stored = fixture
        .store
        .find_instance(original.id, &InstanceScope::All)
        .expect("find")
        .expect("still there");
    assert_eq!(stored.name, "weather");
}

#[test]
fn update_by_another_user_is_denied() {
    let fixture = fixture();
    seed_database(&fixture, "db-1", "alice", true);
    let original = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect("create");

    let err = fixture
        .orchestrator
        .update_instance(original.id, &request("db-1"), &bob())
        .expect_err("denied");
    assert!(matches!(err, ServingError::AccessDenied(_)));

    let err = fixture
        .orchestrator
        .update_instance(Uuid::new_v4(), &request("db-1"), &alice())
        .expect_err("missing");
    assert!(matches!(err, ServingError::NotFound(_)));
}

#[test]
fn deleting_a_missing_instance_is_not_an_error() {
    let fixture = fixture_with_permissions();
    let outcome = fixture
        .orchestrator
        .delete_instance_for_user(Uuid::new_v4(), &alice())
        .expect("delete");
    assert!(!outcome.deleted);
    assert!(outcome.is_clean());
    assert_eq!(fixture.driver.delete_count(), 0);
}

#[test]
fn admin_deletes_any_instance_while_strangers_are_rejected() {
    let fixture = fixture_with_permissions();
    seed_database(&fixture, "db-1", "alice", false);
    let instance = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect("create");

    let err = fixture
        .orchestrator
        .delete_instance_with_perm_handling(instance.id, &bob())
        .expect_err("stranger");
    assert!(matches!(err, ServingError::AccessDenied(_)));
    assert_eq!(fixture.store.inner.instance_count(), 1);

    let outcome = fixture
        .orchestrator
        .delete_instance_with_perm_handling(instance.id, &admin())
        .expect("admin delete");
    assert!(outcome.deleted);
    assert!(outcome.is_clean());
    assert_eq!(fixture.store.inner.instance_count(), 0);
    assert!(fixture.permissions.resource(&instance.id.to_string()).is_none());
}

#[test]
fn owner_delete_ignores_admin_flag() {
    let fixture = fixture();
    seed_database(&fixture, "db-1", "alice", false);
    let instance = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect("create");

    let err = fixture
        .orchestrator
        .delete_instance_for_user(instance.id, &admin())
        .expect_err("admin flag ignored on the owner path");
    assert!(matches!(err, ServingError::AccessDenied(_)));
}

#[test]
fn driver_delete_failure_keeps_the_row() {
    let fixture = fixture();
    seed_database(&fixture, "db-1", "alice", false);
    let instance = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect("create");
    fixture.driver.fail_deletes.store(true, Ordering::SeqCst);

    let err = fixture
        .orchestrator
        .delete_instance_for_user(instance.id, &alice())
        .expect_err("driver");
    assert!(matches!(err, ServingError::Provisioning(_)));
    assert_eq!(fixture.driver.delete_count(), 3);
    assert_eq!(fixture.store.inner.instance_count(), 1);
}

#[test]
fn delete_purges_residual_measurement() {
    let fixture = fixture();
    seed_database(&fixture, "db-1", "alice", false);
    let instance = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect("create");
    let measurement = instance.id.to_string();
    fixture.sinks.add_measurement("alice", &measurement);
    fixture.sinks.add_measurement("alice", "other");
    fixture.sinks.ignore_drops(2);

    let outcome = fixture
        .orchestrator
        .delete_instance_for_user(instance.id, &alice())
        .expect("delete");
    assert!(outcome.deleted);
    assert!(outcome.is_clean());
    assert!(!fixture.sinks.has_measurement("alice", &measurement));
    assert!(fixture.sinks.has_measurement("alice", "other"));
}

#[test]
fn stubborn_measurement_is_reported_after_the_row_is_gone() {
    let fixture = fixture();
    seed_database(&fixture, "db-1", "alice", false);
    let instance = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect("create");
    fixture.sinks.add_measurement("alice", &instance.id.to_string());
    fixture.sinks.ignore_drops(100);

    let outcome = fixture
        .orchestrator
        .delete_instance_for_user(instance.id, &alice())
        .expect("delete");
    assert!(outcome.deleted);
    assert_eq!(outcome.errors.len(), 1);
    assert!(matches!(outcome.errors[0], ServingError::Sink(_)));
    assert_eq!(fixture.store.inner.instance_count(), 0);
}

#[test]
fn batch_delete_reports_partial_success() {
    let fixture = fixture();
    seed_database(&fixture, "db-1", "alice", true);
    let mine = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect("create");
    let theirs = fixture
        .orchestrator
        .create_instance(&request("db-1"), &bob())
        .expect("create");
    let missing = Uuid::new_v4();

    let outcome = fixture
        .orchestrator
        .delete_instances_for_user(&[mine.id, missing, theirs.id], &alice());
    assert_eq!(outcome.deleted, vec![mine.id]);
    assert_eq!(outcome.not_found, vec![missing]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, theirs.id);
    assert_eq!(outcome.status(), BatchStatus::Partial);

    let outcome = fixture
        .orchestrator
        .delete_instances_for_user(&[missing], &alice());
    assert_eq!(outcome.status(), BatchStatus::Complete);

    let outcome = fixture
        .orchestrator
        .delete_instances_for_user(&[theirs.id], &alice());
    assert_eq!(outcome.status(), BatchStatus::Failed);
}

#[test]
fn get_instance_respects_access_mode() {
    let fixture = fixture_with_permissions();
    seed_database(&fixture, "db-1", "alice", false);
    let instance = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect("create");

    let loaded = fixture
        .orchestrator
        .get_instance(instance.id, &alice())
        .expect("owner");
    assert_eq!(loaded.export_database.map(|db| db.id), Some("db-1".to_string()));
    assert!(matches!(
        fixture.orchestrator.get_instance(instance.id, &bob()),
        Err(ServingError::NotFound(_))
    ));
    fixture
        .orchestrator
        .get_instance(instance.id, &admin())
        .expect("admin");
}

#[test]
fn republish_uses_stored_mappings() {
    let fixture = fixture();
    seed_database(&fixture, "db-1", "alice", false);
    let instance = fixture
        .orchestrator
        .create_instance(&request("db-1"), &alice())
        .expect("create");

    fixture
        .orchestrator
        .republish_instance(&instance)
        .expect("republish");
    let created = fixture.driver.created.lock();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0], created[1]);
}
