use serving_plane::{
    load_from_system_config, ResourcePermissions, Rights, SinkKind, SystemConfigLoader,
};

#[test]
fn bootstrap_defaults_to_sqlite_without_permissions() {
    let config = SystemConfigLoader::from_str(
        r#"
[storage]
sqlite_path = ":memory:"
"#,
    )
    .expect("config");
    let bundle = load_from_system_config(&config).expect("bundle");
    assert!(bundle.permissions.is_none());
    assert!(bundle.sinks.get(SinkKind::InfluxDb).is_none());
    assert!(bundle.store.all_export_databases().expect("list").is_empty());
}

#[test]
fn mock_permissions_register_the_admin_token() {
    let config = SystemConfigLoader::from_str(
        r#"
[storage]
dsn = "sqlite::memory:"
[permissions]
url = "mock"
admin_token = "admin-secret"
[influx]
url = "http://influx:8086"
"#,
    )
    .expect("config");
    let bundle = load_from_system_config(&config).expect("bundle");
    let permissions = bundle.permissions.expect("permissions enabled");
    permissions
        .set_permission("admin-secret", "res-1", &ResourcePermissions::owned_by("alice"))
        .expect("admin may write");
    assert!(permissions
        .check_permission("admin-secret", "res-1", Rights::READ)
        .expect("check"));
    assert_eq!(bundle.admin_token, "admin-secret");
    assert!(bundle.sinks.get(SinkKind::InfluxDb).is_some());
}
