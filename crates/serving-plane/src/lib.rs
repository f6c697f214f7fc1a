pub mod access;
pub mod bootstrap;
pub mod config;
pub mod model;
pub mod permission;
pub mod pg_repository;
pub mod query;
pub mod repository;
pub mod sink;
pub mod sql;
pub mod sqlite_repository;
pub mod static_config;

pub use access::{
    source_ids, AccessChecker, AccessCheckers, AccessError, HttpDeviceAccessChecker,
    HttpImportAccessChecker, HttpPipelineAccessChecker, StaticAccessChecker,
};
pub use bootstrap::{load_from_system_config, BootstrapError, ServingPlaneBundle, MOCK_PERMISSIONS};
pub use config::{ConfigError, SystemConfig, SystemConfigLoader};
pub use model::{
    ExportDatabase, ExportDatabaseRequest, FieldMappings, FilterType, Instance, InstanceRequest,
    Page, SinkKind, Value,
};
pub use permission::{
    HttpPermissionStore, InMemoryPermissionStore, ListOptions, PermissionError, PermissionStore,
    ResourcePermissions, Rights,
};
pub use pg_repository::PgServingStore;
pub use query::{ListArgs, ListEntity, ListQuery, Predicate, QueryError, SortDirection, SortOrder};
pub use repository::{InMemoryServingStore, InstanceScope, ServingStore, StoreError};
pub use sink::{InMemorySinkCleaner, InfluxSinkCleaner, SinkCleaner, SinkCleaners, SinkError};
pub use sqlite_repository::SqliteServingStore;
