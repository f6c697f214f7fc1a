use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::access::{
    AccessChecker, AccessCheckers, AccessError, HttpDeviceAccessChecker, HttpImportAccessChecker,
    HttpPipelineAccessChecker, StaticAccessChecker,
};
use crate::config::SystemConfig;
use crate::model::{FilterType, SinkKind};
use crate::permission::{
    HttpPermissionStore, InMemoryPermissionStore, PermissionError, PermissionStore,
};
use crate::pg_repository::PgServingStore;
use crate::repository::{InMemoryServingStore, ServingStore, StoreError};
use crate::sink::{InfluxSinkCleaner, SinkCleaners, SinkError};
use crate::sqlite_repository::SqliteServingStore;

pub const MOCK_PERMISSIONS: &str = "mock";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Collaborator handles shared by the orchestrator and the reconciler.
#[derive(Clone)]
pub struct ServingPlaneBundle {
    pub store: Arc<dyn ServingStore>,
    /// `None` when the permission subsystem is disabled.
    pub permissions: Option<Arc<dyn PermissionStore>>,
    pub access: AccessCheckers,
    pub sinks: SinkCleaners,
    pub admin_token: String,
}

impl ServingPlaneBundle {
    pub fn in_memory() -> Self {
        Self {
            store: InMemoryServingStore::shared(),
            permissions: None,
            access: AccessCheckers::uniform(StaticAccessChecker::allow_all()),
            sinks: SinkCleaners::new(),
            admin_token: String::new(),
        }
    }
}

pub fn load_from_system_config(config: &SystemConfig) -> Result<ServingPlaneBundle, BootstrapError> {
    let timeout = config.get_millis("access.timeout_ms").max(Duration::from_millis(1));
    let admin_token = config.get_string("permissions.admin_token");
    Ok(ServingPlaneBundle {
        store: resolve_store(config)?,
        permissions: resolve_permissions(config, &admin_token, timeout)?,
        access: resolve_access(config, timeout)?,
        sinks: resolve_sinks(config, timeout)?,
        admin_token,
    })
}

fn resolve_store(config: &SystemConfig) -> Result<Arc<dyn ServingStore>, StoreError> {
    let dsn = config.get_string("storage.dsn");
    if dsn.trim().is_empty() {
        let path = config.get_string("storage.sqlite_path");
        let store = SqliteServingStore::open(&path)?;
        store.ensure_schema()?;
        info!(path = %path, "using sqlite store");
        return Ok(Arc::new(store));
    }
    if is_sqlite_dsn(&dsn) {
        let path = sqlite_path_from_dsn(&dsn);
        let store = SqliteServingStore::open(path)?;
        store.ensure_schema()?;
        info!(path = %path, "using sqlite store");
        return Ok(Arc::new(store));
    }
    let store = PgServingStore::connect(&dsn)?;
    store.ensure_schema()?;
    info!("using postgres store");
    Ok(Arc::new(store))
}

fn resolve_permissions(
    config: &SystemConfig,
    admin_token: &str,
    timeout: Duration,
) -> Result<Option<Arc<dyn PermissionStore>>, PermissionError> {
    let url = config.get_string("permissions.url");
    let url = url.trim();
    if url.is_empty() {
        info!("permission subsystem disabled");
        return Ok(None);
    }
    if url == MOCK_PERMISSIONS {
        warn!("using in-memory permission store");
        let store = InMemoryPermissionStore::shared();
        if !admin_token.is_empty() {
            store.register_admin(admin_token, "admin");
        }
        return Ok(Some(store));
    }
    let topic = config.get_string("permissions.topic");
    let store = HttpPermissionStore::new(url, &topic, timeout)?;
    Ok(Some(Arc::new(store)))
}

fn resolve_access(config: &SystemConfig, timeout: Duration) -> Result<AccessCheckers, AccessError> {
    let device = config.get_string("access.device_url");
    let pipeline = config.get_string("access.pipeline_url");
    let import = config.get_string("access.import_url");
    let device: Arc<dyn AccessChecker> = if device.trim().is_empty() {
        allow_all(FilterType::Device)
    } else {
        Arc::new(HttpDeviceAccessChecker::new(&device, timeout)?)
    };
    let pipeline: Arc<dyn AccessChecker> = if pipeline.trim().is_empty() {
        allow_all(FilterType::Operator)
    } else {
        Arc::new(HttpPipelineAccessChecker::new(&pipeline, timeout)?)
    };
    let import: Arc<dyn AccessChecker> = if import.trim().is_empty() {
        allow_all(FilterType::Import)
    } else {
        Arc::new(HttpImportAccessChecker::new(&import, timeout)?)
    };
    Ok(AccessCheckers::new()
        .with(FilterType::Device, device)
        .with(FilterType::Operator, pipeline)
        .with(FilterType::Import, import))
}

fn allow_all(filter_type: FilterType) -> Arc<dyn AccessChecker> {
    warn!(filter_type = %filter_type, "no access endpoint configured, allowing all sources");
    StaticAccessChecker::allow_all()
}

fn resolve_sinks(config: &SystemConfig, timeout: Duration) -> Result<SinkCleaners, SinkError> {
    let url = config.get_string("influx.url");
    if url.trim().is_empty() {
        return Ok(SinkCleaners::new());
    }
    let cleaner = InfluxSinkCleaner::new(
        &url,
        &config.get_string("influx.user"),
        &config.get_string("influx.password"),
        timeout,
    )?;
    Ok(SinkCleaners::new().with(SinkKind::InfluxDb, Arc::new(cleaner)))
}

fn is_sqlite_dsn(dsn: &str) -> bool {
    let trimmed = dsn.trim().to_lowercase();
    trimmed.starts_with("sqlite://") || trimmed.starts_with("sqlite:")
}

fn sqlite_path_from_dsn(dsn: &str) -> &str {
    dsn.trim()
        .strip_prefix("sqlite://")
        .or_else(|| dsn.trim().strip_prefix("sqlite:"))
        .unwrap_or(dsn)
}
