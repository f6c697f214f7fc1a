use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serving_plane::{
    AccessCheckers, ExportDatabase, Instance, InstanceRequest, InstanceScope, PermissionStore,
    ResourcePermissions, Rights, ServingPlaneBundle, ServingStore, SinkCleaner, SinkCleaners,
    SinkError, SystemConfig,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::driver::Driver;
use crate::error::{BatchDeleteOutcome, DeleteOutcome, ServingError};
use crate::lock::CoordinationLock;
use crate::retry::RetryPolicy;
use crate::saga::Saga;

/// Identity of whoever invokes a lifecycle operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Caller {
    pub user_id: String,
    pub token: String,
    pub admin: bool,
}

impl Caller {
    pub fn user(user_id: &str, token: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            token: token.to_string(),
            admin: false,
        }
    }

    pub fn admin(user_id: &str, token: &str) -> Self {
        Self {
            admin: true,
            ..Self::user(user_id, token)
        }
    }

    pub fn without_admin(&self) -> Self {
        Self {
            admin: false,
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Driver calls and permission grant/removal.
    pub retry: RetryPolicy,
    /// Drop/recheck rounds for residual sink measurements.
    pub force_delete: RetryPolicy,
    pub export_database_id_prefix: String,
}

impl OrchestratorConfig {
    pub fn from_system_config(config: &SystemConfig) -> Self {
        let attempts = u32::try_from(config.get_u64("driver.retry_attempts")).unwrap_or(u32::MAX);
        let force_attempts =
            u32::try_from(config.get_u64("sink.force_delete_attempts")).unwrap_or(u32::MAX);
        let delay = config.get_millis("driver.retry_delay_ms");
        Self {
            retry: RetryPolicy::new(attempts, delay),
            force_delete: RetryPolicy::new(force_attempts, Duration::ZERO),
            export_database_id_prefix: config.get_string("export_database.id_prefix"),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            force_delete: RetryPolicy::new(10, Duration::ZERO),
            export_database_id_prefix: String::new(),
        }
    }
}

pub struct Orchestrator {
    pub(crate) store: Arc<dyn ServingStore>,
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) permissions: Option<Arc<dyn PermissionStore>>,
    access: AccessCheckers,
    sinks: SinkCleaners,
    pub(crate) lock: CoordinationLock,
    pub(crate) config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(bundle: &ServingPlaneBundle, driver: Arc<dyn Driver>, config: OrchestratorConfig) -> Self {
        Self {
            store: bundle.store.clone(),
            driver,
            permissions: bundle.permissions.clone(),
            access: bundle.access.clone(),
            sinks: bundle.sinks.clone(),
            lock: CoordinationLock::new(),
            config,
        }
    }

    pub fn shared(
        bundle: &ServingPlaneBundle,
        driver: Arc<dyn Driver>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self::new(bundle, driver, config))
    }

    pub fn lock(&self) -> &CoordinationLock {
        &self.lock
    }

    pub fn store(&self) -> Arc<dyn ServingStore> {
        self.store.clone()
    }

    pub fn permissions(&self) -> Option<Arc<dyn PermissionStore>> {
        self.permissions.clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn create_instance(
        &self,
        request: &InstanceRequest,
        caller: &Caller,
    ) -> Result<Instance, ServingError> {
        let _guard = self.lock.mutation();
        self.check_source_access(request, &caller.token)?;
        let instance = self.provision(
            Uuid::new_v4(),
            Uuid::new_v4(),
            request,
            &caller.user_id,
            &caller.token,
            None,
            true,
        )?;
        info!(id = %instance.id, user = %caller.user_id, "created export instance");
        Ok(instance)
    }

    /// Delete-then-recreate under the same id. The application id changes only
    /// when the offset policy does. Owner and permission resource are kept.
    pub fn update_instance(
        &self,
        id: Uuid,
        request: &InstanceRequest,
        caller: &Caller,
    ) -> Result<Instance, ServingError> {
        let _guard = self.lock.mutation();
        self.check_source_access(request, &caller.token)?;
        let existing = self.authorize_write(id, caller)?;
        let application_id = if request.offset != existing.offset {
            Uuid::new_v4()
        } else {
            existing.application_id
        };
        self.resolve_export_database(&request.export_database_id, &existing.user_id)?;
        for err in self.remove_instance(&existing)? {
            warn!(id = %id, error = %err, "cleanup after replacing instance failed");
        }
        let instance = self
            .provision(
                id,
                application_id,
                request,
                &existing.user_id,
                &caller.token,
                Some(existing.created_at),
                false,
            )
            .map_err(|err| {
                error!(id = %id, error = %err, "recreating instance after delete failed");
                err
            })?;
        info!(id = %id, user = %caller.user_id, "updated export instance");
        Ok(instance)
    }

    pub fn get_instance(&self, id: Uuid, caller: &Caller) -> Result<Instance, ServingError> {
        let scope = if caller.admin {
            InstanceScope::All
        } else if let Some(permissions) = &self.permissions {
            if !permissions.check_permission(&caller.token, &id.to_string(), Rights::READ)? {
                return Err(ServingError::NotFound(id.to_string()));
            }
            InstanceScope::All
        } else {
            InstanceScope::OwnedBy(caller.user_id.clone())
        };
        self.store
            .find_instance(id, &scope)?
            .ok_or_else(|| ServingError::NotFound(id.to_string()))
    }

    /// Owner path: admin rights on the caller are ignored.
    pub fn delete_instance_for_user(
        &self,
        id: Uuid,
        caller: &Caller,
    ) -> Result<DeleteOutcome, ServingError> {
        self.delete_instance_with_perm_handling(id, &caller.without_admin())
    }

    pub fn delete_instances_for_user(&self, ids: &[Uuid], caller: &Caller) -> BatchDeleteOutcome {
        let mut outcome = BatchDeleteOutcome::default();
        for id in ids {
            match self.delete_instance_for_user(*id, caller) {
                Ok(result) if !result.deleted => outcome.not_found.push(*id),
                Ok(result) => {
                    for err in result.errors {
                        warn!(id = %id, error = %err, "instance deleted with errors");
                    }
                    outcome.deleted.push(*id);
                }
                Err(err) => outcome.failed.push((*id, err)),
            }
        }
        outcome
    }

    /// Unified delete: admins bypass ownership, otherwise the permission
    /// service (when enabled) or the owner column decides.
    pub fn delete_instance_with_perm_handling(
        &self,
        id: Uuid,
        caller: &Caller,
    ) -> Result<DeleteOutcome, ServingError> {
        let _guard = self.lock.mutation();
        let Some(instance) = self.authorize_delete(id, caller)? else {
            return Ok(DeleteOutcome::not_found());
        };
        let mut errors = self.remove_instance(&instance)?;
        if let Some(permissions) = &self.permissions {
            let resource = id.to_string();
            if let Err(err) = self.config.retry.run("permissions.remove_resource", |_| {
                permissions.remove_resource(&caller.token, &resource)
            }) {
                warn!(id = %id, error = %err, "permission resource left behind");
                errors.push(ServingError::Permission(err));
            }
        }
        info!(id = %id, user = %caller.user_id, admin = caller.admin, "deleted export instance");
        Ok(DeleteOutcome {
            deleted: true,
            errors,
        })
    }

    /// Re-sends an existing instance's configuration to the driver.
    pub fn republish_instance(&self, instance: &Instance) -> Result<String, ServingError> {
        let mappings = instance.mappings();
        let handle = self
            .config
            .retry
            .run("driver.create_instance", |_| {
                self.driver.create_instance(instance, &mappings)
            })?;
        info!(id = %instance.id, "republished export instance");
        Ok(handle)
    }

    pub fn instances_for_database(&self, database_id: &str) -> Result<Vec<Instance>, ServingError> {
        let query = serving_plane::ListQuery {
            predicates: vec![serving_plane::Predicate::Equals {
                column: "export_database_id",
                value: database_id.to_string(),
            }],
            ..serving_plane::ListQuery::default()
        };
        Ok(self.store.list_instances(&InstanceScope::All, &query)?.items)
    }

    pub fn all_export_databases(&self) -> Result<Vec<ExportDatabase>, ServingError> {
        Ok(self.store.all_export_databases()?)
    }

    /// Runs the driver's filter-topic bootstrap when it has one.
    pub fn init_filter_topics(&self) -> Result<Vec<String>, ServingError> {
        match self.driver.filter_topics() {
            Some(topics) => topics.init_filter_topics(self),
            None => Ok(Vec::new()),
        }
    }

    fn check_source_access(&self, request: &InstanceRequest, token: &str) -> Result<(), ServingError> {
        match self.access.check(request.filter_type, &request.filter, token) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ServingError::AccessDenied(format!(
                "no read access to {} {}",
                request.filter_type, request.filter
            ))),
            Err(err) => Err(ServingError::AccessDenied(err.to_string())),
        }
    }

    pub(crate) fn resolve_export_database(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<ExportDatabase, ServingError> {
        self.store
            .find_export_database(id, Some(user_id))?
            .ok_or_else(|| {
                ServingError::Validation(format!(
                    "export database {id} does not exist or is not accessible"
                ))
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn provision(
        &self,
        id: Uuid,
        application_id: Uuid,
        request: &InstanceRequest,
        owner: &str,
        token: &str,
        created_at: Option<DateTime<Utc>>,
        grant_permission: bool,
    ) -> Result<Instance, ServingError> {
        let resource = id.to_string();
        let mut saga = Saga::new("provision_instance");
        if let (true, Some(permissions)) = (grant_permission, &self.permissions) {
            let grant = ResourcePermissions::owned_by(owner);
            self.config
                .retry
                .run("permissions.set_permission", |_| {
                    permissions.set_permission(token, &resource, &grant)
                })?;
            let resource = resource.clone();
            saga.push("permissions.remove_resource", move || {
                permissions.remove_resource(token, &resource)
            });
        }

        let database = match self.resolve_export_database(&request.export_database_id, owner) {
            Ok(database) => database,
            Err(err) => {
                saga.compensate();
                return Err(err);
            }
        };

        let mut instance = Instance::from_request(id, application_id, request, owner, Utc::now());
        if let Some(created_at) = created_at {
            instance.created_at = created_at;
        }
        instance.export_database = Some(database);
        let mappings = instance.mappings();
        let provisioned = self.config.retry.run("driver.create_instance", |_| {
            self.driver.create_instance(&instance, &mappings)
        });
        match provisioned {
            Ok(handle) => instance.service_handle = handle,
            Err(err) => {
                saga.compensate();
                return Err(ServingError::Provisioning(err));
            }
        }

        let stored = instance.clone();
        saga.push("driver.delete_instance", move || {
            self.config
                .retry
                .run("driver.delete_instance", |_| self.driver.delete_instance(&stored))
        });
        match self.store.insert_instance(&instance) {
            Ok(()) => {
                saga.commit();
                Ok(instance)
            }
            Err(err) => {
                error!(id = %id, error = %err, "persisting instance failed");
                saga.compensate();
                Err(err.into())
            }
        }
    }

    fn authorize_write(&self, id: Uuid, caller: &Caller) -> Result<Instance, ServingError> {
        let scope = if caller.admin {
            InstanceScope::All
        } else if let Some(permissions) = &self.permissions {
            let resource = id.to_string();
            let allowed = permissions.check_permission(&caller.token, &resource, Rights::WRITE)?
                || permissions.check_permission(&caller.token, &resource, Rights::ADMINISTRATE)?;
            if !allowed {
                return Err(ServingError::AccessDenied(format!("no write access to {id}")));
            }
            InstanceScope::All
        } else {
            InstanceScope::OwnedBy(caller.user_id.clone())
        };
        match self.store.find_instance(id, &scope)? {
            Some(instance) => Ok(instance),
            None => Err(self.missing_or_denied(id, "write")?),
        }
    }

    /// `Ok(None)` means there is nothing to delete.
    fn authorize_delete(&self, id: Uuid, caller: &Caller) -> Result<Option<Instance>, ServingError> {
        let scope = if caller.admin {
            InstanceScope::All
        } else if let Some(permissions) = &self.permissions {
            let allowed =
                permissions.check_permission(&caller.token, &id.to_string(), Rights::ADMINISTRATE)?;
            if !allowed {
                return match self.missing_or_denied(id, "administrate")? {
                    ServingError::NotFound(_) => Ok(None),
                    denied => Err(denied),
                };
            }
            InstanceScope::All
        } else {
            InstanceScope::OwnedBy(caller.user_id.clone())
        };
        match self.store.find_instance(id, &scope)? {
            Some(instance) => Ok(Some(instance)),
            None => match self.missing_or_denied(id, "administrate")? {
                ServingError::NotFound(_) => Ok(None),
                denied => Err(denied),
            },
        }
    }

    fn missing_or_denied(&self, id: Uuid, right: &str) -> Result<ServingError, ServingError> {
        if self.store.find_instance(id, &InstanceScope::All)?.is_some() {
            Ok(ServingError::AccessDenied(format!("no {right} access to {id}")))
        } else {
            Ok(ServingError::NotFound(id.to_string()))
        }
    }

    /// Driver delete, row delete and sink purge. Fatal failures leave the row
    /// in place; returned errors happened after the row was gone.
    pub(crate) fn remove_instance(&self, instance: &Instance) -> Result<Vec<ServingError>, ServingError> {
        self.config
            .retry
            .run("driver.delete_instance", |_| self.driver.delete_instance(instance))?;
        self.store.delete_instance(instance.id)?;
        let mut errors = Vec::new();
        let kind = instance
            .export_database
            .as_ref()
            .map(ExportDatabase::sink_kind);
        if let Some(kind) = kind.filter(|kind| kind.requires_force_delete()) {
            if let Some(cleaner) = self.sinks.get(kind) {
                if let Err(err) = self.force_delete_measurement(cleaner.as_ref(), instance) {
                    warn!(id = %instance.id, error = %err, "residual measurement not removed");
                    errors.push(err);
                }
            }
        }
        Ok(errors)
    }

    fn force_delete_measurement(
        &self,
        cleaner: &dyn SinkCleaner,
        instance: &Instance,
    ) -> Result<(), ServingError> {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.config.force_delete.run("sink.force_delete", |_| {
                cleaner.drop_measurement(&instance.database, &instance.measurement)?;
                let remaining = cleaner.list_measurements(&instance.database)?;
                if remaining.iter().any(|name| *name == instance.measurement) {
                    return Err(SinkError::Query(format!(
                        "measurement {} still present",
                        instance.measurement
                    )));
                }
                Ok(())
            })
        }));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ServingError::Sink(err.to_string())),
            Err(panic) => Err(ServingError::Sink(format!(
                "force delete measurement panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}
