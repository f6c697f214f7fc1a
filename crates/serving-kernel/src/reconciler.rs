use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serving_plane::{InstanceScope, ListOptions, PermissionStore, ResourcePermissions, Rights};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ServingError;
use crate::orchestrator::{Caller, Orchestrator};
use crate::retry::Sleeper;

const RECONCILER_USER: &str = "reconciler";

/// What one cleanup pass changed. `transient` lists candidates that resolved
/// themselves during the recheck wait.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReconcileReport {
    pub removed_permissions: Vec<String>,
    pub restored_permissions: Vec<String>,
    pub deleted_instances: Vec<String>,
    pub transient: Vec<String>,
}

impl ReconcileReport {
    pub fn repairs(&self) -> usize {
        self.removed_permissions.len() + self.restored_permissions.len() + self.deleted_instances.len()
    }
}

/// Keeps instance rows and permission resources in one-to-one correspondence.
pub struct Reconciler {
    orchestrator: Arc<Orchestrator>,
    permissions: Arc<dyn PermissionStore>,
    admin_token: String,
    page_size: usize,
    sleeper: Arc<dyn Sleeper>,
}

impl Reconciler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        permissions: Arc<dyn PermissionStore>,
        admin_token: &str,
        page_size: usize,
    ) -> Self {
        let sleeper = orchestrator.config().retry.sleeper();
        Self {
            orchestrator,
            permissions,
            admin_token: admin_token.to_string(),
            page_size: page_size.max(1),
            sleeper,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// One full pass. The first store or permission failure aborts the pass.
    pub fn run(&self, recheck_wait: Duration) -> Result<ReconcileReport, ServingError> {
        let candidates = self.collect_candidates()?;
        let mut report = ReconcileReport::default();
        if candidates.is_empty() {
            debug!("instances and permissions are consistent");
            return Ok(report);
        }
        info!(
            candidates = candidates.len(),
            wait_ms = recheck_wait.as_millis() as u64,
            "rechecking inconsistent ids"
        );
        self.sleeper.sleep(recheck_wait);

        let with_permission: HashSet<String> = self
            .permissions
            .check_multiple_permissions(&self.admin_token, &candidates, Rights::READ)?
            .into_keys()
            .collect();
        let with_row = self.orchestrator.store.existing_instance_ids(&candidates)?;
        for id in candidates {
            match (with_permission.contains(&id), with_row.contains(&id)) {
                (true, false) => {
                    self.permissions.remove_resource(&self.admin_token, &id)?;
                    info!(id = %id, "removed permission resource without instance");
                    report.removed_permissions.push(id);
                }
                (false, true) => self.repair_instance(id, &mut report)?,
                _ => {
                    debug!(id = %id, "inconsistency resolved during recheck wait");
                    report.transient.push(id);
                }
            }
        }
        info!(
            removed_permissions = report.removed_permissions.len(),
            restored_permissions = report.restored_permissions.len(),
            deleted_instances = report.deleted_instances.len(),
            "cleanup pass finished"
        );
        Ok(report)
    }

    /// Phase one: ids present on only one side. Each page is checked under the
    /// exclusive coordination lock.
    fn collect_candidates(&self) -> Result<Vec<String>, ServingError> {
        let mut known_permissions: HashSet<String> = HashSet::new();
        let mut candidates: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let page_size = self.page_size as u64;

        let mut offset = 0u64;
        loop {
            let _guard = self.orchestrator.lock().snapshot();
            let page = self
                .permissions
                .admin_list_resource_ids(&self.admin_token, ListOptions::page(page_size, offset))?;
            let existing = self.orchestrator.store.existing_instance_ids(&page)?;
            for id in &page {
                if !existing.contains(id) && seen.insert(id.clone()) {
                    candidates.push(id.clone());
                }
            }
            let done = (page.len() as u64) < page_size;
            known_permissions.extend(page);
            if done {
                break;
            }
            offset += page_size;
        }

        let mut offset = 0usize;
        loop {
            let _guard = self.orchestrator.lock().snapshot();
            let page = self.orchestrator.store.instance_ids(self.page_size, offset)?;
            for id in &page {
                if !known_permissions.contains(id) && seen.insert(id.clone()) {
                    candidates.push(id.clone());
                }
            }
            if page.len() < self.page_size {
                break;
            }
            offset += self.page_size;
        }
        Ok(candidates)
    }

    fn repair_instance(&self, id: String, report: &mut ReconcileReport) -> Result<(), ServingError> {
        let parsed = Uuid::parse_str(&id).map_err(|err| ServingError::Validation(err.to_string()))?;
        let Some(instance) = self
            .orchestrator
            .store
            .find_instance(parsed, &InstanceScope::All)?
        else {
            report.transient.push(id);
            return Ok(());
        };
        if instance.user_id.is_empty() {
            let caller = Caller::admin(RECONCILER_USER, &self.admin_token);
            let outcome = self.orchestrator.delete_instance_with_perm_handling(parsed, &caller)?;
            for err in &outcome.errors {
                warn!(id = %id, error = %err, "orphaned instance deleted with errors");
            }
            info!(id = %id, "deleted instance without owner");
            report.deleted_instances.push(id);
        } else {
            self.permissions.set_permission(
                &self.admin_token,
                &id,
                &ResourcePermissions::owned_by(&instance.user_id),
            )?;
            info!(id = %id, owner = %instance.user_id, "restored permission resource");
            report.restored_permissions.push(id);
        }
        Ok(())
    }
}
