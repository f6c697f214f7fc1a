use std::path::Path;
use std::sync::Arc;

use serving_drivers::driver_from_config;
use serving_kernel::{Orchestrator, OrchestratorConfig, ReconcileScheduler, Reconciler};
use serving_plane::{load_from_system_config, SystemConfig, SystemConfigLoader};
use tracing::{info, warn};

use crate::error::AppError;

/// File settings with `SERVING_*` environment overrides applied.
pub fn load_config(path: &Path) -> Result<SystemConfig, AppError> {
    let config = SystemConfigLoader::from_path(path)?;
    Ok(SystemConfigLoader::from_env(config)?)
}

pub fn create_default_config(path: &Path) -> Result<String, AppError> {
    let content = SystemConfigLoader::default_document();
    std::fs::write(path, content.as_bytes())?;
    Ok(content)
}

pub struct ServingRuntime {
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Option<ReconcileScheduler>,
}

impl ServingRuntime {
    pub fn from_config(config: &SystemConfig) -> Result<Self, AppError> {
        let bundle = load_from_system_config(config)?;
        let driver = driver_from_config(config)?;
        let orchestrator = Orchestrator::shared(
            &bundle,
            driver,
            OrchestratorConfig::from_system_config(config),
        );
        let created = orchestrator.init_filter_topics()?;
        if !created.is_empty() {
            info!(topics = ?created, "filter topics initialised");
        }

        let cron = config.get_string("cleanup.cron");
        let scheduler = match (&bundle.permissions, cron.trim().is_empty()) {
            (Some(permissions), false) => {
                let reconciler = Reconciler::new(
                    orchestrator.clone(),
                    permissions.clone(),
                    &bundle.admin_token,
                    config.get_u64("cleanup.page_size") as usize,
                );
                Some(ReconcileScheduler::start(
                    &cron,
                    Arc::new(reconciler),
                    config.get_millis("cleanup.recheck_wait_ms"),
                )?)
            }
            (None, _) => {
                info!("permission subsystem disabled, instance cleanup not scheduled");
                None
            }
            (Some(_), true) => {
                warn!("cleanup.cron is empty, instance cleanup not scheduled");
                None
            }
        };
        Ok(Self {
            orchestrator,
            scheduler,
        })
    }

    pub fn shutdown(self) {
        if let Some(scheduler) = self.scheduler {
            scheduler.stop();
        }
    }
}
