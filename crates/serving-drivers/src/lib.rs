use std::sync::Arc;
use std::time::Duration;

mod broker;
mod container;
mod export_worker;

pub use broker::{InMemoryTopicBroker, PublishedRecord, RestProxyBroker, TopicBroker, TopicSpec};
pub use container::{workload_environment, workload_name, ContainerDriver, ContainerSettings};
pub use export_worker::{
    delete_message, put_message, shorten_id, ExportArgs, ExportWorkerDriver, Filter, Identifier,
    InfluxExportArgs, Message, TimescaleExportArgs, FILTER_TOPIC_CONFIGS, METHOD_DELETE,
    METHOD_PUT,
};

use serving_kernel::{Driver, DriverError};
use serving_plane::SystemConfig;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DriverKind {
    ExportWorker,
    Container,
}

impl DriverKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "export-worker" | "ew" => Some(DriverKind::ExportWorker),
            "container" | "rancher2" => Some(DriverKind::Container),
            _ => None,
        }
    }
}

/// Builds the driver selected by `driver.kind`.
pub fn driver_from_config(config: &SystemConfig) -> Result<Arc<dyn Driver>, DriverError> {
    let kind = config.get_string("driver.kind");
    let timeout = config.get_millis("access.timeout_ms").max(Duration::from_millis(1));
    match DriverKind::parse(&kind) {
        Some(DriverKind::ExportWorker) => {
            let replication = u16::try_from(config.get_u64("kafka.replication_factor")).unwrap_or(u16::MAX);
            let rest_url = config.get_string("kafka.rest_url");
            let broker: Arc<dyn TopicBroker> = if rest_url.trim().is_empty() {
                warn!("no kafka rest proxy configured, publishing to an in-memory broker");
                InMemoryTopicBroker::shared()
            } else {
                Arc::new(RestProxyBroker::new(
                    &rest_url,
                    &config.get_string("kafka.cluster_id"),
                    timeout,
                )?)
            };
            info!(driver = "export-worker", "driver selected");
            Ok(Arc::new(ExportWorkerDriver::new(broker, replication)))
        }
        Some(DriverKind::Container) => {
            let settings = ContainerSettings {
                url: config.get_string("container.url"),
                access_key: config.get_string("container.access_key"),
                secret_key: config.get_string("container.secret_key"),
                project_id: config.get_string("container.project_id"),
                namespace_id: config.get_string("container.namespace_id"),
                image: config.get_string("container.image"),
                kafka_bootstrap: config.get_string("kafka.bootstrap"),
                influx_url: config.get_string("influx.url"),
                influx_user: config.get_string("influx.user"),
                influx_password: config.get_string("influx.password"),
            };
            info!(driver = "container", "driver selected");
            Ok(Arc::new(ContainerDriver::new(settings, timeout)?))
        }
        None => Err(DriverError::Config(format!("unknown driver kind {kind:?}"))),
    }
}
