use std::collections::HashSet;

use serving_plane::{FieldMappings, Instance};
use thiserror::Error;
use tracing::info;

use crate::error::ServingError;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver transport error: {0}")]
    Transport(String),
    #[error("driver backend returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("driver encode error: {0}")]
    Encode(String),
    #[error("driver misconfigured: {0}")]
    Config(String),
    #[error("driver error: {0}")]
    Backend(String),
}

/// Provisions and removes the worker that exports an instance's data.
pub trait Driver: Send + Sync {
    /// Returns an opaque backend handle for the provisioned worker.
    fn create_instance(
        &self,
        instance: &Instance,
        mappings: &FieldMappings,
    ) -> Result<String, DriverError>;

    fn delete_instance(&self, instance: &Instance) -> Result<(), DriverError>;

    fn filter_topics(&self) -> Option<&dyn FilterTopicDriver> {
        None
    }
}

/// Drivers that deliver configuration through per-database filter topics.
pub trait FilterTopicDriver: Send + Sync {
    fn create_filter_topic(&self, topic: &str, check_exists: bool) -> Result<(), DriverError>;

    fn existing_topics(&self) -> Result<HashSet<String>, DriverError>;

    /// Creates every missing filter topic referenced by an export database and
    /// republishes the instances of those databases. Returns the created topics.
    fn init_filter_topics(&self, orchestrator: &Orchestrator) -> Result<Vec<String>, ServingError> {
        let existing = self.existing_topics()?;
        let mut created: Vec<String> = Vec::new();
        for database in orchestrator.all_export_databases()? {
            let topic = database.ew_filter_topic.as_str();
            if topic.is_empty() || existing.contains(topic) {
                continue;
            }
            if !created.iter().any(|name| name == topic) {
                self.create_filter_topic(topic, false)?;
                info!(topic, "created filter topic");
                created.push(topic.to_string());
            }
            for instance in orchestrator.instances_for_database(&database.id)? {
                orchestrator.republish_instance(&instance)?;
            }
        }
        Ok(created)
    }
}
