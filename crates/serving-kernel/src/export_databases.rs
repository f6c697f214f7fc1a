use serving_plane::{
    ExportDatabase, ExportDatabaseRequest, ListArgs, ListEntity, ListQuery, Page,
};
use tracing::info;
use uuid::Uuid;

use crate::error::ServingError;
use crate::orchestrator::{Caller, Orchestrator};

impl Orchestrator {
    pub fn create_export_database(
        &self,
        request: &ExportDatabaseRequest,
        caller: &Caller,
    ) -> Result<ExportDatabase, ServingError> {
        if request.name.trim().is_empty() {
            return Err(ServingError::Validation("export database name is required".into()));
        }
        if request.db_type.trim().is_empty() {
            return Err(ServingError::Validation("export database type is required".into()));
        }
        let database = ExportDatabase {
            id: format!("{}{}", self.config.export_database_id_prefix, Uuid::new_v4()),
            name: request.name.clone(),
            description: request.description.clone(),
            db_type: request.db_type.clone(),
            deployment: request.deployment.clone(),
            url: request.url.clone(),
            ew_filter_topic: request.ew_filter_topic.clone(),
            public: request.public,
            user_id: caller.user_id.clone(),
        };
        if let Some(topics) = self.driver.filter_topics() {
            if !database.ew_filter_topic.is_empty() {
                self.config.retry.run("driver.create_filter_topic", |_| {
                    topics.create_filter_topic(&database.ew_filter_topic, true)
                })?;
            }
        }
        self.store.insert_export_database(&database)?;
        info!(id = %database.id, user = %caller.user_id, "created export database");
        Ok(database)
    }

    /// Admins see every database; others see their own and public ones.
    pub fn get_export_database(
        &self,
        id: &str,
        caller: &Caller,
    ) -> Result<ExportDatabase, ServingError> {
        let visible_to = (!caller.admin).then_some(caller.user_id.as_str());
        self.store
            .find_export_database(id, visible_to)?
            .ok_or_else(|| ServingError::NotFound(id.to_string()))
    }

    pub fn list_export_databases(
        &self,
        caller: &Caller,
        args: &ListArgs,
    ) -> Result<Page<ExportDatabase>, ServingError> {
        let query = ListQuery::parse(ListEntity::ExportDatabases, args, &caller.user_id)?;
        Ok(self.store.list_export_databases(&caller.user_id, &query)?)
    }
}
