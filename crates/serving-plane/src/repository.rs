use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{ExportDatabase, Instance, Page};
use crate::query::{ListQuery, QueryError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Store(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Row visibility applied before any listing predicate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceScope {
    All,
    OwnedBy(String),
    Ids(Vec<Uuid>),
}

impl InstanceScope {
    pub fn admits(&self, instance: &Instance) -> bool {
        match self {
            InstanceScope::All => true,
            InstanceScope::OwnedBy(user_id) => instance.user_id == *user_id,
            InstanceScope::Ids(ids) => ids.contains(&instance.id),
        }
    }
}

pub trait ServingStore: Send + Sync {
    /// Persists an instance with its values. The referenced export database
    /// must exist, otherwise `StoreError::Constraint` is returned.
    fn insert_instance(&self, instance: &Instance) -> Result<(), StoreError>;
    /// Loads an instance with values and export database attached.
    fn find_instance(&self, id: Uuid, scope: &InstanceScope) -> Result<Option<Instance>, StoreError>;
    fn list_instances(
        &self,
        scope: &InstanceScope,
        query: &ListQuery,
    ) -> Result<Page<Instance>, StoreError>;
    fn delete_instance(&self, id: Uuid) -> Result<bool, StoreError>;
    fn existing_instance_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError>;
    fn instance_ids(&self, limit: usize, offset: usize) -> Result<Vec<String>, StoreError>;
    fn insert_export_database(&self, database: &ExportDatabase) -> Result<(), StoreError>;
    /// `visible_to` restricts the lookup to databases owned by that user or public.
    fn find_export_database(
        &self,
        id: &str,
        visible_to: Option<&str>,
    ) -> Result<Option<ExportDatabase>, StoreError>;
    fn list_export_databases(
        &self,
        user_id: &str,
        query: &ListQuery,
    ) -> Result<Page<ExportDatabase>, StoreError>;
    fn all_export_databases(&self) -> Result<Vec<ExportDatabase>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    instances: HashMap<Uuid, Instance>,
    databases: HashMap<String, ExportDatabase>,
}

#[derive(Clone, Default)]
pub struct InMemoryServingStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryServingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn instance_count(&self) -> usize {
        self.state.read().instances.len()
    }
}

impl ServingStore for InMemoryServingStore {
    fn insert_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if !state.databases.contains_key(&instance.export_database_id) {
            return Err(StoreError::Constraint(format!(
                "unknown export database {}",
                instance.export_database_id
            )));
        }
        if state.instances.contains_key(&instance.id) {
            return Err(StoreError::Constraint(format!("duplicate instance {}", instance.id)));
        }
        let mut stored = instance.clone();
        stored.export_database = None;
        state.instances.insert(instance.id, stored);
        Ok(())
    }

    fn find_instance(&self, id: Uuid, scope: &InstanceScope) -> Result<Option<Instance>, StoreError> {
        let state = self.state.read();
        Ok(state
            .instances
            .get(&id)
            .filter(|instance| scope.admits(instance))
            .map(|instance| attach_database(instance, &state.databases)))
    }

    fn list_instances(
        &self,
        scope: &InstanceScope,
        query: &ListQuery,
    ) -> Result<Page<Instance>, StoreError> {
        let state = self.state.read();
        let mut items: Vec<Instance> = state
            .instances
            .values()
            .filter(|instance| scope.admits(instance))
            .filter(|instance| query.matches_instance(instance, &state.databases))
            .map(|instance| attach_database(instance, &state.databases))
            .collect();
        let total = items.len() as u64;
        query.sort_instances(&mut items);
        Ok(Page {
            items: query.paginate(items),
            total,
        })
    }

    fn delete_instance(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state.write().instances.remove(&id).is_some())
    }

    fn existing_instance_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter(|id| {
                Uuid::parse_str(id)
                    .map(|parsed| state.instances.contains_key(&parsed))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    fn instance_ids(&self, limit: usize, offset: usize) -> Result<Vec<String>, StoreError> {
        let state = self.state.read();
        let mut ids: Vec<Uuid> = state.instances.keys().copied().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|id| id.to_string())
            .collect())
    }

    fn insert_export_database(&self, database: &ExportDatabase) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.databases.contains_key(&database.id) {
            return Err(StoreError::Constraint(format!(
                "duplicate export database {}",
                database.id
            )));
        }
        state.databases.insert(database.id.clone(), database.clone());
        Ok(())
    }

    fn find_export_database(
        &self,
        id: &str,
        visible_to: Option<&str>,
    ) -> Result<Option<ExportDatabase>, StoreError> {
        let state = self.state.read();
        Ok(state
            .databases
            .get(id)
            .filter(|db| visible_to.map(|user| db.visible_to(user)).unwrap_or(true))
            .cloned())
    }

    fn list_export_databases(
        &self,
        user_id: &str,
        query: &ListQuery,
    ) -> Result<Page<ExportDatabase>, StoreError> {
        let state = self.state.read();
        let mut items: Vec<ExportDatabase> = state
            .databases
            .values()
            .filter(|db| db.visible_to(user_id))
            .filter(|db| query.matches_export_database(db))
            .cloned()
            .collect();
        let total = items.len() as u64;
        query.sort_export_databases(&mut items);
        Ok(Page {
            items: query.paginate(items),
            total,
        })
    }

    fn all_export_databases(&self) -> Result<Vec<ExportDatabase>, StoreError> {
        let mut items: Vec<ExportDatabase> = self.state.read().databases.values().cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }
}

fn attach_database(instance: &Instance, databases: &HashMap<String, ExportDatabase>) -> Instance {
    let mut instance = instance.clone();
    instance.export_database = databases.get(&instance.export_database_id).cloned();
    instance
}
