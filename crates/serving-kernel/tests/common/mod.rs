#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serving_kernel::{
    Caller, Driver, DriverError, FilterTopicDriver, Orchestrator, OrchestratorConfig, RetryPolicy,
    Sleeper,
};
use serving_plane::{
    AccessCheckers, ExportDatabase, FieldMappings, FilterType, InMemoryPermissionStore,
    InMemoryServingStore, InMemorySinkCleaner, Instance, InstanceRequest, InstanceScope, ListQuery,
    Page, PermissionStore, ServingPlaneBundle, ServingStore, SinkCleaners, SinkKind, StaticAccessChecker,
    StoreError, Value,
};
use uuid::Uuid;

pub const ADMIN_TOKEN: &str = "admin-token";

#[derive(Default)]
pub struct FakeDriver {
    pub create_attempts: AtomicUsize,
    pub delete_attempts: AtomicUsize,
    pub created: Mutex<Vec<(Uuid, FieldMappings)>>,
    pub deleted: Mutex<Vec<Uuid>>,
    pub fail_creates: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub topics_enabled: AtomicBool,
    pub topics: Mutex<HashSet<String>>,
    pub topic_requests: Mutex<Vec<(String, bool)>>,
}

impl FakeDriver {
    pub fn create_count(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.delete_attempts.load(Ordering::SeqCst)
    }
}

impl Driver for FakeDriver {
    fn create_instance(
        &self,
        instance: &Instance,
        mappings: &FieldMappings,
    ) -> Result<String, DriverError> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(DriverError::Backend("create refused".to_string()));
        }
        self.created.lock().push((instance.id, mappings.clone()));
        Ok(format!("handle-{}", instance.id))
    }

    fn delete_instance(&self, instance: &Instance) -> Result<(), DriverError> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(DriverError::Backend("delete refused".to_string()));
        }
        self.deleted.lock().push(instance.id);
        Ok(())
    }

    fn filter_topics(&self) -> Option<&dyn FilterTopicDriver> {
        if self.topics_enabled.load(Ordering::SeqCst) {
            Some(self)
        } else {
            None
        }
    }
}

impl FilterTopicDriver for FakeDriver {
    fn create_filter_topic(&self, topic: &str, check_exists: bool) -> Result<(), DriverError> {
        self.topic_requests.lock().push((topic.to_string(), check_exists));
        self.topics.lock().insert(topic.to_string());
        Ok(())
    }

    fn existing_topics(&self) -> Result<HashSet<String>, DriverError> {
        Ok(self.topics.lock().clone())
    }
}

/// Records requested sleeps and runs queued hooks instead of sleeping.
#[derive(Default)]
pub struct HookSleeper {
    pub sleeps: Mutex<Vec<Duration>>,
    hooks: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
}

impl HookSleeper {
    pub fn on_next_sleep(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().push_back(Box::new(hook));
    }

    pub fn count(&self) -> usize {
        self.sleeps.lock().len()
    }
}

impl Sleeper for HookSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        let hook = self.hooks.lock().pop_front();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Delegates to an in-memory store; instance inserts can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryServingStore,
    pub fail_inserts: AtomicBool,
}

impl ServingStore for FlakyStore {
    fn insert_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Store("disk full".to_string()));
        }
        self.inner.insert_instance(instance)
    }

    fn find_instance(&self, id: Uuid, scope: &InstanceScope) -> Result<Option<Instance>, StoreError> {
        self.inner.find_instance(id, scope)
    }

    fn list_instances(
        &self,
        scope: &InstanceScope,
        query: &ListQuery,
    ) -> Result<Page<Instance>, StoreError> {
        self.inner.list_instances(scope, query)
    }

    fn delete_instance(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_instance(id)
    }

    fn existing_instance_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        self.inner.existing_instance_ids(ids)
    }

    fn instance_ids(&self, limit: usize, offset: usize) -> Result<Vec<String>, StoreError> {
        self.inner.instance_ids(limit, offset)
    }

    fn insert_export_database(&self, database: &ExportDatabase) -> Result<(), StoreError> {
        self.inner.insert_export_database(database)
    }

    fn find_export_database(
        &self,
        id: &str,
        visible_to: Option<&str>,
    ) -> Result<Option<ExportDatabase>, StoreError> {
        self.inner.find_export_database(id, visible_to)
    }

    fn list_export_databases(
        &self,
        user_id: &str,
        query: &ListQuery,
    ) -> Result<Page<ExportDatabase>, StoreError> {
        self.inner.list_export_databases(user_id, query)
    }

    fn all_export_databases(&self) -> Result<Vec<ExportDatabase>, StoreError> {
        self.inner.all_export_databases()
    }
}

pub struct Fixture {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<FlakyStore>,
    pub permissions: Arc<InMemoryPermissionStore>,
    pub driver: Arc<FakeDriver>,
    pub sinks: Arc<InMemorySinkCleaner>,
    pub access: Arc<StaticAccessChecker>,
    pub sleeper: Arc<HookSleeper>,
}

pub struct FixtureOptions {
    pub permissions: bool,
    pub open_access: bool,
    pub id_prefix: String,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            permissions: false,
            open_access: true,
            id_prefix: String::new(),
        }
    }
}

pub fn fixture() -> Fixture {
    fixture_with(FixtureOptions::default())
}

pub fn fixture_with_permissions() -> Fixture {
    fixture_with(FixtureOptions {
        permissions: true,
        ..FixtureOptions::default()
    })
}

pub fn fixture_with(options: FixtureOptions) -> Fixture {
    let store = Arc::new(FlakyStore::default());
    let permissions = InMemoryPermissionStore::shared();
    permissions.register_user("alice-token", "alice");
    permissions.register_user("bob-token", "bob");
    permissions.register_admin(ADMIN_TOKEN, "admin");
    let driver = Arc::new(FakeDriver::default());
    let sinks = InMemorySinkCleaner::shared();
    let access = if options.open_access {
        StaticAccessChecker::allow_all()
    } else {
        StaticAccessChecker::shared()
    };
    let sleeper = Arc::new(HookSleeper::default());

    let enabled: Option<Arc<dyn PermissionStore>> = if options.permissions {
        Some(permissions.clone())
    } else {
        None
    };
    let bundle = ServingPlaneBundle {
        store: store.clone(),
        permissions: enabled,
        access: AccessCheckers::uniform(access.clone()),
        sinks: SinkCleaners::new().with(SinkKind::InfluxDb, sinks.clone()),
        admin_token: ADMIN_TOKEN.to_string(),
    };
    let config = OrchestratorConfig {
        retry: RetryPolicy::new(3, Duration::from_millis(50)).with_sleeper(sleeper.clone()),
        force_delete: RetryPolicy::new(4, Duration::ZERO).with_sleeper(sleeper.clone()),
        export_database_id_prefix: options.id_prefix,
    };
    let orchestrator = Orchestrator::shared(&bundle, driver.clone(), config);
    Fixture {
        orchestrator,
        store,
        permissions,
        driver,
        sinks,
        access,
        sleeper,
    }
}

pub fn alice() -> Caller {
    Caller::user("alice", "alice-token")
}

pub fn bob() -> Caller {
    Caller::user("bob", "bob-token")
}

pub fn admin() -> Caller {
    Caller::admin("admin", ADMIN_TOKEN)
}

pub fn export_database(id: &str, owner: &str, public: bool, db_type: &str) -> ExportDatabase {
    ExportDatabase {
        id: id.to_string(),
        name: format!("database {id}"),
        description: String::new(),
        db_type: db_type.to_string(),
        deployment: "external".to_string(),
        url: "http://sink:8086".to_string(),
        ew_filter_topic: format!("filter-{db_type}"),
        public,
        user_id: owner.to_string(),
    }
}

pub fn seed_database(fixture: &Fixture, id: &str, owner: &str, public: bool) -> ExportDatabase {
    let database = export_database(id, owner, public, "influxdb");
    fixture
        .store
        .insert_export_database(&database)
        .expect("seed database");
    database
}

pub fn request(database_id: &str) -> InstanceRequest {
    InstanceRequest {
        name: "weather".to_string(),
        description: "weather station export".to_string(),
        entity_name: "station".to_string(),
        service_name: "getWeather".to_string(),
        topic: "urn_infai_ses_service_weather".to_string(),
        filter: "device-1".to_string(),
        filter_type: FilterType::Device,
        time_path: "value.time".to_string(),
        values: vec![
            Value {
                name: "temperature".to_string(),
                value_type: "float".to_string(),
                path: "value.temperature".to_string(),
                tag: false,
            },
            Value {
                name: "station".to_string(),
                value_type: "string".to_string(),
                path: "value.station".to_string(),
                tag: true,
            },
        ],
        export_database_id: database_id.to_string(),
        offset: "largest".to_string(),
        ..InstanceRequest::default()
    }
}

/// Writes a row directly, bypassing the orchestrator.
pub fn seed_row(fixture: &Fixture, id: Uuid, owner: &str, database_id: &str) -> Instance {
    let instance = Instance::from_request(id, Uuid::new_v4(), &request(database_id), owner, Utc::now());
    fixture.store.insert_instance(&instance).expect("seed row");
    instance
}
