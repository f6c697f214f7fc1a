#[derive(Clone, Debug)]
pub struct StaticConfigItem {
    pub key: &'static str,
    pub description: &'static str,
    pub value_type: &'static str,
    pub default_value: &'static str,
}

impl StaticConfigItem {
    /// `driver.retry_attempts` -> `SERVING_DRIVER_RETRY_ATTEMPTS`
    pub fn env_var(&self) -> String {
        format!("SERVING_{}", self.key.replace('.', "_").to_uppercase())
    }
}

pub static STATIC_CONFIG_TABLE: &[StaticConfigItem] = &[
    StaticConfigItem {
        key: "storage.dsn",
        description: "Primary database connection string",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "storage.sqlite_path",
        description: "SQLite database path (used when storage.dsn is empty)",
        value_type: "string",
        default_value: "serving.sqlite",
    },
    StaticConfigItem {
        key: "driver.kind",
        description: "Provisioning driver: export-worker or container",
        value_type: "string",
        default_value: "export-worker",
    },
    StaticConfigItem {
        key: "driver.retry_attempts",
        description: "Attempts for driver and permission calls",
        value_type: "number",
        default_value: "5",
    },
    StaticConfigItem {
        key: "driver.retry_delay_ms",
        description: "Fixed delay between attempts in milliseconds",
        value_type: "number",
        default_value: "5000",
    },
    StaticConfigItem {
        key: "kafka.rest_url",
        description: "Kafka REST proxy base URL for filter topics",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "kafka.cluster_id",
        description: "Kafka cluster id on the REST proxy (discovered when empty)",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "kafka.bootstrap",
        description: "Kafka bootstrap servers handed to container workloads",
        value_type: "string",
        default_value: "localhost:9092",
    },
    StaticConfigItem {
        key: "kafka.replication_factor",
        description: "Replication factor for created filter topics",
        value_type: "number",
        default_value: "2",
    },
    StaticConfigItem {
        key: "container.url",
        description: "Container orchestrator API base URL",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "container.access_key",
        description: "Container orchestrator access key",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "container.secret_key",
        description: "Container orchestrator secret key",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "container.project_id",
        description: "Project that owns export workloads",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "container.namespace_id",
        description: "Namespace for export workloads",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "container.image",
        description: "Export worker image",
        value_type: "string",
        default_value: "kafka-influx:unstable",
    },
    StaticConfigItem {
        key: "permissions.url",
        description: "Permission service URL (empty disables, mock uses in-memory)",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "permissions.topic",
        description: "Permission topic holding export instance resources",
        value_type: "string",
        default_value: "export-instances",
    },
    StaticConfigItem {
        key: "permissions.admin_token",
        description: "Administrative token used by the reconciler",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "access.device_url",
        description: "Device permission query endpoint (empty allows all)",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "access.pipeline_url",
        description: "Pipeline registry endpoint (empty allows all)",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "access.import_url",
        description: "Import deployment endpoint (empty allows all)",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "access.timeout_ms",
        description: "Timeout for collaborator HTTP calls in milliseconds",
        value_type: "number",
        default_value: "10000",
    },
    StaticConfigItem {
        key: "influx.url",
        description: "InfluxDB base URL (empty disables measurement cleanup)",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "influx.user",
        description: "InfluxDB user",
        value_type: "string",
        default_value: "root",
    },
    StaticConfigItem {
        key: "influx.password",
        description: "InfluxDB password",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "sink.force_delete_attempts",
        description: "Upper bound of drop/recheck rounds for residual measurements",
        value_type: "number",
        default_value: "10",
    },
    StaticConfigItem {
        key: "cleanup.cron",
        description: "Reconciler schedule (empty disables)",
        value_type: "string",
        default_value: "0 1 * * *",
    },
    StaticConfigItem {
        key: "cleanup.recheck_wait_ms",
        description: "Debounce before repairing reconciliation candidates",
        value_type: "number",
        default_value: "10000",
    },
    StaticConfigItem {
        key: "cleanup.page_size",
        description: "Ids per reconciler page",
        value_type: "number",
        default_value: "100",
    },
    StaticConfigItem {
        key: "export_database.id_prefix",
        description: "Prefix for generated export database ids",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "log.level",
        description: "Log filter used when RUST_LOG is unset",
        value_type: "string",
        default_value: "info",
    },
];
