use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::Serialize;
use serving_kernel::{Driver, DriverError, FilterTopicDriver};
use serving_plane::{FieldMappings, FilterType, Instance, SinkKind};
use tracing::info;

use crate::broker::TopicBroker;

pub const METHOD_PUT: &str = "put";
pub const METHOD_DELETE: &str = "delete";
const MAPPING_DATA: &str = ":data";
const MAPPING_EXTRA: &str = ":extra";
const INFLUX_TIME_KEY: &str = "time";

/// Settings for newly created filter topics: a single compacted partition
/// that never expires.
pub const FILTER_TOPIC_CONFIGS: &[(&str, &str)] = &[
    ("retention.ms", "-1"),
    ("retention.bytes", "-1"),
    ("cleanup.policy", "compact"),
    ("delete.retention.ms", "86400000"),
    ("segment.ms", "604800000"),
    ("min.cleanable.dirty.ratio", "0.1"),
];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
    pub method: String,
    pub payload: Filter,
    pub timestamp: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<Identifier>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub mappings: BTreeMap<String, String>,
    pub export_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_args: Option<ExportArgs>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Identifier {
    pub key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,
}

impl Identifier {
    fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExportArgs {
    Influx(InfluxExportArgs),
    Timescale(TimescaleExportArgs),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InfluxExportArgs {
    pub db_name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub type_casts: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub time_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub time_precision: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TimescaleExportArgs {
    pub table_name: String,
    pub table_columns: Vec<[String; 3]>,
    pub time_column: String,
    pub time_format: String,
}

/// Builds the `put` message describing an instance.
pub fn put_message(
    instance: &Instance,
    mappings: &FieldMappings,
    timestamp: i64,
) -> Result<Message, DriverError> {
    let data = parse_fields(&mappings.data)?;
    let tags = parse_fields(&mappings.tags)?;
    let mut filter = Filter {
        source: instance.topic.clone(),
        identifiers: identifiers(instance)?,
        mappings: BTreeMap::new(),
        export_id: instance.id.to_string(),
        export_args: None,
    };
    add_mappings(&mut filter.mappings, &data, MAPPING_DATA);
    add_mappings(&mut filter.mappings, &tags, MAPPING_EXTRA);

    let kind = instance
        .export_database
        .as_ref()
        .map(|database| database.sink_kind());
    filter.export_args = Some(match kind {
        Some(SinkKind::InfluxDb) => {
            if !instance.time_path.is_empty() {
                filter.mappings.insert(
                    format!("{INFLUX_TIME_KEY}{MAPPING_EXTRA}"),
                    instance.time_path.clone(),
                );
            }
            ExportArgs::Influx(influx_args(instance, &data, &tags)?)
        }
        Some(SinkKind::TimescaleDb) => {
            let time_column = time_column(&instance.time_path)?;
            filter.mappings.insert(
                format!("{time_column}{MAPPING_DATA}"),
                instance.time_path.clone(),
            );
            ExportArgs::Timescale(timescale_args(instance, time_column, &data)?)
        }
        _ => {
            return Err(DriverError::Config(
                "unknown or missing database type".to_string(),
            ))
        }
    });
    Ok(Message {
        method: METHOD_PUT.to_string(),
        payload: filter,
        timestamp,
    })
}

pub fn delete_message(instance: &Instance, timestamp: i64) -> Message {
    Message {
        method: METHOD_DELETE.to_string(),
        payload: Filter {
            export_id: instance.id.to_string(),
            ..Filter::default()
        },
        timestamp,
    }
}

/// Strips any `prefix:` and dashes from an id and re-encodes its hex digits as
/// unpadded URL-safe base64.
pub fn shorten_id(long_id: &str) -> Result<String, DriverError> {
    let last = long_id.rsplit(':').next().unwrap_or(long_id);
    let bytes = hex::decode(last.replace('-', ""))
        .map_err(|err| DriverError::Encode(format!("id {long_id} is not hex: {err}")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn identifiers(instance: &Instance) -> Result<Vec<Identifier>, DriverError> {
    match instance.filter_type {
        FilterType::Device => Ok(vec![
            Identifier::new("device_id", &instance.filter),
            Identifier::new("service_id", &instance.topic.replace('_', ":")),
        ]),
        FilterType::Operator => {
            let (pipeline, operator) = instance.filter.split_once(':').ok_or_else(|| {
                DriverError::Encode(format!(
                    "operator filter {} must be pipeline:operator",
                    instance.filter
                ))
            })?;
            Ok(vec![
                Identifier::new("pipeline_id", pipeline),
                Identifier::new("operator_id", operator),
            ])
        }
        FilterType::Import => Ok(vec![Identifier::new("import_id", &instance.filter)]),
    }
}

fn parse_fields(raw: &str) -> Result<BTreeMap<String, String>, DriverError> {
    if raw.is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(raw).map_err(|err| DriverError::Encode(err.to_string()))
}

/// Splits a `name:type` field key.
fn field_parts(key: &str) -> (&str, &str) {
    key.split_once(':').unwrap_or((key, ""))
}

fn add_mappings(
    mappings: &mut BTreeMap<String, String>,
    fields: &BTreeMap<String, String>,
    suffix: &str,
) {
    for (key, path) in fields {
        let (name, _) = field_parts(key);
        mappings.insert(format!("{name}{suffix}"), path.clone());
    }
}

fn influx_cast(value_type: &str) -> Option<&'static str> {
    match value_type {
        "string" => Some(":string"),
        "float" => Some(":number"),
        "int" => Some(":integer"),
        "bool" => Some(":boolean"),
        "string_json" => Some("object:string"),
        _ => None,
    }
}

fn influx_args(
    instance: &Instance,
    data: &BTreeMap<String, String>,
    tags: &BTreeMap<String, String>,
) -> Result<InfluxExportArgs, DriverError> {
    let mut type_casts = BTreeMap::new();
    for key in data.keys().chain(tags.keys()) {
        let (name, value_type) = field_parts(key);
        let cast = influx_cast(value_type).ok_or_else(|| {
            DriverError::Encode(format!("unsupported value type {value_type:?} for {name}"))
        })?;
        type_casts.insert(name.to_string(), cast.to_string());
    }
    Ok(InfluxExportArgs {
        db_name: instance.database.clone(),
        type_casts,
        time_key: if instance.time_path.is_empty() {
            String::new()
        } else {
            INFLUX_TIME_KEY.to_string()
        },
        time_precision: instance.time_precision.clone().unwrap_or_default(),
    })
}

fn time_column(time_path: &str) -> Result<&str, DriverError> {
    if time_path.is_empty() {
        return Err(DriverError::Encode(
            "column containing timestamps required".to_string(),
        ));
    }
    Ok(time_path.rsplit('.').next().unwrap_or(time_path))
}

fn timescale_column(value_type: &str) -> Option<(&'static str, &'static str)> {
    match value_type {
        "string" => Some(("text", "NULL")),
        "float" => Some(("double", "PRECISION NULL")),
        "int" => Some(("bigint", "NULL")),
        "bool" => Some(("bool", "NULL")),
        _ => None,
    }
}

fn timescale_args(
    instance: &Instance,
    time_column: &str,
    data: &BTreeMap<String, String>,
) -> Result<TimescaleExportArgs, DriverError> {
    if instance.timestamp_format.is_empty() {
        return Err(DriverError::Encode("timestamp format required".to_string()));
    }
    let table_name = format!(
        "userid:{}_export:{}",
        shorten_id(&instance.database)?,
        shorten_id(&instance.id.to_string())?
    );
    let mut table_columns = Vec::new();
    if !data.is_empty() {
        table_columns.push([
            time_column.to_string(),
            "TIMESTAMP".to_string(),
            "NOT NULL".to_string(),
        ]);
        for key in data.keys() {
            let (name, value_type) = field_parts(key);
            let (column_type, constraint) = timescale_column(value_type).ok_or_else(|| {
                DriverError::Encode(format!("unsupported column type {value_type:?} for {name}"))
            })?;
            table_columns.push([
                name.to_string(),
                column_type.to_string(),
                constraint.to_string(),
            ]);
        }
    }
    Ok(TimescaleExportArgs {
        table_name,
        table_columns,
        time_column: time_column.to_string(),
        time_format: instance.timestamp_format.clone(),
    })
}

/// Publishes instance configuration to the filter topic of its export database,
/// where export workers pick it up.
pub struct ExportWorkerDriver {
    broker: Arc<dyn TopicBroker>,
    replication_factor: u16,
}

impl ExportWorkerDriver {
    pub fn new(broker: Arc<dyn TopicBroker>, replication_factor: u16) -> Self {
        Self {
            broker,
            replication_factor: replication_factor.max(1),
        }
    }

    fn publish(&self, instance: &Instance, message: &Message) -> Result<(), DriverError> {
        let topic = instance
            .export_database
            .as_ref()
            .map(|database| database.ew_filter_topic.as_str())
            .filter(|topic| !topic.is_empty())
            .ok_or_else(|| {
                DriverError::Config(format!("instance {} has no filter topic", instance.id))
            })?;
        let value =
            serde_json::to_value(message).map_err(|err| DriverError::Encode(err.to_string()))?;
        self.broker.publish(topic, &instance.id.to_string(), &value)
    }
}

impl Driver for ExportWorkerDriver {
    fn create_instance(
        &self,
        instance: &Instance,
        mappings: &FieldMappings,
    ) -> Result<String, DriverError> {
        let message = put_message(instance, mappings, Utc::now().timestamp())?;
        self.publish(instance, &message)?;
        Ok(String::new())
    }

    fn delete_instance(&self, instance: &Instance) -> Result<(), DriverError> {
        self.publish(instance, &delete_message(instance, Utc::now().timestamp()))
    }

    fn filter_topics(&self) -> Option<&dyn FilterTopicDriver> {
        Some(self)
    }
}

impl FilterTopicDriver for ExportWorkerDriver {
    fn create_filter_topic(&self, topic: &str, check_exists: bool) -> Result<(), DriverError> {
        if check_exists && self.existing_topics()?.contains(topic) {
            return Ok(());
        }
        self.broker
            .create_topic(topic, 1, self.replication_factor, FILTER_TOPIC_CONFIGS)?;
        info!(topic, "filter topic created");
        Ok(())
    }

    fn existing_topics(&self) -> Result<HashSet<String>, DriverError> {
        Ok(self.broker.list_topics()?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorten_id_drops_prefix_and_dashes() {
        let short = shorten_id("urn:infai:ses:user:00000000-0000-0000-0000-000000000001")
            .expect("shorten");
        assert_eq!(short, "AAAAAAAAAAAAAAAAAAAAAQ");
    }

    #[test]
    fn shorten_id_rejects_non_hex() {
        assert!(matches!(shorten_id("not-an-id"), Err(DriverError::Encode(_))));
    }

    #[test]
    fn time_column_takes_last_path_segment() {
        assert_eq!(time_column("value.meta.time").expect("column"), "time");
        assert!(time_column("").is_err());
    }
}
