use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum FilterType {
    #[default]
    #[serde(rename = "deviceId")]
    Device,
    #[serde(rename = "operatorId")]
    Operator,
    #[serde(rename = "import_id")]
    Import,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::Device => "deviceId",
            FilterType::Operator => "operatorId",
            FilterType::Import => "import_id",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "deviceId" => Some(FilterType::Device),
            "operatorId" => Some(FilterType::Operator),
            "import_id" => Some(FilterType::Import),
            _ => None,
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SinkKind {
    InfluxDb,
    TimescaleDb,
    Other,
}

impl SinkKind {
    pub fn from_type(value: &str) -> Self {
        match value {
            "influxdb" => SinkKind::InfluxDb,
            "timescaledb" => SinkKind::TimescaleDb,
            _ => SinkKind::Other,
        }
    }

    /// Sinks that keep measurement data after the worker is gone.
    pub fn requires_force_delete(&self) -> bool {
        matches!(self, SinkKind::InfluxDb)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExportDatabase {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub db_type: String,
    pub deployment: String,
    pub url: String,
    pub ew_filter_topic: String,
    pub public: bool,
    pub user_id: String,
}

impl ExportDatabase {
    pub fn sink_kind(&self) -> SinkKind {
        SinkKind::from_type(&self.db_type)
    }

    pub fn visible_to(&self, user_id: &str) -> bool {
        self.public || self.user_id == user_id
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExportDatabaseRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub db_type: String,
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub ew_filter_topic: String,
    #[serde(default)]
    pub public: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub path: String,
    #[serde(default)]
    pub tag: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub application_id: Uuid,
    pub name: String,
    pub description: String,
    pub entity_name: String,
    pub service_name: String,
    pub topic: String,
    pub filter: String,
    pub filter_type: FilterType,
    pub time_path: String,
    pub time_precision: Option<String>,
    pub timestamp_format: String,
    pub values: Vec<Value>,
    pub user_id: String,
    pub database: String,
    pub measurement: String,
    pub export_database_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_database: Option<ExportDatabase>,
    pub offset: String,
    pub generated: bool,
    #[serde(default)]
    pub service_handle: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    pub fn from_request(
        id: Uuid,
        application_id: Uuid,
        request: &InstanceRequest,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            application_id,
            name: request.name.clone(),
            description: request.description.clone(),
            entity_name: request.entity_name.clone(),
            service_name: request.service_name.clone(),
            topic: request.topic.clone(),
            filter: request.filter.clone(),
            filter_type: request.filter_type,
            time_path: request.time_path.clone(),
            time_precision: request.time_precision.clone(),
            timestamp_format: request.timestamp_format.clone(),
            values: request.values.clone(),
            user_id: user_id.to_string(),
            database: user_id.to_string(),
            measurement: id.to_string(),
            export_database_id: request.export_database_id.clone(),
            export_database: None,
            offset: request.offset.clone(),
            generated: request.generated,
            service_handle: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mappings(&self) -> FieldMappings {
        FieldMappings::from_values(&self.values)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InstanceRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub entity_name: String,
    #[serde(default)]
    pub service_name: String,
    pub topic: String,
    pub filter: String,
    pub filter_type: FilterType,
    #[serde(default)]
    pub time_path: String,
    #[serde(default)]
    pub time_precision: Option<String>,
    #[serde(default)]
    pub timestamp_format: String,
    #[serde(default)]
    pub values: Vec<Value>,
    pub export_database_id: String,
    #[serde(default)]
    pub offset: String,
    #[serde(default)]
    pub generated: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

/// Data and tag field specs handed to drivers as `{"name:type":"path"}` objects.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FieldMappings {
    pub data: String,
    pub tags: String,
}

impl FieldMappings {
    pub fn from_values(values: &[Value]) -> Self {
        let mut data = BTreeMap::new();
        let mut tags = BTreeMap::new();
        for value in values {
            let key = format!("{}:{}", value.name, value.value_type);
            if value.tag {
                tags.insert(key, value.path.clone());
            } else {
                data.insert(key, value.path.clone());
            }
        }
        Self {
            data: render_mapping(&data),
            tags: render_mapping(&tags),
        }
    }
}

fn render_mapping(entries: &BTreeMap<String, String>) -> String {
    serde_json::to_string(entries).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(name: &str, value_type: &str, path: &str, tag: bool) -> Value {
        Value {
            name: name.to_string(),
            value_type: value_type.to_string(),
            path: path.to_string(),
            tag,
        }
    }

    #[test]
    fn mappings_split_tags_from_data() {
        let mappings = FieldMappings::from_values(&[
            value("temp", "float", "value.temp", false),
            value("room", "string", "value.room", true),
        ]);
        assert_eq!(mappings.data, r#"{"temp:float":"value.temp"}"#);
        assert_eq!(mappings.tags, r#"{"room:string":"value.room"}"#);
    }

    #[test]
    fn empty_values_render_empty_objects() {
        let mappings = FieldMappings::from_values(&[]);
        assert_eq!(mappings.data, "{}");
        assert_eq!(mappings.tags, "{}");
    }

    #[test]
    fn filter_type_uses_wire_names() {
        let json = serde_json::to_string(&FilterType::Operator).expect("json");
        assert_eq!(json, "\"operatorId\"");
        assert_eq!(FilterType::parse("import_id"), Some(FilterType::Import));
    }

    #[test]
    fn empty_page_needs_no_default_items() {
        let page: Page<Instance> = Page::default();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
    }
}
