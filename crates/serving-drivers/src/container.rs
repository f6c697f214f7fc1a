use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use serving_kernel::{Driver, DriverError};
use serving_plane::{FieldMappings, FilterType, Instance};
use tracing::info;

const WORKLOAD_PREFIX: &str = "kafka2influx-";

#[derive(Clone, Debug, Default)]
pub struct ContainerSettings {
    pub url: String,
    pub access_key: String,
    pub secret_key: String,
    pub project_id: String,
    pub namespace_id: String,
    pub image: String,
    pub kafka_bootstrap: String,
    pub influx_url: String,
    pub influx_user: String,
    pub influx_password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadRequest {
    name: String,
    namespace_id: String,
    containers: Vec<ContainerSpec>,
    scheduling: Scheduling,
    labels: BTreeMap<String, String>,
    selector: Selector,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerSpec {
    image: String,
    name: String,
    environment: BTreeMap<String, String>,
    image_pull_policy: String,
}

#[derive(Debug, Serialize)]
struct Scheduling {
    scheduler: String,
    node: NodeSelector,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeSelector {
    require_all: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Selector {
    match_labels: BTreeMap<String, String>,
}

pub fn workload_name(instance: &Instance) -> String {
    format!("{WORKLOAD_PREFIX}{}", instance.id)
}

/// Environment handed to the transfer container of one instance.
pub fn workload_environment(
    settings: &ContainerSettings,
    instance: &Instance,
    mappings: &FieldMappings,
) -> BTreeMap<String, String> {
    let (influx_host, influx_port) = influx_endpoint(&settings.influx_url);
    let mut env = BTreeMap::from([
        ("KAFKA_GROUP_ID".to_string(), format!("transfer-{}", instance.id)),
        ("KAFKA_BOOTSTRAP".to_string(), settings.kafka_bootstrap.clone()),
        ("KAFKA_TOPIC".to_string(), instance.topic.clone()),
        ("DATA_MEASUREMENT".to_string(), instance.measurement.clone()),
        ("DATA_FIELDS_MAPPING".to_string(), mappings.data.clone()),
        ("DATA_TIME_MAPPING".to_string(), instance.time_path.clone()),
        ("DATA_FILTER_ID".to_string(), instance.filter.clone()),
        ("INFLUX_DB".to_string(), instance.database.clone()),
        ("INFLUX_HOST".to_string(), influx_host),
        ("INFLUX_PORT".to_string(), influx_port),
        ("INFLUX_USER".to_string(), settings.influx_user.clone()),
        ("INFLUX_PW".to_string(), settings.influx_password.clone()),
        ("OFFSET_RESET".to_string(), instance.offset.clone()),
    ]);
    if instance.filter_type == FilterType::Operator {
        env.insert("DATA_FILTER_ID_MAPPING".to_string(), "operator_id".to_string());
    }
    env
}

fn influx_endpoint(url: &str) -> (String, String) {
    match Url::parse(url) {
        Ok(parsed) => (
            parsed.host_str().unwrap_or_default().to_string(),
            parsed.port_or_known_default().unwrap_or(8086).to_string(),
        ),
        Err(_) => ("influxdb".to_string(), "8086".to_string()),
    }
}

/// Runs one transfer workload per instance on a container orchestrator.
pub struct ContainerDriver {
    client: Client,
    settings: ContainerSettings,
}

impl ContainerDriver {
    pub fn new(settings: ContainerSettings, timeout: Duration) -> Result<Self, DriverError> {
        if settings.url.trim().is_empty() {
            return Err(DriverError::Config("container.url is required".to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| DriverError::Transport(err.to_string()))?;
        Ok(Self { client, settings })
    }

    fn workloads_url(&self) -> String {
        let base = self.settings.url.trim_end_matches('/');
        format!("{base}/projects/{}/workloads", self.settings.project_id)
    }

    fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
        accepted: &[StatusCode],
    ) -> Result<(), DriverError> {
        let response = request
            .basic_auth(&self.settings.access_key, Some(&self.settings.secret_key))
            .send()
            .map_err(|err| DriverError::Transport(err.to_string()))?;
        let status = response.status();
        if accepted.contains(&status) {
            return Ok(());
        }
        Err(DriverError::Rejected {
            status: status.as_u16(),
            body: response.text().unwrap_or_default(),
        })
    }
}

impl Driver for ContainerDriver {
    fn create_instance(
        &self,
        instance: &Instance,
        mappings: &FieldMappings,
    ) -> Result<String, DriverError> {
        let name = workload_name(instance);
        let id = instance.id.to_string();
        let labels = BTreeMap::from([("exportId".to_string(), id)]);
        let body = WorkloadRequest {
            name: name.clone(),
            namespace_id: self.settings.namespace_id.clone(),
            containers: vec![ContainerSpec {
                image: self.settings.image.clone(),
                name: "kafka2influx".to_string(),
                environment: workload_environment(&self.settings, instance, mappings),
                image_pull_policy: "Always".to_string(),
            }],
            scheduling: Scheduling {
                scheduler: "default-scheduler".to_string(),
                node: NodeSelector {
                    require_all: vec!["role=worker".to_string()],
                },
            },
            labels: labels.clone(),
            selector: Selector {
                match_labels: labels,
            },
        };
        self.send(
            self.client.post(self.workloads_url()).json(&body),
            &[StatusCode::CREATED],
        )?;
        info!(workload = %name, "created transfer workload");
        Ok(name)
    }

    /// A workload that is already gone counts as deleted.
    fn delete_instance(&self, instance: &Instance) -> Result<(), DriverError> {
        let url = format!(
            "{}/deployment:{}:{}",
            self.workloads_url(),
            self.settings.namespace_id,
            workload_name(instance)
        );
        self.send(
            self.client.delete(url),
            &[StatusCode::NO_CONTENT, StatusCode::OK, StatusCode::NOT_FOUND],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn influx_endpoint_splits_host_and_port() {
        assert_eq!(
            influx_endpoint("http://influx.local:8087"),
            ("influx.local".to_string(), "8087".to_string())
        );
        assert_eq!(
            influx_endpoint(""),
            ("influxdb".to_string(), "8086".to_string())
        );
    }
}
