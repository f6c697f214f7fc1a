use std::time::Duration;

use chrono::Utc;
use serving_drivers::{workload_environment, workload_name, ContainerDriver, ContainerSettings};
use serving_kernel::DriverError;
use serving_plane::{FilterType, Instance, InstanceRequest, Value};
use uuid::Uuid;

fn settings() -> ContainerSettings {
    ContainerSettings {
        url: "https://rancher.local/v3".to_string(),
        kafka_bootstrap: "kafka:9092".to_string(),
        influx_url: "http://influx.local:8087".to_string(),
        influx_user: "writer".to_string(),
        influx_password: "secret".to_string(),
        ..ContainerSettings::default()
    }
}

fn instance(filter_type: FilterType, filter: &str) -> Instance {
    let request = InstanceRequest {
        name: "weather".to_string(),
        topic: "weather-topic".to_string(),
        filter: filter.to_string(),
        filter_type,
        time_path: "value.time".to_string(),
        values: vec![Value {
            name: "temperature".to_string(),
            value_type: "float".to_string(),
            path: "value.temperature".to_string(),
            tag: false,
        }],
        export_database_id: "db-1".to_string(),
        offset: "smallest".to_string(),
        ..InstanceRequest::default()
    };
    Instance::from_request(Uuid::new_v4(), Uuid::new_v4(), &request, "alice", Utc::now())
}

#[test]
fn workload_environment_describes_the_transfer() {
    let instance = instance(FilterType::Device, "device-1");
    let env = workload_environment(&settings(), &instance, &instance.mappings());

    assert_eq!(workload_name(&instance), format!("kafka2influx-{}", instance.id));
    assert_eq!(env["KAFKA_GROUP_ID"], format!("transfer-{}", instance.id));
    assert_eq!(env["KAFKA_BOOTSTRAP"], "kafka:9092");
    assert_eq!(env["KAFKA_TOPIC"], "weather-topic");
    assert_eq!(env["DATA_MEASUREMENT"], instance.id.to_string());
    assert_eq!(env["DATA_FIELDS_MAPPING"], r#"{"temperature:float":"value.temperature"}"#);
    assert_eq!(env["DATA_TIME_MAPPING"], "value.time");
    assert_eq!(env["DATA_FILTER_ID"], "device-1");
    assert_eq!(env["INFLUX_DB"], "alice");
    assert_eq!(env["INFLUX_HOST"], "influx.local");
    assert_eq!(env["INFLUX_PORT"], "8087");
    assert_eq!(env["INFLUX_PW"], "secret");
    assert_eq!(env["OFFSET_RESET"], "smallest");
    assert!(!env.contains_key("DATA_FILTER_ID_MAPPING"));
}

#[test]
fn operator_workloads_filter_by_operator_id() {
    let instance = instance(FilterType::Operator, "pipe-1:op-7");
    let env = workload_environment(&settings(), &instance, &instance.mappings());
    assert_eq!(env["DATA_FILTER_ID_MAPPING"], "operator_id");
}

#[test]
fn unparsable_influx_url_falls_back_to_defaults() {
    let instance = instance(FilterType::Device, "device-1");
    let settings = ContainerSettings {
        influx_url: "not a url".to_string(),
        ..settings()
    };
    let env = workload_environment(&settings, &instance, &instance.mappings());
    assert_eq!(env["INFLUX_HOST"], "influxdb");
    assert_eq!(env["INFLUX_PORT"], "8086");
}

#[test]
fn container_driver_requires_an_endpoint() {
    let result = ContainerDriver::new(ContainerSettings::default(), Duration::from_secs(1));
    assert!(matches!(result, Err(DriverError::Config(_))));
    assert!(ContainerDriver::new(settings(), Duration::from_secs(1)).is_ok());
}
