use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use serving_kernel::DriverError;
use tracing::debug;

/// Topic-level operations the export-worker driver needs from a message broker.
pub trait TopicBroker: Send + Sync {
    fn publish(&self, topic: &str, key: &str, value: &JsonValue) -> Result<(), DriverError>;
    fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        replication_factor: u16,
        configs: &[(&str, &str)],
    ) -> Result<(), DriverError>;
    fn list_topics(&self) -> Result<Vec<String>, DriverError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct PublishedRecord {
    pub topic: String,
    pub key: String,
    pub value: JsonValue,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TopicSpec {
    pub partitions: u32,
    pub replication_factor: u16,
    pub configs: BTreeMap<String, String>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicSpec>,
    records: Vec<PublishedRecord>,
}

/// Keeps topics and published records in memory.
#[derive(Clone, Default)]
pub struct InMemoryTopicBroker {
    state: Arc<RwLock<BrokerState>>,
}

impl InMemoryTopicBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn records(&self) -> Vec<PublishedRecord> {
        self.state.read().records.clone()
    }

    pub fn records_for(&self, topic: &str) -> Vec<PublishedRecord> {
        self.state
            .read()
            .records
            .iter()
            .filter(|record| record.topic == topic)
            .cloned()
            .collect()
    }

    pub fn topic(&self, name: &str) -> Option<TopicSpec> {
        self.state.read().topics.get(name).cloned()
    }
}

impl TopicBroker for InMemoryTopicBroker {
    fn publish(&self, topic: &str, key: &str, value: &JsonValue) -> Result<(), DriverError> {
        self.state.write().records.push(PublishedRecord {
            topic: topic.to_string(),
            key: key.to_string(),
            value: value.clone(),
        });
        Ok(())
    }

    fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        replication_factor: u16,
        configs: &[(&str, &str)],
    ) -> Result<(), DriverError> {
        let mut state = self.state.write();
        if state.topics.contains_key(name) {
            return Err(DriverError::Rejected {
                status: 400,
                body: format!("topic {name} already exists"),
            });
        }
        state.topics.insert(
            name.to_string(),
            TopicSpec {
                partitions,
                replication_factor,
                configs: configs
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect(),
            },
        );
        Ok(())
    }

    fn list_topics(&self) -> Result<Vec<String>, DriverError> {
        let mut topics: Vec<String> = self.state.read().topics.keys().cloned().collect();
        topics.sort();
        Ok(topics)
    }
}

/// Kafka REST proxy (v3 API) client bound to one cluster.
#[derive(Clone)]
pub struct RestProxyBroker {
    client: Client,
    base_url: String,
    cluster_id: String,
}

#[derive(Debug, Deserialize)]
struct TopicList {
    #[serde(default)]
    data: Vec<TopicEntry>,
}

#[derive(Debug, Deserialize)]
struct TopicEntry {
    topic_name: String,
}

#[derive(Debug, Serialize)]
struct TopicConfig<'a> {
    name: &'a str,
    value: &'a str,
}

impl RestProxyBroker {
    pub fn new(base_url: &str, cluster_id: &str, timeout: Duration) -> Result<Self, DriverError> {
        if cluster_id.trim().is_empty() {
            return Err(DriverError::Config("kafka.cluster_id is required".to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| DriverError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cluster_id: cluster_id.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v3/clusters/{}/{path}", self.base_url, self.cluster_id)
    }

    fn send(
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response, DriverError> {
        let response = request
            .send()
            .map_err(|err| DriverError::Transport(err.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(DriverError::Rejected {
            status: response.status().as_u16(),
            body: response.text().unwrap_or_default(),
        })
    }
}

impl TopicBroker for RestProxyBroker {
    fn publish(&self, topic: &str, key: &str, value: &JsonValue) -> Result<(), DriverError> {
        let body = json!({
            "key": { "type": "STRING", "data": key },
            "value": { "type": "JSON", "data": value },
        });
        let request = self
            .client
            .post(self.url(&format!("topics/{topic}/records")))
            .json(&body);
        Self::send(request)?;
        debug!(topic, key, "published record");
        Ok(())
    }

    fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        replication_factor: u16,
        configs: &[(&str, &str)],
    ) -> Result<(), DriverError> {
        let configs: Vec<TopicConfig<'_>> = configs
            .iter()
            .map(|&(name, value)| TopicConfig { name, value })
            .collect();
        let body = json!({
            "topic_name": name,
            "partitions_count": partitions,
            "replication_factor": replication_factor,
            "configs": configs,
        });
        Self::send(self.client.post(self.url("topics")).json(&body)).map(|_| ())
    }

    fn list_topics(&self) -> Result<Vec<String>, DriverError> {
        let response = Self::send(self.client.get(self.url("topics")))?;
        let list: TopicList = response
            .json()
            .map_err(|err| DriverError::Transport(err.to_string()))?;
        Ok(list.data.into_iter().map(|entry| entry.topic_name).collect())
    }
}
