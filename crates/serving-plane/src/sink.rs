use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::model::SinkKind;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink transport error: {0}")]
    Transport(String),
    #[error("sink query error: {0}")]
    Query(String),
    #[error("sink decode error: {0}")]
    Decode(String),
}

/// Catalog access to a time-series sink, used to purge residual measurements.
pub trait SinkCleaner: Send + Sync {
    fn drop_measurement(&self, database: &str, measurement: &str) -> Result<(), SinkError>;
    fn list_measurements(&self, database: &str) -> Result<Vec<String>, SinkError>;
}

#[derive(Clone, Default)]
pub struct SinkCleaners {
    cleaners: HashMap<SinkKind, Arc<dyn SinkCleaner>>,
}

impl SinkCleaners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: SinkKind, cleaner: Arc<dyn SinkCleaner>) -> Self {
        self.cleaners.insert(kind, cleaner);
        self
    }

    pub fn get(&self, kind: SinkKind) -> Option<Arc<dyn SinkCleaner>> {
        self.cleaners.get(&kind).cloned()
    }
}

#[derive(Clone, Default)]
pub struct InMemorySinkCleaner {
    measurements: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
    stubborn_drops: Arc<RwLock<usize>>,
}

impl InMemorySinkCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn add_measurement(&self, database: &str, measurement: &str) {
        self.measurements
            .write()
            .entry(database.to_string())
            .or_default()
            .insert(measurement.to_string());
    }

    pub fn has_measurement(&self, database: &str, measurement: &str) -> bool {
        self.measurements
            .read()
            .get(database)
            .map(|set| set.contains(measurement))
            .unwrap_or(false)
    }

    /// The next `count` drops succeed without removing anything, like a
    /// sink that is still receiving writes.
    pub fn ignore_drops(&self, count: usize) {
        *self.stubborn_drops.write() = count;
    }
}

impl SinkCleaner for InMemorySinkCleaner {
    fn drop_measurement(&self, database: &str, measurement: &str) -> Result<(), SinkError> {
        let mut stubborn = self.stubborn_drops.write();
        if *stubborn > 0 {
            *stubborn -= 1;
            return Ok(());
        }
        if let Some(set) = self.measurements.write().get_mut(database) {
            set.remove(measurement);
        }
        Ok(())
    }

    fn list_measurements(&self, database: &str) -> Result<Vec<String>, SinkError> {
        Ok(self
            .measurements
            .read()
            .get(database)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct QueryResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// InfluxDB 1.x `/query` endpoint.
pub struct InfluxSinkCleaner {
    client: Client,
    base_url: String,
    user: String,
    password: String,
}

impl InfluxSinkCleaner {
    pub fn new(base_url: &str, user: &str, password: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SinkError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    fn query(&self, database: &str, statement: &str) -> Result<QueryResponse, SinkError> {
        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .query(&[
                ("db", database),
                ("q", statement),
                ("u", self.user.as_str()),
                ("p", self.password.as_str()),
            ])
            .send()
            .map_err(|err| SinkError::Transport(err.to_string()))?;
        let parsed: QueryResponse = response
            .json()
            .map_err(|err| SinkError::Decode(err.to_string()))?;
        if let Some(error) = parsed.error.clone() {
            return Err(SinkError::Query(error));
        }
        if let Some(error) = parsed.results.iter().find_map(|result| result.error.clone()) {
            return Err(SinkError::Query(error));
        }
        Ok(parsed)
    }
}

impl SinkCleaner for InfluxSinkCleaner {
    fn drop_measurement(&self, database: &str, measurement: &str) -> Result<(), SinkError> {
        let escaped = measurement.replace('"', "\\\"");
        self.query(database, &format!("DROP MEASUREMENT \"{escaped}\""))
            .map(|_| ())
    }

    fn list_measurements(&self, database: &str) -> Result<Vec<String>, SinkError> {
        let response = self.query(database, "SHOW MEASUREMENTS")?;
        let Some(series) = response
            .results
            .first()
            .and_then(|result| result.series.first())
        else {
            return Ok(Vec::new());
        };
        Ok(series
            .values
            .iter()
            .filter_map(|row| row.first())
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect())
    }
}
