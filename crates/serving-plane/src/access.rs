use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::FilterType;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("no access checker registered for {0}")]
    Unsupported(FilterType),
    #[error("access check transport error: {0}")]
    Transport(String),
    #[error("access check returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("access check decode error: {0}")]
    Decode(String),
}

/// Verifies that a token may read the data sources behind a filter.
pub trait AccessChecker: Send + Sync {
    fn has_access(&self, source_ids: &[String], token: &str) -> Result<bool, AccessError>;
}

/// Source ids a filter refers to. Operator filters are `pipelineId:operatorId`.
pub fn source_ids(filter_type: FilterType, filter: &str) -> Vec<String> {
    match filter_type {
        FilterType::Device | FilterType::Import => vec![filter.to_string()],
        FilterType::Operator => vec![filter.split(':').next().unwrap_or_default().to_string()],
    }
}

#[derive(Clone, Default)]
pub struct AccessCheckers {
    checkers: HashMap<FilterType, Arc<dyn AccessChecker>>,
}

impl AccessCheckers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter_type: FilterType, checker: Arc<dyn AccessChecker>) -> Self {
        self.checkers.insert(filter_type, checker);
        self
    }

    /// Same checker for every filter type.
    pub fn uniform(checker: Arc<dyn AccessChecker>) -> Self {
        Self::new()
            .with(FilterType::Device, checker.clone())
            .with(FilterType::Operator, checker.clone())
            .with(FilterType::Import, checker)
    }

    pub fn check(&self, filter_type: FilterType, filter: &str, token: &str) -> Result<bool, AccessError> {
        let checker = self
            .checkers
            .get(&filter_type)
            .ok_or(AccessError::Unsupported(filter_type))?;
        checker.has_access(&source_ids(filter_type, filter), token)
    }
}

#[derive(Clone, Default)]
pub struct StaticAccessChecker {
    allow_all: bool,
    grants: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl StaticAccessChecker {
    pub fn allow_all() -> Arc<Self> {
        Arc::new(Self {
            allow_all: true,
            grants: Arc::default(),
        })
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn grant(&self, token: &str, source_id: &str) {
        self.grants
            .write()
            .entry(token.to_string())
            .or_default()
            .insert(source_id.to_string());
    }
}

impl AccessChecker for StaticAccessChecker {
    fn has_access(&self, source_ids: &[String], token: &str) -> Result<bool, AccessError> {
        if self.allow_all {
            return Ok(true);
        }
        let grants = self.grants.read();
        let Some(allowed) = grants.get(token) else {
            return Ok(false);
        };
        Ok(!source_ids.is_empty() && source_ids.iter().all(|id| allowed.contains(id)))
    }
}

fn http_client(timeout: Duration) -> Result<Client, AccessError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| AccessError::Transport(err.to_string()))
}

fn expect_success(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, AccessError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(AccessError::Status {
        status: status.as_u16(),
        body: response.text().unwrap_or_default(),
    })
}

#[derive(Serialize)]
struct CheckIds<'a> {
    ids: &'a [String],
    rights: &'a str,
}

#[derive(Serialize)]
struct QueryMessage<'a> {
    resource: &'a str,
    check_ids: CheckIds<'a>,
}

/// Device read rights through a permission-search query endpoint.
pub struct HttpDeviceAccessChecker {
    client: Client,
    base_url: String,
}

impl HttpDeviceAccessChecker {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AccessError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl AccessChecker for HttpDeviceAccessChecker {
    fn has_access(&self, source_ids: &[String], token: &str) -> Result<bool, AccessError> {
        let message = QueryMessage {
            resource: "devices",
            check_ids: CheckIds {
                ids: source_ids,
                rights: "r",
            },
        };
        let response = self
            .client
            .post(format!("{}/v3/query", self.base_url))
            .header(reqwest::header::AUTHORIZATION, token)
            .json(&message)
            .send()
            .map_err(|err| AccessError::Transport(err.to_string()))?;
        let result: HashMap<String, bool> = expect_success(response)?
            .json()
            .map_err(|err| AccessError::Decode(err.to_string()))?;
        Ok(!result.is_empty() && result.values().all(|allowed| *allowed))
    }
}

#[derive(Deserialize)]
struct PipelineRef {
    #[serde(default)]
    id: String,
}

/// Pipeline access: the registry only returns pipelines visible to the token.
pub struct HttpPipelineAccessChecker {
    client: Client,
    base_url: String,
}

impl HttpPipelineAccessChecker {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AccessError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl AccessChecker for HttpPipelineAccessChecker {
    fn has_access(&self, source_ids: &[String], token: &str) -> Result<bool, AccessError> {
        for id in source_ids {
            let response = self
                .client
                .get(format!("{}/pipeline/{id}", self.base_url))
                .header(reqwest::header::AUTHORIZATION, token)
                .send()
                .map_err(|err| AccessError::Transport(err.to_string()))?;
            let pipeline: PipelineRef = expect_success(response)?
                .json()
                .map_err(|err| AccessError::Decode(err.to_string()))?;
            if pipeline.id != *id {
                return Ok(false);
            }
        }
        Ok(!source_ids.is_empty())
    }
}

pub struct HttpImportAccessChecker {
    client: Client,
    base_url: String,
}

impl HttpImportAccessChecker {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AccessError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl AccessChecker for HttpImportAccessChecker {
    fn has_access(&self, source_ids: &[String], token: &str) -> Result<bool, AccessError> {
        for id in source_ids {
            let response = self
                .client
                .get(format!("{}/instances/{id}", self.base_url))
                .header(reqwest::header::AUTHORIZATION, token)
                .send()
                .map_err(|err| AccessError::Transport(err.to_string()))?;
            expect_success(response)?;
        }
        Ok(!source_ids.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_filter_checks_pipeline_id() {
        assert_eq!(
            source_ids(FilterType::Operator, "pipe-1:op-7"),
            vec!["pipe-1".to_string()]
        );
        assert_eq!(source_ids(FilterType::Device, "dev-1"), vec!["dev-1".to_string()]);
    }
}
