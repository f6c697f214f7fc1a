use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use parking_lot::RwLock;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct Rights: u8 {
        const READ = 0b0001;
        const WRITE = 0b0010;
        const EXECUTE = 0b0100;
        const ADMINISTRATE = 0b1000;
    }
}

impl Rights {
    /// Compact `rwxa` form used by the permission service.
    pub fn to_query(self) -> String {
        let mut out = String::new();
        for (flag, letter) in [
            (Rights::READ, 'r'),
            (Rights::WRITE, 'w'),
            (Rights::EXECUTE, 'x'),
            (Rights::ADMINISTRATE, 'a'),
        ] {
            if self.contains(flag) {
                out.push(letter);
            }
        }
        out
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResourcePermissions {
    pub user_permissions: HashMap<String, Rights>,
    pub group_permissions: HashMap<String, Rights>,
}

impl ResourcePermissions {
    pub fn owned_by(user_id: &str) -> Self {
        let mut user_permissions = HashMap::new();
        user_permissions.insert(user_id.to_string(), Rights::all());
        Self {
            user_permissions,
            group_permissions: HashMap::new(),
        }
    }

    pub fn rights_of(&self, user_id: &str) -> Rights {
        self.user_permissions
            .get(user_id)
            .copied()
            .unwrap_or_else(Rights::empty)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ListOptions {
    pub limit: u64,
    pub offset: u64,
}

impl ListOptions {
    pub fn page(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }
}

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("unauthorized token")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("permission transport error: {0}")]
    Transport(String),
    #[error("permission service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("permission decode error: {0}")]
    Decode(String),
}

/// Per-resource ACL store. Every call carries the caller's token; the
/// admin-listing variants require an administrative token.
pub trait PermissionStore: Send + Sync {
    fn set_permission(
        &self,
        token: &str,
        id: &str,
        permissions: &ResourcePermissions,
    ) -> Result<(), PermissionError>;
    fn check_permission(&self, token: &str, id: &str, rights: Rights)
        -> Result<bool, PermissionError>;
    /// Removing an unknown resource is not an error.
    fn remove_resource(&self, token: &str, id: &str) -> Result<(), PermissionError>;
    fn list_accessible_resource_ids(
        &self,
        token: &str,
        rights: Rights,
        options: Option<ListOptions>,
    ) -> Result<Vec<String>, PermissionError>;
    fn admin_list_resource_ids(
        &self,
        token: &str,
        options: ListOptions,
    ) -> Result<Vec<String>, PermissionError>;
    /// Returns an entry only for ids that exist as resources.
    fn check_multiple_permissions(
        &self,
        token: &str,
        ids: &[String],
        rights: Rights,
    ) -> Result<HashMap<String, bool>, PermissionError>;
}

#[derive(Clone, Debug)]
struct TokenIdentity {
    user_id: String,
    admin: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryPermissionStore {
    tokens: Arc<RwLock<HashMap<String, TokenIdentity>>>,
    resources: Arc<RwLock<BTreeMap<String, ResourcePermissions>>>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn register_user(&self, token: &str, user_id: &str) {
        self.tokens.write().insert(
            token.to_string(),
            TokenIdentity {
                user_id: user_id.to_string(),
                admin: false,
            },
        );
    }

    pub fn register_admin(&self, token: &str, user_id: &str) {
        self.tokens.write().insert(
            token.to_string(),
            TokenIdentity {
                user_id: user_id.to_string(),
                admin: true,
            },
        );
    }

    pub fn resource(&self, id: &str) -> Option<ResourcePermissions> {
        self.resources.read().get(id).cloned()
    }

    pub fn resource_ids(&self) -> Vec<String> {
        self.resources.read().keys().cloned().collect()
    }

    /// Writes a resource directly, bypassing token checks.
    pub fn seed(&self, id: &str, permissions: ResourcePermissions) {
        self.resources.write().insert(id.to_string(), permissions);
    }

    fn identity(&self, token: &str) -> Result<TokenIdentity, PermissionError> {
        self.tokens
            .read()
            .get(token)
            .cloned()
            .ok_or(PermissionError::Unauthorized)
    }
}

impl PermissionStore for InMemoryPermissionStore {
    fn set_permission(
        &self,
        token: &str,
        id: &str,
        permissions: &ResourcePermissions,
    ) -> Result<(), PermissionError> {
        let identity = self.identity(token)?;
        let mut resources = self.resources.write();
        if let Some(existing) = resources.get(id) {
            if !identity.admin
                && !existing
                    .rights_of(&identity.user_id)
                    .contains(Rights::ADMINISTRATE)
            {
                return Err(PermissionError::Forbidden(format!(
                    "{} may not administrate {id}",
                    identity.user_id
                )));
            }
        }
        resources.insert(id.to_string(), permissions.clone());
        Ok(())
    }

    fn check_permission(
        &self,
        token: &str,
        id: &str,
        rights: Rights,
    ) -> Result<bool, PermissionError> {
        let identity = self.identity(token)?;
        let resources = self.resources.read();
        Ok(match resources.get(id) {
            Some(_) if identity.admin => true,
            Some(resource) => resource.rights_of(&identity.user_id).contains(rights),
            None => false,
        })
    }

    fn remove_resource(&self, token: &str, id: &str) -> Result<(), PermissionError> {
        let identity = self.identity(token)?;
        let mut resources = self.resources.write();
        let Some(existing) = resources.get(id) else {
            return Ok(());
        };
        if !identity.admin
            && !existing
                .rights_of(&identity.user_id)
                .contains(Rights::ADMINISTRATE)
        {
            return Err(PermissionError::Forbidden(format!(
                "{} may not remove {id}",
                identity.user_id
            )));
        }
        resources.remove(id);
        Ok(())
    }

    fn list_accessible_resource_ids(
        &self,
        token: &str,
        rights: Rights,
        options: Option<ListOptions>,
    ) -> Result<Vec<String>, PermissionError> {
        let identity = self.identity(token)?;
        let resources = self.resources.read();
        let ids = resources
            .iter()
            .filter(|(_, resource)| identity.admin || resource.rights_of(&identity.user_id).contains(rights))
            .map(|(id, _)| id.clone());
        Ok(page(ids, options))
    }

    fn admin_list_resource_ids(
        &self,
        token: &str,
        options: ListOptions,
    ) -> Result<Vec<String>, PermissionError> {
        let identity = self.identity(token)?;
        if !identity.admin {
            return Err(PermissionError::Forbidden(
                "admin listing requires an admin token".to_string(),
            ));
        }
        let resources = self.resources.read();
        Ok(page(resources.keys().cloned(), Some(options)))
    }

    fn check_multiple_permissions(
        &self,
        token: &str,
        ids: &[String],
        rights: Rights,
    ) -> Result<HashMap<String, bool>, PermissionError> {
        let identity = self.identity(token)?;
        let resources = self.resources.read();
        Ok(ids
            .iter()
            .filter_map(|id| {
                resources.get(id).map(|resource| {
                    let allowed =
                        identity.admin || resource.rights_of(&identity.user_id).contains(rights);
                    (id.clone(), allowed)
                })
            })
            .collect())
    }
}

fn page(ids: impl Iterator<Item = String>, options: Option<ListOptions>) -> Vec<String> {
    match options {
        Some(options) => ids
            .skip(options.offset as usize)
            .take(options.limit as usize)
            .collect(),
        None => ids.collect(),
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct WireRights {
    read: bool,
    write: bool,
    execute: bool,
    administrate: bool,
}

impl From<Rights> for WireRights {
    fn from(rights: Rights) -> Self {
        Self {
            read: rights.contains(Rights::READ),
            write: rights.contains(Rights::WRITE),
            execute: rights.contains(Rights::EXECUTE),
            administrate: rights.contains(Rights::ADMINISTRATE),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct WireResourcePermissions {
    user_permissions: HashMap<String, WireRights>,
    group_permissions: HashMap<String, WireRights>,
}

impl From<&ResourcePermissions> for WireResourcePermissions {
    fn from(permissions: &ResourcePermissions) -> Self {
        let convert = |map: &HashMap<String, Rights>| {
            map.iter()
                .map(|(key, rights)| (key.clone(), WireRights::from(*rights)))
                .collect()
        };
        Self {
            user_permissions: convert(&permissions.user_permissions),
            group_permissions: convert(&permissions.group_permissions),
        }
    }
}

/// Client for a permissions-v2 style HTTP service, scoped to one topic.
#[derive(Clone)]
pub struct HttpPermissionStore {
    client: Client,
    base_url: String,
    topic: String,
}

impl HttpPermissionStore {
    pub fn new(base_url: &str, topic: &str, timeout: Duration) -> Result<Self, PermissionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PermissionError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            topic: topic.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
        token: &str,
    ) -> Result<reqwest::blocking::Response, PermissionError> {
        let response = request
            .header(reqwest::header::AUTHORIZATION, token)
            .send()
            .map_err(|err| PermissionError::Transport(err.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED => Err(PermissionError::Unauthorized),
            StatusCode::FORBIDDEN => Err(PermissionError::Forbidden(
                response.text().unwrap_or_default(),
            )),
            status => Err(PermissionError::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            }),
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::blocking::Response,
    ) -> Result<T, PermissionError> {
        response
            .json::<T>()
            .map_err(|err| PermissionError::Decode(err.to_string()))
    }
}

impl PermissionStore for HttpPermissionStore {
    fn set_permission(
        &self,
        token: &str,
        id: &str,
        permissions: &ResourcePermissions,
    ) -> Result<(), PermissionError> {
        let body = WireResourcePermissions::from(permissions);
        let request = self
            .client
            .put(self.url(&format!("manage/{}/{id}", self.topic)))
            .json(&body);
        self.send(request, token).map(|_| ())
    }

    fn check_permission(
        &self,
        token: &str,
        id: &str,
        rights: Rights,
    ) -> Result<bool, PermissionError> {
        let request = self.client.get(self.url(&format!(
            "check/{}/{id}/{}",
            self.topic,
            rights.to_query()
        )));
        Self::decode(self.send(request, token)?)
    }

    fn remove_resource(&self, token: &str, id: &str) -> Result<(), PermissionError> {
        let request = self
            .client
            .delete(self.url(&format!("manage/{}/{id}", self.topic)));
        match self.send(request, token) {
            Ok(_) => Ok(()),
            Err(PermissionError::Status { status: 404, .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn list_accessible_resource_ids(
        &self,
        token: &str,
        rights: Rights,
        options: Option<ListOptions>,
    ) -> Result<Vec<String>, PermissionError> {
        let mut query = vec![("permissions", rights.to_query())];
        if let Some(options) = options {
            query.push(("limit", options.limit.to_string()));
            query.push(("offset", options.offset.to_string()));
        }
        let request = self
            .client
            .get(self.url(&format!("accessible/{}", self.topic)))
            .query(&query);
        Self::decode(self.send(request, token)?)
    }

    fn admin_list_resource_ids(
        &self,
        token: &str,
        options: ListOptions,
    ) -> Result<Vec<String>, PermissionError> {
        let request = self
            .client
            .get(self.url(&format!("admin/resources/{}", self.topic)))
            .query(&[
                ("limit", options.limit.to_string()),
                ("offset", options.offset.to_string()),
            ]);
        Self::decode(self.send(request, token)?)
    }

    fn check_multiple_permissions(
        &self,
        token: &str,
        ids: &[String],
        rights: Rights,
    ) -> Result<HashMap<String, bool>, PermissionError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let request = self
            .client
            .get(self.url(&format!("check/{}", self.topic)))
            .query(&[("ids", ids.join(",")), ("permissions", rights.to_query())]);
        Self::decode(self.send(request, token)?)
    }
}
