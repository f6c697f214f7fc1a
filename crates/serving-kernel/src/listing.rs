use serving_plane::{Instance, InstanceScope, ListArgs, ListEntity, ListQuery, Page, Rights};
use tracing::debug;
use uuid::Uuid;

use crate::error::ServingError;
use crate::orchestrator::{Caller, Orchestrator};

impl Orchestrator {
    /// Lists instances visible to `caller`, filtered by the listing arguments.
    /// `total` counts every match regardless of `limit`/`offset`.
    pub fn list_instances(
        &self,
        caller: &Caller,
        args: &ListArgs,
    ) -> Result<Page<Instance>, ServingError> {
        let query = ListQuery::parse(ListEntity::Instances, args, &caller.user_id)?;
        let scope = self.listing_scope(caller)?;
        if matches!(&scope, InstanceScope::Ids(ids) if ids.is_empty()) {
            debug!(user = %caller.user_id, "no accessible instances");
            return Ok(Page::default());
        }
        Ok(self.store.list_instances(&scope, &query)?)
    }

    fn listing_scope(&self, caller: &Caller) -> Result<InstanceScope, ServingError> {
        if caller.admin {
            return Ok(InstanceScope::All);
        }
        let Some(permissions) = &self.permissions else {
            return Ok(InstanceScope::OwnedBy(caller.user_id.clone()));
        };
        let ids = permissions
            .list_accessible_resource_ids(&caller.token, Rights::READ, None)?
            .iter()
            .filter_map(|id| Uuid::parse_str(id).ok())
            .collect();
        Ok(InstanceScope::Ids(ids))
    }
}
