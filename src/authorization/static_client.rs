//! In-process access control client backed by a fixed grant list.

use super::gate::{AccessCheckResult, AccessControlClient, PermissionCheck};
use crate::error::GatekeeperResult;
use crate::models::entity_reference::ResourceScope;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Permission granted to a principal at a scope. Grants at a wider scope
/// cover everything nested below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub principal_id: String,
    pub permission: String,
    pub scope: ResourceScope,
}

#[derive(Debug, Default)]
pub struct StaticAccessControlClient {
    grants: RwLock<Vec<Grant>>,
}

impl StaticAccessControlClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grant(
        self,
        principal_id: impl Into<String>,
        permission: impl Into<String>,
        scope: ResourceScope,
    ) -> Self {
        self.grant(principal_id, permission, scope);
        self
    }

    pub fn grant(
        &self,
        principal_id: impl Into<String>,
        permission: impl Into<String>,
        scope: ResourceScope,
    ) {
        self.grants.write().push(Grant {
            principal_id: principal_id.into(),
            permission: permission.into(),
            scope,
        });
    }

    pub fn revoke_all(&self, principal_id: &str) {
        self.grants
            .write()
            .retain(|grant| grant.principal_id != principal_id);
    }

    fn is_permitted(&self, check: &PermissionCheck) -> bool {
        self.grants.read().iter().any(|grant| {
            grant.principal_id == check.principal.principal_id
                && grant.permission == check.permission
                && grant.scope.contains(&check.resource.scope)
        })
    }
}

#[async_trait]
impl AccessControlClient for StaticAccessControlClient {
    async fn check_access(&self, checks: &[PermissionCheck]) -> GatekeeperResult<Vec<AccessCheckResult>> {
        Ok(checks
            .iter()
            .map(|check| AccessCheckResult {
                check: check.clone(),
                permitted: self.is_permitted(check),
            })
            .collect())
    }
}
