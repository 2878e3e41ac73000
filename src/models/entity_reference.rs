//! # Entity References
//!
//! Entities a step touches at runtime (connectors, secrets, environments...).
//! The authorization gate turns each reference into a runtime permission check.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of entity a step refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Connector,
    Secret,
    Environment,
    Service,
    Template,
    Pipeline,
}

impl ResourceType {
    /// Runtime permission required to use an entity of this type from a step
    pub fn runtime_permission(&self) -> &'static str {
        match self {
            Self::Connector => "core_connector_access",
            Self::Secret => "core_secret_access",
            Self::Environment => "core_environment_access",
            Self::Service => "core_service_access",
            Self::Template => "core_template_access",
            Self::Pipeline => "core_pipeline_execute",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connector => "CONNECTOR",
            Self::Secret => "SECRET",
            Self::Environment => "ENVIRONMENT",
            Self::Service => "SERVICE",
            Self::Template => "TEMPLATE",
            Self::Pipeline => "PIPELINE",
        };
        f.write_str(label)
    }
}

/// Account / org / project coordinates of an entity. Missing trailing parts
/// mean the entity lives at a wider scope (an account-level connector has no
/// org or project).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceScope {
    pub account_id: String,
    pub org_id: Option<String>,
    pub project_id: Option<String>,
}

impl ResourceScope {
    pub fn account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            org_id: None,
            project_id: None,
        }
    }

    pub fn org(account_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            org_id: Some(org_id.into()),
            project_id: None,
        }
    }

    pub fn project(
        account_id: impl Into<String>,
        org_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            org_id: Some(org_id.into()),
            project_id: Some(project_id.into()),
        }
    }

    /// True when `other` is this scope or nested below it
    pub fn contains(&self, other: &ResourceScope) -> bool {
        if self.account_id != other.account_id {
            return false;
        }
        match (&self.org_id, &other.org_id) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) if mine != theirs => false,
            (Some(_), Some(_)) => match (&self.project_id, &other.project_id) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(mine), Some(theirs)) => mine == theirs,
            },
        }
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.account_id)?;
        if let Some(org) = &self.org_id {
            write!(f, "/{org}")?;
        }
        if let Some(project) = &self.project_id {
            write!(f, "/{project}")?;
        }
        Ok(())
    }
}

/// A single entity referenced by a step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityReference {
    pub resource_type: ResourceType,
    pub identifier: String,
    pub scope: ResourceScope,
}

impl EntityReference {
    pub fn new(resource_type: ResourceType, identifier: impl Into<String>, scope: ResourceScope) -> Self {
        Self {
            resource_type,
            identifier: identifier.into(),
            scope,
        }
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_containment() {
        let account = ResourceScope::account("acc");
        let org = ResourceScope::org("acc", "org");
        let project = ResourceScope::project("acc", "org", "proj");
        let other_project = ResourceScope::project("acc", "org", "other");

        assert!(account.contains(&project));
        assert!(org.contains(&project));
        assert!(project.contains(&project));
        assert!(!project.contains(&org));
        assert!(!project.contains(&other_project));
        assert!(!ResourceScope::account("other").contains(&project));
    }

    #[test]
    fn test_runtime_permission_mapping() {
        assert_eq!(
            ResourceType::Environment.runtime_permission(),
            "core_environment_access"
        );
        assert_eq!(ResourceType::Pipeline.runtime_permission(), "core_pipeline_execute");
    }
}
