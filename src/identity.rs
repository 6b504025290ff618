use serde::{Deserialize, Serialize};

use crate::error::{CloudError, Result};

/// Breadth of records a caller asks to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    System,
    Domain,
    Project,
}

impl ScopeLevel {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "system" => Ok(ScopeLevel::System),
            "domain" => Ok(ScopeLevel::Domain),
            "project" => Ok(ScopeLevel::Project),
            other => Err(CloudError::input_parameter(format!("unknown scope '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SystemAdmin,
    DomainAdmin,
    Member,
}

/// The caller on whose behalf an operation runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub domain_id: String,
    pub project_id: String,
    pub role: Role,
}

impl Identity {
    /// Identity used by sync cycles, scheduled operations and tasks.
    pub fn system() -> Self {
        Self {
            user_id: "system".to_string(),
            domain_id: "default".to_string(),
            project_id: "system".to_string(),
            role: Role::SystemAdmin,
        }
    }

    pub fn domain_admin(domain_id: &str) -> Self {
        Self {
            user_id: format!("{}-admin", domain_id),
            domain_id: domain_id.to_string(),
            project_id: String::new(),
            role: Role::DomainAdmin,
        }
    }

    pub fn member(domain_id: &str, project_id: &str) -> Self {
        Self {
            user_id: format!("{}-user", project_id),
            domain_id: domain_id.to_string(),
            project_id: project_id.to_string(),
            role: Role::Member,
        }
    }

    pub fn is_system_admin(&self) -> bool {
        self.role == Role::SystemAdmin
    }

    /// Widest scope this identity may list at.
    pub fn default_scope(&self) -> ScopeLevel {
        match self.role {
            Role::SystemAdmin => ScopeLevel::System,
            Role::DomainAdmin => ScopeLevel::Domain,
            Role::Member => ScopeLevel::Project,
        }
    }

    /// Reject scopes wider than the caller's role grants.
    pub fn check_scope(&self, scope: ScopeLevel) -> Result<()> {
        let allowed = match scope {
            ScopeLevel::System => self.role == Role::SystemAdmin,
            ScopeLevel::Domain => matches!(self.role, Role::SystemAdmin | Role::DomainAdmin),
            ScopeLevel::Project => true,
        };
        if allowed {
            Ok(())
        } else {
            Err(CloudError::forbidden(format!(
                "{} may not act at {:?} scope",
                self.user_id, scope
            )))
        }
    }
}
