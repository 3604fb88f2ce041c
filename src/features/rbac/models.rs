use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A leaf capability token. Evaluation is plain set-membership — no wildcards,
/// no hierarchy. Grouped by domain purely for readability; the grouping
/// carries no runtime meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Permission {
    UserCreate,
    UserRead,
    UserUpdate,
    UserDeactivate,
    RoleCreate,
    RoleRead,
    RoleUpdate,
    RoleDelete,
    RoleAssign,
    DataRead,
    DataWrite,
    PipelineRun,
    PipelineCancel,
    ModelTrain,
    ModelRead,
    WorkspaceCreate,
    WorkspaceRead,
    WorkspaceUpdate,
    WorkspaceDelete,
    WorkspaceInvite,
    PluginInstall,
    PluginExecute,
    AuditRead,
    SystemAdmin,
}

impl Permission {
    pub const ALL: &'static [Permission] = &[
        Permission::UserCreate,
        Permission::UserRead,
        Permission::UserUpdate,
        Permission::UserDeactivate,
        Permission::RoleCreate,
        Permission::RoleRead,
        Permission::RoleUpdate,
        Permission::RoleDelete,
        Permission::RoleAssign,
        Permission::DataRead,
        Permission::DataWrite,
        Permission::PipelineRun,
        Permission::PipelineCancel,
        Permission::ModelTrain,
        Permission::ModelRead,
        Permission::WorkspaceCreate,
        Permission::WorkspaceRead,
        Permission::WorkspaceUpdate,
        Permission::WorkspaceDelete,
        Permission::WorkspaceInvite,
        Permission::PluginInstall,
        Permission::PluginExecute,
        Permission::AuditRead,
        Permission::SystemAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::UserCreate => "user:create",
            Permission::UserRead => "user:read",
            Permission::UserUpdate => "user:update",
            Permission::UserDeactivate => "user:deactivate",
            Permission::RoleCreate => "role:create",
            Permission::RoleRead => "role:read",
            Permission::RoleUpdate => "role:update",
            Permission::RoleDelete => "role:delete",
            Permission::RoleAssign => "role:assign",
            Permission::DataRead => "data:read",
            Permission::DataWrite => "data:write",
            Permission::PipelineRun => "pipeline:run",
            Permission::PipelineCancel => "pipeline:cancel",
            Permission::ModelTrain => "model:train",
            Permission::ModelRead => "model:read",
            Permission::WorkspaceCreate => "workspace:create",
            Permission::WorkspaceRead => "workspace:read",
            Permission::WorkspaceUpdate => "workspace:update",
            Permission::WorkspaceDelete => "workspace:delete",
            Permission::WorkspaceInvite => "workspace:invite",
            Permission::PluginInstall => "plugin:install",
            Permission::PluginExecute => "plugin:execute",
            Permission::AuditRead => "audit:read",
            Permission::SystemAdmin => "system:admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown permission: {0}")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

impl TryFrom<String> for Permission {
    type Error = UnknownPermission;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Permission::from_str(&value)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub permissions: Vec<Permission>,
    pub created_at: DateTime<Utc>,
}

/// Row shape as stored: `permissions` is a `jsonb` array of permission strings.
#[derive(Debug, FromRow)]
pub(crate) struct RoleRow {
    pub id: Uuid,
    pub name: String,
    pub permissions: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl RoleRow {
    pub(crate) fn into_role(self) -> Role {
        let permissions: Vec<Permission> = serde_json::from_value(self.permissions)
            .unwrap_or_default();
        Role {
            id: self.id,
            name: self.name,
            permissions,
            created_at: self.created_at,
        }
    }
}

pub const SEEDED_ROLES: &[(&str, &[Permission])] = &[
    ("Admin", Permission::ALL),
    (
        "PI",
        &[
            Permission::UserRead,
            Permission::RoleRead,
            Permission::DataRead,
            Permission::DataWrite,
            Permission::PipelineRun,
            Permission::PipelineCancel,
            Permission::ModelTrain,
            Permission::ModelRead,
            Permission::WorkspaceCreate,
            Permission::WorkspaceRead,
            Permission::WorkspaceUpdate,
            Permission::WorkspaceDelete,
            Permission::WorkspaceInvite,
            Permission::PluginInstall,
            Permission::PluginExecute,
            Permission::AuditRead,
        ],
    ),
    (
        "Researcher",
        &[
            Permission::DataRead,
            Permission::DataWrite,
            Permission::PipelineRun,
            Permission::ModelTrain,
            Permission::ModelRead,
            Permission::WorkspaceCreate,
            Permission::WorkspaceRead,
            Permission::WorkspaceUpdate,
            Permission::WorkspaceInvite,
            Permission::PluginExecute,
        ],
    ),
    (
        "Analyst",
        &[
            Permission::DataRead,
            Permission::PipelineRun,
            Permission::ModelRead,
            Permission::WorkspaceRead,
            Permission::WorkspaceUpdate,
            Permission::PluginExecute,
        ],
    ),
    (
        "Viewer",
        &[
            Permission::DataRead,
            Permission::ModelRead,
            Permission::WorkspaceRead,
        ],
    ),
];

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub user_id: Uuid,
    pub role_name: String,
}
