use crate::features::audit::AuditService;
use crate::features::workspace::models::{
    CreateWorkspaceRequest, UpdateWorkspaceRequest, Workspace, WorkspaceMember, WorkspaceMemberView, WorkspaceRole,
};
use axum::http::StatusCode;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("workspace not found")]
    NotFound,
    #[error("not a member of this workspace")]
    NotMember,
    #[error("a workspace must have at least one owner")]
    LastOwner,
    #[error("user is already a member")]
    AlreadyMember,
    #[error("insufficient workspace role")]
    Forbidden,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl WorkspaceError {
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NotMember | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::LastOwner | Self::AlreadyMember => StatusCode::CONFLICT,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Workspaces are the collaboration boundary: a CRDT document, a presence
/// roster, and a hub room are all scoped to one workspace id. Membership is
/// plain (workspace_id, user_id) rows with a role; the owner invariant
/// (every workspace keeps at least one owner) is enforced here rather than
/// in the schema since it spans a multi-row check.
#[derive(Clone)]
pub struct WorkspaceService {
    pool: PgPool,
    audit: AuditService,
}

impl WorkspaceService {
    pub fn new(pool: PgPool, audit: AuditService) -> Self {
        Self { pool, audit }
    }

    pub async fn create_workspace(&self, owner_id: Uuid, req: CreateWorkspaceRequest) -> Result<Workspace, WorkspaceError> {
        let mut tx = self.pool.begin().await?;
        let workspace: Workspace = sqlx::query_as(
            "INSERT INTO workspaces (id, name, description, owner_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, now(), now()) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&req.name)
        .bind(&req.description)
        .bind(owner_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at) VALUES ($1, $2, 'owner', now())",
        )
        .bind(workspace.id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.audit
            .log(
                Some(owner_id),
                "workspace.create",
                "workspace",
                Some(workspace.id),
                "success",
                None,
                Some(serde_json::json!({"name": workspace.name})),
                None,
                None,
            )
            .await
            .ok();

        Ok(workspace)
    }

    pub async fn get_workspace(&self, workspace_id: Uuid) -> Result<Workspace, WorkspaceError> {
        sqlx::query_as::<_, Workspace>("SELECT * FROM workspaces WHERE id = $1")
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(WorkspaceError::NotFound)
    }

    pub async fn list_workspaces_for_user(&self, user_id: Uuid) -> Result<Vec<Workspace>, WorkspaceError> {
        let rows = sqlx::query_as::<_, Workspace>(
            "SELECT w.* FROM workspaces w
             JOIN workspace_members m ON m.workspace_id = w.id
             WHERE m.user_id = $1 AND w.archived_at IS NULL
             ORDER BY w.updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_workspace(
        &self,
        workspace_id: Uuid,
        requester_id: Uuid,
        req: UpdateWorkspaceRequest,
    ) -> Result<Workspace, WorkspaceError> {
        self.require_role(workspace_id, requester_id, WorkspaceRole::Editor).await?;

        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("UPDATE workspaces SET updated_at = now()");
        if let Some(name) = &req.name {
            builder.push(", name = ").push_bind(name.clone());
        }
        if let Some(description) = &req.description {
            builder.push(", description = ").push_bind(description.clone());
        }
        builder.push(" WHERE id = ").push_bind(workspace_id).push(" RETURNING *");

        let workspace: Workspace = builder.build_query_as().fetch_optional(&self.pool).await?.ok_or(WorkspaceError::NotFound)?;
        Ok(workspace)
    }

    pub async fn get_member(&self, workspace_id: Uuid, user_id: Uuid) -> Result<WorkspaceMember, WorkspaceError> {
        sqlx::query_as::<_, WorkspaceMember>(
            "SELECT * FROM workspace_members WHERE workspace_id = $1 AND user_id = $2",
        )
        .bind(workspace_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(WorkspaceError::NotMember)
    }

    /// Errors with `Forbidden` unless `user_id`'s role in `workspace_id` is at
    /// least as privileged as `min_role` (owner > editor > viewer).
    async fn require_role(&self, workspace_id: Uuid, user_id: Uuid, min_role: WorkspaceRole) -> Result<WorkspaceMember, WorkspaceError> {
        let member = self.get_member(workspace_id, user_id).await?;
        let rank = |r: WorkspaceRole| match r {
            WorkspaceRole::Owner => 2,
            WorkspaceRole::Editor => 1,
            WorkspaceRole::Viewer => 0,
        };
        if rank(member.role) < rank(min_role) {
            return Err(WorkspaceError::Forbidden);
        }
        Ok(member)
    }

    /// Lets a caller check ownership ahead of a side effect (e.g. evicting a
    /// live hub room) that should not happen before authorization is
    /// confirmed.
    pub async fn require_owner(&self, workspace_id: Uuid, user_id: Uuid) -> Result<(), WorkspaceError> {
        self.require_role(workspace_id, user_id, WorkspaceRole::Owner).await?;
        Ok(())
    }

    pub async fn list_members(&self, workspace_id: Uuid, requester_id: Uuid) -> Result<Vec<WorkspaceMemberView>, WorkspaceError> {
        self.require_role(workspace_id, requester_id, WorkspaceRole::Viewer).await?;
        let rows = sqlx::query_as::<_, WorkspaceMemberView>(
            "SELECT m.user_id, u.email, m.role, m.joined_at
             FROM workspace_members m
             JOIN users u ON u.id = m.user_id
             WHERE m.workspace_id = $1
             ORDER BY m.joined_at",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn invite_member(
        &self,
        workspace_id: Uuid,
        requester_id: Uuid,
        invitee_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<WorkspaceMember, WorkspaceError> {
        self.require_role(workspace_id, requester_id, WorkspaceRole::Editor).await?;

        let existing = self.get_member(workspace_id, invitee_id).await;
        if existing.is_ok() {
            return Err(WorkspaceError::AlreadyMember);
        }

        let member: WorkspaceMember = sqlx::query_as(
            "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at)
             VALUES ($1, $2, $3, now()) RETURNING *",
        )
        .bind(workspace_id)
        .bind(invitee_id)
        .bind(role)
        .fetch_one(&self.pool)
        .await?;

        self.audit
            .log(
                Some(requester_id),
                "workspace.invite",
                "workspace",
                Some(workspace_id),
                "success",
                None,
                Some(serde_json::json!({"invitee_id": invitee_id, "role": role.as_str()})),
                None,
                None,
            )
            .await
            .ok();

        Ok(member)
    }

    pub async fn set_member_role(
        &self,
        workspace_id: Uuid,
        requester_id: Uuid,
        target_user_id: Uuid,
        new_role: WorkspaceRole,
    ) -> Result<WorkspaceMember, WorkspaceError> {
        self.require_role(workspace_id, requester_id, WorkspaceRole::Owner).await?;

        if new_role != WorkspaceRole::Owner {
            self.ensure_not_last_owner(workspace_id, target_user_id).await?;
        }

        let member: WorkspaceMember = sqlx::query_as(
            "UPDATE workspace_members SET role = $1 WHERE workspace_id = $2 AND user_id = $3 RETURNING *",
        )
        .bind(new_role)
        .bind(workspace_id)
        .bind(target_user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(WorkspaceError::NotMember)?;

        Ok(member)
    }

    /// A member may always leave their own workspace, except the sole
    /// remaining owner: transfer ownership first.
    pub async fn leave_workspace(&self, workspace_id: Uuid, user_id: Uuid) -> Result<(), WorkspaceError> {
        let member = self.get_member(workspace_id, user_id).await?;
        if member.role == WorkspaceRole::Owner {
            self.ensure_not_last_owner(workspace_id, user_id).await?;
        }
        sqlx::query("DELETE FROM workspace_members WHERE workspace_id = $1 AND user_id = $2")
            .bind(workspace_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ensure_not_last_owner(&self, workspace_id: Uuid, user_id: Uuid) -> Result<(), WorkspaceError> {
        let owner_count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM workspace_members WHERE workspace_id = $1 AND role = 'owner' AND user_id != $2",
        )
        .bind(workspace_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        if owner_count.0 == 0 {
            return Err(WorkspaceError::LastOwner);
        }
        Ok(())
    }

    /// Deletes the workspace row and its memberships atomically. Callers at
    /// the gateway layer are expected to evict live hub connections and
    /// persist a final CRDT snapshot before invoking this so in-flight
    /// collaborators see a clean close rather than a dangling room.
    pub async fn delete_workspace(&self, workspace_id: Uuid, requester_id: Uuid) -> Result<(), WorkspaceError> {
        self.require_role(workspace_id, requester_id, WorkspaceRole::Owner).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM workspace_members WHERE workspace_id = $1")
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM workspaces WHERE id = $1")
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(WorkspaceError::NotFound);
        }
        tx.commit().await?;

        self.audit
            .log(
                Some(requester_id),
                "workspace.delete",
                "workspace",
                Some(workspace_id),
                "success",
                None,
                None,
                None,
                None,
            )
            .await
            .ok();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_rank_orders_owner_above_editor_above_viewer() {
        let rank = |r: WorkspaceRole| match r {
            WorkspaceRole::Owner => 2,
            WorkspaceRole::Editor => 1,
            WorkspaceRole::Viewer => 0,
        };
        assert!(rank(WorkspaceRole::Owner) > rank(WorkspaceRole::Editor));
        assert!(rank(WorkspaceRole::Editor) > rank(WorkspaceRole::Viewer));
    }
}
