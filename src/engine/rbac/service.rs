//! Access Control Service
//!
//! Registration, assignment and privilege checks over any `AclStore`.
//! The service keeps no state between calls; every check re-queries the store.

use std::sync::Arc;
use tracing::{debug, info};

use super::enforcer::{AccessDecision, Enforcer};
use super::error::{AclError, Result};
use super::expression::{AccessExpression, ResourceScope};
use crate::engine::adapter::{AclStore, Permission, Role, SqliteStore, StoreError, StoreOptions};
use crate::engine::context::QueryContext;
use crate::engine::database::Database;

pub const DEFAULT_SUPERADMIN_ROLE: &str = "Superadmin";

#[derive(Clone)]
pub struct AclService {
    store: Arc<dyn AclStore>,
    superadmin_roles: Arc<[String]>,
}

impl AclService {
    pub fn new(store: Arc<dyn AclStore>) -> Self {
        Self {
            store,
            superadmin_roles: Arc::from(vec![DEFAULT_SUPERADMIN_ROLE.to_string()]),
        }
    }

    /// Build a service over SQLite, validating table names up front
    pub fn sqlite(db: Database, options: StoreOptions) -> Result<Self> {
        let store = SqliteStore::new(db, options)?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Replace the role names that bypass every check. An empty list disables the bypass.
    pub fn with_superadmin_roles(mut self, roles: Vec<String>) -> Self {
        self.superadmin_roles = Arc::from(roles);
        self
    }

    pub fn superadmin_roles(&self) -> &[String] {
        &self.superadmin_roles
    }

    pub fn register_role(&self, ctx: &QueryContext, name: &str) -> Result<Role> {
        let name = validate_name(name)?;
        let id = self.store.create_role(ctx, name)?;
        info!(role = name, id, "registered role");
        Ok(Role {
            id,
            name: name.to_string(),
        })
    }

    pub fn register_permission(&self, ctx: &QueryContext, name: &str) -> Result<Permission> {
        let name = validate_name(name)?;
        let id = self.store.create_permission(ctx, name)?;
        info!(permission = name, id, "registered permission");
        Ok(Permission {
            id,
            name: name.to_string(),
        })
    }

    /// Link every named permission to `role`, atomically.
    ///
    /// Fails without linking anything when the role or any permission is unknown.
    pub fn assign_permissions_to_role(
        &self,
        ctx: &QueryContext,
        role: &str,
        permissions: &[String],
    ) -> Result<()> {
        let role_id = self.resolve_role(ctx, role)?;
        if permissions.is_empty() {
            debug!(role, "no permissions to assign");
            return Ok(());
        }

        let permission_ids = self.store.permission_ids_by_name(ctx, permissions)?;
        self.store
            .give_permissions_to_role(ctx, role_id, &permission_ids)?;

        info!(role, permissions = ?permissions, "assigned permissions to role");
        Ok(())
    }

    pub fn assign_user_to_role(&self, ctx: &QueryContext, user_id: i64, role: &str) -> Result<()> {
        let role_id = self.resolve_role(ctx, role)?;
        self.store.give_role_to_user(ctx, user_id, role_id)?;
        info!(user_id, role, "assigned user to role");
        Ok(())
    }

    /// Grant a permission to an account directly, outside any role
    pub fn assign_permission_to_user(
        &self,
        ctx: &QueryContext,
        user_id: i64,
        permission: &str,
    ) -> Result<()> {
        let ids = self
            .store
            .permission_ids_by_name(ctx, &[permission.to_string()])?;
        let permission_id = ids
            .first()
            .copied()
            .ok_or_else(|| StoreError::PermissionNotFound(vec![permission.to_string()]))?;

        self.store.give_permission_to_user(ctx, user_id, permission_id)?;
        info!(user_id, permission, "granted permission to user");
        Ok(())
    }

    pub fn list_roles(&self, ctx: &QueryContext) -> Result<Vec<Role>> {
        Ok(self.store.list_roles(ctx)?)
    }

    pub fn list_permissions(&self, ctx: &QueryContext) -> Result<Vec<Permission>> {
        Ok(self.store.list_permissions(ctx)?)
    }

    /// Parse `expression` and decide whether `user_id` satisfies it
    pub fn check_access(
        &self,
        ctx: &QueryContext,
        user_id: i64,
        expression: &str,
        scope: Option<&ResourceScope>,
    ) -> Result<bool> {
        let expression = AccessExpression::parse(expression)?;
        Ok(self.evaluate(ctx, user_id, &expression, scope)?.allowed)
    }

    /// Evaluate an already parsed expression, reporting which check granted access
    pub fn evaluate(
        &self,
        ctx: &QueryContext,
        user_id: i64,
        expression: &AccessExpression,
        scope: Option<&ResourceScope>,
    ) -> Result<AccessDecision> {
        Enforcer::new(self.store.as_ref(), &self.superadmin_roles)
            .evaluate(ctx, user_id, expression, scope)
    }

    fn resolve_role(&self, ctx: &QueryContext, role: &str) -> Result<i64> {
        let ids = self.store.role_ids_by_name(ctx, &[role.to_string()])?;
        ids.first()
            .copied()
            .ok_or_else(|| StoreError::RoleNotFound(vec![role.to_string()]).into())
    }
}

/// Names must be non-blank and free of the expression separators
fn validate_name(name: &str) -> Result<&str> {
    let reserved = |c: char| matches!(c, '|' | ':' | ',');
    if name.trim().is_empty() || name.contains(reserved) {
        return Err(AclError::InvalidName(name.to_string()));
    }
    Ok(name)
}
