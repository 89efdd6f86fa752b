//! RBAC Enforcement Layer
//!
//! Privilege evaluation: superadmin short-circuit, then the role path, then
//! the direct-permission path.

use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use super::error::Result;
use super::expression::{AccessExpression, ResourceScope};
use crate::engine::adapter::{AclStore, StoreResult};
use crate::engine::context::QueryContext;

/// Which check granted access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Grant {
    Superadmin,
    Role,
    Permission,
}

/// Evaluation outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccessDecision {
    pub allowed: bool,
    pub granted_by: Option<Grant>,
    pub reason: Option<String>,
}

impl AccessDecision {
    pub fn allow(grant: Grant) -> Self {
        Self {
            allowed: true,
            granted_by: Some(grant),
            reason: None,
        }
    }

    pub fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            granted_by: None,
            reason: Some(reason.to_string()),
        }
    }
}

/// The enforcement engine
pub struct Enforcer<'a> {
    store: &'a dyn AclStore,
    superadmin_roles: &'a [String],
}

impl<'a> Enforcer<'a> {
    pub fn new(store: &'a dyn AclStore, superadmin_roles: &'a [String]) -> Self {
        Self {
            store,
            superadmin_roles,
        }
    }

    /// Decide whether `user_id` satisfies `expression`.
    ///
    /// Unknown role or permission names are skipped; a path grants nothing
    /// only when none of its names are registered. Any store failure in an
    /// evaluated path is returned as an error.
    pub fn evaluate(
        &self,
        ctx: &QueryContext,
        user_id: i64,
        expression: &AccessExpression,
        scope: Option<&ResourceScope>,
    ) -> Result<AccessDecision> {
        if self.is_superadmin(ctx, user_id)? {
            debug!(user_id, "superadmin short-circuit");
            return Ok(AccessDecision::allow(Grant::Superadmin));
        }

        if expression.is_empty() {
            return Ok(AccessDecision::deny("Expression requires no role or permission"));
        }

        if self.check_role_access(ctx, user_id, &expression.roles, scope)? {
            debug!(user_id, roles = ?expression.roles, "granted through role");
            return Ok(AccessDecision::allow(Grant::Role));
        }

        if self.check_permission_access(ctx, user_id, &expression.permissions, scope)? {
            debug!(user_id, permissions = ?expression.permissions, "granted through permission");
            return Ok(AccessDecision::allow(Grant::Permission));
        }

        debug!(user_id, %expression, "access denied");
        Ok(AccessDecision::deny("Insufficient permissions"))
    }

    fn is_superadmin(&self, ctx: &QueryContext, user_id: i64) -> StoreResult<bool> {
        if self.superadmin_roles.is_empty() {
            return Ok(false);
        }
        let names = self.store.account_role_names(ctx, user_id)?;
        Ok(names.iter().any(|name| self.superadmin_roles.contains(name)))
    }

    fn check_role_access(
        &self,
        ctx: &QueryContext,
        user_id: i64,
        roles: &[String],
        scope: Option<&ResourceScope>,
    ) -> StoreResult<bool> {
        if roles.is_empty() {
            return Ok(false);
        }

        let role_ids = self.store.find_role_ids(ctx, roles)?;
        if role_ids.is_empty() {
            debug!(user_id, roles = ?roles, "no requested role is registered");
            return Ok(false);
        }

        let granted = self.store.role_permissions_for_account(ctx, user_id, &role_ids)?;
        Ok(matches_scope(&granted, scope))
    }

    fn check_permission_access(
        &self,
        ctx: &QueryContext,
        user_id: i64,
        permissions: &[String],
        scope: Option<&ResourceScope>,
    ) -> StoreResult<bool> {
        if permissions.is_empty() {
            return Ok(false);
        }

        let permission_ids = self.store.find_permission_ids(ctx, permissions)?;
        if permission_ids.is_empty() {
            debug!(user_id, permissions = ?permissions, "no requested permission is registered");
            return Ok(false);
        }

        let granted = self
            .store
            .direct_permissions_for_account(ctx, user_id, &permission_ids)?;
        Ok(matches_scope(&granted, scope))
    }
}

/// Without a scope any grant counts; with one, the exact `module.method` name must be held
fn matches_scope(granted: &[String], scope: Option<&ResourceScope>) -> bool {
    match scope {
        Some(scope) => {
            let expected = scope.permission_name();
            granted.iter().any(|name| *name == expected)
        }
        None => !granted.is_empty(),
    }
}
