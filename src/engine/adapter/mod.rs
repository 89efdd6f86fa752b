//! Storage Adapter Layer
//!
//! Trait-based abstraction over the relational store holding roles,
//! permissions and their links. SQLite is the shipped backend.

pub mod sqlite;

pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::engine::context::{Interruption, QueryContext};
use crate::engine::database::DatabaseError;

/// Universal result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Core store trait. Every call is a single round trip except
/// `give_permissions_to_role`, which runs inside one transaction.
pub trait AclStore: Send + Sync {
    /// Insert a role, returning its new ID
    fn create_role(&self, ctx: &QueryContext, name: &str) -> StoreResult<i64>;

    /// Insert a permission, returning its new ID
    fn create_permission(&self, ctx: &QueryContext, name: &str) -> StoreResult<i64>;

    /// Resolve role names to IDs in request order.
    /// Fails with `RoleNotFound` listing every name that has no row.
    fn role_ids_by_name(&self, ctx: &QueryContext, names: &[String]) -> StoreResult<Vec<i64>>;

    /// Resolve permission names to IDs in request order.
    /// Fails with `PermissionNotFound` listing every name that has no row.
    fn permission_ids_by_name(&self, ctx: &QueryContext, names: &[String]) -> StoreResult<Vec<i64>>;

    /// IDs of whichever `names` are registered, in request order. Unknown
    /// names are skipped, so an empty result means none matched.
    fn find_role_ids(&self, ctx: &QueryContext, names: &[String]) -> StoreResult<Vec<i64>>;

    /// Lenient counterpart of `permission_ids_by_name`, used by evaluation
    fn find_permission_ids(&self, ctx: &QueryContext, names: &[String]) -> StoreResult<Vec<i64>>;

    /// Link permissions to a role, all or nothing
    fn give_permissions_to_role(
        &self,
        ctx: &QueryContext,
        role_id: i64,
        permission_ids: &[i64],
    ) -> StoreResult<()>;

    /// Link a role to an account
    fn give_role_to_user(&self, ctx: &QueryContext, user_id: i64, role_id: i64) -> StoreResult<()>;

    /// Grant a permission directly to an account
    fn give_permission_to_user(
        &self,
        ctx: &QueryContext,
        user_id: i64,
        permission_id: i64,
    ) -> StoreResult<()>;

    /// Every role name attached to the account, used for the superadmin check
    fn account_role_names(&self, ctx: &QueryContext, user_id: i64) -> StoreResult<Vec<String>>;

    /// Permission names the account holds through membership in any of `role_ids`
    fn role_permissions_for_account(
        &self,
        ctx: &QueryContext,
        user_id: i64,
        role_ids: &[i64],
    ) -> StoreResult<Vec<String>>;

    /// Permission names granted directly to the account, restricted to `permission_ids`
    fn direct_permissions_for_account(
        &self,
        ctx: &QueryContext,
        user_id: i64,
        permission_ids: &[i64],
    ) -> StoreResult<Vec<String>>;

    fn list_roles(&self, ctx: &QueryContext) -> StoreResult<Vec<Role>>;

    fn list_permissions(&self, ctx: &QueryContext) -> StoreResult<Vec<Permission>>;
}

/// A stored role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: i64,
    pub name: String,
}

/// A stored permission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: i64,
    pub name: String,
}

/// Table names the store is built against.
///
/// The account table is owned by the host application; the store only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    #[serde(default = "default_account_table")]
    pub account_table: String,
    #[serde(default = "default_user_roles_table")]
    pub user_roles_table: String,
    /// Optional role column on the account table, read by the superadmin check
    #[serde(default)]
    pub account_role_column: Option<String>,
}

pub const DEFAULT_ACCOUNT_TABLE: &str = "users";
pub const DEFAULT_USER_ROLES_TABLE: &str = "user_has_roles";

fn default_account_table() -> String {
    DEFAULT_ACCOUNT_TABLE.to_string()
}

fn default_user_roles_table() -> String {
    DEFAULT_USER_ROLES_TABLE.to_string()
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            account_table: default_account_table(),
            user_roles_table: default_user_roles_table(),
            account_role_column: None,
        }
    }
}

impl StoreOptions {
    pub fn with_account_table(mut self, table: &str) -> Self {
        self.account_table = table.to_string();
        self
    }

    pub fn with_user_roles_table(mut self, table: &str) -> Self {
        self.user_roles_table = table.to_string();
        self
    }

    pub fn with_account_role_column(mut self, column: &str) -> Self {
        self.account_role_column = Some(column.to_string());
        self
    }

    /// Table and column names are spliced into SQL, so they must be plain identifiers
    pub fn validate(&self) -> StoreResult<()> {
        validate_identifier(&self.account_table)?;
        validate_identifier(&self.user_roles_table)?;
        if let Some(column) = &self.account_role_column {
            validate_identifier(column)?;
        }
        Ok(())
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`
pub fn validate_identifier(name: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Store errors, classified into the access-control taxonomy
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Duplicate role: {0}")]
    DuplicateRole(String),

    #[error("Duplicate permission: {0}")]
    DuplicatePermission(String),

    #[error("User {user_id} already has role {role_id}")]
    DuplicateUserRole { user_id: i64, role_id: i64 },

    #[error("User {user_id} already has permission {permission_id}")]
    DuplicateUserPermission { user_id: i64, permission_id: i64 },

    #[error("Role {role_id} already has permission {permission_id}")]
    DuplicateRolePermission { role_id: i64, permission_id: i64 },

    #[error("Role not found: {}", .0.join(", "))]
    RoleNotFound(Vec<String>),

    #[error("Permission not found: {}", .0.join(", "))]
    PermissionNotFound(Vec<String>),

    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Query deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Query error: {0}")]
    Query(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateRole(_)
                | StoreError::DuplicatePermission(_)
                | StoreError::DuplicateUserRole { .. }
                | StoreError::DuplicateUserPermission { .. }
                | StoreError::DuplicateRolePermission { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::RoleNotFound(_) | StoreError::PermissionNotFound(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, StoreError::Cancelled | StoreError::DeadlineExceeded)
    }
}

impl From<Interruption> for StoreError {
    fn from(reason: Interruption) -> Self {
        match reason {
            Interruption::Cancelled => StoreError::Cancelled,
            Interruption::DeadlineExceeded => StoreError::DeadlineExceeded,
        }
    }
}
