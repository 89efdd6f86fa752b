//! Rolegate - role/permission access control over SQL storage
//!
//! Roles, permissions and their links to accounts live in SQL tables.
//! `AclService` registers and assigns them and answers privilege checks
//! written as `role:a,b|permission:x,y`; `AclGate` puts such a check in
//! front of axum routes.

pub mod engine;

pub use engine::{
    AccessExpression, AclError, AclGate, AclService, AclStore, Config, Database, GateError,
    QueryContext, ResourceScope, SqliteStore, StoreError, StoreOptions,
};
