// Rolegate Engine - Core module structure
pub mod adapter;
pub mod api;
pub mod cli;
pub mod config;
pub mod context;
pub mod database;
pub mod gate;
pub mod rbac;

pub use adapter::{AclStore, SqliteStore, StoreError, StoreOptions};
pub use config::Config;
pub use context::QueryContext;
pub use database::Database;
pub use gate::{AclGate, GateError};
pub use rbac::{AccessExpression, AclError, AclService, ResourceScope};
