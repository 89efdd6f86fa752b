//! RBAC Module
//!
//! Store-backed role/permission access control

pub mod consumer;
pub mod enforcer;
pub mod error;
pub mod expression;
pub mod service;

pub use consumer::{extract_consumer_id, ConsumerIdError};
pub use enforcer::{AccessDecision, Enforcer, Grant};
pub use error::AclError;
pub use expression::{AccessExpression, ExpressionError, ResourceScope};
pub use service::{AclService, DEFAULT_SUPERADMIN_ROLE};
