//! Access Control Error Types

use thiserror::Error;

use super::expression::ExpressionError;
use crate::engine::adapter::StoreError;

#[derive(Error, Debug)]
pub enum AclError {
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AclError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, AclError::Store(e) if e.is_duplicate())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AclError::Store(e) if e.is_not_found())
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, AclError::Store(e) if e.is_interrupted())
    }
}

pub type Result<T> = std::result::Result<T, AclError>;
