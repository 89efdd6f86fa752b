//! Access Expressions
//!
//! Parses the compact `role:a,b|permission:c` form into an `AccessExpression`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

const CLAUSE_SEPARATOR: char = '|';
const KEY_SEPARATOR: char = ':';
const NAME_SEPARATOR: char = ',';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("Invalid expression clause {0:?}: expected key:value")]
    Malformed(String),
    #[error("Unknown key {0:?}, valid keys: role, permission")]
    UnknownKey(String),
    #[error("Key {0:?} appears more than once")]
    DuplicateKey(String),
    #[error("Empty name in clause {0:?}")]
    EmptyName(String),
}

/// Which dimension a clause constrains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKey {
    Role,
    Permission,
}

impl ClauseKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClauseKey::Role => "role",
            ClauseKey::Permission => "permission",
        }
    }
}

impl FromStr for ClauseKey {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "role" => Ok(ClauseKey::Role),
            "permission" => Ok(ClauseKey::Permission),
            other => Err(ExpressionError::UnknownKey(other.to_string())),
        }
    }
}

/// Required roles and permissions. Either list satisfied grants access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccessExpression {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl AccessExpression {
    pub fn parse(input: &str) -> Result<Self, ExpressionError> {
        let mut roles: Option<Vec<String>> = None;
        let mut permissions: Option<Vec<String>> = None;

        for clause in input.split(CLAUSE_SEPARATOR) {
            let (key, value) = split_clause(clause)?;
            let key: ClauseKey = key.parse()?;
            let names = split_names(clause, value)?;

            let slot = match key {
                ClauseKey::Role => &mut roles,
                ClauseKey::Permission => &mut permissions,
            };
            if slot.is_some() {
                return Err(ExpressionError::DuplicateKey(key.as_str().to_string()));
            }
            *slot = Some(names);
        }

        Ok(Self {
            roles: roles.unwrap_or_default(),
            permissions: permissions.unwrap_or_default(),
        })
    }

    pub fn roles(roles: &[&str]) -> Self {
        Self {
            roles: roles.iter().map(|r| r.to_string()).collect(),
            permissions: vec![],
        }
    }

    pub fn permissions(permissions: &[&str]) -> Self {
        Self {
            roles: vec![],
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.permissions.is_empty()
    }
}

impl FromStr for AccessExpression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AccessExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut clauses = Vec::with_capacity(2);
        if !self.roles.is_empty() {
            clauses.push(format!("role:{}", self.roles.join(",")));
        }
        if !self.permissions.is_empty() {
            clauses.push(format!("permission:{}", self.permissions.join(",")));
        }
        write!(f, "{}", clauses.join("|"))
    }
}

fn split_clause(clause: &str) -> Result<(&str, &str), ExpressionError> {
    let mut parts = clause.split(KEY_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => Ok((key, value)),
        _ => Err(ExpressionError::Malformed(clause.to_string())),
    }
}

fn split_names(clause: &str, value: &str) -> Result<Vec<String>, ExpressionError> {
    value
        .split(NAME_SEPARATOR)
        .map(|name| {
            if name.is_empty() {
                Err(ExpressionError::EmptyName(clause.to_string()))
            } else {
                Ok(name.to_string())
            }
        })
        .collect()
}

/// Module/method pair a permission match is restricted to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResourceScope {
    pub module: String,
    pub method: String,
}

impl ResourceScope {
    pub fn new(module: &str, method: &str) -> Self {
        Self {
            module: module.to_string(),
            method: method.to_string(),
        }
    }

    /// `products` + `GET` -> `products.get`
    pub fn permission_name(&self) -> String {
        format!("{}.{}", self.module.to_lowercase(), self.method.to_lowercase())
    }
}
