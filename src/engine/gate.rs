//! HTTP Gate
//!
//! axum middleware that resolves the caller from an identity header, runs the
//! access check on the blocking pool and answers 401 when the check fails.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::context::QueryContext;
use crate::engine::rbac::{
    extract_consumer_id, AccessDecision, AccessExpression, AclError, AclService, ConsumerIdError,
    ExpressionError, ResourceScope,
};

pub const DEFAULT_IDENTITY_HEADER: &str = "x-consumer-username";

#[derive(Error, Debug)]
pub enum GateError {
    #[error("missing identity header {0}")]
    MissingIdentity(String),
    #[error("identity header is not valid text")]
    UnreadableIdentity,
    #[error(transparent)]
    InvalidIdentity(#[from] ConsumerIdError),
    #[error("you don't have permission")]
    Denied,
    #[error(transparent)]
    Acl(#[from] AclError),
    #[error("access check aborted: {0}")]
    Aborted(String),
}

impl GateError {
    /// Machine-readable kind carried in the 401 body
    pub fn code(&self) -> &'static str {
        match self {
            GateError::MissingIdentity(_)
            | GateError::UnreadableIdentity
            | GateError::InvalidIdentity(_) => "invalid_identity",
            GateError::Denied => "denied",
            GateError::Acl(_) | GateError::Aborted(_) => "check_failed",
        }
    }
}

/// JSON body of a gate rejection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRejection {
    pub code: String,
    pub message: String,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        // store failures are logged, not echoed to the caller
        let message = match &self {
            GateError::Acl(_) | GateError::Aborted(_) => {
                warn!(error = %self, "access check failed");
                "access check failed".to_string()
            }
            other => other.to_string(),
        };

        let body = GateRejection {
            code: self.code().to_string(),
            message,
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// A parsed expression bound to a service, ready to wrap routes
#[derive(Clone)]
pub struct AclGate {
    service: AclService,
    expression: Arc<AccessExpression>,
    module: Option<String>,
    identity_header: HeaderName,
    timeout: Option<Duration>,
}

impl AclGate {
    /// Parse `expression` once; a bad expression fails here, not per request
    pub fn new(service: AclService, expression: &str) -> Result<Self, ExpressionError> {
        Ok(Self {
            service,
            expression: Arc::new(AccessExpression::parse(expression)?),
            module: None,
            identity_header: HeaderName::from_static(DEFAULT_IDENTITY_HEADER),
            timeout: None,
        })
    }

    /// Scope checks to `module`; the request method completes the scope
    pub fn for_module(mut self, module: &str) -> Self {
        self.module = Some(module.to_string());
        self
    }

    pub fn with_identity_header(mut self, header: HeaderName) -> Self {
        self.identity_header = header;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn expression(&self) -> &AccessExpression {
        &self.expression
    }

    /// Wrap every route already on `router`. Call after the routes are added.
    pub fn guard<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.route_layer(middleware::from_fn_with_state(self, acl_middleware))
    }

    /// Principal ID from the identity header
    pub fn principal(&self, headers: &HeaderMap) -> Result<i64, GateError> {
        let value = headers
            .get(&self.identity_header)
            .ok_or_else(|| GateError::MissingIdentity(self.identity_header.to_string()))?;
        let value = value.to_str().map_err(|_| GateError::UnreadableIdentity)?;
        Ok(extract_consumer_id(value)?)
    }

    /// Run the check on the blocking pool. Dropping the future cancels the
    /// in-flight query.
    pub async fn check(&self, user_id: i64, method: &Method) -> Result<AccessDecision, GateError> {
        let ctx = match self.timeout {
            Some(timeout) => QueryContext::with_timeout(timeout),
            None => QueryContext::background(),
        };
        let _cancel = ctx.cancel_on_drop();

        let service = self.service.clone();
        let expression = Arc::clone(&self.expression);
        let scope = self
            .module
            .as_deref()
            .map(|module| ResourceScope::new(module, method.as_str()));

        let decision = tokio::task::spawn_blocking(move || {
            service.evaluate(&ctx, user_id, &expression, scope.as_ref())
        })
        .await
        .map_err(|e| GateError::Aborted(e.to_string()))??;

        Ok(decision)
    }

    /// Resolve the principal and require an allowing decision
    pub async fn authorize(&self, headers: &HeaderMap, method: &Method) -> Result<i64, GateError> {
        let user_id = self.principal(headers)?;
        let decision = self.check(user_id, method).await?;
        if !decision.allowed {
            debug!(user_id, expression = %self.expression, "gate denied request");
            return Err(GateError::Denied);
        }
        Ok(user_id)
    }
}

/// Middleware entry point for `axum::middleware::from_fn_with_state`
pub async fn acl_middleware(State(gate): State<AclGate>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let user_id = match gate.principal(request.headers()) {
        Ok(user_id) => user_id,
        Err(e) => return e.into_response(),
    };

    match gate.check(user_id, &method).await {
        Ok(decision) if decision.allowed => next.run(request).await,
        Ok(_) => {
            debug!(user_id, expression = %gate.expression, "gate denied request");
            GateError::Denied.into_response()
        }
        Err(e) => e.into_response(),
    }
}
