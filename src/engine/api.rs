//! Rolegate API Module
//! Admin REST API over the access-control service, with OpenAPI documentation

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post, MethodRouter},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;
use utoipa::{OpenApi, ToSchema};

use crate::engine::adapter::{Permission, Role};
use crate::engine::context::QueryContext;
use crate::engine::gate::{acl_middleware, AclGate};
use crate::engine::rbac::{
    AccessDecision, AccessExpression, AclError, AclService, Grant, ResourceScope,
};

#[derive(Clone)]
pub struct ApiState {
    pub service: AclService,
    /// Deadline applied to every store call made by a request
    pub timeout: Option<Duration>,
}

impl ApiState {
    pub fn new(service: AclService) -> Self {
        Self {
            service,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn context(&self) -> QueryContext {
        match self.timeout {
            Some(timeout) => QueryContext::with_timeout(timeout),
            None => QueryContext::background(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        list_roles,
        create_role,
        list_permissions,
        create_permission,
        grant_permissions,
        assign_role,
        assign_permission,
        check_access,
    ),
    components(schemas(
        Role,
        Permission,
        NameRequest,
        GrantRequest,
        AssignRoleRequest,
        AssignPermissionRequest,
        CheckRequest,
        AccessDecision,
        Grant,
    )),
    tags(
        (name = "roles", description = "Role registry"),
        (name = "permissions", description = "Permission registry"),
        (name = "users", description = "Account assignments"),
        (name = "access", description = "Privilege checks"),
    )
)]
pub struct ApiDoc;

/// Build the admin router. When `admin_gate` is set, every mutating route
/// sits behind it; reads, checks and health stay open.
pub fn create_router(state: ApiState, admin_gate: Option<AclGate>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let guarded = |route: MethodRouter<ApiState>| match &admin_gate {
        Some(gate) => route.route_layer(middleware::from_fn_with_state(gate.clone(), acl_middleware)),
        None => route,
    };

    Router::new()
        .route("/api/roles", get(list_roles))
        .route("/api/roles", guarded(post(create_role)))
        .route("/api/permissions", get(list_permissions))
        .route("/api/permissions", guarded(post(create_permission)))
        .route("/api/roles/{role}/permissions", guarded(post(grant_permissions)))
        .route("/api/users/{user_id}/roles", guarded(post(assign_role)))
        .route("/api/users/{user_id}/permissions", guarded(post(assign_permission)))
        .route("/api/check", post(check_access))
        .route("/api/openapi.json", get(openapi))
        .route("/api/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }

    fn internal(message: String) -> Self {
        error!(error = %message, "admin request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AclError> for ApiError {
    fn from(err: AclError) -> Self {
        let status = match &err {
            AclError::InvalidName(_) | AclError::Expression(_) => StatusCode::BAD_REQUEST,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            e if e.is_duplicate() => StatusCode::CONFLICT,
            e if e.is_interrupted() => StatusCode::GATEWAY_TIMEOUT,
            _ => return Self::internal(err.to_string()),
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Run a service call on the blocking pool; an abandoned request cancels it
async fn blocking<T, F>(state: &ApiState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AclService, &QueryContext) -> Result<T, AclError> + Send + 'static,
    T: Send + 'static,
{
    let ctx = state.context();
    let _cancel = ctx.cancel_on_drop();
    let service = state.service.clone();

    tokio::task::spawn_blocking(move || f(&service, &ctx))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .map_err(ApiError::from)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantRequest {
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignPermissionRequest {
    pub permission: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckRequest {
    pub user_id: i64,
    pub expression: String,
    /// Module half of the scope; requires `method`
    pub module: Option<String>,
    pub method: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/roles",
    responses(
        (status = 200, description = "Registered roles", body = Vec<Role>)
    ),
    tag = "roles"
)]
async fn list_roles(State(state): State<ApiState>) -> Result<Json<Vec<Role>>, ApiError> {
    blocking(&state, |service, ctx| service.list_roles(ctx))
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/api/roles",
    request_body = NameRequest,
    responses(
        (status = 201, description = "Role registered", body = Role),
        (status = 400, description = "Invalid name"),
        (status = 409, description = "Role already exists")
    ),
    tag = "roles"
)]
async fn create_role(
    State(state): State<ApiState>,
    Json(body): Json<NameRequest>,
) -> Result<(StatusCode, Json<Role>), ApiError> {
    let role = blocking(&state, move |service, ctx| service.register_role(ctx, &body.name)).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    get,
    path = "/api/permissions",
    responses(
        (status = 200, description = "Registered permissions", body = Vec<Permission>)
    ),
    tag = "permissions"
)]
async fn list_permissions(State(state): State<ApiState>) -> Result<Json<Vec<Permission>>, ApiError> {
    blocking(&state, |service, ctx| service.list_permissions(ctx))
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/api/permissions",
    request_body = NameRequest,
    responses(
        (status = 201, description = "Permission registered", body = Permission),
        (status = 400, description = "Invalid name"),
        (status = 409, description = "Permission already exists")
    ),
    tag = "permissions"
)]
async fn create_permission(
    State(state): State<ApiState>,
    Json(body): Json<NameRequest>,
) -> Result<(StatusCode, Json<Permission>), ApiError> {
    let permission =
        blocking(&state, move |service, ctx| service.register_permission(ctx, &body.name)).await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

#[utoipa::path(
    post,
    path = "/api/roles/{role}/permissions",
    params(
        ("role" = String, Path, description = "Role name"),
    ),
    request_body = GrantRequest,
    responses(
        (status = 204, description = "Permissions linked"),
        (status = 404, description = "Unknown role or permission"),
        (status = 409, description = "A permission is already linked")
    ),
    tag = "roles"
)]
async fn grant_permissions(
    State(state): State<ApiState>,
    Path(role): Path<String>,
    Json(body): Json<GrantRequest>,
) -> Result<StatusCode, ApiError> {
    blocking(&state, move |service, ctx| {
        service.assign_permissions_to_role(ctx, &role, &body.permissions)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/users/{user_id}/roles",
    params(
        ("user_id" = i64, Path, description = "Account ID"),
    ),
    request_body = AssignRoleRequest,
    responses(
        (status = 204, description = "Role assigned"),
        (status = 404, description = "Unknown role"),
        (status = 409, description = "Account already holds the role")
    ),
    tag = "users"
)]
async fn assign_role(
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
    Json(body): Json<AssignRoleRequest>,
) -> Result<StatusCode, ApiError> {
    blocking(&state, move |service, ctx| {
        service.assign_user_to_role(ctx, user_id, &body.role)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/users/{user_id}/permissions",
    params(
        ("user_id" = i64, Path, description = "Account ID"),
    ),
    request_body = AssignPermissionRequest,
    responses(
        (status = 204, description = "Permission granted"),
        (status = 404, description = "Unknown permission"),
        (status = 409, description = "Account already holds the permission")
    ),
    tag = "users"
)]
async fn assign_permission(
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
    Json(body): Json<AssignPermissionRequest>,
) -> Result<StatusCode, ApiError> {
    blocking(&state, move |service, ctx| {
        service.assign_permission_to_user(ctx, user_id, &body.permission)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/check",
    request_body = CheckRequest,
    responses(
        (status = 200, description = "Access decision", body = AccessDecision),
        (status = 400, description = "Malformed expression or partial scope"),
        (status = 504, description = "Check cancelled or timed out")
    ),
    tag = "access"
)]
async fn check_access(
    State(state): State<ApiState>,
    Json(body): Json<CheckRequest>,
) -> Result<Json<AccessDecision>, ApiError> {
    let scope = match (body.module.as_deref(), body.method.as_deref()) {
        (Some(module), Some(method)) => Some(ResourceScope::new(module, method)),
        (None, None) => None,
        _ => return Err(ApiError::bad_request("module and method must be given together")),
    };
    let expression =
        AccessExpression::parse(&body.expression).map_err(|e| ApiError::from(AclError::from(e)))?;

    blocking(&state, move |service, ctx| {
        service.evaluate(ctx, body.user_id, &expression, scope.as_ref())
    })
    .await
    .map(Json)
}
