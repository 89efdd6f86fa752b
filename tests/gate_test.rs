use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::get;
use axum::Router;
use rolegate::engine::adapter::StoreOptions;
use rolegate::engine::context::QueryContext;
use rolegate::engine::database::Database;
use rolegate::engine::gate::{AclGate, GateRejection, DEFAULT_IDENTITY_HEADER};
use rolegate::engine::rbac::{AccessExpression, AclService, Grant};
use tower::ServiceExt;

/// Accounts: 1 reader (products.get), 2 writer (products.post), 3 Superadmin, 4 nothing
fn service() -> (Database, AclService) {
    let db = Database::in_memory().unwrap();
    let options = StoreOptions::default();
    db.init_acl_schema(&options).unwrap();
    db.ensure_account_table(&options).unwrap();
    for id in 1..=4 {
        db.ensure_account(&options, id).unwrap();
    }

    let service = AclService::sqlite(db.clone(), options).unwrap();
    let ctx = QueryContext::background();
    for role in ["reader", "writer", "Superadmin"] {
        service.register_role(&ctx, role).unwrap();
    }
    service.register_permission(&ctx, "products.get").unwrap();
    service.register_permission(&ctx, "products.post").unwrap();
    service
        .assign_permissions_to_role(&ctx, "reader", &["products.get".to_string()])
        .unwrap();
    service
        .assign_permissions_to_role(&ctx, "writer", &["products.post".to_string()])
        .unwrap();
    service.assign_user_to_role(&ctx, 1, "reader").unwrap();
    service.assign_user_to_role(&ctx, 2, "writer").unwrap();
    service.assign_user_to_role(&ctx, 3, "Superadmin").unwrap();
    (db, service)
}

async fn whoami(headers: HeaderMap) -> String {
    headers
        .get(DEFAULT_IDENTITY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn app(gate: AclGate) -> Router {
    gate.guard(Router::new().route("/products", get(whoami).post(whoami)))
}

fn request(method: &str, identity: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri("/products");
    if let Some(identity) = identity {
        builder = builder.header(DEFAULT_IDENTITY_HEADER, identity);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn rejection(response: axum::response::Response) -> GateRejection {
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn test_allowed_request_reaches_handler_unchanged() {
    let (_db, service) = service();
    let app = app(AclGate::new(service, "role:reader").unwrap());

    let response = app.oneshot(request("GET", Some("consumer:1"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "consumer:1");
}

#[tokio::test]
async fn test_identity_problems_are_unauthorized() {
    let (_db, service) = service();
    let app = app(AclGate::new(service, "role:reader").unwrap());

    for identity in [None, Some("consumer"), Some("consumer:abc"), Some("a:b:c")] {
        let response = app.clone().oneshot(request("GET", identity)).await.unwrap();
        let body = rejection(response).await;
        assert_eq!(body.code, "invalid_identity", "{identity:?}");
    }
}

#[tokio::test]
async fn test_denied_account() {
    let (_db, service) = service();
    let app = app(AclGate::new(service, "role:reader|permission:products.get").unwrap());

    let response = app.oneshot(request("GET", Some("consumer:4"))).await.unwrap();
    let body = rejection(response).await;
    assert_eq!(body.code, "denied");
    assert_eq!(body.message, "you don't have permission");
}

#[tokio::test]
async fn test_module_scope_uses_request_method() {
    let (_db, service) = service();
    let app = app(
        AclGate::new(service, "role:reader,writer")
            .unwrap()
            .for_module("products"),
    );

    let cases = [
        ("GET", "consumer:1", StatusCode::OK),
        ("POST", "consumer:1", StatusCode::UNAUTHORIZED),
        ("GET", "consumer:2", StatusCode::UNAUTHORIZED),
        ("POST", "consumer:2", StatusCode::OK),
        ("POST", "consumer:3", StatusCode::OK),
    ];
    for (method, identity, expected) in cases {
        let response = app
            .clone()
            .oneshot(request(method, Some(identity)))
            .await
            .unwrap();
        assert_eq!(response.status(), expected, "{method} as {identity}");
    }
}

#[tokio::test]
async fn test_superadmin_passes_unregistered_permission() {
    let (_db, service) = service();
    let app = app(AclGate::new(service, "permission:unregistered").unwrap());

    let response = app.clone().oneshot(request("GET", Some("consumer:3"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(request("GET", Some("consumer:1"))).await.unwrap();
    assert_eq!(rejection(response).await.code, "denied");
}

#[test]
fn test_superadmin_passes_empty_expression() {
    let (_db, service) = service();
    let ctx = QueryContext::background();
    let empty = AccessExpression::default();

    let decision = service.evaluate(&ctx, 3, &empty, None).unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.granted_by, Some(Grant::Superadmin));

    assert!(!service.evaluate(&ctx, 1, &empty, None).unwrap().allowed);
    assert!(!service.evaluate(&ctx, 4, &empty, None).unwrap().allowed);
}

#[tokio::test]
async fn test_store_failure_is_unauthorized_without_details() {
    let (db, service) = service();
    let app = app(AclGate::new(service, "role:reader").unwrap());

    db.get_connection()
        .unwrap()
        .execute_batch("DROP TABLE role_has_permissions")
        .unwrap();

    let response = app.oneshot(request("GET", Some("consumer:1"))).await.unwrap();
    let body = rejection(response).await;
    assert_eq!(body.code, "check_failed");
    assert!(!body.message.contains("role_has_permissions"));
}

#[tokio::test]
async fn test_custom_identity_header() {
    let (_db, service) = service();
    let gate = AclGate::new(service, "role:reader")
        .unwrap()
        .with_identity_header("x-user".parse().unwrap());
    let app = gate.guard(Router::new().route("/products", get(|| async { "ok" })));

    let response = app
        .clone()
        .oneshot(request("GET", Some("consumer:1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::get("/products")
        .header("x-user", "svc:1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
