use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use dispatch_service::api::{AppState, router};
use dispatch_service::clients::health::HealthChecker;
use dispatch_service::store::StatusStore;

use crate::support::{Stack, gateway, memory_stack};

fn test_app(stack: &Stack, max_requests: u64) -> Router {
    let state = Arc::new(AppState {
        gateway: gateway(stack, max_requests, Duration::from_secs(60)),
        statuses: stack.statuses.clone(),
        health_checker: HealthChecker::new(
            stack.kv.clone(),
            stack.statuses.clone(),
            Arc::new(stack.broker.clone()),
            Vec::new(),
        ),
    });

    router(state)
}

fn admit_request_body(request_id: &str, user_id: &str) -> Body {
    Body::from(
        json!({
            "request_id": request_id,
            "user_id": user_id,
            "channel": "email",
            "template_code": "welcome",
            "variables": { "name": "Ada" }
        })
        .to_string(),
    )
}

fn post_notification(body: Body) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/notifications")
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap()
}

fn get_status(notification_id: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/api/v1/notifications/{}", notification_id))
        .body(Body::empty())
        .unwrap()
}

async fn response_json(response: axum::response::Response) -> Result<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;

    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn test_unknown_notification_has_no_status_row() -> Result<()> {
    let stack = memory_stack();

    let status = stack.statuses.get(Uuid::new_v4()).await?;

    assert!(status.is_none());

    Ok(())
}

#[tokio::test]
async fn test_status_query_for_unknown_id_returns_404() -> Result<()> {
    let stack = memory_stack();
    let app = test_app(&stack, 100);

    let response = app
        .oneshot(get_status(&Uuid::new_v4().to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = response_json(response).await?;

    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("not_found"));

    Ok(())
}

#[tokio::test]
async fn test_admit_returns_202_with_pollable_id() -> Result<()> {
    let stack = memory_stack();
    let app = test_app(&stack, 100);

    let response = app
        .clone()
        .oneshot(post_notification(admit_request_body("r1", "u1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = response_json(response).await?;

    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["status"], json!("queued"));

    let notification_id = body["data"]["notification_id"].as_str().unwrap().to_string();
    Uuid::parse_str(&notification_id)?;

    // The acknowledged identifier is immediately pollable.
    let response = app.oneshot(get_status(&notification_id)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await?;

    assert_eq!(body["data"]["state"], json!("queued"));
    assert_eq!(body["data"]["user_id"], json!("u1"));

    Ok(())
}

#[tokio::test]
async fn test_invalid_request_maps_to_400() -> Result<()> {
    let stack = memory_stack();
    let app = test_app(&stack, 100);

    let response = app
        .oneshot(post_notification(admit_request_body("r1", "   ")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response_json(response).await?;

    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("invalid_request"));

    Ok(())
}

#[tokio::test]
async fn test_throttled_admission_maps_to_429() -> Result<()> {
    let stack = memory_stack();
    let app = test_app(&stack, 1);

    let response = app
        .clone()
        .oneshot(post_notification(admit_request_body("r1", "u1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .oneshot(post_notification(admit_request_body("r2", "u1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = response_json(response).await?;

    assert_eq!(body["error"], json!("rate_limited"));

    Ok(())
}

#[tokio::test]
async fn test_duplicate_admission_replays_original_acknowledgment() -> Result<()> {
    let stack = memory_stack();
    let app = test_app(&stack, 100);

    let first = app
        .clone()
        .oneshot(post_notification(admit_request_body("r1", "u1")))
        .await
        .unwrap();
    let first_body = response_json(first).await?;

    let second = app
        .oneshot(post_notification(admit_request_body("r1", "u1")))
        .await
        .unwrap();

    assert_eq!(second.status(), StatusCode::ACCEPTED);

    let second_body = response_json(second).await?;

    assert_eq!(
        second_body["data"]["notification_id"],
        first_body["data"]["notification_id"]
    );

    Ok(())
}

#[tokio::test]
async fn test_health_reports_all_backends() -> Result<()> {
    let stack = memory_stack();
    let app = test_app(&stack, 100);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await?;

    assert_eq!(body["status"], json!("healthy"));

    for check in ["cache_store", "status_store", "message_broker"] {
        assert_eq!(body["checks"][check]["status"], json!("healthy"));
    }

    Ok(())
}
