//! HTTP surface tests, driven through the router without a socket

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use opsgate::audit::{AuditAction, AuditEntry, AuditOutcome, AuditSink};
use opsgate::authn::{Identity, JwtVerifier};
use opsgate::server::serve::router;
use opsgate::server::state::ServerState;
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;

use crate::common::{fast_settings, fixture, snapshot, Fixture};

const SECRET: &str = "test-secret-0123456789";

fn verifier() -> JwtVerifier {
    JwtVerifier::new(SecretString::from(SECRET.to_string()))
}

fn token(identity: &Identity) -> String {
    verifier().issue(identity, Duration::from_secs(300)).unwrap()
}

fn app(f: &Fixture) -> Router {
    router(Arc::new(ServerState::new(f.gateway.clone(), Arc::new(verifier()))))
}

async fn call(app: Router, method: Method, uri: &str, identity: Option<&Identity>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(identity) = identity {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token(identity)));
    }

    let resp = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let f = fixture(snapshot(None), fast_settings());
    let (status, body) = call(app(&f), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_missing_or_bad_token_is_401() {
    let f = fixture(snapshot(None), fast_settings());

    let (status, body) = call(app(&f), Method::GET, "/api/services", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");

    let other = JwtVerifier::new(SecretString::from("another-secret".to_string()));
    let forged = other.issue(&Identity::admin("root"), Duration::from_secs(60)).unwrap();
    let req = Request::builder()
        .uri("/api/processes")
        .header(header::AUTHORIZATION, format!("Bearer {}", forged))
        .body(Body::empty())
        .unwrap();
    let resp = app(&f).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(f.supervisor.calls(), 0);
}

#[tokio::test]
async fn test_service_listing_is_filtered() {
    let f = fixture(snapshot(None), fast_settings());

    let (status, body) = call(app(&f), Method::GET, "/api/services", Some(&Identity::team("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["services"][0]["id"], "api");

    let (_, body) = call(app(&f), Method::GET, "/api/services", Some(&Identity::admin("root"))).await;
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn test_restart_status_codes() {
    let f = fixture(snapshot(None), fast_settings());

    let (status, body) = call(app(&f), Method::POST, "/api/services/api/restart", Some(&Identity::team("bob"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, _) = call(app(&f), Method::POST, "/api/services/ghost/restart", Some(&Identity::admin("root"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(app(&f), Method::POST, "/api/services/api/restart", Some(&Identity::team("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service_id"], "api");
    assert_eq!(f.supervisor.restarted(), vec![3]);

    f.supervisor.set_down(true);
    let (status, body) = call(app(&f), Method::POST, "/api/services/api/restart", Some(&Identity::team("alice"))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "supervisor_unavailable");
}

#[tokio::test]
async fn test_logs_tolerate_bad_line_counts() {
    let f = fixture(snapshot(None), fast_settings());
    let alice = Identity::team("alice");

    let (status, body) = call(app(&f), Method::GET, "/api/services/api/logs?lines=5", Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lines"].as_array().unwrap().len(), 5);

    let (status, body) = call(app(&f), Method::GET, "/api/services/api/logs?lines=abc", Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lines"].as_array().unwrap().len(), 100);
}

#[tokio::test]
async fn test_deploy_without_script_is_409() {
    let f = fixture(snapshot(None), fast_settings());
    let (status, body) = call(app(&f), Method::POST, "/api/services/api/deploy", Some(&Identity::team("alice"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "deploy_not_configured");
}

#[cfg(unix)]
#[tokio::test]
async fn test_deploy_is_accepted_then_polled() {
    let dir = tempfile::tempdir().unwrap();
    let script = crate::common::write_script(dir.path(), "deploy.sh", "echo ok");
    let f = fixture(snapshot(Some(script)), fast_settings());
    let alice = Identity::team("alice");

    let (status, body) = call(app(&f), Method::POST, "/api/services/api/deploy", Some(&alice)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let status_url = body["status_url"].as_str().unwrap().to_string();
    assert!(status_url.starts_with("/api/deploys/"));

    let mut last = Value::Null;
    for _ in 0..200 {
        let (status, body) = call(app(&f), Method::GET, &status_url, Some(&alice)).await;
        assert_eq!(status, StatusCode::OK);
        last = body;
        if last["state"] == "succeeded" || last["state"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(last["state"], "succeeded");
    assert!(last["stdout_tail"].as_str().unwrap().contains("ok"));

    let (status, _) = call(app(&f), Method::GET, &status_url, Some(&Identity::team("bob"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_or_malformed_job_id() {
    let f = fixture(snapshot(None), fast_settings());
    let root = Identity::admin("root");

    let uri = format!("/api/deploys/{}", uuid::Uuid::new_v4());
    let (status, body) = call(app(&f), Method::GET, &uri, Some(&root)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, body) = call(app(&f), Method::GET, "/api/deploys/not-a-uuid", Some(&root)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
    assert!(body["message"].as_str().unwrap().contains("not-a-uuid"));

    let (status, body) = call(app(&f), Method::POST, "/api/deploys/not-a-uuid/cancel", Some(&root)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_admin_endpoints() {
    let f = fixture(snapshot(None), fast_settings());

    let (status, _) = call(app(&f), Method::GET, "/api/processes", Some(&Identity::team("alice"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(app(&f), Method::GET, "/api/audit", Some(&Identity::team("alice"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(app(&f), Method::GET, "/api/processes", Some(&Identity::admin("root"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn test_audit_pagination() {
    let f = fixture(snapshot(None), fast_settings());
    let root = Identity::admin("root");

    for n in 0..5 {
        let entry = AuditEntry::for_service_id(
            &format!("user-{}", n),
            AuditAction::Restart,
            "api",
            "API",
            None,
            AuditOutcome::Succeeded,
        );
        f.audit.append(&entry).await.unwrap();
    }

    let (status, body) = call(app(&f), Method::GET, "/api/audit?limit=2&page=2", Some(&root)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["limit"], 2);
    assert_eq!(body["pagination"]["page"], 2);
    let logs = body["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 2);
    // Newest first: user-4, user-3 | user-2, user-1 | user-0
    assert_eq!(logs[0]["actor_id"], "user-2");
    assert_eq!(logs[1]["actor_id"], "user-1");

    let (_, body) = call(app(&f), Method::GET, "/api/audit?limit=0&page=-3", Some(&root)).await;
    assert_eq!(body["pagination"]["limit"], 50);
    assert_eq!(body["pagination"]["page"], 1);
    assert_eq!(body["logs"].as_array().unwrap().len(), 5);
}
