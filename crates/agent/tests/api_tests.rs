//! Integration tests for the agent API endpoints

#[allow(dead_code)]
#[path = "../src/api.rs"]
mod api;

use api::{create_router, AppState};
use autoscaler_lib::{
    clock::ManualClock,
    health::{components, HealthRegistry},
    maintenance::{MaintenanceLoopBuilder, SpoolSource},
    metrics_db::MetricsStore,
    models::{HostSnapshot, MetricSnapshot},
    observability::AgentMetrics,
    Clock,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;
    AgentMetrics::new();

    let state = Arc::new(AppState::new(health_registry));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_gc_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::GC, "partition drop failed")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    // Degraded is still operational
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["gc"]["message"], "partition drop failed");
}

#[tokio::test]
async fn test_healthz_returns_503_when_store_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::METRICS_STORE, "corrupted after repair")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_until_store_open() {
    let (app, _state) = setup_test_app().await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_ready_but_unhealthy() {
    let (app, state) = setup_test_app().await;

    state.health_registry.set_ready(true).await;
    state
        .health_registry
        .set_unhealthy(components::METRICS_STORE, "Failed")
        .await;

    let (status, _) = get_json(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_healthz_includes_component_details() {
    let (app, _state) = setup_test_app().await;

    let (_, health) = get_json(app, "/healthz").await;

    assert!(health["components"].is_object());
    for name in components::ALL {
        assert!(health["components"][name].is_object(), "missing {name}");
    }
}

#[tokio::test]
async fn test_metrics_reflect_a_maintenance_cycle() {
    let (app, state) = setup_test_app().await;
    let dir = tempfile::TempDir::new().unwrap();
    let clock = ManualClock::at("2020-10-01T00:00:00").unwrap();
    let store = Arc::new(MetricsStore::open(dir.path().join("data"), Arc::new(clock.clone())).unwrap());
    let spool = Arc::new(SpoolSource::new(dir.path().join("spool")));
    spool
        .enqueue(&[HostSnapshot::new(
            "host1",
            MetricSnapshot {
                at: clock.now(),
                cpu: 0.3,
                memory: 0.2,
                disk: 0.1,
                generation: 1,
                in_service: true,
                stable: true,
                query_rate: 5.0,
            },
        )])
        .await
        .unwrap();

    let maintenance = MaintenanceLoopBuilder::new()
        .store(store)
        .source(spool)
        .health(state.health_registry.clone())
        .build()
        .unwrap();
    maintenance.collect_once().await.unwrap();
    maintenance.gc_once().await.unwrap();

    let (status, body) = get(app, "/metrics").await;
    let metrics_text = String::from_utf8(body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(metrics_text.contains("autoscaler_snapshots_written_total"));
    assert!(metrics_text.contains("autoscaler_metrics_add_latency_seconds_bucket"));
    assert!(metrics_text.contains("autoscaler_metrics_add_latency_seconds_count"));
    assert!(metrics_text.contains("autoscaler_metrics_partitions 1"));
    assert!(metrics_text.contains("autoscaler_metrics_watermark_seconds 1601510400"));
}

#[tokio::test]
async fn test_metrics_served_in_prometheus_text_format() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain; version=0.0.4"));
}

#[tokio::test]
async fn test_store_is_not_exposed() {
    let (app, _state) = setup_test_app().await;

    let (status, _) = get(app, "/timeseries").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
