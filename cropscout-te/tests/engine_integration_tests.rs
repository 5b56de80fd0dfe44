//! End-to-end engine tests against stub capability services
//!
//! Spins up real HTTP stubs for the classifier, analyzers, retrieval,
//! and grower context, then drives observations through the public API
//! and waits for the published diagnosis.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

use cropscout_common::events::{EventBus, ScoutEvent};
use cropscout_te::config::{AnalyzerConfig, EngineConfig};
use cropscout_te::AppState;

/// Bind a stub service on an OS-assigned port and return its base URL
async fn spawn_stub(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}

fn classifier_stub(label: &'static str, confidence: f64) -> axum::Router {
    use axum::routing::post;
    axum::Router::new().route(
        "/classify",
        post(move || async move {
            axum::Json(json!({
                "classification": label,
                "confidence": confidence,
            }))
        }),
    )
}

fn analyzer_stub(condition: &'static str, confidence: f64, calls: Arc<AtomicU32>) -> axum::Router {
    use axum::routing::post;
    axum::Router::new().route(
        "/analyze",
        post(move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                axum::Json(json!({
                    "condition": condition,
                    "confidence": confidence,
                    "severity": 0.6,
                    "details": "stub analysis",
                }))
            }
        }),
    )
}

fn context_stub() -> axum::Router {
    use axum::routing::get;
    axum::Router::new().route(
        "/growers/:grower_id/context",
        get(|| async {
            axum::Json(json!({
                "region": "willamette",
                "crop": "hazelnut",
                "weather_summary": "cool and wet",
            }))
        }),
    )
}

fn retrieval_stub() -> axum::Router {
    use axum::routing::post;
    axum::Router::new().route(
        "/retrieve",
        post(|| async {
            axum::Json(json!({
                "passages": [
                    {
                        "reference": "ipm-handbook-12",
                        "excerpt": "Aphid colonies cluster on new growth.",
                        "similarity": 0.82,
                    }
                ]
            }))
        }),
    )
}

struct TestEngine {
    app: axum::Router,
    events: tokio::sync::broadcast::Receiver<ScoutEvent>,
    shutdown: CancellationToken,
    handle: cropscout_te::EngineHandle,
    _dir: tempfile::TempDir,
}

/// Stand up the engine over stub services
async fn start_test_engine(config: EngineConfig) -> TestEngine {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = cropscout_te::db::init_database_pool(&dir.path().join("cropscout.db"))
        .await
        .expect("init database");

    let params = cropscout_te::db::settings::load_engine_params(&db)
        .await
        .expect("load params");
    let event_bus = Arc::new(EventBus::new(64));
    let events = event_bus.subscribe();
    let shutdown = CancellationToken::new();

    let (aggregation, handle) = cropscout_te::start_engine(
        db.clone(),
        event_bus.clone(),
        params,
        &config,
        shutdown.clone(),
    )
    .await
    .expect("start engine");

    let state = AppState::new(db, event_bus, aggregation);
    let app = cropscout_te::build_router(state);

    TestEngine {
        app,
        events,
        shutdown,
        handle,
        _dir: dir,
    }
}

async fn post_json(
    app: &axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Poll until the window's diagnosis is published
async fn wait_for_diagnosis(app: &axum::Router, window_id: &str) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let (status, json) = get_json(app, &format!("/windows/{}/diagnosis", window_id)).await;
        if status == StatusCode::OK {
            return json;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "diagnosis for window {} never published",
            window_id
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn stop(engine: TestEngine) {
    engine.shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), engine.handle.pipeline).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), engine.handle.sweeper).await;
}

#[tokio::test]
async fn test_critical_observation_flows_to_diagnosis() {
    let pest_calls = Arc::new(AtomicU32::new(0));
    let pathology_calls = Arc::new(AtomicU32::new(0));

    let config = EngineConfig {
        classifier_url: spawn_stub(classifier_stub("pest_pressure", 0.9)).await,
        context_url: spawn_stub(context_stub()).await,
        retrieval_url: spawn_stub(retrieval_stub()).await,
        analyzers: vec![
            AnalyzerConfig {
                id: "pest".to_string(),
                endpoint: spawn_stub(analyzer_stub("aphid infestation", 0.85, pest_calls.clone()))
                    .await,
                domain: "pest_management".to_string(),
            },
            AnalyzerConfig {
                id: "pathology".to_string(),
                endpoint: spawn_stub(analyzer_stub("leaf blight", 0.4, pathology_calls.clone()))
                    .await,
                domain: "plant_pathology".to_string(),
            },
        ],
        routes: Vec::new(),
    };

    let mut engine = start_test_engine(config).await;

    // Critical severity promotes the window on its first event
    let (status, submitted) = post_json(
        &engine.app,
        "/observations",
        json!({
            "grower_id": "grower-e2e",
            "severity_hint": 0.9,
            "payload": {"note": "sticky residue and curled leaves"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(submitted["ready_trigger"], "critical_bypass");

    let window_id = submitted["window_id"].as_str().expect("window id");
    let diagnosis = wait_for_diagnosis(&engine.app, window_id).await;

    assert_eq!(diagnosis["grower_id"], "grower-e2e");
    assert_eq!(diagnosis["window_id"], submitted["window_id"]);
    assert_eq!(diagnosis["triage"]["classification"], "pest_pressure");
    assert_eq!(diagnosis["triage"]["flagged_for_review"], false);

    // High confidence routes the primary analyzer alone
    let findings = diagnosis["findings"].as_array().expect("findings");
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0]["analyzer_id"], "pest");
    assert_eq!(findings[0]["condition"], "aphid infestation");
    assert_eq!(findings[0]["succeeded"], true);
    assert_eq!(pest_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pathology_calls.load(Ordering::SeqCst), 0);

    // Retrieved passages surface as citations
    let citations = findings[0]["citations"].as_array().expect("citations");
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0]["domain"], "pest_management");
    assert_eq!(citations[0]["reference"], "ipm-handbook-12");

    // Window reached its terminal state
    let (_, window) = get_json(&engine.app, &format!("/windows/{}", window_id)).await;
    assert_eq!(window["status"], "triaged");

    // DiagnosisReady went out over the bus
    let mut saw_ready = false;
    while let Ok(event) = engine.events.try_recv() {
        if let ScoutEvent::DiagnosisReady {
            window_id: ready_window,
            top_condition,
            ..
        } = event
        {
            assert_eq!(ready_window.to_string(), window_id);
            assert_eq!(top_condition.as_deref(), Some("aphid infestation"));
            saw_ready = true;
        }
    }
    assert!(saw_ready, "expected a DiagnosisReady event");

    stop(engine).await;
}

#[tokio::test]
async fn test_moderate_confidence_consults_plausible_set() {
    let pest_calls = Arc::new(AtomicU32::new(0));
    let pathology_calls = Arc::new(AtomicU32::new(0));

    let config = EngineConfig {
        classifier_url: spawn_stub(classifier_stub("pest_pressure", 0.5)).await,
        context_url: spawn_stub(context_stub()).await,
        // Retrieval disabled; analyzers degrade to no knowledge context
        retrieval_url: String::new(),
        analyzers: vec![
            AnalyzerConfig {
                id: "pest".to_string(),
                endpoint: spawn_stub(analyzer_stub("thrips damage", 0.55, pest_calls.clone()))
                    .await,
                domain: "pest_management".to_string(),
            },
            AnalyzerConfig {
                id: "pathology".to_string(),
                endpoint: spawn_stub(analyzer_stub("downy mildew", 0.7, pathology_calls.clone()))
                    .await,
                domain: "plant_pathology".to_string(),
            },
        ],
        routes: Vec::new(),
    };

    let engine = start_test_engine(config).await;

    let (_, submitted) = post_json(
        &engine.app,
        "/observations",
        json!({
            "grower_id": "grower-mid",
            "severity_hint": 0.85,
            "payload": {"note": "patchy silvering on leaves"}
        }),
    )
    .await;
    let window_id = submitted["window_id"].as_str().expect("window id");

    let diagnosis = wait_for_diagnosis(&engine.app, window_id).await;

    // Medium confidence consults the plausible set without flagging
    assert_eq!(diagnosis["triage"]["classification"], "pest_pressure");
    assert_eq!(diagnosis["triage"]["flagged_for_review"], false);
    assert_eq!(pest_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pathology_calls.load(Ordering::SeqCst), 1);

    // Findings are concatenated and ordered by confidence
    let findings = diagnosis["findings"].as_array().expect("findings");
    assert_eq!(findings.len(), 2);
    assert_eq!(findings[0]["condition"], "downy mildew");
    assert_eq!(findings[1]["condition"], "thrips damage");

    // Degraded retrieval is noted in the finding details
    let details = findings[0]["details"].as_str().expect("details");
    assert!(details.contains("analyzed without knowledge context"));

    stop(engine).await;
}

#[tokio::test]
async fn test_low_confidence_flags_for_review_and_routes_all() {
    let pest_calls = Arc::new(AtomicU32::new(0));
    let pathology_calls = Arc::new(AtomicU32::new(0));

    let config = EngineConfig {
        classifier_url: spawn_stub(classifier_stub("water_stress", 0.2)).await,
        context_url: spawn_stub(context_stub()).await,
        retrieval_url: String::new(),
        analyzers: vec![
            AnalyzerConfig {
                id: "pest".to_string(),
                endpoint: spawn_stub(analyzer_stub("spider mites", 0.3, pest_calls.clone())).await,
                domain: "pest_management".to_string(),
            },
            AnalyzerConfig {
                id: "pathology".to_string(),
                endpoint: spawn_stub(analyzer_stub("root rot", 0.45, pathology_calls.clone()))
                    .await,
                domain: "plant_pathology".to_string(),
            },
        ],
        routes: Vec::new(),
    };

    let engine = start_test_engine(config).await;

    let (_, submitted) = post_json(
        &engine.app,
        "/observations",
        json!({"grower_id": "grower-low", "severity_hint": 0.9}),
    )
    .await;
    let window_id = submitted["window_id"].as_str().expect("window id");

    let diagnosis = wait_for_diagnosis(&engine.app, window_id).await;

    // Below the review threshold the classification is discarded and
    // every routed analyzer weighs in
    assert_eq!(diagnosis["triage"]["classification"], "unknown");
    assert_eq!(diagnosis["triage"]["flagged_for_review"], true);
    assert!(pest_calls.load(Ordering::SeqCst) >= 1);
    assert!(pathology_calls.load(Ordering::SeqCst) >= 1);

    // The routing table names four analyzers but only two are deployed;
    // the missing ones surface as failed findings after the successes
    let findings = diagnosis["findings"].as_array().expect("findings");
    assert_eq!(findings.len(), 4);
    assert_eq!(findings[0]["succeeded"], true);
    assert_eq!(findings[1]["succeeded"], true);
    assert_eq!(findings[2]["succeeded"], false);
    assert_eq!(findings[3]["succeeded"], false);

    stop(engine).await;
}
