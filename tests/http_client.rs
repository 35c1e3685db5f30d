//! HTTP inference client against a local stub `/predict` endpoint.

use approx::assert_relative_eq;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use fall_monitor_rs::{
    simulated_fall_sample, Engine, EngineConfig, EngineState, HttpInferenceClient,
    InferenceClient, LogNotifier, MergedSample, Notice, SensorAdapter, SensorReading,
    TransportError,
};

type Captured = Arc<Mutex<Vec<Value>>>;

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Stub that records every body and answers with `response`.
fn recording_app(captured: Captured, response: Value) -> Router {
    Router::new()
        .route(
            "/predict",
            post(
                move |State(captured): State<Captured>, Json(body): Json<Value>| {
                    let response = response.clone();
                    async move {
                        captured.lock().unwrap().push(body);
                        Json(response)
                    }
                },
            ),
        )
        .with_state(captured)
}

fn client(base: &str) -> HttpInferenceClient {
    let config = EngineConfig::default().with_service_url(base);
    HttpInferenceClient::from_config(&config)
}

fn sample() -> MergedSample {
    MergedSample::new(
        SensorReading::new(-5.37, 0.08, 6.32),
        SensorReading::new(0.01, 2.37, -0.22),
    )
}

#[tokio::test]
async fn test_classify_posts_both_sensors() {
    let captured = Captured::default();
    let base = serve(recording_app(
        captured.clone(),
        json!({"fall_detected": true, "predicted_activity": "fall"}),
    ))
    .await;

    let result = client(&base).classify(&sample()).await.unwrap();
    assert!(result.fall_detected);
    assert_eq!(result.predicted_activity, "fall");

    let bodies = captured.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];
    assert_relative_eq!(body["accelerometer"]["x"].as_f64().unwrap(), -5.37);
    assert_relative_eq!(body["accelerometer"]["z"].as_f64().unwrap(), 6.32);
    assert_relative_eq!(body["gyroscope"]["y"].as_f64().unwrap(), 2.37);
    assert!(body.get("timestamp").is_none());
}

#[tokio::test]
async fn test_non_success_status_is_transport_error() {
    let app = Router::new().route(
        "/predict",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded") }),
    );
    let base = serve(app).await;

    let error = client(&base).classify(&sample()).await.unwrap_err();
    assert_eq!(error, TransportError::Status(500));
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let app = Router::new().route(
        "/predict",
        post(|| async { Json(json!({"label": "fall"})) }),
    );
    let base = serve(app).await;

    let error = client(&base).classify(&sample()).await.unwrap_err();
    assert!(matches!(error, TransportError::Decode(_)), "{:?}", error);
}

#[tokio::test]
async fn test_connection_refused_is_request_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let error = client(&format!("http://{}", addr))
        .classify(&sample())
        .await
        .unwrap_err();
    assert!(matches!(error, TransportError::Request(_)), "{:?}", error);
}

#[tokio::test]
async fn test_request_timeout() {
    let app = Router::new().route(
        "/predict",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"fall_detected": false, "predicted_activity": "ADL"}))
        }),
    );
    let base = serve(app).await;

    let mut config = EngineConfig::default().with_service_url(&base);
    config.request_timeout = Some(Duration::from_millis(100));
    let client = HttpInferenceClient::from_config(&config);

    let error = client.classify(&sample()).await.unwrap_err();
    assert_eq!(error, TransportError::Timeout);
}

#[tokio::test]
async fn test_engine_prompts_on_remote_fall() {
    let captured = Captured::default();
    let base = serve(recording_app(
        captured.clone(),
        json!({"fall_detected": true, "predicted_activity": "fall"}),
    ))
    .await;

    let config = EngineConfig::default().with_service_url(&base);
    let adapter = SensorAdapter::synthetic(&config);
    let classifier = Arc::new(HttpInferenceClient::from_config(&config));
    let (handle, _task) = Engine::spawn(config, adapter, classifier, Box::new(LogNotifier)).unwrap();
    let mut notices = handle.notices();

    assert_eq!(handle.start().await.unwrap(), EngineState::Monitoring);
    assert!(handle.simulate_fall().await.unwrap());

    let mut watch = handle.watch();
    tokio::time::timeout(
        Duration::from_secs(5),
        watch.wait_for(|view| view.state == EngineState::AwaitingConfirmation),
    )
    .await
    .expect("no fall prompt")
    .unwrap();

    let view = handle.view();
    assert!(!view.accelerometer_subscribed && !view.gyroscope_subscribed);
    assert_eq!(view.last_activity.as_deref(), Some("fall"));

    let body = captured.lock().unwrap()[0].clone();
    let expected = simulated_fall_sample();
    assert_relative_eq!(
        body["accelerometer"]["x"].as_f64().unwrap(),
        expected.accelerometer.x
    );
    assert_relative_eq!(
        body["gyroscope"]["y"].as_f64().unwrap(),
        expected.gyroscope.y
    );

    let mut seen = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        seen.push(notice);
    }
    assert_eq!(seen.first(), Some(&Notice::MockData));
    assert!(seen.contains(&Notice::FallPrompt {
        predicted_activity: "fall".to_string()
    }));

    assert_eq!(handle.deny_fall().await.unwrap(), EngineState::Monitoring);
    handle.shutdown().await;
}
