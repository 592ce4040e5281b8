use super::*;
use axum::{routing::get, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::Mutex};

async fn spawn_device(app: Router) -> HttpDeviceGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    HttpDeviceGateway::new(&DeviceGatewayConfig {
        uri: format!("http://{addr}/"),
        timeout: Duration::from_millis(500),
    })
    .expect("gateway")
}

#[tokio::test]
async fn start_posts_command_and_returns_voter_count() {
    let received = Arc::new(Mutex::new(None::<Value>));
    let sink = received.clone();
    let app = Router::new().route(
        "/voting/start",
        post(move |Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                *sink.lock().await = Some(body);
                Json(json!({ "voter_count": 12 }))
            }
        }),
    );
    let gateway = spawn_device(app).await;

    let count = gateway
        .start_collection(
            CollectionMode::SingleDigit,
            Some(4),
            "http://host/votecollector/candidate/3",
        )
        .await
        .expect("start");
    assert_eq!(count, 12);

    let body = received.lock().await.clone().expect("command body");
    assert_eq!(body["mode"], "SingleDigit");
    assert_eq!(body["options"], 4);
    assert_eq!(body["callback_url"], "http://host/votecollector/candidate/3");
}

#[tokio::test]
async fn error_reply_is_reported_as_rejection() {
    let app = Router::new().route(
        "/voting/stop",
        post(|| async { Json(json!({ "error": "No voting active" })) }),
    );
    let gateway = spawn_device(app).await;

    let err = gateway.stop_collection().await.expect_err("rejected");
    assert_eq!(err, DeviceError::Rejected("No voting active".into()));
}

#[tokio::test]
async fn status_and_result_are_decoded() {
    let app = Router::new()
        .route(
            "/voting/status",
            get(|| async { Json(json!({ "elapsed_seconds": 42, "votes_received": 3 })) }),
        )
        .route(
            "/voting/result",
            get(|| async { Json(json!({ "counts": [2, 1, 0] })) }),
        )
        .route(
            "/device",
            get(|| async { Json(json!({ "status": "Device: VC-200, 30 keypads" })) }),
        );
    let gateway = spawn_device(app).await;

    let status = gateway.query_status().await.expect("status");
    assert_eq!(
        status,
        DeviceStatus {
            elapsed_seconds: 42,
            votes_received: 3
        }
    );
    let result = gateway.query_result().await.expect("result");
    assert_eq!(result.yes_no_abstain(), (2, 1, 0));
    assert_eq!(
        gateway.query_device_status().await.expect("device"),
        "Device: VC-200, 30 keypads"
    );
}

#[tokio::test]
async fn non_success_status_is_surfaced() {
    let gateway = spawn_device(Router::new()).await;
    let err = gateway.query_status().await.expect_err("missing route");
    assert_eq!(err, DeviceError::Status(404));
}

#[tokio::test]
async fn hanging_device_times_out() {
    let app = Router::new().route(
        "/voting/stop",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({ "counts": [] }))
        }),
    );
    let gateway = spawn_device(app).await;

    let err = gateway.stop_collection().await.expect_err("timeout");
    assert_eq!(err, DeviceError::Timeout);
}

#[tokio::test]
async fn unreachable_device_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let gateway = HttpDeviceGateway::new(&DeviceGatewayConfig {
        uri: format!("http://{addr}"),
        timeout: Duration::from_millis(500),
    })
    .expect("gateway");

    let err = gateway.query_device_status().await.expect_err("unreachable");
    assert!(matches!(err, DeviceError::Unreachable(_)));
}

#[test]
fn short_tallies_default_missing_counts_to_zero() {
    let tally = DeviceTally { counts: vec![5] };
    assert_eq!(tally.yes_no_abstain(), (5, 0, 0));
}
