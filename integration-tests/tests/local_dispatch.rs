//! Integration tests for local request processing.
//!
//! A client posts to `/v1/...`, the gateway queues the request and a
//! simulated module long-polls the queue and posts the answer back.

use anyhow::Result;
use common::{TestNode, VISION_MODULE, VISION_QUEUE, spawn_worker, standalone_settings};
use serde_json::{Value, json};
use std::time::Duration;

mod common;

/// A multipart upload reaches the module and its answer comes back enriched.
#[tokio::test]
async fn test_multipart_detection_round_trip() -> Result<()> {
    let node = TestNode::spawn("node-a", standalone_settings()).await?;
    let worker = spawn_worker(&node, VISION_QUEUE, VISION_MODULE, Duration::ZERO, |request| {
        let file = &request["payload"]["files"][0];
        json!({
            "success": true,
            "command": request["payload"]["command"],
            "file": file["filename"],
            "predictions": [{ "label": "cat", "confidence": 0.92 }],
        })
    });

    let part = reqwest::multipart::Part::bytes(vec![1, 2, 3, 4])
        .file_name("cat.jpg")
        .mime_str("image/jpeg")?;
    let form = reqwest::multipart::Form::new()
        .text("min_confidence", "0.4")
        .part("image", part);
    let response = node
        .client
        .post(node.url("v1/vision/detection"))
        .multipart(form)
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["command"], "detect");
    assert_eq!(body["file"], "cat.jpg");
    assert_eq!(body["predictions"][0]["label"], "cat");
    assert_eq!(body["processedBy"], "localhost");
    assert!(body["analysisRoundTripMs"].is_u64());
    assert!(
        body["timestampUTC"].as_str().is_some_and(|t| t.ends_with(" GMT")),
        "timestamp should be RFC 1123: {body}"
    );

    let status = node.state.processes().get(VISION_MODULE).expect("module registered");
    assert_eq!(status.request_count, 1);

    worker.abort();
    node.stop().await
}

/// Extra path segments and query values are handed to the module.
#[tokio::test]
async fn test_segments_and_query_reach_module() -> Result<()> {
    let node = TestNode::spawn("node-a", standalone_settings()).await?;
    let worker = spawn_worker(&node, VISION_QUEUE, VISION_MODULE, Duration::ZERO, |request| {
        json!({
            "success": true,
            "segments": request["payload"]["urlSegments"],
            "values": request["payload"]["values"],
        })
    });

    let (status, body) = node
        .post_form("v1/vision/custom/ipcam-general?threshold=0.5", &[("extra", "1")])
        .await?;

    assert_eq!(status, 200);
    assert_eq!(body["segments"], json!(["ipcam-general"]));
    let keys: Vec<&str> = body["values"]
        .as_array()
        .expect("values array")
        .iter()
        .filter_map(|v| v["Key"].as_str())
        .collect();
    assert!(keys.contains(&"threshold"), "query value missing: {body}");
    assert!(keys.contains(&"extra"), "form value missing: {body}");

    worker.abort();
    node.stop().await
}

/// Routes nobody serves answer 404.
#[tokio::test]
async fn test_unknown_route_is_not_found() -> Result<()> {
    let node = TestNode::spawn("node-a", standalone_settings()).await?;

    let (status, body) = node.post_form("v1/audio/transcribe", &[]).await?;

    assert_eq!(status, 404);
    assert_eq!(body["success"], false);
    node.stop().await
}

/// Without a module the request times out into an error envelope.
#[tokio::test]
async fn test_module_timeout_returns_error_envelope() -> Result<()> {
    let mut settings = standalone_settings();
    settings.queue.response_timeout_ms = 200;
    let node = TestNode::spawn("node-a", settings).await?;

    let (status, body) = node.post_form("v1/vision/detection", &[]).await?;

    assert_eq!(status, 200);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], 500);
    assert!(
        body["error"].as_str().is_some_and(|e| e.contains("timed out")),
        "unexpected error: {body}"
    );
    assert_eq!(body["processedBy"], "localhost");
    assert!(body["analysisRoundTripMs"].as_u64().is_some_and(|ms| ms >= 200));
    node.stop().await
}

/// A response for a request nobody waits on is refused.
#[tokio::test]
async fn test_response_without_waiter_is_rejected() -> Result<()> {
    let node = TestNode::spawn("node-a", standalone_settings()).await?;

    let response = node
        .client
        .post(node.url("v1/queue/no-such-request"))
        .body(r#"{"success":true,"moduleId":"vision"}"#)
        .send()
        .await?;

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await?;
    assert_eq!(body["error"], "failure to set response.");
    node.stop().await
}

/// Polling registers the module; status updates merge into its record.
#[tokio::test]
async fn test_module_status_updates() -> Result<()> {
    let node = TestNode::spawn("node-a", standalone_settings()).await?;

    let polled: Option<Value> = node
        .client
        .get(node.url("v1/queue/vision_queue?moduleId=vision&executionProvider=CUDA&canUseGPU=true"))
        .send()
        .await?
        .json()
        .await?;
    assert!(polled.is_none(), "queue should be empty");

    let status = node.state.processes().get(VISION_MODULE).expect("module registered");
    assert_eq!(status.inference_device.as_deref(), Some("GPU"));
    assert!(status.can_use_gpu);

    let response = node
        .client
        .post(node.url("v1/queue/updatemodulestatus/vision"))
        .form(&[("statusData", r#"{"model":"yolo"}"#)])
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await?, "Module status updated");

    let status = node.state.processes().get(VISION_MODULE).expect("module registered");
    assert_eq!(status.status_data, Some(json!({ "model": "yolo" })));

    let response = node
        .client
        .post(node.url("v1/queue/updatemodulestatus/unknown"))
        .form(&[("statusData", "{}")])
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    node.stop().await
}

/// Health and metrics endpoints answer.
#[tokio::test]
async fn test_control_plane_endpoints() -> Result<()> {
    let node = TestNode::spawn("node-a", standalone_settings()).await?;

    for path in ["health/live", "health/ready", "metrics"] {
        let response = node.client.get(node.url(path)).send().await?;
        assert_eq!(response.status(), 200, "{path}");
    }

    node.stop().await
}
