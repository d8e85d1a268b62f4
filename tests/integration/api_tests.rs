//! HTTP API tests driven through the router with `tower::ServiceExt`.

use std::time::Duration;

use axum::body::Body;
use axum::Router;
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use tsr_analyzer::config::AnalysisConfig;
use tsr_analyzer::server::{create_router, AppState, Job, JobStatus, JobsResponse, RouterConfig};

use super::test_utils::{temp_file, temp_root};

fn router() -> Router {
    create_router(
        AppState::new(AnalysisConfig::default(), 2, temp_root()),
        RouterConfig::new().with_tracing(false),
    )
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Prediction table with a 10x10 tumor field around a 4x4 stroma block,
/// written into the data root; returns its file name.
fn predictions_file(name: &str) -> String {
    let mut csv = String::from("patch,class\n");
    for r in 0..10 {
        for c in 0..10 {
            let class = if (3..7).contains(&r) && (3..7).contains(&c) { 1 } else { 2 };
            csv.push_str(&format!("{}_{},{}\n", r * 256, c * 256, class));
        }
    }
    temp_file(name, csv.as_bytes());
    name.to_string()
}

async fn wait_finished(router: &Router, id: u64) -> Job {
    for _ in 0..200 {
        let (status, body) = send(router, get(&format!("/api/jobs/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        let job: Job = serde_json::from_slice(&body).unwrap();
        if job.status.is_finished() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {} did not finish", id);
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send(&router(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_analyze_without_mpp_is_rejected() {
    let request = post_json("/api/analyze", json!({ "predictions": "none.csv" }));
    let (status, body) = send(&router(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "invalid_request");
}

#[tokio::test]
async fn test_analyze_job_completes() {
    let router = router();
    let predictions = predictions_file("api_predictions.csv");
    let request = post_json(
        "/api/analyze",
        json!({
            "predictions": predictions,
            "mpp": 0.25,
            "magnification": 40,
            "name": "api-slide"
        }),
    );
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job: Job = serde_json::from_slice(&body).unwrap();
    assert_eq!(job.slide, "api-slide");

    let finished = wait_finished(&router, job.id).await;
    assert_eq!(finished.status, JobStatus::Completed, "{:?}", finished.error);
    let report = finished.report.unwrap();
    assert_eq!(report.tile_count, 100);
    assert_eq!(report.stroma_count, 16);
    assert_eq!(report.tsr, 16.0);

    let (status, body) = send(&router, get("/api/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    let list: JobsResponse = serde_json::from_slice(&body).unwrap();
    assert!(list.jobs.iter().any(|j| j.id == job.id));
}

#[tokio::test]
async fn test_missing_predictions_become_job_error() {
    let router = router();
    let request = post_json(
        "/api/analyze",
        json!({ "predictions": "missing/api.csv", "mpp": 0.25 }),
    );
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job: Job = serde_json::from_slice(&body).unwrap();

    let finished = wait_finished(&router, job.id).await;
    assert_eq!(finished.status, JobStatus::Error);
    assert!(finished.error.unwrap().contains("not found"));
    assert!(finished.report.is_none());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let (status, body) = send(&router(), get("/api/jobs/424242")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn test_malformed_job_id() {
    let (status, _) = send(&router(), get("/api/jobs/abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_paths_outside_data_root_are_forbidden() {
    let router = router();
    let outside = temp_file("api_outside.csv", b"patch,class\n0_0,1\n");
    for predictions in [
        outside.display().to_string(),
        "../api_outside.csv".to_string(),
        "nested/../../api_outside.csv".to_string(),
    ] {
        let request = post_json("/api/analyze", json!({ "predictions": predictions, "mpp": 0.25 }));
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", predictions);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "forbidden");
    }

    let request = post_json(
        "/api/analyze",
        json!({ "predictions": "api_ok.csv", "slide": "/etc/slide.svs" }),
    );
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = send(&router, get("/api/jobs")).await;
    let list: JobsResponse = serde_json::from_slice(&body).unwrap();
    assert!(list.jobs.is_empty());
}

#[tokio::test]
async fn test_request_cannot_choose_output_file() {
    let router = router();
    let target = temp_file("api_keep_me.txt", b"IMPORTANT DATA");
    let predictions = predictions_file("api_no_write.csv");
    for denoised_out in [target.display().to_string(), "api_keep_me.txt".to_string()] {
        let request = post_json(
            "/api/analyze",
            json!({ "predictions": predictions, "mpp": 0.25, "denoised_out": denoised_out }),
        );
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job: Job = serde_json::from_slice(&body).unwrap();
        let finished = wait_finished(&router, job.id).await;
        assert_eq!(finished.status, JobStatus::Completed, "{:?}", finished.error);
    }
    assert_eq!(std::fs::read(&target).unwrap(), b"IMPORTANT DATA");
}
