// crates/server/tests/jobs_api.rs
//! End-to-end tests for the jobs API: start, poll, push-stream, cancel and
//! acknowledge, against real (tiny) images on disk.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use image::{Rgba, RgbaImage};
use tower::ServiceExt;

use stamper_core::{Template, TemplateKind};
use stamper_server::{create_app, AppConfig, AppState};

struct Fixture {
    app: Router,
    state: Arc<AppState>,
    // Held for their Drop cleanup.
    _store_dir: tempfile::TempDir,
    input_dir: tempfile::TempDir,
    output_dir: tempfile::TempDir,
}

fn write_png(path: &Path, rgba: [u8; 4]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbaImage::from_pixel(24, 24, Rgba(rgba)).save(path).unwrap();
}

/// A working setup: an input tree of valid PNGs, a watermark mark image and
/// one stored image-kind template (image templates need no system font).
fn fixture(input_files: &[&str]) -> Fixture {
    let store_dir = tempfile::tempdir().unwrap();
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();

    for name in input_files {
        write_png(&input_dir.path().join(name), [200, 30, 30, 255]);
    }
    let mark = store_dir.path().join("mark.png");
    write_png(&mark, [30, 30, 200, 255]);

    let config = AppConfig {
        templates_path: store_dir.path().join("templates.json"),
        ..AppConfig::default()
    };
    let state = AppState::new(config).unwrap();
    state
        .templates
        .upsert(
            "logo",
            Template {
                kind: TemplateKind::Image,
                image_path: Some(mark),
                ..Template::default()
            },
        )
        .unwrap();

    Fixture {
        app: create_app(Arc::clone(&state)),
        state,
        _store_dir: store_dir,
        input_dir,
        output_dir,
    }
}

fn start_body(fx: &Fixture, job_id: Option<&str>) -> String {
    let mut body = serde_json::json!({
        "inputDir": fx.input_dir.path(),
        "templateName": "logo",
        "outputDir": fx.output_dir.path(),
    });
    if let Some(id) = job_id {
        body["jobId"] = serde_json::json!(id);
    }
    body.to_string()
}

async fn post_json(app: &Router, uri: &str, body: String) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn poll_until_terminal(app: &Router, job_id: &str) -> serde_json::Value {
    for _ in 0..1000 {
        let (status, snap) = get_json(app, &format!("/api/jobs/{job_id}")).await;
        assert_eq!(status, StatusCode::OK, "poll failed: {snap}");
        let state = snap["state"].as_str().unwrap().to_string();
        if state == "done" || state == "cancelled" || state == "failed" {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_poll_acknowledge_roundtrip() {
    let fx = fixture(&["a.png", "b.png", "sub/c.png"]);

    let (status, started) = post_json(&fx.app, "/api/jobs", start_body(&fx, None)).await;
    assert_eq!(status, StatusCode::ACCEPTED, "start failed: {started}");
    assert_eq!(started["total"], 3);
    let job_id = started["jobId"].as_str().unwrap().to_string();

    let snap = poll_until_terminal(&fx.app, &job_id).await;
    assert_eq!(snap["state"], "done");
    assert_eq!(snap["done"], 3);
    assert_eq!(snap["errors"], 0);
    assert_eq!(snap["total"], 3);

    // Outputs preserve each file's path relative to the input root.
    assert!(fx.output_dir.path().join("a.png").exists());
    assert!(fx.output_dir.path().join("sub/c.png").exists());

    // Acknowledge evicts; a later poll is a clean 404.
    let response = fx
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/jobs/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (status, _) = get_json(&fx.app, &format!("/api/jobs/{job_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crafted_failures_are_counted_not_fatal() {
    let fx = fixture(&[
        "f0.png", "f1.png", "f2.png", "f3.png", "f4.png", "f5.png", "f6.png", "f7.png",
    ]);
    // Two files that cannot decode.
    std::fs::write(fx.input_dir.path().join("bad1.png"), b"not a png").unwrap();
    std::fs::write(fx.input_dir.path().join("bad2.png"), b"also not a png").unwrap();

    let (status, started) = post_json(&fx.app, "/api/jobs", start_body(&fx, None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["total"], 10);
    let job_id = started["jobId"].as_str().unwrap();

    let snap = poll_until_terminal(&fx.app, job_id).await;
    assert_eq!(snap["state"], "done");
    assert_eq!(snap["done"], 8);
    assert_eq!(snap["errors"], 2);
    assert_eq!(snap["errorSamples"].as_array().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn push_stream_delivers_start_progress_done() {
    let fx = fixture(&["a.png", "b.png", "c.png", "d.png", "e.png"]);

    let uri = format!(
        "/api/jobs/stream?inputDir={}&templateName=logo&outputDir={}&jobId=push-1",
        urlencode(fx.input_dir.path()),
        urlencode(fx.output_dir.path()),
    );
    let response = fx
        .app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/event-stream"));

    // The stream ends after the terminal event, so the body is finite.
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(body.contains("event: start"), "body: {body}");
    assert!(body.contains("\"total\":5"), "body: {body}");
    assert!(body.contains("event: done"), "body: {body}");
    assert_eq!(body.matches("event: done").count(), 1, "body: {body}");
    assert!(body.contains("\"processed\":5"), "body: {body}");
    assert!(body.contains("\"cancelled\":false"), "body: {body}");
    // start precedes done.
    assert!(body.find("event: start").unwrap() < body.find("event: done").unwrap());

    // The same state is visible to the poll transport until eviction.
    let (status, snap) = get_json(&fx.app, "/api/jobs/push-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snap["state"], "done");
    assert_eq!(snap["done"], 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broken_push_connection_falls_back_to_polling() {
    let fx = fixture(&["a.png", "b.png", "c.png", "d.png"]);

    let uri = format!(
        "/api/jobs/stream?inputDir={}&templateName=logo&outputDir={}&jobId=fallback-1",
        urlencode(fx.input_dir.path()),
        urlencode(fx.output_dir.path()),
    );
    let response = fx
        .app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // Drop the response without reading a single event: the connection is
    // gone, the job is not.
    drop(response);

    let snap = poll_until_terminal(&fx.app, "fallback-1").await;
    assert_eq!(snap["state"], "done");
    assert_eq!(snap["done"], 4);
    assert_eq!(snap["total"], 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_cancel_is_accepted_and_changes_nothing() {
    let fx = fixture(&["a.png", "b.png"]);

    let (status, started) =
        post_json(&fx.app, "/api/jobs", start_body(&fx, Some("keep-going"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["jobId"], "keep-going");

    let snap = poll_until_terminal(&fx.app, "keep-going").await;
    assert_eq!(snap["state"], "done");

    // A late cancel is accepted but changes nothing observable.
    for _ in 0..2 {
        let (status, body) =
            post_json(&fx.app, "/api/jobs/keep-going/cancel", String::new()).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["accepted"], true);
    }
    let (_, snap) = get_json(&fx.app, "/api/jobs/keep-going").await;
    assert_eq!(snap["state"], "done");
    assert_eq!(snap["done"], 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_client_job_id_conflicts() {
    let fx = fixture(&["a.png"]);

    let (status, _) = post_json(&fx.app, "/api/jobs", start_body(&fx, Some("dup"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // While the first job is still registered, the id is taken.
    let (status, _) = post_json(&fx.app, "/api/jobs", start_body(&fx, Some("dup"))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    poll_until_terminal(&fx.app, "dup").await;
    assert_eq!(fx.state.jobs.len(), 1);
}

fn urlencode(path: &Path) -> String {
    path.to_str()
        .unwrap()
        .replace('%', "%25")
        .replace(' ', "%20")
        .replace('&', "%26")
        .replace('?', "%3F")
}
