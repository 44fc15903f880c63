//! HTTP routes exercised in-process with `oneshot`

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use rtmirror_core::{MockSource, Record, RemoteEntry};
use rtmirror_server::{MirrorApp, MirrorConfig};

struct TestApp {
    dir: TempDir,
    app: MirrorApp,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(adjust: impl FnOnce(&mut MirrorConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = MirrorConfig::default();
        config.storage.log_path = dir.path().join("sensores-cache.jsonl");
        config.storage.cursor_path = dir.path().join("sensores-last-key.txt");
        adjust(&mut config);
        let app = MirrorApp::open(config).await.unwrap();
        Self { dir, app }
    }

    async fn fill(&self, n: usize) {
        for i in 0..n {
            let record = Record::from_entry(RemoteEntry::new(
                format!("-N{i:03}"),
                json!({
                    "fechaHora": format!("2024-07-15 12:00:{i:02}"),
                    "sensores": {"pm25": 10 + i, "temperatura": 22.5}
                }),
            ))
            .unwrap();
            self.app.log().append(&record).await.unwrap();
        }
    }

    fn router(&self) -> Router {
        self.app.router()
    }
}

async fn get(router: Router, uri: &str) -> (StatusCode, header::HeaderMap, Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, headers, body)
}

fn ids(body: &Value) -> Vec<&str> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn test_liveness() {
    let test = TestApp::new().await;
    let (status, _, body) = get(test.router(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_info_on_empty_log() {
    let test = TestApp::new().await;
    let (status, headers, body) = get(test.router(), "/api/sensores-info").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CACHE_CONTROL],
        "no-cache, no-store, must-revalidate"
    );
    assert_eq!(body["total"], 0);
    assert!(body.get("lastRecord").is_none());
}

#[tokio::test]
async fn test_info_with_records() {
    let test = TestApp::new().await;
    test.fill(12).await;

    let (status, _, body) = get(test.router(), "/api/sensores-info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 12);
    assert_eq!(body["lastRecord"]["id"], "-N011");
    assert_eq!(body["lastRecord"]["sensores"]["pm25"], 21);
    assert_eq!(body["lastDate"], "2024-07-15 12:00:11");
}

#[tokio::test]
async fn test_data_pagination() {
    let test = TestApp::new().await;
    test.fill(10).await;

    let (status, headers, body) = get(test.router(), "/api/sensores-data?offset=3&limit=4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=30");
    assert_eq!(ids(&body), vec!["-N003", "-N004", "-N005", "-N006"]);

    let (_, _, body) = get(test.router(), "/api/sensores-data?offset=20&limit=5").await;
    assert_eq!(body, json!([]));

    let (status, _, body) = get(test.router(), "/api/sensores-data?offset=0&limit=9999").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 10);

    // Garbage falls back to the defaults instead of a 400
    let (status, _, body) = get(test.router(), "/api/sensores-data?limit=lots&offset=-2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn test_data_repeated_parameters_use_first_value() {
    let test = TestApp::new().await;
    test.fill(10).await;

    let (status, _, body) = get(test.router(), "/api/sensores-data?limit=2&limit=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec!["-N000", "-N001"]);

    let (status, _, body) = get(test.router(), "/api/sensores-data?offset=5&offset=1&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec!["-N005", "-N006"]);

    let (status, _, body) = get(test.router(), "/api/sensores-data?limit=3abc&offset=8&offset=x").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec!["-N008", "-N009"]);
}

#[tokio::test]
async fn test_data_on_missing_log() {
    let test = TestApp::new().await;
    let (status, _, body) = get(test.router(), "/api/sensores-data").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_data_read_failure_is_500_with_empty_list() {
    let test = TestApp::new().await;
    std::fs::create_dir(test.dir.path().join("sensores-cache.jsonl")).unwrap();

    let (status, _, body) = get(test.router(), "/api/sensores-data").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!([]));

    // Info degrades instead
    let (status, _, body) = get(test.router(), "/api/sensores-info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_cors_allow_list() {
    let test = TestApp::new().await;

    let request = |origin: &str| {
        Request::builder()
            .uri("/api/sensores-info")
            .header(header::ORIGIN, origin)
            .body(Body::empty())
            .unwrap()
    };

    let allowed = test.router().oneshot(request("http://localhost:5500")).await.unwrap();
    assert_eq!(
        allowed.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:5500"
    );

    let denied = test.router().oneshot(request("http://evil.example")).await.unwrap();
    assert!(
        denied
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );

    let preflight = test
        .router()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/sensores-data")
                .header(header::ORIGIN, "http://127.0.0.1:5500")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(preflight.status().is_success());
    let allow_headers = preflight.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allow_headers.contains("authorization"));
    assert!(allow_headers.contains("content-type"));
}

#[tokio::test]
async fn test_static_fallback() {
    let public = TempDir::new().unwrap();
    std::fs::write(public.path().join("dashboard.html"), "<h1>sensores</h1>").unwrap();
    let static_dir = public.path().to_path_buf();
    let test = TestApp::with_config(|config| config.server.static_dir = Some(static_dir)).await;

    let (status, _, body) = get(test.router(), "/dashboard.html").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("<h1>sensores</h1>".into()));

    let (status, _, _) = get(test.router(), "/missing.html").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_serve_replicates_until_shutdown() {
    let test = TestApp::with_config(|config| config.sync.yield_pause_ms = 1).await;
    let source = Arc::new(MockSource::with_entries((1..=5).map(|i| {
        (
            format!("k{i}"),
            json!({"fechaHora": format!("2024-07-15 13:00:0{i}"), "sensores": {"co2": 400}}),
        )
    })));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let log = test.app.log().clone();

    let TestApp { dir: _dir, app } = test;
    let server = tokio::spawn(app.serve(source.clone(), listener, async {
        let _ = stop_rx.await;
    }));

    for _ in 0..300 {
        if log.count().await.unwrap() == 5 && source.subscriber_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(log.count().await.unwrap(), 5);

    source
        .insert("k6", json!({"fechaHora": "2024-07-15 13:00:06", "sensores": {"co2": 410}}))
        .await;
    for _ in 0..300 {
        if log.count().await.unwrap() == 6 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(log.count().await.unwrap(), 6);

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_verify_after_backfill() {
    let test = TestApp::new().await;
    let source = Arc::new(MockSource::with_entries((1..=4).map(|i| {
        (
            format!("k{i}"),
            json!({"fechaHora": "2024-07-15", "sensores": {"v": i}}),
        )
    })));

    let report = test.app.backfill_once(source).await;
    assert_eq!(report.appended, 4);

    let verify = test.app.verify().await.unwrap();
    assert_eq!(verify.stats.records, 4);
    assert_eq!(verify.cursor.as_deref(), Some("k4"));
    assert!(verify.is_healthy());
}
