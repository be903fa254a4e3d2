//! End-to-end tests of the HTTP API against simulated sensors.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use groundstation::config::{Config, SensorBackend};
use groundstation::recorder::{file_digest, SharedStorage};
use groundstation::server::{router, serve, AppState};
use groundstation::station::{Retention, Sampler, Station};
use groundstation::{Recorder, SensorSuite, Storage};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

struct TestStation {
    base_url: String,
    client: reqwest::Client,
    archive: SharedStorage,
    log_dir: PathBuf,
    stop_server: Option<oneshot::Sender<()>>,
    stop_sampler: watch::Sender<bool>,
    server: JoinHandle<groundstation::Result<()>>,
    sampler: JoinHandle<()>,
    dir: TempDir,
}

impl TestStation {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");

        let mut config = Config::default();
        config.sensor.backend = SensorBackend::Simulated;
        config.camera.public_host = "drone.test".to_string();

        let archive: SharedStorage = Arc::new(Mutex::new(
            Storage::open(dir.path().join("telemetry.db")).unwrap(),
        ));
        let recorder = Arc::new(
            Recorder::new(log_dir.clone(), "fire_mission").with_archive(Arc::clone(&archive)),
        );
        let station = Arc::new(Station::new(SensorSuite::simulated(), &config));

        let (sampler, latest) = Sampler::new(
            Arc::clone(&station),
            Arc::clone(&recorder),
            Duration::from_millis(50),
        );
        let sampler = sampler.with_archive(Arc::clone(&archive), Retention::from_config(&config));
        let (stop_sampler, stop_rx) = watch::channel(false);
        let sampler = tokio::spawn(sampler.run(stop_rx));

        let state = AppState::new(
            station,
            recorder,
            Some(Arc::clone(&archive)),
            latest,
            config.camera.stream_url(),
        )
        .with_low_battery(15);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_server, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, router(state), async move {
            let _ = stopped.await;
        }));

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            archive,
            log_dir,
            stop_server: Some(stop_server),
            stop_sampler,
            server,
            sampler,
            dir,
        }
    }

    async fn get(&self, path: &str) -> (u16, String) {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .unwrap();
        (response.status().as_u16(), response.text().await.unwrap())
    }

    async fn post(&self, path: &str, body: &str) -> (u16, String) {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        (response.status().as_u16(), response.text().await.unwrap())
    }

    async fn get_json(&self, path: &str) -> Value {
        let (status, body) = self.get(path).await;
        assert_eq!(status, 200, "GET {path} returned {status}: {body}");
        serde_json::from_str(&body).unwrap()
    }

    /// Stop the server and the sampler. Returns the data directory so the
    /// archive stays readable.
    async fn shutdown(mut self) -> TempDir {
        if let Some(stop) = self.stop_server.take() {
            let _ = stop.send(());
        }
        self.server.await.unwrap().unwrap();
        self.stop_sampler.send(true).unwrap();
        self.sampler.await.unwrap();
        self.dir
    }
}

async fn wait_for_samples(station: &TestStation, count: i64) {
    for _ in 0..100 {
        let stored = station.archive.lock().unwrap().count_samples().unwrap();
        if stored >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("sampler did not archive {count} samples");
}

#[tokio::test]
async fn test_health() {
    let station = TestStation::start().await;

    let health = station.get_json("/health").await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], "groundstation");
    assert!(health["timestamp"].is_i64());

    station.shutdown().await;
}

#[tokio::test]
async fn test_telemetry_fields() {
    let station = TestStation::start().await;

    let sample = station.get_json("/api/telemetry").await;
    for field in [
        "temperature_c",
        "humidity",
        "pressure_hpa",
        "gas_ohms",
        "dew_point_c",
        "altitude_m",
        "fire_risk_index",
        "fire_risk_level",
        "battery_percent",
        "battery_mv",
        "cpu_temp_c",
        "ip_address",
        "timestamp",
    ] {
        assert!(sample.get(field).is_some(), "missing field {field}");
    }
    assert!(sample["temperature_c"].is_f64());
    assert!(sample["timestamp"].is_f64());
    let percent = sample["battery_percent"].as_u64().unwrap();
    assert!(percent <= 100);

    station.shutdown().await;
}

#[tokio::test]
async fn test_index_embeds_stream() {
    let station = TestStation::start().await;

    let (status, page) = station.get("/").await;
    assert_eq!(status, 200);
    assert!(page.contains(r#"src="http://drone.test:8080/webrtc""#));
    assert!(page.contains(r#"data-low-battery="15""#));

    let (status, css) = station.get("/static/style.css").await;
    assert_eq!(status, 200);
    assert!(!css.is_empty());

    let (status, _) = station.get("/static/index.html").await;
    assert_eq!(status, 404);
    let (status, _) = station.get("/static/missing.js").await;
    assert_eq!(status, 404);

    station.shutdown().await;
}

#[tokio::test]
async fn test_flight_log_lifecycle() {
    let station = TestStation::start().await;

    let status = station.get_json("/api/log_status").await;
    assert_eq!(status["recording"], false);
    assert!(status.get("logfile").is_none());

    let (code, body) = station
        .post(
            "/api/start_log",
            r#"{"filename": "ridge line/north", "note": "wind 10 kt"}"#,
        )
        .await;
    assert_eq!(code, 200, "{body}");
    let started: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(started["success"], true);
    let logfile = PathBuf::from(started["logfile"].as_str().unwrap());
    let file_name = logfile.file_name().unwrap().to_string_lossy().into_owned();
    assert!(file_name.starts_with("ridge_line_north_"), "{file_name}");
    assert!(file_name.ends_with(".csv"));
    assert!(logfile.starts_with(std::fs::canonicalize(&station.log_dir).unwrap()));

    let status = station.get_json("/api/log_status").await;
    assert_eq!(status["recording"], true);
    assert!(status["started_at"].is_f64());

    // Let the sampler write a few rows.
    let before = station.archive.lock().unwrap().count_samples().unwrap();
    wait_for_samples(&station, before + 3).await;

    let (code, body) = station.post("/api/stop_log", "").await;
    assert_eq!(code, 200, "{body}");
    let stopped: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stopped["success"], true);
    let rows = stopped["rows"].as_u64().unwrap();
    assert!(rows >= 1);
    assert_eq!(
        stopped["digest"].as_str().unwrap(),
        file_digest(&logfile).unwrap()
    );

    let contents = std::fs::read_to_string(&logfile).unwrap();
    let mut lines = contents.lines();
    assert_eq!(lines.next().unwrap(), "# note: wind 10 kt");
    assert!(lines.next().unwrap().starts_with("timestamp_iso,timestamp_unix,"));
    assert_eq!(lines.count() as u64, rows);

    let logs = station.get_json("/api/logs").await;
    let logs = logs.as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["note"], "wind 10 kt");
    assert_eq!(logs[0]["rows"].as_u64().unwrap(), rows);

    let status = station.get_json("/api/log_status").await;
    assert_eq!(status["recording"], false);

    station.shutdown().await;
}

#[tokio::test]
async fn test_start_log_defaults_and_errors() {
    let station = TestStation::start().await;

    let (code, body) = station.post("/api/start_log", "").await;
    assert_eq!(code, 200, "{body}");
    let started: Value = serde_json::from_str(&body).unwrap();
    let name = started["logfile"].as_str().unwrap();
    assert!(name.contains("fire_mission_"), "{name}");

    let (code, body) = station.post("/api/start_log", "{not json").await;
    assert_eq!(code, 400);
    let error: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(error["success"], false);
    assert!(error["error"].is_string());

    let (code, _) = station.post("/api/stop_log", "").await;
    assert_eq!(code, 200);

    // Stopping twice is harmless.
    let (code, body) = station.post("/api/stop_log", "").await;
    assert_eq!(code, 200);
    let stopped: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stopped["success"], true);
    assert!(stopped.get("logfile").is_none());

    station.shutdown().await;
}

#[tokio::test]
async fn test_history_limit() {
    let station = TestStation::start().await;
    wait_for_samples(&station, 3).await;

    let history = station.get_json("/api/history?limit=2").await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    let newest = history[0]["timestamp"].as_f64().unwrap();
    let older = history[1]["timestamp"].as_f64().unwrap();
    assert!(newest >= older);

    station.shutdown().await;
}

#[tokio::test]
async fn test_history_window() {
    let station = TestStation::start().await;
    wait_for_samples(&station, 4).await;

    let newest = station.get_json("/api/history?limit=4").await;
    let newest = newest.as_array().unwrap();
    let second = newest[1]["timestamp"].as_f64().unwrap();
    let oldest = newest[3]["timestamp"].as_f64().unwrap();

    // Samples are 50 ms apart, so a millisecond of slack only absorbs rounding
    let (since, until) = (oldest - 0.001, second + 0.001);
    let window = station
        .get_json(&format!("/api/history?since={since}&until={until}"))
        .await;
    let window = window.as_array().unwrap();
    assert_eq!(window.len(), 3, "{window:?}");
    let stamps: Vec<f64> = window
        .iter()
        .map(|s| s["timestamp"].as_f64().unwrap())
        .collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "{stamps:?}");
    assert!(stamps.iter().all(|&t| t >= since && t <= until));

    let future = station.get_json("/api/history?since=4000000000").await;
    assert!(future.as_array().unwrap().is_empty());

    station.shutdown().await;
}

#[tokio::test]
async fn test_bad_query_is_json_error() {
    let station = TestStation::start().await;

    for path in [
        "/api/history?limit=abc",
        "/api/logs?limit=-1",
        "/api/history?since=2000&until=1000",
    ] {
        let (code, body) = station.get(path).await;
        assert_eq!(code, 400, "{path}: {body}");
        let error: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(error["success"], false, "{path}");
        assert!(error["error"].is_string(), "{path}");
    }

    station.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_open_log() {
    let station = TestStation::start().await;

    let (code, body) = station.post("/api/start_log", r#"{"filename": "short"}"#).await;
    assert_eq!(code, 200, "{body}");
    let archive = Arc::clone(&station.archive);
    let _dir = station.shutdown().await;

    let logs = archive.lock().unwrap().flight_logs(10).unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].stopped_at.is_some());
    assert!(logs[0].digest.is_some());
}
