//! End-to-end scan workflows against a fake camera and a local fake API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use url::Url;

use pointage_core::{
    ApiConfig, BannerKind, CameraManager, CameraSource, ClockingClient, FakeCamera, FakeSubmitter,
    PointageError, PointageType, ScanEvent, ScanPhase, ScanSession, ScanSettings, Screen, Session,
    StateStore, SubmissionResult, Submitter, TextDecoder,
};

#[derive(Clone)]
struct FakeApi {
    status: StatusCode,
    body: Value,
    seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn clocking(
    State(api): State<FakeApi>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    api.seen.lock().unwrap().push((auth, body));
    (api.status, Json(api.body.clone()))
}

async fn login(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["password"] == "secret" {
        (StatusCode::OK, Json(json!({"token": "tok-1", "type": "exit"})))
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Invalid credentials"})),
        )
    }
}

/// Serve the fake API on an ephemeral port and return its base URL.
async fn spawn_api(status: StatusCode, body: Value) -> (Url, FakeApi) {
    let api = FakeApi {
        status,
        body,
        seen: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/api/admin/clocking", post(clocking))
        .route("/api/login", post(login))
        .with_state(api.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (Url::parse(&format!("http://{addr}")).unwrap(), api)
}

fn api_config(base_url: Url) -> ApiConfig {
    ApiConfig {
        base_url,
        auth_base_url: None,
        timeout_secs: 5,
    }
}

fn settings() -> ScanSettings {
    ScanSettings {
        decode_interval: Duration::from_millis(5),
        camera_ready_timeout: Duration::from_millis(50),
        banner_ttl: chrono::Duration::seconds(5),
        auto_submit: false,
    }
}

fn logged_in(dir: &TempDir) -> StateStore {
    let mut store = StateStore::in_dir(dir.path()).unwrap();
    store
        .set_session(Session::new("tok-1", PointageType::Entry))
        .unwrap();
    store
}

fn open<'s, S: Submitter>(
    store: &'s mut StateStore,
    camera: &FakeCamera,
    submitter: S,
) -> ScanSession<'s, FakeCamera, S> {
    ScanSession::open(
        store,
        CameraManager::new(camera.clone()),
        Arc::new(TextDecoder),
        submitter,
        settings(),
    )
    .unwrap()
}

/// Feed `code` to the camera and wait until the session applies it.
async fn scan_code<C: CameraSource, S: Submitter>(
    scan: &mut ScanSession<'_, C, S>,
    camera: &FakeCamera,
    code: &str,
) {
    camera.push_frame(code);
    tokio::time::timeout(Duration::from_secs(2), async {
        while !scan.process_next_decode().await.unwrap() {}
    })
    .await
    .expect("decode applied in time");
}

#[tokio::test]
async fn test_successful_clocking_with_resolved_names() {
    let (base, api) = spawn_api(
        StatusCode::OK,
        json!({
            "message": "OK",
            "data": {"bus": {"name": "Ligne 12"}, "conducteur": {"nom": "A. Benali"}}
        }),
    )
    .await;
    let client = ClockingClient::new(&api_config(base)).unwrap();
    let dir = TempDir::new().unwrap();
    let mut store = logged_in(&dir);
    let camera = FakeCamera::with_labels(&["Back camera"]);

    {
        let mut scan = open(&mut store, &camera, client);
        assert_ok!(scan.dispatch(ScanEvent::Start).await);
        scan_code(&mut scan, &camera, "BUS123").await;
        assert_eq!(scan.phase(), ScanPhase::BusLocked);

        assert_ok!(scan.dispatch(ScanEvent::Continue).await);
        scan_code(&mut scan, &camera, "DRV42").await;
        assert_eq!(scan.phase(), ScanPhase::DriverLocked);

        assert_ok!(scan.dispatch(ScanEvent::Submit).await);
        assert_eq!(scan.phase(), ScanPhase::Succeeded);
        let result = scan.attempt().result.clone().unwrap();
        assert_eq!(result.server_message, "OK");
        assert_eq!(result.resolved_bus_name.as_deref(), Some("Ligne 12"));
        assert_eq!(result.resolved_driver_name.as_deref(), Some("A. Benali"));

        assert_ok!(scan.dispatch(ScanEvent::Restart).await);
        assert_eq!(scan.phase(), ScanPhase::Idle);
        assert!(scan.attempt().bus_code.is_none());
        assert!(scan.attempt().driver_code.is_none());
    }

    let seen = api.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.as_deref(), Some("Bearer tok-1"));
    assert_eq!(
        seen[0].1,
        json!({"matricule": "BUS123", "conducteur_matricule": "DRV42", "type": "entry"})
    );

    assert_eq!(store.history().len(), 1);
    assert_eq!(store.history()[0].bus_code, "BUS123");
    let banner = store.active_banner(Utc::now()).unwrap().unwrap();
    assert_eq!(banner.kind, BannerKind::Success);
    assert_eq!(camera.open_streams(), 0);
}

#[tokio::test]
async fn test_server_error_message_is_shown_verbatim() {
    let (base, _api) = spawn_api(
        StatusCode::BAD_REQUEST,
        json!({"message": "duplicate entry"}),
    )
    .await;
    let client = ClockingClient::new(&api_config(base)).unwrap();
    let dir = TempDir::new().unwrap();
    let mut store = logged_in(&dir);
    let camera = FakeCamera::with_labels(&["Back"]);

    let mut scan = open(&mut store, &camera, client);
    scan.dispatch(ScanEvent::Start).await.unwrap();
    scan_code(&mut scan, &camera, "BUS123").await;
    scan.dispatch(ScanEvent::Continue).await.unwrap();
    scan_code(&mut scan, &camera, "DRV42").await;
    scan.dispatch(ScanEvent::Submit).await.unwrap();

    assert_eq!(scan.phase(), ScanPhase::Failed);
    assert_eq!(scan.attempt().status, "duplicate entry");
    assert!(scan.attempt().bus_code.is_none());
    assert!(scan.attempt().driver_code.is_none());
}

#[tokio::test]
async fn test_permission_denied_then_retry() {
    let dir = TempDir::new().unwrap();
    let mut store = logged_in(&dir);
    let camera = FakeCamera::with_labels(&["Back"]);
    camera.deny_permission(true);

    let mut scan = open(&mut store, &camera, FakeSubmitter::new());
    scan.dispatch(ScanEvent::Start).await.unwrap();
    assert!(matches!(scan.phase(), ScanPhase::CameraUnavailable { .. }));
    assert!(scan.attempt().camera_error.is_some());
    assert!(!scan.camera_active());

    camera.deny_permission(false);
    scan.dispatch(ScanEvent::Retry).await.unwrap();
    assert_eq!(scan.phase(), ScanPhase::AwaitingBus);
    assert!(scan.camera_active());
    assert_eq!(camera.acquisitions(), vec!["cam-0"]);

    scan_code(&mut scan, &camera, "BUS1").await;
    assert_eq!(scan.attempt().bus_code.as_deref(), Some("BUS1"));
}

#[tokio::test]
async fn test_no_camera_then_abandon_goes_to_dashboard() {
    let dir = TempDir::new().unwrap();
    let mut store = logged_in(&dir);
    let camera = FakeCamera::new(Vec::new());

    let mut scan = open(&mut store, &camera, FakeSubmitter::new());
    scan.dispatch(ScanEvent::Start).await.unwrap();
    assert!(matches!(scan.phase(), ScanPhase::CameraUnavailable { .. }));

    scan.dispatch(ScanEvent::Abandon).await.unwrap();
    assert_eq!(scan.take_navigation(), Some(Screen::Dashboard));
    assert_eq!(scan.take_navigation(), None);
}

#[tokio::test]
async fn test_whitespace_payload_keeps_scanning() {
    let dir = TempDir::new().unwrap();
    let mut store = logged_in(&dir);
    let camera = FakeCamera::with_labels(&["Back"]);

    let mut scan = open(&mut store, &camera, FakeSubmitter::new());
    scan.dispatch(ScanEvent::Start).await.unwrap();
    scan_code(&mut scan, &camera, "   ").await;

    assert_eq!(scan.phase(), ScanPhase::AwaitingBus);
    assert_eq!(scan.attempt().status, "Invalid code, please retry");
    assert!(scan.is_decoding());

    scan_code(&mut scan, &camera, "BUS7").await;
    assert_eq!(scan.phase(), ScanPhase::BusLocked);
}

#[tokio::test]
async fn test_failed_submission_then_full_new_sequence() {
    let dir = TempDir::new().unwrap();
    let mut store = logged_in(&dir);
    let camera = FakeCamera::with_labels(&["Back"]);
    let submitter = FakeSubmitter::new();
    submitter.respond_with(SubmissionResult::failure("server down"));

    {
        let mut scan = open(&mut store, &camera, submitter.clone());
        for (bus, driver) in [("BUS1", "DRV1"), ("BUS2", "DRV2")] {
            scan.dispatch(ScanEvent::Start).await.unwrap();
            scan_code(&mut scan, &camera, bus).await;
            scan.dispatch(ScanEvent::Continue).await.unwrap();
            scan_code(&mut scan, &camera, driver).await;
            scan.dispatch(ScanEvent::Submit).await.unwrap();
            if scan.phase() == ScanPhase::Failed {
                assert_err!(scan.dispatch(ScanEvent::Submit).await);
                scan.dispatch(ScanEvent::Restart).await.unwrap();
            }
        }
        assert_eq!(scan.phase(), ScanPhase::Succeeded);
    }

    let codes: Vec<_> = submitter
        .requests()
        .into_iter()
        .map(|r| (r.bus_code, r.driver_code))
        .collect();
    assert_eq!(
        codes,
        vec![
            ("BUS1".to_string(), "DRV1".to_string()),
            ("BUS2".to_string(), "DRV2".to_string())
        ]
    );
    assert_eq!(store.history().len(), 1);
    assert_eq!(store.history()[0].bus_code, "BUS2");
}

#[tokio::test]
async fn test_logged_out_operator_cannot_open_scan() {
    let dir = TempDir::new().unwrap();
    let mut store = StateStore::in_dir(dir.path()).unwrap();
    let camera = FakeCamera::with_labels(&["Back"]);

    let opened = ScanSession::open(
        &mut store,
        CameraManager::new(camera.clone()),
        Arc::new(TextDecoder),
        FakeSubmitter::new(),
        settings(),
    );
    assert!(matches!(opened, Err(PointageError::NoSession)));
    assert!(camera.acquisitions().is_empty());
}

#[tokio::test]
async fn test_login_against_fake_api() {
    let (base, _api) = spawn_api(StatusCode::OK, json!({})).await;
    let client = ClockingClient::new(&api_config(base)).unwrap();

    let session = client.login("driver@dnk.example", "secret").await.unwrap();
    assert_eq!(session.token, "tok-1");
    assert_eq!(session.pointage_type, PointageType::Exit);

    let err = client
        .login("driver@dnk.example", "wrong")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Invalid credentials"));
}
