//! Full poller runs against a mock HTTP backend
//!
//! The backend, the checked services and the persisted identity are all
//! real implementations; only the remote side is a wiremock server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use outpost::{
    ScanReport, StatusCode,
    poller::{
        PollerCoordinator,
        backend::HttpPollerBackend,
        events::PropertyChange,
        service::HttpPollService,
        settings::{FilePollerSettings, PollerSettings},
        state::CoordinatorState,
        time::OffsetTimeAdjustment,
    },
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_backend(server: &MockServer, registrations: u64) {
    let mock_url = url::Url::parse(&server.uri()).unwrap();
    let host = mock_url.host_str().unwrap().to_string();
    let port = mock_url.port().unwrap().to_string();

    Mock::given(method("POST"))
        .and(path("/monitors"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "monitoring_system_id": "42" })),
        )
        .expect(registrations)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/monitors/42/starting"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/locators"))
        .and(query_param("context", "remote_monitor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "service_name": "HTTP", "monitor": "http" },
            { "service_name": "ICMP", "monitor": "icmp" }
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/monitors/42/configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "services": [
                {
                    "service_id": 1,
                    "node_id": 1,
                    "node_label": "web01",
                    "address": host,
                    "service_name": "HTTP",
                    "parameters": { "port": port, "path": "/health", "body_pattern": "OK" }
                },
                {
                    "service_id": 2,
                    "node_id": 1,
                    "node_label": "web01",
                    "address": host,
                    "service_name": "HTTP",
                    "parameters": { "port": port, "path": "/missing" }
                },
                {
                    "service_id": 3,
                    "node_id": 1,
                    "node_label": "web01",
                    "address": host,
                    "service_name": "ICMP"
                }
            ],
            "server_time": chrono::Utc::now()
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/monitors/42/name"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "name": "RDU-1" })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

fn build_coordinator(
    server: &MockServer,
    settings: FilePollerSettings,
) -> (PollerCoordinator, Arc<Mutex<Vec<ScanReport>>>) {
    let time_adjustment = Arc::new(OffsetTimeAdjustment::new());
    let poll_service =
        HttpPollService::new(time_adjustment.clone(), Duration::from_secs(5)).unwrap();
    let backend = HttpPollerBackend::new(&server.uri(), Duration::from_secs(5)).unwrap();

    let coordinator = PollerCoordinator::builder()
        .backend(Arc::new(backend))
        .poll_service(Arc::new(poll_service))
        .settings(Arc::new(settings))
        .time_adjustment(time_adjustment)
        .build();

    let reports = Arc::new(Mutex::new(vec![]));
    let collected = reports.clone();
    coordinator.add_property_change_listener(move |change: &PropertyChange| {
        if let PropertyChange::ExitNecessary(report) = change {
            collected.lock().unwrap().push(report.clone());
        }
    });

    (coordinator, reports)
}

#[tokio::test]
async fn test_registration_and_scan_over_http() {
    let server = MockServer::start().await;
    mount_backend(&server, 1).await;
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("poller-settings.json");

    let (coordinator, reports) =
        build_coordinator(&server, FilePollerSettings::new(&settings_path));

    coordinator.initialize().await.unwrap();
    assert_eq!(coordinator.monitor_name().await.unwrap(), "");
    coordinator.register("RDU").await.unwrap();

    assert!(matches!(coordinator.state(), CoordinatorState::Running));
    assert_eq!(coordinator.monitor_name().await.unwrap(), "RDU-1");
    assert_eq!(
        FilePollerSettings::new(&settings_path)
            .monitoring_system_id()
            .unwrap()
            .as_deref(),
        Some("42")
    );

    let reports = reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 1);

    let statuses = &reports[0].poll_statuses;
    assert_eq!(statuses.len(), 2, "the ICMP service has no result");
    assert_eq!(statuses[0].service_id, 1);
    assert_eq!(statuses[0].status, StatusCode::Up);
    assert!(statuses[0].response_time_ms.is_some());
    assert_eq!(statuses[1].service_id, 2);
    assert_eq!(statuses[1].status, StatusCode::Down);
    assert_eq!(
        statuses[1].reason.as_deref(),
        Some("Unexpected status code: 404")
    );
    assert_eq!(coordinator.polled_services().len(), 3);
}

#[tokio::test]
async fn test_restart_reuses_persisted_identity() {
    let server = MockServer::start().await;
    mount_backend(&server, 0).await;
    let dir = tempfile::tempdir().unwrap();
    let settings = FilePollerSettings::new(dir.path().join("poller-settings.json"));
    settings.set_monitoring_system_id("42").unwrap();

    let (coordinator, reports) = build_coordinator(&server, settings);

    coordinator.initialize().await.unwrap();

    assert!(coordinator.is_started());
    assert_eq!(reports.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreachable_backend_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let settings = FilePollerSettings::new(dir.path().join("poller-settings.json"));
    settings.set_monitoring_system_id("42").unwrap();

    let server = MockServer::start().await;
    let (coordinator, reports) = build_coordinator(&server, settings);
    // nothing mounted: the announcement gets a 404
    let result = coordinator.initialize().await;

    assert!(result.is_err());
    assert!(coordinator.fatal_error().is_some());
    assert!(reports.lock().unwrap().is_empty());
}
