//! End-to-end tests: a real server on a random port, driven over HTTP with
//! `ureq`, backed by mock cluster and installer capabilities.

use serde_json::Value;
use std::time::{Duration, Instant};
use storeforge_core::OrchestratorConfig;
use storeforge_runtime::ReadinessScript;
use storeforge_server::TestServer;

fn agent() -> ureq::Agent {
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .into()
}

fn read(mut resp: ureq::http::Response<ureq::Body>) -> (u16, Value) {
    let code = resp.status().as_u16();
    let text = resp.body_mut().read_to_string().unwrap();
    (code, serde_json::from_str(&text).unwrap())
}

fn get(url: &str) -> (u16, Value) {
    read(agent().get(url).call().unwrap())
}

fn post(url: &str, body: &str) -> (u16, Value) {
    read(
        agent()
            .post(url)
            .header("Content-Type", "application/json")
            .send(body.as_bytes())
            .unwrap(),
    )
}

fn delete(url: &str) -> (u16, Value) {
    read(agent().delete(url).call().unwrap())
}

fn create_store(server: &TestServer) -> String {
    let (code, body) = post(
        &format!("{}/api/stores", server.url),
        r#"{"type":"woocommerce"}"#,
    );
    assert_eq!(code, 202, "{body}");
    body["store"]["id"].as_str().unwrap().to_owned()
}

fn wait_for_status(server: &TestServer, id: &str, want: &str) -> Value {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let (code, body) = get(&format!("{}/api/stores/{id}/status", server.url));
        assert_eq!(code, 200);
        if body["status"] == want {
            return body;
        }
        assert!(Instant::now() < deadline, "store {id} never reached {want}: {body}");
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn create_poll_and_delete_store() {
    let server = TestServer::start(ReadinessScript::Healthy).unwrap();

    let (code, body) = post(
        &format!("{}/api/stores", server.url),
        r#"{"type":"woocommerce"}"#,
    );
    assert_eq!(code, 202);
    assert_eq!(body["message"], "Store provisioning started");
    assert_eq!(body["store"]["status"], "Provisioning");
    assert_eq!(body["store"]["type"], "woocommerce");
    let id = body["store"]["id"].as_str().unwrap().to_owned();
    assert_eq!(body["store"]["namespace"], format!("store-{id}"));

    let status = wait_for_status(&server, &id, "Ready");
    assert_eq!(status["url"], format!("{id}.localhost"));
    assert!(status["error_message"].is_null());

    let (code, body) = get(&format!("{}/api/stores/{id}", server.url));
    assert_eq!(code, 200);
    assert_eq!(body["store"]["status"], "Ready");

    let (code, body) = get(&format!("{}/api/stores", server.url));
    assert_eq!(code, 200);
    assert_eq!(body["stores"].as_array().unwrap().len(), 1);

    let (code, body) = delete(&format!("{}/api/stores/{id}", server.url));
    assert_eq!(code, 200);
    assert_eq!(body["message"], "Store deleted successfully");
    assert!(!server.cluster.has_namespace(&format!("store-{id}")));

    let (code, body) = get(&format!("{}/api/stores/{id}", server.url));
    assert_eq!(code, 404);
    assert_eq!(body["error"], "Store not found");
}

#[test]
fn failed_store_reports_error_message() {
    let server = TestServer::start(ReadinessScript::Healthy).unwrap();
    server.installer.fail_install(Some("chart not found"));

    let id = create_store(&server);
    let status = wait_for_status(&server, &id, "Failed");
    assert!(status["error_message"]
        .as_str()
        .unwrap()
        .contains("chart not found"));
    assert_eq!(server.installer.call_count("uninstall"), 1);
    assert_eq!(server.cluster.call_count("delete_namespace"), 1);
}

#[test]
fn invalid_requests_are_rejected() {
    let server = TestServer::start(ReadinessScript::Healthy).unwrap();
    let url = format!("{}/api/stores", server.url);

    let (code, body) = post(&url, r#"{"type":"shopify"}"#);
    assert_eq!(code, 400);
    assert_eq!(body["error"], "Validation Error");

    let (code, _) = post(&url, "{}");
    assert_eq!(code, 400);

    let (code, _) = post(&url, "not json");
    assert_eq!(code, 400);

    let (code, body) = post(&url, r#"{"type":"medusa"}"#);
    assert_eq!(code, 400);
    assert!(body["error"].as_str().unwrap().contains("medusa"));

    let (code, _) = get(&format!("{}/api/unknown", server.url));
    assert_eq!(code, 404);

    assert_eq!(server.orchestrator().list_stores().unwrap().len(), 0);
}

#[test]
fn admission_limits_map_to_status_codes() {
    let config = OrchestratorConfig {
        max_stores: 2,
        max_concurrent_provisions: 1,
        poll_interval: Duration::from_secs(1),
        readiness_timeout: Duration::from_secs(30),
        ..OrchestratorConfig::default()
    };
    let server = TestServer::start_with(config, ReadinessScript::Never).unwrap();
    let url = format!("{}/api/stores", server.url);

    let first = create_store(&server);
    let (code, body) = post(&url, r#"{"type":"woocommerce"}"#);
    assert_eq!(code, 429);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Maximum concurrent provisions reached"));

    let (code, body) = delete(&format!("{url}/{first}"));
    assert_eq!(code, 409, "{body}");

    let (code, _) = delete(&format!("{url}/doesnotexist"));
    assert_eq!(code, 404);
}

#[test]
fn capacity_limit_is_conflict() {
    let config = OrchestratorConfig {
        max_stores: 1,
        poll_interval: Duration::from_secs(1),
        ..OrchestratorConfig::default()
    };
    let server = TestServer::start_with(config, ReadinessScript::Healthy).unwrap();
    let id = create_store(&server);
    wait_for_status(&server, &id, "Ready");

    let (code, body) = post(
        &format!("{}/api/stores", server.url),
        r#"{"type":"woocommerce"}"#,
    );
    assert_eq!(code, 409);
    assert_eq!(body["error"], "Maximum store limit reached (1 stores)");
}

#[test]
fn health_reflects_dependencies() {
    let server = TestServer::start(ReadinessScript::Healthy).unwrap();
    let url = format!("{}/api/health", server.url);

    let (code, body) = get(&url);
    assert_eq!(code, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["records"], true);
    assert!(body["timestamp"].is_string());

    server.cluster.set_connected(false);
    let (code, body) = get(&url);
    assert_eq!(code, 503);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["checks"]["kubernetes"], false);
}

#[test]
fn root_banner() {
    let server = TestServer::start(ReadinessScript::Healthy).unwrap();
    let (code, body) = get(&format!("{}/", server.url));
    assert_eq!(code, 200);
    assert_eq!(body["service"], "storeforge");
}
