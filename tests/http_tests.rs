/// Integration tests for the HTTP surface
///
/// Tests cover the user directory endpoints, login and routine entry
/// points, the SSE pairing stream, and the admin listings, against the
/// full route table with a scripted transport behind the service.
mod common;

use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use bytes::Bytes;
use common::*;
use fleet_chat_agent::db::{self, Database};
use fleet_chat_agent::models::CAR_ID_FORMAT_ERROR;
use fleet_chat_agent::relay::RelayEvent;
use fleet_chat_agent::server::{configure_routes, create_test_http_server};
use fleet_chat_agent::service::{AgentService, ServiceSettings, ROUTINE_BUSY_ERROR};
use fleet_chat_agent::session::SessionCommand;
use fleet_chat_agent::transport::mock::MockTransport;
use fleet_chat_agent::transport::TransportEvent;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

// ===== Directory =====

#[actix_web::test]
async fn test_health_endpoint() {
    let harness = TestHarness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(test::read_body(resp).await, Bytes::from_static(b"OK"));
}

#[actix_web::test]
async fn test_create_user_and_duplicate_conflict() {
    let harness = TestHarness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    let body = json!({
        "userID": "user-1",
        "name": "דנה",
        "companyID": "4821",
        "phoneNumber": "052-123-4567"
    });

    let req = test::TestRequest::post()
        .uri("/api/users")
        .set_json(&body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["userID"], "user-1");
    assert_eq!(created["companyID"], "4821");

    let req = test::TestRequest::post()
        .uri("/api/users")
        .set_json(&body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let conflict: Value = test::read_body_json(resp).await;
    assert_eq!(conflict["error"], "User already exists");
}

// ===== Login =====

#[actix_web::test]
async fn test_login_unknown_user_unauthorized() {
    let harness = TestHarness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({"userID": "ghost"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Invalid userID");
}

#[actix_web::test]
async fn test_login_fresh_identity_short_circuits() {
    let harness = TestHarness::new();
    harness.seed_user().await;
    Database::set_last_auth(&harness.pool, "user-1")
        .await
        .expect("Failed to stamp last auth");

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({"userID": "user-1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    // No session was opened for it.
    assert!(!harness.service.registry().is_active("user-1"));
}

#[actix_web::test]
async fn test_login_skipqr_short_circuits() {
    let harness = TestHarness::new();
    harness.seed_user().await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/login?skipqr=1")
        .set_json(json!({"userID": "user-1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert!(!harness.service.registry().is_active("user-1"));
}

#[actix_web::test]
async fn test_login_returns_pairing_code_and_token() {
    let harness = TestHarness::new();
    harness.seed_user().await;

    let service = harness.service.clone();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    // Feed the pairing code from the transport side once the session dials.
    let mut control = harness.control;
    let driver = tokio::spawn(async move {
        let probe = control.next_link().await;
        probe.emit(TransportEvent::PairingCode {
            code: "QR-42".to_string(),
        });
        probe
    });

    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({"userID": "user-1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["qrCode"], "QR-42");

    let token = body["pairingToken"]
        .as_str()
        .expect("pairingToken missing from response");
    assert_eq!(service.tokens().redeem(token), Some("user-1".to_string()));

    let _probe = driver.await.expect("Transport driver failed");
}

// ===== Routines =====

#[actix_web::test]
async fn test_park_car_rejects_malformed_car_id() {
    let harness = TestHarness::new();
    harness.seed_user().await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/park-car")
        .set_json(json!({
            "userID": "user-1",
            "carID": "12-345",
            "km": 1000,
            "startingPoint": "חיפה",
            "destination": "תל אביב"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], CAR_ID_FORMAT_ERROR);
}

#[actix_web::test]
async fn test_park_car_unknown_user_bad_request() {
    let harness = TestHarness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/park-car")
        .set_json(json!({
            "userID": "ghost",
            "carID": "398-35-902",
            "km": 1000,
            "startingPoint": "חיפה",
            "destination": "תל אביב"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Invalid userID");
}

#[actix_web::test]
async fn test_routine_while_busy_reports_conflict_error() {
    let harness = TestHarness::new();
    harness.seed_user().await;

    let (dummy_tx, _dummy_rx) = mpsc::unbounded_channel::<SessionCommand>();
    harness
        .service
        .registry()
        .try_acquire("user-1", Uuid::new_v4(), dummy_tx)
        .expect("Failed to occupy the user slot");

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/replace-client-car")
        .set_json(json!({
            "userID": "user-1",
            "clientCarID": "111-22-333",
            "replacementCarID": "444-55-666",
            "nameOfClientCompany": "שלמה תחבורה"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], ROUTINE_BUSY_ERROR);
}

// ===== SSE pairing stream =====

#[actix_web::test]
async fn test_sse_requires_a_valid_token() {
    let harness = TestHarness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/sse").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get()
        .uri("/sse?token=not-a-token")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_sse_conflict_when_relay_already_open() {
    let harness = TestHarness::new();
    let _events = harness
        .service
        .relay()
        .open("user-1")
        .expect("Failed to open relay");
    let token = harness.service.tokens().issue("user-1");

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get()
        .uri(&format!("/sse?token={token}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[actix_web::test]
async fn test_sse_streams_relay_events() {
    let harness = TestHarness::new();
    let token = harness.service.tokens().issue("user-1");

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get()
        .uri(&format!("/sse?token={token}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("content-type")
            .expect("content-type missing"),
        "text/event-stream"
    );
    assert_eq!(
        resp.headers()
            .get("cache-control")
            .expect("cache-control missing"),
        "no-cache"
    );
    assert!(harness.service.relay().exists("user-1"));

    harness
        .service
        .relay()
        .emit("user-1", RelayEvent::Qr("2@code".to_string()));
    harness
        .service
        .relay()
        .emit("user-1", RelayEvent::Authenticated);
    assert!(harness.service.relay().close("user-1"));

    let body = test::read_body(resp).await;
    assert_eq!(
        body,
        Bytes::from_static(
            b"event: qr\ndata: \"2@code\"\n\nevent: authenticated\ndata: \"NODATA\"\n\n"
        )
    );
}

// ===== Admin =====

#[actix_web::test]
async fn test_connections_lists_open_relays() {
    let harness = TestHarness::new();
    let _events = harness
        .service
        .relay()
        .open("user-9")
        .expect("Failed to open relay");

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/connections").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let listing = body.as_array().expect("expected a JSON array");
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0]["userID"], "user-9");
    assert!(listing[0]["uptime"]
        .as_str()
        .expect("uptime missing")
        .starts_with("0d"));
}

#[actix_web::test]
async fn test_refresh_logins_with_nothing_to_do() {
    let harness = TestHarness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .app_data(web::Data::new(harness.pool.clone()))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/refresh-logins")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!([]));
}

// ===== Live server =====

#[tokio::test]
async fn test_live_server_health() {
    let pool = db::create_test_pool();
    let (transport, _control) = MockTransport::new();
    let settings = ServiceSettings {
        operator_jid: operator_jid(),
        reduced_flow: false,
    };
    let service = web::Data::new(AgentService::new(pool.clone(), Arc::new(transport), settings));

    let (server, addr) = create_test_http_server(service, web::Data::new(pool))
        .expect("Failed to create test server");
    tokio::spawn(server);

    // Give the server a moment to bind
    tokio::time::sleep(Duration::from_millis(100)).await;

    let resp = reqwest::get(format!("http://{}/health", addr))
        .await
        .expect("Failed to reach the server");
    assert!(resp.status().is_success());
    assert_eq!(resp.text().await.expect("Failed to read body"), "OK");
}
