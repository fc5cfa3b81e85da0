//! End-to-end tests of the HTTP surface on the in-process store and cache

use actix_web::{test, web, App};
use chrono::Utc;
use consulta_api::{configure_routes, AppState};
use consulta_cache::MemoryAvailabilityCache;
use consulta_core::config::{
    AppConfig, AuthConfig, AvailabilityConfig, BillingConfig, DatabaseConfig, MatchingConfig,
    NetworkConfig, RedisConfig, ServerConfig, SettlementConfig,
};
use consulta_core::models::{Account, UserRole};
use consulta_core::traits::Store;
use consulta_core::ManualClock;
use consulta_db::MemoryStore;
use consulta_services::BroadcastNotifier;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

const REQUESTER: i64 = 1;
const COUNSELOR: i64 = 10;
const ADMIN: i64 = 99;

struct Fixture {
    clock: Arc<ManualClock>,
    store: MemoryStore,
    state: AppState,
}

fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig::default(),
        database: DatabaseConfig::default(),
        redis: RedisConfig::default(),
        auth: AuthConfig {
            jwt_secret: "handlers-test-secret".to_string(),
            jwt_expiration_minutes: 60,
            media_token_ttl_secs: 300,
            media_token_secret: None,
        },
        matching: MatchingConfig::default(),
        availability: AvailabilityConfig::default(),
        billing: BillingConfig::default(),
        settlement: SettlementConfig::default(),
        network: NetworkConfig::default(),
    }
}

async fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::deterministic());
    let store = MemoryStore::new();
    let state = AppState::new(
        &test_config(),
        Arc::new(store.clone()),
        Arc::new(MemoryAvailabilityCache::new(clock.clone())),
        Arc::new(BroadcastNotifier::new()),
        clock.clone(),
    );

    for (user_id, balance) in [(REQUESTER, 100_000), (COUNSELOR, 0)] {
        store
            .upsert_account(&Account::new(user_id, balance, None, Utc::now()))
            .await
            .unwrap();
    }

    Fixture {
        clock,
        store,
        state,
    }
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .app_data(web::Data::new($state.jwt.clone()))
                .configure(configure_routes),
        )
        .await
    };
}

fn bearer(state: &AppState, user_id: i64, role: UserRole) -> (&'static str, String) {
    let token = state.jwt.create_token_for_user(user_id, role).unwrap();
    ("Authorization", format!("Bearer {}", token))
}

fn good_metrics() -> Value {
    json!({ "latency_ms": 40, "jitter_ms": 5, "packet_loss_percent": 0.0 })
}

#[actix_web::test]
async fn test_health() {
    let f = fixture().await;
    let app = app!(f.state);

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "up");
}

#[actix_web::test]
async fn test_call_flow_end_to_end() {
    let f = fixture().await;
    let app = app!(f.state);
    let requester = bearer(&f.state, REQUESTER, UserRole::Requester);
    let counselor = bearer(&f.state, COUNSELOR, UserRole::Counselor);
    let admin = bearer(&f.state, ADMIN, UserRole::Admin);

    let req = test::TestRequest::put()
        .uri("/api/v1/availability")
        .insert_header(counselor.clone())
        .set_json(json!({ "status": "IDLE", "region": "Seoul", "metrics": good_metrics() }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "IDLE");
    assert_eq!(body["data"]["last_network_quality"], "EXCELLENT");

    let req = test::TestRequest::post()
        .uri("/api/v1/matches")
        .insert_header(requester.clone())
        .set_json(json!({}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "connecting");
    assert_eq!(body["data"]["current_candidate"], COUNSELOR);
    let session_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/matches/{}/accept", session_id))
        .insert_header(counselor.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["session"]["status"], "active");
    assert_eq!(body["data"]["media_token"]["participant_id"], COUNSELOR);
    assert_eq!(body["message"], "Call connected");

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/sessions/{}/gifts", session_id))
        .insert_header(requester.clone())
        .set_json(json!({ "amount": 1_000 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["worker_share"], 600);
    assert_eq!(body["data"]["balance"], 99_000);

    f.clock.advance_secs(61);
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/sessions/{}/end", session_id))
        .insert_header(requester.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "ended");
    assert_eq!(body["data"]["reason"], "completed");

    let req = test::TestRequest::get()
        .uri("/api/v1/accounts/me")
        .insert_header(requester)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["balance"], 100_000 - 1_000 - 2 * 14_000);
    assert_eq!(body["data"]["tier"], "silver");

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/ledger/{}", session_id))
        .insert_header(admin)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["total"], 28_000);

    // the counselor is free again
    let worker = f.store.get_account(COUNSELOR).await.unwrap().unwrap();
    assert_eq!(worker.balance, 600 + 16_800);
}

#[actix_web::test]
async fn test_role_gates() {
    let f = fixture().await;
    let app = app!(f.state);
    let requester = bearer(&f.state, REQUESTER, UserRole::Requester);

    let req = test::TestRequest::get().uri("/api/v1/accounts/me").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::put()
        .uri("/api/v1/availability")
        .insert_header(requester.clone())
        .set_json(json!({ "status": "IDLE", "region": "Seoul" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri("/api/v1/billing/sweep")
        .insert_header(requester)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let admin = bearer(&f.state, ADMIN, UserRole::Admin);
    let req = test::TestRequest::post()
        .uri("/api/v1/billing/sweep")
        .insert_header(admin)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["scanned"], 0);
}

#[actix_web::test]
async fn test_weak_link_cannot_go_idle() {
    let f = fixture().await;
    let app = app!(f.state);
    let counselor = bearer(&f.state, COUNSELOR, UserRole::Counselor);
    let weak = json!({ "latency_ms": 450, "jitter_ms": 80, "packet_loss_percent": 2.0 });

    let req = test::TestRequest::post()
        .uri("/api/v1/network/metrics")
        .insert_header(counselor.clone())
        .set_json(json!({ "metrics": weak, "lite_mode": true }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["passed"], false);
    assert_eq!(body["data"]["profile"]["audio_bitrate_kbps"], 24);
    assert!(body["data"]["guidance"].is_string());

    let req = test::TestRequest::put()
        .uri("/api/v1/availability")
        .insert_header(counselor.clone())
        .set_json(json!({ "status": "IDLE", "region": "Seoul", "metrics": weak }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 422);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "network_quality_insufficient");

    // still not listed, so a requester finds nobody
    let requester = bearer(&f.state, REQUESTER, UserRole::Requester);
    let req = test::TestRequest::post()
        .uri("/api/v1/matches")
        .insert_header(requester)
        .set_json(json!({ "preferred_region": "Seoul" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "no_available_counselor");

    let req = test::TestRequest::post()
        .uri("/api/v1/availability/heartbeat")
        .insert_header(counselor)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn test_session_access_and_validation() {
    let f = fixture().await;
    let app = app!(f.state);
    let requester = bearer(&f.state, REQUESTER, UserRole::Requester);
    let counselor = bearer(&f.state, COUNSELOR, UserRole::Counselor);
    let stranger = bearer(&f.state, 55, UserRole::Requester);

    let req = test::TestRequest::put()
        .uri("/api/v1/availability")
        .insert_header(counselor.clone())
        .set_json(json!({ "status": "IDLE", "region": "Busan", "metrics": good_metrics() }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::post()
        .uri("/api/v1/matches")
        .insert_header(requester.clone())
        .set_json(json!({}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let session_id = body["data"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/sessions/{}", session_id))
        .insert_header(stranger.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/matches/{}/cancel", session_id))
        .insert_header(stranger)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/sessions/{}/gifts", session_id))
        .insert_header(requester.clone())
        .set_json(json!({ "amount": 0 }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::post()
        .uri("/api/v1/matches")
        .insert_header(requester.clone())
        .set_json(json!({}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/matches/{}/cancel", session_id))
        .insert_header(requester.clone())
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "cancelled");
    assert_eq!(body["data"]["reason"], "requester_cancelled");

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/matches/{}/accept", session_id))
        .insert_header(counselor)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);
}

#[actix_web::test]
async fn test_offered_counselor_cannot_cancel_or_view() {
    let f = fixture().await;
    let app = app!(f.state);
    let requester = bearer(&f.state, REQUESTER, UserRole::Requester);
    let counselor = bearer(&f.state, COUNSELOR, UserRole::Counselor);

    let req = test::TestRequest::put()
        .uri("/api/v1/availability")
        .insert_header(counselor.clone())
        .set_json(json!({ "status": "IDLE", "region": "Daegu", "metrics": good_metrics() }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::post()
        .uri("/api/v1/matches")
        .insert_header(requester.clone())
        .set_json(json!({}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["current_candidate"], COUNSELOR);
    let session_id = body["data"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/matches/{}/cancel", session_id))
        .insert_header(counselor.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/sessions/{}", session_id))
        .insert_header(counselor.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    // the match is untouched and the offer can still be taken
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/sessions/{}", session_id))
        .insert_header(requester)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "connecting");

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/matches/{}/accept", session_id))
        .insert_header(counselor.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/sessions/{}", session_id))
        .insert_header(counselor)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "active");
}
