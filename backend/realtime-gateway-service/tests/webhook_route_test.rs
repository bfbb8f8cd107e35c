// Webhook intake over HTTP
//
// Signature check, body validation, provider routing and back-pressure
// responses, plus the full join/publish flow through the worker pool.

mod common;

use actix_web::{test, web, App};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use common::*;
use jsonwebtoken::{encode, EncodingKey, Header};
use realtime_gateway_service::models::RecordType;
use realtime_gateway_service::routes;
use realtime_gateway_service::services::{WebhookDispatcher, WebhookVerifier};
use realtime_gateway_service::state::AppState;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

fn app_state(h: &Harness, verify: bool) -> AppState {
    let config = test_config(recording_config(4));
    let webhooks = Arc::new(WebhookDispatcher::spawn(
        h.orchestrator.clone(),
        config.webhook.workers,
        config.webhook.queue_capacity,
    ));
    AppState {
        webhook_verifier: verify.then(|| Arc::new(WebhookVerifier::new(&livekit_config()))),
        config: Arc::new(config),
        hub: h.hub.clone(),
        orchestrator: h.orchestrator.clone(),
        admission: h.admission.clone(),
        provider: h.provider.clone(),
        webhooks,
    }
}

fn sign(body: &[u8]) -> String {
    let exp = chrono::Utc::now().timestamp() + 600;
    let claims = json!({
        "iss": livekit_config().api_key,
        "exp": exp,
        "sha256": BASE64.encode(Sha256::digest(body)),
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(livekit_config().api_secret.as_bytes()),
    )
    .unwrap()
}

fn joined_body(room: &str, identity: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": "participant_joined",
        "room": {"sid": format!("RM_{room}"), "name": room},
        "participant": {"sid": format!("PA_{identity}"), "identity": identity},
    }))
    .unwrap()
}

fn published_body(room: &str, identity: &str, track_sid: &str, kind: &str, source: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": "track_published",
        "room": {"sid": format!("RM_{room}"), "name": room},
        "participant": {"sid": format!("PA_{identity}"), "identity": identity},
        "track": {"sid": track_sid, "type": kind, "source": source},
    }))
    .unwrap()
}

macro_rules! post_webhook {
    ($app:expr, $uri:expr, $body:expr, $auth:expr) => {{
        let mut req = test::TestRequest::post()
            .uri($uri)
            .insert_header(("content-type", "application/webhook+json"))
            .set_payload($body.clone());
        if let Some(auth) = $auth {
            req = req.insert_header(("authorization", auth));
        }
        test::call_service(&$app, req.to_request()).await
    }};
}

#[actix_web::test]
async fn test_signed_webhook_is_accepted() {
    let h = harness(recording_config(4));
    let state = app_state(&h, true);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(routes::configure),
    )
    .await;

    let body = joined_body("r1", "alice");
    let resp = post_webhook!(app, "/webhook/livekit", body, Some(sign(&body)));
    assert_eq!(resp.status(), 200);
    let json: Value = test::read_body_json(resp).await;
    assert_eq!(json, json!({"received": true}));
}

#[actix_web::test]
async fn test_bad_signature_is_rejected() {
    let h = harness(recording_config(4));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&h, true)))
            .configure(routes::configure),
    )
    .await;

    let body = joined_body("r1", "alice");
    let other = joined_body("r1", "mallory");

    let missing = post_webhook!(app, "/webhook/livekit", body, None::<String>);
    assert_eq!(missing.status(), 401);

    let mismatched = post_webhook!(app, "/webhook/livekit", body, Some(sign(&other)));
    assert_eq!(mismatched.status(), 401);
    let json: Value = test::read_body_json(mismatched).await;
    assert_eq!(json["error"], "unauthorized");
}

#[actix_web::test]
async fn test_malformed_body_is_bad_request() {
    let h = harness(recording_config(4));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&h, false)))
            .configure(routes::configure),
    )
    .await;

    let garbage = b"{not json".to_vec();
    let resp = post_webhook!(app, "/webhook/livekit", garbage, None::<String>);
    assert_eq!(resp.status(), 400);

    let no_participant = serde_json::to_vec(&json!({
        "event": "participant_joined",
        "room": {"name": "r1"},
    }))
    .unwrap();
    let resp = post_webhook!(app, "/webhook/livekit", no_participant, None::<String>);
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_unknown_provider_is_not_found() {
    let h = harness(recording_config(4));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&h, false)))
            .configure(routes::configure),
    )
    .await;

    let body = joined_body("r1", "alice");
    let resp = post_webhook!(app, "/webhook/twilio", body, None::<String>);
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_stopped_workers_answer_unavailable() {
    let h = harness(recording_config(4));
    let state = app_state(&h, false);
    state.webhooks.shutdown().await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(routes::configure),
    )
    .await;

    let body = joined_body("r1", "alice");
    let resp = post_webhook!(app, "/webhook/livekit", body, None::<String>);
    assert_eq!(resp.status(), 503);
}

#[actix_web::test]
async fn test_join_and_publish_flow_records_participant() {
    let h = harness(recording_config(4));
    h.stores.upsert_room(auto_room("r1", RecordType::TrackComposite));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&h, false)))
            .configure(routes::configure),
    )
    .await;

    let bodies = [
        joined_body("r1", "alice"),
        published_body("r1", "alice", "TR_V", "VIDEO", "CAMERA"),
        published_body("r1", "alice", "TR_A", "AUDIO", "MICROPHONE"),
    ];
    for body in &bodies {
        let resp = post_webhook!(app, "/webhook/livekit", body, None::<String>);
        assert_eq!(resp.status(), 200);
    }

    for _ in 0..100 {
        if h.provider.start_calls() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        h.provider.calls(),
        vec![ProviderCall::TrackComposite {
            room: "r1".into(),
            video: "TR_V".into(),
            audio: "TR_A".into(),
        }]
    );
    assert_eq!(h.stores.jobs().len(), 1);
}

#[actix_web::test]
async fn test_record_check_and_manual_start() {
    let h = harness(recording_config(1));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&h, false)))
            .configure(routes::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/record/check").to_request();
    let json: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(json, json!({"available": true, "active": 0, "limit": 1}));

    let req = test::TestRequest::post()
        .uri("/record/start")
        .set_json(json!({"room": "r9", "recordType": "RoomCompositeAudio"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let job: Value = test::read_body_json(resp).await;
    assert_eq!(job["recordType"], "RoomCompositeAudio");
    assert!(job["filePath"].as_str().unwrap().ends_with(".ogg"));

    let req = test::TestRequest::post()
        .uri("/record/start")
        .set_json(json!({"room": "r10"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    let req = test::TestRequest::post().uri("/record/stopall").to_request();
    let json: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(json, json!({"stopped": ["EG_mock_1"]}));
}

#[actix_web::test]
async fn test_token_and_health_endpoints() {
    let h = harness(recording_config(4));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&h, false)))
            .configure(routes::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/token")
        .set_json(json!({"room": "r1", "identity": "alice"}))
        .to_request();
    let json: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(json, json!({"token": "token-r1-alice", "room": "r1"}));

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let json: Value = test::read_body_json(resp).await;
    assert_eq!(json["eventBus"], "disabled");
    assert_eq!(json["sessionStore"], "memory");
    assert_eq!(json["orchestrator"]["maxTrackDataSize"], 100);

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));

    let req = test::TestRequest::get().uri("/rooms/r1/sessions").to_request();
    let json: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(json["sessions"], json!([]));
}
