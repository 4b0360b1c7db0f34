//! Integration tests for the race desk HTTP API.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt; // for `oneshot`
use xce_race_desk_lib::{build_router, types::AppConfig, ApiState, MemoryStore, RaceDesk};

/// Test helper: in-memory desk with a fixed draw seed, no snapshot file.
fn setup_app() -> Router {
    let config = AppConfig {
        shuffle_seed: Some(7),
        ..AppConfig::default()
    };
    let desk = Arc::new(Mutex::new(RaceDesk::new(MemoryStore::new(), &config)));
    build_router(ApiState::new(desk, None), None)
}

fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, extract_json(response.into_body()).await)
}

/// Seed `count` runners and start an event; returns the event id.
async fn start_seeded_event(app: &Router, count: usize) -> u64 {
    let (status, _) = send(app, test_request("POST", &format!("/api/participants/seed/{count}"))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(app, json_request("POST", "/api/events/start", json!({ "name": "Night race" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["round"], 1);
    body["eventId"].as_u64().unwrap()
}

// ── Health ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup_app();
    let (status, body) = send(&app, test_request("GET", "/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "xce-race-desk");
    assert!(body["version"].is_string());
}

// ── Participants ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_add_and_list_participants() {
    let app = setup_app();
    let (status, body) = send(&app, json_request("POST", "/api/participants", json!({ "name": "  Alice  " }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Alice");

    let (status, body) = send(&app, test_request("GET", "/api/participants")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_blank_name_is_rejected() {
    let app = setup_app();
    let (status, body) = send(&app, json_request("POST", "/api/participants", json!({ "name": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_name");
}

#[tokio::test]
async fn test_seed_rejects_unlisted_count() {
    let app = setup_app();
    let (status, body) = send(&app, test_request("POST", "/api/participants/seed/10")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_seed_count");
}

#[tokio::test]
async fn test_delete_all_participants() {
    let app = setup_app();
    send(&app, test_request("POST", "/api/participants/seed/8")).await;
    let (status, _) = send(&app, test_request("POST", "/api/participants/delete-all")).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, test_request("GET", "/api/participants")).await;
    assert!(body.as_array().unwrap().is_empty());
}

// ── Events ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_event_lays_out_pools() {
    let app = setup_app();
    let event_id = start_seeded_event(&app, 8).await;

    let (status, body) = send(&app, test_request("GET", &format!("/api/events/{event_id}/rounds/1/heats"))).await;
    assert_eq!(status, StatusCode::OK);
    let heats = body.as_array().unwrap();
    assert_eq!(heats.len(), 2);
    for heat in heats {
        assert_eq!(heat["bracket"], "initial");
        assert_eq!(heat["participants"].as_array().unwrap().len(), 4);
    }
}

#[tokio::test]
async fn test_start_event_without_runners_fails() {
    let app = setup_app();
    let (status, body) = send(&app, json_request("POST", "/api/events/start", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "not_enough_participants");
}

#[tokio::test]
async fn test_unknown_event_is_not_found() {
    let app = setup_app();
    let (status, body) = send(&app, test_request("GET", "/api/events/99/bracket")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "missing_entity");
}

#[tokio::test]
async fn test_duplicate_position_is_rejected() {
    let app = setup_app();
    let event_id = start_seeded_event(&app, 8).await;
    let (_, body) = send(&app, test_request("GET", &format!("/api/events/{event_id}/rounds/1/heats"))).await;
    let heat = &body[0];
    let heat_id = heat["id"].as_u64().unwrap();
    let ids: Vec<u64> = heat["participants"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["participantId"].as_u64().unwrap())
        .collect();

    let mut positions = serde_json::Map::new();
    for (pid, position) in ids.iter().zip([1, 1, 2, 3]) {
        positions.insert(pid.to_string(), json!(position));
    }
    let mut results = serde_json::Map::new();
    results.insert(heat_id.to_string(), Value::Object(positions));
    let payload = json!({ "results": results });
    let uri = format!("/api/events/{event_id}/rounds/1/results");
    let (status, body) = send(&app, json_request("POST", &uri, payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "duplicate_position");

    // nothing was written
    let (_, body) = send(&app, test_request("GET", &format!("/api/events/{event_id}/rounds/1/heats"))).await;
    assert!(body[0]["results"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn test_round_advances_after_all_results() {
    let app = setup_app();
    let event_id = start_seeded_event(&app, 8).await;
    let (_, heats) = send(&app, test_request("GET", &format!("/api/events/{event_id}/rounds/1/heats"))).await;

    let mut results = serde_json::Map::new();
    for heat in heats.as_array().unwrap() {
        let mut positions = serde_json::Map::new();
        for (idx, p) in heat["participants"].as_array().unwrap().iter().enumerate() {
            positions.insert(p["participantId"].as_u64().unwrap().to_string(), json!(idx + 1));
        }
        results.insert(heat["id"].as_u64().unwrap().to_string(), Value::Object(positions));
    }
    let uri = format!("/api/events/{event_id}/rounds/1/results");
    let (status, body) = send(&app, json_request("POST", &uri, json!({ "results": results }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], 2);
    assert_eq!(body["roundToPlay"], 2);

    let (_, board) = send(&app, test_request("GET", &format!("/api/events/{event_id}/leaderboard"))).await;
    let board = board.as_array().unwrap();
    assert_eq!(board.len(), 8);
    assert_eq!(board[0]["points"], 4);
}

#[tokio::test]
async fn test_state_view_tracks_active_event() {
    let app = setup_app();
    let (_, body) = send(&app, test_request("GET", "/api/state")).await;
    assert!(body["activeEvent"].is_null());

    let event_id = start_seeded_event(&app, 8).await;
    let (status, body) = send(&app, test_request("GET", "/api/state")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activeEvent"]["id"].as_u64(), Some(event_id));
    assert_eq!(body["currentRound"], 1);
    assert_eq!(body["participants"].as_array().unwrap().len(), 8);

    let (_, closed) = send(&app, test_request("POST", &format!("/api/events/{event_id}/close"))).await;
    assert_eq!(closed["closed"], true);
    let (_, body) = send(&app, test_request("GET", "/api/state")).await;
    assert!(body["activeEvent"].is_null());
    assert_eq!(body["latestEvent"]["id"].as_u64(), Some(event_id));
}
