//! Router-level tests: requests go through the full axum stack via `oneshot`
//! with scripted dice, so every roll is known in advance.

use axum::{
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use combatd::combat::ScriptedRoller;
use combatd::db::Database;
use combatd::engine::CombatEngine;
use combatd::{Config, Server};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Router over an in-memory database; dice come from `faces` in order
async fn app(faces: &[u32]) -> Router {
    let config = Config::default();
    let db = Database::new(None).await.unwrap();
    let engine = CombatEngine::new(db.pool().clone(), &config)
        .with_roller(ScriptedRoller::new(faces.iter().copied()));
    Server::with_engine(config, db, engine).router()
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, HeaderMap, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, json)
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, HeaderMap, Value) {
    send(app, Method::POST, uri, Some(body)).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, _, body) = send(app, Method::GET, uri, None).await;
    (status, body)
}

/// Aria: 20 hp max, AC 10, +5 to hit, 1d6+2
async fn create_aria(app: &Router, hp: i32) {
    let (status, _, body) = post(
        app,
        "/characters",
        json!({
            "id": "aria",
            "name": "Aria",
            "hp_max": 20,
            "hp": hp,
            "armor_class": 10,
            "attack_bonus": 5,
            "damage_dice": "1d6",
            "damage_bonus": 2
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
}

fn goblin() -> Value {
    json!([{ "name": "Goblin", "hp": 7, "ac": 13 }])
}

fn is_replayed(headers: &HeaderMap) -> bool {
    headers
        .get("x-action-replayed")
        .is_some_and(|v| v == "true")
}

#[tokio::test]
async fn test_health_and_root() {
    let app = app(&[]).await;

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "combatd");
}

#[tokio::test]
async fn test_characters() {
    let app = app(&[]).await;
    create_aria(&app, 20).await;

    let (status, body) = get(&app, "/characters/aria").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Aria");
    assert_eq!(body["xp"], 0);

    let (status, body) = get(&app, "/characters/nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_issued_token_drives_start() {
    // goblin initiative 5, player 15
    let app = app(&[5, 15]).await;
    create_aria(&app, 20).await;

    let (status, _, body) = post(&app, "/actions/token", json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["action_token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 64);

    let (status, headers, body) = post(
        &app,
        "/combat/aria/start",
        json!({ "action_token": token, "enemies": goblin() }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(!is_replayed(&headers));

    let state = &body["state"];
    assert_eq!(state["in_combat"], true);
    assert_eq!(state["phase"], "PLAYER_TURN");
    assert_eq!(state["round_number"], 1);
    assert_eq!(state["enemies"][0]["id"], "enemy-1");
    assert_eq!(state["action_remaining"], 1);
    assert_eq!(body["attack_log"], json!([]));

    let (status, status_body) = get(&app, "/combat/aria").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&status_body, state);
}

#[tokio::test]
async fn test_status_without_combat() {
    let app = app(&[]).await;
    create_aria(&app, 20).await;

    let (status, body) = get(&app, "/combat/aria").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "in_combat": false }));
}

#[tokio::test]
async fn test_start_from_narrator_instruction() {
    let app = app(&[5, 4, 15]).await;
    create_aria(&app, 20).await;

    let (status, _, body) = post(
        &app,
        "/combat/aria/start",
        json!({
            "action_token": "tok-start",
            "instruction": {
                "type": "combat_start",
                "enemies": [
                    { "name": "Goblin", "hp": 7, "ac": 13 },
                    { "name": "Wolf", "hp": 11, "ac": 13, "damage_dice": "2d4" }
                ]
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let enemies = &body["state"]["enemies"];
    assert_eq!(enemies[0]["attack_bonus"], 3);
    assert_eq!(enemies[0]["damage_dice"], "1d6");
    assert_eq!(enemies[0]["damage_bonus"], 1);
    assert_eq!(enemies[1]["id"], "enemy-2");
    assert_eq!(enemies[1]["damage_dice"], "2d4");
}

#[tokio::test]
async fn test_start_rejects_bad_bodies() {
    let app = app(&[]).await;
    create_aria(&app, 20).await;

    // both roster forms
    let (status, _, body) = post(
        &app,
        "/combat/aria/start",
        json!({
            "action_token": "tok-1",
            "enemies": goblin(),
            "instruction": { "type": "combat_start", "enemies": goblin() }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    // no token
    let (status, _, body) = post(&app, "/combat/aria/start", json!({ "enemies": goblin() })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    // unknown character
    let (status, _, body) = post(
        &app,
        "/combat/nobody/start",
        json!({ "action_token": "tok-2", "enemies": goblin() }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_natural_twenty_and_replay() {
    // initiative 5 / 15, then a natural 20 with damage faces 1 and 2
    let app = app(&[5, 15, 20, 1, 2]).await;
    create_aria(&app, 20).await;
    post(
        &app,
        "/combat/aria/start",
        json!({ "action_token": "tok-start", "enemies": goblin() }),
    )
    .await;

    let attack = json!({ "action_token": "tok-1", "type": "attack", "target_id": "enemy-1" });
    let (status, headers, first) = post(&app, "/combat/aria/action", attack.clone()).await;
    assert_eq!(status, StatusCode::OK, "{}", first);
    assert!(!is_replayed(&headers));

    let entry = &first["attack_log"][0];
    assert_eq!(entry["kind"], "attack");
    assert_eq!(entry["to_hit"]["natural"], 20);
    assert_eq!(entry["to_hit"]["critical"], true);
    assert_eq!(entry["to_hit"]["hit"], true);
    assert_eq!(entry["damage"]["rolls"], json!([1, 2]));
    assert_eq!(entry["total_damage"], 5);
    assert_eq!(entry["target_hp_before"], 7);
    assert_eq!(entry["target_hp_after"], 2);
    assert_eq!(entry["target_defeated"], false);

    let state = &first["state"];
    assert_eq!(state["enemies"][0]["hp"], 2);
    assert_eq!(state["phase"], "PLAYER_TURN");
    assert_eq!(state["action_remaining"], 0);
    assert_eq!(state["bonus_action_remaining"], 1);

    // retry with the same token: cached body, no second attack
    let (status, headers, replay) = post(&app, "/combat/aria/action", attack).await;
    assert_eq!(status, StatusCode::OK);
    assert!(is_replayed(&headers));
    assert_eq!(replay, first);

    let (_, status_body) = get(&app, "/combat/aria").await;
    assert_eq!(status_body["enemies"][0]["hp"], 2);
    assert_eq!(status_body["action_remaining"], 0);

    // a fresh token for another standard action is refused
    let (status, _, body) = post(
        &app,
        "/combat/aria/action",
        json!({ "action_token": "tok-2", "type": "attack", "target_id": "enemy-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "action_economy_exhausted");
}

#[tokio::test]
async fn test_tied_initiative_puts_enemies_first() {
    // everyone rolls 15; both enemies then fumble
    let app = app(&[15, 15, 15, 1, 1]).await;
    create_aria(&app, 20).await;

    let (status, _, body) = post(
        &app,
        "/combat/aria/start",
        json!({
            "action_token": "tok-start",
            "enemies": [
                { "name": "Goblin", "hp": 7, "ac": 13 },
                { "name": "Wolf", "hp": 11, "ac": 13 }
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let order: Vec<&str> = body["state"]["turn_order"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(order, vec!["enemy-1", "enemy-2", "player"]);
    assert_eq!(body["attack_log"].as_array().unwrap().len(), 2);
    assert_eq!(body["state"]["player"]["hp"], 20);
    assert_eq!(body["state"]["current_turn_index"], 2);
}

#[tokio::test]
async fn test_invalid_target_lists_valid_ids() {
    let app = app(&[5, 15]).await;
    create_aria(&app, 20).await;
    post(
        &app,
        "/combat/aria/start",
        json!({ "action_token": "tok-start", "enemies": goblin() }),
    )
    .await;

    let (status, _, body) = post(
        &app,
        "/combat/aria/action",
        json!({ "action_token": "tok-1", "type": "attack", "target_id": "enemy-4" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_target");
    assert_eq!(body["valid_targets"], json!(["enemy-1"]));

    // malformed action payloads are rejected before touching the ledger
    let (status, _, body) = post(
        &app,
        "/combat/aria/action",
        json!({ "action_token": "tok-2", "type": "cast_spell" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_defeat_scenario() {
    // goblin 18 beats player 3, hits 15 + 3 vs AC 10 for 6 + 1
    let app = app(&[18, 3, 15, 6]).await;
    create_aria(&app, 3).await;

    let (status, _, body) = post(
        &app,
        "/combat/aria/start",
        json!({ "action_token": "tok-start", "enemies": goblin() }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let state = &body["state"];
    assert_eq!(state["player"]["hp"], 0);
    assert_eq!(state["phase"], "COMBAT_ENDED");
    assert_eq!(state["defeat"], true);
    assert_eq!(state["victory"], false);
    assert_eq!(state["in_combat"], false);

    let (status, _, body) = post(
        &app,
        "/combat/aria/action",
        json!({ "action_token": "tok-1", "type": "attack", "target_id": "enemy-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_combat_state");

    let (status, _, body) = post(&app, "/combat/aria/end", json!({ "action_token": "tok-end" })).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["victory"], false);
    assert_eq!(body["defeat"], true);
    assert_eq!(body["xp_gained"], 0);

    let (_, sheet) = get(&app, "/characters/aria").await;
    assert_eq!(sheet["hp"], 0);
    assert_eq!(sheet["xp"], 0);
}

#[tokio::test]
async fn test_deferred_damage_roll() {
    let app = app(&[5, 15, 20]).await;
    create_aria(&app, 20).await;
    post(
        &app,
        "/combat/aria/start",
        json!({ "action_token": "tok-start", "enemies": goblin() }),
    )
    .await;

    let (status, _, body) = post(
        &app,
        "/combat/aria/action",
        json!({
            "action_token": "tok-1",
            "type": "attack",
            "target_id": "enemy-1",
            "defer_damage": true
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["state"]["phase"], "AWAITING_DAMAGE_ROLL");
    assert_eq!(body["state"]["pending_attack"]["action_token"], "tok-1");

    // the token now only accepts a damage roll
    let (status, _, body) = post(
        &app,
        "/combat/aria/action",
        json!({ "action_token": "tok-1", "type": "end_turn" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["expected"], "damage_roll");
    assert_eq!(body["received"], "end_turn");

    let (status, _, body) = post(
        &app,
        "/combat/aria/action",
        json!({ "action_token": "tok-1", "type": "damage_roll", "rolls": [6, 6] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["attack_log"][0]["total_damage"], 14);
    assert_eq!(body["state"]["victory"], true);
    assert_eq!(body["state"]["phase"], "COMBAT_ENDED");

    let (status, _, body) = post(&app, "/combat/aria/end", json!({ "action_token": "tok-end" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["victory"], true);
    assert_eq!(body["xp_gained"], 70);
    assert_eq!(body["enemies_defeated"], json!(["Goblin"]));

    let (_, sheet) = get(&app, "/characters/aria").await;
    assert_eq!(sheet["xp"], 70);

    let (_, status_body) = get(&app, "/combat/aria").await;
    assert_eq!(status_body, json!({ "in_combat": false }));
}

#[tokio::test]
async fn test_flee_and_end_turn() {
    // player first; goblin hits 10 + 3 vs AC 10 for 3 + 1 after end_turn
    let app = app(&[5, 15, 10, 3]).await;
    create_aria(&app, 20).await;
    post(
        &app,
        "/combat/aria/start",
        json!({ "action_token": "tok-start", "enemies": goblin() }),
    )
    .await;

    let (status, _, body) = post(
        &app,
        "/combat/aria/action",
        json!({ "action_token": "tok-1", "type": "end_turn" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["attack_log"][0]["attacker_id"], "enemy-1");
    assert_eq!(body["state"]["player"]["hp"], 16);
    assert_eq!(body["state"]["round_number"], 2);
    assert_eq!(body["state"]["phase"], "PLAYER_TURN");

    let (status, _, body) = post(
        &app,
        "/combat/aria/action",
        json!({ "action_token": "tok-2", "type": "flee" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["in_combat"], false);
    assert_eq!(body["state"]["phase"], "COMBAT_ENDED");
    assert_eq!(body["state"]["victory"], false);
    assert_eq!(body["state"]["defeat"], false);

    let (status, _, body) = post(&app, "/combat/aria/end", json!({ "action_token": "tok-end" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["xp_gained"], 0);

    let (_, sheet) = get(&app, "/characters/aria").await;
    assert_eq!(sheet["hp"], 16);
}

#[tokio::test]
async fn test_token_reuse_across_combats() {
    let app = app(&[5, 15]).await;
    create_aria(&app, 20).await;
    post(
        &app,
        "/characters",
        json!({
            "id": "bran",
            "name": "Bran",
            "hp_max": 12,
            "armor_class": 12,
            "attack_bonus": 3,
            "damage_dice": "1d8"
        }),
    )
    .await;

    post(
        &app,
        "/combat/aria/start",
        json!({ "action_token": "tok-start", "enemies": goblin() }),
    )
    .await;

    let (status, _, body) = post(
        &app,
        "/combat/bran/start",
        json!({ "action_token": "tok-start", "enemies": goblin() }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}
