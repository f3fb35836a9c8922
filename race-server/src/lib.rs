use std::sync::Arc;

use uuid::Uuid;
use warp::Filter;

use crate::auth::AuthService;
use crate::channel::ChannelHub;
use crate::config::Config;
use crate::round_manager::{RoundError, RoundManager};
use race_persistence::{ResultRepository, RoundRepository};
use race_types::PlayerState;

pub mod auth;
pub mod channel;
pub mod config;
pub mod round_manager;

pub fn create_routes(
    hub: Arc<ChannelHub>,
    round_manager: Arc<RoundManager>,
    rounds: Arc<RoundRepository>,
    results: Arc<ResultRepository>,
    auth_service: Arc<AuthService>,
    config: Config,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    // Clone for filters
    let hub_filter = warp::any().map({
        let hub = hub.clone();
        move || hub.clone()
    });

    let round_manager_filter = warp::any().map({
        let round_manager = round_manager.clone();
        move || round_manager.clone()
    });

    let rounds_filter = warp::any().map({
        let rounds = rounds.clone();
        move || rounds.clone()
    });

    let results_filter = warp::any().map({
        let results = results.clone();
        move || results.clone()
    });

    let auth_filter = warp::any().map({
        let auth_service = auth_service.clone();
        move || auth_service.clone()
    });

    let config_filter = warp::any().map({
        let config = config.clone();
        move || config.clone()
    });

    // WebSocket endpoint
    let websocket = warp::path("ws")
        .and(warp::ws())
        .and(hub_filter)
        .and(round_manager_filter.clone())
        .and(rounds_filter)
        .and(results_filter.clone())
        .and(auth_filter.clone())
        .and(config_filter)
        .map(
            |ws: warp::ws::Ws, hub, round_manager, rounds, results, auth, config| {
                ws.on_upgrade(move |socket| {
                    channel::handle_connection(
                        socket,
                        hub,
                        round_manager,
                        rounds,
                        results,
                        auth,
                        config,
                    )
                })
            },
        );

    // Health check endpoint
    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::with_status("OK", warp::http::StatusCode::OK));

    // Idempotent ensure-and-fetch of the active round
    let ensure_round = warp::path!("rounds" / "ensure")
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(round_manager_filter)
        .and(auth_filter)
        .and_then(handle_ensure_round);

    // Persisted standings for one round
    let round_results = warp::path!("rounds" / Uuid / "results")
        .and(warp::get())
        .and(results_filter)
        .and_then(handle_round_results);

    // CORS configuration
    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type", "authorization"])
        .allow_methods(vec!["GET", "POST"]);

    websocket
        .or(health)
        .or(ensure_round)
        .or(round_results)
        .with(cors)
        .with(warp::log("race_server"))
}

async fn handle_ensure_round(
    auth_header: Option<String>,
    round_manager: Arc<RoundManager>,
    auth_service: Arc<AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let Some(auth_header) = auth_header else {
        return Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({
                "error": "Unauthorized"
            })),
            warp::http::StatusCode::UNAUTHORIZED,
        ));
    };

    let token = auth_header.strip_prefix("Bearer ").unwrap_or(&auth_header);
    if auth_service.validate_token(token).is_err() {
        return Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({
                "error": "Unauthorized"
            })),
            warp::http::StatusCode::UNAUTHORIZED,
        ));
    }

    match round_manager.ensure_active_round().await {
        Ok(round) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "round": round })),
            warp::http::StatusCode::OK,
        )),
        Err(err @ RoundError::EmptySentencePool) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({
                "error": err.to_string()
            })),
            warp::http::StatusCode::INTERNAL_SERVER_ERROR,
        )),
        Err(err) => {
            tracing::error!("Failed to ensure round: {}", err);
            Ok(warp::reply::with_status(
                warp::reply::json(&serde_json::json!({
                    "error": "Failed to ensure round"
                })),
                warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

async fn handle_round_results(
    round_id: Uuid,
    results: Arc<ResultRepository>,
) -> Result<impl warp::Reply, warp::Rejection> {
    match results.results_for_round(round_id).await {
        Ok(rows) => {
            let mut players: Vec<PlayerState> = rows
                .into_iter()
                .map(ResultRepository::to_player_state)
                .collect();
            players.sort_by(|a, b| {
                b.correct_chars
                    .cmp(&a.correct_chars)
                    .then(b.wpm.total_cmp(&a.wpm))
            });

            Ok(warp::reply::with_status(
                warp::reply::json(&players),
                warp::http::StatusCode::OK,
            ))
        }
        Err(err) => {
            tracing::error!("Failed to fetch round results: {}", err);
            Ok(warp::reply::with_status(
                warp::reply::json(&serde_json::json!({
                    "error": "Failed to fetch round results"
                })),
                warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use race_types::{ClientMessage, Round, ServerMessage};
    use std::time::Duration;

    async fn create_test_app(
        sentences: &[&str],
    ) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let db = race_persistence::connection::connect_to_memory_database()
            .await
            .unwrap();
        Migrator::up(&db, None).await.unwrap();

        let rounds = Arc::new(RoundRepository::new(db.clone()));
        for text in sentences {
            rounds.insert_sentence(text, None).await.unwrap();
        }

        let results = Arc::new(ResultRepository::new(db.clone()));
        let round_manager = Arc::new(RoundManager::new(RoundRepository::new(db), 60));
        let hub = Arc::new(ChannelHub::new());
        let auth_service = Arc::new(AuthService::new_dev_mode());
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            round_duration_seconds: 60,
            broadcast_min_interval_ms: 120,
        };

        create_routes(hub, round_manager, rounds, results, auth_service, config)
    }

    async fn recv_message(ws: &mut warp::test::WsClient) -> ServerMessage {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.recv())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed");
        serde_json::from_str(msg.to_str().expect("expected text frame"))
            .expect("Should be valid ServerMessage")
    }

    async fn authenticate(ws: &mut warp::test::WsClient, user_id: Uuid, username: &str) {
        let auth_msg = ClientMessage::Authenticate {
            token: format!("{user_id}:{username}"),
        };
        ws.send_text(serde_json::to_string(&auth_msg).unwrap()).await;

        match recv_message(ws).await {
            ServerMessage::AuthenticationSuccess {
                user_id: echoed, ..
            } => assert_eq!(echoed, user_id),
            other => panic!("Expected AuthenticationSuccess, got {:?}", other),
        }
    }

    /// Ensure a round over the socket and return it, consuming the initial
    /// roster update as well.
    async fn ensure_round(ws: &mut warp::test::WsClient) -> Round {
        ws.send_text(serde_json::to_string(&ClientMessage::EnsureRound).unwrap())
            .await;

        let round = match recv_message(ws).await {
            ServerMessage::RoundInfo { round } => round,
            other => panic!("Expected RoundInfo, got {:?}", other),
        };
        match recv_message(ws).await {
            ServerMessage::RosterUpdate { .. } => {}
            other => panic!("Expected RosterUpdate, got {:?}", other),
        }
        round
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app(&["hello world"]).await;

        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&app)
            .await;

        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), "OK");
    }

    #[tokio::test]
    async fn test_ensure_round_requires_auth() {
        let app = create_test_app(&["hello world"]).await;

        let response = warp::test::request()
            .method("POST")
            .path("/rounds/ensure")
            .reply(&app)
            .await;

        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn test_ensure_round_is_idempotent_over_http() {
        let app = create_test_app(&["hello world"]).await;
        let token = format!("{}:Alice", Uuid::new_v4());

        let response = warp::test::request()
            .method("POST")
            .path("/rounds/ensure")
            .header("authorization", format!("Bearer {token}"))
            .reply(&app)
            .await;
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        let first: Round = serde_json::from_value(body["round"].clone()).unwrap();
        assert_eq!(first.round_number, 1);
        assert_eq!(first.sentence.text, "hello world");

        let response = warp::test::request()
            .method("POST")
            .path("/rounds/ensure")
            .header("authorization", format!("Bearer {token}"))
            .reply(&app)
            .await;
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        let second: Round = serde_json::from_value(body["round"].clone()).unwrap();
        assert_eq!(second.id, first.id);
    }

    #[tokio::test]
    async fn test_ensure_round_with_empty_pool_reports_configuration_error() {
        let app = create_test_app(&[]).await;
        let token = format!("{}:Alice", Uuid::new_v4());

        let response = warp::test::request()
            .method("POST")
            .path("/rounds/ensure")
            .header("authorization", format!("Bearer {token}"))
            .reply(&app)
            .await;

        assert_eq!(response.status(), 500);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "No sentences configured");
    }

    #[tokio::test]
    async fn test_round_results_empty_for_unknown_round() {
        let app = create_test_app(&["hello world"]).await;

        let response = warp::test::request()
            .method("GET")
            .path(&format!("/rounds/{}/results", Uuid::new_v4()))
            .reply(&app)
            .await;

        assert_eq!(response.status(), 200);
        let players: Vec<PlayerState> = serde_json::from_slice(response.body()).unwrap();
        assert!(players.is_empty());
    }

    #[tokio::test]
    async fn test_websocket_requires_auth_before_round() {
        let app = create_test_app(&["ab"]).await;

        let mut ws = warp::test::ws()
            .path("/ws")
            .handshake(app)
            .await
            .expect("WebSocket handshake should succeed");

        ws.send_text(serde_json::to_string(&ClientMessage::EnsureRound).unwrap())
            .await;

        match recv_message(&mut ws).await {
            ServerMessage::Error { message } => {
                assert!(message.contains("Authentication required"));
            }
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_typing_before_ensure_round_errors() {
        let app = create_test_app(&["ab"]).await;
        let mut ws = warp::test::ws()
            .path("/ws")
            .handshake(app)
            .await
            .expect("WebSocket handshake should succeed");
        authenticate(&mut ws, Uuid::new_v4(), "Alice").await;

        let msg = ClientMessage::TypingUpdate {
            typed_text: "ab".to_string(),
        };
        ws.send_text(serde_json::to_string(&msg).unwrap()).await;

        match recv_message(&mut ws).await {
            ServerMessage::Error { message } => assert!(message.contains("No active round")),
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_typing_progress_reaches_other_client() {
        let app = create_test_app(&["ab"]).await;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let mut ws_alice = warp::test::ws()
            .path("/ws")
            .handshake(app.clone())
            .await
            .expect("WebSocket handshake should succeed");
        authenticate(&mut ws_alice, alice, "Alice").await;

        let mut ws_bob = warp::test::ws()
            .path("/ws")
            .handshake(app.clone())
            .await
            .expect("WebSocket handshake should succeed");
        authenticate(&mut ws_bob, bob, "Bob").await;

        let round_a = ensure_round(&mut ws_alice).await;
        let round_b = ensure_round(&mut ws_bob).await;
        assert_eq!(round_a.id, round_b.id);

        // Alice types the whole sentence; Bob's merged view should pick it
        // up from the broadcast (Alice's own session never echoes it back).
        let msg = ClientMessage::TypingUpdate {
            typed_text: "ab".to_string(),
        };
        ws_alice
            .send_text(serde_json::to_string(&msg).unwrap())
            .await;

        let mut saw_alice_finished = false;
        for _ in 0..10 {
            match recv_message(&mut ws_bob).await {
                ServerMessage::RosterUpdate { players } => {
                    if let Some(row) = players.iter().find(|p| p.user_id == alice) {
                        if row.finished && row.typed_text == "ab" {
                            saw_alice_finished = true;
                            break;
                        }
                    }
                }
                _ => {}
            }
        }
        assert!(saw_alice_finished, "Bob never saw Alice's finished row");

        // Alice's own roster echo is sent after the completion write, so
        // consuming it guarantees the result row is durable before we read
        // it back.
        let mut alice_done = false;
        for _ in 0..10 {
            match recv_message(&mut ws_alice).await {
                ServerMessage::RosterUpdate { players } => {
                    if players.iter().any(|p| p.user_id == alice && p.finished) {
                        alice_done = true;
                        break;
                    }
                }
                _ => {}
            }
        }
        assert!(alice_done, "Alice never saw her own finished row");

        // Completion also persisted the durable result
        let response = warp::test::request()
            .method("GET")
            .path(&format!("/rounds/{}/results", round_a.id))
            .reply(&app)
            .await;
        let players: Vec<PlayerState> = serde_json::from_slice(response.body()).unwrap();
        let row = players.iter().find(|p| p.user_id == alice).unwrap();
        assert!(row.finished);
        assert_eq!(row.typed_text, "ab");
    }
}
