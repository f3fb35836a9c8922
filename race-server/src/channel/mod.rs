use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use warp::ws::{Message, WebSocket};

use race_core::sync::RaceEvent;
use race_persistence::{ResultRepository, RoundRepository};
use race_types::{ClientMessage, ServerMessage};

use crate::auth::{AuthService, AuthedUser};
use crate::config::Config;
use crate::round_manager::RoundManager;

pub mod hub;
pub mod session;

pub use hub::{ChannelHub, SessionId};
use session::RaceSession;

/// Drive one websocket connection: client messages in, roster updates out,
/// with the throttle flush and round-expiry timers multiplexed into the same
/// single-threaded loop. Everything the session owns lives and dies with
/// this task.
pub async fn handle_connection(
    websocket: WebSocket,
    hub: Arc<ChannelHub>,
    round_manager: Arc<RoundManager>,
    rounds: Arc<RoundRepository>,
    results: Arc<ResultRepository>,
    auth_service: Arc<AuthService>,
    config: Config,
) {
    let session_id = SessionId::new();
    info!("New WebSocket connection: {}", session_id);

    let (mut ws_sender, mut ws_receiver) = websocket.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<RaceEvent>();

    // Forward outgoing messages; ends when the last sender is dropped.
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize message: {:?}", e);
                    continue;
                }
            };

            if let Err(e) = ws_sender.send(Message::text(json)).await {
                warn!("Failed to send message: {:?}", e);
                break;
            }
        }
    });

    let context = MessageContext {
        session_id,
        hub: hub.clone(),
        round_manager,
        rounds,
        results,
        auth_service,
        broadcast_min_interval: Duration::from_millis(config.broadcast_min_interval_ms),
        out_tx,
        event_tx,
    };

    let mut authed: Option<AuthedUser> = None;
    let mut session: Option<RaceSession> = None;

    loop {
        let flush_at = session.as_ref().and_then(RaceSession::flush_deadline);
        let expiry_at = session.as_ref().and_then(RaceSession::expiry_deadline);

        tokio::select! {
            incoming = ws_receiver.next() => {
                let Some(result) = incoming else { break };
                match result {
                    Ok(msg) => {
                        if msg.is_close() {
                            break;
                        }
                        let Ok(text) = msg.to_str() else { continue };
                        match serde_json::from_str::<ClientMessage>(text) {
                            Ok(message) => {
                                context
                                    .handle_message(message, &mut authed, &mut session)
                                    .await;
                            }
                            Err(e) => {
                                context.send_error(&format!("Invalid JSON message: {e}"));
                            }
                        }
                    }
                    Err(e) => {
                        warn!("WebSocket error for {}: {}", session_id, e);
                        break;
                    }
                }
            }
            event = event_rx.recv() => {
                match event {
                    Some(event) => {
                        if let Some(session) = session.as_mut() {
                            session.apply_channel_event(event);
                        }
                    }
                    None => break,
                }
            }
            _ = sleep_until_opt(flush_at) => {
                if let Some(session) = session.as_mut() {
                    session.flush_pending().await;
                }
            }
            _ = sleep_until_opt(expiry_at) => {
                if let Some(session) = session.as_mut() {
                    session.handle_round_expiry().await;
                }
            }
        }
    }

    info!("Connection {} disconnected", session_id);
    if session.is_some() {
        hub.leave(session_id).await;
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

struct MessageContext {
    session_id: SessionId,
    hub: Arc<ChannelHub>,
    round_manager: Arc<RoundManager>,
    rounds: Arc<RoundRepository>,
    results: Arc<ResultRepository>,
    auth_service: Arc<AuthService>,
    broadcast_min_interval: Duration,
    out_tx: mpsc::UnboundedSender<ServerMessage>,
    event_tx: mpsc::UnboundedSender<RaceEvent>,
}

impl MessageContext {
    async fn handle_message(
        &self,
        message: ClientMessage,
        authed: &mut Option<AuthedUser>,
        session: &mut Option<RaceSession>,
    ) {
        match message {
            ClientMessage::Authenticate { token } => {
                match self.auth_service.validate_token(&token) {
                    Ok(user) => {
                        info!(
                            "Connection {} authenticated as {}",
                            self.session_id, user.id
                        );
                        self.send(ServerMessage::AuthenticationSuccess {
                            user_id: user.id,
                            username: user.username.clone(),
                        });
                        *authed = Some(user);
                    }
                    Err(e) => {
                        warn!(
                            "Authentication failed for connection {}: {}",
                            self.session_id, e
                        );
                        self.send(ServerMessage::AuthenticationFailed {
                            reason: e.to_string(),
                        });
                    }
                }
            }
            ClientMessage::EnsureRound => {
                let Some(user) = authed.clone() else {
                    self.send_error("Authentication required");
                    return;
                };

                match self.round_manager.ensure_active_round().await {
                    Ok(round) => match session.as_mut() {
                        Some(existing) => existing.adopt_round(round).await,
                        None => {
                            *session = Some(
                                RaceSession::start(
                                    self.session_id,
                                    user,
                                    round,
                                    self.hub.clone(),
                                    self.rounds.clone(),
                                    self.results.clone(),
                                    self.event_tx.clone(),
                                    self.out_tx.clone(),
                                    self.broadcast_min_interval,
                                )
                                .await,
                            );
                        }
                    },
                    Err(err) => {
                        error!("Failed to ensure round: {err}");
                        self.send(ServerMessage::RoundUnavailable {
                            reason: err.to_string(),
                        });
                    }
                }
            }
            ClientMessage::TypingUpdate { typed_text } => match session.as_mut() {
                Some(session) => session.handle_typing(typed_text).await,
                None => self.send_error("No active round"),
            },
            ClientMessage::Heartbeat => {}
        }
    }

    fn send(&self, message: ServerMessage) {
        let _ = self.out_tx.send(message);
    }

    fn send_error(&self, message: &str) {
        self.send(ServerMessage::Error {
            message: message.to_string(),
        });
    }
}
