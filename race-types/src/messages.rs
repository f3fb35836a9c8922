use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::{PlayerState, Round};

/// Ephemeral typing update pushed over the shared channel. Never persisted;
/// validated on receipt and dropped when malformed or addressed to a round
/// other than the one the receiver is tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BroadcastPayload {
    pub round_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub typed_text: String,
    pub correct_chars: u32,
    pub typed_chars: u32,
    pub wpm: f64,
    pub accuracy: f64,
    pub updated_at: String, // ISO 8601 string
}

/// Presence identity on the shared channel. The presence key is the user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ClientMessage {
    Authenticate { token: String },
    EnsureRound,
    TypingUpdate { typed_text: String },
    Heartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ServerMessage {
    AuthenticationSuccess { user_id: Uuid, username: String },
    AuthenticationFailed { reason: String },
    RoundInfo { round: Round },
    RosterUpdate { players: Vec<PlayerState> },
    RoundUnavailable { reason: String },
    Error { message: String },
}
