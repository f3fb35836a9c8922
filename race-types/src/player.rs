use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Live or persisted snapshot of one participant in one round.
///
/// Invariant: `correct_chars <= typed_chars <= sentence length`, and a
/// finished player has typed the full sentence correctly. `is_online` comes
/// from presence only and is never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PlayerState {
    pub user_id: Uuid,
    pub username: String,
    pub typed_text: String,
    pub correct_chars: u32,
    pub typed_chars: u32,
    pub wpm: f64,
    pub accuracy: f64,
    pub finished: bool,
    pub is_online: bool,
    pub updated_at: String, // ISO 8601 string
}

impl PlayerState {
    /// Blank row for a participant who joined the channel but has not
    /// produced any typed output yet.
    pub fn placeholder(user_id: Uuid, username: String, updated_at: String) -> Self {
        Self {
            user_id,
            username,
            typed_text: String::new(),
            correct_chars: 0,
            typed_chars: 0,
            wpm: 0.0,
            accuracy: 0.0,
            finished: false,
            is_online: true,
            updated_at,
        }
    }
}
