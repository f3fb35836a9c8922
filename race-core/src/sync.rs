use std::collections::{HashMap, HashSet};

use race_types::{BroadcastPayload, PayloadError, PlayerState, PresenceEntry};
use tracing::debug;
use uuid::Uuid;

pub const MAX_USERNAME_CHARS: usize = 24;
pub const MAX_TYPED_CHARS: usize = 2000;

/// Tagged input to the merge reducer. Three independent sources of truth
/// feed the same per-round view: durable baseline rows, presence, and live
/// typing broadcasts.
#[derive(Debug, Clone)]
pub enum RaceEvent {
    BaselineLoaded {
        players: Vec<PlayerState>,
    },
    PresenceSync {
        online: Vec<PresenceEntry>,
        at: String,
    },
    PresenceJoin {
        entry: PresenceEntry,
        at: String,
    },
    PresenceLeave {
        user_id: Uuid,
    },
    Broadcast {
        payload: BroadcastPayload,
    },
}

/// Check an incoming broadcast against the round the receiving view is
/// anchored to. A payload from any other round is stale traffic from a
/// channel subscription that outlived a round boundary and must not touch
/// the new round's state.
pub fn validate_payload(
    payload: &BroadcastPayload,
    expected_round: Uuid,
) -> Result<(), PayloadError> {
    if payload.round_id != expected_round {
        return Err(PayloadError::StaleRound);
    }
    if payload.username.chars().count() > MAX_USERNAME_CHARS {
        return Err(PayloadError::UsernameTooLong);
    }
    if payload.typed_text.chars().count() > MAX_TYPED_CHARS {
        return Err(PayloadError::TypedTextTooLong);
    }
    if payload.correct_chars > payload.typed_chars {
        return Err(PayloadError::CorrectExceedsTyped);
    }
    if !payload.accuracy.is_finite() || !(0.0..=1.0).contains(&payload.accuracy) {
        return Err(PayloadError::AccuracyOutOfRange);
    }
    if !payload.wpm.is_finite() || payload.wpm < 0.0 {
        return Err(PayloadError::WpmOutOfRange);
    }
    Ok(())
}

/// Carry a previous-round row into the next round's baseline: the player is
/// shown with their last pace rather than a blank row, but everything scoped
/// to the old round's sentence is reset.
pub fn carried_over(row: &PlayerState) -> PlayerState {
    PlayerState {
        user_id: row.user_id,
        username: row.username.clone(),
        typed_text: String::new(),
        correct_chars: 0,
        typed_chars: 0,
        wpm: row.wpm,
        accuracy: row.accuracy,
        finished: false,
        is_online: false,
        updated_at: row.updated_at.clone(),
    }
}

/// The merged per-round view of every participant, owned by exactly one
/// session. All mutation goes through [`RaceView::apply`], which keeps the
/// merge logic testable without any transport attached.
#[derive(Debug)]
pub struct RaceView {
    round_id: Uuid,
    sentence_chars: usize,
    players: HashMap<Uuid, PlayerState>,
}

impl RaceView {
    pub fn new(round_id: Uuid, sentence_chars: usize) -> Self {
        Self {
            round_id,
            sentence_chars,
            players: HashMap::new(),
        }
    }

    pub fn round_id(&self) -> Uuid {
        self.round_id
    }

    /// Clear the map and re-anchor on a new round. Must run before any
    /// channel traffic for the new round is applied, so the stale-round
    /// guard compares against the right id.
    pub fn reset_for_round(&mut self, round_id: Uuid, sentence_chars: usize) {
        self.round_id = round_id;
        self.sentence_chars = sentence_chars;
        self.players.clear();
    }

    pub fn apply(&mut self, event: RaceEvent) {
        match event {
            RaceEvent::BaselineLoaded { players } => {
                for mut player in players {
                    // A presence sync can land before the baseline load
                    // resolves; the flag from presence wins.
                    if let Some(existing) = self.players.get(&player.user_id) {
                        player.is_online = existing.is_online;
                    }
                    self.players.insert(player.user_id, player);
                }
            }
            RaceEvent::PresenceSync { online, at } => {
                let online_ids: HashSet<Uuid> = online.iter().map(|e| e.user_id).collect();
                for entry in online {
                    if !self.players.contains_key(&entry.user_id) {
                        self.players.insert(
                            entry.user_id,
                            PlayerState::placeholder(entry.user_id, entry.username, at.clone()),
                        );
                    }
                }
                for player in self.players.values_mut() {
                    player.is_online = online_ids.contains(&player.user_id);
                }
            }
            RaceEvent::PresenceJoin { entry, at } => {
                if let Some(player) = self.players.get_mut(&entry.user_id) {
                    player.is_online = true;
                } else {
                    self.players.insert(
                        entry.user_id,
                        PlayerState::placeholder(entry.user_id, entry.username, at),
                    );
                }
            }
            RaceEvent::PresenceLeave { user_id } => {
                // Mark offline but keep the row: the leaderboard still shows
                // the player's final state.
                if let Some(player) = self.players.get_mut(&user_id) {
                    player.is_online = false;
                }
            }
            RaceEvent::Broadcast { payload } => {
                if let Err(reason) = validate_payload(&payload, self.round_id) {
                    debug!("dropping broadcast from {}: {:?}", payload.user_id, reason);
                    return;
                }

                let typed_text: String =
                    payload.typed_text.chars().take(self.sentence_chars).collect();
                let typed_chars = typed_text.chars().count() as u32;
                let correct_chars = payload.correct_chars.min(typed_chars);
                let finished = self.sentence_chars > 0
                    && typed_chars as usize == self.sentence_chars
                    && correct_chars as usize == self.sentence_chars;

                // Last-received-wins per sender; senders are single-threaded
                // per session so updated_at is non-decreasing per stream.
                self.players.insert(
                    payload.user_id,
                    PlayerState {
                        user_id: payload.user_id,
                        username: payload.username,
                        typed_text,
                        correct_chars,
                        typed_chars,
                        wpm: payload.wpm,
                        accuracy: payload.accuracy,
                        finished,
                        is_online: true,
                        updated_at: payload.updated_at,
                    },
                );
            }
        }
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values()
    }

    pub fn get(&self, user_id: &Uuid) -> Option<&PlayerState> {
        self.players.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
