use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use race_core::stats::{TypingStats, compute_stats};
use race_core::sync::{RaceEvent, RaceView, carried_over};
use race_core::throttle::{ThrottleDecision, ThrottleGate};
use race_persistence::{NewRoundResult, ResultRepository, RoundRepository};
use race_types::{BroadcastPayload, PlayerState, Round, ServerMessage};

use crate::auth::AuthedUser;
use crate::channel::hub::{ChannelHub, SessionId};

/// One connected client's race state: the merged view of every other
/// participant, the locally typed text, the throttled outbound emitter, and
/// the round-expiry timer. Owned by exactly one connection task; never
/// shared.
pub struct RaceSession {
    session_id: SessionId,
    user: AuthedUser,
    round: Round,
    round_start: DateTime<Utc>,
    round_end: DateTime<Utc>,
    view: RaceView,
    gate: ThrottleGate,
    pending: Option<BroadcastPayload>,
    flush_at: Option<Instant>,
    expiry_at: Option<Instant>,
    typed: String,
    last_stats: TypingStats,
    persisted: bool,
    hub: Arc<ChannelHub>,
    rounds: Arc<RoundRepository>,
    results: Arc<ResultRepository>,
    out: mpsc::UnboundedSender<ServerMessage>,
}

impl RaceSession {
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        session_id: SessionId,
        user: AuthedUser,
        round: Round,
        hub: Arc<ChannelHub>,
        rounds: Arc<RoundRepository>,
        results: Arc<ResultRepository>,
        events: mpsc::UnboundedSender<RaceEvent>,
        out: mpsc::UnboundedSender<ServerMessage>,
        min_broadcast_interval: Duration,
    ) -> Self {
        let round_start = parse_time(&round.start_at);
        let round_end = parse_time(&round.end_at);
        let sentence_chars = round.sentence.text.chars().count();

        let mut session = Self {
            session_id,
            view: RaceView::new(round.id, sentence_chars),
            gate: ThrottleGate::new(min_broadcast_interval),
            pending: None,
            flush_at: None,
            expiry_at: deadline_for(round_end),
            typed: String::new(),
            last_stats: TypingStats {
                correct_chars: 0,
                accuracy: 0.0,
                wpm: 0.0,
            },
            persisted: false,
            user,
            round,
            round_start,
            round_end,
            hub,
            rounds,
            results,
            out,
        };

        session.load_baseline().await;
        session
            .hub
            .join(
                session.session_id,
                session.user.id,
                session.user.username.clone(),
                events,
            )
            .await;

        session.send(ServerMessage::RoundInfo {
            round: session.round.clone(),
        });
        session.send_roster();
        session
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn flush_deadline(&self) -> Option<Instant> {
        self.flush_at
    }

    pub fn expiry_deadline(&self) -> Option<Instant> {
        self.expiry_at
    }

    /// Feed one channel event into the merge view and push the refreshed
    /// roster to the client.
    pub fn apply_channel_event(&mut self, event: RaceEvent) {
        self.view.apply(event);
        self.send_roster();
    }

    /// Adopt the round returned by an ensure call: a no-op re-send for the
    /// round already tracked, a full reset for a new one.
    pub async fn adopt_round(&mut self, round: Round) {
        if round.id == self.view.round_id() {
            self.send(ServerMessage::RoundInfo { round });
            return;
        }
        self.switch_round(round).await;
    }

    async fn switch_round(&mut self, round: Round) {
        info!(
            "session {} switching to round {}",
            self.session_id, round.round_number
        );

        let round_start = parse_time(&round.start_at);
        let round_end = parse_time(&round.end_at);
        let sentence_chars = round.sentence.text.chars().count();

        // Re-anchor before anything else so channel traffic still in flight
        // for the old round fails the stale-round guard.
        self.view.reset_for_round(round.id, sentence_chars);
        self.round = round;
        self.round_start = round_start;
        self.round_end = round_end;

        self.typed.clear();
        self.persisted = false;
        self.last_stats = TypingStats {
            correct_chars: 0,
            accuracy: 0.0,
            wpm: 0.0,
        };
        self.pending = None;
        self.flush_at = None;
        self.gate.reset();
        self.expiry_at = deadline_for(round_end);

        self.load_baseline().await;
        self.send(ServerMessage::RoundInfo {
            round: self.round.clone(),
        });
        self.send_roster();
    }

    /// Handle one typing keystroke batch from the client. Recomputes stats
    /// from the raw text, broadcasts through the throttle, and performs the
    /// completion persistence write the moment the sentence is finished.
    pub async fn handle_typing(&mut self, raw: String) {
        let now = Utc::now();
        if now >= self.round_end {
            // Clock ran out; input is ignored until a new round is ensured.
            return;
        }

        let sentence_chars = self.round.sentence.text.chars().count();
        let capped: String = raw.chars().take(sentence_chars).collect();
        let elapsed = (now - self.round_start).num_milliseconds() as f64 / 1000.0;
        let stats = compute_stats(&capped, &self.round.sentence.text, elapsed);

        self.typed = capped.clone();
        self.last_stats = stats;

        let payload = BroadcastPayload {
            round_id: self.round.id,
            user_id: self.user.id,
            username: self.user.username.clone(),
            typed_text: capped.clone(),
            correct_chars: stats.correct_chars,
            typed_chars: capped.chars().count() as u32,
            wpm: stats.wpm,
            accuracy: stats.accuracy,
            updated_at: now.to_rfc3339(),
        };
        self.queue_broadcast(payload).await;

        let completed = sentence_chars > 0
            && capped.chars().count() == sentence_chars
            && stats.correct_chars as usize == sentence_chars;
        if completed {
            self.persist_completion().await;
        }

        self.send_roster();
    }

    /// First persistence call site: the player typed the whole sentence
    /// correctly while the clock was still running.
    async fn persist_completion(&mut self) {
        if self.persisted {
            return;
        }
        self.persisted = true;
        self.write_result(true, self.last_stats).await;
    }

    /// Second persistence call site: the round clock hit zero with typed
    /// input on screen. Writes `finished = false` regardless of progress;
    /// completion goes through [`Self::persist_completion`] only.
    pub async fn handle_round_expiry(&mut self) {
        self.expiry_at = None;
        if self.persisted || self.typed.is_empty() {
            return;
        }
        self.persisted = true;

        let full_window =
            (self.round_end - self.round_start).num_milliseconds() as f64 / 1000.0;
        let stats = compute_stats(&self.typed, &self.round.sentence.text, full_window);
        self.last_stats = stats;
        self.write_result(false, stats).await;
    }

    async fn write_result(&self, finished: bool, stats: TypingStats) {
        let result = NewRoundResult {
            round_id: self.round.id,
            user_id: self.user.id,
            username: self.user.username.clone(),
            typed_text: self.typed.clone(),
            correct_chars: stats.correct_chars,
            accuracy: stats.accuracy,
            wpm: stats.wpm,
            finished,
        };
        if let Err(err) = self.results.upsert_result(result).await {
            // Best-effort: individual persist failures are invisible to the
            // user; the durable row stays the source of truth for scoring.
            warn!("failed to persist result for {}: {err:#}", self.user.id);
        }
    }

    async fn queue_broadcast(&mut self, payload: BroadcastPayload) {
        match self.gate.poll(std::time::Instant::now()) {
            ThrottleDecision::SendNow => {
                self.pending = None;
                self.flush_at = None;
                self.hub.broadcast_typing(self.session_id, payload).await;
            }
            ThrottleDecision::Defer(delay) => {
                // Latest pending call replaces older ones; never a queue.
                self.pending = Some(payload);
                self.flush_at = Some(Instant::now() + delay);
            }
        }
    }

    /// Trailing-edge flush: the last keystroke state inside a throttle
    /// window is never silently dropped.
    pub async fn flush_pending(&mut self) {
        self.flush_at = None;
        if let Some(payload) = self.pending.take() {
            self.gate.mark_flushed(std::time::Instant::now());
            self.hub.broadcast_typing(self.session_id, payload).await;
        }
    }

    /// Best-effort baseline: previous-round rows carried over, overlaid by
    /// any rows already persisted for the current round (reconnects). A
    /// failed load degrades to blank rows rather than blocking the round.
    async fn load_baseline(&mut self) {
        let mut baseline: Vec<PlayerState> = Vec::new();

        let prev_number = self.round.round_number - 1;
        if prev_number >= 1 {
            match self.rounds.find_by_number(prev_number).await {
                Ok(Some(prev)) => match self.results.results_for_round(prev.id).await {
                    Ok(rows) => baseline.extend(
                        rows.into_iter()
                            .map(|row| carried_over(&ResultRepository::to_player_state(row))),
                    ),
                    Err(err) => warn!("baseline load failed for round {}: {err:#}", prev.id),
                },
                Ok(None) => {}
                Err(err) => warn!("previous round lookup failed: {err}"),
            }
        }

        match self.results.results_for_round(self.round.id).await {
            Ok(rows) => {
                baseline.extend(rows.into_iter().map(ResultRepository::to_player_state))
            }
            Err(err) => warn!(
                "baseline load failed for round {}: {err:#}",
                self.round.id
            ),
        }

        self.view.apply(RaceEvent::BaselineLoaded { players: baseline });
    }

    /// The client's own broadcasts are never echoed back by the channel, so
    /// the local row is injected here instead of flowing through the view.
    fn own_row(&self) -> PlayerState {
        let sentence_chars = self.round.sentence.text.chars().count();
        let typed_chars = self.typed.chars().count();
        PlayerState {
            user_id: self.user.id,
            username: self.user.username.clone(),
            typed_text: self.typed.clone(),
            correct_chars: self.last_stats.correct_chars,
            typed_chars: typed_chars as u32,
            wpm: self.last_stats.wpm,
            accuracy: self.last_stats.accuracy,
            finished: sentence_chars > 0
                && typed_chars == sentence_chars
                && self.last_stats.correct_chars as usize == sentence_chars,
            is_online: true,
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn roster_snapshot(&self) -> Vec<PlayerState> {
        let mut players: Vec<PlayerState> = self
            .view
            .players()
            .filter(|p| p.user_id != self.user.id)
            .cloned()
            .collect();
        players.push(self.own_row());
        // Stable wire order; presentation ordering is the client's concern
        players.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        players
    }

    fn send_roster(&self) {
        self.send(ServerMessage::RosterUpdate {
            players: self.roster_snapshot(),
        });
    }

    fn send(&self, message: ServerMessage) {
        let _ = self.out.send(message);
    }
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn deadline_for(end: DateTime<Utc>) -> Option<Instant> {
    let remaining = (end - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Some(Instant::now() + remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use race_persistence::connection::connect_to_memory_database;
    use race_types::Sentence;
    use uuid::Uuid;

    struct TestSessionSetup {
        rounds: Arc<RoundRepository>,
        results: Arc<ResultRepository>,
        hub: Arc<ChannelHub>,
        round: Round,
    }

    async fn setup(sentence_text: &str) -> TestSessionSetup {
        let db = connect_to_memory_database().await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let rounds = RoundRepository::new(db.clone());
        let sentence = rounds.insert_sentence(sentence_text, None).await.unwrap();
        let now = Utc::now();
        let model = rounds
            .insert_round(sentence.id, 1, now, now + chrono::Duration::seconds(60))
            .await
            .unwrap();

        let round = Round {
            id: model.id,
            round_number: model.round_number,
            start_at: model.start_at.to_rfc3339(),
            end_at: model.end_at.to_rfc3339(),
            sentence: Sentence {
                id: sentence.id,
                text: sentence.text.clone(),
                source: sentence.source.clone(),
            },
        };

        TestSessionSetup {
            rounds: Arc::new(rounds),
            results: Arc::new(ResultRepository::new(db)),
            hub: Arc::new(ChannelHub::new()),
            round,
        }
    }

    async fn start_session(
        setup: &TestSessionSetup,
        round: Round,
        username: &str,
    ) -> (
        RaceSession,
        mpsc::UnboundedReceiver<ServerMessage>,
        mpsc::UnboundedReceiver<RaceEvent>,
        AuthedUser,
    ) {
        let user = AuthedUser {
            id: Uuid::new_v4(),
            username: username.to_string(),
        };
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let session = RaceSession::start(
            SessionId::new(),
            user.clone(),
            round,
            setup.hub.clone(),
            setup.rounds.clone(),
            setup.results.clone(),
            event_tx,
            out_tx,
            Duration::from_millis(120),
        )
        .await;

        (session, out_rx, event_rx, user)
    }

    #[tokio::test]
    async fn test_completion_persists_finished_result() {
        let setup = setup("ab").await;
        let (mut session, _out, _events, user) =
            start_session(&setup, setup.round.clone(), "Alice").await;

        session.handle_typing("ab".to_string()).await;

        let rows = setup.results.results_for_round(setup.round.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, user.id);
        assert_eq!(rows[0].typed_text, "ab");
        assert_eq!(rows[0].correct_chars, 2);
        assert!(rows[0].finished);
    }

    #[tokio::test]
    async fn test_expiry_persists_unfinished_result() {
        let setup = setup("hello").await;
        let (mut session, _out, _events, user) =
            start_session(&setup, setup.round.clone(), "Alice").await;

        session.handle_typing("hel".to_string()).await;
        session.handle_round_expiry().await;

        let rows = setup.results.results_for_round(setup.round.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, user.id);
        assert_eq!(rows[0].typed_text, "hel");
        assert_eq!(rows[0].correct_chars, 3);
        assert!(!rows[0].finished);
        // Stats recomputed over the full 60 s window: (3/5)/1
        assert!((rows[0].wpm - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_expiry_with_nothing_typed_writes_nothing() {
        let setup = setup("hello").await;
        let (mut session, _out, _events, _user) =
            start_session(&setup, setup.round.clone(), "Alice").await;

        session.handle_round_expiry().await;

        let rows = setup.results.results_for_round(setup.round.id).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_one_shot_guard_keeps_completion_row() {
        let setup = setup("ab").await;
        let (mut session, _out, _events, _user) =
            start_session(&setup, setup.round.clone(), "Alice").await;

        session.handle_typing("ab".to_string()).await;
        // Defensive write at expiry must not downgrade the finished flag
        session.handle_round_expiry().await;

        let rows = setup.results.results_for_round(setup.round.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].finished);
    }

    #[tokio::test]
    async fn test_throttle_defers_then_flushes_latest() {
        let setup = setup("abcd").await;

        // Probe subscriber watches what actually goes over the channel
        let (probe_tx, mut probe_rx) = mpsc::unbounded_channel();
        setup
            .hub
            .join(SessionId::new(), Uuid::new_v4(), "Probe".to_string(), probe_tx)
            .await;

        let (mut session, _out, _events, user) =
            start_session(&setup, setup.round.clone(), "Alice").await;
        while probe_rx.try_recv().is_ok() {}

        // Leading edge goes out immediately
        session.handle_typing("a".to_string()).await;
        match probe_rx.try_recv().unwrap() {
            RaceEvent::Broadcast { payload } => {
                assert_eq!(payload.user_id, user.id);
                assert_eq!(payload.typed_text, "a");
            }
            other => panic!("expected broadcast, got {:?}", other),
        }

        // Two more inside the window: held, newest replaces older
        session.handle_typing("ab".to_string()).await;
        session.handle_typing("abc".to_string()).await;
        assert!(probe_rx.try_recv().is_err());
        assert!(session.flush_deadline().is_some());

        session.flush_pending().await;
        match probe_rx.try_recv().unwrap() {
            RaceEvent::Broadcast { payload } => assert_eq!(payload.typed_text, "abc"),
            other => panic!("expected broadcast, got {:?}", other),
        }
        assert!(session.flush_deadline().is_none());
    }

    #[tokio::test]
    async fn test_baseline_carries_previous_round_rows() {
        let setup = setup("ab").await;

        // Bob finished round 1
        let bob = Uuid::new_v4();
        setup
            .results
            .upsert_result(NewRoundResult {
                round_id: setup.round.id,
                user_id: bob,
                username: "Bob".to_string(),
                typed_text: "ab".to_string(),
                correct_chars: 2,
                accuracy: 1.0,
                wpm: 48.0,
                finished: true,
            })
            .await
            .unwrap();

        // Round 2 starts
        let now = Utc::now();
        let sentence = setup.rounds.insert_sentence("cd", None).await.unwrap();
        let model = setup
            .rounds
            .insert_round(sentence.id, 2, now, now + chrono::Duration::seconds(60))
            .await
            .unwrap();
        let round2 = Round {
            id: model.id,
            round_number: 2,
            start_at: model.start_at.to_rfc3339(),
            end_at: model.end_at.to_rfc3339(),
            sentence: Sentence {
                id: sentence.id,
                text: sentence.text.clone(),
                source: None,
            },
        };

        let (session, _out, _events, _user) = start_session(&setup, round2, "Alice").await;

        let roster = session.roster_snapshot();
        let carried = roster.iter().find(|p| p.user_id == bob).unwrap();
        assert_eq!(carried.typed_text, "");
        assert_eq!(carried.correct_chars, 0);
        assert!(!carried.finished);
        assert_eq!(carried.wpm, 48.0);
    }

    #[tokio::test]
    async fn test_adopt_round_resets_local_state() {
        let setup = setup("ab").await;
        let (mut session, _out, _events, user) =
            start_session(&setup, setup.round.clone(), "Alice").await;

        session.handle_typing("ab".to_string()).await;
        assert!(session.roster_snapshot().iter().any(|p| p.finished));

        let now = Utc::now();
        let sentence = setup.rounds.insert_sentence("wxyz", None).await.unwrap();
        let model = setup
            .rounds
            .insert_round(sentence.id, 2, now, now + chrono::Duration::seconds(60))
            .await
            .unwrap();
        let round2 = Round {
            id: model.id,
            round_number: 2,
            start_at: model.start_at.to_rfc3339(),
            end_at: model.end_at.to_rfc3339(),
            sentence: Sentence {
                id: sentence.id,
                text: sentence.text.clone(),
                source: None,
            },
        };

        session.adopt_round(round2.clone()).await;
        assert_eq!(session.round().id, round2.id);

        let own = session
            .roster_snapshot()
            .into_iter()
            .find(|p| p.user_id == user.id)
            .unwrap();
        assert_eq!(own.typed_text, "");
        assert!(!own.finished);

        // Adopting the same round again is a no-op
        session.adopt_round(round2.clone()).await;
        assert_eq!(session.round().id, round2.id);
    }
}
