use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::info;

use race_core::rotation;
use race_persistence::entities::{rounds, sentences};
use race_persistence::{RoundRepository, StoreError};
use race_types::{Round, Sentence};

#[derive(Debug, Error)]
pub enum RoundError {
    /// Nothing to rotate. Deployment misconfiguration: surfaced to the
    /// caller and never retried.
    #[error("No sentences configured")]
    EmptySentencePool,
    #[error("Round store failure: {0}")]
    Store(#[from] StoreError),
}

/// Owns round numbering and sentence rotation. Stateless between calls:
/// any number of sessions and processes may call [`ensure_active_round`]
/// simultaneously, and the store's unique `round_number` column is the only
/// serialization point.
///
/// [`ensure_active_round`]: RoundManager::ensure_active_round
pub struct RoundManager {
    rounds: RoundRepository,
    round_duration: Duration,
}

impl RoundManager {
    pub fn new(rounds: RoundRepository, round_duration_seconds: u64) -> Self {
        Self {
            rounds,
            round_duration: Duration::seconds(round_duration_seconds as i64),
        }
    }

    /// Return the active round, creating the next one if the latest has
    /// expired. Idempotent: every concurrent caller gets the same round.
    pub async fn ensure_active_round(&self) -> Result<Round, RoundError> {
        self.ensure_active_round_at(Utc::now()).await
    }

    /// Clock-injected variant of [`Self::ensure_active_round`].
    pub async fn ensure_active_round_at(&self, now: DateTime<Utc>) -> Result<Round, RoundError> {
        let latest = self.rounds.latest_round().await?;

        // Common path: the latest round is still running. Read-only.
        if let Some((round, sentence)) = &latest {
            if round.end_at.with_timezone(&Utc) > now {
                return Ok(round_view(round, sentence_view(sentence)));
            }
        }

        let pool: Vec<Sentence> = self
            .rounds
            .sentence_pool()
            .await?
            .iter()
            .map(sentence_view)
            .collect();

        let next_number = latest.as_ref().map_or(1, |(round, _)| round.round_number + 1);
        let sentence = rotation::sentence_for(&pool, next_number)
            .ok_or(RoundError::EmptySentencePool)?
            .clone();

        match self
            .rounds
            .insert_round(sentence.id, next_number, now, now + self.round_duration)
            .await
        {
            Ok(round) => {
                info!("created round {} with sentence {}", next_number, sentence.id);
                Ok(round_view(&round, sentence))
            }
            Err(StoreError::UniqueViolation) => {
                // A concurrent caller won the insert race; its row is
                // canonical now. No retry, no re-increment.
                let (round, sentence) = self.rounds.latest_round().await?.ok_or_else(|| {
                    RoundError::Store(StoreError::Db(sea_orm::DbErr::RecordNotFound(
                        "round vanished after unique conflict".to_string(),
                    )))
                })?;
                Ok(round_view(&round, sentence_view(&sentence)))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn sentence_view(model: &sentences::Model) -> Sentence {
    Sentence {
        id: model.id,
        text: model.text.clone(),
        source: model.source.clone(),
    }
}

fn round_view(model: &rounds::Model, sentence: Sentence) -> Round {
    Round {
        id: model.id,
        round_number: model.round_number,
        start_at: model.start_at.to_rfc3339(),
        end_at: model.end_at.to_rfc3339(),
        sentence,
    }
}
