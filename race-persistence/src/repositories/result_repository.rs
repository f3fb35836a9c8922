use anyhow::Result;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entities::{prelude::*, round_results};
use race_types::PlayerState;

/// A player's final or interim result for one round, ready to upsert.
#[derive(Debug, Clone)]
pub struct NewRoundResult {
    pub round_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub typed_text: String,
    pub correct_chars: u32,
    pub accuracy: f64,
    pub wpm: f64,
    pub finished: bool,
}

pub struct ResultRepository {
    db: DatabaseConnection,
}

impl ResultRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn to_player_state(model: round_results::Model) -> PlayerState {
        let typed_chars = model.typed_text.chars().count() as u32;
        PlayerState {
            user_id: model.user_id,
            username: model.username,
            typed_text: model.typed_text,
            correct_chars: model.correct_chars.max(0) as u32,
            typed_chars,
            wpm: model.wpm,
            accuracy: model.accuracy,
            finished: model.finished,
            is_online: false, // presence fills this in
            updated_at: model.updated_at.to_rfc3339(),
        }
    }

    /// Upsert keyed on (round, user); last write wins. Safe to call twice
    /// for the same terminal event.
    pub async fn upsert_result(&self, result: NewRoundResult) -> Result<()> {
        let model = round_results::ActiveModel {
            round_id: Set(result.round_id),
            user_id: Set(result.user_id),
            username: Set(result.username),
            typed_text: Set(result.typed_text),
            correct_chars: Set(result.correct_chars as i32),
            accuracy: Set(result.accuracy),
            wpm: Set(result.wpm),
            finished: Set(result.finished),
            updated_at: Set(chrono::Utc::now().into()),
        };

        RoundResults::insert(model)
            .on_conflict(
                OnConflict::columns([
                    round_results::Column::RoundId,
                    round_results::Column::UserId,
                ])
                .update_columns([
                    round_results::Column::Username,
                    round_results::Column::TypedText,
                    round_results::Column::CorrectChars,
                    round_results::Column::Accuracy,
                    round_results::Column::Wpm,
                    round_results::Column::Finished,
                    round_results::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(())
    }

    pub async fn results_for_round(&self, round_id: Uuid) -> Result<Vec<round_results::Model>> {
        Ok(RoundResults::find()
            .filter(round_results::Column::RoundId.eq(round_id))
            .all(&self.db)
            .await?)
    }
}
