use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    SqlErr,
};
use uuid::Uuid;

use crate::entities::{prelude::*, rounds, sentences};
use crate::error::StoreError;

/// Round store adapter: reads the authoritative round history and performs
/// the uniqueness-constrained insert that serializes concurrent creators.
pub struct RoundRepository {
    db: DatabaseConnection,
}

impl RoundRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// The most recently numbered round with its sentence, if any round has
    /// ever been created.
    pub async fn latest_round(
        &self,
    ) -> Result<Option<(rounds::Model, sentences::Model)>, StoreError> {
        let found = Rounds::find()
            .find_also_related(Sentences)
            .order_by_desc(rounds::Column::RoundNumber)
            .one(&self.db)
            .await?;

        match found {
            None => Ok(None),
            Some((round, Some(sentence))) => Ok(Some((round, sentence))),
            Some((round, None)) => Err(StoreError::Db(sea_orm::DbErr::RecordNotFound(format!(
                "sentence {} referenced by round {} is missing",
                round.sentence_id, round.id
            )))),
        }
    }

    pub async fn find_by_number(
        &self,
        round_number: i64,
    ) -> Result<Option<rounds::Model>, StoreError> {
        Ok(Rounds::find()
            .filter(rounds::Column::RoundNumber.eq(round_number))
            .one(&self.db)
            .await?)
    }

    /// Sentence pool in creation order, the order the rotation is defined
    /// over.
    pub async fn sentence_pool(&self) -> Result<Vec<sentences::Model>, StoreError> {
        Ok(Sentences::find()
            .order_by_asc(sentences::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    /// Insert a new round. A concurrent caller that picked the same
    /// `round_number` loses with [`StoreError::UniqueViolation`] and must
    /// re-read the winner rather than retry.
    pub async fn insert_round(
        &self,
        sentence_id: Uuid,
        round_number: i64,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<rounds::Model, StoreError> {
        let id = Uuid::new_v4();
        let model = rounds::ActiveModel {
            id: Set(id),
            sentence_id: Set(sentence_id),
            round_number: Set(round_number),
            start_at: Set(start_at.into()),
            end_at: Set(end_at.into()),
        };

        if let Err(err) = Rounds::insert(model).exec(&self.db).await {
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                return Err(StoreError::UniqueViolation);
            }
            return Err(StoreError::Db(err));
        }

        Rounds::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                StoreError::Db(sea_orm::DbErr::RecordNotFound(format!(
                    "round {id} vanished after insert"
                )))
            })
    }

    pub async fn insert_sentence(
        &self,
        text: &str,
        source: Option<&str>,
    ) -> Result<sentences::Model, StoreError> {
        let id = Uuid::new_v4();
        let model = sentences::ActiveModel {
            id: Set(id),
            text: Set(text.to_string()),
            source: Set(source.map(str::to_string)),
            created_at: Set(Utc::now().into()),
        };

        Sentences::insert(model).exec(&self.db).await?;

        Sentences::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                StoreError::Db(sea_orm::DbErr::RecordNotFound(format!(
                    "sentence {id} vanished after insert"
                )))
            })
    }
}
