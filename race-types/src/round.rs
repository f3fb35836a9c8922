use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// A sentence from the rotation pool. Pool order is creation order, so the
/// sentence for round N is a pure function of the pool snapshot and N.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Sentence {
    pub id: Uuid,
    pub text: String,
    pub source: Option<String>,
}

/// One timed competitive session. Immutable once created; rounds are never
/// deleted, history is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Round {
    pub id: Uuid,
    pub round_number: i64,
    pub start_at: String, // ISO 8601 string
    pub end_at: String,   // ISO 8601 string
    pub sentence: Sentence,
}
