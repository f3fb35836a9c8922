use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Reasons a broadcast payload is rejected before it can touch the player
/// map. Rejection is always silent per message; the sender is not notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum PayloadError {
    UsernameTooLong,
    TypedTextTooLong,
    CorrectExceedsTyped,
    AccuracyOutOfRange,
    WpmOutOfRange,
    StaleRound,
}
