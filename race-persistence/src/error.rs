use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer inserted the same unique key first. Expected during
    /// concurrent round creation; callers recover by re-reading the winner.
    #[error("unique constraint violated")]
    UniqueViolation,
    #[error(transparent)]
    Db(#[from] DbErr),
}
