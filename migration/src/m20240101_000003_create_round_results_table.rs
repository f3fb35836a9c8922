use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RoundResults::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(RoundResults::RoundId).uuid().not_null())
                    .col(ColumnDef::new(RoundResults::UserId).uuid().not_null())
                    .col(ColumnDef::new(RoundResults::Username).string().not_null())
                    .col(ColumnDef::new(RoundResults::TypedText).text().not_null())
                    .col(
                        ColumnDef::new(RoundResults::CorrectChars)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(RoundResults::Accuracy).double().not_null())
                    .col(ColumnDef::new(RoundResults::Wpm).double().not_null())
                    .col(
                        ColumnDef::new(RoundResults::Finished)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(RoundResults::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    // One row per (round, user); the upsert target
                    .primary_key(
                        Index::create()
                            .col(RoundResults::RoundId)
                            .col(RoundResults::UserId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_round_results_round_id")
                            .from(RoundResults::Table, RoundResults::RoundId)
                            .to(Rounds::Table, Rounds::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Standings are read per round
        manager
            .create_index(
                Index::create()
                    .name("idx_round_results_round_id")
                    .table(RoundResults::Table)
                    .col(RoundResults::RoundId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RoundResults::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RoundResults {
    Table,
    RoundId,
    UserId,
    Username,
    TypedText,
    CorrectChars,
    Accuracy,
    Wpm,
    Finished,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Rounds {
    Table,
    Id,
}
