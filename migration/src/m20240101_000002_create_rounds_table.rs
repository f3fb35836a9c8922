use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Rounds::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Rounds::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Rounds::SentenceId).uuid().not_null())
                    .col(
                        // The serialization point for concurrent round
                        // creation: losers of the insert race get a unique
                        // violation and re-read the winner.
                        ColumnDef::new(Rounds::RoundNumber)
                            .big_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Rounds::StartAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Rounds::EndAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_rounds_sentence_id")
                            .from(Rounds::Table, Rounds::SentenceId)
                            .to(Sentences::Table, Sentences::Id),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Rounds::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Rounds {
    Table,
    Id,
    SentenceId,
    RoundNumber,
    StartAt,
    EndAt,
}

#[derive(DeriveIden)]
enum Sentences {
    Table,
    Id,
}
