use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Sentences::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Sentences::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Sentences::Text).string().not_null())
                    .col(ColumnDef::new(Sentences::Source).string())
                    .col(
                        ColumnDef::new(Sentences::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Rotation reads the pool ordered by creation time
        manager
            .create_index(
                Index::create()
                    .name("idx_sentences_created_at")
                    .table(Sentences::Table)
                    .col(Sentences::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Sentences::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Sentences {
    Table,
    Id,
    Text,
    Source,
    CreatedAt,
}
