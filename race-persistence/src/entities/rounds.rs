use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rounds")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub sentence_id: Uuid,
    #[sea_orm(unique)]
    pub round_number: i64,
    pub start_at: DateTimeWithTimeZone,
    pub end_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sentences::Entity",
        from = "Column::SentenceId",
        to = "super::sentences::Column::Id"
    )]
    Sentences,
    #[sea_orm(has_many = "super::round_results::Entity")]
    RoundResults,
}

impl Related<super::sentences::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sentences.def()
    }
}

impl Related<super::round_results::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RoundResults.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
