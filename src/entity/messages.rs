use sea_orm::entity::prelude::*;

/// `parts` and `attachments` hold JSON arrays.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub rowid: i64,
    #[sea_orm(unique)]
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub parts: String,
    pub attachments: String,
    pub created_at_us: i64,
}

impl ActiveModelBehavior for ActiveModel {}
