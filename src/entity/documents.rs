use sea_orm::entity::prelude::*;

/// Each save appends a version; versions of one document share `id`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub rowid: i64,
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub kind: String,
    pub content: String,
    pub created_at_us: i64,
}

impl ActiveModelBehavior for ActiveModel {}
