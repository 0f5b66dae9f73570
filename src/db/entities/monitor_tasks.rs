use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "monitor_tasks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub owner_id: i64,
    pub owner_name: Option<String>, // username at creation time
    pub name: String,
    pub url: String,
    pub selector: String,
    pub interval_seconds: i32,
    pub is_active: bool,
    pub is_public: bool,
    pub email_config_id: Option<i32>,
    pub last_check: Option<DateTime>,
    pub last_content_hash: Option<String>, // lowercase hex SHA-256
    #[sea_orm(column_type = "Text", nullable)]
    pub last_content: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::monitor_logs::Entity")]
    MonitorLogs,
    #[sea_orm(has_many = "super::subscriptions::Entity")]
    Subscriptions,
    #[sea_orm(
        belongs_to = "super::email_configs::Entity",
        from = "Column::EmailConfigId",
        to = "super::email_configs::Column::Id",
        on_update = "NoAction",
        on_delete = "SetNull"
    )]
    EmailConfig,
}

impl Related<super::monitor_logs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitorLogs.def()
    }
}

impl Related<super::subscriptions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscriptions.def()
    }
}

impl Related<super::email_configs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmailConfig.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
