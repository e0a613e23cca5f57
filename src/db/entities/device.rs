use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::PollingStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// External unique identifier reported by the device itself.
    #[sea_orm(unique)]
    pub device_id: String,
    pub device_type: String,
    pub hostname: String,
    /// Advertised transports in preference order (`text[]`).
    pub protocols: Vec<String>,
    pub rest_port: Option<i32>,
    pub rest_path: Option<String>,
    pub grpc_port: Option<i32>,
    pub polling_status: Option<PollingStatus>,
    pub created_at: ChronoDateTimeUtc,
    pub last_checked_at: Option<ChronoDateTimeUtc>,
    pub deleted_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::device_type::Entity",
        from = "Column::DeviceType",
        to = "super::device_type::Column::Name"
    )]
    DeviceType,

    #[sea_orm(has_many = "super::polling_history::Entity")]
    PollingHistory,
}

impl Related<super::device_type::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeviceType.def()
    }
}

impl Related<super::polling_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PollingHistory.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
