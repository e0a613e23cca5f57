use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::PollingResult;

/// One poll attempt outcome. Rows are append-only.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "polling_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// External device identifier, matching `devices.device_id`.
    pub device_id: String,
    pub hw_version: Option<String>,
    pub sw_version: Option<String>,
    pub fw_version: Option<String>,
    pub device_status: Option<String>,
    pub device_checksum: Option<String>,
    pub polling_result: PollingResult,
    /// JSON string `{"error": <message>, "count": <attempt>}` for failures.
    pub failure_reason: Option<String>,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::device::Entity",
        from = "Column::DeviceId",
        to = "super::device::Column::DeviceId"
    )]
    Device,
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
