use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::ActiveValue::{NotSet, Set, Unchanged};
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection,
    DbBackend, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Statement,
};
use thiserror::Error;

use super::entities::{device, device_type, polling_history};
use super::enums::{PollingResult, PollingStatus};

/// Staleness bound beyond which an `in_progress` lease is considered
/// abandoned and reclaimable.
pub const DEFAULT_OUTDATED_PERIOD: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("illegal argument: {0}")]
    InvalidArgument(String),
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Inputs of the lease-claim query.
#[derive(Debug, Clone)]
pub struct DevicePollingParameter {
    pub device_type: String,
    pub interval: Duration,
    /// Defaults to [`DEFAULT_OUTDATED_PERIOD`] when unset.
    pub outdated_period: Option<Duration>,
    pub limit: u64,
}

impl DevicePollingParameter {
    fn validate(&self) -> Result<(), RepositoryError> {
        if self.device_type.is_empty() {
            return Err(RepositoryError::InvalidArgument(
                "device type cannot be empty".into(),
            ));
        }
        if self.interval.is_zero() {
            return Err(RepositoryError::InvalidArgument(
                "polling interval must be a positive value".into(),
            ));
        }
        if self.limit == 0 {
            return Err(RepositoryError::InvalidArgument(
                "limit must be a positive integer".into(),
            ));
        }
        if let Some(outdated) = self.outdated_period {
            if outdated.is_zero() {
                return Err(RepositoryError::InvalidArgument(
                    "outdated period must be a positive value".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewDevice {
    pub device_id: String,
    pub device_type: String,
    pub hostname: String,
    pub protocols: Vec<String>,
    pub rest_port: Option<i32>,
    pub rest_path: Option<String>,
    pub grpc_port: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NewPollingHistory {
    pub device_id: String,
    pub hw_version: Option<String>,
    pub sw_version: Option<String>,
    pub fw_version: Option<String>,
    pub device_status: Option<String>,
    pub device_checksum: Option<String>,
    pub polling_result: PollingResult,
    pub failure_reason: Option<String>,
}

/// Narrow persistence port the polling core and its collaborators consume.
/// The Postgres implementation is [`PgRepository`]; tests substitute mocks or
/// an in-memory store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_all_device_types(&self) -> Result<Vec<device_type::Model>, RepositoryError>;

    /// Lookup by unique name, soft-deleted rows included, so admission can
    /// distinguish an absent type from a deleted one.
    async fn get_device_type_by_name(
        &self,
        name: &str,
    ) -> Result<Option<device_type::Model>, RepositoryError>;

    async fn create_device_type(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<device_type::Model, RepositoryError>;

    async fn restore_device_type(&self, id: i32) -> Result<(), RepositoryError>;

    async fn create_device(&self, device: NewDevice) -> Result<device::Model, RepositoryError>;

    async fn update_device(&self, device: &device::Model) -> Result<(), RepositoryError>;

    async fn restore_device(&self, id: i32) -> Result<(), RepositoryError>;

    /// Lookup by the external identifier, soft-deleted rows included.
    async fn get_device_by_id(
        &self,
        device_id: &str,
    ) -> Result<Option<device::Model>, RepositoryError>;

    async fn get_devices_by_page<'a>(
        &self,
        page: u64,
        size: u64,
        device_type: Option<&'a str>,
    ) -> Result<(Vec<device::Model>, u64), RepositoryError>;

    /// Atomically selects due devices of the given type, marks them
    /// `in_progress` and returns them. See the claim predicate below.
    async fn claim_due_devices(
        &self,
        param: DevicePollingParameter,
    ) -> Result<Vec<device::Model>, RepositoryError>;

    async fn create_polling_history(
        &self,
        history: NewPollingHistory,
    ) -> Result<(), RepositoryError>;

    /// Newest first, capped at `limit`.
    async fn get_device_polling_history(
        &self,
        device_id: &str,
        limit: u64,
    ) -> Result<Vec<polling_history::Model>, RepositoryError>;
}

#[derive(Clone)]
pub struct PgRepository {
    db: DatabaseConnection,
}

impl PgRepository {
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        if database_url.is_empty() {
            return Err(RepositoryError::InvalidArgument(
                "database url cannot be empty".into(),
            ));
        }
        let mut opt = ConnectOptions::new(database_url.to_owned());
        opt.max_connections(10).sqlx_logging(false);
        let db = Database::connect(opt).await?;
        Ok(PgRepository { db })
    }

    pub fn new(db: DatabaseConnection) -> Self {
        PgRepository { db }
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn get_all_device_types(&self) -> Result<Vec<device_type::Model>, RepositoryError> {
        let types = device_type::Entity::find()
            .filter(device_type::Column::DeletedAt.is_null())
            .all(&self.db)
            .await?;
        Ok(types)
    }

    async fn get_device_type_by_name(
        &self,
        name: &str,
    ) -> Result<Option<device_type::Model>, RepositoryError> {
        let dt = device_type::Entity::find()
            .filter(device_type::Column::Name.eq(name))
            .one(&self.db)
            .await?;
        Ok(dt)
    }

    async fn create_device_type(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<device_type::Model, RepositoryError> {
        if name.is_empty() {
            return Err(RepositoryError::InvalidArgument(
                "device type name cannot be empty".into(),
            ));
        }
        let row = device_type::ActiveModel {
            id: NotSet,
            name: Set(name.to_string()),
            description: Set(description),
            created_at: Set(Utc::now()),
            deleted_at: Set(None),
        };
        Ok(row.insert(&self.db).await?)
    }

    async fn restore_device_type(&self, id: i32) -> Result<(), RepositoryError> {
        let row = device_type::ActiveModel {
            id: Unchanged(id),
            deleted_at: Set(None),
            ..Default::default()
        };
        row.update(&self.db).await?;
        Ok(())
    }

    async fn create_device(&self, device: NewDevice) -> Result<device::Model, RepositoryError> {
        if device.device_id.is_empty() {
            return Err(RepositoryError::InvalidArgument(
                "device_id cannot be empty".into(),
            ));
        }
        let row = device::ActiveModel {
            id: NotSet,
            device_id: Set(device.device_id),
            device_type: Set(device.device_type),
            hostname: Set(device.hostname),
            protocols: Set(device.protocols),
            rest_port: Set(device.rest_port),
            rest_path: Set(device.rest_path),
            grpc_port: Set(device.grpc_port),
            polling_status: Set(None),
            created_at: Set(Utc::now()),
            last_checked_at: Set(None),
            deleted_at: Set(None),
        };
        Ok(row.insert(&self.db).await?)
    }

    async fn update_device(&self, device: &device::Model) -> Result<(), RepositoryError> {
        if device.id <= 0 {
            return Err(RepositoryError::InvalidArgument(
                "cannot update an unsaved device".into(),
            ));
        }
        let row = device::ActiveModel {
            id: Unchanged(device.id),
            device_id: Set(device.device_id.clone()),
            device_type: Set(device.device_type.clone()),
            hostname: Set(device.hostname.clone()),
            protocols: Set(device.protocols.clone()),
            rest_port: Set(device.rest_port),
            rest_path: Set(device.rest_path.clone()),
            grpc_port: Set(device.grpc_port),
            polling_status: Set(device.polling_status.clone()),
            created_at: Unchanged(device.created_at),
            last_checked_at: Set(device.last_checked_at),
            deleted_at: Set(device.deleted_at),
        };
        row.update(&self.db).await?;
        Ok(())
    }

    async fn restore_device(&self, id: i32) -> Result<(), RepositoryError> {
        let row = device::ActiveModel {
            id: Unchanged(id),
            deleted_at: Set(None),
            ..Default::default()
        };
        row.update(&self.db).await?;
        Ok(())
    }

    async fn get_device_by_id(
        &self,
        device_id: &str,
    ) -> Result<Option<device::Model>, RepositoryError> {
        let device = device::Entity::find()
            .filter(device::Column::DeviceId.eq(device_id))
            .one(&self.db)
            .await?;
        Ok(device)
    }

    async fn get_devices_by_page<'a>(
        &self,
        page: u64,
        size: u64,
        device_type: Option<&'a str>,
    ) -> Result<(Vec<device::Model>, u64), RepositoryError> {
        if size == 0 {
            return Err(RepositoryError::InvalidArgument(
                "page size must be a positive integer".into(),
            ));
        }

        let mut query = device::Entity::find().filter(device::Column::DeletedAt.is_null());
        if let Some(dt) = device_type {
            query = query.filter(device::Column::DeviceType.eq(dt));
        }

        let total = query.clone().count(&self.db).await?;
        let devices = query
            .order_by_asc(device::Column::Id)
            .offset(page * size)
            .limit(size)
            .all(&self.db)
            .await?;

        Ok((devices, total))
    }

    async fn claim_due_devices(
        &self,
        param: DevicePollingParameter,
    ) -> Result<Vec<device::Model>, RepositoryError> {
        param.validate()?;

        let interval = chrono::Duration::from_std(param.interval)
            .map_err(|e| RepositoryError::InvalidArgument(format!("interval out of range: {e}")))?;
        let outdated = chrono::Duration::from_std(
            param.outdated_period.unwrap_or(DEFAULT_OUTDATED_PERIOD),
        )
        .map_err(|e| {
            RepositoryError::InvalidArgument(format!("outdated period out of range: {e}"))
        })?;

        let now = Utc::now();
        let recent_checkpoint = now - interval;
        let remote_checkpoint = now - outdated;

        // A single atomic statement so that concurrent schedulers in other
        // processes cannot double-claim. Rows match when they are not
        // deleted, of the requested type, and either idle past the interval,
        // or stuck in_progress/never-completed past the outdated period.
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"UPDATE devices SET polling_status = $1 WHERE id IN (
                SELECT id FROM devices
                WHERE deleted_at IS NULL AND device_type = $2
                  AND (
                    ((polling_status IS NULL OR polling_status <> $1)
                        AND (last_checked_at IS NULL OR last_checked_at < $3))
                    OR last_checked_at < $4
                    OR (last_checked_at IS NULL AND created_at < $4)
                  )
                ORDER BY last_checked_at ASC NULLS FIRST
                LIMIT $5
            ) RETURNING *"#,
            [
                PollingStatus::InProgress.to_value().into(),
                param.device_type.clone().into(),
                recent_checkpoint.into(),
                remote_checkpoint.into(),
                (param.limit as i64).into(),
            ],
        );

        let devices = device::Entity::find().from_raw_sql(stmt).all(&self.db).await?;
        Ok(devices)
    }

    async fn create_polling_history(
        &self,
        history: NewPollingHistory,
    ) -> Result<(), RepositoryError> {
        if history.device_id.is_empty() {
            return Err(RepositoryError::InvalidArgument(
                "polling history device_id cannot be empty".into(),
            ));
        }
        let row = polling_history::ActiveModel {
            id: NotSet,
            device_id: Set(history.device_id),
            hw_version: Set(history.hw_version),
            sw_version: Set(history.sw_version),
            fw_version: Set(history.fw_version),
            device_status: Set(history.device_status),
            device_checksum: Set(history.device_checksum),
            polling_result: Set(history.polling_result),
            failure_reason: Set(history.failure_reason),
            created_at: Set(Utc::now()),
        };
        row.insert(&self.db).await?;
        Ok(())
    }

    async fn get_device_polling_history(
        &self,
        device_id: &str,
        limit: u64,
    ) -> Result<Vec<polling_history::Model>, RepositoryError> {
        if limit == 0 {
            return Err(RepositoryError::InvalidArgument(
                "limit must be a positive integer".into(),
            ));
        }
        let history = polling_history::Entity::find()
            .filter(polling_history::Column::DeviceId.eq(device_id))
            .order_by_desc(polling_history::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(history)
    }
}
