use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use chrono::Utc;
use futures::future::join_all;
use tracing::error;

use crate::services::admission;
use crate::services::diagnostics::{self, DeviceDiagnostics, DEFAULT_HISTORY_CHECKING_SIZE};
use crate::web::models::{
    AddDevicesRequest, AddDevicesResponse, DeviceAddingResult, DeviceInfo, DeviceListingResponse,
    ListDevicesQuery,
};
use crate::web::{AppError, AppState};

const DEFAULT_PAGE_SIZE: u64 = 30;
const MAX_PAGE_SIZE: u64 = 1000;

pub fn device_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/devices", put(add_devices).get(list_devices))
        .route("/devices/{device_id}", get(get_device).delete(delete_device))
}

async fn add_devices(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<AddDevicesRequest>,
) -> Result<Json<AddDevicesResponse>, AppError> {
    if payload.devices.is_empty() {
        return Ok(Json(AddDevicesResponse { results: vec![] }));
    }

    let mut unique: HashMap<String, DeviceInfo> = HashMap::new();
    for mut device in payload.devices {
        device.normalize().map_err(|e| {
            AppError::InvalidInput(format!(
                "request validation error for item {:?}: {e}",
                device.device_id
            ))
        })?;
        unique.insert(device.device_id.clone(), device);
    }

    let admissions = unique.into_values().map(|device| {
        let app_state = app_state.clone();
        async move {
            let mut result = DeviceAddingResult {
                device_id: device.device_id.clone(),
                device_type: device.device_type.clone(),
                hostname: device.hostname.clone(),
                code: 0,
                error: String::new(),
            };
            if let Err(e) = admission::add_device(
                app_state.repo.as_ref(),
                &app_state.http_client,
                &app_state.config,
                &device.device_id,
                &device.device_type,
                &device.hostname,
                device.health_check_port,
            )
            .await
            {
                error!(device_id = %device.device_id, error = %e, "failed to add device");
                result.code = if e.is_timeout() { 1 } else { 2 };
                result.error = e.to_string();
            }
            result
        }
    });

    let results = join_all(admissions).await;
    Ok(Json(AddDevicesResponse { results }))
}

async fn list_devices(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ListDevicesQuery>,
) -> Result<Json<DeviceListingResponse>, AppError> {
    let page = query.page.unwrap_or(0);
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE);
    if size == 0 {
        return Err(AppError::InvalidInput("invalid size number".into()));
    }
    if size > MAX_PAGE_SIZE {
        return Err(AppError::InvalidInput("size number is too large".into()));
    }

    let (items, total) = diagnostics::list_device_diagnostics(
        &app_state.repo,
        &app_state.strategy,
        page,
        size,
        query.device_type.as_deref(),
    )
    .await?;

    Ok(Json(DeviceListingResponse {
        page,
        size,
        total,
        items,
    }))
}

async fn get_device(
    State(app_state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceDiagnostics>, AppError> {
    let device_id = device_id.replace(' ', "");
    if device_id.is_empty() {
        return Err(AppError::InvalidInput("device_id is required".into()));
    }

    let device = app_state
        .repo
        .get_device_by_id(&device_id)
        .await?
        .filter(|device| device.deleted_at.is_none())
        .ok_or_else(|| AppError::NotFound("device not found".into()))?;

    let diagnostics = diagnostics::device_diagnostics(
        app_state.repo.as_ref(),
        app_state.strategy.as_ref(),
        device,
        DEFAULT_HISTORY_CHECKING_SIZE,
    )
    .await?;

    Ok(Json(diagnostics))
}

async fn delete_device(
    State(app_state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let device_id = device_id.replace(' ', "");
    if device_id.is_empty() {
        return Err(AppError::InvalidInput("device_id is required".into()));
    }

    let mut device = app_state
        .repo
        .get_device_by_id(&device_id)
        .await?
        .filter(|device| device.deleted_at.is_none())
        .ok_or_else(|| AppError::NotFound("device not found".into()))?;

    device.deleted_at = Some(Utc::now());
    app_state.repo.update_device(&device).await?;

    Ok(StatusCode::NO_CONTENT)
}
