//! A fake device for local development: serves the REST data endpoint, the
//! health endpoint and the `GetDeviceData` RPC while rotating through a fixed
//! set of operational states.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::enums;
use crate::device_monitor_proto::device_monitor_server::{
    DeviceMonitor as DeviceMonitorService, DeviceMonitorServer,
};
use crate::device_monitor_proto::{DeviceDataRequest, DeviceDataResponse};
use crate::monitor::rest::RestPollDeviceResponse;
use crate::monitor::{DeviceHealthCheckResponse, PollingCapability};

const STATES: [&str; 5] = [
    "operating",
    "rebooting",
    "loading configuration",
    "internal error",
    "offline",
];

const DEVICE_TYPES: [&str; 4] = [
    enums::ROUTER,
    enums::SWITCH,
    enums::CAMERA,
    enums::DOOR_ACCESS_SYSTEM,
];

const STATE_TRANSITION_PERIOD: Duration = Duration::from_secs(10);
const OFFLINE_STALL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

struct SimulatorInner {
    grpc_port: u16,
    rest_port: u16,
    rest_path: String,
    health_path: String,
    device_id: String,
    device_type: String,
    hw_version: String,
    sw_version: String,
    fw_version: String,
    checksum: String,
    protocols: String,
    state_idx: AtomicUsize,
}

#[derive(Clone)]
pub struct DeviceSimulator {
    inner: Arc<SimulatorInner>,
}

impl DeviceSimulator {
    pub async fn new(config: &AppConfig) -> Self {
        let checksum = match external_checksum(&config.external_checksum_generator).await {
            Ok(sum) if !sum.is_empty() => sum,
            Ok(_) => {
                warn!("external checksum generator produced no output, using a random one");
                random_string(32)
            }
            Err(e) => {
                error!(error = %e, "failed to execute external checksum generator, using a random one");
                random_string(32)
            }
        };

        let device_type =
            DEVICE_TYPES[rand::thread_rng().gen_range(0..DEVICE_TYPES.len())].to_string();
        DeviceSimulator {
            inner: Arc::new(SimulatorInner {
                grpc_port: config.grpc_port,
                rest_port: config.rest_port,
                rest_path: config.rest_device_data_path.clone(),
                health_path: config.health_check_path.clone(),
                device_id: Uuid::new_v4().to_string(),
                device_type,
                hw_version: random_string(10),
                sw_version: random_string(10),
                fw_version: random_string(10),
                checksum,
                protocols: config.protocols.clone(),
                state_idx: AtomicUsize::new(0),
            }),
        }
    }

    /// Serves the REST and RPC endpoints until the token is cancelled.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), SimulatorError> {
        let grpc_addr = SocketAddr::from(([0, 0, 0, 0], self.inner.grpc_port));
        let grpc_service = DeviceMonitorServer::new(self.clone());
        let grpc_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = Server::builder()
                .add_service(grpc_service)
                .serve_with_shutdown(grpc_addr, grpc_cancel.cancelled_owned())
                .await
            {
                error!(error = %e, "failed to serve gRPC on {grpc_addr}");
            }
        });

        let inner = self.inner.clone();
        let ticker_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATE_TRANSITION_PERIOD);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let next = (inner.state_idx.load(Ordering::Relaxed) + 1) % STATES.len();
                        inner.state_idx.store(next, Ordering::Relaxed);
                        info!("device state changed to: {}", STATES[next]);
                    }
                    _ = ticker_cancel.cancelled() => {
                        info!("stopping device simulator, cancellation requested");
                        break;
                    }
                }
            }
        });

        let listener =
            tokio::net::TcpListener::bind(("0.0.0.0", self.inner.rest_port)).await?;
        info!(
            device_id = %self.inner.device_id,
            device_type = %self.inner.device_type,
            rest_port = self.inner.rest_port,
            grpc_port = self.inner.grpc_port,
            "device simulator started"
        );
        axum::serve(listener, self.router())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;
        Ok(())
    }

    fn router(&self) -> Router {
        Router::new()
            .route(&route_path(&self.inner.health_path), get(health_handler))
            .route(&route_path(&self.inner.rest_path), get(device_data_handler))
            .with_state(self.clone())
    }

    fn state(&self) -> &'static str {
        STATES[self.inner.state_idx.load(Ordering::Relaxed) % STATES.len()]
    }
}

async fn health_handler(State(sim): State<DeviceSimulator>) -> axum::response::Response {
    let protocols = sim.inner.protocols.as_str();
    if protocols.is_empty() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "no protocol capabilities configured",
        )
            .into_response();
    }

    let mut capabilities = Vec::new();
    for protocol in protocols.split(',') {
        if protocol.eq_ignore_ascii_case("grpc") {
            capabilities.push(PollingCapability {
                protocol: "grpc".into(),
                port: Some(sim.inner.grpc_port),
                path: None,
            });
        }
        if protocol.eq_ignore_ascii_case("rest") {
            capabilities.push(PollingCapability {
                protocol: "rest".into(),
                port: Some(sim.inner.rest_port),
                path: Some(sim.inner.rest_path.clone()),
            });
        }
    }

    Json(DeviceHealthCheckResponse {
        device_id: sim.inner.device_id.clone(),
        device_type: sim.inner.device_type.clone(),
        capabilities,
    })
    .into_response()
}

async fn device_data_handler(State(sim): State<DeviceSimulator>) -> axum::response::Response {
    match sim.state() {
        "operating" | "rebooting" | "loading configuration" => Json(RestPollDeviceResponse {
            device_id: sim.inner.device_id.clone(),
            device_type: sim.inner.device_type.clone(),
            hardware_version: sim.inner.hw_version.clone(),
            software_version: sim.inner.sw_version.clone(),
            firmware_version: sim.inner.fw_version.clone(),
            status: sim.state().to_string(),
            checksum: sim.inner.checksum.clone(),
        })
        .into_response(),
        "internal error" => {
            (StatusCode::INTERNAL_SERVER_ERROR, "simulated internal error").into_response()
        }
        "offline" => {
            tokio::time::sleep(OFFLINE_STALL).await;
            (StatusCode::SERVICE_UNAVAILABLE, "simulated timeout error").into_response()
        }
        _ => (StatusCode::NOT_FOUND, "unknown internal state").into_response(),
    }
}

#[tonic::async_trait]
impl DeviceMonitorService for DeviceSimulator {
    async fn get_device_data(
        &self,
        _request: Request<DeviceDataRequest>,
    ) -> Result<Response<DeviceDataResponse>, Status> {
        match self.state() {
            "operating" | "rebooting" | "loading configuration" => {
                Ok(Response::new(DeviceDataResponse {
                    device_id: Some(self.inner.device_id.clone()),
                    device_type: Some(self.inner.device_type.clone()),
                    hardware_version: Some(self.inner.hw_version.clone()),
                    software_version: Some(self.inner.sw_version.clone()),
                    firmware_version: Some(self.inner.fw_version.clone()),
                    status: Some(self.state().to_string()),
                    checksum: Some(self.inner.checksum.clone()),
                }))
            }
            "internal error" => Err(Status::internal("simulated internal error")),
            "offline" => {
                tokio::time::sleep(OFFLINE_STALL).await;
                Err(Status::unavailable("simulated timeout error"))
            }
            _ => Err(Status::unknown("unknown internal state")),
        }
    }
}

fn route_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

async fn external_checksum(location: &str) -> Result<String, std::io::Error> {
    if location.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "checksum generator location is not set",
        ));
    }
    tokio::fs::metadata(location).await?;
    let output = tokio::process::Command::new(location).output().await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub fn random_string(length: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
