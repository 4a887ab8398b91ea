use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, State};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Basic;
use axum_extra::routing::TypedPath;

use crate::web::auth::{self, ApiError};
use crate::web::models::{DeviceInfo, OkResponse, ServerInfo};
use crate::web::AppState;

#[derive(TypedPath)]
#[typed_path("/health")]
pub struct HealthRoute;

pub async fn health(_: HealthRoute) -> Json<OkResponse> {
    Json(OkResponse::ok())
}

#[derive(TypedPath)]
#[typed_path("/api/devices")]
pub struct DeviceListRoute;

pub async fn list_devices(
    _: DeviceListRoute,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    basic: Option<TypedHeader<Authorization<Basic>>>,
) -> Result<Json<Vec<DeviceInfo>>, ApiError> {
    if !auth::admin_authorized(&state, &addr, basic.as_ref().map(|TypedHeader(basic)| basic)) {
        return Err(ApiError::Unauthorized);
    }

    let devices = state
        .manager
        .devices()
        .iter()
        .map(|device| DeviceInfo {
            id: device.id_card().to_string(),
            version: device.version().to_string(),
            device_number: device.secret_key().to_string(),
        })
        .collect();
    Ok(Json(devices))
}

#[derive(TypedPath)]
#[typed_path("/api/server_info")]
pub struct ServerInfoRoute;

/// The endpoint a cooker should be pointed at during BLE provisioning.
pub async fn server_info(
    _: ServerInfoRoute,
    State(state): State<AppState>,
) -> Json<ServerInfo> {
    let (host, port) = state.manager.server_info();
    Json(ServerInfo { host, port })
}
