//! Per-device REST operations, all gated by [`AuthenticatedDevice`].

use anova_hub_common::commands::{Command, Response};
use axum::Json;
use axum::extract::State;
use axum::response::Sse;
use axum_extra::routing::TypedPath;
use serde::Deserialize;

use crate::cooker::DeviceState;
use crate::web::AppState;
use crate::web::auth::{ApiError, AuthenticatedDevice};
use crate::web::models::{
    OkResponse, SetTemperatureRequest, SetTemperatureResponse, SetTimerRequest, SetTimerResponse,
    SetUnitRequest, SpeakerStatusResponse, TemperatureResponse, TimerResponse, UnitResponse,
};
use crate::web::sse::EventStream;

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/devices/{device_id}/state")]
pub struct StateRoute {
    pub device_id: String,
}

pub async fn state(
    _: StateRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
) -> Json<DeviceState> {
    Json(device.state())
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/devices/{device_id}/target_temperature")]
pub struct TargetTemperatureRoute {
    pub device_id: String,
}

pub async fn target_temperature(
    _: TargetTemperatureRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
) -> Result<Json<TemperatureResponse>, ApiError> {
    let Response::Decimal(temperature) =
        device.send_command(Command::GetTargetTemperature).await?
    else {
        return Err(ApiError::internal("unexpected response shape"));
    };
    Ok(Json(TemperatureResponse { temperature }))
}

pub async fn set_target_temperature(
    _: TargetTemperatureRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
    Json(request): Json<SetTemperatureRequest>,
) -> Result<Json<SetTemperatureResponse>, ApiError> {
    let response = device
        .send_command(Command::SetTargetTemperature(request.temperature))
        .await?;
    if !response.accepted() {
        return Err(ApiError::internal("device rejected the target temperature"));
    }
    Ok(Json(SetTemperatureResponse {
        changed_to: device.state().target_temperature,
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/devices/{device_id}/temperature")]
pub struct CurrentTemperatureRoute {
    pub device_id: String,
}

pub async fn current_temperature(
    _: CurrentTemperatureRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
) -> Result<Json<TemperatureResponse>, ApiError> {
    let Response::Decimal(temperature) =
        device.send_command(Command::GetCurrentTemperature).await?
    else {
        return Err(ApiError::internal("unexpected response shape"));
    };
    Ok(Json(TemperatureResponse { temperature }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/devices/{device_id}/start")]
pub struct StartRoute {
    pub device_id: String,
}

pub async fn start(
    _: StartRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
) -> Result<Json<OkResponse>, ApiError> {
    device.start_cooking().await?;
    Ok(Json(OkResponse::ok()))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/devices/{device_id}/stop")]
pub struct StopRoute {
    pub device_id: String,
}

pub async fn stop(
    _: StopRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
) -> Result<Json<OkResponse>, ApiError> {
    device.stop_cooking().await?;
    Ok(Json(OkResponse::ok()))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/devices/{device_id}/timer")]
pub struct TimerRoute {
    pub device_id: String,
}

pub async fn timer(
    _: TimerRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
) -> Result<Json<TimerResponse>, ApiError> {
    let Response::Timer(timer) = device.send_command(Command::GetTimerStatus).await? else {
        return Err(ApiError::internal("unexpected response shape"));
    };
    Ok(Json(TimerResponse { timer }))
}

pub async fn set_timer(
    _: TimerRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
    Json(request): Json<SetTimerRequest>,
) -> Result<Json<SetTimerResponse>, ApiError> {
    let response = device.send_command(Command::SetTimer(request.minutes)).await?;
    if !response.accepted() {
        return Err(ApiError::internal("device rejected the timer"));
    }
    let minutes = match response {
        Response::Minutes(echoed) => echoed,
        _ => request.minutes,
    };
    Ok(Json(SetTimerResponse {
        message: "timer set successfully",
        minutes,
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/devices/{device_id}/timer/start")]
pub struct TimerStartRoute {
    pub device_id: String,
}

pub async fn start_timer(
    _: TimerStartRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
) -> Result<Json<OkResponse>, ApiError> {
    device.send_command(Command::StartTimer).await?;
    Ok(Json(OkResponse::ok()))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/devices/{device_id}/timer/stop")]
pub struct TimerStopRoute {
    pub device_id: String,
}

pub async fn stop_timer(
    _: TimerStopRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
) -> Result<Json<OkResponse>, ApiError> {
    device.send_command(Command::StopTimer).await?;
    Ok(Json(OkResponse::ok()))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/devices/{device_id}/alarm/clear")]
pub struct AlarmClearRoute {
    pub device_id: String,
}

pub async fn clear_alarm(
    _: AlarmClearRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
) -> Result<Json<OkResponse>, ApiError> {
    device.send_command(Command::ClearAlarm).await?;
    Ok(Json(OkResponse::ok()))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/devices/{device_id}/unit")]
pub struct UnitRoute {
    pub device_id: String,
}

pub async fn unit(
    _: UnitRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
) -> Result<Json<UnitResponse>, ApiError> {
    let Response::Unit(unit) = device.send_command(Command::GetTemperatureUnit).await? else {
        return Err(ApiError::internal("unexpected response shape"));
    };
    Ok(Json(UnitResponse { unit }))
}

pub async fn set_unit(
    _: UnitRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
    Json(request): Json<SetUnitRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let response = device
        .send_command(Command::SetTemperatureUnit(request.unit))
        .await?;
    if !response.accepted() {
        return Err(ApiError::internal("device rejected the unit change"));
    }
    Ok(Json(OkResponse::ok()))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/devices/{device_id}/speaker_status")]
pub struct SpeakerStatusRoute {
    pub device_id: String,
}

pub async fn speaker_status(
    _: SpeakerStatusRoute,
    AuthenticatedDevice(device): AuthenticatedDevice,
) -> Result<Json<SpeakerStatusResponse>, ApiError> {
    let Response::Acknowledged(speaker_status) =
        device.send_command(Command::GetSpeakerStatus).await?
    else {
        return Err(ApiError::internal("unexpected response shape"));
    };
    Ok(Json(SpeakerStatusResponse { speaker_status }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/devices/{device_id}/sse")]
pub struct EventStreamRoute {
    pub device_id: String,
}

pub async fn events(
    EventStreamRoute { device_id }: EventStreamRoute,
    State(state): State<AppState>,
    AuthenticatedDevice(_device): AuthenticatedDevice,
) -> Sse<EventStream> {
    Sse::new(state.sse.subscribe(&device_id))
}
