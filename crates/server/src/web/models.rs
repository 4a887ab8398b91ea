//! Request and response bodies of the REST API.

use anova_hub_common::commands::{TemperatureUnit, TimerStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub status: &'static str,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub version: String,
    pub device_number: String,
}

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct SetTemperatureRequest {
    pub temperature: f64,
}

#[derive(Debug, Serialize)]
pub struct SetTemperatureResponse {
    pub changed_to: f64,
}

#[derive(Debug, Serialize)]
pub struct TemperatureResponse {
    pub temperature: f64,
}

#[derive(Debug, Deserialize)]
pub struct SetTimerRequest {
    pub minutes: u32,
}

#[derive(Debug, Serialize)]
pub struct SetTimerResponse {
    pub message: &'static str,
    pub minutes: u32,
}

#[derive(Debug, Serialize)]
pub struct TimerResponse {
    pub timer: TimerStatus,
}

#[derive(Debug, Deserialize)]
pub struct SetUnitRequest {
    pub unit: TemperatureUnit,
}

#[derive(Debug, Serialize)]
pub struct UnitResponse {
    pub unit: TemperatureUnit,
}

#[derive(Debug, Serialize)]
pub struct SpeakerStatusResponse {
    pub speaker_status: bool,
}
