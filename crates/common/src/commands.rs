//! The cooker command catalog.
//!
//! Every supported operation is a [`Command`] variant that knows how to
//! render its request line and how to parse the device's reply into a typed
//! [`Response`]. Commands also carry capability flags: a handful of
//! provisioning operations are only honored over BLE, and `get number` is
//! only honored over WiFi.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A reply that did not match the shape the command documents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("parse error in {command}: {message}")]
pub struct ParseError {
    pub command: &'static str,
    pub message: String,
}

impl ParseError {
    fn new(command: &'static str, message: impl Into<String>) -> Self {
        Self {
            command,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    #[default]
    #[serde(rename = "c")]
    Celsius,
    #[serde(rename = "f")]
    Fahrenheit,
}

impl TemperatureUnit {
    fn from_wire(text: &str) -> Option<Self> {
        match text {
            "c" => Some(Self::Celsius),
            "f" => Some(Self::Fahrenheit),
            _ => None,
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Celsius => f.write_str("c"),
            Self::Fahrenheit => f.write_str("f"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    #[serde(rename = "running")]
    Running,
    #[default]
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "low water")]
    LowWater,
    #[serde(rename = "heater error")]
    HeaterError,
    #[serde(rename = "power loss")]
    PowerLoss,
    #[serde(rename = "user change parameter")]
    UserChangeParameter,
}

impl DeviceStatus {
    fn from_wire(text: &str) -> Option<Self> {
        match text {
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "low water" => Some(Self::LowWater),
            "heater error" => Some(Self::HeaterError),
            "power loss" => Some(Self::PowerLoss),
            "user change parameter" => Some(Self::UserChangeParameter),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::LowWater => "low water",
            Self::HeaterError => "heater error",
            Self::PowerLoss => "power loss",
            Self::UserChangeParameter => "user change parameter",
        };
        f.write_str(text)
    }
}

/// Countdown timer state reported by `read timer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStatus {
    pub minutes: u32,
    pub running: bool,
}

/// One operation of the cooker protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetIdCard,
    GetVersion,
    GetSecretKey,
    GetDeviceStatus,
    GetCurrentTemperature,
    GetTargetTemperature,
    SetTargetTemperature(f64),
    GetTemperatureUnit,
    SetTemperatureUnit(TemperatureUnit),
    StartDevice,
    StopDevice,
    SetTimer(u32),
    StartTimer,
    StopTimer,
    GetTimerStatus,
    ClearAlarm,
    GetSpeakerStatus,
    GetCalibrationFactor,
    SetCalibrationFactor(f64),
    SetServerInfo { host: String, port: u16 },
    SetLed { red: u8, green: u8, blue: u8 },
    SetSecretKey(String),
    GetDate,
    GetTemperatureHistory,
    SetWifiCredentials { ssid: String, password: String },
    StartSmartlink,
    SetDeviceName(String),
    SetSpeaker(bool),
}

/// The typed reply to a [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Text(String),
    Acknowledged(bool),
    Decimal(f64),
    Status(DeviceStatus),
    Unit(TemperatureUnit),
    Timer(TimerStatus),
    Minutes(u32),
    Readings(Vec<f64>),
}

impl Response {
    /// Whether the device accepted a set/start/stop style command.
    pub fn accepted(&self) -> bool {
        !matches!(self, Response::Acknowledged(false))
    }
}

/// `server para` defaults used when the caller leaves the target blank.
pub const DEFAULT_SERVER_HOST: &str = "pc.anovaculinary.com";
pub const DEFAULT_SERVER_PORT: u16 = 8080;

impl Command {
    /// Points the cooker at a server, falling back to the vendor endpoint
    /// when `host` is empty or `port` is zero.
    pub fn set_server_info(host: &str, port: u16) -> Self {
        Self::SetServerInfo {
            host: if host.is_empty() {
                DEFAULT_SERVER_HOST.to_string()
            } else {
                host.to_string()
            },
            port: if port == 0 { DEFAULT_SERVER_PORT } else { port },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetIdCard => "GetIdCard",
            Self::GetVersion => "GetVersion",
            Self::GetSecretKey => "GetSecretKey",
            Self::GetDeviceStatus => "GetDeviceStatus",
            Self::GetCurrentTemperature => "GetCurrentTemperature",
            Self::GetTargetTemperature => "GetTargetTemperature",
            Self::SetTargetTemperature(_) => "SetTargetTemperature",
            Self::GetTemperatureUnit => "GetTemperatureUnit",
            Self::SetTemperatureUnit(_) => "SetTemperatureUnit",
            Self::StartDevice => "StartDevice",
            Self::StopDevice => "StopDevice",
            Self::SetTimer(_) => "SetTimer",
            Self::StartTimer => "StartTimer",
            Self::StopTimer => "StopTimer",
            Self::GetTimerStatus => "GetTimerStatus",
            Self::ClearAlarm => "ClearAlarm",
            Self::GetSpeakerStatus => "GetSpeakerStatus",
            Self::GetCalibrationFactor => "GetCalibrationFactor",
            Self::SetCalibrationFactor(_) => "SetCalibrationFactor",
            Self::SetServerInfo { .. } => "SetServerInfo",
            Self::SetLed { .. } => "SetLed",
            Self::SetSecretKey(_) => "SetSecretKey",
            Self::GetDate => "GetDate",
            Self::GetTemperatureHistory => "GetTemperatureHistory",
            Self::SetWifiCredentials { .. } => "SetWifiCredentials",
            Self::StartSmartlink => "StartSmartlink",
            Self::SetDeviceName(_) => "SetDeviceName",
            Self::SetSpeaker(_) => "SetSpeaker",
        }
    }

    pub fn supports_wifi(&self) -> bool {
        !matches!(
            self,
            Self::GetCalibrationFactor
                | Self::SetCalibrationFactor(_)
                | Self::SetServerInfo { .. }
                | Self::SetLed { .. }
                | Self::SetSecretKey(_)
                | Self::GetDate
                | Self::GetTemperatureHistory
                | Self::SetWifiCredentials { .. }
                | Self::StartSmartlink
                | Self::SetDeviceName(_)
                | Self::SetSpeaker(_)
        )
    }

    pub fn supports_ble(&self) -> bool {
        !matches!(self, Self::GetSecretKey)
    }

    /// The ASCII request line for this command.
    pub fn render(&self) -> String {
        match self {
            Self::GetIdCard => "get id card".to_string(),
            Self::GetVersion => "version".to_string(),
            Self::GetSecretKey => "get number".to_string(),
            Self::GetDeviceStatus => "status".to_string(),
            Self::GetCurrentTemperature => "read temp".to_string(),
            Self::GetTargetTemperature => "read set temp".to_string(),
            Self::SetTargetTemperature(t) => format!("set temp {t:.1}"),
            Self::GetTemperatureUnit => "read unit".to_string(),
            Self::SetTemperatureUnit(unit) => format!("set unit {unit}"),
            Self::StartDevice => "start".to_string(),
            Self::StopDevice => "stop".to_string(),
            Self::SetTimer(minutes) => format!("set timer {minutes}"),
            Self::StartTimer => "start time".to_string(),
            Self::StopTimer => "stop time".to_string(),
            Self::GetTimerStatus => "read timer".to_string(),
            Self::ClearAlarm => "clear alarm".to_string(),
            Self::GetSpeakerStatus => "speaker status".to_string(),
            Self::GetCalibrationFactor => "read cal".to_string(),
            Self::SetCalibrationFactor(factor) => format!("cal {factor:.1}"),
            Self::SetServerInfo { host, port } => format!("server para {host} {port}"),
            Self::SetLed { red, green, blue } => format!("set led {red} {green} {blue}"),
            Self::SetSecretKey(key) => format!("set number {key}"),
            Self::GetDate => "read date".to_string(),
            Self::GetTemperatureHistory => "read data".to_string(),
            Self::SetWifiCredentials { ssid, password } => {
                format!("wifi para 2 {ssid} {password} WPA2PSK AES")
            }
            Self::StartSmartlink => "smartlink start".to_string(),
            Self::SetDeviceName(name) => format!("set name {name}"),
            Self::SetSpeaker(on) => {
                format!("set speaker {}", if *on { "on" } else { "off" })
            }
        }
    }

    /// Parses the device reply into the value this command documents.
    pub fn parse(&self, response: &str) -> Result<Response, ParseError> {
        let trimmed = response.trim();
        match self {
            Self::GetIdCard => {
                let id = trimmed.strip_prefix("anova ").unwrap_or(trimmed);
                Ok(Response::Text(id.to_string()))
            }
            Self::GetVersion | Self::GetSecretKey | Self::GetDate => {
                Ok(Response::Text(trimmed.to_string()))
            }
            Self::GetDeviceStatus => {
                let status = DeviceStatus::from_wire(&trimmed.to_lowercase())
                    .ok_or_else(|| {
                        ParseError::new(self.name(), format!("unknown status: {trimmed}"))
                    })?;
                Ok(Response::Status(status))
            }
            Self::GetCurrentTemperature
            | Self::GetTargetTemperature
            | Self::GetCalibrationFactor => Ok(Response::Decimal(self.decimal(trimmed)?)),
            Self::GetTemperatureUnit => {
                let unit = TemperatureUnit::from_wire(&trimmed.to_lowercase())
                    .ok_or_else(|| {
                        ParseError::new(self.name(), format!("unknown unit: {trimmed}"))
                    })?;
                Ok(Response::Unit(unit))
            }
            Self::GetTimerStatus => {
                let mut parts = trimmed.split_whitespace();
                let (Some(minutes), Some(running), None) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    return Err(ParseError::new(self.name(), "invalid response format"));
                };
                let minutes = minutes
                    .parse()
                    .map_err(|_| ParseError::new(self.name(), "invalid minutes"))?;
                Ok(Response::Timer(TimerStatus {
                    minutes,
                    running: running == "1",
                }))
            }
            Self::SetTimer(_) => {
                // Firmware revisions disagree on whether this echoes the
                // minutes or just acknowledges; accept both shapes.
                if let Ok(minutes) = trimmed.parse() {
                    Ok(Response::Minutes(minutes))
                } else {
                    Ok(Response::Acknowledged(trimmed == "ok"))
                }
            }
            Self::StartDevice => Ok(self.ack_or_verb(trimmed, "start")),
            Self::StopDevice => Ok(self.ack_or_verb(trimmed, "stop")),
            Self::StopTimer => Ok(self.ack_or_verb(trimmed, "stop time")),
            Self::ClearAlarm => Ok(self.ack_or_verb(trimmed, "clear alarm")),
            Self::GetSpeakerStatus => Ok(Response::Acknowledged(
                trimmed.to_lowercase().ends_with(" on"),
            )),
            Self::SetServerInfo { host, port } => {
                let mut parts = trimmed.split_whitespace();
                let (Some(echoed_host), Some(echoed_port), None) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    return Err(ParseError::new(self.name(), "invalid response format"));
                };
                if echoed_host != host {
                    return Err(ParseError::new(self.name(), "unexpected server host"));
                }
                match echoed_port.parse::<u16>() {
                    Ok(p) if p == *port => Ok(Response::Acknowledged(true)),
                    _ => Err(ParseError::new(self.name(), "unexpected port")),
                }
            }
            Self::GetTemperatureHistory => {
                let Some(data) = trimmed.strip_prefix("read data") else {
                    return Err(ParseError::new(self.name(), "invalid response format"));
                };
                let readings = data
                    .split_whitespace()
                    .map(|reading| {
                        reading.parse().map_err(|_| {
                            ParseError::new(
                                self.name(),
                                format!("invalid temperature: {reading}"),
                            )
                        })
                    })
                    .collect::<Result<Vec<f64>, _>>()?;
                Ok(Response::Readings(readings))
            }
            Self::SetTargetTemperature(_)
            | Self::SetTemperatureUnit(_)
            | Self::StartTimer
            | Self::SetCalibrationFactor(_)
            | Self::SetLed { .. }
            | Self::SetSecretKey(_)
            | Self::SetWifiCredentials { .. }
            | Self::StartSmartlink
            | Self::SetDeviceName(_)
            | Self::SetSpeaker(_) => Ok(Response::Acknowledged(trimmed == "ok")),
        }
    }

    fn decimal(&self, trimmed: &str) -> Result<f64, ParseError> {
        trimmed
            .parse()
            .map_err(|_| ParseError::new(self.name(), format!("invalid number: {trimmed}")))
    }

    fn ack_or_verb(&self, trimmed: &str, verb: &str) -> Response {
        let lowered = trimmed.to_lowercase();
        Response::Acknowledged(lowered == "ok" || lowered == verb)
    }
}
