//! One logical cooker on top of a [`Connection`].
//!
//! Construction runs the identification handshake; afterwards a heartbeat
//! task polls the unit every two seconds, which both keeps the socket alive
//! and refreshes the mirrored [`DeviceState`]. Observers are notified when
//! the mirror changes, when the device raises an event, and exactly once
//! when the connection goes away.

use std::sync::{Arc, Mutex as StdMutex, OnceLock, RwLock};
use std::time::Duration;

use anova_hub_common::commands::{Command, DeviceStatus, Response, TemperatureUnit, TimerStatus};
use anova_hub_common::event::{AnovaEvent, EventType};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use super::{Connection, Error, Result};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Snapshot of everything the cooker reports about itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub status: DeviceStatus,
    pub current_temperature: f64,
    pub target_temperature: f64,
    pub timer_running: bool,
    pub timer_value: u32,
    pub unit: TemperatureUnit,
    pub speaker_status: bool,
}

/// Observer callbacks. All of them run on the reader or heartbeat task and
/// must not call back into `send_command` synchronously on this device.
pub type StateChangeCallback = Arc<dyn Fn(&str, DeviceState) + Send + Sync>;
pub type DeviceEventCallback = Arc<dyn Fn(&str, AnovaEvent) + Send + Sync>;
pub type DisconnectedCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct Identity {
    id_card: String,
    version: String,
    secret_key: String,
}

pub struct Device {
    connection: Arc<Connection>,
    identity: OnceLock<Identity>,
    state: RwLock<DeviceState>,
    state_callback: StdMutex<Option<StateChangeCallback>>,
    event_callback: StdMutex<Option<DeviceEventCallback>>,
    disconnect_callback: StdMutex<Option<DisconnectedCallback>>,
    heartbeat: StdMutex<Option<JoinHandle<()>>>,
}

impl Device {
    /// Identifies the cooker behind `connection` and starts its heartbeat.
    ///
    /// Any handshake failure closes the connection and yields
    /// [`Error::Handshake`].
    pub async fn connect(connection: Arc<Connection>) -> Result<Arc<Self>> {
        let device = Arc::new(Self {
            connection,
            identity: OnceLock::new(),
            state: RwLock::new(DeviceState::default()),
            state_callback: StdMutex::new(None),
            event_callback: StdMutex::new(None),
            disconnect_callback: StdMutex::new(None),
            heartbeat: StdMutex::new(None),
        });

        let weak = Arc::downgrade(&device);
        device.connection.set_event_callback(move |event| {
            if let Some(device) = weak.upgrade() {
                device.handle_event(event);
            }
        });

        if let Err(err) = device.handshake().await {
            device.connection.close().await;
            return Err(Error::Handshake(Box::new(err)));
        }

        *device.heartbeat.lock().unwrap() =
            Some(tokio::spawn(Self::heartbeat_loop(device.clone())));

        let watcher = device.clone();
        tokio::spawn(async move {
            watcher.connection.closed().await;
            watcher.stop_heartbeat();
            let callback = watcher.disconnect_callback.lock().unwrap().clone();
            if let Some(callback) = callback {
                callback(watcher.id_card());
            }
        });

        Ok(device)
    }

    pub fn id_card(&self) -> &str {
        self.identity.get().map_or("", |i| i.id_card.as_str())
    }

    pub fn version(&self) -> &str {
        self.identity.get().map_or("", |i| i.version.as_str())
    }

    pub fn secret_key(&self) -> &str {
        self.identity.get().map_or("", |i| i.secret_key.as_str())
    }

    pub fn state(&self) -> DeviceState {
        *self.state.read().unwrap()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Sends a command through the WiFi link, updating the mirrored state
    /// from the reply.
    ///
    /// Commands that are BLE-only fail with [`Error::CommandNotSupported`]
    /// before touching the wire.
    pub async fn send_command(&self, command: Command) -> Result<Response> {
        if !command.supports_wifi() {
            return Err(Error::CommandNotSupported(command.name()));
        }
        let reply = self.connection.send_command(&command.render()).await?;
        let response = command.parse(&reply)?;
        self.update_state(&command, &response);
        Ok(response)
    }

    pub async fn start_cooking(&self) -> Result<()> {
        let response = self.send_command(Command::StartDevice).await?;
        if !response.accepted() {
            return Err(Error::StartFailed);
        }
        Ok(())
    }

    pub async fn stop_cooking(&self) -> Result<()> {
        let response = self.send_command(Command::StopDevice).await?;
        if !response.accepted() {
            return Err(Error::StopFailed);
        }
        Ok(())
    }

    /// See the note on [`StateChangeCallback`] about reentrancy.
    pub fn set_state_change_callback(&self, callback: impl Fn(&str, DeviceState) + Send + Sync + 'static) {
        *self.state_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    pub fn set_event_callback(&self, callback: impl Fn(&str, AnovaEvent) + Send + Sync + 'static) {
        *self.event_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    pub fn set_disconnect_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.disconnect_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    pub async fn close(&self) {
        self.connection.close().await;
        self.stop_heartbeat();
    }

    fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().unwrap().take() {
            handle.abort();
        }
    }

    async fn handshake(&self) -> Result<()> {
        let Response::Text(id_card) = self.send_command(Command::GetIdCard).await? else {
            return Err(unexpected_shape("GetIdCard"));
        };
        let Response::Text(version) = self.send_command(Command::GetVersion).await? else {
            return Err(unexpected_shape("GetVersion"));
        };
        let Response::Text(secret_key) = self.send_command(Command::GetSecretKey).await? else {
            return Err(unexpected_shape("GetSecretKey"));
        };
        let _ = self.identity.set(Identity {
            id_card,
            version,
            secret_key,
        });

        self.send_command(Command::GetDeviceStatus).await?;
        debug!(device = %self.id_card(), "handshake completed");
        Ok(())
    }

    async fn heartbeat_loop(device: Arc<Self>) {
        let mut ticker = time::interval(HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick fires immediately

        loop {
            ticker.tick().await;
            if device.connection.is_closed() {
                return;
            }
            debug!(device = %device.id_card(), "heartbeat");

            let sequence = [
                Command::GetDeviceStatus,
                Command::GetTargetTemperature,
                Command::GetCurrentTemperature,
                Command::GetTemperatureUnit,
                Command::GetTimerStatus,
                Command::GetSpeakerStatus,
            ];
            for command in sequence {
                match device.send_command(command).await {
                    Ok(_) => {}
                    Err(Error::ConnectionClosed) => return,
                    Err(err) => {
                        warn!(device = %device.id_card(), %err, "heartbeat command failed")
                    }
                }
            }
        }
    }

    fn update_state(&self, command: &Command, response: &Response) {
        let changed = {
            let mut state = self.state.write().unwrap();
            let before = *state;
            match (command, response) {
                (Command::GetDeviceStatus, Response::Status(status)) => {
                    state.status = *status;
                }
                (Command::GetCurrentTemperature, Response::Decimal(temperature)) => {
                    state.current_temperature = *temperature;
                }
                (Command::GetTargetTemperature, Response::Decimal(temperature)) => {
                    state.target_temperature = *temperature;
                }
                (Command::SetTargetTemperature(temperature), response)
                    if response.accepted() =>
                {
                    state.target_temperature = *temperature;
                }
                (Command::GetTemperatureUnit, Response::Unit(unit)) => {
                    state.unit = *unit;
                }
                (Command::SetTemperatureUnit(unit), response) if response.accepted() => {
                    state.unit = *unit;
                }
                (Command::GetTimerStatus, Response::Timer(TimerStatus { minutes, running })) => {
                    state.timer_value = *minutes;
                    state.timer_running = *running;
                }
                (Command::SetTimer(minutes), response) if response.accepted() => {
                    state.timer_value = match response {
                        Response::Minutes(echoed) => *echoed,
                        _ => *minutes,
                    };
                }
                (Command::GetSpeakerStatus, Response::Acknowledged(on)) => {
                    state.speaker_status = *on;
                }
                _ => {}
            }
            (*state != before).then_some(*state)
        };

        if let Some(snapshot) = changed {
            self.notify_state_change(snapshot);
        }
    }

    fn notify_state_change(&self, snapshot: DeviceState) {
        let callback = self.state_callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(self.id_card(), snapshot);
        }
    }

    fn handle_event(&self, event: AnovaEvent) {
        let changed = {
            let mut state = self.state.write().unwrap();
            let before = *state;
            match event.event_type {
                EventType::TempReached => {
                    state.current_temperature = state.target_temperature;
                }
                EventType::LowWater => state.status = DeviceStatus::LowWater,
                EventType::Stop => state.status = DeviceStatus::Stopped,
                EventType::Start => state.status = DeviceStatus::Running,
                EventType::TimeStart => state.timer_running = true,
                EventType::TimeStop | EventType::TimeFinish => state.timer_running = false,
                // Parameter changes are forwarded but carry no state of
                // their own; the next heartbeat picks up the new values.
                EventType::ChangeTemp | EventType::ChangeParam => {}
            }
            (*state != before).then_some(*state)
        };

        if let Some(snapshot) = changed {
            self.notify_state_change(snapshot);
        }

        let callback = self.event_callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(self.id_card(), event);
        }
    }
}

fn unexpected_shape(command: &'static str) -> Error {
    Error::Parse(anova_hub_common::commands::ParseError {
        command,
        message: "unexpected response shape".to_string(),
    })
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id_card", &self.id_card())
            .field("version", &self.version())
            .finish()
    }
}
