//! Registry of live devices and fan-out of their activity.
//!
//! The manager is the server's connection handler: every accepted socket is
//! handshaken into a [`Device`] and tracked by its id card. Subscribers
//! register callbacks per device id or under the [`WILDCARD`] to observe
//! connects, disconnects, state changes and events.

use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::device::{DeviceEventCallback, DeviceState, DisconnectedCallback, StateChangeCallback};
use super::server::{ConnectionHandler, Server};
use super::{Connection, Device};
use anova_hub_common::event::AnovaEvent;
use async_trait::async_trait;

/// Registering a callback under this id observes every device.
pub const WILDCARD: &str = "*";

pub type ConnectedCallback = Arc<dyn Fn(&Arc<Device>) + Send + Sync>;

pub struct Manager {
    host: String,
    port: u16,
    devices: DashMap<String, Arc<Device>>,
    connected_callbacks: StdMutex<Vec<ConnectedCallback>>,
    disconnected_callbacks: DashMap<String, DisconnectedCallback>,
    state_callbacks: DashMap<String, StateChangeCallback>,
    event_callbacks: DashMap<String, DeviceEventCallback>,
    shutdown: watch::Sender<bool>,
}

impl Manager {
    /// Binds the cooker endpoint and starts accepting connections.
    pub async fn start(host: &str, port: u16) -> std::io::Result<Arc<Self>> {
        let server = Server::bind(host, port).await?;
        let (host, port) = server.host_port();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let manager = Arc::new(Self {
            host,
            port,
            devices: DashMap::new(),
            connected_callbacks: StdMutex::new(Vec::new()),
            disconnected_callbacks: DashMap::new(),
            state_callbacks: DashMap::new(),
            event_callbacks: DashMap::new(),
            shutdown,
        });

        tokio::spawn(server.run(manager.clone(), shutdown_rx));
        Ok(manager)
    }

    /// The endpoint cookers should be provisioned with.
    pub fn server_info(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn device(&self, id_card: &str) -> Option<Arc<Device>> {
        self.devices.get(id_card).map(|entry| entry.value().clone())
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn on_device_connected(&self, callback: impl Fn(&Arc<Device>) + Send + Sync + 'static) {
        self.connected_callbacks
            .lock()
            .unwrap()
            .push(Arc::new(callback));
    }

    pub fn on_device_disconnected(
        &self,
        id_card: &str,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) {
        self.disconnected_callbacks
            .insert(id_card.to_string(), Arc::new(callback));
    }

    pub fn on_device_state_change(
        &self,
        id_card: &str,
        callback: impl Fn(&str, DeviceState) + Send + Sync + 'static,
    ) {
        self.state_callbacks
            .insert(id_card.to_string(), Arc::new(callback));
    }

    pub fn on_device_event(
        &self,
        id_card: &str,
        callback: impl Fn(&str, AnovaEvent) + Send + Sync + 'static,
    ) {
        self.event_callbacks
            .insert(id_card.to_string(), Arc::new(callback));
    }

    /// Closes every device concurrently, then stops the listener.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);

        let mut closing = JoinSet::new();
        for entry in self.devices.iter() {
            let device = entry.value().clone();
            closing.spawn(async move { device.close().await });
        }
        let _ = closing.join_all().await;
        self.devices.clear();
        info!("cooker endpoint stopped");
    }

    fn handle_disconnected(&self, id_card: &str, device: &Arc<Device>) {
        // A superseded connection disconnects after its replacement has
        // already claimed the id; leave the replacement alone.
        let removed = self
            .devices
            .remove_if(id_card, |_, current| Arc::ptr_eq(current, device));
        if removed.is_none() {
            debug!(device = %id_card, "stale disconnect for a superseded connection");
            return;
        }
        info!(device = %id_card, "device disconnected");

        let specific = self
            .disconnected_callbacks
            .get(id_card)
            .map(|entry| entry.value().clone());
        if let Some(callback) = specific {
            callback(id_card);
        }
        let wildcard = self
            .disconnected_callbacks
            .get(WILDCARD)
            .map(|entry| entry.value().clone());
        if let Some(callback) = wildcard {
            callback(id_card);
        }

        self.disconnected_callbacks.remove(id_card);
        self.state_callbacks.remove(id_card);
        self.event_callbacks.remove(id_card);
    }

    fn dispatch_state_change(&self, id_card: &str, state: DeviceState) {
        let specific = self
            .state_callbacks
            .get(id_card)
            .map(|entry| entry.value().clone());
        if let Some(callback) = specific {
            callback(id_card, state);
        }
        let wildcard = self
            .state_callbacks
            .get(WILDCARD)
            .map(|entry| entry.value().clone());
        if let Some(callback) = wildcard {
            callback(id_card, state);
        }
    }

    fn dispatch_event(&self, id_card: &str, event: AnovaEvent) {
        let specific = self
            .event_callbacks
            .get(id_card)
            .map(|entry| entry.value().clone());
        if let Some(callback) = specific {
            callback(id_card, event);
        }
        let wildcard = self
            .event_callbacks
            .get(WILDCARD)
            .map(|entry| entry.value().clone());
        if let Some(callback) = wildcard {
            callback(id_card, event);
        }
    }
}

#[async_trait]
impl ConnectionHandler for Manager {
    async fn handle(self: Arc<Self>, connection: Arc<Connection>) {
        let device = match Device::connect(connection).await {
            Ok(device) => device,
            Err(err) => {
                warn!(%err, "dropping connection");
                return;
            }
        };

        let id_card = device.id_card().to_string();
        if id_card.is_empty() {
            warn!("device reported an empty id card, dropping");
            device.close().await;
            return;
        }

        if let Some(old) = self.devices.insert(id_card.clone(), device.clone()) {
            debug!(device = %id_card, "device already connected, closing old connection");
            tokio::spawn(async move { old.close().await });
        }

        {
            let manager = Arc::downgrade(&self);
            let this = Arc::downgrade(&device);
            device.set_disconnect_callback(move |id_card| {
                if let (Some(manager), Some(device)) = (manager.upgrade(), this.upgrade()) {
                    manager.handle_disconnected(id_card, &device);
                }
            });
        }
        {
            let manager = Arc::downgrade(&self);
            device.set_state_change_callback(move |id_card, state| {
                if let Some(manager) = manager.upgrade() {
                    manager.dispatch_state_change(id_card, state);
                }
            });
        }
        {
            let manager = Arc::downgrade(&self);
            device.set_event_callback(move |id_card, event| {
                if let Some(manager) = manager.upgrade() {
                    manager.dispatch_event(id_card, event);
                }
            });
        }

        info!(device = %id_card, version = %device.version(), "new device connected");
        let callbacks = self.connected_callbacks.lock().unwrap().clone();
        for callback in callbacks {
            callback(&device);
        }
    }
}
