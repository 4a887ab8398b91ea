//! Server-sent-event fan-out.
//!
//! The hub subscribes to the manager's wildcard callbacks and forwards four
//! event kinds (`device_connected`, `device_disconnected`, `state_changed`,
//! `event`) to any number of HTTP listeners, plus a periodic `ping`.
//! Listener channels are bounded and written without blocking: a subscriber
//! that cannot keep up loses events instead of stalling the broadcast.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use anova_hub_common::event::AnovaEvent;
use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Interval, interval};
use tracing::{debug, error};

use crate::cooker::manager::WILDCARD;
use crate::cooker::{DeviceState, Manager};

pub const CHANNEL_CAPACITY: usize = 100;
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SseEventType {
    DeviceConnected,
    DeviceDisconnected,
    StateChanged,
    Event,
}

impl SseEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceConnected => "device_connected",
            Self::DeviceDisconnected => "device_disconnected",
            Self::StateChanged => "state_changed",
            Self::Event => "event",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SsePayload {
    State(DeviceState),
    Event(AnovaEvent),
}

#[derive(Debug, Clone, Serialize)]
pub struct SseEvent {
    pub device_id: String,
    pub event_type: SseEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<SsePayload>,
    pub timestamp: DateTime<Utc>,
}

impl SseEvent {
    fn new(device_id: &str, event_type: SseEventType, payload: Option<SsePayload>) -> Self {
        Self {
            device_id: device_id.to_string(),
            event_type,
            payload,
            timestamp: Utc::now(),
        }
    }
}

pub struct SseManager {
    listeners: DashMap<String, DashMap<String, mpsc::Sender<SseEvent>>>,
}

impl SseManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: DashMap::new(),
        })
    }

    /// Wires the hub into the manager's callback tables.
    pub fn register(self: &Arc<Self>, manager: &Manager) {
        let hub = self.clone();
        manager.on_device_connected(move |device| {
            hub.broadcast(SseEvent::new(
                device.id_card(),
                SseEventType::DeviceConnected,
                None,
            ));
        });
        let hub = self.clone();
        manager.on_device_disconnected(WILDCARD, move |id_card| {
            hub.broadcast(SseEvent::new(
                id_card,
                SseEventType::DeviceDisconnected,
                None,
            ));
        });
        let hub = self.clone();
        manager.on_device_state_change(WILDCARD, move |id_card, state| {
            hub.broadcast(SseEvent::new(
                id_card,
                SseEventType::StateChanged,
                Some(SsePayload::State(state)),
            ));
        });
        let hub = self.clone();
        manager.on_device_event(WILDCARD, move |id_card, event| {
            hub.broadcast(SseEvent::new(
                id_card,
                SseEventType::Event,
                Some(SsePayload::Event(event)),
            ));
        });
    }

    /// Registers a listener for one device and returns its id with the
    /// receiving end of its bounded channel.
    pub fn connect(&self, device_id: &str) -> (String, mpsc::Receiver<SseEvent>) {
        let listener_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.listeners
            .entry(device_id.to_string())
            .or_default()
            .insert(listener_id.clone(), tx);
        (listener_id, rx)
    }

    pub fn disconnect(&self, device_id: &str, listener_id: &str) {
        let emptied = match self.listeners.get(device_id) {
            Some(listeners) => {
                listeners.remove(listener_id);
                listeners.is_empty()
            }
            None => false,
        };
        if emptied {
            self.listeners
                .remove_if(device_id, |_, listeners| listeners.is_empty());
        }
    }

    pub fn broadcast(&self, event: SseEvent) {
        let Some(listeners) = self.listeners.get(&event.device_id) else {
            return;
        };
        for listener in listeners.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) =
                listener.value().try_send(event.clone())
            {
                debug!(device = %event.device_id, "subscriber backlogged, dropping event");
            }
        }
    }

    /// One subscriber's stream of rendered SSE frames.
    pub fn subscribe(self: &Arc<Self>, device_id: &str) -> EventStream {
        let (listener_id, receiver) = self.connect(device_id);
        EventStream {
            hub: self.clone(),
            device_id: device_id.to_string(),
            listener_id,
            receiver,
            ping: interval(PING_INTERVAL),
        }
    }
}

pub struct EventStream {
    hub: Arc<SseManager>,
    device_id: String,
    listener_id: String,
    receiver: mpsc::Receiver<SseEvent>,
    ping: Interval,
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => return Poll::Ready(Some(Ok(render(&event)))),
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => {}
        }
        if this.ping.poll_tick(cx).is_ready() {
            return Poll::Ready(Some(Ok(Event::default().event("ping").data("{}"))));
        }
        Poll::Pending
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.hub.disconnect(&self.device_id, &self.listener_id);
    }
}

fn render(event: &SseEvent) -> Event {
    let rendered = Event::default().event(event.event_type.as_str());
    match serde_json::to_string(event) {
        Ok(data) => rendered.data(data),
        Err(err) => {
            error!(%err, "failed to serialize sse event");
            rendered.data("{}")
        }
    }
}

#[cfg(test)]
mod tests {
    use anova_hub_common::commands::DeviceStatus;

    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_listener_of_that_device() {
        let hub = SseManager::new();
        let (_id_a, mut a) = hub.connect("X");
        let (_id_b, mut b) = hub.connect("X");
        let (_id_other, mut other) = hub.connect("Y");

        hub.broadcast(SseEvent::new("X", SseEventType::DeviceConnected, None));

        assert_eq!(
            a.recv().await.unwrap().event_type,
            SseEventType::DeviceConnected
        );
        assert_eq!(
            b.recv().await.unwrap().event_type,
            SseEventType::DeviceConnected
        );
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_loses_events_without_stalling() {
        let hub = SseManager::new();
        let (_id, mut listener) = hub.connect("X");

        for _ in 0..CHANNEL_CAPACITY + 10 {
            hub.broadcast(SseEvent::new("X", SseEventType::StateChanged, None));
        }

        let mut received = 0;
        while listener.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn disconnect_drops_the_listener_and_empty_maps() {
        let hub = SseManager::new();
        let (listener_id, mut listener) = hub.connect("X");
        hub.disconnect("X", &listener_id);

        assert!(listener.recv().await.is_none());
        hub.broadcast(SseEvent::new("X", SseEventType::DeviceConnected, None));
        assert!(hub.listeners.get("X").is_none());
    }

    #[test]
    fn events_serialize_with_their_payload() {
        let state = DeviceState {
            status: DeviceStatus::Running,
            ..DeviceState::default()
        };
        let event = SseEvent::new("X", SseEventType::StateChanged, Some(SsePayload::State(state)));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event_type":"state_changed""#));
        assert!(json.contains(r#""status":"running""#));

        let bare = SseEvent::new("X", SseEventType::DeviceDisconnected, None);
        let json = serde_json::to_string(&bare).unwrap();
        assert!(!json.contains("payload"));
    }
}
