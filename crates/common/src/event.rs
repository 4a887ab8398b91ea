//! Unsolicited device messages.
//!
//! Besides command replies, a cooker pushes frames on its own when something
//! happens at the unit: the bath reached temperature, the water level
//! dropped, somebody pressed a button. [`is_event`] tells the two apart;
//! [`AnovaEvent::parse`] classifies the event payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TempReached,
    LowWater,
    Start,
    Stop,
    ChangeTemp,
    TimeStart,
    TimeStop,
    TimeFinish,
    ChangeParam,
}

/// Which side of the cooker raised the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOriginator {
    Wifi,
    Ble,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnovaEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub originator: EventOriginator,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognized event payload: {0}")]
pub struct UnknownEvent(pub String);

/// Whether a decoded frame is an event rather than a command reply.
pub fn is_event(message: &str) -> bool {
    let lowered = message.trim().to_lowercase();
    lowered.starts_with("event") || lowered.starts_with("user changed")
}

impl AnovaEvent {
    pub fn parse(message: &str) -> Result<Self, UnknownEvent> {
        let mut payload = message.trim().to_lowercase();
        let mut originator = EventOriginator::Device;

        if let Some(rest) = payload.strip_prefix("event wifi ") {
            originator = EventOriginator::Wifi;
            payload = rest.to_string();
        } else if let Some(rest) = payload.strip_prefix("event ble ") {
            originator = EventOriginator::Ble;
            payload = rest.to_string();
        } else if let Some(rest) = payload.strip_prefix("event ") {
            payload = rest.to_string();
        }

        let event_type = if payload.starts_with("user changed") {
            EventType::ChangeParam
        } else if payload.starts_with("temp has reached") {
            EventType::TempReached
        } else {
            match payload.as_str() {
                "stop" => EventType::Stop,
                "start" => EventType::Start,
                "low water" => EventType::LowWater,
                "time start" => EventType::TimeStart,
                "time stop" => EventType::TimeStop,
                "time finish" => EventType::TimeFinish,
                _ => return Err(UnknownEvent(payload)),
            }
        };

        Ok(AnovaEvent {
            event_type,
            originator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_events_and_responses() {
        assert!(is_event("event wifi stop"));
        assert!(is_event("  Event low water"));
        assert!(is_event("user changed set temp"));
        assert!(!is_event("stopped"));
        assert!(!is_event("58.5"));
        assert!(!is_event("anova A1B2C3"));
    }

    #[test]
    fn parses_originator_prefixes() {
        let cases = [
            ("event wifi stop", EventOriginator::Wifi, EventType::Stop),
            ("event ble start", EventOriginator::Ble, EventType::Start),
            ("event low water", EventOriginator::Device, EventType::LowWater),
            ("time finish", EventOriginator::Device, EventType::TimeFinish),
        ];
        for (payload, originator, event_type) in cases {
            let event = AnovaEvent::parse(payload).unwrap();
            assert_eq!(event.originator, originator, "{payload}");
            assert_eq!(event.event_type, event_type, "{payload}");
        }
    }

    #[test]
    fn parses_prefix_grammar() {
        assert_eq!(
            AnovaEvent::parse("event wifi temp has reached 58.5 c")
                .unwrap()
                .event_type,
            EventType::TempReached
        );
        assert_eq!(
            AnovaEvent::parse("user changed set temp 61.0")
                .unwrap()
                .event_type,
            EventType::ChangeParam
        );
    }

    #[test]
    fn parses_timer_events() {
        assert_eq!(
            AnovaEvent::parse("event time start").unwrap().event_type,
            EventType::TimeStart
        );
        assert_eq!(
            AnovaEvent::parse("event time stop").unwrap().event_type,
            EventType::TimeStop
        );
    }

    #[test]
    fn rejects_unknown_payloads() {
        assert!(AnovaEvent::parse("event moonrise").is_err());
    }

    #[test]
    fn serializes_like_the_rest_api_expects() {
        let event = AnovaEvent {
            event_type: EventType::TempReached,
            originator: EventOriginator::Device,
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"type":"temp_reached","originator":"device"}"#
        );
    }
}
