//! Outbound messages: dispense results on the status topic, sensor snapshots
//! on the level and temperature topics.
//!
//! Publishing never fails the caller. A channel error is logged and the
//! message is lost.
use std::collections::BTreeMap;

use dispenser_traits::Channel;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Topics;
use crate::types::{DispenseResult, SensorSnapshot};

/// Wire form of a completed dispense.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMessage {
    pub ml_dispensed: f64,
    pub level_before: u16,
    pub level_after: u16,
    pub displacement: i32,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl From<&DispenseResult> for StatusMessage {
    fn from(r: &DispenseResult) -> Self {
        let micros = r.timestamp.timestamp_micros();
        Self {
            ml_dispensed: r.volume_ml,
            level_before: r.level_before,
            level_after: r.level_after,
            displacement: r.displacement,
            timestamp: micros as f64 / 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TelemetryPublisher {
    topics: Topics,
}

impl TelemetryPublisher {
    pub fn new(topics: Topics) -> Self {
        Self { topics }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Publish one status message. Returns whether the channel accepted it.
    pub fn publish_result(&self, channel: &mut dyn Channel, result: &DispenseResult) -> bool {
        let msg = StatusMessage::from(result);
        let payload = match serde_json::to_vec(&msg) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "status message not serializable");
                return false;
            }
        };
        self.send(channel, &self.topics.status, &payload)
    }

    /// Publish the level, then the temperatures if any probe answered.
    /// Returns the number of messages the channel accepted.
    pub fn publish_snapshot(&self, channel: &mut dyn Channel, snapshot: &SensorSnapshot) -> usize {
        let mut sent = 0;
        let level = snapshot.water_level.to_string();
        if self.send(channel, &self.topics.level, level.as_bytes()) {
            sent += 1;
        }
        if !snapshot.temperatures.is_empty() {
            match temperatures_json(&snapshot.temperatures) {
                Ok(payload) => {
                    if self.send(channel, &self.topics.temperature, &payload) {
                        sent += 1;
                    }
                }
                Err(e) => warn!(error = %e, "temperature map not serializable"),
            }
        }
        sent
    }

    fn send(&self, channel: &mut dyn Channel, topic: &str, payload: &[u8]) -> bool {
        match channel.publish(topic, payload) {
            Ok(()) => {
                debug!(topic, bytes = payload.len(), "published");
                true
            }
            Err(e) => {
                warn!(topic, error = %e, "publish failed");
                false
            }
        }
    }
}

fn temperatures_json(temps: &BTreeMap<String, f32>) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(temps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_message_carries_epoch_seconds() {
        let r = DispenseResult {
            volume_ml: 10.0,
            steps: 1700,
            direction: crate::types::Direction::Push,
            level_before: 100,
            level_after: 90,
            displacement: -10,
            timestamp: chrono::Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap(),
        };
        let v: serde_json::Value = serde_json::to_value(StatusMessage::from(&r)).unwrap();
        assert_eq!(v["ml_dispensed"], 10.0);
        assert_eq!(v["displacement"], -10);
        assert_eq!(v["timestamp"], 1_700_000_000.25);
        assert_eq!(v.as_object().unwrap().len(), 5);
    }
}
