//! ---
//! tsc_section: "02-messaging-ipc-data-model"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Command envelopes, topics, and publish transports."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{MessagingError, Result};

/// Inbound command: a name plus an untyped key/value payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Command name, e.g. `rotate`.
    pub command: String,
    /// Parameters; absent payloads decode as an empty object.
    #[serde(default = "empty_object")]
    pub payload: JsonValue,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}

impl CommandEnvelope {
    /// Build an envelope from a command name and payload.
    pub fn new(command: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            command: command.into(),
            payload,
        }
    }

    /// Envelope with an empty payload.
    pub fn bare(command: impl Into<String>) -> Self {
        Self::new(command, empty_object())
    }
}

/// Outbound message as handed to a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for deduplication and tracing.
    pub id: Uuid,
    /// Timestamp when the message was created.
    pub timestamp: DateTime<Utc>,
    /// Destination topic.
    pub topic: String,
    /// Whether the broker should keep this as the topic's last value.
    #[serde(default)]
    pub retain: bool,
    /// Message body.
    pub payload: JsonValue,
}

impl Message {
    /// Construct a new message for `topic`.
    pub fn new(topic: impl Into<String>, payload: JsonValue, retain: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            topic: topic.into(),
            retain,
            payload,
        }
    }
}

/// Topic layout rooted at a configurable prefix such as `/thermalcamera`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    root: String,
}

impl Topics {
    /// Create the layout; a trailing `/` on `root` is ignored.
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            root: root.trim_end_matches('/').to_owned(),
        }
    }

    /// Topic prefix.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Retained rig state snapshot.
    pub fn state(&self) -> String {
        format!("{}/state", self.root)
    }

    /// Switch reading published on request.
    pub fn switch(&self) -> String {
        format!("{}/switch", self.root)
    }

    /// Prometheus text exposition.
    pub fn metrics(&self) -> String {
        format!("{}/metrics", self.root)
    }

    /// Frame payload of one sensor.
    pub fn frame(&self, sensor_id: &str, address: u8) -> String {
        format!("{}/{}/frame/{}", self.root, topic_segment(sensor_id), address)
    }

    /// Position at which a sensor's most recent frame was captured.
    pub fn sensor_position(&self, sensor_id: &str) -> String {
        format!("{}/{}/position", self.root, topic_segment(sensor_id))
    }

    /// Outcome of a command.
    pub fn response(&self, command: &str) -> String {
        format!("{}/response/{}", self.root, command)
    }

    /// Prefix under which commands arrive, e.g. `/thermalcamera/cmd/rotate`.
    pub fn command_prefix(&self) -> String {
        format!("{}/cmd/", self.root)
    }

    /// Extract the command name from an inbound command topic.
    pub fn command_from_topic(&self, topic: &str) -> Result<String> {
        let prefix = self.command_prefix();
        match topic.strip_prefix(prefix.as_str()) {
            Some(command) if !command.is_empty() && !command.contains('/') => {
                Ok(command.to_owned())
            }
            _ => Err(MessagingError::NotACommand(topic.to_owned())),
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new("/thermalcamera")
    }
}

/// Sensor ids lose their dashes inside topics (`camera-0` -> `camera0`).
fn topic_segment(sensor_id: &str) -> String {
    sensor_id.replace('-', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topics_are_scoped_by_sensor() {
        let topics = Topics::new("/thermalcamera/");
        assert_eq!(topics.state(), "/thermalcamera/state");
        assert_eq!(topics.frame("camera-1", 49), "/thermalcamera/camera1/frame/49");
        assert_eq!(topics.sensor_position("camera2"), "/thermalcamera/camera2/position");
        assert_eq!(topics.response("rotate"), "/thermalcamera/response/rotate");
    }

    #[test]
    fn command_topics_resolve_to_names() {
        let topics = Topics::default();
        assert_eq!(
            topics.command_from_topic("/thermalcamera/cmd/go_to").unwrap(),
            "go_to"
        );
        assert!(topics.command_from_topic("/thermalcamera/state").is_err());
        assert!(topics.command_from_topic("/thermalcamera/cmd/").is_err());
    }

    #[test]
    fn envelope_defaults_to_empty_payload() {
        let envelope: CommandEnvelope = serde_json::from_str(r#"{"command":"release"}"#).unwrap();
        assert_eq!(envelope, CommandEnvelope::bare("release"));
        assert_eq!(envelope.payload, json!({}));
    }
}
