//! Decoding of raw stream frames into [`Notification`]s
//!
//! A frame is one `\n\n`-delimited block of `field: value` lines. Only
//! `event` and `data` matter; `id`, `retry` and comment lines are ignored.

use flagsync_domain::constants::{OCCUPANCY_CHANNEL_PREFIX, OCCUPANCY_EVENT_NAME};
use flagsync_domain::{ControlType, Notification, StreamError};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorFrame {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
    #[serde(default)]
    status_code: i64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    channel: String,
    data: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OccupancyData {
    metrics: OccupancyMetrics,
}

#[derive(Debug, Deserialize)]
struct OccupancyMetrics {
    publishers: i64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum Payload {
    #[serde(rename_all = "camelCase")]
    SplitUpdate { change_number: i64 },
    #[serde(rename_all = "camelCase")]
    SplitKill { change_number: i64, split_name: String, default_treatment: String },
    #[serde(rename_all = "camelCase")]
    SegmentUpdate { change_number: i64, segment_name: String },
    #[serde(rename_all = "camelCase")]
    Control { control_type: ControlType },
}

/// Stateless frame decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationParser;

impl NotificationParser {
    /// Decode one frame; malformed or unknown frames yield `None`.
    pub fn parse(frame: &str) -> Option<Notification> {
        let mut event = None;
        let mut data: Option<String> = None;

        for line in frame.lines() {
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.strip_prefix(' ').unwrap_or(value);
            match field {
                "event" => event = Some(value),
                "data" => match data.as_mut() {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(value);
                    }
                    None => data = Some(value.to_string()),
                },
                _ => {}
            }
        }

        let Some(data) = data else {
            debug!("Frame without data ignored");
            return None;
        };

        match event.unwrap_or("message") {
            "error" => Self::parse_error(&data),
            "message" => Self::parse_message(&data),
            other => {
                debug!(event = other, "Unsupported event type ignored");
                None
            }
        }
    }

    fn parse_error(data: &str) -> Option<Notification> {
        match serde_json::from_str::<ErrorFrame>(data) {
            Ok(frame) => {
                Some(Notification::Error(StreamError::new(frame.code, frame.status_code, frame.message)))
            }
            Err(e) => {
                warn!(error = %e, "Malformed error frame dropped");
                None
            }
        }
    }

    fn parse_message(data: &str) -> Option<Notification> {
        let envelope: Envelope = match serde_json::from_str(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Malformed message envelope dropped");
                return None;
            }
        };

        if envelope.name.as_deref() == Some(OCCUPANCY_EVENT_NAME) {
            return Self::parse_occupancy(envelope);
        }

        let payload: Payload = match serde_json::from_str(&envelope.data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(channel = %envelope.channel, error = %e, "Unrecognized notification dropped");
                return None;
            }
        };

        Some(match payload {
            Payload::SplitUpdate { change_number } => Notification::SplitUpdate { change_number },
            Payload::SplitKill { change_number, split_name, default_treatment } => {
                Notification::SplitKill { change_number, split_name, default_treatment }
            }
            Payload::SegmentUpdate { change_number, segment_name } => {
                Notification::SegmentUpdate { change_number, segment_name }
            }
            Payload::Control { control_type } => {
                Notification::Control { channel: envelope.channel, control_type }
            }
        })
    }

    fn parse_occupancy(envelope: Envelope) -> Option<Notification> {
        match serde_json::from_str::<OccupancyData>(&envelope.data) {
            Ok(occupancy) => {
                let channel = envelope
                    .channel
                    .strip_prefix(OCCUPANCY_CHANNEL_PREFIX)
                    .unwrap_or(&envelope.channel)
                    .to_string();
                Some(Notification::Occupancy { channel, publishers: occupancy.metrics.publishers })
            }
            Err(e) => {
                warn!(channel = %envelope.channel, error = %e, "Malformed occupancy dropped");
                None
            }
        }
    }
}
