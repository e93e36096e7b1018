//! Occupancy and control-message bookkeeping
//!
//! Turns publisher counts on the control channels and control messages into
//! streaming health statuses for the sync manager.

use std::collections::HashMap;
use std::sync::Arc;

use flagsync_domain::constants::{CONTROL_PRI_CHANNEL, CONTROL_SEC_CHANNEL};
use flagsync_domain::{ControlType, StreamingEvent, StreamingEventKind, StreamingStatus};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::telemetry::TelemetryRuntimeProducer;

/// Values recorded with `StreamingEventKind::StreamingStatus`
mod streaming_status_value {
    pub const ENABLED: i64 = 0;
    pub const PAUSED: i64 = 1;
    pub const DISABLED: i64 = 2;
}

#[derive(Debug, Default)]
struct KeeperState {
    /// Publisher counts per control channel, absent until first reported
    publishers: HashMap<String, i64>,
    paused: bool,
}

impl KeeperState {
    /// Unknown counts are treated as available.
    fn publishers_available(&self) -> bool {
        self.publishers.is_empty() || self.publishers.values().any(|count| *count > 0)
    }
}

/// Tracks control-channel occupancy and streaming control state
pub struct NotificationManagerKeeper {
    state: Mutex<KeeperState>,
    status_tx: UnboundedSender<StreamingStatus>,
    telemetry: Arc<dyn TelemetryRuntimeProducer>,
}

impl NotificationManagerKeeper {
    pub fn new(
        status_tx: UnboundedSender<StreamingStatus>,
        telemetry: Arc<dyn TelemetryRuntimeProducer>,
    ) -> Self {
        Self { state: Mutex::new(KeeperState::default()), status_tx, telemetry }
    }

    /// Forget everything learned on a previous connection.
    pub fn reset(&self) {
        *self.state.lock() = KeeperState::default();
    }

    pub fn handle_occupancy(&self, channel: &str, publishers: i64) {
        let kind = match channel {
            CONTROL_PRI_CHANNEL => StreamingEventKind::OccupancyPri,
            CONTROL_SEC_CHANNEL => StreamingEventKind::OccupancySec,
            other => {
                debug!(channel = other, "Occupancy for non-control channel ignored");
                return;
            }
        };
        self.telemetry.record_streaming_event(StreamingEvent::now(kind, publishers));

        let status = {
            let mut state = self.state.lock();
            let was_available = state.publishers_available();
            state.publishers.insert(channel.to_string(), publishers);
            let available = state.publishers_available();

            match (was_available, available) {
                (true, false) => Some(StreamingStatus::SubsystemDown),
                (false, true) if !state.paused => Some(StreamingStatus::SubsystemReady),
                _ => None,
            }
        };

        debug!(channel, publishers, "Occupancy updated");
        if let Some(status) = status {
            self.publish(status);
        }
    }

    pub fn handle_control(&self, control_type: ControlType) {
        let status = {
            let mut state = self.state.lock();
            match control_type {
                ControlType::StreamingPaused => {
                    state.paused = true;
                    self.record_status(streaming_status_value::PAUSED);
                    Some(StreamingStatus::SubsystemDown)
                }
                ControlType::StreamingResumed => {
                    state.paused = false;
                    self.record_status(streaming_status_value::ENABLED);
                    state.publishers_available().then_some(StreamingStatus::SubsystemReady)
                }
                ControlType::StreamingDisabled => {
                    self.record_status(streaming_status_value::DISABLED);
                    Some(StreamingStatus::SubsystemOff)
                }
            }
        };

        info!(?control_type, "Streaming control message received");
        if let Some(status) = status {
            self.publish(status);
        }
    }

    fn record_status(&self, value: i64) {
        self.telemetry
            .record_streaming_event(StreamingEvent::now(StreamingEventKind::StreamingStatus, value));
    }

    fn publish(&self, status: StreamingStatus) {
        if self.status_tx.send(status).is_err() {
            warn!(?status, "Status receiver dropped");
        }
    }
}
