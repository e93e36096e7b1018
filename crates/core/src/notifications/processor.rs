//! Routes parsed notifications to the workers or the keeper

use std::sync::Arc;

use flagsync_domain::Notification;
use tracing::{debug, warn};

use super::keeper::NotificationManagerKeeper;
use crate::workers::{SegmentsWorker, SplitsWorker};

/// Dispatches stream notifications; never blocks the stream reader.
pub struct NotificationProcessor {
    splits_worker: Arc<SplitsWorker>,
    segments_worker: Arc<SegmentsWorker>,
    keeper: Arc<NotificationManagerKeeper>,
}

impl NotificationProcessor {
    pub fn new(
        splits_worker: Arc<SplitsWorker>,
        segments_worker: Arc<SegmentsWorker>,
        keeper: Arc<NotificationManagerKeeper>,
    ) -> Self {
        Self { splits_worker, segments_worker, keeper }
    }

    pub fn process(&self, notification: Notification) {
        debug!(kind = notification.kind(), "Processing notification");
        match notification {
            Notification::SplitUpdate { change_number } => {
                self.splits_worker.add_to_queue(change_number);
            }
            Notification::SplitKill { change_number, split_name, default_treatment } => {
                self.splits_worker.kill_split(change_number, &split_name, &default_treatment);
            }
            Notification::SegmentUpdate { change_number, segment_name } => {
                self.segments_worker.add_to_queue(change_number, &segment_name);
            }
            Notification::Control { control_type, .. } => {
                self.keeper.handle_control(control_type);
            }
            Notification::Occupancy { channel, publishers } => {
                self.keeper.handle_occupancy(&channel, publishers);
            }
            // The transport turns stream errors into connection actions.
            Notification::Error(error) => {
                warn!(code = error.code, message = %error.message, "Stream error notification");
            }
        }
    }
}
