//! Fire-and-forget beacon reporting.
//!
//! A scanning loop observes beacons far more often than the set changes.
//! [`BeaconReporter`] remembers the last set it saw and only talks to the
//! server when the set differs. Reports are sent on a background task;
//! a failed report is logged and dropped, the next change sends the full
//! set again anyway.

use std::sync::{Arc, Mutex, PoisonError};

use geofencing_core::BeaconSet;
use tokio::task::JoinHandle;

use crate::device::DeviceClient;

/// Sends a device's beacon set whenever it changes.
#[derive(Debug)]
pub struct BeaconReporter {
    client: Arc<DeviceClient>,
    last: Mutex<BeaconSet>,
}

impl BeaconReporter {
    /// Creates a reporter that considers the device outside every geofence.
    #[must_use]
    pub fn new(client: Arc<DeviceClient>) -> Self {
        Self {
            client,
            last: Mutex::new(BeaconSet::new()),
        }
    }

    /// Records the current observation.
    ///
    /// Returns the handle of the spawned report, or `None` when the set
    /// equals the previous observation and nothing was sent. Must be called
    /// from within a tokio runtime.
    pub fn observe(&self, beacons: BeaconSet) -> Option<JoinHandle<()>> {
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == beacons {
                return None;
            }
            last.clone_from(&beacons);
        }

        let client = Arc::clone(&self.client);
        Some(tokio::spawn(async move {
            match client.report_beacons(&beacons).await {
                Ok(report) if report.changed => tracing::debug!(
                    device_id = client.device_id(),
                    entered = report.entered.len(),
                    left = report.left.len(),
                    "Beacon report accepted"
                ),
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    device_id = client.device_id(),
                    error = %e,
                    "Beacon report failed"
                ),
            }
        }))
    }
}
