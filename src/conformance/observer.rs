//! Progress notifications for whatever presents a run

use tokio::sync::mpsc;

use super::session::SessionReport;
use crate::ble::transport::BeaconDevice;

/// Receives run progress. Every method defaults to doing nothing.
pub trait RunObserver: Send + Sync {
    fn on_session_started(&self, _index: usize, _name: &str) {}

    fn on_action_completed(&self, _index: usize, _action: usize, _failed: bool) {}

    /// The session is about to look for or connect to a beacon.
    fn on_waiting_for_device(&self, _index: usize) {}

    fn on_connected(&self, _index: usize, _device: &BeaconDevice) {}

    /// Several beacons matched; the run waits for
    /// [`SchedulerHandle::choose_device`](super::SchedulerHandle::choose_device).
    fn on_device_ambiguous(&self, _index: usize, _candidates: &[BeaconDevice]) {}

    fn on_session_completed(&self, _index: usize, _report: &SessionReport) {}

    fn on_all_completed(&self, _any_failed: bool) {}
}

/// Mirrors every notification into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn on_session_started(&self, index: usize, name: &str) {
        log::info!("[{}] {} started", index, name);
    }

    fn on_action_completed(&self, index: usize, action: usize, failed: bool) {
        log::debug!("[{}] action {} {}", index, action, if failed { "failed" } else { "passed" });
    }

    fn on_waiting_for_device(&self, index: usize) {
        log::info!("[{}] waiting for a beacon in config mode", index);
    }

    fn on_connected(&self, index: usize, device: &BeaconDevice) {
        log::info!("[{}] connected to {}", index, device);
    }

    fn on_device_ambiguous(&self, index: usize, candidates: &[BeaconDevice]) {
        log::warn!("[{}] {} beacons found, waiting for a choice", index, candidates.len());
    }

    fn on_session_completed(&self, index: usize, report: &SessionReport) {
        match &report.failure {
            Some(failure) => log::warn!(
                "[{}] {} FAILED at step {} ({}): {}",
                index,
                report.name,
                failure.index + 1,
                failure.kind,
                failure.reason
            ),
            None => log::info!("[{}] {} passed", index, report.name),
        }
    }

    fn on_all_completed(&self, any_failed: bool) {
        log::info!("All sessions completed; any failed: {}", any_failed);
    }
}

/// Notification as plain data, for observers that live on another task.
#[derive(Debug, Clone)]
pub enum RunEvent {
    SessionStarted { index: usize, name: String },
    ActionCompleted { index: usize, action: usize, failed: bool },
    WaitingForDevice { index: usize },
    Connected { index: usize, device: BeaconDevice },
    DeviceAmbiguous { index: usize, candidates: Vec<BeaconDevice> },
    SessionCompleted { index: usize, report: SessionReport },
    AllCompleted { any_failed: bool },
}

/// Forwards notifications into a channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: RunEvent) {
        // The receiver going away just means nobody is watching.
        let _ = self.tx.send(event);
    }
}

impl RunObserver for ChannelObserver {
    fn on_session_started(&self, index: usize, name: &str) {
        self.send(RunEvent::SessionStarted {
            index,
            name: name.to_string(),
        });
    }

    fn on_action_completed(&self, index: usize, action: usize, failed: bool) {
        self.send(RunEvent::ActionCompleted {
            index,
            action,
            failed,
        });
    }

    fn on_waiting_for_device(&self, index: usize) {
        self.send(RunEvent::WaitingForDevice { index });
    }

    fn on_connected(&self, index: usize, device: &BeaconDevice) {
        self.send(RunEvent::Connected {
            index,
            device: device.clone(),
        });
    }

    fn on_device_ambiguous(&self, index: usize, candidates: &[BeaconDevice]) {
        self.send(RunEvent::DeviceAmbiguous {
            index,
            candidates: candidates.to_vec(),
        });
    }

    fn on_session_completed(&self, index: usize, report: &SessionReport) {
        self.send(RunEvent::SessionCompleted {
            index,
            report: report.clone(),
        });
    }

    fn on_all_completed(&self, any_failed: bool) {
        self.send(RunEvent::AllCompleted { any_failed });
    }
}
