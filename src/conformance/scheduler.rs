//! Runs scripts in order against one beacon

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};
use uuid::Uuid;

use super::interpreter::{DeviceChoice, Interpreter};
use super::observer::RunObserver;
use super::script::Script;
use super::session::{Session, SessionReport};
use crate::ble::bridge::{CommandBridge, ConnectionHandle};
use crate::ble::transport::{BeaconDevice, GattTransport};
use crate::config::ValidatorConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("No script at index {index}; the last run had {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub reports: Vec<SessionReport>,
    pub any_failed: bool,
    pub stopped: bool,
}

/// Remote control for a running [`Scheduler`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    stop: Arc<watch::Sender<bool>>,
    choices: mpsc::UnboundedSender<DeviceChoice>,
}

impl SchedulerHandle {
    /// Stop the active session. Later sessions of the run never start.
    pub fn stop(&self) {
        log::info!("Stop requested");
        self.stop.send_replace(true);
    }

    /// Pick candidate `index` of a pending device choice. Out-of-range
    /// indices are ignored.
    pub fn choose_device(&self, index: usize) {
        let _ = self.choices.send(DeviceChoice::Select(index));
    }

    /// Decline to choose. Ends the run like [`stop`](Self::stop).
    pub fn cancel_device_choice(&self) {
        let _ = self.choices.send(DeviceChoice::Cancel);
        self.stop();
    }
}

/// Owns the bridge and runs sessions one after another, handing the
/// device and open link from each session to the next.
pub struct Scheduler {
    bridge: CommandBridge,
    observer: Arc<dyn RunObserver>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    choices_tx: mpsc::UnboundedSender<DeviceChoice>,
    choices_rx: mpsc::UnboundedReceiver<DeviceChoice>,
    scripts: Vec<Script>,
    device: Option<BeaconDevice>,
}

impl Scheduler {
    pub fn new(
        transport: Arc<dyn GattTransport>,
        service: Uuid,
        config: ValidatorConfig,
        observer: Arc<dyn RunObserver>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (choices_tx, choices_rx) = mpsc::unbounded_channel();
        Self {
            bridge: CommandBridge::new(transport, service, config),
            observer,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            choices_tx,
            choices_rx,
            scripts: Vec::new(),
            device: None,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            stop: self.stop_tx.clone(),
            choices: self.choices_tx.clone(),
        }
    }

    /// The device the last session ended with.
    pub fn device(&self) -> Option<&BeaconDevice> {
        self.device.as_ref()
    }

    /// Scripts of the most recent run, in order.
    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    /// Run `scripts` in order. A failed session does not end the run; a
    /// stop does.
    pub async fn run(&mut self, scripts: Vec<Script>) -> RunSummary {
        self.stop_tx.send_replace(false);
        self.scripts = scripts;
        self.device = None;

        let mut reports = Vec::with_capacity(self.scripts.len());
        let mut connection: Option<ConnectionHandle> = None;
        let mut stopped = false;

        for index in 0..self.scripts.len() {
            if *self.stop_rx.borrow() {
                stopped = true;
                break;
            }
            if index > 0 && connection.is_none() {
                let settle = self.bridge.config().session_settle();
                log::debug!("No open link, waiting {:?} before the next session", settle);
                sleep(settle).await;
            }

            let (report, carried) = self.run_session(index, connection).await;
            connection = carried;
            stopped = report.stopped;
            reports.push(report);
            if stopped {
                break;
            }
        }

        self.bridge.disconnect();
        let any_failed = reports.iter().any(|r| r.failed);
        self.observer.on_all_completed(any_failed);
        RunSummary {
            reports,
            any_failed,
            stopped,
        }
    }

    /// Run the script at `index` of the last run again in a fresh
    /// session. The last device is reused, the open link is not.
    pub async fn restart(&mut self, index: usize) -> Result<SessionReport, SchedulerError> {
        let len = self.scripts.len();
        if index >= len {
            return Err(SchedulerError::IndexOutOfRange { index, len });
        }
        self.stop_tx.send_replace(false);
        self.bridge.disconnect();
        if let Some(at) = self.bridge.disconnected_at() {
            let ready = at + self.bridge.config().reconnect_settle();
            if ready > Instant::now() {
                log::debug!("Waiting for the last link to settle before restarting");
                sleep_until(ready).await;
            }
        }

        let (report, _) = self.run_session(index, None).await;
        self.bridge.disconnect();
        Ok(report)
    }

    async fn run_session(
        &mut self,
        index: usize,
        connection: Option<ConnectionHandle>,
    ) -> (SessionReport, Option<ConnectionHandle>) {
        let script = &self.scripts[index];
        let mut session = Session::new(script, self.device.clone(), connection);

        let mut interpreter = Interpreter {
            bridge: &mut self.bridge,
            observer: self.observer.as_ref(),
            stop: &mut self.stop_rx,
            choices: &mut self.choices_rx,
            index,
        };
        interpreter.run(script, &mut session).await;

        let report = session.report(script);
        self.observer.on_session_completed(index, &report);
        if session.device().is_some() {
            self.device = session.device().cloned();
        }
        (report, session.connection())
    }
}
