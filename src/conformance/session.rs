//! Live state of one script run and its outcome record

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::script::Script;
use super::ConformanceError;
use crate::ble::bridge::ConnectionHandle;
use crate::ble::transport::BeaconDevice;

/// Where the interpreter is within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "index", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    DiscoveringServices,
    Dispatching(usize),
    WaitingForDeviceChoice,
    Completed,
    Failed,
    Stopped,
}

/// Result of executing the action at one index. Written once per run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionOutcome {
    pub executed: bool,
    pub failed: bool,
    pub reason: Option<String>,
    #[serde(skip)]
    pub error: Option<ConformanceError>,
}

/// Runtime state of one script execution.
#[derive(Debug)]
pub struct Session {
    pub(crate) cursor: usize,
    pub(crate) outcomes: Vec<ActionOutcome>,
    pub(crate) state: SessionState,
    pub(crate) started: bool,
    pub(crate) finished: bool,
    pub(crate) failed: bool,
    pub(crate) stopped: bool,
    pub(crate) device: Option<BeaconDevice>,
    pub(crate) connection: Option<ConnectionHandle>,
    /// Set by a disconnect; the next connect waits out the reconnect settle.
    pub(crate) just_disconnected: bool,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl Session {
    /// A fresh session, optionally inheriting a device and open link.
    pub fn new(
        script: &Script,
        device: Option<BeaconDevice>,
        connection: Option<ConnectionHandle>,
    ) -> Self {
        Self {
            cursor: 0,
            outcomes: vec![ActionOutcome::default(); script.steps().len()],
            state: SessionState::Idle,
            started: false,
            finished: false,
            failed: false,
            stopped: false,
            device,
            connection,
            just_disconnected: false,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn device(&self) -> Option<&BeaconDevice> {
        self.device.as_ref()
    }

    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.connection
    }

    pub fn outcomes(&self) -> &[ActionOutcome] {
        &self.outcomes
    }

    pub(crate) fn start(&mut self) {
        self.started = true;
        self.started_at = Some(Utc::now());
    }

    /// Record success of the action at the cursor and move past it.
    pub(crate) fn advance(&mut self) {
        if let Some(outcome) = self.outcomes.get_mut(self.cursor) {
            outcome.executed = true;
        }
        self.cursor += 1;
    }

    /// Mark the action at the cursor and the session failed.
    pub(crate) fn fail(&mut self, error: ConformanceError) {
        if let Some(outcome) = self.outcomes.get_mut(self.cursor) {
            outcome.executed = true;
            outcome.failed = true;
            outcome.reason = Some(error.to_string());
            outcome.error = Some(error);
        }
        self.failed = true;
        self.finish(SessionState::Failed);
    }

    pub(crate) fn finish(&mut self, state: SessionState) {
        self.state = state;
        self.finished = true;
        self.finished_at = Some(Utc::now());
    }

    /// The error that ended the session, if one did.
    pub fn failure(&self) -> Option<(usize, &ConformanceError)> {
        self.outcomes
            .iter()
            .enumerate()
            .find_map(|(index, outcome)| outcome.error.as_ref().map(|e| (index, e)))
    }

    pub fn report(&self, script: &Script) -> SessionReport {
        let steps = script
            .steps()
            .iter()
            .zip(&self.outcomes)
            .filter(|(action, _)| !action.is_terminal())
            .map(|(action, outcome)| StepReport {
                description: action.to_string(),
                kind: action.kind(),
                outcome: outcome.clone(),
            })
            .collect();

        let failure = self.failure().map(|(index, error)| FailureSummary {
            index,
            kind: script.steps()[index].kind(),
            reason: error.to_string(),
        });

        SessionReport {
            name: script.name().to_string(),
            reference: script.reference().to_string(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            failed: self.failed,
            stopped: self.stopped,
            failure,
            steps,
        }
    }
}

/// One action of a finished session, for display.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub description: String,
    pub kind: &'static str,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub index: usize,
    pub kind: &'static str,
    pub reason: String,
}

/// Outcome of one session, suitable for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub name: String,
    pub reference: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed: bool,
    pub stopped: bool,
    pub failure: Option<FailureSummary>,
    pub steps: Vec<StepReport>,
}
