//! Walks one script against one beacon

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use uuid::Uuid;

use super::action::{Action, AdvertisementField};
use super::observer::RunObserver;
use super::script::Script;
use super::session::{Session, SessionState};
use super::ConformanceError;
use crate::ble::advertisement::check_advertisement;
use crate::ble::bridge::{Command, CommandBridge, CommandResult};
use crate::ble::transport::{BeaconDevice, GattStatus, ScanFilter};

/// Answer to a pending device choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeviceChoice {
    Select(usize),
    Cancel,
}

/// What the dispatch of one action asks the run loop to do next.
#[derive(Debug)]
enum Step {
    Advance,
    Fail(ConformanceError),
    WaitForChoice(Vec<BeaconDevice>),
    Finished,
}

enum ChoiceWake {
    Choice(Option<DeviceChoice>),
    StopChanged(bool),
}

pub(crate) struct Interpreter<'a> {
    pub bridge: &'a mut CommandBridge,
    pub observer: &'a dyn RunObserver,
    pub stop: &'a mut watch::Receiver<bool>,
    pub choices: &'a mut mpsc::UnboundedReceiver<DeviceChoice>,
    /// Position of the session in the run, for the observer.
    pub index: usize,
}

impl<'a> Interpreter<'a> {
    /// Drive `session` until it completes, fails or is stopped.
    pub async fn run(&mut self, script: &Script, session: &mut Session) {
        session.start();
        self.observer.on_session_started(self.index, script.name());

        while !session.is_finished() {
            if self.stop_requested() {
                self.unwind(session, ConformanceError::Stopped);
                break;
            }

            let cursor = session.cursor;
            let Some(action) = script.steps().get(cursor) else {
                // Scripts always close with a terminal, so this only
                // guards against a session built for another script.
                session.finish(SessionState::Completed);
                break;
            };
            session.state = SessionState::Dispatching(cursor);
            log::debug!("[{}] {} #{}: {}", self.index, script.name(), cursor, action);

            let step = self.dispatch(action, session).await;
            self.sync_connection(session);

            match step {
                Step::Advance => {
                    session.advance();
                    self.observer.on_action_completed(self.index, cursor, false);
                }
                Step::Finished => {
                    session.advance();
                    session.finish(SessionState::Completed);
                }
                Step::Fail(error) => {
                    log::warn!("[{}] {} failed at #{}: {}", self.index, script.name(), cursor, error);
                    session.fail(error);
                    self.observer.on_action_completed(self.index, cursor, true);
                }
                Step::WaitForChoice(candidates) => {
                    session.state = SessionState::WaitingForDeviceChoice;
                    match self.wait_for_choice(&candidates).await {
                        // Dispatch the same action again, now with a pinned device.
                        Some(device) => session.device = Some(device),
                        None => {
                            let error = ConformanceError::AmbiguousCandidates(candidates.len());
                            self.unwind(session, error);
                            self.observer.on_action_completed(self.index, cursor, true);
                        }
                    }
                }
            }
        }
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// End the session as stopped, dropping any open link.
    fn unwind(&mut self, session: &mut Session, error: ConformanceError) {
        if session.connection.take().is_some() {
            self.bridge.disconnect();
        }
        session.stopped = true;
        session.fail(error);
        session.state = SessionState::Stopped;
    }

    /// Forget a handle the bridge no longer honors.
    fn sync_connection(&self, session: &mut Session) {
        if let Some(handle) = session.connection {
            if !self.bridge.is_open(handle) {
                log::debug!("Link to {:?} is gone", session.device);
                session.connection = None;
            }
        }
    }

    fn is_connected(&self, session: &Session) -> bool {
        session
            .connection
            .map_or(false, |handle| self.bridge.is_open(handle))
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    async fn dispatch(&mut self, action: &Action, session: &mut Session) -> Step {
        match action {
            Action::Terminal => return Step::Finished,
            Action::Connect => {
                if self.is_connected(session) {
                    log::debug!("Already connected, reusing the link");
                    return Step::Advance;
                }
                return match self.establish(session).await {
                    Ok(()) => Step::Advance,
                    Err(step) => step,
                };
            }
            Action::ObserveAdvertisement {
                service,
                field,
                expected_value,
            } => {
                return self
                    .observe(session, *service, *field, expected_value.as_deref())
                    .await;
            }
            _ => {}
        }

        if action.requires_connection() && !self.is_connected(session) {
            log::debug!("No open link, connecting before {}", action.kind());
            if let Err(step) = self.establish(session).await {
                return step;
            }
        }

        match action {
            Action::Disconnect => {
                self.bridge.disconnect();
                session.connection = None;
                session.just_disconnected = true;
                Step::Advance
            }
            Action::Write {
                characteristic,
                value,
                expected_status,
            } => match self.write(*characteristic, value).await {
                Ok(result) => expect_status(&[*expected_status], result.status),
                Err(step) => step,
            },
            Action::WriteMulti {
                characteristic,
                value,
                expected_statuses,
            } => match self.write(*characteristic, value).await {
                Ok(result) => expect_status(expected_statuses, result.status),
                Err(step) => step,
            },
            Action::Assert {
                characteristic,
                expected_value,
                expected_status,
            } => {
                let result = match self.read(*characteristic).await {
                    Ok(result) => result,
                    Err(step) => return step,
                };
                if result.status != *expected_status {
                    return expect_status(&[*expected_status], result.status);
                }
                if result.value != *expected_value {
                    return Step::Fail(ConformanceError::UnexpectedPayload {
                        expected: hex::encode(expected_value),
                        actual: hex::encode(&result.value),
                    });
                }
                Step::Advance
            }
            Action::AssertNot {
                characteristic,
                forbidden_value,
                expected_status,
            } => {
                let result = match self.read(*characteristic).await {
                    Ok(result) => result,
                    Err(step) => return step,
                };
                if result.status != *expected_status {
                    return expect_status(&[*expected_status], result.status);
                }
                if result.value == *forbidden_value {
                    return Step::Fail(ConformanceError::ForbiddenPayload(hex::encode(
                        forbidden_value,
                    )));
                }
                Step::Advance
            }
            Action::PollUntilValid {
                characteristic,
                validity,
                expected_status,
            } => {
                let polled = self
                    .bridge
                    .poll_until_valid(*characteristic, |value| validity.is_valid(value))
                    .await;
                match polled {
                    Ok(result) => expect_status(&[*expected_status], result.status),
                    Err(e) => Step::Fail(e.into()),
                }
            }
            Action::Connect | Action::ObserveAdvertisement { .. } | Action::Terminal => {
                Step::Advance
            }
        }
    }

    async fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<CommandResult, Step> {
        self.bridge
            .execute(Command::write(characteristic, value))
            .await
            .map_err(|e| Step::Fail(e.into()))
    }

    async fn read(&mut self, characteristic: Uuid) -> Result<CommandResult, Step> {
        self.bridge
            .execute(Command::read(characteristic))
            .await
            .map_err(|e| Step::Fail(e.into()))
    }

    // ------------------------------------------------------------------
    // Connecting
    // ------------------------------------------------------------------

    /// Open a link to the session's device, finding one first if needed.
    ///
    /// Several candidates come back as `Err(Step::WaitForChoice)`; the
    /// action is dispatched again once a device is chosen.
    async fn establish(&mut self, session: &mut Session) -> Result<(), Step> {
        if session.just_disconnected {
            session.just_disconnected = false;
            let settle = self.bridge.config().reconnect_settle();
            log::debug!("Waiting {:?} before reconnecting", settle);
            sleep(settle).await;
        }
        self.observer.on_waiting_for_device(self.index);

        let device = match session.device.clone() {
            Some(device) => device,
            None => {
                let filter = ScanFilter::service(self.bridge.service());
                let window = self.bridge.config().scan_window();
                let mut records = self
                    .bridge
                    .scan(filter, window)
                    .await
                    .map_err(|e| Step::Fail(e.into()))?;
                match records.len() {
                    0 => {
                        return Err(Step::Fail(ConformanceError::NoCandidateFound(
                            "no beacon in config mode".to_string(),
                        )))
                    }
                    1 => records.remove(0).device,
                    _ => {
                        return Err(Step::WaitForChoice(
                            records.into_iter().map(|r| r.device).collect(),
                        ))
                    }
                }
            }
        };

        session.state = SessionState::Connecting;
        self.bridge
            .open_link(&device)
            .await
            .map_err(|e| Step::Fail(e.into()))?;
        session.state = SessionState::DiscoveringServices;
        let handle = self.bridge.connection();
        self.bridge
            .discover_services()
            .await
            .map_err(|e| Step::Fail(e.into()))?;

        session.connection = handle;
        self.observer.on_connected(self.index, &device);
        session.device = Some(device);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Advertisements
    // ------------------------------------------------------------------

    async fn observe(
        &mut self,
        session: &mut Session,
        service: Uuid,
        field: AdvertisementField,
        expected: Option<&[u8]>,
    ) -> Step {
        let window = self.bridge.config().scan_window();
        let records = match self.bridge.scan(ScanFilter::service(service), window).await {
            Ok(records) => records,
            Err(e) => return Step::Fail(e.into()),
        };

        let record = match session.device.clone() {
            Some(device) => match records.iter().find(|r| r.device.address == device.address) {
                Some(record) => record,
                None => {
                    return Step::Fail(ConformanceError::NoCandidateFound(format!(
                        "no advertisement from {}",
                        device
                    )))
                }
            },
            None => match records.len() {
                0 => {
                    return Step::Fail(ConformanceError::NoCandidateFound(format!(
                        "no advertisement for {}",
                        service
                    )))
                }
                1 => {
                    session.device = Some(records[0].device.clone());
                    &records[0]
                }
                _ => return Step::WaitForChoice(records.into_iter().map(|r| r.device).collect()),
            },
        };

        match check_advertisement(record, &service, field, expected) {
            Ok(()) => Step::Advance,
            Err(e) => Step::Fail(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Device choice
    // ------------------------------------------------------------------

    /// Wait until one of `candidates` is chosen. `None` on cancel or stop.
    async fn wait_for_choice(&mut self, candidates: &[BeaconDevice]) -> Option<BeaconDevice> {
        while let Ok(stale) = self.choices.try_recv() {
            log::debug!("Ignoring device choice made while none was pending: {:?}", stale);
        }
        self.observer.on_device_ambiguous(self.index, candidates);

        loop {
            if self.stop_requested() {
                return None;
            }
            let wake = tokio::select! {
                choice = self.choices.recv() => ChoiceWake::Choice(choice),
                changed = self.stop.changed() => ChoiceWake::StopChanged(changed.is_ok()),
            };
            match wake {
                ChoiceWake::Choice(Some(DeviceChoice::Select(index))) => match candidates.get(index) {
                    Some(device) => {
                        log::info!("[{}] using {}", self.index, device);
                        return Some(device.clone());
                    }
                    None => log::warn!(
                        "Ignoring device choice {}; only {} candidates",
                        index,
                        candidates.len()
                    ),
                },
                ChoiceWake::Choice(Some(DeviceChoice::Cancel)) | ChoiceWake::Choice(None) => {
                    return None
                }
                ChoiceWake::StopChanged(true) => {}
                // The handle side is gone; nobody can choose any more.
                ChoiceWake::StopChanged(false) => return None,
            }
        }
    }
}

fn expect_status(expected: &[GattStatus], actual: GattStatus) -> Step {
    if expected.contains(&actual) {
        Step::Advance
    } else {
        Step::Fail(ConformanceError::UnexpectedStatus {
            expected: expected.to_vec(),
            actual,
        })
    }
}
