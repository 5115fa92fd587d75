//! Session Runner
//!
//! Owns the [`Session`] and is the only place it is mutated. Adapter events
//! and front-end commands arrive on two queues and are applied one at a time
//! on a single task.

use crate::domain::adapter::{AdapterEvent, RadioAdapter};
use crate::domain::error::SessionError;
use crate::domain::models::{PeripheralId, SessionEvent};
use crate::domain::session::{Session, SessionEventSink};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Front-end request to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    StartScan,
    SelectPeripheral(PeripheralId),
    ReadCharacteristic(Uuid),
    WriteCharacteristic { characteristic: Uuid, bytes: Vec<u8> },
    MeasureHeartRate,
    Cancel,
    Shutdown,
}

#[derive(Debug, Error)]
#[error("session runner has stopped")]
pub struct RunnerStopped;

/// Cloneable handle for sending commands to a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn send(&self, command: SessionCommand) -> Result<(), RunnerStopped> {
        self.commands.send(command).map_err(|_| RunnerStopped)
    }

    pub fn start_scan(&self) -> Result<(), RunnerStopped> {
        self.send(SessionCommand::StartScan)
    }

    pub fn select_peripheral(&self, id: PeripheralId) -> Result<(), RunnerStopped> {
        self.send(SessionCommand::SelectPeripheral(id))
    }

    pub fn measure_heart_rate(&self) -> Result<(), RunnerStopped> {
        self.send(SessionCommand::MeasureHeartRate)
    }

    pub fn cancel(&self) -> Result<(), RunnerStopped> {
        self.send(SessionCommand::Cancel)
    }

    pub fn shutdown(&self) -> Result<(), RunnerStopped> {
        self.send(SessionCommand::Shutdown)
    }
}

pub struct SessionRunner<A: RadioAdapter, S: SessionEventSink> {
    session: Session<A, S>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    adapter_events: mpsc::UnboundedReceiver<AdapterEvent>,
}

impl<A: RadioAdapter, S: SessionEventSink> SessionRunner<A, S> {
    pub fn new(
        session: Session<A, S>,
        adapter_events: mpsc::UnboundedReceiver<AdapterEvent>,
    ) -> (SessionHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            SessionHandle { commands: tx },
            Self {
                session,
                commands: rx,
                adapter_events,
            },
        )
    }

    /// Process commands and adapter events until shutdown, then hand the
    /// session back
    pub async fn run(mut self) -> Session<A, S> {
        info!("Session runner started");

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
                event = self.adapter_events.recv() => match event {
                    Some(event) => {
                        debug!("Adapter event: {:?}", event);
                        self.session.handle(event);
                    }
                    None => {
                        warn!("Radio adapter event queue closed");
                        break;
                    }
                },
            }
        }

        self.session.shutdown();
        info!("Session runner stopped");
        self.session
    }

    fn apply(&mut self, command: SessionCommand) {
        debug!("Command: {:?}", command);

        let result: Result<(), SessionError> = match &command {
            SessionCommand::StartScan => self.session.start_scan(),
            SessionCommand::SelectPeripheral(id) => self.session.select_peripheral(id),
            SessionCommand::ReadCharacteristic(uuid) => self.session.read_characteristic(uuid),
            SessionCommand::WriteCharacteristic {
                characteristic,
                bytes,
            } => self.session.write_characteristic(characteristic, bytes),
            SessionCommand::MeasureHeartRate => self.session.measure_heart_rate(),
            SessionCommand::Cancel => self.session.cancel(),
            SessionCommand::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            warn!("Rejected {:?}: {}", command, e);
            self.session
                .sink_mut()
                .on_event(SessionEvent::OperationFailed {
                    operation: format!("{:?}", command),
                    error: e.to_string(),
                });
        }
    }
}
