//! Event loop driving a lock session.
//!
//! The driver is the single consumer of transport events: it feeds
//! them to the state machine in arrival order, arms the connect timer
//! whenever the session enters `Connecting`, and synthesizes the
//! `ConnectTimeout` event on expiry. Caller intents arrive on a command
//! channel so that no two tasks ever mutate the session concurrently.

use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::audit::AuditSink;
use crate::backend::{KeyService, LockStore};
use crate::errors::CoreError;
use crate::session::{ConnectionState, LockSession};
use crate::transport::{LinkEvent, LockTransport};

/// Caller intents accepted by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCommand {
    Connect,
    Lock,
    Unlock,
    Close,
}

/// Handle for submitting commands to a running driver.
#[derive(Clone)]
pub struct DriverHandle {
    commands: mpsc::Sender<DriverCommand>,
}

impl DriverHandle {
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.send(DriverCommand::Connect).await
    }

    pub async fn lock(&self) -> Result<(), CoreError> {
        self.send(DriverCommand::Lock).await
    }

    pub async fn unlock(&self) -> Result<(), CoreError> {
        self.send(DriverCommand::Unlock).await
    }

    /// Ask the driver to close the session and exit its loop.
    pub async fn close(&self) -> Result<(), CoreError> {
        self.send(DriverCommand::Close).await
    }

    async fn send(&self, command: DriverCommand) -> Result<(), CoreError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CoreError::Closed)
    }
}

/// Owns a session and its event stream.
pub struct LockDriver<T, K, S, A>
where
    T: LockTransport,
    K: KeyService,
    S: LockStore,
    A: AuditSink,
{
    session: LockSession<T, K, S, A>,
    events: mpsc::Receiver<LinkEvent>,
    commands: mpsc::Receiver<DriverCommand>,
}

impl<T, K, S, A> LockDriver<T, K, S, A>
where
    T: LockTransport,
    K: KeyService,
    S: LockStore,
    A: AuditSink,
{
    pub fn new(
        session: LockSession<T, K, S, A>,
        events: mpsc::Receiver<LinkEvent>,
    ) -> (Self, DriverHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        (
            Self {
                session,
                events,
                commands: command_rx,
            },
            DriverHandle {
                commands: command_tx,
            },
        )
    }

    /// Run until the session is closed or the transport event channel
    /// ends. Command errors (for example a lock request while not
    /// ready) are logged, not fatal to the loop.
    pub async fn run(mut self) -> Result<(), CoreError> {
        let connect_timeout = self.session.config().connect_timeout;
        let timer = sleep(connect_timeout);
        tokio::pin!(timer);
        let mut timer_armed = false;

        loop {
            let connecting = matches!(self.session.state(), ConnectionState::Connecting);
            if connecting && !timer_armed {
                timer.as_mut().reset(Instant::now() + connect_timeout);
                timer_armed = true;
            } else if !connecting {
                timer_armed = false;
            }

            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.session.handle_event(event).await {
                            warn!(error = %e, "event handling failed");
                        }
                    }
                    None => {
                        debug!("transport event channel closed, shutting down");
                        self.session.close().await;
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(DriverCommand::Connect) => {
                        if let Err(e) = self.session.connect().await {
                            warn!(error = %e, "connect command rejected");
                        }
                    }
                    Some(DriverCommand::Lock) => {
                        if let Err(e) = self.session.lock().await {
                            warn!(error = %e, "lock command rejected");
                        }
                    }
                    Some(DriverCommand::Unlock) => {
                        if let Err(e) = self.session.unlock().await {
                            warn!(error = %e, "unlock command rejected");
                        }
                    }
                    Some(DriverCommand::Close) | None => {
                        self.session.close().await;
                        break;
                    }
                },
                () = &mut timer, if timer_armed => {
                    timer_armed = false;
                    if let Err(e) = self.session.handle_event(LinkEvent::ConnectTimeout).await {
                        warn!(error = %e, "connect timeout handling failed");
                    }
                }
            }
        }
        Ok(())
    }
}
