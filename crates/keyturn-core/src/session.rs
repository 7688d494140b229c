//! Lock session state machine.
//!
//! A `LockSession` sequences connection, service discovery,
//! notification subscription, session-key retrieval, ticket delivery,
//! and encrypted command dispatch against one lock. It owns its
//! `CryptoSession` and `FrameReassembler` outright; nothing about the
//! secure channel is shared between sessions, so two locks can be
//! operated concurrently without interference.
//!
//! All protocol events arrive as [`LinkEvent`]s and must be fed to
//! [`LockSession::handle_event`] in arrival order by a single caller;
//! the driver module provides that loop. Outcomes the caller cares
//! about are emitted as [`SessionNotice`]s on an unbounded channel.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use keyturn_crypto::{CryptoError, CryptoSession, NONCE_LEN};

use crate::audit::{now_unix, AuditEvent, AuditSink};
use crate::backend::{KeyService, LockId, LockStore, SessionKeyMaterial};
use crate::codes::{CommandIntent, ResponseCode};
use crate::config::SessionConfig;
use crate::errors::{CoreError, ProtocolError, SessionFailure};
use crate::frame::{Frame, FrameReassembler};
use crate::transport::{LinkEvent, LockTransport, ServiceId};

/// State of the lock session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none in progress
    Disconnected,
    /// Transport connection opening; connect timer running
    Connecting,
    /// Link up, enumerating services
    Discovering,
    /// Lock service found, enabling remote notifications
    SubscribingNotifications,
    /// Requesting session key and ticket from the backend
    AwaitingSessionKey,
    /// Key installed, ticket sent, awaiting the lock's acknowledgment
    SendingTicket,
    /// Secure channel up; lock/unlock commands accepted
    Ready,
    /// Command sent, awaiting the authenticated response
    Busy {
        /// What the caller asked for
        intent: CommandIntent,
    },
    /// Terminal failure; the caller must restart the flow
    Error(SessionFailure),
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Discovering => "Discovering",
            ConnectionState::SubscribingNotifications => "SubscribingNotifications",
            ConnectionState::AwaitingSessionKey => "AwaitingSessionKey",
            ConnectionState::SendingTicket => "SendingTicket",
            ConnectionState::Ready => "Ready",
            ConnectionState::Busy { .. } => "Busy",
            ConnectionState::Error(_) => "Error",
        }
    }
}

/// Notices delivered to the caller as the session progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Connection attempt started or restarted
    Connecting,
    /// Secure channel established; controls may be enabled
    Ready,
    /// The lock acknowledged the ticket but reports low battery
    LowBattery,
    /// The lock reports the bolt engaged
    Locked,
    /// The lock reports the bolt released
    Unlocked,
    /// Network or radio went away while a session was active
    ConnectivityLost,
    /// Connectivity returned; a reconnect is attempted automatically
    ConnectivityRestored,
    /// The session failed; see the failure for whether a plain retry
    /// is appropriate
    Failed(SessionFailure),
}

/// State machine for one lock-operation context.
pub struct LockSession<T, K, S, A>
where
    T: LockTransport,
    K: KeyService,
    S: LockStore,
    A: AuditSink,
{
    lock_id: LockId,
    state: ConnectionState,
    crypto: CryptoSession,
    reassembler: FrameReassembler,
    transport: Arc<T>,
    keys: Arc<K>,
    store: Arc<S>,
    audit: Arc<A>,
    config: SessionConfig,
    notices: mpsc::UnboundedSender<SessionNotice>,
    radio_up: bool,
    network_up: bool,
    auto_reconnect: bool,
    closed: bool,
}

impl<T, K, S, A> LockSession<T, K, S, A>
where
    T: LockTransport,
    K: KeyService,
    S: LockStore,
    A: AuditSink,
{
    /// Create a session for one lock. The returned receiver yields the
    /// notice stream; dropping it is allowed.
    pub fn new(
        lock_id: LockId,
        transport: Arc<T>,
        keys: Arc<K>,
        store: Arc<S>,
        audit: Arc<A>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionNotice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let session = Self {
            lock_id,
            state: ConnectionState::Disconnected,
            crypto: CryptoSession::new(),
            reassembler: FrameReassembler::new(),
            transport,
            keys,
            store,
            audit,
            config,
            notices,
            radio_up: true,
            network_up: true,
            auto_reconnect: false,
            closed: false,
        };
        (session, notice_rx)
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn lock_id(&self) -> &LockId {
        &self.lock_id
    }

    /// Request a connection to the lock. If connectivity is currently
    /// missing the attempt is deferred until it returns.
    pub async fn connect(&mut self) -> Result<(), CoreError> {
        if self.closed {
            return Err(CoreError::Closed);
        }
        if self.state != ConnectionState::Disconnected {
            return Err(CoreError::InvalidState(format!(
                "cannot connect in state {}",
                self.state.name()
            )));
        }
        self.auto_reconnect = true;
        if !self.connectivity_ok() {
            debug!(lock = %self.lock_id, "connect deferred until connectivity returns");
            return Ok(());
        }
        self.begin_connecting().await
    }

    /// Engage the bolt.
    pub async fn lock(&mut self) -> Result<(), CoreError> {
        self.dispatch(CommandIntent::Lock).await
    }

    /// Release the bolt.
    pub async fn unlock(&mut self) -> Result<(), CoreError> {
        self.dispatch(CommandIntent::Unlock).await
    }

    /// Tear the session down: release the transport handle and stop
    /// accepting events. Idempotent; after this returns no pending
    /// callback can touch the session.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.auto_reconnect = false;
        let _ = self.transport.disconnect().await;
        self.crypto = CryptoSession::new();
        self.reassembler.reset();
        self.state = ConnectionState::Disconnected;
        debug!(lock = %self.lock_id, "session closed");
    }

    /// Consume one protocol event. Events must arrive in order from a
    /// single caller; this is the only place session state mutates in
    /// response to the outside world.
    pub async fn handle_event(&mut self, event: LinkEvent) -> Result<(), CoreError> {
        if self.closed {
            debug!(lock = %self.lock_id, "dropping event after close");
            return Ok(());
        }
        debug!(lock = %self.lock_id, state = self.state.name(), event = ?event, "link event");
        match event {
            LinkEvent::Connected => self.on_connected().await,
            LinkEvent::Disconnected => self.on_link_lost().await,
            LinkEvent::ServicesDiscovered(services) => self.on_services_discovered(services).await,
            LinkEvent::NotificationsSubscribed => self.on_subscribed().await,
            LinkEvent::Notification(chunk) => self.on_notification(&chunk).await,
            LinkEvent::ConnectTimeout => self.on_connect_timeout().await,
            LinkEvent::RadioAvailability(up) => self.on_radio_availability(up).await,
            LinkEvent::NetworkAvailability(up) => self.on_network_availability(up).await,
        }
    }

    // ------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------

    async fn on_connected(&mut self) -> Result<(), CoreError> {
        if self.state != ConnectionState::Connecting {
            // A connection callback after timeout or cancel; the
            // transport handle was already released.
            debug!(lock = %self.lock_id, state = self.state.name(), "ignoring late connection callback");
            return Ok(());
        }
        self.state = ConnectionState::Discovering;
        if let Err(e) = self.transport.discover_services().await {
            warn!(lock = %self.lock_id, error = %e, "service discovery request failed");
            return self.on_link_lost().await;
        }
        Ok(())
    }

    async fn on_services_discovered(&mut self, services: Vec<ServiceId>) -> Result<(), CoreError> {
        if self.state != ConnectionState::Discovering {
            debug!(lock = %self.lock_id, state = self.state.name(), "ignoring service discovery result");
            return Ok(());
        }
        if !services.contains(&self.config.service) {
            warn!(lock = %self.lock_id, service = %self.config.service, "device does not expose the lock service");
            self.fail(SessionFailure::ServiceMissing).await;
            return Ok(());
        }
        self.state = ConnectionState::SubscribingNotifications;
        if let Err(e) = self
            .transport
            .subscribe(self.config.service, self.config.notify_characteristic)
            .await
        {
            warn!(lock = %self.lock_id, error = %e, "notification subscription failed");
            return self.on_link_lost().await;
        }
        Ok(())
    }

    async fn on_subscribed(&mut self) -> Result<(), CoreError> {
        if self.state != ConnectionState::SubscribingNotifications {
            debug!(lock = %self.lock_id, state = self.state.name(), "ignoring subscription ack");
            return Ok(());
        }
        // Frame boundaries are synchronized from this point.
        self.reassembler.reset();
        self.state = ConnectionState::AwaitingSessionKey;
        match self.keys.request_session_key(&self.lock_id).await {
            Ok(material) => self.deliver_ticket(material).await,
            Err(e) => {
                warn!(lock = %self.lock_id, error = %e, "session key request failed");
                self.fail(SessionFailure::KeyRequestFailed).await;
                Ok(())
            }
        }
    }

    async fn deliver_ticket(&mut self, material: SessionKeyMaterial) -> Result<(), CoreError> {
        if let Err(e) = self.crypto.set_key(&material.key) {
            // Only a broken backend can get here; fail fast.
            warn!(lock = %self.lock_id, error = %e, "backend issued malformed key material");
            self.fail(SessionFailure::KeyRequestFailed).await;
            return Ok(());
        }
        if let Err(e) = self.crypto.set_ticket(material.ticket.as_bytes()) {
            warn!(lock = %self.lock_id, error = %e, "backend issued malformed ticket");
            self.fail(SessionFailure::KeyRequestFailed).await;
            return Ok(());
        }
        self.state = ConnectionState::SendingTicket;
        debug!(lock = %self.lock_id, "sending ticket");
        // The ticket goes out in plaintext; the secure channel does not
        // exist until the lock accepts it.
        let payload = Bytes::copy_from_slice(material.ticket.as_bytes());
        if let Err(e) = self
            .transport
            .write(self.config.service, self.config.write_characteristic, payload)
            .await
        {
            warn!(lock = %self.lock_id, error = %e, "ticket write failed");
            return self.on_link_lost().await;
        }
        Ok(())
    }

    async fn on_notification(&mut self, chunk: &[u8]) -> Result<(), CoreError> {
        match self.state {
            ConnectionState::SendingTicket
            | ConnectionState::Ready
            | ConnectionState::Busy { .. } => {}
            _ => {
                warn!(lock = %self.lock_id, state = self.state.name(), "dropping notification outside secure-channel states");
                return Ok(());
            }
        }
        match self.reassembler.push(chunk) {
            Ok(None) => Ok(()),
            Ok(Some(frame)) => self.process_frame(frame).await,
            Err(e) => {
                warn!(lock = %self.lock_id, error = %e, "frame reassembly overflow");
                self.fail(SessionFailure::FrameOverflow).await;
                Ok(())
            }
        }
    }

    async fn process_frame(&mut self, frame: Frame) -> Result<(), CoreError> {
        let nonce = frame.nonce();
        let plaintext = match self.crypto.decrypt(frame.ciphertext(), nonce) {
            Ok(plaintext) => plaintext,
            Err(CryptoError::ReplayedNonce) => {
                warn!(
                    lock = %self.lock_id,
                    nonce = %hex::encode(nonce.as_bytes()),
                    "replayed response nonce"
                );
                self.fail(SessionFailure::ReplayedNonce).await;
                return Ok(());
            }
            Err(e) => {
                warn!(lock = %self.lock_id, error = %e, "response failed authentication");
                self.fail(SessionFailure::AuthenticationFailure).await;
                return Ok(());
            }
        };

        let Some(&opcode) = plaintext.first() else {
            warn!(lock = %self.lock_id, "empty response plaintext");
            self.fail(SessionFailure::UnexpectedResponse).await;
            return Ok(());
        };
        let code = match ResponseCode::try_from(opcode) {
            Ok(code) => code,
            Err(ProtocolError::UnknownResponseCode(value)) => {
                warn!(lock = %self.lock_id, code = value, "unknown response code");
                self.fail(SessionFailure::UnknownResponseCode(value)).await;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        debug!(lock = %self.lock_id, code = ?code, "response");

        let state = self.state.clone();
        match (state, code) {
            (ConnectionState::SendingTicket, ResponseCode::TicketReceiveSuccess) => {
                self.secure_channel_up(false).await;
            }
            (ConnectionState::SendingTicket, ResponseCode::TicketReceiveSuccessLowBattery) => {
                self.secure_channel_up(true).await;
            }
            (ConnectionState::SendingTicket, ResponseCode::TicketReceiveFailure) => {
                self.fail(SessionFailure::TicketRejected).await;
            }
            (ConnectionState::Busy { .. }, ResponseCode::Locked) => {
                self.state = ConnectionState::Ready;
                self.notify(SessionNotice::Locked);
            }
            (ConnectionState::Busy { .. }, ResponseCode::Unlocked) => {
                self.state = ConnectionState::Ready;
                self.notify(SessionNotice::Unlocked);
            }
            // The bolt can also move under a physical key; the lock
            // notifies unprompted and the session just relays.
            (ConnectionState::Ready, ResponseCode::Locked) => {
                self.notify(SessionNotice::Locked);
            }
            (ConnectionState::Ready, ResponseCode::Unlocked) => {
                self.notify(SessionNotice::Unlocked);
            }
            (_, ResponseCode::InvalidRequest) => {
                self.fail(SessionFailure::InvalidRequest).await;
            }
            (state, code) => {
                warn!(lock = %self.lock_id, state = state.name(), code = ?code, "unexpected response for state");
                self.fail(SessionFailure::UnexpectedResponse).await;
            }
        }
        Ok(())
    }

    async fn secure_channel_up(&mut self, low_battery: bool) {
        self.state = ConnectionState::Ready;
        info!(lock = %self.lock_id, low_battery, "secure channel established");
        self.audit
            .record(AuditEvent::SessionEstablished {
                lock: self.lock_id.clone(),
                timestamp: now_unix(),
            })
            .await;
        self.notify(SessionNotice::Ready);
        if low_battery {
            self.notify(SessionNotice::LowBattery);
        }
    }

    async fn on_connect_timeout(&mut self) -> Result<(), CoreError> {
        if self.state != ConnectionState::Connecting {
            debug!(lock = %self.lock_id, state = self.state.name(), "ignoring stale connect timer");
            return Ok(());
        }
        info!(lock = %self.lock_id, "connect window elapsed, device not found");
        self.audit
            .record(AuditEvent::ConnectTimedOut {
                lock: self.lock_id.clone(),
                timestamp: now_unix(),
            })
            .await;
        // Cancel the in-flight attempt before entering the terminal
        // state, so at most one live transport handle ever exists.
        let _ = self.transport.disconnect().await;
        self.state = ConnectionState::Error(SessionFailure::DeviceNotFound);
        self.notify(SessionNotice::Failed(SessionFailure::DeviceNotFound));
        Ok(())
    }

    async fn on_link_lost(&mut self) -> Result<(), CoreError> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Error(_) => {
                // Disconnect is idempotent; nothing to release twice.
                debug!(lock = %self.lock_id, state = self.state.name(), "ignoring disconnect");
                return Ok(());
            }
            _ => {}
        }
        // The session key is scoped to one connection; nothing of the
        // secure channel survives a drop.
        self.crypto = CryptoSession::new();
        self.reassembler.reset();
        if self.connectivity_ok() && self.auto_reconnect {
            info!(lock = %self.lock_id, "link lost, retrying from discovery");
            self.begin_connecting().await
        } else {
            self.state = ConnectionState::Disconnected;
            Ok(())
        }
    }

    async fn on_radio_availability(&mut self, up: bool) -> Result<(), CoreError> {
        let was_ok = self.connectivity_ok();
        self.radio_up = up;
        self.apply_connectivity(was_ok).await
    }

    async fn on_network_availability(&mut self, up: bool) -> Result<(), CoreError> {
        let was_ok = self.connectivity_ok();
        self.network_up = up;
        self.apply_connectivity(was_ok).await
    }

    async fn apply_connectivity(&mut self, was_ok: bool) -> Result<(), CoreError> {
        let now_ok = self.connectivity_ok();
        if was_ok && !now_ok {
            info!(lock = %self.lock_id, "connectivity lost");
            self.notify(SessionNotice::ConnectivityLost);
        } else if !was_ok && now_ok {
            info!(lock = %self.lock_id, "connectivity restored");
            self.notify(SessionNotice::ConnectivityRestored);
            if self.state == ConnectionState::Disconnected && self.auto_reconnect {
                return self.begin_connecting().await;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn connectivity_ok(&self) -> bool {
        self.radio_up && self.network_up
    }

    async fn begin_connecting(&mut self) -> Result<(), CoreError> {
        self.state = ConnectionState::Connecting;
        self.notify(SessionNotice::Connecting);
        if let Err(e) = self.transport.connect().await {
            warn!(lock = %self.lock_id, error = %e, "connect request failed");
            self.fail(SessionFailure::DeviceNotFound).await;
        }
        Ok(())
    }

    async fn dispatch(&mut self, intent: CommandIntent) -> Result<(), CoreError> {
        if self.closed {
            return Err(CoreError::Closed);
        }
        if self.state != ConnectionState::Ready {
            return Err(CoreError::InvalidState(format!(
                "cannot dispatch {:?} in state {}",
                intent,
                self.state.name()
            )));
        }
        let orientation = self.store.orientation(&self.lock_id).await?;
        let request = intent.request_code(orientation);

        let nonce = self.crypto.next_outgoing_nonce();
        let sealed = self.crypto.encrypt(&[request.as_u8()])?;
        let mut payload = Vec::with_capacity(NONCE_LEN + sealed.len());
        payload.extend_from_slice(nonce.as_bytes());
        payload.extend_from_slice(&sealed);

        debug!(lock = %self.lock_id, request = ?request, "dispatching command");
        if let Err(e) = self
            .transport
            .write(
                self.config.service,
                self.config.write_characteristic,
                Bytes::from(payload),
            )
            .await
        {
            warn!(lock = %self.lock_id, error = %e, "command write failed");
            return self.on_link_lost().await;
        }
        self.audit
            .record(AuditEvent::CommandSent {
                lock: self.lock_id.clone(),
                request,
                timestamp: now_unix(),
            })
            .await;
        self.state = ConnectionState::Busy { intent };
        Ok(())
    }

    /// Terminal failure: release the transport, enter the `Error`
    /// state, and surface the reason. Protocol-integrity failures are
    /// additionally reported to the audit collaborator.
    async fn fail(&mut self, failure: SessionFailure) {
        warn!(lock = %self.lock_id, failure = %failure, "session failed");
        if failure.is_protocol_integrity() {
            self.audit
                .record(AuditEvent::SessionFailed {
                    lock: self.lock_id.clone(),
                    failure: failure.clone(),
                    timestamp: now_unix(),
                })
                .await;
        }
        let _ = self.transport.disconnect().await;
        self.crypto = CryptoSession::new();
        self.reassembler.reset();
        self.state = ConnectionState::Error(failure.clone());
        self.notify(SessionNotice::Failed(failure));
    }

    fn notify(&self, notice: SessionNotice) {
        // The caller may have dropped the receiver; that is its choice.
        let _ = self.notices.send(notice);
    }
}
