//! Test harness for keyturn core.
//!
//! Provides an in-process simulated lock that speaks the real wire
//! protocol (secretbox frames, chunked notifications, padded final
//! chunks), plus in-memory implementations of the backend collaborators.
//! Integration tests and the demo binary drive complete sessions
//! against these without a radio stack.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use getrandom::getrandom;
use tokio::sync::{mpsc, Mutex};

use keyturn_crypto::{CryptoSession, Nonce24, Ticket, KEY_LEN, NONCE_LEN, TICKET_LEN};

use crate::audit::MemoryAuditSink;
use crate::backend::{KeyService, LockId, LockStore, SessionKeyMaterial};
use crate::codes::{Orientation, RequestCode, ResponseCode};
use crate::config::{SessionConfig, LOCK_SERVICE};
use crate::errors::{BackendError, CoreError, StoreError, TransportError};
use crate::frame::{FRAME_LEN, MAX_CHUNK_LEN};
use crate::session::{ConnectionState, LockSession, SessionNotice};
use crate::transport::{CharacteristicId, LinkEvent, LockTransport, ServiceId};

/// Generate a random 32-byte array.
pub fn rand32() -> [u8; 32] {
    let mut b = [0u8; 32];
    getrandom(&mut b).expect("rng");
    b
}

/// Generate fresh random session key material.
pub fn rand_material() -> SessionKeyMaterial {
    let mut ticket = [0u8; TICKET_LEN];
    getrandom(&mut ticket).expect("rng");
    SessionKeyMaterial {
        key: rand32(),
        ticket: Ticket::from_bytes(&ticket).expect("ticket length"),
    }
}

/// Behavior knobs for the simulated lock.
#[derive(Debug, Clone)]
pub struct SimulatedLockConfig {
    /// Which rotation engages the bolt on this device
    pub orientation: Orientation,
    /// Device is out of range: connects never complete
    pub offline: bool,
    /// Whether the lock service shows up in discovery
    pub advertise_service: bool,
    /// Firmware quirk: final notification chunk padded to full size
    pub pad_final_chunk: bool,
    /// Acknowledge the ticket with the low-battery variant
    pub low_battery: bool,
    /// Refuse the ticket even if it matches
    pub reject_ticket: bool,
    /// Answer every command with `InvalidRequest`
    pub respond_invalid_request: bool,
    /// Answer every command with this raw opcode byte
    pub respond_unknown_opcode: Option<u8>,
    /// Answer commands by resending the previous response frame
    pub replay_last_frame: bool,
}

impl Default for SimulatedLockConfig {
    fn default() -> Self {
        Self {
            orientation: Orientation::Clockwise,
            offline: false,
            advertise_service: true,
            pad_final_chunk: false,
            low_battery: false,
            reject_ticket: false,
            respond_invalid_request: false,
            respond_unknown_opcode: None,
            replay_last_frame: false,
        }
    }
}

struct SimState {
    connected: bool,
    subscribed: bool,
    crypto: CryptoSession,
    engaged: bool,
    last_frame: Option<Vec<u8>>,
}

/// An in-process peer implementing [`LockTransport`].
///
/// The device side runs its own `CryptoSession` over the shared key:
/// requests are decrypted and replay-checked exactly as the firmware
/// does, and replies are sealed under the device's own outgoing
/// counter, which stays ahead of the client's acceptance floor.
pub struct SimulatedLock {
    config: SimulatedLockConfig,
    key: [u8; KEY_LEN],
    ticket: Ticket,
    state: Mutex<SimState>,
    events: mpsc::Sender<LinkEvent>,
}

impl SimulatedLock {
    pub fn new(
        config: SimulatedLockConfig,
        material: &SessionKeyMaterial,
    ) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (events, event_rx) = mpsc::channel(64);
        let lock = Self {
            config,
            key: material.key,
            ticket: material.ticket.clone(),
            state: Mutex::new(SimState {
                connected: false,
                subscribed: false,
                crypto: CryptoSession::new(),
                engaged: false,
                last_frame: None,
            }),
            events,
        };
        (lock, event_rx)
    }

    /// Simulate a link drop initiated by the device or the radio.
    pub async fn drop_link(&self) {
        let mut state = self.state.lock().await;
        if state.connected {
            state.connected = false;
            state.subscribed = false;
            let _ = self.events.send(LinkEvent::Disconnected).await;
        }
    }

    /// Simulate the bolt being moved with a physical key: the lock
    /// notifies unprompted.
    pub async fn turn_by_hand(&self, engaged: bool) {
        let mut state = self.state.lock().await;
        if !state.subscribed || !state.crypto.has_key() {
            return;
        }
        state.engaged = engaged;
        let opcode = if engaged {
            ResponseCode::Locked
        } else {
            ResponseCode::Unlocked
        };
        self.reply(&mut state, opcode.as_u8()).await;
    }

    /// Whether the simulated bolt is currently engaged.
    pub async fn engaged(&self) -> bool {
        self.state.lock().await.engaged
    }

    async fn handle_ticket(&self, state: &mut SimState, payload: &[u8]) {
        // The real firmware unwraps the session key from the ticket;
        // here the key is shared out of band and the ticket is matched
        // byte for byte.
        let _ = state.crypto.set_key(&self.key);
        let accepted = payload == self.ticket.as_bytes() && !self.config.reject_ticket;
        let opcode = if !accepted {
            ResponseCode::TicketReceiveFailure
        } else if self.config.low_battery {
            ResponseCode::TicketReceiveSuccessLowBattery
        } else {
            ResponseCode::TicketReceiveSuccess
        };
        self.reply(state, opcode.as_u8()).await;
    }

    async fn handle_command(&self, state: &mut SimState, payload: &[u8]) {
        if payload.len() != FRAME_LEN {
            self.reply(state, ResponseCode::InvalidRequest.as_u8()).await;
            return;
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&payload[..NONCE_LEN]);
        let plaintext = match state
            .crypto
            .decrypt(&payload[NONCE_LEN..], Nonce24::from_bytes(nonce))
        {
            Ok(plaintext) => plaintext,
            Err(_) => {
                self.reply(state, ResponseCode::InvalidRequest.as_u8()).await;
                return;
            }
        };

        if self.config.respond_invalid_request {
            self.reply(state, ResponseCode::InvalidRequest.as_u8()).await;
            return;
        }
        if let Some(raw) = self.config.respond_unknown_opcode {
            self.reply(state, raw).await;
            return;
        }

        let opcode = match plaintext.first().copied().and_then(RequestCode::from_u8) {
            Some(RequestCode::RotateClockwise) => {
                state.engaged = self.config.orientation == Orientation::Clockwise;
                if state.engaged {
                    ResponseCode::Locked
                } else {
                    ResponseCode::Unlocked
                }
            }
            Some(RequestCode::RotateCounterClockwise) => {
                state.engaged = self.config.orientation == Orientation::CounterClockwise;
                if state.engaged {
                    ResponseCode::Locked
                } else {
                    ResponseCode::Unlocked
                }
            }
            None => ResponseCode::InvalidRequest,
        };
        self.reply(state, opcode.as_u8()).await;
    }

    async fn reply(&self, state: &mut SimState, opcode: u8) {
        let frame = if self.config.replay_last_frame {
            state.last_frame.clone()
        } else {
            None
        };
        let frame = match frame {
            Some(frame) => frame,
            None => {
                let nonce = state.crypto.next_outgoing_nonce();
                let sealed = match state.crypto.encrypt(&[opcode]) {
                    Ok(sealed) => sealed,
                    Err(_) => return,
                };
                let mut frame = Vec::with_capacity(FRAME_LEN);
                frame.extend_from_slice(nonce.as_bytes());
                frame.extend_from_slice(&sealed);
                state.last_frame = Some(frame.clone());
                frame
            }
        };
        self.send_chunked(&frame).await;
    }

    async fn send_chunked(&self, frame: &[u8]) {
        let mut offset = 0;
        while offset < frame.len() {
            let end = (offset + MAX_CHUNK_LEN).min(frame.len());
            let mut chunk = frame[offset..end].to_vec();
            if end == frame.len() && self.config.pad_final_chunk {
                // The firmware always transmits full-size chunks.
                chunk.resize(MAX_CHUNK_LEN, 0);
            }
            let _ = self
                .events
                .send(LinkEvent::Notification(Bytes::from(chunk)))
                .await;
            offset = end;
        }
    }
}

#[async_trait]
impl LockTransport for SimulatedLock {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.config.offline {
            // Out of range: the attempt just never completes.
            return Ok(());
        }
        let mut state = self.state.lock().await;
        state.connected = true;
        let _ = self.events.send(LinkEvent::Connected).await;
        Ok(())
    }

    async fn discover_services(&self) -> Result<(), TransportError> {
        let state = self.state.lock().await;
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        let mut services = vec![ServiceId(0x1800)];
        if self.config.advertise_service {
            services.push(LOCK_SERVICE);
        }
        let _ = self
            .events
            .send(LinkEvent::ServicesDiscovered(services))
            .await;
        Ok(())
    }

    async fn subscribe(
        &self,
        _service: ServiceId,
        _characteristic: CharacteristicId,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.subscribed = true;
        let _ = self.events.send(LinkEvent::NotificationsSubscribed).await;
        Ok(())
    }

    async fn write(
        &self,
        _service: ServiceId,
        _characteristic: CharacteristicId,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if payload.len() == TICKET_LEN {
            self.handle_ticket(&mut state, &payload).await;
        } else {
            self.handle_command(&mut state, &payload).await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.connected {
            state.connected = false;
            state.subscribed = false;
            let _ = self.events.send(LinkEvent::Disconnected).await;
        }
        Ok(())
    }
}

/// In-memory key service handing out one fixed set of material.
pub struct InMemoryKeyService {
    material: SessionKeyMaterial,
    failing: AtomicBool,
}

impl InMemoryKeyService {
    pub fn new(material: SessionKeyMaterial) -> Self {
        Self {
            material,
            failing: AtomicBool::new(false),
        }
    }

    /// Make subsequent requests fail, as an unreachable backend would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyService for InMemoryKeyService {
    async fn request_session_key(
        &self,
        _lock: &LockId,
    ) -> Result<SessionKeyMaterial, BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::KeyRequestFailed("backend unavailable".into()));
        }
        Ok(self.material.clone())
    }
}

/// In-memory lock configuration store.
#[derive(Default)]
pub struct InMemoryLockStore {
    orientations: Mutex<HashMap<LockId, Orientation>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, lock: LockId, orientation: Orientation) {
        self.orientations.lock().await.insert(lock, orientation);
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn orientation(&self, lock: &LockId) -> Result<Orientation, StoreError> {
        self.orientations
            .lock()
            .await
            .get(lock)
            .copied()
            .ok_or_else(|| StoreError::UnknownLock(lock.to_string()))
    }
}

/// A fully wired session over the simulated lock.
pub type SimSession = LockSession<SimulatedLock, InMemoryKeyService, InMemoryLockStore, MemoryAuditSink>;

/// Everything a test needs to drive a session end to end.
pub struct TestRig {
    pub session: SimSession,
    pub notices: mpsc::UnboundedReceiver<SessionNotice>,
    pub events: mpsc::Receiver<LinkEvent>,
    pub lock: Arc<SimulatedLock>,
    pub keys: Arc<InMemoryKeyService>,
    pub store: Arc<InMemoryLockStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub lock_id: LockId,
}

/// Build a rig with fresh random key material.
pub async fn rig(config: SimulatedLockConfig) -> TestRig {
    rig_with_material(config, rand_material()).await
}

/// Build a rig with caller-chosen key material.
pub async fn rig_with_material(
    config: SimulatedLockConfig,
    material: SessionKeyMaterial,
) -> TestRig {
    let lock_id = LockId::new("00:11:22:33:44:55");
    let orientation = config.orientation;

    let (lock, events) = SimulatedLock::new(config, &material);
    let lock = Arc::new(lock);
    let keys = Arc::new(InMemoryKeyService::new(material));
    let store = Arc::new(InMemoryLockStore::new());
    store.insert(lock_id.clone(), orientation).await;
    let audit = Arc::new(MemoryAuditSink::new());

    let (session, notices) = LockSession::new(
        lock_id.clone(),
        lock.clone(),
        keys.clone(),
        store.clone(),
        audit.clone(),
        SessionConfig::default(),
    );

    TestRig {
        session,
        notices,
        events,
        lock,
        keys,
        store,
        audit,
        lock_id,
    }
}

/// Feed transport events to the session until the predicate holds.
/// Gives up if no event arrives for two seconds.
pub async fn pump_until<F>(rig: &mut TestRig, pred: F) -> Result<(), CoreError>
where
    F: Fn(&ConnectionState) -> bool,
{
    while !pred(rig.session.state()) {
        let event = tokio::time::timeout(Duration::from_secs(2), rig.events.recv())
            .await
            .map_err(|_| {
                CoreError::InvalidState(format!(
                    "no event while waiting in state {}",
                    rig.session.state().name()
                ))
            })?
            .ok_or(CoreError::Closed)?;
        rig.session.handle_event(event).await?;
    }
    Ok(())
}

/// Connect and pump until the session is `Ready` or dead.
pub async fn establish(rig: &mut TestRig) -> Result<(), CoreError> {
    rig.session.connect().await?;
    pump_until(rig, |s| {
        matches!(s, ConnectionState::Ready | ConnectionState::Error(_))
    })
    .await
}

/// Collect all notices emitted so far.
pub fn drain_notices(notices: &mut mpsc::UnboundedReceiver<SessionNotice>) -> Vec<SessionNotice> {
    let mut collected = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        collected.push(notice);
    }
    collected
}
