//! Transport abstraction for the lock radio link.
//!
//! The session does not talk to a radio stack directly; it drives an
//! opaque transport capability through this trait and consumes the
//! transport's callbacks as a closed [`LinkEvent`] enum, which keeps
//! the state machine exhaustively matchable and testable without a
//! simulated radio.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::TransportError;

/// Identifier of a GATT-style service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(pub u128);

/// Identifier of a characteristic within a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicId(pub u128);

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl std::fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Protocol events delivered by the transport and driver layers.
///
/// Events must reach the session in arrival order; the session is the
/// single consumer and serializes all state mutation.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Link established with the device
    Connected,
    /// Link dropped (device-initiated, radio loss, or local disconnect)
    Disconnected,
    /// Service enumeration finished; the discovered service identifiers
    ServicesDiscovered(Vec<ServiceId>),
    /// Remote notifications enabled on the inbound characteristic
    NotificationsSubscribed,
    /// One chunk of notification data, at most 20 bytes
    Notification(Bytes),
    /// Connect window elapsed without a `Connected` event
    ConnectTimeout,
    /// Local radio switched on or off
    RadioAvailability(bool),
    /// Network connectivity came or went
    NetworkAvailability(bool),
}

/// Opaque transport capability: send bytes, receive chunked bytes.
///
/// All methods are fire-and-forget from the session's point of view;
/// completion and results arrive asynchronously as [`LinkEvent`]s.
/// `disconnect` must be idempotent and must also cancel an in-flight
/// connection attempt.
#[async_trait]
pub trait LockTransport: Send + Sync {
    /// Begin connecting to the device. Completion is signaled by
    /// `LinkEvent::Connected`; there is no synchronous failure for an
    /// out-of-range device, only the absence of that event.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Enumerate services; results arrive as
    /// `LinkEvent::ServicesDiscovered`.
    async fn discover_services(&self) -> Result<(), TransportError>;

    /// Enable remote notifications on the given characteristic;
    /// acknowledged by `LinkEvent::NotificationsSubscribed`.
    async fn subscribe(
        &self,
        service: ServiceId,
        characteristic: CharacteristicId,
    ) -> Result<(), TransportError>;

    /// Write a payload to the given characteristic. The transport is
    /// responsible for its own outbound chunking.
    async fn write(
        &self,
        service: ServiceId,
        characteristic: CharacteristicId,
        payload: Bytes,
    ) -> Result<(), TransportError>;

    /// Drop the connection, or cancel one still being established.
    /// Calling this on an already-disconnected transport is a no-op.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
