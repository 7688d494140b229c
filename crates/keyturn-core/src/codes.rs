//! Request and response opcode tables for the secure channel.
//!
//! Every message on the secure channel carries a single opcode byte.
//! Unknown response values are an ordinary error, not a crash; the
//! session treats them as fatal because they indicate a peer running
//! incompatible firmware.

use crate::errors::ProtocolError;

/// Opcodes the client sends to the lock.
///
/// The lock knows nothing about "lock" and "unlock"; it rotates its
/// motor in one of two directions. Mapping intent to direction is the
/// session's job, via the per-device [`Orientation`] flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestCode {
    RotateCounterClockwise = 0,
    RotateClockwise = 1,
}

impl RequestCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RequestCode::RotateCounterClockwise),
            1 => Some(RequestCode::RotateClockwise),
            _ => None,
        }
    }
}

/// Opcodes the lock sends back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    Unlocked = 0,
    Locked = 1,
    TicketReceiveSuccess = 4,
    TicketReceiveFailure = 5,
    TicketReceiveSuccessLowBattery = 6,
    InvalidRequest = 255,
}

impl ResponseCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ResponseCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResponseCode::Unlocked),
            1 => Ok(ResponseCode::Locked),
            4 => Ok(ResponseCode::TicketReceiveSuccess),
            5 => Ok(ResponseCode::TicketReceiveFailure),
            6 => Ok(ResponseCode::TicketReceiveSuccessLowBattery),
            255 => Ok(ResponseCode::InvalidRequest),
            other => Err(ProtocolError::UnknownResponseCode(other)),
        }
    }
}

/// Mounting orientation of a lock: which rotation direction engages the
/// bolt. Stored per device by the local data collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Rotating clockwise locks
    Clockwise,
    /// Rotating counter-clockwise locks
    CounterClockwise,
}

/// What the caller asked for, before translation to a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandIntent {
    Lock,
    Unlock,
}

impl CommandIntent {
    /// Translate intent into the physical rotation opcode. Lock and
    /// unlock always map to opposite rotations; the orientation flag
    /// decides which one engages the bolt on this device.
    pub fn request_code(self, orientation: Orientation) -> RequestCode {
        match (self, orientation) {
            (CommandIntent::Lock, Orientation::Clockwise) => RequestCode::RotateClockwise,
            (CommandIntent::Lock, Orientation::CounterClockwise) => {
                RequestCode::RotateCounterClockwise
            }
            (CommandIntent::Unlock, Orientation::Clockwise) => {
                RequestCode::RotateCounterClockwise
            }
            (CommandIntent::Unlock, Orientation::CounterClockwise) => {
                RequestCode::RotateClockwise
            }
        }
    }
}
