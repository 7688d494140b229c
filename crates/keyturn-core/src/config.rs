//! Session configuration.

use std::time::Duration;

use crate::transport::{CharacteristicId, ServiceId};

/// The lock's GATT service.
pub const LOCK_SERVICE: ServiceId = ServiceId(0x302cf927_d510_4597_882a_caee2ae8d45b);

/// Notify characteristic: lock to host.
pub const LOCK_TX_CHARACTERISTIC: CharacteristicId =
    CharacteristicId(0x5562c9f9_11b0_4b79_aa58_25ffd87c8d5d);

/// Write characteristic: host to lock.
pub const LOCK_RX_CHARACTERISTIC: CharacteristicId =
    CharacteristicId(0x3284c360_45ec_421a_952a_0928384e412c);

/// Tunables and identifiers for one lock session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to wait for `Connected` before giving up on the device.
    pub connect_timeout: Duration,
    /// Service that must be present on the device.
    pub service: ServiceId,
    /// Characteristic the host writes commands and the ticket to.
    pub write_characteristic: CharacteristicId,
    /// Characteristic the lock notifies response chunks on.
    pub notify_characteristic: CharacteristicId,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(7),
            service: LOCK_SERVICE,
            write_characteristic: LOCK_RX_CHARACTERISTIC,
            notify_characteristic: LOCK_TX_CHARACTERISTIC,
        }
    }
}
