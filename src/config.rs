//! Engine configuration.
//!
//! Fixed capacities are crate constants, as they size the buffers held by
//! the engine.  Everything else lives in [`Config`], which is built once at
//! startup and handed to [`crate::Engine::new()`].
//!
//! ```rust
//! use rmcomm::{AddressWidth, Config};
//!
//! let config = Config::new(0xDEAD_BEEF, 0x2000_0000, 16)
//!     .with_address_width(AddressWidth::Four)
//!     .with_log_interval_ms(100);
//! ```

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Maximum number of log targets.
pub const LOG_TARGETS_MAX: usize = 32;

/// Maximum reply or telemetry payload size in bytes.
pub const MAX_PAYLOAD: usize = LOG_TARGETS_MAX * 4;

/// Transmit frame buffer size: SEQ + payload + CRC.
pub const TX_FRAME_SIZE: usize = MAX_PAYLOAD + 2;

/// Receive frame buffer size (decoded bytes, including SEQ and CRC).
pub const RX_FRAME_SIZE: usize = 32;

pub const DEFAULT_RX_TIMEOUT_MS: u32 = 100;
pub const DEFAULT_LOG_WATCHDOG_MS: u32 = 2000;
pub const DEFAULT_LOG_INTERVAL_MS: u16 = 500;

/// Number of address bytes carried on the wire.
///
/// Small 8-bit targets typically use [`AddressWidth::Two`], 32-bit targets
/// [`AddressWidth::Four`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AddressWidth {
    Two,
    #[default]
    Four,
}

impl AddressWidth {
    /// Address length in bytes
    pub const fn size(self) -> usize {
        match self {
            AddressWidth::Two => 2,
            AddressWidth::Four => 4,
        }
    }

    /// Decode a little-endian address from the start of `bytes`.
    ///
    /// `bytes` must hold at least [`Self::size()`] bytes.
    pub fn read(self, bytes: &[u8]) -> u32 {
        match self {
            AddressWidth::Two => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
            AddressWidth::Four => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Encode `address` little-endian into the start of `out`, returning
    /// the number of bytes written.  Upper bits are dropped for
    /// [`AddressWidth::Two`].
    pub fn write(self, address: u32, out: &mut [u8]) -> usize {
        let len = self.size();
        out[..len].copy_from_slice(&address.to_le_bytes()[..len]);
        len
    }
}

/// Location and length of the version block returned on authentication.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub address: u32,
    pub length: u16,
}

/// Engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Shared secret the host must present to authenticate
    pub passkey: u32,

    /// Version block, read through the memory accessor on authentication
    pub version: VersionInfo,

    /// Address width on the wire
    pub address_width: AddressWidth,

    /// Whether 8-byte values may be written and logged
    pub wide_data: bool,

    /// A partially received frame is discarded after this long
    pub rx_timeout_ms: u32,

    /// Logging is disabled if no request is accepted for this long
    pub log_watchdog_ms: u32,

    /// Initial telemetry interval, overridable by the host
    pub log_interval_ms: u16,
}

impl Config {
    /// Create a configuration with default timings.
    ///
    /// Arguments:
    /// - `passkey` - Shared secret for authentication
    /// - `version_address` - Address of the version block in target memory
    /// - `version_length` - Length of the version block in bytes
    pub const fn new(passkey: u32, version_address: u32, version_length: u16) -> Self {
        Self {
            passkey,
            version: VersionInfo {
                address: version_address,
                length: version_length,
            },
            address_width: AddressWidth::Four,
            wide_data: true,
            rx_timeout_ms: DEFAULT_RX_TIMEOUT_MS,
            log_watchdog_ms: DEFAULT_LOG_WATCHDOG_MS,
            log_interval_ms: DEFAULT_LOG_INTERVAL_MS,
        }
    }

    pub const fn with_address_width(mut self, width: AddressWidth) -> Self {
        self.address_width = width;
        self
    }

    pub const fn with_wide_data(mut self, enabled: bool) -> Self {
        self.wide_data = enabled;
        self
    }

    pub const fn with_rx_timeout_ms(mut self, ms: u32) -> Self {
        self.rx_timeout_ms = ms;
        self
    }

    pub const fn with_log_watchdog_ms(mut self, ms: u32) -> Self {
        self.log_watchdog_ms = ms;
        self
    }

    /// Set the initial telemetry interval.  A zero interval is treated as
    /// 1ms, as the host cannot set zero either.
    pub const fn with_log_interval_ms(mut self, ms: u16) -> Self {
        self.log_interval_ms = if ms == 0 { 1 } else { ms };
        self
    }
}
