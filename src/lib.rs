//! Remote memory access and telemetry protocol for embedded targets.
//!
//! A host talks to a device over any byte transport (typically a UART),
//! reading and writing device memory, and configuring periodic telemetry
//! ("logging") of arbitrary memory locations.  Privileged operations are
//! only available once the host has authenticated with a shared passkey.
//!
//! `no_std`.  Requires `alloc` for the async host client only.
//!
//! ## Architecture
//!
//! The device side is a single [`engine::Engine`] instance, owned by the
//! integration layer.  It is driven by three entry points, each of which
//! performs one small unit of work and never blocks:
//!
//! - [`engine::Engine::push_received_byte()`] - one inbound byte, typically
//!   from the UART RX interrupt
//! - [`engine::Engine::pull_transmit_byte()`] - one outbound byte, typically
//!   from the UART TX interrupt
//! - [`engine::Engine::tick()`] - called at a steady cadence from the main
//!   loop with the elapsed milliseconds
//!
//! If the byte entry points and the tick run in different execution
//! contexts, the integration layer must serialize access to the engine.
//!
//! ## Wire format
//!
//! ```text
//! FRAME := 0xC0 SEQ PAYLOAD CRC 0xC0
//! SEQ   := master sequence (upper nibble) | opcode or slave sequence (lower nibble)
//! CRC   := CRC-8 such that CRC-8 over [SEQ, PAYLOAD, CRC] == 0
//! ```
//!
//! `0xC0` and `0xDB` inside a frame are escaped as `0xDB 0xDC` and
//! `0xDB 0xDD` respectively.
//!
//! ## Modules
//!
//! - [`config`] - Engine configuration and fixed capacities
//! - [`crc`] - CRC-8 used for frame integrity
//! - [`frame`] - Byte-level receive and transmit framing state machines
//! - [`memory`] - Memory accessor trait and implementations
//! - [`session`] - Authentication, logging and sequence bookkeeping
//! - [`telemetry`] - Log targets and periodic sampling
//! - [`command`] - Command dispatch and handlers
//! - [`bypass`] - Pluggable application-defined command
//! - [`engine`] - The device-side protocol engine
//! - [`client`] - Host-side request encoding and reply parsing, plus an
//!   async client
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable the async host client (requires `alloc`).
//!
//! Compile with `--no-default-features` for a device build.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![no_std]

#[cfg(feature = "async")]
extern crate alloc;

pub mod bypass;
pub mod client;
pub mod command;
pub mod config;
pub mod crc;
pub mod engine;
pub mod frame;
pub mod memory;
pub mod session;
pub mod telemetry;

pub use config::{AddressWidth, Config, VersionInfo};
pub use engine::Engine;

/// Protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed escape, overflow or stalled partial frame
    Framing,
    /// Frame failed its CRC check
    Crc,
    /// Privileged command received before authentication
    Unauthenticated,
    /// Authentication attempted with the wrong passkey
    BadPasskey,
    /// Payload length does not match the command
    InvalidLength,
    /// Unsupported data size code
    InvalidSize,
    /// Disallowed value, e.g. a zero log period
    InvalidValue,
    /// Too many log targets
    TooManyTargets,
    /// Payload too large for a frame
    PayloadTooLarge,
    /// Memory accessor rejected the address or width
    AccessFault,
    /// Opcode not recognised
    UnknownOpcode,
    /// No bypass handler registered
    NoBypass,
    /// Transmitter busy
    Busy,
    /// Buffer too small for operation
    BufferTooSmall,
    /// Timeout waiting for a reply
    Timeout,
    /// Transport I/O error
    Io,
}

/// Type to represent the result of a protocol operation
pub type Result<T> = core::result::Result<T, Error>;
