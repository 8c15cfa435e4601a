//! Command dispatch.
//!
//! A CRC-valid request frame is `[SEQ][payload..]`, with the opcode in the
//! lower nibble of SEQ.  Until the host has authenticated only
//! [`Opcode::Authenticate`] is dispatched.
//!
//! Each handler returns:
//! - `Ok(Outcome::Reply)` - accepted, reply frame queued
//! - `Ok(Outcome::NoReply)` - accepted, nothing sent
//! - `Err(_)` - rejected, the request is dropped silently
//!
//! Only accepted requests update the master sequence number and feed the
//! log watchdog.  That bookkeeping is done by the engine.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod handlers;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::bypass::Bypass;
use crate::config::{AddressWidth, Config};
use crate::memory::MemoryAccessor;
use crate::session::Session;
use crate::telemetry::LogTargets;
use crate::{Error, Result};

/// Flag bits in the first payload byte of a configure-log-targets request
pub const TARGETS_FLAG_MASK: u8 = 0xF0;
/// Begin a fresh target list
pub const TARGETS_FLAG_START: u8 = 0x10;
/// Commit the target list
pub const TARGETS_FLAG_END: u8 = 0x20;

/// Request opcodes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    StartLog = 0x01,
    StopLog = 0x02,
    SetLogPeriod = 0x03,
    WriteValue = 0x04,
    ConfigureLogTargets = 0x05,
    Authenticate = 0x06,
    DumpRegion = 0x07,
    Bypass = 0x08,
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Opcode::StartLog),
            0x02 => Ok(Opcode::StopLog),
            0x03 => Ok(Opcode::SetLogPeriod),
            0x04 => Ok(Opcode::WriteValue),
            0x05 => Ok(Opcode::ConfigureLogTargets),
            0x06 => Ok(Opcode::Authenticate),
            0x07 => Ok(Opcode::DumpRegion),
            0x08 => Ok(Opcode::Bypass),
            _ => Err(Error::UnknownOpcode),
        }
    }
}

/// How an accepted request is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Queue a reply carrying the pending block
    Reply,
    /// Accepted, but no reply is sent
    NoReply,
}

// Payload length -> data size for write-value.  Index is the whole payload
// length: size code, address, then the data itself.
const WRITE_VALUE_ADDR16: [u8; 12] = [
    0, // imaginary padding
    0, 0, 0, // size(1) + address(2)
    1, 2, 0, 4, 0, 0, 0, 8, // data length
];
const WRITE_VALUE_ADDR32: [u8; 14] = [
    0, // imaginary padding
    0, 0, 0, 0, 0, // size(1) + address(4)
    1, 2, 0, 4, 0, 0, 0, 8, // data length
];

// Payload length -> entry count for configure-log-targets.  Index is the
// whole payload length: flags byte, then size(1) + address entries.
const LOG_TARGETS_ADDR16: [u8; 26] = [
    0, // imaginary padding
    0, // flags
    0, 0, 1, 0, 0, 2, //
    0, 0, 3, 0, 0, 4, //
    0, 0, 5, 0, 0, 6, //
    0, 0, 7, 0, 0, 8, //
];
const LOG_TARGETS_ADDR32: [u8; 22] = [
    0, // imaginary padding
    0, // flags
    0, 0, 0, 0, 1, 0, 0, 0, 0, 2, //
    0, 0, 0, 0, 3, 0, 0, 0, 0, 4, //
];

/// Data size implied by a write-value payload of `len` bytes, or 0 if the
/// length is not valid.
pub fn write_value_size(width: AddressWidth, len: usize) -> u8 {
    let table: &[u8] = match width {
        AddressWidth::Two => &WRITE_VALUE_ADDR16,
        AddressWidth::Four => &WRITE_VALUE_ADDR32,
    };
    table.get(len).copied().unwrap_or(0)
}

/// Number of entries in a configure-log-targets payload of `len` bytes, or
/// 0 if the length is not valid.
pub fn log_target_count(width: AddressWidth, len: usize) -> usize {
    let table: &[u8] = match width {
        AddressWidth::Two => &LOG_TARGETS_ADDR16,
        AddressWidth::Four => &LOG_TARGETS_ADDR32,
    };
    table.get(len).copied().unwrap_or(0) as usize
}

/// Everything a handler may touch
pub struct Context<'a, M: MemoryAccessor, B: Bypass> {
    pub config: &'a Config,
    pub session: &'a mut Session,
    pub targets: &'a mut LogTargets,
    pub memory: &'a mut M,
    pub bypass: &'a mut B,
}

/// Run the handler for `code`, enforcing the authentication gate.
pub fn dispatch<M: MemoryAccessor, B: Bypass>(
    ctx: &mut Context<'_, M, B>,
    code: u8,
    payload: &[u8],
) -> Result<Outcome> {
    let opcode = Opcode::try_from(code)?;

    if !ctx.session.is_authenticated && opcode != Opcode::Authenticate {
        return Err(Error::Unauthenticated);
    }

    trace!("Dispatching {opcode:?} payload {} bytes", payload.len());

    match opcode {
        Opcode::StartLog => handlers::start_log(ctx, payload),
        Opcode::StopLog => handlers::stop_log(ctx, payload),
        Opcode::SetLogPeriod => handlers::set_log_period(ctx, payload),
        Opcode::WriteValue => handlers::write_value(ctx, payload),
        Opcode::ConfigureLogTargets => handlers::configure_log_targets(ctx, payload),
        Opcode::Authenticate => handlers::authenticate(ctx, payload),
        Opcode::DumpRegion => handlers::dump_region(ctx, payload),
        Opcode::Bypass => handlers::bypass(ctx, payload),
    }
}
