//! Request handlers, one per opcode.
//!
//! Handlers receive the payload with SEQ and CRC stripped.  The pending
//! reply block has already been cleared.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::bypass::Bypass;
use crate::command::{
    Context, Outcome, TARGETS_FLAG_END, TARGETS_FLAG_MASK, TARGETS_FLAG_START,
    log_target_count, write_value_size,
};
use crate::config::MAX_PAYLOAD;
use crate::memory::{DataWidth, MemoryAccessor};
use crate::telemetry::LogTarget;
use crate::{Error, Result};

const PASSKEY_LEN: usize = 4;
const PERIOD_LEN: usize = 2;
const DUMP_LENGTH_LEN: usize = 2;

/// `0x06` - check the passkey and return the version block.
///
/// Any failure clears the authenticated state.
pub fn authenticate<M: MemoryAccessor, B: Bypass>(
    ctx: &mut Context<'_, M, B>,
    payload: &[u8],
) -> Result<Outcome> {
    if payload.len() != PASSKEY_LEN {
        ctx.session.is_authenticated = false;
        return Err(Error::InvalidLength);
    }

    let passkey = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    if passkey != ctx.config.passkey {
        if ctx.session.is_authenticated {
            info!("Bad passkey, session deauthenticated");
        }
        ctx.session.is_authenticated = false;
        return Err(Error::BadPasskey);
    }

    let version = ctx.config.version;
    let length = (version.length as usize).min(MAX_PAYLOAD);
    if let Err(e) = ctx
        .memory
        .read(version.address, ctx.session.reply_buffer(length))
    {
        warn!("Version block at {:#010X} unreadable", version.address);
        ctx.session.is_authenticated = false;
        return Err(e);
    }
    ctx.session.set_pending(version.address, length as u16);

    ctx.session.is_authenticated = true;
    ctx.session.is_logging_enabled = false;
    info!("Host authenticated");

    Ok(Outcome::Reply)
}

/// `0x01` - enable logging.  No reply if already logging.
pub fn start_log<M: MemoryAccessor, B: Bypass>(
    ctx: &mut Context<'_, M, B>,
    payload: &[u8],
) -> Result<Outcome> {
    if !payload.is_empty() {
        return Err(Error::InvalidLength);
    }

    if ctx.session.is_logging_enabled {
        return Ok(Outcome::NoReply);
    }

    ctx.session.is_logging_enabled = true;
    ctx.session.log_interval_ms = 0;
    info!(
        "Logging started, {} targets every {} ms",
        ctx.targets.committed_count(),
        ctx.session.log_interval_period
    );

    Ok(Outcome::Reply)
}

/// `0x02` - disable logging.
pub fn stop_log<M: MemoryAccessor, B: Bypass>(
    ctx: &mut Context<'_, M, B>,
    payload: &[u8],
) -> Result<Outcome> {
    if !payload.is_empty() {
        return Err(Error::InvalidLength);
    }

    if ctx.session.is_logging_enabled {
        info!("Logging stopped");
    }
    ctx.session.is_logging_enabled = false;

    Ok(Outcome::Reply)
}

/// `0x03` - set the telemetry period (u16 LE, ms).  Stops logging.
pub fn set_log_period<M: MemoryAccessor, B: Bypass>(
    ctx: &mut Context<'_, M, B>,
    payload: &[u8],
) -> Result<Outcome> {
    if payload.len() != PERIOD_LEN {
        return Err(Error::InvalidLength);
    }

    let period = u16::from_le_bytes([payload[0], payload[1]]);
    if period == 0 {
        return Err(Error::InvalidValue);
    }

    ctx.session.log_interval_period = period;
    ctx.session.is_logging_enabled = false;
    debug!("Log period set to {period} ms");

    Ok(Outcome::Reply)
}

/// `0x04` - write a 1, 2, 4 or 8 byte value.
///
/// Payload is size code, address, then the value little-endian.  The total
/// payload length must imply the same size as the size code.  No reply
/// while logging.
pub fn write_value<M: MemoryAccessor, B: Bypass>(
    ctx: &mut Context<'_, M, B>,
    payload: &[u8],
) -> Result<Outcome> {
    let width = ctx.config.address_width;
    let expected = write_value_size(width, payload.len());
    if expected == 0 {
        return Err(Error::InvalidLength);
    }

    let code = payload[0];
    if code != expected {
        return Err(Error::InvalidSize);
    }
    let size = DataWidth::from_code(code, ctx.config.wide_data)?;

    let address = width.read(&payload[1..]);
    let data = &payload[1 + width.size()..];
    debug_assert_eq!(data.len(), size.bytes());

    ctx.memory.write(address, data).inspect_err(|_| {
        debug!("Write of {} bytes to {address:#010X} faulted", data.len());
    })?;
    trace!("Wrote {} bytes to {address:#010X}", data.len());

    if ctx.session.is_logging_enabled {
        Ok(Outcome::NoReply)
    } else {
        Ok(Outcome::Reply)
    }
}

/// `0x05` - configure log targets.
///
/// Payload is a flags byte, then size code + address entries.  The entry
/// count is implied by the payload length.  [`TARGETS_FLAG_START`] begins a
/// fresh list, [`TARGETS_FLAG_END`] commits the list, so a list too long
/// for one frame may be sent across several.
///
/// Any failure discards both the staged and committed lists.  Logging is
/// stopped either way.
pub fn configure_log_targets<M: MemoryAccessor, B: Bypass>(
    ctx: &mut Context<'_, M, B>,
    payload: &[u8],
) -> Result<Outcome> {
    let result = stage_log_targets(ctx, payload);
    ctx.session.is_logging_enabled = false;

    match result {
        Ok(()) => Ok(Outcome::Reply),
        Err(e) => {
            debug!("Log target configuration discarded: {e:?}");
            ctx.targets.discard();
            Err(e)
        }
    }
}

fn stage_log_targets<M: MemoryAccessor, B: Bypass>(
    ctx: &mut Context<'_, M, B>,
    payload: &[u8],
) -> Result<()> {
    let width = ctx.config.address_width;
    let count = log_target_count(width, payload.len());
    if count == 0 {
        return Err(Error::InvalidLength);
    }

    let flags = payload[0] & TARGETS_FLAG_MASK;
    if flags & TARGETS_FLAG_START != 0 {
        ctx.targets.start();
    }

    if ctx.targets.staged_count() + count > crate::config::LOG_TARGETS_MAX {
        return Err(Error::TooManyTargets);
    }

    for entry in payload[1..].chunks_exact(1 + width.size()).take(count) {
        let size = DataWidth::from_code(entry[0], ctx.config.wide_data)?;
        let address = width.read(&entry[1..]);
        ctx.targets.stage(LogTarget::new(size, address))?;
    }

    if ctx.targets.staged_payload_size() > MAX_PAYLOAD {
        return Err(Error::PayloadTooLarge);
    }

    if flags & TARGETS_FLAG_END != 0 {
        ctx.targets.commit();
        debug!("{} log targets committed", ctx.targets.committed_count());
    }

    Ok(())
}

/// `0x07` - return a region of memory.  Payload is address, then length
/// (u16 LE).  Stops logging.
pub fn dump_region<M: MemoryAccessor, B: Bypass>(
    ctx: &mut Context<'_, M, B>,
    payload: &[u8],
) -> Result<Outcome> {
    let width = ctx.config.address_width;
    if payload.len() != width.size() + DUMP_LENGTH_LEN {
        return Err(Error::InvalidLength);
    }

    let address = width.read(payload);
    let length_bytes = &payload[width.size()..];
    let length = u16::from_le_bytes([length_bytes[0], length_bytes[1]]);
    if length as usize > MAX_PAYLOAD {
        return Err(Error::PayloadTooLarge);
    }

    ctx.memory
        .read(address, ctx.session.reply_buffer(length as usize))
        .inspect_err(|_| debug!("Dump of {length} bytes at {address:#010X} faulted"))?;
    ctx.session.set_pending(address, length);
    ctx.session.is_logging_enabled = false;

    Ok(Outcome::Reply)
}

/// `0x08` - hand the payload to the registered bypass.  Stops logging
/// whatever the result.
pub fn bypass<M: MemoryAccessor, B: Bypass>(
    ctx: &mut Context<'_, M, B>,
    payload: &[u8],
) -> Result<Outcome> {
    ctx.session.is_logging_enabled = false;

    let reply = ctx.session.reply_buffer(MAX_PAYLOAD);
    let response = ctx.bypass.invoke(payload, reply)?;
    let length = response.length.min(MAX_PAYLOAD);
    ctx.session.set_pending(0, length as u16);

    Ok(response.outcome)
}
