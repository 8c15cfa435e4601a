//! Host-side request encoding and reply parsing.
//!
//! [`Request`] builds complete, escaped wire frames ready to write to the
//! transport.  [`Reply`] validates and splits a decoded frame received from
//! the device, whether a command reply or an unsolicited telemetry frame.
//!
//! See [`AsyncRmClient`] for an async client that does both over an
//! [`AsyncTransport`].
//!
//! Sequence numbers here are nibble values, `0..=15`, rather than the
//! in-place upper nibble held by the device's session.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;

#[cfg(feature = "async")]
pub use futures::{AsyncDelay, AsyncRmClient, AsyncTransport, Response};

use crate::command::{Opcode, TARGETS_FLAG_END, TARGETS_FLAG_START, log_target_count};
use crate::config::{AddressWidth, RX_FRAME_SIZE, TX_FRAME_SIZE};
use crate::crc;
use crate::frame::{FrameTransmitter, MIN_FRAME_LEN, PAYLOAD_INDEX, SEQ_INDEX};
use crate::memory::DataWidth;
use crate::session::LOWER_NIBBLE_MASK;
use crate::telemetry::LogTarget;
use crate::{Error, Result};

/// Largest request frame (SEQ + payload + CRC) the device will accept.
///
/// One less than the device's receive buffer, as the receiver abandons a
/// frame once its buffer is full.
pub const REQUEST_FRAME_SIZE: usize = RX_FRAME_SIZE - 1;

/// Buffer size needed to decode any frame the device sends
pub const REPLY_FRAME_SIZE: usize = TX_FRAME_SIZE + 1;

/// Worst case encoded length of a request, with every byte escaped and both
/// delimiters
pub const MAX_ENCODED_REQUEST: usize = REQUEST_FRAME_SIZE * 2 + 2;

/// A value for [`Request::WriteValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
}

impl Value {
    pub fn width(&self) -> DataWidth {
        match self {
            Value::U8(_) => DataWidth::U8,
            Value::U16(_) => DataWidth::U16,
            Value::U32(_) => DataWidth::U32,
            Value::U64(_) => DataWidth::U64,
        }
    }

    fn to_le_bytes(self) -> ([u8; 8], usize) {
        let mut out = [0u8; 8];
        let bytes = self.width().bytes();
        match self {
            Value::U8(v) => out[0] = v,
            Value::U16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            Value::U32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Value::U64(v) => out.copy_from_slice(&v.to_le_bytes()),
        }
        (out, bytes)
    }
}

/// A request from host to device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    StartLog,
    StopLog,
    /// Telemetry period in ms.  Stops logging.
    SetLogPeriod(u16),
    WriteValue {
        address: u32,
        value: Value,
    },
    /// One frame's worth of log targets.  Set `start` on the first frame of
    /// a configuration and `end` on the last.
    ConfigureLogTargets {
        start: bool,
        end: bool,
        targets: &'a [LogTarget],
    },
    /// Passkey
    Authenticate(u32),
    DumpRegion {
        address: u32,
        length: u16,
    },
    /// Opaque payload for the device's bypass handler
    Bypass(&'a [u8]),
}

impl Request<'_> {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::StartLog => Opcode::StartLog,
            Request::StopLog => Opcode::StopLog,
            Request::SetLogPeriod(_) => Opcode::SetLogPeriod,
            Request::WriteValue { .. } => Opcode::WriteValue,
            Request::ConfigureLogTargets { .. } => Opcode::ConfigureLogTargets,
            Request::Authenticate(_) => Opcode::Authenticate,
            Request::DumpRegion { .. } => Opcode::DumpRegion,
            Request::Bypass(_) => Opcode::Bypass,
        }
    }

    /// Encode the request as a complete wire frame, delimiters included.
    ///
    /// Arguments:
    /// - `master_seq` - Master sequence number, `0..=15`
    /// - `width` - The device's address width
    /// - `out` - Buffer for the encoded frame.  [`MAX_ENCODED_REQUEST`] is
    ///   always enough.
    ///
    /// Returns the number of bytes written to `out`.
    ///
    /// # Errors
    ///
    /// - [`Error::PayloadTooLarge`] - the request would not fit in the
    ///   device's receive buffer
    /// - [`Error::InvalidLength`] - a [`Request::ConfigureLogTargets`] frame
    ///   carries a number of targets the device would reject for `width`
    /// - [`Error::BufferTooSmall`] - `out` is too small for the encoding
    pub fn encode(&self, master_seq: u8, width: AddressWidth, out: &mut [u8]) -> Result<usize> {
        let seq = ((master_seq & LOWER_NIBBLE_MASK) << 4) | self.opcode() as u8;

        let mut tx = FrameTransmitter::<REQUEST_FRAME_SIZE>::new();
        tx.stage(seq, |buf| self.write_payload(width, buf))?;

        let mut len = 0;
        while let Some(byte) = tx.pull() {
            *out.get_mut(len).ok_or(Error::BufferTooSmall)? = byte;
            len += 1;
        }
        Ok(len)
    }

    fn write_payload(&self, width: AddressWidth, buf: &mut [u8]) -> Result<usize> {
        let mut w = PayloadWriter { buf, len: 0 };
        match *self {
            Request::StartLog | Request::StopLog => {}
            Request::SetLogPeriod(period) => w.put(&period.to_le_bytes())?,
            Request::WriteValue { address, value } => {
                let (bytes, len) = value.to_le_bytes();
                w.put(&[value.width() as u8])?;
                w.put_address(width, address)?;
                w.put(&bytes[..len])?;
            }
            Request::ConfigureLogTargets {
                start,
                end,
                targets,
            } => {
                // The device wipes its committed targets on a bad count
                let len = 1 + targets.len() * (1 + width.size());
                if log_target_count(width, len) != targets.len() {
                    return Err(Error::InvalidLength);
                }

                let mut flags = 0;
                if start {
                    flags |= TARGETS_FLAG_START;
                }
                if end {
                    flags |= TARGETS_FLAG_END;
                }
                w.put(&[flags])?;
                for target in targets {
                    w.put(&[target.width as u8])?;
                    w.put_address(width, target.address)?;
                }
            }
            Request::Authenticate(passkey) => w.put(&passkey.to_le_bytes())?,
            Request::DumpRegion { address, length } => {
                w.put_address(width, address)?;
                w.put(&length.to_le_bytes())?;
            }
            Request::Bypass(payload) => w.put(payload)?,
        }
        Ok(w.len)
    }
}

struct PayloadWriter<'b> {
    buf: &'b mut [u8],
    len: usize,
}

impl PayloadWriter<'_> {
    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.len + bytes.len();
        self.buf
            .get_mut(self.len..end)
            .ok_or(Error::PayloadTooLarge)?
            .copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    fn put_address(&mut self, width: AddressWidth, address: u32) -> Result<()> {
        let mut bytes = [0u8; 4];
        let len = width.write(address, &mut bytes);
        self.put(&bytes[..len])
    }
}

/// A decoded frame from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply<'a> {
    pub seq: u8,
    pub payload: &'a [u8],
}

impl<'a> Reply<'a> {
    /// Validate a decoded frame (delimiters and escaping already removed,
    /// CRC still present).
    pub fn parse(frame: &'a [u8]) -> Result<Self> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(Error::Framing);
        }
        if !crc::is_valid(frame) {
            return Err(Error::Crc);
        }
        Ok(Self {
            seq: frame[SEQ_INDEX],
            payload: &frame[PAYLOAD_INDEX..frame.len() - 1],
        })
    }

    /// Master sequence number of the request last accepted by the device
    pub fn master_seq(&self) -> u8 {
        self.seq >> 4
    }

    /// The device's own sequence number, `1..=15`
    pub fn slave_seq(&self) -> u8 {
        self.seq & LOWER_NIBBLE_MASK
    }
}
