//! Frame transmitter - pull encoder for outbound bytes.
//!
//! The frame is staged in place with [`FrameTransmitter::stage()`], then
//! drained by the transport one byte per [`FrameTransmitter::pull()`] call.
//! Escaping rewrites the staged buffer in place, so no output buffering
//! beyond the frame itself is needed.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::config::TX_FRAME_SIZE;
use crate::crc;
use crate::frame::{END, ESC, ESC_END, ESC_ESC, PAYLOAD_INDEX, SEQ_INDEX};
use crate::{Error, Result};

/// Transmitter state
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Nothing to send, a new frame may be staged
    #[default]
    Idle,
    /// Frame staged, opening delimiter not yet sent
    Ready,
    /// Sending frame contents
    Busy,
    /// Closing delimiter sent
    Closing,
}

/// Streaming frame encoder
#[derive(Debug)]
pub struct FrameTransmitter<const N: usize = TX_FRAME_SIZE> {
    state: TxState,
    buffer: [u8; N],
    cursor: usize,
    end: usize,
}

impl<const N: usize> Default for FrameTransmitter<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameTransmitter<N> {
    pub const fn new() -> Self {
        Self {
            state: TxState::Idle,
            buffer: [0; N],
            cursor: 0,
            end: 0,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == TxState::Idle
    }

    /// A frame is staged and its first byte has not yet been pulled
    pub fn is_ready(&self) -> bool {
        self.state == TxState::Ready
    }

    /// Maximum payload that fits between SEQ and CRC
    pub const fn payload_capacity() -> usize {
        N - 2
    }

    /// Stage a frame for transmission.
    ///
    /// Writes `seq`, lets `fill` write the payload into the payload region
    /// (returning the number of bytes written), then appends the CRC and
    /// moves to [`TxState::Ready`].
    ///
    /// Fails with [`Error::Busy`] unless idle.  If `fill` fails the
    /// transmitter stays idle and the error is returned.
    pub fn stage<F>(&mut self, seq: u8, fill: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8]) -> Result<usize>,
    {
        if !self.is_idle() {
            return Err(Error::Busy);
        }

        self.buffer[SEQ_INDEX] = seq;
        let payload_len = fill(&mut self.buffer[PAYLOAD_INDEX..N - 1])?;
        if payload_len > Self::payload_capacity() {
            return Err(Error::PayloadTooLarge);
        }

        let crc_index = PAYLOAD_INDEX + payload_len;
        self.buffer[crc_index] = crc::compute(&self.buffer[..crc_index]);

        self.cursor = 0;
        self.end = crc_index + 1;
        self.state = TxState::Ready;
        trace!("Staged frame seq {seq:#04X} payload {payload_len} bytes");

        Ok(self.end)
    }

    /// Stage an already CRC'd raw frame, e.g. one built by a host.
    pub fn stage_raw(&mut self, raw: &[u8]) -> Result<()> {
        if !self.is_idle() {
            return Err(Error::Busy);
        }
        if raw.len() > N {
            return Err(Error::PayloadTooLarge);
        }

        self.buffer[..raw.len()].copy_from_slice(raw);
        self.cursor = 0;
        self.end = raw.len();
        self.state = TxState::Ready;
        Ok(())
    }

    /// Pull the next byte to transmit, or `None` once the frame is done.
    ///
    /// The final `None` is what returns the transmitter to idle, so callers
    /// must keep pulling until they see it.
    pub fn pull(&mut self) -> Option<u8> {
        match self.state {
            TxState::Idle => None,
            TxState::Ready => {
                self.state = TxState::Busy;
                self.cursor = 0;
                Some(END)
            }
            TxState::Busy if self.cursor < self.end => {
                let byte = self.buffer[self.cursor];
                match byte {
                    // Send ESC now, the substituted code on the next pull
                    END => {
                        self.buffer[self.cursor] = ESC_END;
                        Some(ESC)
                    }
                    ESC => {
                        self.buffer[self.cursor] = ESC_ESC;
                        Some(ESC)
                    }
                    _ => {
                        self.cursor += 1;
                        Some(byte)
                    }
                }
            }
            TxState::Busy => {
                self.state = TxState::Closing;
                Some(END)
            }
            TxState::Closing => {
                self.state = TxState::Idle;
                None
            }
        }
    }
}
