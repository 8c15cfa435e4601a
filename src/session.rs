//! Session state shared by the command handlers and the log scheduler.
//!
//! There is exactly one session per engine, created at initialization and
//! living for the lifetime of the engine.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::config::{Config, MAX_PAYLOAD};

/// Mask for the master sequence number (upper nibble of SEQ)
pub const MASTER_SEQ_MASK: u8 = 0xF0;

/// Mask for the opcode in a request, or the slave sequence number in a
/// reply (lower nibble of SEQ)
pub const LOWER_NIBBLE_MASK: u8 = 0x0F;

/// Initial slave sequence number
pub const INITIAL_SLAVE_SEQ: u8 = 0x01;

/// The region echoed back in the next reply.
///
/// The bytes are captured into the session when the command is accepted,
/// so a reply built later reflects memory at acceptance time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PendingBlock {
    /// Source address, informational for bypass replies
    pub address: u32,
    pub length: u16,
}

impl PendingBlock {
    pub const EMPTY: Self = Self {
        address: 0,
        length: 0,
    };
}

/// Authenticated-connection record
#[derive(Debug, Clone)]
pub struct Session {
    pub is_authenticated: bool,
    pub is_logging_enabled: bool,
    pub is_reply_pending: bool,

    /// Upper nibble of the most recently accepted request's SEQ byte,
    /// stored in place (i.e. `0x00`, `0x10` .. `0xF0`)
    pub master_seq: u8,

    /// Incremented for every frame the device originates, 1..=15
    pub slave_seq: u8,

    /// Milliseconds since the last accepted request while logging
    pub log_timeout_ms: u32,

    /// Milliseconds since the last telemetry sample
    pub log_interval_ms: u32,

    /// Telemetry period
    pub log_interval_period: u16,

    pub pending: PendingBlock,

    reply: [u8; MAX_PAYLOAD],
}

impl Session {
    pub fn new(config: &Config) -> Self {
        Self {
            is_authenticated: false,
            is_logging_enabled: false,
            is_reply_pending: false,
            master_seq: 0,
            slave_seq: INITIAL_SLAVE_SEQ,
            log_timeout_ms: 0,
            log_interval_ms: 0,
            log_interval_period: config.log_interval_ms,
            pending: PendingBlock::EMPTY,
            reply: [0; MAX_PAYLOAD],
        }
    }

    /// The slave sequence number the next originated frame will carry,
    /// without consuming it
    pub fn next_slave_seq(&self) -> u8 {
        if self.slave_seq >= LOWER_NIBBLE_MASK {
            INITIAL_SLAVE_SEQ
        } else {
            self.slave_seq + 1
        }
    }

    /// Consume the next slave sequence number
    pub fn advance_slave_seq(&mut self) -> u8 {
        self.slave_seq = self.next_slave_seq();
        self.slave_seq
    }

    /// SEQ byte for the next originated frame
    pub fn next_reply_seq(&self) -> u8 {
        self.master_seq | self.next_slave_seq()
    }

    /// Record a request as accepted: adopt its master sequence number and
    /// feed the log watchdog.
    pub fn accept(&mut self, seq: u8) {
        self.master_seq = seq & MASTER_SEQ_MASK;
        self.log_timeout_ms = 0;
    }

    /// Clear the pending reply block, ahead of running a handler.
    pub fn clear_pending(&mut self) {
        self.pending = PendingBlock::EMPTY;
    }

    /// Buffer to capture up to `length` reply bytes into.
    pub fn reply_buffer(&mut self, length: usize) -> &mut [u8] {
        &mut self.reply[..length.min(MAX_PAYLOAD)]
    }

    /// Record the captured reply block.
    pub fn set_pending(&mut self, address: u32, length: u16) {
        self.pending = PendingBlock {
            address,
            length: length.min(MAX_PAYLOAD as u16),
        };
    }

    /// Bytes of the pending reply block
    pub fn pending_bytes(&self) -> &[u8] {
        &self.reply[..self.pending.length as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(&Config::new(0, 0, 0))
    }

    #[test]
    fn initial_state() {
        let s = session();
        assert!(!s.is_authenticated);
        assert!(!s.is_logging_enabled);
        assert!(!s.is_reply_pending);
        assert_eq!(s.master_seq, 0);
        assert_eq!(s.slave_seq, 1);
        assert_eq!(s.log_interval_period, 500);
        assert_eq!(s.pending, PendingBlock::EMPTY);
    }

    #[test]
    fn slave_seq_wraps_skipping_zero() {
        let mut s = session();
        let mut seen = [0u8; 20];
        for value in seen.iter_mut() {
            *value = s.advance_slave_seq();
        }
        assert_eq!(
            seen,
            [2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 1, 2, 3, 4, 5, 6]
        );
    }

    #[test]
    fn accept_adopts_upper_nibble() {
        let mut s = session();
        s.log_timeout_ms = 1500;
        s.accept(0xA7);
        assert_eq!(s.master_seq, 0xA0);
        assert_eq!(s.log_timeout_ms, 0);
        assert_eq!(s.next_reply_seq(), 0xA2);
    }

    #[test]
    fn pending_capped() {
        let mut s = session();
        assert_eq!(s.reply_buffer(1000).len(), MAX_PAYLOAD);
        s.set_pending(0x100, 1000);
        assert_eq!(s.pending.length as usize, MAX_PAYLOAD);
        assert_eq!(s.pending_bytes().len(), MAX_PAYLOAD);
        s.clear_pending();
        assert!(s.pending_bytes().is_empty());
    }
}
