//! The device-side protocol engine.
//!
//! [`Engine`] owns all protocol state: the framing state machines, the
//! session, the log targets, and the injected memory accessor and bypass.
//! The integration layer creates one at startup and drives it:
//!
//! ```rust
//! use rmcomm::memory::BufferAccessor;
//! use rmcomm::{Config, Engine};
//!
//! let mut memory = BufferAccessor::<64>::new(0x2000_0000);
//! memory.load(0x2000_0000, b"v1.0").unwrap();
//!
//! let config = Config::new(0xDEAD_BEEF, 0x2000_0000, 4);
//! let mut engine = Engine::new(config, memory);
//!
//! // From the UART RX interrupt
//! engine.push_received_byte(0xC0);
//!
//! // From the main loop, every 10ms
//! engine.tick(10);
//!
//! // From the UART TX interrupt
//! while let Some(_byte) = engine.pull_transmit_byte() {
//!     // write byte to UART
//! }
//! ```

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::bypass::{Bypass, NoBypass};
use crate::command::{self, Context, Outcome};
use crate::config::Config;
use crate::crc;
use crate::frame::{FrameReceiver, FrameTransmitter, MIN_FRAME_LEN, PAYLOAD_INDEX, SEQ_INDEX};
use crate::memory::MemoryAccessor;
use crate::session::{LOWER_NIBBLE_MASK, Session};
use crate::telemetry::{self, LogTargets};
use crate::{Error, Result};

/// Protocol engine
pub struct Engine<M: MemoryAccessor, B: Bypass = NoBypass> {
    config: Config,
    rx: FrameReceiver,
    tx: FrameTransmitter,
    session: Session,
    targets: LogTargets,
    memory: M,
    bypass: B,
}

impl<M: MemoryAccessor> Engine<M, NoBypass> {
    /// Create an engine with no bypass handler.  Bypass commands always
    /// fail.
    pub fn new(config: Config, memory: M) -> Self {
        Self::with_bypass(config, memory, NoBypass)
    }
}

impl<M: MemoryAccessor, B: Bypass> Engine<M, B> {
    /// Create an engine.
    ///
    /// Arguments:
    /// - `config` - Engine configuration
    /// - `memory` - Accessor for all target memory reads and writes
    /// - `bypass` - Handler for bypass commands
    pub fn with_bypass(config: Config, memory: M, bypass: B) -> Self {
        Self {
            session: Session::new(&config),
            config,
            rx: FrameReceiver::new(),
            tx: FrameTransmitter::new(),
            targets: LogTargets::new(),
            memory,
            bypass,
        }
    }

    /// Feed one received byte to the frame decoder.
    ///
    /// Bytes are ignored while a completed frame is waiting for
    /// [`Self::tick()`] to process it.
    pub fn push_received_byte(&mut self, byte: u8) {
        self.rx.push(byte);
    }

    /// Next byte to transmit, or `None` if there is nothing (more) to send.
    pub fn pull_transmit_byte(&mut self) -> Option<u8> {
        self.tx.pull()
    }

    /// Start transmitting a newly staged frame.  Returns the opening
    /// delimiter if a frame is ready and not yet started, `None` otherwise.
    ///
    /// Useful when the transport is idle and so will not be asking for
    /// bytes of its own accord.
    pub fn try_transmission(&mut self) -> Option<u8> {
        if self.tx.is_ready() {
            self.tx.pull()
        } else {
            None
        }
    }

    /// Whether a staged frame is waiting to be started
    pub fn is_transmit_ready(&self) -> bool {
        self.tx.is_ready()
    }

    /// Advance the engine by `elapsed_ms`.
    ///
    /// In order:
    /// - times out a stalled partial frame, or processes a completed one
    ///   if no reply is already pending
    /// - hands any pending reply to the transmitter, if it is idle
    /// - runs the log watchdog and sampler
    pub fn tick(&mut self, elapsed_ms: u32) {
        if self
            .rx
            .advance_timeout(elapsed_ms, self.config.rx_timeout_ms)
        {
            debug!("Partial frame timed out");
        } else if self.rx.is_complete() && !self.session.is_reply_pending {
            self.process_frame();
            self.rx.clear();
        }

        if self.session.is_reply_pending {
            self.send_reply();
        }

        if telemetry::advance(&mut self.session, &self.config, elapsed_ms) {
            self.send_telemetry();
        }
    }

    /// Whether the host is actively logging
    pub fn is_connected(&self) -> bool {
        self.session.is_logging_enabled
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn log_targets(&self) -> &LogTargets {
        &self.targets
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    // Validate and dispatch the held frame.  Errors are absorbed here.
    fn process_frame(&mut self) {
        let Self {
            config,
            rx,
            session,
            targets,
            memory,
            bypass,
            ..
        } = self;

        let Some(frame) = rx.frame() else {
            return;
        };
        if let Err(e) = check_frame(frame) {
            debug!("Dropped {} byte frame: {e:?}", frame.len());
            return;
        }

        let seq = frame[SEQ_INDEX];
        let payload = &frame[PAYLOAD_INDEX..frame.len() - 1];

        session.clear_pending();
        let mut ctx = Context {
            config: &*config,
            session,
            targets,
            memory,
            bypass,
        };

        match command::dispatch(&mut ctx, seq & LOWER_NIBBLE_MASK, payload) {
            Ok(outcome) => {
                ctx.session.accept(seq);
                if outcome == Outcome::Reply {
                    ctx.session.is_reply_pending = true;
                }
                trace!("Request {seq:#04X} accepted: {outcome:?}");
            }
            Err(e) => debug!("Request {seq:#04X} rejected: {e:?}"),
        }
    }

    // Stage the pending reply if the transmitter is free.  Otherwise leave
    // it pending for the next tick.
    fn send_reply(&mut self) {
        if !self.tx.is_idle() {
            return;
        }

        let seq = self.session.next_reply_seq();
        let bytes = self.session.pending_bytes();
        let result = self.tx.stage(seq, |buf| {
            buf.get_mut(..bytes.len())
                .ok_or(Error::PayloadTooLarge)?
                .copy_from_slice(bytes);
            Ok(bytes.len())
        });

        match result {
            Ok(_) => {
                self.session.advance_slave_seq();
            }
            Err(e) => warn!("Reply dropped: {e:?}"),
        }
        self.session.is_reply_pending = false;
    }

    // Stage a telemetry frame.  Skipped if there is nothing to sample or
    // the transmitter is occupied.
    fn send_telemetry(&mut self) {
        let Self {
            tx,
            session,
            targets,
            memory,
            ..
        } = self;

        if session.is_reply_pending || targets.committed_count() == 0 || !tx.is_idle() {
            trace!("Telemetry sample skipped");
            return;
        }

        match tx.stage(session.next_reply_seq(), |buf| targets.sample(memory, buf)) {
            Ok(_) => {
                session.advance_slave_seq();
            }
            Err(e) => warn!("Telemetry sample failed: {e:?}"),
        }
    }
}

fn check_frame(frame: &[u8]) -> Result<()> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(Error::Framing);
    }
    if !crc::is_valid(frame) {
        return Err(Error::Crc);
    }
    Ok(())
}
