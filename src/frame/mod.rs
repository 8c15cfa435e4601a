//! Byte-level framing.
//!
//! Frames are delimited by [`END`] and use SLIP-style escaping for any
//! [`END`] or [`ESC`] byte within the frame.  Both directions are streaming
//! state machines working one byte at a time, so each step can run from an
//! interrupt handler:
//!
//! - [`FrameReceiver`] - push decoder for inbound bytes
//! - [`FrameTransmitter`] - pull encoder for outbound bytes

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod rx;
pub mod tx;

pub use rx::{FrameReceiver, RxState};
pub use tx::{FrameTransmitter, TxState};

/// Frame delimiter
pub const END: u8 = 0xC0;

/// Escape introducer
pub const ESC: u8 = 0xDB;

/// Escaped [`END`]
pub const ESC_END: u8 = 0xDC;

/// Escaped [`ESC`]
pub const ESC_ESC: u8 = 0xDD;

/// Index of the SEQ byte within a decoded frame
pub const SEQ_INDEX: usize = 0;

/// Index of the first payload byte within a decoded frame
pub const PAYLOAD_INDEX: usize = 1;

/// Smallest valid decoded frame: SEQ + CRC
pub const MIN_FRAME_LEN: usize = 2;
