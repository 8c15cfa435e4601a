//! Frame receiver - streaming decoder for inbound bytes.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::config::RX_FRAME_SIZE;
use crate::frame::{END, ESC, ESC_END, ESC_ESC};

/// Receiver state
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// Waiting for a frame delimiter.  Other bytes are noise.
    #[default]
    Idle,
    /// Inside a frame
    Framing,
    /// Inside a frame, previous byte was [`ESC`]
    Escaping,
    /// A complete frame is held until [`FrameReceiver::clear()`]
    Complete,
}

/// Streaming frame decoder.
///
/// Bytes are pushed one at a time with [`Self::push()`].  Once a frame is
/// complete it is held, and further bytes ignored, until the consumer calls
/// [`Self::clear()`].
#[derive(Debug)]
pub struct FrameReceiver<const N: usize = RX_FRAME_SIZE> {
    state: RxState,
    buffer: [u8; N],
    length: usize,
    timeout_ms: u32,
}

impl<const N: usize> Default for FrameReceiver<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameReceiver<N> {
    pub const fn new() -> Self {
        Self {
            state: RxState::Idle,
            buffer: [0; N],
            length: 0,
            timeout_ms: 0,
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// Number of decoded bytes held so far
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_complete(&self) -> bool {
        self.state == RxState::Complete
    }

    /// The completed frame, if there is one
    pub fn frame(&self) -> Option<&[u8]> {
        if self.is_complete() {
            Some(&self.buffer[..self.length])
        } else {
            None
        }
    }

    /// Decode one byte.
    pub fn push(&mut self, byte: u8) {
        if self.state == RxState::Complete {
            return;
        }

        // Frame too long - abandon it and treat this byte as fresh input
        if self.length >= N {
            trace!("Receive overflow, frame discarded");
            self.reset();
        }

        match self.state {
            RxState::Idle => {
                if byte == END {
                    self.state = RxState::Framing;
                    self.length = 0;
                }
            }
            RxState::Framing => match byte {
                ESC => self.state = RxState::Escaping,
                // Back-to-back delimiters: the second one opens the frame
                END if self.length == 0 => {}
                END => {
                    trace!("Received frame of {} bytes", self.length);
                    self.state = RxState::Complete;
                }
                _ => self.append(byte),
            },
            RxState::Escaping => {
                self.state = RxState::Framing;
                match byte {
                    ESC_END => self.append(END),
                    ESC_ESC => self.append(ESC),
                    _ => {
                        trace!("Invalid escape {byte:#04X}, frame discarded");
                        self.reset();
                    }
                }
            }
            RxState::Complete => unreachable!(),
        }
    }

    /// Advance the stalled-frame timer by `elapsed_ms`.  Only runs while a
    /// frame is in progress.  Returns `true` if the partial frame was
    /// discarded because `limit_ms` was reached.
    pub fn advance_timeout(&mut self, elapsed_ms: u32, limit_ms: u32) -> bool {
        if !matches!(self.state, RxState::Framing | RxState::Escaping) {
            return false;
        }

        self.timeout_ms = self.timeout_ms.saturating_add(elapsed_ms);
        if self.timeout_ms >= limit_ms {
            self.clear();
            true
        } else {
            false
        }
    }

    /// Release the held frame (or any partial frame) and return to idle.
    pub fn clear(&mut self) {
        self.state = RxState::Idle;
        self.length = 0;
        self.timeout_ms = 0;
    }

    fn reset(&mut self) {
        self.state = RxState::Idle;
        self.length = 0;
        self.timeout_ms = 0;
    }

    fn append(&mut self, byte: u8) {
        self.buffer[self.length] = byte;
        self.length += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_all<const N: usize>(rx: &mut FrameReceiver<N>, bytes: &[u8]) {
        for &byte in bytes {
            rx.push(byte);
        }
    }

    #[test]
    fn simple_frame() {
        let mut rx: FrameReceiver = FrameReceiver::new();
        push_all(&mut rx, &[0x55, END, 0x01, 0x02, 0x03, END]);
        assert_eq!(rx.frame(), Some(&[0x01, 0x02, 0x03][..]));
    }

    #[test]
    fn noise_before_sync_ignored() {
        let mut rx: FrameReceiver = FrameReceiver::new();
        push_all(&mut rx, &[0x01, ESC, ESC_END, 0xFF]);
        assert_eq!(rx.state(), RxState::Idle);
        assert!(rx.is_empty());
    }

    #[test]
    fn double_delimiter_opens_frame() {
        let mut rx: FrameReceiver = FrameReceiver::new();
        push_all(&mut rx, &[END, END, END, 0x42, END]);
        assert_eq!(rx.frame(), Some(&[0x42][..]));
    }

    #[test]
    fn escapes_decoded() {
        let mut rx: FrameReceiver = FrameReceiver::new();
        push_all(&mut rx, &[END, ESC, ESC_END, 0x10, ESC, ESC_ESC, END]);
        assert_eq!(rx.frame(), Some(&[END, 0x10, ESC][..]));
    }

    #[test]
    fn invalid_escape_discards_frame() {
        let mut rx: FrameReceiver = FrameReceiver::new();
        push_all(&mut rx, &[END, 0x01, ESC, 0x02]);
        assert_eq!(rx.state(), RxState::Idle);
        assert!(rx.is_empty());

        // Next delimited frame is received normally
        push_all(&mut rx, &[0x03, END, 0x04, END]);
        assert_eq!(rx.frame(), Some(&[0x04][..]));
    }

    #[test]
    fn complete_frame_held_until_cleared() {
        let mut rx: FrameReceiver = FrameReceiver::new();
        push_all(&mut rx, &[END, 0x01, END, END, 0x02, END]);
        assert_eq!(rx.frame(), Some(&[0x01][..]));

        rx.clear();
        assert_eq!(rx.state(), RxState::Idle);
        push_all(&mut rx, &[END, 0x02, END]);
        assert_eq!(rx.frame(), Some(&[0x02][..]));
    }

    #[test]
    fn overflow_restarts_decoding() {
        let mut rx: FrameReceiver<4> = FrameReceiver::new();
        push_all(&mut rx, &[END, 1, 2, 3, 4]);
        assert_eq!(rx.len(), 4);

        // Buffer full: this byte is processed from idle
        rx.push(5);
        assert_eq!(rx.state(), RxState::Idle);

        push_all(&mut rx, &[END, 6, END]);
        assert_eq!(rx.frame(), Some(&[6][..]));
    }

    #[test]
    fn overflow_on_delimiter_starts_new_frame() {
        let mut rx: FrameReceiver<2> = FrameReceiver::new();
        push_all(&mut rx, &[END, 1, 2, END, 7, END]);
        assert_eq!(rx.frame(), Some(&[7][..]));
    }

    #[test]
    fn stalled_frame_times_out() {
        let mut rx: FrameReceiver = FrameReceiver::new();
        push_all(&mut rx, &[END, 0x01]);
        assert!(!rx.advance_timeout(60, 100));
        assert_eq!(rx.state(), RxState::Framing);
        assert!(rx.advance_timeout(40, 100));
        assert_eq!(rx.state(), RxState::Idle);
        assert!(rx.is_empty());
    }

    #[test]
    fn timeout_only_counts_in_frame() {
        let mut rx: FrameReceiver = FrameReceiver::new();
        assert!(!rx.advance_timeout(500, 100));

        push_all(&mut rx, &[END, 0x01, END]);
        assert!(!rx.advance_timeout(500, 100));
        assert!(rx.is_complete());
    }
}
