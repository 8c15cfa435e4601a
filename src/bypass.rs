//! Bypass - an application-defined command carried by the protocol.
//!
//! Opcode `0x08` hands its whole payload to a [`Bypass`] implementation
//! injected when the engine is created.  The implementation writes any
//! response into the buffer provided and reports how the command should be
//! treated.
//!
//! Closures of the right shape implement [`Bypass`] directly:
//!
//! ```rust
//! use rmcomm::bypass::{Bypass, BypassResponse};
//!
//! let mut echo = |payload: &[u8], reply: &mut [u8]| {
//!     let len = payload.len().min(reply.len());
//!     reply[..len].copy_from_slice(&payload[..len]);
//!     Ok::<_, rmcomm::Error>(BypassResponse::reply(len))
//! };
//! let mut reply = [0u8; 4];
//! assert_eq!(echo.invoke(&[1, 2], &mut reply), Ok(BypassResponse::reply(2)));
//! ```

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::command::Outcome;
use crate::{Error, Result};

/// Result of a successful bypass invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BypassResponse {
    /// Whether a reply frame is sent
    pub outcome: Outcome,
    /// Bytes written to the reply buffer.  Capped to the buffer length.
    pub length: usize,
}

impl BypassResponse {
    /// Send `length` bytes of the reply buffer back to the host
    pub const fn reply(length: usize) -> Self {
        Self {
            outcome: Outcome::Reply,
            length,
        }
    }

    /// Accept the command without replying
    pub const fn no_reply() -> Self {
        Self {
            outcome: Outcome::NoReply,
            length: 0,
        }
    }
}

/// Bypass capability.
pub trait Bypass {
    /// Handle a bypass command.
    ///
    /// Arguments:
    /// - `payload` - The request payload, after the SEQ byte
    /// - `reply` - Buffer for the response payload
    ///
    /// Returning an error drops the request without a reply.
    fn invoke(&mut self, payload: &[u8], reply: &mut [u8]) -> Result<BypassResponse>;
}

impl<F> Bypass for F
where
    F: FnMut(&[u8], &mut [u8]) -> Result<BypassResponse>,
{
    fn invoke(&mut self, payload: &[u8], reply: &mut [u8]) -> Result<BypassResponse> {
        self(payload, reply)
    }
}

/// No bypass registered.  Every bypass command fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBypass;

impl Bypass for NoBypass {
    fn invoke(&mut self, _payload: &[u8], _reply: &mut [u8]) -> Result<BypassResponse> {
        Err(Error::NoBypass)
    }
}
