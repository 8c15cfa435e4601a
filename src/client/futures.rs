//! Asynchronous Client - typically used by a Host.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use alloc::vec::Vec;
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::client::{MAX_ENCODED_REQUEST, REPLY_FRAME_SIZE, Reply, Request};
use crate::config::AddressWidth;
use crate::frame::FrameReceiver;
use crate::session::LOWER_NIBBLE_MASK;
use crate::{Error, Result};

/// Default number of [`AsyncDelay`] rounds to wait for a frame
pub const DEFAULT_MAX_POLLS: usize = 100;

/// Byte transport to the device, typically a serial port.
#[async_trait(?Send)]
pub trait AsyncTransport {
    /// Write all of `bytes`
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read one byte if one is available, without waiting for one.
    async fn recv(&mut self) -> Result<Option<u8>>;
}

/// Yield delay for async polling loops.
///
/// Application must provide an implementation of this trait in order for the
/// async client to be able to yield, waiting for a reply from the device.
///
/// This trait keeps `rmcomm` free of any specific async runtime.
///
/// Example:
///
/// ```rust,ignore
/// use embassy_time::{Duration, Timer};
/// struct Delay;
/// impl AsyncDelay for Delay {
///     async fn delay() {
///         Timer::after(Duration::from_millis(10)).await;
///     }
/// }
/// ```
pub trait AsyncDelay {
    fn delay() -> impl Future<Output = ()>;
}

/// A frame received from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub seq: u8,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn master_seq(&self) -> u8 {
        self.seq >> 4
    }

    pub fn slave_seq(&self) -> u8 {
        self.seq & LOWER_NIBBLE_MASK
    }
}

impl From<Reply<'_>> for Response {
    fn from(reply: Reply<'_>) -> Self {
        Self {
            seq: reply.seq,
            payload: reply.payload.to_vec(),
        }
    }
}

/// Async client for talking to a device over an [`AsyncTransport`].
///
/// See [`AsyncDelay`] for required delay trait.
///
/// Example usage:
///
/// ```rust,ignore
/// use rmcomm::client::{AsyncRmClient, Request};
/// use rmcomm::AddressWidth;
///
/// let serial = ...; // implement AsyncTransport
/// let mut client = AsyncRmClient::<_, Delay>::new(serial, AddressWidth::Four);
/// let version = client.request(&Request::Authenticate(0xDEAD_BEEF)).await?;
/// client.request(&Request::StartLog).await?;
/// loop {
///     let telemetry = client.next_frame().await?;
///     // Process telemetry...
/// }
/// ```
pub struct AsyncRmClient<T: AsyncTransport, D: AsyncDelay> {
    transport: T,
    width: AddressWidth,
    master_seq: u8,
    max_polls: usize,
    rx: FrameReceiver<REPLY_FRAME_SIZE>,
    _delay: core::marker::PhantomData<D>,
}

impl<T: AsyncTransport, D: AsyncDelay> AsyncRmClient<T, D> {
    /// Create a new AsyncRmClient
    ///
    /// Arguments:
    /// - `transport`: Byte transport to the device
    /// - `width`: The device's address width
    pub fn new(transport: T, width: AddressWidth) -> Self {
        Self {
            transport,
            width,
            master_seq: 0,
            max_polls: DEFAULT_MAX_POLLS,
            rx: FrameReceiver::new(),
            _delay: core::marker::PhantomData,
        }
    }

    /// Number of [`AsyncDelay`] rounds to wait for a frame before giving up
    /// with [`Error::Timeout`].
    pub fn with_max_polls(mut self, max_polls: usize) -> Self {
        self.max_polls = max_polls;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Master sequence number of the most recent request, `1..=15`, or 0
    /// before the first.
    pub fn master_seq(&self) -> u8 {
        self.master_seq
    }

    /// Send a request without waiting for a reply, returning its master
    /// sequence number.
    ///
    /// Use this for requests the device accepts silently, such as
    /// [`Request::WriteValue`] while logging.
    pub async fn send(&mut self, request: &Request<'_>) -> Result<u8> {
        self.master_seq = if self.master_seq >= LOWER_NIBBLE_MASK {
            1
        } else {
            self.master_seq + 1
        };

        let mut buf = [0u8; MAX_ENCODED_REQUEST];
        let len = request.encode(self.master_seq, self.width, &mut buf)?;
        self.transport.send(&buf[..len]).await?;
        debug!(
            "Sent {:?} seq {} ({len} bytes)",
            request.opcode(),
            self.master_seq
        );

        Ok(self.master_seq)
    }

    /// Send a request and wait for its reply.
    ///
    /// The reply is the first valid frame carrying this request's master
    /// sequence number.  Earlier frames, such as telemetry, are discarded.
    ///
    /// The device sends nothing for a rejected request, so rejection shows
    /// up as [`Error::Timeout`].
    ///
    /// Don't use this for requests the device accepts without replying,
    /// such as [`Request::StartLog`] or [`Request::WriteValue`] while
    /// logging.  Telemetry sent after the request is accepted carries its
    /// master sequence number, so the next telemetry frame would be
    /// returned as the reply.  Use [`Self::send()`] for those.
    pub async fn request(&mut self, request: &Request<'_>) -> Result<Response> {
        let seq = self.send(request).await?;

        let mut polls = self.max_polls;
        loop {
            let response = self.read_frame(&mut polls).await?;
            if response.master_seq() == seq {
                debug!(
                    "Reply to seq {seq} ({} bytes received)",
                    response.payload.len()
                );
                return Ok(response);
            }
            debug!("Discarded frame seq {:#04X}", response.seq);
        }
    }

    /// Wait for the next valid frame from the device, typically telemetry.
    pub async fn next_frame(&mut self) -> Result<Response> {
        let mut polls = self.max_polls;
        self.read_frame(&mut polls).await
    }

    async fn read_frame(&mut self, polls: &mut usize) -> Result<Response> {
        loop {
            while let Some(byte) = self.transport.recv().await? {
                self.rx.push(byte);

                let Some(frame) = self.rx.frame() else {
                    continue;
                };
                let parsed = Reply::parse(frame).map(Response::from);
                self.rx.clear();

                match parsed {
                    Ok(response) => return Ok(response),
                    Err(e) => debug!("Dropped frame from device: {e:?}"),
                }
            }

            if *polls == 0 {
                warn!("Timed out waiting for frame from device");
                return Err(Error::Timeout);
            }
            *polls -= 1;

            // Yield with reasonable delay to avoid spinning too fast
            D::delay().await;
        }
    }
}
