// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Short-frame transport over the adapter's two-wire target port.
//!
//! The port hardware is abstracted by [`TwiTarget`]. [`TwiTransport`]
//! drains whatever the host has written into a bounded [`RxBuffer`], and
//! frames responses into a transmit buffer that the port clocks out the next
//! time the host reads.
//!
//! Nothing here blocks: [`TwiTransport::poll`] takes what the port has and
//! returns.

#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;
use exp_api::twi::{self, MAX_FRAME_SIZE};
use heapless::Vec;
use ringbuf::{ringbuf, ringbuf_entry};

bitflags! {
    /// Events reported by one poll of the port.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Activity: u8 {
        /// Bytes written by the host are waiting to be read.
        const RX = 1 << 0;
        /// The host attempted to read a response.
        const TX_REQUEST = 1 << 1;
        /// A receive failed on the bus (e.g. clock stretch timeout).
        const RX_ERROR = 1 << 2;
        const TX_ERROR = 1 << 3;
    }
}

/// A hardware fault reported by the port, carrying its raw status.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortError(pub u32);

/// Target side of the two-wire port.
pub trait TwiTarget {
    fn poll(&mut self) -> Activity;

    /// Number of received bytes the port is holding.
    fn rx_len(&self) -> usize;

    /// Moves up to `buf.len()` received bytes out of the port, returning
    /// how many were moved.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError>;

    /// Loads `data` to be sent when the host next reads.
    fn write(&mut self, data: &[u8]) -> Result<(), PortError>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TwiError {
    /// A transfer did not fit in the free space of the receive buffer and
    /// was dropped.
    Overflow { incoming: usize, free: usize },
    RxError,
    TxError,
    /// A response was too large for the transmit buffer.
    ResponseTooLarge,
    Port(PortError),
}

impl From<PortError> for TwiError {
    fn from(e: PortError) -> Self {
        Self::Port(e)
    }
}

/// Attempt to consume bytes that have not been received.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Overrun;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    None,
    Rx(u16),
    Overflow { incoming: u16, free: u16 },
    RxError,
    TxError,
    TxUnloaded,
    Tx(u16),
    Port(u32),
}

ringbuf!(Trace, 32, Trace::None);

/// Bytes received from the host, with a read cursor that can never pass the
/// end of what has arrived.
pub struct RxBuffer {
    data: Vec<u8, MAX_FRAME_SIZE>,
    cursor: usize,
}

impl Default for RxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RxBuffer {
    pub const fn new() -> Self {
        Self {
            data: Vec::new(),
            cursor: 0,
        }
    }

    /// Total bytes received since the buffer was last reset.
    pub fn available(&self) -> usize {
        self.data.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn free(&self) -> usize {
        self.data.capacity() - self.data.len()
    }

    /// Received bytes not yet consumed.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    /// Everything received since the last reset, consumed or not.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Appends a whole transfer, or nothing if it does not fit.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), TwiError> {
        let free = self.free();
        if bytes.len() > free {
            return Err(TwiError::Overflow {
                incoming: bytes.len(),
                free,
            });
        }
        self.data
            .extend_from_slice(bytes)
            .map_err(|_| TwiError::Overflow {
                incoming: bytes.len(),
                free,
            })
    }

    /// Moves `n` bytes out of `port` straight into the buffer. The caller
    /// has checked that they fit.
    fn fill_from(
        &mut self,
        port: &mut impl TwiTarget,
        n: usize,
    ) -> Result<(), TwiError> {
        let start = self.data.len();
        let free = self.free();
        self.data
            .resize(start + n, 0)
            .map_err(|_| TwiError::Overflow { incoming: n, free })?;
        match port.read(&mut self.data[start..]) {
            Ok(got) => {
                self.data.truncate(start + got);
                Ok(())
            }
            Err(e) => {
                self.data.truncate(start);
                Err(e.into())
            }
        }
    }

    pub fn consume(&mut self, n: usize) -> Result<(), Overrun> {
        if n > self.data.len() - self.cursor {
            return Err(Overrun);
        }
        self.cursor += n;
        Ok(())
    }

    /// Drops everything, consumed or not.
    pub fn reset(&mut self) {
        self.data.clear();
        self.cursor = 0;
    }

    /// Resets the buffer if every received byte has been consumed,
    /// returning whether it did.
    pub fn reset_if_drained(&mut self) -> bool {
        let drained = self.cursor == self.data.len();
        if drained {
            self.reset();
        }
        drained
    }
}

pub struct TwiTransport<P> {
    port: P,
    rx: RxBuffer,
    tx: [u8; MAX_FRAME_SIZE],
    tx_len: usize,
}

impl<P: TwiTarget> TwiTransport<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            rx: RxBuffer::new(),
            tx: [0; MAX_FRAME_SIZE],
            tx_len: 0,
        }
    }

    pub fn rx(&self) -> &RxBuffer {
        &self.rx
    }

    pub fn rx_mut(&mut self) -> &mut RxBuffer {
        &mut self.rx
    }

    /// The most recently framed response.
    pub fn tx(&self) -> &[u8] {
        &self.tx[..self.tx_len]
    }

    /// Raw transmit buffer, including stale bytes past the last response.
    pub fn tx_buffer(&self) -> &[u8; MAX_FRAME_SIZE] {
        &self.tx
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Services the port once.
    ///
    /// Bus errors reset the receive buffer so that a half-received frame
    /// cannot wedge the command stream; the error is returned for the caller
    /// to log, and the next poll starts clean.
    pub fn poll(&mut self) -> Result<Activity, TwiError> {
        let activity = self.port.poll();

        if activity.intersects(Activity::RX_ERROR | Activity::TX_ERROR) {
            self.rx.reset();
            let (trace, err) = if activity.contains(Activity::RX_ERROR) {
                (Trace::RxError, TwiError::RxError)
            } else {
                (Trace::TxError, TwiError::TxError)
            };
            ringbuf_entry!(trace);
            return Err(err);
        }

        if activity.contains(Activity::TX_REQUEST) && self.tx_len == 0 {
            ringbuf_entry!(Trace::TxUnloaded);
        }

        if activity.contains(Activity::RX) {
            self.receive()?;
        }

        Ok(activity)
    }

    fn receive(&mut self) -> Result<(), TwiError> {
        let incoming = self.port.rx_len();
        let free = self.rx.free();

        if incoming > free {
            ringbuf_entry!(Trace::Overflow {
                incoming: incoming as u16,
                free: free as u16,
            });
            self.discard_port_rx()?;
            return Err(TwiError::Overflow { incoming, free });
        }

        ringbuf_entry!(Trace::Rx(incoming as u16));
        self.rx.fill_from(&mut self.port, incoming).inspect_err(|e| {
            if let TwiError::Port(PortError(code)) = e {
                ringbuf_entry!(Trace::Port(*code));
            }
        })
    }

    fn discard_port_rx(&mut self) -> Result<(), TwiError> {
        let mut scratch = [0u8; 32];
        while self.port.rx_len() > 0 {
            if self.port.read(&mut scratch)? == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Frames `data` behind a one-byte length and loads it into the port.
    pub fn respond(&mut self, data: &[u8]) -> Result<(), TwiError> {
        let n = twi::short_response(&mut self.tx, data)
            .ok_or(TwiError::ResponseTooLarge)?;
        self.send(n)
    }

    /// Frames `data` behind a two-byte length and loads it into the port.
    pub fn respond_extended(&mut self, data: &[u8]) -> Result<(), TwiError> {
        let n = twi::extended_response(&mut self.tx, data)
            .ok_or(TwiError::ResponseTooLarge)?;
        self.send(n)
    }

    /// Loads a response that is already framed. Used where the length
    /// byte deliberately differs from the bytes sent.
    pub fn respond_frame(&mut self, frame: &[u8]) -> Result<(), TwiError> {
        self.tx
            .get_mut(..frame.len())
            .ok_or(TwiError::ResponseTooLarge)?
            .copy_from_slice(frame);
        self.send(frame.len())
    }

    fn send(&mut self, n: usize) -> Result<(), TwiError> {
        self.tx_len = n;
        ringbuf_entry!(Trace::Tx(n as u16));
        self.port.write(&self.tx[..n]).map_err(|e| {
            ringbuf_entry!(Trace::Port(e.0));
            e.into()
        })
    }
}
