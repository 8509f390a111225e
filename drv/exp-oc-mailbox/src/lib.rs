// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structured-message transport: command, response and extended data
//! regions in memory shared with the host, plus the doorbells each side
//! rings when it has written its half.
//!
//! The host reads and writes these regions behind our back, so every access
//! goes through [`VolatileCell`] and the regions must be mapped uncached.
//! Nothing here holds a reference to the contents across calls; headers are
//! copied out whole, checked, and copied back in whole.

#![cfg_attr(not(test), no_std)]

use exp_api::oc::{self, HEADER_SIZE, OcCommandHeader, OcResponseHeader};
use ringbuf::{ringbuf, ringbuf_entry};
use vcell::VolatileCell;
use zerocopy::{FromBytes, FromZeros, IntoBytes};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MailboxError {
    /// A header region cannot hold a 64-byte header.
    RegionTooSmall,
    /// An access would run past the end of an extended data region.
    ExtOutOfRange,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    None,
    Doorbell { id: u8, request_id: u16 },
    ExtOutOfRange { len: u32, region: u32 },
    Complete { id: u8, ext_len: u32 },
}

ringbuf!(Trace, 16, Trace::None);

/// Signals between the host and the adapter.
pub trait Doorbell {
    /// Returns whether the host has posted a request since the last call,
    /// acknowledging it if so.
    fn take_request(&mut self) -> bool;

    /// Tells the host a response is ready.
    fn ring_response(&mut self);
}

/// A run of shared, uncached bytes.
#[derive(Copy, Clone)]
pub struct Region<'a> {
    cells: &'a [VolatileCell<u8>],
}

impl<'a> Region<'a> {
    pub fn new(cells: &'a [VolatileCell<u8>]) -> Self {
        Self { cells }
    }

    /// Overlays a region on a fixed address.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be mapped, uncached, and stay valid for `'a`.
    /// Nothing else in this program may hold a Rust reference into it.
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> Self {
        // VolatileCell<u8> is a transparent wrapper around UnsafeCell<u8>,
        // which has the layout of u8.
        let cells = unsafe {
            core::slice::from_raw_parts(
                base as *const VolatileCell<u8>,
                len,
            )
        };
        Self { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn span(
        &self,
        offset: usize,
        len: usize,
    ) -> Result<&'a [VolatileCell<u8>], MailboxError> {
        offset
            .checked_add(len)
            .and_then(|end| self.cells.get(offset..end))
            .ok_or(MailboxError::ExtOutOfRange)
    }

    pub fn read(
        &self,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<(), MailboxError> {
        let cells = self.span(offset, buf.len())?;
        for (b, c) in buf.iter_mut().zip(cells) {
            *b = c.get();
        }
        Ok(())
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), MailboxError> {
        let cells = self.span(offset, data.len())?;
        for (c, &b) in cells.iter().zip(data) {
            c.set(b);
        }
        Ok(())
    }

    /// Computes the structured-message CRC of the first `len` bytes without
    /// copying them out first.
    pub fn crc(&self, len: usize) -> Result<u32, MailboxError> {
        let cells = self.span(0, len)?;
        let mut digest = oc::ext_digest();
        let mut chunk = [0u8; 64];
        for piece in cells.chunks(chunk.len()) {
            for (b, c) in chunk.iter_mut().zip(piece) {
                *b = c.get();
            }
            digest.update(&chunk[..piece.len()]);
        }
        Ok(digest.finalize())
    }
}

/// The four shared regions and their doorbell.
pub struct OcMailbox<'a, D> {
    command: Region<'a>,
    response: Region<'a>,
    ext_in: Region<'a>,
    ext_out: Region<'a>,
    doorbell: D,
}

impl<'a, D: Doorbell> OcMailbox<'a, D> {
    pub fn new(
        command: Region<'a>,
        response: Region<'a>,
        ext_in: Region<'a>,
        ext_out: Region<'a>,
        doorbell: D,
    ) -> Result<Self, MailboxError> {
        if command.len() < HEADER_SIZE || response.len() < HEADER_SIZE {
            return Err(MailboxError::RegionTooSmall);
        }
        Ok(Self {
            command,
            response,
            ext_in,
            ext_out,
            doorbell,
        })
    }

    pub fn doorbell_mut(&mut self) -> &mut D {
        &mut self.doorbell
    }

    /// Copies out the command header if the host has rung since the last
    /// call.
    pub fn take_request(&mut self) -> Option<OcCommandHeader> {
        if !self.doorbell.take_request() {
            return None;
        }
        let hdr = self.request_header();
        ringbuf_entry!(Trace::Doorbell {
            id: hdr.id,
            request_id: hdr.request_id.get(),
        });
        Some(hdr)
    }

    pub fn request_header(&self) -> OcCommandHeader {
        let mut bytes = [0u8; HEADER_SIZE];
        // Length was checked at construction.
        let _ = self.command.read(0, &mut bytes);
        OcCommandHeader::read_from_bytes(&bytes[..])
            .unwrap_or_else(|_| OcCommandHeader::new_zeroed())
    }

    /// Size of the inbound extended data region.
    pub fn ext_in_capacity(&self) -> usize {
        self.ext_in.len()
    }

    pub fn ext_out_capacity(&self) -> usize {
        self.ext_out.len()
    }

    /// CRC of the extended data the request claims to carry.
    pub fn ext_in_crc(&self, len: usize) -> Result<u32, MailboxError> {
        self.ext_in.crc(len).inspect_err(|_| {
            ringbuf_entry!(Trace::ExtOutOfRange {
                len: len as u32,
                region: self.ext_in.len() as u32,
            });
        })
    }

    pub fn read_ext_in(&self, buf: &mut [u8]) -> Result<(), MailboxError> {
        self.ext_in.read(0, buf)
    }

    pub fn write_ext_out(&self, data: &[u8]) -> Result<(), MailboxError> {
        self.ext_out.write(0, data)
    }

    /// Publishes `rsp`, which must already be sealed, and rings the host.
    pub fn complete(&mut self, rsp: &OcResponseHeader) {
        // Length was checked at construction.
        let _ = self.response.write(0, rsp.as_bytes());
        ringbuf_entry!(Trace::Complete {
            id: rsp.id,
            ext_len: rsp.ext_data_len.get(),
        });
        self.doorbell.ring_response();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exp_api::oc::{OcFlags, ext_crc};

    #[derive(Default)]
    struct Bell {
        pending: bool,
        rung: usize,
    }

    impl Doorbell for Bell {
        fn take_request(&mut self) -> bool {
            core::mem::take(&mut self.pending)
        }

        fn ring_response(&mut self) {
            self.rung += 1;
        }
    }

    fn cells(n: usize) -> Vec<VolatileCell<u8>> {
        (0..n).map(|_| VolatileCell::new(0)).collect()
    }

    #[test]
    fn header_regions_must_fit() {
        let small = cells(32);
        let ok = cells(64);
        let r = OcMailbox::new(
            Region::new(&small),
            Region::new(&ok),
            Region::new(&ok),
            Region::new(&ok),
            Bell::default(),
        );
        assert!(matches!(r, Err(MailboxError::RegionTooSmall)));
    }

    #[test]
    fn request_is_taken_once_per_doorbell() {
        let (cmd, rsp, ext) = (cells(64), cells(64), cells(16));
        let mut mbox = OcMailbox::new(
            Region::new(&cmd),
            Region::new(&rsp),
            Region::new(&ext),
            Region::new(&ext),
            Bell::default(),
        )
        .unwrap();

        let mut req = OcCommandHeader::new_zeroed();
        req.id = 2;
        req.seal();
        Region::new(&cmd).write(0, req.as_bytes()).unwrap();

        assert!(mbox.take_request().is_none());
        mbox.doorbell_mut().pending = true;
        assert_eq!(mbox.take_request(), Some(req));
        assert!(mbox.take_request().is_none());
    }

    #[test]
    fn ext_crc_reads_region_in_place() {
        let (cmd, rsp, ext) = (cells(64), cells(64), cells(200));
        let data: Vec<u8> = (0..150).map(|i| i as u8).collect();
        Region::new(&ext).write(0, &data).unwrap();

        let mbox = OcMailbox::new(
            Region::new(&cmd),
            Region::new(&rsp),
            Region::new(&ext),
            Region::new(&ext),
            Bell::default(),
        )
        .unwrap();
        assert_eq!(mbox.ext_in_crc(150), Ok(ext_crc(&data)));
        assert_eq!(mbox.ext_in_crc(201), Err(MailboxError::ExtOutOfRange));
    }

    #[test]
    fn completion_publishes_and_rings() {
        let (cmd, rsp, ext) = (cells(64), cells(64), cells(8));
        let mut mbox = OcMailbox::new(
            Region::new(&cmd),
            Region::new(&rsp),
            Region::new(&ext),
            Region::new(&ext),
            Bell::default(),
        )
        .unwrap();

        let mut hdr = OcResponseHeader::ZERO;
        hdr.id = 7;
        hdr.set_ext_len(4);
        mbox.write_ext_out(&[1, 2, 3, 4]).unwrap();
        hdr.seal(&[1, 2, 3, 4]);
        mbox.complete(&hdr);

        let mut out = [0u8; 64];
        Region::new(&rsp).read(0, &mut out).unwrap();
        assert_eq!(&out[..], hdr.as_bytes());
        assert_eq!(out[1], OcFlags::EXTENDED_DATA.bits());
        assert_eq!(mbox.doorbell_mut().rung, 1);
        assert_eq!(mbox.write_ext_out(&[0; 9]), Err(MailboxError::ExtOutOfRange));
    }
}
