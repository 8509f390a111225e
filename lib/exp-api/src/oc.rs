// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structured messages exchanged through memory shared with the host.
//!
//! Each direction has a 64-byte header, laid out little-endian, ending in a
//! CRC over the 60 bytes before it. Bulk data travels in a separate extended
//! data region whose length and CRC are carried in the header.

use bitflags::bitflags;
use crc::{CRC_32_ISO_HDLC, Crc, Digest};
use num_derive::FromPrimitive;
use static_assertions::const_assert_eq;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const HEADER_SIZE: usize = 64;
/// Bytes of a header covered by its trailing CRC.
pub const HEADER_CRC_SPAN: usize = HEADER_SIZE - 4;
pub const PARMS_LEN: usize = 28;

pub const API_SUCCESS: u8 = 0;
pub const API_FAILURE: u8 = 1;

/// CRC used for both headers and extended data.
pub const OC_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Starts a CRC over extended data that is read out in pieces.
pub fn ext_digest() -> Digest<'static, u32> {
    OC_CRC.digest()
}

pub fn ext_crc(data: &[u8]) -> u32 {
    OC_CRC.checksum(data)
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct OcFlags: u8 {
        const EXTENDED_DATA = 0x01;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum OcCommand {
    PhyStepByStepInit = 1,
    DdrPhyInit = 2,
    TempSensorPassThroughRead = 3,
    TempSensorPassThroughWrite = 4,
    TempSensorConfigIntervalRead = 5,
    GoCommand = 6,
    AdapterPropertiesGet = 7,
    BinaryUpgrade = 8,
    FlashLoaderVersionInfo = 9,
    FwLog = 10,
}

impl OcCommand {
    pub fn from_id(id: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(id)
    }
}

/// Reason a request was refused before reaching a handler. The value goes
/// in `parms[1]` of the error response.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OcApiError {
    CmdErr,
    CmdCrcErr,
    CmdDataCrcErr,
}

impl From<OcApiError> for u8 {
    fn from(err: OcApiError) -> Self {
        match err {
            OcApiError::CmdErr => 1,
            OcApiError::CmdCrcErr => 2,
            OcApiError::CmdDataCrcErr => 3,
        }
    }
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable,
    KnownLayout, Unaligned,
)]
#[repr(C)]
pub struct OcCommandHeader {
    pub id: u8,
    pub flags: u8,
    pub request_id: U16,
    pub ext_data_len: U32,
    pub ext_data_crc: U32,
    pub host_spad_area: U32,
    pub ech_spad_area: U32,
    pub padding: [u8; 12],
    pub parms: [u8; PARMS_LEN],
    pub crc: U32,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable,
    KnownLayout, Unaligned,
)]
#[repr(C)]
pub struct OcResponseHeader {
    pub id: u8,
    pub flags: u8,
    pub request_id: U16,
    pub ext_data_len: U32,
    pub ext_data_crc: U32,
    pub host_spad_area: U32,
    pub padding: [u8; 16],
    pub parms: [u8; PARMS_LEN],
    pub crc: U32,
}

const_assert_eq!(core::mem::size_of::<OcCommandHeader>(), HEADER_SIZE);
const_assert_eq!(core::mem::size_of::<OcResponseHeader>(), HEADER_SIZE);

fn header_crc(bytes: &[u8]) -> u32 {
    OC_CRC.checksum(&bytes[..HEADER_CRC_SPAN])
}

impl OcCommandHeader {
    pub fn flags(&self) -> OcFlags {
        OcFlags::from_bits_truncate(self.flags)
    }

    pub fn has_ext_data(&self) -> bool {
        self.flags().contains(OcFlags::EXTENDED_DATA)
    }

    pub fn ext_len(&self) -> usize {
        self.ext_data_len.get() as usize
    }

    pub fn compute_crc(&self) -> u32 {
        header_crc(self.as_bytes())
    }

    pub fn seal(&mut self) {
        self.crc = U32::new(self.compute_crc());
    }

    /// Runs the checks that precede dispatch, in order: id range, header
    /// CRC, then the extended data CRC when extended data is flagged.
    ///
    /// `ext_crc` is the CRC of the `ext_data_len` bytes actually present
    /// in the extended data region, or `None` if they could not be read.
    pub fn check(&self, ext_crc: Option<u32>) -> Result<OcCommand, OcApiError> {
        let cmd = OcCommand::from_id(self.id).ok_or(OcApiError::CmdErr)?;
        if self.compute_crc() != self.crc.get() {
            return Err(OcApiError::CmdCrcErr);
        }
        if self.has_ext_data() && ext_crc != Some(self.ext_data_crc.get()) {
            return Err(OcApiError::CmdDataCrcErr);
        }
        Ok(cmd)
    }
}

impl OcResponseHeader {
    pub const ZERO: Self = Self {
        id: 0,
        flags: 0,
        request_id: U16::ZERO,
        ext_data_len: U32::ZERO,
        ext_data_crc: U32::ZERO,
        host_spad_area: U32::ZERO,
        padding: [0; 16],
        parms: [0; PARMS_LEN],
        crc: U32::ZERO,
    };

    /// A cleared response addressed to `req`.
    pub fn reply_to(req: &OcCommandHeader) -> Self {
        Self {
            id: req.id,
            request_id: req.request_id,
            host_spad_area: req.host_spad_area,
            ..Self::ZERO
        }
    }

    /// The response sent for a request refused by [`OcCommandHeader::check`].
    pub fn error(req: &OcCommandHeader, err: OcApiError) -> Self {
        let mut rsp = Self::reply_to(req);
        rsp.parms[0] = API_FAILURE;
        rsp.parms[1] = err.into();
        rsp
    }

    pub fn flags(&self) -> OcFlags {
        OcFlags::from_bits_truncate(self.flags)
    }

    pub fn has_ext_data(&self) -> bool {
        self.flags().contains(OcFlags::EXTENDED_DATA)
    }

    pub fn ext_len(&self) -> usize {
        self.ext_data_len.get() as usize
    }

    /// Marks `len` bytes of extended data as present. The CRC is filled in
    /// by [`Self::seal`].
    pub fn set_ext_len(&mut self, len: u32) {
        self.ext_data_len = U32::new(len);
        self.flags |= OcFlags::EXTENDED_DATA.bits();
    }

    pub fn compute_crc(&self) -> u32 {
        header_crc(self.as_bytes())
    }

    /// Finalizes the response: the extended data CRC if extended data is
    /// flagged, then the header CRC. `ext` must be exactly the extended
    /// data being returned.
    pub fn seal(&mut self, ext: &[u8]) {
        if self.has_ext_data() {
            self.ext_data_crc = U32::new(ext_crc(ext));
        }
        self.crc = U32::new(self.compute_crc());
    }
}

/// Operation selected by `parms[0]` of a DdrPhyInit request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum PhyInitMode {
    DefaultTrain = 0,
    ReadEyeTrain = 1,
    WriteEyeTrain = 2,
}

impl PhyInitMode {
    pub fn from_code(code: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(code)
    }
}

/// DdrPhyInit response parameters: `[status, err_code (LE u32)]`.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable,
    KnownLayout, Unaligned,
)]
#[repr(C)]
pub struct PhyInitResponse {
    pub status: u8,
    pub err_code: U32,
}

impl PhyInitResponse {
    /// Extended code reported when the request carries no, or wrongly
    /// sized, memory configuration.
    pub const BAD_CONFIG: u32 = 0x1;
    /// Extended code for a `parms[0]` that selects no known mode.
    pub const UNSUPPORTED_MODE: u32 = 0x2;

    pub fn ok() -> Self {
        Self {
            status: API_SUCCESS,
            err_code: U32::ZERO,
        }
    }

    pub fn failed(err_code: u32) -> Self {
        Self {
            status: API_FAILURE,
            err_code: U32::new(err_code),
        }
    }

    pub fn write_to(&self, parms: &mut [u8; PARMS_LEN]) {
        let bytes = self.as_bytes();
        parms[..bytes.len()].copy_from_slice(bytes);
    }
}
