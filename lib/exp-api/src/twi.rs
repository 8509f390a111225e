// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Short-frame commands exchanged over the two-wire target port.
//!
//! A command frame is `[id, len, data...]`, whose total size is fixed per
//! command. A response is `[len, data...]`, or `[len_hi, len_lo, data...]`
//! for the few replies that do not fit a one-byte length.

use hubpack::SerializedSize;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::pqm::VerticalBathtub;

pub const CMD_ID_OFFSET: usize = 0;
pub const CMD_LEN_OFFSET: usize = 1;
pub const CMD_DATA_OFFSET: usize = 2;

pub const RSP_LEN_OFFSET: usize = 0;
pub const RSP_DATA_OFFSET: usize = 1;
pub const EXT_RSP_DATA_OFFSET: usize = 2;

/// Largest frame in either direction, which is the vertical bathtub reply
/// with its two-byte length.
pub const MAX_FRAME_SIZE: usize = EXT_RSP_DATA_OFFSET + VerticalBathtub::SIZE;

/// Data length carried in a Status reply.
pub const STATUS_RSP_DATA_LEN: u8 = 4;

/// Returned in place of a register value when no valid address is latched.
pub const REG_READ_INVALID: [u8; 4] = [0xba, 0xdb, 0x10, 0x0d];

/// Register writes inside this window cannot be verified with a 32-bit read
/// back, since the registers there are 64 bits wide.
pub const UNVERIFIED_WRITE_MASK: u32 = 0xff00_0000;
pub const UNVERIFIED_WRITE_WINDOW: u32 = 0xa800_0000;

/// Status byte reported to the host.
///
/// Besides the generic codes below, individual commands report their own
/// codes (e.g. a boot configuration failure bitmask or a PQM range error)
/// through the same byte, so this is a newtype rather than a closed enum.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    SerializedSize,
)]
pub struct TwiStatus(pub u8);

impl TwiStatus {
    pub const SUCCESS: Self = Self(0x00);
    pub const ERROR: Self = Self(0xc0);
    pub const UNSUPPORTED: Self = Self(0xd0);
    /// The only non-terminal status: a deferred command is still running.
    pub const BUSY: Self = Self(0xfe);

    pub const REG_ADDR_OUT_OF_RANGE: Self = Self(0x01);
    pub const REG_ADDR_PROHIBITED: Self = Self(0x02);

    pub fn is_busy(self) -> bool {
        self == Self::BUSY
    }
}

/// Firmware stage reported in Status replies.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    FromPrimitive,
    Serialize,
    Deserialize,
    SerializedSize,
)]
#[repr(u8)]
pub enum FwStage {
    BootRom = 1,
    FwUpgrade = 2,
    RunTime = 3,
}

/// Short-frame command identifiers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum TwiCommand {
    Null = 0,
    BootConfig = 1,
    Status = 2,
    RegAddrLatch = 3,
    RegRead = 4,
    RegWrite = 5,
    FwDownload = 6,
    ContRegRead = 7,
    ContRegWrite = 8,
    Bypass4SecTimeout = 9,
    PqmLaneSet = 10,
    PqmLaneGet = 11,
    PqmFreqSet = 12,
    PqmFreqGet = 13,
    PqmLaneTraining = 14,
    PqmTrainingReset = 15,
    RxAdaptObjStart = 16,
    RxAdaptObjRead = 17,
    RxCalibStart = 18,
    RxCalibRead = 19,
    CsuCalibStart = 20,
    CsuCalibRead = 21,
    PrbsPatternModeSet = 22,
    PrbsUserPatternSet = 23,
    PrbsMonitorControl = 24,
    PrbsGeneratorControl = 25,
    PrbsErrCountStart = 26,
    PrbsErrCountRead = 27,
    HorzBathtubStart = 28,
    HorzBathtubRead = 29,
    VertBathtubStart = 30,
    VertBathtubRead = 31,
    TwoDBathtubStart = 32,
    TwoDBathtubRead = 33,
    ForceDelayLineUpdate = 34,
}

/// How a command is executed once its frame is complete.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Runs to completion on the command-accepting context.
    Immediate,
    /// Copied into the deferred job slot and completed on the other
    /// context; the host sees Busy until then.
    Deferred,
    /// Defined by the protocol but not served by this firmware.
    Reserved,
}

/// Whether a command is only honored in PQM mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Gate {
    Always,
    Pqm,
}

/// Everything the dispatcher needs to know about a command id.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CommandInfo {
    /// Total frame length, id byte included.
    pub len: usize,
    pub dispatch: Dispatch,
    pub gate: Gate,
}

impl TwiCommand {
    /// One past the largest valid id.
    pub const MAX: u8 = 35;

    pub fn from_id(id: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(id)
    }

    pub const fn info(self) -> CommandInfo {
        use Dispatch::*;
        use Gate::*;

        const fn i(len: usize, dispatch: Dispatch, gate: Gate) -> CommandInfo {
            CommandInfo {
                len,
                dispatch,
                gate,
            }
        }

        #[rustfmt::skip]
        let info = match self {
            Self::Null =>                 i(0, Reserved, Always),
            Self::BootConfig =>           i(6, Deferred, Always),
            Self::Status =>               i(1, Immediate, Always),
            Self::RegAddrLatch =>         i(6, Immediate, Always),
            Self::RegRead =>              i(6, Immediate, Always),
            Self::RegWrite =>             i(10, Immediate, Always),
            Self::FwDownload =>           i(1, Reserved, Always),
            Self::ContRegRead =>          i(6, Reserved, Always),
            Self::ContRegWrite =>         i(6, Reserved, Always),
            Self::Bypass4SecTimeout =>    i(1, Reserved, Always),
            Self::PqmLaneSet =>           i(3, Immediate, Pqm),
            Self::PqmLaneGet =>           i(1, Immediate, Pqm),
            Self::PqmFreqSet =>           i(3, Immediate, Pqm),
            Self::PqmFreqGet =>           i(1, Immediate, Pqm),
            Self::PqmLaneTraining =>      i(4, Deferred, Pqm),
            Self::PqmTrainingReset =>     i(1, Immediate, Pqm),
            Self::RxAdaptObjStart =>      i(3, Deferred, Always),
            Self::RxAdaptObjRead =>       i(1, Immediate, Always),
            Self::RxCalibStart =>         i(3, Deferred, Pqm),
            Self::RxCalibRead =>          i(1, Immediate, Pqm),
            Self::CsuCalibStart =>        i(3, Deferred, Pqm),
            Self::CsuCalibRead =>         i(1, Immediate, Pqm),
            Self::PrbsPatternModeSet =>   i(3, Immediate, Pqm),
            Self::PrbsUserPatternSet =>   i(12, Deferred, Pqm),
            Self::PrbsMonitorControl =>   i(3, Immediate, Pqm),
            Self::PrbsGeneratorControl => i(3, Immediate, Pqm),
            Self::PrbsErrCountStart =>    i(1, Deferred, Pqm),
            Self::PrbsErrCountRead =>     i(1, Immediate, Pqm),
            Self::HorzBathtubStart =>     i(10, Deferred, Always),
            Self::HorzBathtubRead =>      i(1, Immediate, Always),
            Self::VertBathtubStart =>     i(11, Deferred, Always),
            Self::VertBathtubRead =>      i(1, Immediate, Always),
            Self::TwoDBathtubStart =>     i(12, Deferred, Always),
            Self::TwoDBathtubRead =>      i(1, Immediate, Always),
            Self::ForceDelayLineUpdate => i(1, Deferred, Always),
        };
        info
    }

    /// Number of bytes a frame with this id occupies in the receive
    /// stream. Reserved commands with no defined length still consume their
    /// id byte.
    pub const fn consumed_len(self) -> usize {
        let len = self.info().len;
        if len == 0 { 1 } else { len }
    }
}

/// Builds a response with a one-byte length prefix into `out`, returning
/// the total frame length.
pub fn short_response(out: &mut [u8], data: &[u8]) -> Option<usize> {
    let len = u8::try_from(data.len()).ok()?;
    let total = RSP_DATA_OFFSET + data.len();
    let frame = out.get_mut(..total)?;
    frame[RSP_LEN_OFFSET] = len;
    frame[RSP_DATA_OFFSET..].copy_from_slice(data);
    Some(total)
}

/// Builds a response with a two-byte, high-byte-first length prefix.
pub fn extended_response(out: &mut [u8], data: &[u8]) -> Option<usize> {
    let len = u16::try_from(data.len()).ok()?;
    let total = EXT_RSP_DATA_OFFSET + data.len();
    let frame = out.get_mut(..total)?;
    frame[..EXT_RSP_DATA_OFFSET].copy_from_slice(&len.to_be_bytes());
    frame[EXT_RSP_DATA_OFFSET..].copy_from_slice(data);
    Some(total)
}
