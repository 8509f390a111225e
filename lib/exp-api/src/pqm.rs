// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Product qualification (PQM) command payloads, status codes and
//! captured snapshots.
//!
//! Snapshots are sent to the host exactly as laid out here, with every word
//! big-endian.

use num_derive::FromPrimitive;
use static_assertions::const_assert_eq;
use zerocopy::byteorder::big_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::twi::{CMD_DATA_OFFSET, TwiStatus};

/// Lane count above the largest link width.
pub const LANE_OUT_OF_RANGE: TwiStatus = TwiStatus(1);
/// Lane count that is not a supported link width, or lane-dependent
/// command issued before a lane count was selected.
pub const LANE_UNSUPPORTED: TwiStatus = TwiStatus(2);
pub const LANE_SERDES_INIT_ERR: TwiStatus = TwiStatus(3);
pub const FREQ_NOT_AVAILABLE: TwiStatus = TwiStatus(1);
pub const PRBS_PATTERN_NOT_AVAILABLE: TwiStatus = TwiStatus(1);
/// A snapshot or histogram capture reported a hardware failure.
pub const CAPTURE_FAILED: TwiStatus = TwiStatus(1);

/// Largest lane count a lane-set command may name.
pub const MAX_LANES: u8 = 8;

/// Hardware-safe ceiling on a bathtub capture's time limit.
pub const BATHTUB_TIME_LIMIT_MAX: u64 = 0xff_ffff_fff0;

/// 2D bathtub phases run from `PHASE_MIN` through `PHASE_MAX`.
pub const TWO_D_PHASE_MIN: i8 = -16;
pub const TWO_D_PHASE_MAX: i8 = 15;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum PrbsMode {
    Prbs5 = 0x00,
    Prbs7 = 0x01,
    Prbs11 = 0x02,
    Prbs15 = 0x03,
    Prbs20 = 0x04,
    Prbs23 = 0x05,
    Prbs31 = 0x06,
    Prbs9 = 0x07,
    Cjpat = 0x08,
    Cjtpat = 0x09,
    /// Uses the pattern from the last user-pattern command.
    User = 0x0f,
}

impl PrbsMode {
    pub fn from_code(code: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(code)
    }
}

pub const USER_PATTERN_LEN: usize = 10;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserPattern(pub [u8; USER_PATTERN_LEN]);

/// Returns the data byte at `index` of a command frame.
fn data(frame: &[u8], index: usize) -> Option<u8> {
    frame.get(CMD_DATA_OFFSET + index).copied()
}

fn time_limit(frame: &[u8], at: usize) -> Option<u64> {
    let hi = u64::from(data(frame, at)?);
    let mut lo = [0u8; 4];
    lo.copy_from_slice(frame.get(CMD_DATA_OFFSET + at + 1..)?.get(..4)?);
    Some(hi << 32 | u64::from(u32::from_be_bytes(lo)))
}

/// Capture limits shared by every bathtub request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BathtubLimits {
    pub fast_acquisition: bool,
    /// Already clamped to [`BATHTUB_TIME_LIMIT_MAX`].
    pub time_limit: u64,
    pub event_limit: u8,
}

impl BathtubLimits {
    fn new(fast_acquisition: u8, requested: u64, event_limit: u8) -> Self {
        Self {
            fast_acquisition: fast_acquisition != 0,
            time_limit: requested.min(BATHTUB_TIME_LIMIT_MAX),
            event_limit,
        }
    }
}

/// Horizontal bathtub start:
/// `[lane, fast_acq, limit_hi, limit_lo(4, BE), event_limit]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HorizontalBathtubRequest {
    pub lane: u8,
    /// The time limit as sent, before clamping.
    pub requested_time_limit: u64,
    pub limits: BathtubLimits,
}

impl HorizontalBathtubRequest {
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let requested = time_limit(frame, 2)?;
        Some(Self {
            lane: data(frame, 0)?,
            requested_time_limit: requested,
            limits: BathtubLimits::new(
                data(frame, 1)?,
                requested,
                data(frame, 7)?,
            ),
        })
    }
}

/// Vertical or 2D bathtub start. The 2D form carries a signed phase
/// after the lane and captures one vertical slice at that phase:
///
/// ```text
/// vertical: [lane,        outer_eye, fast_acq, limit(5), event_limit]
/// 2D:       [lane, phase, outer_eye, fast_acq, limit(5), event_limit]
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VerticalBathtubRequest {
    pub lane: u8,
    pub phase: Option<i8>,
    pub outer_eye: bool,
    pub requested_time_limit: u64,
    pub limits: BathtubLimits,
}

impl VerticalBathtubRequest {
    pub fn parse(frame: &[u8]) -> Option<Self> {
        Self::parse_at(frame, 0, None)
    }

    pub fn parse_2d(frame: &[u8]) -> Option<Self> {
        let phase = data(frame, 1)? as i8;
        Self::parse_at(frame, 1, Some(phase))
    }

    fn parse_at(frame: &[u8], skip: usize, phase: Option<i8>) -> Option<Self> {
        let requested = time_limit(frame, skip + 3)?;
        Some(Self {
            lane: data(frame, 0)?,
            phase,
            outer_eye: data(frame, skip + 1)? != 0,
            requested_time_limit: requested,
            limits: BathtubLimits::new(
                data(frame, skip + 2)?,
                requested,
                data(frame, skip + 8)?,
            ),
        })
    }
}

macro_rules! snapshot {
    (
        $(#[$attr:meta])*
        pub struct $name:ident { $(pub $field:ident: $ty:ty = $zero:expr,)* }
    ) => {
        $(#[$attr])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq,
            FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
        )]
        #[repr(C)]
        pub struct $name {
            $(pub $field: $ty,)*
        }

        impl $name {
            pub const SIZE: usize = core::mem::size_of::<Self>();
            pub const ZERO: Self = Self { $($field: $zero,)* };
        }
    };
}

snapshot! {
    /// Receiver adaptation object of one lane.
    pub struct RxAdaptObj {
        pub iq_offset: U32 = U32::ZERO,
        pub afir_offset: U32 = U32::ZERO,
        pub afir_c1: U32 = U32::ZERO,
        pub afir_c2: U32 = U32::ZERO,
        pub afir_c3: U32 = U32::ZERO,
        pub dc_offset: U32 = U32::ZERO,
        pub udfe_thr_00: U32 = U32::ZERO,
        pub udfe_thr_11: U32 = U32::ZERO,
        pub median_amp: U32 = U32::ZERO,
    }
}

snapshot! {
    /// Receiver phase-generator and offset-DAC calibration of one lane.
    pub struct RxCalibValues {
        pub phgen_state_obs: U32 = U32::ZERO,
        pub phgen_dac_code_n_obs: U32 = U32::ZERO,
        pub phgen_dac_code_p_obs: U32 = U32::ZERO,
        pub phgen_ct_n_obs: U32 = U32::ZERO,
        pub phgen_ct_p_obs: U32 = U32::ZERO,
        pub phgen_update_dir_n_obs: U32 = U32::ZERO,
        pub phgen_update_dir_p_obs: U32 = U32::ZERO,
        pub phgen_sign: U32 = U32::ZERO,
        pub phgen_unenc: U32 = U32::ZERO,
        pub ocdac_d_sign: U32 = U32::ZERO,
        pub ocdac_d_unenc: U32 = U32::ZERO,
    }
}

snapshot! {
    /// Clock synthesis unit calibration and status.
    pub struct CsuCalibStatus {
        pub ppm_offset: U32 = U32::ZERO,
        pub vco_mom_val: U32 = U32::ZERO,
        pub ic_ctrl_curr_addr: U32 = U32::ZERO,
        pub acc_val_msb: U32 = U32::ZERO,
        pub acc_val_lsb: U32 = U32::ZERO,
        pub csu_status: U32 = U32::ZERO,
    }
}

snapshot! {
    /// PRBS checker error count per lane.
    pub struct PrbsErrorCount {
        pub count: [U32; 8] = [U32::ZERO; 8],
    }
}

snapshot! {
    pub struct HorizontalBathtub {
        pub bins: [U32; 32] = [U32::ZERO; 32],
    }
}

snapshot! {
    /// Vertical bathtub, also used for a single 2D phase slice.
    pub struct VerticalBathtub {
        pub bins: [U32; 64] = [U32::ZERO; 64],
    }
}

const_assert_eq!(RxAdaptObj::SIZE, 36);
const_assert_eq!(RxCalibValues::SIZE, 44);
const_assert_eq!(CsuCalibStatus::SIZE, 24);
const_assert_eq!(PrbsErrorCount::SIZE, 32);
const_assert_eq!(HorizontalBathtub::SIZE, 128);
const_assert_eq!(VerticalBathtub::SIZE, 256);
