// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot configuration flags and the status codes of the bring-up sequence.

use bitflags::bitflags;
use hubpack::SerializedSize;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::{LaneConfig, SerdesFreq, twi::CMD_DATA_OFFSET};

bitflags! {
    /// Status byte of a completed boot configuration command. Zero is
    /// success.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct BootConfigStatus: u8 {
        /// One or more fields failed validation; the extended error holds
        /// a [`ValidationFailure`].
        const FAILED = 0x01;
        const LOOPBACK_FAIL = 0x02;
        /// Link initialization or either adaptation step failed.
        const SERDES_INIT_FAIL = 0x04;
        const DLX_CONFIG_FAIL = 0x08;
        const LANE_INVERSION_FAIL = 0x10;
    }
}

bitflags! {
    /// Extended error code accompanying [`BootConfigStatus::FAILED`]; every
    /// invalid field sets its own bit.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ValidationFailure: u8 {
        const UNSUPPORTED_SERDES_FREQ = 0x01;
        const UNSUPPORTED_TL = 0x02;
        const UNSUPPORTED_LANE_CONFIG = 0x04;
    }
}

/// Extended code accompanying [`BootConfigStatus::FAILED`] when the boot
/// step is neither 0 nor 1. Outside the [`ValidationFailure`] bits.
pub const UNSUPPORTED_BOOT_STAGE: u32 = 0x08;

/// Extended codes accompanying [`BootConfigStatus::DLX_CONFIG_FAIL`].
pub mod dlx {
    pub const PATTERN_A_B_FAILED: u32 = 0x01;
    pub const CONFIG_FW_FAILED: u32 = 0x02;
}

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
pub enum FwMode {
    Normal = 0,
    Manufacturing = 1,
    ProductQualification = 2,
}

/// Transport layer the host intends to use. It has no effect on the
/// firmware beyond being validated and recorded.
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
pub enum TlMode {
    Ocapi = 0,
    Twi = 1,
    Jtag = 2,
}

/// Lane-mode field encoding.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum LaneMode {
    X8 = 1,
    X4 = 2,
}

impl From<LaneMode> for LaneConfig {
    fn from(mode: LaneMode) -> Self {
        match mode {
            LaneMode::X8 => LaneConfig::X8,
            LaneMode::X4 => LaneConfig::X4,
        }
    }
}

/// The 16-bit flags word carried in a boot configuration frame.
///
/// ```text
///  15   14:13   12     11:10   9:8   7    6:4    3:0
/// adapt fw_mode lpbk  tl_mode step  dfe  lanes  freq
/// ```
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct BootConfigFlags(pub u16);

/// Fields of a boot configuration that passed validation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ValidLinkConfig {
    pub tl_mode: TlMode,
    pub freq: SerdesFreq,
    pub lanes: LaneConfig,
}

impl BootConfigFlags {
    const ADAPTATION: u16 = 0x8000;
    const FW_MODE_MASK: u16 = 0x6000;
    const FW_MODE_SHIFT: u16 = 13;
    const LOOPBACK: u16 = 0x1000;
    const TL_MODE_MASK: u16 = 0x0c00;
    const TL_MODE_SHIFT: u16 = 10;
    const BOOT_STEP_MASK: u16 = 0x0300;
    const BOOT_STEP_SHIFT: u16 = 8;
    const DFE: u16 = 0x0080;
    const LANE_MODE_MASK: u16 = 0x0070;
    const LANE_MODE_SHIFT: u16 = 4;
    const FREQ_MASK: u16 = 0x000f;

    /// Extracts the flags from a complete boot configuration frame. They
    /// are the last two data bytes, high byte first.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        let hi = *frame.get(CMD_DATA_OFFSET + 2)?;
        let lo = *frame.get(CMD_DATA_OFFSET + 3)?;
        Some(Self(u16::from_be_bytes([hi, lo])))
    }

    fn field(self, mask: u16, shift: u16) -> u8 {
        ((self.0 & mask) >> shift) as u8
    }

    pub fn adaptation(self) -> bool {
        self.0 & Self::ADAPTATION != 0
    }

    /// Firmware mode, or `None` for the unassigned encoding.
    pub fn fw_mode(self) -> Option<FwMode> {
        num_traits::FromPrimitive::from_u8(
            self.field(Self::FW_MODE_MASK, Self::FW_MODE_SHIFT),
        )
    }

    pub fn loopback(self) -> bool {
        self.0 & Self::LOOPBACK != 0
    }

    pub fn tl_mode(self) -> Option<TlMode> {
        num_traits::FromPrimitive::from_u8(
            self.field(Self::TL_MODE_MASK, Self::TL_MODE_SHIFT),
        )
    }

    pub fn boot_step(self) -> u8 {
        self.field(Self::BOOT_STEP_MASK, Self::BOOT_STEP_SHIFT)
    }

    pub fn dfe(self) -> bool {
        self.0 & Self::DFE != 0
    }

    pub fn lane_mode(self) -> Option<LaneMode> {
        num_traits::FromPrimitive::from_u8(
            self.field(Self::LANE_MODE_MASK, Self::LANE_MODE_SHIFT),
        )
    }

    pub fn serdes_freq(self) -> Option<SerdesFreq> {
        SerdesFreq::from_code(self.field(Self::FREQ_MASK, 0))
    }

    /// Validates the transport layer, frequency and lane fields
    /// independently, reporting every field that is out of range.
    pub fn validate(self) -> Result<ValidLinkConfig, ValidationFailure> {
        let tl_mode = self.tl_mode();
        let freq = self.serdes_freq();
        let lanes = self.lane_mode();

        let mut failed = ValidationFailure::empty();
        failed.set(ValidationFailure::UNSUPPORTED_TL, tl_mode.is_none());
        failed.set(ValidationFailure::UNSUPPORTED_SERDES_FREQ, freq.is_none());
        failed
            .set(ValidationFailure::UNSUPPORTED_LANE_CONFIG, lanes.is_none());

        match (tl_mode, freq, lanes) {
            (Some(tl_mode), Some(freq), Some(lanes)) => Ok(ValidLinkConfig {
                tl_mode,
                freq,
                lanes: lanes.into(),
            }),
            _ => Err(failed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_come_from_last_two_data_bytes() {
        let frame = [0x01, 0x04, 0x00, 0x00, 0x81, 0x23];
        let flags = BootConfigFlags::from_frame(&frame).unwrap();
        assert_eq!(flags, BootConfigFlags(0x8123));
        assert!(BootConfigFlags::from_frame(&frame[..5]).is_none());
    }

    #[test]
    fn field_extraction() {
        // adaptation, manufacturing, loopback, TWI, step 1, dfe, x4, 25.6
        let flags = BootConfigFlags(0x8000 | 0x2000 | 0x1000 | 0x0400 | 0x0100
            | 0x0080 | 0x0020 | 0x0003);
        assert!(flags.adaptation());
        assert_eq!(flags.fw_mode(), Some(FwMode::Manufacturing));
        assert!(flags.loopback());
        assert_eq!(flags.tl_mode(), Some(TlMode::Twi));
        assert_eq!(flags.boot_step(), 1);
        assert!(flags.dfe());
        assert_eq!(flags.lane_mode(), Some(LaneMode::X4));
        assert_eq!(flags.serdes_freq(), Some(SerdesFreq::Gbps25_60));

        let flags = BootConfigFlags(0x6000);
        assert_eq!(flags.fw_mode(), None);
        assert!(!flags.adaptation());
        assert!(!flags.dfe());
    }

    #[test]
    fn valid_configuration() {
        let cfg = BootConfigFlags(0x0811).validate().unwrap();
        assert_eq!(cfg.tl_mode, TlMode::Jtag);
        assert_eq!(cfg.freq, SerdesFreq::Gbps21_33);
        assert_eq!(cfg.lanes, LaneConfig::X8);
    }

    #[test]
    fn every_bad_field_is_reported() {
        let err = BootConfigFlags(0x0c00 | 0x0070 | 0x000f)
            .validate()
            .unwrap_err();
        assert_eq!(err, ValidationFailure::all());
    }
}
