// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire vocabulary for the Explorer adapter's host command interfaces.
//!
//! The host talks to the adapter over two channels:
//!
//! - short frames on the two-wire target port ([`twi`]), whose command set
//!   includes link bring-up ([`boot`]) and the manufacturing/test commands
//!   ([`pqm`]);
//! - CRC-framed structured messages in memory shared with the host ([`oc`]).
//!
//! Nothing in this crate touches hardware; it only describes the bytes.

#![cfg_attr(not(test), no_std)]

pub mod boot;
pub mod oc;
pub mod pqm;
pub mod twi;

pub use boot::{BootConfigFlags, BootConfigStatus, ValidationFailure};
pub use oc::{OcApiError, OcCommand, OcCommandHeader, OcFlags, OcResponseHeader};
pub use twi::{FwStage, TwiCommand, TwiStatus};

use hubpack::SerializedSize;
use serde::{Deserialize, Serialize};

/// A set of SerDes lanes, one bit per lane.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    SerializedSize,
)]
pub struct LaneMask(pub u8);

impl LaneMask {
    pub const NONE: Self = Self(0);

    pub fn contains(self, lane: u8) -> bool {
        lane < 8 && self.0 & (1 << lane) != 0
    }

    /// Iterates over the lane numbers in the set, lowest first.
    pub fn lanes(self) -> impl Iterator<Item = u8> {
        (0..8).filter(move |&lane| self.contains(lane))
    }
}

/// Lane selection for the high-speed link, along with the masks derived
/// from it.
///
/// `enable` is every lane the SerDes must bring up. In x4 operation this
/// includes lane 4, which carries the clock, but `pattern` (the lanes on
/// which a training pattern is expected) leaves it out.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct LaneConfig {
    pub lanes: u8,
    pub enable: LaneMask,
    pub pattern: LaneMask,
}

impl LaneConfig {
    pub const X8: Self = Self {
        lanes: 8,
        enable: LaneMask(0xff),
        pattern: LaneMask(0xff),
    };
    pub const X4: Self = Self {
        lanes: 4,
        enable: LaneMask(0xb5),
        pattern: LaneMask(0xa5),
    };
    pub const X1: Self = Self {
        lanes: 1,
        enable: LaneMask(0x01),
        pattern: LaneMask(0x01),
    };

    /// Looks up the configuration for a lane count, if it is one the link
    /// supports.
    pub fn for_lanes(lanes: u8) -> Option<Self> {
        match lanes {
            8 => Some(Self::X8),
            4 => Some(Self::X4),
            1 => Some(Self::X1),
            _ => None,
        }
    }
}

/// SerDes line rate. The discriminants are the wire encoding used by both
/// the boot configuration flags and the PQM frequency commands.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    num_derive::FromPrimitive,
    Serialize,
    Deserialize,
    SerializedSize,
)]
#[repr(u8)]
pub enum SerdesFreq {
    Gbps21_33 = 1,
    Gbps23_46 = 2,
    Gbps25_60 = 3,
}

impl SerdesFreq {
    pub fn from_code(code: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(code)
    }
}
