// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Link bring-up driven by the BootConfig command.
//!
//! The host sends BootConfig twice. Step 0 validates the link parameters and
//! initializes the SerDes; Step 1, once the far end is transmitting, waits
//! for the training pattern, fixes lane polarity, adapts, and brings up the
//! data link. A product-qualification BootConfig instead turns on PQM mode
//! and leaves the link alone.

use core::sync::atomic::{AtomicBool, Ordering};

use exp_api::boot::dlx::{CONFIG_FW_FAILED, PATTERN_A_B_FAILED};
use exp_api::boot::{
    BootConfigFlags, BootConfigStatus, FwMode, TlMode, UNSUPPORTED_BOOT_STAGE,
    ValidationFailure,
};
use exp_api::{LaneConfig, LaneMask, SerdesFreq, TwiStatus};
use hubpack::SerializedSize;
use ringbuf::{ringbuf, ringbuf_entry};
use serde::{Deserialize, Serialize};

use crate::hw::{DataLink, HwError, SerdesLink};
use crate::status::Outcome;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    None,
    Flags(u16),
    PqmSelected,
    Invalid(ValidationFailure),
    Step0,
    LinkInit(Result<(), HwError>),
    Loopback,
    Step1,
    NoPattern,
    /// Lanes left after pattern detection and inversion correction.
    Active(LaneMask),
    Failed(BootConfigStatus, u32),
    LinkUp,
    UnsupportedStep(u8),
}

ringbuf!(Trace, 32, Trace::None);

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub enum BootState {
    Uninitialized,
    Step0Validated,
    Step1LinkUp,
}

/// Everything BootConfig has learned, kept for later steps and for the
/// diagnostic dump.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct BootConfigRecord {
    /// Flags of the most recent BootConfig, recorded before validation.
    pub raw_flags: BootConfigFlags,
    pub state: BootState,
    pub mfg_mode: bool,
    pub loopback: bool,
    pub tl_mode: Option<TlMode>,
    pub boot_step: u8,
    pub lanes: Option<LaneConfig>,
    /// Lanes that trained in the last Step 1; fewer than configured when
    /// the link runs degraded.
    pub active_lanes: LaneMask,
    pub freq: Option<SerdesFreq>,
    pub dfe: bool,
    pub adaptation: bool,
}

impl BootConfigRecord {
    pub const fn new(dfe: bool) -> Self {
        Self {
            raw_flags: BootConfigFlags(0),
            state: BootState::Uninitialized,
            mfg_mode: false,
            loopback: false,
            tl_mode: None,
            boot_step: 0,
            lanes: None,
            active_lanes: LaneMask::NONE,
            freq: None,
            dfe,
            adaptation: false,
        }
    }
}

/// A failed bring-up stage: the status bitmask for the host plus the code
/// behind it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BootConfigFailure {
    pub status: BootConfigStatus,
    pub extended: u32,
}

impl BootConfigFailure {
    fn hw(status: BootConfigStatus, e: HwError) -> Self {
        Self {
            status,
            extended: e.0,
        }
    }
}

impl From<BootConfigFailure> for Outcome {
    fn from(f: BootConfigFailure) -> Self {
        Outcome::with_extended(TwiStatus(f.status.bits()), f.extended)
    }
}

/// What a successful BootConfig did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BootEvent {
    /// The caller must turn PQM mode on.
    PqmSelected,
    Step0Complete,
    Step1Complete,
}

/// Runs one BootConfig frame against `rec`.
///
/// `oc_ready` is raised as soon as link initialization returns, whatever
/// its result, because from then on the data link can be polled.
pub fn execute(
    rec: &mut BootConfigRecord,
    flags: BootConfigFlags,
    link: &mut impl SerdesLink,
    dlx: &mut impl DataLink,
    oc_ready: &AtomicBool,
) -> Result<BootEvent, BootConfigFailure> {
    ringbuf_entry!(Trace::Flags(flags.0));
    rec.raw_flags = flags;

    if flags.fw_mode() == Some(FwMode::ProductQualification) {
        ringbuf_entry!(Trace::PqmSelected);
        rec.adaptation = flags.adaptation();
        return Ok(BootEvent::PqmSelected);
    }

    let step = flags.boot_step();
    rec.boot_step = step;
    let result = match step {
        0 => step0(rec, flags, link, dlx, oc_ready),
        1 => step1(rec, link, dlx),
        _ => {
            ringbuf_entry!(Trace::UnsupportedStep(step));
            Err(BootConfigFailure {
                status: BootConfigStatus::FAILED,
                extended: UNSUPPORTED_BOOT_STAGE,
            })
        }
    };
    if let Err(f) = result {
        ringbuf_entry!(Trace::Failed(f.status, f.extended));
    }
    result
}

fn step0(
    rec: &mut BootConfigRecord,
    flags: BootConfigFlags,
    link: &mut impl SerdesLink,
    dlx: &mut impl DataLink,
    oc_ready: &AtomicBool,
) -> Result<BootEvent, BootConfigFailure> {
    ringbuf_entry!(Trace::Step0);

    let cfg = flags.validate().map_err(|bad| {
        ringbuf_entry!(Trace::Invalid(bad));
        BootConfigFailure {
            status: BootConfigStatus::FAILED,
            extended: u32::from(bad.bits()),
        }
    })?;

    rec.tl_mode = Some(cfg.tl_mode);
    rec.freq = Some(cfg.freq);
    rec.lanes = Some(cfg.lanes);
    rec.dfe = flags.dfe();
    rec.adaptation = flags.adaptation();
    rec.state = BootState::Step0Validated;

    let init = link.init(cfg.lanes, cfg.freq, rec.dfe);
    oc_ready.store(true, Ordering::Release);
    ringbuf_entry!(Trace::LinkInit(init));
    init.map_err(|e| {
        BootConfigFailure::hw(BootConfigStatus::SERDES_INIT_FAIL, e)
    })?;

    if cfg.lanes == LaneConfig::X4 {
        critical_section::with(|_| dlx.x4_lane_mode());
    }

    if flags.fw_mode() == Some(FwMode::Manufacturing) {
        rec.mfg_mode = true;
        if flags.loopback() {
            ringbuf_entry!(Trace::Loopback);
            rec.loopback = true;
            let lb = |e| {
                BootConfigFailure::hw(BootConfigStatus::LOOPBACK_FAIL, e)
            };
            link.standalone_init(cfg.lanes, rec.dfe).map_err(lb)?;
            link.loopback_test(cfg.lanes).map_err(lb)?;
        }
    }

    Ok(BootEvent::Step0Complete)
}

fn step1(
    rec: &mut BootConfigRecord,
    link: &mut impl SerdesLink,
    dlx: &mut impl DataLink,
) -> Result<BootEvent, BootConfigFailure> {
    ringbuf_entry!(Trace::Step1);

    // Step 1 has nothing to work with until a Step 0 has validated the
    // lanes.
    let Some(lanes) = rec.lanes else {
        return Err(BootConfigFailure {
            status: BootConfigStatus::FAILED,
            extended: u32::from(
                ValidationFailure::UNSUPPORTED_LANE_CONFIG.bits(),
            ),
        });
    };

    rec.active_lanes = bring_up(link, dlx, lanes, rec.dfe, rec.adaptation)?;
    rec.state = BootState::Step1LinkUp;
    Ok(BootEvent::Step1Complete)
}

/// The pattern-wait, lane inversion, adaptation and data-link sequence,
/// shared with PQM lane training. Returns the lanes that came up.
///
/// Adaptation runs only on the lanes that carried the pattern and survived
/// inversion correction; in x4 mode that never includes the clock lane.
pub fn bring_up(
    link: &mut impl SerdesLink,
    dlx: &mut impl DataLink,
    lanes: LaneConfig,
    dfe: bool,
    adaptation: bool,
) -> Result<LaneMask, BootConfigFailure> {
    let Some(seen) = dlx.wait_rx_pattern(lanes.pattern) else {
        ringbuf_entry!(Trace::NoPattern);
        return Err(BootConfigFailure {
            status: BootConfigStatus::DLX_CONFIG_FAIL,
            extended: PATTERN_A_B_FAILED,
        });
    };

    let active =
        link.lane_inversion_config(lanes.pattern, seen).map_err(|e| {
            BootConfigFailure::hw(BootConfigStatus::LANE_INVERSION_FAIL, e)
        })?;
    ringbuf_entry!(Trace::Active(active));

    link.adapt_step1(dfe, adaptation, active).map_err(|e| {
        BootConfigFailure::hw(BootConfigStatus::SERDES_INIT_FAIL, e)
    })?;

    if !critical_section::with(|_| dlx.configure()) {
        return Err(BootConfigFailure {
            status: BootConfigStatus::DLX_CONFIG_FAIL,
            extended: CONFIG_FW_FAILED,
        });
    }

    link.adapt_step2(dfe, adaptation, active).map_err(|e| {
        BootConfigFailure::hw(BootConfigStatus::SERDES_INIT_FAIL, e)
    })?;

    ringbuf_entry!(Trace::LinkUp);
    Ok(active)
}
