// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hardware the engine drives but does not implement.
//!
//! Each trait is a narrow contract onto a block whose algorithms live
//! elsewhere: link training math, memory training, register decode. The
//! engine only sequences calls and reports what comes back. Fallible calls
//! return the block's raw code in [`HwError`] so it can be handed to the host
//! untouched as the extended error.

use exp_api::pqm::{
    BathtubLimits, CsuCalibStatus, HorizontalBathtub, PrbsMode, RxAdaptObj,
    RxCalibValues, UserPattern, VerticalBathtub,
};
use exp_api::{LaneConfig, LaneMask, SerdesFreq};

/// Raw failure code from a hardware collaborator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HwError(pub u32);

/// Pattern generator or checker setting for one lane.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrbsControl {
    Enable(PrbsMode, UserPattern),
    Disable,
}

/// The high-speed SerDes link.
pub trait SerdesLink {
    fn init(
        &mut self,
        lanes: LaneConfig,
        freq: SerdesFreq,
        dfe: bool,
    ) -> Result<(), HwError>;

    /// Brings the lanes up without a far end, for external loopback.
    fn standalone_init(
        &mut self,
        lanes: LaneConfig,
        dfe: bool,
    ) -> Result<(), HwError>;

    fn loopback_test(&mut self, lanes: LaneConfig) -> Result<(), HwError>;

    /// Corrects polarity on the `active` lanes, a subset of the configured
    /// `pattern` lanes. Returns the lanes still usable afterwards, which is
    /// fewer than `pattern` when the link comes up degraded.
    fn lane_inversion_config(
        &mut self,
        pattern: LaneMask,
        active: LaneMask,
    ) -> Result<LaneMask, HwError>;

    fn adapt_step1(
        &mut self,
        dfe: bool,
        adaptation: bool,
        lanes: LaneMask,
    ) -> Result<(), HwError>;

    fn adapt_step2(
        &mut self,
        dfe: bool,
        adaptation: bool,
        lanes: LaneMask,
    ) -> Result<(), HwError>;

    /// Returns the link to its power-on state.
    fn reset(&mut self);

    fn capture_rx_adaptation(&mut self, lane: u8)
    -> Result<RxAdaptObj, HwError>;

    fn capture_rx_calibration(
        &mut self,
        lane: u8,
    ) -> Result<RxCalibValues, HwError>;

    fn capture_csu_calibration(
        &mut self,
        lane: u8,
    ) -> Result<CsuCalibStatus, HwError>;

    fn pattern_monitor(&mut self, lane: u8, control: PrbsControl);

    fn pattern_generator(&mut self, lane: u8, control: PrbsControl);

    fn read_error_count(&mut self, lane: u8) -> Result<u32, HwError>;

    fn horizontal_bathtub(
        &mut self,
        lane: u8,
        limits: BathtubLimits,
    ) -> Result<HorizontalBathtub, HwError>;

    /// Captures a vertical bathtub; with a phase, the single slice of a 2D
    /// eye at that phase.
    fn vertical_bathtub(
        &mut self,
        lane: u8,
        phase: Option<i8>,
        outer_eye: bool,
        limits: BathtubLimits,
    ) -> Result<VerticalBathtub, HwError>;
}

/// The OpenCAPI data-link layer sitting on top of the SerDes.
pub trait DataLink {
    /// Waits, bounded, for training pattern A or B on the lanes in
    /// `pattern`. Returns the lanes it was seen on, or `None` on timeout.
    fn wait_rx_pattern(&mut self, pattern: LaneMask) -> Option<LaneMask>;

    /// Applies data-link configuration and takes the link out of reset.
    ///
    /// Touches registers shared with the background link poller, so the
    /// engine calls it inside a critical section.
    fn configure(&mut self) -> bool;

    /// Disables the unused half of the link for x4 operation. Same
    /// constraint as [`Self::configure`].
    fn x4_lane_mode(&mut self);
}

/// The memory PHY.
pub trait MemoryInterface {
    /// Exact size of the configuration block accepted by [`Self::init`].
    fn config_len(&self) -> usize;

    fn init(&mut self, config: &[u8]) -> Result<(), HwError>;

    fn train(&mut self) -> Result<(), HwError>;

    /// Copies the last training results into `out`, returning their length.
    fn results(&self, out: &mut [u8]) -> usize;

    /// Captures a read (`write == false`) or write eye into `out`,
    /// returning its length.
    fn capture_eye(
        &mut self,
        write: bool,
        out: &mut [u8],
    ) -> Result<usize, HwError>;

    fn force_delay_line_update(&mut self) -> Result<(), HwError>;
}

/// Why a register address was refused.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegAccessError {
    OutOfRange,
    Prohibited,
}

/// 32-bit register space reachable from the host.
pub trait RegisterBus {
    fn read(&mut self, addr: u32) -> u32;

    fn write(&mut self, addr: u32, value: u32);

    fn check(&self, _addr: u32) -> Result<(), RegAccessError> {
        Ok(())
    }
}

/// Direct volatile access to the adapter's own address space.
pub struct MmioBus;

impl RegisterBus for MmioBus {
    fn read(&mut self, addr: u32) -> u32 {
        // Safety: the host is trusted with the register map; the address
        // has passed `check`.
        unsafe { (addr as usize as *const u32).read_volatile() }
    }

    fn write(&mut self, addr: u32, value: u32) {
        // Safety: as above.
        unsafe { (addr as usize as *mut u32).write_volatile(value) }
    }

    fn check(&self, addr: u32) -> Result<(), RegAccessError> {
        if addr % 4 != 0 {
            return Err(RegAccessError::Prohibited);
        }
        Ok(())
    }
}

/// The collaborators used by deferred work.
pub struct Hardware<S, D, M> {
    pub link: S,
    pub dlx: D,
    pub mem: M,
}
