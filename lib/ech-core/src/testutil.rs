// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recording stand-ins for the hardware collaborators.

use std::collections::{HashMap, VecDeque};

use drv_exp_oc_mailbox::Doorbell;
use drv_exp_twi_target::{Activity, PortError, TwiTarget};
use exp_api::pqm::{
    BathtubLimits, CsuCalibStatus, HorizontalBathtub, RxAdaptObj,
    RxCalibValues, VerticalBathtub,
};
use exp_api::{LaneConfig, LaneMask, SerdesFreq};
use zerocopy::byteorder::big_endian::U32;

use crate::hw::{
    DataLink, HwError, MemoryInterface, PrbsControl, RegAccessError,
    RegisterBus, SerdesLink,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Init(LaneConfig, SerdesFreq, bool),
    StandaloneInit,
    LoopbackTest,
    LaneInversion(LaneMask, LaneMask),
    Adapt1(bool, bool, LaneMask),
    Adapt2(bool, bool, LaneMask),
    Reset,
    CaptureRxAdapt(u8),
    CaptureRxCalib(u8),
    CaptureCsu(u8),
    Monitor(u8, PrbsControl),
    Generator(u8, PrbsControl),
    ErrorCount(u8),
    HorzBathtub(u8, BathtubLimits),
    VertBathtub(u8, Option<i8>, bool, BathtubLimits),
}

#[derive(Default)]
pub struct FakeLink {
    pub calls: Vec<Call>,
    pub fail_init: Option<HwError>,
    pub fail_loopback: Option<HwError>,
    pub fail_inversion: Option<HwError>,
    pub fail_adapt1: Option<HwError>,
    pub fail_adapt2: Option<HwError>,
    pub fail_capture: Option<HwError>,
    /// First word of every captured snapshot.
    pub seed: u32,
    pub error_counts: [u32; 8],
}

fn fail(e: Option<HwError>) -> Result<(), HwError> {
    e.map_or(Ok(()), Err)
}

impl SerdesLink for FakeLink {
    fn init(
        &mut self,
        lanes: LaneConfig,
        freq: SerdesFreq,
        dfe: bool,
    ) -> Result<(), HwError> {
        self.calls.push(Call::Init(lanes, freq, dfe));
        fail(self.fail_init)
    }

    fn standalone_init(
        &mut self,
        _lanes: LaneConfig,
        _dfe: bool,
    ) -> Result<(), HwError> {
        self.calls.push(Call::StandaloneInit);
        Ok(())
    }

    fn loopback_test(&mut self, _lanes: LaneConfig) -> Result<(), HwError> {
        self.calls.push(Call::LoopbackTest);
        fail(self.fail_loopback)
    }

    fn lane_inversion_config(
        &mut self,
        pattern: LaneMask,
        active: LaneMask,
    ) -> Result<LaneMask, HwError> {
        self.calls.push(Call::LaneInversion(pattern, active));
        fail(self.fail_inversion)?;
        Ok(active)
    }

    fn adapt_step1(
        &mut self,
        dfe: bool,
        adaptation: bool,
        lanes: LaneMask,
    ) -> Result<(), HwError> {
        self.calls.push(Call::Adapt1(dfe, adaptation, lanes));
        fail(self.fail_adapt1)
    }

    fn adapt_step2(
        &mut self,
        dfe: bool,
        adaptation: bool,
        lanes: LaneMask,
    ) -> Result<(), HwError> {
        self.calls.push(Call::Adapt2(dfe, adaptation, lanes));
        fail(self.fail_adapt2)
    }

    fn reset(&mut self) {
        self.calls.push(Call::Reset);
    }

    fn capture_rx_adaptation(
        &mut self,
        lane: u8,
    ) -> Result<RxAdaptObj, HwError> {
        self.calls.push(Call::CaptureRxAdapt(lane));
        fail(self.fail_capture)?;
        Ok(RxAdaptObj {
            iq_offset: U32::new(self.seed),
            ..RxAdaptObj::ZERO
        })
    }

    fn capture_rx_calibration(
        &mut self,
        lane: u8,
    ) -> Result<RxCalibValues, HwError> {
        self.calls.push(Call::CaptureRxCalib(lane));
        fail(self.fail_capture)?;
        Ok(RxCalibValues {
            phgen_state_obs: U32::new(self.seed),
            ..RxCalibValues::ZERO
        })
    }

    fn capture_csu_calibration(
        &mut self,
        lane: u8,
    ) -> Result<CsuCalibStatus, HwError> {
        self.calls.push(Call::CaptureCsu(lane));
        fail(self.fail_capture)?;
        Ok(CsuCalibStatus {
            ppm_offset: U32::new(self.seed),
            ..CsuCalibStatus::ZERO
        })
    }

    fn pattern_monitor(&mut self, lane: u8, control: PrbsControl) {
        self.calls.push(Call::Monitor(lane, control));
    }

    fn pattern_generator(&mut self, lane: u8, control: PrbsControl) {
        self.calls.push(Call::Generator(lane, control));
    }

    fn read_error_count(&mut self, lane: u8) -> Result<u32, HwError> {
        self.calls.push(Call::ErrorCount(lane));
        fail(self.fail_capture)?;
        Ok(self.error_counts[usize::from(lane)])
    }

    fn horizontal_bathtub(
        &mut self,
        lane: u8,
        limits: BathtubLimits,
    ) -> Result<HorizontalBathtub, HwError> {
        self.calls.push(Call::HorzBathtub(lane, limits));
        fail(self.fail_capture)?;
        let mut snap = HorizontalBathtub::ZERO;
        snap.bins[0] = U32::new(self.seed);
        Ok(snap)
    }

    fn vertical_bathtub(
        &mut self,
        lane: u8,
        phase: Option<i8>,
        outer_eye: bool,
        limits: BathtubLimits,
    ) -> Result<VerticalBathtub, HwError> {
        self.calls
            .push(Call::VertBathtub(lane, phase, outer_eye, limits));
        fail(self.fail_capture)?;
        let mut snap = VerticalBathtub::ZERO;
        snap.bins[0] = U32::new(self.seed);
        Ok(snap)
    }
}

pub struct FakeDlx {
    pub pattern_found: bool,
    /// Lanes the pattern shows up on; all of them when `None`.
    pub pattern_lanes: Option<LaneMask>,
    pub configure_ok: bool,
    pub waited_on: Option<LaneMask>,
    pub configured: bool,
    pub x4: bool,
}

impl Default for FakeDlx {
    fn default() -> Self {
        Self {
            pattern_found: true,
            pattern_lanes: None,
            configure_ok: true,
            waited_on: None,
            configured: false,
            x4: false,
        }
    }
}

impl DataLink for FakeDlx {
    fn wait_rx_pattern(&mut self, pattern: LaneMask) -> Option<LaneMask> {
        self.waited_on = Some(pattern);
        self.pattern_found
            .then(|| self.pattern_lanes.unwrap_or(pattern))
    }

    fn configure(&mut self) -> bool {
        self.configured = self.configure_ok;
        self.configure_ok
    }

    fn x4_lane_mode(&mut self) {
        self.x4 = true;
    }
}

#[derive(Default)]
pub struct FakeMem {
    pub config_len: usize,
    pub config: Vec<u8>,
    pub trained: bool,
    pub fail_init: Option<HwError>,
    pub fail_train: Option<HwError>,
    pub fail_delay_line: Option<HwError>,
    pub results: Vec<u8>,
    /// The `write` argument of each eye capture.
    pub eyes: Vec<bool>,
    pub eye: Vec<u8>,
    pub delay_line_updates: usize,
}

impl MemoryInterface for FakeMem {
    fn config_len(&self) -> usize {
        self.config_len
    }

    fn init(&mut self, config: &[u8]) -> Result<(), HwError> {
        self.config = config.to_vec();
        fail(self.fail_init)
    }

    fn train(&mut self) -> Result<(), HwError> {
        fail(self.fail_train)?;
        self.trained = true;
        Ok(())
    }

    fn results(&self, out: &mut [u8]) -> usize {
        let n = self.results.len().min(out.len());
        out[..n].copy_from_slice(&self.results[..n]);
        n
    }

    fn capture_eye(
        &mut self,
        write: bool,
        out: &mut [u8],
    ) -> Result<usize, HwError> {
        self.eyes.push(write);
        let n = self.eye.len().min(out.len());
        out[..n].copy_from_slice(&self.eye[..n]);
        Ok(n)
    }

    fn force_delay_line_update(&mut self) -> Result<(), HwError> {
        self.delay_line_updates += 1;
        fail(self.fail_delay_line)
    }
}

/// Register space backed by a map. Registers in `stuck` ignore writes.
#[derive(Default)]
pub struct FakeRegs {
    pub values: HashMap<u32, u32>,
    pub stuck: Vec<u32>,
    pub out_of_range: Vec<u32>,
    pub prohibited: Vec<u32>,
    pub writes: Vec<(u32, u32)>,
}

impl RegisterBus for FakeRegs {
    fn read(&mut self, addr: u32) -> u32 {
        self.values.get(&addr).copied().unwrap_or(0)
    }

    fn write(&mut self, addr: u32, value: u32) {
        self.writes.push((addr, value));
        if !self.stuck.contains(&addr) {
            self.values.insert(addr, value);
        }
    }

    fn check(&self, addr: u32) -> Result<(), RegAccessError> {
        if self.out_of_range.contains(&addr) {
            Err(RegAccessError::OutOfRange)
        } else if self.prohibited.contains(&addr) {
            Err(RegAccessError::Prohibited)
        } else {
            Ok(())
        }
    }
}

/// Two-wire port fed by the test. Each `host_writes` call arrives as one
/// transfer on the next poll.
#[derive(Default)]
pub struct FakePort {
    pub activity: VecDeque<Activity>,
    pub rx: VecDeque<u8>,
    pub sent: Vec<Vec<u8>>,
}

impl FakePort {
    pub fn host_writes(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
        self.activity.push_back(Activity::RX);
    }
}

impl TwiTarget for FakePort {
    fn poll(&mut self) -> Activity {
        self.activity.pop_front().unwrap_or(Activity::empty())
    }

    fn rx_len(&self) -> usize {
        self.rx.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        let n = buf.len().min(self.rx.len());
        for (b, r) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *b = r;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), PortError> {
        self.sent.push(data.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeBell {
    pub pending: bool,
    pub rung: usize,
}

impl Doorbell for FakeBell {
    fn take_request(&mut self) -> bool {
        core::mem::take(&mut self.pending)
    }

    fn ring_response(&mut self) {
        self.rung += 1;
    }
}
