// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bare collaborators for driving the engine from outside the crate.

#![allow(dead_code)]

use std::collections::VecDeque;

use drv_exp_twi_target::{Activity, PortError, TwiTarget, TwiTransport};
use ech_core::hw::{
    DataLink, Hardware, HwError, MemoryInterface, PrbsControl, RegisterBus,
    SerdesLink,
};
use ech_core::twi::ShortFramePort;
use ech_core::ProtocolEngine;
use exp_api::pqm::{
    BathtubLimits, CsuCalibStatus, HorizontalBathtub, RxAdaptObj,
    RxCalibValues, VerticalBathtub,
};
use exp_api::{LaneConfig, LaneMask, SerdesFreq};

#[derive(Default)]
pub struct Port {
    pub activity: VecDeque<Activity>,
    pub rx: VecDeque<u8>,
    pub sent: Vec<Vec<u8>>,
}

impl TwiTarget for Port {
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

/// Register space that reads back zero and accepts everything.
#[derive(Default)]
pub struct Regs {
    pub writes: Vec<(u32, u32)>,
}

impl RegisterBus for Regs {
    fn read(&mut self, _addr: u32) -> u32 {
        0
    }

    fn write(&mut self, addr: u32, value: u32) {
        self.writes.push((addr, value));
    }
}

/// A link on which every operation succeeds unless told otherwise.
#[derive(Default)]
pub struct Link {
    pub inits: usize,
    pub adapted: Vec<LaneMask>,
    pub horizontal: Vec<(u8, BathtubLimits)>,
    pub fail_capture: Option<HwError>,
}

impl SerdesLink for Link {
    fn init(&mut self, _: LaneConfig, _: SerdesFreq, _: bool) -> Result<(), HwError> {
        self.inits += 1;
        Ok(())
    }

    fn standalone_init(&mut self, _: LaneConfig, _: bool) -> Result<(), HwError> {
        Ok(())
    }

    fn loopback_test(&mut self, _: LaneConfig) -> Result<(), HwError> {
        Ok(())
    }

    fn lane_inversion_config(
        &mut self,
        _: LaneMask,
        active: LaneMask,
    ) -> Result<LaneMask, HwError> {
        Ok(active)
    }

    fn adapt_step1(&mut self, _: bool, _: bool, lanes: LaneMask) -> Result<(), HwError> {
        self.adapted.push(lanes);
        Ok(())
    }

    fn adapt_step2(&mut self, _: bool, _: bool, lanes: LaneMask) -> Result<(), HwError> {
        self.adapted.push(lanes);
        Ok(())
    }

    fn reset(&mut self) {}

    fn capture_rx_adaptation(&mut self, _: u8) -> Result<RxAdaptObj, HwError> {
        match self.fail_capture {
            Some(e) => Err(e),
            None => Ok(RxAdaptObj::ZERO),
        }
    }

    fn capture_rx_calibration(&mut self, _: u8) -> Result<RxCalibValues, HwError> {
        Ok(RxCalibValues::ZERO)
    }

    fn capture_csu_calibration(&mut self, _: u8) -> Result<CsuCalibStatus, HwError> {
        Ok(CsuCalibStatus::ZERO)
    }

    fn pattern_monitor(&mut self, _: u8, _: PrbsControl) {}

    fn pattern_generator(&mut self, _: u8, _: PrbsControl) {}

    fn read_error_count(&mut self, _: u8) -> Result<u32, HwError> {
        Ok(0)
    }

    fn horizontal_bathtub(
        &mut self,
        lane: u8,
        limits: BathtubLimits,
    ) -> Result<HorizontalBathtub, HwError> {
        self.horizontal.push((lane, limits));
        Ok(HorizontalBathtub::ZERO)
    }

    fn vertical_bathtub(
        &mut self,
        _: u8,
        _: Option<i8>,
        _: bool,
        _: BathtubLimits,
    ) -> Result<VerticalBathtub, HwError> {
        Ok(VerticalBathtub::ZERO)
    }
}

#[derive(Default)]
pub struct Dlx;

impl DataLink for Dlx {
    fn wait_rx_pattern(&mut self, pattern: LaneMask) -> Option<LaneMask> {
        Some(pattern)
    }

    fn configure(&mut self) -> bool {
        true
    }

    fn x4_lane_mode(&mut self) {}
}

#[derive(Default)]
pub struct Mem;

impl MemoryInterface for Mem {
    fn config_len(&self) -> usize {
        0
    }

    fn init(&mut self, _: &[u8]) -> Result<(), HwError> {
        Ok(())
    }

    fn train(&mut self) -> Result<(), HwError> {
        Ok(())
    }

    fn results(&self, _: &mut [u8]) -> usize {
        0
    }

    fn capture_eye(&mut self, _: bool, _: &mut [u8]) -> Result<usize, HwError> {
        Ok(0)
    }

    fn force_delay_line_update(&mut self) -> Result<(), HwError> {
        Ok(())
    }
}

pub type TestPort = ShortFramePort<Port, Regs, Link>;

pub fn short_port() -> TestPort {
    ShortFramePort::new(TwiTransport::new(Port::default()), Regs::default(), Link::default())
}

pub fn hardware() -> Hardware<Link, Dlx, Mem> {
    Hardware {
        link: Link::default(),
        dlx: Dlx,
        mem: Mem,
    }
}

/// Delivers `bytes` as one transfer and lets the engine dispatch it.
pub fn host_writes(engine: &ProtocolEngine, port: &mut TestPort, bytes: &[u8]) {
    let p = port.transport.port_mut();
    p.rx.extend(bytes);
    p.activity.push_back(Activity::RX);
    engine.poll_short(port).unwrap();
}

/// Issues a Status command and returns its reply.
pub fn status(engine: &ProtocolEngine, port: &mut TestPort) -> Vec<u8> {
    host_writes(engine, port, &[0x02]);
    port.transport.port().sent.last().cloned().unwrap_or_default()
}
