// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Product qualification (PQM) commands.
//!
//! Settings commands run immediately against [`PqmSession`]. Captures are
//! split in two: the Start command runs as a deferred job that stores a
//! snapshot in the session, and the matching Read command replies with
//! whatever the last successful Start stored.

use drv_exp_twi_target::{TwiError, TwiTarget, TwiTransport};
use exp_api::pqm::{
    self, CsuCalibStatus, HorizontalBathtub, HorizontalBathtubRequest,
    PrbsErrorCount, PrbsMode, RxAdaptObj, RxCalibValues, USER_PATTERN_LEN,
    UserPattern, VerticalBathtub, VerticalBathtubRequest,
};
use exp_api::boot::{BootConfigStatus, UNSUPPORTED_BOOT_STAGE};
use exp_api::twi::{CMD_DATA_OFFSET, RSP_DATA_OFFSET, RSP_LEN_OFFSET};
use exp_api::{LaneConfig, SerdesFreq, TwiStatus};
use ringbuf::{ringbuf, ringbuf_entry};
use zerocopy::IntoBytes;
use zerocopy::byteorder::big_endian::U32;

use crate::ProtocolEngine;
use crate::boot_config::{self, BootConfigFailure};
use crate::hw::{
    DataLink, Hardware, HwError, MemoryInterface, PrbsControl, SerdesLink,
};
use crate::status::Outcome;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    None,
    Lanes(u8),
    BadLanes(u8),
    Freq(u8),
    BadFreq(u8),
    PrbsMode(u8),
    BadPrbsMode(u8),
    NoLanes,
    Training { step: u8, dfe: bool },
    TrainingFailed(TwiStatus, u32),
    CaptureFailed(u32),
    Clamped { requested: u64, applied: u64 },
    DelayLineUpdateFailed(u32),
}

ringbuf!(Trace, 32, Trace::None);

/// Bytes in a PRBS error count reply: the length byte plus a count for
/// every possible lane, whatever the length byte says.
pub const ERR_COUNT_FRAME_LEN: usize = RSP_DATA_OFFSET + PrbsErrorCount::SIZE;

pub struct PqmSession {
    /// Whether PQM-gated commands are honored.
    pub enabled: bool,
    pub lanes: Option<LaneConfig>,
    pub freq: Option<SerdesFreq>,
    pub prbs_mode: PrbsMode,
    pub user_pattern: UserPattern,
    pub rx_adapt: RxAdaptObj,
    pub rx_calib: RxCalibValues,
    pub csu: CsuCalibStatus,
    pub err_count: PrbsErrorCount,
    pub horz: HorizontalBathtub,
    /// Shared by vertical and 2D captures.
    pub vert: VerticalBathtub,
}

impl Default for PqmSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PqmSession {
    pub const fn new() -> Self {
        Self {
            enabled: false,
            lanes: None,
            freq: None,
            prbs_mode: PrbsMode::Prbs5,
            user_pattern: UserPattern([0; USER_PATTERN_LEN]),
            rx_adapt: RxAdaptObj::ZERO,
            rx_calib: RxCalibValues::ZERO,
            csu: CsuCalibStatus::ZERO,
            err_count: PrbsErrorCount::ZERO,
            horz: HorizontalBathtub::ZERO,
            vert: VerticalBathtub::ZERO,
        }
    }

    /// Selects a lane count. Values above the widest link are out of range;
    /// anything else that is not a supported width is unsupported. Neither
    /// changes the current selection.
    pub fn set_lanes(&mut self, count: u8) -> Result<(), TwiStatus> {
        if count > pqm::MAX_LANES {
            return Err(pqm::LANE_OUT_OF_RANGE);
        }
        let cfg = LaneConfig::for_lanes(count).ok_or(pqm::LANE_UNSUPPORTED)?;
        self.lanes = Some(cfg);
        Ok(())
    }

    /// Selected lane count, or 0 before one is set.
    pub fn lane_count(&self) -> u8 {
        self.lanes.map_or(0, |cfg| cfg.lanes)
    }

    pub fn set_freq(&mut self, code: u8) -> Result<(), TwiStatus> {
        let freq =
            SerdesFreq::from_code(code).ok_or(pqm::FREQ_NOT_AVAILABLE)?;
        self.freq = Some(freq);
        Ok(())
    }

    /// Selected frequency code, or 0 before one is set.
    pub fn freq_code(&self) -> u8 {
        self.freq.map_or(0, |f| f as u8)
    }

    pub fn set_prbs_mode(&mut self, code: u8) -> Result<(), TwiStatus> {
        self.prbs_mode = PrbsMode::from_code(code)
            .ok_or(pqm::PRBS_PATTERN_NOT_AVAILABLE)?;
        Ok(())
    }

    /// Builds the error count reply. Its length byte covers only the
    /// selected lanes but all eight counts are always sent.
    pub fn err_count_frame(&self) -> Option<[u8; ERR_COUNT_FRAME_LEN]> {
        let lanes = self.lanes?;
        let mut frame = [0; ERR_COUNT_FRAME_LEN];
        frame[RSP_LEN_OFFSET] = lanes.lanes * 4;
        frame[RSP_DATA_OFFSET..].copy_from_slice(self.err_count.as_bytes());
        Some(frame)
    }
}

fn data(frame: &[u8], index: usize) -> u8 {
    frame.get(CMD_DATA_OFFSET + index).copied().unwrap_or(0)
}

/// Handlers run on the command context.
impl ProtocolEngine {
    pub(crate) fn pqm_lane_set(&self, frame: &[u8]) {
        let count = data(frame, 0);
        let r = self.with_pqm(|s| s.set_lanes(count));
        ringbuf_entry!(match r {
            Ok(()) => Trace::Lanes(count),
            Err(_) => Trace::BadLanes(count),
        });
        self.record(r.into());
    }

    pub(crate) fn pqm_lane_get<P: TwiTarget>(
        &self,
        tx: &mut TwiTransport<P>,
    ) -> Result<(), TwiError> {
        let lanes = self.with_pqm(|s| s.lane_count());
        self.record(Outcome::SUCCESS);
        tx.respond(&[lanes])
    }

    pub(crate) fn pqm_freq_set(&self, frame: &[u8]) {
        let code = data(frame, 0);
        let r = self.with_pqm(|s| s.set_freq(code));
        ringbuf_entry!(match r {
            Ok(()) => Trace::Freq(code),
            Err(_) => Trace::BadFreq(code),
        });
        self.record(r.into());
    }

    pub(crate) fn pqm_freq_get<P: TwiTarget>(
        &self,
        tx: &mut TwiTransport<P>,
    ) -> Result<(), TwiError> {
        let freq = self.with_pqm(|s| s.freq_code());
        self.record(Outcome::SUCCESS);
        tx.respond(&[freq])
    }

    pub(crate) fn pqm_training_reset(&self, link: &mut impl SerdesLink) {
        link.reset();
        self.record(Outcome::SUCCESS);
    }

    pub(crate) fn prbs_mode_set(&self, frame: &[u8]) {
        let code = data(frame, 0);
        let r = self.with_pqm(|s| s.set_prbs_mode(code));
        ringbuf_entry!(match r {
            Ok(()) => Trace::PrbsMode(code),
            Err(_) => Trace::BadPrbsMode(code),
        });
        self.record(r.into());
    }

    /// Enables (data byte 1) or disables the pattern checker or generator
    /// on every selected lane.
    pub(crate) fn prbs_control(
        &self,
        frame: &[u8],
        link: &mut impl SerdesLink,
        generator: bool,
    ) {
        let (lanes, mode, pattern) =
            self.with_pqm(|s| (s.lanes, s.prbs_mode, s.user_pattern));
        let Some(lanes) = lanes else {
            ringbuf_entry!(Trace::NoLanes);
            self.record(Outcome::status(pqm::LANE_UNSUPPORTED));
            return;
        };

        let control = if data(frame, 0) == 1 {
            PrbsControl::Enable(mode, pattern)
        } else {
            PrbsControl::Disable
        };
        for lane in lanes.enable.lanes() {
            if generator {
                link.pattern_generator(lane, control);
            } else {
                link.pattern_monitor(lane, control);
            }
        }
        self.record(Outcome::SUCCESS);
    }

    pub(crate) fn rx_adapt_read<P: TwiTarget>(
        &self,
        tx: &mut TwiTransport<P>,
    ) -> Result<(), TwiError> {
        let snap = self.with_pqm(|s| s.rx_adapt);
        tx.respond(snap.as_bytes())
    }

    pub(crate) fn rx_calib_read<P: TwiTarget>(
        &self,
        tx: &mut TwiTransport<P>,
    ) -> Result<(), TwiError> {
        let snap = self.with_pqm(|s| s.rx_calib);
        tx.respond(snap.as_bytes())
    }

    pub(crate) fn csu_read<P: TwiTarget>(
        &self,
        tx: &mut TwiTransport<P>,
    ) -> Result<(), TwiError> {
        let snap = self.with_pqm(|s| s.csu);
        tx.respond(snap.as_bytes())
    }

    /// Replies with the error counts, or, with no lanes selected, sets
    /// LaneUnsupported and sends nothing.
    pub(crate) fn err_count_read<P: TwiTarget>(
        &self,
        tx: &mut TwiTransport<P>,
    ) -> Result<(), TwiError> {
        match self.with_pqm(|s| s.err_count_frame()) {
            Some(frame) => tx.respond_frame(&frame),
            None => {
                ringbuf_entry!(Trace::NoLanes);
                self.record(Outcome::status(pqm::LANE_UNSUPPORTED));
                Ok(())
            }
        }
    }

    pub(crate) fn horz_read<P: TwiTarget>(
        &self,
        tx: &mut TwiTransport<P>,
    ) -> Result<(), TwiError> {
        let snap = self.with_pqm(|s| s.horz);
        tx.respond(snap.as_bytes())
    }

    /// Vertical and 2D reads: too large for a one-byte length.
    pub(crate) fn vert_read<P: TwiTarget>(
        &self,
        tx: &mut TwiTransport<P>,
    ) -> Result<(), TwiError> {
        let snap = self.with_pqm(|s| s.vert);
        tx.respond_extended(snap.as_bytes())
    }
}

/// Handlers run as deferred jobs on the hardware context.
impl ProtocolEngine {
    /// `[dfe, step]`. Step 0 initializes the link with the PQM lanes and
    /// frequency; step 1 runs the same bring-up as boot configuration. Any
    /// other step fails the way an unsupported boot step does.
    pub(crate) fn lane_training<S, D, M>(
        &self,
        frame: &[u8],
        hw: &mut Hardware<S, D, M>,
    ) -> Outcome
    where
        S: SerdesLink,
        D: DataLink,
    {
        let (lanes, freq) = self.with_pqm(|s| (s.lanes, s.freq));
        let Some(lanes) = lanes else {
            ringbuf_entry!(Trace::NoLanes);
            return Outcome::status(pqm::LANE_UNSUPPORTED);
        };
        let dfe = data(frame, 0) != 0;
        let step = data(frame, 1);
        ringbuf_entry!(Trace::Training { step, dfe });

        let outcome = match step {
            0 => {
                let Some(freq) = freq else {
                    return Outcome::status(pqm::FREQ_NOT_AVAILABLE);
                };
                critical_section::with(|cs| {
                    self.boot.borrow_ref_mut(cs).dfe = dfe;
                });
                match hw.link.init(lanes, freq, dfe) {
                    Ok(()) => Outcome::SUCCESS,
                    Err(HwError(code)) => Outcome::with_extended(
                        pqm::LANE_SERDES_INIT_ERR,
                        code,
                    ),
                }
            }
            1 => {
                let rec = self.boot_record();
                match boot_config::bring_up(
                    &mut hw.link,
                    &mut hw.dlx,
                    lanes,
                    rec.dfe,
                    rec.adaptation,
                ) {
                    Ok(_) => Outcome::SUCCESS,
                    Err(failure) => failure.into(),
                }
            }
            _ => BootConfigFailure {
                status: BootConfigStatus::FAILED,
                extended: UNSUPPORTED_BOOT_STAGE,
            }
            .into(),
        };
        if let Some(ext) = outcome.extended {
            ringbuf_entry!(Trace::TrainingFailed(outcome.status, ext));
        }
        outcome
    }

    /// Stores a successful capture; a failed one leaves the previous
    /// snapshot in place and reports the collaborator's code.
    fn store<T>(
        &self,
        capture: Result<T, HwError>,
        store: impl FnOnce(&mut PqmSession, T),
    ) -> Outcome {
        match capture {
            Ok(snap) => {
                self.with_pqm(|s| store(s, snap));
                Outcome::SUCCESS
            }
            Err(HwError(code)) => {
                ringbuf_entry!(Trace::CaptureFailed(code));
                Outcome::with_extended(pqm::CAPTURE_FAILED, code)
            }
        }
    }

    pub(crate) fn capture_rx_adapt(
        &self,
        frame: &[u8],
        link: &mut impl SerdesLink,
    ) -> Outcome {
        let capture = link.capture_rx_adaptation(data(frame, 0));
        self.store(capture, |s, snap| s.rx_adapt = snap)
    }

    pub(crate) fn capture_rx_calib(
        &self,
        frame: &[u8],
        link: &mut impl SerdesLink,
    ) -> Outcome {
        let capture = link.capture_rx_calibration(data(frame, 0));
        self.store(capture, |s, snap| s.rx_calib = snap)
    }

    pub(crate) fn capture_csu(
        &self,
        frame: &[u8],
        link: &mut impl SerdesLink,
    ) -> Outcome {
        let capture = link.capture_csu_calibration(data(frame, 0));
        self.store(capture, |s, snap| s.csu = snap)
    }

    pub(crate) fn set_user_pattern(&self, frame: &[u8]) -> Outcome {
        let Some(bytes) = frame
            .get(CMD_DATA_OFFSET..CMD_DATA_OFFSET + USER_PATTERN_LEN)
        else {
            return Outcome::ERROR;
        };
        let mut pattern = UserPattern::default();
        pattern.0.copy_from_slice(bytes);
        self.with_pqm(|s| s.user_pattern = pattern);
        Outcome::SUCCESS
    }

    /// Reads the error counter of every selected lane. Lanes outside the
    /// selection keep their previous count.
    pub(crate) fn capture_err_count(
        &self,
        link: &mut impl SerdesLink,
    ) -> Outcome {
        let (lanes, mut counts) = self.with_pqm(|s| (s.lanes, s.err_count));
        let Some(lanes) = lanes else {
            ringbuf_entry!(Trace::NoLanes);
            return Outcome::status(pqm::LANE_UNSUPPORTED);
        };
        let capture = lanes.enable.lanes().try_for_each(|lane| {
            counts.count[usize::from(lane)] =
                U32::new(link.read_error_count(lane)?);
            Ok::<(), HwError>(())
        });
        self.store(capture, |s, ()| s.err_count = counts)
    }

    fn clamp_trace(requested: u64, applied: u64) {
        if requested != applied {
            ringbuf_entry!(Trace::Clamped { requested, applied });
        }
    }

    pub(crate) fn capture_horz(
        &self,
        frame: &[u8],
        link: &mut impl SerdesLink,
    ) -> Outcome {
        let Some(req) = HorizontalBathtubRequest::parse(frame) else {
            return Outcome::ERROR;
        };
        Self::clamp_trace(req.requested_time_limit, req.limits.time_limit);
        let capture = link.horizontal_bathtub(req.lane, req.limits);
        self.store(capture, |s, snap| s.horz = snap)
    }

    pub(crate) fn capture_vert(
        &self,
        frame: &[u8],
        two_d: bool,
        link: &mut impl SerdesLink,
    ) -> Outcome {
        let req = if two_d {
            VerticalBathtubRequest::parse_2d(frame)
        } else {
            VerticalBathtubRequest::parse(frame)
        };
        let Some(req) = req else {
            return Outcome::ERROR;
        };
        Self::clamp_trace(req.requested_time_limit, req.limits.time_limit);
        let capture =
            link.vertical_bathtub(req.lane, req.phase, req.outer_eye, req.limits);
        self.store(capture, |s, snap| s.vert = snap)
    }
}

pub(crate) fn force_delay_line_update(mem: &mut impl MemoryInterface) -> Outcome {
    match mem.force_delay_line_update() {
        Ok(()) => Outcome::SUCCESS,
        Err(HwError(code)) => {
            ringbuf_entry!(Trace::DelayLineUpdateFailed(code));
            Outcome::with_extended(TwiStatus::ERROR, code)
        }
    }
}
