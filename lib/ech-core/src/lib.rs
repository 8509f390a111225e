// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command engine for the Explorer adapter.
//!
//! The engine sits between the host's two command channels and the
//! adapter's hardware. It runs on two execution contexts:
//!
//! - the command context polls the short-frame port ([`twi`]) and the
//!   structured mailbox ([`oc`]), answers what it can immediately and hands
//!   everything slow to the single deferred slot ([`deferred`]);
//! - the hardware context calls [`ProtocolEngine::run_deferred`] in its
//!   loop, which runs the slot's job (link bring-up, PQM captures) and
//!   posts the outcome to the status record.
//!
//! All state either context can see lives in [`ProtocolEngine`] behind
//! `critical_section` mutexes, so a single `static` instance serves both.

#![cfg_attr(not(test), no_std)]

pub mod boot_config;
pub mod deferred;
pub mod diag;
pub mod hw;
pub mod oc;
pub mod pqm;
pub mod status;
pub mod twi;

#[cfg(test)]
mod testutil;

/// Build-time configuration, generated from `EXP_TASK_CONFIG`.
pub mod config {
    include!(concat!(env!("OUT_DIR"), "/ech_config.rs"));
}

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex;
use derive_more::From;
use drv_exp_oc_mailbox::MailboxError;
use drv_exp_twi_target::TwiError;
use exp_api::{BootConfigFlags, FwStage, TwiStatus};
use ringbuf::{ringbuf, ringbuf_entry};

use crate::boot_config::{BootConfigRecord, BootEvent};
use crate::deferred::{DeferredSlot, Job, JobKind};
use crate::hw::{DataLink, Hardware, MemoryInterface, SerdesLink};
use crate::pqm::PqmSession;
use crate::status::{Outcome, StatusRecord};

/// Failures surfaced by the engine's polling entry points. Everything else
/// is reported to the host rather than to the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq, From)]
pub enum EchError {
    Twi(TwiError),
    Mailbox(MailboxError),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    None,
    JobStart(JobKind),
    JobDone(JobKind, TwiStatus),
    /// The job finished after a refused submission took over the status.
    OutcomeDropped(JobKind),
    PqmEnabled,
}

ringbuf!(Trace, 16, Trace::None);

pub struct ProtocolEngine {
    status: Mutex<RefCell<StatusRecord>>,
    job: DeferredSlot,
    boot: Mutex<RefCell<BootConfigRecord>>,
    pqm: Mutex<RefCell<PqmSession>>,
    /// Raised once link initialization has been attempted; gates the
    /// structured-message path.
    oc_ready: AtomicBool,
}

impl Default for ProtocolEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolEngine {
    /// An engine with the firmware stage and equalizer default chosen at
    /// build time.
    pub const fn new() -> Self {
        Self::with_config(config::BOOT_STAGE, config::DFE_DEFAULT)
    }

    pub const fn with_config(stage: FwStage, dfe: bool) -> Self {
        Self {
            status: Mutex::new(RefCell::new(StatusRecord::new(stage))),
            job: DeferredSlot::new(),
            boot: Mutex::new(RefCell::new(BootConfigRecord::new(dfe))),
            pqm: Mutex::new(RefCell::new(PqmSession::new())),
            oc_ready: AtomicBool::new(false),
        }
    }

    /// A copy of the status record, as the Status command reports it.
    pub fn report(&self) -> StatusRecord {
        critical_section::with(|cs| *self.status.borrow_ref(cs))
    }

    pub fn boot_record(&self) -> BootConfigRecord {
        critical_section::with(|cs| *self.boot.borrow_ref(cs))
    }

    pub fn pqm_enabled(&self) -> bool {
        self.with_pqm(|s| s.enabled)
    }

    pub fn oc_ready(&self) -> bool {
        self.oc_ready.load(Ordering::Acquire)
    }

    /// Whether the deferred slot is free.
    pub fn job_idle(&self) -> bool {
        critical_section::with(|cs| self.job.is_idle(cs))
    }

    fn record(&self, outcome: Outcome) {
        critical_section::with(|cs| {
            self.status.borrow_ref_mut(cs).apply(outcome);
        });
    }

    fn with_status<R>(&self, f: impl FnOnce(&mut StatusRecord) -> R) -> R {
        critical_section::with(|cs| f(&mut self.status.borrow_ref_mut(cs)))
    }

    fn with_pqm<R>(&self, f: impl FnOnce(&mut PqmSession) -> R) -> R {
        critical_section::with(|cs| f(&mut self.pqm.borrow_ref_mut(cs)))
    }

    /// Runs the pending deferred job, if there is one, and posts its
    /// outcome. Called from the hardware context's loop; returns whether a
    /// job ran.
    pub fn run_deferred<S, D, M>(&self, hw: &mut Hardware<S, D, M>) -> bool
    where
        S: SerdesLink,
        D: DataLink,
        M: MemoryInterface,
    {
        let Some(job) = critical_section::with(|cs| self.job.start(cs)) else {
            return false;
        };
        ringbuf_entry!(Trace::JobStart(job.kind));

        let outcome = self.run_job(&job, hw);

        ringbuf_entry!(Trace::JobDone(job.kind, outcome.status));
        let posted = critical_section::with(|cs| {
            let mut status = self.status.borrow_ref_mut(cs);
            self.job.finish(cs, &mut status, outcome)
        });
        if !posted {
            ringbuf_entry!(Trace::OutcomeDropped(job.kind));
        }
        true
    }

    fn run_job<S, D, M>(&self, job: &Job, hw: &mut Hardware<S, D, M>) -> Outcome
    where
        S: SerdesLink,
        D: DataLink,
        M: MemoryInterface,
    {
        let frame = job.frame();
        match job.kind {
            JobKind::BootConfig => self.boot_config(frame, hw),
            JobKind::PqmLaneTraining => self.lane_training(frame, hw),
            JobKind::RxAdaptObj => self.capture_rx_adapt(frame, &mut hw.link),
            JobKind::RxCalib => self.capture_rx_calib(frame, &mut hw.link),
            JobKind::CsuCalib => self.capture_csu(frame, &mut hw.link),
            JobKind::UserPattern => self.set_user_pattern(frame),
            JobKind::PrbsErrCount => self.capture_err_count(&mut hw.link),
            JobKind::HorzBathtub => self.capture_horz(frame, &mut hw.link),
            JobKind::VertBathtub => {
                self.capture_vert(frame, false, &mut hw.link)
            }
            JobKind::TwoDBathtub => self.capture_vert(frame, true, &mut hw.link),
            JobKind::ForceDelayLineUpdate => {
                pqm::force_delay_line_update(&mut hw.mem)
            }
        }
    }

    fn boot_config<S, D, M>(
        &self,
        frame: &[u8],
        hw: &mut Hardware<S, D, M>,
    ) -> Outcome
    where
        S: SerdesLink,
        D: DataLink,
    {
        let Some(flags) = BootConfigFlags::from_frame(frame) else {
            return Outcome::ERROR;
        };

        // Only this context writes the record, so it can be worked on
        // outside the critical section and published afterwards.
        let mut rec = self.boot_record();
        let result = boot_config::execute(
            &mut rec,
            flags,
            &mut hw.link,
            &mut hw.dlx,
            &self.oc_ready,
        );
        critical_section::with(|cs| *self.boot.borrow_ref_mut(cs) = rec);

        match result {
            Ok(BootEvent::PqmSelected) => {
                ringbuf_entry!(Trace::PqmEnabled);
                self.with_pqm(|s| s.enabled = true);
                Outcome::SUCCESS
            }
            Ok(_) => Outcome::SUCCESS,
            Err(failure) => failure.into(),
        }
    }
}
