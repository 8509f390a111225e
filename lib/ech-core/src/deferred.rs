// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-slot handoff of commands from the command-accepting context to
//! the context that is allowed to run long hardware sequences.
//!
//! A job owns a copy of its frame, so the receive buffer can be reused as
//! soon as the job is submitted. The slot goes `Empty -> Pending -> Running
//! -> Empty`; only the runner moves it out of `Running`, and it does so in
//! the same critical section that records the job's outcome, so the host can
//! never see a terminal status while the slot is still occupied.
//!
//! A submission refused because the slot is occupied is terminal: it records
//! Error against its own command. The job in the slot then no longer owns the
//! status record, and its outcome is not posted when it finishes.

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};
use exp_api::TwiCommand;

use crate::status::{Outcome, StatusRecord};

/// Largest frame of any deferred command.
pub const JOB_FRAME_MAX: usize = 12;

/// Which deferred handler a job runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobKind {
    BootConfig,
    PqmLaneTraining,
    RxAdaptObj,
    RxCalib,
    CsuCalib,
    UserPattern,
    PrbsErrCount,
    HorzBathtub,
    VertBathtub,
    TwoDBathtub,
    ForceDelayLineUpdate,
}

impl JobKind {
    /// The job a deferred command runs as; `None` for commands that are
    /// not deferred.
    pub fn for_command(cmd: TwiCommand) -> Option<Self> {
        Some(match cmd {
            TwiCommand::BootConfig => Self::BootConfig,
            TwiCommand::PqmLaneTraining => Self::PqmLaneTraining,
            TwiCommand::RxAdaptObjStart => Self::RxAdaptObj,
            TwiCommand::RxCalibStart => Self::RxCalib,
            TwiCommand::CsuCalibStart => Self::CsuCalib,
            TwiCommand::PrbsUserPatternSet => Self::UserPattern,
            TwiCommand::PrbsErrCountStart => Self::PrbsErrCount,
            TwiCommand::HorzBathtubStart => Self::HorzBathtub,
            TwiCommand::VertBathtubStart => Self::VertBathtub,
            TwiCommand::TwoDBathtubStart => Self::TwoDBathtub,
            TwiCommand::ForceDelayLineUpdate => Self::ForceDelayLineUpdate,
            _ => return None,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub kind: JobKind,
    frame: [u8; JOB_FRAME_MAX],
    len: u8,
}

impl Job {
    /// Copies `frame` into a new job. Returns `None` if it is larger than
    /// any deferred command.
    pub fn new(kind: JobKind, frame: &[u8]) -> Option<Self> {
        let mut buf = [0; JOB_FRAME_MAX];
        buf.get_mut(..frame.len())?.copy_from_slice(frame);
        Some(Self {
            kind,
            frame: buf,
            len: frame.len() as u8,
        })
    }

    /// The frame as received, id byte first.
    pub fn frame(&self) -> &[u8] {
        &self.frame[..usize::from(self.len)]
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobError {
    /// A job is already pending or running.
    SlotBusy,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SlotState {
    Empty,
    /// `reports`: whether the job's outcome is still the host's to see.
    Pending { job: Job, reports: bool },
    Running { kind: JobKind, reports: bool },
}

pub struct DeferredSlot {
    state: Mutex<RefCell<SlotState>>,
}

impl Default for DeferredSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredSlot {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(SlotState::Empty)),
        }
    }

    /// Queues `job` and marks the command Busy in `status`, both under `cs`.
    ///
    /// A busy slot keeps its job. The refused command is recorded as Error,
    /// and the job in the slot stops reporting to `status`.
    pub fn submit(
        &self,
        cs: CriticalSection<'_>,
        status: &mut StatusRecord,
        job: Job,
    ) -> Result<(), JobError> {
        let mut state = self.state.borrow_ref_mut(cs);
        match &mut *state {
            SlotState::Empty => {
                *state = SlotState::Pending { job, reports: true };
                status.apply(Outcome::BUSY);
                Ok(())
            }
            SlotState::Pending { reports, .. }
            | SlotState::Running { reports, .. } => {
                *reports = false;
                status.apply(Outcome::ERROR);
                Err(JobError::SlotBusy)
            }
        }
    }

    /// Takes the pending job, if any, leaving the slot occupied until
    /// [`Self::finish`].
    pub fn start(&self, cs: CriticalSection<'_>) -> Option<Job> {
        let mut state = self.state.borrow_ref_mut(cs);
        match *state {
            SlotState::Pending { job, reports } => {
                *state = SlotState::Running {
                    kind: job.kind,
                    reports,
                };
                Some(job)
            }
            SlotState::Empty | SlotState::Running { .. } => None,
        }
    }

    /// Records the running job's outcome, unless a refused submission has
    /// taken over the status record, and frees the slot. Returns whether
    /// the outcome was recorded.
    pub fn finish(
        &self,
        cs: CriticalSection<'_>,
        status: &mut StatusRecord,
        outcome: Outcome,
    ) -> bool {
        let mut state = self.state.borrow_ref_mut(cs);
        let reports = match *state {
            SlotState::Running { reports, .. } => reports,
            SlotState::Empty | SlotState::Pending { .. } => false,
        };
        if reports {
            status.apply(outcome);
        }
        *state = SlotState::Empty;
        reports
    }

    pub fn is_idle(&self, cs: CriticalSection<'_>) -> bool {
        *self.state.borrow_ref(cs) == SlotState::Empty
    }

    /// A copy of the frame waiting to run, if any.
    pub fn pending(&self, cs: CriticalSection<'_>) -> Option<Job> {
        match *self.state.borrow_ref(cs) {
            SlotState::Pending { job, .. } => Some(job),
            _ => None,
        }
    }
}
