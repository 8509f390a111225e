// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The record behind the Status command.

use exp_api::twi::{FwStage, STATUS_RSP_DATA_LEN, TwiStatus};

/// Outcome of the most recent command, as the host will see it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatusRecord {
    /// Id of the last command other than Status; zero until one arrives.
    pub last_cmd: u8,
    pub status: TwiStatus,
    /// Collaborator or validation code behind the last failure. Sticky: it
    /// is only overwritten by a later outcome that carries one.
    pub extended: u32,
    pub stage: FwStage,
}

impl StatusRecord {
    pub const fn new(stage: FwStage) -> Self {
        Self {
            last_cmd: 0,
            status: TwiStatus::SUCCESS,
            extended: 0,
            stage,
        }
    }

    /// Applies a terminal or busy outcome.
    pub fn apply(&mut self, outcome: Outcome) {
        self.status = outcome.status;
        if let Some(ext) = outcome.extended {
            self.extended = ext;
        }
    }

    /// Data portion of the Status reply:
    /// `[extended error, stage, status, last command]`.
    ///
    /// Only the low byte of the extended error fits.
    pub fn report(&self) -> [u8; STATUS_RSP_DATA_LEN as usize] {
        [
            self.extended as u8,
            self.stage as u8,
            self.status.0,
            self.last_cmd,
        ]
    }
}

/// Status to record for a command, with the extended error that goes with
/// it, if any.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub status: TwiStatus,
    pub extended: Option<u32>,
}

impl Outcome {
    pub const SUCCESS: Self = Self::status(TwiStatus::SUCCESS);
    pub const ERROR: Self = Self::status(TwiStatus::ERROR);
    pub const UNSUPPORTED: Self = Self::status(TwiStatus::UNSUPPORTED);
    pub const BUSY: Self = Self::status(TwiStatus::BUSY);

    pub const fn status(status: TwiStatus) -> Self {
        Self {
            status,
            extended: None,
        }
    }

    pub const fn with_extended(status: TwiStatus, extended: u32) -> Self {
        Self {
            status,
            extended: Some(extended),
        }
    }
}

impl From<TwiStatus> for Outcome {
    fn from(status: TwiStatus) -> Self {
        Self::status(status)
    }
}

/// Success, or the command-specific code of a rejected request.
impl From<Result<(), TwiStatus>> for Outcome {
    fn from(r: Result<(), TwiStatus>) -> Self {
        match r {
            Ok(()) => Self::SUCCESS,
            Err(status) => Self::status(status),
        }
    }
}
