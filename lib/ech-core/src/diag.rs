// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! State blocks the engine contributes to a diagnostic snapshot. Taking
//! and storing the snapshot is the registry's business.

use drv_exp_twi_target::{TwiTarget, TwiTransport};
use exp_api::twi::MAX_FRAME_SIZE;
use hubpack::SerializedSize;
use ringbuf::{ringbuf, ringbuf_entry};

use crate::ProtocolEngine;
use crate::boot_config::BootConfigRecord;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DumpKind {
    /// Copied byte for byte.
    Raw,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DumpBlock {
    BootConfig,
    CmdBuffer,
    RspBuffer,
}

impl DumpBlock {
    pub const ALL: [Self; 3] = [Self::BootConfig, Self::CmdBuffer, Self::RspBuffer];

    pub fn name(self) -> &'static str {
        match self {
            Self::BootConfig => "ECH_BOOT_CFG",
            Self::CmdBuffer => "ECH_CMD_BUFFER",
            Self::RspBuffer => "ECH_RSP_BUFFER",
        }
    }

    /// Largest dump the block can produce.
    pub fn size(self) -> usize {
        match self {
            Self::BootConfig => BootConfigRecord::MAX_SIZE,
            Self::CmdBuffer | Self::RspBuffer => MAX_FRAME_SIZE,
        }
    }
}

pub trait DiagnosticRegistry {
    /// Adds `block` to the snapshot. The registry calls
    /// [`ProtocolEngine::dump`] with it when the snapshot is taken.
    fn register(
        &mut self,
        block: DumpBlock,
        name: &'static str,
        kind: DumpKind,
        size: usize,
    );
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DumpError {
    BufferTooSmall { need: usize, have: usize },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    None,
    Registered(DumpBlock),
    TooSmall(DumpBlock),
}

ringbuf!(Trace, 8, Trace::None);

impl ProtocolEngine {
    pub fn register_diagnostics(&self, registry: &mut impl DiagnosticRegistry) {
        for block in DumpBlock::ALL {
            ringbuf_entry!(Trace::Registered(block));
            registry.register(block, block.name(), DumpKind::Raw, block.size());
        }
    }

    /// Copies the current contents of `block` into `out`, returning how
    /// many bytes were written.
    pub fn dump<P: TwiTarget>(
        &self,
        block: DumpBlock,
        transport: &TwiTransport<P>,
        out: &mut [u8],
    ) -> Result<usize, DumpError> {
        let have = out.len();
        let too_small = |need| {
            ringbuf_entry!(Trace::TooSmall(block));
            DumpError::BufferTooSmall { need, have }
        };

        match block {
            DumpBlock::BootConfig => {
                let rec = self.boot_record();
                hubpack::serialize(out, &rec)
                    .map_err(|_| too_small(BootConfigRecord::MAX_SIZE))
            }
            DumpBlock::CmdBuffer => {
                copy_into(out, transport.rx().contents()).ok_or_else(|| {
                    too_small(transport.rx().contents().len())
                })
            }
            DumpBlock::RspBuffer => {
                let tx = transport.tx_buffer();
                copy_into(out, tx).ok_or_else(|| too_small(tx.len()))
            }
        }
    }
}

fn copy_into(out: &mut [u8], data: &[u8]) -> Option<usize> {
    out.get_mut(..data.len())?.copy_from_slice(data);
    Some(data.len())
}
