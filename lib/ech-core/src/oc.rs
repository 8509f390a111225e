// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structured-message dispatch.
//!
//! Requests are checked (id, header CRC, extended data CRC) before any
//! handler sees them; a request that fails is answered with an error
//! response and has no other effect. The memory PHY command is served here.
//! Everything else goes to the application's [`StructuredCommands`].

use drv_exp_oc_mailbox::{Doorbell, OcMailbox};
use exp_api::oc::{
    OcApiError, OcCommand, OcCommandHeader, OcResponseHeader, PhyInitMode,
    PhyInitResponse,
};
use ringbuf::{ringbuf, ringbuf_entry};

use crate::hw::{HwError, MemoryInterface};
use crate::{EchError, ProtocolEngine};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    None,
    Rejected { id: u8, err: OcApiError },
    Request(OcCommand),
    Unhandled(OcCommand),
    InputTooLarge { len: u32, room: u32 },
    OutputDropped { len: u32 },
    PhyInitBadConfig { len: u32 },
    PhyInitBadMode(u8),
    PhyInit(PhyInitMode),
    PhyInitFailed(u32),
}

ringbuf!(Trace, 16, Trace::None);

/// Structured commands served outside the engine.
pub trait StructuredCommands {
    /// Serves `cmd`, filling in `rsp.parms` and writing any extended data
    /// to the front of `ext_out`. Returns the length of that data, or `None`
    /// if `cmd` is not served here.
    fn handle(
        &mut self,
        cmd: OcCommand,
        req: &OcCommandHeader,
        ext_in: &[u8],
        rsp: &mut OcResponseHeader,
        ext_out: &mut [u8],
    ) -> Option<usize>;
}

impl StructuredCommands for () {
    fn handle(
        &mut self,
        _cmd: OcCommand,
        _req: &OcCommandHeader,
        _ext_in: &[u8],
        _rsp: &mut OcResponseHeader,
        _ext_out: &mut [u8],
    ) -> Option<usize> {
        None
    }
}

/// Tries the first handler, then the second.
impl<A, B> StructuredCommands for (A, B)
where
    A: StructuredCommands,
    B: StructuredCommands,
{
    fn handle(
        &mut self,
        cmd: OcCommand,
        req: &OcCommandHeader,
        ext_in: &[u8],
        rsp: &mut OcResponseHeader,
        ext_out: &mut [u8],
    ) -> Option<usize> {
        self.0
            .handle(cmd, req, ext_in, rsp, ext_out)
            .or_else(|| self.1.handle(cmd, req, ext_in, rsp, ext_out))
    }
}

/// Local copies of the extended data regions. Handlers never see the
/// shared regions themselves.
pub struct OcScratch<'a> {
    pub ext_in: &'a mut [u8],
    pub ext_out: &'a mut [u8],
}

impl ProtocolEngine {
    /// Handles at most one structured request. Returns whether one was
    /// answered.
    ///
    /// Nothing is taken from the mailbox before link initialization has
    /// been attempted. If the extended data cannot be published, the host
    /// gets a `CmdErr` response and the mailbox error is returned.
    pub fn poll_structured<D, M, H>(
        &self,
        mailbox: &mut OcMailbox<'_, D>,
        mem: &mut M,
        handlers: &mut H,
        scratch: &mut OcScratch<'_>,
    ) -> Result<bool, EchError>
    where
        D: Doorbell,
        M: MemoryInterface,
        H: StructuredCommands,
    {
        if !self.oc_ready() {
            return Ok(false);
        }
        let Some(req) = mailbox.take_request() else {
            return Ok(false);
        };

        // A length past the end of the region cannot match any CRC.
        let ext_crc = if req.has_ext_data() {
            mailbox.ext_in_crc(req.ext_len()).ok()
        } else {
            None
        };

        let (mut rsp, mut ext_len) = match req.check(ext_crc) {
            Ok(cmd) => serve(cmd, &req, mailbox, mem, handlers, scratch),
            Err(err) => {
                ringbuf_entry!(Trace::Rejected { id: req.id, err });
                (OcResponseHeader::error(&req, err), 0)
            }
        };

        let mut result = Ok(true);
        if ext_len > 0 {
            match mailbox.write_ext_out(&scratch.ext_out[..ext_len]) {
                Ok(()) => rsp.set_ext_len(ext_len as u32),
                Err(e) => {
                    ringbuf_entry!(Trace::OutputDropped {
                        len: ext_len as u32,
                    });
                    rsp = OcResponseHeader::error(&req, OcApiError::CmdErr);
                    ext_len = 0;
                    result = Err(e.into());
                }
            }
        }

        rsp.seal(&scratch.ext_out[..ext_len]);
        mailbox.complete(&rsp);
        result
    }
}

/// Runs a request that passed its checks. The returned length is at most
/// the size of `scratch.ext_out`.
fn serve<D, M, H>(
    cmd: OcCommand,
    req: &OcCommandHeader,
    mailbox: &OcMailbox<'_, D>,
    mem: &mut M,
    handlers: &mut H,
    scratch: &mut OcScratch<'_>,
) -> (OcResponseHeader, usize)
where
    D: Doorbell,
    M: MemoryInterface,
    H: StructuredCommands,
{
    ringbuf_entry!(Trace::Request(cmd));

    let input = if req.has_ext_data() {
        let len = req.ext_len();
        let room = scratch.ext_in.len();
        let Some(buf) = scratch.ext_in.get_mut(..len) else {
            ringbuf_entry!(Trace::InputTooLarge {
                len: len as u32,
                room: room as u32,
            });
            return (OcResponseHeader::error(req, OcApiError::CmdErr), 0);
        };
        // The CRC has already been computed over exactly these bytes.
        if mailbox.read_ext_in(buf).is_err() {
            return (
                OcResponseHeader::error(req, OcApiError::CmdDataCrcErr),
                0,
            );
        }
        Some(&*buf)
    } else {
        None
    };

    let mut rsp = OcResponseHeader::reply_to(req);
    let out = &mut scratch.ext_out[..];
    let n = match cmd {
        OcCommand::DdrPhyInit => ddr_phy_init(req, input, mem, &mut rsp, out),
        _ => {
            let served =
                handlers.handle(cmd, req, input.unwrap_or(&[]), &mut rsp, out);
            let Some(n) = served else {
                ringbuf_entry!(Trace::Unhandled(cmd));
                return (OcResponseHeader::error(req, OcApiError::CmdErr), 0);
            };
            n
        }
    };
    (rsp, n.min(scratch.ext_out.len()))
}

/// Initializes the memory PHY from the request's configuration block, then
/// trains or captures an eye as `parms[0]` selects.
fn ddr_phy_init(
    req: &OcCommandHeader,
    config: Option<&[u8]>,
    mem: &mut impl MemoryInterface,
    rsp: &mut OcResponseHeader,
    out: &mut [u8],
) -> usize {
    let config_len = mem.config_len();
    let Some(config) = config.filter(|c| c.len() == config_len) else {
        ringbuf_entry!(Trace::PhyInitBadConfig {
            len: req.ext_data_len.get(),
        });
        PhyInitResponse::failed(PhyInitResponse::BAD_CONFIG)
            .write_to(&mut rsp.parms);
        return 0;
    };
    let Some(mode) = PhyInitMode::from_code(req.parms[0]) else {
        ringbuf_entry!(Trace::PhyInitBadMode(req.parms[0]));
        PhyInitResponse::failed(PhyInitResponse::UNSUPPORTED_MODE)
            .write_to(&mut rsp.parms);
        return 0;
    };
    ringbuf_entry!(Trace::PhyInit(mode));

    let (result, n) = match mem.init(config) {
        Err(e) => (Err(e), 0),
        Ok(()) => match mode {
            // Results are returned even when training fails; they say why.
            PhyInitMode::DefaultTrain => {
                let r = mem.train();
                (r, mem.results(out))
            }
            PhyInitMode::ReadEyeTrain | PhyInitMode::WriteEyeTrain => {
                let write = mode == PhyInitMode::WriteEyeTrain;
                match mem.capture_eye(write, out) {
                    Ok(n) => (Ok(()), n),
                    Err(e) => (Err(e), 0),
                }
            }
        },
    };

    let parms = match result {
        Ok(()) => PhyInitResponse::ok(),
        Err(HwError(code)) => {
            ringbuf_entry!(Trace::PhyInitFailed(code));
            PhyInitResponse::failed(code)
        }
    };
    parms.write_to(&mut rsp.parms);
    n
}
