// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Short-frame command dispatch.
//!
//! Each poll drains complete frames from the receive buffer in order. A
//! frame is only looked at once every byte its command needs has arrived;
//! until then the cursor stays put and the next poll tries again.

use drv_exp_twi_target::{Activity, TwiError, TwiTarget, TwiTransport};
use exp_api::twi::{
    CMD_DATA_OFFSET, Dispatch, Gate, REG_READ_INVALID, UNVERIFIED_WRITE_MASK,
    UNVERIFIED_WRITE_WINDOW,
};
use exp_api::{TwiCommand, TwiStatus};
use ringbuf::{ringbuf, ringbuf_entry};

use crate::deferred::{JOB_FRAME_MAX, Job, JobError, JobKind};
use crate::hw::{RegAccessError, RegisterBus, SerdesLink};
use crate::status::Outcome;
use crate::{EchError, ProtocolEngine};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    None,
    Transport(TwiError),
    InvalidId(u8),
    Partial { id: u8, have: u8 },
    Command(TwiCommand),
    Gated(TwiCommand),
    Reserved(TwiCommand),
    Submitted(JobKind),
    /// A deferred command arrived while another job held the slot; it is
    /// refused with Error.
    SlotBusy(JobKind),
    Latch(u32),
    RegReject(u32, RegAccessError),
    WriteMismatch { addr: u32, wrote: u32, read: u32 },
    ResponseFailed(TwiError),
}

ringbuf!(Trace, 64, Trace::None);

/// Everything the command context owns for the short-frame path.
pub struct ShortFramePort<P, R, L> {
    pub transport: TwiTransport<P>,
    pub regs: R,
    /// Link access for the immediate PQM commands.
    pub link: L,
    /// Register address latched for the next read, or the status a read
    /// reports when there is none.
    latch: Result<u32, TwiStatus>,
}

impl<P, R, L> ShortFramePort<P, R, L>
where
    P: TwiTarget,
    R: RegisterBus,
    L: SerdesLink,
{
    pub fn new(transport: TwiTransport<P>, regs: R, link: L) -> Self {
        Self {
            transport,
            regs,
            link,
            latch: Err(TwiStatus::REG_ADDR_OUT_OF_RANGE),
        }
    }

    pub fn latched(&self) -> Result<u32, TwiStatus> {
        self.latch
    }
}

fn be_u32(frame: &[u8], at: usize) -> u32 {
    let mut word = [0; 4];
    if let Some(bytes) = frame.get(CMD_DATA_OFFSET + at..CMD_DATA_OFFSET + at + 4)
    {
        word.copy_from_slice(bytes);
    }
    u32::from_be_bytes(word)
}

fn reject_status(e: RegAccessError) -> TwiStatus {
    match e {
        RegAccessError::OutOfRange => TwiStatus::REG_ADDR_OUT_OF_RANGE,
        RegAccessError::Prohibited => TwiStatus::REG_ADDR_PROHIBITED,
    }
}

impl ProtocolEngine {
    /// Services the short-frame port once and dispatches every complete
    /// frame that has arrived.
    ///
    /// Transport faults are returned after the receive buffer has been
    /// dealt with; a failure to load a response is returned once the rest
    /// of the buffer has been dispatched.
    pub fn poll_short<P, R, L>(
        &self,
        port: &mut ShortFramePort<P, R, L>,
    ) -> Result<(), EchError>
    where
        P: TwiTarget,
        R: RegisterBus,
        L: SerdesLink,
    {
        let activity = port.transport.poll().inspect_err(|&e| {
            ringbuf_entry!(Trace::Transport(e));
        })?;
        if !activity.contains(Activity::RX) {
            return Ok(());
        }
        self.dispatch(port)
    }

    fn dispatch<P, R, L>(
        &self,
        port: &mut ShortFramePort<P, R, L>,
    ) -> Result<(), EchError>
    where
        P: TwiTarget,
        R: RegisterBus,
        L: SerdesLink,
    {
        let mut result = Ok(());

        loop {
            let unread = port.transport.rx().unread();
            let Some(&id) = unread.first() else {
                break;
            };
            let Some(cmd) = TwiCommand::from_id(id) else {
                // Nothing after a bad id can be framed; drop it all rather
                // than stall on it forever.
                ringbuf_entry!(Trace::InvalidId(id));
                port.transport.rx_mut().reset();
                self.record(Outcome::ERROR);
                break;
            };
            let len = cmd.consumed_len();
            if unread.len() < len {
                ringbuf_entry!(Trace::Partial {
                    id,
                    have: unread.len() as u8,
                });
                break;
            }

            // The handler may respond through the transport, so work from
            // a copy of the frame.
            let mut frame = [0; JOB_FRAME_MAX];
            frame[..len].copy_from_slice(&unread[..len]);
            let frame = &frame[..len];

            if let Err(e) = self.execute(cmd, frame, port) {
                ringbuf_entry!(Trace::ResponseFailed(e));
                result = Err(e.into());
            }

            if port.transport.rx_mut().consume(len).is_err() {
                port.transport.rx_mut().reset();
                break;
            }
        }

        port.transport.rx_mut().reset_if_drained();
        result
    }

    fn execute<P, R, L>(
        &self,
        cmd: TwiCommand,
        frame: &[u8],
        port: &mut ShortFramePort<P, R, L>,
    ) -> Result<(), TwiError>
    where
        P: TwiTarget,
        R: RegisterBus,
        L: SerdesLink,
    {
        ringbuf_entry!(Trace::Command(cmd));
        let info = cmd.info();

        // Status must describe the command before it.
        if cmd != TwiCommand::Status {
            self.with_status(|s| s.last_cmd = cmd as u8);
        }

        if info.gate == Gate::Pqm && !self.pqm_enabled() {
            ringbuf_entry!(Trace::Gated(cmd));
            self.record(Outcome::UNSUPPORTED);
            return Ok(());
        }

        match info.dispatch {
            Dispatch::Reserved => {
                ringbuf_entry!(Trace::Reserved(cmd));
                self.record(Outcome::UNSUPPORTED);
                Ok(())
            }
            Dispatch::Deferred => {
                self.submit(cmd, frame);
                Ok(())
            }
            Dispatch::Immediate => self.immediate(cmd, frame, port),
        }
    }

    fn submit(&self, cmd: TwiCommand, frame: &[u8]) {
        let Some(kind) = JobKind::for_command(cmd) else {
            panic!("{cmd:?} is deferred but has no job");
        };
        let Some(job) = Job::new(kind, frame) else {
            panic!("{cmd:?} frame does not fit a job");
        };
        let r = critical_section::with(|cs| {
            let mut status = self.status.borrow_ref_mut(cs);
            self.job.submit(cs, &mut status, job)
        });
        match r {
            Ok(()) => ringbuf_entry!(Trace::Submitted(kind)),
            Err(JobError::SlotBusy) => ringbuf_entry!(Trace::SlotBusy(kind)),
        }
    }

    fn immediate<P, R, L>(
        &self,
        cmd: TwiCommand,
        frame: &[u8],
        port: &mut ShortFramePort<P, R, L>,
    ) -> Result<(), TwiError>
    where
        P: TwiTarget,
        R: RegisterBus,
        L: SerdesLink,
    {
        let tx = &mut port.transport;
        match cmd {
            TwiCommand::Status => {
                let report = self.with_status(|s| s.report());
                tx.respond(&report)
            }
            TwiCommand::RegAddrLatch => {
                self.latch_address(frame, port);
                Ok(())
            }
            TwiCommand::RegRead => self.read_register(port),
            TwiCommand::RegWrite => {
                self.write_register(frame, &mut port.regs);
                Ok(())
            }
            TwiCommand::PqmLaneSet => {
                self.pqm_lane_set(frame);
                Ok(())
            }
            TwiCommand::PqmLaneGet => self.pqm_lane_get(tx),
            TwiCommand::PqmFreqSet => {
                self.pqm_freq_set(frame);
                Ok(())
            }
            TwiCommand::PqmFreqGet => self.pqm_freq_get(tx),
            TwiCommand::PqmTrainingReset => {
                self.pqm_training_reset(&mut port.link);
                Ok(())
            }
            TwiCommand::RxAdaptObjRead => self.rx_adapt_read(tx),
            TwiCommand::RxCalibRead => self.rx_calib_read(tx),
            TwiCommand::CsuCalibRead => self.csu_read(tx),
            TwiCommand::PrbsPatternModeSet => {
                self.prbs_mode_set(frame);
                Ok(())
            }
            TwiCommand::PrbsMonitorControl => {
                self.prbs_control(frame, &mut port.link, false);
                Ok(())
            }
            TwiCommand::PrbsGeneratorControl => {
                self.prbs_control(frame, &mut port.link, true);
                Ok(())
            }
            TwiCommand::PrbsErrCountRead => self.err_count_read(tx),
            TwiCommand::HorzBathtubRead => self.horz_read(tx),
            TwiCommand::VertBathtubRead | TwiCommand::TwoDBathtubRead => {
                self.vert_read(tx)
            }
            _ => panic!("{cmd:?} is not an immediate command"),
        }
    }

    fn latch_address<P, R, L>(
        &self,
        frame: &[u8],
        port: &mut ShortFramePort<P, R, L>,
    ) where
        R: RegisterBus,
    {
        let addr = be_u32(frame, 0);
        match port.regs.check(addr) {
            Ok(()) => {
                ringbuf_entry!(Trace::Latch(addr));
                port.latch = Ok(addr);
                self.record(Outcome::SUCCESS);
            }
            Err(e) => {
                ringbuf_entry!(Trace::RegReject(addr, e));
                port.latch = Err(reject_status(e));
                self.record(Outcome::ERROR);
            }
        }
    }

    /// Replies with the latched register, or a marker value when nothing
    /// valid is latched. Either way the latch is spent.
    fn read_register<P, R, L>(
        &self,
        port: &mut ShortFramePort<P, R, L>,
    ) -> Result<(), TwiError>
    where
        P: TwiTarget,
        R: RegisterBus,
    {
        let latch = core::mem::replace(
            &mut port.latch,
            Err(TwiStatus::REG_ADDR_OUT_OF_RANGE),
        );
        let value = match latch {
            Ok(addr) => {
                self.record(Outcome::SUCCESS);
                port.regs.read(addr).to_be_bytes()
            }
            Err(marker) => {
                self.record(Outcome::status(marker));
                REG_READ_INVALID
            }
        };
        port.transport.respond(&value)
    }

    /// Writes and, outside the window of registers that only latch on a
    /// full 64-bit write, reads back to confirm.
    fn write_register(&self, frame: &[u8], regs: &mut impl RegisterBus) {
        let addr = be_u32(frame, 0);
        let value = be_u32(frame, 4);

        if let Err(e) = regs.check(addr) {
            ringbuf_entry!(Trace::RegReject(addr, e));
            self.record(Outcome::ERROR);
            return;
        }

        regs.write(addr, value);
        if addr & UNVERIFIED_WRITE_MASK == UNVERIFIED_WRITE_WINDOW {
            self.record(Outcome::SUCCESS);
            return;
        }

        let read = regs.read(addr);
        if read == value {
            self.record(Outcome::SUCCESS);
        } else {
            ringbuf_entry!(Trace::WriteMismatch {
                addr,
                wrote: value,
                read,
            });
            self.record(Outcome::ERROR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::PrbsControl;
    use crate::testutil::{Call, FakeLink, FakePort, FakeRegs};
    use exp_api::pqm::{self, PrbsMode, UserPattern};
    use exp_api::FwStage;

    type Port = ShortFramePort<FakePort, FakeRegs, FakeLink>;

    fn port() -> Port {
        ShortFramePort::new(
            TwiTransport::new(FakePort::default()),
            FakeRegs::default(),
            FakeLink::default(),
        )
    }

    fn engine() -> ProtocolEngine {
        ProtocolEngine::with_config(FwStage::RunTime, true)
    }

    /// Delivers `bytes` as one transfer and dispatches.
    fn send(engine: &ProtocolEngine, port: &mut Port, bytes: &[u8]) {
        port.transport.port_mut().host_writes(bytes);
        engine.poll_short(port).unwrap();
    }

    fn last_sent(port: &Port) -> &[u8] {
        port.transport.port().sent.last().map_or(&[], |v| v.as_slice())
    }

    #[test]
    fn status_before_anything_else() {
        let engine = engine();
        let mut port = port();
        send(&engine, &mut port, &[0x02]);
        assert_eq!(last_sent(&port), &[4, 0, 3, 0x00, 0x00]);
        assert_eq!(port.transport.rx().available(), 0);
    }

    #[test]
    fn status_does_not_record_itself() {
        let engine = engine();
        let mut port = port();
        send(&engine, &mut port, &[9]);
        send(&engine, &mut port, &[2]);
        assert_eq!(last_sent(&port), &[4, 0, 3, 0xd0, 9]);
        send(&engine, &mut port, &[2]);
        assert_eq!(last_sent(&port), &[4, 0, 3, 0xd0, 9]);
    }

    #[test]
    fn partial_frame_waits() {
        let engine = engine();
        let mut port = port();
        send(&engine, &mut port, &[5, 8, 0x10, 0x00]);
        assert_eq!(port.transport.rx().cursor(), 0);
        assert_eq!(port.transport.rx().available(), 4);
        assert!(port.regs.writes.is_empty());
        assert_eq!(engine.report().last_cmd, 0);

        send(&engine, &mut port, &[0x00, 0x40, 0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(port.regs.writes, [(0x1000_0040, 0xdead_beef)]);
        assert_eq!(engine.report().status, TwiStatus::SUCCESS);
        assert_eq!(port.transport.rx().available(), 0);
    }

    #[test]
    fn several_frames_in_one_transfer() {
        let engine = engine();
        let mut port = port();
        port.regs.values.insert(0x20, 0x0102_0304);
        #[rustfmt::skip]
        send(&engine, &mut port, &[
            3, 4, 0x00, 0x00, 0x00, 0x20,   // latch
            4, 4, 0x00, 0x00, 0x00, 0x00,   // read
            2,                              // status
        ]);
        let sent = &port.transport.port().sent;
        assert_eq!(sent[0], [4, 1, 2, 3, 4]);
        assert_eq!(sent[1], [4, 0, 3, 0x00, 4]);
        assert_eq!(port.transport.rx().available(), 0);
    }

    #[test]
    fn invalid_id_discards_buffer() {
        let engine = engine();
        let mut port = port();
        send(&engine, &mut port, &[35, 2]);
        assert_eq!(port.transport.rx().available(), 0);
        assert_eq!(engine.report().status, TwiStatus::ERROR);
        assert_eq!(engine.report().last_cmd, 0);
    }

    #[test]
    fn reserved_commands_are_consumed() {
        let engine = engine();
        let mut port = port();
        send(&engine, &mut port, &[0, 7, 1, 2, 3, 4, 5]);
        assert_eq!(engine.report().status, TwiStatus::UNSUPPORTED);
        assert_eq!(engine.report().last_cmd, 7);
        assert_eq!(port.transport.rx().available(), 0);
    }

    #[test]
    fn latch_rejects_and_read_reports_marker() {
        let engine = engine();
        let mut port = port();
        port.regs.prohibited.push(0x44);

        send(&engine, &mut port, &[3, 4, 0, 0, 0, 0x44]);
        assert_eq!(engine.report().status, TwiStatus::ERROR);
        assert_eq!(port.latched(), Err(TwiStatus::REG_ADDR_PROHIBITED));

        send(&engine, &mut port, &[4, 4, 0, 0, 0, 0]);
        assert_eq!(last_sent(&port), &[4, 0xba, 0xdb, 0x10, 0x0d]);
        assert_eq!(engine.report().status, TwiStatus::REG_ADDR_PROHIBITED);
        assert_eq!(port.latched(), Err(TwiStatus::REG_ADDR_OUT_OF_RANGE));
    }

    #[test]
    fn read_spends_latch() {
        let engine = engine();
        let mut port = port();
        send(&engine, &mut port, &[3, 4, 0, 0, 0, 0x10]);
        send(&engine, &mut port, &[4, 4, 0, 0, 0, 0]);
        assert_eq!(last_sent(&port), &[4, 0, 0, 0, 0]);
        send(&engine, &mut port, &[4, 4, 0, 0, 0, 0]);
        assert_eq!(last_sent(&port), &[4, 0xba, 0xdb, 0x10, 0x0d]);
        assert_eq!(engine.report().status, TwiStatus::REG_ADDR_OUT_OF_RANGE);
    }

    #[test]
    fn write_verification() {
        let engine = engine();
        let mut port = port();
        port.regs.stuck.push(0x100);
        port.regs.stuck.push(0xa800_0100);

        send(&engine, &mut port, &[5, 8, 0, 0, 1, 0, 0, 0, 0, 1]);
        assert_eq!(engine.report().status, TwiStatus::ERROR);

        send(&engine, &mut port, &[5, 8, 0xa8, 0, 1, 0, 0, 0, 0, 1]);
        assert_eq!(engine.report().status, TwiStatus::SUCCESS);

        port.regs.out_of_range.push(0x200);
        send(&engine, &mut port, &[5, 8, 0, 0, 2, 0, 0, 0, 0, 1]);
        assert_eq!(engine.report().status, TwiStatus::ERROR);
        assert_eq!(port.regs.writes.len(), 2);
    }

    #[test]
    fn pqm_command_gated_when_off() {
        let engine = engine();
        let mut port = port();
        send(&engine, &mut port, &[10, 1, 8]);
        assert_eq!(engine.report().status, TwiStatus::UNSUPPORTED);
        assert_eq!(engine.report().last_cmd, 10);
        assert_eq!(port.transport.rx().available(), 0);
        assert_eq!(engine.with_pqm(|s| s.lanes), None);
    }

    #[test]
    fn gated_deferred_command_is_not_queued() {
        let engine = engine();
        let mut port = port();
        send(&engine, &mut port, &[14, 2, 1, 0]);
        assert_eq!(engine.report().status, TwiStatus::UNSUPPORTED);
        assert!(engine.job_idle());
    }

    #[test]
    fn pqm_settings_round_trip() {
        let engine = engine();
        engine.with_pqm(|s| s.enabled = true);
        let mut port = port();

        send(&engine, &mut port, &[10, 1, 9]);
        assert_eq!(engine.report().status, pqm::LANE_OUT_OF_RANGE);
        send(&engine, &mut port, &[10, 1, 2]);
        assert_eq!(engine.report().status, pqm::LANE_UNSUPPORTED);
        send(&engine, &mut port, &[10, 1, 4]);
        assert_eq!(engine.report().status, TwiStatus::SUCCESS);
        send(&engine, &mut port, &[11]);
        assert_eq!(last_sent(&port), &[1, 4]);

        send(&engine, &mut port, &[12, 1, 7]);
        assert_eq!(engine.report().status, pqm::FREQ_NOT_AVAILABLE);
        send(&engine, &mut port, &[12, 1, 3]);
        send(&engine, &mut port, &[13]);
        assert_eq!(last_sent(&port), &[1, 3]);
    }

    #[test]
    fn prbs_monitor_enables_selected_lanes() {
        let engine = engine();
        engine.with_pqm(|s| s.enabled = true);
        let mut port = port();

        send(&engine, &mut port, &[24, 1, 1]);
        assert_eq!(engine.report().status, pqm::LANE_UNSUPPORTED);
        assert!(port.link.calls.is_empty());

        send(&engine, &mut port, &[10, 1, 1]);
        send(&engine, &mut port, &[22, 1, 0x07]);
        send(&engine, &mut port, &[24, 1, 1]);
        send(&engine, &mut port, &[25, 1, 0]);
        assert_eq!(
            port.link.calls,
            [
                Call::Monitor(
                    0,
                    PrbsControl::Enable(PrbsMode::Prbs9, UserPattern::default())
                ),
                Call::Generator(0, PrbsControl::Disable),
            ]
        );
    }

    #[test]
    fn err_count_read_without_lanes_sends_nothing() {
        let engine = engine();
        engine.with_pqm(|s| s.enabled = true);
        let mut port = port();
        send(&engine, &mut port, &[27]);
        assert!(port.transport.port().sent.is_empty());
        assert_eq!(engine.report().status, pqm::LANE_UNSUPPORTED);

        send(&engine, &mut port, &[10, 1, 8]);
        send(&engine, &mut port, &[27]);
        assert_eq!(last_sent(&port).len(), 33);
        assert_eq!(last_sent(&port)[0], 32);
    }

    #[test]
    fn reads_leave_status_alone() {
        let engine = engine();
        let mut port = port();
        send(&engine, &mut port, &[9]);
        send(&engine, &mut port, &[29]);
        assert_eq!(last_sent(&port).len(), 129);
        assert_eq!(last_sent(&port)[0], 128);
        send(&engine, &mut port, &[31]);
        assert_eq!(last_sent(&port).len(), 258);
        assert_eq!(&last_sent(&port)[..2], &[0x01, 0x00]);
        assert_eq!(engine.report().status, TwiStatus::UNSUPPORTED);
        assert_eq!(engine.report().last_cmd, 31);
    }

    #[test]
    fn training_reset_resets_link() {
        let engine = engine();
        engine.with_pqm(|s| s.enabled = true);
        let mut port = port();
        send(&engine, &mut port, &[15]);
        assert_eq!(port.link.calls, [Call::Reset]);
        assert_eq!(engine.report().status, TwiStatus::SUCCESS);
    }

    #[test]
    fn deferred_command_goes_busy() {
        let engine = engine();
        let mut port = port();
        send(&engine, &mut port, &[34]);
        assert_eq!(engine.report().status, TwiStatus::BUSY);
        assert!(!engine.job_idle());

        send(&engine, &mut port, &[16, 1, 2]);
        assert_eq!(engine.report().status, TwiStatus::ERROR);
        assert_eq!(engine.report().last_cmd, 16);
        let pending =
            critical_section::with(|cs| engine.job.pending(cs)).unwrap();
        assert_eq!(pending.kind, JobKind::ForceDelayLineUpdate);
        assert_eq!(pending.frame(), &[34]);
    }

    #[test]
    fn bus_error_drops_partial_frame() {
        let engine = engine();
        let mut port = port();
        send(&engine, &mut port, &[1, 4, 0]);
        port.transport
            .port_mut()
            .activity
            .push_back(Activity::RX_ERROR);
        assert_eq!(
            engine.poll_short(&mut port),
            Err(EchError::Twi(TwiError::RxError))
        );
        assert_eq!(port.transport.rx().available(), 0);
        send(&engine, &mut port, &[2]);
        assert_eq!(last_sent(&port), &[4, 0, 3, 0x00, 0]);
    }
}
