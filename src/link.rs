// Connection manager: message ids, robot pipes and requests awaiting answers.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frame::{MAX_PAYLOAD, decode, encode};
use crate::proto::{Command, Response};
use crate::radio::{
    BROADCAST_ID, BROADCAST_SLOT, PipeAddress, PipeAllocator, RX_PIPES, RadioError,
    RadioSettings, Transceiver,
};
use crate::stats::LinkStats;

/// Requests without any response are failed after this long.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);
/// Message ids run 0..=254 and wrap.
pub const MAX_MESSAGE_ID: u8 = 254;

pub type ResponseCallback = Box<dyn FnMut(&mut Link, &Response)>;
pub type ErrorCallback = Box<dyn FnMut(&mut Link, u8)>;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("robot {0} is not registered")]
    UnknownRobot(u8),
    #[error("robot {0} is already registered")]
    AlreadyRegistered(u8),
    #[error("robot id {0} collides with the broadcast pipe")]
    IdCollision(u8),
    #[error("no free receive pipe for robot {0}")]
    NoFreePipe(u8),
    #[error(transparent)]
    Radio(#[from] RadioError),
}

struct PendingRequest {
    command: Command,
    on_response: Option<ResponseCallback>,
    on_error: Option<ErrorCallback>,
    created_at: Instant,
    response_count: u32,
    /// Set when the error callback already ran (write not acknowledged).
    error_reported: bool,
    serial: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub write: PipeAddress,
    pub read: PipeAddress,
    pub slot: u8,
}

pub struct Link {
    radio: Box<dyn Transceiver>,
    pipes: PipeAllocator,
    next_message_id: u8,
    robots: BTreeMap<u8, Registration>,
    free_slots: Vec<u8>,
    pending: BTreeMap<u8, PendingRequest>,
    serial: u64,
    stats: LinkStats,
}

impl Link {
    /// Brings the radio up listening on the broadcast pipe.
    pub fn open(
        mut radio: Box<dyn Transceiver>,
        pipes: PipeAllocator,
        settings: &RadioSettings,
    ) -> Result<Self, LinkError> {
        let broadcast = pipes.broadcast();
        radio.configure(settings)?;
        radio.power_up()?;
        radio.open_write_pipe(broadcast)?;
        radio.open_read_pipe(BROADCAST_SLOT, broadcast)?;
        radio.set_ack_for_pipe(BROADCAST_SLOT, false)?;
        radio.start_listening()?;
        info!(%broadcast, channel = settings.channel, "radio link up");

        let mut robots = BTreeMap::new();
        robots.insert(
            BROADCAST_ID,
            Registration {
                write: broadcast,
                read: broadcast,
                slot: BROADCAST_SLOT,
            },
        );

        Ok(Self {
            radio,
            pipes,
            next_message_id: 0,
            robots,
            free_slots: (BROADCAST_SLOT + 1..RX_PIPES).rev().collect(),
            pending: BTreeMap::new(),
            serial: 0,
            stats: LinkStats::new(),
        })
    }

    /* -------------------- sending -------------------- */

    pub fn broadcast(
        &mut self,
        mut command: Command,
        on_response: ResponseCallback,
        on_error: Option<ErrorCallback>,
    ) -> Result<u8, LinkError> {
        let mid = self.reserve_message_id();
        command.assign_message_id(mid);
        let frame = encode(&command, mid);

        let target = self.pipes.broadcast();
        // Nobody acknowledges a broadcast; the write result carries no meaning.
        if let Err(e) = self.transmit(target, BROADCAST_SLOT, false, &frame) {
            warn!(mid, %command, error = %e, "broadcast failed");
            return Err(e.into());
        }

        debug!(mid, %command, "broadcast");
        self.stats.broadcast += 1;
        self.insert_pending(mid, command, on_response, on_error, false);
        Ok(mid)
    }

    /// Sends to one robot with link-layer acknowledgement.
    ///
    /// An unacknowledged write fires `on_error` before this returns. The
    /// request is still tracked so a late answer is delivered, but the
    /// timeout sweep will not report it a second time.
    pub fn send(
        &mut self,
        robot_id: u8,
        mut command: Command,
        on_response: ResponseCallback,
        on_error: Option<ErrorCallback>,
    ) -> Result<u8, LinkError> {
        let reg = match self.robots.get(&robot_id) {
            Some(reg) if robot_id != BROADCAST_ID => *reg,
            _ => return Err(LinkError::UnknownRobot(robot_id)),
        };
        let mid = self.reserve_message_id();
        command.assign_message_id(mid);
        let frame = encode(&command, mid);

        let acked = match self.transmit(reg.write, reg.slot, true, &frame) {
            Ok(acked) => acked,
            Err(e) => {
                warn!(robot_id, mid, %command, error = %e, "send failed");
                return Err(e.into());
            }
        };

        debug!(robot_id, mid, %command, acked, "send");
        self.stats.sent += 1;
        self.insert_pending(mid, command, on_response, on_error, !acked);

        if !acked {
            self.stats.write_failures += 1;
            warn!(robot_id, mid, "write not acknowledged");
            let cb = self.pending.get_mut(&mid).and_then(|p| p.on_error.take());
            if let Some(mut cb) = cb {
                cb(self, mid);
            }
        }
        Ok(mid)
    }

    /// Writes one frame with listening paused. Ack is switched back off and
    /// listening resumed even when the write itself fails.
    fn transmit(
        &mut self,
        target: PipeAddress,
        slot: u8,
        ack: bool,
        frame: &[u8],
    ) -> Result<bool, RadioError> {
        self.radio.stop_listening()?;
        let written = self
            .radio
            .open_write_pipe(target)
            .and_then(|()| self.radio.set_ack_for_pipe(slot, ack))
            .and_then(|()| self.radio.write(frame));
        // Off by default so broadcasts are not affected.
        let ack_off = if ack {
            self.radio.set_ack_for_pipe(slot, false)
        } else {
            Ok(())
        };
        let listening = self.radio.start_listening();
        let acked = written?;
        ack_off?;
        listening?;
        Ok(acked)
    }

    /// Hands out the next id and advances the counter.
    ///
    /// A request still parked on that id is evicted. If it never got an
    /// answer its error callback runs here, before the id is reused, so
    /// follow-up sends from the callback get fresh ids.
    fn reserve_message_id(&mut self) -> u8 {
        let mid = self.next_message_id;
        self.next_message_id = if mid >= MAX_MESSAGE_ID { 0 } else { mid + 1 };

        let Some(mut stale) = self.pending.remove(&mid) else {
            return mid;
        };
        warn!(
            mid,
            command = %stale.command,
            responses = stale.response_count,
            age_ms = stale.created_at.elapsed().as_millis() as u64,
            "message id wrapped onto an unfinished request, dropping it"
        );
        if stale.response_count == 0 && !stale.error_reported {
            self.stats.timeouts += 1;
            if let Some(mut cb) = stale.on_error.take() {
                cb(self, mid);
            }
        }
        mid
    }

    fn insert_pending(
        &mut self,
        mid: u8,
        command: Command,
        on_response: ResponseCallback,
        on_error: Option<ErrorCallback>,
        error_reported: bool,
    ) {
        self.serial += 1;
        self.pending.insert(
            mid,
            PendingRequest {
                command,
                on_response: Some(on_response),
                on_error,
                created_at: Instant::now(),
                response_count: 0,
                error_reported,
                serial: self.serial,
            },
        );
    }

    /* -------------------- receiving -------------------- */

    pub fn poll(&mut self) -> Result<(), LinkError> {
        self.poll_at(Instant::now())
    }

    /// One receive step followed by the timeout sweep, judged at `now`.
    pub fn poll_at(&mut self, now: Instant) -> Result<(), LinkError> {
        if let Some(slot) = self.radio.available()? {
            let bytes = self.radio.read(MAX_PAYLOAD)?;
            match decode(&bytes) {
                Ok(resp) => self.dispatch(slot, resp),
                Err(e) => {
                    self.stats.unparseable += 1;
                    warn!(slot, ?bytes, error = %e, "dropping unparseable payload");
                }
            }
        }
        self.sweep(now);
        Ok(())
    }

    fn dispatch(&mut self, slot: u8, resp: Response) {
        let mid = resp.message_id();
        let Some(req) = self.pending.get_mut(&mid) else {
            self.stats.unmatched += 1;
            debug!(slot, mid, code = ?resp.return_code(), "response for no pending request");
            return;
        };
        self.stats.responses += 1;
        req.response_count += 1;
        let terminal = req.command.policy().is_terminal(resp.return_code());
        debug!(slot, mid, code = ?resp.return_code(), terminal, "response");

        if terminal {
            if let Some(mut req) = self.pending.remove(&mid)
                && let Some(mut cb) = req.on_response.take()
            {
                cb(self, &resp);
            }
            return;
        }

        let serial = req.serial;
        if let Some(mut cb) = req.on_response.take() {
            cb(self, &resp);
            // Hand the callback back unless the request was cleared meanwhile.
            if let Some(req) = self.pending.get_mut(&mid)
                && req.serial == serial
            {
                req.on_response = Some(cb);
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        let expired: Vec<u8> = self
            .pending
            .iter()
            .filter(|(_, p)| {
                p.response_count == 0 && now.saturating_duration_since(p.created_at) >= RESPONSE_TIMEOUT
            })
            .map(|(mid, _)| *mid)
            .collect();

        for mid in expired {
            let Some(mut req) = self.pending.remove(&mid) else {
                continue;
            };
            // Already counted and reported as an unacknowledged write.
            if req.error_reported {
                debug!(mid, command = %req.command, "dropping unacknowledged request");
                continue;
            }
            self.stats.timeouts += 1;
            warn!(mid, command = %req.command, "no response, request timed out");
            if let Some(mut cb) = req.on_error.take() {
                cb(self, mid);
            }
        }
    }

    /// Drops a pending request without running any callback.
    pub fn clear_pending(&mut self, message_id: u8) -> bool {
        self.pending.remove(&message_id).is_some()
    }

    /* -------------------- robots -------------------- */

    pub fn register(&mut self, robot_id: u8) -> Result<Registration, LinkError> {
        if robot_id == BROADCAST_ID {
            return Err(LinkError::IdCollision(robot_id));
        }
        if self.robots.contains_key(&robot_id) {
            return Err(LinkError::AlreadyRegistered(robot_id));
        }
        let Some(addr) = self.pipes.address_for(robot_id) else {
            return Err(LinkError::IdCollision(robot_id));
        };
        let Some(slot) = self.free_slots.pop() else {
            return Err(LinkError::NoFreePipe(robot_id));
        };
        if let Err(e) = self.radio.open_read_pipe(slot, addr) {
            self.free_slots.push(slot);
            return Err(e.into());
        }
        let reg = Registration {
            write: addr,
            read: addr,
            slot,
        };
        self.robots.insert(robot_id, reg);
        info!(robot_id, slot, %addr, "robot registered");
        Ok(reg)
    }

    /// Forgets a robot. The hardware pipe stays open until its slot is reused.
    pub fn unregister(&mut self, robot_id: u8) -> bool {
        if robot_id == BROADCAST_ID {
            return false;
        }
        match self.robots.remove(&robot_id) {
            Some(reg) => {
                self.free_slots.push(reg.slot);
                // Lowest slot is handed out first.
                self.free_slots.sort_unstable_by(|a, b| b.cmp(a));
                info!(robot_id, slot = reg.slot, "robot unregistered");
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, robot_id: u8) -> bool {
        robot_id != BROADCAST_ID && self.robots.contains_key(&robot_id)
    }

    pub fn registration(&self, robot_id: u8) -> Option<Registration> {
        self.robots.get(&robot_id).copied()
    }

    /* -------------------- introspection -------------------- */

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, message_id: u8) -> bool {
        self.pending.contains_key(&message_id)
    }

    pub fn next_message_id(&self) -> u8 {
        self.next_message_id
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn log_stats(&mut self, interval: Duration) {
        let pending = self.pending.len();
        self.stats.maybe_log(interval, pending);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::proto::factory::{action, general};
    use crate::proto::{MoveDirection, ReturnCode};
    use crate::radio::mock::{MockCall, MockRadio};
    use std::cell::RefCell;
    use std::rc::Rc;

    pub(crate) fn template() -> PipeAddress {
        PipeAddress([0xE0, 0xE0, 0xF1, 0xF1, 0xFF])
    }

    pub(crate) fn open_link() -> (Link, MockRadio) {
        let radio = MockRadio::new();
        let settings = RadioSettings {
            channel: 50,
            retries: 15,
            payload_size: 32,
        };
        let link = Link::open(
            Box::new(radio.clone()),
            PipeAllocator::new(template()).unwrap(),
            &settings,
        )
        .unwrap();
        radio.clear_calls();
        (link, radio)
    }

    type Log = Rc<RefCell<Vec<String>>>;

    fn recorder(log: &Log) -> (ResponseCallback, Option<ErrorCallback>) {
        let r = log.clone();
        let e = log.clone();
        (
            Box::new(move |_, resp| r.borrow_mut().push(format!("resp {:?}", resp.return_code()))),
            Some(Box::new(move |_, mid| e.borrow_mut().push(format!("err {mid}")))),
        )
    }

    #[test]
    fn open_listens_on_broadcast() {
        let radio = MockRadio::new();
        let settings = RadioSettings {
            channel: 50,
            retries: 15,
            payload_size: 32,
        };
        let _link = Link::open(
            Box::new(radio.clone()),
            PipeAllocator::new(template()).unwrap(),
            &settings,
        )
        .unwrap();
        assert_eq!(
            radio.calls(),
            vec![
                MockCall::Configure,
                MockCall::PowerUp,
                MockCall::OpenWrite(template()),
                MockCall::OpenRead(0, template()),
                MockCall::SetAck(0, false),
                MockCall::StartListening,
            ]
        );
    }

    #[test]
    fn broadcast_targets_broadcast_pipe_without_ack() {
        let (mut link, radio) = open_link();
        let log = Log::default();
        let (r, e) = recorder(&log);
        let mid = link.broadcast(general::set_id(7).unwrap(), r, e).unwrap();
        assert_eq!(mid, 0);
        assert_eq!(
            radio.calls(),
            vec![
                MockCall::StopListening,
                MockCall::OpenWrite(template()),
                MockCall::SetAck(0, false),
                MockCall::Write(vec![0x01, 0, 7]),
                MockCall::StartListening,
            ]
        );
        assert!(link.is_pending(0));
        assert_eq!(link.next_message_id(), 1);
    }

    #[test]
    fn send_requires_registration() {
        let (mut link, _radio) = open_link();
        let log = Log::default();
        let (r, e) = recorder(&log);
        let err = link.send(3, general::reboot(), r, e).unwrap_err();
        assert!(matches!(err, LinkError::UnknownRobot(3)));
        let (r, e) = recorder(&log);
        assert!(matches!(
            link.send(BROADCAST_ID, general::reboot(), r, e),
            Err(LinkError::UnknownRobot(0xFF))
        ));
        assert_eq!(link.pending_count(), 0);
    }

    #[test]
    fn send_toggles_ack_around_write() {
        let (mut link, radio) = open_link();
        link.register(9).unwrap();
        radio.clear_calls();
        let log = Log::default();
        let (r, e) = recorder(&log);
        link.send(9, action::set_speed(80), r, e).unwrap();
        let robot = PipeAddress([0xE0, 0xE0, 0xF1, 0xF1, 9]);
        assert_eq!(
            radio.calls(),
            vec![
                MockCall::StopListening,
                MockCall::OpenWrite(robot),
                MockCall::SetAck(1, true),
                MockCall::Write(vec![0x23, 0, 80]),
                MockCall::SetAck(1, false),
                MockCall::StartListening,
            ]
        );
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn unacked_write_reports_once_and_still_accepts_late_answer() {
        let (mut link, radio) = open_link();
        link.register(4).unwrap();
        radio.fail_next_writes(1);
        let log = Log::default();
        let (r, e) = recorder(&log);
        let mid = link.send(4, general::reboot(), r, e).unwrap();
        assert_eq!(*log.borrow(), vec![format!("err {mid}")]);
        assert!(link.is_pending(mid));
        assert_eq!(link.stats().write_failures, 1);

        radio.push_inbound(1, &[mid, 0]);
        link.poll().unwrap();
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(log.borrow()[1], "resp Success");
        assert!(!link.is_pending(mid));
    }

    #[test]
    fn unacked_write_is_not_reported_again_by_sweep() {
        let (mut link, radio) = open_link();
        link.register(4).unwrap();
        radio.fail_next_writes(1);
        let log = Log::default();
        let (r, e) = recorder(&log);
        link.send(4, general::reboot(), r, e).unwrap();
        link.poll_at(Instant::now() + RESPONSE_TIMEOUT).unwrap();
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(link.pending_count(), 0);
        assert_eq!(link.stats().write_failures, 1);
        assert_eq!(link.stats().timeouts, 0);
    }

    #[test]
    fn single_response_completes_request() {
        let (mut link, radio) = open_link();
        let log = Log::default();
        let (r, e) = recorder(&log);
        let mid = link.broadcast(general::set_id(7).unwrap(), r, e).unwrap();
        radio.push_inbound(0, &[mid, 0]);
        link.poll().unwrap();
        assert_eq!(*log.borrow(), vec!["resp Success".to_string()]);
        assert_eq!(link.pending_count(), 0);
    }

    #[test]
    fn action_started_keeps_request_open() {
        let (mut link, radio) = open_link();
        link.register(2).unwrap();
        let log = Log::default();
        let (r, e) = recorder(&log);
        let mid = link
            .send(2, action::start_move_mm(100, Some(MoveDirection::Forward)), r, e)
            .unwrap();

        radio.push_inbound(1, &[mid, 1]);
        link.poll().unwrap();
        assert!(link.is_pending(mid));

        // Past the deadline but already answered once: never swept.
        link.poll_at(Instant::now() + RESPONSE_TIMEOUT * 3).unwrap();
        assert!(link.is_pending(mid));

        radio.push_inbound(1, &[mid, 0]);
        link.poll().unwrap();
        assert!(!link.is_pending(mid));
        assert_eq!(
            *log.borrow(),
            vec!["resp ActionStarted".to_string(), "resp Success".to_string()]
        );
    }

    #[test]
    fn silent_request_times_out_exactly_once() {
        let (mut link, _radio) = open_link();
        let log = Log::default();
        let (r, e) = recorder(&log);
        let t0 = Instant::now();
        let mid = link.broadcast(general::set_id(9).unwrap(), r, e).unwrap();

        link.poll_at(t0).unwrap();
        assert!(link.is_pending(mid));
        assert!(log.borrow().is_empty());

        link.poll_at(Instant::now() + RESPONSE_TIMEOUT).unwrap();
        assert_eq!(*log.borrow(), vec![format!("err {mid}")]);
        assert!(!link.is_pending(mid));

        link.poll_at(Instant::now() + RESPONSE_TIMEOUT * 2).unwrap();
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn response_in_deadline_tick_wins() {
        let (mut link, radio) = open_link();
        let log = Log::default();
        let (r, e) = recorder(&log);
        let mid = link.broadcast(general::set_id(9).unwrap(), r, e).unwrap();
        radio.push_inbound(0, &[mid, 0]);
        link.poll_at(Instant::now() + RESPONSE_TIMEOUT).unwrap();
        assert_eq!(*log.borrow(), vec!["resp Success".to_string()]);
        assert_eq!(link.stats().timeouts, 0);
    }

    #[test]
    fn junk_and_strangers_are_counted_not_dispatched() {
        let (mut link, radio) = open_link();
        radio.push_inbound(0, &[1]);
        radio.push_inbound(0, &[1, 99]);
        radio.push_inbound(0, &[77, 0]);
        link.poll().unwrap();
        link.poll().unwrap();
        link.poll().unwrap();
        assert_eq!(link.stats().unparseable, 2);
        assert_eq!(link.stats().unmatched, 1);
    }

    #[test]
    fn register_rules() {
        let (mut link, radio) = open_link();
        assert!(matches!(link.register(0xFF), Err(LinkError::IdCollision(0xFF))));
        let reg = link.register(7).unwrap();
        assert_eq!(reg.slot, 1);
        assert_eq!(reg.write, PipeAddress([0xE0, 0xE0, 0xF1, 0xF1, 7]));
        assert!(matches!(link.register(7), Err(LinkError::AlreadyRegistered(7))));
        assert!(link.is_registered(7));
        assert!(!link.is_registered(0xFF));
        assert_eq!(
            radio.calls(),
            vec![MockCall::OpenRead(1, PipeAddress([0xE0, 0xE0, 0xF1, 0xF1, 7]))]
        );
    }

    #[test]
    fn pipe_slots_come_from_a_free_list() {
        let (mut link, _radio) = open_link();
        for id in 10..15 {
            link.register(id).unwrap();
        }
        assert!(matches!(link.register(15), Err(LinkError::NoFreePipe(15))));

        assert!(link.unregister(12));
        assert!(!link.unregister(12));
        assert!(!link.is_registered(12));
        let reg = link.register(15).unwrap();
        assert_eq!(reg.slot, 3);
        assert!(!link.unregister(BROADCAST_ID));
    }

    #[test]
    fn message_ids_wrap_after_254() {
        let (mut link, _radio) = open_link();
        let mut seen = Vec::new();
        for _ in 0..300 {
            let log = Log::default();
            let (r, e) = recorder(&log);
            let mid = link.broadcast(general::reboot(), r, e).unwrap();
            seen.push(mid);
            assert!(link.clear_pending(mid));
        }
        let expected: Vec<u8> = (0..=254u8).chain(0..45).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn wrapped_id_fails_unanswered_request() {
        let (mut link, _radio) = open_link();
        let log = Log::default();
        for _ in 0..=MAX_MESSAGE_ID {
            let (r, e) = recorder(&log);
            link.broadcast(general::reboot(), r, e).unwrap();
        }
        assert_eq!(link.pending_count(), 255);
        let (r, e) = recorder(&log);
        let mid = link.broadcast(general::reboot(), r, e).unwrap();
        assert_eq!(mid, 0);
        assert_eq!(link.pending_count(), 255);
        assert_eq!(*log.borrow(), vec!["err 0".to_string()]);
        assert_eq!(link.stats().timeouts, 1);
    }

    #[test]
    fn wrapped_id_drops_answered_request_quietly() {
        let (mut link, radio) = open_link();
        link.register(2).unwrap();
        let log = Log::default();
        let (r, e) = recorder(&log);
        let first = link.send(2, action::start_move_mm(50, None), r, e).unwrap();
        radio.push_inbound(1, &[first, 1]);
        link.poll().unwrap();
        for _ in 0..MAX_MESSAGE_ID {
            let mid = link
                .broadcast(general::reboot(), Box::new(|_, _| {}), None)
                .unwrap();
            link.clear_pending(mid);
        }
        link.broadcast(general::reboot(), Box::new(|_, _| {}), None)
            .unwrap();
        assert_eq!(*log.borrow(), vec!["resp ActionStarted".to_string()]);
    }

    #[test]
    fn wrapped_callback_can_resend_without_clobbering() {
        let (mut link, _radio) = open_link();
        let resent = Rc::new(RefCell::new(None));
        let slot = resent.clone();
        link.broadcast(
            general::set_id(9).unwrap(),
            Box::new(|_, _| {}),
            Some(Box::new(move |link, _| {
                let mid = link
                    .broadcast(general::set_id(9).unwrap(), Box::new(|_, _| {}), None)
                    .unwrap();
                *slot.borrow_mut() = Some(mid);
            })),
        )
        .unwrap();
        for _ in 0..MAX_MESSAGE_ID {
            let mid = link
                .broadcast(general::reboot(), Box::new(|_, _| {}), None)
                .unwrap();
            link.clear_pending(mid);
        }
        let mid = link
            .broadcast(general::reboot(), Box::new(|_, _| {}), None)
            .unwrap();
        assert_eq!(mid, 0);
        assert_eq!(*resent.borrow(), Some(1));
        assert!(link.is_pending(0));
        assert!(link.is_pending(1));
        assert_eq!(link.next_message_id(), 2);
    }

    #[test]
    fn failed_write_restores_listening() {
        let (mut link, radio) = open_link();
        link.register(4).unwrap();
        radio.clear_calls();
        radio.break_next_writes(1);
        let log = Log::default();
        let (r, e) = recorder(&log);
        let err = link.send(4, general::reboot(), r, e).unwrap_err();
        assert!(matches!(err, LinkError::Radio(RadioError::Bridge(_))));
        assert_eq!(
            radio.calls(),
            vec![
                MockCall::StopListening,
                MockCall::OpenWrite(PipeAddress([0xE0, 0xE0, 0xF1, 0xF1, 4])),
                MockCall::SetAck(1, true),
                MockCall::Write(vec![0x00, 0]),
                MockCall::SetAck(1, false),
                MockCall::StartListening,
            ]
        );
        assert_eq!(link.pending_count(), 0);
        assert!(log.borrow().is_empty());

        radio.clear_calls();
        radio.break_next_writes(1);
        let (r, e) = recorder(&log);
        assert!(link.broadcast(general::reboot(), r, e).is_err());
        assert_eq!(radio.calls().last(), Some(&MockCall::StartListening));
    }

    #[test]
    fn callbacks_can_send_follow_ups() {
        let (mut link, radio) = open_link();
        link.register(5).unwrap();
        let follow_up = Rc::new(RefCell::new(None));
        let slot = follow_up.clone();
        let mid = link
            .send(
                5,
                action::cancel_movement(),
                Box::new(move |link, _| {
                    let next = link
                        .send(5, general::reboot(), Box::new(|_, _| {}), None)
                        .unwrap();
                    *slot.borrow_mut() = Some(next);
                }),
                None,
            )
            .unwrap();
        radio.push_inbound(1, &[mid, 0]);
        link.poll().unwrap();
        let next = follow_up.borrow().unwrap();
        assert_eq!(next, mid + 1);
        assert!(link.is_pending(next));
        assert_eq!(radio.written().last().unwrap(), &vec![0x00, next]);
    }

    #[test]
    fn clearing_inside_non_terminal_callback_sticks() {
        let (mut link, radio) = open_link();
        link.register(5).unwrap();
        let mid = link
            .send(
                5,
                action::start_move_mm(10, None),
                Box::new(|link, resp| {
                    if resp.return_code() == ReturnCode::ActionStarted {
                        link.clear_pending(resp.message_id());
                    }
                }),
                None,
            )
            .unwrap();
        radio.push_inbound(1, &[mid, 1]);
        link.poll().unwrap();
        assert!(!link.is_pending(mid));
    }
}
