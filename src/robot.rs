use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::link::{ErrorCallback, Link, LinkError, ResponseCallback};
use crate::pose::Pose;
use crate::proto::factory::action;
use crate::proto::{Command, MoveDirection, Response, ReturnCode, RotateDirection};
use crate::vision::{ListenerHandle, MarkerId, PoseListener, Vision};

/// Oldest entries are dropped once the log holds this many.
pub const LOG_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotState {
    Idle,
    CommandSent,
    Working,
    ErrorOccurred,
    /// Soft state: the next `send_command` re-arms the robot.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Command,
    Response,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub message_id: u8,
    /// Command category, or return code for responses.
    pub category: String,
    pub text: String,
    pub kind: LogKind,
}

impl LogEntry {
    fn command(message_id: u8, cmd: &Command) -> Self {
        Self {
            message_id,
            category: format!("{:?}", cmd.category()),
            text: cmd.to_string(),
            kind: LogKind::Command,
        }
    }

    fn response(resp: &Response) -> Self {
        Self {
            message_id: resp.message_id(),
            category: format!("{:?}", resp.return_code()),
            text: format!("{:?} data={:?}", resp.return_code(), resp.data()),
            kind: LogKind::Response,
        }
    }
}

#[derive(Debug)]
struct RobotStatus {
    pose: Pose,
    state: RobotState,
    log: VecDeque<LogEntry>,
}

impl RobotStatus {
    fn push_log(&mut self, entry: LogEntry) {
        if self.log.len() == LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(entry);
    }
}

/// Handle to one robot in the fleet. Clones share state.
#[derive(Debug, Clone)]
pub struct Robot {
    id: u8,
    status: Rc<RefCell<RobotStatus>>,
    listener: Option<ListenerHandle>,
}

impl Robot {
    /// Registers `id` with the link and returns an idle robot.
    pub fn connect(id: u8, link: &mut Link) -> Result<Self, LinkError> {
        link.register(id)?;
        Ok(Self::detached(id))
    }

    /// Robot handle without touching the link, for ids registered elsewhere.
    pub fn detached(id: u8) -> Self {
        Self {
            id,
            status: Rc::new(RefCell::new(RobotStatus {
                pose: Pose::default(),
                state: RobotState::Idle,
                log: VecDeque::new(),
            })),
            listener: None,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn state(&self) -> RobotState {
        self.status.borrow().state
    }

    pub fn pose(&self) -> Pose {
        self.status.borrow().pose
    }

    /// Hands out the log and empties it; each entry is delivered once.
    pub fn take_log(&self) -> Vec<LogEntry> {
        self.status.borrow_mut().log.drain(..).collect()
    }

    pub fn log_len(&self) -> usize {
        self.status.borrow().log.len()
    }

    /* ---------- vision ---------- */

    pub fn attach_vision(&mut self, vision: &mut dyn Vision) {
        if self.listener.is_none() {
            let handle = vision.add_pose_listener(MarkerId::from(self.id), self.pose_listener());
            self.listener = Some(handle);
        }
    }

    pub fn detach_vision(&mut self, vision: &mut dyn Vision) -> bool {
        match self.listener.take() {
            Some(handle) => vision.remove_pose_listener(MarkerId::from(self.id), handle),
            None => false,
        }
    }

    fn pose_listener(&self) -> PoseListener {
        let status: Weak<RefCell<RobotStatus>> = Rc::downgrade(&self.status);
        Box::new(move |pose| {
            if let Some(status) = status.upgrade() {
                status.borrow_mut().pose = pose;
            }
        })
    }

    /* ---------- commands ---------- */

    /// Sends `command` and tracks the exchange in the robot state.
    ///
    /// The state update always runs before the caller's callbacks.
    pub fn send_command(
        &self,
        link: &mut Link,
        command: Command,
        on_response: Option<ResponseCallback>,
        on_error: Option<ErrorCallback>,
        log: bool,
    ) -> Result<u8, LinkError> {
        let id = self.id;
        let logged = log.then(|| command.clone());
        self.status.borrow_mut().state = RobotState::CommandSent;

        let status = self.status.clone();
        let mut on_response = on_response;
        let response_cb: ResponseCallback = Box::new(move |link, resp| {
            {
                let mut st = status.borrow_mut();
                if log {
                    st.push_log(LogEntry::response(resp));
                }
                st.state = match resp.return_code() {
                    ReturnCode::Success => RobotState::Idle,
                    ReturnCode::ActionStarted => RobotState::Working,
                    _ => RobotState::ErrorOccurred,
                };
                if resp.return_code().is_error() {
                    warn!(robot = id, mid = resp.message_id(), code = ?resp.return_code(), "robot reported an error");
                } else {
                    debug!(robot = id, mid = resp.message_id(), state = ?st.state, "robot response");
                }
            }
            if let Some(cb) = on_response.as_mut() {
                cb(link, resp);
            }
        });

        let status = self.status.clone();
        let mut on_error = on_error;
        let error_cb: ErrorCallback = Box::new(move |link, mid| {
            status.borrow_mut().state = RobotState::Disconnected;
            warn!(robot = id, mid, "robot unreachable");
            if let Some(cb) = on_error.as_mut() {
                cb(link, mid);
            }
        });

        match link.send(id, command, response_cb, Some(error_cb)) {
            Ok(mid) => {
                if let Some(cmd) = logged {
                    self.status.borrow_mut().push_log(LogEntry::command(mid, &cmd));
                }
                Ok(mid)
            }
            Err(e) => {
                self.status.borrow_mut().state = RobotState::Disconnected;
                Err(e)
            }
        }
    }

    pub fn move_mm(
        &self,
        link: &mut Link,
        mm: u16,
        direction: Option<MoveDirection>,
    ) -> Result<u8, LinkError> {
        self.send_command(link, action::start_move_mm(mm, direction), None, None, true)
    }

    pub fn rotate(
        &self,
        link: &mut Link,
        degrees: u16,
        direction: RotateDirection,
    ) -> Result<u8, LinkError> {
        self.send_command(
            link,
            action::start_rotate_degrees(degrees, direction),
            None,
            None,
            true,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::tests::open_link;
    use crate::proto::factory::general;
    use crate::vision::Tracker;
    use proptest::prelude::*;

    fn connected() -> (Robot, Link, crate::radio::mock::MockRadio) {
        let (mut link, radio) = open_link();
        let robot = Robot::connect(7, &mut link).unwrap();
        (robot, link, radio)
    }

    #[test]
    fn follows_move_through_started_and_done() {
        let (robot, mut link, radio) = connected();
        let mid = robot.move_mm(&mut link, 100, Some(MoveDirection::Forward)).unwrap();
        assert_eq!(robot.state(), RobotState::CommandSent);

        radio.push_inbound(1, &[mid, 1]);
        link.poll().unwrap();
        assert_eq!(robot.state(), RobotState::Working);

        radio.push_inbound(1, &[mid, 0]);
        link.poll().unwrap();
        assert_eq!(robot.state(), RobotState::Idle);

        let log = robot.take_log();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].kind, LogKind::Command);
        assert_eq!(log[0].category, "Action");
        assert_eq!(log[1].category, "ActionStarted");
        assert_eq!(log[2].kind, LogKind::Response);
        assert!(robot.take_log().is_empty());
    }

    #[test]
    fn error_code_and_disconnect() {
        let (robot, mut link, radio) = connected();
        let mid = robot
            .send_command(&mut link, general::reboot(), None, None, false)
            .unwrap();
        radio.push_inbound(1, &[mid, 2]);
        link.poll().unwrap();
        assert_eq!(robot.state(), RobotState::ErrorOccurred);
        assert_eq!(robot.log_len(), 0);

        robot.rotate(&mut link, 90, RotateDirection::Clockwise).unwrap();
        link.poll_at(std::time::Instant::now() + crate::link::RESPONSE_TIMEOUT)
            .unwrap();
        assert_eq!(robot.state(), RobotState::Disconnected);

        // Disconnected re-arms on the next command.
        robot.rotate(&mut link, 90, RotateDirection::Clockwise).unwrap();
        assert_eq!(robot.state(), RobotState::CommandSent);
    }

    #[test]
    fn unacked_write_disconnects_before_send_returns() {
        let (robot, mut link, radio) = connected();
        radio.fail_next_writes(1);
        let fired = Rc::new(RefCell::new(false));
        let flag = fired.clone();
        robot
            .send_command(
                &mut link,
                general::reboot(),
                None,
                Some(Box::new(move |_, _| *flag.borrow_mut() = true)),
                true,
            )
            .unwrap();
        assert_eq!(robot.state(), RobotState::Disconnected);
        assert!(*fired.borrow());
    }

    #[test]
    fn unregistered_robot_fails_fast() {
        let (mut link, _radio) = open_link();
        let robot = Robot::detached(3);
        assert!(matches!(
            robot.move_mm(&mut link, 10, None),
            Err(LinkError::UnknownRobot(3))
        ));
    }

    #[test]
    fn caller_callback_sees_updated_state() {
        let (robot, mut link, radio) = connected();
        let observer = robot.clone();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let mid = robot
            .send_command(
                &mut link,
                general::reboot(),
                Some(Box::new(move |_, _| *sink.borrow_mut() = Some(observer.state()))),
                None,
                true,
            )
            .unwrap();
        radio.push_inbound(1, &[mid, 0]);
        link.poll().unwrap();
        assert_eq!(*seen.borrow(), Some(RobotState::Idle));
    }

    #[test]
    fn pose_comes_from_vision_listener() {
        let mut tracker = Tracker::new();
        let mut robot = Robot::detached(4);
        let handle = tracker.add_listener(4, robot.pose_listener());
        tracker.observe(4, Pose::new(1.0, 2.0, 3.0));
        assert_eq!(robot.pose(), Pose::new(1.0, 2.0, 3.0));
        assert!(tracker.remove_listener(4, handle));
        assert!(!robot.detach_vision(&mut crate::vision::LineVision::new(std::io::empty())));
    }

    #[test]
    fn log_is_bounded() {
        let (robot, mut link, _radio) = connected();
        for _ in 0..LOG_CAPACITY + 10 {
            let mid = robot
                .send_command(&mut link, general::reboot(), None, None, true)
                .unwrap();
            link.clear_pending(mid);
        }
        assert_eq!(robot.log_len(), LOG_CAPACITY);
    }

    fn expected(code: u8) -> RobotState {
        match code {
            0 => RobotState::Idle,
            1 => RobotState::Working,
            _ => RobotState::ErrorOccurred,
        }
    }

    proptest! {
        #[test]
        fn state_tracks_every_response(codes in proptest::collection::vec(0u8..=10, 1..20)) {
            let (robot, mut link, radio) = connected();
            for code in codes {
                let mid = robot
                    .send_command(&mut link, general::reboot(), None, None, true)
                    .unwrap();
                prop_assert_eq!(robot.state(), RobotState::CommandSent);
                radio.push_inbound(1, &[mid, code]);
                link.poll().unwrap();
                prop_assert_eq!(robot.state(), expected(code));
            }
        }
    }
}
