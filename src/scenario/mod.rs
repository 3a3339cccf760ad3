// Calibration scenarios: scripted commands, measured by the vision feed.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use tracing::{info, warn};

use crate::link::Link;
use crate::pose::Pose;
use crate::proto::{Command, Response, ReturnCode};
use crate::robot::Robot;

pub mod distance_per_rotation;
pub mod rotation_per_distance;
pub mod time_per_distance;
pub mod timing;

pub use distance_per_rotation::DistancePerRotation;
pub use rotation_per_distance::RotationPerDistance;
pub use time_per_distance::TimePerDistance;
pub use timing::{DistanceTime, RotationTime};

/// What a step looked like once it finished.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub command: Command,
    pub responses: Vec<Response>,
    pub pose_before: Pose,
    pub pose_after: Pose,
    pub elapsed: Duration,
    sent_at: Option<Instant>,
}

impl StepRecord {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            responses: Vec::new(),
            pose_before: Pose::default(),
            pose_after: Pose::default(),
            elapsed: Duration::ZERO,
            sent_at: None,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScenarioDescription {
    pub name: &'static str,
    pub description: &'static str,
    pub results: &'static [(&'static str, &'static str)],
    pub prerequisites: &'static str,
}

impl fmt::Display for ScenarioDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        for line in self.description.lines() {
            writeln!(f, "  {line}")?;
        }
        writeln!(f, "  results:")?;
        for (field, meaning) in self.results {
            writeln!(f, "    {field}: {meaning}")?;
        }
        write!(f, "  prerequisites: {}", self.prerequisites)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationResult {
    DistancePerRotation {
        expected_distance: f64,
        actual_distances: Vec<f64>,
        deviations: Vec<f64>,
        /// `None` when the robot was not seen moving at all.
        recommended_factor: Option<f64>,
    },
    RotationPerDistance {
        expected_rotation: f64,
        actual_rotations: Vec<f64>,
        deviations: Vec<f64>,
        recommended_factor: Option<f64>,
    },
    Timing {
        elapsed_times: Vec<f64>,
        average_time: f64,
    },
    TimePerDistance {
        times: Vec<f64>,
        distances: Vec<f64>,
        closest_time: f64,
        closest_distance: f64,
    },
}

impl fmt::Display for CalibrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationResult::DistancePerRotation {
                expected_distance,
                actual_distances,
                deviations,
                recommended_factor,
            } => {
                writeln!(f, "expected_distance: {expected_distance}")?;
                writeln!(f, "actual_distances: {actual_distances:?}")?;
                writeln!(f, "deviations: {deviations:?}")?;
                write!(f, "recommended_factor: {}", factor_text(*recommended_factor))
            }
            CalibrationResult::RotationPerDistance {
                expected_rotation,
                actual_rotations,
                deviations,
                recommended_factor,
            } => {
                writeln!(f, "expected_rotation: {expected_rotation}")?;
                writeln!(f, "actual_rotations: {actual_rotations:?}")?;
                writeln!(f, "deviations: {deviations:?}")?;
                write!(f, "recommended_factor: {}", factor_text(*recommended_factor))
            }
            CalibrationResult::Timing {
                elapsed_times,
                average_time,
            } => {
                writeln!(f, "elapsed_times: {elapsed_times:?}")?;
                write!(f, "average_time: {average_time}")
            }
            CalibrationResult::TimePerDistance {
                times,
                distances,
                closest_time,
                closest_distance,
            } => {
                writeln!(f, "times: {times:?}")?;
                writeln!(f, "distances: {distances:?}")?;
                writeln!(f, "closest_time: {closest_time}")?;
                write!(f, "closest_distance: {closest_distance}")
            }
        }
    }
}

fn factor_text(factor: Option<f64>) -> String {
    factor.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// One kind of calibration: its script and how to reduce the measurements.
pub trait Calibration {
    fn description(&self) -> &'static ScenarioDescription;

    /// Commands to run, in order. Called at the start of every run.
    fn steps(&mut self) -> Vec<Command>;

    /// Called after step `index` succeeded. A returned command is appended to
    /// the script.
    fn on_step_done(&mut self, _index: usize, _steps: &[StepRecord]) -> Option<Command> {
        None
    }

    fn finalize(&self, steps: &[StepRecord]) -> CalibrationResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioKind {
    DistancePerRotation,
    RotationPerDistance,
    RotationTime,
    DistanceTime,
    TimePerDistance,
}

impl ScenarioKind {
    /// Calibration with its usual parameters.
    pub fn build(self) -> Box<dyn Calibration> {
        match self {
            ScenarioKind::DistancePerRotation => Box::new(DistancePerRotation::default()),
            ScenarioKind::RotationPerDistance => Box::new(RotationPerDistance::default()),
            ScenarioKind::RotationTime => Box::new(RotationTime::default()),
            ScenarioKind::DistanceTime => Box::new(DistanceTime::default()),
            ScenarioKind::TimePerDistance => Box::new(TimePerDistance::default()),
        }
    }

    pub fn description(self) -> &'static ScenarioDescription {
        self.build().description()
    }
}

pub type FinishCallback = Box<dyn FnMut(&mut Link, &Scenario)>;

struct Inner {
    robot: Robot,
    calibration: Box<dyn Calibration>,
    steps: Vec<StepRecord>,
    current: usize,
    finished: bool,
    success: bool,
    result: Option<CalibrationResult>,
    on_finish: Option<FinishCallback>,
    /// Bumped on every run so answers to an older run are ignored.
    run: u64,
}

/// Runs a calibration on one robot. Clones share the same run.
#[derive(Clone)]
pub struct Scenario {
    inner: Rc<RefCell<Inner>>,
}

enum Next {
    Wait,
    Send(usize),
    Finish(bool),
}

impl Scenario {
    pub fn new(robot: Robot, calibration: Box<dyn Calibration>, on_finish: FinishCallback) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                robot,
                calibration,
                steps: Vec::new(),
                current: 0,
                finished: false,
                success: false,
                result: None,
                on_finish: Some(on_finish),
                run: 0,
            })),
        }
    }

    pub fn robot_id(&self) -> u8 {
        self.inner.borrow().robot.id()
    }

    pub fn description(&self) -> &'static ScenarioDescription {
        self.inner.borrow().calibration.description()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.borrow().finished
    }

    pub fn is_success(&self) -> bool {
        self.inner.borrow().success
    }

    pub fn current_step(&self) -> usize {
        self.inner.borrow().current
    }

    pub fn percent_complete(&self) -> f64 {
        let inner = self.inner.borrow();
        if inner.steps.is_empty() {
            return if inner.finished { 100.0 } else { 0.0 };
        }
        inner.current as f64 / inner.steps.len() as f64 * 100.0
    }

    pub fn result(&self) -> Option<CalibrationResult> {
        self.inner.borrow().result.clone()
    }

    pub fn steps(&self) -> Vec<StepRecord> {
        self.inner.borrow().steps.clone()
    }

    /// Starts (or restarts) the script from its first step.
    pub fn run(&self, link: &mut Link) {
        let run = {
            let mut inner = self.inner.borrow_mut();
            inner.run += 1;
            inner.steps = inner
                .calibration
                .steps()
                .into_iter()
                .map(StepRecord::new)
                .collect();
            inner.current = 0;
            inner.finished = false;
            inner.success = false;
            inner.result = None;
            info!(
                robot = inner.robot.id(),
                scenario = inner.calibration.description().name,
                steps = inner.steps.len(),
                "scenario started"
            );
            inner.run
        };

        if self.inner.borrow().steps.is_empty() {
            self.finish(link, true);
        } else {
            self.send_step(link, run, 0);
        }
    }

    fn send_step(&self, link: &mut Link, run: u64, index: usize) {
        let (robot, command) = {
            let mut inner = self.inner.borrow_mut();
            let robot = inner.robot.clone();
            let step = &mut inner.steps[index];
            step.pose_before = robot.pose();
            step.sent_at = Some(Instant::now());
            (robot, step.command.clone())
        };

        let on_response = self.clone();
        let on_error = self.clone();
        let sent = robot.send_command(
            link,
            command,
            Some(Box::new(move |link, resp| {
                on_response.on_step_response(link, run, index, resp)
            })),
            Some(Box::new(move |link, _mid| {
                on_error.on_step_error(link, run, index)
            })),
            true,
        );
        if let Err(e) = sent {
            warn!(robot = robot.id(), step = index, error = %e, "scenario step could not be sent");
            if self.is_current(run, index) {
                self.finish(link, false);
            }
        }
    }

    fn is_current(&self, run: u64, index: usize) -> bool {
        let inner = self.inner.borrow();
        inner.run == run && !inner.finished && inner.current == index
    }

    fn on_step_response(&self, link: &mut Link, run: u64, index: usize, resp: &Response) {
        if !self.is_current(run, index) {
            return;
        }
        let next = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let pose = inner.robot.pose();
            let step = &mut inner.steps[index];
            step.responses.push(resp.clone());
            match resp.return_code() {
                ReturnCode::ActionStarted => Next::Wait,
                ReturnCode::Success => {
                    step.pose_after = pose;
                    step.elapsed = step.sent_at.map(|t| t.elapsed()).unwrap_or_default();
                    if let Some(extra) = inner.calibration.on_step_done(index, &inner.steps) {
                        inner.steps.push(StepRecord::new(extra));
                    }
                    inner.current += 1;
                    info!(
                        robot = inner.robot.id(),
                        step = index,
                        of = inner.steps.len(),
                        elapsed_ms = inner.steps[index].elapsed.as_millis() as u64,
                        "scenario step done"
                    );
                    if inner.current >= inner.steps.len() {
                        Next::Finish(true)
                    } else {
                        Next::Send(inner.current)
                    }
                }
                code => {
                    warn!(robot = inner.robot.id(), step = index, ?code, "scenario step failed");
                    Next::Finish(false)
                }
            }
        };

        match next {
            Next::Wait => {}
            Next::Send(i) => self.send_step(link, run, i),
            Next::Finish(ok) => self.finish(link, ok),
        }
    }

    fn on_step_error(&self, link: &mut Link, run: u64, index: usize) {
        if self.is_current(run, index) {
            warn!(step = index, "scenario step got no answer");
            self.finish(link, false);
        }
    }

    fn finish(&self, link: &mut Link, success: bool) {
        let cb = {
            let mut inner = self.inner.borrow_mut();
            if success {
                let result = inner.calibration.finalize(&inner.steps);
                inner.result = Some(result);
            }
            inner.finished = true;
            inner.success = success;
            info!(
                robot = inner.robot.id(),
                scenario = inner.calibration.description().name,
                success,
                "scenario finished"
            );
            inner.on_finish.take()
        };
        if let Some(mut cb) = cb {
            cb(link, self);
            let mut inner = self.inner.borrow_mut();
            if inner.on_finish.is_none() {
                inner.on_finish = Some(cb);
            }
        }
    }
}
