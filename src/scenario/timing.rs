// Average duration of a repeated action, used to build the path graph of the
// warehouse simulation.

use super::{Calibration, CalibrationResult, ScenarioDescription, StepRecord, mean, round2};
use crate::proto::factory::action;
use crate::proto::{Command, MoveDirection, RotateDirection};

const REPEATS: usize = 4;

static ROTATION_DESCRIPTION: ScenarioDescription = ScenarioDescription {
    name: "rotation-time",
    description: "Measures how long the robot takes for one turn.\n\
                  Turns four times and reports the average elapsed time.",
    results: &[
        ("elapsed_times", "Seconds each turn took"),
        ("average_time", "Average seconds per turn"),
    ],
    prerequisites: "Motor settings are correct and the robot turns the requested angle.",
};

static DISTANCE_DESCRIPTION: ScenarioDescription = ScenarioDescription {
    name: "distance-time",
    description: "Measures how long the robot takes to move a fixed distance.\n\
                  Moves forward and back twice and reports the average elapsed time.",
    results: &[
        ("elapsed_times", "Seconds each move took"),
        ("average_time", "Average seconds per move"),
    ],
    prerequisites: "Motor settings are correct and the robot moves the requested distance.",
};

fn timing_result(steps: &[StepRecord]) -> CalibrationResult {
    let times: Vec<f64> = steps.iter().map(|s| round2(s.elapsed_secs())).collect();
    CalibrationResult::Timing {
        average_time: round2(mean(&times).unwrap_or(0.0)),
        elapsed_times: times,
    }
}

#[derive(Debug, Clone)]
pub struct RotationTime {
    pub rotation: u16,
}

impl Default for RotationTime {
    fn default() -> Self {
        Self { rotation: 90 }
    }
}

impl Calibration for RotationTime {
    fn description(&self) -> &'static ScenarioDescription {
        &ROTATION_DESCRIPTION
    }

    fn steps(&mut self) -> Vec<Command> {
        (0..REPEATS)
            .map(|_| action::start_rotate_degrees(self.rotation, RotateDirection::Clockwise))
            .collect()
    }

    fn finalize(&self, steps: &[StepRecord]) -> CalibrationResult {
        timing_result(steps)
    }
}

#[derive(Debug, Clone)]
pub struct DistanceTime {
    pub distance: u16,
}

impl Default for DistanceTime {
    fn default() -> Self {
        Self { distance: 100 }
    }
}

impl Calibration for DistanceTime {
    fn description(&self) -> &'static ScenarioDescription {
        &DISTANCE_DESCRIPTION
    }

    fn steps(&mut self) -> Vec<Command> {
        let mut dir = MoveDirection::Forward;
        (0..REPEATS)
            .map(|_| {
                let cmd = action::start_move_mm(self.distance, Some(dir));
                dir = dir.reversed();
                cmd
            })
            .collect()
    }

    fn finalize(&self, steps: &[StepRecord]) -> CalibrationResult {
        timing_result(steps)
    }
}
