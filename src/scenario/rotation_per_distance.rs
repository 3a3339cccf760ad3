use super::{Calibration, CalibrationResult, ScenarioDescription, StepRecord, mean, round2};
use crate::proto::factory::action;
use crate::proto::{Command, RotateDirection};

const TURNS: usize = 4;

static DESCRIPTION: ScenarioDescription = ScenarioDescription {
    name: "rotation-per-distance",
    description: "Tunes the 'mm_distance_per_robot_rotation_degree' setting, which decides how far\n\
                  each wheel travels for one degree of robot rotation.\n\
                  Turns the robot clockwise four times and measures each heading change with the camera.",
    results: &[
        ("expected_rotation", "Degrees the robot was asked to turn"),
        ("actual_rotations", "Heading change measured for each turn"),
        ("deviations", "Measured minus expected rotation, per turn"),
        (
            "recommended_factor",
            "Factor to adjust 'mm_distance_per_robot_rotation_degree' by",
        ),
    ],
    prerequisites: "Motor settings such as steps_per_degree are already correct.",
};

#[derive(Debug, Clone)]
pub struct RotationPerDistance {
    pub rotation: u16,
}

impl Default for RotationPerDistance {
    fn default() -> Self {
        Self { rotation: 90 }
    }
}

/// Heading change, counting a pass through 0° as continuing past 360°.
fn heading_change(before: f64, after: f64) -> f64 {
    if after < before {
        after + 360.0 - before
    } else {
        after - before
    }
}

impl Calibration for RotationPerDistance {
    fn description(&self) -> &'static ScenarioDescription {
        &DESCRIPTION
    }

    fn steps(&mut self) -> Vec<Command> {
        (0..TURNS)
            .map(|_| action::start_rotate_degrees(self.rotation, RotateDirection::Clockwise))
            .collect()
    }

    fn finalize(&self, steps: &[StepRecord]) -> CalibrationResult {
        let expected = f64::from(self.rotation);
        let actual: Vec<f64> = steps
            .iter()
            .map(|s| round2(heading_change(s.pose_before.angle, s.pose_after.angle)))
            .collect();
        CalibrationResult::RotationPerDistance {
            expected_rotation: expected,
            deviations: actual.iter().map(|a| round2(a - expected)).collect(),
            recommended_factor: mean(&actual)
                .filter(|avg| *avg > 0.0)
                .map(|avg| round2(expected / avg)),
            actual_rotations: actual,
        }
    }
}
