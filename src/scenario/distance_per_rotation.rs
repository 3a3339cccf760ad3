use super::{Calibration, CalibrationResult, ScenarioDescription, StepRecord, mean, round2};
use crate::proto::factory::action;
use crate::proto::{Command, MoveDirection};

static DESCRIPTION: ScenarioDescription = ScenarioDescription {
    name: "distance-per-rotation",
    description: "Tunes the 'motor_rotation_degrees_per_mm_distance' setting, which decides how far\n\
                  (in mm) the robot moves for each degree both wheels turn.\n\
                  Moves the robot forward and back by a fixed distance and measures the outcome with the camera.",
    results: &[
        ("expected_distance", "Distance the robot was asked to move"),
        ("actual_distances", "Distances measured for each move"),
        ("deviations", "Measured minus expected distance, per move"),
        (
            "recommended_factor",
            "Factor to adjust 'motor_rotation_degrees_per_mm_distance' by",
        ),
    ],
    prerequisites: "Motor settings such as steps_per_degree are already correct.",
};

#[derive(Debug, Clone)]
pub struct DistancePerRotation {
    pub distance: u16,
}

impl Default for DistancePerRotation {
    fn default() -> Self {
        Self { distance: 100 }
    }
}

impl Calibration for DistancePerRotation {
    fn description(&self) -> &'static ScenarioDescription {
        &DESCRIPTION
    }

    fn steps(&mut self) -> Vec<Command> {
        vec![
            action::start_move_mm(self.distance, Some(MoveDirection::Forward)),
            action::start_move_mm(self.distance, Some(MoveDirection::Backward)),
        ]
    }

    fn finalize(&self, steps: &[StepRecord]) -> CalibrationResult {
        let expected = f64::from(self.distance);
        let actual: Vec<f64> = steps
            .iter()
            .map(|s| (s.pose_after - s.pose_before).distance())
            .collect();
        CalibrationResult::DistancePerRotation {
            expected_distance: expected,
            actual_distances: actual.iter().copied().map(round2).collect(),
            deviations: actual.iter().map(|d| round2(d - expected)).collect(),
            recommended_factor: mean(&actual)
                .filter(|avg| *avg > 0.0)
                .map(|avg| round2(expected / avg)),
        }
    }
}
