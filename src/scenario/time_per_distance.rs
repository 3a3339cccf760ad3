use super::{Calibration, CalibrationResult, ScenarioDescription, StepRecord, round2};
use crate::proto::factory::action;
use crate::proto::{Command, MoveDirection};

static DESCRIPTION: ScenarioDescription = ScenarioDescription {
    name: "time-per-distance",
    description: "Searches for the distance the robot covers in a target time.\n\
                  After each move the distance is scaled by target/elapsed and the robot moves back the\n\
                  other way, until the time is within the requested precision or the tries run out.",
    results: &[
        ("times", "Seconds each move took"),
        ("distances", "Distance requested for each move"),
        ("closest_time", "Elapsed time of the move closest to the target"),
        ("closest_distance", "Distance of the move closest to the target"),
    ],
    prerequisites: "Motor settings are correct and the robot moves the requested distance.",
};

/// Adaptive search; the script grows while the timing is off.
#[derive(Debug, Clone)]
pub struct TimePerDistance {
    pub start_distance: u16,
    /// Target seconds per move.
    pub time_goal: f64,
    /// Accepted relative error of the time factor.
    pub precision: f64,
    pub max_tries: usize,
    distance: f64,
    distances: Vec<f64>,
    direction: MoveDirection,
}

impl TimePerDistance {
    pub fn new(start_distance: u16, time_goal: f64, precision: f64, max_tries: usize) -> Self {
        Self {
            start_distance,
            time_goal,
            precision,
            max_tries,
            distance: f64::from(start_distance),
            distances: Vec::new(),
            direction: MoveDirection::Forward,
        }
    }

    fn time_factor(&self, step: &StepRecord) -> Option<f64> {
        let elapsed = step.elapsed_secs();
        (elapsed > 0.0).then(|| self.time_goal / elapsed)
    }
}

impl Default for TimePerDistance {
    fn default() -> Self {
        Self::new(100, 2.0, 0.01, 10)
    }
}

impl Calibration for TimePerDistance {
    fn description(&self) -> &'static ScenarioDescription {
        &DESCRIPTION
    }

    fn steps(&mut self) -> Vec<Command> {
        self.distance = f64::from(self.start_distance);
        self.distances = vec![self.distance];
        self.direction = MoveDirection::Forward;
        vec![action::start_move_mm(self.start_distance, Some(self.direction))]
    }

    fn on_step_done(&mut self, index: usize, steps: &[StepRecord]) -> Option<Command> {
        let factor = self.time_factor(steps.get(index)?)?;
        if (1.0 - factor).abs() <= self.precision || steps.len() >= self.max_tries {
            return None;
        }
        self.distance = (self.distance * factor).clamp(1.0, f64::from(u16::MAX));
        self.direction = self.direction.reversed();
        self.distances.push(self.distance);
        Some(action::start_move_mm(
            self.distance as u16,
            Some(self.direction),
        ))
    }

    fn finalize(&self, steps: &[StepRecord]) -> CalibrationResult {
        let closest = steps
            .iter()
            .enumerate()
            .filter_map(|(i, s)| self.time_factor(s).map(|f| (i, (1.0 - f).abs())))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(0, |(i, _)| i);

        CalibrationResult::TimePerDistance {
            times: steps.iter().map(|s| round2(s.elapsed_secs())).collect(),
            distances: self.distances.iter().copied().map(round2).collect(),
            closest_time: steps.get(closest).map_or(0.0, |s| round2(s.elapsed_secs())),
            closest_distance: self.distances.get(closest).copied().map_or(0.0, round2),
        }
    }
}
