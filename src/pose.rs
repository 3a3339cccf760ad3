use std::fmt;
use std::ops::Sub;

/// Position in millimetres plus heading in degrees, as reported by vision.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub angle: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, angle: f64) -> Self {
        Self { x, y, angle }
    }

    /// Euclidean length of the position part.
    pub fn distance(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

impl Sub for Pose {
    type Output = Pose;

    fn sub(self, other: Pose) -> Pose {
        Pose {
            x: self.x - other.x,
            y: self.y - other.y,
            angle: self.angle - other.angle,
        }
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}) @ {:.1}°", self.x, self.y, self.angle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difference_and_length() {
        let d = Pose::new(103.0, 54.0, 90.0) - Pose::new(100.0, 50.0, 45.0);
        assert_eq!(d, Pose::new(3.0, 4.0, 45.0));
        assert!((d.distance() - 5.0).abs() < 1e-9);
    }
}
