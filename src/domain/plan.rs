//! Image plans and motion effects for segment visuals.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How many images a segment gets and how long they last
///
/// All images but the last run for `ideal_duration`; the last one runs for
/// `last_image_duration`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImagePlan {
    pub image_count: usize,
    pub last_image_duration: f64,
    pub ideal_duration: f64,
}

impl ImagePlan {
    /// Per-image durations, in display order
    pub fn durations(&self) -> Vec<f64> {
        let mut durations = vec![self.ideal_duration; self.image_count.saturating_sub(1)];
        durations.push(self.last_image_duration);
        durations
    }

    /// Total on-screen time covered by the plan
    pub fn total_duration(&self) -> f64 {
        self.image_count.saturating_sub(1) as f64 * self.ideal_duration + self.last_image_duration
    }
}

/// Camera motion applied to a still image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Motion {
    ZoomIn,
    ZoomOut,
    PanLeft,
    PanRight,
    KenBurns,
}

impl Motion {
    /// Default alternating pattern
    pub fn default_pattern() -> Vec<Motion> {
        vec![Motion::ZoomIn, Motion::ZoomOut]
    }

    /// `count` motions taken cyclically from `pattern`, starting at `start`
    pub fn cycle(pattern: &[Motion], start: usize, count: usize) -> Vec<Motion> {
        if pattern.is_empty() {
            return vec![Motion::ZoomIn; count];
        }
        (0..count)
            .map(|offset| pattern[(start + offset) % pattern.len()])
            .collect()
    }
}

impl fmt::Display for Motion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Motion::ZoomIn => "zoom_in",
            Motion::ZoomOut => "zoom_out",
            Motion::PanLeft => "pan_left",
            Motion::PanRight => "pan_right",
            Motion::KenBurns => "ken_burns",
        };
        f.write_str(name)
    }
}
