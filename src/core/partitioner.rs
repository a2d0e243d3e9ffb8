//! Visual partitioning.
//!
//! Decides how many still images cover a segment and how long the last one is
//! held. Every image but the last is shown for the ideal duration; a short
//! remainder is folded into the last image instead of getting its own.

use crate::domain::{ImagePlan, SegmentTiming, TimelineSettings};

/// Plan images for one segment.
pub fn plan(segment_duration: f64, ideal_duration: f64, min_acceptable_duration: f64) -> ImagePlan {
    let single = ImagePlan {
        image_count: 1,
        last_image_duration: segment_duration,
        ideal_duration,
    };

    if !segment_duration.is_finite() || !(ideal_duration > 0.0) || segment_duration <= ideal_duration {
        return single;
    }

    let excess = segment_duration % ideal_duration;
    let full = ((segment_duration - excess) / ideal_duration).round() as usize;

    if excess > min_acceptable_duration {
        ImagePlan {
            image_count: full + 1,
            last_image_duration: excess,
            ideal_duration,
        }
    } else {
        ImagePlan {
            image_count: full,
            last_image_duration: ideal_duration + excess,
            ideal_duration,
        }
    }
}

/// Plan every aligned segment with the run's timeline settings.
pub fn plan_all(timings: &[SegmentTiming], settings: &TimelineSettings) -> Vec<ImagePlan> {
    timings
        .iter()
        .map(|t| {
            plan(
                t.duration,
                settings.ideal_image_duration,
                settings.min_image_duration,
            )
        })
        .collect()
}
