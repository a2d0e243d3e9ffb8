//! Visual Partitioner Integration Tests
//!
//! Image counts and last-image durations for segment lengths around the
//! ideal and minimum durations.

use reelsmith::core::partitioner::{plan, plan_all};
use reelsmith::domain::{SegmentTiming, TimelineSettings};

fn assert_plan(duration: f64, ideal: f64, min: f64, count: usize, last: f64) {
    let p = plan(duration, ideal, min);
    assert_eq!(
        p.image_count, count,
        "image count for {}s (ideal {}, min {})",
        duration, ideal, min
    );
    assert!(
        (p.last_image_duration - last).abs() < 1e-9,
        "last image for {}s: expected {}, got {}",
        duration,
        last,
        p.last_image_duration
    );
    assert_eq!(p.ideal_duration, ideal);
}

#[test]
fn test_remainder_below_minimum_is_folded() {
    // 10 = 4 + 4 + 2; 2 is not above the minimum of 3
    assert_plan(10.0, 4.0, 3.0, 2, 6.0);
}

#[test]
fn test_remainder_equal_to_minimum_is_folded() {
    // 11 = 4 + 4 + 3; equal to the minimum still folds
    assert_plan(11.0, 4.0, 3.0, 2, 7.0);
}

#[test]
fn test_small_remainder_with_three_full_images() {
    assert_plan(13.0, 4.0, 3.0, 3, 5.0);
}

#[test]
fn test_remainder_above_minimum_gets_own_image() {
    // 15 = 4 + 4 + 4 + 3; 3 is above the minimum of 2
    assert_plan(15.0, 4.0, 2.0, 4, 3.0);
}

#[test]
fn test_segment_not_longer_than_ideal() {
    assert_plan(3.0, 3.0, 2.0, 1, 3.0);
    assert_plan(0.4, 3.0, 2.0, 1, 0.4);
}

#[test]
fn test_plans_cover_segment_exactly() {
    let mut duration = 0.25;
    while duration < 40.0 {
        let p = plan(duration, 3.0, 2.0);

        assert!(p.image_count >= 1);
        assert!(
            (p.total_duration() - duration).abs() < 1e-6,
            "{}s planned as {}s",
            duration,
            p.total_duration()
        );
        assert_eq!(p.durations().len(), p.image_count);
        if p.image_count > 1 {
            // A held last image is never shorter than the minimum
            assert!(p.last_image_duration > 2.0 - 1e-9, "{}s -> {:?}", duration, p);
        }

        duration += 0.25;
    }
}

#[test]
fn test_plan_is_deterministic() {
    let timings = vec![
        SegmentTiming::new(0.0, 5.8),
        SegmentTiming::new(5.8, 12.8),
        SegmentTiming::new(12.8, 14.1),
    ];
    let settings = TimelineSettings::default();

    let first = plan_all(&timings, &settings);
    let second = plan_all(&timings, &settings);

    assert_eq!(first, second);
    assert_eq!(
        first.iter().map(|p| p.image_count).collect::<Vec<_>>(),
        vec![2, 2, 1]
    );
}

#[test]
fn test_non_finite_duration_still_gets_one_image() {
    for duration in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let p = plan(duration, 3.0, 2.0);
        assert_eq!(p.image_count, 1, "{}s", duration);
        assert_eq!(p.durations().len(), 1);
    }
}
