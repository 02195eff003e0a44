use crate::{models::AdSegment, store::DEFAULT_SKIP_PERCENTAGE};

/// Shortest trigger window, in seconds, unless the segment itself is shorter.
pub const MIN_TRIGGER_SECS: f64 = 1.0;

/// The leading part of `segment` in which the playhead triggers a skip:
/// `percentage` of the segment, at least [`MIN_TRIGGER_SECS`], never past
/// the segment end. Percentages above 100 count as 100; NaN falls back to
/// the default.
pub fn trigger_window(segment: &AdSegment, percentage: f64) -> (f64, f64) {
    let percentage = if percentage.is_nan() {
        DEFAULT_SKIP_PERCENTAGE
    } else {
        percentage.clamp(0.0, 100.0)
    };
    let width = (segment.duration() * percentage / 100.0).max(MIN_TRIGGER_SECS);
    (segment.start, (segment.start + width).min(segment.end))
}

/// First segment, in list order, whose trigger window holds `position`.
pub fn find_trigger(segments: &[AdSegment], position: f64, percentage: f64) -> Option<&AdSegment> {
    segments.iter().find(|segment| {
        let (start, end) = trigger_window(segment, percentage);
        position >= start && position < end
    })
}

/// A click on a segment's marker jumps past it only while the playhead is
/// inside the segment and the click does not point backwards.
pub fn marker_click_target(segment: &AdSegment, position: f64, clicked_at: f64) -> Option<f64> {
    if segment.contains(position) && clicked_at >= position {
        Some(segment.end)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64) -> AdSegment {
        AdSegment::new(start, end).unwrap()
    }

    #[test]
    fn window_is_a_percentage_of_the_segment() {
        assert_eq!(trigger_window(&seg(100.0, 300.0), 5.0), (100.0, 110.0));
        assert_eq!(trigger_window(&seg(100.0, 300.0), 50.0), (100.0, 200.0));
    }

    #[test]
    fn window_is_at_least_one_second_but_never_past_the_end() {
        assert_eq!(trigger_window(&seg(10.0, 20.0), 1.0), (10.0, 11.0));
        assert_eq!(trigger_window(&seg(10.0, 10.5), 5.0), (10.0, 10.5));
        assert_eq!(trigger_window(&seg(10.0, 20.0), 100.0), (10.0, 20.0));
    }

    #[test]
    fn fractional_percentages_follow_the_formula() {
        assert_eq!(trigger_window(&seg(0.0, 400.0), 0.5), (0.0, 2.0));
        assert_eq!(trigger_window(&seg(0.0, 400.0), 0.1), (0.0, 1.0));
        assert_eq!(trigger_window(&seg(0.0, 400.0), f64::INFINITY), (0.0, 400.0));
        assert_eq!(trigger_window(&seg(0.0, 400.0), f64::NEG_INFINITY), (0.0, 1.0));
        assert_eq!(trigger_window(&seg(0.0, 400.0), f64::NAN), (0.0, 20.0));
    }

    #[test]
    fn window_width_stays_within_bounds_for_any_percentage() {
        let segment = seg(42.0, 142.0);
        for pct in [0.0, 0.5, 1.0, 5.0, 33.3, 99.0, 100.0, 250.0, -3.0, f64::NAN, f64::INFINITY] {
            let (start, end) = trigger_window(&segment, pct);
            assert_eq!(start, segment.start);
            assert!(end - start >= MIN_TRIGGER_SECS, "pct {pct}");
            assert!(end <= segment.end, "pct {pct}");
        }
    }

    #[test]
    fn only_the_leading_window_triggers() {
        let segments = [seg(100.0, 300.0)];
        assert!(find_trigger(&segments, 99.9, 5.0).is_none());
        assert!(find_trigger(&segments, 100.0, 5.0).is_some());
        assert!(find_trigger(&segments, 109.9, 5.0).is_some());
        assert!(find_trigger(&segments, 110.0, 5.0).is_none());
        assert!(find_trigger(&segments, 200.0, 5.0).is_none());
    }

    #[test]
    fn overlapping_windows_resolve_in_list_order() {
        let first = seg(10.0, 30.0);
        let second = seg(12.0, 40.0);
        let segments = [first, second];
        assert_eq!(find_trigger(&segments, 12.5, 50.0), Some(&first));
    }

    #[test]
    fn marker_click_requires_playhead_inside_and_forward_click() {
        let segment = seg(10.0, 20.0);
        assert_eq!(marker_click_target(&segment, 15.0, 16.0), Some(20.0));
        assert_eq!(marker_click_target(&segment, 15.0, 12.0), None);
        assert_eq!(marker_click_target(&segment, 5.0, 12.0), None);
    }
}
