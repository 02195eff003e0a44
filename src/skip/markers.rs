use serde::Serialize;

use crate::{models::AdSegment, share::format_range};

use super::window::trigger_window;

/// Position of one segment on the progress bar, in percent of the duration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdMarker {
    pub segment: AdSegment,
    pub left_percent: f64,
    pub width_percent: f64,
    /// Share of the marker covered by the trigger window.
    pub trigger_percent: f64,
    pub label: String,
}

/// Host-side renderer for progress-bar markers.
pub trait MarkerSink: Send + Sync {
    fn render(&self, markers: &[AdMarker]);
    fn clear(&self);
}

pub fn layout_markers(segments: &[AdSegment], duration: f64, percentage: f64) -> Vec<AdMarker> {
    if !(duration.is_finite() && duration > 0.0) {
        return Vec::new();
    }

    segments
        .iter()
        .filter(|segment| segment.start < duration)
        .map(|segment| {
            let end = segment.end.min(duration);
            let (window_start, window_end) = trigger_window(segment, percentage);
            let width = end - segment.start;
            AdMarker {
                segment: *segment,
                left_percent: segment.start / duration * 100.0,
                width_percent: width / duration * 100.0,
                trigger_percent: ((window_end.min(end) - window_start) / width * 100.0).min(100.0),
                label: format_range(segment),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_laid_out_relative_to_duration() {
        let segments = [AdSegment::new(60.0, 120.0).unwrap()];
        let markers = layout_markers(&segments, 600.0, 50.0);

        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].left_percent, 10.0);
        assert_eq!(markers[0].width_percent, 10.0);
        assert_eq!(markers[0].trigger_percent, 50.0);
        assert_eq!(markers[0].label, "1:00-2:00");
    }

    #[test]
    fn nothing_is_laid_out_without_a_duration() {
        let segments = [AdSegment::new(60.0, 120.0).unwrap()];
        assert!(layout_markers(&segments, 0.0, 5.0).is_empty());
        assert!(layout_markers(&segments, f64::NAN, 5.0).is_empty());
        assert!(layout_markers(&segments, 30.0, 5.0).is_empty());
    }
}
