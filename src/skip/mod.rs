mod markers;
mod scheduler;
mod window;

pub use markers::{layout_markers, AdMarker, MarkerSink};
pub use scheduler::{check_and_skip, SkipScheduler, SkipSettings};
pub use window::{find_trigger, marker_click_target, trigger_window, MIN_TRIGGER_SECS};
