//! The media element the engine drives, seen through a narrow trait.

use std::sync::atomic::{AtomicBool, Ordering};

/// Host-provided view of the playing media.
///
/// Implementations must be cheap to query; the skip loop polls them every
/// few hundred milliseconds.
pub trait PlaybackSurface: Send + Sync {
    fn current_time(&self) -> f64;
    /// `None` until the media has loaded its metadata.
    fn duration(&self) -> Option<f64>;
    fn is_paused(&self) -> bool;
    fn is_ended(&self) -> bool;
    fn seek(&self, position: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Engine,
    User,
}

/// Tells the host's "seeking" notifications apart: the first seek observed
/// after the engine moved the playhead is the engine's own.
#[derive(Debug, Default)]
pub struct SeekTracker {
    engine_seek_pending: AtomicBool,
}

impl SeekTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_engine_seek(&self) {
        self.engine_seek_pending.store(true, Ordering::SeqCst);
    }

    pub fn classify(&self) -> SeekOrigin {
        if self.engine_seek_pending.swap(false, Ordering::SeqCst) {
            SeekOrigin::Engine
        } else {
            SeekOrigin::User
        }
    }
}
