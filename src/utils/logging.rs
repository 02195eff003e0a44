//! Conditional logging macros that check a module-level `ENABLE_LOGS` flag,
//! plus the process-wide logger bootstrap and a repeat-suppression helper.
//!
//! Usage:
//! ```ignore
//! // In your module, define the flag first:
//! const ENABLE_LOGS: bool = true;
//!
//! // Then use the macros (they're exported at the crate root):
//! use crate::{log_debug, log_error, log_info, log_warn};
//!
//! log_info!("This will log if ENABLE_LOGS is true");
//! ```

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

/// Macro for conditional info logging.
/// Checks the `ENABLE_LOGS` const in the calling module.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Macro for conditional warn logging.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Macro for conditional error logging.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

/// Debug output is emitted only when the module flag is set *and* debug mode
/// has been switched on at runtime (preference or `ADSKIP_DEBUG`).
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS && $crate::utils::logging::debug_enabled() {
            log::debug!($($arg)*);
        }
    };
}

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);

pub fn set_debug_mode(enabled: bool) {
    DEBUG_MODE.store(enabled, Ordering::Relaxed);
}

pub fn debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

/// Reads `ADSKIP_DEBUG` the same way the engine reads its other env toggles.
pub fn debug_from_env() -> bool {
    std::env::var("ADSKIP_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Installs the `env_logger` backend. Safe to call more than once; later calls
/// are ignored so embedding hosts and tests can both invoke it.
pub fn init_logging() {
    let debug = debug_from_env();
    if debug {
        set_debug_mode(true);
    }

    let default_filter = if debug { "adskip_lib=debug" } else { "adskip_lib=info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();
}

const THROTTLE_MAX_TRACKED: usize = 100;
const THROTTLE_FORGET_AFTER: Duration = Duration::from_secs(60);

/// Suppresses identical log lines that repeat inside a short window.
///
/// Polling loops (skip checks, marker refresh) call into this before logging
/// so a stalled player does not flood the output.
#[derive(Debug)]
pub struct LogThrottle {
    window: Duration,
    last_seen: HashMap<String, Instant>,
}

impl LogThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    pub fn should_log(&mut self, key: &str) -> bool {
        self.should_log_at(key, Instant::now())
    }

    pub(crate) fn should_log_at(&mut self, key: &str, now: Instant) -> bool {
        if let Some(last) = self.last_seen.get(key) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }

        self.last_seen.insert(key.to_string(), now);

        if self.last_seen.len() > THROTTLE_MAX_TRACKED {
            self.last_seen
                .retain(|_, seen| now.saturating_duration_since(*seen) < THROTTLE_FORGET_AFTER);
        }

        true
    }

    pub fn tracked(&self) -> usize {
        self.last_seen.len()
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_inside_window_are_suppressed() {
        let mut throttle = LogThrottle::new(Duration::from_millis(500));
        let start = Instant::now();

        assert!(throttle.should_log_at("skip", start));
        assert!(!throttle.should_log_at("skip", start + Duration::from_millis(200)));
        assert!(throttle.should_log_at("other", start + Duration::from_millis(200)));
        assert!(throttle.should_log_at("skip", start + Duration::from_millis(600)));
    }

    #[test]
    fn stale_keys_are_pruned_once_limit_is_exceeded() {
        let mut throttle = LogThrottle::new(Duration::from_millis(10));
        let start = Instant::now();

        for i in 0..THROTTLE_MAX_TRACKED {
            throttle.should_log_at(&format!("old-{i}"), start);
        }
        assert_eq!(throttle.tracked(), THROTTLE_MAX_TRACKED);

        let later = start + THROTTLE_FORGET_AFTER + Duration::from_secs(1);
        throttle.should_log_at("fresh", later);
        assert_eq!(throttle.tracked(), 1);
    }
}
