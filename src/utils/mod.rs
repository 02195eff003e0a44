pub mod logging;

pub use logging::{init_logging, LogThrottle};
