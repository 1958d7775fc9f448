mod logger;
pub mod time_utils;

pub use logger::{LoggerManager, LOG_TARGETS};
pub use time_utils::{Clock, ManualClock, SharedClock, SystemClock};
