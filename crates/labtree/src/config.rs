//! Liveness tuning. The heartbeat ticks every `TIMER_INTERVAL`; an
//! experiment counts as active while the last heartbeat is younger than
//! the interval plus a platform-dependent buffer (hosted notebooks schedule
//! background threads with considerable lag).

use std::time::Duration;

use crate::platform;

pub const TIMER_INTERVAL: Duration = Duration::from_secs(2);
pub const ACTIVE_BUFFER: Duration = Duration::from_secs(5);
pub const ACTIVE_BUFFER_HOSTED: Duration = Duration::from_secs(60);

/// Maximum heartbeat age for an experiment to still count as ACTIVE.
pub fn active_threshold() -> Duration {
    let buffer = if platform::is_hosted_notebook() {
        ACTIVE_BUFFER_HOSTED
    } else {
        ACTIVE_BUFFER
    };
    TIMER_INTERVAL + buffer
}
