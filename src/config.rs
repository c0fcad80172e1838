//! Tunable timing parameters (spec.md §5).
//!
//! The Python source hardcodes these (`30` s presence timeout in
//! `ui.py`/`cbor.py`, `50` ms keepalive in `ctaphid.py`, `10` s reset
//! window in `cbor.py`). Collected into one struct here the way the
//! teacher collects its own runtime options, so tests can shrink them
//! instead of waiting on real timers.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// How long `authenticatorReset` waits for user presence.
    pub reset_presence_timeout: Duration,
    /// How long after boot `authenticatorReset` is still permitted.
    pub reset_uptime_window: Duration,
    /// Interval between `CTAPHID_KEEPALIVE` frames while a CBOR handler
    /// is in flight.
    pub keepalive_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reset_presence_timeout: Duration::from_secs(30),
            reset_uptime_window: Duration::from_secs(10),
            keepalive_interval: Duration::from_millis(50),
        }
    }
}
