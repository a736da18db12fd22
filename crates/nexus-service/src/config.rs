//! Request-level timeouts and admission control for `MemoryService` (§4.5, §5).

use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    /// High-water mark on concurrent writes in flight; crossing it rejects
    /// new writes with `Overloaded` before they touch the backend (§5
    /// "Backpressure").
    pub max_in_flight_writes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(10),
            max_in_flight_writes: 256,
        }
    }
}

impl ServiceConfig {
    /// Reads `CORE_NEXUS_WRITE_TIMEOUT_SECS`, `CORE_NEXUS_READ_TIMEOUT_SECS`,
    /// `CORE_NEXUS_MAX_IN_FLIGHT_WRITES`; unset or unparsable falls back to
    /// the documented default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            write_timeout: env::var("CORE_NEXUS_WRITE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.write_timeout),
            read_timeout: env::var("CORE_NEXUS_READ_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.read_timeout),
            max_in_flight_writes: env::var("CORE_NEXUS_MAX_IN_FLIGHT_WRITES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_in_flight_writes),
        }
    }
}
