//! Retry and timeout policy for link authentication.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds on retries and waits.
///
/// Timeouts are expressed as poll counts; only the per-poll delays are wall
/// clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthPolicy {
    /// Whole-link attempts before giving up.
    pub max_attempts: u32,
    /// Locality check rounds per attempt.
    pub max_lc_attempts: u32,
    /// Initial wait before polling for H'.
    pub h_prime_initial_delay: Duration,
    pub h_prime_polls: u32,
    /// Initial wait before polling for pairing info.
    pub pairing_initial_delay: Duration,
    pub pairing_polls: u32,
    /// Receiver-ID list readiness polls.
    pub list_ready_polls: u32,
    pub poll_interval: Duration,
    pub ake_init_delay: Duration,
    pub lc_delay: Duration,
    pub stream_ready_delay: Duration,
    pub max_streams: usize,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_lc_attempts: 10,
            h_prime_initial_delay: Duration::from_millis(100),
            h_prime_polls: 10,
            pairing_initial_delay: Duration::from_millis(200),
            pairing_polls: 2,
            list_ready_polls: 30,
            poll_interval: Duration::from_millis(100),
            ake_init_delay: Duration::from_millis(100),
            lc_delay: Duration::from_millis(7),
            stream_ready_delay: Duration::from_millis(200),
            max_streams: 16,
        }
    }
}

impl AuthPolicy {
    /// Same retry bounds with every delay set to zero.
    pub fn without_delays(self) -> Self {
        Self {
            h_prime_initial_delay: Duration::ZERO,
            pairing_initial_delay: Duration::ZERO,
            poll_interval: Duration::ZERO,
            ake_init_delay: Duration::ZERO,
            lc_delay: Duration::ZERO,
            stream_ready_delay: Duration::ZERO,
            ..self
        }
    }
}
