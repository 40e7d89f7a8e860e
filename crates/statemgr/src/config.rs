//! State manager configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the state manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateManagerConfig {
    /// How long to wait between reattempts of a failed transition.
    pub transition_retry_interval: Duration,

    /// How long requests for the previous tablet type stay admitted after a
    /// role change. Zero disables the grace window.
    pub transition_grace_period: Duration,

    /// Hard bound on waiting for in-flight requests to drain before a
    /// transition proceeds anyway.
    pub timebomb_duration: Duration,

    /// Replication lag above which the tablet reports itself unhealthy.
    pub unhealthy_threshold: Duration,

    /// Interval of the periodic health broadcast. Zero disables the ticker.
    pub health_check_interval: Duration,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            transition_retry_interval: Duration::from_secs(1),
            transition_grace_period: Duration::ZERO,
            timebomb_duration: Duration::from_secs(30),
            unhealthy_threshold: Duration::from_secs(2 * 60 * 60),
            health_check_interval: Duration::from_secs(20),
        }
    }
}
