//! Observable state types

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use tabletd_topology::{TabletType, Target};

/// The serving state of the tablet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServingState {
    /// Not connected to the database; every subsystem is closed.
    NotConnected,
    /// Connected to the database but rejecting requests.
    NotServing,
    /// Connected and admitting requests.
    Serving,
}

impl ServingState {
    /// The canonical display name of this state.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::NotServing => "NOT_SERVING",
            Self::Serving => "SERVING",
        }
    }
}

impl std::fmt::Display for ServingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Caller-side context for a request: whether it originates from inside the
/// tablet server itself. Local requests may omit their target.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext {
    local: bool,
}

impl RequestContext {
    /// A context for an external request.
    #[must_use]
    pub fn external() -> Self {
        Self { local: false }
    }

    /// A context for a request issued by the tablet server itself.
    #[must_use]
    pub fn local() -> Self {
        Self { local: true }
    }

    /// Whether this request originates from inside the tablet server.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.local
    }
}

/// A point-in-time snapshot of everything the state manager observes about
/// itself.
#[derive(Debug, Clone)]
pub struct StateManagerStatus {
    /// The identity the tablet currently serves under.
    pub target: Target,

    /// The current serving state.
    pub state: ServingState,

    /// The most recently requested tablet type.
    pub want_tablet_type: TabletType,

    /// The most recently requested serving state.
    pub want_state: ServingState,

    /// Extra tablet types admitted during a post-role-change grace window.
    pub also_allow: Vec<TabletType>,

    /// The externally-reparented timestamp of the last accepted request.
    pub ter_timestamp: SystemTime,

    /// The reason supplied with the last accepted transition request.
    pub reason: String,

    /// Whether the tablet is soft-unserving to drain upstream traffic.
    pub lameduck: bool,

    /// Whether replication is healthy enough to serve.
    pub repl_healthy: bool,

    /// Whether a retry loop is driving toward the desired state.
    pub retrying: bool,

    /// Whether a transition is in flight.
    pub transitioning: bool,

    /// The error of the last failed transition, if any.
    pub transition_error: Option<String>,
}
