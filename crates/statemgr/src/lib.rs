//! The tablet state manager.
//!
//! Drives a tablet between its serving roles (primary, replica, rdonly,
//! backup, restore, …) and serving states (not connected, not serving,
//! serving), orchestrating the open/close lifecycle of the tablet's
//! subsystems in a strictly defined order. The state manager is the only
//! component allowed to mutate the tablet's lifecycle: request admission,
//! health broadcasting, and failure retries all flow through it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod health;
pub mod manager;
mod orchestrator;
pub mod types;

pub use {
    config::StateManagerConfig,
    error::{StateError, StateResult},
    health::{HealthStreamer, RealtimeStats, StreamHealthEvent},
    manager::{StateManager, Subsystems},
    types::{RequestContext, ServingState, StateManagerStatus},
};
