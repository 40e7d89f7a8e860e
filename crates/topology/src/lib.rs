//! Tablet identity types for the tablet server
//!
//! This crate provides:
//! - Tablet role types (`TabletType`)
//! - Tablet identity (`TabletAlias`)
//! - Request targets (`Target`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alias;
pub mod tablet_type;
pub mod target;

pub use alias::TabletAlias;
pub use tablet_type::TabletType;
pub use target::Target;
