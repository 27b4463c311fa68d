//! pixbind - asynchronous image loading with tiered caching.
//!
//! Resolves a remote image URL through memory, disk, and network tiers,
//! and delivers the decoded result to a display target on a dedicated
//! delivery context, discarding stale results when the target has been
//! rebound mid-flight.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing cache, network, and config adapters.
pub mod infrastructure;

/// Current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = "pixbind";
