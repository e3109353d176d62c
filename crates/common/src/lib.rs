//! Shared identifiers: profile ids and the host lifecycle events that trigger snapshots.

pub mod types;

pub use types::{LifecycleEvent, ParseEventError, ProfileId};
