//! Profile side of the backup service: the profile document, the registry that
//! indexes profiles by key, and the serializer used to capture them.
//!
//! # Invariants
//! - A registry key must equal the embedded `info.id` of the profile it indexes.
//!   Drifted keys are tolerated on load and fixed by the persist crate's repair pass.
//! - Profiles are stored on disk as `<profile_dir>/<key>.json`.

pub mod profile;
pub mod registry;
pub mod serializer;

pub use profile::{Profile, ProfileInfo};
pub use registry::{FileProfileRegistry, PROFILE_EXTENSION, ProfileRegistry, RegistryError};
pub use serializer::{JsonProfileSerializer, ProfileSerializer, SerializeError};
