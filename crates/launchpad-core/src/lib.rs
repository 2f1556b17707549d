//! launchpad-core — shared types, configuration, and artifact access.
//!
//! Everything here is consumed by the other Launchpad crates: the model
//! artifact and threshold policy types, the `launchpad.toml` parser, and
//! the read-only artifact registry with checksum verification.

pub mod artifact;
pub mod config;
pub mod types;

pub use artifact::{
    ArtifactRegistry, FsArtifactRegistry, MemoryArtifactRegistry, RegistryError, fetch_verified,
    sha256_hex,
};
pub use config::LaunchpadConfig;
pub use types::*;
