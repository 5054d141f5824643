//! Active-credential caching and rotation.

pub mod cache;
pub mod rotation;

pub use cache::{ActiveCredentialCache, CredentialSource};
pub use rotation::RotationEngine;
