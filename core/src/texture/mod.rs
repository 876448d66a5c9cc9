//! Host-side texture types.
//!
//! Provides [`HostImage`] for decoded pixel data, [`HostTexture`] pairing an
//! image with a sampler, and the built-in [`DefaultTexture`] fallbacks.

mod types;

pub use types::{DefaultTexture, HostImage, HostTexture};
