//! Host-side sampler types.
//!
//! Provides [`SamplerDesc`] along with the [`FilterMode`] and [`AddressMode`]
//! enums shared between host and device code.

mod types;

pub use types::{AddressMode, FilterMode, SamplerDesc};
