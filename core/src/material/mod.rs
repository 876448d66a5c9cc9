//! Material models, pipeline state, and the GPU material block.
//!
//! - [`MaterialProxy`]: `Pod` parameter block, one per material
//! - [`MaterialRef`]: model + state + proxy index, shared by submeshes
//! - [`MaterialModel`], [`MaterialState`], [`AlphaMode`]: what selects a pipeline

mod types;

pub use types::{
    AlphaMode, MaterialModel, MaterialProxy, MaterialRef, MaterialRefId, MaterialState,
    proxy_flags,
};
