//! Opaque handles to device resources.
//!
//! Handles are plain ids handed out by a [`GpuDevice`](crate::backend::GpuDevice);
//! they carry no ownership and must be destroyed through the device that
//! created them.

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw id assigned by the device.
            pub fn id(self) -> u64 {
                self.0
            }
        }
    };
}

handle!(
    /// A device buffer.
    BufferHandle
);
handle!(
    /// A device texture (image).
    TextureHandle
);
handle!(
    /// A view over a device texture.
    TextureViewHandle
);
handle!(
    /// A texture sampler.
    SamplerHandle
);
handle!(
    /// A graphics pipeline.
    PipelineHandle
);
handle!(
    /// A bottom- or top-level acceleration structure.
    AccelerationStructureHandle
);
