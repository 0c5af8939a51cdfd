//! Handles, flags and enums shared with the graphics device.
//!
//! Values mirror the native API so a real backend can pass them through.

/// GPU virtual address.
pub type DeviceAddress = u64;

/// Size or offset in device memory.
pub type DeviceSize = u64;

/// Fill/update size meaning "to the end of the buffer".
pub const WHOLE_SIZE: DeviceSize = u64::MAX;

macro_rules! flags {
    (
        $(#[$meta:meta])*
        $name:ident: $ty:ty {
            $( $(#[$fmeta:meta])* const $flag:ident = $value:expr; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        pub struct $name(pub $ty);

        impl $name {
            $( $(#[$fmeta])* pub const $flag: Self = Self($value); )*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

flags! {
    /// How a buffer will be used.
    BufferUsage: u32 {
        const TRANSFER_SRC = 0x0000_0001;
        const TRANSFER_DST = 0x0000_0002;
        const UNIFORM_BUFFER = 0x0000_0010;
        const STORAGE_BUFFER = 0x0000_0020;
        const SHADER_DEVICE_ADDRESS = 0x0002_0000;
        const MICROMAP_BUILD_INPUT_READ_ONLY = 0x0080_0000;
        const MICROMAP_STORAGE = 0x0100_0000;
    }
}

flags! {
    /// Memory placement requested from the allocator.
    MemoryProperties: u32 {
        const DEVICE_LOCAL = 0x1;
        const HOST_VISIBLE = 0x2;
    }
}

flags! {
    /// Pipeline stages for barriers.
    PipelineStage: u64 {
        const COMPUTE_SHADER = 0x0000_0800;
        const TRANSFER = 0x0000_1000;
        const ACCELERATION_STRUCTURE_BUILD = 0x0200_0000;
        const MICROMAP_BUILD = 0x4000_0000;
    }
}

flags! {
    /// Memory access kinds for barriers.
    Access: u64 {
        const UNIFORM_READ = 0x0000_0008;
        const SHADER_READ = 0x0000_0020;
        const SHADER_WRITE = 0x0000_0040;
        const TRANSFER_WRITE = 0x0000_1000;
        const ACCELERATION_STRUCTURE_READ = 0x0020_0000;
        const MICROMAP_READ = 0x1000_0000_0000;
        const MICROMAP_WRITE = 0x2000_0000_0000;
    }
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub const NULL: Self = Self(0);

            #[inline]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

handle!(
    /// Device buffer.
    BufferHandle
);
handle!(
    /// Built (or building) micromap.
    MicromapHandle
);
handle!(
    /// Compute pipeline.
    PipelineHandle
);
handle!(
    /// Application-owned pipeline cache.
    PipelineCacheHandle
);
handle!(
    /// Command buffer in the recording state.
    CommandBuffer
);
handle!(
    /// Sampled image.
    ImageHandle
);

/// Image layouts relevant to the compress kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    #[default]
    Undefined,
    General,
    ShaderReadOnlyOptimal,
    TransferDstOptimal,
}

/// Index element type of a mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexType {
    Uint16,
    Uint32,
    Uint8,
    /// Non-indexed geometry.
    None,
}

/// Vertex attribute formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Undefined,
    R32G32Sfloat,
    R32G32B32Sfloat,
    R32G32B32A32Sfloat,
    R16G16B16A16Sfloat,
}

impl Format {
    /// Formats accepted for per-vertex displacement directions.
    pub const fn is_direction_format(self) -> bool {
        matches!(
            self,
            Self::R32G32B32Sfloat | Self::R32G32B32A32Sfloat | Self::R16G16B16A16Sfloat
        )
    }
}

/// Global execution and memory dependency recorded into a command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryBarrier {
    pub src_stage: PipelineStage,
    pub src_access: Access,
    pub dst_stage: PipelineStage,
    pub dst_access: Access,
}

impl MemoryBarrier {
    pub const fn new(
        src_stage: PipelineStage,
        src_access: Access,
        dst_stage: PipelineStage,
        dst_access: Access,
    ) -> Self {
        Self {
            src_stage,
            src_access,
            dst_stage,
            dst_access,
        }
    }
}

/// Sampled heightmap binding: image view plus the layout it is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    pub image: ImageHandle,
    pub layout: ImageLayout,
}
