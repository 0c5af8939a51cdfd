//! Heightmap sampling and the compress kernel.

pub mod kernel;
pub mod sampler;

pub use kernel::{
    compress_work_item, dispatch_compress, CompressInputs, CompressOutputs, CompressParams,
    ZeroedWords,
};
pub use sampler::{AddressMode, ConstantHeight, FilterMode, HeightSampler, Heightmap, SamplerDesc};
