//! Owned device resources.
//!
//! Each type releases its device object when dropped, so a failure midway
//! through building a map unwinds whatever was already created.

use std::sync::Arc;

use super::context::Context;
use super::functions::{ComputePipelineDesc, MicromapCreateInfo, MicromapType};
use super::types::*;
use crate::util::{DeviceResult, Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCreateInfo {
    pub size: DeviceSize,
    pub usage: BufferUsage,
}

/// Buffer memory provider supplied by the application.
pub trait Allocator: Send + Sync {
    fn create_buffer(
        &self,
        info: &BufferCreateInfo,
        memory: MemoryProperties,
    ) -> DeviceResult<BufferHandle>;

    fn destroy_buffer(&self, buffer: BufferHandle);
}

/// Device buffer with its address resolved at creation.
#[derive(Debug)]
pub struct Buffer {
    ctx: Arc<Context>,
    handle: BufferHandle,
    size: DeviceSize,
    address: DeviceAddress,
}

impl Buffer {
    /// Device-local buffer of `size` bytes.
    pub fn new(ctx: &Arc<Context>, size: DeviceSize, usage: BufferUsage) -> Result<Self> {
        Self::with_memory(ctx, size, usage, MemoryProperties::DEVICE_LOCAL)
    }

    pub fn with_memory(
        ctx: &Arc<Context>,
        size: DeviceSize,
        usage: BufferUsage,
        memory: MemoryProperties,
    ) -> Result<Self> {
        if size == 0 {
            return Err(Error::other("zero-sized buffer"));
        }
        let info = BufferCreateInfo { size, usage };
        let handle = ctx.check_value(ctx.allocator().create_buffer(&info, memory))?;
        let address = if usage.contains(BufferUsage::SHADER_DEVICE_ADDRESS) {
            ctx.functions().buffer_device_address(handle)
        } else {
            0
        };
        tracing::trace!(handle = handle.0, size, "created buffer");
        Ok(Self {
            ctx: Arc::clone(ctx),
            handle,
            size,
            address,
        })
    }

    #[inline]
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    /// Device address, zero unless created with `SHADER_DEVICE_ADDRESS`.
    #[inline]
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Record a zero fill of the whole buffer. The size must be whole words.
    pub fn clear(&self, cmd: CommandBuffer) -> Result<()> {
        self.check_words("fill")?;
        self.ctx
            .functions()
            .cmd_fill_buffer(cmd, self.handle, 0, self.size, 0);
        Ok(())
    }

    /// Record an upload of exactly `size` bytes, in whole words.
    pub fn update(&self, cmd: CommandBuffer, data: &[u8]) -> Result<()> {
        self.check_words("update")?;
        if data.len() as DeviceSize != self.size {
            return Err(Error::other(format!(
                "update of {} bytes into a {} byte buffer",
                data.len(),
                self.size
            )));
        }
        self.ctx
            .functions()
            .cmd_update_buffer(cmd, self.handle, 0, data);
        Ok(())
    }

    // fill and update commands work in whole words
    fn check_words(&self, what: &str) -> Result<()> {
        if self.size % 4 != 0 {
            return Err(Error::other(format!(
                "{} of a {} byte buffer, not a multiple of 4",
                what, self.size
            )));
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.ctx.allocator().destroy_buffer(self.handle);
    }
}

/// Compute pipeline for one kernel.
#[derive(Debug)]
pub struct ComputePipeline {
    ctx: Arc<Context>,
    handle: PipelineHandle,
}

impl ComputePipeline {
    pub fn new(ctx: &Arc<Context>, desc: &ComputePipelineDesc) -> Result<Self> {
        let handle = ctx.check_value(ctx.functions().create_compute_pipeline(desc))?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            handle,
        })
    }

    #[inline]
    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        self.ctx.functions().destroy_pipeline(self.handle);
    }
}

/// Displacement micromap and the storage buffer backing it.
#[derive(Debug)]
pub struct Micromap {
    handle: MicromapHandle,
    ctx: Arc<Context>,
    storage: Buffer,
}

impl Micromap {
    pub fn new(ctx: &Arc<Context>, size: DeviceSize) -> Result<Self> {
        let storage = Buffer::new(
            ctx,
            size,
            BufferUsage::SHADER_DEVICE_ADDRESS | BufferUsage::MICROMAP_STORAGE,
        )?;
        let info = MicromapCreateInfo {
            buffer: storage.handle(),
            offset: 0,
            size,
            ty: MicromapType::DisplacementNv,
        };
        let handle = ctx.check_value(ctx.functions().create_micromap(&info))?;
        Ok(Self {
            handle,
            ctx: Arc::clone(ctx),
            storage,
        })
    }

    #[inline]
    pub fn handle(&self) -> MicromapHandle {
        self.handle
    }

    #[inline]
    pub fn storage(&self) -> &Buffer {
        &self.storage
    }
}

impl Drop for Micromap {
    fn drop(&mut self) {
        // storage drops after this returns
        self.ctx.functions().destroy_micromap(self.handle);
    }
}
