//! Shared device state behind every owned resource.

use std::fmt;
use std::sync::Arc;

use super::buffer::Allocator;
use super::functions::DeviceFunctions;
use super::types::{Access, CommandBuffer, MemoryBarrier, PipelineStage};
use crate::util::{DeviceResult, Error, NativeResult, Result};

/// Callback receiving every native status the baker observes.
pub type CheckResultFn = Arc<dyn Fn(NativeResult) + Send + Sync>;

/// Function table, allocator and result hook.
///
/// Resources hold an `Arc<Context>` so they can release themselves on drop.
pub struct Context {
    functions: Arc<dyn DeviceFunctions>,
    allocator: Arc<dyn Allocator>,
    check_result: Option<CheckResultFn>,
}

impl Context {
    pub fn new(
        functions: Arc<dyn DeviceFunctions>,
        allocator: Arc<dyn Allocator>,
        check_result: Option<CheckResultFn>,
    ) -> Self {
        Self {
            functions,
            allocator,
            check_result,
        }
    }

    #[inline]
    pub fn functions(&self) -> &dyn DeviceFunctions {
        self.functions.as_ref()
    }

    #[inline]
    pub fn allocator(&self) -> &dyn Allocator {
        self.allocator.as_ref()
    }

    /// Report `result` to the hook and turn failures into errors.
    pub fn check(&self, result: NativeResult) -> Result<()> {
        if let Some(hook) = &self.check_result {
            hook(result);
        }
        if result.is_success() {
            Ok(())
        } else {
            tracing::warn!(%result, "device call failed");
            Err(Error::Native(result))
        }
    }

    /// [`check`](Self::check) for calls that produce a value.
    pub fn check_value<T>(&self, result: DeviceResult<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.check(NativeResult::Success)?;
                Ok(value)
            }
            Err(status) => {
                self.check(status)?;
                // a hook cannot turn a failure into success
                Err(Error::Native(status))
            }
        }
    }

    /// Record a global memory barrier.
    pub fn memory_barrier(
        &self,
        cmd: CommandBuffer,
        src_stage: PipelineStage,
        src_access: Access,
        dst_stage: PipelineStage,
        dst_access: Access,
    ) {
        let barrier = MemoryBarrier::new(src_stage, src_access, dst_stage, dst_access);
        self.functions.cmd_pipeline_barrier(cmd, &barrier);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("check_result", &self.check_result.is_some())
            .finish_non_exhaustive()
    }
}
