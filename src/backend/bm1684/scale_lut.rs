use crate::backend::{CodegenHandler, DispatchKey, OpView, SliceInfo};
use crate::core::CompileResult;

/// Only the local buffer query exists; every emitter is a placeholder.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScaleLutCodegen;

impl CodegenHandler for ScaleLutCodegen {
    fn buffer_size_local(&self, _key: DispatchKey, _op: &OpView, _slice: &SliceInfo) -> CompileResult<u64> {
        Ok(0)
    }
}
