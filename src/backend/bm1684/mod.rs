//! BM1684 codegen handlers. BM1684 has no bf16 path, so only int8 keys are bound.

use super::DispatchRegistry;
use crate::core::{BackendId, NumericMode, OpKind};
use std::sync::Arc;

mod relu;
mod scale_lut;

pub use relu::ReluCodegen;
pub use scale_lut::ScaleLutCodegen;

pub fn register(registry: &mut DispatchRegistry) {
    let int8 = &[NumericMode::Int8];
    registry.register_all(OpKind::Relu, BackendId::Bm1684, int8, Arc::new(ReluCodegen));
    registry.register_all(OpKind::ScaleLut, BackendId::Bm1684, int8, Arc::new(ScaleLutCodegen));
}
