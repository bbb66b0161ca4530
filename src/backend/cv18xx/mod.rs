//! CV18xx codegen handlers.
//!
//! CV18xx runs int8 and bf16. Every operator row is bound for both modes and
//! both localities; cells the hardware library does not provide stay on the
//! trait's "not implemented" defaults.

use super::DispatchRegistry;
use crate::core::{BackendId, NumericMode, OpKind};
use std::sync::Arc;

mod matmul;
mod relu;
mod sub;

pub use matmul::MatMulCodegen;
pub use relu::ReluCodegen;
pub use sub::SubCodegen;

const MODES: &[NumericMode] = &[NumericMode::Int8, NumericMode::Bf16];

pub fn register(registry: &mut DispatchRegistry) {
    registry.register_all(OpKind::MatMul, BackendId::Cv18xx, MODES, Arc::new(MatMulCodegen));
    registry.register_all(OpKind::Sub, BackendId::Cv18xx, MODES, Arc::new(SubCodegen));
    registry.register_all(OpKind::Relu, BackendId::Cv18xx, MODES, Arc::new(ReluCodegen));
}
