// This module implements the backend code-generation dispatch protocol. Every lowered operator
// is routed through a DispatchKey of (operator kind, backend, locality, numeric mode) to a
// CodegenHandler registered in the DispatchRegistry. A handler exposes a fixed capability set:
// emit_global appends global-memory kernels to the instruction stream, buffer_size_local
// reports the extra scratch bytes a tiled execution needs, emit_local appends one tiled kernel
// per tile and dynamic_emit records a layer for the ahead-of-time serialization path. A key
// without a registered handler, and a registered capability that is only a placeholder, both
// fail with the same typed Unsupported error naming the exact combination, so callers and
// tests can tell which combinations exist. Handlers see operators through OpView, a detached
// snapshot of names, types, addresses and attributes, so they never depend on the graph IR.

//! Backend codegen dispatch.
//!
//! - [`DispatchRegistry`]: key to handler table, built-in CV18xx and BM1684 handlers
//! - [`CodegenHandler`]: per-operator capability set
//! - [`InstructionStream`] / [`DynamicLayerTable`]: append-only outputs
//! - [`CodegenDriver`]: walks a lowered graph and emits it under a [`Schedule`]

use crate::core::{
    Attributes, BackendId, Capability, CompileError, CompileResult, GraphAdaptor, Locality,
    NumericMode, OpKind, TensorType,
};
use hashbrown::HashMap;
use std::fmt;
use std::sync::Arc;

pub mod bm1684;
pub mod cv18xx;
pub mod driver;
pub mod instruction;

pub use driver::{CodegenConfig, CodegenDriver, LocalMemory, OpStage, Schedule};
pub use instruction::{DynamicLayer, DynamicLayerTable, FwLayerType, Instruction, InstructionStream};

/// Identifies one codegen routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchKey {
    pub op: OpKind,
    pub backend: BackendId,
    pub locality: Locality,
    pub mode: NumericMode,
}

impl DispatchKey {
    pub fn new(op: OpKind, backend: BackendId, locality: Locality, mode: NumericMode) -> Self {
        Self { op, backend, locality, mode }
    }

    /// The error reported when `capability` is not available for this key.
    pub fn unsupported(&self, capability: Capability) -> CompileError {
        CompileError::Unsupported {
            op: self.op,
            backend: self.backend,
            locality: self.locality,
            mode: self.mode,
            capability,
        }
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.op, self.backend, self.locality, self.mode)
    }
}

/// Slice geometry handed to `buffer_size_local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceInfo {
    pub in_lmem_bytes: u64,
    pub out_lmem_bytes: u64,
    pub in_nslice: usize,
    pub in_hslice: usize,
    pub out_nslice: usize,
    pub out_hslice: usize,
}

/// One tile of a local execution, with its local memory addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub n_step: usize,
    pub h_step: usize,
    pub n_slice: usize,
    pub h_slice: usize,
    pub la_input: u64,
    pub la_output: u64,
    pub la_buffer: u64,
}

/// A value as seen by a codegen handler.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorRef {
    pub name: String,
    pub ty: TensorType,
    pub address: u64,
    pub is_weight: bool,
}

impl TensorRef {
    fn from_adaptor<A: GraphAdaptor>(graph: &A, value: A::ValueRef) -> Self {
        Self {
            name: graph.value_name(value).to_string(),
            ty: graph.value_type(value).clone(),
            address: graph.value_address(value),
            is_weight: graph.is_weight(value),
        }
    }
}

/// Snapshot of a lowered operator.
#[derive(Debug, Clone, PartialEq)]
pub struct OpView {
    pub name: String,
    pub kind: OpKind,
    /// `None` for an absent optional operand.
    pub operands: Vec<Option<TensorRef>>,
    pub result: TensorRef,
    pub attrs: Attributes,
}

impl OpView {
    pub fn from_adaptor<A: GraphAdaptor>(graph: &A, op: A::OpRef) -> Self {
        let operands = graph
            .op_operands(op)
            .map(|v| (v != A::NONE_VALUE).then(|| TensorRef::from_adaptor(graph, v)))
            .collect();
        Self {
            name: graph.op_name(op).to_string(),
            kind: graph.op_kind(op),
            operands,
            result: TensorRef::from_adaptor(graph, graph.op_result(op)),
            attrs: graph.op_attrs(op).clone(),
        }
    }

    /// Required operand `idx`.
    pub fn operand(&self, idx: usize) -> CompileResult<&TensorRef> {
        self.operands
            .get(idx)
            .and_then(Option::as_ref)
            .ok_or_else(|| CompileError::InvalidOperand {
                op: self.name.clone(),
                reason: format!("missing operand {idx}"),
            })
    }

    /// Optional operand `idx`.
    pub fn optional_operand(&self, idx: usize) -> Option<&TensorRef> {
        self.operands.get(idx).and_then(Option::as_ref)
    }

    /// Fail unless the operator carries quantization parameters.
    pub fn require_quant(&self) -> CompileResult<()> {
        if self.attrs.quant_mode.is_none() || self.attrs.multipliers.is_empty() || self.attrs.rshifts.is_empty() {
            return Err(CompileError::InvalidOperand {
                op: self.name.clone(),
                reason: "int8 operator has no quantization parameters".to_string(),
            });
        }
        Ok(())
    }
}

/// Codegen routines of one operator on one backend.
///
/// Every capability defaults to the typed "not implemented" error for the
/// key it is called with; handlers override what the hardware supports.
pub trait CodegenHandler: Send + Sync {
    fn emit_global(
        &self,
        key: DispatchKey,
        _op: &OpView,
        _layer_id: u32,
        _out: &mut InstructionStream,
    ) -> CompileResult<()> {
        Err(key.unsupported(Capability::EmitGlobal))
    }

    /// Extra local scratch bytes needed beyond the input and output slices.
    fn buffer_size_local(&self, key: DispatchKey, _op: &OpView, _slice: &SliceInfo) -> CompileResult<u64> {
        Err(key.unsupported(Capability::BufferSizeLocal))
    }

    fn emit_local(
        &self,
        key: DispatchKey,
        _op: &OpView,
        _layer_id: u32,
        _tile: &Tile,
        _out: &mut InstructionStream,
    ) -> CompileResult<()> {
        Err(key.unsupported(Capability::EmitLocal))
    }

    /// Record the operator in the dynamic layer table; returns the layer id.
    fn dynamic_emit(&self, key: DispatchKey, _op: &OpView, _layers: &mut DynamicLayerTable) -> CompileResult<u32> {
        Err(key.unsupported(Capability::DynamicEmit))
    }

    /// Firmware layer type, `-1` when the operator has no firmware layer.
    fn fw_type(&self) -> i64 {
        -1
    }
}

/// Dispatch table from [`DispatchKey`] to handler.
#[derive(Default, Clone)]
pub struct DispatchRegistry {
    handlers: HashMap<DispatchKey, Arc<dyn CodegenHandler>>,
}

impl fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRegistry").field("keys", &self.handlers.len()).finish()
    }
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in CV18xx and BM1684 handler.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        cv18xx::register(&mut registry);
        bm1684::register(&mut registry);
        registry
    }

    /// Bind `handler` to `key`, returning the handler it replaces.
    pub fn register(&mut self, key: DispatchKey, handler: Arc<dyn CodegenHandler>) -> Option<Arc<dyn CodegenHandler>> {
        self.handlers.insert(key, handler)
    }

    /// Bind `handler` for both localities of every listed mode.
    pub fn register_all(
        &mut self,
        op: OpKind,
        backend: BackendId,
        modes: &[NumericMode],
        handler: Arc<dyn CodegenHandler>,
    ) {
        for &mode in modes {
            for locality in [Locality::Global, Locality::Local] {
                self.register(DispatchKey::new(op, backend, locality, mode), Arc::clone(&handler));
            }
        }
    }

    pub fn is_bound(&self, key: &DispatchKey) -> bool {
        self.handlers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn handler(&self, key: DispatchKey, capability: Capability) -> CompileResult<&dyn CodegenHandler> {
        self.handlers
            .get(&key)
            .map(|h| h.as_ref())
            .ok_or_else(|| key.unsupported(capability))
    }

    pub fn emit_global(
        &self,
        key: DispatchKey,
        op: &OpView,
        layer_id: u32,
        out: &mut InstructionStream,
    ) -> CompileResult<()> {
        self.handler(key, Capability::EmitGlobal)?.emit_global(key, op, layer_id, out)
    }

    pub fn buffer_size_local(&self, key: DispatchKey, op: &OpView, slice: &SliceInfo) -> CompileResult<u64> {
        self.handler(key, Capability::BufferSizeLocal)?.buffer_size_local(key, op, slice)
    }

    pub fn emit_local(
        &self,
        key: DispatchKey,
        op: &OpView,
        layer_id: u32,
        tile: &Tile,
        out: &mut InstructionStream,
    ) -> CompileResult<()> {
        self.handler(key, Capability::EmitLocal)?.emit_local(key, op, layer_id, tile, out)
    }

    pub fn dynamic_emit(&self, key: DispatchKey, op: &OpView, layers: &mut DynamicLayerTable) -> CompileResult<u32> {
        self.handler(key, Capability::DynamicEmit)?.dynamic_emit(key, op, layers)
    }

    /// Firmware layer type of the handler bound to `key`.
    pub fn fw_type(&self, key: DispatchKey) -> CompileResult<i64> {
        Ok(self.handler(key, Capability::DynamicEmit)?.fw_type())
    }
}
