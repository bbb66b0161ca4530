//! Codegen driver.
//!
//! Walks lowered operators in scheduling order and moves each one through
//! `Lowered -> Scheduled -> Emitted`. The first failure marks the operator
//! `Unsupported` and aborts the unit; instructions of a failed operator never
//! reach the stream.

use super::{
    DispatchKey, DispatchRegistry, DynamicLayerTable, InstructionStream, OpView, SliceInfo, Tile,
};
use crate::core::{
    BackendId, CompilationSession, CompileError, CompileResult, GraphAdaptor, Locality, NumericMode,
};
use hashbrown::HashMap;

/// Default local memory budget in bytes.
pub const DEFAULT_LOCAL_MEM_BYTES: u64 = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodegenConfig {
    pub backend: BackendId,
    /// Run every operator from local memory regardless of the schedule.
    pub force_local: bool,
    pub local_mem_bytes: u64,
    /// Also record every operator in the dynamic layer table.
    pub emit_dynamic: bool,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            backend: BackendId::Cv18xx,
            force_local: false,
            local_mem_bytes: DEFAULT_LOCAL_MEM_BYTES,
            emit_dynamic: false,
        }
    }
}

/// Locality decision per operator name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    default: Locality,
    overrides: HashMap<String, Locality>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::all_global()
    }
}

impl Schedule {
    pub fn all_global() -> Self {
        Self { default: Locality::Global, overrides: HashMap::new() }
    }

    pub fn all_local() -> Self {
        Self { default: Locality::Local, overrides: HashMap::new() }
    }

    /// Builder-style per-operator override.
    pub fn with(mut self, op: impl Into<String>, locality: Locality) -> Self {
        self.overrides.insert(op.into(), locality);
        self
    }

    pub fn locality(&self, op: &str) -> Locality {
        self.overrides.get(op).copied().unwrap_or(self.default)
    }
}

/// Stack-style local scratch allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMemory {
    capacity: u64,
    used: u64,
}

impl LocalMemory {
    pub fn new(capacity: u64) -> Self {
        Self { capacity, used: 0 }
    }

    pub fn available(&self) -> u64 {
        self.capacity - self.used
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    /// Reserve `bytes`, returning the local address of the block.
    pub fn reserve(&mut self, bytes: u64) -> CompileResult<u64> {
        if bytes > self.available() {
            return Err(CompileError::LocalMemoryExhausted { required: bytes, available: self.available() });
        }
        let offset = self.used;
        self.used += bytes;
        Ok(offset)
    }

    /// Release the block at `offset` and everything reserved after it.
    pub fn release(&mut self, offset: u64) {
        self.used = self.used.min(offset);
    }
}

/// Progress of one operator through code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStage {
    Float,
    Lowered,
    Scheduled(Locality),
    Emitted { layer_id: u32, locality: Locality },
    Unsupported,
}

pub struct CodegenDriver<'r> {
    registry: &'r DispatchRegistry,
    config: CodegenConfig,
    memory: LocalMemory,
    stream: InstructionStream,
    layers: DynamicLayerTable,
    stages: Vec<(String, OpStage)>,
    next_layer_id: u32,
}

impl<'r> CodegenDriver<'r> {
    pub fn new(registry: &'r DispatchRegistry, config: CodegenConfig) -> Self {
        Self {
            registry,
            config,
            memory: LocalMemory::new(config.local_mem_bytes),
            stream: InstructionStream::new(),
            layers: DynamicLayerTable::new(),
            stages: Vec::new(),
            next_layer_id: 0,
        }
    }

    pub fn stream(&self) -> &InstructionStream {
        &self.stream
    }

    pub fn layers(&self) -> &DynamicLayerTable {
        &self.layers
    }

    /// Stage of every operator visited so far, in visiting order.
    pub fn stages(&self) -> &[(String, OpStage)] {
        &self.stages
    }

    pub fn stage_of(&self, op: &str) -> Option<OpStage> {
        self.stages.iter().find(|(name, _)| name == op).map(|&(_, stage)| stage)
    }

    pub fn into_parts(self) -> (InstructionStream, DynamicLayerTable) {
        (self.stream, self.layers)
    }

    /// Emit every operator of `graph` under `schedule`.
    pub fn run<A: GraphAdaptor>(
        &mut self,
        graph: &A,
        schedule: &Schedule,
        session: &CompilationSession<'_>,
    ) -> CompileResult<()> {
        for op in graph.ops() {
            let view = OpView::from_adaptor(graph, op);
            let idx = self.stages.len();
            if !graph.op_is_lowered(op) {
                self.stages.push((view.name.clone(), OpStage::Float));
                return Err(CompileError::InvalidOperand {
                    op: view.name,
                    reason: "operator has not been lowered".to_string(),
                });
            }
            self.stages.push((view.name.clone(), OpStage::Lowered));

            let locality = if self.config.force_local {
                Locality::Local
            } else {
                schedule.locality(&view.name)
            };
            self.stages[idx].1 = OpStage::Scheduled(locality);

            let mode = NumericMode::of(view.result.ty.elem);
            let key = DispatchKey::new(view.kind, self.config.backend, locality, mode);
            let layer_id = self.next_layer_id;

            let mut pending = InstructionStream::new();
            let emitted = match locality {
                Locality::Global => self.registry.emit_global(key, &view, layer_id, &mut pending),
                Locality::Local => self.emit_tiled(key, &view, layer_id, &mut pending, session),
            }
            .and_then(|()| {
                if self.config.emit_dynamic {
                    self.registry.dynamic_emit(key, &view, &mut self.layers).map(|_| ())
                } else {
                    Ok(())
                }
            });

            if let Err(err) = emitted {
                self.stages[idx].1 = OpStage::Unsupported;
                if err.is_unsupported() {
                    session.record_unsupported();
                }
                log::error!("codegen of '{}' ({key}) failed: {err}", view.name);
                return Err(err);
            }

            for inst in pending.iter() {
                session.record_instruction(inst.kernel());
            }
            self.stream.append(pending);
            session.record_op_emitted(locality == Locality::Local);
            self.stages[idx].1 = OpStage::Emitted { layer_id, locality };
            self.next_layer_id += 1;
            log::debug!("emitted '{}' as layer {layer_id} ({key})", view.name);
        }
        log::info!("emitted {} layers, {} instructions", self.next_layer_id, self.stream.len());
        Ok(())
    }

    /// Slice along H until input, output and handler buffer fit local memory,
    /// then emit one kernel per tile.
    fn emit_tiled(
        &mut self,
        key: DispatchKey,
        view: &OpView,
        layer_id: u32,
        out: &mut InstructionStream,
        session: &CompilationSession<'_>,
    ) -> CompileResult<()> {
        let input_ty = view.optional_operand(0).map(|t| &t.ty).unwrap_or(&view.result.ty);
        let [n, c, h, w] = view.result.ty.nchw();
        let in_row = (c * w * input_ty.elem.byte_size()) as u64;
        let out_row = (c * w * view.result.ty.elem.byte_size()) as u64;

        let mut h_slice = h.max(1);
        let (slice, total) = loop {
            let slice = SliceInfo {
                in_lmem_bytes: in_row * h_slice as u64,
                out_lmem_bytes: out_row * h_slice as u64,
                in_nslice: 1,
                in_hslice: h_slice,
                out_nslice: 1,
                out_hslice: h_slice,
            };
            let extra = self.registry.buffer_size_local(key, view, &slice)?;
            let total = slice.in_lmem_bytes + slice.out_lmem_bytes + extra;
            if total <= self.memory.available() {
                break (slice, total);
            }
            if h_slice == 1 {
                return Err(CompileError::LocalMemoryExhausted {
                    required: total,
                    available: self.memory.available(),
                });
            }
            h_slice = h_slice.div_ceil(2);
        };

        let base = self.memory.reserve(total)?;
        session.record_local_reservation(total);
        let result = (|| -> CompileResult<()> {
            for n_step in 0..n {
                for h_step in (0..h.max(1)).step_by(h_slice) {
                    let tile = Tile {
                        n_step,
                        h_step,
                        n_slice: 1,
                        h_slice: h_slice.min(h.max(1) - h_step),
                        la_input: base,
                        la_output: base + slice.in_lmem_bytes,
                        la_buffer: base + slice.in_lmem_bytes + slice.out_lmem_bytes,
                    };
                    self.registry.emit_local(key, view, layer_id, &tile, out)?;
                }
            }
            Ok(())
        })();
        self.memory.release(base);
        result
    }
}
