//! Emitted kernels and the dynamic layer table.
//!
//! Both outputs are append-only logs. Instruction order is emission order,
//! which the driver keeps equal to scheduling order.

use crate::core::NumericMode;
use std::fmt;

/// One backend kernel invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// CV18xx global int8 fully-connected / matmul kernel.
    TgInt8Fc {
        layer_id: u32,
        ga_input: u64,
        ga_filter: u64,
        ga_bias: Option<u64>,
        ga_output: u64,
        batch: usize,
        m: usize,
        k: usize,
        n: usize,
        do_relu: bool,
        /// Whether the right operand is a constant filter.
        weight: bool,
        multipliers: Vec<i64>,
        rshifts: Vec<i64>,
    },
    /// CV18xx global int8 broadcast subtraction.
    TgInt8BcastSub {
        layer_id: u32,
        ga_a: u64,
        ga_b: u64,
        ga_output: u64,
        a_shape: [usize; 4],
        b_shape: [usize; 4],
        do_relu: bool,
        rshift: i32,
        multipliers: Vec<i32>,
    },
    /// CV18xx global bf16 broadcast subtraction.
    TgBf16BcastSub {
        layer_id: u32,
        ga_a: u64,
        ga_b: u64,
        ga_output: u64,
        a_shape: [usize; 4],
        b_shape: [usize; 4],
        do_relu: bool,
    },
    /// CV18xx global relu.
    TgRelu {
        layer_id: u32,
        mode: NumericMode,
        ga_input: u64,
        ga_output: u64,
        shape: [usize; 4],
    },
    /// CV18xx tiled relu on local memory.
    TlRelu {
        layer_id: u32,
        mode: NumericMode,
        la_input: u64,
        la_output: u64,
        n: usize,
        c: usize,
        h: usize,
        w: usize,
    },
    /// BM1684 global relu.
    BmReluGlobal {
        layer_id: u32,
        ga_input: u64,
        ga_output: u64,
        shape: [usize; 4],
        relu_limit: f64,
    },
    /// BM1684 relu on one local slice.
    BmReluLocal {
        layer_id: u32,
        la_input: u64,
        la_output: u64,
        n_step: usize,
        h_step: usize,
        shape: [usize; 4],
        relu_limit: f64,
    },
}

impl Instruction {
    /// Kernel name, as used in listings and statistics.
    pub fn kernel(&self) -> &'static str {
        match self {
            Instruction::TgInt8Fc { .. } => "tg_int8_fc",
            Instruction::TgInt8BcastSub { .. } => "tg_int8_bcast_sub",
            Instruction::TgBf16BcastSub { .. } => "tg_bf16_bcast_sub",
            Instruction::TgRelu { mode: NumericMode::Int8, .. } => "tg_int8_relu",
            Instruction::TgRelu { mode: NumericMode::Bf16, .. } => "tg_bf16_relu",
            Instruction::TlRelu { mode: NumericMode::Int8, .. } => "tl_int8_relu",
            Instruction::TlRelu { mode: NumericMode::Bf16, .. } => "tl_bf16_relu",
            Instruction::BmReluGlobal { .. } => "bm_relu_global",
            Instruction::BmReluLocal { .. } => "bm_relu_local",
        }
    }

    pub fn layer_id(&self) -> u32 {
        match *self {
            Instruction::TgInt8Fc { layer_id, .. }
            | Instruction::TgInt8BcastSub { layer_id, .. }
            | Instruction::TgBf16BcastSub { layer_id, .. }
            | Instruction::TgRelu { layer_id, .. }
            | Instruction::TlRelu { layer_id, .. }
            | Instruction::BmReluGlobal { layer_id, .. }
            | Instruction::BmReluLocal { layer_id, .. } => layer_id,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.layer_id(), self.kernel())?;
        match self {
            Instruction::TgInt8Fc {
                ga_input, ga_filter, ga_bias, ga_output, batch, m, k, n, do_relu, multipliers, rshifts, ..
            } => {
                write!(f, " in={ga_input:#x} filter={ga_filter:#x}")?;
                if let Some(bias) = ga_bias {
                    write!(f, " bias={bias:#x}")?;
                }
                write!(
                    f,
                    " out={ga_output:#x} batch={batch} m={m} k={k} n={n} relu={do_relu} \
                     multipliers={multipliers:?} rshifts={rshifts:?}"
                )
            }
            Instruction::TgInt8BcastSub { ga_a, ga_b, ga_output, a_shape, b_shape, do_relu, rshift, multipliers, .. } => {
                write!(
                    f,
                    " a={ga_a:#x}{a_shape:?} b={ga_b:#x}{b_shape:?} out={ga_output:#x} relu={do_relu} \
                     rshift={rshift} multipliers={multipliers:?}"
                )
            }
            Instruction::TgBf16BcastSub { ga_a, ga_b, ga_output, a_shape, b_shape, do_relu, .. } => {
                write!(f, " a={ga_a:#x}{a_shape:?} b={ga_b:#x}{b_shape:?} out={ga_output:#x} relu={do_relu}")
            }
            Instruction::TgRelu { ga_input, ga_output, shape, .. } => {
                write!(f, " in={ga_input:#x} out={ga_output:#x} shape={shape:?}")
            }
            Instruction::TlRelu { la_input, la_output, n, c, h, w, .. } => {
                write!(f, " in=L{la_input:#x} out=L{la_output:#x} nchw=[{n}, {c}, {h}, {w}]")
            }
            Instruction::BmReluGlobal { ga_input, ga_output, shape, relu_limit, .. } => {
                write!(f, " in={ga_input:#x} out={ga_output:#x} shape={shape:?} limit={relu_limit}")
            }
            Instruction::BmReluLocal { la_input, la_output, n_step, h_step, shape, relu_limit, .. } => {
                write!(
                    f,
                    " in=L{la_input:#x} out=L{la_output:#x} step=({n_step}, {h_step}) shape={shape:?} limit={relu_limit}"
                )
            }
        }
    }
}

/// Append-only instruction log of one backend target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstructionStream {
    instructions: Vec<Instruction>,
}

impl InstructionStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, inst: Instruction) {
        log::trace!("emit {inst}");
        self.instructions.push(inst);
    }

    /// Move every instruction of `other` to the end of this stream.
    pub fn append(&mut self, other: InstructionStream) {
        self.instructions.extend(other.instructions);
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }
}

impl fmt::Display for InstructionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.instructions {
            writeln!(f, "{inst}")?;
        }
        Ok(())
    }
}

/// Firmware layer types known to the dynamic path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum FwLayerType {
    Relu = 1,
}

/// A layer recorded for ahead-of-time serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicLayer {
    pub fw_type: i64,
    pub name: String,
    pub inputs: Vec<u64>,
    pub output: u64,
    pub shape: [usize; 4],
}

/// Append-only table of dynamic layers; the index is the layer id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicLayerTable {
    layers: Vec<DynamicLayer>,
}

impl DynamicLayerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, layer: DynamicLayer) -> u32 {
        let id = self.layers.len() as u32;
        self.layers.push(layer);
        id
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&DynamicLayer> {
        self.layers.get(id as usize)
    }
}
