//! Shared value, operator and attribute types.
//!
//! These types describe what flows between the lowering patterns, the backend
//! dispatcher and whatever graph IR sits behind [`GraphAdaptor`]. Tensor
//! descriptors and attribute sets are plain values: every rewrite builds new
//! ones instead of mutating the old ones in place.
//!
//! [`GraphAdaptor`]: super::adaptor::GraphAdaptor

use std::fmt;

/// Element storage kind of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    I8,
    I32,
    BF16,
}

impl ElementType {
    /// Size of a single element in bytes.
    pub const fn byte_size(self) -> usize {
        match self {
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::BF16 => 2,
            ElementType::I8 => 1,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ElementType::F32 | ElementType::BF16)
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "f32" => Some(ElementType::F32),
            "i8" => Some(ElementType::I8),
            "i32" => Some(ElementType::I32),
            "bf16" => Some(ElementType::BF16),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::I8 => "i8",
            ElementType::I32 => "i32",
            ElementType::BF16 => "bf16",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape plus storage kind of a tensor value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub shape: Vec<usize>,
    pub elem: ElementType,
    /// Asymmetric (zero-point) int8 quantization; only meaningful for `I8`.
    pub asymmetric: bool,
}

impl TensorType {
    pub fn new(shape: impl Into<Vec<usize>>, elem: ElementType) -> Self {
        Self { shape: shape.into(), elem, asymmetric: false }
    }

    /// Same shape, different element type.
    pub fn with_elem(&self, elem: ElementType) -> Self {
        Self { shape: self.shape.clone(), elem, asymmetric: false }
    }

    /// Int8 result type used by the int8 lowering patterns.
    pub fn quant_int8(&self, asymmetric: bool) -> Self {
        Self { shape: self.shape.clone(), elem: ElementType::I8, asymmetric }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn byte_size(&self) -> usize {
        self.num_elements() * self.elem.byte_size()
    }

    /// Collapse the shape into NCHW, padding missing trailing dims with 1.
    ///
    /// Shapes with more than four dims fold the extra trailing dims into `w`.
    pub fn nchw(&self) -> [usize; 4] {
        let mut dims = [1usize; 4];
        for (i, &d) in self.shape.iter().enumerate() {
            if i < 4 {
                dims[i] = d;
            } else {
                dims[3] *= d;
            }
        }
        dims
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.elem)?;
        for (i, d) in self.shape.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")?;
        if self.asymmetric {
            f.write_str(" asym")?;
        }
        Ok(())
    }
}

/// Operator kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    MatMul,
    Sub,
    Relu,
    ScaleLut,
}

impl OpKind {
    pub const ALL: &'static [OpKind] = &[OpKind::MatMul, OpKind::Sub, OpKind::Relu, OpKind::ScaleLut];

    pub const fn name(self) -> &'static str {
        match self {
            OpKind::MatMul => "matmul",
            OpKind::Sub => "sub",
            OpKind::Relu => "relu",
            OpKind::ScaleLut => "scale_lut",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        OpKind::ALL.iter().copied().find(|k| k.name() == s)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hardware backend identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendId {
    Cv18xx,
    Bm1684,
}

impl BackendId {
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "cv18xx" => Some(BackendId::Cv18xx),
            "bm1684" => Some(BackendId::Bm1684),
            _ => None,
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendId::Cv18xx => f.write_str("cv18xx"),
            BackendId::Bm1684 => f.write_str("bm1684"),
        }
    }
}

/// Where an operator executes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locality {
    /// Operands are read from and written to global memory directly.
    Global,
    /// Operands are tiled through local scratch memory.
    Local,
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locality::Global => f.write_str("global"),
            Locality::Local => f.write_str("local"),
        }
    }
}

/// Numeric execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NumericMode {
    #[default]
    Int8,
    Bf16,
}

impl NumericMode {
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "int8" => Some(NumericMode::Int8),
            "bf16" => Some(NumericMode::Bf16),
            _ => None,
        }
    }

    /// Numeric mode implied by a lowered result type.
    pub fn of(elem: ElementType) -> Self {
        match elem {
            ElementType::BF16 | ElementType::F32 => NumericMode::Bf16,
            ElementType::I8 | ElementType::I32 => NumericMode::Int8,
        }
    }
}

impl fmt::Display for NumericMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericMode::Int8 => f.write_str("int8"),
            NumericMode::Bf16 => f.write_str("bf16"),
        }
    }
}

/// One entry point of a backend codegen handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    EmitGlobal,
    BufferSizeLocal,
    EmitLocal,
    DynamicEmit,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::EmitGlobal => f.write_str("emit_global"),
            Capability::BufferSizeLocal => f.write_str("buffer_size_local"),
            Capability::EmitLocal => f.write_str("emit_local"),
            Capability::DynamicEmit => f.write_str("dynamic_emit"),
        }
    }
}

/// Requantization mode tag persisted on lowered operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequantMode {
    /// `out = (acc * multiplier) >> rshift` with the stored parameters.
    Normal,
    /// Scale ratio within tolerance of 1.0: the accumulator passes through.
    Identity,
}

impl RequantMode {
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(RequantMode::Normal),
            "identity" => Some(RequantMode::Identity),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            RequantMode::Normal => "normal",
            RequantMode::Identity => "identity",
        }
    }
}

/// A fixed-point approximation `multiplier / 2^rshift` of a real scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QuantParam {
    pub multiplier: i64,
    pub rshift: i64,
}

impl QuantParam {
    pub const IDENTITY: QuantParam = QuantParam { multiplier: 1, rshift: 0 };
    pub const ZERO: QuantParam = QuantParam { multiplier: 0, rshift: 0 };

    pub const fn new(multiplier: i64, rshift: i64) -> Self {
        Self { multiplier, rshift }
    }

    /// The real scale this pair represents.
    pub fn scale(&self) -> f64 {
        self.multiplier as f64 / 2f64.powi(self.rshift as i32)
    }
}

/// Attribute set carried by an operator node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attributes {
    pub quant_mode: Option<RequantMode>,
    pub multipliers: Vec<i64>,
    pub rshifts: Vec<i64>,
    pub do_relu: bool,
    /// Upper clamp for a fused relu; `0` means unbounded.
    pub relu_limit: f64,
}

impl Attributes {
    /// Attach one quantization parameter per group.
    pub fn set_quant(&mut self, mode: RequantMode, params: &[QuantParam]) {
        self.quant_mode = Some(mode);
        self.multipliers = params.iter().map(|p| p.multiplier).collect();
        self.rshifts = params.iter().map(|p| p.rshift).collect();
    }

    /// Pair multipliers and rshifts back into per-group parameters.
    ///
    /// Returns `None` when the arrays differ in length, which is the case for
    /// ops that share one rshift across several multipliers.
    pub fn quant_params(&self) -> Option<Vec<QuantParam>> {
        if self.multipliers.len() != self.rshifts.len() {
            return None;
        }
        Some(
            self.multipliers
                .iter()
                .zip(&self.rshifts)
                .map(|(&m, &r)| QuantParam::new(m, r))
                .collect(),
        )
    }

    pub fn is_identity(&self) -> bool {
        self.quant_mode == Some(RequantMode::Identity)
    }
}
