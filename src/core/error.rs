// This module defines the error taxonomy for the tpuc compiler core using the thiserror
// crate. CompileError covers every fatal condition raised while lowering a graph operator
// or dispatching it to a backend emitter: numeric overflow when a scale cannot be expressed
// as a multiplier/right-shift pair, underflow when a non-zero scale would round to a zero
// multiplier, unsupported (operator, backend, locality, mode)
// combinations, lowering paths that are not implemented yet, shape and arity
// precondition violations, missing or invalid calibration thresholds, typed constant reads
// of the wrong element type, local memory exhaustion during tiled emission, and parse
// errors from the graph text format. Precision adjustments are not errors; they are
// logged and accumulated in the compilation session instead.

//! Error types for the tpuc compiler core.

use super::types::{BackendId, Capability, ElementType, Locality, NumericMode, OpKind};
use thiserror::Error;

/// Main error type for lowering and code generation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("qscale {qscale} does not fit a {bit_width}-bit multiplier with rshift <= {max_rshift}")]
    Overflow {
        qscale: f64,
        bit_width: u32,
        max_rshift: u32,
    },

    #[error("qscale {qscale} rounds to a zero multiplier even at rshift {max_rshift}")]
    Underflow { qscale: f64, max_rshift: u32 },

    #[error("invalid qscale {qscale}: must be finite and non-negative")]
    InvalidScale { qscale: f64 },

    #[error("{capability} not implemented for {op} on {backend} ({locality}, {mode})")]
    Unsupported {
        op: OpKind,
        backend: BackendId,
        locality: Locality,
        mode: NumericMode,
        capability: Capability,
    },

    #[error("{mode} lowering not implemented for {op}")]
    LoweringNotImplemented { op: OpKind, mode: NumericMode },

    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("no calibration threshold for value '{value}'")]
    MissingThreshold { value: String },

    #[error("invalid calibration threshold {threshold} for value '{value}'")]
    InvalidThreshold { value: String, threshold: f64 },

    #[error("constant '{value}' holds {actual} data, expected {expected}")]
    WeightType {
        value: String,
        expected: ElementType,
        actual: ElementType,
    },

    #[error("invalid operand for {op}: {reason}")]
    InvalidOperand { op: String, reason: String },

    #[error("local memory exhausted: {required} bytes required, {available} available")]
    LocalMemoryExhausted { required: u64, available: u64 },

    #[error("parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

impl CompileError {
    /// Whether this error reports a missing backend implementation.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            CompileError::Unsupported { .. } | CompileError::LoweringNotImplemented { .. }
        )
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
