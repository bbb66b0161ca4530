//! Quantization engine.
//!
//! - [`solver`] turns a real scale ratio into a multiplier/right-shift pair.
//! - [`requant`] requantizes constant weights and biases per batch.

pub mod solver;
pub mod requant;

pub use solver::{is_unity, ScaleSolver, MAX_RSHIFT, UNITY_TOLERANCE};
pub use requant::{
    dequantize_filter, find_max_abs, qscale_for_bias, qscale_for_filter, quantize_bias,
    quantize_filter, saturate_i32, saturate_i8, FcRequantized, ScaleAdjustment, WeightRequantizer,
    QMAX_INT32, QMAX_INT8,
};
