// This module implements per-batch requantization of fully-connected weights. For every
// batch of a [batch, N, K] filter it derives a scale ratio from the filter's dynamic range
// and the input/output calibration thresholds, raises that scale whenever a bias value of
// the same batch would otherwise overflow the 32-bit accumulator domain, decomposes the
// scale into an unsigned 8-bit multiplier and right shift, and finally quantizes the filter
// to int8 and the bias to int32 using the realised multiplier/shift pair. Batches are
// independent and processed in parallel with rayon; results are collected in batch order
// so the output is identical to a sequential run.

//! Weight and bias requantization for weight-bearing operators.

use super::solver::ScaleSolver;
use crate::core::{CompileError, CompileResult, QuantParam};
use rayon::prelude::*;

/// Largest magnitude of the symmetric int8 range.
pub const QMAX_INT8: f64 = 127.0;

/// Largest magnitude of the int32 bias range.
pub const QMAX_INT32: f64 = i32::MAX as f64;

pub fn find_max_abs(data: &[f32]) -> f32 {
    data.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()))
}

/// Scale ratio that maps a filter with range `max_filter` onto int8.
///
/// With input and output quantized against `threshold_x` and `threshold_y`,
/// an accumulator of int8 products must be scaled by this ratio to land in
/// the int8 output domain.
pub fn qscale_for_filter(max_filter: f64, threshold_y: f64, threshold_x: f64) -> f64 {
    max_filter * threshold_x / (threshold_y * QMAX_INT8)
}

/// Smallest scale ratio at which a bias of magnitude `max_bias` still fits int32.
pub fn qscale_for_bias(max_bias: f64, threshold_y: f64) -> f64 {
    max_bias * QMAX_INT8 / (threshold_y * QMAX_INT32)
}

pub fn saturate_i8(v: f64) -> i8 {
    v.round().clamp(-QMAX_INT8, QMAX_INT8) as i8
}

pub fn saturate_i32(v: f64) -> i32 {
    v.round().clamp(-QMAX_INT32, QMAX_INT32) as i32
}

/// Quantize filter values with a realised multiplier/shift pair.
pub fn quantize_filter(src: &[f32], threshold_y: f64, threshold_x: f64, param: QuantParam) -> Vec<i8> {
    if param.multiplier == 0 {
        return vec![0; src.len()];
    }
    let factor = threshold_x / threshold_y / param.scale();
    src.iter().map(|&v| saturate_i8(v as f64 * factor)).collect()
}

/// Quantize bias values into the int32 accumulator domain.
pub fn quantize_bias(src: &[f32], threshold_y: f64, param: QuantParam) -> Vec<i32> {
    if param.multiplier == 0 {
        return vec![0; src.len()];
    }
    let factor = QMAX_INT8 / threshold_y / param.scale();
    src.iter().map(|&v| saturate_i32(v as f64 * factor)).collect()
}

/// Inverse of [`quantize_filter`], for accuracy checks.
pub fn dequantize_filter(q: i8, threshold_y: f64, threshold_x: f64, param: QuantParam) -> f64 {
    q as f64 * param.scale() * threshold_y / threshold_x
}

/// A bias-forced scale increase for one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleAdjustment {
    pub batch: usize,
    pub qscale_filter: f64,
    pub qscale_bias: f64,
}

/// Output of [`WeightRequantizer::requantize_fc`].
#[derive(Debug, Clone, PartialEq)]
pub struct FcRequantized {
    pub filter: Vec<i8>,
    pub bias: Option<Vec<i32>>,
    /// One entry per batch, in batch order.
    pub params: Vec<QuantParam>,
    pub adjustments: Vec<ScaleAdjustment>,
}

/// Requantized slices and parameter of a single batch.
struct BatchResult {
    filter: Vec<i8>,
    bias: Option<Vec<i32>>,
    param: QuantParam,
    adjustment: Option<ScaleAdjustment>,
}

/// Requantizes constant right-hand operands batch by batch.
#[derive(Debug, Clone, Copy)]
pub struct WeightRequantizer {
    solver: ScaleSolver,
}

impl Default for WeightRequantizer {
    fn default() -> Self {
        Self { solver: ScaleSolver::UNSIGNED_TABLE }
    }
}

impl WeightRequantizer {
    pub fn new(solver: ScaleSolver) -> Self {
        Self { solver }
    }

    /// Requantize a `[batch, N, K]` filter and optional `[batch, N]` bias.
    ///
    /// Shapes are checked before any arithmetic runs.
    #[allow(clippy::too_many_arguments)]
    pub fn requantize_fc(
        &self,
        filter: &[f32],
        bias: Option<&[f32]>,
        batch: usize,
        n: usize,
        k: usize,
        threshold_y: f64,
        threshold_x: f64,
    ) -> CompileResult<FcRequantized> {
        let isz = n * k;
        if filter.len() != batch * isz {
            return Err(CompileError::ShapeMismatch {
                what: "filter".to_string(),
                expected: batch * isz,
                actual: filter.len(),
            });
        }
        if let Some(bias) = bias {
            if bias.len() != batch * n {
                return Err(CompileError::ShapeMismatch {
                    what: "bias".to_string(),
                    expected: batch * n,
                    actual: bias.len(),
                });
            }
        }

        let results: Vec<BatchResult> = (0..batch)
            .into_par_iter()
            .map(|i| {
                let filter_i = &filter[i * isz..(i + 1) * isz];
                let bias_i = bias.map(|b| &b[i * n..(i + 1) * n]);
                self.requantize_batch(i, filter_i, bias_i, threshold_y, threshold_x)
            })
            .collect::<CompileResult<_>>()?;

        let mut out = FcRequantized {
            filter: Vec::with_capacity(filter.len()),
            bias: bias.map(|b| Vec::with_capacity(b.len())),
            params: Vec::with_capacity(batch),
            adjustments: Vec::new(),
        };
        for r in results {
            out.filter.extend(r.filter);
            if let (Some(dst), Some(src)) = (out.bias.as_mut(), r.bias) {
                dst.extend(src);
            }
            out.params.push(r.param);
            out.adjustments.extend(r.adjustment);
        }
        Ok(out)
    }

    fn requantize_batch(
        &self,
        batch: usize,
        filter: &[f32],
        bias: Option<&[f32]>,
        threshold_y: f64,
        threshold_x: f64,
    ) -> CompileResult<BatchResult> {
        let max_filter = find_max_abs(filter) as f64;
        let qscale_filter = qscale_for_filter(max_filter, threshold_y, threshold_x);

        let mut qscale = qscale_filter;
        if let Some(bias) = bias {
            for &b in bias {
                qscale = qscale.max(qscale_for_bias(b.abs() as f64, threshold_y));
            }
        }
        let adjustment = (qscale > qscale_filter).then_some(ScaleAdjustment {
            batch,
            qscale_filter,
            qscale_bias: qscale,
        });

        let param = self.solver.solve(qscale)?;
        log::debug!(
            "batch {batch}: max_filter = {max_filter}, qscale = {qscale}, multiplier = {}, rshift = {}",
            param.multiplier,
            param.rshift
        );

        Ok(BatchResult {
            filter: quantize_filter(filter, threshold_y, threshold_x, param),
            bias: bias.map(|b| quantize_bias(b, threshold_y, param)),
            param,
            adjustment,
        })
    }
}
