//! Reference integer inference for lowered operators.
//!
//! These functions compute what the hardware kernels compute from quantized
//! operands and the persisted multiplier/rshift attributes. They exist to
//! check lowering numerically against float results and make no attempt to
//! be fast.

use crate::core::{Attributes, CompileError, CompileResult, QuantParam};
use crate::quant::{saturate_i8, QMAX_INT8};

/// `round(value / 2^rshift)`, ties toward positive infinity.
pub fn rounding_rshift(value: i64, rshift: i64) -> i64 {
    if rshift <= 0 {
        return value;
    }
    (value + (1i64 << (rshift - 1))) >> rshift
}

/// Apply a multiplier/rshift pair to an accumulator and saturate to int8.
pub fn requantize(acc: i64, param: QuantParam) -> i8 {
    saturate_i8(rounding_rshift(acc * param.multiplier, param.rshift) as f64)
}

/// Symmetric float to int8 quantization against `threshold`.
pub fn quantize(values: &[f32], threshold: f64) -> Vec<i8> {
    values.iter().map(|&v| saturate_i8(v as f64 * QMAX_INT8 / threshold)).collect()
}

pub fn dequantize(values: &[i8], threshold: f64) -> Vec<f32> {
    values.iter().map(|&v| (v as f64 * threshold / QMAX_INT8) as f32).collect()
}

fn clamp_relu(v: i8, attrs: &Attributes) -> i8 {
    if !attrs.do_relu {
        return v;
    }
    let v = v.max(0);
    if attrs.relu_limit > 0.0 {
        v.min(attrs.relu_limit as i8)
    } else {
        v
    }
}

fn check_len(what: &str, expected: usize, actual: usize) -> CompileResult<()> {
    if expected != actual {
        return Err(CompileError::ShapeMismatch { what: what.to_string(), expected, actual });
    }
    Ok(())
}

/// Per-group parameters of `attrs`, identity when the mode says so.
fn group_params(attrs: &Attributes, groups: usize) -> CompileResult<Vec<QuantParam>> {
    if attrs.is_identity() {
        return Ok(vec![QuantParam::IDENTITY; groups]);
    }
    let params = attrs.quant_params().ok_or_else(|| CompileError::InvalidOperand {
        op: "matmul".to_string(),
        reason: "multipliers and rshifts differ in length".to_string(),
    })?;
    match params.len() {
        1 => Ok(vec![params[0]; groups]),
        n if n == groups => Ok(params),
        n => Err(CompileError::ShapeMismatch { what: "quantization groups".to_string(), expected: groups, actual: n }),
    }
}

/// Int8 matmul: `input [batch, m, k] x right [batch, k, n] (+ bias [batch, n])`.
///
/// A single parameter pair applies to every batch; otherwise there must be
/// one pair per batch.
#[allow(clippy::too_many_arguments)]
pub fn matmul_int8(
    input: &[i8],
    right: &[i8],
    bias: Option<&[i32]>,
    batch: usize,
    m: usize,
    k: usize,
    n: usize,
    attrs: &Attributes,
) -> CompileResult<Vec<i8>> {
    check_len("matmul input", batch * m * k, input.len())?;
    check_len("matmul right", batch * k * n, right.len())?;
    if let Some(bias) = bias {
        check_len("matmul bias", batch * n, bias.len())?;
    }
    let params = group_params(attrs, batch)?;

    let mut out = Vec::with_capacity(batch * m * n);
    for (b, param) in params.iter().enumerate() {
        let x = &input[b * m * k..(b + 1) * m * k];
        let w = &right[b * k * n..(b + 1) * k * n];
        for row in 0..m {
            for col in 0..n {
                let mut acc: i64 = (0..k).map(|i| x[row * k + i] as i64 * w[i * n + col] as i64).sum();
                if let Some(bias) = bias {
                    acc += bias[b * n + col] as i64;
                }
                out.push(clamp_relu(requantize(acc, *param), attrs));
            }
        }
    }
    Ok(out)
}

/// Int8 broadcast subtraction over NCHW shapes.
///
/// Each dim of `b_shape` must equal the matching dim of `a_shape` or be 1.
/// `attrs` carries two multipliers and one shared rshift.
pub fn sub_int8(
    a: &[i8],
    a_shape: [usize; 4],
    b: &[i8],
    b_shape: [usize; 4],
    attrs: &Attributes,
) -> CompileResult<Vec<i8>> {
    check_len("sub lhs", a_shape.iter().product(), a.len())?;
    check_len("sub rhs", b_shape.iter().product(), b.len())?;
    for (da, db) in a_shape.iter().zip(&b_shape) {
        if db != da && *db != 1 {
            return Err(CompileError::ShapeMismatch { what: "sub broadcast dim".to_string(), expected: *da, actual: *db });
        }
    }
    check_len("sub multipliers", 2, attrs.multipliers.len())?;
    check_len("sub rshifts", 1, attrs.rshifts.len())?;
    let (m0, m1, rshift) = (attrs.multipliers[0], attrs.multipliers[1], attrs.rshifts[0]);

    let [_, c, h, w] = a_shape;
    let [_, bc, bh, bw] = b_shape;
    let mut out = Vec::with_capacity(a.len());
    for (idx, &va) in a.iter().enumerate() {
        let (ni, ci, hi, wi) = (idx / (c * h * w), idx / (h * w) % c, idx / w % h, idx % w);
        let bi = (ni % b_shape[0]) * bc * bh * bw + (ci % bc) * bh * bw + (hi % bh) * bw + wi % bw;
        let acc = va as i64 * m0 - b[bi] as i64 * m1;
        let v = saturate_i8(rounding_rshift(acc, rshift) as f64);
        out.push(clamp_relu(v, attrs));
    }
    Ok(out)
}

/// Int8 relu with an optional quantized upper limit.
pub fn relu_int8(input: &[i8], relu_limit: f64) -> Vec<i8> {
    input
        .iter()
        .map(|&v| {
            let v = v.max(0);
            if relu_limit > 0.0 {
                v.min(relu_limit as i8)
            } else {
                v
            }
        })
        .collect()
}

/// Float reference for [`matmul_int8`].
pub fn matmul_f32(input: &[f32], right: &[f32], bias: Option<&[f32]>, m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(m * n);
    for row in 0..m {
        for col in 0..n {
            let dot: f32 = (0..k).map(|i| input[row * k + i] * right[i * n + col]).sum();
            out.push(dot + bias.map_or(0.0, |b| b[col]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RequantMode;

    #[test]
    fn test_rounding_rshift() {
        assert_eq!(rounding_rshift(5, 1), 3);
        assert_eq!(rounding_rshift(-5, 1), -2);
        assert_eq!(rounding_rshift(7, 0), 7);
        assert_eq!(rounding_rshift(1 << 20, 20), 1);
    }

    #[test]
    fn test_matmul_identity() {
        let mut attrs = Attributes::default();
        attrs.set_quant(RequantMode::Identity, &[QuantParam::IDENTITY]);
        let out = matmul_int8(&[1, 2], &[3, 4, 5, 6], None, 1, 1, 2, 2, &attrs).unwrap();
        assert_eq!(out, vec![13, 16]);
    }

    #[test]
    fn test_matmul_saturates_and_relu() {
        let mut attrs = Attributes::default();
        attrs.set_quant(RequantMode::Normal, &[QuantParam::new(1, 0)]);
        attrs.do_relu = true;
        // Two rows of one element: 200 saturates, -200 is cut by relu.
        let out = matmul_int8(&[100, -100], &[2], Some(&[0]), 1, 2, 1, 1, &attrs).unwrap();
        assert_eq!(out, vec![127, 0]);

        attrs.relu_limit = 64.0;
        let out = matmul_int8(&[100, -100], &[2], Some(&[0]), 1, 2, 1, 1, &attrs).unwrap();
        assert_eq!(out, vec![64, 0]);
    }

    #[test]
    fn test_matmul_shape_checked() {
        let attrs = Attributes::default();
        let err = matmul_int8(&[1, 2, 3], &[1, 2], None, 1, 1, 2, 1, &attrs).unwrap_err();
        assert!(matches!(err, CompileError::ShapeMismatch { expected: 2, actual: 3, .. }));
    }

    #[test]
    fn test_sub_broadcast() {
        let mut attrs = Attributes::default();
        attrs.quant_mode = Some(RequantMode::Normal);
        attrs.multipliers = vec![2, 1];
        attrs.rshifts = vec![1];
        let a = [10, 20, 30, 40];
        let b = [4];
        let out = sub_int8(&a, [1, 4, 1, 1], &b, [1, 1, 1, 1], &attrs).unwrap();
        // (2a - 4) / 2
        assert_eq!(out, vec![8, 18, 28, 38]);
    }

    #[test]
    fn test_relu_int8_limit() {
        assert_eq!(relu_int8(&[-5, 3, 100], 64.0), vec![0, 3, 64]);
        assert_eq!(relu_int8(&[-5, 100], 0.0), vec![0, 100]);
    }

    #[test]
    fn test_quantize_dequantize() {
        let q = quantize(&[1.0, -2.0, 4.0], 2.0);
        assert_eq!(q, vec![64, -127, 127]);
        let d = dequantize(&q, 2.0);
        assert!((d[0] - 1.0).abs() < 2.0 / 127.0);
    }
}
