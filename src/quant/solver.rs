//! Fixed-point scale solver.
//!
//! Approximates a real scale ratio `qscale` as `multiplier / 2^rshift`. The
//! right shift is maximised (more fractional precision) subject to the
//! rounded multiplier fitting the destination multiplier range.

use crate::core::{CompileError, CompileResult, QuantParam};

/// Largest right shift any target accepts.
pub const MAX_RSHIFT: u32 = 31;

/// Relative tolerance for treating a scale ratio as exactly one.
pub const UNITY_TOLERANCE: f64 = 1e-5;

/// Whether `qscale` is within `tolerance` of 1.0.
pub fn is_unity(qscale: f64, tolerance: f64) -> bool {
    (qscale - 1.0).abs() <= tolerance
}

/// Multiplier range and shift budget of a destination parameter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleSolver {
    bit_width: u32,
    signed: bool,
    max_rshift: u32,
}

impl ScaleSolver {
    /// Unsigned 8-bit per-channel multiplier table (fully-connected weights).
    pub const UNSIGNED_TABLE: ScaleSolver = ScaleSolver::new(8, false, MAX_RSHIFT);

    /// Full signed 32-bit multiplier, used for scalar requantization.
    pub const SIGNED_32: ScaleSolver = ScaleSolver::new(32, true, MAX_RSHIFT);

    /// Signed 8-bit multipliers of elementwise kernels.
    pub const SIGNED_8: ScaleSolver = ScaleSolver::new(8, true, MAX_RSHIFT);

    pub const fn new(bit_width: u32, signed: bool, max_rshift: u32) -> Self {
        Self { bit_width, signed, max_rshift }
    }

    pub const fn bit_width(&self) -> u32 {
        self.bit_width
    }

    pub const fn max_rshift(&self) -> u32 {
        self.max_rshift
    }

    /// Largest representable multiplier.
    pub const fn max_multiplier(&self) -> i64 {
        if self.signed {
            (1i64 << (self.bit_width - 1)) - 1
        } else {
            (1i64 << self.bit_width) - 1
        }
    }

    /// Bound on `|m / 2^r - qscale| / qscale` whenever `r < max_rshift`.
    ///
    /// If a larger shift had not fit, `qscale * 2^(r+1) >= max + 0.5`, so the
    /// rounding error of at most one half is relative to at least `(max + 0.5) / 2`.
    pub fn tolerance(&self) -> f64 {
        1.0 / (self.max_multiplier() as f64 + 0.5)
    }

    /// Decompose `qscale` into a multiplier and right shift.
    ///
    /// A zero scale yields the exact zero pair. Fails with
    /// [`CompileError::Overflow`] if even `rshift = 0` does not fit, and with
    /// [`CompileError::Underflow`] if a non-zero scale rounds to multiplier 0.
    pub fn solve(&self, qscale: f64) -> CompileResult<QuantParam> {
        if !qscale.is_finite() || qscale < 0.0 {
            return Err(CompileError::InvalidScale { qscale });
        }
        if qscale == 0.0 {
            return Ok(QuantParam::ZERO);
        }

        let max = self.max_multiplier();
        for rshift in (0..=self.max_rshift).rev() {
            let multiplier = (qscale * 2f64.powi(rshift as i32)).round();
            if multiplier <= max as f64 {
                if multiplier == 0.0 {
                    return Err(CompileError::Underflow { qscale, max_rshift: self.max_rshift });
                }
                return Ok(QuantParam::new(multiplier as i64, rshift as i64));
            }
        }

        Err(CompileError::Overflow {
            qscale,
            bit_width: self.bit_width,
            max_rshift: self.max_rshift,
        })
    }

    /// Solve several scales that must share one right shift.
    ///
    /// The shift is chosen for the largest scale so that every multiplier fits.
    pub fn solve_shared(&self, qscales: &[f64]) -> CompileResult<(Vec<i64>, i64)> {
        let mut largest = 0.0f64;
        for &q in qscales {
            if !q.is_finite() || q < 0.0 {
                return Err(CompileError::InvalidScale { qscale: q });
            }
            largest = largest.max(q);
        }

        let rshift = self.solve(largest)?.rshift;
        let multipliers = qscales
            .iter()
            .map(|&q| (q * 2f64.powi(rshift as i32)).round() as i64)
            .collect();
        Ok((multipliers, rshift))
    }
}
