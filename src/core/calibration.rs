//! Calibration thresholds.
//!
//! A [`CalibrationTable`] maps value names to the maximum representable
//! magnitude used for symmetric quantization. It is built once by the caller
//! and passed read-only into every lowering call.

use super::error::{CompileError, CompileResult};
use hashbrown::HashMap;

#[derive(Debug, Clone, Default)]
pub struct CalibrationTable {
    thresholds: HashMap<String, f64>,
}

impl CalibrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, threshold: f64) {
        self.thresholds.insert(name.into(), threshold);
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, threshold: f64) -> Self {
        self.insert(name, threshold);
        self
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.thresholds.get(name).copied()
    }

    /// Threshold for `name`, validated to be finite and strictly positive.
    pub fn threshold(&self, name: &str) -> CompileResult<f64> {
        let th = self
            .get(name)
            .ok_or_else(|| CompileError::MissingThreshold { value: name.to_string() })?;
        if !th.is_finite() || th <= 0.0 {
            return Err(CompileError::InvalidThreshold { value: name.to_string(), threshold: th });
        }
        Ok(th)
    }

    /// Parse a table from `name threshold` lines; `#` starts a comment.
    pub fn parse(text: &str) -> CompileResult<Self> {
        let mut table = Self::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(name), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(CompileError::Parse {
                    line: idx + 1,
                    reason: format!("expected 'name threshold', got '{line}'"),
                });
            };
            let th: f64 = value.parse().map_err(|e| CompileError::Parse {
                line: idx + 1,
                reason: format!("bad threshold '{value}': {e}"),
            })?;
            table.insert(name, th);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_validation() {
        let table = CalibrationTable::new().with("x", 2.0).with("bad", 0.0);
        assert_eq!(table.threshold("x"), Ok(2.0));
        assert!(matches!(table.threshold("bad"), Err(CompileError::InvalidThreshold { .. })));
        assert!(matches!(table.threshold("y"), Err(CompileError::MissingThreshold { .. })));
    }

    #[test]
    fn test_parse_table() {
        let table = CalibrationTable::parse("# thresholds\nx 2.0\ny 10 # output\n\n").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("y"), Some(10.0));

        let err = CalibrationTable::parse("x\n").unwrap_err();
        assert!(matches!(err, CompileError::Parse { line: 1, .. }));
    }
}
