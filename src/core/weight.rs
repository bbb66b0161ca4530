//! Immutable constant tensor storage.
//!
//! Weight buffers are reference counted and never mutated: every lowering step
//! that changes the numeric representation of a constant builds a brand-new
//! buffer and a new constant value in the graph.

use super::error::{CompileError, CompileResult};
use super::types::ElementType;
use half::bf16;
use std::sync::Arc;

/// Typed payload of a constant tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum WeightData {
    F32(Arc<[f32]>),
    I8(Arc<[i8]>),
    I32(Arc<[i32]>),
    BF16(Arc<[bf16]>),
}

impl WeightData {
    pub fn elem(&self) -> ElementType {
        match self {
            WeightData::F32(_) => ElementType::F32,
            WeightData::I8(_) => ElementType::I8,
            WeightData::I32(_) => ElementType::I32,
            WeightData::BF16(_) => ElementType::BF16,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WeightData::F32(d) => d.len(),
            WeightData::I8(d) => d.len(),
            WeightData::I32(d) => d.len(),
            WeightData::BF16(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared read-only view of the buffer as `T`.
    ///
    /// `name` is only used for the error message.
    pub fn read<T: WeightElement>(&self, name: &str) -> CompileResult<Arc<[T]>> {
        T::extract(self).ok_or_else(|| CompileError::WeightType {
            value: name.to_string(),
            expected: T::ELEM,
            actual: self.elem(),
        })
    }

    /// Values widened to `f64`, for printing and reference checks.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            WeightData::F32(d) => d.iter().map(|&v| v as f64).collect(),
            WeightData::I8(d) => d.iter().map(|&v| v as f64).collect(),
            WeightData::I32(d) => d.iter().map(|&v| v as f64).collect(),
            WeightData::BF16(d) => d.iter().map(|v| v.to_f64()).collect(),
        }
    }

    /// Rebuild a buffer of the given element type from `f64` values.
    ///
    /// Used by the graph parser; integer values are truncated toward zero.
    pub fn from_f64(elem: ElementType, values: &[f64]) -> Self {
        match elem {
            ElementType::F32 => WeightData::F32(values.iter().map(|&v| v as f32).collect()),
            ElementType::I8 => WeightData::I8(values.iter().map(|&v| v as i8).collect()),
            ElementType::I32 => WeightData::I32(values.iter().map(|&v| v as i32).collect()),
            ElementType::BF16 => WeightData::BF16(values.iter().map(|&v| bf16::from_f64(v)).collect()),
        }
    }
}

impl From<Vec<f32>> for WeightData {
    fn from(v: Vec<f32>) -> Self {
        WeightData::F32(v.into())
    }
}

impl From<Vec<i8>> for WeightData {
    fn from(v: Vec<i8>) -> Self {
        WeightData::I8(v.into())
    }
}

impl From<Vec<i32>> for WeightData {
    fn from(v: Vec<i32>) -> Self {
        WeightData::I32(v.into())
    }
}

impl From<Vec<bf16>> for WeightData {
    fn from(v: Vec<bf16>) -> Self {
        WeightData::BF16(v.into())
    }
}

/// Element types that can be read out of a [`WeightData`].
pub trait WeightElement: Sized {
    const ELEM: ElementType;
    fn extract(data: &WeightData) -> Option<Arc<[Self]>>;
}

macro_rules! weight_element {
    ($ty:ty, $variant:ident) => {
        impl WeightElement for $ty {
            const ELEM: ElementType = ElementType::$variant;
            fn extract(data: &WeightData) -> Option<Arc<[Self]>> {
                match data {
                    WeightData::$variant(d) => Some(Arc::clone(d)),
                    _ => None,
                }
            }
        }
    };
}

weight_element!(f32, F32);
weight_element!(i8, I8);
weight_element!(i32, I32);
weight_element!(bf16, BF16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_read_shares_buffer() {
        let data = WeightData::from(vec![1.0f32, -2.0, 3.5]);
        let a = data.read::<f32>("w").unwrap();
        let b = data.read::<f32>("w").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(&*a, &[1.0, -2.0, 3.5]);
    }

    #[test]
    fn test_wrong_type_read() {
        let data = WeightData::from(vec![1i8, 2]);
        let err = data.read::<f32>("filter").unwrap_err();
        assert_eq!(
            err,
            CompileError::WeightType {
                value: "filter".to_string(),
                expected: ElementType::F32,
                actual: ElementType::I8,
            }
        );
    }

    #[test]
    fn test_from_f64_bf16() {
        let data = WeightData::from_f64(ElementType::BF16, &[1.5, -0.25]);
        assert_eq!(data.elem(), ElementType::BF16);
        assert_eq!(data.to_f64_vec(), vec![1.5, -0.25]);
    }
}
