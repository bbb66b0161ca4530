// This module defines the GraphAdaptor trait, the boundary between tpuc and whatever
// graph intermediate representation the surrounding compiler uses. The core never owns
// operator nodes itself: it asks the adaptor for the operators in scheduling order, their
// kind, operands, result and attributes, the type and global address of every value, and
// the payload of constant weight tensors. The write side is small: a lowering
// pattern may create new named constant tensors and then replace exactly one operator with
// its quantized equivalent in a single call. Graph traversal, pattern matching and storage
// of the original model stay on the other side of this trait.

//! GraphAdaptor responsibilities.
//!
//! The adaptor is the glue between tpuc and the caller's graph IR. The
//! framework assumes:
//! - Every operator produces exactly one result value.
//! - Operands are ordered; an absent optional operand (e.g. a missing bias)
//!   is represented by [`GraphAdaptor::NONE_VALUE`].
//! - Constant weights are values without a defining operator whose payload
//!   can be read through [`GraphAdaptor::weight_data`].
//! - [`GraphAdaptor::replace_op`] is atomic: afterwards every use of the old
//!   result refers to the new result and the old operator is gone.
//! - An `OpRef` is only valid while its operator is live. Passing the ref of
//!   a replaced operator is a caller bug, and implementations may panic.

use super::types::{Attributes, OpKind, TensorType};
use super::weight::WeightData;

/// Bridge between a graph IR and tpuc.
pub trait GraphAdaptor {
    type ValueRef: Copy + Eq + core::hash::Hash + core::fmt::Debug;
    type OpRef: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Placeholder for an absent optional operand.
    const NONE_VALUE: Self::ValueRef;

    /// Operators in scheduling order.
    fn ops(&self) -> Box<dyn Iterator<Item = Self::OpRef> + '_>;

    fn op_kind(&self, op: Self::OpRef) -> OpKind;

    /// Unique name of the operator, also the name of its result value.
    fn op_name(&self, op: Self::OpRef) -> &str;

    /// Whether the operator already lives in the quantized (hardware) dialect.
    fn op_is_lowered(&self, op: Self::OpRef) -> bool;

    /// Iterator over the operands of an operator, `NONE_VALUE` included.
    fn op_operands(&self, op: Self::OpRef) -> Box<dyn Iterator<Item = Self::ValueRef> + '_>;

    fn op_result(&self, op: Self::OpRef) -> Self::ValueRef;

    fn op_attrs(&self, op: Self::OpRef) -> &Attributes;

    fn value_name(&self, val: Self::ValueRef) -> &str;

    fn value_type(&self, val: Self::ValueRef) -> &TensorType;

    /// Offset of the value in the flat global address space.
    fn value_address(&self, val: Self::ValueRef) -> u64;

    /// Payload of a constant value, `None` for runtime values.
    fn weight_data(&self, val: Self::ValueRef) -> Option<&WeightData>;

    /// Whether the value is a compile-time constant.
    fn is_weight(&self, val: Self::ValueRef) -> bool {
        self.weight_data(val).is_some()
    }

    /// Create a new named constant next to `op`; the name is `<op>_<suffix>`.
    fn create_weight(
        &mut self,
        op: Self::OpRef,
        suffix: &str,
        data: WeightData,
        ty: TensorType,
    ) -> Self::ValueRef;

    /// Replace `op` with a lowered operator of the given kind.
    ///
    /// The new operator keeps the name of the old one so calibration and
    /// downstream references stay valid.
    fn replace_op(
        &mut self,
        op: Self::OpRef,
        kind: OpKind,
        operands: Vec<Self::ValueRef>,
        attrs: Attributes,
        result_type: TensorType,
    ) -> Self::OpRef;
}
