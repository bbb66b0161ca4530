//! Relu lowering. Relu output shares the input threshold, so no scale is needed.

use super::{operands_exact, Lowering, LoweringContext};
use crate::core::{Attributes, CompileResult, ElementType, GraphAdaptor, OpKind};
use crate::quant::QMAX_INT8;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReluLowering;

/// Map a float clamp limit into the int8 domain of a tensor with `threshold`.
pub fn quantize_relu_limit(limit: f64, threshold: f64) -> f64 {
    (limit * QMAX_INT8 / threshold).round().min(QMAX_INT8)
}

/// Move a positive `relu_limit` of `attrs` into the int8 domain of the op output.
pub(crate) fn quantize_limit_attr(attrs: &mut Attributes, threshold: f64) {
    if attrs.relu_limit > 0.0 {
        attrs.relu_limit = quantize_relu_limit(attrs.relu_limit, threshold);
    }
}

impl<A: GraphAdaptor> Lowering<A> for ReluLowering {
    fn kind(&self) -> OpKind {
        OpKind::Relu
    }

    fn lower_int8(
        &self,
        graph: &mut A,
        op: A::OpRef,
        ctx: &LoweringContext<'_, '_>,
        asymmetric: bool,
    ) -> CompileResult<A::OpRef> {
        let operands = operands_exact(graph, op, 1)?;
        let th_input = ctx.threshold(graph, operands[0])?;

        let mut attrs = graph.op_attrs(op).clone();
        quantize_limit_attr(&mut attrs, th_input);
        let result_type = graph.value_type(graph.op_result(op)).quant_int8(asymmetric);
        Ok(graph.replace_op(op, OpKind::Relu, operands, attrs, result_type))
    }

    fn lower_bf16(&self, graph: &mut A, op: A::OpRef, _ctx: &LoweringContext<'_, '_>) -> CompileResult<A::OpRef> {
        let operands = operands_exact(graph, op, 1)?;
        let attrs = graph.op_attrs(op).clone();
        let result_type = graph.value_type(graph.op_result(op)).with_elem(ElementType::BF16);
        Ok(graph.replace_op(op, OpKind::Relu, operands, attrs, result_type))
    }
}
