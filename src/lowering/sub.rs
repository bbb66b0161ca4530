//! Elementwise subtraction lowering.
//!
//! Int8 subtraction rescales each input by `threshold_in / threshold_out`.
//! The kernel applies one right shift to both products, so both multipliers
//! are solved against a single shared shift in the signed 8-bit range.

use super::relu::quantize_limit_attr;
use super::{operands_exact, Lowering, LoweringContext};
use crate::core::{
    CompileResult, ElementType, GraphAdaptor, OpKind, RequantMode, WeightData,
};
use crate::quant::{saturate_i8, ScaleSolver, QMAX_INT8};
use half::bf16;

#[derive(Debug, Default, Clone, Copy)]
pub struct SubLowering;

impl<A: GraphAdaptor> Lowering<A> for SubLowering {
    fn kind(&self) -> OpKind {
        OpKind::Sub
    }

    fn lower_int8(
        &self,
        graph: &mut A,
        op: A::OpRef,
        ctx: &LoweringContext<'_, '_>,
        asymmetric: bool,
    ) -> CompileResult<A::OpRef> {
        let operands = operands_exact(graph, op, 2)?;
        let th_output = ctx.threshold(graph, graph.op_result(op))?;

        let mut qscales = Vec::with_capacity(operands.len());
        let mut constants = Vec::new();
        for (i, &value) in operands.iter().enumerate() {
            let th = ctx.threshold(graph, value)?;
            qscales.push(th / th_output);
            if let Some(data) = graph.weight_data(value) {
                let src = data.read::<f32>(graph.value_name(value))?;
                let q: Vec<i8> = src.iter().map(|&v| saturate_i8(v as f64 * QMAX_INT8 / th)).collect();
                constants.push((i, q));
            }
        }
        let (multipliers, rshift) = ScaleSolver::SIGNED_8.solve_shared(&qscales)?;
        log::debug!(
            "'{}': sub qscales = {qscales:?}, multipliers = {multipliers:?}, rshift = {rshift}",
            graph.op_name(op)
        );

        let mut attrs = graph.op_attrs(op).clone();
        attrs.quant_mode = Some(RequantMode::Normal);
        attrs.multipliers = multipliers;
        attrs.rshifts = vec![rshift];
        quantize_limit_attr(&mut attrs, th_output);
        let result_type = graph.value_type(graph.op_result(op)).quant_int8(asymmetric);

        let mut new_operands = operands;
        for (i, q) in constants {
            let ty = graph.value_type(new_operands[i]).quant_int8(false);
            new_operands[i] = graph.create_weight(op, &format!("in{i}_i8"), WeightData::from(q), ty);
        }
        Ok(graph.replace_op(op, OpKind::Sub, new_operands, attrs, result_type))
    }

    fn lower_bf16(&self, graph: &mut A, op: A::OpRef, _ctx: &LoweringContext<'_, '_>) -> CompileResult<A::OpRef> {
        let operands = operands_exact(graph, op, 2)?;

        let mut constants = Vec::new();
        for (i, &value) in operands.iter().enumerate() {
            if let Some(data) = graph.weight_data(value) {
                let src = data.read::<f32>(graph.value_name(value))?;
                let converted: Vec<bf16> = src.iter().map(|&v| bf16::from_f32(v)).collect();
                constants.push((i, converted));
            }
        }

        let attrs = graph.op_attrs(op).clone();
        let result_type = graph.value_type(graph.op_result(op)).with_elem(ElementType::BF16);

        let mut new_operands = operands;
        for (i, data) in constants {
            let ty = graph.value_type(new_operands[i]).with_elem(ElementType::BF16);
            new_operands[i] = graph.create_weight(op, &format!("in{i}_bf16"), WeightData::from(data), ty);
        }
        Ok(graph.replace_op(op, OpKind::Sub, new_operands, attrs, result_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CalibrationTable, CompilationSession, CompileError, NumericMode};
    use crate::graph_ir::Graph;
    use crate::lowering::LoweringConfig;
    use bumpalo::Bump;

    #[test]
    fn test_int8_shared_rshift() {
        let mut g = Graph::parse(
            "%a = input f32 [1, 4]\n\
             %b = input f32 [1, 4]\n\
             %c = sub %a, %b {do_relu = true, relu_limit = 6} : f32 [1, 4]\n",
        )
        .unwrap();
        let cal = CalibrationTable::new().with("a", 4.0).with("b", 2.0).with("c", 8.0);
        let config = LoweringConfig::default();
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let ctx = LoweringContext::new(&cal, &config, &session);

        let op = g.op_by_name("c").unwrap();
        let new_op = SubLowering.lower_int8(&mut g, op, &ctx, false).unwrap();
        let attrs = g.op_attrs(new_op);
        // qscales 0.5 and 0.25 share rshift 7.
        assert_eq!(attrs.multipliers, vec![64, 32]);
        assert_eq!(attrs.rshifts, vec![7]);
        assert!(attrs.do_relu);
        // 6 * 127 / 8
        assert_eq!(attrs.relu_limit, 95.0);
        assert_eq!(attrs.quant_params(), None);
    }

    #[test]
    fn test_int8_constant_operand_quantized() {
        let mut g = Graph::parse(
            "%a = input f32 [1, 2]\n\
             %k = weight f32 [1, 2] [1, -0.5]\n\
             %c = sub %a, %k : f32 [1, 2]\n",
        )
        .unwrap();
        let cal = CalibrationTable::new().with("a", 2.0).with("k", 1.0).with("c", 2.0);
        let config = LoweringConfig::default();
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let ctx = LoweringContext::new(&cal, &config, &session);

        let op = g.op_by_name("c").unwrap();
        let new_op = SubLowering.lower_int8(&mut g, op, &ctx, false).unwrap();
        let k = g.op_operands(new_op).nth(1).unwrap();
        assert_eq!(g.value_name(k), "c_in1_i8");
        let data = g.weight_data(k).unwrap().read::<i8>("k").unwrap();
        assert_eq!(&*data, &[127, -64]);
    }

    #[test]
    fn test_bf16_retypes() {
        let mut g = Graph::parse(
            "%a = input f32 [1, 2]\n\
             %k = weight f32 [1, 2] [1.5, -0.25]\n\
             %c = sub %a, %k : f32 [1, 2]\n",
        )
        .unwrap();
        let cal = CalibrationTable::new();
        let config = LoweringConfig { mode: NumericMode::Bf16, ..Default::default() };
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let ctx = LoweringContext::new(&cal, &config, &session);

        let op = g.op_by_name("c").unwrap();
        let new_op = SubLowering.lower(&mut g, op, &ctx).unwrap();
        assert_eq!(g.value_type(g.op_result(new_op)).elem, ElementType::BF16);
        let k = g.op_operands(new_op).nth(1).unwrap();
        assert_eq!(g.weight_data(k).unwrap().to_f64_vec(), vec![1.5, -0.25]);
        assert!(g.op_attrs(new_op).quant_mode.is_none());
    }

    #[test]
    fn test_arity_checked() {
        let mut g = Graph::parse(
            "%a = input f32 [2]\n\
             %c = sub %a : f32 [2]\n",
        )
        .unwrap();
        let cal = CalibrationTable::new().with("a", 1.0).with("c", 1.0);
        let config = LoweringConfig::default();
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let ctx = LoweringContext::new(&cal, &config, &session);

        let op = g.op_by_name("c").unwrap();
        let err = SubLowering.lower_int8(&mut g, op, &ctx, false).unwrap_err();
        assert!(matches!(err, CompileError::ShapeMismatch { expected: 2, actual: 1, .. }));
    }
}
