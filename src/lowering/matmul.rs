//! MatMul lowering.
//!
//! Two int8 strategies exist. When the right-hand operand is a constant the
//! operator is a fully-connected layer: filter and bias are requantized per
//! batch and replaced by new int8 / int32 constants. When both operands are
//! runtime values a single scalar scale is derived from the three calibration
//! thresholds.

use super::relu::quantize_limit_attr;
use super::{Lowering, LoweringContext};
use crate::core::{
    Attributes, CompileError, CompileResult, ElementType, GraphAdaptor, NumericMode, OpKind,
    QuantParam, RequantMode, TensorType, Warning, WeightData,
};
use crate::quant::{is_unity, ScaleSolver, WeightRequantizer, QMAX_INT8};

/// `[batch, K, N]` view of a right-hand operand shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatMulDims {
    pub batch: usize,
    pub k: usize,
    pub n: usize,
}

impl MatMulDims {
    /// Leading dims fold into the batch, the last two are `K` and `N`.
    pub fn of_right(ty: &TensorType) -> Option<Self> {
        let rank = ty.rank();
        if rank < 2 {
            return None;
        }
        Some(Self {
            batch: ty.shape[..rank - 2].iter().product(),
            k: ty.shape[rank - 2],
            n: ty.shape[rank - 1],
        })
    }
}

/// Scalar scale for a matmul with two runtime operands.
pub fn dynamic_qscale(threshold_left: f64, threshold_right: f64, threshold_output: f64) -> f64 {
    threshold_right * threshold_left / threshold_output / QMAX_INT8
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MatMulLowering {
    requantizer: WeightRequantizer,
}

impl MatMulLowering {
    fn lower_fc<A: GraphAdaptor>(
        &self,
        graph: &mut A,
        op: A::OpRef,
        ctx: &LoweringContext<'_, '_>,
        operands: &[A::ValueRef; 3],
        result_type: TensorType,
    ) -> CompileResult<A::OpRef> {
        let [input, right, bias] = *operands;
        let op_name = graph.op_name(op).to_string();
        let th_output = ctx.threshold(graph, graph.op_result(op))?;
        let th_input = ctx.threshold(graph, input)?;

        let right_type = graph.value_type(right).clone();
        let dims = MatMulDims::of_right(&right_type).ok_or_else(|| CompileError::InvalidOperand {
            op: op_name.clone(),
            reason: format!("right operand must have rank >= 2, got {}", right_type.rank()),
        })?;
        let input_k = graph.value_type(input).shape.last().copied().unwrap_or(1);
        if input_k != dims.k {
            return Err(CompileError::ShapeMismatch {
                what: format!("inner dimension of '{op_name}'"),
                expected: dims.k,
                actual: input_k,
            });
        }

        let filter = weight_f32(graph, right)?;
        let bias_f32 = if bias == A::NONE_VALUE {
            None
        } else if graph.is_weight(bias) {
            Some(weight_f32(graph, bias)?)
        } else {
            return Err(CompileError::InvalidOperand {
                op: op_name,
                reason: format!("bias '{}' of a constant filter must be constant", graph.value_name(bias)),
            });
        };

        let out = self.requantizer.requantize_fc(
            &filter,
            bias_f32.as_deref(),
            dims.batch,
            dims.n,
            dims.k,
            th_output,
            th_input,
        )?;
        for adj in &out.adjustments {
            ctx.session.warn(Warning::PrecisionAdjusted {
                op: op_name.clone(),
                batch: adj.batch,
                qscale_filter: adj.qscale_filter,
                qscale_bias: adj.qscale_bias,
            });
        }
        log::debug!(
            "'{op_name}': fc path, batch = {}, multipliers = {:?}",
            dims.batch,
            out.params.iter().map(|p| p.multiplier).collect::<Vec<_>>()
        );

        let mut attrs = graph.op_attrs(op).clone();
        attrs.set_quant(RequantMode::Normal, &out.params);
        quantize_limit_attr(&mut attrs, th_output);

        // Nothing below can fail.
        let new_right = graph.create_weight(
            op,
            "filter_i8",
            WeightData::from(out.filter),
            right_type.with_elem(ElementType::I8),
        );
        let new_bias = match out.bias {
            Some(qbias) => {
                let bias_type = graph.value_type(bias).with_elem(ElementType::I32);
                graph.create_weight(op, "bias_int32", WeightData::from(qbias), bias_type)
            }
            None => A::NONE_VALUE,
        };
        Ok(graph.replace_op(op, OpKind::MatMul, vec![input, new_right, new_bias], attrs, result_type))
    }

    fn lower_dynamic<A: GraphAdaptor>(
        &self,
        graph: &mut A,
        op: A::OpRef,
        ctx: &LoweringContext<'_, '_>,
        operands: &[A::ValueRef; 3],
        result_type: TensorType,
    ) -> CompileResult<A::OpRef> {
        let [input, right, bias] = *operands;
        let th_output = ctx.threshold(graph, graph.op_result(op))?;
        let th_input = ctx.threshold(graph, input)?;
        let th_right = ctx.threshold(graph, right)?;
        let qscale = dynamic_qscale(th_input, th_right, th_output);

        let mut attrs: Attributes = graph.op_attrs(op).clone();
        quantize_limit_attr(&mut attrs, th_output);
        if is_unity(qscale, ctx.config.unity_tolerance) {
            log::debug!("'{}': qscale {qscale} is identity", graph.op_name(op));
            attrs.set_quant(RequantMode::Identity, &[QuantParam::IDENTITY]);
            ctx.session.record_identity_shortcut();
        } else {
            let param = ScaleSolver::SIGNED_32.solve(qscale)?;
            log::debug!(
                "'{}': dynamic path, qscale = {qscale}, multiplier = {}, rshift = {}",
                graph.op_name(op),
                param.multiplier,
                param.rshift
            );
            attrs.set_quant(RequantMode::Normal, &[param]);
        }
        Ok(graph.replace_op(op, OpKind::MatMul, vec![input, right, bias], attrs, result_type))
    }
}

fn weight_f32<A: GraphAdaptor>(graph: &A, value: A::ValueRef) -> CompileResult<std::sync::Arc<[f32]>> {
    let name = graph.value_name(value);
    match graph.weight_data(value) {
        Some(data) => data.read::<f32>(name),
        None => Err(CompileError::InvalidOperand {
            op: name.to_string(),
            reason: "expected a constant".to_string(),
        }),
    }
}

impl<A: GraphAdaptor> Lowering<A> for MatMulLowering {
    fn kind(&self) -> OpKind {
        OpKind::MatMul
    }

    fn lower_int8(
        &self,
        graph: &mut A,
        op: A::OpRef,
        ctx: &LoweringContext<'_, '_>,
        asymmetric: bool,
    ) -> CompileResult<A::OpRef> {
        let mut operands: Vec<_> = graph.op_operands(op).collect();
        if !(2..=3).contains(&operands.len()) {
            return Err(CompileError::ShapeMismatch {
                what: format!("matmul operands of '{}'", graph.op_name(op)),
                expected: 3,
                actual: operands.len(),
            });
        }
        operands.resize(3, A::NONE_VALUE);
        let operands = [operands[0], operands[1], operands[2]];
        let result_type = graph.value_type(graph.op_result(op)).quant_int8(asymmetric);

        if graph.is_weight(operands[1]) {
            self.lower_fc(graph, op, ctx, &operands, result_type)
        } else {
            self.lower_dynamic(graph, op, ctx, &operands, result_type)
        }
    }

    fn lower_bf16(&self, _graph: &mut A, _op: A::OpRef, _ctx: &LoweringContext<'_, '_>) -> CompileResult<A::OpRef> {
        Err(CompileError::LoweringNotImplemented { op: OpKind::MatMul, mode: NumericMode::Bf16 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CalibrationTable, CompilationSession};
    use crate::graph_ir::Graph;
    use crate::lowering::LoweringConfig;
    use bumpalo::Bump;

    fn fc_graph(bias: &str) -> Graph {
        Graph::parse(&format!(
            "%x = input f32 [1, 3]\n\
             %w = weight f32 [3, 2] [1, -2, 0.5, 0.25, 0.3, -1]\n\
             %b = weight f32 [2] [{bias}]\n\
             %y = matmul %x, %w, %b : f32 [1, 2]\n"
        ))
        .unwrap()
    }

    #[test]
    fn test_fc_path_creates_constants() {
        let mut g = fc_graph("0.5, -0.5");
        let cal = CalibrationTable::new().with("x", 2.0).with("y", 10.0);
        let config = LoweringConfig::default();
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let ctx = LoweringContext::new(&cal, &config, &session);

        let op = g.op_by_name("y").unwrap();
        let new_op = MatMulLowering::default().lower_int8(&mut g, op, &ctx, false).unwrap();

        let operands: Vec<_> = g.op_operands(new_op).collect();
        assert_eq!(g.value_name(operands[1]), "y_filter_i8");
        assert_eq!(g.value_name(operands[2]), "y_bias_int32");
        assert_eq!(g.value_type(operands[1]).elem, ElementType::I8);
        assert_eq!(g.value_type(operands[2]).elem, ElementType::I32);
        assert_eq!(g.value_type(g.op_result(new_op)).elem, ElementType::I8);

        let attrs = g.op_attrs(new_op);
        assert_eq!(attrs.quant_mode, Some(RequantMode::Normal));
        assert_eq!(attrs.multipliers.len(), 1);
        assert_eq!(attrs.rshifts.len(), 1);
    }

    #[test]
    fn test_dynamic_path_single_scale() {
        let mut g = Graph::parse(
            "%a = input f32 [2, 3]\n\
             %b = input f32 [3, 4]\n\
             %y = matmul %a, %b, none : f32 [2, 4]\n",
        )
        .unwrap();
        let cal = CalibrationTable::new().with("a", 4.0).with("b", 2.0).with("y", 8.0);
        let config = LoweringConfig::default();
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let ctx = LoweringContext::new(&cal, &config, &session);

        let op = g.op_by_name("y").unwrap();
        let new_op = MatMulLowering::default().lower_int8(&mut g, op, &ctx, true).unwrap();
        let attrs = g.op_attrs(new_op);
        let expected = ScaleSolver::SIGNED_32.solve(4.0 * 2.0 / 8.0 / 127.0).unwrap();
        assert_eq!(attrs.quant_params(), Some(vec![expected]));
        assert!(g.value_type(g.op_result(new_op)).asymmetric);
        assert_eq!(session.stats().identity_shortcuts, 0);
    }

    #[test]
    fn test_dynamic_identity_shortcut() {
        let mut g = Graph::parse(
            "%a = input f32 [1, 2]\n\
             %b = input f32 [2, 1]\n\
             %y = matmul %a, %b : f32 [1, 1]\n",
        )
        .unwrap();
        // 127 * 1 / 1 / 127 == 1
        let cal = CalibrationTable::new().with("a", 127.0).with("b", 1.0).with("y", 1.0);
        let config = LoweringConfig::default();
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let ctx = LoweringContext::new(&cal, &config, &session);

        let op = g.op_by_name("y").unwrap();
        let new_op = MatMulLowering::default().lower_int8(&mut g, op, &ctx, false).unwrap();
        let attrs = g.op_attrs(new_op);
        assert!(attrs.is_identity());
        assert_eq!(attrs.multipliers, vec![1]);
        assert_eq!(attrs.rshifts, vec![0]);
        assert_eq!(g.op_operands(new_op).count(), 3);
        assert_eq!(session.stats().identity_shortcuts, 1);
    }

    #[test]
    fn test_bf16_not_implemented() {
        let mut g = fc_graph("0, 0");
        let cal = CalibrationTable::new();
        let config = LoweringConfig { mode: NumericMode::Bf16, ..Default::default() };
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let ctx = LoweringContext::new(&cal, &config, &session);

        let before = g.clone();
        let op = g.op_by_name("y").unwrap();
        let err = MatMulLowering::default().lower(&mut g, op, &ctx).unwrap_err();
        assert_eq!(
            err,
            CompileError::LoweringNotImplemented { op: OpKind::MatMul, mode: NumericMode::Bf16 }
        );
        assert_eq!(g, before);
    }

    #[test]
    fn test_inner_dimension_checked() {
        let mut g = Graph::parse(
            "%x = input f32 [1, 4]\n\
             %w = weight f32 [3, 1] [1, 2, 3]\n\
             %y = matmul %x, %w, none : f32 [1, 1]\n",
        )
        .unwrap();
        let cal = CalibrationTable::new().with("x", 1.0).with("y", 1.0);
        let config = LoweringConfig::default();
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let ctx = LoweringContext::new(&cal, &config, &session);

        let op = g.op_by_name("y").unwrap();
        let err = MatMulLowering::default().lower_int8(&mut g, op, &ctx, false).unwrap_err();
        assert!(matches!(err, CompileError::ShapeMismatch { expected: 3, actual: 4, .. }));
    }

    #[test]
    fn test_dims_of_right() {
        let ty = TensorType::new(vec![2, 3, 4, 5], ElementType::F32);
        assert_eq!(MatMulDims::of_right(&ty), Some(MatMulDims { batch: 6, k: 4, n: 5 }));
        assert_eq!(MatMulDims::of_right(&TensorType::new(vec![5], ElementType::F32)), None);
    }
}
