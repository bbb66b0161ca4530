// This module rewrites floating-point graph operators into their quantized hardware-dialect
// equivalents. Each operator kind has a lowering pattern implementing the Lowering trait with
// one entry point per numeric mode. A pattern reads operands and calibration thresholds
// through the GraphAdaptor, computes every new constant and every quantization parameter up
// front, and only then touches the graph: it creates the replacement constants and swaps the
// old operator for the new one with a single replace_op call. Any error therefore leaves the
// graph exactly as it was. LoweringPass walks the graph in scheduling order and applies the
// registered pattern for each operator that is not lowered yet.

//! Operator lowering from float graphs to int8 / bf16 hardware operators.
//!
//! Calibration thresholds, configuration and the session are bundled in a
//! [`LoweringContext`] and passed explicitly into every pattern call.

use crate::core::{
    CalibrationTable, CompilationSession, CompileError, CompileResult, GraphAdaptor, NumericMode,
    OpKind,
};
use crate::quant::UNITY_TOLERANCE;
use hashbrown::HashMap;

pub mod matmul;
pub mod relu;
pub mod sub;

pub use matmul::MatMulLowering;
pub use relu::ReluLowering;
pub use sub::SubLowering;

/// Lowering options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoweringConfig {
    pub mode: NumericMode,
    /// Produce asymmetric int8 result types.
    pub asymmetric: bool,
    /// Relative distance from 1.0 below which a scale is treated as identity.
    pub unity_tolerance: f64,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            mode: NumericMode::Int8,
            asymmetric: false,
            unity_tolerance: UNITY_TOLERANCE,
        }
    }
}

/// Read-only inputs shared by every lowering call.
pub struct LoweringContext<'a, 'arena> {
    pub calibration: &'a CalibrationTable,
    pub config: &'a LoweringConfig,
    pub session: &'a CompilationSession<'arena>,
}

impl<'a, 'arena> LoweringContext<'a, 'arena> {
    pub fn new(
        calibration: &'a CalibrationTable,
        config: &'a LoweringConfig,
        session: &'a CompilationSession<'arena>,
    ) -> Self {
        Self { calibration, config, session }
    }

    /// Calibration threshold of a graph value, looked up by name.
    pub fn threshold<A: GraphAdaptor>(&self, graph: &A, value: A::ValueRef) -> CompileResult<f64> {
        self.calibration.threshold(graph.value_name(value))
    }
}

/// A rewrite pattern for one operator kind.
///
/// Both entry points either return the replacement operator or an error; on
/// error the graph has not been modified.
pub trait Lowering<A: GraphAdaptor> {
    fn kind(&self) -> OpKind;

    fn lower_int8(
        &self,
        graph: &mut A,
        op: A::OpRef,
        ctx: &LoweringContext<'_, '_>,
        asymmetric: bool,
    ) -> CompileResult<A::OpRef>;

    fn lower_bf16(&self, graph: &mut A, op: A::OpRef, ctx: &LoweringContext<'_, '_>) -> CompileResult<A::OpRef>;

    /// Lower with the numeric mode selected in the context.
    fn lower(&self, graph: &mut A, op: A::OpRef, ctx: &LoweringContext<'_, '_>) -> CompileResult<A::OpRef> {
        match ctx.config.mode {
            NumericMode::Int8 => self.lower_int8(graph, op, ctx, ctx.config.asymmetric),
            NumericMode::Bf16 => self.lower_bf16(graph, op, ctx),
        }
    }
}

/// Operands of `op`, checked to be exactly `expected` long.
pub(crate) fn operands_exact<A: GraphAdaptor>(
    graph: &A,
    op: A::OpRef,
    expected: usize,
) -> CompileResult<Vec<A::ValueRef>> {
    let operands: Vec<_> = graph.op_operands(op).collect();
    if operands.len() != expected {
        return Err(CompileError::ShapeMismatch {
            what: format!("{} operands of '{}'", graph.op_kind(op), graph.op_name(op)),
            expected,
            actual: operands.len(),
        });
    }
    Ok(operands)
}

/// Applies registered patterns to every float operator of a graph.
pub struct LoweringPass<A: GraphAdaptor> {
    patterns: HashMap<OpKind, Box<dyn Lowering<A>>>,
}

impl<A: GraphAdaptor> Default for LoweringPass<A> {
    fn default() -> Self {
        let mut pass = Self::empty();
        pass.register(Box::new(MatMulLowering::default()));
        pass.register(Box::new(SubLowering));
        pass.register(Box::new(ReluLowering));
        pass
    }
}

impl<A: GraphAdaptor> LoweringPass<A> {
    /// A pass with no patterns registered.
    pub fn empty() -> Self {
        Self { patterns: HashMap::new() }
    }

    pub fn register(&mut self, pattern: Box<dyn Lowering<A>>) {
        self.patterns.insert(pattern.kind(), pattern);
    }

    pub fn has_pattern(&self, kind: OpKind) -> bool {
        self.patterns.contains_key(&kind)
    }

    /// Lower a single operator.
    pub fn lower_op(&self, graph: &mut A, op: A::OpRef, ctx: &LoweringContext<'_, '_>) -> CompileResult<A::OpRef> {
        let kind = graph.op_kind(op);
        let pattern = self.patterns.get(&kind).ok_or(CompileError::LoweringNotImplemented {
            op: kind,
            mode: ctx.config.mode,
        })?;
        let name = ctx.session.intern_str(graph.op_name(op));
        log::debug!("lowering {kind} '{name}' to {}", ctx.config.mode);

        let new_op = pattern.lower(graph, op, ctx)?;
        ctx.session.record_op_lowered(match ctx.config.mode {
            NumericMode::Int8 => "int8",
            NumericMode::Bf16 => "bf16",
        });
        Ok(new_op)
    }

    /// Lower every operator that is not lowered yet, in scheduling order.
    ///
    /// Stops at the first error; operators lowered before it stay lowered.
    /// Returns the number of operators rewritten.
    pub fn run(&self, graph: &mut A, ctx: &LoweringContext<'_, '_>) -> CompileResult<usize> {
        let pending: Vec<A::OpRef> = graph.ops().filter(|&op| !graph.op_is_lowered(op)).collect();
        for &op in &pending {
            self.lower_op(graph, op, ctx)?;
        }
        log::info!("lowered {} ops to {}", pending.len(), ctx.config.mode);
        Ok(pending.len())
    }
}
