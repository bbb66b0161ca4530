use crate::backend::{CodegenHandler, DispatchKey, Instruction, InstructionStream, OpView};
use crate::core::{Capability, CompileError, CompileResult, NumericMode};
use crate::lowering::matmul::MatMulDims;

/// Global int8 fully-connected kernel. Nothing else is implemented.
#[derive(Debug, Default, Clone, Copy)]
pub struct MatMulCodegen;

impl CodegenHandler for MatMulCodegen {
    fn emit_global(
        &self,
        key: DispatchKey,
        op: &OpView,
        layer_id: u32,
        out: &mut InstructionStream,
    ) -> CompileResult<()> {
        if key.mode != NumericMode::Int8 {
            return Err(key.unsupported(Capability::EmitGlobal));
        }
        op.require_quant()?;

        let input = op.operand(0)?;
        let right = op.operand(1)?;
        let bias = op.optional_operand(2);
        let dims = MatMulDims::of_right(&right.ty).ok_or_else(|| CompileError::InvalidOperand {
            op: op.name.clone(),
            reason: format!("right operand '{}' must have rank >= 2", right.name),
        })?;
        let m = input.ty.num_elements() / (dims.batch * dims.k).max(1);

        out.push(Instruction::TgInt8Fc {
            layer_id,
            ga_input: input.address,
            ga_filter: right.address,
            ga_bias: bias.map(|b| b.address),
            ga_output: op.result.address,
            batch: dims.batch,
            m,
            k: dims.k,
            n: dims.n,
            do_relu: op.attrs.do_relu,
            weight: right.is_weight,
            multipliers: op.attrs.multipliers.clone(),
            rshifts: op.attrs.rshifts.clone(),
        });
        Ok(())
    }
}
