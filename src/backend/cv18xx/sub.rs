use crate::backend::{CodegenHandler, DispatchKey, Instruction, InstructionStream, OpView};
use crate::core::{CompileError, CompileResult, NumericMode};

/// Global broadcast subtraction; tiled execution is not implemented.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubCodegen;

impl CodegenHandler for SubCodegen {
    fn emit_global(
        &self,
        key: DispatchKey,
        op: &OpView,
        layer_id: u32,
        out: &mut InstructionStream,
    ) -> CompileResult<()> {
        if op.operands.len() != 2 {
            return Err(CompileError::ShapeMismatch {
                what: format!("sub operands of '{}'", op.name),
                expected: 2,
                actual: op.operands.len(),
            });
        }
        let a = op.operand(0)?;
        let b = op.operand(1)?;

        let inst = match key.mode {
            NumericMode::Int8 => {
                op.require_quant()?;
                if op.attrs.multipliers.len() != 2 {
                    return Err(CompileError::ShapeMismatch {
                        what: format!("multipliers of '{}'", op.name),
                        expected: 2,
                        actual: op.attrs.multipliers.len(),
                    });
                }
                Instruction::TgInt8BcastSub {
                    layer_id,
                    ga_a: a.address,
                    ga_b: b.address,
                    ga_output: op.result.address,
                    a_shape: a.ty.nchw(),
                    b_shape: b.ty.nchw(),
                    do_relu: op.attrs.do_relu,
                    rshift: op.attrs.rshifts[0] as i32,
                    multipliers: op.attrs.multipliers.iter().map(|&m| m as i32).collect(),
                }
            }
            NumericMode::Bf16 => Instruction::TgBf16BcastSub {
                layer_id,
                ga_a: a.address,
                ga_b: b.address,
                ga_output: op.result.address,
                a_shape: a.ty.nchw(),
                b_shape: b.ty.nchw(),
                do_relu: op.attrs.do_relu,
            },
        };
        out.push(inst);
        Ok(())
    }
}
