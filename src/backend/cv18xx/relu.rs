use crate::backend::{CodegenHandler, DispatchKey, Instruction, InstructionStream, OpView, SliceInfo, Tile};
use crate::core::CompileResult;

/// Relu runs in place on its slices and needs no extra local buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReluCodegen;

impl CodegenHandler for ReluCodegen {
    fn emit_global(
        &self,
        key: DispatchKey,
        op: &OpView,
        layer_id: u32,
        out: &mut InstructionStream,
    ) -> CompileResult<()> {
        let input = op.operand(0)?;
        out.push(Instruction::TgRelu {
            layer_id,
            mode: key.mode,
            ga_input: input.address,
            ga_output: op.result.address,
            shape: op.result.ty.nchw(),
        });
        Ok(())
    }

    fn buffer_size_local(&self, _key: DispatchKey, _op: &OpView, _slice: &SliceInfo) -> CompileResult<u64> {
        Ok(0)
    }

    fn emit_local(
        &self,
        key: DispatchKey,
        op: &OpView,
        layer_id: u32,
        tile: &Tile,
        out: &mut InstructionStream,
    ) -> CompileResult<()> {
        let [_, c, _, w] = op.result.ty.nchw();
        out.push(Instruction::TlRelu {
            layer_id,
            mode: key.mode,
            la_input: tile.la_input,
            la_output: tile.la_output,
            n: tile.n_slice,
            c,
            h: tile.h_slice,
            w,
        });
        Ok(())
    }
}
