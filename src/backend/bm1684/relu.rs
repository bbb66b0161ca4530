use crate::backend::{
    CodegenHandler, DispatchKey, DynamicLayer, DynamicLayerTable, FwLayerType, Instruction,
    InstructionStream, OpView, SliceInfo, Tile,
};
use crate::core::CompileResult;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReluCodegen;

impl CodegenHandler for ReluCodegen {
    fn emit_global(
        &self,
        _key: DispatchKey,
        op: &OpView,
        layer_id: u32,
        out: &mut InstructionStream,
    ) -> CompileResult<()> {
        let input = op.operand(0)?;
        out.push(Instruction::BmReluGlobal {
            layer_id,
            ga_input: input.address,
            ga_output: op.result.address,
            shape: op.result.ty.nchw(),
            relu_limit: op.attrs.relu_limit,
        });
        Ok(())
    }

    fn buffer_size_local(&self, _key: DispatchKey, _op: &OpView, _slice: &SliceInfo) -> CompileResult<u64> {
        Ok(0)
    }

    fn emit_local(
        &self,
        _key: DispatchKey,
        op: &OpView,
        layer_id: u32,
        tile: &Tile,
        out: &mut InstructionStream,
    ) -> CompileResult<()> {
        let [_, c, _, w] = op.result.ty.nchw();
        out.push(Instruction::BmReluLocal {
            layer_id,
            la_input: tile.la_input,
            la_output: tile.la_output,
            n_step: tile.n_step,
            h_step: tile.h_step,
            shape: [tile.n_slice, c, tile.h_slice, w],
            relu_limit: op.attrs.relu_limit,
        });
        Ok(())
    }

    fn dynamic_emit(&self, _key: DispatchKey, op: &OpView, layers: &mut DynamicLayerTable) -> CompileResult<u32> {
        let input = op.operand(0)?;
        Ok(layers.push(DynamicLayer {
            fw_type: self.fw_type(),
            name: op.name.clone(),
            inputs: vec![input.address],
            output: op.result.address,
            shape: op.result.ty.nchw(),
        }))
    }

    fn fw_type(&self) -> i64 {
        FwLayerType::Relu as i64
    }
}
