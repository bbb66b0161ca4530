//! [`GraphAdaptor`] implementation for [`Graph`].

use super::*;
use crate::core::GraphAdaptor;

impl GraphAdaptor for Graph {
    type ValueRef = ValueId;
    type OpRef = OpId;

    const NONE_VALUE: ValueId = Graph::NONE;

    fn ops(&self) -> Box<dyn Iterator<Item = OpId> + '_> {
        Box::new(self.order.iter().copied())
    }

    fn op_kind(&self, op: OpId) -> OpKind {
        self.live_op(op).kind
    }

    fn op_name(&self, op: OpId) -> &str {
        &self.value(self.live_op(op).result).name
    }

    fn op_is_lowered(&self, op: OpId) -> bool {
        self.live_op(op).lowered
    }

    fn op_operands(&self, op: OpId) -> Box<dyn Iterator<Item = ValueId> + '_> {
        Box::new(self.live_op(op).operands.iter().copied())
    }

    fn op_result(&self, op: OpId) -> ValueId {
        self.live_op(op).result
    }

    fn op_attrs(&self, op: OpId) -> &Attributes {
        &self.live_op(op).attrs
    }

    fn value_name(&self, val: ValueId) -> &str {
        &self.value(val).name
    }

    fn value_type(&self, val: ValueId) -> &TensorType {
        &self.value(val).ty
    }

    fn value_address(&self, val: ValueId) -> u64 {
        self.value(val).address
    }

    fn weight_data(&self, val: ValueId) -> Option<&WeightData> {
        match &self.value(val).kind {
            ValueKind::Weight(data) => Some(data),
            _ => None,
        }
    }

    fn create_weight(&mut self, op: OpId, suffix: &str, data: WeightData, ty: TensorType) -> ValueId {
        let base = format!("{}_{}", self.op_name(op), suffix);
        let name = self.unique_name(&base);
        self.push_value(&name, ty, ValueKind::Weight(data), None)
    }

    fn replace_op(
        &mut self,
        op: OpId,
        kind: OpKind,
        operands: Vec<ValueId>,
        attrs: Attributes,
        result_type: TensorType,
    ) -> OpId {
        let old_result = self.live_op(op).result;
        let old = self.value(old_result);
        let (name, address) = (old.name.clone(), old.address);

        let new_op = OpId(self.ops.len() as u32);
        let new_result = ValueId(self.values.len() as u32);
        self.values.push(Value {
            name: name.clone(),
            ty: result_type,
            address,
            kind: ValueKind::Result(new_op),
        });
        self.names.insert(name, new_result);

        for slot in self.ops.iter_mut().flatten() {
            for operand in slot.operands.iter_mut() {
                if *operand == old_result {
                    *operand = new_result;
                }
            }
        }
        self.ops[op.0 as usize] = None;
        self.ops.push(Some(Op { kind, lowered: true, operands, result: new_result, attrs }));
        if let Some(pos) = self.order.iter().position(|&id| id == op) {
            self.order[pos] = new_op;
        }
        new_op
    }
}

impl Graph {
    /// Live op by id.
    ///
    /// # Panics
    ///
    /// If `op` was replaced. `Graph::op` is the non-panicking lookup.
    fn live_op(&self, op: OpId) -> &Op {
        match self.op(op) {
            Some(op) => op,
            None => panic!("op {op:?} was replaced and is no longer live"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ElementType, RequantMode};

    fn relu_chain() -> Graph {
        Graph::parse(
            "%x = input f32 [1, 4]\n\
             %a = relu %x : f32 [1, 4]\n\
             %b = relu %a : f32 [1, 4]\n",
        )
        .unwrap()
    }

    #[test]
    fn test_replace_op_redirects_uses() {
        let mut g = relu_chain();
        let a = g.op_by_name("a").unwrap();
        let x = g.value_by_name("x").unwrap();
        let addr = g.value_address(g.op_result(a));

        let mut attrs = Attributes::default();
        attrs.set_quant(RequantMode::Identity, &[crate::core::QuantParam::IDENTITY]);
        let ty = TensorType::new(vec![1, 4], ElementType::I8);
        let new_a = g.replace_op(a, OpKind::Relu, vec![x], attrs, ty);

        assert_eq!(g.op_name(new_a), "a");
        assert!(g.op_is_lowered(new_a));
        assert_eq!(g.value_address(g.op_result(new_a)), addr);
        assert_eq!(g.ops().count(), 2);
        assert_eq!(g.ops().next(), Some(new_a));

        let b = g.op_by_name("b").unwrap();
        assert_eq!(g.op_operands(b).next(), Some(g.op_result(new_a)));
        assert!(g.op(a).is_none());
    }

    #[test]
    #[should_panic(expected = "no longer live")]
    fn test_replaced_op_ref_is_stale() {
        let mut g = relu_chain();
        let a = g.op_by_name("a").unwrap();
        let x = g.value_by_name("x").unwrap();
        let ty = TensorType::new(vec![1, 4], ElementType::I8);
        g.replace_op(a, OpKind::Relu, vec![x], Attributes::default(), ty);
        g.op_kind(a);
    }

    #[test]
    fn test_create_weight_names() {
        let mut g = relu_chain();
        let a = g.op_by_name("a").unwrap();
        let ty = TensorType::new(vec![2], ElementType::I8);
        let w1 = g.create_weight(a, "filter_i8", WeightData::from(vec![1i8, 2]), ty.clone());
        let w2 = g.create_weight(a, "filter_i8", WeightData::from(vec![3i8, 4]), ty);
        assert_eq!(g.value_name(w1), "a_filter_i8");
        assert_eq!(g.value_name(w2), "a_filter_i8_1");
        assert!(g.is_weight(w1));
        assert!(!g.is_weight(g.value_by_name("x").unwrap()));
    }
}
