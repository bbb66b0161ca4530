//! Graph IR used by tests and the `tpuc` tool.
//!
//! A small in-memory operator graph that implements [`GraphAdaptor`]. It has a
//! line-based text form that is both human writable and the persisted form of
//! lowered graphs: printing a lowered graph and parsing it back yields the same
//! quantization attributes, in the same order.
//!
//! # Format
//!
//! ```text
//! ; Comments start with semicolon
//! %x = input f32 [1, 4, 3]
//! %w = weight f32 [3, 4] [0.5, -1, ...]
//! %y = matmul %x, %w, none : f32 [1, 4, 4]
//! %z = tpu.relu %q {do_relu = true, relu_limit = 6} : i8 [1, 4, 4] @0x400
//! ```
//!
//! [`GraphAdaptor`]: crate::core::GraphAdaptor

use crate::core::{Attributes, CompileResult, OpKind, TensorType, WeightData};
use std::collections::HashMap;
use std::fmt::Write;

pub mod adaptor;
pub mod parser;

/// Alignment of values in the global address space.
pub const GLOBAL_ALIGN: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

/// How a value comes into existence.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    /// The absent-operand placeholder.
    None,
    Input,
    Weight(WeightData),
    Result(OpId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub name: String,
    pub ty: TensorType,
    pub address: u64,
    pub kind: ValueKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    pub kind: OpKind,
    /// `true` once the op has been rewritten into the hardware dialect.
    pub lowered: bool,
    pub operands: Vec<ValueId>,
    pub result: ValueId,
    pub attrs: Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    pub values: Vec<Value>,
    /// Removed ops leave a `None` slot so ids stay stable.
    pub ops: Vec<Option<Op>>,
    /// Live ops in scheduling order.
    order: Vec<OpId>,
    names: HashMap<String, ValueId>,
    next_address: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub const NONE: ValueId = ValueId(0);

    pub fn new() -> Self {
        Self {
            values: vec![Value {
                name: "none".to_string(),
                ty: TensorType::new(Vec::new(), crate::core::ElementType::F32),
                address: 0,
                kind: ValueKind::None,
            }],
            ops: Vec::new(),
            order: Vec::new(),
            names: HashMap::new(),
            next_address: 0,
        }
    }

    pub fn parse(text: &str) -> CompileResult<Self> {
        parser::parse_graph(text)
    }

    fn alloc_address(&mut self, ty: &TensorType) -> u64 {
        let addr = self.next_address;
        let size = (ty.byte_size() as u64).max(1);
        self.next_address = (addr + size).div_ceil(GLOBAL_ALIGN) * GLOBAL_ALIGN;
        addr
    }

    fn unique_name(&self, base: &str) -> String {
        if !self.names.contains_key(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{base}_{i}"))
            .find(|n| !self.names.contains_key(n))
            .unwrap_or_else(|| base.to_string())
    }

    pub(crate) fn push_value(
        &mut self,
        name: &str,
        ty: TensorType,
        kind: ValueKind,
        address: Option<u64>,
    ) -> ValueId {
        let address = match address {
            Some(a) => {
                self.next_address = self.next_address.max(a + ty.byte_size() as u64);
                self.next_address = self.next_address.div_ceil(GLOBAL_ALIGN) * GLOBAL_ALIGN;
                a
            }
            None => self.alloc_address(&ty),
        };
        let id = ValueId(self.values.len() as u32);
        self.names.insert(name.to_string(), id);
        self.values.push(Value { name: name.to_string(), ty, address, kind });
        id
    }

    pub fn add_input(&mut self, name: &str, ty: TensorType) -> ValueId {
        self.push_value(name, ty, ValueKind::Input, None)
    }

    pub fn add_weight(&mut self, name: &str, data: impl Into<WeightData>, ty: TensorType) -> ValueId {
        self.push_value(name, ty, ValueKind::Weight(data.into()), None)
    }

    /// Append a floating-point op; its result value is named `name`.
    pub fn add_op(
        &mut self,
        kind: OpKind,
        name: &str,
        operands: Vec<ValueId>,
        attrs: Attributes,
        ty: TensorType,
    ) -> OpId {
        self.push_op(kind, false, name, operands, attrs, ty, None)
    }

    /// Append an op that is already in the hardware dialect.
    pub fn add_lowered_op(
        &mut self,
        kind: OpKind,
        name: &str,
        operands: Vec<ValueId>,
        attrs: Attributes,
        ty: TensorType,
    ) -> OpId {
        self.push_op(kind, true, name, operands, attrs, ty, None)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn push_op(
        &mut self,
        kind: OpKind,
        lowered: bool,
        name: &str,
        operands: Vec<ValueId>,
        attrs: Attributes,
        ty: TensorType,
        address: Option<u64>,
    ) -> OpId {
        let op_id = OpId(self.ops.len() as u32);
        let result = self.push_value(name, ty, ValueKind::Result(op_id), address);
        self.ops.push(Some(Op { kind, lowered, operands, result, attrs }));
        self.order.push(op_id);
        op_id
    }

    /// Live ops in scheduling order.
    pub fn op_ids(&self) -> &[OpId] {
        &self.order
    }

    pub fn op(&self, id: OpId) -> Option<&Op> {
        self.ops.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    pub fn value_by_name(&self, name: &str) -> Option<ValueId> {
        self.names.get(name).copied()
    }

    /// The live op producing the value called `name`.
    pub fn op_by_name(&self, name: &str) -> Option<OpId> {
        match self.value(self.value_by_name(name)?).kind {
            ValueKind::Result(op) if self.op(op).is_some() => Some(op),
            _ => None,
        }
    }

    /// Values referenced by at least one live op, plus inputs.
    fn is_referenced(&self, id: ValueId) -> bool {
        match self.value(id).kind {
            ValueKind::None => false,
            ValueKind::Input => true,
            ValueKind::Result(op) => self.op(op).is_some(),
            ValueKind::Weight(_) => self
                .order
                .iter()
                .filter_map(|&op| self.op(op))
                .any(|op| op.operands.contains(&id)),
        }
    }

    /// Render the graph in its text form.
    ///
    /// Constants that no live op uses any more are omitted.
    pub fn print(&self) -> String {
        let mut out = String::new();
        for (idx, value) in self.values.iter().enumerate() {
            let id = ValueId(idx as u32);
            if !self.is_referenced(id) {
                continue;
            }
            match &value.kind {
                ValueKind::Input => {
                    let _ = writeln!(out, "%{} = input {} @{:#x}", value.name, value.ty, value.address);
                }
                ValueKind::Weight(data) => {
                    let _ = write!(out, "%{} = weight {} @{:#x} [", value.name, value.ty, value.address);
                    for (i, v) in data.to_f64_vec().iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        let _ = write!(out, "{v}");
                    }
                    out.push_str("]\n");
                }
                ValueKind::None | ValueKind::Result(_) => {}
            }
        }
        for &op_id in &self.order {
            let Some(op) = self.op(op_id) else { continue };
            let result = self.value(op.result);
            let prefix = if op.lowered { "tpu." } else { "" };
            let _ = write!(out, "%{} = {}{}", result.name, prefix, op.kind);
            for (i, &operand) in op.operands.iter().enumerate() {
                out.push_str(if i == 0 { " " } else { ", " });
                if operand == Self::NONE {
                    out.push_str("none");
                } else {
                    let _ = write!(out, "%{}", self.value(operand).name);
                }
            }
            print_attrs(&mut out, &op.attrs);
            let _ = writeln!(out, " : {} @{:#x}", result.ty, result.address);
        }
        out
    }
}

fn print_attrs(out: &mut String, attrs: &Attributes) {
    let mut parts = Vec::new();
    if let Some(mode) = attrs.quant_mode {
        parts.push(format!("quant_mode = {}", mode.name()));
    }
    if !attrs.multipliers.is_empty() {
        parts.push(format!("multipliers = {}", int_list(&attrs.multipliers)));
    }
    if !attrs.rshifts.is_empty() {
        parts.push(format!("rshifts = {}", int_list(&attrs.rshifts)));
    }
    if attrs.do_relu {
        parts.push("do_relu = true".to_string());
    }
    if attrs.relu_limit != 0.0 {
        parts.push(format!("relu_limit = {}", attrs.relu_limit));
    }
    if !parts.is_empty() {
        let _ = write!(out, " {{{}}}", parts.join(", "));
    }
}

fn int_list(values: &[i64]) -> String {
    let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ElementType;

    #[test]
    fn test_addresses_are_aligned_and_disjoint() {
        let mut g = Graph::new();
        let a = g.add_input("a", TensorType::new(vec![3], ElementType::F32));
        let b = g.add_input("b", TensorType::new(vec![100], ElementType::I8));
        assert_eq!(g.value(a).address, 0);
        assert_eq!(g.value(b).address, GLOBAL_ALIGN);
        assert_eq!(g.value(b).address % GLOBAL_ALIGN, 0);
    }

    #[test]
    fn test_print_float_graph() {
        let mut g = Graph::new();
        let x = g.add_input("x", TensorType::new(vec![1, 2], ElementType::F32));
        g.add_op(
            OpKind::Relu,
            "y",
            vec![x],
            Attributes::default(),
            TensorType::new(vec![1, 2], ElementType::F32),
        );
        let text = g.print();
        assert!(text.contains("%x = input f32 [1, 2] @0x0"));
        assert!(text.contains("%y = relu %x : f32 [1, 2] @0x40"));
    }

    #[test]
    fn test_op_by_name() {
        let mut g = Graph::new();
        let x = g.add_input("x", TensorType::new(vec![4], ElementType::F32));
        let op = g.add_op(
            OpKind::Relu,
            "r",
            vec![x],
            Attributes::default(),
            TensorType::new(vec![4], ElementType::F32),
        );
        assert_eq!(g.op_by_name("r"), Some(op));
        assert_eq!(g.op_by_name("x"), None);
    }
}
