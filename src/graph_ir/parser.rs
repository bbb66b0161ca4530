//! Graph text format parser.

use super::*;
use crate::core::{CompileError, ElementType, RequantMode};

pub fn parse_graph(text: &str) -> CompileResult<Graph> {
    let mut graph = Graph::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split(';').next().unwrap_or("");
        if line.trim().is_empty() {
            continue;
        }
        let mut parser = Parser::new(line, idx + 1);
        parser.parse_line(&mut graph)?;
    }
    Ok(graph)
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, line: usize) -> Self {
        Self { text, pos: 0, line }
    }

    fn error(&self, reason: impl Into<String>) -> CompileError {
        CompileError::Parse { line: self.line, reason: reason.into() }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.text.len() - trimmed.len();
    }

    fn is_eol(&mut self) -> bool {
        self.skip_whitespace();
        self.pos >= self.text.len()
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.rest().chars().next()
    }

    fn try_read(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> CompileResult<()> {
        if !self.try_read(ch) {
            let found = self.peek();
            return Err(self.error(format!("expected '{ch}' but found {found:?}")));
        }
        Ok(())
    }

    /// Identifier made of alphanumerics, `_` and `.`.
    fn read_identifier(&mut self) -> CompileResult<&'a str> {
        self.skip_whitespace();
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error(format!("expected identifier at '{rest}'")));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn read_value_name(&mut self) -> CompileResult<&'a str> {
        self.expect('%')?;
        self.read_identifier()
    }

    /// Numeric token: sign, digits, `.`, exponent, hex prefix, `inf`/`nan`.
    fn read_token(&mut self) -> CompileResult<&'a str> {
        self.skip_whitespace();
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.')))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error(format!("expected number at '{rest}'")));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn read_f64(&mut self) -> CompileResult<f64> {
        let tok = self.read_token()?;
        tok.parse().map_err(|e| self.error(format!("bad number '{tok}': {e}")))
    }

    fn read_i64(&mut self) -> CompileResult<i64> {
        let tok = self.read_token()?;
        tok.parse().map_err(|e| self.error(format!("bad integer '{tok}': {e}")))
    }

    fn read_u64(&mut self) -> CompileResult<u64> {
        let tok = self.read_token()?;
        let parsed = match tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => tok.parse(),
        };
        parsed.map_err(|e| self.error(format!("bad unsigned '{tok}': {e}")))
    }

    fn read_list<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<Vec<T>> {
        self.expect('[')?;
        let mut items = Vec::new();
        if self.try_read(']') {
            return Ok(items);
        }
        loop {
            items.push(item(self)?);
            if self.try_read(']') {
                return Ok(items);
            }
            self.expect(',')?;
        }
    }

    fn read_type(&mut self) -> CompileResult<TensorType> {
        let elem_name = self.read_identifier()?;
        let elem = ElementType::from_name(elem_name)
            .ok_or_else(|| self.error(format!("unknown element type '{elem_name}'")))?;
        let shape = self.read_list(|p| p.read_u64().map(|d| d as usize))?;
        let mut ty = TensorType::new(shape, elem);

        let saved = self.pos;
        match self.read_identifier() {
            Ok("asym") => ty.asymmetric = true,
            _ => self.pos = saved,
        }
        Ok(ty)
    }

    fn read_address(&mut self) -> CompileResult<Option<u64>> {
        if self.try_read('@') {
            Ok(Some(self.read_u64()?))
        } else {
            Ok(None)
        }
    }

    fn read_attrs(&mut self) -> CompileResult<Attributes> {
        let mut attrs = Attributes::default();
        if !self.try_read('{') {
            return Ok(attrs);
        }
        if self.try_read('}') {
            return Ok(attrs);
        }
        loop {
            let key = self.read_identifier()?;
            self.expect('=')?;
            match key {
                "quant_mode" => {
                    let mode = self.read_identifier()?;
                    attrs.quant_mode = Some(
                        RequantMode::from_name(mode)
                            .ok_or_else(|| self.error(format!("unknown quant_mode '{mode}'")))?,
                    );
                }
                "multipliers" => attrs.multipliers = self.read_list(Self::read_i64)?,
                "rshifts" => attrs.rshifts = self.read_list(Self::read_i64)?,
                "do_relu" => {
                    attrs.do_relu = match self.read_identifier()? {
                        "true" => true,
                        "false" => false,
                        other => return Err(self.error(format!("expected bool, got '{other}'"))),
                    }
                }
                "relu_limit" => attrs.relu_limit = self.read_f64()?,
                other => return Err(self.error(format!("unknown attribute '{other}'"))),
            }
            if self.try_read('}') {
                return Ok(attrs);
            }
            self.expect(',')?;
        }
    }

    fn resolve(&self, graph: &Graph, name: &str) -> CompileResult<ValueId> {
        graph
            .value_by_name(name)
            .ok_or_else(|| self.error(format!("use of undefined value '%{name}'")))
    }

    fn parse_line(&mut self, graph: &mut Graph) -> CompileResult<()> {
        let name = self.read_value_name()?;
        if graph.value_by_name(name).is_some() {
            return Err(self.error(format!("redefinition of '%{name}'")));
        }
        self.expect('=')?;
        let head = self.read_identifier()?;

        match head {
            "input" => {
                let ty = self.read_type()?;
                let address = self.read_address()?;
                graph.push_value(name, ty, ValueKind::Input, address);
            }
            "weight" => {
                let ty = self.read_type()?;
                let address = self.read_address()?;
                let values = self.read_list(Self::read_f64)?;
                if values.len() != ty.num_elements() {
                    return Err(self.error(format!(
                        "weight '%{name}' has {} values, type needs {}",
                        values.len(),
                        ty.num_elements()
                    )));
                }
                let data = WeightData::from_f64(ty.elem, &values);
                graph.push_value(name, ty, ValueKind::Weight(data), address);
            }
            _ => {
                let (lowered, kind_name) = match head.strip_prefix("tpu.") {
                    Some(k) => (true, k),
                    None => (false, head),
                };
                let kind = OpKind::from_name(kind_name)
                    .ok_or_else(|| self.error(format!("unknown operation '{head}'")))?;

                let mut operands = Vec::new();
                while matches!(self.peek(), Some('%') | Some('n')) {
                    if self.try_read('%') {
                        let operand = self.read_identifier()?;
                        operands.push(self.resolve(graph, operand)?);
                    } else {
                        match self.read_identifier()? {
                            "none" => operands.push(Graph::NONE),
                            other => return Err(self.error(format!("unexpected '{other}'"))),
                        }
                    }
                    if !self.try_read(',') {
                        break;
                    }
                }

                let attrs = self.read_attrs()?;
                self.expect(':')?;
                let ty = self.read_type()?;
                let address = self.read_address()?;
                graph.push_op(kind, lowered, name, operands, attrs, ty, address);
            }
        }

        if !self.is_eol() {
            return Err(self.error(format!("trailing input '{}'", self.rest())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_float_matmul() {
        let g = Graph::parse(
            "; fc layer\n\
             %x = input f32 [1, 3]\n\
             %w = weight f32 [3, 2] [1, -2, 0.5, 0.25, 3e-1, -1]\n\
             %y = matmul %x, %w, none : f32 [1, 2]\n",
        )
        .unwrap();

        let op = g.op_by_name("y").unwrap();
        let op = g.op(op).unwrap();
        assert_eq!(op.kind, OpKind::MatMul);
        assert!(!op.lowered);
        assert_eq!(op.operands[2], Graph::NONE);
        let w = g.value_by_name("w").unwrap();
        match &g.value(w).kind {
            ValueKind::Weight(data) => assert_eq!(data.to_f64_vec()[4], 0.3f32 as f64),
            other => panic!("expected weight, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_lowered_attrs() {
        let g = Graph::parse(
            "%a = input i8 [1, 4] @0x100\n\
             %b = input i8 [1, 4] asym\n\
             %c = tpu.sub %a, %b {quant_mode = normal, multipliers = [64, -32], rshifts = [7], do_relu = true} : i8 [1, 4]\n",
        )
        .unwrap();

        let a = g.value_by_name("a").unwrap();
        assert_eq!(g.value(a).address, 0x100);
        assert!(g.value(g.value_by_name("b").unwrap()).ty.asymmetric);

        let op = g.op(g.op_by_name("c").unwrap()).unwrap();
        assert!(op.lowered);
        assert_eq!(op.attrs.quant_mode, Some(RequantMode::Normal));
        assert_eq!(op.attrs.multipliers, vec![64, -32]);
        assert_eq!(op.attrs.rshifts, vec![7]);
        assert!(op.attrs.do_relu);
    }

    #[test]
    fn test_parse_errors() {
        let err = Graph::parse("%x = input f32 [2]\n%y = relu %z : f32 [2]\n").unwrap_err();
        assert!(matches!(err, CompileError::Parse { line: 2, .. }));

        let err = Graph::parse("%w = weight f32 [2] [1]\n").unwrap_err();
        assert!(matches!(err, CompileError::Parse { line: 1, .. }));

        let err = Graph::parse("%x = input f64 [2]\n").unwrap_err();
        assert!(matches!(err, CompileError::Parse { .. }));
    }

    #[test]
    fn test_expected_token_is_reported() {
        let err = Graph::parse("%x = input f32 [1 2]\n").unwrap_err();
        assert_eq!(
            err,
            CompileError::Parse { line: 1, reason: "expected ',' but found Some('2')".to_string() }
        );
    }

    #[test]
    fn test_print_parse_roundtrip() {
        let text = "%x = input f32 [1, 3] @0x0\n\
                    %w = weight f32 [3, 2] @0x40 [1, -2, 0.5, 0.25, 0.3, -1]\n\
                    %y = matmul %x, %w, none : f32 [1, 2] @0x80\n";
        let g = Graph::parse(text).unwrap();
        let printed = g.print();
        let reparsed = Graph::parse(&printed).unwrap();
        assert_eq!(reparsed.print(), printed);
    }
}
