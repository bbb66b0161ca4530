//! End-to-end lowering tests driven through the text graph format.

use bumpalo::Bump;
use tpuc::core::{
    CalibrationTable, CompilationSession, CompileError, ElementType, GraphAdaptor, NumericMode,
    OpKind, QuantParam, RequantMode, Warning,
};
use tpuc::graph_ir::Graph;
use tpuc::inference::{dequantize, matmul_f32, matmul_int8, quantize};
use tpuc::lowering::{LoweringConfig, LoweringContext, LoweringPass};

const FILTER: [f32; 12] = [
    0.5, -1.0, 2.0, 0.25, //
    -2.0, 0.75, 1.0, -0.5, //
    1.5, 0.0, -1.25, 1.0,
];
const BIAS: [f32; 4] = [-5.0, 2.5, 4.0, -1.5];

fn list(values: &[f32]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

fn fc_graph() -> Graph {
    Graph::parse(&format!(
        "; batch = 1, N = 4, K = 3\n\
         %x = input f32 [1, 3]\n\
         %w = weight f32 [3, 4] [{}]\n\
         %b = weight f32 [4] [{}]\n\
         %y = matmul %x, %w, %b : f32 [1, 4]\n",
        list(&FILTER),
        list(&BIAS)
    ))
    .unwrap()
}

fn calibration() -> CalibrationTable {
    CalibrationTable::new().with("x", 2.0).with("y", 10.0)
}

fn lower(graph: &mut Graph, cal: &CalibrationTable, config: &LoweringConfig) -> Result<usize, CompileError> {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ctx = LoweringContext::new(cal, config, &session);
    LoweringPass::default().run(graph, &ctx)
}

#[test]
fn test_fc_lowering_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut g = fc_graph();
    let cal = calibration();
    assert_eq!(lower(&mut g, &cal, &LoweringConfig::default()), Ok(1));

    let op = g.op_by_name("y").unwrap();
    assert!(g.op_is_lowered(op));
    let attrs = g.op_attrs(op).clone();
    assert_eq!(attrs.quant_mode, Some(RequantMode::Normal));
    // max |filter| = 2: qscale = 2 * 2 / (10 * 127)
    assert_eq!(attrs.quant_params(), Some(vec![QuantParam::new(206, 16)]));

    let operands: Vec<_> = g.op_operands(op).collect();
    let filter = g.weight_data(operands[1]).unwrap().read::<i8>("filter").unwrap();
    assert!(filter.iter().all(|&v| (-127..=127).contains(&v)));
    assert_eq!(filter.iter().map(|v| v.unsigned_abs()).max(), Some(127));
    let bias = g.weight_data(operands[2]).unwrap().read::<i32>("bias").unwrap();
    assert_eq!(bias.len(), 4);
    assert_eq!(g.value_type(operands[2]).elem, ElementType::I32);

    // Integer result tracks the float result.
    let x = [1.0f32, -0.5, 1.5];
    let expected = matmul_f32(&x, &FILTER, Some(&BIAS), 1, 3, 4);
    let qx = quantize(&x, 2.0);
    let qy = matmul_int8(&qx, &filter, Some(&bias), 1, 1, 3, 4, &attrs).unwrap();
    for (got, want) in dequantize(&qy, 10.0).iter().zip(&expected) {
        assert!((got - want).abs() < 0.25, "got {got}, want {want}");
    }
}

#[test]
fn test_fused_relu_limit_uses_output_scale() {
    let mut g = Graph::parse(
        "%x = input f32 [1, 1]\n\
         %w = weight f32 [1, 1] [1]\n\
         %y = matmul %x, %w, none {do_relu = true, relu_limit = 6} : f32 [1, 1]\n",
    )
    .unwrap();
    let cal = CalibrationTable::new().with("x", 12.0).with("y", 12.0);
    lower(&mut g, &cal, &LoweringConfig::default()).unwrap();

    let op = g.op_by_name("y").unwrap();
    let attrs = g.op_attrs(op).clone();
    // 6 * 127 / 12 = 63.5
    assert_eq!(attrs.relu_limit, 64.0);

    let operands: Vec<_> = g.op_operands(op).collect();
    let filter = g.weight_data(operands[1]).unwrap().read::<i8>("filter").unwrap();
    let qx = quantize(&[10.0], 12.0);
    let qy = matmul_int8(&qx, &filter, None, 1, 1, 1, 1, &attrs).unwrap();
    assert_eq!(qy, vec![64]);
    assert!((dequantize(&qy, 12.0)[0] - 6.0).abs() < 0.1);
}

#[test]
fn test_fc_lowering_is_deterministic() {
    let cal = calibration();
    let mut first = fc_graph();
    let mut second = fc_graph();
    lower(&mut first, &cal, &LoweringConfig::default()).unwrap();
    lower(&mut second, &cal, &LoweringConfig::default()).unwrap();
    assert_eq!(first.print(), second.print());
}

#[test]
fn test_bias_adjustment_is_warning() {
    let mut g = Graph::parse(
        "%x = input f32 [1, 2]\n\
         %w = weight f32 [2, 1] [0.01, -0.02]\n\
         %b = weight f32 [1] [1e9]\n\
         %y = matmul %x, %w, %b : f32 [1, 1]\n",
    )
    .unwrap();
    let cal = CalibrationTable::new().with("x", 2.0).with("y", 10.0);
    let config = LoweringConfig::default();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ctx = LoweringContext::new(&cal, &config, &session);
    LoweringPass::default().run(&mut g, &ctx).unwrap();

    let warnings = session.warnings();
    assert_eq!(warnings.len(), 1);
    let Warning::PrecisionAdjusted { op, batch, qscale_filter, qscale_bias } = &warnings[0];
    assert_eq!((op.as_str(), *batch), ("y", 0));
    assert!(qscale_bias > qscale_filter);
    assert_eq!(session.stats().precision_adjustments, 1);
}

#[test]
fn test_failed_lowering_leaves_graph_untouched() {
    // bias has 3 values for N = 4
    let mut g = Graph::parse(&format!(
        "%x = input f32 [1, 3]\n\
         %w = weight f32 [3, 4] [{}]\n\
         %b = weight f32 [3] [1, 2, 3]\n\
         %y = matmul %x, %w, %b : f32 [1, 4]\n",
        list(&FILTER)
    ))
    .unwrap();
    let before = g.print();
    let err = lower(&mut g, &calibration(), &LoweringConfig::default()).unwrap_err();
    assert!(matches!(err, CompileError::ShapeMismatch { expected: 4, actual: 3, .. }));
    assert_eq!(g.print(), before);
    assert!(!g.op_is_lowered(g.op_by_name("y").unwrap()));
}

#[test]
fn test_missing_threshold_aborts() {
    let mut g = fc_graph();
    let cal = CalibrationTable::new().with("x", 2.0);
    let err = lower(&mut g, &cal, &LoweringConfig::default()).unwrap_err();
    assert_eq!(err, CompileError::MissingThreshold { value: "y".to_string() });
}

#[test]
fn test_bf16_matmul_fails_loudly() {
    let mut g = fc_graph();
    let config = LoweringConfig { mode: NumericMode::Bf16, ..Default::default() };
    let err = lower(&mut g, &calibration(), &config).unwrap_err();
    assert_eq!(
        err,
        CompileError::LoweringNotImplemented { op: OpKind::MatMul, mode: NumericMode::Bf16 }
    );
    assert!(err.is_unsupported());
}

#[test]
fn test_lowered_graph_roundtrips_through_text() {
    let mut g = Graph::parse(
        "%a = input f32 [1, 4, 2, 2]\n\
         %b = input f32 [1, 4, 2, 2]\n\
         %c = sub %a, %b : f32 [1, 4, 2, 2]\n\
         %w = weight f32 [2, 3] [1, 2, 3, -1, -2, -3]\n\
         %d = input f32 [2, 2]\n\
         %e = matmul %d, %w, none : f32 [2, 3]\n\
         %r = relu %c {relu_limit = 6} : f32 [1, 4, 2, 2]\n",
    )
    .unwrap();
    let cal = CalibrationTable::new()
        .with("a", 4.0)
        .with("b", 2.0)
        .with("c", 6.0)
        .with("d", 3.0)
        .with("e", 5.0);
    assert_eq!(lower(&mut g, &cal, &LoweringConfig::default()), Ok(3));

    let printed = g.print();
    assert!(printed.contains("%c = tpu.sub %a, %b {quant_mode = normal"));
    assert!(printed.contains("%e_filter_i8 = weight i8 [2, 3]"));

    let reparsed = Graph::parse(&printed).unwrap();
    for name in ["c", "e", "r"] {
        let before = g.op_attrs(g.op_by_name(name).unwrap());
        let after = reparsed.op_attrs(reparsed.op_by_name(name).unwrap());
        assert_eq!(before, after, "attributes of {name}");
    }
    assert_eq!(reparsed.print(), printed);

    // Nothing left to lower.
    let mut again = reparsed;
    assert_eq!(lower(&mut again, &CalibrationTable::new(), &LoweringConfig::default()), Ok(0));
}

#[test]
fn test_unknown_op_kind_has_no_pattern() {
    let mut g = Graph::parse(
        "%x = input f32 [4]\n\
         %y = scale_lut %x : f32 [4]\n",
    )
    .unwrap();
    let err = lower(&mut g, &CalibrationTable::new(), &LoweringConfig::default()).unwrap_err();
    assert_eq!(
        err,
        CompileError::LoweringNotImplemented { op: OpKind::ScaleLut, mode: NumericMode::Int8 }
    );
}
