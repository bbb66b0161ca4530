//! tpuc - quantization and codegen dispatch for tensor-processing hardware.
//!
//! tpuc lowers floating-point graph operators into fixed-point form and
//! routes every lowered operator to a backend-specific instruction emitter.
//!
//! # Primary Usage
//!
//! ```ignore
//! use tpuc::backend::{CodegenConfig, CodegenDriver, DispatchRegistry, Schedule};
//! use tpuc::core::{CalibrationTable, CompilationSession};
//! use tpuc::graph_ir::Graph;
//! use tpuc::lowering::{LoweringConfig, LoweringContext, LoweringPass};
//! use bumpalo::Bump;
//!
//! let mut graph = Graph::parse(&text)?;
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let config = LoweringConfig::default();
//! let ctx = LoweringContext::new(&calibration, &config, &session);
//! LoweringPass::default().run(&mut graph, &ctx)?;
//!
//! let registry = DispatchRegistry::with_builtin();
//! let mut driver = CodegenDriver::new(&registry, CodegenConfig::default());
//! driver.run(&graph, &Schedule::all_global(), &session)?;
//! print!("{}", driver.stream());
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Shared infrastructure (errors, types, graph adaptor, session)
//! - [`quant`] - Scale solver and per-batch weight requantization
//! - [`lowering`] - Per-operator int8 / bf16 lowering patterns
//! - [`backend`] - Dispatch registry, CV18xx and BM1684 handlers, codegen driver
//! - [`graph_ir`] - In-memory graph with a text format
//! - [`inference`] - Integer reference kernels for numeric checks

pub mod backend;
pub mod core;
pub mod graph_ir;
pub mod inference;
pub mod lowering;
pub mod quant;

pub use crate::core::{
    CalibrationTable, CompilationSession, CompileError, CompileResult, GraphAdaptor, SessionStats,
};
pub use backend::{CodegenConfig, CodegenDriver, DispatchKey, DispatchRegistry, Schedule};
pub use lowering::{LoweringConfig, LoweringContext, LoweringPass};
pub use quant::{ScaleSolver, WeightRequantizer};
