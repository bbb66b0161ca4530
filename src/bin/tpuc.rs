//! tpuc command line tool.
//!
//! Reads a float graph in text form, lowers it with the given calibration
//! table and emits it for one backend.

use bumpalo::Bump;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tpuc::backend::{CodegenConfig, CodegenDriver, DispatchRegistry, Schedule};
use tpuc::core::{BackendId, CalibrationTable, CompilationSession, NumericMode};
use tpuc::graph_ir::Graph;
use tpuc::lowering::{LoweringConfig, LoweringContext, LoweringPass};

#[derive(Parser, Debug)]
#[command(name = "tpuc", about = "Lower a float graph and emit backend instructions")]
struct Cli {
    /// Graph file in tpuc text format
    input: PathBuf,

    /// Calibration table with `name threshold` lines
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Numeric mode: int8 or bf16
    #[arg(long, default_value = "int8", value_parser = parse_mode)]
    mode: NumericMode,

    /// Produce asymmetric int8 result types
    #[arg(long)]
    asymmetric: bool,

    /// Target backend: cv18xx or bm1684
    #[arg(long, default_value = "cv18xx", value_parser = parse_backend)]
    backend: BackendId,

    /// Run every operator from local memory
    #[arg(long)]
    local: bool,

    /// Local memory budget in bytes
    #[arg(long, default_value_t = tpuc::backend::driver::DEFAULT_LOCAL_MEM_BYTES)]
    lmem_bytes: u64,

    /// Also fill the dynamic layer table
    #[arg(long)]
    dynamic: bool,

    /// Print the lowered graph
    #[arg(long)]
    print_ir: bool,

    /// Print session statistics
    #[arg(long)]
    print_stats: bool,
}

fn parse_mode(s: &str) -> Result<NumericMode, String> {
    NumericMode::from_name(s).ok_or_else(|| format!("unknown mode '{s}', expected int8 or bf16"))
}

fn parse_backend(s: &str) -> Result<BackendId, String> {
    BackendId::from_name(s).ok_or_else(|| format!("unknown backend '{s}', expected cv18xx or bm1684"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Cli::parse();

    let mut graph = Graph::parse(&fs::read_to_string(&args.input)?)?;
    let calibration = match &args.calibration {
        Some(path) => CalibrationTable::parse(&fs::read_to_string(path)?)?,
        None => CalibrationTable::new(),
    };

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let lowering = LoweringConfig {
        mode: args.mode,
        asymmetric: args.asymmetric,
        ..Default::default()
    };
    let ctx = LoweringContext::new(&calibration, &lowering, &session);
    LoweringPass::default().run(&mut graph, &ctx)?;

    if args.print_ir {
        print!("{}", graph.print());
    }

    let registry = DispatchRegistry::with_builtin();
    let codegen = CodegenConfig {
        backend: args.backend,
        force_local: args.local,
        local_mem_bytes: args.lmem_bytes,
        emit_dynamic: args.dynamic,
    };
    let mut driver = CodegenDriver::new(&registry, codegen);
    driver.run(&graph, &Schedule::all_global(), &session)?;
    print!("{}", driver.stream());

    if args.dynamic {
        println!("dynamic layers: {}", driver.layers().len());
    }
    for warning in session.warnings() {
        eprintln!("warning: {warning}");
    }
    if args.print_stats {
        eprint!("{}", session.stats());
    }
    Ok(())
}
