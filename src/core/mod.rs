// This module is the hub for tpuc's shared infrastructure: the error taxonomy, the value
// and attribute types exchanged between lowering and codegen, the GraphAdaptor boundary
// trait to the external graph IR, immutable reference-counted weight storage, the
// injected calibration threshold table and the arena-backed compilation session that
// collects warnings and statistics.

//! Core tpuc infrastructure.
//!
//! # Key Components
//!
//! ## Graph boundary (`adaptor`)
//! - [`GraphAdaptor`] exposes operators, operands, value types and constants
//! - Constant creation and single-call operator replacement
//!
//! ## Data model (`types`, `weight`, `calibration`)
//! - Tensor descriptors, operator kinds, dispatch key components
//! - Quantization parameters persisted as operator attributes
//! - `Arc`-shared read-only weight buffers
//! - Calibration thresholds passed explicitly into every lowering call
//!
//! ## Session (`session`)
//! - `bumpalo` arena for interned names
//! - Warning log and run statistics

pub mod adaptor;
pub mod calibration;
pub mod error;
pub mod session;
pub mod types;
pub mod weight;

pub use adaptor::GraphAdaptor;
pub use calibration::CalibrationTable;
pub use error::{CompileError, CompileResult};
pub use session::{CompilationSession, SessionStats, Warning};
pub use types::{
    Attributes, BackendId, Capability, ElementType, Locality, NumericMode, OpKind, QuantParam,
    RequantMode, TensorType,
};
pub use weight::{WeightData, WeightElement};
