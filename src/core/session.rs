// This module provides the compilation session shared by the lowering pass and the
// codegen driver. CompilationSession owns a bumpalo arena used to intern operator and
// constant names, accumulates non-fatal warnings (most importantly the precision
// adjustment raised when a bias forces a coarser per-batch scale), and tracks statistics
// about the run: operators lowered per numeric mode, identity requantization shortcuts,
// precision adjustments, operators emitted per locality, instructions appended per kernel
// and combinations rejected as unsupported. Interior mutability keeps the session usable
// through a shared reference while patterns and handlers run.

//! Arena-based compilation session.
//!
//! All names interned through the session share its lifetime. Statistics and
//! warnings are only ever appended to; nothing here influences numeric results.

use bumpalo::Bump;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A non-fatal event recorded during compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// A bias forced the per-batch scale above what the filter alone needed.
    PrecisionAdjusted {
        op: String,
        batch: usize,
        qscale_filter: f64,
        qscale_bias: f64,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::PrecisionAdjusted { op, batch, qscale_filter, qscale_bias } => write!(
                f,
                "{op}: adjust qscale for bias in batch {batch}, qscale_filter = {qscale_filter}, qscale_bias = {qscale_bias}"
            ),
        }
    }
}

/// Compilation session for one compilation unit.
pub struct CompilationSession<'arena> {
    /// Arena allocator for interned names.
    arena: &'arena Bump,

    stats: RefCell<SessionStats>,

    warnings: RefCell<Vec<Warning>>,

    interned_strings: RefCell<HashMap<String, &'arena str>>,
}

impl<'arena> CompilationSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            warnings: RefCell::new(Vec::new()),
            interned_strings: RefCell::new(HashMap::new()),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Log and accumulate a warning.
    pub fn warn(&self, warning: Warning) {
        log::warn!("{warning}");
        if matches!(warning, Warning::PrecisionAdjusted { .. }) {
            self.stats.borrow_mut().precision_adjustments += 1;
        }
        self.warnings.borrow_mut().push(warning);
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.borrow().clone()
    }

    pub fn record_op_lowered(&self, mode: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.ops_lowered += 1;
        *stats.lowered_by_mode.entry(mode.to_string()).or_insert(0) += 1;
    }

    pub fn record_identity_shortcut(&self) {
        self.stats.borrow_mut().identity_shortcuts += 1;
    }

    pub fn record_op_emitted(&self, local: bool) {
        let mut stats = self.stats.borrow_mut();
        if local {
            stats.ops_emitted_local += 1;
        } else {
            stats.ops_emitted_global += 1;
        }
    }

    pub fn record_instruction(&self, kernel: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_emitted += 1;
        *stats.instruction_counts.entry(kernel.to_string()).or_insert(0) += 1;
    }

    pub fn record_unsupported(&self) {
        self.stats.borrow_mut().unsupported += 1;
    }

    pub fn record_local_reservation(&self, bytes: u64) {
        let mut stats = self.stats.borrow_mut();
        stats.peak_local_bytes = stats.peak_local_bytes.max(bytes);
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub ops_lowered: usize,

    /// Lowered operators per numeric mode name.
    pub lowered_by_mode: BTreeMap<String, usize>,

    pub identity_shortcuts: usize,

    pub precision_adjustments: usize,

    pub ops_emitted_global: usize,

    pub ops_emitted_local: usize,

    pub instructions_emitted: usize,

    /// Count of each kernel emitted.
    pub instruction_counts: HashMap<String, usize>,

    /// Largest local scratch reservation.
    pub peak_local_bytes: u64,

    pub unsupported: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Ops lowered: {}", self.ops_lowered)?;
        for (mode, count) in &self.lowered_by_mode {
            writeln!(f, "    {}: {}", mode, count)?;
        }
        writeln!(f, "  Identity shortcuts: {}", self.identity_shortcuts)?;
        writeln!(f, "  Precision adjustments: {}", self.precision_adjustments)?;
        writeln!(f, "  Ops emitted (global): {}", self.ops_emitted_global)?;
        writeln!(f, "  Ops emitted (local): {}", self.ops_emitted_local)?;
        writeln!(f, "  Instructions emitted: {}", self.instructions_emitted)?;
        writeln!(f, "  Peak local memory: {} bytes", self.peak_local_bytes)?;

        if self.unsupported > 0 {
            writeln!(f, "  Unsupported: {}", self.unsupported)?;
        }

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Kernel breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

            for (kernel, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", kernel, count)?;
            }
        }

        Ok(())
    }
}
