// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all generator phases.
// All generator errors are fatal: phases return `Result<_, Diagnostic>` and
// the driver stops at the first error. There are no source spans — stencils
// are defined through a Rust API, so diagnostics name the offending
// dimension, grid, or offset directly in the message.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable code constants, grouped by phase.
pub mod codes {
    use super::DiagCode;

    // Stencil selection.
    pub const UNKNOWN_STENCIL: DiagCode = DiagCode("E0101");
    pub const INVALID_ORDER: DiagCode = DiagCode("E0102");

    // Fold/cluster shape validation.
    pub const FOLD_DIM_MISMATCH: DiagCode = DiagCode("E0201");
    pub const CLUSTER_DIM_MISMATCH: DiagCode = DiagCode("E0202");
    pub const DUPLICATE_DIM: DiagCode = DiagCode("E0203");
    pub const BAD_DIM_SPEC: DiagCode = DiagCode("E0204");

    // Vector-fold analysis.
    pub const UNALIGNED_CONFLICT: DiagCode = DiagCode("E0301");

    // Equation construction and grouping.
    pub const EQUATION_CONFLICT: DiagCode = DiagCode("E0401");
    pub const BAD_EQUATION_TARGET: DiagCode = DiagCode("E0402");

    // Rewrite passes.
    pub const EXPR_CYCLE: DiagCode = DiagCode("E0501");

    // Emission.
    pub const EMIT_IO: DiagCode = DiagCode("E0601");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A generator diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code or hint.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            message: message.into(),
            hint: None,
        }
    }

    /// Shorthand for an error-level diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message)
    }

    /// Shorthand for a warning-level (informational) diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::error("something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::error("fold dimension 'w' not in all grids")
            .with_code(codes::FOLD_DIM_MISMATCH);
        assert_eq!(
            format!("{d}"),
            "error[E0201]: fold dimension 'w' not in all grids"
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::warning("memory map MUST be unit-stride in 'x'")
            .with_code(codes::UNALIGNED_CONFLICT)
            .with_hint("drop --allow-unaligned or fold a single dimension");
        assert_eq!(d.code, Some(codes::UNALIGNED_CONFLICT));
        assert_eq!(d.level, DiagLevel::Warning);
        assert!(d.hint.is_some());
    }
}
