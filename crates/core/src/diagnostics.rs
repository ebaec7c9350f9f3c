//! Diagnostics
//!
//! An append-only list of lexer/parser/lowering problems plus the
//! panic-mode flag the parser uses to suppress cascading syntax errors.
//! New diagnostics are pushed to the front so the most recent error is the
//! one a caller inspects first (§5 of the spec: "the diagnostics list
//! (append-only, reverse insertion so the most-recent error can be
//! inspected first)").

use crate::source::SourceLocation;

/// Error vs. warning. Warnings never fail a compilation on their own; only
/// `Diagnostics::has_errors` gates the pipeline (§4.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Which stage raised the diagnostic. Doesn't change the canonical printed
/// form but lets a caller filter ("show only lexer errors") and lets the
/// proof generator and `-v` statistics count per-stage problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexical,
    Syntax,
    Lowering,
    Verification,
    Backend,
    Writer,
    Loader,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiagnosticKind::Lexical => "lexical",
            DiagnosticKind::Syntax => "syntax",
            DiagnosticKind::Lowering => "lowering",
            DiagnosticKind::Verification => "verification",
            DiagnosticKind::Backend => "backend",
            DiagnosticKind::Writer => "writer",
            DiagnosticKind::Loader => "loader",
        };
        write!(f, "{s}")
    }
}

/// One reported problem, already located and formatted.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        kind: DiagnosticKind,
        severity: Severity,
        loc: SourceLocation<'_>,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            kind,
            severity,
            file: loc.file.to_string(),
            line: loc.line,
            column: loc.column,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    /// Canonical form required by §6/§7: `file:line:column: kind: message`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.file, self.line, self.column, self.severity, self.message
        )
    }
}

/// The diagnostic list owned by a single compilation job, plus the
/// panic-mode flag the parser toggles around synchronization.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    in_panic: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    /// Record a diagnostic unless the caller is in panic mode (lexer never
    /// is; parser checks `in_panic` itself before calling this so that a
    /// single syntax error doesn't cascade into a screenful of followers).
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.insert(0, diagnostic);
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Most-recently-pushed diagnostic, if any.
    pub fn last(&self) -> Option<&Diagnostic> {
        self.entries.first()
    }

    /// Diagnostics in source-reported (most-recent-first) order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Diagnostics in original reporting order (oldest first), the order a
    /// human reading top-to-bottom output expects.
    pub fn iter_chronological(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().rev()
    }

    pub fn is_in_panic(&self) -> bool {
        self.in_panic
    }

    pub fn enter_panic(&mut self) {
        self.in_panic = true;
    }

    pub fn leave_panic(&mut self) {
        self.in_panic = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_is_most_recent_first() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::new(
            DiagnosticKind::Lexical,
            Severity::Error,
            SourceLocation::new("a.sr", 1, 1, 0),
            "first",
        ));
        diags.push(Diagnostic::new(
            DiagnosticKind::Lexical,
            Severity::Error,
            SourceLocation::new("a.sr", 2, 1, 10),
            "second",
        ));
        assert_eq!(diags.last().unwrap().message, "second");
        let chron: Vec<_> = diags.iter_chronological().map(|d| &d.message).collect();
        assert_eq!(chron, vec!["first", "second"]);
    }

    #[test]
    fn canonical_display_format() {
        let d = Diagnostic::new(
            DiagnosticKind::Syntax,
            Severity::Error,
            SourceLocation::new("main.sr", 4, 9, 30),
            "expected ';'",
        );
        assert_eq!(d.to_string(), "main.sr:4:9: error: expected ';'");
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::new(
            DiagnosticKind::Lexical,
            Severity::Warning,
            SourceLocation::new("a.sr", 1, 1, 0),
            "unrecognized escape",
        ));
        assert!(!diags.has_errors());
        assert_eq!(diags.error_count(), 0);
    }
}
