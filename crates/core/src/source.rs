//! Source locations
//!
//! Attached to every token, diagnostic, AST node, proof entry, and IR
//! instruction. `file` borrows from whatever string the driver used to name
//! the input (it does not own a `PathBuf` the way the teacher's
//! `SourceLocation` does, since nothing here needs to join or canonicalize
//! paths — only print them).

/// A single point in a source file: 1-based line and column, 0-based byte
/// offset. All three describe the same position; callers that only need one
/// view (diagnostics want line/column, the lexer's offset-advancement
/// invariant wants the byte offset) can ignore the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation<'a> {
    pub file: &'a str,
    pub line: u32,
    pub column: u32,
    pub offset: u32,
}

impl<'a> SourceLocation<'a> {
    pub fn new(file: &'a str, line: u32, column: u32, offset: u32) -> Self {
        debug_assert!(line >= 1, "SourceLocation line is 1-based");
        debug_assert!(column >= 1, "SourceLocation column is 1-based");
        SourceLocation {
            file,
            line,
            column,
            offset,
        }
    }

    /// A location for synthetic nodes that have no originating source text
    /// (e.g. the module-startup stub, lambda-lifted closures' generated
    /// bodies before their first statement is attached).
    pub fn synthetic(file: &'a str) -> Self {
        SourceLocation {
            file,
            line: 0,
            column: 0,
            offset: 0,
        }
    }
}

impl std::fmt::Display for SourceLocation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_file_line_column() {
        let loc = SourceLocation::new("main.sr", 3, 10, 42);
        assert_eq!(loc.to_string(), "main.sr:3:10");
    }
}
