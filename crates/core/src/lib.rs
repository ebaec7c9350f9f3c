//! Seraphic Core: arena allocation, source locations, and diagnostics
//!
//! Shared foundation for every stage of the Seraphic pipeline (lexer, parser,
//! lowering, backends, proof generator, object writer, loader). Nothing in
//! this crate knows about tokens, AST nodes, or IR opcodes — it only knows
//! how to allocate them and how to report problems with them.
//!
//! # Modules
//!
//! - `arena`: scoped bump allocation, released in one shot when a
//!   compilation job ends.
//! - `source`: immutable source-location records attached to every token,
//!   diagnostic, AST node, proof entry, and IR instruction.
//! - `diagnostics`: an append-only diagnostic list plus the panic-mode flag
//!   the parser uses to suppress cascading errors.

pub mod arena;
pub mod diagnostics;
pub mod source;

pub use arena::Arena;
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use source::SourceLocation;
