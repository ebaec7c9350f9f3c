//! IR verifier (C6, §4.4).
//!
//! Dominance is approximated by block creation order: lowering always
//! allocates a control-flow predecessor's `BlockId` before its successors
//! (the entry block first, then condition/body/merge blocks in the order
//! they're wired), so "defined in a lower-numbered block, or the same
//! block at an earlier instruction index" is a sound proxy without a full
//! dominator-tree computation. This is a documented simplification, not a
//! general CFG verifier.

use std::collections::HashMap;

use super::module::{BlockId, IrModule, Operand};
use super::value::ValueId;
use seraphic_core::{Diagnostic, DiagnosticKind, Diagnostics, Severity, SourceLocation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    MissingTerminator { function: String, block: u32 },
    TerminatorNotLast { function: String, block: u32 },
    UnknownBlockTarget { function: String, block: u32, target: u32 },
    UseBeforeDef { function: String, value: u32 },
    DuplicateDef { function: String, value: u32 },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::MissingTerminator { function, block } => {
                write!(f, "function '{function}' block {block} has no terminator")
            }
            VerifyError::TerminatorNotLast { function, block } => {
                write!(f, "function '{function}' block {block} has a terminator that isn't last")
            }
            VerifyError::UnknownBlockTarget { function, block, target } => {
                write!(f, "function '{function}' block {block} jumps to unknown block {target}")
            }
            VerifyError::UseBeforeDef { function, value } => {
                write!(f, "function '{function}' uses value %{value} before its definition dominates")
            }
            VerifyError::DuplicateDef { function, value } => {
                write!(f, "function '{function}' redefines value %{value}")
            }
        }
    }
}

impl std::error::Error for VerifyError {}

/// Runs the verifier over every function, recording a diagnostic per
/// problem found. Returns `true` iff the module is well-formed.
pub fn verify_module(module: &IrModule, diags: &mut Diagnostics) -> bool {
    let mut ok = true;
    for f in &module.functions {
        if f.is_declaration {
            continue;
        }
        let block_ids: std::collections::HashSet<BlockId> = f.blocks.iter().map(|b| b.id).collect();
        let mut def_site: HashMap<ValueId, (u32, usize)> = HashMap::new();

        for (bi, block) in f.blocks.iter().enumerate() {
            for (ii, instr) in block.instructions.iter().enumerate() {
                let is_last = ii == block.instructions.len() - 1;
                if instr.opcode.is_terminator() && !is_last {
                    ok = false;
                    report(diags, VerifyError::TerminatorNotLast {
                        function: f.name.clone(),
                        block: block.id.0,
                    });
                }
                if let Some(result) = instr.result {
                    if def_site.insert(result, (bi as u32, ii)).is_some() {
                        ok = false;
                        report(diags, VerifyError::DuplicateDef {
                            function: f.name.clone(),
                            value: result.0,
                        });
                    }
                }
                for op in &instr.operands {
                    if let Operand::Block(target) = op {
                        if !block_ids.contains(target) {
                            ok = false;
                            report(diags, VerifyError::UnknownBlockTarget {
                                function: f.name.clone(),
                                block: block.id.0,
                                target: target.0,
                            });
                        }
                    }
                }
            }
            if !block.is_terminated() {
                ok = false;
                report(diags, VerifyError::MissingTerminator {
                    function: f.name.clone(),
                    block: block.id.0,
                });
            }
        }

        for (bi, block) in f.blocks.iter().enumerate() {
            for (ii, instr) in block.instructions.iter().enumerate() {
                for op in &instr.operands {
                    if let Operand::Value(v) = op {
                        match def_site.get(v) {
                            Some(&(def_bi, def_ii)) => {
                                let dominates = def_bi < bi as u32 || (def_bi == bi as u32 && def_ii < ii);
                                if !dominates {
                                    ok = false;
                                    report(diags, VerifyError::UseBeforeDef {
                                        function: f.name.clone(),
                                        value: v.0,
                                    });
                                }
                            }
                            None => {
                                ok = false;
                                report(diags, VerifyError::UseBeforeDef {
                                    function: f.name.clone(),
                                    value: v.0,
                                });
                            }
                        }
                    }
                }
            }
        }
    }
    ok
}

fn report(diags: &mut Diagnostics, err: VerifyError) {
    diags.push(Diagnostic::new(
        DiagnosticKind::Verification,
        Severity::Error,
        SourceLocation::synthetic("<ir>"),
        err.to_string(),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::lower::lower_module;
    use crate::parser::parse_source;

    fn check(src: &str) -> bool {
        let (module, diags) = parse_source(src, "t.sr");
        assert!(!diags.has_errors());
        let (ir, _) = lower_module(&module).unwrap();
        let mut vdiags = Diagnostics::new();
        verify_module(&ir, &mut vdiags)
    }

    #[test]
    fn hello_world_verifies_clean() {
        assert!(check("fn main() -> i32 { return 0; }"));
    }

    #[test]
    fn while_loop_verifies_clean() {
        assert!(check("fn main() -> i64 { let mut i: i64 = 0; while i < 10 { i = i + 1; } return i; }"));
    }

    #[test]
    fn match_verifies_clean() {
        assert!(check("fn f(n: i64) -> i64 { match n { 1 => 10, _ => 0 } }"));
    }
}
