//! Textual IR dump, used by `--emit-ir` and test assertions.

use std::fmt::Write as _;

use super::module::{IrModule, Operand};
use super::types::TypeTable;
use super::value::ConstValue;

pub fn dump_module(module: &IrModule, types: &TypeTable) -> String {
    let mut out = String::new();
    for (name, ty, init) in &module.globals {
        let _ = writeln!(out, "global {name}: {:?} = {:?}", types.get(*ty), init);
    }
    for f in &module.functions {
        if f.is_declaration {
            let _ = writeln!(out, "declare fn {}()", f.name);
            continue;
        }
        let _ = writeln!(out, "fn {}() {{", f.name);
        for block in &f.blocks {
            let _ = writeln!(out, "  block{}:", block.id.0);
            for instr in &block.instructions {
                let lhs = instr
                    .result
                    .map(|v| format!("%{} = ", v.0))
                    .unwrap_or_default();
                let operands: Vec<String> = instr.operands.iter().map(operand_text).collect();
                let _ = writeln!(out, "    {lhs}{:?} {}", instr.opcode, operands.join(", "));
            }
        }
        let _ = writeln!(out, "}}");
    }
    out
}

fn operand_text(op: &Operand) -> String {
    match op {
        Operand::Value(v) => format!("%{}", v.0),
        Operand::Const(ConstValue::Int(v)) => v.to_string(),
        Operand::Const(ConstValue::FixedPoint(v)) => format!("fx:{v}"),
        Operand::Const(ConstValue::Bool(b)) => b.to_string(),
        Operand::Const(ConstValue::Void) => "VOID".to_string(),
        Operand::Block(b) => format!("block{}", b.0),
        Operand::Symbol(s) => s.clone(),
        Operand::Index(i) => format!("#{i}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::lower::lower_module;
    use crate::parser::parse_source;

    #[test]
    fn dump_contains_function_name_and_blocks() {
        let (module, diags) = parse_source("fn main() -> i32 { return 0; }", "t.sr");
        assert!(!diags.has_errors());
        let (ir, types) = lower_module(&module).unwrap();
        let text = dump_module(&ir, &types);
        assert!(text.contains("fn main()"));
        assert!(text.contains("block0"));
        assert!(text.contains("Return"));
    }
}
