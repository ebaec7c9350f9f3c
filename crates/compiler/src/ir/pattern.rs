//! Pattern optimizer (C7, optional, §4.4).
//!
//! Peephole rewrite that preserves observable semantics: multiply-by-
//! power-of-two becomes a shift. The `x*x+y*y` and fused sin/cos rewrites
//! the construct table mentions need cross-instruction dataflow this pass
//! doesn't build; scoped out rather than landing as a rewrite that never
//! fires (see DESIGN.md).

use super::module::{IrModule, Opcode, Operand};
use super::value::ConstValue;

pub struct PatternStats {
    pub mul_to_shl: usize,
}

pub fn run_pattern_optimizer(module: &mut IrModule) -> PatternStats {
    let mut stats = PatternStats { mul_to_shl: 0 };
    for f in &mut module.functions {
        for block in &mut f.blocks {
            for instr in &mut block.instructions {
                if instr.opcode != Opcode::Mul {
                    continue;
                }
                let shift = instr.operands.iter().find_map(|op| match op {
                    Operand::Const(ConstValue::Int(v)) if v.is_power_of_two() && *v > 1 => {
                        Some(v.trailing_zeros())
                    }
                    _ => None,
                });
                if let Some(shift_amount) = shift {
                    let other = instr
                        .operands
                        .iter()
                        .find(|op| !matches!(op, Operand::Const(_)))
                        .cloned();
                    if let Some(other) = other {
                        instr.opcode = Opcode::Shl;
                        instr.operands = vec![other, Operand::Const(ConstValue::Int(shift_amount as u64))];
                        stats.mul_to_shl += 1;
                    }
                }
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::lower::lower_module;
    use crate::parser::parse_source;

    #[test]
    fn multiply_by_power_of_two_becomes_shift() {
        let (module, diags) = parse_source("fn f(x: i64) -> i64 { return x * 8; }", "t.sr");
        assert!(!diags.has_errors());
        let (mut ir, _) = lower_module(&module).unwrap();
        let stats = run_pattern_optimizer(&mut ir);
        assert_eq!(stats.mul_to_shl, 1);
        let f = ir.find_function("f").unwrap();
        let has_shl = f.blocks[0]
            .instructions
            .iter()
            .any(|i| i.opcode == Opcode::Shl);
        assert!(has_shl);
    }

    #[test]
    fn multiply_by_non_power_of_two_is_untouched() {
        let (module, diags) = parse_source("fn f(x: i64) -> i64 { return x * 6; }", "t.sr");
        assert!(!diags.has_errors());
        let (mut ir, _) = lower_module(&module).unwrap();
        let stats = run_pattern_optimizer(&mut ir);
        assert_eq!(stats.mul_to_shl, 0);
    }
}
