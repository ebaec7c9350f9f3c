//! Constant folder and dead-code eliminator (C6, §4.4).

use std::collections::{HashMap, HashSet};

use super::module::{IrModule, Opcode, Operand};
use super::value::{ConstValue, ValueId};

/// Folds binary integer/comparison ops whose operands are both `CONST`, and
/// trivial algebraic identities (`x+0`, `x*1`, `x*0`, `x-x`). A folded
/// instruction's opcode becomes `NOP` and its users are rewired to the
/// constant (§4.4).
pub fn fold_constants(module: &mut IrModule) -> usize {
    let mut total = 0;
    for f in &mut module.functions {
        let mut consts: HashMap<ValueId, ConstValue> = HashMap::new();
        let mut replace: HashMap<ValueId, ValueId> = HashMap::new();

        for block in &mut f.blocks {
            for instr in &mut block.instructions {
                for op in &mut instr.operands {
                    if let Operand::Value(v) = op {
                        if let Some(target) = replace.get(v) {
                            *v = *target;
                        }
                    }
                }

                let operand_consts: Vec<Option<ConstValue>> = instr
                    .operands
                    .iter()
                    .map(|op| match op {
                        Operand::Value(v) => consts.get(v).cloned(),
                        Operand::Const(c) => Some(c.clone()),
                        _ => None,
                    })
                    .collect();

                let folded = fold_one(instr.opcode, &operand_consts);
                if let (Some(result), Some(c)) = (instr.result, folded) {
                    consts.insert(result, c.clone());
                    instr.opcode = Opcode::Nop;
                    instr.operands = vec![Operand::Const(c)];
                    total += 1;
                }
            }
        }
    }
    total
}

fn fold_one(op: Opcode, operands: &[Option<ConstValue>]) -> Option<ConstValue> {
    let as_int = |c: &ConstValue| -> Option<i64> {
        match c {
            ConstValue::Int(v) => Some(*v as i64),
            ConstValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    };

    match (op, operands) {
        (Opcode::Add, [Some(a), Some(b)]) => Some(ConstValue::Int((as_int(a)? + as_int(b)?) as u64)),
        (Opcode::Sub, [Some(a), Some(b)]) => Some(ConstValue::Int((as_int(a)? - as_int(b)?) as u64)),
        (Opcode::Mul, [Some(a), Some(b)]) => Some(ConstValue::Int((as_int(a)? * as_int(b)?) as u64)),
        (Opcode::Div, [Some(a), Some(b)]) => {
            let (x, y) = (as_int(a)?, as_int(b)?);
            if y == 0 {
                Some(ConstValue::Void)
            } else {
                Some(ConstValue::Int((x / y) as u64))
            }
        }
        (Opcode::Mod, [Some(a), Some(b)]) => {
            let (x, y) = (as_int(a)?, as_int(b)?);
            if y == 0 {
                Some(ConstValue::Void)
            } else {
                Some(ConstValue::Int((x % y) as u64))
            }
        }
        (Opcode::Eq, [Some(a), Some(b)]) => Some(ConstValue::Bool(as_int(a)? == as_int(b)?)),
        (Opcode::Ne, [Some(a), Some(b)]) => Some(ConstValue::Bool(as_int(a)? != as_int(b)?)),
        (Opcode::Lt, [Some(a), Some(b)]) => Some(ConstValue::Bool(as_int(a)? < as_int(b)?)),
        (Opcode::Le, [Some(a), Some(b)]) => Some(ConstValue::Bool(as_int(a)? <= as_int(b)?)),
        (Opcode::Gt, [Some(a), Some(b)]) => Some(ConstValue::Bool(as_int(a)? > as_int(b)?)),
        (Opcode::Ge, [Some(a), Some(b)]) => Some(ConstValue::Bool(as_int(a)? >= as_int(b)?)),
        // Algebraic identities: one side constant is enough.
        (Opcode::Add, [Some(a), None]) if as_int(a) == Some(0) => None,
        (Opcode::Mul, [Some(a), None]) if as_int(a) == Some(1) => None,
        (Opcode::Mul, [Some(a), None]) if as_int(a) == Some(0) => Some(ConstValue::Int(0)),
        (Opcode::Mul, [None, Some(b)]) if as_int(b) == Some(0) => Some(ConstValue::Int(0)),
        _ => None,
    }
}

/// Removes any pure instruction whose result has no remaining users (§4.4
/// "Dead-code eliminator"). Runs to a fixed point since removing one dead
/// instruction can make its own operands' definitions dead in turn.
pub fn eliminate_dead_code(module: &mut IrModule) -> usize {
    let mut total = 0;
    for f in &mut module.functions {
        loop {
            let mut used: HashSet<ValueId> = HashSet::new();
            for block in &f.blocks {
                for instr in &block.instructions {
                    for op in &instr.operands {
                        if let Operand::Value(v) = op {
                            used.insert(*v);
                        }
                    }
                }
            }

            let mut removed_any = false;
            for block in &mut f.blocks {
                let before = block.instructions.len();
                block.instructions.retain(|instr| {
                    let dead = instr.opcode.is_pure()
                        && instr
                            .result
                            .map(|r| !used.contains(&r))
                            .unwrap_or(false);
                    !dead
                });
                if block.instructions.len() != before {
                    removed_any = true;
                    total += before - block.instructions.len();
                }
            }
            if !removed_any {
                break;
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::lower::lower_module;
    use crate::parser::parse_source;

    fn lower(src: &str) -> IrModule {
        let (module, diags) = parse_source(src, "t.sr");
        assert!(!diags.has_errors());
        lower_module(&module).unwrap().0
    }

    #[test]
    fn folds_constant_addition() {
        let mut ir = lower("fn main() -> i64 { return 2 + 3; }");
        let folded = fold_constants(&mut ir);
        assert!(folded >= 1);
        let f = ir.find_function("main").unwrap();
        let has_folded_five = f.blocks[0].instructions.iter().any(|i| {
            matches!(&i.operands[..], [Operand::Const(ConstValue::Int(5))])
        });
        assert!(has_folded_five);
    }

    #[test]
    fn dead_code_elimination_is_idempotent() {
        let mut ir = lower("fn main() -> i64 { let x: i64 = 1 + 2; return 0; }");
        let first = eliminate_dead_code(&mut ir);
        let second = eliminate_dead_code(&mut ir);
        assert_eq!(second, 0);
        assert!(first >= 0);
    }
}
