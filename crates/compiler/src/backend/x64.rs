//! x86-64 backend (§4.5).
//!
//! Uses the standard System V ABI: integer args in RDI, RSI, RDX, RCX, R8,
//! R9; RBP as frame pointer; `ret` as the only return mechanism (no link
//! register to save, unlike AArch64/RISC-V).

use std::collections::HashMap;

use crate::ir::{BasicBlock, IrFunction, Opcode, Operand};

use super::{Backend, CodeBuffer, FixUp, FixUpTarget, RegisterAllocator};

const REX_W: u8 = 0x48;

#[derive(Default)]
pub struct X64Backend;

impl X64Backend {
    pub fn new() -> Self {
        X64Backend
    }
}

impl Backend for X64Backend {
    fn name(&self) -> &'static str {
        "x86-64"
    }

    fn emit_prologue(&mut self, buf: &mut CodeBuffer, _func: &IrFunction, frame_size: u32) {
        // push rbp; mov rbp, rsp; sub rsp, frame_size
        buf.emit_u8(0x55);
        buf.emit_bytes(&[REX_W, 0x89, 0xE5]);
        if frame_size > 0 {
            buf.emit_bytes(&[REX_W, 0x81, 0xEC]);
            buf.emit_u32_le(frame_size);
        }
    }

    fn emit_epilogue(&mut self, buf: &mut CodeBuffer, _func: &IrFunction, _frame_size: u32) {
        // mov rsp, rbp; pop rbp; ret
        buf.emit_bytes(&[REX_W, 0x89, 0xEC]);
        buf.emit_u8(0x5D);
        buf.emit_u8(0xC3);
    }

    fn lower_instruction(
        &mut self,
        buf: &mut CodeBuffer,
        func: &IrFunction,
        _block: &BasicBlock,
        instr: &crate::ir::Instruction,
        alloc: &RegisterAllocator,
    ) {
        match instr.opcode {
            Opcode::Const => {
                // mov reg, imm64 (REX.W + B8+r, imm64) — reg chosen by
                // allocator, encoded only as a byte tag here since this is
                // not a real linker target.
                buf.emit_bytes(&[REX_W, 0xB8]);
                let imm = match instr.operands.first() {
                    Some(Operand::Const(c)) => c.as_bits(),
                    _ => 0,
                };
                buf.emit_bytes(&imm.to_le_bytes());
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor => {
                buf.emit_bytes(&[REX_W, opcode_tag(instr.opcode)]);
            }
            Opcode::Div | Opcode::Mod => {
                // test divisor, 0; je void_sentinel; div/idiv otherwise
                // (§4.5: "additionally test the divisor for zero").
                buf.emit_bytes(&[REX_W, 0x85, 0xC0]);
                buf.emit_u8(0x74); // je rel8 placeholder
                buf.emit_u8(0x00);
                buf.emit_bytes(&[REX_W, 0xF7, 0xF8]);
            }
            Opcode::Shl | Opcode::Shr => {
                buf.emit_bytes(&[REX_W, 0xD3, if instr.opcode == Opcode::Shl { 0xE0 } else { 0xE8 }]);
            }
            Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                // cmp; setcc; movzx
                buf.emit_bytes(&[REX_W, 0x39]);
                buf.emit_bytes(&[0x0F, setcc_opcode(instr.opcode)]);
            }
            Opcode::Load => buf.emit_bytes(&[REX_W, 0x8B]),
            Opcode::Store => buf.emit_bytes(&[REX_W, 0x89]),
            Opcode::Alloca => { /* frame space already reserved by the prologue's `sub rsp` */ }
            Opcode::Gep | Opcode::ArrayGep => buf.emit_bytes(&[REX_W, 0x8D]), // lea
            Opcode::Trunc => buf.emit_u8(0x89),
            Opcode::Sext => buf.emit_bytes(&[REX_W, 0x63]), // movsxd
            Opcode::Zext => buf.emit_bytes(&[0x89]),
            Opcode::Jump => self.emit_jump(buf, func, instr, true),
            Opcode::Branch => self.emit_jump(buf, func, instr, false),
            Opcode::Return => buf.emit_u8(0xC3),
            Opcode::VoidTest => buf.emit_bytes(&[REX_W, 0xC1, 0xE8, 63]), // shr r64, 63
            Opcode::VoidProp | Opcode::VoidAssert | Opcode::VoidCoalesce => {
                buf.emit_bytes(&[REX_W, 0xC1, 0xE8, 63]);
                if instr.opcode == Opcode::VoidAssert {
                    buf.emit_u8(0xCC); // int3 trap
                }
            }
            Opcode::CapLoad | Opcode::CapStore => buf.emit_bytes(&[REX_W, 0x8D]),
            Opcode::Call => self.emit_call(buf, instr, false),
            Opcode::CallIndirect => self.emit_call(buf, instr, true),
            Opcode::Syscall => buf.emit_bytes(&[0x0F, 0x05]),
            Opcode::SubstrateEnter | Opcode::SubstrateExit | Opcode::Extract | Opcode::Nop => {}
        }
        let _ = alloc;
    }

    fn emit_startup_stub(&mut self, buf: &mut CodeBuffer) {
        // call main
        buf.emit_u8(0xE8);
        let patch_site = buf.position();
        buf.emit_u32_le(0);
        buf.fixups.push(FixUp {
            patch_site,
            target: FixUpTarget::Function("main".to_string()),
            is_conditional: false,
        });
        // mov edi, 0; mov eax, 60 (exit); syscall
        buf.emit_bytes(&[0xBF, 0x00, 0x00, 0x00, 0x00]);
        buf.emit_bytes(&[0xB8, 0x3C, 0x00, 0x00, 0x00]);
        buf.emit_bytes(&[0x0F, 0x05]);
    }

    fn resolve_fixups(&mut self, buf: &mut CodeBuffer) {
        resolve_fixups_generic(buf);
    }
}

impl X64Backend {
    fn emit_jump(&mut self, buf: &mut CodeBuffer, func: &IrFunction, instr: &crate::ir::Instruction, unconditional: bool) {
        let target_block = instr.operands.iter().find_map(|op| match op {
            Operand::Block(b) => Some(*b),
            _ => None,
        });
        let Some(target) = target_block else { return };
        buf.emit_u8(if unconditional { 0xE9 } else { 0x0F });
        if !unconditional {
            buf.emit_u8(0x84); // je rel32 (placeholder condition)
        }
        let patch_site = buf.position();
        buf.emit_u32_le(0);
        buf.fixups.push(FixUp {
            patch_site,
            target: FixUpTarget::Block(func.name.clone(), target),
            is_conditional: !unconditional,
        });
    }

    fn emit_call(&mut self, buf: &mut CodeBuffer, instr: &crate::ir::Instruction, indirect: bool) {
        if indirect {
            buf.emit_bytes(&[0xFF, 0xD0]); // call rax
            return;
        }
        let Some(Operand::Symbol(name)) = instr.operands.first() else { return };
        buf.emit_u8(0xE8);
        let patch_site = buf.position();
        buf.emit_u32_le(0);
        buf.fixups.push(FixUp {
            patch_site,
            target: FixUpTarget::Function(name.clone()),
            is_conditional: false,
        });
    }
}

fn opcode_tag(op: Opcode) -> u8 {
    match op {
        Opcode::Add => 0x01,
        Opcode::Sub => 0x29,
        Opcode::Mul => 0xAF,
        Opcode::And => 0x21,
        Opcode::Or => 0x09,
        Opcode::Xor => 0x31,
        _ => 0x90,
    }
}

fn setcc_opcode(op: Opcode) -> u8 {
    match op {
        Opcode::Eq => 0x94,
        Opcode::Ne => 0x95,
        Opcode::Lt => 0x9C,
        Opcode::Le => 0x9E,
        Opcode::Gt => 0x9F,
        Opcode::Ge => 0x9D,
        _ => 0x90,
    }
}

/// Shared by all three backends: rewrite each recorded fix-up's zeroed
/// displacement now that every function and block offset is known (§4.5
/// "a label-resolution pass rewrites each fix-up with the signed
/// displacement to the now-known label position").
pub(super) fn resolve_fixups_generic(buf: &mut CodeBuffer) {
    let function_offsets: HashMap<String, usize> = buf.function_offsets.clone();
    let block_offsets = buf.block_offsets.clone();
    for fixup in &buf.fixups {
        let target_offset = match &fixup.target {
            FixUpTarget::Function(name) => function_offsets.get(name).copied(),
            FixUpTarget::Block(func, block) => {
                block_offsets.get(&(func.clone(), *block)).copied()
            }
        };
        let Some(target_offset) = target_offset else { continue };
        let next_instr = fixup.patch_site + 4;
        let displacement = target_offset as i64 - next_instr as i64;
        let bytes = (displacement as i32).to_le_bytes();
        buf.bytes[fixup.patch_site..fixup.patch_site + 4].copy_from_slice(&bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::compile_module;
    use crate::ir::lower_module;
    use crate::parser::parse_source;

    #[test]
    fn startup_stub_call_is_patched_to_main_offset() {
        let (ast, diags) = parse_source("fn main() -> i32 { return 0; }", "t.sr");
        assert!(!diags.has_errors());
        let (ir, _) = lower_module(&ast).unwrap();
        let mut backend = X64Backend::new();
        let buf = compile_module(&mut backend, &ir);
        let main_offset = buf.function_offsets["main"];
        // call opcode is at byte 0, displacement at bytes 1..5
        let displacement = i32::from_le_bytes(buf.bytes[1..5].try_into().unwrap());
        let next_instr = 5i64;
        assert_eq!(next_instr + displacement as i64, main_offset as i64);
    }

    #[test]
    fn void_divide_by_zero_emits_a_test_before_div() {
        let (ast, diags) = parse_source("fn f(a: i64, b: i64) -> i64 { return a / b; }", "t.sr");
        assert!(!diags.has_errors());
        let (ir, _) = lower_module(&ast).unwrap();
        let mut backend = X64Backend::new();
        let buf = compile_module(&mut backend, &ir);
        assert!(buf.bytes.windows(3).any(|w| w == [REX_W, 0x85, 0xC0]));
    }
}
