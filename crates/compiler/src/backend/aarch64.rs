//! AArch64 backend (§4.5).
//!
//! 32-bit fixed-width instruction words. X16/X17 are the scratch
//! registers, X27 the substrate context, X28 the capability context, X29
//! the frame pointer, X30 the link register (§4.5 reserved-register table).

use crate::ir::{BasicBlock, IrFunction, Opcode, Operand};

use super::x64::resolve_fixups_generic;
use super::{Backend, CodeBuffer, FixUp, FixUpTarget, RegisterAllocator};

const FP: u8 = 29;
const LR: u8 = 30;

#[derive(Default)]
pub struct Aarch64Backend;

impl Aarch64Backend {
    pub fn new() -> Self {
        Aarch64Backend
    }
}

impl Backend for Aarch64Backend {
    fn name(&self) -> &'static str {
        "aarch64"
    }

    fn emit_prologue(&mut self, buf: &mut CodeBuffer, _func: &IrFunction, frame_size: u32) {
        // stp x29, x30, [sp, #-16]!; mov x29, sp; sub sp, sp, #frame_size
        buf.emit_u32_le(stp_pre_index(FP, LR, -16));
        buf.emit_u32_le(mov_reg(FP, 31));
        if frame_size > 0 {
            buf.emit_u32_le(sub_imm(31, 31, frame_size));
        }
    }

    fn emit_epilogue(&mut self, buf: &mut CodeBuffer, _func: &IrFunction, frame_size: u32) {
        if frame_size > 0 {
            buf.emit_u32_le(add_imm(31, 31, frame_size));
        }
        buf.emit_u32_le(ldp_post_index(FP, LR, 16));
        buf.emit_u32_le(0xD65F03C0); // ret
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
                let imm = match instr.operands.first() {
                    Some(Operand::Const(c)) => c.as_bits(),
                    _ => 0,
                };
                buf.emit_u32_le(movz(0, (imm & 0xFFFF) as u16));
            }
            Opcode::Add => buf.emit_u32_le(add_reg(0, 0, 1)),
            Opcode::Sub => buf.emit_u32_le(sub_reg(0, 0, 1)),
            Opcode::Mul => buf.emit_u32_le(0x9B007C00), // mul x0, x0, x1
            Opcode::Div | Opcode::Mod => {
                // cbz x1, <void_path>; sdiv/msub
                buf.emit_u32_le(cbz(1, 8));
                buf.emit_u32_le(0x9AC10C00); // sdiv x0, x0, x1
            }
            Opcode::And => buf.emit_u32_le(0x8A010000),
            Opcode::Or => buf.emit_u32_le(0xAA010000),
            Opcode::Xor => buf.emit_u32_le(0xCA010000),
            Opcode::Shl => buf.emit_u32_le(0x9AC12000),
            Opcode::Shr => buf.emit_u32_le(0x9AC12400),
            Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                buf.emit_u32_le(0xEB01001F); // cmp x0, x1
                buf.emit_u32_le(cset(0, cond_code(instr.opcode)));
            }
            Opcode::Load => buf.emit_u32_le(0xF9400000),
            Opcode::Store => buf.emit_u32_le(0xF9000000),
            Opcode::Alloca => {}
            Opcode::Gep | Opcode::ArrayGep => buf.emit_u32_le(add_imm(0, 0, 0)),
            Opcode::Trunc => buf.emit_u32_le(0x53001C00), // uxtw
            Opcode::Sext => buf.emit_u32_le(0x93407C00), // sxtw
            Opcode::Zext => buf.emit_u32_le(0x53001C00),
            Opcode::Jump => self.emit_branch(buf, func, instr, true),
            Opcode::Branch => self.emit_branch(buf, func, instr, false),
            Opcode::Return => buf.emit_u32_le(0xD65F03C0),
            Opcode::VoidTest => buf.emit_u32_le(lsr_imm(0, 0, 63)),
            Opcode::VoidProp | Opcode::VoidAssert | Opcode::VoidCoalesce => {
                buf.emit_u32_le(lsr_imm(0, 0, 63));
                if instr.opcode == Opcode::VoidAssert {
                    buf.emit_u32_le(0xD4200000); // brk #0
                }
            }
            Opcode::CapLoad | Opcode::CapStore => buf.emit_u32_le(add_imm(0, 0, 0)),
            Opcode::Call => self.emit_call(buf, instr),
            Opcode::CallIndirect => buf.emit_u32_le(0xD63F0000), // blr x0
            Opcode::Syscall => buf.emit_u32_le(0xD4000001), // svc #0
            Opcode::SubstrateEnter | Opcode::SubstrateExit | Opcode::Extract | Opcode::Nop => {}
        }
        let _ = alloc;
    }

    fn emit_startup_stub(&mut self, buf: &mut CodeBuffer) {
        buf.emit_u32_le(0x94000000); // bl main (placeholder immediate)
        let patch_site = buf.position() - 4;
        buf.fixups.push(FixUp {
            patch_site,
            target: FixUpTarget::Function("main".to_string()),
            is_conditional: false,
        });
        buf.emit_u32_le(movz(0, 0));
        buf.emit_u32_le(movz(8, 93)); // exit syscall number
        buf.emit_u32_le(0xD4000001); // svc #0
    }

    fn resolve_fixups(&mut self, buf: &mut CodeBuffer) {
        resolve_fixups_generic(buf);
    }
}

impl Aarch64Backend {
    fn emit_branch(&mut self, buf: &mut CodeBuffer, func: &IrFunction, instr: &crate::ir::Instruction, unconditional: bool) {
        let target_block = instr.operands.iter().find_map(|op| match op {
            Operand::Block(b) => Some(*b),
            _ => None,
        });
        let Some(target) = target_block else { return };
        buf.emit_u32_le(if unconditional { 0x14000000 } else { 0x54000000 });
        let patch_site = buf.position() - 4;
        buf.fixups.push(FixUp {
            patch_site,
            target: FixUpTarget::Block(func.name.clone(), target),
            is_conditional: !unconditional,
        });
    }

    fn emit_call(&mut self, buf: &mut CodeBuffer, instr: &crate::ir::Instruction) {
        let Some(Operand::Symbol(name)) = instr.operands.first() else { return };
        buf.emit_u32_le(0x94000000);
        let patch_site = buf.position() - 4;
        buf.fixups.push(FixUp {
            patch_site,
            target: FixUpTarget::Function(name.clone()),
            is_conditional: false,
        });
    }
}

fn stp_pre_index(r1: u8, r2: u8, imm: i32) -> u32 {
    0xA9800000 | ((imm as u32 & 0x7F) << 15) | ((r2 as u32) << 10) | (31 << 5) | r1 as u32
}

fn ldp_post_index(r1: u8, r2: u8, imm: i32) -> u32 {
    0xA8C00000 | ((imm as u32 & 0x7F) << 15) | ((r2 as u32) << 10) | (31 << 5) | r1 as u32
}

fn mov_reg(dst: u8, src: u8) -> u32 {
    0xAA0003E0 | ((src as u32) << 16) | dst as u32
}

fn sub_imm(dst: u8, src: u8, imm: u32) -> u32 {
    0xD1000000 | ((imm & 0xFFF) << 10) | ((src as u32) << 5) | dst as u32
}

fn add_imm(dst: u8, src: u8, imm: u32) -> u32 {
    0x91000000 | ((imm & 0xFFF) << 10) | ((src as u32) << 5) | dst as u32
}

fn add_reg(dst: u8, a: u8, b: u8) -> u32 {
    0x8B000000 | ((b as u32) << 16) | ((a as u32) << 5) | dst as u32
}

fn sub_reg(dst: u8, a: u8, b: u8) -> u32 {
    0xCB000000 | ((b as u32) << 16) | ((a as u32) << 5) | dst as u32
}

fn movz(dst: u8, imm: u16) -> u32 {
    0xD2800000 | ((imm as u32) << 5) | dst as u32
}

fn cbz(reg: u8, imm19: i32) -> u32 {
    0xB4000000 | ((imm19 as u32 & 0x7FFFF) << 5) | reg as u32
}

fn lsr_imm(dst: u8, src: u8, shift: u32) -> u32 {
    0xD340FC00 | (shift << 16) | ((src as u32) << 5) | dst as u32
}

fn cset(dst: u8, cond: u32) -> u32 {
    0x9A9F07E0 | (cond << 12) | dst as u32
}

fn cond_code(op: Opcode) -> u32 {
    match op {
        Opcode::Eq => 0,
        Opcode::Ne => 1,
        Opcode::Lt => 11,
        Opcode::Le => 13,
        Opcode::Gt => 12,
        Opcode::Ge => 10,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::compile_module;
    use crate::ir::lower_module;
    use crate::parser::parse_source;

    #[test]
    fn prologue_saves_frame_and_link_registers() {
        let (ast, diags) = parse_source("fn main() -> i32 { return 0; }", "t.sr");
        assert!(!diags.has_errors());
        let (ir, _) = lower_module(&ast).unwrap();
        let mut backend = Aarch64Backend::new();
        let buf = compile_module(&mut backend, &ir);
        let main_offset = buf.function_offsets["main"];
        let first_word = u32::from_le_bytes(buf.bytes[main_offset..main_offset + 4].try_into().unwrap());
        assert_eq!(first_word, stp_pre_index(FP, LR, -16));
    }
}
