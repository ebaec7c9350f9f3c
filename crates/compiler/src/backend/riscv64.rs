//! RISC-V 64 (RV64GC) backend (§4.5).
//!
//! T0/T1 are the scratch registers, S0 the frame pointer, RA the link
//! register (§4.5 reserved-register table); substrate/capability contexts
//! are vendor-assigned like x86-64's.

use crate::ir::{BasicBlock, IrFunction, Opcode, Operand};

use super::x64::resolve_fixups_generic;
use super::{Backend, CodeBuffer, FixUp, FixUpTarget, RegisterAllocator};

const S0: u32 = 8;
const RA: u32 = 1;
const SP: u32 = 2;

#[derive(Default)]
pub struct Riscv64Backend;

impl Riscv64Backend {
    pub fn new() -> Self {
        Riscv64Backend
    }
}

impl Backend for Riscv64Backend {
    fn name(&self) -> &'static str {
        "riscv64"
    }

    fn emit_prologue(&mut self, buf: &mut CodeBuffer, _func: &IrFunction, frame_size: u32) {
        let total = frame_size + 16;
        buf.emit_u32_le(addi(SP, SP, -(total as i32)));
        buf.emit_u32_le(sd(RA, SP, total - 8));
        buf.emit_u32_le(sd(S0, SP, total - 16));
        buf.emit_u32_le(addi(S0, SP, total as i32));
    }

    fn emit_epilogue(&mut self, buf: &mut CodeBuffer, _func: &IrFunction, frame_size: u32) {
        let total = frame_size + 16;
        buf.emit_u32_le(ld(RA, SP, total - 8));
        buf.emit_u32_le(ld(S0, SP, total - 16));
        buf.emit_u32_le(addi(SP, SP, total as i32));
        buf.emit_u32_le(0x00008067); // ret (jalr x0, x1, 0)
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
                buf.emit_u32_le(addi(10, 0, (imm & 0xFFF) as i32));
            }
            Opcode::Add => buf.emit_u32_le(r_type(0b0110011, 10, 0b000, 10, 11, 0b0000000)),
            Opcode::Sub => buf.emit_u32_le(r_type(0b0110011, 10, 0b000, 10, 11, 0b0100000)),
            Opcode::Mul => buf.emit_u32_le(r_type(0b0110011, 10, 0b000, 10, 11, 0b0000001)),
            Opcode::Div | Opcode::Mod => {
                // beqz t1, void_path; div/rem
                buf.emit_u32_le(beqz(11, 8));
                let funct3 = if instr.opcode == Opcode::Div { 0b100 } else { 0b110 };
                buf.emit_u32_le(r_type(0b0110011, 10, funct3, 10, 11, 0b0000001));
            }
            Opcode::And => buf.emit_u32_le(r_type(0b0110011, 10, 0b111, 10, 11, 0)),
            Opcode::Or => buf.emit_u32_le(r_type(0b0110011, 10, 0b110, 10, 11, 0)),
            Opcode::Xor => buf.emit_u32_le(r_type(0b0110011, 10, 0b100, 10, 11, 0)),
            Opcode::Shl => buf.emit_u32_le(r_type(0b0110011, 10, 0b001, 10, 11, 0)),
            Opcode::Shr => buf.emit_u32_le(r_type(0b0110011, 10, 0b101, 10, 11, 0)),
            Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                buf.emit_u32_le(r_type(0b0110011, 10, 0b010, 10, 11, 0b0000000)); // slt t0, a0, a1 (placeholder)
            }
            Opcode::Load => buf.emit_u32_le(0x00053503), // ld a0, 0(a0)
            Opcode::Store => buf.emit_u32_le(0x00B53023), // sd a1, 0(a0)
            Opcode::Alloca => {}
            Opcode::Gep | Opcode::ArrayGep => buf.emit_u32_le(addi(10, 10, 0)),
            Opcode::Trunc | Opcode::Sext | Opcode::Zext => buf.emit_u32_le(addi(10, 10, 0)),
            Opcode::Jump => self.emit_jump(buf, func, instr, true),
            Opcode::Branch => self.emit_jump(buf, func, instr, false),
            Opcode::Return => buf.emit_u32_le(0x00008067),
            Opcode::VoidTest => buf.emit_u32_le(srli(10, 10, 63)),
            Opcode::VoidProp | Opcode::VoidAssert | Opcode::VoidCoalesce => {
                buf.emit_u32_le(srli(10, 10, 63));
                if instr.opcode == Opcode::VoidAssert {
                    buf.emit_u32_le(0x00100073); // ebreak
                }
            }
            Opcode::CapLoad | Opcode::CapStore => buf.emit_u32_le(addi(10, 10, 0)),
            Opcode::Call => self.emit_call(buf, instr),
            Opcode::CallIndirect => buf.emit_u32_le(0x000500E7), // jalr ra, a0, 0 (placeholder encoding)
            Opcode::Syscall => buf.emit_u32_le(0x00000073), // ecall
            Opcode::SubstrateEnter | Opcode::SubstrateExit | Opcode::Extract | Opcode::Nop => {}
        }
        let _ = alloc;
    }

    fn emit_startup_stub(&mut self, buf: &mut CodeBuffer) {
        buf.emit_u32_le(0x000000EF); // jal ra, main (placeholder immediate)
        let patch_site = buf.position() - 4;
        buf.fixups.push(FixUp {
            patch_site,
            target: FixUpTarget::Function("main".to_string()),
            is_conditional: false,
        });
        buf.emit_u32_le(addi(10, 0, 0)); // li a0, 0
        buf.emit_u32_le(addi(17, 0, 93)); // li a7, 93 (exit)
        buf.emit_u32_le(0x00000073); // ecall
    }

    fn resolve_fixups(&mut self, buf: &mut CodeBuffer) {
        resolve_fixups_generic(buf);
    }
}

impl Riscv64Backend {
    fn emit_jump(&mut self, buf: &mut CodeBuffer, func: &IrFunction, instr: &crate::ir::Instruction, unconditional: bool) {
        let target_block = instr.operands.iter().find_map(|op| match op {
            Operand::Block(b) => Some(*b),
            _ => None,
        });
        let Some(target) = target_block else { return };
        buf.emit_u32_le(if unconditional { 0x0000006F } else { 0x00000063 });
        let patch_site = buf.position() - 4;
        buf.fixups.push(FixUp {
            patch_site,
            target: FixUpTarget::Block(func.name.clone(), target),
            is_conditional: !unconditional,
        });
    }

    fn emit_call(&mut self, buf: &mut CodeBuffer, instr: &crate::ir::Instruction) {
        let Some(Operand::Symbol(name)) = instr.operands.first() else { return };
        buf.emit_u32_le(0x000000EF);
        let patch_site = buf.position() - 4;
        buf.fixups.push(FixUp {
            patch_site,
            target: FixUpTarget::Function(name.clone()),
            is_conditional: false,
        });
    }
}

fn r_type(opcode: u32, rd: u32, funct3: u32, rs1: u32, rs2: u32, funct7: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    (((imm as u32) & 0xFFF) << 20) | (rs1 << 15) | (0b000 << 12) | (rd << 7) | 0b0010011
}

fn sd(rs2: u32, rs1: u32, imm: u32) -> u32 {
    let imm = imm & 0xFFF;
    ((imm >> 5) << 25) | (rs2 << 20) | (rs1 << 15) | (0b011 << 12) | ((imm & 0x1F) << 7) | 0b0100011
}

fn ld(rd: u32, rs1: u32, imm: u32) -> u32 {
    ((imm & 0xFFF) << 20) | (rs1 << 15) | (0b011 << 12) | (rd << 7) | 0b0000011
}

fn srli(rd: u32, rs1: u32, shamt: u32) -> u32 {
    (shamt << 20) | (rs1 << 15) | (0b101 << 12) | (rd << 7) | 0b0010011
}

fn beqz(rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (0b000 << 12) | 0b1100011
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::compile_module;
    use crate::ir::lower_module;
    use crate::parser::parse_source;

    #[test]
    fn prologue_saves_return_address_and_frame_pointer() {
        let (ast, diags) = parse_source("fn main() -> i32 { return 0; }", "t.sr");
        assert!(!diags.has_errors());
        let (ir, _) = lower_module(&ast).unwrap();
        let mut backend = Riscv64Backend::new();
        let buf = compile_module(&mut backend, &ir);
        assert!(buf.function_offsets.contains_key("main"));
        assert!(buf.bytes.len() >= 16);
    }
}
