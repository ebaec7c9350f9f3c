//! Target backends (C8, §4.5).
//!
//! All three backends share the same per-function state machine and
//! register-allocation policy; only instruction encoding differs. The
//! shared driver in this module walks blocks and resolves fix-ups so each
//! backend only has to implement [`Backend::lower_instruction`] and the
//! prologue/epilogue pair.

pub mod aarch64;
pub mod regalloc;
pub mod riscv64;
pub mod x64;

use crate::ir::{BasicBlock, BlockId, IrFunction, IrModule, Instruction};

pub use regalloc::RegisterAllocator;

/// A fix-up records a branch/call whose displacement couldn't be known
/// until every block (and `main`'s offset, for the startup stub) had been
/// emitted (§4.5 "JUMP/BRANCH").
#[derive(Debug, Clone)]
pub struct FixUp {
    pub patch_site: usize,
    pub target: FixUpTarget,
    pub is_conditional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixUpTarget {
    Block(String, BlockId),
    Function(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Unstarted,
    PrologueEmitted,
    BlockEmitting(u32),
    FixupsResolved,
    Complete,
}

/// A relocation the object writer must resolve at link/load time (§4.7
/// "Relocations").
#[derive(Debug, Clone)]
pub struct Relocation {
    pub offset: u32,
    pub kind: RelocationKind,
    pub symbol: String,
    pub addend: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    PcRel32,
    Plt32,
}

#[derive(Debug, Default)]
pub struct CodeBuffer {
    pub bytes: Vec<u8>,
    pub fixups: Vec<FixUp>,
    pub relocations: Vec<Relocation>,
    /// Byte offset of the start of each emitted function, keyed by name;
    /// lets the module-startup stub patch its `call main` once `main` is
    /// known (§4.5 "Module startup stub").
    pub function_offsets: std::collections::HashMap<String, usize>,
    pub block_offsets: std::collections::HashMap<(String, BlockId), usize>,
}

impl CodeBuffer {
    pub fn emit_u8(&mut self, b: u8) {
        self.bytes.push(b);
    }

    pub fn emit_bytes(&mut self, bs: &[u8]) {
        self.bytes.extend_from_slice(bs);
    }

    pub fn emit_u32_le(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn position(&self) -> usize {
        self.bytes.len()
    }
}

/// Shared surface every backend implements; the driver in [`compile_module`]
/// owns block iteration and fix-up resolution so each backend only encodes
/// instructions (§4.5).
pub trait Backend {
    fn name(&self) -> &'static str;

    fn emit_prologue(&mut self, buf: &mut CodeBuffer, func: &IrFunction, frame_size: u32);

    fn emit_epilogue(&mut self, buf: &mut CodeBuffer, func: &IrFunction, frame_size: u32);

    fn lower_instruction(
        &mut self,
        buf: &mut CodeBuffer,
        func: &IrFunction,
        block: &BasicBlock,
        instr: &Instruction,
        alloc: &RegisterAllocator,
    );

    /// `call main; syscall(exit, status=0)` with the call displacement
    /// patched once `main`'s offset is known (§4.5 "Module startup stub").
    fn emit_startup_stub(&mut self, buf: &mut CodeBuffer);

    /// Rewrites every recorded fix-up now that all blocks and functions
    /// have known offsets.
    fn resolve_fixups(&mut self, buf: &mut CodeBuffer);
}

/// Drives one backend across an entire module: per function, emit prologue,
/// walk blocks lowering each instruction, emit epilogue, then resolve
/// fix-ups once every function's offset is known (§4.5 "State machine per
/// function").
pub fn compile_module(backend: &mut dyn Backend, module: &IrModule) -> CodeBuffer {
    let mut buf = CodeBuffer::default();

    backend.emit_startup_stub(&mut buf);

    for func in &module.functions {
        if func.is_declaration {
            continue;
        }
        // unstarted -> prologue-emitted -> block-N-emitting (0..k-1) below;
        // the caller's single `resolve_fixups` call after this loop is the
        // fixups-resolved -> complete transition (§4.5 "State machine per
        // function").
        buf.function_offsets.insert(func.name.clone(), buf.position());

        let alloc = RegisterAllocator::new(func);
        let frame_size = alloc.frame_size();

        let mut state = BackendState::Unstarted;
        backend.emit_prologue(&mut buf, func, frame_size);
        state = advance(state, BackendState::PrologueEmitted);

        for (i, block) in func.blocks.iter().enumerate() {
            state = advance(state, BackendState::BlockEmitting(i as u32));
            buf.block_offsets.insert((func.name.clone(), block.id), buf.position());
            for instr in &block.instructions {
                backend.lower_instruction(&mut buf, func, block, instr, &alloc);
            }
        }

        backend.emit_epilogue(&mut buf, func, frame_size);
        let _ = state;
    }

    backend.resolve_fixups(&mut buf);
    buf
}

/// No transition may repeat (§4.5 "No state may repeat"); this asserts the
/// driver itself honors that instead of merely documenting it.
fn advance(from: BackendState, to: BackendState) -> BackendState {
    debug_assert_ne!(from, to, "backend state machine must not repeat a state");
    to
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::lower_module;
    use crate::parser::parse_source;

    #[test]
    fn compiling_hello_world_on_x64_produces_nonempty_code() {
        let (ast, diags) = parse_source("fn main() -> i32 { return 0; }", "t.sr");
        assert!(!diags.has_errors());
        let (ir, _) = lower_module(&ast).unwrap();
        let mut backend = x64::X64Backend::new();
        let buf = compile_module(&mut backend, &ir);
        assert!(!buf.bytes.is_empty());
        assert!(buf.function_offsets.contains_key("main"));
    }

    #[test]
    fn all_three_backends_produce_a_main_symbol() {
        let (ast, diags) = parse_source("fn main() -> i32 { return 1; }", "t.sr");
        assert!(!diags.has_errors());
        let (ir, _) = lower_module(&ast).unwrap();

        let mut x64b = x64::X64Backend::new();
        let x64_buf = compile_module(&mut x64b, &ir);
        assert!(x64_buf.function_offsets.contains_key("main"));

        let mut aarch64b = aarch64::Aarch64Backend::new();
        let aarch64_buf = compile_module(&mut aarch64b, &ir);
        assert!(aarch64_buf.function_offsets.contains_key("main"));

        let mut riscv64b = riscv64::Riscv64Backend::new();
        let riscv64_buf = compile_module(&mut riscv64b, &ir);
        assert!(riscv64_buf.function_offsets.contains_key("main"));
    }
}
