//! Celestial IR data model (§3, §4.3).
//!
//! Everything mutable goes through `ALLOCA`/`LOAD`/`STORE` (§4.3 "Variable
//! storage policy"), so there is no `PHI` opcode: an `if`/`match` used as an
//! expression lowers to a temporary stack slot written from each arm and
//! read back at the merge block.

use super::types::IrTypeId;
use super::value::{ConstValue, ValueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Const,
    Alloca,
    Load,
    Store,
    Gep,
    ArrayGep,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Trunc,
    Sext,
    Zext,
    Call,
    CallIndirect,
    Syscall,
    Jump,
    Branch,
    Return,
    VoidTest,
    VoidProp,
    VoidAssert,
    VoidCoalesce,
    CapLoad,
    CapStore,
    SubstrateEnter,
    SubstrateExit,
    Extract,
    /// A folded-away instruction (§4.4 "Replaces the folded instruction's
    /// opcode with NOP and rewires users to the constant value").
    Nop,
    // Deliberately no SWITCH or UNREACHABLE: lowering always expands a
    // match into a chain of Eq-test/Branch blocks (see lower_match) and
    // nothing in this pipeline ever proves a block unreachable, so neither
    // opcode would ever be emitted. Add both here and to is_terminator
    // below before any pass starts emitting them.
}

impl Opcode {
    /// Opcodes with no observable side effect, eligible for dead-code
    /// elimination when unused (§4.4).
    pub fn is_pure(self) -> bool {
        matches!(
            self,
            Opcode::Const
                | Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::Eq
                | Opcode::Ne
                | Opcode::Lt
                | Opcode::Le
                | Opcode::Gt
                | Opcode::Ge
                | Opcode::Gep
                | Opcode::ArrayGep
                | Opcode::Extract
                | Opcode::Trunc
                | Opcode::Sext
                | Opcode::Zext
        )
    }

    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::Branch | Opcode::Return)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(ValueId),
    Const(ConstValue),
    Block(BlockId),
    /// Direct-call / syscall target or field/array index, depending on
    /// opcode position.
    Symbol(String),
    Index(u32),
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub result: Option<ValueId>,
    pub ty: IrTypeId,
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        BasicBlock {
            id,
            instructions: Vec::new(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(|i| i.opcode.is_terminator())
    }
}

#[derive(Debug, Clone)]
pub struct IrFunction {
    pub name: String,
    pub params: Vec<(String, IrTypeId)>,
    pub return_type: IrTypeId,
    pub blocks: Vec<BasicBlock>,
    pub next_value: u32,
    /// `Some` for an `extern`/forward-declared function with no body.
    pub is_declaration: bool,
    pub effects_declared: u32,
}

impl IrFunction {
    pub fn fresh_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        self.blocks
            .iter_mut()
            .find(|b| b.id == id)
            .expect("block id must exist in its own function")
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.blocks
            .iter()
            .find(|b| b.id == id)
            .expect("block id must exist in its own function")
    }
}

#[derive(Debug, Clone, Default)]
pub struct IrModule {
    pub functions: Vec<IrFunction>,
    pub globals: Vec<(String, IrTypeId, Option<ConstValue>)>,
}

impl IrModule {
    pub fn find_function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}
