//! Celestial IR: data model, lowering, and the utility passes of §4.4.

pub mod dump;
pub mod fold;
pub mod lower;
pub mod module;
pub mod pattern;
pub mod types;
pub mod value;
pub mod verify;

pub use dump::dump_module;
pub use fold::{eliminate_dead_code, fold_constants};
pub use lower::{lower_module, LowerError};
pub use module::{BasicBlock, BlockId, IrFunction, IrModule, Instruction, Opcode, Operand};
pub use pattern::run_pattern_optimizer;
pub use types::{FixedPointWidth, IrType, IrTypeId, TypeTable};
pub use value::{ConstValue, Symbol, ValueId};
pub use verify::{verify_module, VerifyError};
