//! Simplified per-function register allocation shared by all three
//! backends (§4.5 "Register allocation").
//!
//! This is the documented simplification: rather than a full linear-scan
//! over computed live ranges, `get(vreg)` maps the first 16 virtual
//! registers round-robin onto a target's caller-saved bank and the next
//! block onto its callee-saved bank; anything beyond that spills to a
//! frame slot. It's sound (every vreg gets a stable location for its
//! lifetime) but not tight — a real allocator would reuse registers across
//! non-overlapping live ranges.

use crate::ir::{IrFunction, Opcode};

pub const CALLER_SAVED_BAND: u32 = 16;
pub const CALLEE_SAVED_BAND: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    CallerSaved(u32),
    CalleeSaved(u32),
    Spill(u32),
}

pub struct RegisterAllocator {
    locations: std::collections::HashMap<u32, Location>,
    frame_size: u32,
}

impl RegisterAllocator {
    pub fn new(func: &IrFunction) -> Self {
        let mut locations = std::collections::HashMap::new();
        let mut spill_slots = 0u32;
        let mut alloca_bytes = 0u32;

        for block in &func.blocks {
            for instr in &block.instructions {
                let Some(result) = instr.result else { continue };
                let vreg = result.0;
                if locations.contains_key(&vreg) {
                    continue;
                }
                let loc = if vreg < CALLER_SAVED_BAND {
                    Location::CallerSaved(vreg)
                } else if vreg < CALLEE_SAVED_BAND {
                    Location::CalleeSaved(vreg - CALLER_SAVED_BAND)
                } else {
                    let slot = spill_slots;
                    spill_slots += 1;
                    Location::Spill(slot)
                };
                locations.insert(vreg, loc);

                if instr.opcode == Opcode::Alloca {
                    alloca_bytes += 8;
                }
            }
        }

        let frame_size = alloca_bytes + spill_slots * 8;
        RegisterAllocator { locations, frame_size }
    }

    pub fn get(&self, vreg: u32) -> Location {
        self.locations
            .get(&vreg)
            .copied()
            .unwrap_or(Location::Spill(0))
    }

    pub fn frame_size(&self) -> u32 {
        // Round up to a 16-byte boundary, matching every target ABI's
        // stack-alignment requirement at a call boundary.
        (self.frame_size + 15) & !15
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::lower_module;
    use crate::parser::parse_source;

    #[test]
    fn frame_size_is_sixteen_byte_aligned() {
        let (ast, diags) = parse_source("fn f() -> i64 { let a: i64 = 1; let b: i64 = 2; return a + b; }", "t.sr");
        assert!(!diags.has_errors());
        let (ir, _) = lower_module(&ast).unwrap();
        let f = ir.find_function("f").unwrap();
        let alloc = RegisterAllocator::new(f);
        assert_eq!(alloc.frame_size() % 16, 0);
    }

    #[test]
    fn first_sixteen_vregs_map_to_caller_saved() {
        let (ast, diags) = parse_source("fn f() -> i64 { return 1 + 2; }", "t.sr");
        assert!(!diags.has_errors());
        let (ir, _) = lower_module(&ast).unwrap();
        let f = ir.find_function("f").unwrap();
        let alloc = RegisterAllocator::new(f);
        assert!(matches!(alloc.get(0), Location::CallerSaved(0)));
    }
}
