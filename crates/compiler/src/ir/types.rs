//! Interned IR type table (§4.3 "Type resolution").
//!
//! Types are interned so two structurally equal types compare by a cheap
//! `IrTypeId` equality check instead of a deep walk; this matters once the
//! verifier and backends are doing it on every instruction operand.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrTypeId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
    Void,
    /// Fixed-point Q32.32, backing `scalar`/`dual`/`galactic` (§4.3, §4.1).
    FixedPoint(FixedPointWidth),
    Pointer(IrTypeId),
    Array { elem: IrTypeId, len: u64 },
    Struct { name: String, fields: Vec<IrTypeId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixedPointWidth {
    Scalar,
    Dual,
    Galactic,
}

impl IrType {
    /// Byte size used for `ALLOCA`, pointer-arithmetic scaling, and GEP
    /// offset computation (§4.3, §4.5 `ALLOCA`).
    pub fn size_of(&self, table: &TypeTable) -> u64 {
        match self {
            IrType::I8 | IrType::U8 | IrType::Bool => 1,
            IrType::I16 | IrType::U16 => 2,
            IrType::I32 | IrType::U32 => 4,
            IrType::I64 | IrType::U64 | IrType::Pointer(_) | IrType::FixedPoint(_) => 8,
            IrType::Void => 0,
            IrType::Array { elem, len } => table.get(*elem).size_of(table) * len,
            IrType::Struct { fields, .. } => fields.iter().map(|f| table.get(*f).size_of(table)).sum(),
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, IrType::Pointer(_))
    }
}

/// Pointer width used as the fallback for a struct reference that can't be
/// resolved yet (§4.3: "fall back to i64 ... so pointer graphs work without
/// a fixpoint").
pub const POINTER_WIDTH_FALLBACK: IrType = IrType::I64;

#[derive(Debug, Default)]
pub struct TypeTable {
    types: Vec<IrType>,
    interned: HashMap<IrType, IrTypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        TypeTable::default()
    }

    pub fn intern(&mut self, ty: IrType) -> IrTypeId {
        if let Some(id) = self.interned.get(&ty) {
            return *id;
        }
        let id = IrTypeId(self.types.len() as u32);
        self.interned.insert(ty.clone(), id);
        self.types.push(ty);
        id
    }

    pub fn get(&self, id: IrTypeId) -> &IrType {
        &self.types[id.0 as usize]
    }

    pub fn pointer_to(&mut self, pointee: IrTypeId) -> IrTypeId {
        self.intern(IrType::Pointer(pointee))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates_equal_types() {
        let mut table = TypeTable::new();
        let a = table.intern(IrType::I32);
        let b = table.intern(IrType::I32);
        assert_eq!(a, b);
    }

    #[test]
    fn struct_size_sums_field_sizes() {
        let mut table = TypeTable::new();
        let i32_ty = table.intern(IrType::I32);
        let i64_ty = table.intern(IrType::I64);
        let st = table.intern(IrType::Struct {
            name: "P".into(),
            fields: vec![i32_ty, i64_ty],
        });
        assert_eq!(table.get(st).size_of(&table), 12);
    }
}
