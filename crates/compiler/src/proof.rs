//! Proof generator (C9, §4.6).
//!
//! Walks the AST and appends one entry per checked construct. Three running
//! counters track `proven`/`runtime`/`failed` entries; each entry's 32-byte
//! hash becomes a leaf of the Merkle tree whose root is embedded in the
//! image header (§4.7 "proof_root").

use std::collections::HashSet;

use seraphic_core::SourceLocation;

use crate::ast::{Decl, Expr, ExprKind, FunctionDecl, LetDecl, Module, Stmt};
use crate::merkle::{leaf_hash, Hash32};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofKind {
    Bounds,
    Void,
    Effect,
    Permission,
    Generation,
    Substrate,
    Type,
    Init,
    Overflow,
    Null,
    Invariant,
    Termination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofStatus {
    Proven,
    Assumed,
    Runtime,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ProofEntry {
    pub kind: ProofKind,
    pub status: ProofStatus,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub description: String,
}

impl ProofEntry {
    fn new(kind: ProofKind, status: ProofStatus, loc: SourceLocation, description: impl Into<String>) -> Self {
        ProofEntry {
            kind,
            status,
            file: loc.file.to_string(),
            line: loc.line,
            column: loc.column,
            description: description.into(),
        }
    }

    /// Digest of this entry's binary representation (§4.6 "A proof entry's
    /// 32-byte hash is the digest of its binary representation").
    pub fn hash(&self) -> Hash32 {
        let mut bytes = Vec::new();
        bytes.push(self.kind as u8);
        bytes.push(self.status as u8);
        bytes.extend_from_slice(self.file.as_bytes());
        bytes.extend_from_slice(&self.line.to_le_bytes());
        bytes.extend_from_slice(&self.column.to_le_bytes());
        bytes.extend_from_slice(self.description.as_bytes());
        leaf_hash(&bytes)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProofCounters {
    pub proven: u32,
    pub runtime: u32,
    pub failed: u32,
}

#[derive(Debug, Default)]
pub struct ProofTable {
    pub entries: Vec<ProofEntry>,
    pub counters: ProofCounters,
}

impl ProofTable {
    fn push(&mut self, entry: ProofEntry) {
        match entry.status {
            ProofStatus::Proven | ProofStatus::Assumed => self.counters.proven += 1,
            ProofStatus::Runtime => self.counters.runtime += 1,
            ProofStatus::Failed => self.counters.failed += 1,
            ProofStatus::Skipped => {}
        }
        self.entries.push(entry);
    }

    pub fn entry_hashes(&self) -> Vec<Hash32> {
        self.entries.iter().map(|e| e.hash()).collect()
    }
}

/// One syntactic tag per §4.6's `EffectAnnotation` vocabulary, tracked
/// separately from the compile-time effect declaration so a function's
/// actual body can be compared against what it claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ObservedEffect {
    Void,
    Persist,
    Network,
    Io,
}

pub fn generate_proofs(module: &Module) -> ProofTable {
    let mut table = ProofTable::default();
    for decl in &module.decls {
        walk_decl(decl, &mut table);
    }
    table
}

fn walk_decl(decl: &Decl, table: &mut ProofTable) {
    match decl {
        Decl::Function(f) => walk_function(f, table),
        Decl::Let(l) => walk_let(l, table),
        Decl::Impl(impl_decl) => {
            for method in &impl_decl.methods {
                walk_function(method, table);
            }
        }
        Decl::Struct(_) | Decl::Enum(_) => {}
    }
}

fn walk_function(f: &FunctionDecl, table: &mut ProofTable) {
    let mut observed = HashSet::new();
    if let Some(body) = &f.body {
        for stmt in &body.stmts {
            walk_stmt(stmt, table, &mut observed);
        }
        if let Some(tail) = &body.tail {
            walk_expr(tail, table, &mut observed);
        }
    }

    let declared: HashSet<crate::ast::Effect> = f
        .effects
        .as_ref()
        .map(|a| a.effects.iter().copied().collect())
        .unwrap_or_default();

    let declares = |e: crate::ast::Effect| declared.contains(&e);
    let mismatch = (observed.contains(&ObservedEffect::Void) && !declares(crate::ast::Effect::Void))
        || (observed.contains(&ObservedEffect::Persist) && !declares(crate::ast::Effect::Persist))
        || (observed.contains(&ObservedEffect::Network) && !declares(crate::ast::Effect::Network))
        || (observed.contains(&ObservedEffect::Io) && !declares(crate::ast::Effect::Io));

    let status = if mismatch { ProofStatus::Failed } else { ProofStatus::Proven };
    table.push(ProofEntry::new(
        ProofKind::Effect,
        status,
        f.span,
        format!("allowed-effects mask vs declared-effects mask for `{}`", f.name),
    ));
}

fn walk_let(l: &LetDecl, table: &mut ProofTable) {
    if l.init.is_some() {
        table.push(ProofEntry::new(
            ProofKind::Init,
            ProofStatus::Proven,
            l.span,
            "variable initialized at declaration",
        ));
    }
    if let Some(init) = &l.init {
        let mut observed = HashSet::new();
        walk_expr(init, table, &mut observed);
    }
}

fn walk_stmt(stmt: &Stmt, table: &mut ProofTable, observed: &mut HashSet<ObservedEffect>) {
    match stmt {
        Stmt::Expr(e) | Stmt::Return(Some(e), _) => walk_expr(e, table, observed),
        Stmt::Return(None, _) | Stmt::Break(_) | Stmt::Continue(_) => {}
        Stmt::While { cond, body, .. } => {
            walk_expr(cond, table, observed);
            walk_block(body, table, observed);
        }
        Stmt::For { start, end, body, .. } => {
            walk_expr(start, table, observed);
            walk_expr(end, table, observed);
            walk_block(body, table, observed);
        }
        Stmt::Persist(body, span) => {
            observed.insert(ObservedEffect::Persist);
            table.push(ProofEntry::new(
                ProofKind::Substrate,
                ProofStatus::Runtime,
                *span,
                "persist block requires Atlas transaction",
            ));
            walk_block(body, table, observed);
        }
        Stmt::Aether(body, span) => {
            observed.insert(ObservedEffect::Network);
            table.push(ProofEntry::new(
                ProofKind::Substrate,
                ProofStatus::Runtime,
                *span,
                "aether block requires network context",
            ));
            walk_block(body, table, observed);
        }
        Stmt::Recover(body, span) => {
            table.push(ProofEntry::new(
                ProofKind::Void,
                ProofStatus::Proven,
                *span,
                "recover block handles VOID values",
            ));
            walk_block(body, table, observed);
        }
        Stmt::Let(l) => {
            if l.init.is_some() {
                table.push(ProofEntry::new(
                    ProofKind::Init,
                    ProofStatus::Proven,
                    l.span,
                    "variable initialized at declaration",
                ));
            }
            if let Some(init) = &l.init {
                walk_expr(init, table, observed);
            }
        }
    }
}

fn walk_block(block: &crate::ast::Block, table: &mut ProofTable, observed: &mut HashSet<ObservedEffect>) {
    for stmt in &block.stmts {
        walk_stmt(stmt, table, observed);
    }
    if let Some(tail) = &block.tail {
        walk_expr(tail, table, observed);
    }
}

fn walk_expr(expr: &Expr, table: &mut ProofTable, observed: &mut HashSet<ObservedEffect>) {
    match &expr.kind {
        ExprKind::Index { base, index } => {
            walk_expr(base, table, observed);
            walk_expr(index, table, observed);
            table.push(ProofEntry::new(
                ProofKind::Bounds,
                ProofStatus::Runtime,
                expr.span,
                "runtime bounds check inserted",
            ));
        }
        ExprKind::VoidPropagate(inner) => {
            walk_expr(inner, table, observed);
            observed.insert(ObservedEffect::Void);
            table.push(ProofEntry::new(
                ProofKind::Void,
                ProofStatus::Proven,
                expr.span,
                "VOID propagated via ??",
            ));
        }
        ExprKind::VoidAssert(inner) => {
            walk_expr(inner, table, observed);
            observed.insert(ObservedEffect::Void);
            table.push(ProofEntry::new(
                ProofKind::Void,
                ProofStatus::Runtime,
                expr.span,
                "VOID assertion !! may panic",
            ));
        }
        ExprKind::VoidCoalesce { expr: inner, default } => {
            walk_expr(inner, table, observed);
            walk_expr(default, table, observed);
            observed.insert(ObservedEffect::Void);
        }
        ExprKind::Binary { op, lhs, rhs } => {
            walk_expr(lhs, table, observed);
            walk_expr(rhs, table, observed);
            if matches!(op, crate::ast::BinaryOp::Div | crate::ast::BinaryOp::Mod) {
                observed.insert(ObservedEffect::Void);
                table.push(ProofEntry::new(
                    ProofKind::Void,
                    ProofStatus::Runtime,
                    expr.span,
                    "division may produce VOID (div by zero)",
                ));
            }
        }
        ExprKind::Unary { expr: inner, .. } => walk_expr(inner, table, observed),
        ExprKind::Assign { target, value } => {
            walk_expr(target, table, observed);
            walk_expr(value, table, observed);
        }
        ExprKind::Field { base, .. } => walk_expr(base, table, observed),
        ExprKind::Call { callee, args } => {
            walk_expr(callee, table, observed);
            if let ExprKind::Ident(name) = &callee.kind {
                if name.starts_with("__syscall") {
                    observed.insert(ObservedEffect::Io);
                }
            }
            for arg in args {
                walk_expr(arg, table, observed);
            }
        }
        ExprKind::MethodCall { receiver, args, .. } => {
            walk_expr(receiver, table, observed);
            for arg in args {
                walk_expr(arg, table, observed);
            }
        }
        ExprKind::Closure { body, .. } => walk_block(body, table, observed),
        ExprKind::Array(items) => {
            for item in items {
                walk_expr(item, table, observed);
            }
        }
        ExprKind::StructInit { fields, .. } => {
            for field in fields {
                walk_expr(&field.value, table, observed);
            }
        }
        ExprKind::Cast { expr: inner, .. } => walk_expr(inner, table, observed),
        ExprKind::Range { start, end, .. } => {
            walk_expr(start, table, observed);
            walk_expr(end, table, observed);
        }
        ExprKind::If { cond, then_branch, else_branch } => {
            walk_expr(cond, table, observed);
            walk_block(then_branch, table, observed);
            if let Some(else_branch) = else_branch {
                walk_expr(else_branch, table, observed);
            }
        }
        ExprKind::Match { scrutinee, arms } => {
            walk_expr(scrutinee, table, observed);
            for arm in arms {
                walk_expr(&arm.body, table, observed);
            }
        }
        ExprKind::Block(block) => walk_block(block, table, observed),
        ExprKind::Int(..)
        | ExprKind::Float(_)
        | ExprKind::Bool(_)
        | ExprKind::Char(_)
        | ExprKind::Str(_)
        | ExprKind::Void
        | ExprKind::Ident(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    #[test]
    fn array_index_produces_a_runtime_bounds_entry() {
        let (ast, diags) = parse_source(
            "fn f(a: [i64; 4]) -> i64 { return a[0]; }",
            "t.sr",
        );
        assert!(!diags.has_errors());
        let table = generate_proofs(&ast);
        assert!(table
            .entries
            .iter()
            .any(|e| matches!(e.kind, ProofKind::Bounds) && matches!(e.status, ProofStatus::Runtime)));
    }

    #[test]
    fn division_produces_a_runtime_void_entry() {
        let (ast, diags) = parse_source("fn f(a: i64, b: i64) -> i64 { return a / b; }", "t.sr");
        assert!(!diags.has_errors());
        let table = generate_proofs(&ast);
        assert!(table
            .entries
            .iter()
            .any(|e| matches!(e.kind, ProofKind::Void) && e.description.contains("division")));
    }

    #[test]
    fn undeclared_persist_effect_fails_the_effect_proof() {
        let (ast, diags) = parse_source("fn f() -> i64 { persist { return 1; } return 0; }", "t.sr");
        assert!(!diags.has_errors());
        let table = generate_proofs(&ast);
        let effect_entry = table
            .entries
            .iter()
            .find(|e| matches!(e.kind, ProofKind::Effect))
            .unwrap();
        assert!(matches!(effect_entry.status, ProofStatus::Failed));
    }

    #[test]
    fn let_with_initializer_is_proven() {
        let (ast, diags) = parse_source("fn f() -> i64 { let a: i64 = 1; return a; }", "t.sr");
        assert!(!diags.has_errors());
        let table = generate_proofs(&ast);
        assert!(table
            .entries
            .iter()
            .any(|e| matches!(e.kind, ProofKind::Init) && matches!(e.status, ProofStatus::Proven)));
    }

    #[test]
    fn merkle_root_is_deterministic_for_the_same_table() {
        let (ast, diags) = parse_source("fn f(a: i64, b: i64) -> i64 { return a / b; }", "t.sr");
        assert!(!diags.has_errors());
        let table = generate_proofs(&ast);
        let root_a = crate::merkle::merkle_root(&table.entry_hashes());
        let root_b = crate::merkle::merkle_root(&table.entry_hashes());
        assert_eq!(root_a, root_b);
    }
}
