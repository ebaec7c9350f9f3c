//! AST -> IR lowering (C5, §4.3).

use std::collections::HashMap;

use crate::ast::{
    self, BinaryOp as AstBinOp, Block as AstBlock, Decl, Expr, ExprKind, PrimitiveType, Stmt,
    Type as AstType, UnaryOp as AstUnOp,
};
use crate::token::NumSuffix;

use super::module::{BasicBlock, BlockId, IrFunction, IrModule, Instruction, Opcode, Operand};
use super::types::{FixedPointWidth, IrType, IrTypeId, TypeTable};
use super::value::{ConstValue, Symbol, ValueId};

/// Any lowering failure is fatal for the whole compilation (§4.3
/// "Responsibility").
#[derive(Debug)]
pub enum LowerError {
    UnknownIdent(String),
    UnknownType(String),
    UnknownField { struct_name: String, field: String },
    InvalidAssignTarget,
    NotCallable(String),
    ClosureCaptureUnsupported,
}

impl std::fmt::Display for LowerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LowerError::UnknownIdent(name) => write!(f, "unknown identifier '{name}'"),
            LowerError::UnknownType(name) => write!(f, "unknown type '{name}'"),
            LowerError::UnknownField { struct_name, field } => {
                write!(f, "struct '{struct_name}' has no field '{field}'")
            }
            LowerError::InvalidAssignTarget => {
                write!(f, "assignment target must be an identifier, field, or index")
            }
            LowerError::NotCallable(name) => write!(f, "'{name}' is not callable"),
            LowerError::ClosureCaptureUnsupported => {
                write!(f, "closures may not capture surrounding variables")
            }
        }
    }
}

impl std::error::Error for LowerError {}

type LResult<T> = Result<T, LowerError>;

#[derive(Debug, Clone)]
struct StructInfo {
    fields: Vec<(String, IrTypeId)>,
}

impl StructInfo {
    fn field_index(&self, name: &str) -> Option<(usize, IrTypeId)> {
        self.fields
            .iter()
            .position(|(n, _)| n == name)
            .map(|idx| (idx, self.fields[idx].1))
    }
}

pub struct Lowerer {
    module: IrModule,
    types: TypeTable,
    structs: HashMap<String, StructInfo>,
    scopes: Vec<HashMap<String, Symbol>>,
    cur_fn: usize,
    cur_block: BlockId,
    block_counter: u32,
    closure_counter: u32,
    loop_stack: Vec<(BlockId, BlockId)>,
}

impl Lowerer {
    pub fn new() -> Self {
        Lowerer {
            module: IrModule::default(),
            types: TypeTable::new(),
            structs: HashMap::new(),
            scopes: Vec::new(),
            cur_fn: 0,
            cur_block: BlockId(0),
            block_counter: 0,
            closure_counter: 0,
            loop_stack: Vec::new(),
        }
    }

    pub fn lower(mut self, ast: &ast::Module) -> LResult<(IrModule, TypeTable)> {
        // Pass 1: register struct layouts so forward references resolve.
        for decl in &ast.decls {
            if let Decl::Struct(s) = decl {
                self.register_struct(s)?;
            }
        }
        // Pass 2: lower top-level functions and impl methods.
        for decl in &ast.decls {
            match decl {
                Decl::Function(f) => self.lower_function(f, None)?,
                Decl::Impl(imp) => {
                    for method in &imp.methods {
                        self.lower_function(method, Some(imp.type_name))?;
                    }
                }
                Decl::Let(l) => self.lower_global(l)?,
                Decl::Struct(_) | Decl::Enum(_) => {}
            }
        }
        Ok((self.module, self.types))
    }

    fn register_struct(&mut self, s: &ast::StructDecl) -> LResult<()> {
        // Placeholder entry first so self-referential pointer fields resolve
        // to the i64 fallback instead of recursing (§4.3 "Type resolution").
        self.structs.insert(
            s.name.to_string(),
            StructInfo { fields: Vec::new() },
        );
        let mut fields = Vec::with_capacity(s.fields.len());
        for field in &s.fields {
            let ty = self.lower_type(&field.ty);
            fields.push((field.name.to_string(), ty));
        }
        self.structs.insert(s.name.to_string(), StructInfo { fields });
        Ok(())
    }

    fn lower_global(&mut self, l: &ast::LetDecl) -> LResult<()> {
        let ty = l
            .ty
            .as_ref()
            .map(|t| self.lower_type(t))
            .unwrap_or_else(|| self.types.intern(IrType::I64));
        let init = match &l.init {
            Some(Expr {
                kind: ExprKind::Int(v, _),
                ..
            }) => Some(ConstValue::Int(*v)),
            Some(Expr {
                kind: ExprKind::Bool(b),
                ..
            }) => Some(ConstValue::Bool(*b)),
            _ => None,
        };
        self.module.globals.push((l.name.to_string(), ty, init));
        Ok(())
    }

    fn lower_type(&mut self, ty: &AstType) -> IrTypeId {
        match ty {
            AstType::Primitive(p) => self.types.intern(primitive_ir_type(*p)),
            AstType::Named(name) => {
                if let Some(info) = self.structs.get(*name) {
                    let fields: Vec<IrTypeId> = info.fields.iter().map(|(_, t)| *t).collect();
                    self.types.intern(IrType::Struct {
                        name: name.to_string(),
                        fields,
                    })
                } else {
                    // Forward/unknown reference: fall back to pointer width
                    // (§4.3 "so pointer graphs work without a fixpoint").
                    self.types.intern(super::types::POINTER_WIDTH_FALLBACK)
                }
            }
            AstType::Pointer(inner) | AstType::Reference { inner, .. } => {
                let pointee = self.lower_type(inner);
                self.types.pointer_to(pointee)
            }
            AstType::Array { elem, len } => {
                let elem_ty = self.lower_type(elem);
                self.types.intern(IrType::Array { elem: elem_ty, len: *len })
            }
            AstType::Slice(inner) => {
                let pointee = self.lower_type(inner);
                self.types.pointer_to(pointee)
            }
            AstType::Function { .. } => self.types.intern(IrType::I64),
            AstType::VoidAble(inner) => self.lower_type(inner),
        }
    }

    // -- function lowering --------------------------------------------

    fn lower_function(&mut self, f: &ast::FunctionDecl, receiver: Option<&str>) -> LResult<()> {
        let name = match receiver {
            Some(r) => format!("{r}_{}", f.name),
            None => f.name.to_string(),
        };
        let return_type = f
            .return_type
            .as_ref()
            .map(|t| self.lower_type(t))
            .unwrap_or_else(|| self.types.intern(IrType::Void));

        let mut params = Vec::with_capacity(f.params.len());
        for p in &f.params {
            params.push((p.name.to_string(), self.lower_type(&p.ty)));
        }

        let is_declaration = f.body.is_none();
        let irfn = IrFunction {
            name,
            params: params.clone(),
            return_type,
            blocks: Vec::new(),
            next_value: 0,
            is_declaration,
            effects_declared: encode_effects(&f.effects),
        };
        self.module.functions.push(irfn);
        self.cur_fn = self.module.functions.len() - 1;

        let Some(body) = &f.body else {
            return Ok(());
        };

        self.block_counter = 0;
        self.scopes.clear();
        self.scopes.push(HashMap::new());
        let entry = self.new_block();
        self.cur_block = entry;

        // Every parameter, including an aggregate, gets spilled into a
        // fresh alloca on entry (§4.3 "Variable storage policy").
        for (name, ty) in &params {
            let ptr_ty = self.types.pointer_to(*ty);
            let alloca = self.emit(Opcode::Alloca, ptr_ty, vec![]);
            let param_val = self.fn_mut().fresh_value();
            self.emit_raw(Instruction {
                result: Some(param_val),
                ty: *ty,
                opcode: Opcode::Const,
                operands: vec![Operand::Symbol(format!("%param:{name}"))],
            });
            let void_ty = self.types.intern(IrType::Void);
            self.emit(Opcode::Store, void_ty, vec![
                Operand::Value(alloca),
                Operand::Value(param_val),
            ]);
            let ptr_ty = self.types.pointer_to(*ty);
            self.bind(name.clone(), Symbol { value: alloca, ty: ptr_ty, is_mutable: true });
        }

        self.lower_block(body)?;

        if !self.fn_mut_block(self.cur_block).is_terminated() {
            let void_ty = self.types.intern(IrType::Void);
            self.emit(Opcode::Return, void_ty, vec![]);
        }
        self.scopes.pop();
        Ok(())
    }

    // -- block / scope helpers ------------------------------------------

    fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.block_counter);
        self.block_counter += 1;
        self.fn_mut().blocks.push(BasicBlock::new(id));
        id
    }

    fn fn_mut(&mut self) -> &mut IrFunction {
        &mut self.module.functions[self.cur_fn]
    }

    fn fn_mut_block(&mut self, id: BlockId) -> &mut BasicBlock {
        self.fn_mut().block_mut(id)
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: String, sym: Symbol) {
        self.scopes.last_mut().expect("scope stack non-empty").insert(name, sym);
    }

    fn lookup(&self, name: &str) -> Option<Symbol> {
        self.scopes.iter().rev().find_map(|s| s.get(name).cloned())
    }

    fn emit_raw(&mut self, instr: Instruction) {
        let block = self.cur_block;
        self.fn_mut_block(block).instructions.push(instr);
    }

    fn emit(&mut self, opcode: Opcode, ty: IrTypeId, operands: Vec<Operand>) -> ValueId {
        let result = self.fn_mut().fresh_value();
        self.emit_raw(Instruction {
            result: Some(result),
            ty,
            opcode,
            operands,
        });
        result
    }

    fn emit_void(&mut self, opcode: Opcode, operands: Vec<Operand>) {
        let void_ty = self.types.intern(IrType::Void);
        self.emit_raw(Instruction {
            result: None,
            ty: void_ty,
            opcode,
            operands,
        });
    }

    fn terminated(&mut self) -> bool {
        let block = self.cur_block;
        self.fn_mut_block(block).is_terminated()
    }

    // -- statements --------------------------------------------------------

    fn lower_block(&mut self, block: &AstBlock) -> LResult<()> {
        self.push_scope();
        for stmt in &block.stmts {
            if self.terminated() {
                break;
            }
            self.lower_stmt(stmt)?;
        }
        if !self.terminated() {
            if let Some(tail) = &block.tail {
                self.lower_expr(tail)?;
            }
        }
        self.pop_scope();
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> LResult<()> {
        match stmt {
            Stmt::Expr(e) => {
                self.lower_expr(e)?;
                Ok(())
            }
            Stmt::Let(l) => self.lower_let(l),
            Stmt::Return(value, _) => {
                let ty = self.fn_mut().return_type;
                let operands = match value {
                    Some(e) => {
                        let v = self.lower_expr(e)?;
                        vec![Operand::Value(v)]
                    }
                    None => vec![],
                };
                self.emit_raw(Instruction {
                    result: None,
                    ty,
                    opcode: Opcode::Return,
                    operands,
                });
                Ok(())
            }
            Stmt::Break(_) => {
                let (_, brk) = *self.loop_stack.last().expect("break outside loop");
                self.emit_void(Opcode::Jump, vec![Operand::Block(brk)]);
                Ok(())
            }
            Stmt::Continue(_) => {
                let (cont, _) = *self.loop_stack.last().expect("continue outside loop");
                self.emit_void(Opcode::Jump, vec![Operand::Block(cont)]);
                Ok(())
            }
            Stmt::While { cond, body, .. } => self.lower_while(cond, body),
            Stmt::For {
                var,
                start,
                end,
                inclusive,
                body,
                ..
            } => self.lower_for(var, start, end, *inclusive, body),
            Stmt::Persist(body, _) => self.lower_substrate(body, "persist"),
            Stmt::Aether(body, _) => self.lower_substrate(body, "aether"),
            Stmt::Recover(body, _) => self.lower_block(body),
        }
    }

    fn lower_let(&mut self, l: &ast::LetDecl) -> LResult<()> {
        let declared_ty = l.ty.as_ref().map(|t| self.lower_type(t));
        let init_val = match &l.init {
            Some(e) => Some(self.lower_expr(e)?),
            None => None,
        };
        let value_ty = declared_ty.unwrap_or_else(|| self.types.intern(IrType::I64));
        let ptr_ty = self.types.pointer_to(value_ty);
        let alloca = self.emit(Opcode::Alloca, ptr_ty, vec![]);
        if let Some(v) = init_val {
            self.emit_void(Opcode::Store, vec![Operand::Value(alloca), Operand::Value(v)]);
        }
        self.bind(
            l.name.to_string(),
            Symbol {
                value: alloca,
                ty: ptr_ty,
                is_mutable: l.mutable || !l.is_const,
            },
        );
        Ok(())
    }

    fn lower_while(&mut self, cond: &Expr, body: &AstBlock) -> LResult<()> {
        let cond_block = self.new_block();
        let body_block = self.new_block();
        let exit_block = self.new_block();

        self.emit_void(Opcode::Jump, vec![Operand::Block(cond_block)]);

        self.cur_block = cond_block;
        let c = self.lower_expr(cond)?;
        self.emit_void(
            Opcode::Branch,
            vec![Operand::Value(c), Operand::Block(body_block), Operand::Block(exit_block)],
        );

        self.loop_stack.push((cond_block, exit_block));
        self.cur_block = body_block;
        self.lower_block(body)?;
        if !self.terminated() {
            self.emit_void(Opcode::Jump, vec![Operand::Block(cond_block)]);
        }
        self.loop_stack.pop();

        self.cur_block = exit_block;
        Ok(())
    }

    fn lower_for(
        &mut self,
        var: &str,
        start: &Expr,
        end: &Expr,
        inclusive: bool,
        body: &AstBlock,
    ) -> LResult<()> {
        let i64_ty = self.types.intern(IrType::I64);
        let ptr_ty = self.types.pointer_to(i64_ty);

        let start_val = self.lower_expr(start)?;
        let counter = self.emit(Opcode::Alloca, ptr_ty, vec![]);
        self.emit_void(Opcode::Store, vec![Operand::Value(counter), Operand::Value(start_val)]);
        self.push_scope();
        self.bind(
            var.to_string(),
            Symbol {
                value: counter,
                ty: ptr_ty,
                is_mutable: true,
            },
        );

        let cond_block = self.new_block();
        let body_block = self.new_block();
        let incr_block = self.new_block();
        let exit_block = self.new_block();

        self.emit_void(Opcode::Jump, vec![Operand::Block(cond_block)]);

        self.cur_block = cond_block;
        let cur = self.emit(Opcode::Load, i64_ty, vec![Operand::Value(counter)]);
        let end_val = self.lower_expr(end)?;
        let cmp_op = if inclusive { Opcode::Le } else { Opcode::Lt };
        let bool_ty = self.types.intern(IrType::Bool);
        let cmp = self.emit(cmp_op, bool_ty, vec![Operand::Value(cur), Operand::Value(end_val)]);
        self.emit_void(
            Opcode::Branch,
            vec![Operand::Value(cmp), Operand::Block(body_block), Operand::Block(exit_block)],
        );

        self.loop_stack.push((incr_block, exit_block));
        self.cur_block = body_block;
        self.lower_block(body)?;
        if !self.terminated() {
            self.emit_void(Opcode::Jump, vec![Operand::Block(incr_block)]);
        }
        self.loop_stack.pop();

        self.cur_block = incr_block;
        let loaded = self.emit(Opcode::Load, i64_ty, vec![Operand::Value(counter)]);
        let one = self.emit(Opcode::Const, i64_ty, vec![Operand::Const(ConstValue::Int(1))]);
        let next = self.emit(Opcode::Add, i64_ty, vec![Operand::Value(loaded), Operand::Value(one)]);
        self.emit_void(Opcode::Store, vec![Operand::Value(counter), Operand::Value(next)]);
        self.emit_void(Opcode::Jump, vec![Operand::Block(cond_block)]);

        self.pop_scope();
        self.cur_block = exit_block;
        Ok(())
    }

    fn lower_substrate(&mut self, body: &AstBlock, kind: &str) -> LResult<()> {
        self.emit_void(Opcode::SubstrateEnter, vec![Operand::Symbol(kind.to_string())]);
        self.lower_block(body)?;
        if !self.terminated() {
            self.emit_void(Opcode::SubstrateExit, vec![Operand::Symbol(kind.to_string())]);
        }
        Ok(())
    }

    // -- expressions --------------------------------------------------------

    fn lower_expr(&mut self, expr: &Expr) -> LResult<ValueId> {
        match &expr.kind {
            ExprKind::Int(v, suffix) => {
                let ty = self.types.intern(int_suffix_type(*suffix));
                Ok(self.emit(Opcode::Const, ty, vec![Operand::Const(ConstValue::Int(*v))]))
            }
            ExprKind::Float(v) => {
                let bits = to_q32_32(*v);
                let ty = self.types.intern(IrType::FixedPoint(FixedPointWidth::Scalar));
                Ok(self.emit(Opcode::Const, ty, vec![Operand::Const(ConstValue::FixedPoint(bits))]))
            }
            ExprKind::Bool(b) => {
                let ty = self.types.intern(IrType::Bool);
                Ok(self.emit(Opcode::Const, ty, vec![Operand::Const(ConstValue::Bool(*b))]))
            }
            ExprKind::Char(c) => {
                let ty = self.types.intern(IrType::I32);
                Ok(self.emit(Opcode::Const, ty, vec![Operand::Const(ConstValue::Int(*c as u64))]))
            }
            ExprKind::Str(s) => {
                let i8_ty = self.types.intern(IrType::I8);
                let ty = self.types.pointer_to(i8_ty);
                Ok(self.emit(Opcode::Const, ty, vec![Operand::Symbol(format!("str:{s}"))]))
            }
            ExprKind::Void => {
                let ty = self.types.intern(IrType::I64);
                Ok(self.emit(Opcode::Const, ty, vec![Operand::Const(ConstValue::Void)]))
            }
            ExprKind::Ident(name) => {
                let sym = self
                    .lookup(name)
                    .ok_or_else(|| LowerError::UnknownIdent(name.to_string()))?;
                let pointee = self.pointee_of(sym.ty);
                Ok(self.emit(Opcode::Load, pointee, vec![Operand::Value(sym.value)]))
            }
            ExprKind::Unary { op, expr: inner } => self.lower_unary(*op, inner),
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(*op, lhs, rhs),
            ExprKind::Assign { target, value } => self.lower_assign(target, value),
            ExprKind::Field { base, field } => {
                let (addr, field_ty) = self.lower_field_address(base, field)?;
                Ok(self.emit(Opcode::Load, field_ty, vec![Operand::Value(addr)]))
            }
            ExprKind::Index { base, index } => {
                let base_val = self.lower_expr(base)?;
                let idx_val = self.lower_expr(index)?;
                let base_ty = self.value_type(base);
                let elem_ty = match self.types.get(base_ty) {
                    IrType::Pointer(p) | IrType::Array { elem: p, .. } => *p,
                    _ => self.types.intern(IrType::I64),
                };
                let elem_ptr_ty = self.types.pointer_to(elem_ty);
                let addr = self.emit(
                    Opcode::ArrayGep,
                    elem_ptr_ty,
                    vec![Operand::Value(base_val), Operand::Value(idx_val)],
                );
                Ok(self.emit(Opcode::Load, elem_ty, vec![Operand::Value(addr)]))
            }
            ExprKind::Call { callee, args } => self.lower_call(callee, args),
            ExprKind::MethodCall { receiver, method, args } => {
                self.lower_method_call(receiver, method, args)
            }
            ExprKind::Closure { params, body } => self.lower_closure(params, body),
            ExprKind::Array(elems) => {
                // Materialize into a fresh stack array and return its
                // address loaded element-by-element is unnecessary here;
                // the caller always immediately indexes or stores it.
                let first_ty = elems
                    .first()
                    .map(|e| self.value_type(e))
                    .unwrap_or_else(|| self.types.intern(IrType::I64));
                let arr_ty = self.types.intern(IrType::Array {
                    elem: first_ty,
                    len: elems.len() as u64,
                });
                let ptr_ty = self.types.pointer_to(arr_ty);
                let slot = self.emit(Opcode::Alloca, ptr_ty, vec![]);
                for (i, e) in elems.iter().enumerate() {
                    let v = self.lower_expr(e)?;
                    let first_ptr_ty = self.types.pointer_to(first_ty);
                    let addr = self.emit(
                        Opcode::ArrayGep,
                        first_ptr_ty,
                        vec![Operand::Value(slot), Operand::Index(i as u32)],
                    );
                    self.emit_void(Opcode::Store, vec![Operand::Value(addr), Operand::Value(v)]);
                }
                Ok(self.emit(Opcode::Load, arr_ty, vec![Operand::Value(slot)]))
            }
            ExprKind::StructInit { type_name, fields } => self.lower_struct_init(type_name, fields),
            ExprKind::Cast { expr: inner, ty } => self.lower_cast(inner, ty),
            ExprKind::Range { start, .. } => {
                // Only reachable outside a `for` header, where a range has
                // no standalone value; lower its start so side effects (if
                // any) still run.
                self.lower_expr(start)
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.lower_if(cond, then_branch, else_branch.as_deref()),
            ExprKind::Match { scrutinee, arms } => self.lower_match(scrutinee, arms),
            ExprKind::Block(block) => {
                let i64_ty = self.types.intern(IrType::I64);
                self.lower_block(block)?;
                Ok(self.emit(Opcode::Const, i64_ty, vec![Operand::Const(ConstValue::Void)]))
            }
            ExprKind::VoidPropagate(inner) => {
                let v = self.lower_expr(inner)?;
                let ty = self.fn_mut().return_type;
                Ok(self.emit(Opcode::VoidProp, ty, vec![Operand::Value(v)]))
            }
            ExprKind::VoidAssert(inner) => {
                let v = self.lower_expr(inner)?;
                let ty = self.value_type(inner);
                Ok(self.emit(Opcode::VoidAssert, ty, vec![Operand::Value(v)]))
            }
            ExprKind::VoidCoalesce { expr: inner, default } => {
                let v = self.lower_expr(inner)?;
                let d = self.lower_expr(default)?;
                let ty = self.value_type(inner);
                Ok(self.emit(Opcode::VoidCoalesce, ty, vec![Operand::Value(v), Operand::Value(d)]))
            }
        }
    }

    fn pointee_of(&mut self, ty: IrTypeId) -> IrTypeId {
        match self.types.get(ty) {
            IrType::Pointer(p) => *p,
            _ => ty,
        }
    }

    /// Best-effort static type of an expression, used only to pick operand
    /// types for pointer arithmetic, indexing, and casts. Lowering never
    /// performs full type checking (left to the verifier, §4.4).
    fn value_type(&mut self, expr: &Expr) -> IrTypeId {
        match &expr.kind {
            ExprKind::Int(_, suffix) => self.types.intern(int_suffix_type(*suffix)),
            ExprKind::Float(_) => self.types.intern(IrType::FixedPoint(FixedPointWidth::Scalar)),
            ExprKind::Bool(_) => self.types.intern(IrType::Bool),
            ExprKind::Ident(name) => self
                .lookup(name)
                .map(|s| self.pointee_of(s.ty))
                .unwrap_or_else(|| self.types.intern(IrType::I64)),
            _ => self.types.intern(IrType::I64),
        }
    }

    fn lower_unary(&mut self, op: AstUnOp, inner: &Expr) -> LResult<ValueId> {
        match op {
            AstUnOp::Neg => {
                let v = self.lower_expr(inner)?;
                let ty = self.value_type(inner);
                let zero = self.emit(Opcode::Const, ty, vec![Operand::Const(ConstValue::Int(0))]);
                Ok(self.emit(Opcode::Sub, ty, vec![Operand::Value(zero), Operand::Value(v)]))
            }
            AstUnOp::BitNot => {
                let v = self.lower_expr(inner)?;
                let ty = self.value_type(inner);
                let all_ones = self.emit(Opcode::Const, ty, vec![Operand::Const(ConstValue::Int(u64::MAX))]);
                Ok(self.emit(Opcode::Xor, ty, vec![Operand::Value(v), Operand::Value(all_ones)]))
            }
            AstUnOp::Not => {
                let v = self.lower_expr(inner)?;
                let ty = self.types.intern(IrType::Bool);
                let zero = self.emit(Opcode::Const, ty, vec![Operand::Const(ConstValue::Bool(false))]);
                Ok(self.emit(Opcode::Eq, ty, vec![Operand::Value(v), Operand::Value(zero)]))
            }
            AstUnOp::Deref => {
                let v = self.lower_expr(inner)?;
                let inner_ty = self.value_type(inner);
                let ty = self.pointee_of(inner_ty);
                Ok(self.emit(Opcode::Load, ty, vec![Operand::Value(v)]))
            }
            AstUnOp::AddrOf => self.lower_address_of(inner),
        }
    }

    fn lower_address_of(&mut self, expr: &Expr) -> LResult<ValueId> {
        match &expr.kind {
            ExprKind::Ident(name) => {
                let sym = self
                    .lookup(name)
                    .ok_or_else(|| LowerError::UnknownIdent(name.to_string()))?;
                Ok(sym.value)
            }
            ExprKind::Field { base, field } => Ok(self.lower_field_address(base, field)?.0),
            _ => self.lower_expr(expr),
        }
    }

    fn lower_binary(&mut self, op: AstBinOp, lhs: &Expr, rhs: &Expr) -> LResult<ValueId> {
        let lhs_ty = self.value_type(lhs);
        let is_pointer = matches!(self.types.get(lhs_ty), IrType::Pointer(_));

        let l = self.lower_expr(lhs)?;
        let r = self.lower_expr(rhs)?;

        if is_pointer && matches!(op, AstBinOp::Add | AstBinOp::Sub) {
            return self.lower_pointer_arith(op, l, lhs_ty, r, rhs);
        }

        let (opcode, result_ty) = match op {
            AstBinOp::Add => (Opcode::Add, lhs_ty),
            AstBinOp::Sub => (Opcode::Sub, lhs_ty),
            AstBinOp::Mul => (Opcode::Mul, lhs_ty),
            AstBinOp::Div => (Opcode::Div, lhs_ty),
            AstBinOp::Mod => (Opcode::Mod, lhs_ty),
            AstBinOp::And => (Opcode::And, self.types.intern(IrType::Bool)),
            AstBinOp::Or => (Opcode::Or, self.types.intern(IrType::Bool)),
            AstBinOp::BitAnd => (Opcode::And, lhs_ty),
            AstBinOp::BitOr => (Opcode::Or, lhs_ty),
            AstBinOp::BitXor => (Opcode::Xor, lhs_ty),
            AstBinOp::Shl => (Opcode::Shl, lhs_ty),
            AstBinOp::Shr => (Opcode::Shr, lhs_ty),
            AstBinOp::Eq => (Opcode::Eq, self.types.intern(IrType::Bool)),
            AstBinOp::Ne => (Opcode::Ne, self.types.intern(IrType::Bool)),
            AstBinOp::Lt => (Opcode::Lt, self.types.intern(IrType::Bool)),
            AstBinOp::Le => (Opcode::Le, self.types.intern(IrType::Bool)),
            AstBinOp::Gt => (Opcode::Gt, self.types.intern(IrType::Bool)),
            AstBinOp::Ge => (Opcode::Ge, self.types.intern(IrType::Bool)),
        };
        Ok(self.emit(opcode, result_ty, vec![Operand::Value(l), Operand::Value(r)]))
    }

    fn lower_pointer_arith(
        &mut self,
        op: AstBinOp,
        l: ValueId,
        lhs_ty: IrTypeId,
        r: ValueId,
        rhs_expr: &Expr,
    ) -> LResult<ValueId> {
        let rhs_ty = self.value_type(rhs_expr);
        let i64_ty = self.types.intern(IrType::I64);
        let opcode = if op == AstBinOp::Add { Opcode::Add } else { Opcode::Sub };
        if matches!(self.types.get(rhs_ty), IrType::Pointer(_)) {
            // `ptr - ptr`: subtract then divide by element size.
            let diff = self.emit(opcode, i64_ty, vec![Operand::Value(l), Operand::Value(r)]);
            let elem = self.pointee_of(lhs_ty);
            let elem_size = self.types.get(elem).size_of(&self.types);
            let size_val = self.emit(Opcode::Const, i64_ty, vec![Operand::Const(ConstValue::Int(elem_size))]);
            return Ok(self.emit(Opcode::Div, i64_ty, vec![Operand::Value(diff), Operand::Value(size_val)]));
        }
        // `ptr +/- int`: scale int by sizeof(pointee).
        let elem = self.pointee_of(lhs_ty);
        let elem_size = self.types.get(elem).size_of(&self.types);
        let size_val = self.emit(Opcode::Const, i64_ty, vec![Operand::Const(ConstValue::Int(elem_size))]);
        let scaled = self.emit(Opcode::Mul, i64_ty, vec![Operand::Value(r), Operand::Value(size_val)]);
        Ok(self.emit(opcode, lhs_ty, vec![Operand::Value(l), Operand::Value(scaled)]))
    }

    fn lower_assign(&mut self, target: &Expr, value: &Expr) -> LResult<ValueId> {
        let addr = match &target.kind {
            ExprKind::Ident(name) => {
                let sym = self
                    .lookup(name)
                    .ok_or_else(|| LowerError::UnknownIdent(name.to_string()))?;
                sym.value
            }
            ExprKind::Field { base, field } => self.lower_field_address(base, field)?.0,
            ExprKind::Index { base, index } => {
                let base_val = self.lower_expr(base)?;
                let idx_val = self.lower_expr(index)?;
                let base_ty = self.value_type(base);
                let elem_ty = self.pointee_of(base_ty);
                let elem_ptr_ty = self.types.pointer_to(elem_ty);
                self.emit(
                    Opcode::ArrayGep,
                    elem_ptr_ty,
                    vec![Operand::Value(base_val), Operand::Value(idx_val)],
                )
            }
            _ => return Err(LowerError::InvalidAssignTarget),
        };
        let v = self.lower_expr(value)?;
        self.emit_void(Opcode::Store, vec![Operand::Value(addr), Operand::Value(v)]);
        Ok(v)
    }

    fn lower_field_address(&mut self, base: &Expr, field: &str) -> LResult<(ValueId, IrTypeId)> {
        let base_addr = self.lower_address_of(base)?;
        let base_ty = self.value_type(base);
        let struct_ty = self.pointee_of(base_ty);
        let struct_name = match self.types.get(struct_ty) {
            IrType::Struct { name, .. } => name.clone(),
            _ => return Err(LowerError::UnknownField {
                struct_name: "<unresolved>".into(),
                field: field.to_string(),
            }),
        };
        let info = self
            .structs
            .get(&struct_name)
            .cloned()
            .ok_or_else(|| LowerError::UnknownType(struct_name.clone()))?;
        let (index, field_ty) = info
            .field_index(field)
            .ok_or_else(|| LowerError::UnknownField { struct_name: struct_name.clone(), field: field.to_string() })?;
        let field_ptr_ty = self.types.pointer_to(field_ty);
        let addr = self.emit(
            Opcode::Gep,
            field_ptr_ty,
            vec![Operand::Value(base_addr), Operand::Index(index as u32)],
        );
        Ok((addr, field_ty))
    }

    fn lower_struct_init(&mut self, type_name: &str, fields: &[ast::StructFieldInit]) -> LResult<ValueId> {
        let info = self
            .structs
            .get(type_name)
            .cloned()
            .ok_or_else(|| LowerError::UnknownType(type_name.to_string()))?;
        let field_tys: Vec<IrTypeId> = info.fields.iter().map(|(_, t)| *t).collect();
        let struct_ty = self.types.intern(IrType::Struct {
            name: type_name.to_string(),
            fields: field_tys,
        });
        let ptr_ty = self.types.pointer_to(struct_ty);
        let slot = self.emit(Opcode::Alloca, ptr_ty, vec![]);
        for init in fields {
            let (index, field_ty) = info
                .field_index(init.name)
                .ok_or_else(|| LowerError::UnknownField {
                    struct_name: type_name.to_string(),
                    field: init.name.to_string(),
                })?;
            let v = self.lower_expr(&init.value)?;
            let field_ptr_ty = self.types.pointer_to(field_ty);
            let addr = self.emit(
                Opcode::Gep,
                field_ptr_ty,
                vec![Operand::Value(slot), Operand::Index(index as u32)],
            );
            self.emit_void(Opcode::Store, vec![Operand::Value(addr), Operand::Value(v)]);
        }
        Ok(self.emit(Opcode::Load, struct_ty, vec![Operand::Value(slot)]))
    }

    fn lower_call(&mut self, callee: &Expr, args: &[Expr]) -> LResult<ValueId> {
        if let ExprKind::Ident(name) = &callee.kind {
            if let Some(n) = name.strip_prefix("__syscall") {
                if let Ok(count) = n.parse::<u32>() {
                    return self.lower_syscall(count, args);
                }
            }
            if self.module.find_function(name).is_some() || self.lookup(name).is_none() {
                let mut operands = vec![Operand::Symbol(name.to_string())];
                for a in args {
                    operands.push(Operand::Value(self.lower_expr(a)?));
                }
                let ret_ty = self
                    .module
                    .find_function(name)
                    .map(|f| f.return_type)
                    .unwrap_or_else(|| self.types.intern(IrType::I64));
                return Ok(self.emit(Opcode::Call, ret_ty, operands));
            }
        }
        // Expression callee (function pointer / closure value).
        let fn_val = self.lower_expr(callee)?;
        let mut operands = vec![Operand::Value(fn_val)];
        for a in args {
            operands.push(Operand::Value(self.lower_expr(a)?));
        }
        let ret_ty = self.types.intern(IrType::I64);
        Ok(self.emit(Opcode::CallIndirect, ret_ty, operands))
    }

    fn lower_syscall(&mut self, _count: u32, args: &[Expr]) -> LResult<ValueId> {
        let mut operands = Vec::with_capacity(args.len());
        for a in args {
            operands.push(Operand::Value(self.lower_expr(a)?));
        }
        let i64_ty = self.types.intern(IrType::I64);
        Ok(self.emit(Opcode::Syscall, i64_ty, operands))
    }

    fn lower_method_call(&mut self, receiver: &Expr, method: &str, args: &[Expr]) -> LResult<ValueId> {
        let receiver_ty = self.value_type(receiver);
        let struct_ty = self.pointee_of(receiver_ty);
        let struct_name = match self.types.get(struct_ty) {
            IrType::Struct { name, .. } => name.clone(),
            _ => return Err(LowerError::NotCallable(method.to_string())),
        };
        let mangled = format!("{struct_name}_{method}");
        let receiver_val = self.lower_address_of(receiver)?;
        let mut operands = vec![Operand::Symbol(mangled.clone()), Operand::Value(receiver_val)];
        for a in args {
            operands.push(Operand::Value(self.lower_expr(a)?));
        }
        let ret_ty = self
            .module
            .find_function(&mangled)
            .map(|f| f.return_type)
            .unwrap_or_else(|| self.types.intern(IrType::I64));
        Ok(self.emit(Opcode::Call, ret_ty, operands))
    }

    /// Lambda-lift into a fresh top-level function. Environment capture is
    /// out of scope (§9 open question): a closure referencing an outer
    /// local is a lowering error rather than silently producing a dangling
    /// reference.
    fn lower_closure(&mut self, params: &[ast::Param], body: &AstBlock) -> LResult<ValueId> {
        let outer_scopes = std::mem::take(&mut self.scopes);
        let name = format!("__closure_{}", self.closure_counter);
        self.closure_counter += 1;

        let mut ir_params = Vec::with_capacity(params.len());
        for p in params {
            ir_params.push((p.name.to_string(), self.lower_type(&p.ty)));
        }
        let return_type = self.types.intern(IrType::I64);
        self.module.functions.push(IrFunction {
            name: name.clone(),
            params: ir_params.clone(),
            return_type,
            blocks: Vec::new(),
            next_value: 0,
            is_declaration: false,
            effects_declared: 0,
        });
        let saved_fn = self.cur_fn;
        let saved_block = self.cur_block;
        let saved_counter = self.block_counter;
        self.cur_fn = self.module.functions.len() - 1;
        self.block_counter = 0;
        self.scopes.push(HashMap::new());

        let entry = self.new_block();
        self.cur_block = entry;
        for (pname, pty) in &ir_params {
            let ptr_ty = self.types.pointer_to(*pty);
            let alloca = self.emit(Opcode::Alloca, ptr_ty, vec![]);
            self.bind(pname.clone(), Symbol { value: alloca, ty: ptr_ty, is_mutable: true });
        }

        let closure_result = self.lower_block(body);

        if !self.terminated() {
            self.emit_void(Opcode::Return, vec![]);
        }

        self.scopes = outer_scopes;
        self.cur_fn = saved_fn;
        self.cur_block = saved_block;
        self.block_counter = saved_counter;

        closure_result.map_err(|e| {
            if matches!(e, LowerError::UnknownIdent(_)) {
                LowerError::ClosureCaptureUnsupported
            } else {
                e
            }
        })?;

        let ptr_ty = self.types.intern(IrType::I64);
        Ok(self.emit(Opcode::Const, ptr_ty, vec![Operand::Symbol(format!("fnaddr:{name}"))]))
    }

    fn lower_cast(&mut self, inner: &Expr, ty: &AstType) -> LResult<ValueId> {
        let v = self.lower_expr(inner)?;
        let from_ty = self.value_type(inner);
        let to_ty = self.lower_type(ty);
        let from_size = self.types.get(from_ty).size_of(&self.types);
        let to_size = self.types.get(to_ty).size_of(&self.types);
        let from_signed = self.types.get(from_ty).is_signed();

        if from_size == to_size {
            return Ok(self.emit(Opcode::Nop, to_ty, vec![Operand::Value(v)]));
        }
        let opcode = if to_size < from_size {
            Opcode::Trunc
        } else if from_signed {
            Opcode::Sext
        } else {
            Opcode::Zext
        };
        Ok(self.emit(opcode, to_ty, vec![Operand::Value(v)]))
    }

    fn lower_if(
        &mut self,
        cond: &Expr,
        then_branch: &AstBlock,
        else_branch: Option<&Expr>,
    ) -> LResult<ValueId> {
        let i64_ty = self.types.intern(IrType::I64);
        let ptr_ty = self.types.pointer_to(i64_ty);
        let result_slot = self.emit(Opcode::Alloca, ptr_ty, vec![]);

        let c = self.lower_expr(cond)?;
        let then_block = self.new_block();
        let else_block = self.new_block();
        let merge_block = self.new_block();
        self.emit_void(
            Opcode::Branch,
            vec![Operand::Value(c), Operand::Block(then_block), Operand::Block(else_block)],
        );

        self.cur_block = then_block;
        self.push_scope();
        let then_val = {
            for stmt in &then_branch.stmts {
                if self.terminated() {
                    break;
                }
                self.lower_stmt(stmt)?;
            }
            match &then_branch.tail {
                Some(e) if !self.terminated() => Some(self.lower_expr(e)?),
                _ => None,
            }
        };
        self.pop_scope();
        if let Some(v) = then_val {
            self.emit_void(Opcode::Store, vec![Operand::Value(result_slot), Operand::Value(v)]);
        }
        if !self.terminated() {
            self.emit_void(Opcode::Jump, vec![Operand::Block(merge_block)]);
        }

        self.cur_block = else_block;
        let else_val = match else_branch {
            Some(e) => Some(self.lower_expr(e)?),
            None => None,
        };
        if let Some(v) = else_val {
            self.emit_void(Opcode::Store, vec![Operand::Value(result_slot), Operand::Value(v)]);
        }
        if !self.terminated() {
            self.emit_void(Opcode::Jump, vec![Operand::Block(merge_block)]);
        }

        self.cur_block = merge_block;
        Ok(self.emit(Opcode::Load, i64_ty, vec![Operand::Value(result_slot)]))
    }

    /// Linear chain of equality tests (§4.3 "match lowers to a linear chain
    /// of equality tests"). `Wildcard`/`Ident` patterns always match.
    fn lower_match(&mut self, scrutinee: &Expr, arms: &[ast::MatchArm]) -> LResult<ValueId> {
        let i64_ty = self.types.intern(IrType::I64);
        let bool_ty = self.types.intern(IrType::Bool);
        let ptr_ty = self.types.pointer_to(i64_ty);
        let result_slot = self.emit(Opcode::Alloca, ptr_ty, vec![]);

        let scrutinee_val = self.lower_expr(scrutinee)?;
        let merge_block = self.new_block();

        for arm in arms {
            let body_block = self.new_block();
            let next_block = self.new_block();
            match &arm.pattern {
                ast::Pattern::Wildcard => {
                    self.emit_void(Opcode::Jump, vec![Operand::Block(body_block)]);
                }
                ast::Pattern::Int(n) => {
                    let lit = self.emit(Opcode::Const, i64_ty, vec![Operand::Const(ConstValue::Int(*n))]);
                    let test = self.emit(
                        Opcode::Eq,
                        bool_ty,
                        vec![Operand::Value(scrutinee_val), Operand::Value(lit)],
                    );
                    self.emit_void(
                        Opcode::Branch,
                        vec![Operand::Value(test), Operand::Block(body_block), Operand::Block(next_block)],
                    );
                }
                ast::Pattern::Ident(name) => {
                    self.push_scope();
                    self.bind(
                        name.to_string(),
                        Symbol {
                            value: scrutinee_val,
                            ty: i64_ty,
                            is_mutable: false,
                        },
                    );
                    self.emit_void(Opcode::Jump, vec![Operand::Block(body_block)]);
                }
            }

            self.cur_block = body_block;
            let body_val = self.lower_expr(&arm.body)?;
            if matches!(arm.pattern, ast::Pattern::Ident(_)) {
                self.pop_scope();
            }
            if !self.terminated() {
                self.emit_void(Opcode::Store, vec![Operand::Value(result_slot), Operand::Value(body_val)]);
                self.emit_void(Opcode::Jump, vec![Operand::Block(merge_block)]);
            }

            self.cur_block = next_block;
        }
        // Fallthrough: no arm matched. The type checker / proof pass treats
        // this as a runtime VOID case; lowering emits a defensive store of
        // the sentinel so the merge read is always well-defined.
        let void_val = self.emit(Opcode::Const, i64_ty, vec![Operand::Const(ConstValue::Void)]);
        self.emit_void(Opcode::Store, vec![Operand::Value(result_slot), Operand::Value(void_val)]);
        self.emit_void(Opcode::Jump, vec![Operand::Block(merge_block)]);

        self.cur_block = merge_block;
        Ok(self.emit(Opcode::Load, i64_ty, vec![Operand::Value(result_slot)]))
    }
}

fn primitive_ir_type(p: PrimitiveType) -> IrType {
    match p {
        PrimitiveType::Bool => IrType::Bool,
        PrimitiveType::Char => IrType::I32,
        PrimitiveType::I8 => IrType::I8,
        PrimitiveType::I16 => IrType::I16,
        PrimitiveType::I32 => IrType::I32,
        PrimitiveType::I64 => IrType::I64,
        PrimitiveType::U8 => IrType::U8,
        PrimitiveType::U16 => IrType::U16,
        PrimitiveType::U32 => IrType::U32,
        PrimitiveType::U64 => IrType::U64,
        PrimitiveType::Scalar => IrType::FixedPoint(FixedPointWidth::Scalar),
        PrimitiveType::Dual => IrType::FixedPoint(FixedPointWidth::Dual),
        PrimitiveType::Galactic => IrType::FixedPoint(FixedPointWidth::Galactic),
        PrimitiveType::Void => IrType::Void,
    }
}

fn int_suffix_type(suffix: Option<NumSuffix>) -> IrType {
    match suffix {
        Some(NumSuffix::U8) => IrType::U8,
        Some(NumSuffix::U16) => IrType::U16,
        Some(NumSuffix::U32) => IrType::U32,
        Some(NumSuffix::U64) | Some(NumSuffix::U) => IrType::U64,
        Some(NumSuffix::I8) => IrType::I8,
        Some(NumSuffix::I16) => IrType::I16,
        Some(NumSuffix::I32) => IrType::I32,
        Some(NumSuffix::I64) | Some(NumSuffix::I) => IrType::I64,
        Some(NumSuffix::Scalar) => IrType::FixedPoint(FixedPointWidth::Scalar),
        Some(NumSuffix::Dual) => IrType::FixedPoint(FixedPointWidth::Dual),
        Some(NumSuffix::Galactic) => IrType::FixedPoint(FixedPointWidth::Galactic),
        None => IrType::I64,
    }
}

/// Q32.32 fixed-point conversion (§4.3 "float -> fixed-point Q32.32
/// conversion").
fn to_q32_32(v: f64) -> i64 {
    (v * (1i64 << 32) as f64).round() as i64
}

pub fn lower_module(ast: &ast::Module) -> LResult<(IrModule, TypeTable)> {
    Lowerer::new().lower(ast)
}

fn encode_effects(effects: &Option<ast::EffectAnnotation>) -> u32 {
    let Some(ann) = effects else { return 0 };
    ann.effects.iter().fold(0u32, |mask, e| {
        mask | match e {
            ast::Effect::Pure => 1 << 0,
            ast::Effect::Void => 1 << 1,
            ast::Effect::Persist => 1 << 2,
            ast::Effect::Network => 1 << 3,
            ast::Effect::Timer => 1 << 4,
            ast::Effect::Io => 1 << 5,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn lower(src: &str) -> (IrModule, TypeTable) {
        let (module, diags) = parse_source(src, "t.sr");
        assert!(!diags.has_errors(), "{:?}", diags.iter().collect::<Vec<_>>());
        lower_module(&module).expect("lowering should succeed")
    }

    #[test]
    fn hello_world_main_has_a_terminated_entry_block() {
        let (ir, _) = lower("fn main() -> i32 { return 0; }");
        let f = ir.find_function("main").unwrap();
        assert!(f.blocks[0].is_terminated());
    }

    #[test]
    fn struct_field_assign_lowers_to_gep_store_load() {
        let (ir, _) = lower(
            "struct P { x: i32, y: i32 }\nfn main() -> i32 { let p: P; p.x = 3; p.y = 4; return p.x + p.y; }",
        );
        let f = ir.find_function("main").unwrap();
        let opcodes: Vec<Opcode> = f.blocks[0].instructions.iter().map(|i| i.opcode).collect();
        assert!(opcodes.contains(&Opcode::Gep));
        assert!(opcodes.contains(&Opcode::Store));
        assert!(opcodes.contains(&Opcode::Add));
    }

    #[test]
    fn pointer_arithmetic_scales_by_element_size() {
        let (ir, _) = lower("fn f(p: *i32) -> *i32 { return p + 1; }");
        let f = ir.find_function("f").unwrap();
        let opcodes: Vec<Opcode> = f.blocks[0].instructions.iter().map(|i| i.opcode).collect();
        assert!(opcodes.contains(&Opcode::Mul));
    }

    #[test]
    fn match_lowers_to_equality_chain() {
        let (ir, _) = lower("fn f(n: i64) -> i64 { match n { 1 => 10, 2 => 20, _ => 0 } }");
        let f = ir.find_function("f").unwrap();
        let has_eq = f
            .blocks
            .iter()
            .any(|b| b.instructions.iter().any(|i| i.opcode == Opcode::Eq));
        assert!(has_eq);
    }

    #[test]
    fn void_propagate_emits_void_prop_opcode() {
        let (ir, _) = lower("fn f(n: i64) -> i64 { return n??; }");
        let f = ir.find_function("f").unwrap();
        let has_prop = f
            .blocks
            .iter()
            .any(|b| b.instructions.iter().any(|i| i.opcode == Opcode::VoidProp));
        assert!(has_prop);
    }

    #[test]
    fn method_call_mangles_receiver_type_name() {
        let src = "struct Counter { n: i64 }\nimpl Counter { fn incr(self: Counter) -> i64 { return self.n; } }\nfn main() -> i64 { let c: Counter; return c.incr(); }";
        let (ir, _) = lower(src);
        assert!(ir.find_function("Counter_incr").is_some());
    }
}
