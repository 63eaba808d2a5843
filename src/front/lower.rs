//! Lowers the AST into the IR, per value in `eval_const` (compile-time
//! folding, used wherever the grammar demands a constant: array dimensions,
//! `const` initializers, global initializers) or `emit` (ordinary runtime
//! code, which may itself call `eval_const` to resolve a `const` identifier
//! or a constant array index).
//!
//! `&&`/`||` lower to real control flow rather than an eager `Binary::And`/
//! `Binary::Or`, so the right-hand side is only evaluated when it can affect
//! the result — matching the source language's short-circuit semantics,
//! which an eagerly-evaluated binary instruction cannot express if the
//! right-hand side has a visible side effect (a call to `putint`, say).

use std::rc::Rc;

use crate::common::{intern, Id};
use crate::error::LowerError;
use crate::front::ast::{
    self, Block, BlockItem, CompUnit, ConstDecl, ConstDef, ConstInitVal, Expr, FuncDef, FuncParam,
    GlobalItem, InitVal, LVal, Stmt, UnaryOp, VarDecl, VarDef,
};
use crate::middle::ir::{BasicBlock, BinaryOp, Func, FuncData, Program, Value, ValueKind};
use crate::middle::scopes::{Binding, ConstArrayData};
use crate::middle::{Builder, Scopes, Type};

/// Lowers a whole translation unit to IR, library intrinsics pre-bound.
pub fn lower(unit: &CompUnit) -> Result<Program, LowerError> {
    let mut ctx = Ctx::new();
    bind_intrinsics(&mut ctx);
    for item in &unit.items {
        lower_global_item(&mut ctx, item)?;
    }
    Ok(ctx.program)
}

struct Ctx {
    program: Program,
    scopes: Scopes,
    builder: Builder,
    current_func: Option<Func>,
    ret_type: Option<Type>,
    loop_stack: Vec<(BasicBlock, BasicBlock)>,
    next_id: u32,
}

impl Ctx {
    fn new() -> Self {
        let mut scopes = Scopes::new();
        scopes.push_frame();
        Ctx {
            program: Program::new(),
            scopes,
            builder: Builder::new(),
            current_func: None,
            ret_type: None,
            loop_stack: Vec::new(),
            next_id: 0,
        }
    }

    fn func(&self) -> Func {
        self.current_func.expect("no function is being lowered")
    }

    /// A fresh, program-wide unique block name — every generated label
    /// shares one flat namespace (the assembler doesn't know about function
    /// boundaries), so two `if`s in two different functions must not mint
    /// the same label.
    fn fresh_block(&mut self, tag: &str) -> BasicBlock {
        let n = self.next_id;
        self.next_id += 1;
        let name = intern(&format!("%{tag}_{n}"));
        self.program.new_block(Some(name))
    }

    /// Start appending into `b`, registering it with the current function.
    fn open(&mut self, b: BasicBlock) {
        self.program.func_mut(self.func()).bbs.push(b);
        self.builder.open_block(b);
    }

    fn push(&mut self, v: Value) {
        self.builder.add(&mut self.program, v);
    }
}

fn bind_intrinsics(ctx: &mut Ctx) {
    let sigs: &[(&str, &[Type], Type)] = &[
        ("getint", &[], Type::Int32),
        ("getch", &[], Type::Int32),
        ("getarray", &[Type::Pointer(Box::new(Type::Int32))], Type::Int32),
        ("putint", &[Type::Int32], Type::Unit),
        ("putch", &[Type::Int32], Type::Unit),
        ("putarray", &[Type::Int32, Type::Pointer(Box::new(Type::Int32))], Type::Unit),
        ("starttime", &[], Type::Unit),
        ("stoptime", &[], Type::Unit),
    ];
    for (name, params, ret) in sigs {
        let id = intern(name);
        let ty = Type::Function(params.to_vec(), Box::new(ret.clone()));
        let func = ctx.program.new_func(FuncData {
            name: id,
            ty,
            params: Vec::new(),
            bbs: Vec::new(),
            entry: None,
            is_decl: true,
        });
        ctx.scopes
            .define(id, Binding::Function(func))
            .then_some(())
            .expect("intrinsic names are unique and the global scope is empty");
    }
}

// ---------------------------------------------------------------------
// Global items
// ---------------------------------------------------------------------

fn lower_global_item(ctx: &mut Ctx, item: &GlobalItem) -> Result<(), LowerError> {
    match item {
        GlobalItem::ConstDecl(cd) => lower_const_decl(ctx, cd, true),
        GlobalItem::VarDecl(vd) => lower_var_decl(ctx, vd, true),
        GlobalItem::FuncDef(fd) => lower_func_def(ctx, fd),
    }
}

fn lower_const_decl(ctx: &mut Ctx, decl: &ConstDecl, global: bool) -> Result<(), LowerError> {
    for def in &decl.defs {
        lower_const_def(ctx, def, global)?;
    }
    Ok(())
}

fn lower_var_decl(ctx: &mut Ctx, decl: &VarDecl, global: bool) -> Result<(), LowerError> {
    for def in &decl.defs {
        lower_var_def(ctx, def, global)?;
    }
    Ok(())
}

fn lower_const_def(ctx: &mut Ctx, def: &ConstDef, global: bool) -> Result<(), LowerError> {
    if def.dims.is_empty() {
        let val = match &def.init {
            ConstInitVal::Exp(e) => eval_const(ctx, e)?,
            ConstInitVal::List(_) => {
                return Err(LowerError::Internal("scalar const initialized with a list".into()))
            }
        };
        if !ctx.scopes.define(def.ident, Binding::Const(val)) {
            return Err(LowerError::DuplicateDefinition(def.ident.to_string()));
        }
        return Ok(());
    }

    let dims = eval_dims(ctx, &def.dims)?;
    let tree = const_tree(ctx, &def.init)?;
    let flat = flatten(&tree, &dims, 0)?;
    let array_ty = build_array_type(&dims);

    let storage = if global {
        let agg = make_aggregate(&mut ctx.program, &flat, &dims);
        let storage = ctx.program.new_named_value(Type::ptr(array_ty), def.ident, ValueKind::GlobalAlloc(agg));
        ctx.program.globals.push(storage);
        storage
    } else {
        let alloc = ctx.program.new_named_value(Type::ptr(array_ty), def.ident, ValueKind::Alloc);
        ctx.push(alloc);
        store_flat_literals(ctx, alloc, &flat)?;
        alloc
    };

    let const_data = ConstArrayData { dims: Rc::new(dims), flat: Rc::new(flat) };
    if !ctx.scopes.define(def.ident, Binding::Array { storage, const_data: Some(const_data) }) {
        return Err(LowerError::DuplicateDefinition(def.ident.to_string()));
    }
    Ok(())
}

fn lower_var_def(ctx: &mut Ctx, def: &VarDef, global: bool) -> Result<(), LowerError> {
    if def.dims.is_empty() {
        let storage = if global {
            let init = match &def.init {
                Some(InitVal::Exp(e)) => {
                    let n = eval_const(ctx, e)?;
                    ctx.program.new_value(Type::Int32, ValueKind::Integer(n))
                }
                Some(InitVal::List(_)) => {
                    return Err(LowerError::Internal("scalar var initialized with a list".into()))
                }
                None => ctx.program.new_value(Type::Int32, ValueKind::ZeroInit),
            };
            let storage =
                ctx.program.new_named_value(Type::ptr(Type::Int32), def.ident, ValueKind::GlobalAlloc(init));
            ctx.program.globals.push(storage);
            storage
        } else {
            let alloc = ctx.program.new_named_value(Type::ptr(Type::Int32), def.ident, ValueKind::Alloc);
            ctx.push(alloc);
            if let Some(InitVal::Exp(e)) = &def.init {
                let v = emit_expr(ctx, e)?;
                let store = ctx.program.new_value(Type::Unit, ValueKind::Store { value: v, dest: alloc });
                ctx.push(store);
            }
            alloc
        };
        if !ctx.scopes.define(def.ident, Binding::Var(storage)) {
            return Err(LowerError::DuplicateDefinition(def.ident.to_string()));
        }
        return Ok(());
    }

    let dims = eval_dims(ctx, &def.dims)?;
    let array_ty = build_array_type(&dims);

    let storage = if global {
        let agg = match &def.init {
            Some(init) => {
                let tree = var_const_tree(ctx, init)?;
                let flat = flatten(&tree, &dims, 0)?;
                make_aggregate(&mut ctx.program, &flat, &dims)
            }
            None => ctx.program.new_value(array_ty.clone(), ValueKind::ZeroInit),
        };
        let storage = ctx.program.new_named_value(Type::ptr(array_ty), def.ident, ValueKind::GlobalAlloc(agg));
        ctx.program.globals.push(storage);
        storage
    } else {
        let alloc = ctx.program.new_named_value(Type::ptr(array_ty), def.ident, ValueKind::Alloc);
        ctx.push(alloc);
        if let Some(init) = &def.init {
            let tree = var_expr_tree(init);
            let flat = flatten(&tree, &dims, 0)?;
            store_flat_exprs(ctx, alloc, &flat)?;
        }
        alloc
    };

    if !ctx.scopes.define(def.ident, Binding::Array { storage, const_data: None }) {
        return Err(LowerError::DuplicateDefinition(def.ident.to_string()));
    }
    Ok(())
}

fn eval_dims(ctx: &mut Ctx, dims: &[Expr]) -> Result<Vec<usize>, LowerError> {
    dims.iter()
        .map(|e| {
            let n = eval_const(ctx, e)?;
            Ok(n as usize)
        })
        .collect()
}

fn build_array_type(dims: &[usize]) -> Type {
    dims.iter().rev().fold(Type::Int32, |acc, &d| Type::array(acc, d))
}

// ---------------------------------------------------------------------
// Initializer flattening
//
// Two passes, grounded one-to-one on the original's array-initializer
// handling: `preprocess`/`sub_preprocess` flattens a (possibly ragged,
// brace-nested) initializer list against the declared dimensions, and
// `index`/`make_aggerate` turn a flat constant buffer back into a nested
// aggregate for a global's `.data` initializer. The two use *different*
// stride vectors even though both are called `pro` in the source this is
// ported from: one is "total element count of a sub-array starting at this
// nesting depth", the other is "element stride to the next index at this
// dimension" — conflating them silently produces a compiler that flattens
// wrong on any initializer nested more than one level deep.
// ---------------------------------------------------------------------

enum Tree<L> {
    Leaf(L),
    List(Vec<Tree<L>>),
}

/// `pro[i] = dims[i] * dims[i+1] * ... * dims[n-1]`, with `pro[n] = 1`: the
/// total scalar element count of one complete sub-array starting at nesting
/// depth `i`. Used to decide, when a brace-nested sub-list is encountered
/// while flattening, which depth it fills.
fn sub_array_sizes(dims: &[usize]) -> Vec<usize> {
    let n = dims.len();
    let mut pro = vec![1usize; n + 1];
    for i in (0..n).rev() {
        pro[i] = pro[i + 1] * dims[i];
    }
    pro
}

fn flatten<L: Clone + Default>(
    tree: &Tree<L>,
    dims: &[usize],
    align: usize,
) -> Result<Vec<L>, LowerError> {
    let pro = sub_array_sizes(dims);
    let mut buf = Vec::new();
    sub_flatten(tree, &pro, align, &mut buf)?;
    Ok(buf)
}

fn sub_flatten<L: Clone + Default>(
    tree: &Tree<L>,
    pro: &[usize],
    align: usize,
    buf: &mut Vec<L>,
) -> Result<(), LowerError> {
    let items = match tree {
        Tree::Leaf(v) => {
            buf.push(v.clone());
            return Ok(());
        }
        Tree::List(items) => items,
    };

    let target = buf.len() + pro[align];
    for item in items {
        match item {
            Tree::Leaf(v) => {
                if buf.len() >= target {
                    return Err(LowerError::InitializerOverflow);
                }
                buf.push(v.clone());
            }
            Tree::List(_) => {
                let mut depth = align + 1;
                while depth < pro.len() - 1 && buf.len() % pro[depth] != 0 {
                    depth += 1;
                }
                sub_flatten(item, pro, depth, buf)?;
            }
        }
    }
    if buf.len() > target {
        return Err(LowerError::InitializerOverflow);
    }
    while buf.len() < target {
        buf.push(L::default());
    }
    Ok(())
}

fn const_tree(ctx: &mut Ctx, init: &ConstInitVal) -> Result<Tree<i32>, LowerError> {
    Ok(match init {
        ConstInitVal::Exp(e) => Tree::Leaf(eval_const(ctx, e)?),
        ConstInitVal::List(items) => {
            Tree::List(items.iter().map(|i| const_tree(ctx, i)).collect::<Result<_, _>>()?)
        }
    })
}

/// A global variable's initializer must itself be constant, even though it
/// isn't declared `const` (it has to be foldable into `.data`).
fn var_const_tree(ctx: &mut Ctx, init: &InitVal) -> Result<Tree<i32>, LowerError> {
    Ok(match init {
        InitVal::Exp(e) => Tree::Leaf(eval_const(ctx, e)?),
        InitVal::List(items) => {
            Tree::List(items.iter().map(|i| var_const_tree(ctx, i)).collect::<Result<_, _>>()?)
        }
    })
}

/// A local array variable's initializer may reference runtime values, so we
/// only collect the `Expr`s here; they're emitted (in flattened order) once
/// the flattening has decided where each one lands.
fn var_expr_tree(init: &InitVal) -> Tree<Expr> {
    match init {
        InitVal::Exp(e) => Tree::Leaf(e.clone()),
        InitVal::List(items) => Tree::List(items.iter().map(var_expr_tree).collect()),
    }
}

impl Default for Expr {
    fn default() -> Self {
        Expr::Number(0)
    }
}

fn make_aggregate(program: &mut Program, flat: &[i32], dims: &[usize]) -> Value {
    let pro = sub_array_sizes(dims);
    sub_make_aggregate(program, flat, &pro, 0, 0)
}

fn sub_make_aggregate(program: &mut Program, flat: &[i32], pro: &[usize], align: usize, pos: usize) -> Value {
    if pro[align] == 1 {
        return program.new_value(Type::Int32, ValueKind::Integer(flat[pos]));
    }
    let count = pro[align] / pro[align + 1];
    let elems: Vec<Value> = (0..count)
        .map(|i| sub_make_aggregate(program, flat, pro, align + 1, pos + pro[align + 1] * i))
        .collect();
    let dims_here = dims_from_strides(pro, align);
    program.new_value(build_array_type(&dims_here), ValueKind::Aggregate(elems))
}

/// Recovers `[dims[align], dims[align+1], ...]` from the stride vector, so
/// `sub_make_aggregate` doesn't need the original `dims` slice threaded
/// through its recursion.
fn dims_from_strides(pro: &[usize], align: usize) -> Vec<usize> {
    (align..pro.len() - 1).map(|i| pro[i] / pro[i + 1]).collect()
}

/// Emits `Store`s of `flat`'s literal values into every flat slot of
/// `storage`, used for a local `const` array (whose values are all already
/// known, unlike a plain local array's possibly-runtime initializer).
fn store_flat_literals(ctx: &mut Ctx, storage: Value, flat: &[i32]) -> Result<(), LowerError> {
    let dims = array_dims_of(ctx, storage);
    for (i, n) in flat.iter().enumerate() {
        let val = ctx.program.new_value(Type::Int32, ValueKind::Integer(*n));
        let addr = index_chain(ctx, storage, &dims, i)?;
        let store = ctx.program.new_value(Type::Unit, ValueKind::Store { value: val, dest: addr });
        ctx.push(store);
    }
    Ok(())
}

fn store_flat_exprs(ctx: &mut Ctx, storage: Value, flat: &[Expr]) -> Result<(), LowerError> {
    let dims = array_dims_of(ctx, storage);
    for (i, e) in flat.iter().enumerate() {
        let val = emit_expr(ctx, e)?;
        let addr = index_chain(ctx, storage, &dims, i)?;
        let store = ctx.program.new_value(Type::Unit, ValueKind::Store { value: val, dest: addr });
        ctx.push(store);
    }
    Ok(())
}

fn array_dims_of(ctx: &Ctx, storage: Value) -> Vec<usize> {
    let mut ty = ctx.program.value(storage).ty.pointee().clone();
    let mut dims = Vec::new();
    while let Type::Array(elem, n) = ty {
        dims.push(n);
        ty = *elem;
    }
    dims
}

/// Walks a flat index `i` down to a scalar element address, via the stride
/// vector "element stride to the next index at this dimension" — distinct
/// from `sub_array_sizes` in that it never includes a synthetic trailing
/// entry past the innermost dimension.
fn index_chain(ctx: &mut Ctx, storage: Value, dims: &[usize], mut i: usize) -> Result<Value, LowerError> {
    let mut strides = vec![1usize; dims.len()];
    for d in (0..dims.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * dims[d + 1];
    }
    let mut addr = storage;
    for &stride in &strides {
        let idx = i / stride;
        i %= stride;
        let idx_val = ctx.program.new_value(Type::Int32, ValueKind::Integer(idx as i32));
        let elem_ty = ctx.program.value(addr).ty.elem();
        addr = ctx.program.new_value(Type::ptr(elem_ty), ValueKind::GetElemPtr { src: addr, index: idx_val });
        ctx.push(addr);
    }
    Ok(addr)
}

// ---------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------

fn lower_func_def(ctx: &mut Ctx, fd: &FuncDef) -> Result<(), LowerError> {
    let ret_ty = match fd.ret_ty {
        ast::FuncRetType::Int => Type::Int32,
        ast::FuncRetType::Void => Type::Unit,
    };
    let param_types: Vec<Type> =
        fd.params.iter().map(|p| param_type(ctx, p)).collect::<Result<_, _>>()?;

    let func = ctx.program.new_func(FuncData {
        name: fd.ident,
        ty: Type::Function(param_types.clone(), Box::new(ret_ty.clone())),
        params: Vec::new(),
        bbs: Vec::new(),
        entry: None,
        is_decl: false,
    });
    if !ctx.scopes.define(fd.ident, Binding::Function(func)) {
        return Err(LowerError::DuplicateDefinition(fd.ident.to_string()));
    }

    ctx.scopes.push_frame();
    ctx.current_func = Some(func);
    ctx.ret_type = Some(ret_ty.clone());

    let entry = ctx.program.new_block(Some(intern(&format!("%entry_{}", fd.ident))));
    ctx.program.func_mut(func).entry = Some(entry);
    ctx.open(entry);

    let mut params = Vec::new();
    for (i, p) in fd.params.iter().enumerate() {
        let pty = param_types[i].clone();
        let arg_ref = ctx.program.new_value(pty.clone(), ValueKind::FuncArgRef(i));
        params.push(arg_ref);
        let alloc = ctx.program.new_named_value(Type::ptr(pty), p.ident, ValueKind::Alloc);
        ctx.push(alloc);
        let store = ctx.program.new_value(Type::Unit, ValueKind::Store { value: arg_ref, dest: alloc });
        ctx.push(store);
        let binding = match &p.array_dims {
            None => Binding::Var(alloc),
            Some(_) => Binding::Pointer { storage: alloc },
        };
        if !ctx.scopes.define(p.ident, binding) {
            return Err(LowerError::DuplicateDefinition(p.ident.to_string()));
        }
    }
    ctx.program.func_mut(func).params = params;

    lower_block(ctx, &fd.body)?;

    if !ctx.builder.is_terminated() {
        let ret_val = match &ret_ty {
            Type::Int32 => Some(ctx.program.new_value(Type::Int32, ValueKind::Integer(0))),
            _ => None,
        };
        let ret = ctx.program.new_value(Type::Unit, ValueKind::Return(ret_val));
        ctx.push(ret);
    }

    ctx.current_func = None;
    ctx.ret_type = None;
    ctx.scopes.pop_frame();
    Ok(())
}

fn param_type(ctx: &mut Ctx, p: &FuncParam) -> Result<Type, LowerError> {
    Ok(match &p.array_dims {
        None => Type::Int32,
        Some(dims) => {
            let sizes = eval_dims(ctx, dims)?;
            let elem_ty = if sizes.is_empty() { Type::Int32 } else { build_array_type(&sizes) };
            Type::ptr(elem_ty)
        }
    })
}

// ---------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------

fn lower_block(ctx: &mut Ctx, block: &Block) -> Result<(), LowerError> {
    ctx.scopes.push_frame();
    for item in &block.items {
        lower_block_item(ctx, item)?;
    }
    ctx.scopes.pop_frame();
    Ok(())
}

fn lower_block_item(ctx: &mut Ctx, item: &BlockItem) -> Result<(), LowerError> {
    match item {
        BlockItem::Const(cd) => lower_const_decl(ctx, cd, false),
        BlockItem::Var(vd) => lower_var_decl(ctx, vd, false),
        BlockItem::Stmt(s) => lower_stmt(ctx, s),
    }
}

fn lower_stmt(ctx: &mut Ctx, stmt: &Stmt) -> Result<(), LowerError> {
    match stmt {
        Stmt::Assign(lval, expr) => {
            let v = emit_expr(ctx, expr)?;
            emit_lval_write(ctx, lval, v)
        }
        Stmt::Expr(None) => Ok(()),
        Stmt::Expr(Some(e)) => emit_expr(ctx, e).map(|_| ()),
        Stmt::Block(b) => lower_block(ctx, b),
        Stmt::If(cond, then, els) => lower_if(ctx, cond, then, els.as_deref()),
        Stmt::While(cond, body) => lower_while(ctx, cond, body),
        Stmt::Break => {
            let (_, end) = *ctx.loop_stack.last().ok_or(LowerError::BreakOutsideLoop)?;
            let jmp = ctx.program.new_value(Type::Unit, ValueKind::Jump(end));
            ctx.push(jmp);
            Ok(())
        }
        Stmt::Continue => {
            let (head, _) = *ctx.loop_stack.last().ok_or(LowerError::ContinueOutsideLoop)?;
            let jmp = ctx.program.new_value(Type::Unit, ValueKind::Jump(head));
            ctx.push(jmp);
            Ok(())
        }
        Stmt::Return(value) => lower_return(ctx, value.as_ref()),
    }
}

fn lower_return(ctx: &mut Ctx, value: Option<&Expr>) -> Result<(), LowerError> {
    let ret_ty = ctx.ret_type.clone().ok_or_else(|| LowerError::Internal("return outside function".into()))?;
    let ret = match (&ret_ty, value) {
        (Type::Unit, Some(_)) => return Err(LowerError::ReturnValueInVoid),
        (Type::Unit, None) => ctx.program.new_value(Type::Unit, ValueKind::Return(None)),
        (_, Some(e)) => {
            let v = emit_expr(ctx, e)?;
            ctx.program.new_value(Type::Unit, ValueKind::Return(Some(v)))
        }
        // A bare `return;` in a function declared to return `int` is not
        // valid SysY, but every path still has to leave a well-formed
        // terminator behind it; default to returning 0.
        (_, None) => {
            let zero = ctx.program.new_value(Type::Int32, ValueKind::Integer(0));
            ctx.program.new_value(Type::Unit, ValueKind::Return(Some(zero)))
        }
    };
    ctx.push(ret);
    Ok(())
}

fn lower_if(ctx: &mut Ctx, cond: &Expr, then: &Stmt, els: Option<&Stmt>) -> Result<(), LowerError> {
    let then_blk = ctx.fresh_block("if_then");
    let else_blk = ctx.fresh_block("if_else");
    let end_blk = ctx.fresh_block("if_end");

    let cond_v = emit_expr(ctx, cond)?;
    let branch = ctx.program.new_value(Type::Unit, ValueKind::Branch { cond: cond_v, then: then_blk, els: else_blk });
    ctx.push(branch);

    ctx.open(then_blk);
    lower_stmt(ctx, then)?;
    if !ctx.builder.is_terminated() {
        let j = ctx.program.new_value(Type::Unit, ValueKind::Jump(end_blk));
        ctx.push(j);
    }

    ctx.open(else_blk);
    if let Some(els) = els {
        lower_stmt(ctx, els)?;
    }
    if !ctx.builder.is_terminated() {
        let j = ctx.program.new_value(Type::Unit, ValueKind::Jump(end_blk));
        ctx.push(j);
    }

    ctx.open(end_blk);
    Ok(())
}

fn lower_while(ctx: &mut Ctx, cond: &Expr, body: &Stmt) -> Result<(), LowerError> {
    let head_blk = ctx.fresh_block("while_entry");
    let body_blk = ctx.fresh_block("while_body");
    let end_blk = ctx.fresh_block("while_end");

    let j0 = ctx.program.new_value(Type::Unit, ValueKind::Jump(head_blk));
    ctx.push(j0);

    ctx.open(head_blk);
    let cond_v = emit_expr(ctx, cond)?;
    let branch = ctx.program.new_value(Type::Unit, ValueKind::Branch { cond: cond_v, then: body_blk, els: end_blk });
    ctx.push(branch);

    ctx.open(body_blk);
    ctx.loop_stack.push((head_blk, end_blk));
    let body_result = lower_stmt(ctx, body);
    ctx.loop_stack.pop();
    body_result?;
    if !ctx.builder.is_terminated() {
        let j = ctx.program.new_value(Type::Unit, ValueKind::Jump(head_blk));
        ctx.push(j);
    }

    ctx.open(end_blk);
    Ok(())
}

// ---------------------------------------------------------------------
// L-values
// ---------------------------------------------------------------------

enum Resolved {
    Const(i32),
    /// An address; reading it loads a scalar or decays to a pointer,
    /// depending on what it points to.
    Addr(Value),
    /// An already-final value (a parameter's decayed pointer, read bare,
    /// with no further indexing) — never loaded again.
    Direct(Value),
}

fn resolve_lval(ctx: &mut Ctx, lval: &LVal) -> Result<Resolved, LowerError> {
    let binding = ctx
        .scopes
        .lookup(lval.ident)
        .ok_or_else(|| LowerError::UnknownIdentifier(lval.ident.to_string()))?;

    match binding {
        Binding::Function(_) => Err(LowerError::UnknownIdentifier(lval.ident.to_string())),
        Binding::Const(n) => {
            if !lval.indices.is_empty() {
                return Err(LowerError::Internal("indexing a scalar constant".into()));
            }
            Ok(Resolved::Const(n))
        }
        Binding::Var(storage) => {
            if !lval.indices.is_empty() {
                return Err(LowerError::Internal("indexing a scalar variable".into()));
            }
            Ok(Resolved::Addr(storage))
        }
        Binding::Array { storage, .. } => {
            let addr = elem_ptr_chain(ctx, storage, &lval.indices)?;
            Ok(Resolved::Addr(addr))
        }
        Binding::Pointer { storage } => {
            let ptr_ty = ctx.program.value(storage).ty.pointee().clone();
            let ptr_val = ctx.program.new_value(ptr_ty, ValueKind::Load(storage));
            ctx.push(ptr_val);
            if lval.indices.is_empty() {
                return Ok(Resolved::Direct(ptr_val));
            }
            let first = emit_expr(ctx, &lval.indices[0])?;
            let elem_ty = ctx.program.value(ptr_val).ty.elem();
            let stepped =
                ctx.program.new_value(Type::ptr(elem_ty), ValueKind::GetPtr { src: ptr_val, index: first });
            ctx.push(stepped);
            let addr = elem_ptr_chain(ctx, stepped, &lval.indices[1..])?;
            Ok(Resolved::Addr(addr))
        }
    }
}

fn elem_ptr_chain(ctx: &mut Ctx, mut addr: Value, indices: &[Expr]) -> Result<Value, LowerError> {
    for idx_expr in indices {
        let idx_val = emit_expr(ctx, idx_expr)?;
        let cur_ty = ctx.program.value(addr).ty.clone();
        if !cur_ty.pointee().is_array() {
            return Err(LowerError::Internal("too many indices for this array type".into()));
        }
        let elem_ty = cur_ty.elem();
        let next = ctx.program.new_value(Type::ptr(elem_ty), ValueKind::GetElemPtr { src: addr, index: idx_val });
        ctx.push(next);
        addr = next;
    }
    Ok(addr)
}

fn emit_lval_read(ctx: &mut Ctx, lval: &LVal) -> Result<Value, LowerError> {
    match resolve_lval(ctx, lval)? {
        Resolved::Const(n) => Ok(ctx.program.new_value(Type::Int32, ValueKind::Integer(n))),
        Resolved::Direct(v) => Ok(v),
        Resolved::Addr(addr) => {
            let pointee = ctx.program.value(addr).ty.pointee().clone();
            if pointee.is_array() {
                let elem_ty = ctx.program.value(addr).ty.elem();
                let zero = ctx.program.new_value(Type::Int32, ValueKind::Integer(0));
                let decayed =
                    ctx.program.new_value(Type::ptr(elem_ty), ValueKind::GetElemPtr { src: addr, index: zero });
                ctx.push(decayed);
                Ok(decayed)
            } else {
                let loaded = ctx.program.new_value(Type::Int32, ValueKind::Load(addr));
                ctx.push(loaded);
                Ok(loaded)
            }
        }
    }
}

fn emit_lval_write(ctx: &mut Ctx, lval: &LVal, value: Value) -> Result<(), LowerError> {
    match resolve_lval(ctx, lval)? {
        Resolved::Const(_) => Err(LowerError::AssignToConstant(lval.ident.to_string())),
        Resolved::Direct(_) => {
            Err(LowerError::Internal(format!("cannot assign to array parameter '{}'", lval.ident)))
        }
        Resolved::Addr(addr) => {
            let store = ctx.program.new_value(Type::Unit, ValueKind::Store { value, dest: addr });
            ctx.push(store);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------

fn convert_binop(op: ast::BinaryOp) -> BinaryOp {
    match op {
        ast::BinaryOp::Add => BinaryOp::Add,
        ast::BinaryOp::Sub => BinaryOp::Sub,
        ast::BinaryOp::Mul => BinaryOp::Mul,
        ast::BinaryOp::Div => BinaryOp::Div,
        ast::BinaryOp::Mod => BinaryOp::Mod,
        ast::BinaryOp::Lt => BinaryOp::Lt,
        ast::BinaryOp::Le => BinaryOp::Le,
        ast::BinaryOp::Gt => BinaryOp::Gt,
        ast::BinaryOp::Ge => BinaryOp::Ge,
        ast::BinaryOp::Eq => BinaryOp::Eq,
        ast::BinaryOp::NotEq => BinaryOp::NotEq,
        ast::BinaryOp::And => BinaryOp::And,
        ast::BinaryOp::Or => BinaryOp::Or,
    }
}

fn emit_expr(ctx: &mut Ctx, expr: &Expr) -> Result<Value, LowerError> {
    match expr {
        Expr::Number(n) => Ok(ctx.program.new_value(Type::Int32, ValueKind::Integer(*n))),
        Expr::LVal(lval) => emit_lval_read(ctx, lval),
        Expr::Unary(op, e) => emit_unary(ctx, *op, e),
        Expr::Binary(ast::BinaryOp::And, l, r) => emit_and(ctx, l, r),
        Expr::Binary(ast::BinaryOp::Or, l, r) => emit_or(ctx, l, r),
        Expr::Binary(op, l, r) => {
            let lv = emit_expr(ctx, l)?;
            let rv = emit_expr(ctx, r)?;
            let result = ctx.program.new_value(Type::Int32, ValueKind::Binary { op: convert_binop(*op), lhs: lv, rhs: rv });
            ctx.push(result);
            Ok(result)
        }
        Expr::Call(name, args) => emit_call(ctx, *name, args),
    }
}

fn emit_unary(ctx: &mut Ctx, op: UnaryOp, e: &Expr) -> Result<Value, LowerError> {
    let v = emit_expr(ctx, e)?;
    match op {
        UnaryOp::Plus => Ok(v),
        UnaryOp::Minus => {
            let zero = ctx.program.new_value(Type::Int32, ValueKind::Integer(0));
            let result = ctx.program.new_value(Type::Int32, ValueKind::Binary { op: BinaryOp::Sub, lhs: zero, rhs: v });
            ctx.push(result);
            Ok(result)
        }
        UnaryOp::Not => {
            let zero = ctx.program.new_value(Type::Int32, ValueKind::Integer(0));
            let result = ctx.program.new_value(Type::Int32, ValueKind::Binary { op: BinaryOp::Eq, lhs: v, rhs: zero });
            ctx.push(result);
            Ok(result)
        }
    }
}

/// `l && r`: evaluate `l`; if false, short-circuit to `0` without touching
/// `r` at all.
fn emit_and(ctx: &mut Ctx, l: &Expr, r: &Expr) -> Result<Value, LowerError> {
    let slot = ctx.program.new_value(Type::ptr(Type::Int32), ValueKind::Alloc);
    ctx.push(slot);

    let lv = emit_expr(ctx, l)?;
    let rhs_blk = ctx.fresh_block("and_rhs");
    let false_blk = ctx.fresh_block("and_false");
    let end_blk = ctx.fresh_block("and_end");
    let branch = ctx.program.new_value(Type::Unit, ValueKind::Branch { cond: lv, then: rhs_blk, els: false_blk });
    ctx.push(branch);

    ctx.open(rhs_blk);
    let rv = emit_expr(ctx, r)?;
    let zero = ctx.program.new_value(Type::Int32, ValueKind::Integer(0));
    let bool_rv = ctx.program.new_value(Type::Int32, ValueKind::Binary { op: BinaryOp::NotEq, lhs: rv, rhs: zero });
    ctx.push(bool_rv);
    let store1 = ctx.program.new_value(Type::Unit, ValueKind::Store { value: bool_rv, dest: slot });
    ctx.push(store1);
    let j1 = ctx.program.new_value(Type::Unit, ValueKind::Jump(end_blk));
    ctx.push(j1);

    ctx.open(false_blk);
    let zero2 = ctx.program.new_value(Type::Int32, ValueKind::Integer(0));
    let store2 = ctx.program.new_value(Type::Unit, ValueKind::Store { value: zero2, dest: slot });
    ctx.push(store2);
    let j2 = ctx.program.new_value(Type::Unit, ValueKind::Jump(end_blk));
    ctx.push(j2);

    ctx.open(end_blk);
    let result = ctx.program.new_value(Type::Int32, ValueKind::Load(slot));
    ctx.push(result);
    Ok(result)
}

/// `l || r`: evaluate `l`; if true, short-circuit to `1` without touching
/// `r` at all.
fn emit_or(ctx: &mut Ctx, l: &Expr, r: &Expr) -> Result<Value, LowerError> {
    let slot = ctx.program.new_value(Type::ptr(Type::Int32), ValueKind::Alloc);
    ctx.push(slot);

    let lv = emit_expr(ctx, l)?;
    let true_blk = ctx.fresh_block("or_true");
    let rhs_blk = ctx.fresh_block("or_rhs");
    let end_blk = ctx.fresh_block("or_end");
    let branch = ctx.program.new_value(Type::Unit, ValueKind::Branch { cond: lv, then: true_blk, els: rhs_blk });
    ctx.push(branch);

    ctx.open(true_blk);
    let one = ctx.program.new_value(Type::Int32, ValueKind::Integer(1));
    let store1 = ctx.program.new_value(Type::Unit, ValueKind::Store { value: one, dest: slot });
    ctx.push(store1);
    let j1 = ctx.program.new_value(Type::Unit, ValueKind::Jump(end_blk));
    ctx.push(j1);

    ctx.open(rhs_blk);
    let rv = emit_expr(ctx, r)?;
    let zero = ctx.program.new_value(Type::Int32, ValueKind::Integer(0));
    let bool_rv = ctx.program.new_value(Type::Int32, ValueKind::Binary { op: BinaryOp::NotEq, lhs: rv, rhs: zero });
    ctx.push(bool_rv);
    let store2 = ctx.program.new_value(Type::Unit, ValueKind::Store { value: bool_rv, dest: slot });
    ctx.push(store2);
    let j2 = ctx.program.new_value(Type::Unit, ValueKind::Jump(end_blk));
    ctx.push(j2);

    ctx.open(end_blk);
    let result = ctx.program.new_value(Type::Int32, ValueKind::Load(slot));
    ctx.push(result);
    Ok(result)
}

fn emit_call(ctx: &mut Ctx, name: Id, args: &[Expr]) -> Result<Value, LowerError> {
    let func = match ctx.scopes.lookup(name) {
        Some(Binding::Function(f)) => f,
        Some(_) => return Err(LowerError::NotCallable(name.to_string())),
        None => return Err(LowerError::UnknownIdentifier(name.to_string())),
    };
    let expected = ctx.program.func(func).param_types().len();
    if args.len() != expected {
        return Err(LowerError::ArgCountMismatch { name: name.to_string(), expected, got: args.len() });
    }
    let arg_vals: Vec<Value> = args.iter().map(|a| emit_expr(ctx, a)).collect::<Result<_, _>>()?;
    let ret_ty = ctx.program.func(func).ret_type().clone();
    let call = ctx.program.new_value(ret_ty.clone(), ValueKind::Call { func, args: arg_vals });
    ctx.push(call);
    Ok(call)
}

// ---------------------------------------------------------------------
// Constant evaluation
// ---------------------------------------------------------------------

fn eval_const(ctx: &mut Ctx, expr: &Expr) -> Result<i32, LowerError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::LVal(lval) => eval_const_lval(ctx, lval),
        Expr::Unary(op, e) => {
            let v = eval_const(ctx, e)?;
            Ok(match op {
                UnaryOp::Plus => v,
                UnaryOp::Minus => v.wrapping_neg(),
                UnaryOp::Not => i32::from(v == 0),
            })
        }
        Expr::Binary(op, l, r) => {
            let lv = eval_const(ctx, l)?;
            if matches!(op, ast::BinaryOp::And) && lv == 0 {
                return Ok(0);
            }
            if matches!(op, ast::BinaryOp::Or) && lv != 0 {
                return Ok(1);
            }
            let rv = eval_const(ctx, r)?;
            Ok(match op {
                ast::BinaryOp::Add => lv.wrapping_add(rv),
                ast::BinaryOp::Sub => lv.wrapping_sub(rv),
                ast::BinaryOp::Mul => lv.wrapping_mul(rv),
                ast::BinaryOp::Div => lv.wrapping_div(rv),
                ast::BinaryOp::Mod => lv.wrapping_rem(rv),
                ast::BinaryOp::Lt => i32::from(lv < rv),
                ast::BinaryOp::Le => i32::from(lv <= rv),
                ast::BinaryOp::Gt => i32::from(lv > rv),
                ast::BinaryOp::Ge => i32::from(lv >= rv),
                ast::BinaryOp::Eq => i32::from(lv == rv),
                ast::BinaryOp::NotEq => i32::from(lv != rv),
                ast::BinaryOp::And => i32::from(lv != 0 && rv != 0),
                ast::BinaryOp::Or => i32::from(lv != 0 || rv != 0),
            })
        }
        Expr::Call(..) => Err(LowerError::NotConstant),
    }
}

fn eval_const_lval(ctx: &mut Ctx, lval: &LVal) -> Result<i32, LowerError> {
    let binding = ctx
        .scopes
        .lookup(lval.ident)
        .ok_or_else(|| LowerError::UnknownIdentifier(lval.ident.to_string()))?;
    match binding {
        Binding::Const(n) if lval.indices.is_empty() => Ok(n),
        Binding::Array { const_data: Some(data), .. } if lval.indices.len() == data.dims.len() => {
            let idx = eval_const_flat_index(ctx, &data.dims, &lval.indices)?;
            data.flat.get(idx).copied().ok_or_else(|| LowerError::Internal("const array index out of bounds".into()))
        }
        _ => Err(LowerError::NotConstant),
    }
}

fn eval_const_flat_index(ctx: &mut Ctx, dims: &[usize], indices: &[Expr]) -> Result<usize, LowerError> {
    let mut strides = vec![1usize; dims.len()];
    for d in (0..dims.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * dims[d + 1];
    }
    let mut flat = 0usize;
    for (idx_expr, stride) in indices.iter().zip(strides.iter()) {
        let idx = eval_const(ctx, idx_expr)?;
        flat += idx as usize * stride;
    }
    Ok(flat)
}
