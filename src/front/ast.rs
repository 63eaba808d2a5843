//! The abstract syntax tree for the SysY-like subset this compiler accepts:
//! integer scalars, multidimensional integer arrays, global and local
//! variables, user-defined functions (pass-by-value scalars, pass-by-reference
//! arrays), `if`/`else`, `while`/`break`/`continue`, `return`, and the usual
//! arithmetic/logical/relational operators.

use crate::common::Id;

#[derive(Debug)]
pub struct CompUnit {
    pub items: Vec<GlobalItem>,
}

#[derive(Debug)]
pub enum GlobalItem {
    ConstDecl(ConstDecl),
    VarDecl(VarDecl),
    FuncDef(FuncDef),
}

#[derive(Debug)]
pub struct ConstDecl {
    pub defs: Vec<ConstDef>,
}

#[derive(Debug)]
pub struct ConstDef {
    pub ident: Id,
    /// Declared array dimensions, empty for a scalar constant.
    pub dims: Vec<Expr>,
    pub init: ConstInitVal,
}

#[derive(Debug)]
pub enum ConstInitVal {
    Exp(Expr),
    List(Vec<ConstInitVal>),
}

#[derive(Debug)]
pub struct VarDecl {
    pub defs: Vec<VarDef>,
}

#[derive(Debug)]
pub struct VarDef {
    pub ident: Id,
    /// Declared array dimensions, empty for a scalar variable.
    pub dims: Vec<Expr>,
    pub init: Option<InitVal>,
}

#[derive(Debug)]
pub enum InitVal {
    Exp(Expr),
    List(Vec<InitVal>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncRetType {
    Int,
    Void,
}

#[derive(Debug)]
pub struct FuncDef {
    pub ret_ty: FuncRetType,
    pub ident: Id,
    pub params: Vec<FuncParam>,
    pub body: Block,
}

#[derive(Debug)]
pub struct FuncParam {
    pub ident: Id,
    /// `None` for a scalar `int` parameter. `Some(dims)` for an array
    /// parameter, where `dims` holds the dimensions *after* the first
    /// (the first dimension of an array parameter is always omitted in the
    /// source grammar, e.g. `int a[]` or `int a[][3]`).
    pub array_dims: Option<Vec<Expr>>,
}

#[derive(Debug)]
pub struct Block {
    pub items: Vec<BlockItem>,
}

#[derive(Debug)]
pub enum BlockItem {
    Const(ConstDecl),
    Var(VarDecl),
    Stmt(Stmt),
}

#[derive(Debug)]
pub enum Stmt {
    Assign(LVal, Expr),
    /// A bare expression statement, or an empty statement (`;`).
    Expr(Option<Expr>),
    Block(Block),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    While(Expr, Box<Stmt>),
    Break,
    Continue,
    Return(Option<Expr>),
}

#[derive(Debug, Clone)]
pub struct LVal {
    pub ident: Id,
    pub indices: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub enum Expr {
    LVal(LVal),
    Number(i32),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Id, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    NotEq,
    And,
    Or,
}
