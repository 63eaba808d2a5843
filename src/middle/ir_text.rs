//! A textual round-trip format for [`Program`].
//!
//! The reference compiler hands its in-memory IR to an external library by
//! dumping it to Koopa's text form and parsing it back before code
//! generation (`koopa_generate_raw_to_koopa` + `koopa_dump_to_string`, then
//! `koopa_parse_from_string` + `koopa_build_raw_program`). This module plays
//! the same role without an external crate dependency: [`emit`] serializes a
//! [`Program`] to a flat, line-oriented text, and [`parse`] rebuilds an
//! equivalent `Program` from that text. `-koopa` mode prints [`emit`]'s
//! output directly; `-riscv` mode round-trips through both before handing
//! the result to `back::codegen`, mirroring the reference pipeline.
//!
//! The format is deliberately simple: every value, block, and function is
//! addressed by the same small integer index it already has in the arena,
//! so parsing is just "read N records, push each into the arena in order"
//! with no symbol resolution pass.

use std::fmt::Write as _;

use crate::common::intern;
use crate::middle::ir::{BasicBlock, BinaryOp, Func, FuncData, Program, Value, ValueData, ValueKind};
use crate::middle::types::Type;

pub fn emit(program: &Program) -> String {
    let mut out = String::new();

    writeln!(out, "values {}", program.value_count()).unwrap();
    for idx in 0..program.value_count() {
        let v = Value(idx as u32);
        let data = program.value(v);
        writeln!(out, "{}", emit_value(data)).unwrap();
    }

    writeln!(out, "blocks {}", program.block_count()).unwrap();
    for idx in 0..program.block_count() {
        let b = BasicBlock(idx as u32);
        let data = program.block(b);
        let name = name_token(data.name.map(|n| n.to_string()).as_deref());
        let insts: Vec<String> = data.insts.iter().map(|v| v.0.to_string()).collect();
        writeln!(out, "{} {} {}", name, insts.len(), insts.join(" ")).unwrap();
    }

    writeln!(out, "funcs {}", program.funcs().count()).unwrap();
    for (_, data) in program.funcs() {
        writeln!(out, "{}", emit_func(data)).unwrap();
    }

    writeln!(out, "globals {}", program.globals.len()).unwrap();
    let globals: Vec<String> = program.globals.iter().map(|v| v.0.to_string()).collect();
    writeln!(out, "{}", globals.join(" ")).unwrap();

    out
}

fn name_token(name: Option<&str>) -> String {
    match name {
        Some(n) => format!("@{n}"),
        None => "-".to_string(),
    }
}

fn emit_value(data: &ValueData) -> String {
    let ty = type_to_string(&data.ty);
    let name = name_token(data.name.map(|n| n.to_string()).as_deref());
    let kind = match &data.kind {
        ValueKind::Integer(n) => format!("integer {n}"),
        ValueKind::ZeroInit => "zeroinit".to_string(),
        ValueKind::Aggregate(vs) => {
            let items: Vec<String> = vs.iter().map(|v| v.0.to_string()).collect();
            format!("aggregate {} {}", items.len(), items.join(" "))
        }
        ValueKind::FuncArgRef(i) => format!("funcarg {i}"),
        ValueKind::Alloc => "alloc".to_string(),
        ValueKind::GlobalAlloc(init) => format!("globalalloc {}", init.0),
        ValueKind::Load(src) => format!("load {}", src.0),
        ValueKind::Store { value, dest } => format!("store {} {}", value.0, dest.0),
        ValueKind::GetElemPtr { src, index } => format!("getelemptr {} {}", src.0, index.0),
        ValueKind::GetPtr { src, index } => format!("getptr {} {}", src.0, index.0),
        ValueKind::Binary { op, lhs, rhs } => format!("binary {} {} {}", binop_to_str(*op), lhs.0, rhs.0),
        ValueKind::Branch { cond, then, els } => format!("branch {} {} {}", cond.0, then.0, els.0),
        ValueKind::Jump(b) => format!("jump {}", b.0),
        ValueKind::Call { func, args } => {
            let items: Vec<String> = args.iter().map(|v| v.0.to_string()).collect();
            format!("call {} {} {}", func.0, items.len(), items.join(" "))
        }
        ValueKind::Return(v) => match v {
            Some(v) => format!("return {}", v.0),
            None => "return -".to_string(),
        },
    };
    format!("{ty} {name} {kind}")
}

fn emit_func(data: &FuncData) -> String {
    let (params, ret) = match &data.ty {
        Type::Function(p, r) => (p.clone(), (**r).clone()),
        _ => unreachable!(),
    };
    let param_tys: Vec<String> = params.iter().map(type_to_string).collect();
    let param_vals: Vec<String> = data.params.iter().map(|v| v.0.to_string()).collect();
    let bbs: Vec<String> = data.bbs.iter().map(|b| b.0.to_string()).collect();
    let entry = data.entry.map(|b| b.0.to_string()).unwrap_or_else(|| "-".to_string());
    format!(
        "@{} ({}) {} decl={} nparams={} {} nbbs={} {} entry={}",
        data.name,
        param_tys.join(","),
        type_to_string(&ret),
        data.is_decl,
        param_vals.len(),
        param_vals.join(" "),
        bbs.len(),
        bbs.join(" "),
        entry
    )
}

fn binop_to_str(op: BinaryOp) -> &'static str {
    use BinaryOp::*;
    match op {
        Add => "add",
        Sub => "sub",
        Mul => "mul",
        Div => "div",
        Mod => "mod",
        Eq => "eq",
        NotEq => "ne",
        Lt => "lt",
        Le => "le",
        Gt => "gt",
        Ge => "ge",
        And => "and",
        Or => "or",
        Xor => "xor",
        Shl => "shl",
        Shr => "shr",
        Sar => "sar",
    }
}

fn str_to_binop(s: &str) -> BinaryOp {
    use BinaryOp::*;
    match s {
        "add" => Add,
        "sub" => Sub,
        "mul" => Mul,
        "div" => Div,
        "mod" => Mod,
        "eq" => Eq,
        "ne" => NotEq,
        "lt" => Lt,
        "le" => Le,
        "gt" => Gt,
        "ge" => Ge,
        "and" => And,
        "or" => Or,
        "xor" => Xor,
        "shl" => Shl,
        "shr" => Shr,
        "sar" => Sar,
        other => panic!("invalid serialized binary op '{other}'"),
    }
}

fn type_to_string(ty: &Type) -> String {
    match ty {
        Type::Int32 => "i32".to_string(),
        Type::Unit => "unit".to_string(),
        Type::Pointer(t) => format!("ptr({})", type_to_string(t)),
        Type::Array(t, n) => format!("arr({},{})", type_to_string(t), n),
        Type::Function(params, ret) => {
            let ps: Vec<String> = params.iter().map(type_to_string).collect();
            format!("fn({};{})", ps.join(","), type_to_string(ret))
        }
    }
}

struct TypeParser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> TypeParser<'a> {
    fn new(s: &'a str) -> Self {
        TypeParser { chars: s.chars().peekable() }
    }

    fn parse(&mut self) -> Type {
        let word = self.take_word();
        match word.as_str() {
            "i32" => Type::Int32,
            "unit" => Type::Unit,
            "ptr" => {
                self.expect('(');
                let inner = self.parse();
                self.expect(')');
                Type::ptr(inner)
            }
            "arr" => {
                self.expect('(');
                let inner = self.parse();
                self.expect(',');
                let n = self.take_number();
                self.expect(')');
                Type::array(inner, n)
            }
            "fn" => {
                self.expect('(');
                let mut params = Vec::new();
                if self.peek() != Some(';') {
                    params.push(self.parse());
                    while self.peek() == Some(',') {
                        self.bump();
                        params.push(self.parse());
                    }
                }
                self.expect(';');
                let ret = self.parse();
                self.expect(')');
                Type::Function(params, Box::new(ret))
            }
            other => panic!("invalid serialized type token '{other}'"),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    fn expect(&mut self, c: char) {
        let got = self.bump();
        assert_eq!(got, Some(c), "expected '{c}' while parsing serialized type");
    }

    fn take_word(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphabetic() {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        s
    }

    fn take_number(&mut self) -> usize {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        s.parse().expect("expected a number while parsing serialized type")
    }
}

fn parse_type(s: &str) -> Type {
    TypeParser::new(s).parse()
}

#[derive(Debug)]
pub struct IrTextError(String);

impl std::fmt::Display for IrTextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed IR text: {}", self.0)
    }
}

impl std::error::Error for IrTextError {}

fn fail<T>(msg: impl Into<String>) -> Result<T, IrTextError> {
    Err(IrTextError(msg.into()))
}

pub fn parse(text: &str) -> Result<Program, IrTextError> {
    let mut lines = text.lines();
    let mut program = Program::new();

    let n_values = header(&mut lines, "values")?;
    for _ in 0..n_values {
        let line = next_line(&mut lines)?;
        let data = parse_value_line(line)?;
        program.new_value_raw(data);
    }

    let n_blocks = header(&mut lines, "blocks")?;
    for _ in 0..n_blocks {
        let line = next_line(&mut lines)?;
        let mut toks = line.split_whitespace();
        let name_tok = toks.next().ok_or_else(|| IrTextError("missing block name".into()))?;
        let name = parse_name(name_tok);
        let count: usize = toks
            .next()
            .ok_or_else(|| IrTextError("missing block inst count".into()))?
            .parse()
            .map_err(|_| IrTextError("bad block inst count".into()))?;
        let insts: Vec<Value> = toks.take(count).map(|t| Value(t.parse().unwrap())).collect();
        let b = program.new_block(name);
        program.block_mut(b).insts = insts;
    }

    let n_funcs = header(&mut lines, "funcs")?;
    for _ in 0..n_funcs {
        let line = next_line(&mut lines)?;
        parse_func_line(&mut program, line)?;
    }

    let n_globals = header(&mut lines, "globals")?;
    let glob_line = next_line(&mut lines)?;
    let globals: Vec<Value> = glob_line
        .split_whitespace()
        .take(n_globals)
        .map(|t| Value(t.parse().unwrap()))
        .collect();
    program.globals = globals;

    Ok(program)
}

fn header<'a>(lines: &mut impl Iterator<Item = &'a str>, expect: &str) -> Result<usize, IrTextError> {
    let line = next_line(lines)?;
    let mut toks = line.split_whitespace();
    let tag = toks.next().ok_or_else(|| IrTextError(format!("expected '{expect}' header")))?;
    if tag != expect {
        return fail(format!("expected '{expect}' header, found '{tag}'"));
    }
    toks.next()
        .ok_or_else(|| IrTextError(format!("missing count after '{expect}'")))?
        .parse()
        .map_err(|_| IrTextError(format!("bad count after '{expect}'")))
}

fn next_line<'a>(lines: &mut impl Iterator<Item = &'a str>) -> Result<&'a str, IrTextError> {
    lines.next().ok_or_else(|| IrTextError("unexpected end of input".into()))
}

fn parse_name(tok: &str) -> Option<crate::common::Id> {
    tok.strip_prefix('@').map(intern)
}

fn parse_value_line(line: &str) -> Result<ValueData, IrTextError> {
    let mut toks = line.split_whitespace();
    let ty_tok = toks.next().ok_or_else(|| IrTextError("missing value type".into()))?;
    let ty = parse_type(ty_tok);
    let name_tok = toks.next().ok_or_else(|| IrTextError("missing value name".into()))?;
    let name = parse_name(name_tok);
    let tag = toks.next().ok_or_else(|| IrTextError("missing value kind".into()))?;

    let parse_i32 = |t: Option<&str>| -> Result<i32, IrTextError> {
        t.ok_or_else(|| IrTextError("missing integer operand".into()))?
            .parse()
            .map_err(|_| IrTextError("bad integer operand".into()))
    };
    let parse_val = |t: Option<&str>| -> Result<Value, IrTextError> {
        Ok(Value(
            t.ok_or_else(|| IrTextError("missing value operand".into()))?
                .parse()
                .map_err(|_| IrTextError("bad value operand".into()))?,
        ))
    };
    let parse_block = |t: Option<&str>| -> Result<BasicBlock, IrTextError> {
        Ok(BasicBlock(
            t.ok_or_else(|| IrTextError("missing block operand".into()))?
                .parse()
                .map_err(|_| IrTextError("bad block operand".into()))?,
        ))
    };

    let kind = match tag {
        "integer" => ValueKind::Integer(parse_i32(toks.next())?),
        "zeroinit" => ValueKind::ZeroInit,
        "aggregate" => {
            let n: usize = toks
                .next()
                .ok_or_else(|| IrTextError("missing aggregate count".into()))?
                .parse()
                .map_err(|_| IrTextError("bad aggregate count".into()))?;
            let items: Vec<Value> = toks.by_ref().take(n).map(|t| Value(t.parse().unwrap())).collect();
            ValueKind::Aggregate(items)
        }
        "funcarg" => ValueKind::FuncArgRef(parse_i32(toks.next())? as usize),
        "alloc" => ValueKind::Alloc,
        "globalalloc" => ValueKind::GlobalAlloc(parse_val(toks.next())?),
        "load" => ValueKind::Load(parse_val(toks.next())?),
        "store" => ValueKind::Store { value: parse_val(toks.next())?, dest: parse_val(toks.next())? },
        "getelemptr" => ValueKind::GetElemPtr { src: parse_val(toks.next())?, index: parse_val(toks.next())? },
        "getptr" => ValueKind::GetPtr { src: parse_val(toks.next())?, index: parse_val(toks.next())? },
        "binary" => {
            let op = str_to_binop(toks.next().ok_or_else(|| IrTextError("missing binary op".into()))?);
            ValueKind::Binary { op, lhs: parse_val(toks.next())?, rhs: parse_val(toks.next())? }
        }
        "branch" => ValueKind::Branch {
            cond: parse_val(toks.next())?,
            then: parse_block(toks.next())?,
            els: parse_block(toks.next())?,
        },
        "jump" => ValueKind::Jump(parse_block(toks.next())?),
        "call" => {
            let func = Func(toks
                .next()
                .ok_or_else(|| IrTextError("missing call func".into()))?
                .parse()
                .map_err(|_| IrTextError("bad call func".into()))?);
            let n: usize = toks
                .next()
                .ok_or_else(|| IrTextError("missing call argc".into()))?
                .parse()
                .map_err(|_| IrTextError("bad call argc".into()))?;
            let args: Vec<Value> = toks.by_ref().take(n).map(|t| Value(t.parse().unwrap())).collect();
            ValueKind::Call { func, args }
        }
        "return" => {
            let t = toks.next().ok_or_else(|| IrTextError("missing return operand".into()))?;
            ValueKind::Return(if t == "-" { None } else { Some(Value(t.parse().unwrap())) })
        }
        other => return fail(format!("unknown value kind tag '{other}'")),
    };

    Ok(ValueData { ty, name, kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front;

    fn lower(src: &str) -> Program {
        front::lower(&front::parse(src).unwrap()).unwrap()
    }

    #[test]
    fn round_trip_is_textually_stable() {
        let program = lower(
            "int fib(int n) { if (n <= 1) return n; return fib(n - 1) + fib(n - 2); } \
             int main() { return fib(10); }",
        );
        let text = emit(&program);
        let reparsed = parse(&text).expect("emitted text must parse back");
        assert_eq!(emit(&reparsed), text);
    }

    #[test]
    fn round_trip_preserves_globals_and_arrays() {
        let program = lower("int a[2][3] = {{1, 2, 3}, {4, 5, 6}}; int main() { return a[1][2]; }");
        let text = emit(&program);
        let reparsed = parse(&text).unwrap();
        assert_eq!(reparsed.globals.len(), program.globals.len());
        assert_eq!(emit(&reparsed), text);
    }

    #[test]
    fn type_round_trips_through_its_text_form() {
        let ty = Type::Function(vec![Type::ptr(Type::array(Type::Int32, 3)), Type::Int32], Box::new(Type::Unit));
        assert_eq!(parse_type(&type_to_string(&ty)), ty);
    }
}

fn parse_func_line(program: &mut Program, line: &str) -> Result<(), IrTextError> {
    let rest = line.strip_prefix('@').ok_or_else(|| IrTextError("function line must start with '@'".into()))?;
    let (name_str, rest) = rest
        .split_once(" (")
        .ok_or_else(|| IrTextError("missing function param list".into()))?;
    let name = intern(name_str);
    let (param_tys_str, rest) = rest
        .split_once(") ")
        .ok_or_else(|| IrTextError("malformed function param list".into()))?;
    let param_tys: Vec<Type> = if param_tys_str.is_empty() {
        Vec::new()
    } else {
        param_tys_str.split(',').map(parse_type).collect()
    };

    let mut toks = rest.split_whitespace();
    let ret_ty = parse_type(toks.next().ok_or_else(|| IrTextError("missing return type".into()))?);
    let is_decl: bool = kv(&mut toks, "decl")?.parse().map_err(|_| IrTextError("bad decl flag".into()))?;
    let nparams: usize = kv(&mut toks, "nparams")?.parse().map_err(|_| IrTextError("bad nparams".into()))?;
    let params: Vec<Value> = toks.by_ref().take(nparams).map(|t| Value(t.parse().unwrap())).collect();
    let nbbs: usize = kv(&mut toks, "nbbs")?.parse().map_err(|_| IrTextError("bad nbbs".into()))?;
    let bbs: Vec<BasicBlock> = toks.by_ref().take(nbbs).map(|t| BasicBlock(t.parse().unwrap())).collect();
    let entry_str = kv(&mut toks, "entry")?;
    let entry = if entry_str == "-" { None } else { Some(BasicBlock(entry_str.parse().unwrap())) };

    program.new_func(FuncData {
        name,
        ty: Type::Function(param_tys, Box::new(ret_ty)),
        params,
        bbs,
        entry,
        is_decl,
    });
    Ok(())
}

fn kv<'a>(toks: &mut impl Iterator<Item = &'a str>, key: &str) -> Result<&'a str, IrTextError> {
    let tok = toks.next().ok_or_else(|| IrTextError(format!("missing '{key}=' field")))?;
    tok.strip_prefix(key)
        .and_then(|s| s.strip_prefix('='))
        .ok_or_else(|| IrTextError(format!("expected '{key}=...' field, found '{tok}'")))
}
