//! The parser: a hand-written recursive-descent parser over the token
//! stream, implementing the standard SysY expression-precedence grammar
//! (LOrExp > LAndExp > EqExp > RelExp > AddExp > MulExp > UnaryExp >
//! PrimaryExp).

use std::fmt::Debug;

use derive_more::Display;

use super::ast::*;
use super::lex::{Lexer, Token, TokenKind};
use crate::common::intern;

#[derive(Display)]
#[display("Parse error: {_0}")]
pub struct ParseError(String);

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for ParseError {}

fn err<T>(msg: impl Into<String>) -> Result<T, ParseError> {
    Err(ParseError(msg.into()))
}

pub fn parse(input: &str) -> Result<CompUnit, ParseError> {
    let tokens = Lexer::new(input)
        .tokenize()
        .map_err(|e| ParseError(e.to_string()))?;
    let mut p = Parser { tokens, pos: 0 };
    p.comp_unit()
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<Token<'src>> {
        self.tokens.get(self.pos).copied()
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn bump(&mut self) -> Result<Token<'src>, ParseError> {
        let t = self.peek().ok_or_else(|| ParseError("unexpected end of input".into()))?;
        self.pos += 1;
        Ok(t)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        match self.peek() {
            Some(t) if t.kind == kind => {
                self.pos += 1;
                Ok(t)
            }
            Some(t) => err(format!("expected {kind}, found {}", t.kind)),
            None => err(format!("expected {kind}, found end of input")),
        }
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<crate::common::Id, ParseError> {
        let t = self.expect(TokenKind::Id)?;
        Ok(intern(t.text))
    }

    fn number(&mut self) -> Result<i32, ParseError> {
        let t = self.expect(TokenKind::Num)?;
        parse_int_literal(t.text).map_err(ParseError)
    }

    // CompUnit ::= {ConstDecl | VarDecl | FuncDef}
    fn comp_unit(&mut self) -> Result<CompUnit, ParseError> {
        let mut items = Vec::new();
        while self.peek().is_some() {
            items.push(self.global_item()?);
        }
        Ok(CompUnit { items })
    }

    fn global_item(&mut self) -> Result<GlobalItem, ParseError> {
        if self.peek_kind() == Some(TokenKind::KwConst) {
            return Ok(GlobalItem::ConstDecl(self.const_decl()?));
        }

        // Both VarDecl and FuncDef start with a type then an identifier;
        // disambiguate on the token after the identifier.
        let ret_ty = self.btype_or_void()?;
        let ident = self.ident()?;
        if self.peek_kind() == Some(TokenKind::LParen) {
            Ok(GlobalItem::FuncDef(self.func_def_rest(ret_ty, ident)?))
        } else {
            Ok(GlobalItem::VarDecl(self.var_decl_rest(ident)?))
        }
    }

    fn btype_or_void(&mut self) -> Result<FuncRetType, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::KwInt) => {
                self.bump()?;
                Ok(FuncRetType::Int)
            }
            Some(TokenKind::KwVoid) => {
                self.bump()?;
                Ok(FuncRetType::Void)
            }
            Some(k) => err(format!("expected 'int' or 'void', found {k}")),
            None => err("expected 'int' or 'void', found end of input"),
        }
    }

    fn btype(&mut self) -> Result<(), ParseError> {
        self.expect(TokenKind::KwInt)?;
        Ok(())
    }

    // ConstDecl ::= "const" BType ConstDef {"," ConstDef} ";"
    fn const_decl(&mut self) -> Result<ConstDecl, ParseError> {
        self.expect(TokenKind::KwConst)?;
        self.btype()?;
        let mut defs = vec![self.const_def()?];
        while self.eat(TokenKind::Comma) {
            defs.push(self.const_def()?);
        }
        self.expect(TokenKind::Semi)?;
        Ok(ConstDecl { defs })
    }

    // ConstDef ::= IDENT {"[" ConstExp "]"} "=" ConstInitVal
    fn const_def(&mut self) -> Result<ConstDef, ParseError> {
        let ident = self.ident()?;
        let mut dims = Vec::new();
        while self.eat(TokenKind::LBracket) {
            dims.push(self.expr()?);
            self.expect(TokenKind::RBracket)?;
        }
        self.expect(TokenKind::Assign)?;
        let init = self.const_init_val()?;
        Ok(ConstDef { ident, dims, init })
    }

    fn const_init_val(&mut self) -> Result<ConstInitVal, ParseError> {
        if self.eat(TokenKind::LBrace) {
            let mut list = Vec::new();
            if self.peek_kind() != Some(TokenKind::RBrace) {
                list.push(self.const_init_val()?);
                while self.eat(TokenKind::Comma) {
                    list.push(self.const_init_val()?);
                }
            }
            self.expect(TokenKind::RBrace)?;
            Ok(ConstInitVal::List(list))
        } else {
            Ok(ConstInitVal::Exp(self.expr()?))
        }
    }

    // VarDecl ::= BType VarDef {"," VarDef} ";"   (BType already consumed by caller)
    fn var_decl_rest(&mut self, first_ident: crate::common::Id) -> Result<VarDecl, ParseError> {
        let mut defs = vec![self.var_def_rest(first_ident)?];
        while self.eat(TokenKind::Comma) {
            let ident = self.ident()?;
            defs.push(self.var_def_rest(ident)?);
        }
        self.expect(TokenKind::Semi)?;
        Ok(VarDecl { defs })
    }

    // VarDef ::= IDENT {"[" ConstExp "]"} ["=" InitVal]
    fn var_def_rest(&mut self, ident: crate::common::Id) -> Result<VarDef, ParseError> {
        let mut dims = Vec::new();
        while self.eat(TokenKind::LBracket) {
            dims.push(self.expr()?);
            self.expect(TokenKind::RBracket)?;
        }
        let init = if self.eat(TokenKind::Assign) {
            Some(self.init_val()?)
        } else {
            None
        };
        Ok(VarDef { ident, dims, init })
    }

    fn init_val(&mut self) -> Result<InitVal, ParseError> {
        if self.eat(TokenKind::LBrace) {
            let mut list = Vec::new();
            if self.peek_kind() != Some(TokenKind::RBrace) {
                list.push(self.init_val()?);
                while self.eat(TokenKind::Comma) {
                    list.push(self.init_val()?);
                }
            }
            self.expect(TokenKind::RBrace)?;
            Ok(InitVal::List(list))
        } else {
            Ok(InitVal::Exp(self.expr()?))
        }
    }

    // FuncDef ::= FuncType IDENT "(" [FuncFParams] ")" Block  (FuncType, IDENT already consumed)
    fn func_def_rest(
        &mut self,
        ret_ty: FuncRetType,
        ident: crate::common::Id,
    ) -> Result<FuncDef, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if self.peek_kind() != Some(TokenKind::RParen) {
            params.push(self.func_fparam()?);
            while self.eat(TokenKind::Comma) {
                params.push(self.func_fparam()?);
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.block()?;
        Ok(FuncDef {
            ret_ty,
            ident,
            params,
            body,
        })
    }

    // FuncFParam ::= BType IDENT ["[" "]" {"[" ConstExp "]"}]
    fn func_fparam(&mut self) -> Result<FuncParam, ParseError> {
        self.btype()?;
        let ident = self.ident()?;
        let array_dims = if self.eat(TokenKind::LBracket) {
            self.expect(TokenKind::RBracket)?;
            let mut dims = Vec::new();
            while self.eat(TokenKind::LBracket) {
                dims.push(self.expr()?);
                self.expect(TokenKind::RBracket)?;
            }
            Some(dims)
        } else {
            None
        };
        Ok(FuncParam { ident, array_dims })
    }

    // Block ::= "{" {BlockItem} "}"
    fn block(&mut self) -> Result<Block, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut items = Vec::new();
        while self.peek_kind() != Some(TokenKind::RBrace) {
            items.push(self.block_item()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Block { items })
    }

    fn block_item(&mut self) -> Result<BlockItem, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::KwConst) => Ok(BlockItem::Const(self.const_decl()?)),
            Some(TokenKind::KwInt) => {
                self.bump()?;
                let ident = self.ident()?;
                Ok(BlockItem::Var(self.var_decl_rest(ident)?))
            }
            _ => Ok(BlockItem::Stmt(self.stmt()?)),
        }
    }

    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::LBrace) => Ok(Stmt::Block(self.block()?)),
            Some(TokenKind::KwIf) => {
                self.bump()?;
                self.expect(TokenKind::LParen)?;
                let cond = self.expr()?;
                self.expect(TokenKind::RParen)?;
                let tt = Box::new(self.stmt()?);
                let ff = if self.eat(TokenKind::KwElse) {
                    Some(Box::new(self.stmt()?))
                } else {
                    None
                };
                Ok(Stmt::If(cond, tt, ff))
            }
            Some(TokenKind::KwWhile) => {
                self.bump()?;
                self.expect(TokenKind::LParen)?;
                let cond = self.expr()?;
                self.expect(TokenKind::RParen)?;
                let body = Box::new(self.stmt()?);
                Ok(Stmt::While(cond, body))
            }
            Some(TokenKind::KwBreak) => {
                self.bump()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Break)
            }
            Some(TokenKind::KwContinue) => {
                self.bump()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Continue)
            }
            Some(TokenKind::KwReturn) => {
                self.bump()?;
                let value = if self.peek_kind() == Some(TokenKind::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Return(value))
            }
            Some(TokenKind::Semi) => {
                self.bump()?;
                Ok(Stmt::Expr(None))
            }
            _ => {
                // Either an assignment ("LVal = Exp ;") or a bare expression
                // statement. Both start with an expression, so speculatively
                // parse an LVal and check for '=' before falling back.
                let checkpoint = self.pos;
                if let Some(lval) = self.try_lval_then_assign()? {
                    return Ok(lval);
                }
                self.pos = checkpoint;
                let e = self.expr()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Expr(Some(e)))
            }
        }
    }

    fn try_lval_then_assign(&mut self) -> Result<Option<Stmt>, ParseError> {
        if self.peek_kind() != Some(TokenKind::Id) {
            return Ok(None);
        }
        let ident = self.ident()?;
        let mut indices = Vec::new();
        while self.eat(TokenKind::LBracket) {
            indices.push(self.expr()?);
            self.expect(TokenKind::RBracket)?;
        }
        if self.eat(TokenKind::Assign) {
            let rhs = self.expr()?;
            self.expect(TokenKind::Semi)?;
            Ok(Some(Stmt::Assign(LVal { ident, indices }, rhs)))
        } else {
            Ok(None)
        }
    }

    // Exp ::= LOrExp
    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.lor_exp()
    }

    fn lor_exp(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.land_exp()?;
        while self.eat(TokenKind::OrOr) {
            let rhs = self.land_exp()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn land_exp(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.eq_exp()?;
        while self.eat(TokenKind::AndAnd) {
            let rhs = self.eq_exp()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn eq_exp(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.rel_exp()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Eq) => BinaryOp::Eq,
                Some(TokenKind::NotEq) => BinaryOp::NotEq,
                _ => break,
            };
            self.bump()?;
            let rhs = self.rel_exp()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn rel_exp(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.add_exp()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Lt) => BinaryOp::Lt,
                Some(TokenKind::Le) => BinaryOp::Le,
                Some(TokenKind::Gt) => BinaryOp::Gt,
                Some(TokenKind::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.bump()?;
            let rhs = self.add_exp()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn add_exp(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.mul_exp()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.bump()?;
            let rhs = self.mul_exp()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn mul_exp(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary_exp()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Mul) => BinaryOp::Mul,
                Some(TokenKind::Div) => BinaryOp::Div,
                Some(TokenKind::Mod) => BinaryOp::Mod,
                _ => break,
            };
            self.bump()?;
            let rhs = self.unary_exp()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary_exp(&mut self) -> Result<Expr, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Plus) => {
                self.bump()?;
                Ok(Expr::Unary(UnaryOp::Plus, Box::new(self.unary_exp()?)))
            }
            Some(TokenKind::Minus) => {
                self.bump()?;
                Ok(Expr::Unary(UnaryOp::Minus, Box::new(self.unary_exp()?)))
            }
            Some(TokenKind::Not) => {
                self.bump()?;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary_exp()?)))
            }
            Some(TokenKind::Id) if self.peek_is_call() => {
                let ident = self.ident()?;
                self.expect(TokenKind::LParen)?;
                let mut args = Vec::new();
                if self.peek_kind() != Some(TokenKind::RParen) {
                    args.push(self.expr()?);
                    while self.eat(TokenKind::Comma) {
                        args.push(self.expr()?);
                    }
                }
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Call(ident, args))
            }
            _ => self.primary_exp(),
        }
    }

    fn peek_is_call(&self) -> bool {
        self.tokens
            .get(self.pos + 1)
            .map(|t| t.kind == TokenKind::LParen)
            .unwrap_or(false)
    }

    fn primary_exp(&mut self) -> Result<Expr, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::LParen) => {
                self.bump()?;
                let e = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(e)
            }
            Some(TokenKind::Num) => Ok(Expr::Number(self.number()?)),
            Some(TokenKind::Id) => {
                let ident = self.ident()?;
                let mut indices = Vec::new();
                while self.eat(TokenKind::LBracket) {
                    indices.push(self.expr()?);
                    self.expect(TokenKind::RBracket)?;
                }
                Ok(Expr::LVal(LVal { ident, indices }))
            }
            Some(k) => err(format!("unexpected token {k} in expression")),
            None => err("unexpected end of input in expression"),
        }
    }
}

fn parse_int_literal(text: &str) -> Result<i32, String> {
    let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        i64::from_str_radix(&text[1..], 8)
    } else {
        text.parse::<i64>()
    }
    .map_err(|e| format!("invalid integer literal '{text}': {e}"))?;

    Ok(value as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_octal_literals() {
        assert_eq!(parse_int_literal("0x1F").unwrap(), 31);
        assert_eq!(parse_int_literal("017").unwrap(), 15);
        assert_eq!(parse_int_literal("0").unwrap(), 0);
        assert_eq!(parse_int_literal("42").unwrap(), 42);
    }

    #[test]
    fn mul_binds_tighter_than_add() {
        let unit = parse("int main() { return 1 + 2 * 3; }").unwrap();
        let GlobalItem::FuncDef(f) = &unit.items[0] else { panic!("expected a function") };
        let BlockItem::Stmt(Stmt::Return(Some(Expr::Binary(op, lhs, rhs)))) = &f.body.items[0] else {
            panic!("expected a return statement")
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(**lhs, Expr::Number(1)));
        assert!(matches!(**rhs, Expr::Binary(BinaryOp::Mul, _, _)));
    }

    #[test]
    fn dangling_else_binds_to_the_nearest_if() {
        let src = "int main() { if (1) if (0) return 1; else return 2; return 3; }";
        let unit = parse(src).unwrap();
        let GlobalItem::FuncDef(f) = &unit.items[0] else { panic!("expected a function") };
        let BlockItem::Stmt(Stmt::If(_, then, els)) = &f.body.items[0] else {
            panic!("expected an if statement")
        };
        assert!(els.is_none(), "the outer if must not claim the else");
        assert!(matches!(**then, Stmt::If(_, _, Some(_))), "the inner if must claim the else");
    }

    #[test]
    fn array_declaration_dimensions_and_initializer_nesting() {
        let src = "int a[2][3] = {{1, 2, 3}, {4, 5, 6}};";
        let unit = parse(src).unwrap();
        let GlobalItem::VarDecl(decl) = &unit.items[0] else { panic!("expected a var decl") };
        let def = &decl.defs[0];
        assert_eq!(def.dims.len(), 2);
        let Some(InitVal::List(rows)) = &def.init else { panic!("expected a list initializer") };
        assert_eq!(rows.len(), 2);
        assert!(matches!(&rows[0], InitVal::List(cols) if cols.len() == 3));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("int main() { return 1 }").is_err());
    }
}
