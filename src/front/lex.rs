//! The lexer.

use derive_more::Display;
use regex::Regex;

/// Tokens in the program.
#[derive(Clone, Copy, PartialEq, Eq, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
}

/// Token classes for the SysY-like subset.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("int")]
    KwInt,
    #[display("void")]
    KwVoid,
    #[display("const")]
    KwConst,
    #[display("if")]
    KwIf,
    #[display("else")]
    KwElse,
    #[display("while")]
    KwWhile,
    #[display("break")]
    KwBreak,
    #[display("continue")]
    KwContinue,
    #[display("return")]
    KwReturn,
    #[display("=")]
    Assign,
    #[display(";")]
    Semi,
    #[display(",")]
    Comma,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Mod,
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
    #[display("==")]
    Eq,
    #[display("!=")]
    NotEq,
    #[display("&&")]
    AndAnd,
    #[display("||")]
    OrOr,
    #[display("!")]
    Not,
}

pub struct LexError(usize, char);

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at byte offset {}", self.1, self.0)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for LexError {}

/// Token classes listed in match-priority order: keywords are matched
/// before the generic identifier pattern so that e.g. `while` doesn't lex
/// as an `Id`.
fn matchers() -> Vec<(Regex, TokenKind)> {
    use TokenKind::*;
    vec![
        (Regex::new(r"\A\bint\b").unwrap(), KwInt),
        (Regex::new(r"\A\bvoid\b").unwrap(), KwVoid),
        (Regex::new(r"\A\bconst\b").unwrap(), KwConst),
        (Regex::new(r"\A\bif\b").unwrap(), KwIf),
        (Regex::new(r"\A\belse\b").unwrap(), KwElse),
        (Regex::new(r"\A\bwhile\b").unwrap(), KwWhile),
        (Regex::new(r"\A\bbreak\b").unwrap(), KwBreak),
        (Regex::new(r"\A\bcontinue\b").unwrap(), KwContinue),
        (Regex::new(r"\A\breturn\b").unwrap(), KwReturn),
        (Regex::new(r"\A[A-Za-z_][A-Za-z0-9_]*").unwrap(), Id),
        (Regex::new(r"\A(?:0[xX][0-9a-fA-F]+|0[0-7]*|[1-9][0-9]*)").unwrap(), Num),
        (Regex::new(r"\A==").unwrap(), Eq),
        (Regex::new(r"\A!=").unwrap(), NotEq),
        (Regex::new(r"\A<=").unwrap(), Le),
        (Regex::new(r"\A>=").unwrap(), Ge),
        (Regex::new(r"\A&&").unwrap(), AndAnd),
        (Regex::new(r"\A\|\|").unwrap(), OrOr),
        (Regex::new(r"\A=").unwrap(), Assign),
        (Regex::new(r"\A;").unwrap(), Semi),
        (Regex::new(r"\A,").unwrap(), Comma),
        (Regex::new(r"\A\(").unwrap(), LParen),
        (Regex::new(r"\A\)").unwrap(), RParen),
        (Regex::new(r"\A\{").unwrap(), LBrace),
        (Regex::new(r"\A\}").unwrap(), RBrace),
        (Regex::new(r"\A\[").unwrap(), LBracket),
        (Regex::new(r"\A\]").unwrap(), RBracket),
        (Regex::new(r"\A\+").unwrap(), Plus),
        (Regex::new(r"\A-").unwrap(), Minus),
        (Regex::new(r"\A\*").unwrap(), Mul),
        (Regex::new(r"\A/").unwrap(), Div),
        (Regex::new(r"\A%").unwrap(), Mod),
        (Regex::new(r"\A<").unwrap(), Lt),
        (Regex::new(r"\A>").unwrap(), Gt),
        (Regex::new(r"\A!").unwrap(), Not),
    ]
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        Lexer {
            input,
            pos: 0,
            whitespace: Regex::new(r"\A(?s:(?:[ \t\f\r\n\v]+|//[^\n]*|/\*.*?\*/))*").unwrap(),
            matchers: matchers(),
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.pos += m.end()
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }

        let rest = &self.input[self.pos..];
        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                let text = m.as_str();
                self.pos += text.len();
                return Ok(Some(Token { kind: *kind, text }));
            }
        }

        let c = rest.chars().next().unwrap();
        Err(LexError(self.pos, c))
    }

    /// Lex the entire input eagerly, for callers (the parser) that want
    /// random lookahead rather than a pure streaming interface.
    pub fn tokenize(mut self) -> Result<Vec<Token<'input>>, LexError> {
        let mut out = Vec::new();
        while let Some(tok) = self.next()? {
            out.push(tok);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_beat_identifiers() {
        assert_eq!(kinds("while whiley"), vec![TokenKind::KwWhile, TokenKind::Id]);
    }

    #[test]
    fn skips_whitespace_and_both_comment_styles() {
        let src = "int // trailing\n a /* block */ = 1;";
        assert_eq!(
            kinds(src),
            vec![TokenKind::KwInt, TokenKind::Id, TokenKind::Assign, TokenKind::Num, TokenKind::Semi]
        );
    }

    #[test]
    fn two_character_operators_are_not_split() {
        assert_eq!(kinds("a <= b && c"), vec![
            TokenKind::Id,
            TokenKind::Le,
            TokenKind::Id,
            TokenKind::AndAnd,
            TokenKind::Id,
        ]);
    }

    #[test]
    fn unexpected_character_is_an_error() {
        assert!(Lexer::new("int a = @;").tokenize().is_err());
    }
}
