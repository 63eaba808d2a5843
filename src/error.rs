//! Error taxonomy for the compiler (spec.md §7).
//!
//! All errors are fatal: the compiler never partially emits and never
//! attempts recovery. Each phase has its own error type; [`CompileError`]
//! unifies them for the pipeline and the CLI.

use derive_more::Display;
use std::fmt;

use crate::front::lex::LexError;
use crate::front::parse::ParseError;

/// Semantic and unsupported-construct errors raised while lowering the AST
/// to IR (spec.md §7: unknown identifier, non-constant expression in a
/// constant context, wrong argument count/type, return-with-value in
/// `void`, break/continue outside a loop, unsupported return/parameter
/// types) plus internal invariant violations detected during lowering.
#[derive(Display)]
pub enum LowerError {
    #[display("unknown identifier '{_0}'")]
    UnknownIdentifier(String),
    #[display("'{_0}' is already defined in this scope")]
    DuplicateDefinition(String),
    #[display("expression is not a compile-time constant in this context")]
    NotConstant,
    #[display("'{_0}' is a constant and cannot be assigned to")]
    AssignToConstant(String),
    #[display("'{_0}' is not callable")]
    NotCallable(String),
    #[display("call to '{name}' passes {got} argument(s), expected {expected}")]
    ArgCountMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[display("'break' outside of a loop")]
    BreakOutsideLoop,
    #[display("'continue' outside of a loop")]
    ContinueOutsideLoop,
    #[display("'return' with a value in a function returning void")]
    ReturnValueInVoid,
    #[display("unsupported return type '{_0}', only int/void are supported")]
    UnsupportedReturnType(String),
    #[display("unsupported parameter type for '{_0}', only scalar int and array are supported")]
    UnsupportedParamType(String),
    #[display("initializer list is longer than the slot it fills")]
    InitializerOverflow,
    #[display("internal invariant violated: {_0}")]
    Internal(String),
}

impl fmt::Debug for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for LowerError {}

/// Errors raised while translating IR to RISC-V assembly. Under normal
/// operation these should never trigger on IR produced by this crate's own
/// `front::lower` — they exist to catch invariant violations if the IR came
/// from a hand-written or round-tripped source (spec.md §7: "internal
/// invariants... is a compiler bug; report and abort").
#[derive(Display)]
pub enum CodegenError {
    #[display("internal invariant violated: {_0}")]
    Internal(String),
}

impl fmt::Debug for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for CodegenError {}

/// The top-level error type returned by [`crate::pipeline::compile`] and
/// surfaced by the CLI binary.
#[derive(Display)]
pub enum CompileError {
    #[display("{_0}")]
    Lex(LexError),
    #[display("{_0}")]
    Parse(ParseError),
    #[display("{_0}")]
    Lower(LowerError),
    #[display("{_0}")]
    Codegen(CodegenError),
    #[display("unknown compilation mode '{_0}', expected -koopa or -riscv")]
    UnknownMode(String),
    #[display("could not read input file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl fmt::Debug for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for CompileError {}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::Lex(e)
    }
}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::Parse(e)
    }
}

impl From<LowerError> for CompileError {
    fn from(e: LowerError) -> Self {
        CompileError::Lower(e)
    }
}

impl From<CodegenError> for CompileError {
    fn from(e: CodegenError) -> Self {
        CompileError::Codegen(e)
    }
}
