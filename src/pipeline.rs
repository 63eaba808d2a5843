//! Wires the phases together: lex → parse → lower, then either print the IR
//! text directly (`-koopa`) or round-trip it through the text format before
//! handing it to the back-end (`-riscv`) — the round-trip mirrors the
//! reference compiler's own use of an external IR library as the boundary
//! between front-end and back-end, and doubles as a cheap well-formedness
//! check on whatever `front::lower` produced.

use crate::back;
use crate::error::CompileError;
use crate::front;
use crate::middle::ir_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Koopa,
    Riscv,
}

impl Mode {
    pub fn parse(flag: &str) -> Result<Mode, CompileError> {
        match flag {
            "-koopa" => Ok(Mode::Koopa),
            "-riscv" => Ok(Mode::Riscv),
            other => Err(CompileError::UnknownMode(other.to_string())),
        }
    }
}

/// Compiles `source` in `mode`, returning the generated text (Koopa-style IR
/// text, or RISC-V assembly).
pub fn compile(source: &str, mode: Mode) -> Result<String, CompileError> {
    log::debug!("lexing and parsing");
    let ast = front::parse(source)?;

    log::debug!("lowering to IR");
    let program = front::lower(&ast)?;

    match mode {
        Mode::Koopa => {
            log::debug!("emitting IR text");
            Ok(ir_text::emit(&program))
        }
        Mode::Riscv => {
            log::debug!("round-tripping IR through its text form");
            let text = ir_text::emit(&program);
            let program = ir_text::parse(&text).map_err(|e| {
                CompileError::Codegen(crate::error::CodegenError::Internal(e.to_string()))
            })?;

            log::debug!("generating RISC-V assembly");
            let asm = back::codegen(&program)?;
            Ok(asm.asm_code())
        }
    }
}
