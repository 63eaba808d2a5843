//! The 32-bit RISC-V (RV32IM) backend.
//!
//! There is no register allocator: every IR value that needs storage gets a
//! spill slot in its function's stack frame, and instruction selection
//! loads/stores through it directly. This keeps code generation a local,
//! one-value-at-a-time translation at the cost of instruction density (fine
//! for a teaching compiler, not for a production one).
//!
//! # Call stack frame
//!
//! RISC-V's stack grows down and must stay 16-byte aligned at a `call`.
//! Unlike a register-allocating backend we never need a frame pointer: a
//! function's frame size is known up front (the sum of every instruction's
//! spill slot, plus 4 bytes for `ra` if the function makes any calls), so
//! the prologue/epilogue only ever adjust `sp`.
//!
//! ```txt
//!   High memory addresses
//!   +-------------------------+
//!   | Caller's frame          |
//!   +-------------------------+
//!   | Stack-passed arguments  |  (args 8.. of a call made *into* this frame)
//!   +-------------------------+ <- sp after prologue
//!   | Saved ra (if any calls) |
//!   +-------------------------+
//!   | Spill slots             |
//!   +-------------------------+ <- sp
//!   Low memory addresses
//! ```
//!
//! # Calling convention
//!
//! The first 8 integer arguments go in `a0`-`a7`; the rest are pushed onto
//! the stack, at a positive offset from the *callee's* `sp` (computed from
//! the callee's frame size, not the caller's). The return value (if any)
//! comes back in `a0`. There are no callee-saved registers in play here:
//! every live value already lives on the stack, so there is nothing to
//! preserve across a call except `ra`.

use derive_more::Display;

use crate::common::Id;

/// Word and pointer size for RV32.
pub const WORD_SIZE: i32 = 4;

/// Registers used in the generated code, in RISC-V ABI naming.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Register {
    #[display("zero")]
    Zero,
    #[display("ra")]
    Ra,
    #[display("sp")]
    Sp,
    #[display("a0")]
    A0,
    #[display("a1")]
    A1,
    #[display("a2")]
    A2,
    #[display("a3")]
    A3,
    #[display("a4")]
    A4,
    #[display("a5")]
    A5,
    #[display("a6")]
    A6,
    #[display("a7")]
    A7,
    #[display("t0")]
    T0,
    #[display("t1")]
    T1,
    #[display("t2")]
    T2,
    #[display("t3")]
    T3,
    #[display("t4")]
    T4,
    #[display("t5")]
    T5,
    #[display("t6")]
    T6,
}

/// Argument registers, in ABI order. Only the first 8 arguments of a call
/// use these; the rest spill to the stack.
pub static ARG_REGISTERS: [Register; 8] = [
    Register::A0,
    Register::A1,
    Register::A2,
    Register::A3,
    Register::A4,
    Register::A5,
    Register::A6,
    Register::A7,
];

/// General-purpose scratch registers available to instruction selection
/// within a single value's lowering. `t6` is reserved as the immediate
/// overflow scratch (see [`Instruction::load`]/[`Instruction::store`]).
pub static SCRATCH_REGISTERS: [Register; 6] =
    [Register::T0, Register::T1, Register::T2, Register::T3, Register::T4, Register::T5];

/// Jump/branch targets.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum JumpTarget {
    /// A label within the same function.
    Local(Id),
    /// A function name.
    Global(Id),
}

impl std::fmt::Display for JumpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JumpTarget::Local(l) => write!(f, "{l}"),
            JumpTarget::Global(g) => write!(f, "{g}"),
        }
    }
}

/// A single RISC-V instruction (or assembler directive/comment/label).
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Instruction {
    /// `lw dst, offset(base)`, within the ±2047 signed-immediate range.
    Lw { dst: Register, base: Register, offset: i32 },
    /// `sw src, offset(base)`, within the ±2047 signed-immediate range.
    Sw { src: Register, base: Register, offset: i32 },
    /// `la dst, symbol`
    La { dst: Register, symbol: Id },
    /// `li dst, imm`
    Li { dst: Register, imm: i32 },
    /// `mv dst, src`
    Mv { dst: Register, src: Register },
    Add { dst: Register, lhs: Register, rhs: Register },
    Addi { dst: Register, lhs: Register, imm: i32 },
    Sub { dst: Register, lhs: Register, rhs: Register },
    Mul { dst: Register, lhs: Register, rhs: Register },
    Div { dst: Register, lhs: Register, rhs: Register },
    Rem { dst: Register, lhs: Register, rhs: Register },
    Slt { dst: Register, lhs: Register, rhs: Register },
    Sgt { dst: Register, lhs: Register, rhs: Register },
    Xor { dst: Register, lhs: Register, rhs: Register },
    Xori { dst: Register, lhs: Register, imm: i32 },
    And { dst: Register, lhs: Register, rhs: Register },
    Or { dst: Register, lhs: Register, rhs: Register },
    /// `sll dst, lhs, rhs` (logical left shift)
    Sll { dst: Register, lhs: Register, rhs: Register },
    /// `srl dst, lhs, rhs` (logical right shift)
    Srl { dst: Register, lhs: Register, rhs: Register },
    /// `sra dst, lhs, rhs` (arithmetic right shift)
    Sra { dst: Register, lhs: Register, rhs: Register },
    Seqz { dst: Register, src: Register },
    Snez { dst: Register, src: Register },
    /// `j target`
    J(JumpTarget),
    /// `beqz cond, target`
    Beqz { cond: Register, target: JumpTarget },
    /// `bnez cond, target`
    Bnez { cond: Register, target: JumpTarget },
    /// `call target`
    Call(JumpTarget),
    /// `jr` via `ret` at the very end of a function body.
    Ret,
    /// A local label, e.g. a branch-skip label or a basic block's own name.
    Label(Id),
    /// In-line comment, dropped from no-debug builds in spirit but kept
    /// here unconditionally since we have no such build mode.
    Comment(String),
}

impl Instruction {
    pub fn load(dst: Register, base: Register, offset: i32) -> Vec<Instruction> {
        if is_imm12(offset) {
            vec![Instruction::Lw { dst, base, offset }]
        } else {
            vec![
                Instruction::Li { dst: Register::T6, imm: offset },
                Instruction::Add { dst: Register::T6, lhs: Register::T6, rhs: base },
                Instruction::Lw { dst, base: Register::T6, offset: 0 },
            ]
        }
    }

    pub fn store(src: Register, base: Register, offset: i32) -> Vec<Instruction> {
        if is_imm12(offset) {
            vec![Instruction::Sw { src, base, offset }]
        } else {
            vec![
                Instruction::Li { dst: Register::T6, imm: offset },
                Instruction::Add { dst: Register::T6, lhs: Register::T6, rhs: base },
                Instruction::Sw { src, base: Register::T6, offset: 0 },
            ]
        }
    }

    pub fn addi_safe(dst: Register, lhs: Register, imm: i32) -> Vec<Instruction> {
        if is_imm12(imm) {
            vec![Instruction::Addi { dst, lhs, imm }]
        } else {
            vec![
                Instruction::Li { dst: Register::T6, imm },
                Instruction::Add { dst, lhs, rhs: Register::T6 },
            ]
        }
    }
}

/// Is `imm` representable as RISC-V's signed 12-bit immediate?
pub fn is_imm12(imm: i32) -> bool {
    (-2048..=2047).contains(&imm)
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Instruction::*;
        match self {
            Lw { dst, base, offset } => write!(f, "  lw {dst}, {offset}({base})"),
            Sw { src, base, offset } => write!(f, "  sw {src}, {offset}({base})"),
            La { dst, symbol } => write!(f, "  la {dst}, {symbol}"),
            Li { dst, imm } => write!(f, "  li {dst}, {imm}"),
            Mv { dst, src } => write!(f, "  mv {dst}, {src}"),
            Add { dst, lhs, rhs } => write!(f, "  add {dst}, {lhs}, {rhs}"),
            Addi { dst, lhs, imm } => write!(f, "  addi {dst}, {lhs}, {imm}"),
            Sub { dst, lhs, rhs } => write!(f, "  sub {dst}, {lhs}, {rhs}"),
            Mul { dst, lhs, rhs } => write!(f, "  mul {dst}, {lhs}, {rhs}"),
            Div { dst, lhs, rhs } => write!(f, "  div {dst}, {lhs}, {rhs}"),
            Rem { dst, lhs, rhs } => write!(f, "  rem {dst}, {lhs}, {rhs}"),
            Slt { dst, lhs, rhs } => write!(f, "  slt {dst}, {lhs}, {rhs}"),
            Sgt { dst, lhs, rhs } => write!(f, "  sgt {dst}, {lhs}, {rhs}"),
            Xor { dst, lhs, rhs } => write!(f, "  xor {dst}, {lhs}, {rhs}"),
            Xori { dst, lhs, imm } => write!(f, "  xori {dst}, {lhs}, {imm}"),
            And { dst, lhs, rhs } => write!(f, "  and {dst}, {lhs}, {rhs}"),
            Or { dst, lhs, rhs } => write!(f, "  or {dst}, {lhs}, {rhs}"),
            Sll { dst, lhs, rhs } => write!(f, "  sll {dst}, {lhs}, {rhs}"),
            Srl { dst, lhs, rhs } => write!(f, "  srl {dst}, {lhs}, {rhs}"),
            Sra { dst, lhs, rhs } => write!(f, "  sra {dst}, {lhs}, {rhs}"),
            Seqz { dst, src } => write!(f, "  seqz {dst}, {src}"),
            Snez { dst, src } => write!(f, "  snez {dst}, {src}"),
            J(target) => write!(f, "  j {target}"),
            Beqz { cond, target } => write!(f, "  beqz {cond}, {target}"),
            Bnez { cond, target } => write!(f, "  bnez {cond}, {target}"),
            Call(target) => write!(f, "  call {target}"),
            Ret => write!(f, "  ret"),
            Label(name) => write!(f, "{name}:"),
            Comment(s) => write!(f, "  # {s}"),
        }
    }
}

/// A function's worth of generated instructions, not yet joined into the
/// final text.
pub struct AsmFunc {
    pub name: Id,
    pub body: Vec<Instruction>,
}

/// A flattened global datum, either zero-initialized or with explicit
/// `.word` values (nested arrays are flattened in declaration order by the
/// front-end's constant folding before codegen ever sees them).
pub enum GlobalData {
    Zero { name: Id, bytes: i32 },
    Words { name: Id, values: Vec<i32> },
}

/// The whole generated program: a `.data` section of globals followed by a
/// `.text` section of function bodies, matching the reference compiler's
/// `koopa2riscv` output shape.
#[derive(Default)]
pub struct Program {
    pub globals: Vec<GlobalData>,
    pub funcs: Vec<AsmFunc>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    pub fn asm_code(&self) -> String {
        let mut out = String::new();

        if !self.globals.is_empty() {
            out.push_str("  .data\n");
            for g in &self.globals {
                match g {
                    GlobalData::Zero { name, bytes } => {
                        out.push_str(&format!("  .globl {name}\n{name}:\n  .zero {bytes}\n"));
                    }
                    GlobalData::Words { name, values } => {
                        out.push_str(&format!("  .globl {name}\n{name}:\n"));
                        for v in values {
                            out.push_str(&format!("  .word {v}\n"));
                        }
                    }
                }
            }
            out.push('\n');
        }

        out.push_str("  .text\n");
        for func in &self.funcs {
            out.push_str(&format!("  .globl {}\n{}:\n", func.name, func.name));
            for inst in &func.body {
                out.push_str(&inst.to_string());
                out.push('\n');
            }
            out.push('\n');
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imm12_boundary() {
        assert!(is_imm12(2047));
        assert!(is_imm12(-2048));
        assert!(!is_imm12(2048));
        assert!(!is_imm12(-2049));
    }

    #[test]
    fn store_spills_to_a_scratch_register_once_out_of_range() {
        let insts = Instruction::store(Register::T0, Register::Sp, 4096);
        assert_eq!(insts.len(), 3);
        assert!(matches!(insts[0], Instruction::Li { dst: Register::T6, imm: 4096 }));
        assert!(matches!(insts[2], Instruction::Sw { base: Register::T6, offset: 0, .. }));
    }

    #[test]
    fn store_in_range_is_a_single_instruction() {
        let insts = Instruction::store(Register::T0, Register::Sp, 16);
        assert_eq!(insts, vec![Instruction::Sw { src: Register::T0, base: Register::Sp, offset: 16 }]);
    }
}
