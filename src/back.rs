//! The back-end: lowers [`crate::middle::ir`] into RISC-V 32-bit assembly.
//! There is no register allocator: every value gets a spill slot on the
//! stack, which keeps instruction selection a direct, local translation at
//! the cost of density (a teaching-compiler trade-off, not a production
//! one).

pub mod asm;
pub mod codegen;
pub mod stack;

pub use asm::*;
pub use codegen::codegen;
