//! The middle-end: an SSA-style intermediate representation, built by
//! `front::lower` and consumed by `back::codegen`.

pub mod builder;
pub mod ir;
pub mod ir_text;
pub mod scopes;
pub mod types;

pub use builder::Builder;
pub use ir::{BasicBlock, Func, Program, Value, ValueKind};
pub use scopes::{Binding, Scopes};
pub use types::Type;
