//! Common definitions that are shared between different parts of the compiler.

// Use sorted sets and maps for consistent output.
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// Identifiers. Interned so that copying an `Id` around the lowering and
/// codegen contexts is a pointer copy, and so two identifiers with the same
/// text always compare equal and hash identically.
pub type Id = internment::Intern<String>;

/// Intern a string slice as an [`Id`].
pub fn intern(s: &str) -> Id {
    internment::Intern::new(s.to_string())
}
