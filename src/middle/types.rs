//! Types that can be carried by IR values: 32-bit integers, the unit type
//! of non-returning instructions, pointers, arrays, and function
//! signatures.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Int32,
    Unit,
    Pointer(Box<Type>),
    Array(Box<Type>, usize),
    Function(Vec<Type>, Box<Type>),
}

impl Type {
    pub fn ptr(to: Type) -> Type {
        Type::Pointer(Box::new(to))
    }

    pub fn array(of: Type, len: usize) -> Type {
        Type::Array(Box::new(of), len)
    }

    /// Size in bytes, matching RISC-V32's `sizeof`: 4 bytes for an `int`,
    /// `len * size_of(elem)` for an array, 4 bytes for any pointer, and 0
    /// for the unit type (instructions with no result occupy no storage).
    pub fn size(&self) -> usize {
        match self {
            Type::Int32 => 4,
            Type::Unit => 0,
            Type::Pointer(_) => 4,
            Type::Array(elem, len) => elem.size() * len,
            Type::Function(..) => 0,
        }
    }

    /// The element type one `GetElemPtr` step down from an array or
    /// pointer-to-array type, panicking on anything else (a compiler-internal
    /// invariant, never reachable from user input after lowering validates
    /// indexing against declared dimensions).
    pub fn elem(&self) -> Type {
        match self {
            Type::Array(elem, _) => (**elem).clone(),
            Type::Pointer(inner) => match inner.as_ref() {
                Type::Array(elem, _) => (**elem).clone(),
                other => other.clone(),
            },
            other => panic!("type {other:?} has no element type"),
        }
    }

    /// The pointee of a pointer type, e.g. for sizing an `Alloc`'s slot.
    pub fn pointee(&self) -> &Type {
        match self {
            Type::Pointer(inner) => inner,
            other => panic!("type {other:?} is not a pointer"),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(..))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int32 => write!(f, "i32"),
            Type::Unit => write!(f, "unit"),
            Type::Pointer(to) => write!(f, "*{to}"),
            Type::Array(elem, len) => write!(f, "[{elem}; {len}]"),
            Type::Function(params, ret) => {
                write!(f, "(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")
            }
        }
    }
}
