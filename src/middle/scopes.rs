//! Lexical scoping for identifiers, resolved during lowering.
//!
//! A new frame is pushed for the translation unit, for each function body,
//! and for each nested block; looked up innermost-first so that a local
//! shadows an outer declaration of the same name, matching the source
//! language's block scoping.

use std::rc::Rc;

use crate::common::{Id, Map};
use crate::middle::ir::{Func, Value};

/// The flattened data backing a `const`-declared array, kept around so a
/// fully-indexed reference to it can be folded at compile time even though
/// the array also has ordinary runtime storage (indexing by a non-constant
/// expression still has to go through that storage).
#[derive(Debug, Clone)]
pub struct ConstArrayData {
    pub dims: Rc<Vec<usize>>,
    pub flat: Rc<Vec<i32>>,
}

/// What an identifier is bound to in some scope.
#[derive(Debug, Clone)]
pub enum Binding {
    /// A `const` scalar, whose value is known at compile time.
    Const(i32),
    /// A scalar variable, bound to the `Alloc`/`GlobalAlloc` that holds it.
    Var(Value),
    /// A local or global array, bound to the `Alloc`/`GlobalAlloc` that
    /// holds it. `const_data` is populated only for arrays declared with
    /// `const` (a plain `int a[3]` global/local never gets it, even though
    /// its initializer is also constant-folded into storage).
    Array { storage: Value, const_data: Option<ConstArrayData> },
    /// An array function parameter, already decayed to a pointer: `storage`
    /// is the `Alloc` holding the pointer value itself (the parameter is
    /// stored there at function entry, same as a scalar parameter).
    Pointer { storage: Value },
    Function(Func),
}

#[derive(Debug, Default)]
pub struct Scopes {
    frames: Vec<Map<Id, Binding>>,
}

impl Scopes {
    pub fn new() -> Self {
        Scopes { frames: Vec::new() }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Map::new());
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Bind `ident` in the innermost scope. Returns `false` (and leaves the
    /// existing binding untouched) if `ident` is already bound in *this*
    /// frame — shadowing an outer frame is fine, redeclaring within the same
    /// block is not.
    #[must_use]
    pub fn define(&mut self, ident: Id, binding: Binding) -> bool {
        let frame = self.frames.last_mut().expect("no active scope");
        if frame.contains_key(&ident) {
            return false;
        }
        frame.insert(ident, binding);
        true
    }

    pub fn lookup(&self, ident: Id) -> Option<Binding> {
        self.frames.iter().rev().find_map(|f| f.get(&ident).cloned())
    }
}
