//! Stack-frame layout: every instruction that produces a usable result gets
//! a spill slot, packed sequentially in IR order. Frame size is the sum of
//! those slots, plus 4 bytes for `ra` if the function makes any calls,
//! rounded up to a 16-byte boundary.

use crate::common::Map;
use crate::middle::ir::{Func, Program, Value, ValueKind};

fn round_up_16(n: i32) -> i32 {
    (n + 15) & !15
}

/// The stack slot size of a single instruction: the pointee's size for
/// `Alloc` (the instruction's own type is a pointer to the storage it
/// reserves), the value's own type size for everything else that produces a
/// result, and 0 for anything typed `Unit` (stores, branches, jumps,
/// returns, and void calls reserve no slot).
fn slot_size(program: &Program, v: Value) -> i32 {
    let data = program.value(v);
    match &data.kind {
        ValueKind::Alloc => data.ty.pointee().size() as i32,
        _ => data.ty.size() as i32,
    }
}

fn scan_has_call(program: &Program, func: &crate::middle::ir::FuncData) -> bool {
    func.bbs.iter().any(|b| {
        program
            .block(*b)
            .insts
            .iter()
            .any(|v| matches!(program.value(*v).kind, ValueKind::Call { .. }))
    })
}

/// The total frame size this function needs, independent of any `Stack`
/// built for it. Call sites need this for the *callee's* frame when they
/// place stack-passed arguments (args 8 and up land just below the callee's
/// own frame, not the caller's).
pub fn frame_size(program: &Program, func: Func) -> i32 {
    let data = program.func(func);
    let mut total = 0i32;
    for b in &data.bbs {
        for v in &program.block(*b).insts {
            total += slot_size(program, *v);
        }
    }
    if scan_has_call(program, data) {
        total += 4;
    }
    round_up_16(total)
}

/// Per-function slot assignment, built once per function before codegen
/// walks its blocks.
pub struct Stack {
    offsets: Map<Value, i32>,
    size: i32,
    has_call: bool,
}

impl Stack {
    pub fn build(program: &Program, func: Func) -> Stack {
        let data = program.func(func);
        let has_call = scan_has_call(program, data);
        let mut offsets = Map::new();
        let mut cur = 0i32;
        for b in &data.bbs {
            for v in &program.block(*b).insts {
                let sz = slot_size(program, *v);
                if sz > 0 {
                    offsets.insert(*v, cur);
                    cur += sz;
                }
            }
        }
        let size = round_up_16(cur + if has_call { 4 } else { 0 });
        Stack { offsets, size, has_call }
    }

    /// The spill slot offset (from `sp`) reserved for `v`'s result, if it
    /// has one.
    pub fn fetch(&self, v: Value) -> Option<i32> {
        self.offsets.get(&v).copied()
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn has_call(&self) -> bool {
        self.has_call
    }

    /// Where the saved `ra` lives, valid only when `has_call()`.
    pub fn ra_offset(&self) -> i32 {
        self.size - 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::types::Type;

    fn leaf_func(program: &mut Program, n_allocs: usize) -> Func {
        let f = program.new_func(crate::middle::ir::FuncData {
            name: crate::common::intern("f"),
            ty: Type::Function(vec![], Box::new(Type::Unit)),
            params: vec![],
            bbs: vec![],
            entry: None,
            is_decl: false,
        });
        let bb = program.new_block(None);
        for _ in 0..n_allocs {
            let v = program.new_value(Type::ptr(Type::Int32), ValueKind::Alloc);
            program.block_mut(bb).insts.push(v);
        }
        program.func_mut(f).bbs.push(bb);
        f
    }

    #[test]
    fn frame_size_rounds_up_to_16_bytes() {
        let mut program = Program::new();
        let f = leaf_func(&mut program, 3);
        assert_eq!(frame_size(&program, f), 16);
    }

    #[test]
    fn frame_size_is_exact_on_a_16_byte_boundary() {
        let mut program = Program::new();
        let f = leaf_func(&mut program, 4);
        assert_eq!(frame_size(&program, f), 16);
    }

    #[test]
    fn a_function_with_a_call_reserves_a_slot_for_ra() {
        let mut program = Program::new();
        let f = leaf_func(&mut program, 0);
        let bb = program.func(f).bbs[0];
        let callee = program.new_func(crate::middle::ir::FuncData {
            name: crate::common::intern("g"),
            ty: Type::Function(vec![], Box::new(Type::Unit)),
            params: vec![],
            bbs: vec![],
            entry: None,
            is_decl: true,
        });
        let call = program.new_value(Type::Unit, ValueKind::Call { func: callee, args: vec![] });
        program.block_mut(bb).insts.push(call);

        let stack = Stack::build(&program, f);
        assert!(stack.has_call());
        assert_eq!(stack.size(), 16);
        assert_eq!(stack.ra_offset(), 12);
    }
}
