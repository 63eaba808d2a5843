//! Appends instructions to whatever basic block is currently open, enforcing
//! the one-terminator-per-block invariant by dropping anything lowered after
//! a block's first terminator — this is how unreachable code after a
//! `return`/`break`/`continue` in the source simply disappears from the IR.

use crate::middle::ir::{BasicBlock, Program, Value};

#[derive(Debug, Default)]
pub struct Builder {
    current: Option<BasicBlock>,
    terminated: bool,
}

impl Builder {
    pub fn new() -> Self {
        Builder::default()
    }

    /// Start appending to `block`. The block must not already have had
    /// instructions committed to it by this builder under a previous
    /// `open_block` call.
    pub fn open_block(&mut self, block: BasicBlock) {
        self.current = Some(block);
        self.terminated = false;
    }

    pub fn current_block(&self) -> Option<BasicBlock> {
        self.current
    }

    /// Has the open block already received a terminator? Once true, further
    /// `add` calls are no-ops: this is the guard that drops dead code.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Append `inst` to the currently open block, unless the block is
    /// already terminated.
    pub fn add(&mut self, program: &mut Program, inst: Value) {
        if self.terminated {
            return;
        }
        let is_term = program.value(inst).kind.is_terminator();
        let block = self.current.expect("add() called with no open block");
        program.block_mut(block).insts.push(inst);
        if is_term {
            self.terminated = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::ir::ValueKind;
    use crate::middle::types::Type;

    #[test]
    fn drops_instructions_after_a_terminator() {
        let mut program = Program::new();
        let block = program.new_block(None);
        let mut b = Builder::new();
        b.open_block(block);

        let ret = program.new_value(Type::Unit, ValueKind::Return(None));
        b.add(&mut program, ret);
        assert!(b.is_terminated());

        let dead = program.new_value(Type::Int32, ValueKind::Integer(1));
        b.add(&mut program, dead);

        assert_eq!(program.block(block).insts, vec![ret]);
    }

    #[test]
    fn reopening_a_block_resets_the_terminated_flag() {
        let mut program = Program::new();
        let a = program.new_block(None);
        let b_block = program.new_block(None);
        let mut b = Builder::new();

        b.open_block(a);
        let jump = program.new_value(Type::Unit, ValueKind::Jump(b_block));
        b.add(&mut program, jump);

        b.open_block(b_block);
        assert!(!b.is_terminated());
        let ret = program.new_value(Type::Unit, ValueKind::Return(None));
        b.add(&mut program, ret);
        assert_eq!(program.block(b_block).insts, vec![ret]);
    }
}
