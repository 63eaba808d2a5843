//! Property-style checks that aren't tied to one specific program (spec.md
//! §8): constant folding, block well-formedness, array sizing, and the
//! calling convention's argument placement.

use sysyc::back;
use sysyc::front;
use sysyc::middle::ir::ValueKind;
use sysyc::middle::ir_text;

fn lower(src: &str) -> sysyc::middle::ir::Program {
    front::lower(&front::parse(src).unwrap()).unwrap()
}

#[test]
fn constant_folding_matches_ordinary_arithmetic() {
    let cases: &[(&str, i32)] = &[
        ("1 + 2 * 3", 7),
        ("(1 + 2) * 3", 9),
        ("10 - 4 - 3", 3),
        ("2 * 3 == 6 && 1", 1),
        ("1 || 0 && 0", 1),
        ("!0", 1),
        ("-(-5)", 5),
    ];
    for (expr, expected) in cases {
        let src = format!("const int x = {expr}; int main() {{ return x; }}");
        let program = lower(&src);
        let main = *program.func_names.get(&sysyc::common::intern("main")).unwrap();
        let entry = program.func(main).entry.unwrap();
        let ret = *program.block(entry).insts.last().unwrap();
        let &ValueKind::Return(Some(v)) = &program.value(ret).kind else {
            panic!("expected a return value")
        };
        let &ValueKind::Integer(n) = &program.value(v).kind else {
            panic!("'{expr}' did not fold to a constant, got {:?}", program.value(v).kind)
        };
        assert_eq!(n, *expected, "'{expr}' folded to {n}, expected {expected}");
    }
}

#[test]
fn every_basic_block_ends_in_exactly_one_terminator() {
    let program = lower(
        "int fib(int n) { if (n <= 1) return n; return fib(n - 1) + fib(n - 2); } \
         int main() { int i = 0; while (i < 10) { i = i + 1; } return fib(i); }",
    );
    for (_, data) in program.funcs() {
        for &bb in &data.bbs {
            let insts = &program.block(bb).insts;
            assert!(!insts.is_empty(), "block must not be empty");
            for (i, &v) in insts.iter().enumerate() {
                let is_term = program.value(v).kind.is_terminator();
                assert_eq!(is_term, i == insts.len() - 1, "terminator must be exactly the last instruction");
            }
        }
    }
}

#[test]
fn array_aggregate_size_is_the_product_of_its_dimensions() {
    let program = lower("int a[2][3][4] = {}; int main() { return a[0][0][0]; }");
    let global = program.globals[0];
    let &ValueKind::GlobalAlloc(init) = &program.value(global).kind else {
        panic!("expected a global alloc")
    };
    fn count(program: &sysyc::middle::ir::Program, v: sysyc::middle::ir::Value) -> usize {
        match &program.value(v).kind {
            ValueKind::Aggregate(items) => items.iter().map(|&it| count(program, it)).sum(),
            ValueKind::ZeroInit => program.value(v).ty.size() / 4,
            ValueKind::Integer(_) => 1,
            other => panic!("unexpected constant leaf {other:?}"),
        }
    }
    assert_eq!(count(&program, init), 2 * 3 * 4);
}

#[test]
fn calls_with_more_than_eight_arguments_spill_to_the_stack() {
    let src = "
        int sum9(int a, int b, int c, int d, int e, int f, int g, int h, int i) {
            return a + b + c + d + e + f + g + h + i;
        }
        int main() {
            return sum9(1, 2, 3, 4, 5, 6, 7, 8, 9);
        }
    ";
    let ast = front::parse(src).unwrap();
    let program = front::lower(&ast).unwrap();
    let text = ir_text::emit(&program);
    let program = ir_text::parse(&text).unwrap();
    let asm = back::codegen(&program).unwrap().asm_code();

    let main_body = asm.split("main:").nth(1).expect("main must be emitted");
    for reg in ["a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7"] {
        assert!(main_body.contains(&format!("li {reg}, ")), "argument {reg} should be loaded directly");
    }
    assert!(main_body.contains("sw "), "the 9th argument should spill to the stack");
}

#[test]
fn unknown_mode_is_rejected() {
    assert!(sysyc::pipeline::Mode::parse("-bogus").is_err());
    assert!(sysyc::pipeline::Mode::parse("-koopa").is_ok());
    assert!(sysyc::pipeline::Mode::parse("-riscv").is_ok());
}
