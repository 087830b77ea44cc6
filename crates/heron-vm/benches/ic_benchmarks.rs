//! Inline cache and dispatch benchmarks
//!
//! Property reads with a cold executable (fresh caches every run) against a
//! warm one, a polymorphic read site, and a plain int32 loop.

use criterion::{Criterion, criterion_group, criterion_main};
use heron_bytecode::{Constant, Op, Program, ProgramBuilder, PutKind};
use heron_vm::{Executable, VmRuntime};
use std::hint::black_box;

const ITERATIONS: i32 = 1000;

/// `o = {x: 42}` for monomorphic, or `objects = [{x}, {a, x}, {b, x}, {c, x}]`
/// for polymorphic access, then `ITERATIONS` reads of `.x`
fn property_read_loop(shapes: usize) -> Program {
    let mut b = ProgramBuilder::new("bench.js");
    let (objects, object, index, counter, sum, slot) = (
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
    );
    let (zero, value, limit, modulus) = (
        b.constant(Constant::Int32(0)),
        b.constant(Constant::Int32(42)),
        b.constant(Constant::Int32(ITERATIONS)),
        b.constant(Constant::Int32(shapes as i32)),
    );
    let x = b.identifier("x");
    let fillers = ["a", "b", "c"].map(|name| b.identifier(name));
    let read = b.property_lookup_cache();

    b.emit(Op::NewArray {
        dst: objects,
        elements: vec![],
    });
    for n in 0..shapes {
        b.emit(Op::NewObject { dst: object });
        if n > 0 {
            let cache = b.property_lookup_cache();
            b.emit(Op::PutById {
                base: object,
                property: fillers[n - 1],
                src: zero,
                kind: PutKind::DirectKeyValue,
                cache,
                base_identifier: None,
            });
        }
        let cache = b.property_lookup_cache();
        b.emit(Op::PutById {
            base: object,
            property: x,
            src: value,
            kind: PutKind::DirectKeyValue,
            cache,
            base_identifier: None,
        });
        b.emit(Op::ArrayAppend {
            dst: objects,
            src: object,
            is_spread: false,
        });
    }

    let (top, done) = (b.new_label(), b.new_label());
    b.emit(Op::Mov { dst: counter, src: zero });
    b.emit(Op::Mov { dst: sum, src: zero });
    b.bind(top);
    b.emit(Op::Mod {
        dst: index,
        lhs: counter,
        rhs: modulus,
    });
    b.emit(Op::GetByValue {
        dst: object,
        base: objects,
        property: index,
        base_identifier: None,
    });
    b.emit(Op::GetById {
        dst: slot,
        base: object,
        property: x,
        base_identifier: None,
        cache: read,
    });
    b.emit(Op::Add {
        dst: sum,
        lhs: sum,
        rhs: slot,
    });
    b.emit(Op::Increment { dst: counter });
    b.emit(Op::JumpLessThan {
        lhs: counter,
        rhs: limit,
        true_target: top,
        false_target: done,
    });
    b.bind(done);
    b.emit(Op::End { value: sum });
    b.finish().expect("benchmark program assembles")
}

fn int32_addition_loop() -> Program {
    let mut b = ProgramBuilder::new("loop.js");
    let (i, sum) = (b.allocate_register(), b.allocate_register());
    let (zero, limit) = (b.constant(Constant::Int32(0)), b.constant(Constant::Int32(ITERATIONS)));
    let (top, done) = (b.new_label(), b.new_label());
    b.emit(Op::Mov { dst: i, src: zero });
    b.emit(Op::Mov { dst: sum, src: zero });
    b.bind(top);
    b.emit(Op::Add {
        dst: sum,
        lhs: sum,
        rhs: i,
    });
    b.emit(Op::Increment { dst: i });
    b.emit(Op::JumpLessThan {
        lhs: i,
        rhs: limit,
        true_target: top,
        false_target: done,
    });
    b.bind(done);
    b.emit(Op::End { value: sum });
    b.finish().expect("benchmark program assembles")
}

fn bench_monomorphic_property_access(c: &mut Criterion) {
    let program = property_read_loop(1);
    let mut vm = VmRuntime::new();

    c.bench_function("ic_monomorphic_cold", |b| {
        b.iter(|| {
            let executable = Executable::new(program.clone()).unwrap();
            black_box(vm.run_script(black_box(executable)).unwrap())
        })
    });

    let executable = Executable::new(program.clone()).unwrap();
    c.bench_function("ic_monomorphic_warm", |b| {
        b.iter(|| black_box(vm.run_script(black_box(executable.clone())).unwrap()))
    });
}

fn bench_polymorphic_property_access(c: &mut Criterion) {
    let mut vm = VmRuntime::new();
    let executable = Executable::new(property_read_loop(4)).unwrap();
    c.bench_function("ic_polymorphic_4_shapes", |b| {
        b.iter(|| black_box(vm.run_script(black_box(executable.clone())).unwrap()))
    });
}

fn bench_int32_addition_loop(c: &mut Criterion) {
    let mut vm = VmRuntime::new();
    let executable = Executable::new(int32_addition_loop()).unwrap();
    c.bench_function("int32_addition_1000", |b| {
        b.iter(|| black_box(vm.run_script(black_box(executable.clone())).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_monomorphic_property_access,
    bench_polymorphic_property_access,
    bench_int32_addition_loop
);
criterion_main!(benches);
