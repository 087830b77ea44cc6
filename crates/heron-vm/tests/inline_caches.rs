//! Inline cache behavior observed through the executable's cache tables
//!
//! Each test assembles a small program, runs it (often repeatedly against
//! the same executable) and checks hit/miss counters alongside the values
//! produced, so a stale cache entry shows up as a wrong result.

use heron_bytecode::{
    Builtin, Constant, EnvironmentMode, Op, Operand, Program, ProgramBuilder,
    PropertyLookupCacheIndex, PutKind, Register,
};
use heron_vm::shape::PropertyAttributes;
use heron_vm::{Executable, ObjectKind, Value, VmRuntime};
use std::sync::Arc;

fn acc() -> Operand {
    Operand::register(Register::ACCUMULATOR)
}

/// `o.<name>` where `o` is a global
fn read_global_property(name: &str) -> (Program, PropertyLookupCacheIndex) {
    let mut b = ProgramBuilder::new("read.js");
    let o = b.identifier("o");
    let property = b.identifier(name);
    let global_cache = b.global_variable_cache();
    let cache = b.property_lookup_cache();
    let r = b.allocate_register();
    b.emit(Op::GetGlobal {
        dst: r,
        identifier: o,
        cache: global_cache,
    });
    b.emit(Op::GetById {
        dst: r,
        base: r,
        property,
        base_identifier: Some(o),
        cache,
    });
    b.emit(Op::End { value: r });
    (b.finish().unwrap(), cache)
}

#[test]
fn test_monomorphic_read_hits_after_first_miss() {
    // o = {x: 5}; sum = 0; for (i = 0; i < 10; i++) sum += o.x
    let mut b = ProgramBuilder::new("loop.js");
    let (obj, value, i, sum) = (
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
    );
    let x = b.identifier("x");
    let put_cache = b.property_lookup_cache();
    let get_cache = b.property_lookup_cache();
    let zero = b.constant(Constant::Int32(0));
    let five = b.constant(Constant::Int32(5));
    let ten = b.constant(Constant::Int32(10));
    let (head, body, done) = (b.new_label(), b.new_label(), b.new_label());

    b.emit(Op::NewObject { dst: obj });
    b.emit(Op::PutById {
        base: obj,
        property: x,
        src: five,
        kind: PutKind::KeyValue,
        cache: put_cache,
        base_identifier: None,
    });
    b.emit(Op::Mov { dst: i, src: zero });
    b.emit(Op::Mov { dst: sum, src: zero });
    b.bind(head);
    b.emit(Op::JumpLessThan {
        lhs: i,
        rhs: ten,
        true_target: body,
        false_target: done,
    });
    b.bind(body);
    b.emit(Op::GetById {
        dst: value,
        base: obj,
        property: x,
        base_identifier: None,
        cache: get_cache,
    });
    b.emit(Op::Add {
        dst: sum,
        lhs: sum,
        rhs: value,
    });
    b.emit(Op::Increment { dst: i });
    b.emit(Op::Jump { target: head });
    b.bind(done);
    b.emit(Op::End { value: sum });

    let executable = Executable::new(b.finish().unwrap()).unwrap();
    let mut vm = VmRuntime::new();
    assert_eq!(vm.run_script(Arc::clone(&executable)).unwrap(), Value::Int32(50));

    let cache = executable.property_lookup_cache(get_cache);
    assert_eq!(cache.misses, 1);
    assert_eq!(cache.hits, 9);
    assert_eq!(cache.len(), 1);
    assert_eq!(executable.property_lookup_cache(put_cache).misses, 1);
}

#[test]
fn test_shape_change_misses_then_caches_new_shape() {
    let mut vm = VmRuntime::new();
    let object = vm.new_object();
    vm.set(object, "x", Value::Int32(1)).unwrap();
    vm.define_global("o", Value::Object(object));

    let (program, cache) = read_global_property("x");
    let executable = Executable::new(program).unwrap();
    for _ in 0..2 {
        assert_eq!(vm.run_script(Arc::clone(&executable)).unwrap(), Value::Int32(1));
    }
    let snapshot = executable.property_lookup_cache(cache);
    assert_eq!((snapshot.hits, snapshot.misses), (1, 1));

    vm.set(object, "y", Value::Int32(2)).unwrap();
    assert_eq!(vm.run_script(Arc::clone(&executable)).unwrap(), Value::Int32(1));
    let snapshot = executable.property_lookup_cache(cache);
    assert_eq!((snapshot.hits, snapshot.misses), (1, 2));
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.entries[0].shape, Some(vm.heap.object_shape(object)));

    assert_eq!(vm.run_script(Arc::clone(&executable)).unwrap(), Value::Int32(1));
    assert_eq!(executable.property_lookup_cache(cache).hits, 2);
}

#[test]
fn test_polymorphic_cache_evicts_oldest_and_promotes_hits() {
    let mut vm = VmRuntime::new();
    // Five objects whose `x` sits behind 0..5 other properties: five shapes.
    let objects: Vec<_> = (0..5)
        .map(|n| {
            let object = vm.new_object();
            for p in 0..n {
                vm.set(object, format!("p{p}").as_str(), Value::Int32(0)).unwrap();
            }
            vm.set(object, "x", Value::Int32(n)).unwrap();
            object
        })
        .collect();

    let (program, cache) = read_global_property("x");
    let executable = Executable::new(program).unwrap();
    let read = |vm: &mut VmRuntime, object| {
        vm.define_global("o", Value::Object(object));
        vm.run_script(Arc::clone(&executable)).unwrap()
    };

    for (n, object) in objects.iter().enumerate() {
        assert_eq!(read(&mut vm, *object), Value::Int32(n as i32));
    }
    let snapshot = executable.property_lookup_cache(cache);
    assert_eq!(snapshot.misses, 5);
    assert_eq!(snapshot.len(), 4);
    assert!(
        snapshot
            .entries
            .iter()
            .all(|entry| entry.shape != Some(vm.heap.object_shape(objects[0])))
    );

    // The evicted shape misses again; a cached one is moved to the front.
    assert_eq!(read(&mut vm, objects[0]), Value::Int32(0));
    assert_eq!(executable.property_lookup_cache(cache).misses, 6);
    assert_eq!(read(&mut vm, objects[3]), Value::Int32(3));
    let snapshot = executable.property_lookup_cache(cache);
    assert_eq!(snapshot.hits, 1);
    assert_eq!(snapshot.entries[0].shape, Some(vm.heap.object_shape(objects[3])));
    assert_eq!(snapshot.entries[1].shape, Some(vm.heap.object_shape(objects[0])));
}

#[test]
fn test_prototype_hit_is_revalidated_after_prototype_changes() {
    let mut vm = VmRuntime::new();
    let proto = vm.new_object();
    vm.set(proto, "x", Value::Int32(7)).unwrap();
    let object = vm.create_object(Some(proto), ObjectKind::Ordinary);
    vm.define_global("o", Value::Object(object));

    let (program, cache) = read_global_property("x");
    let executable = Executable::new(program).unwrap();
    let read = |vm: &mut VmRuntime| vm.run_script(Arc::clone(&executable)).unwrap();

    assert_eq!(read(&mut vm), Value::Int32(7));
    assert_eq!(read(&mut vm), Value::Int32(7));
    let snapshot = executable.property_lookup_cache(cache);
    assert_eq!((snapshot.hits, snapshot.misses), (1, 1));
    assert_eq!(snapshot.entries[0].prototype, Some(proto));
    assert!(snapshot.entries[0].prototype_chain_validity.is_some());

    // Overwriting the value keeps the prototype's shape: still a hit.
    vm.set(proto, "x", Value::Int32(8)).unwrap();
    assert_eq!(read(&mut vm), Value::Int32(8));
    assert_eq!(executable.property_lookup_cache(cache).hits, 2);

    // Adding a property to the prototype invalidates the chain token.
    vm.set(proto, "z", Value::Null).unwrap();
    assert_eq!(read(&mut vm), Value::Int32(8));
    let snapshot = executable.property_lookup_cache(cache);
    assert_eq!((snapshot.hits, snapshot.misses), (2, 2));

    // Shadowing on the receiver changes the receiver's shape.
    vm.set(object, "x", Value::Int32(9)).unwrap();
    assert_eq!(read(&mut vm), Value::Int32(9));
    assert_eq!(executable.property_lookup_cache(cache).misses, 3);
}

/// `o.<name> = 1` where `o` is a global
fn write_global_property(name: &str) -> (Program, PropertyLookupCacheIndex) {
    let mut b = ProgramBuilder::new("write.js");
    let o = b.identifier("o");
    let property = b.identifier(name);
    let global_cache = b.global_variable_cache();
    let cache = b.property_lookup_cache();
    let one = b.constant(Constant::Int32(1));
    let r = b.allocate_register();
    b.emit(Op::GetGlobal {
        dst: r,
        identifier: o,
        cache: global_cache,
    });
    b.emit(Op::PutById {
        base: r,
        property,
        src: one,
        kind: PutKind::KeyValue,
        cache,
        base_identifier: Some(o),
    });
    b.emit(Op::End { value: one });
    (b.finish().unwrap(), cache)
}

#[test]
fn test_getter_that_deletes_itself_does_not_leave_a_stale_entry() {
    // p = {get g() { delete p.g; return 1 }, y: 100}; o = Object.create(p)
    let mut vm = VmRuntime::new();
    let proto = vm.new_object();
    let getter = vm.create_native_function("g", 0, move |vm, _| {
        vm.internal_delete(proto, &"g".into());
        Ok(Value::Int32(1))
    });
    vm.define_accessor_property(proto, "g".into(), Some(getter), None, PropertyAttributes::DEFAULT);
    vm.set(proto, "y", Value::Int32(100)).unwrap();
    let object = vm.create_object(Some(proto), ObjectKind::Ordinary);
    vm.define_global("o", Value::Object(object));

    let (program, cache) = read_global_property("g");
    let executable = Executable::new(program).unwrap();
    assert_eq!(vm.run_script(Arc::clone(&executable)).unwrap(), Value::Int32(1));
    // `y` now sits where `g` used to; the entry recorded for `g` is dead.
    assert_eq!(vm.run_script(Arc::clone(&executable)).unwrap(), Value::Undefined);
    let snapshot = executable.property_lookup_cache(cache);
    assert_eq!((snapshot.hits, snapshot.misses), (0, 2));
}

#[test]
fn test_setter_that_deletes_itself_does_not_leave_a_stale_entry() {
    let mut vm = VmRuntime::new();
    let proto = vm.new_object();
    let setter = vm.create_native_function("s", 1, move |vm, _| {
        vm.internal_delete(proto, &"s".into());
        Ok(Value::Undefined)
    });
    vm.define_accessor_property(proto, "s".into(), None, Some(setter), PropertyAttributes::DEFAULT);
    vm.set(proto, "y", Value::Int32(100)).unwrap();
    let object = vm.create_object(Some(proto), ObjectKind::Ordinary);
    vm.define_global("o", Value::Object(object));

    let (program, cache) = write_global_property("s");
    let executable = Executable::new(program).unwrap();
    vm.run_script(Arc::clone(&executable)).unwrap();
    assert!(!vm.has_own_property(object, &"s".into()));

    // With the setter gone the second write lands on the receiver.
    vm.run_script(Arc::clone(&executable)).unwrap();
    assert_eq!(vm.get(object, "s").unwrap(), Value::Int32(1));
    assert_eq!(vm.get(proto, "y").unwrap(), Value::Int32(100));
    assert_eq!(executable.property_lookup_cache(cache).hits, 0);
}

#[test]
fn test_global_cache_follows_new_lexical_declarations() {
    let mut vm = VmRuntime::new();
    vm.define_global("g", Value::Int32(1));

    let mut read = ProgramBuilder::new("read-g.js");
    let g = read.identifier("g");
    let read_cache = read.global_variable_cache();
    read.emit(Op::GetGlobal {
        dst: acc(),
        identifier: g,
        cache: read_cache,
    });
    read.emit(Op::End { value: acc() });
    let reader = Executable::new(read.finish().unwrap()).unwrap();

    for _ in 0..2 {
        assert_eq!(vm.run_script(Arc::clone(&reader)).unwrap(), Value::Int32(1));
    }
    let snapshot = reader.global_variable_cache(read_cache);
    assert_eq!((snapshot.hits, snapshot.misses), (1, 1));

    // let g = 2 at top level shadows the global object property.
    let mut declare = ProgramBuilder::new("let-g.js");
    let g = declare.identifier("g");
    let two = declare.constant(Constant::Int32(2));
    let env_cache = declare.environment_coordinate_cache();
    declare.emit(Op::CreateVariable {
        identifier: g,
        mode: EnvironmentMode::Lexical,
        is_immutable: false,
        is_global: true,
        is_strict: false,
    });
    declare.emit(Op::InitializeLexicalBinding {
        identifier: g,
        src: two,
        cache: env_cache,
    });
    declare.emit(Op::End { value: two });
    vm.run_program(declare.finish().unwrap()).unwrap();

    assert_eq!(vm.run_script(Arc::clone(&reader)).unwrap(), Value::Int32(2));
    assert_eq!(reader.global_variable_cache(read_cache).misses, 2);
    assert_eq!(vm.run_script(Arc::clone(&reader)).unwrap(), Value::Int32(2));
    let snapshot = reader.global_variable_cache(read_cache);
    assert_eq!(snapshot.hits, 2);
    assert_eq!(snapshot.environment_binding_index, Some(0));
}

#[test]
fn test_missing_global_is_a_reference_error() {
    let mut b = ProgramBuilder::new("missing.js");
    let name = b.identifier("nowhere");
    let cache = b.global_variable_cache();
    b.emit(Op::GetGlobal {
        dst: acc(),
        identifier: name,
        cache,
    });
    b.emit(Op::End { value: acc() });

    let mut vm = VmRuntime::new();
    let error = vm.run_program(b.finish().unwrap()).unwrap_err();
    let value = vm.error_to_value(error);
    assert_eq!(
        vm.to_string_without_side_effects(&value),
        "ReferenceError: nowhere is not defined"
    );
}

#[test]
fn test_environment_coordinate_cache_in_block_scope() {
    // { let a = 4; for (i = 0; i < 3; i++) sum += a }
    let mut b = ProgramBuilder::new("block.js");
    let a = b.identifier("a");
    let init_cache = b.environment_coordinate_cache();
    let read_cache = b.environment_coordinate_cache();
    let four = b.constant(Constant::Int32(4));
    let zero = b.constant(Constant::Int32(0));
    let (sum, value) = (b.allocate_register(), b.allocate_register());

    b.emit(Op::CreateLexicalEnvironment { capacity: 1 });
    b.emit(Op::CreateVariable {
        identifier: a,
        mode: EnvironmentMode::Lexical,
        is_immutable: false,
        is_global: false,
        is_strict: false,
    });
    b.emit(Op::InitializeLexicalBinding {
        identifier: a,
        src: four,
        cache: init_cache,
    });
    let (head, body, done) = (b.new_label(), b.new_label(), b.new_label());
    let i = b.allocate_register();
    let three = b.constant(Constant::Int32(3));
    b.emit(Op::Mov { dst: sum, src: zero });
    b.emit(Op::Mov { dst: i, src: zero });
    b.bind(head);
    b.emit(Op::JumpLessThan {
        lhs: i,
        rhs: three,
        true_target: body,
        false_target: done,
    });
    b.bind(body);
    b.emit(Op::GetBinding {
        dst: value,
        identifier: a,
        cache: read_cache,
    });
    b.emit(Op::Add {
        dst: sum,
        lhs: sum,
        rhs: value,
    });
    b.emit(Op::Increment { dst: i });
    b.emit(Op::Jump { target: head });
    b.bind(done);
    b.emit(Op::LeaveLexicalEnvironment {});
    b.emit(Op::End { value: sum });

    let executable = Executable::new(b.finish().unwrap()).unwrap();
    let mut vm = VmRuntime::new();
    assert_eq!(vm.run_script(Arc::clone(&executable)).unwrap(), Value::Int32(12));

    let cache = executable.environment_coordinate_cache(read_cache);
    assert_eq!((cache.hits, cache.misses), (2, 1));
    let coordinate = cache.coordinate.unwrap();
    assert_eq!((coordinate.hops, coordinate.index), (0, 0));
}

#[test]
fn test_builtin_fast_path_only_for_the_intrinsic() {
    // Math.abs(-5)
    let mut b = ProgramBuilder::new("abs.js");
    let math_name = b.identifier("Math");
    let abs = b.identifier("abs");
    let global_cache = b.global_variable_cache();
    let cache = b.property_lookup_cache();
    let (math, callee, result) = (b.allocate_register(), b.allocate_register(), b.allocate_register());
    let minus_five = b.constant(Constant::Int32(-5));
    let expression = b.string("Math.abs");
    b.emit(Op::GetGlobal {
        dst: math,
        identifier: math_name,
        cache: global_cache,
    });
    b.emit(Op::GetById {
        dst: callee,
        base: math,
        property: abs,
        base_identifier: Some(math_name),
        cache,
    });
    b.emit(Op::CallBuiltin {
        dst: result,
        callee,
        this_value: math,
        builtin: Builtin::MathAbs,
        expression_string: Some(expression),
        arguments: vec![minus_five],
    });
    b.emit(Op::End { value: result });

    let executable = Executable::new(b.finish().unwrap()).unwrap();
    let mut vm = VmRuntime::new();
    assert_eq!(vm.run_script(Arc::clone(&executable)).unwrap(), Value::Int32(5));
    assert_eq!(executable.builtin_fast_path_hits(), 1);

    // A replaced Math.abs is called like any other function.
    let replacement = vm.create_native_function("abs", 1, |_, _| Ok(Value::Int32(99)));
    let math = vm.global("Math").unwrap().as_object().unwrap();
    vm.set(math, "abs", Value::Object(replacement)).unwrap();
    assert_eq!(vm.run_script(Arc::clone(&executable)).unwrap(), Value::Int32(99));
    assert_eq!(executable.builtin_fast_path_hits(), 1);
}
