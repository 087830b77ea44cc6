//! The iteration protocol as the bytecode drives it: `for-of` loops,
//! spreads, early exits through `IteratorClose`, and `for-in` key lists

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use heron_bytecode::{
    CompletionType, Constant, FunctionKind, FunctionTemplate, IteratorHint, Op, Operand, Program,
    ProgramBuilder,
};
use heron_vm::{ObjectRef, PropertyKey, Value, VmRuntime};

fn get_global(b: &mut ProgramBuilder, dst: Operand, name: &str) {
    let identifier = b.identifier(name);
    let cache = b.global_variable_cache();
    b.emit(Op::GetGlobal {
        dst,
        identifier,
        cache,
    });
}

fn elements(vm: &mut VmRuntime, array: &Value) -> Vec<Value> {
    let array = array.as_object().expect("array result");
    let length = vm.get(array, "length").unwrap().as_int32().unwrap();
    (0..length as u32)
        .map(|i| vm.get(array, PropertyKey::index(i)).unwrap())
        .collect()
}

/// An iterable whose iterators yield `0, 10, 20, ...` below `10 * limit`;
/// `return` bumps `closed`
fn counting_iterable(vm: &mut VmRuntime, limit: i32, closed: Arc<AtomicUsize>) -> ObjectRef {
    let next = vm.create_native_function("next", 0, move |vm, call| {
        let iterator = call.this.as_object().expect("iterator receiver");
        let i = vm.get(iterator, "i")?.as_int32().unwrap_or(0);
        vm.set(iterator, "i", Value::Int32(i + 1))?;
        let result = vm.new_object();
        vm.set(result, "done", Value::Boolean(i >= limit))?;
        vm.set(result, "value", Value::Int32(i * 10))?;
        Ok(Value::Object(result))
    });
    let close = vm.create_native_function("return", 0, move |vm, _| {
        closed.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Object(vm.new_object()))
    });
    let open = vm.create_native_function("[Symbol.iterator]", 0, move |vm, _| {
        let iterator = vm.new_object();
        vm.set(iterator, "next", Value::Object(next))?;
        vm.set(iterator, "return", Value::Object(close))?;
        Ok(Value::Object(iterator))
    });
    let iterable = vm.new_object();
    let key = PropertyKey::Symbol(vm.realm.intrinsics.symbols.iterator);
    vm.set(iterable, key, Value::Object(open)).unwrap();
    iterable
}

/// `let sum = 0; for (const v of items) sum += v; return sum`
fn sum_loop() -> Program {
    let mut b = ProgramBuilder::new("sum.js");
    let (items, record, value, done, sum) = (
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
    );
    let zero = b.constant(Constant::Int32(0));
    let (top, exit) = (b.new_label(), b.new_label());
    get_global(&mut b, items, "items");
    b.emit(Op::GetIterator {
        dst: record,
        iterable: items,
        hint: IteratorHint::Sync,
    });
    b.emit(Op::Mov { dst: sum, src: zero });
    b.bind(top);
    b.emit(Op::IteratorNextUnpack {
        dst_value: value,
        dst_done: done,
        iterator_record: record,
    });
    b.emit(Op::JumpTrue {
        condition: done,
        target: exit,
    });
    b.emit(Op::Add {
        dst: sum,
        lhs: sum,
        rhs: value,
    });
    b.emit(Op::Jump { target: top });
    b.bind(exit);
    b.emit(Op::End { value: sum });
    b.finish().unwrap()
}

/// `return [...items]`
fn spread_items() -> Program {
    let mut b = ProgramBuilder::new("spread.js");
    let (items, array) = (b.allocate_register(), b.allocate_register());
    get_global(&mut b, items, "items");
    b.emit(Op::NewArray {
        dst: array,
        elements: vec![],
    });
    b.emit(Op::ArrayAppend {
        dst: array,
        src: items,
        is_spread: true,
    });
    b.emit(Op::End { value: array });
    b.finish().unwrap()
}

#[test]
fn test_for_of_over_an_array() {
    let mut vm = VmRuntime::new();
    let items = vm.new_array(vec![Value::Int32(1), Value::Int32(2), Value::Int32(39)]);
    vm.define_global("items", Value::Object(items));
    assert_eq!(vm.run_program(sum_loop()).unwrap(), Value::Int32(42));
}

#[test]
fn test_for_of_and_spread_follow_a_guest_iterator() {
    let mut vm = VmRuntime::new();
    let closed = Arc::new(AtomicUsize::new(0));
    let items = counting_iterable(&mut vm, 4, Arc::clone(&closed));
    vm.define_global("items", Value::Object(items));

    assert_eq!(vm.run_program(sum_loop()).unwrap(), Value::Int32(60));
    let spread = vm.run_program(spread_items()).unwrap();
    assert_eq!(
        elements(&mut vm, &spread),
        vec![Value::Int32(0), Value::Int32(10), Value::Int32(20), Value::Int32(30)]
    );
    // Exhausted iterators are not closed.
    assert_eq!(closed.load(Ordering::SeqCst), 0);
}

#[test]
fn test_spread_honors_a_replaced_array_iterator() {
    let mut vm = VmRuntime::new();
    let closed = Arc::new(AtomicUsize::new(0));
    let replacement = counting_iterable(&mut vm, 1, closed);
    let key = PropertyKey::Symbol(vm.realm.intrinsics.symbols.iterator);
    let open = vm.get(replacement, key.clone()).unwrap();
    let array_prototype = vm.realm.intrinsics.array_prototype;
    vm.set(array_prototype, key, open).unwrap();

    let items = vm.new_array(vec![Value::Int32(7), Value::Int32(8)]);
    vm.define_global("items", Value::Object(items));
    let spread = vm.run_program(spread_items()).unwrap();
    assert_eq!(elements(&mut vm, &spread), vec![Value::Int32(0)]);
}

/// `for (const v of items) { <exit> }` leaving after the first element
fn leave_after_first(completion_type: CompletionType) -> Program {
    let mut b = ProgramBuilder::new("break.js");
    let (items, record, value, done) = (
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
    );
    let boom = b.constant(Constant::string("boom"));
    get_global(&mut b, items, "items");
    b.emit(Op::GetIterator {
        dst: record,
        iterable: items,
        hint: IteratorHint::Sync,
    });
    b.emit(Op::IteratorNextUnpack {
        dst_value: value,
        dst_done: done,
        iterator_record: record,
    });
    b.emit(Op::IteratorClose {
        iterator_record: record,
        completion_type,
        completion_value: (completion_type == CompletionType::Throw).then_some(boom),
    });
    // A closed record reports done without calling `next` again.
    b.emit(Op::IteratorNextUnpack {
        dst_value: value,
        dst_done: done,
        iterator_record: record,
    });
    b.emit(Op::End { value: done });
    b.finish().unwrap()
}

#[test]
fn test_break_closes_the_iterator() {
    let mut vm = VmRuntime::new();
    let closed = Arc::new(AtomicUsize::new(0));
    let items = counting_iterable(&mut vm, 10, Arc::clone(&closed));
    vm.define_global("items", Value::Object(items));

    let done = vm.run_program(leave_after_first(CompletionType::Normal)).unwrap();
    assert_eq!(done, Value::Boolean(true));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(vm.get(items, "i").unwrap(), Value::Undefined);
}

#[test]
fn test_throw_completion_closes_then_rethrows() {
    let mut vm = VmRuntime::new();
    let closed = Arc::new(AtomicUsize::new(0));
    let items = counting_iterable(&mut vm, 10, Arc::clone(&closed));
    vm.define_global("items", Value::Object(items));

    let error = vm.run_program(leave_after_first(CompletionType::Throw)).unwrap_err();
    assert_eq!(error.to_string(), "Uncaught exception: boom");
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_return_method_must_produce_an_object() {
    let mut vm = VmRuntime::new();
    let closed = Arc::new(AtomicUsize::new(0));
    let items = counting_iterable(&mut vm, 10, closed);
    let bad_return = vm.create_native_function("return", 0, |_, _| Ok(Value::Int32(1)));
    let open = vm.create_native_function("[Symbol.iterator]", 0, move |vm, call| {
        let iterable = call.this.as_object().expect("iterable receiver");
        let inner = vm.get(iterable, "inner")?.as_object().expect("inner iterable");
        let key = PropertyKey::Symbol(vm.realm.intrinsics.symbols.iterator);
        let open = vm.get(inner, key)?;
        let iterator = vm.call(&open, Value::Object(inner), &[])?;
        vm.set(iterator.as_object().expect("iterator"), "return", Value::Object(bad_return))?;
        Ok(iterator)
    });
    let wrapper = vm.new_object();
    vm.set(wrapper, "inner", Value::Object(items)).unwrap();
    let key = PropertyKey::Symbol(vm.realm.intrinsics.symbols.iterator);
    vm.set(wrapper, key, Value::Object(open)).unwrap();
    vm.define_global("items", Value::Object(wrapper));

    let error = vm.run_program(leave_after_first(CompletionType::Normal)).unwrap_err();
    assert_eq!(
        error.to_string(),
        "Uncaught exception: TypeError: Iterator return() result is not an object"
    );
}

#[test]
fn test_iterator_to_array_drains_a_generator() {
    // function* g() { yield 1; yield 2 }  return [...g()]
    let mut body = ProgramBuilder::new("g");
    let (first, second) = (body.new_label(), body.new_label());
    let (c1, c2) = (body.constant(Constant::Int32(1)), body.constant(Constant::Int32(2)));
    body.emit(Op::Yield {
        continuation: Some(first),
        value: c1,
    });
    body.bind(first);
    body.emit(Op::Yield {
        continuation: Some(second),
        value: c2,
    });
    body.bind(second);
    body.emit(Op::Return { value: None });
    let template = FunctionTemplate::new("g", Arc::new(body.finish().unwrap()), 0).with_kind(FunctionKind::Generator);

    let mut b = ProgramBuilder::new("drain.js");
    let (g, generator, record, array) = (
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
    );
    let this = b.constant(Constant::Undefined);
    let function = b.function(template);
    b.emit(Op::NewFunction {
        dst: g,
        function,
        lhs_name: None,
        home_object: None,
    });
    b.emit(Op::Call {
        dst: generator,
        callee: g,
        this_value: this,
        expression_string: None,
        arguments: vec![],
    });
    b.emit(Op::GetIterator {
        dst: record,
        iterable: generator,
        hint: IteratorHint::Sync,
    });
    b.emit(Op::IteratorToArray {
        dst: array,
        iterator_record: record,
    });
    b.emit(Op::End { value: array });

    let mut vm = VmRuntime::new();
    let array = vm.run_program(b.finish().unwrap()).unwrap();
    assert_eq!(elements(&mut vm, &array), vec![Value::Int32(1), Value::Int32(2)]);
}

#[test]
fn test_iterating_a_non_iterable_throws() {
    let mut vm = VmRuntime::new();
    vm.define_global("items", Value::Int32(5));
    let error = vm.run_program(sum_loop()).unwrap_err();
    assert_eq!(error.to_string(), "Uncaught exception: TypeError: 5 is not iterable");
}

#[test]
fn test_for_in_lists_own_then_inherited_enumerable_keys() {
    let mut vm = VmRuntime::new();
    let prototype = vm.new_object();
    vm.set(prototype, "inherited", Value::Int32(1)).unwrap();
    let object = vm.create_object(Some(prototype), heron_vm::ObjectKind::Ordinary);
    vm.set(object, "a", Value::Int32(2)).unwrap();
    vm.set(object, "0", Value::Int32(3)).unwrap();
    let key = PropertyKey::Symbol(vm.realm.intrinsics.symbols.iterator);
    vm.set(object, key, Value::Int32(4)).unwrap();
    vm.define_global("o", Value::Object(object));

    let mut b = ProgramBuilder::new("for-in.js");
    let (o, record, keys) = (b.allocate_register(), b.allocate_register(), b.allocate_register());
    get_global(&mut b, o, "o");
    b.emit(Op::GetObjectPropertyIterator { dst: record, object: o });
    b.emit(Op::IteratorToArray {
        dst: keys,
        iterator_record: record,
    });
    b.emit(Op::End { value: keys });

    let keys = vm.run_program(b.finish().unwrap()).unwrap();
    assert_eq!(
        elements(&mut vm, &keys),
        vec![Value::from("0"), Value::from("a"), Value::from("inherited")]
    );
}

#[test]
fn test_get_method_reads_undefined_for_absent_methods() {
    let mut vm = VmRuntime::new();
    let object = vm.new_object();
    vm.set(object, "broken", Value::Int32(5)).unwrap();
    vm.define_global("o", Value::Object(object));

    let run = |vm: &mut VmRuntime, name: &str| {
        let mut b = ProgramBuilder::new("get-method.js");
        let (o, method) = (b.allocate_register(), b.allocate_register());
        get_global(&mut b, o, "o");
        let property = b.identifier(name);
        b.emit(Op::GetMethod {
            dst: method,
            object: o,
            property,
        });
        b.emit(Op::End { value: method });
        vm.run_program(b.finish().unwrap())
    };

    assert_eq!(run(&mut vm, "return").unwrap(), Value::Undefined);
    let has_own = run(&mut vm, "hasOwnProperty").unwrap();
    assert!(vm.is_callable(&has_own));
    let error = run(&mut vm, "broken").unwrap_err();
    assert_eq!(error.to_string(), "Uncaught exception: TypeError: 5 is not a function");
}
