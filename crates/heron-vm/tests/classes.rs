//! Class-body plumbing: private names and `super` property access

use std::sync::Arc;

use heron_bytecode::{
    Constant, FunctionTemplate, Op, Operand, Program, ProgramBuilder, PutKind, Register,
};
use heron_vm::shape::PropertyAttributes;
use heron_vm::{ObjectKind, PropertyKey, Value, VmRuntime};

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

fn this_register() -> Operand {
    Operand::register(Register::THIS_VALUE)
}

#[test]
fn test_private_field_define_read_and_brand_check() {
    // class { #x = 7; static m(o, other) { return [o.#x, #x in o, #x in other] } }
    let mut b = ProgramBuilder::new("fields.js");
    let (o, other, value, has, has_other, result) = (
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
    );
    let x = b.identifier("#x");
    let seven = b.constant(Constant::Int32(7));
    b.emit(Op::CreatePrivateEnvironment {});
    b.emit(Op::AddPrivateName { name: x });
    b.emit(Op::NewObject { dst: o });
    b.emit(Op::NewObject { dst: other });
    b.emit(Op::PutPrivateById {
        base: o,
        property: x,
        src: seven,
        kind: PutKind::DirectKeyValue,
    });
    b.emit(Op::GetPrivateById {
        dst: value,
        base: o,
        property: x,
    });
    b.emit(Op::HasPrivateId {
        dst: has,
        base: o,
        property: x,
    });
    b.emit(Op::HasPrivateId {
        dst: has_other,
        base: other,
        property: x,
    });
    b.emit(Op::LeavePrivateEnvironment {});
    b.emit(Op::NewArray {
        dst: result,
        elements: vec![value, has, has_other],
    });
    b.emit(Op::End { value: result });

    let mut vm = VmRuntime::new();
    let result = vm.run_program(b.finish().unwrap()).unwrap();
    assert_eq!(
        elements(&mut vm, &result),
        vec![Value::Int32(7), Value::Boolean(true), Value::Boolean(false)]
    );
}

/// A class body declaring `#x` that runs `access` against a fresh object
fn private_access(access: impl FnOnce(&mut ProgramBuilder, Operand)) -> Program {
    let mut b = ProgramBuilder::new("private.js");
    let o = b.allocate_register();
    let x = b.identifier("#x");
    b.emit(Op::CreatePrivateEnvironment {});
    b.emit(Op::AddPrivateName { name: x });
    b.emit(Op::NewObject { dst: o });
    access(&mut b, o);
    b.emit(Op::End { value: o });
    b.finish().unwrap()
}

#[test]
fn test_private_field_errors() {
    let mut vm = VmRuntime::new();
    let read_missing = private_access(|b, o| {
        let (x, r) = (b.identifier("#x"), b.allocate_register());
        b.emit(Op::GetPrivateById {
            dst: r,
            base: o,
            property: x,
        });
    });
    assert_eq!(
        vm.run_program(read_missing).unwrap_err().to_string(),
        "Uncaught exception: TypeError: Private field '#x' does not exist on this object"
    );

    let write_missing = private_access(|b, o| {
        let (x, one) = (b.identifier("#x"), b.constant(Constant::Int32(1)));
        b.emit(Op::PutPrivateById {
            base: o,
            property: x,
            src: one,
            kind: PutKind::KeyValue,
        });
    });
    assert_eq!(
        vm.run_program(write_missing).unwrap_err().to_string(),
        "Uncaught exception: TypeError: Private field '#x' does not exist on this object"
    );

    let define_twice = private_access(|b, o| {
        let (x, one) = (b.identifier("#x"), b.constant(Constant::Int32(1)));
        for _ in 0..2 {
            b.emit(Op::PutPrivateById {
                base: o,
                property: x,
                src: one,
                kind: PutKind::DirectKeyValue,
            });
        }
    });
    assert_eq!(
        vm.run_program(define_twice).unwrap_err().to_string(),
        "Uncaught exception: TypeError: Private field '#x' has already been declared"
    );

    let brand_check_on_primitive = private_access(|b, _| {
        let (x, r, five) = (b.identifier("#x"), b.allocate_register(), b.constant(Constant::Int32(5)));
        b.emit(Op::HasPrivateId {
            dst: r,
            base: five,
            property: x,
        });
    });
    assert!(vm
        .run_program(brand_check_on_primitive)
        .unwrap_err()
        .to_string()
        .starts_with("Uncaught exception: TypeError"));
}

#[test]
fn test_each_class_evaluation_mints_fresh_private_names() {
    // function make(v) {
    //   return class { #x = v; static read(o) { return o.#x } }  // as [instance, read]
    // }
    let mut read = ProgramBuilder::new("read");
    let r = read.allocate_register();
    let x = read.identifier("#x");
    read.emit(Op::GetPrivateById {
        dst: r,
        base: Operand::argument(0),
        property: x,
    });
    read.emit(Op::Return { value: Some(r) });
    let read = FunctionTemplate::new("read", Arc::new(read.finish().unwrap()), 1);

    let mut make = ProgramBuilder::new("make");
    let (o, reader, pair) = (make.allocate_register(), make.allocate_register(), make.allocate_register());
    let x = make.identifier("#x");
    let read = make.function(read);
    make.emit(Op::CreatePrivateEnvironment {});
    make.emit(Op::AddPrivateName { name: x });
    make.emit(Op::NewObject { dst: o });
    make.emit(Op::PutPrivateById {
        base: o,
        property: x,
        src: Operand::argument(0),
        kind: PutKind::DirectKeyValue,
    });
    make.emit(Op::NewFunction {
        dst: reader,
        function: read,
        lhs_name: None,
        home_object: None,
    });
    make.emit(Op::LeavePrivateEnvironment {});
    make.emit(Op::NewArray {
        dst: pair,
        elements: vec![o, reader],
    });
    make.emit(Op::Return { value: Some(pair) });
    let make = FunctionTemplate::new("make", Arc::new(make.finish().unwrap()), 1);

    let mut b = ProgramBuilder::new("classes.js");
    let (f, first, second, result) = (
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
    );
    let (this, one, two) = (
        b.constant(Constant::Undefined),
        b.constant(Constant::Int32(1)),
        b.constant(Constant::Int32(2)),
    );
    let make = b.function(make);
    b.emit(Op::NewFunction {
        dst: f,
        function: make,
        lhs_name: None,
        home_object: None,
    });
    for (dst, argument) in [(first, one), (second, two)] {
        b.emit(Op::Call {
            dst,
            callee: f,
            this_value: this,
            expression_string: None,
            arguments: vec![argument],
        });
    }
    b.emit(Op::NewArray {
        dst: result,
        elements: vec![first, second],
    });
    b.emit(Op::End { value: result });

    let mut vm = VmRuntime::new();
    let result = vm.run_program(b.finish().unwrap()).unwrap();
    let pairs = elements(&mut vm, &result);
    let (first, second) = (elements(&mut vm, &pairs[0]), elements(&mut vm, &pairs[1]));

    // The reader outlives the class body that declared its name.
    let own = vm.call(&first[1], Value::Undefined, &[first[0].clone()]).unwrap();
    assert_eq!(own, Value::Int32(1));
    let own = vm.call(&second[1], Value::Undefined, &[second[0].clone()]).unwrap();
    assert_eq!(own, Value::Int32(2));
    let foreign = vm.call(&first[1], Value::Undefined, &[second[0].clone()]).unwrap_err();
    assert!(foreign.to_string().contains("Private field '#x' does not exist"));
}

#[test]
fn test_private_accessor_pair_runs_against_the_receiver() {
    let mut vm = VmRuntime::new();
    let getter = vm.create_native_function("get #p", 0, |_, _| Ok(Value::Int32(42)));
    let setter = vm.create_native_function("set #p", 1, |vm, call| {
        let receiver = call.this.as_object().expect("object receiver");
        let value = call.arguments.first().cloned().unwrap_or_default();
        vm.set(receiver, "seen", value)?;
        Ok(Value::Undefined)
    });
    vm.define_global("getter", Value::Object(getter));
    vm.define_global("setter", Value::Object(setter));

    let mut b = ProgramBuilder::new("accessors.js");
    let (o, get, set, value, result) = (
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
    );
    let (p, five) = (b.identifier("#p"), b.constant(Constant::Int32(5)));
    b.emit(Op::CreatePrivateEnvironment {});
    b.emit(Op::AddPrivateName { name: p });
    b.emit(Op::NewObject { dst: o });
    get_global(&mut b, get, "getter");
    get_global(&mut b, set, "setter");
    for (src, kind) in [(get, PutKind::Getter), (set, PutKind::Setter), (five, PutKind::KeyValue)] {
        b.emit(Op::PutPrivateById {
            base: o,
            property: p,
            src,
            kind,
        });
    }
    b.emit(Op::GetPrivateById {
        dst: value,
        base: o,
        property: p,
    });
    b.emit(Op::LeavePrivateEnvironment {});
    b.emit(Op::NewArray {
        dst: result,
        elements: vec![value, o],
    });
    b.emit(Op::End { value: result });

    let result = vm.run_program(b.finish().unwrap()).unwrap();
    let result = elements(&mut vm, &result);
    assert_eq!(result[0], Value::Int32(42));
    let receiver = result[1].as_object().unwrap();
    assert_eq!(vm.get(receiver, "seen").unwrap(), Value::Int32(5));
    // Private elements never surface as properties.
    assert_eq!(vm.get(receiver, "#p").unwrap(), Value::Undefined);
}

/// `home = Object.create(parent)`, where `parent.describe` is a getter
/// returning `this.name`; `home` shadows `describe` with a plain value
fn super_fixture(vm: &mut VmRuntime) {
    let parent = vm.new_object();
    let describe = vm.create_native_function("get describe", 0, |vm, call| {
        vm.get_value_property(&call.this, &PropertyKey::from("name"))
    });
    vm.define_accessor_property(parent, "describe".into(), Some(describe), None, PropertyAttributes::DEFAULT);
    let home = vm.create_object(Some(parent), ObjectKind::Ordinary);
    vm.set(home, "describe", Value::from("shadowed")).unwrap();
    let receiver = vm.new_object();
    vm.set(receiver, "name", Value::from("receiver")).unwrap();
    vm.define_global("parent", Value::Object(parent));
    vm.define_global("home", Value::Object(home));
    vm.define_global("receiver", Value::Object(receiver));
}

/// Run `method` with `[[HomeObject]] = home` and `this = receiver`
fn call_method(vm: &mut VmRuntime, method: FunctionTemplate) -> Value {
    let mut b = ProgramBuilder::new("super.js");
    let (home, f, receiver, r) = (
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
        b.allocate_register(),
    );
    let function = b.function(method);
    get_global(&mut b, home, "home");
    get_global(&mut b, receiver, "receiver");
    b.emit(Op::NewFunction {
        dst: f,
        function,
        lhs_name: None,
        home_object: Some(home),
    });
    b.emit(Op::Call {
        dst: r,
        callee: f,
        this_value: receiver,
        expression_string: None,
        arguments: vec![],
    });
    b.emit(Op::End { value: r });
    vm.run_program(b.finish().unwrap()).unwrap()
}

/// Emit `dst = super.describe`
fn read_super_describe(body: &mut ProgramBuilder, dst: Operand) {
    let base = body.allocate_register();
    let property = body.identifier("describe");
    let cache = body.property_lookup_cache();
    body.emit(Op::ResolveThisBinding {});
    body.emit(Op::ResolveSuperBase { dst: base });
    body.emit(Op::GetByIdWithThis {
        dst,
        base,
        property,
        this_value: this_register(),
        cache,
    });
}

#[test]
fn test_super_property_reads_from_the_home_prototype_with_the_receiver_as_this() {
    let mut vm = VmRuntime::new();
    super_fixture(&mut vm);

    let mut body = ProgramBuilder::new("method");
    let r = body.allocate_register();
    read_super_describe(&mut body, r);
    body.emit(Op::Return { value: Some(r) });
    let method = FunctionTemplate::new("method", Arc::new(body.finish().unwrap()), 0);

    assert_eq!(call_method(&mut vm, method), Value::from("receiver"));
}

#[test]
fn test_arrow_inside_a_method_sees_the_same_super() {
    let mut vm = VmRuntime::new();
    super_fixture(&mut vm);

    // method() { return (() => super.describe)() }
    let mut arrow = ProgramBuilder::new("arrow");
    let r = arrow.allocate_register();
    read_super_describe(&mut arrow, r);
    arrow.emit(Op::Return { value: Some(r) });
    let arrow = FunctionTemplate::new("", Arc::new(arrow.finish().unwrap()), 0).arrow();

    let mut body = ProgramBuilder::new("method");
    let (f, r) = (body.allocate_register(), body.allocate_register());
    let this = body.constant(Constant::Undefined);
    let arrow = body.function(arrow);
    body.emit(Op::ResolveThisBinding {});
    body.emit(Op::NewFunction {
        dst: f,
        function: arrow,
        lhs_name: None,
        home_object: None,
    });
    body.emit(Op::Call {
        dst: r,
        callee: f,
        this_value: this,
        expression_string: None,
        arguments: vec![],
    });
    body.emit(Op::Return { value: Some(r) });
    let method = FunctionTemplate::new("method", Arc::new(body.finish().unwrap()), 0);

    assert_eq!(call_method(&mut vm, method), Value::from("receiver"));
}

#[test]
fn test_super_keyed_store_lands_on_the_receiver() {
    let mut vm = VmRuntime::new();
    super_fixture(&mut vm);

    // method() { super["x"] = 9 }
    let mut body = ProgramBuilder::new("method");
    let base = body.allocate_register();
    let (key, nine) = (body.constant(Constant::string("x")), body.constant(Constant::Int32(9)));
    body.emit(Op::ResolveThisBinding {});
    body.emit(Op::ResolveSuperBase { dst: base });
    body.emit(Op::PutByValueWithThis {
        base,
        property: key,
        src: nine,
        this_value: this_register(),
        kind: PutKind::KeyValue,
    });
    body.emit(Op::Return { value: None });
    let method = FunctionTemplate::new("method", Arc::new(body.finish().unwrap()), 0);

    assert_eq!(call_method(&mut vm, method), Value::Undefined);
    let receiver = vm.global("receiver").unwrap().as_object().unwrap();
    let parent = vm.global("parent").unwrap().as_object().unwrap();
    assert_eq!(vm.get(receiver, "x").unwrap(), Value::Int32(9));
    assert!(!vm.has_own_property(parent, &PropertyKey::from("x")));
}

#[test]
fn test_deleting_a_super_property_is_a_reference_error() {
    let mut b = ProgramBuilder::new("delete-super.js");
    let (r, base) = (b.allocate_register(), b.allocate_register());
    let property = b.identifier("x");
    let empty = b.constant(Constant::Undefined);
    b.emit(Op::NewObject { dst: base });
    b.emit(Op::DeleteByIdWithThis {
        dst: r,
        base,
        this_value: empty,
        property,
    });
    b.emit(Op::End { value: r });

    let mut vm = VmRuntime::new();
    let error = vm.run_program(b.finish().unwrap()).unwrap_err();
    assert_eq!(
        error.to_string(),
        "Uncaught exception: ReferenceError: Can't delete a property on 'super'"
    );
}

#[test]
fn test_super_outside_a_method_is_a_syntax_error() {
    let mut b = ProgramBuilder::new("top-level-super.js");
    let r = b.allocate_register();
    b.emit(Op::ResolveSuperBase { dst: r });
    b.emit(Op::End { value: r });

    let mut vm = VmRuntime::new();
    let error = vm.run_program(b.finish().unwrap()).unwrap_err();
    assert_eq!(
        error.to_string(),
        "Uncaught exception: SyntaxError: 'super' keyword unexpected here"
    );
}
