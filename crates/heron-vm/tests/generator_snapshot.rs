//! Suspension and resumption of generator and async frames
//!
//! A suspended frame is parked inside its generator object; these tests
//! check that resuming continues exactly at the recorded offset and that
//! `return`/`throw` reach the handlers around the suspension point.

use std::sync::Arc;

use heron_bytecode::{Constant, FunctionKind, FunctionTemplate, Op, Operand, Program, ProgramBuilder, Register};
use heron_vm::{
    ExecutionContext, ExecutionResult, Executable, GeneratorResult, GeneratorState, Interpreter,
    ObjectRef, PropertyKey, ResumeMode, Value, VmRuntime,
};

fn acc() -> Operand {
    Operand::register(Register::ACCUMULATOR)
}

/// Emit `log += amount`
fn bump_log(b: &mut ProgramBuilder, amount: i32) {
    let scratch = b.allocate_register();
    let amount = b.constant(Constant::Int32(amount));
    let log = b.identifier("log");
    let (read, write) = (b.global_variable_cache(), b.global_variable_cache());
    b.emit(Op::GetGlobal {
        dst: scratch,
        identifier: log,
        cache: read,
    });
    b.emit(Op::Add {
        dst: scratch,
        lhs: scratch,
        rhs: amount,
    });
    b.emit(Op::SetGlobal {
        identifier: log,
        src: scratch,
        cache: write,
    });
}

/// Run a script that calls `body` as a function of `kind` and returns the result
fn call_function(vm: &mut VmRuntime, body: ProgramBuilder, kind: FunctionKind) -> Value {
    let template = FunctionTemplate::new("g", Arc::new(body.finish().unwrap()), 0).with_kind(kind);
    let mut b = ProgramBuilder::new("driver.js");
    let (f, r) = (b.allocate_register(), b.allocate_register());
    let this = b.constant(Constant::Undefined);
    let function = b.function(template);
    b.emit(Op::NewFunction {
        dst: f,
        function,
        lhs_name: None,
        home_object: None,
    });
    b.emit(Op::Call {
        dst: r,
        callee: f,
        this_value: this,
        expression_string: None,
        arguments: vec![],
    });
    b.emit(Op::End { value: r });
    vm.run_program(b.finish().unwrap()).unwrap()
}

fn start_generator(vm: &mut VmRuntime, body: ProgramBuilder) -> ObjectRef {
    vm.define_global("log", Value::Int32(0));
    call_function(vm, body, FunctionKind::Generator).as_object().unwrap()
}

fn resume(vm: &mut VmRuntime, generator: ObjectRef, mode: ResumeMode, value: Value) -> (Value, bool) {
    let result = vm.generator_resume(generator, mode, value).unwrap();
    let result = result.as_object().unwrap();
    let value = vm.get(result, "value").unwrap();
    let done = vm.get(result, "done").unwrap();
    (value, done.to_boolean())
}

fn log(vm: &mut VmRuntime) -> Value {
    vm.global("log").unwrap()
}

#[test]
fn test_each_segment_runs_exactly_once() {
    // function* g() { log += 1; const x = yield 10; log += 10; return x + 1 }
    let mut body = ProgramBuilder::new("g");
    let x = body.allocate_register();
    let (c1, c10) = (body.constant(Constant::Int32(1)), body.constant(Constant::Int32(10)));
    let resumed = body.new_label();
    bump_log(&mut body, 1);
    body.emit(Op::Yield {
        continuation: Some(resumed),
        value: c10,
    });
    body.bind(resumed);
    body.emit(Op::Mov { dst: x, src: acc() });
    bump_log(&mut body, 10);
    body.emit(Op::Add {
        dst: x,
        lhs: x,
        rhs: c1,
    });
    body.emit(Op::Return { value: Some(x) });

    let mut vm = VmRuntime::new();
    let generator = start_generator(&mut vm, body);
    assert_eq!(vm.generator_state(generator), Some(GeneratorState::SuspendedStart));
    assert_eq!(log(&mut vm), Value::Int32(0));

    let first = resume(&mut vm, generator, ResumeMode::Next, Value::Undefined);
    assert_eq!(first, (Value::Int32(10), false));
    assert_eq!(log(&mut vm), Value::Int32(1));
    assert_eq!(vm.generator_state(generator), Some(GeneratorState::SuspendedYield));

    let second = resume(&mut vm, generator, ResumeMode::Next, Value::Int32(41));
    assert_eq!(second, (Value::Int32(42), true));
    assert_eq!(log(&mut vm), Value::Int32(11));
    assert_eq!(vm.generator_state(generator), Some(GeneratorState::Completed));

    let after = resume(&mut vm, generator, ResumeMode::Next, Value::Undefined);
    assert_eq!(after, (Value::Undefined, true));
    assert_eq!(log(&mut vm), Value::Int32(11));
}

#[test]
fn test_continuation_is_the_offset_after_the_yield() {
    let mut b = ProgramBuilder::new("frame.js");
    let (c3, resumed) = (b.constant(Constant::Int32(3)), b.new_label());
    b.emit(Op::Mov { dst: acc(), src: c3 });
    b.emit(Op::Yield {
        continuation: Some(resumed),
        value: c3,
    });
    b.bind(resumed);
    b.emit(Op::End { value: acc() });
    let program: Program = b.finish().unwrap();

    let expected = program
        .instructions()
        .map(Result::unwrap)
        .find(|(_, insn)| matches!(insn.op, Op::Yield { .. }))
        .map(|(offset, insn)| offset + insn.length())
        .unwrap();

    let mut vm = VmRuntime::new();
    let executable = Executable::new(program).unwrap();
    let mut context = ExecutionContext::new(Arc::clone(&executable), 0);
    let continuation = match Interpreter::new(&mut vm, &mut context).run(0, None) {
        ExecutionResult::Suspended(GeneratorResult {
            value,
            continuation: Some(continuation),
            is_await: false,
        }) => {
            assert_eq!(value, Value::Int32(3));
            continuation
        }
        other => panic!("expected a yield, got {other:?}"),
    };
    assert_eq!(continuation, expected);

    match Interpreter::new(&mut vm, &mut context).resume(continuation, ResumeMode::Next, Value::Int32(8)) {
        ExecutionResult::Value(value) => assert_eq!(value, Value::Int32(8)),
        other => panic!("expected completion, got {other:?}"),
    }
}

fn yield_once() -> ProgramBuilder {
    // function* g() { log += 1; yield 1 }
    let mut body = ProgramBuilder::new("g");
    let c1 = body.constant(Constant::Int32(1));
    bump_log(&mut body, 1);
    body.emit(Op::Yield {
        continuation: None,
        value: c1,
    });
    body
}

#[test]
fn test_return_before_start_completes_without_running() {
    let mut vm = VmRuntime::new();
    let generator = start_generator(&mut vm, yield_once());
    let result = resume(&mut vm, generator, ResumeMode::Return, Value::Int32(5));
    assert_eq!(result, (Value::Int32(5), true));
    assert_eq!(vm.generator_state(generator), Some(GeneratorState::Completed));
    assert_eq!(log(&mut vm), Value::Int32(0));
}

#[test]
fn test_throw_before_start_rethrows_and_completes() {
    let mut vm = VmRuntime::new();
    let generator = start_generator(&mut vm, yield_once());
    let error = vm
        .generator_resume(generator, ResumeMode::Throw, Value::from("stop"))
        .unwrap_err();
    assert_eq!(vm.error_to_value(error), Value::from("stop"));
    assert_eq!(vm.generator_state(generator), Some(GeneratorState::Completed));
    assert_eq!(log(&mut vm), Value::Int32(0));
}

#[test]
fn test_yield_without_continuation_finishes_the_generator() {
    let mut vm = VmRuntime::new();
    let generator = start_generator(&mut vm, yield_once());
    let result = resume(&mut vm, generator, ResumeMode::Next, Value::Undefined);
    assert_eq!(result, (Value::Int32(1), true));
    assert_eq!(vm.generator_state(generator), Some(GeneratorState::Completed));
}

#[test]
fn test_return_while_suspended_runs_the_finally_block() {
    // function* g() { try { yield 1 } finally { log += 1 } }
    let mut body = ProgramBuilder::new("g");
    let c1 = body.constant(Constant::Int32(1));
    let (try_body, resumed, finally, end) = (
        body.new_label(),
        body.new_label(),
        body.new_label(),
        body.new_label(),
    );
    body.emit(Op::EnterUnwindContext { entry: try_body });
    body.bind(try_body);
    body.emit(Op::Yield {
        continuation: Some(resumed),
        value: c1,
    });
    body.bind(resumed);
    body.emit(Op::Jump { target: finally });
    body.bind(finally);
    body.emit(Op::LeaveUnwindContext {});
    bump_log(&mut body, 1);
    body.emit(Op::ContinuePendingUnwind { resume_target: end });
    body.bind(end);
    body.emit(Op::Return { value: None });
    body.exception_handler(try_body, finally, None, Some(finally));

    let mut vm = VmRuntime::new();
    let generator = start_generator(&mut vm, body);
    assert_eq!(
        resume(&mut vm, generator, ResumeMode::Next, Value::Undefined),
        (Value::Int32(1), false)
    );
    assert_eq!(
        resume(&mut vm, generator, ResumeMode::Return, Value::Int32(7)),
        (Value::Int32(7), true)
    );
    assert_eq!(log(&mut vm), Value::Int32(1));
    assert_eq!(vm.generator_state(generator), Some(GeneratorState::Completed));
}

#[test]
fn test_throw_while_suspended_reaches_the_catch_block() {
    // function* g() { try { yield 1 } catch (e) { return e + 1 } }
    let mut body = ProgramBuilder::new("g");
    let e = body.allocate_register();
    let c1 = body.constant(Constant::Int32(1));
    let (try_body, resumed, catch) = (body.new_label(), body.new_label(), body.new_label());
    body.emit(Op::EnterUnwindContext { entry: try_body });
    body.bind(try_body);
    body.emit(Op::Yield {
        continuation: Some(resumed),
        value: c1,
    });
    body.bind(resumed);
    body.emit(Op::LeaveUnwindContext {});
    body.emit(Op::Return { value: None });
    body.bind(catch);
    body.emit(Op::Catch { dst: e });
    body.emit(Op::LeaveUnwindContext {});
    body.emit(Op::Add {
        dst: e,
        lhs: e,
        rhs: c1,
    });
    body.emit(Op::Return { value: Some(e) });
    body.exception_handler(try_body, catch, Some(catch), None);

    let mut vm = VmRuntime::new();
    let generator = start_generator(&mut vm, body);
    resume(&mut vm, generator, ResumeMode::Next, Value::Undefined);
    assert_eq!(
        resume(&mut vm, generator, ResumeMode::Throw, Value::Int32(41)),
        (Value::Int32(42), true)
    );
}

fn count_to_three() -> ProgramBuilder {
    // function* g() { yield 1; yield 2; yield 3 }
    let mut body = ProgramBuilder::new("g");
    for n in 1..=3 {
        let value = body.constant(Constant::Int32(n));
        let resumed = body.new_label();
        body.emit(Op::Yield {
            continuation: Some(resumed),
            value,
        });
        body.bind(resumed);
    }
    body.emit(Op::Return { value: None });
    body
}

#[test]
fn test_spread_drains_a_generator() {
    let mut vm = VmRuntime::new();
    let generator = start_generator(&mut vm, count_to_three());
    vm.define_global("gen", Value::Object(generator));

    // [...gen]
    let mut b = ProgramBuilder::new("spread.js");
    let (source, array) = (b.allocate_register(), b.allocate_register());
    let (identifier, cache) = (b.identifier("gen"), b.global_variable_cache());
    b.emit(Op::GetGlobal {
        dst: source,
        identifier,
        cache,
    });
    b.emit(Op::NewArray {
        dst: array,
        elements: vec![],
    });
    b.emit(Op::ArrayAppend {
        dst: array,
        src: source,
        is_spread: true,
    });
    b.emit(Op::End { value: array });

    let array = vm.run_program(b.finish().unwrap()).unwrap().as_object().unwrap();
    let elements: Vec<Value> = (0..4)
        .map(|i| vm.get(array, PropertyKey::Index(i)).unwrap())
        .collect();
    assert_eq!(
        elements,
        [Value::Int32(1), Value::Int32(2), Value::Int32(3), Value::Undefined]
    );
    assert_eq!(vm.generator_state(generator), Some(GeneratorState::Completed));
}

#[test]
fn test_prototype_next_drives_the_generator() {
    let mut vm = VmRuntime::new();
    let generator = start_generator(&mut vm, count_to_three());
    let next = vm.get(generator, "next").unwrap();
    let mut seen = Vec::new();
    loop {
        let result = vm.call(&next, Value::Object(generator), &[]).unwrap();
        let result = result.as_object().unwrap();
        if vm.get(result, "done").unwrap().to_boolean() {
            break;
        }
        seen.push(vm.get(result, "value").unwrap());
    }
    assert_eq!(seen, [Value::Int32(1), Value::Int32(2), Value::Int32(3)]);
}

#[test]
fn test_async_function_awaits_settle_in_order() {
    // async function g() { const a = await 20; const b = await 22; return a + b }
    let mut body = ProgramBuilder::new("g");
    let a = body.allocate_register();
    let (c20, c22) = (body.constant(Constant::Int32(20)), body.constant(Constant::Int32(22)));
    let (first, second) = (body.new_label(), body.new_label());
    body.emit(Op::Await {
        continuation: first,
        argument: c20,
    });
    body.bind(first);
    body.emit(Op::Mov { dst: a, src: acc() });
    body.emit(Op::Await {
        continuation: second,
        argument: c22,
    });
    body.bind(second);
    body.emit(Op::Add {
        dst: a,
        lhs: a,
        rhs: acc(),
    });
    body.emit(Op::Return { value: Some(a) });

    let mut vm = VmRuntime::new();
    assert_eq!(call_function(&mut vm, body, FunctionKind::Async), Value::Int32(42));
}
