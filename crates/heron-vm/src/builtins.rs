//! Native functions installed in every realm
//!
//! Only what the interpreter itself relies on lives here: the `Math`
//! functions `CallBuiltin` recognizes, `eval`, the error constructors,
//! `Object`/`Array`, `Symbol`, the generator and iterator methods and a
//! handful of prototype methods.

use crate::error::{VmError, VmResult};
use crate::generator::ResumeMode;
use crate::heap::{Heap, ObjectRef, SymbolRef};
use crate::object::{NativeCall, NativeFn, NativeFunction, ObjectKind};
use crate::ops::js_pow;
use crate::realm::{ErrorType, Intrinsics, Realm};
use crate::runtime::VmRuntime;
use crate::shape::PropertyAttributes;
use crate::string::{JsString, PropertyKey};
use crate::value::Value;
use heron_bytecode::Builtin;
use smallvec::SmallVec;
use std::sync::Arc;

// ============================================================================
// Function objects
// ============================================================================

fn alloc_native(heap: &mut Heap, function_prototype: ObjectRef, native: NativeFunction, length: u32) -> ObjectRef {
    let name = native.name.clone();
    let function = heap.alloc_object(Some(function_prototype), ObjectKind::NativeFunction(native));
    heap.define_data_property_raw(
        function,
        "length".into(),
        Value::number(f64::from(length)),
        PropertyAttributes::CONFIGURABLE,
    );
    heap.define_data_property_raw(function, "name".into(), Value::String(name), PropertyAttributes::CONFIGURABLE);
    function
}

/// Allocate a host function with `length` and `name` defined
pub(crate) fn native_function(
    heap: &mut Heap,
    function_prototype: ObjectRef,
    name: &str,
    length: u32,
    function: NativeFn,
    is_constructor: bool,
) -> ObjectRef {
    alloc_native(
        heap,
        function_prototype,
        NativeFunction {
            name: JsString::new(name),
            function,
            builtin: None,
            is_constructor,
        },
        length,
    )
}

fn define_method(
    heap: &mut Heap,
    function_prototype: ObjectRef,
    target: ObjectRef,
    name: &str,
    length: u32,
    function: NativeFn,
) {
    let method = native_function(heap, function_prototype, name, length, function, false);
    heap.define_data_property_raw(target, name.into(), Value::Object(method), PropertyAttributes::HIDDEN);
}

fn define_symbol_method(
    heap: &mut Heap,
    function_prototype: ObjectRef,
    target: ObjectRef,
    symbol: SymbolRef,
    name: &str,
    function: NativeFn,
) {
    let method = native_function(heap, function_prototype, name, 0, function, false);
    heap.define_data_property_raw(target, PropertyKey::Symbol(symbol), Value::Object(method), PropertyAttributes::HIDDEN);
}

// ============================================================================
// Math
// ============================================================================

/// The `Math` function implementing `builtin`
pub(crate) fn math_function(heap: &mut Heap, function_prototype: ObjectRef, builtin: Builtin) -> ObjectRef {
    let function: NativeFn = Arc::new(move |vm: &mut VmRuntime, call: &NativeCall| {
        let arguments: SmallVec<[Value; 2]> = (0..builtin.arity()).map(|i| call.arg(i)).collect();
        call_math_builtin(vm, builtin, &arguments)
    });
    alloc_native(
        heap,
        function_prototype,
        NativeFunction {
            name: JsString::new(builtin.property_name()),
            function,
            builtin: Some(builtin),
            is_constructor: false,
        },
        builtin.arity() as u32,
    )
}

fn number_arg(vm: &mut VmRuntime, arguments: &[Value], index: usize) -> VmResult<f64> {
    match arguments.get(index) {
        Some(value) => vm.to_number(value),
        None => Ok(f64::NAN),
    }
}

/// `Math.round`: halves round towards +Infinity
fn js_round(x: f64) -> f64 {
    if !x.is_finite() || x == 0.0 {
        return x;
    }
    if (-0.5..0.0).contains(&x) {
        return -0.0;
    }
    let floor = x.floor();
    if x - floor >= 0.5 { floor + 1.0 } else { floor }
}

/// Evaluate a recognized `Math` builtin
pub(crate) fn call_math_builtin(vm: &mut VmRuntime, builtin: Builtin, arguments: &[Value]) -> VmResult<Value> {
    let result = match builtin {
        Builtin::MathAbs => number_arg(vm, arguments, 0)?.abs(),
        Builtin::MathLog => number_arg(vm, arguments, 0)?.ln(),
        Builtin::MathPow => {
            let base = number_arg(vm, arguments, 0)?;
            let exponent = number_arg(vm, arguments, 1)?;
            js_pow(base, exponent)
        }
        Builtin::MathExp => number_arg(vm, arguments, 0)?.exp(),
        Builtin::MathCeil => number_arg(vm, arguments, 0)?.ceil(),
        Builtin::MathFloor => number_arg(vm, arguments, 0)?.floor(),
        Builtin::MathImul => {
            let a = vm.to_int32(arguments.first().unwrap_or(&Value::Undefined))?;
            let b = vm.to_int32(arguments.get(1).unwrap_or(&Value::Undefined))?;
            return Ok(Value::Int32(a.wrapping_mul(b)));
        }
        Builtin::MathRandom => vm.next_random(),
        Builtin::MathRound => js_round(number_arg(vm, arguments, 0)?),
        Builtin::MathSqrt => number_arg(vm, arguments, 0)?.sqrt(),
        Builtin::MathSin => number_arg(vm, arguments, 0)?.sin(),
        Builtin::MathCos => number_arg(vm, arguments, 0)?.cos(),
        Builtin::MathTan => number_arg(vm, arguments, 0)?.tan(),
    };
    Ok(Value::number(result))
}

// ============================================================================
// Global functions and constructors
// ============================================================================

/// Indirect `eval`; direct calls never reach this function
pub(crate) fn eval() -> NativeFn {
    Arc::new(|vm: &mut VmRuntime, call: &NativeCall| vm.perform_eval(call.arg(0), None))
}

/// `%ThrowTypeError%`
pub(crate) fn throw_type_error() -> NativeFn {
    Arc::new(|_: &mut VmRuntime, _: &NativeCall| {
        Err(VmError::type_error(
            "'callee' may not be accessed on the arguments object of a strict function",
        ))
    })
}

/// `Object(value)`
pub(crate) fn object_constructor() -> NativeFn {
    Arc::new(|vm: &mut VmRuntime, call: &NativeCall| {
        let value = call.arg(0);
        if value.is_nullish() {
            return Ok(Value::Object(vm.new_object()));
        }
        Ok(Value::Object(vm.to_object(&value)?))
    })
}

/// `Array(...items)` and `Array(length)`
pub(crate) fn array_constructor() -> NativeFn {
    Arc::new(|vm: &mut VmRuntime, call: &NativeCall| {
        if let [length] = call.arguments.as_slice() {
            if length.is_number() {
                let length = vm.to_array_length(length)?;
                let array = vm.new_array(Vec::new());
                vm.heap.get_mut(array).indexed.set_length(length);
                return Ok(Value::Object(array));
            }
        }
        Ok(Value::Object(vm.new_array(call.arguments.to_vec())))
    })
}

fn error_constructor(kind: ErrorType) -> NativeFn {
    Arc::new(move |vm: &mut VmRuntime, call: &NativeCall| {
        let prototype = match call.new_target {
            Some(target) => vm.get(target, "prototype")?.as_object(),
            None => None,
        }
        .unwrap_or_else(|| vm.realm.intrinsics.error_prototype(kind));
        let error = vm.create_object(Some(prototype), ObjectKind::Error);
        let message = call.arg(0);
        if !message.is_undefined() {
            let message = vm.to_js_string(&message)?;
            vm.heap
                .define_data_property_raw(error, "message".into(), Value::String(message), PropertyAttributes::HIDDEN);
        }
        Ok(Value::Object(error))
    })
}

// ============================================================================
// Prototype methods
// ============================================================================

fn generator_method(mode: ResumeMode) -> NativeFn {
    Arc::new(move |vm: &mut VmRuntime, call: &NativeCall| {
        let Value::Object(generator) = call.this else {
            return Err(VmError::type_error("Generator method called on incompatible receiver"));
        };
        vm.generator_resume(generator, mode, call.arg(0))
    })
}

fn object_to_string(vm: &mut VmRuntime, call: &NativeCall) -> VmResult<Value> {
    let tag = match &call.this {
        Value::Undefined => "Undefined",
        Value::Null => "Null",
        Value::Object(object) => match vm.heap.get(*object).kind() {
            ObjectKind::Array => "Array",
            ObjectKind::Function(_) | ObjectKind::NativeFunction(_) => "Function",
            ObjectKind::Error => "Error",
            ObjectKind::Arguments => "Arguments",
            ObjectKind::RegExp { .. } => "RegExp",
            ObjectKind::PrimitiveWrapper(Value::String(_)) => "String",
            ObjectKind::PrimitiveWrapper(Value::Boolean(_)) => "Boolean",
            ObjectKind::PrimitiveWrapper(Value::Int32(_) | Value::Double(_)) => "Number",
            _ => "Object",
        },
        Value::String(_) => "String",
        Value::Boolean(_) => "Boolean",
        Value::Int32(_) | Value::Double(_) => "Number",
        _ => "Object",
    };
    Ok(Value::string(format!("[object {tag}]")))
}

fn has_own_property(vm: &mut VmRuntime, call: &NativeCall) -> VmResult<Value> {
    let key = vm.to_property_key(&call.arg(0))?;
    let object = vm.to_object(&call.this)?;
    Ok(Value::Boolean(vm.has_own_property(object, &key)))
}

fn error_to_string(vm: &mut VmRuntime, call: &NativeCall) -> VmResult<Value> {
    let Value::Object(error) = call.this else {
        return Err(VmError::type_error("Error.prototype.toString called on a non-object"));
    };
    let name = match vm.get(error, "name")? {
        Value::Undefined => JsString::new("Error"),
        name => vm.to_js_string(&name)?,
    };
    let message = match vm.get(error, "message")? {
        Value::Undefined => JsString::empty(),
        message => vm.to_js_string(&message)?,
    };
    Ok(Value::String(match (name.is_empty(), message.is_empty()) {
        (_, true) => name,
        (true, false) => message,
        (false, false) => JsString::new(format!("{name}: {message}")),
    }))
}

/// `Symbol(description)`
fn symbol_function() -> NativeFn {
    Arc::new(|vm: &mut VmRuntime, call: &NativeCall| {
        let description = match call.arg(0) {
            Value::Undefined => None,
            description => Some(vm.to_js_string(&description)?),
        };
        let symbol = vm.heap.create_symbol(description.as_ref().map(JsString::as_str));
        Ok(Value::Symbol(symbol))
    })
}

/// `Array.prototype.values`
pub(crate) fn array_values() -> NativeFn {
    Arc::new(|vm: &mut VmRuntime, call: &NativeCall| vm.create_array_iterator(&call.this))
}

fn function_call(vm: &mut VmRuntime, call: &NativeCall) -> VmResult<Value> {
    let arguments = call.arguments.get(1..).unwrap_or_default();
    vm.call(&call.this, call.arg(0), arguments)
}

fn function_apply(vm: &mut VmRuntime, call: &NativeCall) -> VmResult<Value> {
    let arguments = match call.arg(1) {
        Value::Undefined | Value::Null => Vec::new(),
        list => vm.iterate_to_list(&list)?,
    };
    vm.call(&call.this, call.arg(0), &arguments)
}

/// Methods on the intrinsic prototypes
pub(crate) fn install_prototype_methods(heap: &mut Heap, intrinsics: &Intrinsics) {
    let fp = intrinsics.function_prototype;

    define_method(heap, fp, intrinsics.object_prototype, "toString", 0, Arc::new(object_to_string));
    define_method(heap, fp, intrinsics.object_prototype, "hasOwnProperty", 1, Arc::new(has_own_property));
    define_method(heap, fp, fp, "call", 1, Arc::new(function_call));
    define_method(heap, fp, fp, "apply", 2, Arc::new(function_apply));

    let generator_prototype = intrinsics.generator_prototype;
    define_method(heap, fp, generator_prototype, "next", 1, generator_method(ResumeMode::Next));
    define_method(heap, fp, generator_prototype, "return", 1, generator_method(ResumeMode::Return));
    define_method(heap, fp, generator_prototype, "throw", 1, generator_method(ResumeMode::Throw));

    let iterator = intrinsics.symbols.iterator;
    define_symbol_method(
        heap,
        fp,
        intrinsics.iterator_prototype,
        iterator,
        "[Symbol.iterator]",
        Arc::new(|_: &mut VmRuntime, call: &NativeCall| Ok(call.this.clone())),
    );
    let values = Value::Object(intrinsics.array_values_function);
    for prototype in [intrinsics.array_prototype, intrinsics.typed_array_prototype] {
        heap.define_data_property_raw(prototype, "values".into(), values.clone(), PropertyAttributes::HIDDEN);
        heap.define_data_property_raw(prototype, PropertyKey::Symbol(iterator), values.clone(), PropertyAttributes::HIDDEN);
    }
    define_symbol_method(
        heap,
        fp,
        intrinsics.string_prototype,
        iterator,
        "[Symbol.iterator]",
        Arc::new(|vm: &mut VmRuntime, call: &NativeCall| vm.create_string_iterator(&call.this)),
    );
    for (prototype, next) in [
        (
            intrinsics.array_iterator_prototype,
            Arc::new(|vm: &mut VmRuntime, call: &NativeCall| vm.array_iterator_next(&call.this)) as NativeFn,
        ),
        (
            intrinsics.string_iterator_prototype,
            Arc::new(|vm: &mut VmRuntime, call: &NativeCall| vm.string_iterator_next(&call.this)) as NativeFn,
        ),
        (
            intrinsics.property_name_iterator_prototype,
            Arc::new(|vm: &mut VmRuntime, call: &NativeCall| vm.property_name_iterator_next(&call.this)) as NativeFn,
        ),
    ] {
        define_method(heap, fp, prototype, "next", 0, next);
    }

    let error_prototype = intrinsics.error_prototype(ErrorType::Error);
    define_method(heap, fp, error_prototype, "toString", 0, Arc::new(error_to_string));
    for kind in ErrorType::ALL {
        let prototype = intrinsics.error_prototype(kind);
        heap.define_data_property_raw(prototype, "name".into(), Value::from(kind.name()), PropertyAttributes::HIDDEN);
        heap.define_data_property_raw(prototype, "message".into(), Value::from(""), PropertyAttributes::HIDDEN);
    }

    for (constructor, prototype) in [
        (intrinsics.object_constructor, intrinsics.object_prototype),
        (intrinsics.array_constructor, intrinsics.array_prototype),
    ] {
        link_constructor(heap, constructor, prototype);
    }
}

fn link_constructor(heap: &mut Heap, constructor: ObjectRef, prototype: ObjectRef) {
    heap.define_data_property_raw(constructor, "prototype".into(), Value::Object(prototype), PropertyAttributes::FROZEN);
    heap.define_data_property_raw(
        prototype,
        "constructor".into(),
        Value::Object(constructor),
        PropertyAttributes::HIDDEN,
    );
}

/// Properties of the global object
pub(crate) fn install_globals(heap: &mut Heap, realm: &Realm) {
    let global = realm.global_object;
    let intrinsics = &realm.intrinsics;
    let fp = intrinsics.function_prototype;

    for (name, value) in [
        ("undefined", Value::Undefined),
        ("NaN", Value::Double(f64::NAN)),
        ("Infinity", Value::Double(f64::INFINITY)),
    ] {
        heap.define_data_property_raw(global, name.into(), value, PropertyAttributes::FROZEN);
    }

    let define = |heap: &mut Heap, name: &str, object: ObjectRef| {
        heap.define_data_property_raw(global, name.into(), Value::Object(object), PropertyAttributes::HIDDEN);
    };
    define(heap, "globalThis", global);
    define(heap, "Math", intrinsics.math_object);
    define(heap, "eval", intrinsics.eval_function);
    define(heap, "Object", intrinsics.object_constructor);
    define(heap, "Array", intrinsics.array_constructor);

    let symbol = native_function(heap, fp, "Symbol", 0, symbol_function(), false);
    link_constructor(heap, symbol, intrinsics.symbol_prototype);
    let symbols = intrinsics.symbols;
    for (name, well_known) in [("iterator", symbols.iterator), ("asyncIterator", symbols.async_iterator)] {
        heap.define_data_property_raw(symbol, name.into(), Value::Symbol(well_known), PropertyAttributes::FROZEN);
    }
    define(heap, "Symbol", symbol);

    for kind in ErrorType::ALL {
        let constructor = native_function(heap, fp, kind.name(), 1, error_constructor(kind), true);
        link_constructor(heap, constructor, intrinsics.error_prototype(kind));
        define(heap, kind.name(), constructor);
    }
}
