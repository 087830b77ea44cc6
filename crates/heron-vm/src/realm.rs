//! Realm: the global object, the global environment and the intrinsics
//!
//! Everything here is allocated straight into the heap before a
//! [`VmRuntime`](crate::runtime::VmRuntime) exists, so the runtime never
//! observes a half-built realm.

use crate::builtins;
use crate::environment::{DeclarativeEnvironment, Environment, GlobalEnvironment};
use crate::heap::{EnvironmentRef, Heap, ObjectRef, SymbolRef};
use crate::object::ObjectKind;
use crate::shape::PropertyAttributes;
use crate::value::Value;
use heron_bytecode::Builtin;
use rustc_hash::FxHashMap;

/// Native error constructors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// `Error`
    Error,
    /// `EvalError`
    EvalError,
    /// `RangeError`
    RangeError,
    /// `ReferenceError`
    ReferenceError,
    /// `SyntaxError`
    SyntaxError,
    /// `TypeError`
    TypeError,
    /// `InternalError`, for host failures surfaced to guest code
    InternalError,
}

impl ErrorType {
    /// Every error type, in prototype-table order
    pub const ALL: [ErrorType; 7] = [
        ErrorType::Error,
        ErrorType::EvalError,
        ErrorType::RangeError,
        ErrorType::ReferenceError,
        ErrorType::SyntaxError,
        ErrorType::TypeError,
        ErrorType::InternalError,
    ];

    /// Constructor name
    pub const fn name(self) -> &'static str {
        match self {
            ErrorType::Error => "Error",
            ErrorType::EvalError => "EvalError",
            ErrorType::RangeError => "RangeError",
            ErrorType::ReferenceError => "ReferenceError",
            ErrorType::SyntaxError => "SyntaxError",
            ErrorType::TypeError => "TypeError",
            ErrorType::InternalError => "InternalError",
        }
    }
}

/// Well-known symbols shared by every realm of a runtime
#[derive(Debug, Clone, Copy)]
pub struct WellKnownSymbols {
    /// `Symbol.iterator`
    pub iterator: SymbolRef,
    /// `Symbol.asyncIterator`
    pub async_iterator: SymbolRef,
}

impl WellKnownSymbols {
    fn new(heap: &mut Heap) -> Self {
        Self {
            iterator: heap.create_symbol(Some("Symbol.iterator")),
            async_iterator: heap.create_symbol(Some("Symbol.asyncIterator")),
        }
    }

    pub(crate) fn all(&self) -> [SymbolRef; 2] {
        [self.iterator, self.async_iterator]
    }
}

/// Intrinsic objects of a realm
#[derive(Debug, Clone)]
pub struct Intrinsics {
    // ========================================================================
    // Core prototypes
    // ========================================================================
    /// `Object.prototype`, whose prototype is `null`
    pub object_prototype: ObjectRef,
    /// `Function.prototype`
    pub function_prototype: ObjectRef,
    /// `Array.prototype`
    pub array_prototype: ObjectRef,

    // ========================================================================
    // Primitive prototypes
    // ========================================================================
    /// `String.prototype`
    pub string_prototype: ObjectRef,
    /// `Number.prototype`
    pub number_prototype: ObjectRef,
    /// `Boolean.prototype`
    pub boolean_prototype: ObjectRef,
    /// `Symbol.prototype`
    pub symbol_prototype: ObjectRef,
    /// `BigInt.prototype`
    pub bigint_prototype: ObjectRef,

    // ========================================================================
    // Other prototypes
    // ========================================================================
    /// `RegExp.prototype`
    pub regexp_prototype: ObjectRef,
    /// `%GeneratorPrototype%`
    pub generator_prototype: ObjectRef,
    /// `ArrayBuffer.prototype`
    pub array_buffer_prototype: ObjectRef,
    /// `%TypedArray.prototype%`
    pub typed_array_prototype: ObjectRef,
    /// `%IteratorPrototype%`
    pub iterator_prototype: ObjectRef,
    /// `%ArrayIteratorPrototype%`
    pub array_iterator_prototype: ObjectRef,
    /// `%StringIteratorPrototype%`
    pub string_iterator_prototype: ObjectRef,
    /// Prototype of the key iterators behind `for-in`
    pub property_name_iterator_prototype: ObjectRef,
    error_prototypes: [ObjectRef; ErrorType::ALL.len()],

    // ========================================================================
    // Functions
    // ========================================================================
    /// `Object`
    pub object_constructor: ObjectRef,
    /// `Array`
    pub array_constructor: ObjectRef,
    /// The realm's `eval`; a call to it is a direct eval
    pub eval_function: ObjectRef,
    /// `%ThrowTypeError%`, the poisoned `callee` accessor of unmapped
    /// arguments objects
    pub throw_type_error: ObjectRef,
    /// `Array.prototype.values`, also the `[Symbol.iterator]` of arrays,
    /// typed arrays and arguments objects
    pub array_values_function: ObjectRef,
    /// `Math`
    pub math_object: ObjectRef,
    builtins: FxHashMap<Builtin, ObjectRef>,

    /// Well-known symbols
    pub symbols: WellKnownSymbols,
}

impl Intrinsics {
    /// The function object `CallBuiltin` compares against
    pub fn builtin(&self, builtin: Builtin) -> Option<ObjectRef> {
        self.builtins.get(&builtin).copied()
    }

    /// `<kind>.prototype`
    pub fn error_prototype(&self, kind: ErrorType) -> ObjectRef {
        self.error_prototypes[kind as usize]
    }

    /// Every intrinsic object, for the collector's root set
    pub(crate) fn objects(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        [
            self.object_prototype,
            self.function_prototype,
            self.array_prototype,
            self.string_prototype,
            self.number_prototype,
            self.boolean_prototype,
            self.symbol_prototype,
            self.bigint_prototype,
            self.regexp_prototype,
            self.generator_prototype,
            self.array_buffer_prototype,
            self.typed_array_prototype,
            self.iterator_prototype,
            self.array_iterator_prototype,
            self.string_iterator_prototype,
            self.property_name_iterator_prototype,
            self.object_constructor,
            self.array_constructor,
            self.eval_function,
            self.throw_type_error,
            self.array_values_function,
            self.math_object,
        ]
        .into_iter()
        .chain(self.error_prototypes)
        .chain(self.builtins.values().copied())
    }
}

/// A realm
#[derive(Debug, Clone)]
pub struct Realm {
    /// The global object
    pub global_object: ObjectRef,
    /// The global environment record
    pub global_environment: EnvironmentRef,
    /// Intrinsic objects
    pub intrinsics: Intrinsics,
}

impl Realm {
    /// Allocate and wire a fresh realm
    pub(crate) fn new(heap: &mut Heap) -> Self {
        let object_prototype = heap.alloc_object(None, ObjectKind::Ordinary);
        let function_prototype = heap.alloc_object(Some(object_prototype), ObjectKind::Ordinary);
        let ordinary = |heap: &mut Heap, proto: ObjectRef| heap.alloc_object(Some(proto), ObjectKind::Ordinary);

        let array_prototype = heap.alloc_object(Some(object_prototype), ObjectKind::Array);
        let string_prototype = ordinary(heap, object_prototype);
        let number_prototype = ordinary(heap, object_prototype);
        let boolean_prototype = ordinary(heap, object_prototype);
        let symbol_prototype = ordinary(heap, object_prototype);
        let bigint_prototype = ordinary(heap, object_prototype);
        let regexp_prototype = ordinary(heap, object_prototype);
        let iterator_prototype = ordinary(heap, object_prototype);
        let generator_prototype = ordinary(heap, iterator_prototype);
        let array_iterator_prototype = ordinary(heap, iterator_prototype);
        let string_iterator_prototype = ordinary(heap, iterator_prototype);
        let property_name_iterator_prototype = ordinary(heap, iterator_prototype);
        let array_buffer_prototype = ordinary(heap, object_prototype);
        let typed_array_prototype = ordinary(heap, object_prototype);

        let base_error_prototype = ordinary(heap, object_prototype);
        let error_prototypes = ErrorType::ALL.map(|kind| match kind {
            ErrorType::Error => base_error_prototype,
            _ => ordinary(heap, base_error_prototype),
        });

        let native = builtins::native_function;
        let object_constructor = native(
            heap,
            function_prototype,
            "Object",
            1,
            builtins::object_constructor(),
            true,
        );
        let array_constructor = native(
            heap,
            function_prototype,
            "Array",
            1,
            builtins::array_constructor(),
            true,
        );
        let eval_function = native(heap, function_prototype, "eval", 1, builtins::eval(), false);
        let throw_type_error = native(heap, function_prototype, "", 0, builtins::throw_type_error(), false);
        heap.get_mut(throw_type_error).extensible = false;
        let array_values_function = native(heap, function_prototype, "values", 0, builtins::array_values(), false);

        let math_object = ordinary(heap, object_prototype);
        let mut builtin_functions = FxHashMap::default();
        for builtin in Builtin::ALL {
            let function = builtins::math_function(heap, function_prototype, builtin);
            heap.define_data_property_raw(
                math_object,
                builtin.property_name().into(),
                Value::Object(function),
                PropertyAttributes::HIDDEN,
            );
            builtin_functions.insert(builtin, function);
        }

        let intrinsics = Intrinsics {
            object_prototype,
            function_prototype,
            array_prototype,
            string_prototype,
            number_prototype,
            boolean_prototype,
            symbol_prototype,
            bigint_prototype,
            regexp_prototype,
            generator_prototype,
            array_buffer_prototype,
            typed_array_prototype,
            iterator_prototype,
            array_iterator_prototype,
            string_iterator_prototype,
            property_name_iterator_prototype,
            error_prototypes,
            object_constructor,
            array_constructor,
            eval_function,
            throw_type_error,
            array_values_function,
            math_object,
            builtins: builtin_functions,
            symbols: WellKnownSymbols::new(heap),
        };
        builtins::install_prototype_methods(heap, &intrinsics);

        let global_object = heap.alloc_object(Some(object_prototype), ObjectKind::Ordinary);
        let declarative = heap.allocate(Environment::Declarative(DeclarativeEnvironment::default()));
        let global_environment = heap.allocate(Environment::Global(GlobalEnvironment {
            global_object,
            declarative,
            var_names: Default::default(),
            permanently_screwed_by_eval: false,
        }));

        let realm = Self {
            global_object,
            global_environment,
            intrinsics,
        };
        builtins::install_globals(heap, &realm);
        tracing::debug!(target: "heron::realm", objects = heap.object_count(), "realm initialized");
        realm
    }
}
