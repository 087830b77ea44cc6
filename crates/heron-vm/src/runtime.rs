//! VM runtime - the embedder entry point
//!
//! The runtime owns the heap and the realm. Programs come in as compiled
//! [`Program`]s and are run as scripts (global scope) or modules (a fresh
//! module record).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use heron_bytecode::Program;
use heron_gc::GcConfig;

use crate::context::ExecutionContext;
use crate::error::{VmError, VmResult};
use crate::executable::Executable;
use crate::heap::{Heap, ObjectRef};
use crate::object::{NativeCall, NativeFunction, ObjectKind};
use crate::realm::{ErrorType, Realm};
use crate::shape::PropertyAttributes;
use crate::string::JsString;
use crate::value::Value;

/// Compiles eval source text; the error string becomes a `SyntaxError`
pub type EvalCompiler = Arc<dyn Fn(&str) -> Result<Program, String> + Send + Sync>;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum call depth before a `RangeError`
    pub max_stack_depth: usize,
    /// Run every instruction as strict code
    pub strict_mode: bool,
    /// Heap configuration
    pub gc: GcConfig,
    /// Seed for `Math.random`; a time-based seed when `None`
    pub random_seed: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 10_000,
            strict_mode: false,
            gc: GcConfig::default(),
            random_seed: None,
        }
    }
}

/// The VM runtime
pub struct VmRuntime {
    /// The heap
    pub heap: Heap,
    /// The realm
    pub realm: Realm,
    pub(crate) config: RuntimeConfig,
    pub(crate) call_depth: usize,
    rng_state: u64,
    pub(crate) eval_compiler: Option<EvalCompiler>,
    next_private_name_id: u64,
}

impl VmRuntime {
    /// Create a new runtime with default configuration
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let mut heap = Heap::new(&config.gc);
        let realm = Realm::new(&mut heap);
        let seed = config.random_seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_nanos() as u64)
                .unwrap_or(0x2545_f491_4f6c_dd1d)
        });
        Self {
            heap,
            realm,
            config,
            call_depth: 0,
            // xorshift state must never be zero
            rng_state: seed | 1,
            eval_compiler: None,
            next_private_name_id: 0,
        }
    }

    /// Get runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Install the compiler used by `eval`
    pub fn set_eval_compiler(&mut self, compiler: impl Fn(&str) -> Result<Program, String> + Send + Sync + 'static) {
        self.eval_compiler = Some(Arc::new(compiler));
    }

    /// Prepare and run a program as a global script
    pub fn run_program(&mut self, program: Program) -> VmResult<Value> {
        let executable = Executable::new(program)?;
        self.run_script(executable)
    }

    /// Run an executable in the global scope
    pub fn run_script(&mut self, executable: Arc<Executable>) -> VmResult<Value> {
        tracing::debug!(target: "heron::runtime", name = %executable.name, "running script");
        let mut context = ExecutionContext::new(executable, 0);
        let global_environment = self.realm.global_environment;
        context.lexical_environment = Some(global_environment);
        context.variable_environment = Some(global_environment);
        context.this_value = Some(Value::Object(self.realm.global_object));
        self.run_context(&mut context, false)
    }

    /// Run an executable as a module with its own module record
    ///
    /// Top-level `await` is settled synchronously.
    pub fn run_module(&mut self, executable: Arc<Executable>) -> VmResult<Value> {
        tracing::debug!(target: "heron::runtime", name = %executable.name, "running module");
        let module_environment = self.new_module_environment();
        let mut context = ExecutionContext::new(executable, 0);
        context.lexical_environment = Some(module_environment);
        context.variable_environment = Some(module_environment);
        context.module_environment = Some(module_environment);
        context.this_value = Some(Value::Undefined);
        self.run_context(&mut context, true)
    }

    /// Define a property on the global object
    pub fn define_global(&mut self, name: &str, value: Value) {
        let global = self.realm.global_object;
        self.heap
            .define_data_property_raw(global, name.into(), value, PropertyAttributes::HIDDEN);
    }

    /// Read a property of the global object
    pub fn global(&mut self, name: &str) -> VmResult<Value> {
        let global = self.realm.global_object;
        self.get(global, name)
    }

    /// Wrap a Rust closure as a guest function
    pub fn create_native_function(
        &mut self,
        name: &str,
        length: u32,
        function: impl Fn(&mut VmRuntime, &NativeCall) -> VmResult<Value> + Send + Sync + 'static,
    ) -> ObjectRef {
        let proto = self.realm.intrinsics.function_prototype;
        let object = self.create_object(
            Some(proto),
            ObjectKind::NativeFunction(NativeFunction {
                name: JsString::new(name),
                function: Arc::new(function),
                builtin: None,
                is_constructor: false,
            }),
        );
        self.heap.define_data_property_raw(
            object,
            "length".into(),
            Value::number(f64::from(length)),
            PropertyAttributes::CONFIGURABLE,
        );
        self.heap.define_data_property_raw(
            object,
            "name".into(),
            Value::from(name),
            PropertyAttributes::CONFIGURABLE,
        );
        object
    }

    /// A fresh error instance of `kind`
    pub fn create_error_object(&mut self, kind: ErrorType, message: &JsString) -> ObjectRef {
        let proto = self.realm.intrinsics.error_prototype(kind);
        let error = self.create_object(Some(proto), ObjectKind::Error);
        self.heap.define_data_property_raw(
            error,
            "message".into(),
            Value::String(message.clone()),
            PropertyAttributes::HIDDEN,
        );
        error
    }

    /// Materialize a VM error as the guest value a handler receives
    pub fn error_to_value(&mut self, error: VmError) -> Value {
        let (kind, message) = match error {
            VmError::Exception(thrown) => return thrown.value,
            VmError::TypeError(message) => (ErrorType::TypeError, message),
            VmError::ReferenceError(message) => (ErrorType::ReferenceError, message),
            VmError::RangeError(message) => (ErrorType::RangeError, message),
            VmError::SyntaxError(message) => (ErrorType::SyntaxError, message),
            VmError::InternalError(message) => (ErrorType::InternalError, message),
            VmError::StackOverflow => (
                ErrorType::RangeError,
                "Maximum call stack size exceeded".to_string(),
            ),
            VmError::Bytecode(error) => (ErrorType::InternalError, error.to_string()),
        };
        Value::Object(self.create_error_object(kind, &JsString::new(message)))
    }

    /// Wrap a guest value for propagation out of native code
    pub fn throw_value(&self, value: Value) -> VmError {
        let message = self.to_string_without_side_effects(&value);
        VmError::exception(value, message)
    }

    /// Unique id for a new private name
    pub(crate) fn next_private_name_id(&mut self) -> u64 {
        self.next_private_name_id += 1;
        self.next_private_name_id
    }

    /// Next `Math.random` value in `[0, 1)` (xorshift64*)
    pub(crate) fn next_random(&mut self) -> f64 {
        let mut x = self.rng_state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng_state = x;
        let bits = x.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 11;
        bits as f64 / (1u64 << 53) as f64
    }
}

impl Default for VmRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_bytecode::{Constant, Op, ProgramBuilder};

    fn returns_42() -> Program {
        let mut builder = ProgramBuilder::new("test.js");
        let c = builder.constant(Constant::Int32(42));
        builder.emit(Op::End { value: c });
        builder.finish().unwrap()
    }

    #[test]
    fn test_runtime_creation() {
        let runtime = VmRuntime::new();
        assert_eq!(runtime.config().max_stack_depth, 10_000);
        assert!(!runtime.config().strict_mode);
    }

    #[test]
    fn test_execute_program() {
        let mut runtime = VmRuntime::new();
        let result = runtime.run_program(returns_42()).unwrap();
        assert_eq!(result, Value::Int32(42));
    }

    #[test]
    fn test_errors_become_guest_objects() {
        let mut runtime = VmRuntime::new();
        let value = runtime.error_to_value(VmError::StackOverflow);
        assert_eq!(
            runtime.to_string_without_side_effects(&value),
            "RangeError: Maximum call stack size exceeded"
        );
        let thrown = runtime.error_to_value(VmError::exception(Value::Int32(3), "3"));
        assert_eq!(thrown, Value::Int32(3));
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let config = RuntimeConfig {
            random_seed: Some(7),
            ..RuntimeConfig::default()
        };
        let mut a = VmRuntime::with_config(config.clone());
        let mut b = VmRuntime::with_config(config);
        for _ in 0..4 {
            let n = a.next_random();
            assert_eq!(n, b.next_random());
            assert!((0.0..1.0).contains(&n));
        }
    }

    #[test]
    fn test_native_function_is_callable() {
        let mut runtime = VmRuntime::new();
        let double = runtime.create_native_function("double", 1, |vm, call| {
            let n = vm.to_number(&call.arg(0))?;
            Ok(Value::number(n * 2.0))
        });
        runtime.define_global("double", Value::Object(double));
        let callee = runtime.global("double").unwrap();
        let result = runtime.call(&callee, Value::Undefined, &[Value::Int32(21)]).unwrap();
        assert_eq!(result, Value::Int32(42));
    }
}
