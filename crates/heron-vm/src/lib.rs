//! # Heron VM
//!
//! Register-based bytecode interpreter for an ECMAScript-like language.
//!
//! ## Design Principles
//!
//! - **Register-based**: one flat slot file per call, addressed by operands
//! - **Inline caches**: property lookups, global variables and environment
//!   coordinates are memoized per instruction in the executable's side tables
//! - **Hidden classes**: shapes shared through transitions, with
//!   prototype-chain validity tokens guarding cached prototype hits
//! - **Suspension as return**: `Yield` and `Await` end the frame with a
//!   [`GeneratorResult`]; drivers park the context and resume at the
//!   continuation

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

mod binding;
mod builtins;
mod call;
pub mod context;
pub mod convert;
pub mod environment;
pub mod error;
pub mod executable;
pub mod gc;
pub mod generator;
mod globals;
pub mod heap;
pub mod inline_cache;
pub mod interpreter;
pub mod iterator;
pub mod object;
pub mod ops;
pub mod private_name;
mod property_access;
pub mod realm;
pub mod runtime;
pub mod shape;
pub mod string;
pub mod typed_array;
pub mod value;

pub use context::ExecutionContext;
pub use error::{VmError, VmResult};
pub use executable::{Executable, FunctionData};
pub use gc::GcReport;
pub use generator::{GeneratorResult, GeneratorState, ResumeMode};
pub use heap::{Heap, ObjectRef};
pub use interpreter::{ExecutionResult, Interpreter};
pub use object::{NativeCall, ObjectKind};
pub use realm::{ErrorType, Realm};
pub use runtime::{EvalCompiler, RuntimeConfig, VmRuntime};
pub use string::{JsString, PropertyKey};
pub use value::Value;
