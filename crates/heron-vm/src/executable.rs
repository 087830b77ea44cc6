//! Executables: a compiled program prepared for the interpreter
//!
//! An `Executable` is shared (`Arc`) between every activation of the same
//! code. Its cache tables use interior mutability; a cache lock is only ever
//! held while copying an entry in or out, never across a guest call.

use crate::error::{VmError, VmResult};
use crate::inline_cache::{EnvironmentCoordinateCache, GlobalVariableCache, PropertyLookupCache};
use crate::string::JsString;
use crate::value::Value;
use heron_bytecode::{
    Constant, EnvironmentCoordinateCacheIndex, ExceptionHandler, FunctionKind,
    GlobalVariableCacheIndex, IdentifierTableIndex, Program, PropertyLookupCacheIndex,
    RegexLiteral, StringTableIndex, TableLookup,
};
use num_bigint::BigInt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Compiled function plus the flags its call needs
#[derive(Debug)]
pub struct FunctionData {
    /// Function name
    pub name: JsString,
    /// Body
    pub executable: Arc<Executable>,
    /// Declared parameter count
    pub formal_parameter_count: u32,
    /// Plain, generator, async, or async generator
    pub kind: FunctionKind,
    /// Strict code
    pub is_strict: bool,
    /// Arrow function (lexical `this`)
    pub is_arrow: bool,
    /// Usable with `new`
    pub is_constructor: bool,
}

/// A compiled unit ready to run
#[derive(Debug)]
pub struct Executable {
    /// Name for diagnostics
    pub name: JsString,
    /// Encoded instructions
    pub bytecode: Vec<u8>,
    /// Identifier table
    pub identifier_table: Vec<JsString>,
    /// String table
    pub string_table: Vec<JsString>,
    /// Regex literals
    pub regex_table: Vec<RegexLiteral>,
    /// Constants, copied into every activation's slot file
    pub constants: Vec<Value>,
    /// Nested functions
    pub functions: Vec<Arc<FunctionData>>,
    /// Protected ranges
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Register count, reserved registers included
    pub number_of_registers: usize,
    /// Local variable names
    pub local_variable_names: Vec<JsString>,
    property_lookup_caches: Mutex<Vec<PropertyLookupCache>>,
    global_variable_caches: Mutex<Vec<GlobalVariableCache>>,
    environment_coordinate_caches: Mutex<Vec<EnvironmentCoordinateCache>>,
    builtin_fast_path_hits: AtomicU64,
    program: Program,
}

fn constant_value(constant: &Constant) -> VmResult<Value> {
    Ok(match constant {
        Constant::Undefined => Value::Undefined,
        Constant::Null => Value::Null,
        Constant::Empty => Value::Empty,
        Constant::Boolean(b) => Value::Boolean(*b),
        Constant::Int32(i) => Value::Int32(*i),
        Constant::Double(d) => Value::number(*d),
        Constant::String(s) => Value::String(JsString::new(s)),
        Constant::BigInt(digits) => {
            let n: BigInt = digits
                .parse()
                .map_err(|_| VmError::internal(format!("malformed BigInt constant {digits}")))?;
            Value::bigint(n)
        }
    })
}

impl Executable {
    /// Prepare a program (and, recursively, its nested functions)
    pub fn new(program: Program) -> VmResult<Arc<Self>> {
        let constants = program
            .constants
            .iter()
            .map(constant_value)
            .collect::<VmResult<Vec<_>>>()?;
        let functions = program
            .functions
            .iter()
            .map(|template| {
                let executable = Executable::new(Program::clone(&template.program))?;
                Ok(Arc::new(FunctionData {
                    name: JsString::new(&template.name),
                    executable,
                    formal_parameter_count: template.formal_parameter_count,
                    kind: template.kind,
                    is_strict: template.is_strict,
                    is_arrow: template.is_arrow,
                    is_constructor: template.is_constructor,
                }))
            })
            .collect::<VmResult<Vec<_>>>()?;
        let executable = Self {
            name: JsString::new(&program.name),
            bytecode: program.bytecode.clone(),
            identifier_table: program.identifiers.iter().map(JsString::new).collect(),
            string_table: program.strings.iter().map(JsString::new).collect(),
            regex_table: program.regexes.clone(),
            constants,
            functions,
            exception_handlers: program.exception_handlers.clone(),
            number_of_registers: program.number_of_registers as usize,
            local_variable_names: program.local_variable_names.iter().map(JsString::new).collect(),
            property_lookup_caches: Mutex::new(vec![
                PropertyLookupCache::default();
                program.property_lookup_cache_count as usize
            ]),
            global_variable_caches: Mutex::new(vec![
                GlobalVariableCache::default();
                program.global_variable_cache_count as usize
            ]),
            environment_coordinate_caches: Mutex::new(vec![
                EnvironmentCoordinateCache::default();
                program.environment_coordinate_cache_count as usize
            ]),
            builtin_fast_path_hits: AtomicU64::new(0),
            program,
        };
        tracing::trace!(
            target: "heron::executable",
            name = %executable.name,
            bytes = executable.bytecode.len(),
            "prepared executable"
        );
        Ok(Arc::new(executable))
    }

    /// The innermost protected range covering `offset`
    pub fn exception_handlers_for_offset(&self, offset: usize) -> Option<ExceptionHandler> {
        self.program.exception_handlers_for_offset(offset).copied()
    }

    /// Identifier by index
    pub fn identifier(&self, index: IdentifierTableIndex) -> &JsString {
        &self.identifier_table[index.index()]
    }

    /// String by index
    pub fn string(&self, index: StringTableIndex) -> &JsString {
        &self.string_table[index.index()]
    }

    /// The program this executable was prepared from
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Disassembly listing
    pub fn disassemble(&self) -> String {
        self.program.disassemble()
    }

    /// Log the disassembly
    pub fn dump(&self) {
        tracing::debug!(target: "heron::executable", name = %self.name, "\n{}", self.disassemble());
    }

    /// Copy of a property lookup cache
    pub fn property_lookup_cache(&self, index: PropertyLookupCacheIndex) -> PropertyLookupCache {
        self.property_lookup_caches.lock()[index.index()]
    }

    pub(crate) fn update_property_lookup_cache(
        &self,
        index: PropertyLookupCacheIndex,
        update: impl FnOnce(&mut PropertyLookupCache),
    ) {
        update(&mut self.property_lookup_caches.lock()[index.index()]);
    }

    /// Copy of a global variable cache
    pub fn global_variable_cache(&self, index: GlobalVariableCacheIndex) -> GlobalVariableCache {
        self.global_variable_caches.lock()[index.index()]
    }

    pub(crate) fn update_global_variable_cache(
        &self,
        index: GlobalVariableCacheIndex,
        update: impl FnOnce(&mut GlobalVariableCache),
    ) {
        update(&mut self.global_variable_caches.lock()[index.index()]);
    }

    /// Copy of an environment coordinate cache
    pub fn environment_coordinate_cache(
        &self,
        index: EnvironmentCoordinateCacheIndex,
    ) -> EnvironmentCoordinateCache {
        self.environment_coordinate_caches.lock()[index.index()]
    }

    pub(crate) fn update_environment_coordinate_cache(
        &self,
        index: EnvironmentCoordinateCacheIndex,
        update: impl FnOnce(&mut EnvironmentCoordinateCache),
    ) {
        update(&mut self.environment_coordinate_caches.lock()[index.index()]);
    }

    /// Calls that took the builtin fast path
    pub fn builtin_fast_path_hits(&self) -> u64 {
        self.builtin_fast_path_hits.load(Ordering::Relaxed)
    }

    pub(crate) fn record_builtin_fast_path_hit(&self) {
        self.builtin_fast_path_hits.fetch_add(1, Ordering::Relaxed);
    }
}

impl TableLookup for Executable {
    fn identifier(&self, index: IdentifierTableIndex) -> Option<&str> {
        self.identifier_table.get(index.index()).map(|s| s.as_str())
    }

    fn string(&self, index: StringTableIndex) -> Option<&str> {
        self.string_table.get(index.index()).map(|s| s.as_str())
    }
}
