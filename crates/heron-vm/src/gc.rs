//! Garbage collection
//!
//! A stop-the-world mark/sweep over the typed arenas of the [`Heap`]. Roots
//! are the realm plus whatever the embedder passes in; parked generator
//! frames are reached through their generator objects. Shape transitions,
//! the root-shape table and inline-cache entries are weak: caches validate
//! their handles by generation, so a reclaimed shape simply stops matching.

use crate::context::ExecutionContext;
use crate::environment::{Environment, PrivateEnvironment};
use crate::generator::GeneratorResult;
use crate::heap::{EnvironmentRef, Heap, ObjectRef, PrivateEnvironmentRef, ShapeRef};
use crate::object::{JsObject, ObjectKind};
use crate::runtime::VmRuntime;
use crate::shape::{PrototypeChainValidity, Shape};
use crate::string::PropertyKey;
use crate::value::{Accessor, Symbol, Value};
use heron_gc::MarkSet;
use rustc_hash::FxHashSet;

/// Something holding heap references
pub trait Trace {
    /// Report every handle this holds to the tracer
    fn trace(&self, tracer: &mut Tracer<'_>);
}

/// Counts of cells reclaimed by one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Objects freed
    pub objects: usize,
    /// Shapes freed
    pub shapes: usize,
    /// Environment records freed
    pub environments: usize,
    /// Every other cell kind
    pub other: usize,
}

/// Marking state
pub struct Tracer<'h> {
    heap: &'h Heap,
    objects: MarkSet<JsObject>,
    shapes: MarkSet<Shape>,
    environments: MarkSet<Environment>,
    private_environments: MarkSet<PrivateEnvironment>,
    accessors: MarkSet<Accessor>,
    symbols: MarkSet<Symbol>,
    validities: MarkSet<PrototypeChainValidity>,
    generator_results: MarkSet<GeneratorResult>,
    gray_objects: Vec<ObjectRef>,
    gray_environments: Vec<EnvironmentRef>,
}

impl<'h> Tracer<'h> {
    fn new(heap: &'h Heap) -> Self {
        Self {
            heap,
            objects: MarkSet::new(),
            shapes: MarkSet::new(),
            environments: MarkSet::new(),
            private_environments: MarkSet::new(),
            accessors: MarkSet::new(),
            symbols: MarkSet::new(),
            validities: MarkSet::new(),
            generator_results: MarkSet::new(),
            gray_objects: Vec::new(),
            gray_environments: Vec::new(),
        }
    }

    /// Mark an object
    pub fn object(&mut self, object: ObjectRef) {
        if self.objects.mark(object) {
            self.gray_objects.push(object);
        }
    }

    /// Mark an environment record
    pub fn environment(&mut self, environment: EnvironmentRef) {
        if self.environments.mark(environment) {
            self.gray_environments.push(environment);
        }
    }

    /// Mark a private environment and the ones enclosing it
    pub fn private_environment(&mut self, environment: PrivateEnvironmentRef) {
        let mut current = Some(environment);
        while let Some(env) = current {
            if !self.private_environments.mark(env) {
                return;
            }
            current = self.heap.get(env).outer;
        }
    }

    /// Mark whatever a value references
    pub fn value(&mut self, value: &Value) {
        match value {
            Value::Object(object) => self.object(*object),
            Value::Symbol(symbol) => {
                self.symbols.mark(*symbol);
            }
            Value::Accessor(accessor) => {
                if self.accessors.mark(*accessor) {
                    let Accessor { getter, setter } = *self.heap.get(*accessor);
                    getter.into_iter().chain(setter).for_each(|f| self.object(f));
                }
            }
            Value::GeneratorResult(result) => {
                if self.generator_results.mark(*result) {
                    let value = self.heap.get(*result).value.clone();
                    self.value(&value);
                }
            }
            _ => {}
        }
    }

    fn shape(&mut self, shape: ShapeRef) {
        if !self.shapes.mark(shape) {
            return;
        }
        let cell = self.heap.get(shape);
        if let Some(prototype) = cell.prototype() {
            self.object(prototype);
        }
        for key in cell.keys() {
            if let PropertyKey::Symbol(symbol) = key {
                self.symbols.mark(*symbol);
            }
        }
    }

    fn drain(&mut self) {
        loop {
            if let Some(object) = self.gray_objects.pop() {
                let heap = self.heap;
                heap.get(object).trace(self);
            } else if let Some(environment) = self.gray_environments.pop() {
                let heap = self.heap;
                heap.get(environment).trace(self);
            } else {
                return;
            }
        }
    }
}

impl Trace for Value {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.value(self);
    }
}

impl Trace for JsObject {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.shape(self.shape);
        if let Some(token) = self.prototype_chain_validity {
            tracer.validities.mark(token);
        }
        self.storage.iter().for_each(|value| tracer.value(value));
        self.private_elements.iter().for_each(|element| tracer.value(&element.value));
        let indices = self.indexed.indices();
        for index in indices {
            if let Some(value) = self.indexed.get(index) {
                tracer.value(value);
            }
        }
        match &self.kind {
            ObjectKind::Function(function) => {
                function
                    .environment
                    .into_iter()
                    .chain(function.module_environment)
                    .for_each(|env| tracer.environment(env));
                if let Some(private) = function.private_environment {
                    tracer.private_environment(private);
                }
                function
                    .home_object
                    .iter()
                    .chain(function.this_value.iter())
                    .for_each(|value| tracer.value(value));
            }
            ObjectKind::Generator(generator) => {
                if let Some(context) = &generator.context {
                    context.trace(tracer);
                }
            }
            ObjectKind::TypedArray(view) => tracer.object(view.buffer),
            ObjectKind::PrimitiveWrapper(primitive) => tracer.value(primitive),
            ObjectKind::IteratorRecord(record) => {
                tracer.value(&record.iterator);
                tracer.value(&record.next_method);
            }
            ObjectKind::ArrayIterator(iterator) => {
                if let Some(iterated) = iterator.iterated {
                    tracer.object(iterated);
                }
            }
            ObjectKind::PropertyNameIterator(iterator) => {
                if let Some(object) = iterator.object {
                    tracer.object(object);
                }
            }
            _ => {}
        }
    }
}

impl Trace for Environment {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        match self {
            Environment::Declarative(env) => {
                env.bindings.iter().for_each(|binding| tracer.value(&binding.value));
            }
            Environment::Object(env) => tracer.object(env.binding_object),
            Environment::Global(env) => {
                tracer.object(env.global_object);
                tracer.environment(env.declarative);
            }
        }
        if let Some(outer) = self.outer() {
            tracer.environment(outer);
        }
    }
}

impl Trace for ExecutionContext {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.registers.iter().for_each(|value| tracer.value(value));
        self.function
            .into_iter()
            .chain(self.new_target)
            .for_each(|object| tracer.object(object));
        if let Some(this) = &self.this_value {
            tracer.value(this);
        }
        [
            self.lexical_environment,
            self.variable_environment,
            self.module_environment,
        ]
        .into_iter()
        .flatten()
        .chain(self.saved_lexical_environments.iter().flatten().copied())
        .chain(self.unwind_contexts.iter().filter_map(|unwind| unwind.lexical_environment))
        .for_each(|env| tracer.environment(env));
        if let Some(private) = self.private_environment {
            tracer.private_environment(private);
        }
    }
}

impl VmRuntime {
    /// Collect every cell unreachable from the realm and `extra_roots`
    ///
    /// Must not be called while guest code is running: live frames on the
    /// native stack are not roots.
    pub fn collect_garbage(&mut self, extra_roots: &[Value]) -> GcReport {
        assert_eq!(self.call_depth, 0, "garbage collection while guest code is running");
        let mut tracer = Tracer::new(&self.heap);
        tracer.object(self.realm.global_object);
        tracer.environment(self.realm.global_environment);
        self.realm.intrinsics.objects().for_each(|object| tracer.object(object));
        for symbol in self.realm.intrinsics.symbols.all() {
            tracer.value(&Value::Symbol(symbol));
        }
        extra_roots.iter().for_each(|value| tracer.value(value));
        tracer.drain();

        let Tracer {
            objects,
            shapes,
            environments,
            private_environments,
            accessors,
            symbols,
            validities,
            generator_results,
            ..
        } = tracer;

        let heap = &mut self.heap;
        let report = GcReport {
            objects: heap.objects.sweep(&objects),
            shapes: heap.shapes.sweep(&shapes),
            environments: heap.environments.sweep(&environments),
            other: heap.private_environments.sweep(&private_environments)
                + heap.accessors.sweep(&accessors)
                + heap.symbols.sweep(&symbols)
                + heap.validities.sweep(&validities)
                + heap.generator_results.sweep(&generator_results),
        };
        prune_weak_shape_edges(heap);
        tracing::debug!(target: "heron::gc", ?report, live_objects = heap.object_count(), "collection finished");
        report
    }
}

fn prune_weak_shape_edges(heap: &mut Heap) {
    let Heap {
        shapes,
        objects,
        root_shapes,
        ..
    } = heap;
    root_shapes.retain(|prototype, shape| {
        shapes.contains(*shape) && prototype.is_none_or(|proto| objects.contains(proto))
    });
    let live: FxHashSet<ShapeRef> = shapes.iter().map(|(handle, _)| handle).collect();
    for &handle in &live {
        if let Some(shape) = shapes.get_mut(handle) {
            shape.retain_transitions(|target| live.contains(&target));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_objects_are_freed() {
        let mut vm = VmRuntime::new();
        let kept = vm.new_object();
        let dropped = vm.new_object();
        let report = vm.collect_garbage(&[Value::Object(kept)]);
        assert!(report.objects >= 1);
        assert!(vm.heap.contains(kept));
        assert!(!vm.heap.contains(dropped));
    }

    #[test]
    fn test_globals_survive_collection() {
        let mut vm = VmRuntime::new();
        let object = vm.new_object();
        vm.define_global("kept", Value::Object(object));
        vm.collect_garbage(&[]);
        assert!(vm.heap.contains(object));
        assert_eq!(vm.global("kept").unwrap(), Value::Object(object));
    }

    #[test]
    fn test_accessor_functions_are_traced() {
        let mut vm = VmRuntime::new();
        let holder = vm.new_object();
        let getter = vm.create_native_function("get x", 0, |_, _| Ok(Value::Int32(1)));
        vm.define_accessor_property(
            holder,
            "x".into(),
            Some(getter),
            None,
            crate::shape::PropertyAttributes::DEFAULT,
        );
        vm.collect_garbage(&[Value::Object(holder)]);
        assert!(vm.heap.contains(getter));
        assert_eq!(vm.get(holder, "x").unwrap(), Value::Int32(1));
    }
}
