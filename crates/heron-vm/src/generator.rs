//! Generator objects and suspension
//!
//! A `Yield` or `Await` ends the running frame with a [`GeneratorResult`]
//! carrying the continuation offset. The generator object parks the frame's
//! execution context and resumes it at that offset on the next `next`,
//! `throw` or `return` call.

use crate::context::ExecutionContext;
use crate::error::{VmError, VmResult};
use crate::heap::ObjectRef;
use crate::interpreter::{ExecutionResult, Interpreter};
use crate::object::ObjectKind;
use crate::runtime::VmRuntime;
use crate::value::Value;

/// What a suspended frame hands back to its driver
#[derive(Debug, Clone)]
pub struct GeneratorResult {
    /// Yielded or awaited value
    pub value: Value,
    /// Where to resume; `None` once the generator has completed
    pub continuation: Option<usize>,
    /// Suspended at an `Await` rather than a `Yield`
    pub is_await: bool,
}

/// Lifecycle of a generator object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Created, body not started
    SuspendedStart,
    /// Parked at a `Yield`
    SuspendedYield,
    /// Currently running
    Executing,
    /// Finished; the context has been dropped
    Completed,
}

/// Internal slots of a generator object
#[derive(Debug)]
pub struct GeneratorObject {
    /// Current state
    pub state: GeneratorState,
    /// Parked frame
    pub context: Option<Box<ExecutionContext>>,
    /// Offset to resume at
    pub continuation: usize,
    /// `async function*`: awaits inside the body are settled during resume
    pub is_async: bool,
}

/// How a generator is resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// `next(value)`
    Next,
    /// `throw(value)`
    Throw,
    /// `return(value)`
    Return,
}

impl VmRuntime {
    /// Wrap a prepared frame in a generator object
    pub fn create_generator_object(&mut self, context: ExecutionContext, is_async: bool) -> ObjectRef {
        let proto = self.realm.intrinsics.generator_prototype;
        self.create_object(
            Some(proto),
            ObjectKind::Generator(Box::new(GeneratorObject {
                state: GeneratorState::SuspendedStart,
                context: Some(Box::new(context)),
                continuation: 0,
                is_async,
            })),
        )
    }

    /// `{ value, done }`
    pub fn create_iter_result_object(&mut self, value: Value, done: bool) -> ObjectRef {
        let result = self.new_object();
        self.heap.define_data_property_raw(
            result,
            "value".into(),
            value,
            crate::shape::PropertyAttributes::DEFAULT,
        );
        self.heap.define_data_property_raw(
            result,
            "done".into(),
            Value::Boolean(done),
            crate::shape::PropertyAttributes::DEFAULT,
        );
        result
    }

    fn generator_slots(&mut self, generator: ObjectRef) -> VmResult<&mut GeneratorObject> {
        match &mut self.heap.get_mut(generator).kind {
            ObjectKind::Generator(slots) => Ok(slots),
            _ => Err(VmError::type_error("Generator method called on incompatible receiver")),
        }
    }

    fn complete_generator(&mut self, generator: ObjectRef) -> VmResult<()> {
        tracing::debug!(target: "heron::generator", "generator completed");
        let slots = self.generator_slots(generator)?;
        slots.state = GeneratorState::Completed;
        slots.context = None;
        Ok(())
    }

    /// Resume a generator and return its iterator result object
    pub fn generator_resume(&mut self, generator: ObjectRef, mode: ResumeMode, value: Value) -> VmResult<Value> {
        let slots = self.generator_slots(generator)?;
        let mut state = slots.state;
        match state {
            GeneratorState::Executing => {
                return Err(VmError::type_error("Generator is already running"));
            }
            GeneratorState::SuspendedStart if mode != ResumeMode::Next => {
                slots.state = GeneratorState::Completed;
                slots.context = None;
                state = GeneratorState::Completed;
            }
            _ => {}
        }
        if state == GeneratorState::Completed {
            return match mode {
                ResumeMode::Next => Ok(Value::Object(self.create_iter_result_object(Value::Undefined, true))),
                ResumeMode::Return => Ok(Value::Object(self.create_iter_result_object(value, true))),
                ResumeMode::Throw => Err(self.throw_value(value)),
            };
        }

        let slots = self.generator_slots(generator)?;
        let continuation = slots.continuation;
        let is_async = slots.is_async;
        let Some(mut context) = slots.context.take() else {
            return Err(VmError::internal("suspended generator without a context"));
        };
        slots.state = GeneratorState::Executing;

        tracing::debug!(target: "heron::generator", ?mode, continuation, "resuming generator");
        if let Err(error) = self.enter_call() {
            self.complete_generator(generator)?;
            return Err(error);
        }
        let mut outcome = Interpreter::new(self, &mut context).resume(continuation, mode, value);
        if is_async {
            outcome = self.settle_awaits(&mut context, outcome);
        }
        self.exit_call();

        match outcome {
            ExecutionResult::Suspended(GeneratorResult {
                value,
                continuation: Some(continuation),
                ..
            }) => {
                let slots = self.generator_slots(generator)?;
                slots.state = GeneratorState::SuspendedYield;
                tracing::debug!(target: "heron::generator", continuation, "generator suspended");
                slots.continuation = continuation;
                slots.context = Some(context);
                Ok(Value::Object(self.create_iter_result_object(value, false)))
            }
            ExecutionResult::Suspended(GeneratorResult { value, .. }) | ExecutionResult::Value(value) => {
                self.complete_generator(generator)?;
                Ok(Value::Object(self.create_iter_result_object(value, true)))
            }
            ExecutionResult::Thrown(value) => {
                self.complete_generator(generator)?;
                Err(self.throw_value(value))
            }
        }
    }

    /// Resume every `Await` suspension immediately with the awaited value
    pub(crate) fn settle_awaits(
        &mut self,
        context: &mut ExecutionContext,
        mut outcome: ExecutionResult,
    ) -> ExecutionResult {
        loop {
            match outcome {
                ExecutionResult::Suspended(GeneratorResult {
                    value,
                    continuation: Some(continuation),
                    is_await: true,
                }) => {
                    outcome = Interpreter::new(self, context).resume(continuation, ResumeMode::Next, value);
                }
                other => return other,
            }
        }
    }

    /// Current state of a generator object
    pub fn generator_state(&self, generator: ObjectRef) -> Option<GeneratorState> {
        match &self.heap.get(generator).kind {
            ObjectKind::Generator(slots) => Some(slots.state),
            _ => None,
        }
    }
}
