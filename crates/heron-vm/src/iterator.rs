//! The iteration protocol
//!
//! `GetIterator` packs an iterator and its `next` method into an
//! [`IteratorRecord`] object held in a register, and the stepping
//! instructions read it back from there. Arrays, strings and `for-in` key
//! lists iterate through native iterator objects whose `next` lives on an
//! intrinsic prototype, so guest code can observe and replace them.

use crate::error::{VmError, VmResult};
use crate::heap::ObjectRef;
use crate::object::ObjectKind;
use crate::runtime::VmRuntime;
use crate::string::{JsString, PropertyKey};
use crate::value::Value;
use heron_bytecode::{CompletionType, IteratorHint};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;

/// An iterator together with the `next` method read when it was opened
#[derive(Debug, Clone)]
pub struct IteratorRecord {
    /// The iterator object
    pub iterator: Value,
    /// Its `next` method
    pub next_method: Value,
    /// Set once the iterator reported completion or threw
    pub done: bool,
}

/// State of an `%ArrayIterator%`
#[derive(Debug, Clone)]
pub struct ArrayIterator {
    /// Iterated object; cleared once exhausted
    pub(crate) iterated: Option<ObjectRef>,
    pub(crate) next_index: u32,
}

/// State of a `%StringIterator%`, stepping by code point
#[derive(Debug, Clone)]
pub struct StringIterator {
    pub(crate) iterated: Option<JsString>,
    /// Byte offset of the next code point
    pub(crate) position: usize,
}

/// Keys still to be visited by a `for-in` loop
#[derive(Debug, Clone)]
pub struct PropertyNameIterator {
    pub(crate) object: Option<ObjectRef>,
    pub(crate) keys: VecDeque<PropertyKey>,
}

impl VmRuntime {
    /// `GetMethod(V, P)`: `None` when the property is `undefined` or `null`
    pub fn get_method(&mut self, value: &Value, key: &PropertyKey) -> VmResult<Option<Value>> {
        let method = self.get_value_property(value, key)?;
        if method.is_nullish() {
            return Ok(None);
        }
        if !self.is_callable(&method) {
            return Err(VmError::type_error(format!(
                "{} is not a function",
                self.to_string_without_side_effects(&method)
            )));
        }
        Ok(Some(method))
    }

    /// `GetIterator(obj, kind)`, returning the iterator record object
    pub fn get_iterator(&mut self, iterable: &Value, hint: IteratorHint) -> VmResult<ObjectRef> {
        if iterable.is_nullish() {
            return Err(self.not_iterable(iterable));
        }
        let symbols = self.realm.intrinsics.symbols;
        let mut method = None;
        if hint == IteratorHint::Async {
            method = self.get_method(iterable, &PropertyKey::Symbol(symbols.async_iterator))?;
        }
        if method.is_none() {
            method = self.get_method(iterable, &PropertyKey::Symbol(symbols.iterator))?;
        }
        let Some(method) = method else {
            return Err(self.not_iterable(iterable));
        };
        let iterator = self.call(&method, iterable.clone(), &[])?;
        if !iterator.is_object() {
            return Err(VmError::type_error("Result of the Symbol.iterator method is not an object"));
        }
        let next_method = self.get_value_property(&iterator, &PropertyKey::from("next"))?;
        Ok(self.new_iterator_record(iterator, next_method))
    }

    pub(crate) fn not_iterable(&self, value: &Value) -> VmError {
        VmError::type_error(format!("{} is not iterable", self.to_string_without_side_effects(value)))
    }

    fn new_iterator_record(&mut self, iterator: Value, next_method: Value) -> ObjectRef {
        self.create_object(
            None,
            ObjectKind::IteratorRecord(IteratorRecord {
                iterator,
                next_method,
                done: false,
            }),
        )
    }

    /// Read the record held in `record`
    pub fn iterator_record(&self, record: &Value) -> VmResult<(ObjectRef, IteratorRecord)> {
        if let Value::Object(handle) = record {
            if let ObjectKind::IteratorRecord(state) = self.heap.get(*handle).kind() {
                return Ok((*handle, state.clone()));
            }
        }
        Err(VmError::internal("operand does not hold an iterator record"))
    }

    fn set_iterator_done(&mut self, record: ObjectRef) {
        if let ObjectKind::IteratorRecord(state) = &mut self.heap.get_mut(record).kind {
            state.done = true;
        }
    }

    /// Abrupt completions from the iterator mark the record done
    fn done_on_error<T>(&mut self, record: ObjectRef, result: VmResult<T>) -> VmResult<T> {
        if result.is_err() {
            self.set_iterator_done(record);
        }
        result
    }

    /// `IteratorNext`: call `next` and check that it produced an object
    pub fn iterator_next(&mut self, record: &Value) -> VmResult<ObjectRef> {
        let (handle, state) = self.iterator_record(record)?;
        let result = self.call(&state.next_method, state.iterator.clone(), &[]);
        let result = self.done_on_error(handle, result)?;
        match result {
            Value::Object(result) => Ok(result),
            other => {
                self.set_iterator_done(handle);
                Err(VmError::type_error(format!(
                    "Iterator result {} is not an object",
                    self.to_string_without_side_effects(&other)
                )))
            }
        }
    }

    /// `IteratorStepValue`: the next value, or `None` once the iterator is done
    pub fn iterator_step_value(&mut self, record: &Value) -> VmResult<Option<Value>> {
        let (handle, state) = self.iterator_record(record)?;
        if state.done {
            return Ok(None);
        }
        let result = self.iterator_next(record)?;
        let done = self.get(result, "done");
        if self.done_on_error(handle, done)?.to_boolean() {
            self.set_iterator_done(handle);
            return Ok(None);
        }
        let value = self.get(result, "value");
        self.done_on_error(handle, value).map(Some)
    }

    /// `IteratorClose(record, completion)`
    ///
    /// A throw completion is rethrown after `return` ran, whatever `return`
    /// itself did; a normal one surfaces errors from `return`.
    pub fn iterator_close(
        &mut self,
        record: &Value,
        completion_type: CompletionType,
        completion_value: Value,
    ) -> VmResult<()> {
        let (handle, state) = self.iterator_record(record)?;
        self.set_iterator_done(handle);
        let return_method = self.get_method(&state.iterator, &PropertyKey::from("return"));
        if completion_type == CompletionType::Throw {
            if let Ok(Some(method)) = return_method {
                let _ = self.call(&method, state.iterator.clone(), &[]);
            }
            return Err(self.throw_value(completion_value));
        }
        let Some(method) = return_method? else {
            return Ok(());
        };
        if !self.call(&method, state.iterator, &[])?.is_object() {
            return Err(VmError::type_error("Iterator return() result is not an object"));
        }
        Ok(())
    }

    /// `IteratorToList`
    pub fn iterator_to_list(&mut self, record: &Value) -> VmResult<Vec<Value>> {
        let mut values = Vec::new();
        while let Some(value) = self.iterator_step_value(record)? {
            values.push(value);
        }
        Ok(values)
    }

    /// Elements of an iterable, for spreads and `apply`
    pub fn iterate_to_list(&mut self, value: &Value) -> VmResult<Vec<Value>> {
        let record = Value::Object(self.get_iterator(value, IteratorHint::Sync)?);
        self.iterator_to_list(&record)
    }

    /// Iterator record over the enumerable string keys of `value` and its
    /// prototypes, shadowed keys visited once; `null` and `undefined`
    /// enumerate nothing
    pub fn get_object_property_iterator(&mut self, value: &Value) -> VmResult<ObjectRef> {
        let object = match value {
            Value::Undefined | Value::Null => None,
            value => Some(self.to_object(value)?),
        };
        let mut keys = VecDeque::new();
        let mut seen = FxHashSet::default();
        let mut current = object;
        while let Some(holder) = current {
            for key in self.heap.own_property_keys(holder) {
                if key.is_symbol() || !seen.insert(key.clone()) {
                    continue;
                }
                let enumerable = self
                    .heap
                    .own_property(holder, &key)
                    .is_some_and(|property| property.attributes.enumerable);
                if enumerable {
                    keys.push_back(key);
                }
            }
            current = self.heap.prototype_of(holder);
        }
        tracing::trace!(target: "heron::iterator", keys = keys.len(), "for-in keys collected");

        let prototype = self.realm.intrinsics.property_name_iterator_prototype;
        let iterator = self.create_object(
            Some(prototype),
            ObjectKind::PropertyNameIterator(Box::new(PropertyNameIterator { object, keys })),
        );
        let next_method = self.get(iterator, "next")?;
        Ok(self.new_iterator_record(Value::Object(iterator), next_method))
    }

    // ========================================================================
    // Native iterators
    // ========================================================================

    /// `CreateArrayIterator(ToObject(this), values)`
    pub(crate) fn create_array_iterator(&mut self, this: &Value) -> VmResult<Value> {
        let iterated = self.to_object(this)?;
        let prototype = self.realm.intrinsics.array_iterator_prototype;
        let iterator = self.create_object(
            Some(prototype),
            ObjectKind::ArrayIterator(ArrayIterator {
                iterated: Some(iterated),
                next_index: 0,
            }),
        );
        Ok(Value::Object(iterator))
    }

    /// `%ArrayIteratorPrototype%.next`
    pub(crate) fn array_iterator_next(&mut self, this: &Value) -> VmResult<Value> {
        let state = match this {
            Value::Object(object) => match self.heap.get(*object).kind() {
                ObjectKind::ArrayIterator(state) => Some((*object, state.clone())),
                _ => None,
            },
            _ => None,
        };
        let Some((iterator, state)) = state else {
            return Err(VmError::type_error("next called on a value that is not an Array Iterator"));
        };
        let Some(iterated) = state.iterated else {
            return Ok(self.iter_result(Value::Undefined, true));
        };
        let length = match self.heap.array_like_length(iterated) {
            Some(length) => length,
            None => {
                let length = self.get(iterated, "length")?;
                let length = self.to_number(&length)?;
                length.clamp(0.0, f64::from(u32::MAX)) as u32
            }
        };
        let index = state.next_index;
        if let ObjectKind::ArrayIterator(state) = &mut self.heap.get_mut(iterator).kind {
            if index >= length {
                state.iterated = None;
            } else {
                state.next_index = index + 1;
            }
        }
        if index >= length {
            return Ok(self.iter_result(Value::Undefined, true));
        }
        let value = self.get(iterated, PropertyKey::Index(index))?;
        Ok(self.iter_result(value, false))
    }

    /// `String.prototype[Symbol.iterator]`
    pub(crate) fn create_string_iterator(&mut self, this: &Value) -> VmResult<Value> {
        if this.is_nullish() {
            return Err(VmError::type_error(
                "String.prototype[Symbol.iterator] called on null or undefined",
            ));
        }
        let iterated = self.to_js_string(this)?;
        let prototype = self.realm.intrinsics.string_iterator_prototype;
        let iterator = self.create_object(
            Some(prototype),
            ObjectKind::StringIterator(StringIterator {
                iterated: Some(iterated),
                position: 0,
            }),
        );
        Ok(Value::Object(iterator))
    }

    /// `%StringIteratorPrototype%.next`
    pub(crate) fn string_iterator_next(&mut self, this: &Value) -> VmResult<Value> {
        let iterator = this
            .as_object()
            .filter(|object| matches!(self.heap.get(*object).kind(), ObjectKind::StringIterator(_)));
        let Some(iterator) = iterator else {
            return Err(VmError::type_error("next called on a value that is not a String Iterator"));
        };
        let ObjectKind::StringIterator(state) = &mut self.heap.get_mut(iterator).kind else {
            return Err(VmError::internal("string iterator changed kind"));
        };
        let next = state
            .iterated
            .as_ref()
            .and_then(|s| s.as_str()[state.position..].chars().next());
        match next {
            Some(c) => {
                state.position += c.len_utf8();
                Ok(self.iter_result(Value::string(c.to_string()), false))
            }
            None => {
                state.iterated = None;
                Ok(self.iter_result(Value::Undefined, true))
            }
        }
    }

    /// `next` of the `for-in` key iterator: skips keys deleted since the
    /// loop started
    pub(crate) fn property_name_iterator_next(&mut self, this: &Value) -> VmResult<Value> {
        let iterator = this.as_object().filter(|object| {
            matches!(self.heap.get(*object).kind(), ObjectKind::PropertyNameIterator(_))
        });
        let Some(iterator) = iterator else {
            return Err(VmError::type_error("next called on a value that is not a property iterator"));
        };
        loop {
            let ObjectKind::PropertyNameIterator(state) = &mut self.heap.get_mut(iterator).kind else {
                return Err(VmError::internal("property iterator changed kind"));
            };
            let (Some(object), Some(key)) = (state.object, state.keys.pop_front()) else {
                state.object = None;
                return Ok(self.iter_result(Value::Undefined, true));
            };
            if !self.has_property(object, &key) {
                continue;
            }
            let name = key.to_js_string().unwrap_or_else(JsString::empty);
            return Ok(self.iter_result(Value::String(name), false));
        }
    }

    fn iter_result(&mut self, value: Value, done: bool) -> Value {
        Value::Object(self.create_iter_result_object(value, done))
    }
}
