//! The VM heap: one typed arena per cell kind
//!
//! Every heap-resident cell is addressed by a `Handle<T>` from `heron-gc`.
//! Dereferencing a stale handle is a VM bug and panics.

use crate::environment::{Environment, PrivateEnvironment};
use crate::generator::GeneratorResult;
use crate::object::JsObject;
use crate::shape::{PrototypeChainValidity, Shape};
use crate::value::{Accessor, Symbol};
use heron_gc::{Arena, GcConfig, GcStats, Handle};
use rustc_hash::FxHashMap;

/// Handle to an object
pub type ObjectRef = Handle<JsObject>;
/// Handle to a shape
pub type ShapeRef = Handle<Shape>;
/// Handle to an environment record
pub type EnvironmentRef = Handle<Environment>;
/// Handle to a private environment
pub type PrivateEnvironmentRef = Handle<PrivateEnvironment>;
/// Handle to a getter/setter pair
pub type AccessorRef = Handle<Accessor>;
/// Handle to a symbol
pub type SymbolRef = Handle<Symbol>;
/// Handle to a prototype-chain validity token
pub type ValidityRef = Handle<PrototypeChainValidity>;
/// Handle to a suspension record
pub type GeneratorResultRef = Handle<GeneratorResult>;

/// A kind of heap cell
pub trait Cell: Sized {
    /// Name used in diagnostics
    const NAME: &'static str;

    /// The arena holding cells of this kind
    fn arena(heap: &Heap) -> &Arena<Self>;

    /// Mutable access to the arena holding cells of this kind
    fn arena_mut(heap: &mut Heap) -> &mut Arena<Self>;
}

macro_rules! cell {
    ($ty:ty, $field:ident, $name:literal) => {
        impl Cell for $ty {
            const NAME: &'static str = $name;

            #[inline]
            fn arena(heap: &Heap) -> &Arena<Self> {
                &heap.$field
            }

            #[inline]
            fn arena_mut(heap: &mut Heap) -> &mut Arena<Self> {
                &mut heap.$field
            }
        }
    };
}

/// The VM heap
pub struct Heap {
    pub(crate) objects: Arena<JsObject>,
    pub(crate) shapes: Arena<Shape>,
    pub(crate) environments: Arena<Environment>,
    pub(crate) private_environments: Arena<PrivateEnvironment>,
    pub(crate) accessors: Arena<Accessor>,
    pub(crate) symbols: Arena<Symbol>,
    pub(crate) validities: Arena<PrototypeChainValidity>,
    pub(crate) generator_results: Arena<GeneratorResult>,
    /// Empty shape per prototype, the root of each transition tree
    pub(crate) root_shapes: FxHashMap<Option<ObjectRef>, ShapeRef>,
}

cell!(JsObject, objects, "object");
cell!(Shape, shapes, "shape");
cell!(Environment, environments, "environment");
cell!(PrivateEnvironment, private_environments, "private environment");
cell!(Accessor, accessors, "accessor");
cell!(Symbol, symbols, "symbol");
cell!(PrototypeChainValidity, validities, "prototype chain validity");
cell!(GeneratorResult, generator_results, "generator result");

impl Heap {
    /// Create an empty heap
    pub fn new(config: &GcConfig) -> Self {
        Self {
            objects: Arena::with_config(config),
            shapes: Arena::with_config(config),
            environments: Arena::with_config(config),
            private_environments: Arena::new(),
            accessors: Arena::new(),
            symbols: Arena::new(),
            validities: Arena::new(),
            generator_results: Arena::new(),
            root_shapes: FxHashMap::default(),
        }
    }

    /// Allocate a cell
    pub fn allocate<T: Cell>(&mut self, value: T) -> Handle<T> {
        T::arena_mut(self).allocate(value)
    }

    /// Borrow a cell
    #[inline]
    pub fn get<T: Cell>(&self, handle: Handle<T>) -> &T {
        match T::arena(self).get(handle) {
            Some(cell) => cell,
            None => stale_handle(T::NAME, handle),
        }
    }

    /// Mutably borrow a cell
    #[inline]
    pub fn get_mut<T: Cell>(&mut self, handle: Handle<T>) -> &mut T {
        match T::arena_mut(self).get_mut(handle) {
            Some(cell) => cell,
            None => stale_handle(T::NAME, handle),
        }
    }

    /// True if the handle still addresses a live cell
    pub fn contains<T: Cell>(&self, handle: Handle<T>) -> bool {
        T::arena(self).contains(handle)
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Allocation counters of the object arena
    pub fn object_stats(&self) -> GcStats {
        self.objects.stats()
    }

    /// Create a symbol
    pub fn create_symbol(&mut self, description: Option<&str>) -> SymbolRef {
        self.allocate(Symbol {
            description: description.map(Into::into),
        })
    }
}

#[cold]
#[inline(never)]
fn stale_handle<T>(kind: &str, handle: Handle<T>) -> ! {
    panic!("stale {kind} handle {handle:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_get() {
        let mut heap = Heap::new(&GcConfig::default());
        let sym = heap.create_symbol(Some("tag"));
        assert_eq!(
            heap.get(sym).description.as_ref().map(|d| d.as_str()),
            Some("tag")
        );
        assert!(heap.contains(sym));
    }

    #[test]
    #[should_panic(expected = "stale symbol handle")]
    fn test_stale_handle_panics() {
        let mut heap = Heap::new(&GcConfig::default());
        let sym = heap.create_symbol(None);
        heap.symbols.free(sym);
        let _ = heap.get(sym);
    }
}
