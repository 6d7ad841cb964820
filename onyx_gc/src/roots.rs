//! Root registration.
//!
//! The machine supplies its roots to every collection through [`RootSet`].
//! Cells that are mid-construction (allocated but not yet stored anywhere a
//! root can reach) are pinned through [`TempScope`], which unpins them on
//! every exit path, normal or unwinding.

use onyx_core::Value;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Rc;

/// Supplies every value the collector must treat as reachable.
///
/// Implemented by the machine over its operand stack, frame chain, catch
/// stack, scheduler-held tasks and primitive class registry.
pub trait RootSet {
    fn trace(&self, visit: &mut dyn FnMut(Value));
}

/// An empty root set. After a collection with it, only temporaries survive.
pub struct NoRoots;

impl RootSet for NoRoots {
    fn trace(&self, _visit: &mut dyn FnMut(Value)) {}
}

/// Shared pin-count table. Keys are cell addresses; the count handles the
/// same cell pinned by nested scopes.
pub(crate) type TempSet = Rc<RefCell<FxHashMap<u64, usize>>>;

/// Pins freshly-allocated cells until they are rooted elsewhere.
///
/// Construction code that performs more than one allocation before the
/// result becomes reachable must hold its intermediate values in a scope:
///
/// ```ignore
/// let mut scope = TempScope::new(&vm.heap);
/// let array = scope.pin(vm.create_array(count)?);
/// for _ in 0..count {
///     let element = vm.create_string("…")?; // may collect; array survives
///     // store element into array; reachable from the pinned array now
/// }
/// // scope drops here; the array must be rooted by the caller
/// ```
pub struct TempScope {
    set: TempSet,
    pinned: SmallVec<[u64; 4]>,
}

impl TempScope {
    pub fn new(heap: &crate::heap::Heap) -> TempScope {
        TempScope {
            set: heap.temp_set(),
            pinned: SmallVec::new(),
        }
    }

    /// Pin a value for the lifetime of this scope. Immediates pass through
    /// untouched. Returns the value for chaining.
    pub fn pin(&mut self, value: Value) -> Value {
        if value.is_pointer() {
            let address = value.raw();
            *self.set.borrow_mut().entry(address).or_insert(0) += 1;
            self.pinned.push(address);
        }
        value
    }
}

impl Drop for TempScope {
    fn drop(&mut self) {
        let mut set = self.set.borrow_mut();
        for &address in &self.pinned {
            if let Some(count) = set.get_mut(&address) {
                *count -= 1;
                if *count == 0 {
                    set.remove(&address);
                }
            }
        }
    }
}
