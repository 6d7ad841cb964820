//! Mark and sweep phases.

use crate::cell::{FreeCell, MemoryCell};
use crate::heap::Heap;
use crate::roots::RootSet;
use onyx_core::{Value, ValueType};

impl Heap {
    /// Run a full stop-the-world collection.
    ///
    /// Mark runs to completion from the supplied roots and the temporaries
    /// table before any sweeping happens. Sweep then visits every cell in
    /// every arena: survivors are unmarked, unreachable cells run their
    /// type cleanup, are zeroed, and rejoin the free list.
    pub fn collect(&mut self, roots: &dyn RootSet) {
        self.trace_line("#-- GC: Pause --#");

        // Mark phase.
        roots.trace(&mut mark_value);
        for &address in self.temporaries.borrow().keys() {
            mark_value(Value::from_raw(address));
        }

        // Sweep phase.
        let mut freed: u64 = 0;
        let Heap {
            arenas,
            free,
            temporaries,
            ..
        } = self;
        for arena in arenas.iter_mut() {
            for cell in arena.iter_mut() {
                if cell.is_marked() {
                    cell.set_mark(false);
                } else if cell.cell_type() != ValueType::Dead {
                    // A swept cell still registered as a temporary marks a
                    // rooting bug somewhere; drop the stale entry rather
                    // than leave a dangling pin.
                    let address = cell as *mut MemoryCell as u64;
                    temporaries.borrow_mut().remove(&address);

                    // Safety: the cell is live (non-dead) and unreachable;
                    // clean runs once, then the payload is zeroed before
                    // the cell is refiled as free.
                    unsafe {
                        cell.clean();
                        std::ptr::write_bytes(cell as *mut MemoryCell, 0, 1);
                    }
                    cell.data.free = FreeCell { next: *free };
                    *free = cell as *mut MemoryCell;
                    freed += 1;
                }
            }
        }

        self.stats.collections += 1;
        self.stats.cells_freed += freed;
        self.trace_line(&format!("#-- GC: Freed a total of {} cells --#", freed));
        self.trace_line("#-- GC: Finished --#");
    }
}

/// Mark a value and everything reachable from it, depth-first.
///
/// Non-pointers are ignored; an already-set mark bit short-circuits, which
/// also terminates cycles.
pub(crate) fn mark_value(value: Value) {
    let Some(cell) = value.as_ptr::<MemoryCell>() else {
        return;
    };
    // Safety: pointer values reaching the collector address live cells of
    // this heap; the machine's rooting discipline upholds this.
    unsafe { mark_cell(cell) };
}

unsafe fn mark_raw(cell: *mut MemoryCell) {
    if !cell.is_null() {
        unsafe { mark_cell(cell) };
    }
}

/// # Safety
///
/// `cell` must point to a cell of this heap.
unsafe fn mark_cell(cell: *mut MemoryCell) {
    unsafe {
        if (*cell).is_marked() {
            return;
        }
        (*cell).set_mark(true);

        match (*cell).cell_type() {
            ValueType::Object => {
                let object = (*cell).object();
                mark_value(object.klass);
                for &value in object.container.values() {
                    mark_value(value);
                }
            }
            ValueType::Array => {
                for &value in &(*cell).array().data {
                    mark_value(value);
                }
            }
            ValueType::Function => {
                let function = (*cell).function();
                mark_raw(function.context);
                if let Some(bound_self) = function.bound_self {
                    mark_value(bound_self);
                }
                for &value in function.container.values() {
                    mark_value(value);
                }
            }
            ValueType::CFunction => {
                let cfunction = (*cell).cfunction();
                if let Some(bound_self) = cfunction.bound_self {
                    mark_value(bound_self);
                }
                for &value in cfunction.container.values() {
                    mark_value(value);
                }
            }
            ValueType::Class => {
                let class = (*cell).class();
                mark_value(class.constructor);
                mark_value(class.prototype);
                mark_value(class.parent_class);
                for &value in class.container.values() {
                    mark_value(value);
                }
            }
            ValueType::Frame => {
                let frame = (*cell).frame();
                mark_raw(frame.parent);
                mark_raw(frame.parent_environment_frame);
                mark_raw(frame.last_active_catchtable);
                mark_value(frame.function);
                mark_value(frame.self_value);
                for &local in &frame.locals {
                    mark_value(local);
                }
            }
            ValueType::CatchTable => {
                let table = (*cell).catchtable();
                mark_raw(table.frame);
                mark_raw(table.parent);
            }
            ValueType::Generator => {
                let generator = (*cell).generator();
                mark_raw(generator.context);
                mark_raw(generator.frame);
                for &value in &generator.saved_stack {
                    mark_value(value);
                }
                if let Some(bound_self) = generator.bound_self {
                    mark_value(bound_self);
                }
                for &value in generator.container.values() {
                    mark_value(value);
                }
            }
            // Strings, floats and cpointers have no value children; dead
            // cells have nothing at all.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;
    use crate::roots::{NoRoots, TempScope};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StackRoots(Vec<Value>);

    impl RootSet for StackRoots {
        fn trace(&self, visit: &mut dyn FnMut(Value)) {
            for &value in &self.0 {
                visit(value);
            }
        }
    }

    fn new_string(heap: &mut Heap, roots: &dyn RootSet, text: &str) -> Value {
        let cell = heap.allocate(roots).unwrap();
        unsafe {
            (*cell.as_ptr()).init_string(text.as_bytes());
            (*cell.as_ptr()).as_value()
        }
    }

    fn new_array(heap: &mut Heap, roots: &dyn RootSet) -> Value {
        let cell = heap.allocate(roots).unwrap();
        unsafe {
            (*cell.as_ptr()).init_array(4);
            (*cell.as_ptr()).as_value()
        }
    }

    #[test]
    fn test_unrooted_cells_are_reclaimed() {
        let mut heap = Heap::new(HeapConfig::default());
        let capacity = heap.cell_capacity();
        for _ in 0..10 {
            new_string(&mut heap, &NoRoots, "garbage");
        }
        assert_eq!(heap.free_cell_count(), capacity - 10);

        heap.collect(&NoRoots);
        assert_eq!(heap.free_cell_count(), capacity);
        assert_eq!(heap.stats().cells_freed, 10);
    }

    #[test]
    fn test_rooted_cells_survive() {
        let mut heap = Heap::new(HeapConfig::default());
        let capacity = heap.cell_capacity();

        let keep = new_string(&mut heap, &NoRoots, "keep me");
        new_string(&mut heap, &NoRoots, "drop me");

        let roots = StackRoots(vec![keep]);
        heap.collect(&roots);

        assert_eq!(heap.free_cell_count(), capacity - 1);
        let cell = keep.as_ptr::<MemoryCell>().unwrap();
        unsafe {
            assert_eq!((*cell).cell_type(), ValueType::String);
            assert_eq!((*cell).string_str(), "keep me");
            assert!(!(*cell).is_marked(), "sweep must clear the mark bit");
        }
    }

    #[test]
    fn test_reachability_through_containers() {
        let mut heap = Heap::new(HeapConfig::default());
        let capacity = heap.cell_capacity();

        let array = new_array(&mut heap, &NoRoots);
        let roots = StackRoots(vec![array]);
        let element = new_string(&mut heap, &roots, "element");
        unsafe {
            let cell = array.as_ptr::<MemoryCell>().unwrap();
            (*cell).array_mut().data.push(element);
        }

        heap.collect(&roots);
        assert_eq!(heap.free_cell_count(), capacity - 2);
        unsafe {
            let cell = element.as_ptr::<MemoryCell>().unwrap();
            assert_eq!((*cell).string_str(), "element");
        }
    }

    #[test]
    fn test_temporaries_survive_collection() {
        let mut heap = Heap::new(HeapConfig::default());
        let capacity = heap.cell_capacity();

        let pinned = {
            let mut scope = TempScope::new(&heap);
            let value = new_string(&mut heap, &NoRoots, "pinned");
            scope.pin(value);
            heap.collect(&NoRoots);
            assert_eq!(heap.free_cell_count(), capacity - 1);
            value
        };

        // Scope dropped: the cell is garbage on the next collection.
        heap.collect(&NoRoots);
        assert_eq!(heap.free_cell_count(), capacity);
        let cell = pinned.as_ptr::<MemoryCell>().unwrap();
        unsafe {
            assert_eq!((*cell).cell_type(), ValueType::Dead);
        }
    }

    #[test]
    fn test_nested_pins_keep_their_count() {
        let mut heap = Heap::new(HeapConfig::default());
        let value = new_string(&mut heap, &NoRoots, "shared");

        let mut outer = TempScope::new(&heap);
        outer.pin(value);
        {
            let mut inner = TempScope::new(&heap);
            inner.pin(value);
        }
        // Inner scope dropped; the outer pin must still hold.
        heap.collect(&NoRoots);
        let cell = value.as_ptr::<MemoryCell>().unwrap();
        unsafe {
            assert_eq!((*cell).cell_type(), ValueType::String);
        }
    }

    #[test]
    fn test_cycles_are_collected_and_marking_terminates() {
        let mut heap = Heap::new(HeapConfig::default());
        let capacity = heap.cell_capacity();

        let a = new_array(&mut heap, &NoRoots);
        let b = new_array(&mut heap, &NoRoots);
        unsafe {
            (*a.as_ptr::<MemoryCell>().unwrap()).array_mut().data.push(b);
            (*b.as_ptr::<MemoryCell>().unwrap()).array_mut().data.push(a);
        }

        // Reachable cycle: marking must terminate and keep both.
        let roots = StackRoots(vec![a]);
        heap.collect(&roots);
        assert_eq!(heap.free_cell_count(), capacity - 2);

        // Unreachable cycle: both are reclaimed.
        heap.collect(&NoRoots);
        assert_eq!(heap.free_cell_count(), capacity);
    }

    #[test]
    fn test_collection_is_idempotent_for_live_data() {
        let mut heap = Heap::new(HeapConfig::default());
        let keep = new_string(&mut heap, &NoRoots, "stable");
        let roots = StackRoots(vec![keep]);

        heap.collect(&roots);
        let after_first = heap.free_cell_count();
        heap.collect(&roots);
        assert_eq!(heap.free_cell_count(), after_first);
    }

    #[test]
    fn test_cpointer_destructor_runs_exactly_once() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        unsafe fn destructor(_data: *mut u8) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }

        let mut heap = Heap::new(HeapConfig::default());
        let cell = heap.allocate(&NoRoots).unwrap();
        unsafe {
            (*cell.as_ptr()).init_cpointer(std::ptr::null_mut(), Some(destructor));
        }

        heap.collect(&NoRoots);
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        heap.collect(&NoRoots);
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_heap_drop_runs_live_destructors_once() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        unsafe fn destructor(_data: *mut u8) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }

        {
            let mut heap = Heap::new(HeapConfig::default());
            let cell = heap.allocate(&NoRoots).unwrap();
            unsafe {
                (*cell.as_ptr()).init_cpointer(std::ptr::null_mut(), Some(destructor));
            }
            // Still reachable at drop time: never swept, cleaned by Drop.
        }
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_free_list_cells_are_dead() {
        let mut heap = Heap::new(HeapConfig::default());
        for _ in 0..5 {
            new_string(&mut heap, &NoRoots, "transient");
        }
        heap.collect(&NoRoots);

        let mut cursor = heap.free;
        while !cursor.is_null() {
            unsafe {
                assert_eq!((*cursor).cell_type(), ValueType::Dead);
                cursor = (*cursor).data.free.next;
            }
        }
    }
}
