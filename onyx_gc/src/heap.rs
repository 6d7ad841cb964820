//! Arena list, free list and allocation.

use crate::cell::{FreeCell, MemoryCell};
use crate::roots::{RootSet, TempSet};
use crate::stats::GcStats;
use onyx_core::{CoreError, CoreResult};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::io::Write;
use std::ptr::NonNull;
use std::rc::Rc;

/// Cells per arena.
pub const CELLS_PER_ARENA: usize = 4096;

/// Arenas allocated up front.
pub const DEFAULT_INITIAL_ARENAS: usize = 2;

/// Geometric growth factor applied when a collection fails to replenish
/// the free list.
pub const ARENA_GROWTH_FACTOR: usize = 2;

/// Stream the gc tracer writes to. Shared with the machine's error stream.
pub type TraceSink = Rc<RefCell<dyn Write>>;

/// Heap construction parameters.
pub struct HeapConfig {
    pub initial_arenas: usize,
    /// Print pause/free/finish lines around every collection.
    pub trace: bool,
    /// Where trace lines go; stderr when absent.
    pub sink: Option<TraceSink>,
}

impl Default for HeapConfig {
    fn default() -> HeapConfig {
        HeapConfig {
            initial_arenas: DEFAULT_INITIAL_ARENAS,
            trace: false,
            sink: None,
        }
    }
}

/// The cell heap.
///
/// Arenas are boxed slices, so cell addresses are stable for the lifetime
/// of the heap no matter how the arena list itself grows.
pub struct Heap {
    pub(crate) arenas: Vec<Box<[MemoryCell]>>,
    pub(crate) free: *mut MemoryCell,
    pub(crate) temporaries: TempSet,
    pub(crate) trace: bool,
    pub(crate) sink: Option<TraceSink>,
    pub(crate) stats: GcStats,
}

impl Heap {
    pub fn new(config: HeapConfig) -> Heap {
        let mut heap = Heap {
            arenas: Vec::new(),
            free: std::ptr::null_mut(),
            temporaries: Rc::new(RefCell::new(FxHashMap::default())),
            trace: config.trace,
            sink: config.sink,
            stats: GcStats::default(),
        };
        for _ in 0..config.initial_arenas.max(1) {
            heap.add_arena();
        }
        heap
    }

    /// Pop a dead cell off the free list.
    ///
    /// If the pop empties the list, a collection runs immediately so the
    /// *next* allocation cannot fail; if the collection yields nothing the
    /// heap grows geometrically. A failed growth is fatal.
    pub fn allocate(&mut self, roots: &dyn RootSet) -> CoreResult<NonNull<MemoryCell>> {
        let cell = self.free;
        let Some(cell) = NonNull::new(cell) else {
            return Err(CoreError::HeapExhausted);
        };

        // Safety: free-list cells are dead and exclusively owned by the
        // heap; the link lives in their payload.
        unsafe {
            self.free = (*cell.as_ptr()).data.free.next;
        }

        if self.free.is_null() {
            self.collect(roots);
            if self.free.is_null() {
                self.grow();
                if self.free.is_null() {
                    return Err(CoreError::HeapExhausted);
                }
            }
        }

        Ok(cell)
    }

    /// Handle to the temporaries table, for [`TempScope`].
    ///
    /// [`TempScope`]: crate::roots::TempScope
    pub(crate) fn temp_set(&self) -> TempSet {
        Rc::clone(&self.temporaries)
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// Total cell capacity across all arenas.
    pub fn cell_capacity(&self) -> usize {
        self.arenas.len() * CELLS_PER_ARENA
    }

    /// Length of the free list. Linear walk, meant for tests and
    /// diagnostics.
    pub fn free_cell_count(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.free;
        while !cursor.is_null() {
            count += 1;
            // Safety: same as in allocate.
            cursor = unsafe { (*cursor).data.free.next };
        }
        count
    }

    pub(crate) fn add_arena(&mut self) {
        let mut arena: Box<[MemoryCell]> = (0..CELLS_PER_ARENA)
            .map(|_| MemoryCell::new_dead())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let mut head = self.free;
        for cell in arena.iter_mut() {
            cell.data.free = FreeCell { next: head };
            head = cell as *mut MemoryCell;
        }
        self.free = head;
        self.arenas.push(arena);
    }

    pub(crate) fn grow(&mut self) {
        let current = self.arenas.len();
        let target = current * ARENA_GROWTH_FACTOR;
        while self.arenas.len() < target {
            self.add_arena();
            self.stats.arenas_grown += 1;
        }
    }

    pub(crate) fn trace_line(&self, line: &str) {
        if !self.trace {
            return;
        }
        match &self.sink {
            Some(sink) => {
                let _ = writeln!(sink.borrow_mut(), "{}", line);
            }
            None => eprintln!("{}", line),
        }
    }
}

impl Drop for Heap {
    /// Run the type cleanup of every still-live cell. CPointer destructors
    /// in particular must fire exactly once, reachable or not, when the
    /// heap itself goes away.
    fn drop(&mut self) {
        for arena in &mut self.arenas {
            for cell in arena.iter_mut() {
                if cell.cell_type() != onyx_core::ValueType::Dead {
                    // Safety: the cell is live and about to be deallocated
                    // with the arena; nothing observes it afterwards.
                    unsafe {
                        cell.clean();
                    }
                    cell.set_type(onyx_core::ValueType::Dead);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roots::NoRoots;

    #[test]
    fn test_new_heap_is_entirely_free() {
        let heap = Heap::new(HeapConfig::default());
        assert_eq!(heap.cell_capacity(), DEFAULT_INITIAL_ARENAS * CELLS_PER_ARENA);
        assert_eq!(heap.free_cell_count(), heap.cell_capacity());
    }

    #[test]
    fn test_allocate_returns_distinct_dead_cells() {
        let mut heap = Heap::new(HeapConfig::default());
        let a = heap.allocate(&NoRoots).unwrap();
        let b = heap.allocate(&NoRoots).unwrap();
        assert_ne!(a.as_ptr(), b.as_ptr());
        unsafe {
            assert_eq!((*a.as_ptr()).cell_type(), onyx_core::ValueType::Dead);
        }
        assert_eq!(heap.free_cell_count(), heap.cell_capacity() - 2);
    }

    #[test]
    fn test_exhaustion_triggers_collection_and_growth() {
        let mut heap = Heap::new(HeapConfig {
            initial_arenas: 1,
            ..HeapConfig::default()
        });

        // Drain the arena with initialized (non-dead) cells that nothing
        // roots. The collection triggered by the last pop reclaims them
        // all, so the free list refills without growth.
        for _ in 0..CELLS_PER_ARENA {
            let cell = heap.allocate(&NoRoots).unwrap();
            unsafe { (*cell.as_ptr()).init_float(1.0) };
        }
        assert_eq!(heap.arenas.len(), 1);
        assert!(heap.stats().collections >= 1);
        assert!(heap.free_cell_count() > 0);
    }

    #[test]
    fn test_growth_when_everything_is_pinned() {
        let mut heap = Heap::new(HeapConfig {
            initial_arenas: 1,
            ..HeapConfig::default()
        });

        let mut scope = crate::roots::TempScope::new(&heap);
        for _ in 0..CELLS_PER_ARENA + 1 {
            let cell = heap.allocate(&NoRoots).unwrap();
            unsafe { (*cell.as_ptr()).init_float(2.5) };
            scope.pin(unsafe { (*cell.as_ptr()).as_value() });
        }
        // Nothing was collectable, so the heap had to grow.
        assert!(heap.arenas.len() > 1);
        assert!(heap.stats().arenas_grown >= 1);
    }
}
