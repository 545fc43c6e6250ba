//! Scratch memory for the narrow phase and the island solver.
//!
//! Two allocators back every transient buffer of a step:
//!
//! - [`StackAllocator`]: a LIFO scratch stack with a fixed byte budget and a
//!   fixed number of simultaneous entries. Island body/contact lists, solver
//!   constraint arrays and EPA scratch come from here.
//! - [`BlockAllocator`]: a segregated free list over fixed size classes, fed
//!   by chunk-sized reservations that are never returned while the allocator
//!   lives. Shape support arrays ([`crate::shape::ConvexInfo`]) come from here.
//!
//! Both hand out guards ([`StackVec`], [`Block`]) that give their space back
//! when dropped, so every exit path (including early returns inside GJK/EPA)
//! releases what it took. Both are `!Send`: a [`PhysicsContext`] belongs to one
//! world on one thread.
//!
//! # Failure policy
//!
//! Running out of stack bytes or stack entries is a sizing bug. Both cases
//! return [`PhysicsError`] and log at error level; nothing is returned null.
//!
//! # Example
//!
//! ```
//! use physics_core::alloc::StackAllocator;
//!
//! let stack = StackAllocator::new(1024, 4);
//! {
//!     let mut a = stack.allocate::<u32>(8).unwrap();
//!     a.push(7);
//!     assert_eq!(stack.entry_count(), 1);
//! }
//! assert_eq!(stack.used(), 0);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use nalgebra::{Point3, Vector3};
use physics_types::{AllocatorConfig, PhysicsError, Result};
use tracing::{error, warn};

// ============================================================================
// Stack allocator
// ============================================================================

#[derive(Debug)]
struct StackEntry {
    size: usize,
    released: bool,
}

#[derive(Debug)]
struct StackState {
    capacity: usize,
    max_entries: usize,
    used: usize,
    peak: usize,
    entries: Vec<StackEntry>,
}

impl StackState {
    fn release(&mut self, depth: usize) {
        let Some(entry) = self.entries.get_mut(depth) else {
            return;
        };
        entry.released = true;

        if depth + 1 != self.entries.len() {
            warn!(
                depth,
                top = self.entries.len() - 1,
                "stack allocation released out of order; deferring rewind"
            );
        }

        while self.entries.last().is_some_and(|e| e.released) {
            if let Some(top) = self.entries.pop() {
                self.used -= top.size;
            }
        }
    }
}

/// LIFO scratch allocator with a byte budget.
///
/// Every allocation records an entry; entries are released in reverse order
/// when their [`StackVec`] guards drop. Storage for each entry is a bounded
/// vector whose capacity never grows past what was requested.
#[derive(Clone)]
pub struct StackAllocator {
    state: Rc<RefCell<StackState>>,
}

impl fmt::Debug for StackAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("StackAllocator")
            .field("capacity", &state.capacity)
            .field("used", &state.used)
            .field("entries", &state.entries.len())
            .finish()
    }
}

impl StackAllocator {
    /// Default byte budget (10 MiB).
    pub const DEFAULT_CAPACITY: usize = 10 * 1024 * 1024;
    /// Default maximum number of outstanding allocations.
    pub const DEFAULT_MAX_ENTRIES: usize = 32;

    /// Create a stack with the given byte budget and entry limit.
    #[must_use]
    pub fn new(capacity: usize, max_entries: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(StackState {
                capacity,
                max_entries,
                used: 0,
                peak: 0,
                entries: Vec::with_capacity(max_entries),
            })),
        }
    }

    /// Reserve room for `len` values of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`PhysicsError::StackEntriesExhausted`] when the entry limit is
    /// reached and [`PhysicsError::StackExhausted`] when the byte budget is.
    pub fn allocate<T>(&self, len: usize) -> Result<StackVec<T>> {
        let mut state = self.state.borrow_mut();

        if state.entries.len() >= state.max_entries {
            error!(max = state.max_entries, "stack allocator entry limit reached");
            return Err(PhysicsError::StackEntriesExhausted {
                max: state.max_entries,
            });
        }

        let remaining = state.capacity - state.used;
        let size = len
            .checked_mul(std::mem::size_of::<T>())
            .filter(|&bytes| bytes <= remaining)
            .ok_or_else(|| {
                let requested = len.saturating_mul(std::mem::size_of::<T>());
                error!(requested, remaining, "stack allocator exhausted");
                PhysicsError::StackExhausted {
                    requested,
                    remaining,
                }
            })?;

        state.used += size;
        state.peak = state.peak.max(state.used);
        state.entries.push(StackEntry {
            size,
            released: false,
        });
        let depth = state.entries.len() - 1;
        drop(state);

        Ok(StackVec {
            items: Vec::with_capacity(len),
            capacity: len,
            depth,
            state: Rc::clone(&self.state),
        })
    }

    /// Bytes currently reserved.
    #[must_use]
    pub fn used(&self) -> usize {
        self.state.borrow().used
    }

    /// Highest number of bytes reserved at once.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.state.borrow().peak
    }

    /// Total byte budget.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.borrow().capacity
    }

    /// Number of outstanding entries (including deferred out-of-order releases).
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.state.borrow().entries.len()
    }
}

impl Default for StackAllocator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY, Self::DEFAULT_MAX_ENTRIES)
    }
}

/// Fixed-capacity buffer carved from a [`StackAllocator`].
///
/// Dereferences to a slice of the values pushed so far.
pub struct StackVec<T> {
    items: Vec<T>,
    capacity: usize,
    depth: usize,
    state: Rc<RefCell<StackState>>,
}

impl<T> StackVec<T> {
    /// Append a value.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is full.
    pub fn push(&mut self, value: T) {
        assert!(
            self.items.len() < self.capacity,
            "stack buffer overflow: capacity {}",
            self.capacity
        );
        self.items.push(value);
    }

    /// Remove and return the last value.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    /// Remove the value at `index`, replacing it with the last one.
    pub fn swap_remove(&mut self, index: usize) -> T {
        self.items.swap_remove(index)
    }

    /// Drop all values, keeping the reservation.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Number of values this buffer can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether no more values fit.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }
}

impl<T> Deref for StackVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> DerefMut for StackVec<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.items
    }
}

impl<T: fmt::Debug> fmt::Debug for StackVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

impl<T> Drop for StackVec<T> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.release(self.depth);
        }
    }
}

// ============================================================================
// Block allocator
// ============================================================================

/// Block sizes in bytes served from free lists.
pub const BLOCK_SIZES: [usize; 16] = [
    16, 32, 64, 96, 128, 160, 192, 224, 256, 320, 384, 448, 512, 1024, 2048, 4096,
];

#[derive(Debug)]
struct SizeClass<T> {
    block_bytes: usize,
    free: Vec<Vec<T>>,
    /// Bytes left in the chunk currently being carved for this class.
    unreserved: usize,
}

#[derive(Debug)]
struct BlockPool<T> {
    classes: Vec<SizeClass<T>>,
    chunk_size: usize,
    chunk_count: usize,
}

/// Segregated free-list allocator for values of type `T`.
///
/// Requests are rounded up to one of the [`BLOCK_SIZES`] classes. A class
/// with no free block reserves a new chunk and carves blocks from it; freed
/// blocks go back onto their class list and are reused as-is. Chunks are only
/// reclaimed when the allocator and all its blocks are gone. Requests larger
/// than the biggest class bypass the free lists.
pub struct BlockAllocator<T> {
    pool: Rc<RefCell<BlockPool<T>>>,
}

impl<T> Clone for BlockAllocator<T> {
    fn clone(&self) -> Self {
        Self {
            pool: Rc::clone(&self.pool),
        }
    }
}

impl<T> fmt::Debug for BlockAllocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.pool.borrow();
        f.debug_struct("BlockAllocator")
            .field("classes", &pool.classes.len())
            .field("chunk_count", &pool.chunk_count)
            .finish()
    }
}

impl<T> Default for BlockAllocator<T> {
    fn default() -> Self {
        Self::new(1024 * 1024, 4096)
    }
}

impl<T> BlockAllocator<T> {
    /// Create an allocator reserving `chunk_size` bytes at a time and serving
    /// requests up to `max_block_size` bytes from its free lists.
    #[must_use]
    pub fn new(chunk_size: usize, max_block_size: usize) -> Self {
        let classes = BLOCK_SIZES
            .iter()
            .filter(|&&bytes| bytes <= max_block_size && bytes <= chunk_size)
            .map(|&block_bytes| SizeClass {
                block_bytes,
                free: Vec::new(),
                unreserved: 0,
            })
            .collect();

        Self {
            pool: Rc::new(RefCell::new(BlockPool {
                classes,
                chunk_size,
                chunk_count: 0,
            })),
        }
    }

    /// Take a block able to hold at least `len` values.
    #[must_use]
    pub fn allocate(&self, len: usize) -> Block<T> {
        let elem = std::mem::size_of::<T>().max(1);
        let bytes = len.saturating_mul(elem);

        let mut guard = self.pool.borrow_mut();
        let pool = &mut *guard;
        let Some(class_index) = pool.classes.iter().position(|c| c.block_bytes >= bytes) else {
            drop(guard);
            return Block {
                items: Vec::with_capacity(len),
                capacity: len,
                class: None,
                pool: Rc::clone(&self.pool),
            };
        };

        let class = &mut pool.classes[class_index];
        let capacity = class.block_bytes / elem;
        let items = if let Some(items) = class.free.pop() {
            items
        } else {
            if class.unreserved < class.block_bytes {
                class.unreserved = pool.chunk_size - pool.chunk_size % class.block_bytes;
                pool.chunk_count += 1;
            }
            class.unreserved -= class.block_bytes;
            Vec::with_capacity(capacity)
        };
        drop(guard);

        Block {
            items,
            capacity,
            class: Some(class_index),
            pool: Rc::clone(&self.pool),
        }
    }

    /// Number of chunks reserved so far.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.pool.borrow().chunk_count
    }

    /// Number of free blocks waiting in the class serving `bytes`.
    #[must_use]
    pub fn free_block_count(&self, bytes: usize) -> usize {
        self.pool
            .borrow()
            .classes
            .iter()
            .find(|c| c.block_bytes >= bytes)
            .map_or(0, |c| c.free.len())
    }
}

/// A block from a [`BlockAllocator`], returned to its free list on drop.
pub struct Block<T> {
    items: Vec<T>,
    capacity: usize,
    class: Option<usize>,
    pool: Rc<RefCell<BlockPool<T>>>,
}

impl<T> Block<T> {
    /// Append a value.
    ///
    /// # Panics
    ///
    /// Panics if the block is full.
    pub fn push(&mut self, value: T) {
        assert!(
            self.items.len() < self.capacity,
            "block overflow: capacity {}",
            self.capacity
        );
        self.items.push(value);
    }

    /// Number of values this block can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Address of the backing storage, stable while the block is reused.
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.items.as_ptr()
    }
}

impl<T> Deref for Block<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> DerefMut for Block<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.items
    }
}

impl<T: fmt::Debug> fmt::Debug for Block<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

impl<T> Drop for Block<T> {
    fn drop(&mut self) {
        let Some(class) = self.class else {
            return;
        };
        let mut items = std::mem::take(&mut self.items);
        items.clear();
        if let Ok(mut pool) = self.pool.try_borrow_mut() {
            if let Some(class) = pool.classes.get_mut(class) {
                class.free.push(items);
            }
        }
    }
}

// ============================================================================
// Physics context
// ============================================================================

/// Scratch memory owned by a world and threaded through one step.
///
/// Replaces process-wide allocator singletons: each world owns its context,
/// and the narrow phase and solver borrow it explicitly.
#[derive(Debug, Clone, Default)]
pub struct PhysicsContext {
    /// LIFO scratch for per-step arrays.
    pub stack: StackAllocator,
    /// Blocks for world-space shape vertices.
    pub points: BlockAllocator<Point3<f64>>,
    /// Blocks for world-space shape axes.
    pub vectors: BlockAllocator<Vector3<f64>>,
}

impl PhysicsContext {
    /// Create a context sized by `config`.
    #[must_use]
    pub fn new(config: &AllocatorConfig) -> Self {
        Self {
            stack: StackAllocator::new(config.stack_capacity, config.max_stack_entries),
            points: BlockAllocator::new(config.block_chunk_size, config.max_block_size),
            vectors: BlockAllocator::new(config.block_chunk_size, config.max_block_size),
        }
    }
}
