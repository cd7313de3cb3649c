//! Block arena with typed pools, and a pool of arenas for reuse across
//! evaluations.

use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::types::Value;

/// Size of a regular block, in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

const ALIGN: usize = 8;
const F64_POOL: usize = 128;
const BOOL_POOL: usize = 32;
const STRING_POOL: usize = 64;
const VALUE_POOL: usize = 64;
const MAX_IDLE_ARENAS: usize = 16;

/// Location of a byte allocation inside an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub block: usize,
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub blocks_allocated: usize,
    pub bytes_allocated: usize,
    pub bytes_used: usize,
    pub allocations: usize,
    pub strings_interned: usize,
}

struct Block {
    data: Box<[u8]>,
    used: usize,
}

impl Block {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0; size].into_boxed_slice(),
            used: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.used
    }
}

struct Inner {
    block_size: usize,
    blocks: Vec<Block>,
    current: usize,
    f64s: Vec<f64>,
    bools: Vec<bool>,
    strings: Vec<Arc<str>>,
    values: Vec<Value>,
    interned: HashSet<Arc<str>>,
    stats: ArenaStats,
}

fn round_up(n: usize) -> usize {
    n.div_ceil(ALIGN) * ALIGN
}

impl Inner {
    fn new(block_size: usize) -> Self {
        Self {
            block_size,
            blocks: vec![Block::new(block_size)],
            current: 0,
            f64s: Vec::with_capacity(F64_POOL),
            bools: Vec::with_capacity(BOOL_POOL),
            strings: Vec::with_capacity(STRING_POOL),
            values: Vec::with_capacity(VALUE_POOL),
            interned: HashSet::new(),
            stats: ArenaStats {
                blocks_allocated: 1,
                bytes_allocated: block_size,
                ..ArenaStats::default()
            },
        }
    }

    fn push_block(&mut self, size: usize) -> usize {
        self.blocks.push(Block::new(size));
        self.stats.blocks_allocated += 1;
        self.stats.bytes_allocated += size;
        self.blocks.len() - 1
    }

    fn alloc(&mut self, n: usize) -> Allocation {
        let len = round_up(n);
        self.stats.allocations += 1;
        self.stats.bytes_used += len;

        if len > self.block_size {
            let block = self.push_block(len);
            self.blocks[block].used = len;
            return Allocation {
                block,
                offset: 0,
                len,
            };
        }
        if self.blocks[self.current].remaining() < len {
            self.current = self.push_block(self.block_size);
        }
        let block = &mut self.blocks[self.current];
        let offset = block.used;
        block.used += len;
        Allocation {
            block: self.current,
            offset,
            len,
        }
    }

    fn reset(&mut self) {
        self.blocks.truncate(1);
        if let Some(first) = self.blocks.first_mut() {
            first.used = 0;
            first.data.fill(0);
        }
        self.current = 0;
        self.f64s.clear();
        self.bools.clear();
        self.strings.clear();
        self.values.clear();
        self.interned.clear();
        self.stats = ArenaStats {
            blocks_allocated: 1,
            bytes_allocated: self.block_size,
            ..ArenaStats::default()
        };
    }
}

/// Bump allocator over fixed-size byte blocks, with typed pools for
/// numbers, booleans, strings and values. Internally locked, so one arena
/// can be shared by the workers of a batch.
///
/// Typed helpers fill their pool first and charge block bytes once the
/// pool's preallocated capacity is used up.
pub struct Arena {
    inner: Mutex<Inner>,
}

impl Arena {
    #[must_use]
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    #[must_use]
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::new(round_up(block_size.max(ALIGN)))),
        }
    }

    /// Reserve `n` bytes, rounded up to a multiple of 8. Requests larger
    /// than a block get a dedicated block.
    pub fn alloc(&self, n: usize) -> Allocation {
        self.inner.lock().alloc(n)
    }

    /// Store a number; returns its slot in the number pool.
    pub fn alloc_f64(&self, v: f64) -> usize {
        let mut inner = self.inner.lock();
        if inner.f64s.len() >= F64_POOL {
            let a = inner.alloc(std::mem::size_of::<f64>());
            let start = a.offset;
            inner.blocks[a.block].data[start..start + 8].copy_from_slice(&v.to_le_bytes());
        } else {
            inner.stats.allocations += 1;
        }
        inner.f64s.push(v);
        inner.f64s.len() - 1
    }

    #[must_use]
    pub fn f64_at(&self, slot: usize) -> Option<f64> {
        self.inner.lock().f64s.get(slot).copied()
    }

    /// Store a boolean; returns its slot in the boolean pool.
    pub fn alloc_bool(&self, v: bool) -> usize {
        let mut inner = self.inner.lock();
        if inner.bools.len() >= BOOL_POOL {
            inner.alloc(1);
        } else {
            inner.stats.allocations += 1;
        }
        inner.bools.push(v);
        inner.bools.len() - 1
    }

    #[must_use]
    pub fn bool_at(&self, slot: usize) -> Option<bool> {
        self.inner.lock().bools.get(slot).copied()
    }

    /// Intern `s` in this arena. Equal inputs return the same allocation
    /// until the next `reset`.
    pub fn alloc_string(&self, s: &str) -> Arc<str> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.interned.get(s) {
            return Arc::clone(existing);
        }
        if inner.strings.len() >= STRING_POOL {
            inner.alloc(s.len());
        } else {
            inner.stats.allocations += 1;
        }
        let interned: Arc<str> = Arc::from(s);
        inner.strings.push(Arc::clone(&interned));
        inner.interned.insert(Arc::clone(&interned));
        inner.stats.strings_interned += 1;
        interned
    }

    /// Store a value; returns its slot in the value pool.
    pub fn alloc_value(&self, v: Value) -> usize {
        let mut inner = self.inner.lock();
        if inner.values.len() >= VALUE_POOL {
            inner.alloc(v.memory_estimate());
        } else {
            inner.stats.allocations += 1;
        }
        inner.values.push(v);
        inner.values.len() - 1
    }

    #[must_use]
    pub fn value_at(&self, slot: usize) -> Option<Value> {
        self.inner.lock().values.get(slot).cloned()
    }

    /// Release everything but the first block and clear the pools, the
    /// intern map and the metrics.
    pub fn reset(&self) {
        self.inner.lock().reset();
    }

    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        self.inner.lock().stats
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.inner.lock().block_size
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena").field("stats", &self.stats()).finish()
    }
}

/// Idle arenas waiting for reuse.
#[derive(Debug)]
pub struct ArenaPool {
    block_size: usize,
    idle: Mutex<Vec<Arena>>,
}

static GLOBAL_POOL: Lazy<ArenaPool> = Lazy::new(|| ArenaPool::new(DEFAULT_BLOCK_SIZE));

impl ArenaPool {
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide pool with 64 KiB blocks.
    #[must_use]
    pub fn global() -> &'static ArenaPool {
        &GLOBAL_POOL
    }

    /// Take an idle arena or create a fresh one.
    #[must_use]
    pub fn get(&self) -> Arena {
        let reused = self.idle.lock().pop();
        match reused {
            Some(arena) => {
                log::trace!("arena pool: reusing an idle arena");
                arena
            }
            None => {
                log::trace!("arena pool: creating an arena");
                Arena::with_block_size(self.block_size)
            }
        }
    }

    /// Reset `arena` and keep it for reuse.
    pub fn put(&self, arena: Arena) {
        arena.reset();
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_ARENAS {
            idle.push(arena);
        }
    }

    /// Borrow an arena that returns to the pool when the guard drops.
    #[must_use]
    pub fn acquire(&self) -> PooledArena<'_> {
        PooledArena {
            pool: self,
            arena: Some(self.get()),
        }
    }

    /// Run `f` with a pooled arena, returning it afterwards on every path.
    pub fn with_arena<R>(&self, f: impl FnOnce(&Arena) -> R) -> R {
        let guard = self.acquire();
        f(&guard)
    }

    #[must_use]
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

impl Default for ArenaPool {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

/// RAII handle from [`ArenaPool::acquire`].
#[derive(Debug)]
pub struct PooledArena<'p> {
    pool: &'p ArenaPool,
    arena: Option<Arena>,
}

impl Deref for PooledArena<'_> {
    type Target = Arena;

    fn deref(&self) -> &Arena {
        match &self.arena {
            Some(arena) => arena,
            None => unreachable!("arena is only taken in drop"),
        }
    }
}

impl Drop for PooledArena<'_> {
    fn drop(&mut self) {
        if let Some(arena) = self.arena.take() {
            self.pool.put(arena);
        }
    }
}
