//! Fixed-capacity tree id pool.
//!
//! Tree ids identify nested UI surfaces within a window. The pool is a
//! bitset over `[1, capacity]`; allocation is first-fit starting just past
//! the previous allocation, wrapping at capacity, so id assignment stays
//! deterministic under test.

use reach_protocol::TreeId;

/// Allocator for tree ids.
pub struct TreeIdPool {
    bits: Vec<u64>,
    capacity: usize,
    allocated: usize,
    last: usize,
}

impl TreeIdPool {
    /// A pool issuing ids from `[1, capacity]`.
    pub fn new(capacity: i32) -> Self {
        let capacity = capacity.max(1) as usize;
        TreeIdPool {
            bits: vec![0; capacity.div_ceil(64)],
            capacity,
            allocated: 0,
            last: capacity - 1,
        }
    }

    fn test(&self, slot: usize) -> bool {
        self.bits[slot / 64] & (1 << (slot % 64)) != 0
    }

    fn set(&mut self, slot: usize, value: bool) {
        let mask = 1 << (slot % 64);
        if value {
            self.bits[slot / 64] |= mask;
        } else {
            self.bits[slot / 64] &= !mask;
        }
    }

    /// Allocates the next free id, or `None` when the pool is exhausted.
    pub fn allocate(&mut self) -> Option<TreeId> {
        if self.allocated == self.capacity {
            return None;
        }
        let mut slot = (self.last + 1) % self.capacity;
        for _ in 0..self.capacity {
            if !self.test(slot) {
                self.set(slot, true);
                self.allocated += 1;
                self.last = slot;
                return Some(slot as TreeId + 1);
            }
            slot = (slot + 1) % self.capacity;
        }
        None
    }

    /// Returns `id` to the pool. Recycling a free or out-of-range id is a
    /// no-op: crash cleanup may race explicit deregistration.
    pub fn recycle(&mut self, id: TreeId) {
        if id < 1 || id as usize > self.capacity {
            return;
        }
        let slot = (id - 1) as usize;
        if self.test(slot) {
            self.set(slot, false);
            self.allocated -= 1;
        }
    }

    pub fn free_count(&self) -> usize {
        self.capacity - self.allocated
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_starts_at_one_and_advances() {
        let mut pool = TreeIdPool::new(8);
        assert_eq!(pool.allocate(), Some(1));
        assert_eq!(pool.allocate(), Some(2));
    }

    #[test]
    fn test_allocate_then_recycle_keeps_free_count() {
        let mut pool = TreeIdPool::new(16);
        let before = pool.free_count();
        let id = pool.allocate().unwrap();
        pool.recycle(id);
        assert_eq!(pool.free_count(), before);
    }

    #[test]
    fn test_exhaustion_fails_the_next_allocation() {
        let mut pool = TreeIdPool::new(4);
        for expected in 1..=4 {
            assert_eq!(pool.allocate(), Some(expected));
        }
        assert_eq!(pool.allocate(), None);
        pool.recycle(2);
        assert_eq!(pool.allocate(), Some(2));
    }

    #[test]
    fn test_recycle_of_free_id_is_noop() {
        let mut pool = TreeIdPool::new(8);
        let id = pool.allocate().unwrap();
        pool.recycle(id);
        let free = pool.free_count();
        pool.recycle(id);
        pool.recycle(999);
        pool.recycle(0);
        assert_eq!(pool.free_count(), free);
    }

    #[test]
    fn test_allocation_resumes_past_last_issued_id() {
        let mut pool = TreeIdPool::new(4);
        let first = pool.allocate().unwrap();
        pool.recycle(first);
        // First-fit from the last position: the freed slot is not reused
        // until the scan wraps around to it.
        assert_eq!(pool.allocate(), Some(2));
        assert_eq!(pool.allocate(), Some(3));
        assert_eq!(pool.allocate(), Some(4));
        assert_eq!(pool.allocate(), Some(1));
    }
}
