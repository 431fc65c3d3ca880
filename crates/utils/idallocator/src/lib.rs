#![cfg_attr(not(test), no_std)]

use alloc::vec::Vec;

extern crate alloc;

/// 基于回收的分配器，即用 vector 收集释放的 id
///
/// 可以设定上限，分配出的 id 总在 `[begin, limit)` 内
#[derive(Clone)]
pub struct RecycleAllocator {
    current: usize,
    limit: usize,
    recycled: Vec<usize>,
}

impl RecycleAllocator {
    /// 只分配 `[begin, limit)` 内的 id
    pub const fn with_range(begin: usize, limit: usize) -> Self {
        RecycleAllocator {
            current: begin,
            limit,
            recycled: Vec::new(),
        }
    }

    /// id 耗尽时返回 `None`
    pub fn alloc(&mut self) -> Option<usize> {
        if let Some(id) = self.recycled.pop() {
            Some(id)
        } else if self.current < self.limit {
            self.current += 1;
            Some(self.current - 1)
        } else {
            None
        }
    }

    pub fn dealloc(&mut self, id: usize) {
        debug_assert!(id < self.current);
        debug_assert!(!self.recycled.iter().any(|i| *i == id), "id {id} has been deallocated!",);
        self.recycled.push(id);
    }

    /// 还能分配出的 id 数量
    pub fn remaining(&self) -> usize {
        self.limit - self.current + self.recycled.len()
    }
}
