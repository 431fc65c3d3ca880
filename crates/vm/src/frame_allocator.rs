//! Implementation of [`FrameAllocator`] which
//! controls all the frames of user memory.
//!
//! 帧的数量在创建时决定，分配失败时由地址空间负责换出页

use alloc::boxed::Box;
use core::fmt;

use common::config::PAGE_SIZE;
use idallocator::RecycleAllocator;
use klocks::SpinMutex;
use triomphe::Arc;

use crate::{PhysPageNum, VirtPageNum};

pub struct FrameAllocator {
    ppns: SpinMutex<RecycleAllocator>,
    capacity: usize,
}

impl FrameAllocator {
    /// 管理 `capacity` 个物理帧
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            ppns: SpinMutex::new(RecycleAllocator::with_range(0, capacity)),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_frames(&self) -> usize {
        self.ppns.lock().remaining()
    }
}

pub struct Frame {
    ppn: PhysPageNum,
    /// 拥有这个帧的页，只用于换出时的反查
    owner: Option<VirtPageNum>,
    data: Box<[u8; PAGE_SIZE]>,
    allocator: Arc<FrameAllocator>,
}

impl Frame {
    /// 分配一个清零的帧，帧耗尽时返回 `None`
    pub fn alloc(allocator: &Arc<FrameAllocator>) -> Option<Self> {
        let ppn = allocator.ppns.lock().alloc()?;
        Some(Self {
            ppn: PhysPageNum(ppn),
            owner: None,
            data: Box::new([0; PAGE_SIZE]),
            allocator: Arc::clone(allocator),
        })
    }

    pub fn ppn(&self) -> PhysPageNum {
        self.ppn
    }

    pub fn owner(&self) -> Option<VirtPageNum> {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: Option<VirtPageNum>) {
        self.owner = owner;
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn as_page_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn as_page_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("ppn", &self.ppn)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.allocator.ppns.lock().dealloc(self.ppn.0);
    }
}
