//! 按需分页的用户虚拟内存管理
//!
//! 每个 [`AddressSpace`] 拥有自己的补充页表（[`SupplementalPageTable`]）、活跃帧列表和页表。
//! 物理帧（[`FrameAllocator`]）与交换空间（[`SwapSpace`]）可被多个地址空间共享。
//!
//! [`SupplementalPageTable`]: memory_space::SupplementalPageTable

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

mod address;
pub mod backing;
mod frame_allocator;
pub mod memory_space;
pub mod page;
#[cfg(test)]
mod testing;

pub use address::{PhysPageNum, VirtAddr, VirtPageNum};
pub use backing::{
    anon::{SwapSlot, SwapSpace},
    BackingFile, BlockDevice, DeviceHandle, FileHandle,
};
pub use frame_allocator::{Frame, FrameAllocator};
pub use memory_space::{AddressSpace, FaultInfo};
pub use page::{BackingKind, BlockSegment, FileSegment, LazyInit, PageInfo};
