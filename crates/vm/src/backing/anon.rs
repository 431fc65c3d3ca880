//! 匿名页与交换区
//!
//! 交换区按页划分为 slot，每个 slot 占 [`BLOCKS_PER_PAGE`] 个扇区，用位图记录占用情况。
//! 一个 slot 只会被一个匿名页持有，[`SwapSlot`] 析构时释放对应的位

use alloc::vec::Vec;

use common::config::{BLOCKS_PER_PAGE, PAGE_SIZE};
use defines::error::{errno, KResult};
use klocks::SpinMutex;
use triomphe::Arc;

use super::{read_page_blocks, write_page_blocks, DeviceHandle};
use crate::Frame;

pub struct SwapSpace {
    device: DeviceHandle,
    slots: SpinMutex<SlotBitmap>,
}

impl SwapSpace {
    /// 整个设备都用作交换区，多余的不足一页的扇区被忽略
    pub fn new(device: DeviceHandle) -> Arc<Self> {
        let num_slots = (device.num_blocks() / BLOCKS_PER_PAGE as u64) as usize;
        Arc::new(Self {
            device,
            slots: SpinMutex::new(SlotBitmap::new(num_slots)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len
    }

    pub fn used_slots(&self) -> usize {
        self.slots.lock().used
    }

    /// 将一页写入第一个空闲的 slot。没有空闲 slot 时返回 `ENOSPC`
    pub(crate) fn swap_out(this: &Arc<Self>, page: &[u8; PAGE_SIZE]) -> KResult<SwapSlot> {
        let index = this.slots.lock().alloc();
        let Some(index) = index else {
            error!("swap space exhausted, {} slots in use", this.capacity());
            return Err(errno::ENOSPC);
        };
        // 先构造出 slot，写入失败时随之释放
        let slot = SwapSlot {
            index,
            swap: Arc::clone(this),
        };
        write_page_blocks(&*this.device, slot.first_block(), page)?;
        debug!("swap out to slot {index}");
        Ok(slot)
    }
}

/// 一个被占用的 slot
pub struct SwapSlot {
    index: usize,
    swap: Arc<SwapSpace>,
}

impl SwapSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    fn first_block(&self) -> u64 {
        (self.index * BLOCKS_PER_PAGE) as u64
    }

    /// 读出 slot 的内容，但不释放它
    pub(crate) fn read(&self, page: &mut [u8; PAGE_SIZE]) -> KResult<()> {
        read_page_blocks(&*self.swap.device, self.first_block(), page)
    }
}

impl Drop for SwapSlot {
    fn drop(&mut self) {
        self.swap.slots.lock().dealloc(self.index);
    }
}

struct SlotBitmap {
    bits: Vec<u64>,
    len: usize,
    used: usize,
}

impl SlotBitmap {
    fn new(len: usize) -> Self {
        Self {
            bits: alloc::vec![0; len.div_ceil(64)],
            len,
            used: 0,
        }
    }

    /// 找到第一个为 0 的位并置 1
    fn alloc(&mut self) -> Option<usize> {
        let (pos, bits64) = self
            .bits
            .iter_mut()
            .enumerate()
            .find(|(_, bits64)| **bits64 != u64::MAX)?;
        let inner_pos = bits64.trailing_ones() as usize;
        let index = pos * 64 + inner_pos;
        // 最后一组中超出 len 的位不可用
        if index >= self.len {
            return None;
        }
        *bits64 |= 1 << inner_pos;
        self.used += 1;
        Some(index)
    }

    fn dealloc(&mut self, index: usize) {
        let (pos, inner_pos) = (index / 64, index % 64);
        debug_assert!(self.bits[pos] & (1 << inner_pos) != 0, "slot {index} is not in use");
        self.bits[pos] &= !(1 << inner_pos);
        self.used -= 1;
    }
}

/// 已经被初始化过的匿名页。不在内存中时，数据要么在交换区，要么全零
pub struct AnonPage {
    slot: Option<SwapSlot>,
}

impl AnonPage {
    pub(crate) fn new() -> Self {
        Self { slot: None }
    }

    pub fn slot(&self) -> Option<&SwapSlot> {
        self.slot.as_ref()
    }

    /// 把交换区中的数据读回帧中并释放 slot。没有 slot 时帧保持全零
    ///
    /// 读取失败时 slot 保留，数据不会丢失
    pub(crate) fn swap_in(&mut self, frame: &mut Frame) -> KResult<()> {
        let Some(slot) = &self.slot else {
            return Ok(());
        };
        slot.read(frame.as_page_bytes_mut())?;
        debug!("swap in from slot {}", slot.index());
        self.slot = None;
        Ok(())
    }

    /// 匿名页无论是否被修改过，换出时总是写入交换区
    pub(crate) fn swap_out(&mut self, swap: &Arc<SwapSpace>, frame: &Frame) -> KResult<()> {
        debug_assert!(self.slot.is_none(), "resident anonymous page holds a swap slot");
        self.slot = Some(SwapSpace::swap_out(swap, frame.as_page_bytes())?);
        Ok(())
    }
}
