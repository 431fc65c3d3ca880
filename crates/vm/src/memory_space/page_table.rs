//! Implementation of [`PageTableEntry`] and [`PageTable`].
//!
//! 软件模拟的单级页表。访问位与脏位由 [`PageTable::touch`] 模拟硬件设置

use bitflags::bitflags;
use defines::error::{errno, KResult};
use hashbrown::HashMap;

use crate::{PhysPageNum, VirtPageNum};

bitflags! {
    /// page table entry flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PTEFlags: u16 {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const U = 1 << 4;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

/// page table entry structure
#[derive(Copy, Clone, Debug)]
#[repr(C)]
pub struct PageTableEntry {
    bits: usize,
}

impl PageTableEntry {
    pub fn new(ppn: PhysPageNum, flags: PTEFlags) -> Self {
        PageTableEntry {
            bits: ppn.0 << 10 | flags.bits() as usize,
        }
    }

    pub fn ppn(&self) -> PhysPageNum {
        const LOW_44_MASK: usize = (1 << 44) - 1;
        PhysPageNum((self.bits >> 10) & LOW_44_MASK)
    }

    pub fn flags(&self) -> PTEFlags {
        PTEFlags::from_bits_truncate(self.bits as u16)
    }

    pub fn is_valid(&self) -> bool {
        self.flags().contains(PTEFlags::V)
    }

    fn set_flags(&mut self, flags: PTEFlags) {
        *self = Self::new(self.ppn(), flags);
    }
}

/// 访存失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFault {
    /// 页表项不存在
    NotPresent,
    /// 页表项存在，但权限不足（如写只读页）
    Protection,
}

/// 一个地址空间的页表，只包含用户页
pub struct PageTable {
    entries: HashMap<VirtPageNum, PageTableEntry>,
}

impl PageTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn install_mapping(&mut self, vpn: VirtPageNum, ppn: PhysPageNum, writable: bool) -> KResult<()> {
        if self.entries.get(&vpn).is_some_and(PageTableEntry::is_valid) {
            return Err(errno::EEXIST);
        }
        let mut flags = PTEFlags::V | PTEFlags::R | PTEFlags::U;
        if writable {
            flags |= PTEFlags::W;
        }
        self.entries.insert(vpn, PageTableEntry::new(ppn, flags));
        Ok(())
    }

    /// 返回被清除的页表项
    pub fn clear_mapping(&mut self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.entries.remove(&vpn)
    }

    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.entries.get(&vpn).copied()
    }

    fn has_flag(&self, vpn: VirtPageNum, flag: PTEFlags) -> bool {
        self.entries.get(&vpn).is_some_and(|pte| pte.flags().contains(flag))
    }

    fn update_flag(&mut self, vpn: VirtPageNum, flag: PTEFlags, value: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            let mut flags = pte.flags();
            flags.set(flag, value);
            pte.set_flags(flags);
        }
    }

    pub fn is_accessed(&self, vpn: VirtPageNum) -> bool {
        self.has_flag(vpn, PTEFlags::A)
    }

    pub fn clear_accessed(&mut self, vpn: VirtPageNum) {
        self.update_flag(vpn, PTEFlags::A, false);
    }

    pub fn is_dirty(&self, vpn: VirtPageNum) -> bool {
        self.has_flag(vpn, PTEFlags::D)
    }

    pub fn clear_dirty(&mut self, vpn: VirtPageNum) {
        self.update_flag(vpn, PTEFlags::D, false);
    }

    /// fork 时子进程继承父进程页的脏状态
    pub fn set_dirty(&mut self, vpn: VirtPageNum) {
        self.update_flag(vpn, PTEFlags::D, true);
    }

    /// 模拟一次硬件访存：检查权限，并设置访问位（写时还有脏位）
    pub fn touch(&mut self, vpn: VirtPageNum, write: bool) -> Result<PhysPageNum, AccessFault> {
        let pte = self
            .entries
            .get_mut(&vpn)
            .filter(|pte| pte.is_valid())
            .ok_or(AccessFault::NotPresent)?;
        let mut flags = pte.flags();
        if write && !flags.contains(PTEFlags::W) {
            return Err(AccessFault::Protection);
        }
        flags |= PTEFlags::A;
        if write {
            flags |= PTEFlags::D;
        }
        pte.set_flags(flags);
        Ok(pte.ppn())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}
