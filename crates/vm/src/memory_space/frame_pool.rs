//! 活跃帧列表与时钟置换
//!
//! 列表中记录的是驻留页的页号，帧本身由页描述符持有

use alloc::vec::Vec;

use super::page_table::PageTable;
use crate::VirtPageNum;

#[derive(Default)]
pub struct FramePool {
    active: Vec<VirtPageNum>,
    /// 时钟指针，指向下一个要检查的页
    hand: usize,
}

impl FramePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新驻留的页放在指针之前，即一圈中最后被检查
    pub fn push(&mut self, vpn: VirtPageNum) {
        debug_assert!(!self.active.contains(&vpn), "{vpn:?} is already active");
        let pos = self.hand.min(self.active.len());
        self.active.insert(pos, vpn);
        self.hand = pos + 1;
    }

    pub fn remove(&mut self, vpn: VirtPageNum) -> bool {
        let Some(pos) = self.active.iter().position(|&active| active == vpn) else {
            return false;
        };
        self.take(pos);
        true
    }

    fn take(&mut self, pos: usize) -> VirtPageNum {
        if pos < self.hand {
            self.hand -= 1;
        }
        self.active.remove(pos)
    }

    /// 选出一个牺牲页并将其移出列表
    ///
    /// 访问位被置位的页清除访问位后跳过。转了一圈都没有找到时，选择起始位置的页
    pub fn select_victim(&mut self, page_table: &mut PageTable) -> Option<VirtPageNum> {
        let len = self.active.len();
        if len == 0 {
            return None;
        }
        self.hand %= len;
        let start = self.hand;
        for _ in 0..len {
            let vpn = self.active[self.hand];
            if !page_table.is_accessed(vpn) {
                return Some(self.take(self.hand));
            }
            page_table.clear_accessed(vpn);
            self.hand = (self.hand + 1) % len;
        }
        Some(self.take(start))
    }

    pub fn contains(&self, vpn: VirtPageNum) -> bool {
        self.active.contains(&vpn)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.hand = 0;
    }
}
