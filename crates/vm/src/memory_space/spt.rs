//! 补充页表：虚拟页号到页描述符的映射，拥有地址空间中的所有页描述符

use defines::error::{errno, KResult};
use hashbrown::{hash_map::Entry, HashMap};

use crate::{
    page::{BackingKind, LazyInit, Page},
    VirtAddr, VirtPageNum,
};

#[derive(Default)]
pub struct SupplementalPageTable {
    pages: HashMap<VirtPageNum, Page>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建一个未初始化的页。该地址已有页时返回 `EEXIST`，不会覆盖
    pub fn allocate(
        &mut self,
        vpn: VirtPageNum,
        writable: bool,
        target: BackingKind,
        init: LazyInit,
    ) -> KResult<&mut Page> {
        if self.pages.contains_key(&vpn) {
            return Err(errno::EEXIST);
        }
        self.insert(Page::new(vpn, writable, target, init)?)
    }

    pub(crate) fn insert(&mut self, page: Page) -> KResult<&mut Page> {
        match self.pages.entry(page.vpn()) {
            Entry::Occupied(_) => Err(errno::EEXIST),
            Entry::Vacant(entry) => Ok(entry.insert(page)),
        }
    }

    /// 地址会先向下取整到页
    pub fn lookup(&self, va: VirtAddr) -> Option<&Page> {
        self.pages.get(&va.vpn_floor())
    }

    pub fn get(&self, vpn: VirtPageNum) -> Option<&Page> {
        self.pages.get(&vpn)
    }

    pub(crate) fn get_mut(&mut self, vpn: VirtPageNum) -> Option<&mut Page> {
        self.pages.get_mut(&vpn)
    }

    pub fn contains(&self, vpn: VirtPageNum) -> bool {
        self.pages.contains_key(&vpn)
    }

    /// 只是把页从表中取出，释放资源由调用者负责
    pub(crate) fn remove(&mut self, vpn: VirtPageNum) -> Option<Page> {
        self.pages.remove(&vpn)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Page> + '_ {
        self.pages.drain().map(|(_, page)| page)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
