use alloc::vec::Vec;

use common::config::{LOW_ADDRESS_END, PAGE_SIZE};
use defines::error::{errno, KResult};
use smallvec::SmallVec;

use super::{insert_all, AddressSpace};
use crate::{
    backing::{file::Mapping, FileHandle},
    page::{BackingKind, FileSegment, LazyInit, Page, PageKind},
    Frame, VirtAddr, VirtPageNum,
};

impl AddressSpace {
    /// 将 `file` 从 `offset` 开始的 `length` 字节映射到 `addr`，返回映射的起始地址
    ///
    /// 映射中的页都是懒加载的，最后一页超出 `length` 的部分补零。
    /// 任何一页已被占用时返回 `EEXIST`，此时不会创建任何页
    pub fn map_file(
        &self,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        file: &FileHandle,
        offset: usize,
    ) -> KResult<VirtAddr> {
        if addr.0 == 0 || !addr.is_page_aligned() || offset % PAGE_SIZE != 0 || length == 0 {
            return Err(errno::EINVAL);
        }
        let end = addr
            .0
            .checked_add(length)
            .filter(|&end| end <= LOW_ADDRESS_END)
            .ok_or(errno::EINVAL)?;

        let mut spt = self.spt.lock();
        let vpns = (addr.vpn_floor().0..VirtAddr(end).vpn_ceil().0).map(VirtPageNum);
        if vpns.clone().any(|vpn| spt.contains(vpn)) {
            debug!("mmap {addr:?}..{:?} overlaps existing pages", VirtAddr(end));
            return Err(errno::EEXIST);
        }

        // 映射持有自己的句柄，不受调用者关闭文件的影响
        let file = file.reopen()?;
        let mut pages = Vec::with_capacity(vpns.len());
        let mut remaining = length;
        for (i, vpn) in vpns.enumerate() {
            let read_bytes = remaining.min(PAGE_SIZE);
            let segment = FileSegment {
                file: FileHandle::clone(&file),
                offset: offset + i * PAGE_SIZE,
                read_bytes,
            };
            let mut page = Page::new(vpn, writable, BackingKind::FileBacked, LazyInit::File(segment))?;
            page.set_mapping(addr);
            pages.push(page);
            remaining -= read_bytes;
        }
        let vpn_list = pages.iter().map(Page::vpn).collect();
        insert_all(&mut spt, pages)?;
        self.mappings
            .lock()
            .insert(addr, Mapping::new(addr, length, file, vpn_list));
        debug!("mmap {addr:?}..{:?}, offset: {offset:#x}", VirtAddr(end));
        Ok(addr)
    }

    /// 撤销起始地址为 `addr` 的映射，脏页写回文件。没有这样的映射时什么都不做
    ///
    /// 写回时不持有补充页表的锁，此前所有页都已被标记为 unmapped，
    /// 并发的缺页会被拒绝
    pub fn unmap(&self, addr: VirtAddr) -> KResult<()> {
        let mut writebacks = SmallVec::<[(PageKind, Frame); 4]>::new();
        let mapping = {
            let mut spt = self.spt.lock();
            let Some(mapping) = self.mappings.lock().remove(&addr) else {
                trace!("unmap {addr:?}: no such mapping");
                return Ok(());
            };
            for &vpn in mapping.pages() {
                // 页可能已被单独移除，原地址上又创建了别的页
                let Some(page) = spt
                    .get_mut(vpn)
                    .filter(|page| page.mapping() == Some(addr) && !page.is_unmapped())
                else {
                    continue;
                };
                page.mark_unmapped();
                let Some(frame) = page.frame.take() else {
                    continue;
                };
                self.pool.lock().remove(vpn);
                let dirty = {
                    let mut page_table = self.page_table.lock();
                    let dirty = page_table.is_dirty(vpn);
                    page_table.clear_mapping(vpn);
                    dirty
                };
                if dirty {
                    if let PageKind::File(file_page) = &page.kind {
                        writebacks.push((PageKind::File(file_page.clone()), frame));
                    }
                }
            }
            mapping
        };

        let mut result = Ok(());
        for (kind, frame) in writebacks {
            if let Err(e) = kind.write_back(&frame, true) {
                warn!("fail to write back {:?} on unmap: {e}", frame.owner());
                result = Err(e);
            }
        }

        let mut spt = self.spt.lock();
        for &vpn in mapping.pages() {
            let ours = spt
                .get(vpn)
                .is_some_and(|page| page.mapping() == Some(addr) && page.is_unmapped());
            let Some(page) = ours.then(|| spt.remove(vpn)).flatten() else {
                continue;
            };
            debug_assert!(!page.is_resident());
            if let Err(e) = self.destroy_page(page) {
                warn!("fail to destroy {vpn:?} on unmap: {e}");
                result = Err(e);
            }
        }
        debug!("munmap {addr:?}, {} pages", mapping.pages().len());
        result
    }
}
