//! 进程的用户地址空间
//!
//! 补充页表、活跃帧列表、页表都是地址空间的成员，各自由一把锁保护。
//! 需要同时持有多把锁时，按 `spt` → `mappings` → `pool` → `page_table` 的顺序获取

use alloc::{collections::BTreeMap, vec::Vec};

use common::config::{LOW_ADDRESS_END, PAGE_SIZE, USER_STACK_TOP};
use defines::error::{errno, KResult};
use klocks::SpinMutex;
use scopeguard::ScopeGuard;
use triomphe::Arc;

use self::{frame_pool::FramePool, page_table::PageTable};
use crate::{
    backing::file::Mapping,
    page::{BackingKind, FileSegment, LazyInit, Page, PageInfo},
    FileHandle, Frame, FrameAllocator, SwapSpace, VirtAddr, VirtPageNum,
};

mod fault;
mod fork;
pub mod frame_pool;
mod mmap;
pub mod page_table;
pub mod spt;
mod user_access;

pub use fault::FaultInfo;
pub use spt::SupplementalPageTable;

pub struct AddressSpace {
    spt: SpinMutex<SupplementalPageTable>,
    /// 起始地址映射到文件映射
    mappings: SpinMutex<BTreeMap<VirtAddr, Mapping>>,
    pool: SpinMutex<FramePool>,
    page_table: SpinMutex<PageTable>,
    frames: Arc<FrameAllocator>,
    swap: Arc<SwapSpace>,
}

impl AddressSpace {
    pub fn new(frames: Arc<FrameAllocator>, swap: Arc<SwapSpace>) -> Self {
        Self {
            spt: SpinMutex::new(SupplementalPageTable::new()),
            mappings: SpinMutex::new(BTreeMap::new()),
            pool: SpinMutex::new(FramePool::new()),
            page_table: SpinMutex::new(PageTable::new()),
            frames,
            swap,
        }
    }

    pub fn frame_allocator(&self) -> &Arc<FrameAllocator> {
        &self.frames
    }

    pub fn swap_space(&self) -> &Arc<SwapSpace> {
        &self.swap
    }

    /// 在 `va` 所在的页上创建一个未初始化的页，第一次缺页时才会分配帧
    pub fn alloc_page(&self, va: VirtAddr, writable: bool, target: BackingKind, init: LazyInit) -> KResult<()> {
        if !va.is_user() {
            return Err(errno::EINVAL);
        }
        self.spt.lock().allocate(va.vpn_floor(), writable, target, init)?;
        Ok(())
    }

    /// 立刻为 `va` 所在的页分配帧并填充
    pub fn claim_page(&self, va: VirtAddr) -> KResult<()> {
        let vpn = va.vpn_floor();
        let mut spt = self.spt.lock();
        if !spt.contains(vpn) {
            return Err(errno::ENOENT);
        }
        self.claim_locked(&mut spt, vpn)
    }

    /// 移除并销毁 `va` 所在的页，脏数据会被写回
    pub fn remove_page(&self, va: VirtAddr) -> KResult<()> {
        let page = self.spt.lock().remove(va.vpn_floor()).ok_or(errno::ENOENT)?;
        self.destroy_page(page)
    }

    /// 分配并填充用户栈的第一页，返回初始的栈指针
    pub fn setup_stack(&self) -> KResult<VirtAddr> {
        let stack_top = VirtAddr(USER_STACK_TOP);
        let vpn = (stack_top - PAGE_SIZE).vpn_floor();
        self.allocate_and_claim(&mut self.spt.lock(), vpn)?;
        debug!("setup user stack at {stack_top:?}");
        Ok(stack_top)
    }

    /// 懒加载可执行文件的一个段：前 `read_bytes` 字节来自文件，之后的 `zero_bytes` 字节为零
    ///
    /// 段中任何一页已存在时返回 `EEXIST`，且不会创建任何页
    pub fn load_segment(
        &self,
        file: &FileHandle,
        offset: usize,
        upage: VirtAddr,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> KResult<()> {
        let len = read_bytes.checked_add(zero_bytes).ok_or(errno::EINVAL)?;
        if !upage.is_page_aligned() || offset % PAGE_SIZE != 0 || len % PAGE_SIZE != 0 {
            return Err(errno::EINVAL);
        }
        let end = upage
            .0
            .checked_add(len)
            .filter(|&end| end <= LOW_ADDRESS_END)
            .ok_or(errno::EINVAL)?;

        let mut pages = Vec::with_capacity(len / PAGE_SIZE);
        let mut remaining = read_bytes;
        for (i, vpn) in (upage.vpn_floor().0..VirtAddr(end).vpn_floor().0)
            .map(VirtPageNum)
            .enumerate()
        {
            let page_read_bytes = remaining.min(PAGE_SIZE);
            let init = if page_read_bytes == 0 {
                LazyInit::Zeroed
            } else {
                LazyInit::File(FileSegment {
                    file: FileHandle::clone(file),
                    offset: offset + i * PAGE_SIZE,
                    read_bytes: page_read_bytes,
                })
            };
            pages.push(Page::new(vpn, writable, BackingKind::Anonymous, init)?);
            remaining -= page_read_bytes;
        }
        insert_all(&mut self.spt.lock(), pages)?;
        debug!("load segment {upage:?}..{:?} from offset {offset:#x}", VirtAddr(end));
        Ok(())
    }

    /// 释放所有页，脏的文件页和块缓存页会被写回。可重复调用
    pub fn teardown(&self) {
        let mut spt = self.spt.lock();
        let mappings = core::mem::take(&mut *self.mappings.lock());
        if spt.is_empty() && mappings.is_empty() {
            return;
        }
        debug!("teardown {} pages, {} mappings", spt.len(), mappings.len());
        for page in spt.drain() {
            let vpn = page.vpn();
            if let Err(e) = self.destroy_page(page) {
                warn!("fail to write back {vpn:?} on teardown: {e}");
            }
        }
        debug_assert!(self.pool.lock().is_empty());
    }

    pub fn page_info(&self, va: VirtAddr) -> Option<PageInfo> {
        self.spt.lock().lookup(va).map(Page::info)
    }

    pub fn page_count(&self) -> usize {
        self.spt.lock().len()
    }

    pub fn resident_pages(&self) -> usize {
        self.pool.lock().len()
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.lock().len()
    }

    fn allocate_and_claim(&self, spt: &mut SupplementalPageTable, vpn: VirtPageNum) -> KResult<()> {
        spt.allocate(vpn, true, BackingKind::Anonymous, LazyInit::Zeroed)?;
        self.claim_locked(spt, vpn).inspect_err(|_| {
            spt.remove(vpn);
        })
    }

    /// 为页分配帧并填充。页已在内存中时什么都不做
    fn claim_locked(&self, spt: &mut SupplementalPageTable, vpn: VirtPageNum) -> KResult<()> {
        let page = spt.get(vpn).ok_or(errno::ENOENT)?;
        // 所属映射正在被撤销
        if page.is_unmapped() {
            return Err(errno::EFAULT);
        }
        if page.is_resident() {
            return Ok(());
        }
        let frame = self.acquire_frame(spt)?;
        self.claim_with(spt, vpn, frame, None)
    }

    /// 把 `frame` 交给页。给出 `source` 时直接复制其内容，否则由页自己填充
    ///
    /// 失败时帧被释放，页保持不在内存中的状态
    fn claim_with(
        &self,
        spt: &mut SupplementalPageTable,
        vpn: VirtPageNum,
        mut frame: Frame,
        source: Option<&[u8; PAGE_SIZE]>,
    ) -> KResult<()> {
        let page = spt.get_mut(vpn).ok_or(errno::ENOENT)?;
        debug_assert!(!page.is_resident());
        frame.set_owner(Some(vpn));
        self.page_table
            .lock()
            .install_mapping(vpn, frame.ppn(), page.writable())?;

        let filled = match source {
            Some(bytes) => {
                frame.as_page_bytes_mut().copy_from_slice(bytes);
                Ok(())
            }
            None => page.kind.fill(&mut frame),
        };
        if let Err(e) = filled {
            self.page_table.lock().clear_mapping(vpn);
            debug!("fail to fill {vpn:?}: {e}");
            return Err(e);
        }
        // 填充不经过页表，但初始内容总是视为干净的
        self.page_table.lock().clear_dirty(vpn);

        trace!("claim {vpn:?} ({}) with {:?}", page.backing_kind(), frame.ppn());
        page.frame = Some(frame);
        self.pool.lock().push(vpn);
        Ok(())
    }

    /// 物理帧耗尽时换出本地址空间的一页
    fn acquire_frame(&self, spt: &mut SupplementalPageTable) -> KResult<Frame> {
        match Frame::alloc(&self.frames) {
            Some(frame) => Ok(frame),
            None => self.evict(spt),
        }
    }

    fn evict(&self, spt: &mut SupplementalPageTable) -> KResult<Frame> {
        let victim = {
            let mut pool = self.pool.lock();
            let mut page_table = self.page_table.lock();
            pool.select_victim(&mut page_table)
        };
        let Some(victim) = victim else {
            warn!("out of frames and nothing to evict");
            return Err(errno::ENOMEM);
        };
        let Some(page) = spt.get_mut(victim) else {
            unreachable!("active {victim:?} is not in the page table");
        };
        let Some(mut frame) = page.frame.take() else {
            unreachable!("active {victim:?} is not resident");
        };

        let dirty = self.page_table.lock().is_dirty(victim);
        if let Err(e) = page.kind.swap_out(&frame, &self.swap, dirty) {
            // 换出失败，页仍留在内存中
            page.frame = Some(frame);
            self.pool.lock().push(victim);
            return Err(e);
        }
        self.page_table.lock().clear_mapping(victim);
        debug!("evict {victim:?} ({}), dirty: {dirty}", page.backing_kind());

        frame.set_owner(None);
        frame.clear();
        Ok(frame)
    }

    /// 页已从补充页表中取出
    fn destroy_page(&self, page: Page) -> KResult<()> {
        let vpn = page.vpn();
        let dirty = if page.is_resident() {
            self.pool.lock().remove(vpn);
            let mut page_table = self.page_table.lock();
            let dirty = page_table.is_dirty(vpn);
            page_table.clear_mapping(vpn);
            dirty
        } else {
            false
        };
        page.destroy(dirty)
    }

    /// 检查帧与页之间的对应关系
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let spt = self.spt.lock();
        let pool = self.pool.lock();
        let page_table = self.page_table.lock();
        let mut ppns = hashbrown::HashSet::new();
        for page in spt.iter() {
            let translated = page_table.translate(page.vpn()).map(|pte| pte.ppn());
            match page.frame() {
                Some(frame) => {
                    assert_eq!(frame.owner(), Some(page.vpn()));
                    assert!(ppns.insert(frame.ppn()), "{:?} is aliased", frame.ppn());
                    assert!(pool.contains(page.vpn()));
                    assert_eq!(translated, Some(frame.ppn()));
                    assert!(page.swap_slot().is_none());
                }
                None => assert_eq!(translated, None),
            }
        }
        assert_eq!(ppns.len(), pool.len());
        assert_eq!(ppns.len(), page_table.len());
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// 要么全部插入，要么一个都不插入
fn insert_all(spt: &mut SupplementalPageTable, pages: Vec<Page>) -> KResult<()> {
    if let Some(page) = pages.iter().find(|page| spt.contains(page.vpn())) {
        debug!("{:?} is already mapped", page.vpn());
        return Err(errno::EEXIST);
    }
    let mut guard = scopeguard::guard(
        (spt, Vec::with_capacity(pages.len())),
        |(spt, inserted)| {
            for vpn in inserted {
                spt.remove(vpn);
            }
        },
    );
    for page in pages {
        let (spt, inserted) = &mut *guard;
        inserted.push(spt.insert(page)?.vpn());
    }
    let _ = ScopeGuard::into_inner(guard);
    Ok(())
}
