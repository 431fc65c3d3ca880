use alloc::boxed::Box;

use common::config::PAGE_SIZE;
use defines::error::{errno, KResult};
use hashbrown::HashMap;
use triomphe::Arc;

use super::AddressSpace;
use crate::{backing::file::Mapping, page::BackingKind, FileHandle, VirtAddr};

impl AddressSpace {
    /// 复制出一个新的地址空间，与当前地址空间共享物理帧和交换区
    ///
    /// 失败时已复制的部分随新的地址空间一起释放
    pub fn fork(&self) -> KResult<AddressSpace> {
        let child = AddressSpace::new(Arc::clone(&self.frames), Arc::clone(&self.swap));
        child.copy_from(self)?;
        Ok(child)
    }

    /// 把 `src` 中的所有页复制到当前地址空间
    ///
    /// 未初始化的页仍然懒加载，其余的页立即分配帧并复制内容：
    /// 在内存中的直接复制，被换出的从交换区读取（不释放 `src` 的 slot）。
    /// 任何一页失败都会中止复制，已复制的页不会回滚。`src` 不能是自身
    pub fn copy_from(&self, src: &AddressSpace) -> KResult<()> {
        if core::ptr::eq(self, src) {
            return Err(errno::EINVAL);
        }
        // 两个补充页表按地址顺序上锁
        let (src_spt, mut spt) = if core::ptr::from_ref(src) < core::ptr::from_ref(self) {
            let src_spt = src.spt.lock();
            (src_spt, self.spt.lock())
        } else {
            let spt = self.spt.lock();
            (src.spt.lock(), spt)
        };

        // 每个映射在子地址空间中有自己的句柄
        let mut files: HashMap<VirtAddr, FileHandle> = HashMap::new();
        for (&base, mapping) in src.mappings.lock().iter() {
            let file = mapping.file().reopen()?;
            files.insert(base, FileHandle::clone(&file));
            self.mappings.lock().insert(
                base,
                Mapping::new(base, mapping.length(), file, mapping.pages().to_vec()),
            );
        }

        let mut buf: Box<[u8; PAGE_SIZE]> = Box::new([0; PAGE_SIZE]);
        for src_page in src_spt.iter() {
            // 已被撤销映射的页即将消失
            if src_page.is_unmapped() {
                continue;
            }
            let vpn = src_page.vpn();
            let file = src_page.mapping().and_then(|base| files.get(&base));
            spt.insert(src_page.duplicate(file))?;
            if src_page.backing_kind() == BackingKind::Uninitialized {
                continue;
            }

            let source = match (src_page.frame(), src_page.swap_slot()) {
                (Some(frame), _) => Some(frame.as_page_bytes()),
                (None, Some(slot)) => {
                    slot.read(&mut buf)?;
                    Some(&*buf)
                }
                (None, None) => None,
            };
            let frame = self.acquire_frame(&mut spt)?;
            self.claim_with(&mut spt, vpn, frame, source)?;
            if src_page.is_resident() && src.page_table.lock().is_dirty(vpn) {
                self.page_table.lock().set_dirty(vpn);
            }
        }
        debug!("copy {} pages, {} resident", spt.len(), self.pool.lock().len());
        Ok(())
    }
}
