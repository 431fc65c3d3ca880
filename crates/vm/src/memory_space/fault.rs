use alloc::vec::Vec;

use common::config::{EAGER_CLAIM_THRESHOLD, PTR_SIZE, USER_STACK_SIZE, USER_STACK_TOP};
use defines::error::{errno, KResult};

use super::{AddressSpace, SupplementalPageTable};
use crate::{Frame, VirtAddr};

/// 一次缺页异常的信息
#[derive(Debug, Clone, Copy)]
pub struct FaultInfo {
    pub addr: VirtAddr,
    pub write: bool,
    pub user: bool,
    /// 页表项不存在。为 `false` 时说明是权限错误
    pub not_present: bool,
    /// 发生异常时用户栈的栈指针
    pub sp: VirtAddr,
}

/// 栈只会向下增长，且只允许比栈指针低一个字（如 push 指令）
fn is_stack_growth(addr: VirtAddr, sp: VirtAddr) -> bool {
    let addr = addr.0;
    addr < USER_STACK_TOP && addr >= USER_STACK_TOP - USER_STACK_SIZE && addr + PTR_SIZE >= sp.0
}

impl AddressSpace {
    /// 处理一次缺页。返回错误时说明是非法访问或资源耗尽，应当终止进程
    pub fn handle_fault(&self, fault: FaultInfo) -> KResult<()> {
        trace!(
            "page fault at {:?}, write: {}, user: {}, present: {}",
            fault.addr,
            fault.write,
            fault.user,
            !fault.not_present
        );
        if !fault.addr.is_user() {
            debug!("fault on kernel address {:?}", fault.addr);
            return Err(errno::EFAULT);
        }
        let vpn = fault.addr.vpn_floor();
        let mut spt = self.spt.lock();

        let Some(page) = spt.get(vpn) else {
            if !fault.not_present || !is_stack_growth(fault.addr, fault.sp) {
                debug!("segmentation fault at {:?}, sp: {:?}", fault.addr, fault.sp);
                return Err(errno::EFAULT);
            }
            debug!("grow stack to {vpn:?}");
            return self.allocate_and_claim(&mut spt, vpn);
        };
        if !fault.not_present || (fault.write && !page.writable()) {
            debug!("invalid access to {vpn:?}, write: {}", fault.write);
            return Err(errno::EFAULT);
        }
        if page.is_unmapped() {
            debug!("fault on unmapped {vpn:?}");
            return Err(errno::EFAULT);
        }
        // 别的线程已经处理了同一页的缺页
        if page.is_resident() {
            return Ok(());
        }

        let mapping = page.mapping();
        self.claim_locked(&mut spt, vpn)?;
        if let Some(base) = mapping {
            self.prefetch_mapping(&mut spt, base);
        }
        Ok(())
    }

    /// 大的文件映射一次性预取其余的页。只使用空闲的帧，不会换出任何页，失败也无妨
    fn prefetch_mapping(&self, spt: &mut SupplementalPageTable, base: VirtAddr) {
        let pages: Vec<_> = {
            let mappings = self.mappings.lock();
            match mappings.get(&base) {
                Some(mapping) if mapping.pages().len() > EAGER_CLAIM_THRESHOLD => {
                    mapping.pages().to_vec()
                }
                _ => return,
            }
        };
        let mut prefetched = 0;
        for vpn in pages {
            if spt.get(vpn).map_or(true, |page| page.is_resident() || page.is_unmapped()) {
                continue;
            }
            let Some(frame) = Frame::alloc(&self.frames) else {
                break;
            };
            if self.claim_with(spt, vpn, frame, None).is_ok() {
                prefetched += 1;
            }
        }
        trace!("prefetch {prefetched} pages of mapping {base:?}");
    }
}
