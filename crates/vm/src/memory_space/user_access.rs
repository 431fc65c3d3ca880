//! 以用户身份访问地址空间，缺页时和硬件一样陷入缺页处理

use common::config::{LOW_ADDRESS_END, PAGE_SIZE};
use defines::error::{errno, KResult};

use super::{page_table::AccessFault, AddressSpace};
use crate::{FaultInfo, VirtAddr};

impl AddressSpace {
    /// 从用户地址 `addr` 读取 `buf.len()` 字节。`sp` 是用户栈指针，用于判断栈增长
    pub fn read_user(&self, addr: VirtAddr, buf: &mut [u8], sp: VirtAddr) -> KResult<()> {
        self.access_user(addr, buf.len(), false, sp, |page, done| {
            let len = page.len();
            buf[done..done + len].copy_from_slice(page);
        })
    }

    /// 向用户地址 `addr` 写入 `data`
    pub fn write_user(&self, addr: VirtAddr, data: &[u8], sp: VirtAddr) -> KResult<()> {
        self.access_user(addr, data.len(), true, sp, |page, done| {
            let len = page.len();
            page.copy_from_slice(&data[done..done + len]);
        })
    }

    /// 按页访问 `[addr, addr + len)`，`op` 收到页内的那一段以及已完成的字节数
    fn access_user(
        &self,
        addr: VirtAddr,
        len: usize,
        write: bool,
        sp: VirtAddr,
        mut op: impl FnMut(&mut [u8], usize),
    ) -> KResult<()> {
        let end = addr.0.checked_add(len).ok_or(errno::EFAULT)?;
        if end > LOW_ADDRESS_END {
            return Err(errno::EFAULT);
        }
        let mut done = 0;
        while done < len {
            let va = addr + done;
            let vpn = va.vpn_floor();
            let offset = va.page_offset();
            let chunk = (PAGE_SIZE - offset).min(len - done);
            loop {
                let mut spt = self.spt.lock();
                let touched = self.page_table.lock().touch(vpn, write);
                match touched {
                    Ok(ppn) => {
                        let frame = spt
                            .get_mut(vpn)
                            .and_then(|page| page.frame.as_mut())
                            .ok_or(errno::EFAULT)?;
                        debug_assert_eq!(frame.ppn(), ppn);
                        op(&mut frame.as_page_bytes_mut()[offset..offset + chunk], done);
                        break;
                    }
                    Err(fault) => {
                        drop(spt);
                        self.handle_fault(FaultInfo {
                            addr: va,
                            write,
                            user: true,
                            not_present: fault == AccessFault::NotPresent,
                            sp,
                        })?;
                    }
                }
            }
            done += chunk;
        }
        Ok(())
    }
}
