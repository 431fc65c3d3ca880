//! 文件映射
//!
//! 每次映射都会重新打开文件，映射中的所有页共享这个私有句柄。
//! 映射被撤销时句柄随 [`Mapping`] 一起关闭

use alloc::vec::Vec;

use common::config::PAGE_SIZE;
use defines::error::KResult;

use super::{read_full_at, write_full_at, FileHandle};
use crate::{VirtAddr, VirtPageNum};

/// 一次 mmap 创建的一组连续页
pub struct Mapping {
    base: VirtAddr,
    length: usize,
    file: FileHandle,
    pages: Vec<VirtPageNum>,
}

impl Mapping {
    pub(crate) fn new(base: VirtAddr, length: usize, file: FileHandle, pages: Vec<VirtPageNum>) -> Self {
        Self {
            base,
            length,
            file,
            pages,
        }
    }

    pub fn base(&self) -> VirtAddr {
        self.base
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn file(&self) -> &FileHandle {
        &self.file
    }

    pub fn pages(&self) -> &[VirtPageNum] {
        &self.pages
    }
}

/// 已经被初始化过的文件页
#[derive(Clone)]
pub struct FilePage {
    pub(crate) file: FileHandle,
    pub(crate) offset: usize,
    /// 页中来自文件的字节数，其余部分补零
    pub(crate) valid_bytes: usize,
}

impl FilePage {
    /// 文件比预期短时，读不到的部分保持为零
    pub(crate) fn read_page(&self, page: &mut [u8; PAGE_SIZE]) -> KResult<()> {
        let read = read_full_at(&*self.file, self.offset, &mut page[..self.valid_bytes])?;
        page[read..].fill(0);
        Ok(())
    }

    /// 只写回有效的部分
    pub(crate) fn write_back(&self, page: &[u8; PAGE_SIZE]) -> KResult<()> {
        write_full_at(&*self.file, self.offset, &page[..self.valid_bytes])?;
        trace!("write back {} bytes at offset {:#x}", self.valid_bytes, self.offset);
        Ok(())
    }
}
