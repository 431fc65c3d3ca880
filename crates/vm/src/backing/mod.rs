//! 页的后备存储：交换区、文件以及块缓存

use common::config::{BLOCK_SIZE, PAGE_SIZE};
use defines::error::{errno, KResult};

pub mod anon;
pub mod cache;
pub mod file;

/// 块设备的抽象，读写都以块为单位进行
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, block_id: u64, buf: &mut [u8; BLOCK_SIZE]) -> KResult<()>;
    fn write_block(&self, block_id: u64, buf: &[u8; BLOCK_SIZE]) -> KResult<()>;
    fn num_blocks(&self) -> u64;
}

/// 一个打开的文件。句柄被 drop 时即关闭
pub trait BackingFile: Send + Sync {
    /// 返回实际读取的字节数，读到文件末尾时可能少于 `buf.len()`
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> KResult<usize>;
    /// 返回实际写入的字节数
    fn write_at(&self, offset: usize, buf: &[u8]) -> KResult<usize>;
    /// 重新打开同一个文件，得到独立的句柄
    fn reopen(&self) -> KResult<FileHandle>;
}

pub type FileHandle = alloc::sync::Arc<dyn BackingFile>;
pub type DeviceHandle = alloc::sync::Arc<dyn BlockDevice>;

/// 从 `first_block` 开始连续读出一页
pub(crate) fn read_page_blocks(
    device: &dyn BlockDevice,
    first_block: u64,
    page: &mut [u8; PAGE_SIZE],
) -> KResult<()> {
    let mut block = [0; BLOCK_SIZE];
    for (block_id, chunk) in (first_block..).zip(page.chunks_exact_mut(BLOCK_SIZE)) {
        device.read_block(block_id, &mut block)?;
        chunk.copy_from_slice(&block);
    }
    Ok(())
}

/// 把一页连续写到 `first_block` 开始的块中
pub(crate) fn write_page_blocks(
    device: &dyn BlockDevice,
    first_block: u64,
    page: &[u8; PAGE_SIZE],
) -> KResult<()> {
    let mut block = [0; BLOCK_SIZE];
    for (block_id, chunk) in (first_block..).zip(page.chunks_exact(BLOCK_SIZE)) {
        block.copy_from_slice(chunk);
        device.write_block(block_id, &block)?;
    }
    Ok(())
}

/// 尽量读满 `buf`，返回读到的字节数。只有读到文件末尾才会少于 `buf.len()`
pub(crate) fn read_full_at(file: &dyn BackingFile, offset: usize, buf: &mut [u8]) -> KResult<usize> {
    let mut read = 0;
    while read < buf.len() {
        let n = file.read_at(offset + read, &mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read)
}

/// 写入整个 `buf`，写不进去时返回 `EIO`
pub(crate) fn write_full_at(file: &dyn BackingFile, offset: usize, buf: &[u8]) -> KResult<()> {
    let mut written = 0;
    while written < buf.len() {
        let n = file.write_at(offset + written, &buf[written..])?;
        if n == 0 {
            return Err(errno::EIO);
        }
        written += n;
    }
    Ok(())
}
