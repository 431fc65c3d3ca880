//! 块缓存页：一页对应块设备上连续的 [`BLOCKS_PER_PAGE`] 个块
//!
//! [`BLOCKS_PER_PAGE`]: common::config::BLOCKS_PER_PAGE

use common::config::PAGE_SIZE;
use defines::error::KResult;

use super::{read_page_blocks, write_page_blocks, DeviceHandle};

#[derive(Clone)]
pub struct CachedPage {
    pub(crate) device: DeviceHandle,
    pub(crate) first_block: u64,
}

impl CachedPage {
    pub(crate) fn read_page(&self, page: &mut [u8; PAGE_SIZE]) -> KResult<()> {
        read_page_blocks(&*self.device, self.first_block, page)
    }

    pub(crate) fn write_back(&self, page: &[u8; PAGE_SIZE]) -> KResult<()> {
        write_page_blocks(&*self.device, self.first_block, page)?;
        trace!("write back blocks from {}", self.first_block);
        Ok(())
    }
}
