use crate::constant::MiB;

pub const PTR_SIZE: usize = core::mem::size_of::<usize>();

/// 一个页大小的 bit 数
pub const PAGE_SIZE_BITS: usize = 12;
/// 页大小
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;
/// 页内偏移的掩码
pub const PAGE_OFFSET_MASK: usize = PAGE_SIZE - 1;

/// 块设备的扇区大小
pub const BLOCK_SIZE: usize = 512;
/// 一页对应的扇区数，也即一个 swap slot 占用的扇区数
pub const BLOCKS_PER_PAGE: usize = PAGE_SIZE / BLOCK_SIZE;

/// 低地址的末端，即 256GiB 处。此后是内核地址
pub const LOW_ADDRESS_END: usize = 0x40_0000_0000;

/// 用户栈的栈顶（不含）
pub const USER_STACK_TOP: usize = 0x10_0000_0000;
/// 用户栈的最大大小
pub const USER_STACK_SIZE: usize = MiB;

/// 文件映射超过这么多页时，缺页会顺带预取映射中的其他页
pub const EAGER_CLAIM_THRESHOLD: usize = 100;
