//! 页描述符
//!
//! 页在创建时都是 [`BackingKind::Uninitialized`] 的，记录了目标类型和填充方式，
//! 第一次缺页时才真正变成匿名页、文件页或块缓存页

use common::config::PAGE_SIZE;
use defines::error::{errno, KResult};
use derive_more::Display;
use triomphe::Arc;

use crate::{
    backing::{anon::AnonPage, cache::CachedPage, file::FilePage, read_full_at},
    DeviceHandle, FileHandle, Frame, PhysPageNum, SwapSlot, SwapSpace, VirtAddr, VirtPageNum,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BackingKind {
    #[display("uninit")]
    Uninitialized,
    #[display("anon")]
    Anonymous,
    #[display("file")]
    FileBacked,
    #[display("cache")]
    Cached,
}

/// 第一次缺页时如何填充这一页
#[derive(Clone)]
pub enum LazyInit {
    /// 全零
    Zeroed,
    /// 从文件读取 `read_bytes` 字节，其余补零
    File(FileSegment),
    /// 从块设备读取连续的一页
    Blocks(BlockSegment),
}

#[derive(Clone)]
pub struct FileSegment {
    pub file: FileHandle,
    pub offset: usize,
    pub read_bytes: usize,
}

#[derive(Clone)]
pub struct BlockSegment {
    pub device: DeviceHandle,
    pub first_block: u64,
}

pub(crate) enum PageKind {
    Uninit { target: BackingKind, init: LazyInit },
    Anon(AnonPage),
    File(FilePage),
    Cached(CachedPage),
}

impl PageKind {
    fn backing_kind(&self) -> BackingKind {
        match self {
            PageKind::Uninit { .. } => BackingKind::Uninitialized,
            PageKind::Anon(_) => BackingKind::Anonymous,
            PageKind::File(_) => BackingKind::FileBacked,
            PageKind::Cached(_) => BackingKind::Cached,
        }
    }

    /// 填充刚分配到的帧。未初始化的页在成功填充后转变为目标类型，失败时保持不变
    pub(crate) fn fill(&mut self, frame: &mut Frame) -> KResult<()> {
        match self {
            PageKind::Uninit { target, init } => {
                let kind = match (*target, &*init) {
                    (BackingKind::Anonymous, LazyInit::Zeroed) => PageKind::Anon(AnonPage::new()),
                    // 可执行文件的段，必须完整读出
                    (BackingKind::Anonymous, LazyInit::File(segment)) => {
                        let buf = &mut frame.as_page_bytes_mut()[..segment.read_bytes];
                        if read_full_at(&*segment.file, segment.offset, buf)? != segment.read_bytes {
                            return Err(errno::EIO);
                        }
                        PageKind::Anon(AnonPage::new())
                    }
                    (BackingKind::FileBacked, LazyInit::File(segment)) => {
                        let page = FilePage {
                            file: FileHandle::clone(&segment.file),
                            offset: segment.offset,
                            valid_bytes: segment.read_bytes,
                        };
                        page.read_page(frame.as_page_bytes_mut())?;
                        PageKind::File(page)
                    }
                    (BackingKind::Cached, LazyInit::Blocks(segment)) => {
                        let page = CachedPage {
                            device: DeviceHandle::clone(&segment.device),
                            first_block: segment.first_block,
                        };
                        page.read_page(frame.as_page_bytes_mut())?;
                        PageKind::Cached(page)
                    }
                    _ => return Err(errno::EINVAL),
                };
                *self = kind;
                Ok(())
            }
            PageKind::Anon(page) => page.swap_in(frame),
            PageKind::File(page) => page.read_page(frame.as_page_bytes_mut()),
            PageKind::Cached(page) => page.read_page(frame.as_page_bytes_mut()),
        }
    }

    /// 换出前保存帧中的数据。匿名页总是写入交换区，其余只在脏时写回
    pub(crate) fn swap_out(&mut self, frame: &Frame, swap: &Arc<SwapSpace>, dirty: bool) -> KResult<()> {
        match self {
            PageKind::Uninit { .. } => unreachable!("uninitialized page is never resident"),
            PageKind::Anon(page) => page.swap_out(swap, frame),
            PageKind::File(_) | PageKind::Cached(_) => self.write_back(frame, dirty),
        }
    }

    /// 页被销毁前写回脏数据。匿名页的数据直接丢弃
    pub(crate) fn write_back(&self, frame: &Frame, dirty: bool) -> KResult<()> {
        if !dirty {
            return Ok(());
        }
        match self {
            PageKind::File(page) => page.write_back(frame.as_page_bytes()),
            PageKind::Cached(page) => page.write_back(frame.as_page_bytes()),
            PageKind::Uninit { .. } | PageKind::Anon(_) => Ok(()),
        }
    }
}

/// 某一页的状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub kind: BackingKind,
    /// 初始化后的类型。已初始化的页与 `kind` 相同
    pub target: BackingKind,
    pub writable: bool,
    pub frame: Option<PhysPageNum>,
    pub swapped: bool,
    pub unmapped: bool,
}

/// 页描述符。独占其所在的帧
pub struct Page {
    vpn: VirtPageNum,
    writable: bool,
    pub(crate) kind: PageKind,
    pub(crate) frame: Option<Frame>,
    /// 所属文件映射的起始地址
    mapping: Option<VirtAddr>,
    /// 所属映射已被撤销，此后的缺页都应被拒绝
    unmapped: bool,
}

impl Page {
    /// 创建一个未初始化的页。`init` 无法产生 `target` 类型的页时返回 `EINVAL`
    pub(crate) fn new(vpn: VirtPageNum, writable: bool, target: BackingKind, init: LazyInit) -> KResult<Self> {
        let valid = match (target, &init) {
            (BackingKind::Anonymous, LazyInit::Zeroed) => true,
            (BackingKind::Anonymous | BackingKind::FileBacked, LazyInit::File(segment)) => {
                segment.read_bytes <= PAGE_SIZE
            }
            (BackingKind::Cached, LazyInit::Blocks(_)) => true,
            _ => false,
        };
        if !valid {
            return Err(errno::EINVAL);
        }
        Ok(Self::with_kind(vpn, writable, PageKind::Uninit { target, init }))
    }

    fn with_kind(vpn: VirtPageNum, writable: bool, kind: PageKind) -> Self {
        Self {
            vpn,
            writable,
            kind,
            frame: None,
            mapping: None,
            unmapped: false,
        }
    }

    pub fn vpn(&self) -> VirtPageNum {
        self.vpn
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn backing_kind(&self) -> BackingKind {
        self.kind.backing_kind()
    }

    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    pub fn swap_slot(&self) -> Option<&SwapSlot> {
        match &self.kind {
            PageKind::Anon(page) => page.slot(),
            _ => None,
        }
    }

    pub fn mapping(&self) -> Option<VirtAddr> {
        self.mapping
    }

    pub(crate) fn set_mapping(&mut self, base: VirtAddr) {
        self.mapping = Some(base);
    }

    pub fn is_unmapped(&self) -> bool {
        self.unmapped
    }

    pub(crate) fn mark_unmapped(&mut self) {
        self.unmapped = true;
    }

    pub fn info(&self) -> PageInfo {
        let target = match &self.kind {
            PageKind::Uninit { target, .. } => *target,
            kind => kind.backing_kind(),
        };
        PageInfo {
            kind: self.backing_kind(),
            target,
            writable: self.writable,
            frame: self.frame.as_ref().map(Frame::ppn),
            swapped: self.swap_slot().is_some(),
            unmapped: self.unmapped,
        }
    }

    /// 为 fork 创建一个等价但不在内存中的页。文件相关的页改用 `file` 这个句柄
    pub(crate) fn duplicate(&self, file: Option<&FileHandle>) -> Self {
        let replace = |old: &FileHandle| FileHandle::clone(file.unwrap_or(old));
        let kind = match &self.kind {
            PageKind::Uninit { target, init } => {
                let init = match init {
                    LazyInit::File(segment) => LazyInit::File(FileSegment {
                        file: replace(&segment.file),
                        ..segment.clone()
                    }),
                    init => init.clone(),
                };
                PageKind::Uninit { target: *target, init }
            }
            PageKind::Anon(_) => PageKind::Anon(AnonPage::new()),
            PageKind::File(page) => PageKind::File(FilePage {
                file: replace(&page.file),
                ..page.clone()
            }),
            PageKind::Cached(page) => PageKind::Cached(page.clone()),
        };
        let mut page = Self::with_kind(self.vpn, self.writable, kind);
        page.mapping = self.mapping;
        page
    }

    /// 销毁该页，脏的文件页和块缓存页会被写回。帧与 swap slot 随之释放
    pub(crate) fn destroy(mut self, dirty: bool) -> KResult<()> {
        match self.frame.take() {
            Some(frame) => self.kind.write_back(&frame, dirty),
            None => Ok(()),
        }
    }
}
