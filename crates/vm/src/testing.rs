//! 测试用的内存文件、内存块设备和日志输出

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use common::config::{BLOCKS_PER_PAGE, BLOCK_SIZE};
use defines::error::{errno, KResult};
use simple_logger::LogSink;

use crate::{AddressSpace, BackingFile, BlockDevice, FileHandle, FrameAllocator, SwapSpace};

struct Stdout;

impl LogSink for Stdout {
    fn write_log(&self, args: core::fmt::Arguments<'_>) {
        print!("{args}");
    }
}

pub fn init_logger() {
    simple_logger::init(&Stdout);
}

type WriteHook = Box<dyn FnOnce() + Send>;

/// 文件的内容，所有打开的句柄共享
#[derive(Clone)]
pub struct FileStore {
    data: Arc<Mutex<Vec<u8>>>,
    opened: Arc<AtomicUsize>,
    on_write: Arc<Mutex<Option<WriteHook>>>,
}

impl FileStore {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
            opened: Arc::new(AtomicUsize::new(0)),
            on_write: Arc::new(Mutex::new(None)),
        }
    }

    /// 下一次写文件之前调用 `hook`，只调用一次
    pub fn on_next_write(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_write.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn open(&self) -> FileHandle {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Arc::new(MemFile {
            store: self.clone(),
        })
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    /// 当前没有被关闭的句柄数
    pub fn open_handles(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

struct MemFile {
    store: FileStore,
}

impl BackingFile for MemFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> KResult<usize> {
        let data = self.store.data.lock().unwrap();
        if offset >= data.len() {
            return Ok(0);
        }
        let len = buf.len().min(data.len() - offset);
        buf[..len].copy_from_slice(&data[offset..offset + len]);
        Ok(len)
    }

    /// 不会扩展文件
    fn write_at(&self, offset: usize, buf: &[u8]) -> KResult<usize> {
        let hook = self.store.on_write.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        let mut data = self.store.data.lock().unwrap();
        if offset >= data.len() {
            return Ok(0);
        }
        let len = buf.len().min(data.len() - offset);
        data[offset..offset + len].copy_from_slice(&buf[..len]);
        Ok(len)
    }

    fn reopen(&self) -> KResult<FileHandle> {
        Ok(self.store.open())
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        self.store.opened.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct RamDisk {
    blocks: Mutex<Vec<[u8; BLOCK_SIZE]>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl RamDisk {
    pub fn new(num_blocks: usize) -> Arc<Self> {
        Arc::new(Self {
            blocks: Mutex::new(vec![[0; BLOCK_SIZE]; num_blocks]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        })
    }

    pub fn with_pages(pages: usize) -> Arc<Self> {
        Self::new(pages * BLOCKS_PER_PAGE)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn block(&self, block_id: usize) -> [u8; BLOCK_SIZE] {
        self.blocks.lock().unwrap()[block_id]
    }

    pub fn set_block(&self, block_id: usize, data: [u8; BLOCK_SIZE]) {
        self.blocks.lock().unwrap()[block_id] = data;
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: u64, buf: &mut [u8; BLOCK_SIZE]) -> KResult<()> {
        let blocks = self.blocks.lock().unwrap();
        *buf = *blocks.get(block_id as usize).ok_or(errno::EIO)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_block(&self, block_id: u64, buf: &[u8; BLOCK_SIZE]) -> KResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(errno::EIO);
        }
        let mut blocks = self.blocks.lock().unwrap();
        *blocks.get_mut(block_id as usize).ok_or(errno::EIO)? = *buf;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn num_blocks(&self) -> u64 {
        self.blocks.lock().unwrap().len() as u64
    }
}

/// 有 `frames` 个物理帧、`swap_pages` 个 swap slot 的地址空间
pub fn address_space(frames: usize, swap_pages: usize) -> (AddressSpace, Arc<RamDisk>) {
    init_logger();
    let disk = RamDisk::with_pages(swap_pages);
    let swap = SwapSpace::new(disk.clone());
    (AddressSpace::new(FrameAllocator::new(frames), swap), disk)
}
