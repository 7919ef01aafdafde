pub mod buffer_pool;
pub mod storage;

pub use buffer_pool::{BufferPoolManager, FrameGuard, SharedBufferPool};
pub use storage::{
    FileStorageManager, InMemoryStorageManager, PageId, StorageManager, INVALID_PAGE, PAGE_SIZE,
};

/// Debug-only trace logging, compiled out entirely in release builds.
#[macro_export]
macro_rules! printdbg {
    ($val: expr $(, $args: expr)*) => {
        #[cfg(debug_assertions)]
        println!($val $(, $args)*)
    };
}
