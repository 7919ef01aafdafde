use super::{PageId, StorageManager, INVALID_PAGE, PAGE_SIZE};
use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

const COUNTER_FILE: &str = ".next_page_id";

/// A [`StorageManager`] that keeps one file per page under a directory.
///
/// The next-page-id counter is persisted next to the pages so that ids keep
/// incrementing across process restarts instead of colliding with pages
/// already on disk.
#[derive(Debug)]
pub struct FileStorageManager {
    dir: PathBuf,
    next_page_id: AtomicI64,
}

impl FileStorageManager {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating storage directory {}", dir.display()))?;

        let next_page_id = match std::fs::read(dir.join(COUNTER_FILE)) {
            Ok(bytes) if bytes.len() == 8 => PageId::from_ne_bytes(bytes.try_into().unwrap()),
            _ => 0,
        };

        Ok(Self {
            dir,
            next_page_id: AtomicI64::new(next_page_id),
        })
    }

    fn page_path(&self, page_id: PageId) -> PathBuf {
        self.dir.join(page_id.to_string())
    }
}

impl StorageManager for FileStorageManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        if page_id == INVALID_PAGE {
            return Err(anyhow!("cannot read the invalid page id"));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .open(self.page_path(page_id))
            .with_context(|| format!("opening page {page_id} for read"))?;

        file.read_exact(buf)
            .with_context(|| format!("short read of page {page_id}"))?;

        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        if page_id == INVALID_PAGE {
            return Err(anyhow!("cannot write the invalid page id"));
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.page_path(page_id))
            .with_context(|| format!("opening page {page_id} for write"))?;

        file.write_all(buf)
            .with_context(|| format!("writing page {page_id}"))?;

        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);

        std::fs::write(
            self.dir.join(COUNTER_FILE),
            (page_id + 1).to_ne_bytes(),
        )
        .context("persisting page id counter")?;

        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        match std::fs::remove_file(self.page_path(page_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("deallocating page {page_id}")),
        }
    }
}
