//! Paged storage channel for single-file page I/O.

use avocet_common::{AvocetError, JetFormat, Result};
use bytes::BytesMut;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Sentinel for a page number that has not been assigned.
pub const INVALID_PAGE_NUMBER: u32 = u32::MAX;

/// Fixed-size page read/write, page reservation, and write-epoch bracketing.
///
/// A channel addresses pages by number within a single database file.
/// Writes issued between `start_write` and the matching `finish_write`
/// become durable as a group when the outermost epoch finishes.
pub trait PageChannel: Send + Sync {
    /// Size of one page in bytes.
    fn page_size(&self) -> usize;

    /// Returns a fresh zeroed buffer of exactly one page.
    fn create_page_buffer(&self) -> BytesMut {
        BytesMut::zeroed(self.page_size())
    }

    /// Fills `buf` from the page at `page_number`.
    fn read_page(&self, buf: &mut [u8], page_number: u32) -> Result<()>;

    /// Writes exactly one page at `page_number`.
    fn write_page(&self, buf: &[u8], page_number: u32) -> Result<()>;

    /// Returns the next previously-unused page number and marks it reserved.
    fn reserve_page_number(&self) -> Result<u32>;

    /// Opens a write epoch. Epochs nest.
    fn start_write(&self);

    /// Closes a write epoch, flushing buffered writes when the outermost
    /// epoch ends.
    fn finish_write(&self) -> Result<()>;
}

/// Scoped write epoch.
///
/// `finish_write` runs on every exit path: explicitly through [`WriteEpoch::finish`],
/// or on drop (error and panic paths) with the flush result discarded.
pub struct WriteEpoch<'a> {
    channel: &'a dyn PageChannel,
    finished: bool,
}

impl<'a> WriteEpoch<'a> {
    /// Opens an epoch on the channel.
    pub fn begin(channel: &'a dyn PageChannel) -> Self {
        channel.start_write();
        Self {
            channel,
            finished: false,
        }
    }

    /// Closes the epoch and returns the flush result.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.channel.finish_write()
    }
}

impl Drop for WriteEpoch<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.channel.finish_write();
        }
    }
}

/// Configuration for a file-backed page channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Path of the database file.
    pub path: PathBuf,
    /// Enable fsync when an outermost write epoch finishes.
    pub fsync_enabled: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/avocet.adb"),
            fsync_enabled: true,
        }
    }
}

/// File-backed page channel over a single database file.
///
/// Not safe for concurrent mutation of the same database; the internal
/// lock only protects the file handle and bookkeeping.
pub struct FilePageChannel {
    page_size: usize,
    fsync_enabled: bool,
    state: Mutex<ChannelState>,
}

struct ChannelState {
    file: File,
    /// Pages currently present in the file.
    file_pages: u32,
    /// First page number that has never been reserved.
    next_page_number: u32,
    /// Write-epoch nesting depth.
    epoch_depth: u32,
    /// Writes buffered during an epoch, in program order.
    pending: Vec<(u32, Vec<u8>)>,
}

impl FilePageChannel {
    /// Opens (or creates) the database file described by `config`.
    pub fn new(config: ChannelConfig, format: JetFormat) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.path)?;

        let file_size = file.metadata()?.len();
        let file_pages = (file_size / format.page_size as u64) as u32;

        Ok(Self {
            page_size: format.page_size,
            fsync_enabled: config.fsync_enabled,
            state: Mutex::new(ChannelState {
                file,
                file_pages,
                next_page_number: file_pages,
                epoch_depth: 0,
                pending: Vec::new(),
            }),
        })
    }

    fn check_buffer(&self, len: usize) -> Result<()> {
        if len != self.page_size {
            return Err(AvocetError::PageSizeMismatch {
                expected: self.page_size,
                actual: len,
            });
        }
        Ok(())
    }

    fn write_at(&self, state: &mut ChannelState, buf: &[u8], page_number: u32) -> Result<()> {
        let offset = (page_number as u64) * (self.page_size as u64);
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(buf)?;
        if page_number >= state.file_pages {
            state.file_pages = page_number + 1;
        }
        Ok(())
    }
}

impl PageChannel for FilePageChannel {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, buf: &mut [u8], page_number: u32) -> Result<()> {
        self.check_buffer(buf.len())?;

        let mut state = self.state.lock();
        if page_number >= state.next_page_number {
            return Err(AvocetError::PageNotFound { page_number });
        }

        // pending writes are visible inside an epoch
        if let Some((_, data)) = state
            .pending
            .iter()
            .rev()
            .find(|(number, _)| *number == page_number)
        {
            buf.copy_from_slice(data);
            return Ok(());
        }

        if page_number >= state.file_pages {
            // reserved but never written
            buf.fill(0);
            return Ok(());
        }

        let offset = (page_number as u64) * (self.page_size as u64);
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&self, buf: &[u8], page_number: u32) -> Result<()> {
        self.check_buffer(buf.len())?;

        let mut state = self.state.lock();
        if page_number >= state.next_page_number {
            state.next_page_number = page_number + 1;
        }

        if state.epoch_depth > 0 {
            state.pending.push((page_number, buf.to_vec()));
            return Ok(());
        }

        self.write_at(&mut state, buf, page_number)?;
        if self.fsync_enabled {
            state.file.sync_all()?;
        }
        Ok(())
    }

    fn reserve_page_number(&self) -> Result<u32> {
        let mut state = self.state.lock();
        let page_number = state.next_page_number;
        state.next_page_number = page_number + 1;
        Ok(page_number)
    }

    fn start_write(&self) {
        let mut state = self.state.lock();
        state.epoch_depth += 1;
    }

    fn finish_write(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.epoch_depth == 0 {
            return Ok(());
        }
        state.epoch_depth -= 1;
        if state.epoch_depth > 0 {
            return Ok(());
        }

        let pending = std::mem::take(&mut state.pending);
        for (page_number, buf) in pending {
            self.write_at(&mut state, &buf, page_number)?;
        }
        if self.fsync_enabled {
            state.file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_channel() -> (FilePageChannel, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = ChannelConfig {
            path: dir.path().join("test.adb"),
            fsync_enabled: false,
        };
        let channel = FilePageChannel::new(config, JetFormat::V4).unwrap();
        (channel, dir)
    }

    #[test]
    fn test_page_size_from_format() {
        let (channel, _dir) = create_test_channel();
        assert_eq!(channel.page_size(), 4096);
        assert_eq!(channel.create_page_buffer().len(), 4096);
    }

    #[test]
    fn test_reserve_page_numbers() {
        let (channel, _dir) = create_test_channel();
        assert_eq!(channel.reserve_page_number().unwrap(), 0);
        assert_eq!(channel.reserve_page_number().unwrap(), 1);
        assert_eq!(channel.reserve_page_number().unwrap(), 2);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (channel, _dir) = create_test_channel();
        let page = channel.reserve_page_number().unwrap();

        let mut data = channel.create_page_buffer();
        data[0] = 0xAB;
        data[100] = 0xCD;
        data[4095] = 0xEF;
        channel.write_page(&data, page).unwrap();

        let mut read = channel.create_page_buffer();
        channel.read_page(&mut read, page).unwrap();
        assert_eq!(read[0], 0xAB);
        assert_eq!(read[100], 0xCD);
        assert_eq!(read[4095], 0xEF);
    }

    #[test]
    fn test_read_unreserved_page_fails() {
        let (channel, _dir) = create_test_channel();
        let mut buf = channel.create_page_buffer();
        let result = channel.read_page(&mut buf, 5);
        assert!(matches!(
            result,
            Err(AvocetError::PageNotFound { page_number: 5 })
        ));
    }

    #[test]
    fn test_read_reserved_unwritten_page_is_zeroed() {
        let (channel, _dir) = create_test_channel();
        let page = channel.reserve_page_number().unwrap();
        let mut buf = channel.create_page_buffer();
        buf.fill(0xFF);
        channel.read_page(&mut buf, page).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_wrong_buffer_size_rejected() {
        let (channel, _dir) = create_test_channel();
        let page = channel.reserve_page_number().unwrap();
        let short = vec![0u8; 100];
        assert!(matches!(
            channel.write_page(&short, page),
            Err(AvocetError::PageSizeMismatch {
                expected: 4096,
                actual: 100
            })
        ));
    }

    #[test]
    fn test_epoch_buffers_writes_until_finish() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("epoch.adb");
        let config = ChannelConfig {
            path: path.clone(),
            fsync_enabled: false,
        };
        let channel = FilePageChannel::new(config, JetFormat::V4).unwrap();

        let page = channel.reserve_page_number().unwrap();
        let mut data = channel.create_page_buffer();
        data[0] = 0x42;

        channel.start_write();
        channel.write_page(&data, page).unwrap();

        // nothing on disk yet
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        // but the write is visible through the channel
        let mut read = channel.create_page_buffer();
        channel.read_page(&mut read, page).unwrap();
        assert_eq!(read[0], 0x42);

        channel.finish_write().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn test_nested_epochs_flush_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested.adb");
        let config = ChannelConfig {
            path: path.clone(),
            fsync_enabled: false,
        };
        let channel = FilePageChannel::new(config, JetFormat::V4).unwrap();

        let page = channel.reserve_page_number().unwrap();
        let data = channel.create_page_buffer();

        channel.start_write();
        channel.start_write();
        channel.write_page(&data, page).unwrap();
        channel.finish_write().unwrap();
        // inner finish does not flush
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        channel.finish_write().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn test_write_epoch_guard_finishes_on_drop() {
        let (channel, _dir) = create_test_channel();
        {
            let _epoch = WriteEpoch::begin(&channel);
            assert_eq!(channel.state.lock().epoch_depth, 1);
        }
        assert_eq!(channel.state.lock().epoch_depth, 0);
    }

    #[test]
    fn test_write_epoch_guard_explicit_finish() {
        let (channel, _dir) = create_test_channel();
        let epoch = WriteEpoch::begin(&channel);
        epoch.finish().unwrap();
        assert_eq!(channel.state.lock().epoch_depth, 0);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.adb");
        let page;

        {
            let config = ChannelConfig {
                path: path.clone(),
                fsync_enabled: true,
            };
            let channel = FilePageChannel::new(config, JetFormat::V4).unwrap();
            page = channel.reserve_page_number().unwrap();
            let mut data = channel.create_page_buffer();
            data[7] = 0x77;
            channel.write_page(&data, page).unwrap();
        }

        {
            let config = ChannelConfig {
                path,
                fsync_enabled: true,
            };
            let channel = FilePageChannel::new(config, JetFormat::V4).unwrap();
            let mut read = channel.create_page_buffer();
            channel.read_page(&mut read, page).unwrap();
            assert_eq!(read[7], 0x77);
            // the reopened channel reserves past existing pages
            assert_eq!(channel.reserve_page_number().unwrap(), page + 1);
        }
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let original = ChannelConfig::default();
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: ChannelConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original.path, deserialized.path);
        assert_eq!(original.fsync_enabled, deserialized.fsync_enabled);
    }
}
