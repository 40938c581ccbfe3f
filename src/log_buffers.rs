//! Ownership of the mapped log file.
//!
//! A log is one file: three term buffers then the metadata block. The
//! media driver normally creates it; [`LogBuffers::create`] exists for that
//! side of the boundary and for tests. Either way the mapping must outlive
//! every view handed out, which the publication guarantees by holding the
//! `Arc<LogBuffers>` for its whole life.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use memmap2::MmapMut;

use crate::buffer::LogBuffer;
use crate::config::LogConfig;
use crate::error::{LogError, LogResult};
use crate::frame;
use crate::layout;

pub struct LogBuffers {
    path: PathBuf,
    mmap: MmapMut,
    base: NonNull<u8>,
    term_length: usize,
}

// The raw views alias the mapping, never outlive it, and all shared fields
// go through atomics.
unsafe impl Send for LogBuffers {}
unsafe impl Sync for LogBuffers {}

impl LogBuffers {
    /// Create a fresh log file and initialize its metadata block.
    pub fn create(path: &Path, config: &LogConfig) -> LogResult<Self> {
        config.validate()?;

        let length = config.log_length();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(length as u64)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        if mmap.len() != length {
            return Err(LogError::invalid_state(format!(
                "mapped {} bytes, expected {}",
                mmap.len(),
                length
            )));
        }
        // A fresh mapping of a truncated file is already zeroed; only the
        // metadata needs stamping.
        let base = unsafe { NonNull::new_unchecked(mmap.as_mut_ptr()) };
        let log = Self {
            path: path.to_path_buf(),
            mmap,
            base,
            term_length: config.term_length,
        };
        log.initialize_meta_data(config);
        Ok(log)
    }

    /// Map a log some other process created, validating its metadata.
    pub fn map_existing(path: &Path) -> LogResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        if mmap.len() <= layout::LOG_META_DATA_LENGTH {
            return Err(LogError::invalid_state(format!(
                "log file {} too small for a metadata block",
                path.display()
            )));
        }
        let term_space = mmap.len() - layout::LOG_META_DATA_LENGTH;
        if term_space % layout::PARTITION_COUNT != 0 {
            return Err(LogError::invalid_state(format!(
                "log file {} is not three equal terms plus metadata",
                path.display()
            )));
        }
        let term_length = term_space / layout::PARTITION_COUNT;
        layout::check_term_length(term_length)?;

        let base = unsafe { NonNull::new_unchecked(mmap.as_mut_ptr()) };
        let log = Self {
            path: path.to_path_buf(),
            mmap,
            base,
            term_length,
        };

        let meta = log.meta_data_buffer();
        let recorded = layout::term_length(&meta);
        if recorded != term_length {
            return Err(LogError::corruption(format!(
                "metadata term length {recorded} disagrees with file length {term_length}"
            )));
        }
        layout::check_mtu_length(layout::mtu_length(&meta), term_length)?;

        Ok(log)
    }

    fn initialize_meta_data(&self, config: &LogConfig) {
        let meta = self.meta_data_buffer();

        meta.put_i32(layout::LOG_INITIAL_TERM_ID_OFFSET, config.initial_term_id);
        meta.put_i32(layout::LOG_MTU_LENGTH_OFFSET, config.mtu_length as i32);
        meta.put_i32(layout::LOG_TERM_LENGTH_OFFSET, config.term_length as i32);
        meta.put_i64(layout::LOG_TIME_OF_LAST_SM_OFFSET, 0);

        let mut header = [0u8; frame::HEADER_LENGTH];
        header[frame::VERSION_OFFSET] = frame::FRAME_VERSION;
        header[frame::FLAGS_OFFSET] = frame::UNFRAGMENTED;
        header[frame::TYPE_OFFSET..frame::TYPE_OFFSET + 2]
            .copy_from_slice(&frame::HDR_TYPE_DATA.to_le_bytes());
        header[frame::SESSION_ID_OFFSET..frame::SESSION_ID_OFFSET + 4]
            .copy_from_slice(&config.session_id.to_le_bytes());
        header[frame::STREAM_ID_OFFSET..frame::STREAM_ID_OFFSET + 4]
            .copy_from_slice(&config.stream_id.to_le_bytes());
        meta.put_bytes(layout::LOG_DEFAULT_FRAME_HEADER_OFFSET, &header);

        // Partition 0 starts the stream at the initial term id; the other
        // tails are seeded as the rotation reaches them.
        meta.put_i64(
            layout::tail_counter_offset(0),
            layout::pack_tail(config.initial_term_id, 0),
        );
        meta.put_i64(layout::tail_counter_offset(1), 0);
        meta.put_i64(layout::tail_counter_offset(2), 0);
        meta.put_i32_ordered(layout::LOG_ACTIVE_PARTITION_INDEX_OFFSET, 0);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn term_length(&self) -> usize {
        self.term_length
    }

    /// View of one term buffer.
    pub fn term_buffer(&self, partition_index: usize) -> LogBuffer {
        assert!(partition_index < layout::PARTITION_COUNT);
        let offset = partition_index * self.term_length;
        let ptr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        LogBuffer::wrap(ptr, self.term_length)
    }

    /// Views of all three term buffers in partition order.
    pub fn term_buffers(&self) -> [LogBuffer; layout::PARTITION_COUNT] {
        [self.term_buffer(0), self.term_buffer(1), self.term_buffer(2)]
    }

    /// View of the metadata block.
    pub fn meta_data_buffer(&self) -> LogBuffer {
        let offset = self.term_length * layout::PARTITION_COUNT;
        let ptr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        LogBuffer::wrap(ptr, layout::LOG_META_DATA_LENGTH)
    }
}

impl std::fmt::Debug for LogBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBuffers")
            .field("path", &self.path)
            .field("term_length", &self.term_length)
            .field("mapped_length", &self.mmap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_initializes_meta_data() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("stream.log");
        let cfg = LogConfig {
            initial_term_id: 5,
            session_id: 11,
            stream_id: 1001,
            ..LogConfig::default()
        };
        let log = LogBuffers::create(&path, &cfg).expect("create");

        let meta = log.meta_data_buffer();
        assert_eq!(layout::initial_term_id(&meta), 5);
        assert_eq!(layout::mtu_length(&meta), 1408);
        assert_eq!(layout::term_length(&meta), 64 * 1024);
        assert_eq!(layout::active_partition_index(&meta), 0);
        assert_eq!(
            meta.get_i64(layout::tail_counter_offset(0)),
            layout::pack_tail(5, 0)
        );

        let header = layout::default_frame_header(&meta);
        assert_eq!(header[frame::FLAGS_OFFSET], frame::UNFRAGMENTED);
        assert_eq!(
            i32::from_le_bytes(header[frame::SESSION_ID_OFFSET..frame::SESSION_ID_OFFSET + 4].try_into().unwrap()),
            11
        );
        assert_eq!(
            i32::from_le_bytes(header[frame::STREAM_ID_OFFSET..frame::STREAM_ID_OFFSET + 4].try_into().unwrap()),
            1001
        );
    }

    #[test]
    fn map_existing_round_trips() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("stream.log");
        let cfg = LogConfig::default();
        {
            LogBuffers::create(&path, &cfg).expect("create");
        }
        let log = LogBuffers::map_existing(&path).expect("map");
        assert_eq!(log.term_length(), cfg.term_length);
        assert_eq!(
            layout::mtu_length(&log.meta_data_buffer()),
            cfg.mtu_length
        );
    }

    #[test]
    fn map_existing_rejects_truncated_files() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("short.log");
        std::fs::write(&path, [0u8; 64]).expect("write");
        assert!(LogBuffers::map_existing(&path).is_err());
    }

    #[test]
    fn create_refuses_existing_file() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("stream.log");
        LogBuffers::create(&path, &LogConfig::default()).expect("create");
        assert!(LogBuffers::create(&path, &LogConfig::default()).is_err());
    }
}
