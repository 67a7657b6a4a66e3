//! Low-level primitives: timestamps, the frame wire format, memory-mapped
//! files, single-writer locking, and futex-based waiting. Everything above
//! `core` (pages, journals, location registry, master/apprentice) is built
//! out of these.

pub mod clock;
pub mod error;
pub mod frame;
pub mod mmap;
pub mod page;
pub mod page_reader;
pub mod page_writer;
pub mod wait;
pub mod writer_lock;

pub use clock::{Clock, QuantaClock, SystemClock};
pub use error::{Error, Result};
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_LEN, RECORD_ALIGN};
pub use mmap::MmapFile;
pub use page::{PageHeader, DEFAULT_PAGE_SIZE};
pub use page_reader::{PageReader, ReadFrame};
pub use page_writer::PageWriter;
pub use writer_lock::{lock_owner_alive, read_lock_info, try_lock, write_lock_info, WriterLockInfo};
