//! Single-writer append path for one (owner_uid, dest_uid) pair: appends
//! frames to the current page, rolling to a new page file once the current
//! one cannot hold the next record (spec.md §4.A, §4.B). Grounded on the
//! teacher's segment writer: build the next page in a `.tmp` file, publish
//! it by atomic rename once it has at least one committed frame.

use std::path::{Path, PathBuf};

use crate::core::frame::{aligned_record_len, FrameHeader, HEADER_SIZE};
use crate::core::mmap::MmapFile;
use crate::core::page::{
    page_path, page_temp_path, pair_dir, PageHeader, DEFAULT_PAGE_SIZE, PAGE_FLAG_SEALED,
    PAGE_HEADER_SIZE,
};
use crate::core::{Error, Result};

pub struct PageWriter {
    dir: PathBuf,
    owner_uid: u32,
    dest_uid: u32,
    page_size: usize,
    page_no: u32,
    write_offset: usize,
    seq: u64,
    mmap: Option<MmapFile>,
    has_records: bool,
    pages_published: u64,
    last_gen_time: u64,
}

impl PageWriter {
    pub fn new(journal_root: &Path, owner_uid: u32, dest_uid: u32, page_size: usize) -> Result<Self> {
        let dir = pair_dir(journal_root, owner_uid, dest_uid);
        std::fs::create_dir_all(&dir)?;
        let page_no = crate::core::page::list_page_ids(&dir)?
            .last()
            .map(|n| n + 1)
            .unwrap_or(0);
        Ok(Self {
            dir,
            owner_uid,
            dest_uid,
            page_size,
            page_no,
            write_offset: PAGE_HEADER_SIZE,
            seq: 0,
            mmap: None,
            has_records: false,
            pages_published: 0,
            last_gen_time: 0,
        })
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub fn pages_published(&self) -> u64 {
        self.pages_published
    }

    fn needs_roll(&self, payload_len: usize) -> bool {
        self.write_offset + aligned_record_len(payload_len) > self.page_size
    }

    fn ensure_page(&mut self) -> Result<()> {
        if self.mmap.is_some() {
            return Ok(());
        }
        let temp_path = page_temp_path(&self.dir, self.page_no);
        let mut mmap = MmapFile::create(&temp_path, self.page_size)?;
        let header = PageHeader::new(self.page_no, self.owner_uid, self.dest_uid, self.last_gen_time);
        mmap.range_mut(0, PAGE_HEADER_SIZE)?
            .copy_from_slice(&header.to_bytes());
        self.mmap = Some(mmap);
        self.write_offset = PAGE_HEADER_SIZE;
        self.has_records = false;
        Ok(())
    }

    /// Appends one frame. Clamps `gen_time` to monotonically increase
    /// within this writer's page (spec.md §7 clock regression guard).
    pub fn append(
        &mut self,
        gen_time: u64,
        trigger_time: u64,
        msg_type: u32,
        source: u32,
        dest: u32,
        payload: &[u8],
    ) -> Result<u64> {
        if payload.len() > crate::core::frame::MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge);
        }
        let gen_time = gen_time.max(self.last_gen_time + 1);
        if self.needs_roll(payload.len()) {
            self.roll()?;
        }
        self.ensure_page()?;

        let record_len = aligned_record_len(payload.len());
        let crc = FrameHeader::crc32(payload);
        let header = FrameHeader::new_uncommitted(gen_time, trigger_time, msg_type, source, dest, crc);

        let mmap = self.mmap.as_mut().expect("page open");
        let offset = self.write_offset;
        let payload_region = mmap.range_mut(offset + HEADER_SIZE, payload.len())?;
        payload_region.copy_from_slice(payload);

        let header_region = mmap.range_mut(offset, HEADER_SIZE)?;
        header_region.copy_from_slice(&header.to_bytes());

        let commit_len = FrameHeader::commit_len_for_payload(payload.len())?;
        let header_ptr = mmap.as_mut_ptr().wrapping_add(offset);
        FrameHeader::store_commit_len(header_ptr, commit_len);

        self.seq += 1;
        self.write_offset += record_len;
        self.has_records = true;
        self.last_gen_time = gen_time;
        Ok(gen_time)
    }

    fn seal_and_publish_current(&mut self) -> Result<()> {
        let Some(mut mmap) = self.mmap.take() else {
            return Ok(());
        };
        {
            let header_bytes: [u8; PAGE_HEADER_SIZE] =
                mmap.range_mut(0, PAGE_HEADER_SIZE)?.try_into().expect("slice length");
            let mut header = PageHeader::from_bytes(&header_bytes)?;
            header.flags |= PAGE_FLAG_SEALED;
            mmap.range_mut(0, PAGE_HEADER_SIZE)?
                .copy_from_slice(&header.to_bytes());
        }
        mmap.flush_sync()?;
        drop(mmap);

        let temp_path = page_temp_path(&self.dir, self.page_no);
        let final_path = page_path(&self.dir, self.page_no);
        publish_page(&temp_path, &final_path)?;
        self.pages_published += 1;
        Ok(())
    }

    /// Seals the current page (if it has records) and advances to the next one.
    pub fn roll(&mut self) -> Result<()> {
        if self.has_records {
            self.seal_and_publish_current()?;
        } else if let Some(mmap) = self.mmap.take() {
            drop(mmap);
            let _ = std::fs::remove_file(page_temp_path(&self.dir, self.page_no));
        }
        self.page_no += 1;
        self.write_offset = PAGE_HEADER_SIZE;
        self.has_records = false;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush_async()?;
        }
        Ok(())
    }

    /// Seals and publishes the final page, or discards it if empty. Call on
    /// clean shutdown.
    pub fn finish(&mut self) -> Result<()> {
        if self.has_records {
            self.seal_and_publish_current()
        } else if let Some(mmap) = self.mmap.take() {
            drop(mmap);
            let _ = std::fs::remove_file(page_temp_path(&self.dir, self.page_no));
            Ok(())
        } else {
            Ok(())
        }
    }
}

fn publish_page(temp_path: &Path, final_path: &Path) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::ffi::CString;
        let temp_c = CString::new(temp_path.as_os_str().as_encoded_bytes()).expect("no NUL");
        let final_c = CString::new(final_path.as_os_str().as_encoded_bytes()).expect("no NUL");
        let res = unsafe {
            libc::renameat2(
                libc::AT_FDCWD,
                temp_c.as_ptr(),
                libc::AT_FDCWD,
                final_c.as_ptr(),
                libc::RENAME_NOREPLACE,
            )
        };
        if res == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ENOSYS) | Some(libc::EINVAL) => {
                std::fs::rename(temp_path, final_path)?;
                Ok(())
            }
            _ => Err(Error::Io(err)),
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::fs::rename(temp_path, final_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_finish_publishes_one_page() {
        let dir = tempdir().unwrap();
        let mut writer = PageWriter::new(dir.path(), 1, 2, DEFAULT_PAGE_SIZE).unwrap();
        writer.append(1, 1, 10, 1, 2, b"hello").unwrap();
        writer.finish().unwrap();
        let pair = pair_dir(dir.path(), 1, 2);
        let ids = crate::core::page::list_page_ids(&pair).unwrap();
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn empty_finish_publishes_nothing() {
        let dir = tempdir().unwrap();
        let mut writer = PageWriter::new(dir.path(), 1, 2, DEFAULT_PAGE_SIZE).unwrap();
        writer.finish().unwrap();
        let pair = pair_dir(dir.path(), 1, 2);
        let ids = crate::core::page::list_page_ids(&pair).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn roll_advances_page_number() {
        let dir = tempdir().unwrap();
        let mut writer = PageWriter::new(dir.path(), 1, 2, DEFAULT_PAGE_SIZE).unwrap();
        writer.append(1, 1, 10, 1, 2, b"a").unwrap();
        writer.roll().unwrap();
        writer.append(2, 2, 10, 1, 2, b"b").unwrap();
        writer.finish().unwrap();
        let pair = pair_dir(dir.path(), 1, 2);
        let ids = crate::core::page::list_page_ids(&pair).unwrap();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn gen_time_is_clamped_to_strictly_increase() {
        let dir = tempdir().unwrap();
        let mut writer = PageWriter::new(dir.path(), 1, 2, DEFAULT_PAGE_SIZE).unwrap();
        let t1 = writer.append(10, 10, 1, 1, 2, b"a").unwrap();
        let t2 = writer.append(5, 5, 1, 1, 2, b"b").unwrap();
        assert!(t2 > t1);
        writer.finish().unwrap();
    }

    #[test]
    fn payload_too_large_is_rejected() {
        let dir = tempdir().unwrap();
        let mut writer = PageWriter::new(dir.path(), 1, 2, 4096).unwrap();
        let big = vec![0u8; crate::core::frame::MAX_PAYLOAD_LEN + 1];
        let err = writer.append(1, 1, 1, 1, 2, &big).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge));
    }
}
