//! Read-only view over one page file. A `JournalReader` holds one of these
//! per currently-open page of each source it follows, advancing to the
//! next page once the current one is sealed and exhausted.

use std::path::Path;

use crate::core::frame::{aligned_record_len, FrameHeader, HEADER_SIZE};
use crate::core::mmap::MmapFile;
use crate::core::page::{PageHeader, PAGE_HEADER_SIZE};
use crate::core::{Error, Result};

pub struct PageReader {
    mmap: MmapFile,
    header: PageHeader,
    offset: usize,
}

/// A frame read back from a page: owned copy of the header plus payload.
#[derive(Debug, Clone)]
pub struct ReadFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl PageReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mmap = MmapFile::open(path)?;
        let header_bytes: [u8; PAGE_HEADER_SIZE] = mmap.as_slice()[..PAGE_HEADER_SIZE]
            .try_into()
            .expect("slice length");
        let header = PageHeader::from_bytes(&header_bytes)?;
        Ok(Self {
            mmap,
            header,
            offset: PAGE_HEADER_SIZE,
        })
    }

    pub fn page_no(&self) -> u32 {
        self.header.page_no
    }

    pub fn sealed(&self) -> bool {
        self.header.sealed()
    }

    /// Reads the next committed frame, if one is available yet. Returns
    /// `Ok(None)` rather than an error when the writer simply hasn't
    /// published the next frame (commit_len == 0).
    pub fn next(&mut self) -> Result<Option<ReadFrame>> {
        if self.offset + HEADER_SIZE > self.mmap.len() {
            return Ok(None);
        }
        let header_ptr = self.mmap.as_ptr().wrapping_add(self.offset);
        let commit_len = FrameHeader::load_commit_len(header_ptr);
        if commit_len == 0 {
            return Ok(None);
        }
        let payload_len = FrameHeader::payload_len_from_commit(commit_len)?;
        let header_bytes: [u8; HEADER_SIZE] = self.mmap.as_slice()
            [self.offset..self.offset + HEADER_SIZE]
            .try_into()
            .expect("slice length");
        let header = FrameHeader::from_bytes(&header_bytes)?;
        let payload_start = self.offset + HEADER_SIZE;
        let payload = self.mmap.as_slice()[payload_start..payload_start + payload_len].to_vec();
        header.validate_crc(&payload)?;

        self.offset += aligned_record_len(payload_len);
        Ok(Some(ReadFrame { header, payload }))
    }

    /// Seeks to the first frame whose `gen_time >= target_ns`, scanning from
    /// the current position onward (journal files are append-only and
    /// time-ordered within a page, so this never needs to scan backward).
    pub fn seek_to_time(&mut self, target_ns: u64) -> Result<Option<ReadFrame>> {
        loop {
            let start = self.offset;
            match self.next()? {
                Some(frame) if frame.header.gen_time >= target_ns => return Ok(Some(frame)),
                Some(_) => continue,
                None => {
                    self.offset = start;
                    return Ok(None);
                }
            }
        }
    }

    pub fn corrupt_tail(&self) -> Result<bool> {
        if self.offset + HEADER_SIZE > self.mmap.len() {
            return Ok(false);
        }
        let header_ptr = self.mmap.as_ptr().wrapping_add(self.offset);
        let commit_len = FrameHeader::load_commit_len(header_ptr);
        if commit_len == 0 {
            return Ok(false);
        }
        let header_bytes: [u8; HEADER_SIZE] = self.mmap.as_slice()
            [self.offset..self.offset + HEADER_SIZE]
            .try_into()
            .expect("slice length");
        match FrameHeader::from_bytes(&header_bytes) {
            Ok(_) => Ok(false),
            Err(Error::Corrupt(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::page::DEFAULT_PAGE_SIZE;
    use crate::core::page_writer::PageWriter;
    use tempfile::tempdir;

    #[test]
    fn reads_back_written_frames_in_order() {
        let dir = tempdir().unwrap();
        let mut writer = PageWriter::new(dir.path(), 1, 2, DEFAULT_PAGE_SIZE).unwrap();
        writer.append(10, 10, 1, 1, 2, b"first").unwrap();
        writer.append(20, 20, 2, 1, 2, b"second").unwrap();
        writer.finish().unwrap();

        let pair = crate::core::page::pair_dir(dir.path(), 1, 2);
        let path = crate::core::page::page_path(&pair, 0);
        let mut reader = PageReader::open(&path).unwrap();

        let first = reader.next().unwrap().unwrap();
        assert_eq!(first.payload, b"first");
        assert_eq!(first.header.gen_time, 10);

        let second = reader.next().unwrap().unwrap();
        assert_eq!(second.payload, b"second");

        assert!(reader.next().unwrap().is_none());
        assert!(reader.sealed());
    }

    #[test]
    fn seek_to_time_skips_earlier_frames() {
        let dir = tempdir().unwrap();
        let mut writer = PageWriter::new(dir.path(), 1, 2, DEFAULT_PAGE_SIZE).unwrap();
        writer.append(10, 10, 1, 1, 2, b"a").unwrap();
        writer.append(20, 20, 1, 1, 2, b"b").unwrap();
        writer.append(30, 30, 1, 1, 2, b"c").unwrap();
        writer.finish().unwrap();

        let pair = crate::core::page::pair_dir(dir.path(), 1, 2);
        let path = crate::core::page::page_path(&pair, 0);
        let mut reader = PageReader::open(&path).unwrap();
        let found = reader.seek_to_time(15).unwrap().unwrap();
        assert_eq!(found.payload, b"b");
    }
}
