//! Journal reader/writer (spec.md §4.B): a `JournalWriter` appends frames
//! for one owner into a given destination's page sequence; a `JournalReader`
//! merges frames across every (owner, dest) pair it has joined, yielding
//! them in non-decreasing `gen_time`, modeled directly on the teacher's
//! fan-in reader (`ipc::fanin::FanInReader`): one pending frame buffered per
//! source, O(N) min-select per `next()`.

use std::path::PathBuf;

use crate::core::page::DEFAULT_PAGE_SIZE;
use crate::core::{Clock, PageReader, PageWriter, ReadFrame, Result};
use crate::location::PUBLIC_UID;

pub struct JournalWriter {
    owner_uid: u32,
    journal_root: PathBuf,
    page_size: usize,
    writers: std::collections::HashMap<u32, PageWriter>,
    last_gen_time: u64,
}

impl JournalWriter {
    pub fn new(journal_root: PathBuf, owner_uid: u32) -> Self {
        Self {
            owner_uid,
            journal_root,
            page_size: DEFAULT_PAGE_SIZE,
            writers: std::collections::HashMap::new(),
            last_gen_time: 0,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    fn writer_for(&mut self, dest_uid: u32) -> Result<&mut PageWriter> {
        if !self.writers.contains_key(&dest_uid) {
            let writer = PageWriter::new(&self.journal_root, self.owner_uid, dest_uid, self.page_size)?;
            self.writers.insert(dest_uid, writer);
        }
        Ok(self.writers.get_mut(&dest_uid).expect("just inserted"))
    }

    /// Writes one frame bound for `dest_uid`. `trigger_time` is the source
    /// event's own timestamp; pass the same value as `gen_time` unless this
    /// frame is re-publishing something the writer itself did not generate
    /// (e.g. `RequestStart` carries the master's construction time, not
    /// `gen_time`).
    pub fn write(&mut self, dest_uid: u32, gen_time: u64, trigger_time: u64, msg_type: u32, payload: &[u8]) -> Result<u64> {
        let owner_uid = self.owner_uid;
        let gen_time = self.writer_for(dest_uid)?.append(gen_time, trigger_time, msg_type, owner_uid, dest_uid, payload)?;
        self.last_gen_time = self.last_gen_time.max(gen_time);
        Ok(gen_time)
    }

    /// Convenience for marking an event at the current clock time, where
    /// `trigger_time == gen_time`.
    pub fn mark(&mut self, clock: &dyn Clock, dest_uid: u32, msg_type: u32, payload: &[u8]) -> Result<u64> {
        let now = clock.now();
        self.write(dest_uid, now, now, msg_type, payload)
    }

    /// Marks an event whose `trigger_time` differs from the commit time,
    /// e.g. republishing another process's frame.
    pub fn mark_with_time(&mut self, clock: &dyn Clock, dest_uid: u32, trigger_time: u64, msg_type: u32, payload: &[u8]) -> Result<u64> {
        let now = clock.now();
        self.write(dest_uid, now, trigger_time, msg_type, payload)
    }

    pub fn broadcast(&mut self, clock: &dyn Clock, msg_type: u32, payload: &[u8]) -> Result<u64> {
        self.mark(clock, PUBLIC_UID, msg_type, payload)
    }

    pub fn flush_all(&self) -> Result<()> {
        for writer in self.writers.values() {
            writer.flush()?;
        }
        Ok(())
    }

    pub fn finish_all(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.finish()?;
        }
        Ok(())
    }

    /// Seals and drops the writer targeting `dest_uid`, if one was ever
    /// opened. Called on `deregister_app` so `writers_` doesn't keep a
    /// deregistered peer's command-journal handle alive (spec.md §4.G
    /// deregister step 4, testable invariant 5).
    pub fn remove_writer(&mut self, dest_uid: u32) -> Result<()> {
        if let Some(mut writer) = self.writers.remove(&dest_uid) {
            writer.finish()?;
        }
        Ok(())
    }
}

struct Source {
    journal_root: PathBuf,
    owner_uid: u32,
    dest_uid: u32,
    page_no: u32,
    reader: Option<PageReader>,
}

impl Source {
    fn advance_page_if_exhausted(&mut self) -> Result<()> {
        let should_advance = matches!(&self.reader, Some(r) if r.sealed());
        if should_advance {
            let pair = crate::core::page::pair_dir(&self.journal_root, self.owner_uid, self.dest_uid);
            let next_no = self.page_no + 1;
            let next_path = crate::core::page::page_path(&pair, next_no);
            if next_path.exists() {
                self.reader = Some(PageReader::open(&next_path)?);
                self.page_no = next_no;
            }
        }
        Ok(())
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.reader.is_none() {
            let pair = crate::core::page::pair_dir(&self.journal_root, self.owner_uid, self.dest_uid);
            let path = crate::core::page::page_path(&pair, self.page_no);
            if path.exists() {
                self.reader = Some(PageReader::open(&path)?);
            }
        }
        Ok(())
    }

    fn peek_next(&mut self) -> Result<Option<ReadFrame>> {
        self.ensure_open()?;
        loop {
            let frame = match &mut self.reader {
                Some(r) => r.next()?,
                None => return Ok(None),
            };
            if frame.is_some() {
                return Ok(frame);
            }
            let was_sealed = self.reader.as_ref().map(|r| r.sealed()).unwrap_or(false);
            if !was_sealed {
                return Ok(None);
            }
            let page_before = self.page_no;
            self.advance_page_if_exhausted()?;
            if self.page_no == page_before {
                // sealed, and no newer page published yet.
                return Ok(None);
            }
        }
    }
}

struct Pending {
    frame: ReadFrame,
}

/// Merges frames across every joined (owner, dest) pair in non-decreasing
/// `gen_time`. Ties are broken by join order, with the master's own
/// command journal always joined first (spec.md §4.B, §8 invariant 2).
pub struct JournalReader {
    sources: Vec<Source>,
    pending: Vec<Option<Pending>>,
}

impl JournalReader {
    pub fn new() -> Self {
        Self { sources: Vec::new(), pending: Vec::new() }
    }

    /// Registers a new source to merge frames from. The first call should
    /// be the master's own command journal, per this reader's tie-break rule.
    pub fn join(&mut self, journal_root: PathBuf, owner_uid: u32, dest_uid: u32) {
        self.sources.push(Source { journal_root, owner_uid, dest_uid, page_no: 0, reader: None });
        self.pending.push(None);
    }

    /// Detaches every source whose owner or dest is `uid` — "removes all
    /// sources from or to that uid" (spec.md §4.B), not just one exact
    /// (owner, dest) pair.
    pub fn disjoin(&mut self, uid: u32) {
        let mut idx = 0;
        while idx < self.sources.len() {
            if self.sources[idx].owner_uid == uid || self.sources[idx].dest_uid == uid {
                self.sources.remove(idx);
                self.pending.remove(idx);
            } else {
                idx += 1;
            }
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    fn fill_pending(&mut self) -> Result<()> {
        for idx in 0..self.sources.len() {
            if self.pending[idx].is_none() {
                if let Some(frame) = self.sources[idx].peek_next()? {
                    self.pending[idx] = Some(Pending { frame });
                }
            }
        }
        Ok(())
    }

    pub fn data_available(&mut self) -> Result<bool> {
        self.fill_pending()?;
        Ok(self.pending.iter().any(Option::is_some))
    }

    /// Returns the next frame in merge order without consuming it; call
    /// `next()` to consume.
    pub fn current_frame(&mut self) -> Result<Option<&ReadFrame>> {
        self.fill_pending()?;
        let idx = self.earliest_index();
        Ok(idx.map(move |i| &self.pending[i].as_ref().expect("filled").frame))
    }

    fn earliest_index(&self) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (idx, slot) in self.pending.iter().enumerate() {
            if let Some(pending) = slot {
                let gen_time = pending.frame.header.gen_time;
                match best {
                    None => best = Some((idx, gen_time)),
                    Some((_, best_time)) if gen_time < best_time => best = Some((idx, gen_time)),
                    _ => {}
                }
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Consumes and returns the next frame in merge order, or `None` if no
    /// source currently has a committed frame available.
    pub fn next(&mut self) -> Result<Option<ReadFrame>> {
        self.fill_pending()?;
        let idx = match self.earliest_index() {
            Some(idx) => idx,
            None => return Ok(None),
        };
        let pending = self.pending[idx].take().expect("earliest_index found Some");
        Ok(Some(pending.frame))
    }

    /// Seeks every joined source to the first frame at or after `target_ns`
    /// and discards any buffered pending frame older than it.
    pub fn seek_to_time(&mut self, target_ns: u64) -> Result<()> {
        for idx in 0..self.sources.len() {
            self.pending[idx] = self.sources[idx]
                .peek_next()?
                .filter(|f| f.header.gen_time >= target_ns)
                .map(|frame| Pending { frame });
        }
        Ok(())
    }
}

impl Default for JournalReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use tempfile::tempdir;

    #[test]
    fn merges_two_sources_by_gen_time() {
        let dir = tempdir().unwrap();
        let clock = SystemClock;

        let mut master_writer = JournalWriter::new(dir.path().to_path_buf(), 1);
        master_writer.write(0, 100, 100, 1, b"m1").unwrap();
        master_writer.finish_all().unwrap();

        let mut peer_writer = JournalWriter::new(dir.path().to_path_buf(), 2);
        peer_writer.write(0, 50, 50, 2, b"p1").unwrap();
        peer_writer.finish_all().unwrap();
        let _ = &clock;

        let mut reader = JournalReader::new();
        reader.join(dir.path().to_path_buf(), 1, 0);
        reader.join(dir.path().to_path_buf(), 2, 0);

        let first = reader.next().unwrap().unwrap();
        assert_eq!(first.payload, b"p1");
        let second = reader.next().unwrap().unwrap();
        assert_eq!(second.payload, b"m1");
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn ties_break_by_join_order_master_first() {
        let dir = tempdir().unwrap();

        let mut master_writer = JournalWriter::new(dir.path().to_path_buf(), 1);
        master_writer.write(0, 100, 100, 1, b"master").unwrap();
        master_writer.finish_all().unwrap();

        let mut peer_writer = JournalWriter::new(dir.path().to_path_buf(), 2);
        peer_writer.write(0, 100, 100, 2, b"peer").unwrap();
        peer_writer.finish_all().unwrap();

        let mut reader = JournalReader::new();
        reader.join(dir.path().to_path_buf(), 1, 0);
        reader.join(dir.path().to_path_buf(), 2, 0);

        let first = reader.next().unwrap().unwrap();
        assert_eq!(first.payload, b"master");
    }

    #[test]
    fn disjoin_removes_a_source() {
        let dir = tempdir().unwrap();
        let mut reader = JournalReader::new();
        reader.join(dir.path().to_path_buf(), 1, 0);
        reader.join(dir.path().to_path_buf(), 2, 0);
        assert_eq!(reader.source_count(), 2);
        reader.disjoin(1);
        assert_eq!(reader.source_count(), 1);
    }

    #[test]
    fn disjoin_removes_every_source_from_or_to_a_uid() {
        let dir = tempdir().unwrap();
        let mut reader = JournalReader::new();
        reader.join(dir.path().to_path_buf(), 1, 0); // owner == 1
        reader.join(dir.path().to_path_buf(), 2, 0);
        reader.join(dir.path().to_path_buf(), 3, 1); // dest == 1
        assert_eq!(reader.source_count(), 3);
        reader.disjoin(1);
        assert_eq!(reader.source_count(), 1);
    }

    #[test]
    fn remove_writer_drops_a_dest_and_seals_its_page() {
        let dir = tempdir().unwrap();
        let mut writer = JournalWriter::new(dir.path().to_path_buf(), 1);
        writer.write(2, 10, 10, 1, b"hi").unwrap();
        writer.remove_writer(2).unwrap();
        let pair = crate::core::page::pair_dir(dir.path(), 1, 2);
        let ids = crate::core::page::list_page_ids(&pair).unwrap();
        assert_eq!(ids, vec![0], "remove_writer must seal/publish before dropping");
    }
}
