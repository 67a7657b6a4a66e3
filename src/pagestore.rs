//! Per-location facade over the page store (spec.md §4.A): opens the
//! append-only writer for a (owner, dest) pair, opens read-only views for
//! replay/inspection, and tracks session brackets (`SessionStart`/
//! `SessionEnd` timestamps) for debugging and warm-start recovery.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::page::{page_path, pair_dir, DEFAULT_PAGE_SIZE};
use crate::core::{PageReader, PageWriter, Result};
use crate::location::{Locator, Location};

/// One open-to-close bracket of a peer's presence, as recorded by the
/// master (spec.md §3 "Sessions").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub start_ns: u64,
    pub end_ns: Option<u64>,
}

pub struct PageStore {
    journal_root: PathBuf,
    page_size: usize,
    writers: HashMap<(u32, u32), PageWriter>,
    sessions: HashMap<u32, Vec<Session>>,
}

impl PageStore {
    pub fn new(locator: &dyn Locator, location: &Location) -> Self {
        Self::with_journal_root(locator.layout_dir(location, "journal"))
    }

    /// Opens a page store directly over a flat journal root, bypassing the
    /// per-location `Locator` nesting. `Master` uses this: every
    /// participant's pages live as sibling `{owner:08x}.{dest:08x}`
    /// directories under one shared root (see `journal.rs`), not nested
    /// under the master's own `Location`.
    pub fn with_journal_root(journal_root: PathBuf) -> Self {
        Self {
            journal_root,
            page_size: DEFAULT_PAGE_SIZE,
            writers: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn journal_root(&self) -> &std::path::Path {
        &self.journal_root
    }

    /// Returns the writer for `(owner_uid, dest_uid)`, creating it (and
    /// picking up where any prior page file for this pair left off) on
    /// first use.
    pub fn open_page_for_append(&mut self, owner_uid: u32, dest_uid: u32) -> Result<&mut PageWriter> {
        if !self.writers.contains_key(&(owner_uid, dest_uid)) {
            let writer = PageWriter::new(&self.journal_root, owner_uid, dest_uid, self.page_size)?;
            self.writers.insert((owner_uid, dest_uid), writer);
        }
        Ok(self.writers.get_mut(&(owner_uid, dest_uid)).expect("just inserted"))
    }

    pub fn open_page_for_read(&self, owner_uid: u32, dest_uid: u32, page_no: u32) -> Result<PageReader> {
        let pair = pair_dir(&self.journal_root, owner_uid, dest_uid);
        PageReader::open(&page_path(&pair, page_no))
    }

    pub fn list_page_ids(&self, owner_uid: u32, dest_uid: u32) -> Result<Vec<u32>> {
        let pair = pair_dir(&self.journal_root, owner_uid, dest_uid);
        crate::core::page::list_page_ids(&pair)
    }

    pub fn record_session_start(&mut self, uid: u32, start_ns: u64) {
        self.sessions.entry(uid).or_default().push(Session { start_ns, end_ns: None });
    }

    pub fn record_session_end(&mut self, uid: u32, end_ns: u64) {
        if let Some(sessions) = self.sessions.get_mut(&uid) {
            if let Some(last) = sessions.last_mut() {
                if last.end_ns.is_none() {
                    last.end_ns = Some(end_ns);
                    return;
                }
            }
        }
        // An end with no matching open start is still recorded, as a
        // zero-length bracket, so replay tooling can see it happened.
        self.sessions.entry(uid).or_default().push(Session { start_ns: end_ns, end_ns: Some(end_ns) });
    }

    pub fn find_sessions(&self, uid: u32) -> &[Session] {
        self.sessions.get(&uid).map(Vec::as_slice).unwrap_or(&[])
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{Category, FsLocator, Mode};
    use tempfile::tempdir;

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let locator = FsLocator::new(dir.path());
        let loc = Location::new(Mode::Live, Category::System, "master", "master").unwrap();
        let mut store = PageStore::new(&locator, &loc).with_page_size(4096);

        {
            let writer = store.open_page_for_append(1, 2).unwrap();
            writer.append(10, 10, 1, 1, 2, b"hi").unwrap();
        }
        store.finish_all().unwrap();

        let ids = store.list_page_ids(1, 2).unwrap();
        assert_eq!(ids, vec![0]);
        let mut reader = store.open_page_for_read(1, 2, 0).unwrap();
        let frame = reader.next().unwrap().unwrap();
        assert_eq!(frame.payload, b"hi");
    }

    #[test]
    fn session_bracket_tracks_start_and_end() {
        let dir = tempdir().unwrap();
        let locator = FsLocator::new(dir.path());
        let loc = Location::new(Mode::Live, Category::System, "master", "master").unwrap();
        let mut store = PageStore::new(&locator, &loc);
        store.record_session_start(42, 100);
        store.record_session_end(42, 200);
        let sessions = store.find_sessions(42);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0], Session { start_ns: 100, end_ns: Some(200) });
    }

    #[test]
    fn with_journal_root_bypasses_the_locator() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::with_journal_root(dir.path().to_path_buf()).with_page_size(4096);
        assert_eq!(store.journal_root(), dir.path());
        {
            let writer = store.open_page_for_append(1, 2).unwrap();
            writer.append(10, 10, 1, 1, 2, b"flat").unwrap();
        }
        store.finish_all().unwrap();
        assert_eq!(store.list_page_ids(1, 2).unwrap(), vec![0]);
    }
}
