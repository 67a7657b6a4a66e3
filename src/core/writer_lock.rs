//! Single-writer-per-journal enforcement via an advisory `flock`, with
//! stale-lock detection across process restarts: the lock file records the
//! holder's pid plus its `/proc/{pid}/stat` start time, so a crashed writer
//! whose pid was reused by an unrelated process is still detected as dead.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterLockInfo {
    pub pid: u32,
    pub start_time: u64,
    pub writer_epoch: u64,
}

pub fn try_lock(file: &File) -> Result<bool> {
    let res = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if res == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        return Ok(false);
    }
    Err(Error::Io(err))
}

pub fn write_lock_info(file: &File, writer_epoch: u64) -> Result<()> {
    let (pid, start_time) = lock_identity()?;
    let record = format!("{pid} {start_time} {writer_epoch}\n");
    let mut handle = file.try_clone()?;
    handle.set_len(0)?;
    handle.seek(SeekFrom::Start(0))?;
    handle.write_all(record.as_bytes())?;
    handle.sync_all()?;
    Ok(())
}

pub fn read_lock_info(file: &File) -> Result<WriterLockInfo> {
    let mut contents = String::new();
    let mut clone = file.try_clone()?;
    clone.seek(SeekFrom::Start(0))?;
    clone.read_to_string(&mut contents)?;
    let mut parts = contents.split_whitespace();
    let pid = parts.next().unwrap_or("0").parse::<u32>().unwrap_or(0);
    let start_time = parts.next().unwrap_or("0").parse::<u64>().unwrap_or(0);
    let writer_epoch = parts.next().unwrap_or("0").parse::<u64>().unwrap_or(0);
    Ok(WriterLockInfo {
        pid,
        start_time,
        writer_epoch,
    })
}

/// Returns whether the process that last wrote `info` into `file` is still
/// the same process (alive with the same start time), not merely a reused pid.
pub fn lock_owner_alive(file: &File) -> Result<bool> {
    let info = read_lock_info(file)?;
    if info.pid == 0 {
        return Ok(false);
    }
    platform::owner_alive(info.pid, info.start_time)
}

pub fn writer_alive(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let file = OpenOptions::new().read(true).open(path)?;
    lock_owner_alive(&file)
}

#[cfg(target_os = "linux")]
fn lock_identity() -> Result<(u32, u64)> {
    let pid = std::process::id();
    let start_time = platform::proc_start_time(pid)?;
    Ok((pid, start_time))
}

#[cfg(not(target_os = "linux"))]
fn lock_identity() -> Result<(u32, u64)> {
    Ok((std::process::id(), 0))
}

#[cfg(target_os = "linux")]
mod platform {
    use super::Result;
    use crate::core::Error;
    use std::fs::File;
    use std::io::Read;

    pub(super) fn owner_alive(pid: u32, start_time: u64) -> Result<bool> {
        let proc_start = proc_start_time(pid)?;
        Ok(proc_start == start_time)
    }

    pub(super) fn proc_start_time(pid: u32) -> Result<u64> {
        let path = format!("/proc/{pid}/stat");
        let mut contents = String::new();
        match File::open(&path) {
            Ok(mut f) => f.read_to_string(&mut contents)?,
            Err(_) => return Ok(0),
        };
        let end = contents
            .rfind(')')
            .ok_or(Error::CorruptMetadata("stat parse"))?;
        let after = &contents[end + 1..];
        let mut fields = after.split_whitespace();
        for _ in 0..20 {
            fields.next();
        }
        let start = fields
            .next()
            .ok_or(Error::CorruptMetadata("stat missing starttime"))?;
        start
            .parse::<u64>()
            .map_err(|_| Error::CorruptMetadata("stat starttime invalid"))
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use super::Result;

    pub(super) fn owner_alive(_pid: u32, _start_time: u64) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        assert!(try_lock(&file).unwrap());
        write_lock_info(&file, 7).unwrap();
        let info = read_lock_info(&file).unwrap();
        assert_eq!(info.pid, std::process::id());
        assert_eq!(info.writer_epoch, 7);
        assert!(lock_owner_alive(&file).unwrap());
    }
}
