//! Wire format for a single journal frame: a fixed 64-byte, 64-byte-aligned
//! header followed by a variable-length payload, padded up to `RECORD_ALIGN`.
//!
//! Publication is a single atomic store of `commit_len` at offset 0
//! (release); readers poll the same word with an acquire load and must treat
//! 0 as "not yet published" (spec.md §3, §5).

use std::sync::atomic::{AtomicU32, Ordering};

use crate::core::{Error, Result};

pub const HEADER_SIZE: usize = 64;
pub const RECORD_ALIGN: usize = 64;
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize - 1;

pub const COMMIT_LEN_OFFSET: usize = 0;
pub const GEN_TIME_OFFSET: usize = 8;
pub const TRIGGER_TIME_OFFSET: usize = 16;
pub const MSG_TYPE_OFFSET: usize = 24;
pub const SOURCE_OFFSET: usize = 28;
pub const DEST_OFFSET: usize = 32;
pub const CRC_OFFSET: usize = 36;

/// Fixed-layout frame header. `gen_time` is the time the frame was
/// committed to the journal; `trigger_time` is the time of the event that
/// caused it (equal to `gen_time` unless the writer is re-publishing an
/// event it received from elsewhere, e.g. `RequestStart`).
#[repr(C, align(64))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// 0 = uncommitted, otherwise payload length + 1.
    pub commit_len: u32,
    pub _pad0: u32,
    pub gen_time: u64,
    pub trigger_time: u64,
    pub msg_type: u32,
    pub source: u32,
    pub dest: u32,
    pub crc: u32,
    pub _pad: [u8; 24],
}

impl FrameHeader {
    #[allow(clippy::too_many_arguments)]
    pub fn new_uncommitted(
        gen_time: u64,
        trigger_time: u64,
        msg_type: u32,
        source: u32,
        dest: u32,
        crc: u32,
    ) -> Self {
        Self {
            commit_len: 0,
            _pad0: 0,
            gen_time,
            trigger_time,
            msg_type,
            source,
            dest,
            crc,
            _pad: [0u8; 24],
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[COMMIT_LEN_OFFSET..COMMIT_LEN_OFFSET + 4].copy_from_slice(&self.commit_len.to_le_bytes());
        buf[4..8].copy_from_slice(&self._pad0.to_le_bytes());
        buf[GEN_TIME_OFFSET..GEN_TIME_OFFSET + 8].copy_from_slice(&self.gen_time.to_le_bytes());
        buf[TRIGGER_TIME_OFFSET..TRIGGER_TIME_OFFSET + 8]
            .copy_from_slice(&self.trigger_time.to_le_bytes());
        buf[MSG_TYPE_OFFSET..MSG_TYPE_OFFSET + 4].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[SOURCE_OFFSET..SOURCE_OFFSET + 4].copy_from_slice(&self.source.to_le_bytes());
        buf[DEST_OFFSET..DEST_OFFSET + 4].copy_from_slice(&self.dest.to_le_bytes());
        buf[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&self.crc.to_le_bytes());
        buf[40..HEADER_SIZE].copy_from_slice(&self._pad);
        buf
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let field_u32 = |range: std::ops::Range<usize>| -> u32 {
            u32::from_le_bytes(bytes[range].try_into().expect("slice length"))
        };
        let field_u64 = |range: std::ops::Range<usize>| -> u64 {
            u64::from_le_bytes(bytes[range].try_into().expect("slice length"))
        };
        let mut _pad = [0u8; 24];
        _pad.copy_from_slice(&bytes[40..HEADER_SIZE]);
        Ok(Self {
            commit_len: field_u32(COMMIT_LEN_OFFSET..COMMIT_LEN_OFFSET + 4),
            _pad0: field_u32(4..8),
            gen_time: field_u64(GEN_TIME_OFFSET..GEN_TIME_OFFSET + 8),
            trigger_time: field_u64(TRIGGER_TIME_OFFSET..TRIGGER_TIME_OFFSET + 8),
            msg_type: field_u32(MSG_TYPE_OFFSET..MSG_TYPE_OFFSET + 4),
            source: field_u32(SOURCE_OFFSET..SOURCE_OFFSET + 4),
            dest: field_u32(DEST_OFFSET..DEST_OFFSET + 4),
            crc: field_u32(CRC_OFFSET..CRC_OFFSET + 4),
            _pad,
        })
    }

    pub fn commit_len_for_payload(payload_len: usize) -> Result<u32> {
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge);
        }
        Ok((payload_len as u32) + 1)
    }

    pub fn payload_len_from_commit(commit_len: u32) -> Result<usize> {
        if commit_len == 0 {
            return Err(Error::Corrupt("commit length is zero"));
        }
        Ok((commit_len - 1) as usize)
    }

    /// # Safety
    /// `ptr` must point at a live, 4-byte-aligned `commit_len` word inside a
    /// mapped page.
    pub fn load_commit_len(ptr: *const u8) -> u32 {
        let atomic = unsafe { &*(ptr as *const AtomicU32) };
        atomic.load(Ordering::Acquire)
    }

    /// # Safety
    /// `ptr` must point at a live, 4-byte-aligned `commit_len` word inside a
    /// mapped page, exclusively owned by the calling writer.
    pub fn store_commit_len(ptr: *mut u8, commit_len: u32) {
        let atomic = unsafe { &*(ptr as *const AtomicU32) };
        atomic.store(commit_len, Ordering::Release);
    }

    pub fn crc32(payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        hasher.finalize()
    }

    pub fn validate_crc(&self, payload: &[u8]) -> Result<()> {
        if Self::crc32(payload) == self.crc {
            Ok(())
        } else {
            Err(Error::Corrupt("frame crc mismatch"))
        }
    }
}

/// Round a record length (header + payload) up to `RECORD_ALIGN`.
pub fn aligned_record_len(payload_len: usize) -> usize {
    let raw = HEADER_SIZE + payload_len;
    (raw + RECORD_ALIGN - 1) & !(RECORD_ALIGN - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    fn header_size_and_alignment() {
        assert_eq!(size_of::<FrameHeader>(), 64);
        assert_eq!(align_of::<FrameHeader>(), 64);
    }

    #[test]
    fn crc_matches_known_payload() {
        assert_eq!(FrameHeader::crc32(b"hello"), 0x3610_A686);
    }

    #[test]
    fn header_round_trip_preserves_fields() {
        let header = FrameHeader {
            commit_len: 42,
            _pad0: 0,
            gen_time: 0x1122_3344_5566_7788,
            trigger_time: 0x99AA_BBCC_DDEE_FF00,
            msg_type: 0x1357,
            source: 7,
            dest: 0,
            crc: 0x0F0E_0D0C,
            _pad: [0x5A; 24],
        };
        let bytes = header.to_bytes();
        let decoded = FrameHeader::from_bytes(&bytes).expect("decode header");
        assert_eq!(decoded, header);
    }

    #[test]
    fn aligns_record_length_up_to_64() {
        assert_eq!(aligned_record_len(0), 64);
        assert_eq!(aligned_record_len(1), 128);
        assert_eq!(aligned_record_len(64), 128);
    }
}
