//! Control message tags and fixed-layout wire records exchanged between
//! master and apprentices (spec.md §6), styled on the teacher's
//! `repr(C)` market-data record definitions: plain structs, explicit
//! padding, `size_of`/`align_of` tests pinning the layout.

#![allow(clippy::upper_case_acronyms)]

pub const PROTOCOL_VERSION: u16 = 1;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Register = 0x10,
    Deregister = 0x11,
    Location = 0x12,
    Channel = 0x13,
    RequestReadFrom = 0x14,
    RequestWriteTo = 0x15,
    RequestReadFromPublic = 0x16,
    TimeRequest = 0x17,
    Time = 0x18,
    Ping = 0x19,
    SessionStart = 0x1A,
    SessionEnd = 0x1B,
    RequestStart = 0x1C,
    TradingDay = 0x1D,
    /// Restores a persisted config record into a peer's private channel at
    /// registration time. Not named in the original wire tag list; added
    /// alongside the config store enrichment (see DESIGN.md).
    Config = 0x1E,
}

impl MsgType {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live = 0,
    Data = 1,
    Replay = 2,
    Backtest = 3,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Md = 0,
    Td = 1,
    Strategy = 2,
    System = 3,
}

/// Fixed-width, NUL-padded ASCII identifier embedded in wire records.
pub const NAME_LEN: usize = 32;

fn pack_name(name: &str) -> [u8; NAME_LEN] {
    let mut buf = [0u8; NAME_LEN];
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_LEN);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

fn unpack_name(buf: &[u8; NAME_LEN]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationRecord {
    pub uid: u32,
    pub mode: u8,
    pub category: u8,
    pub _pad: [u8; 2],
    pub group: [u8; NAME_LEN],
    pub name: [u8; NAME_LEN],
}

impl LocationRecord {
    pub fn new(uid: u32, mode: Mode, category: Category, group: &str, name: &str) -> Self {
        Self {
            uid,
            mode: mode as u8,
            category: category as u8,
            _pad: [0; 2],
            group: pack_name(group),
            name: pack_name(name),
        }
    }

    pub fn group(&self) -> String {
        unpack_name(&self.group)
    }

    pub fn name(&self) -> String {
        unpack_name(&self.name)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub location: LocationRecord,
    pub pid: u32,
    pub checkin_time: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deregister {
    pub uid: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub source_uid: u32,
    pub dest_uid: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestReadFrom {
    pub source_uid: u32,
    pub from_time: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestWriteTo {
    pub dest_uid: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestReadFromPublic {
    pub source_uid: u32,
    pub from_time: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRequest {
    pub duration_ns: u64,
    pub repeat_count: u32,
    pub repeat_limit: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    pub trigger_time: u64,
    pub repeat_index: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub nonce: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStart {
    pub uid: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    pub uid: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestStart {
    /// Master's own process-construction timestamp, not the triggering
    /// event's `gen_time` (spec.md §9 open question, resolved from
    /// `original_source/.../master.cpp`: `writer->mark(start_time_,
    /// RequestStart::tag)`).
    pub start_time: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingDay {
    pub trading_day: u32,
    pub _pad: u32,
}

/// Encodes a `repr(C)` record to its raw little-endian byte representation
/// for journal storage. All fields above are plain integers/byte arrays, so
/// this is a bytewise copy on little-endian hosts; we still go through
/// explicit field writes rather than transmuting to keep the wire format
/// independent of host endianness.
pub trait WireRecord: Sized {
    fn encode(&self) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> crate::core::Result<Self>;
}

macro_rules! impl_plain_wire_record {
    ($ty:ty) => {
        impl WireRecord for $ty {
            fn encode(&self) -> Vec<u8> {
                let ptr = self as *const Self as *const u8;
                unsafe { std::slice::from_raw_parts(ptr, std::mem::size_of::<Self>()) }.to_vec()
            }

            fn decode(bytes: &[u8]) -> crate::core::Result<Self> {
                if bytes.len() != std::mem::size_of::<Self>() {
                    return Err(crate::core::Error::Corrupt("wire record size mismatch"));
                }
                let mut value = std::mem::MaybeUninit::<Self>::uninit();
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        bytes.as_ptr(),
                        value.as_mut_ptr() as *mut u8,
                        bytes.len(),
                    );
                    Ok(value.assume_init())
                }
            }
        }
    };
}

impl_plain_wire_record!(Register);
impl_plain_wire_record!(Deregister);
impl_plain_wire_record!(LocationRecord);
impl_plain_wire_record!(Channel);
impl_plain_wire_record!(RequestReadFrom);
impl_plain_wire_record!(RequestWriteTo);
impl_plain_wire_record!(RequestReadFromPublic);
impl_plain_wire_record!(TimeRequest);
impl_plain_wire_record!(Time);
impl_plain_wire_record!(Ping);
impl_plain_wire_record!(SessionStart);
impl_plain_wire_record!(SessionEnd);
impl_plain_wire_record!(RequestStart);
impl_plain_wire_record!(TradingDay);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    fn location_record_size() {
        assert_eq!(size_of::<LocationRecord>(), 4 + 1 + 1 + 2 + NAME_LEN + NAME_LEN);
        assert_eq!(align_of::<LocationRecord>(), 4);
    }

    #[test]
    fn name_packing_round_trips() {
        let record = LocationRecord::new(7, Mode::Live, Category::Strategy, "g1", "n1");
        assert_eq!(record.group(), "g1");
        assert_eq!(record.name(), "n1");
    }

    #[test]
    fn register_round_trips_through_bytes() {
        let location = LocationRecord::new(7, Mode::Live, Category::Strategy, "g1", "n1");
        let reg = Register { location, pid: 42, checkin_time: 99 };
        let bytes = reg.encode();
        let decoded = Register::decode(&bytes).unwrap();
        assert_eq!(decoded, reg);
    }

    #[test]
    fn request_start_size_is_eight_bytes() {
        assert_eq!(size_of::<RequestStart>(), 8);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let bytes = vec![0u8; 3];
        assert!(Ping::decode(&bytes).is_err());
    }
}
