use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Corrupt(&'static str),
    CorruptMetadata(&'static str),
    Unsupported(&'static str),
    UnsupportedVersion(u32),
    PayloadTooLarge,
    QueueFull,
    WriterAlreadyActive,
    InvalidPartition(String),
    /// `register_app` for a location that already has a live session.
    AlreadyLive(u32),
    /// A uid referenced by a control message has no entry in the location registry.
    UnknownLocation(u32),
    /// A channel operation referenced a reader/writer pair that was never joined.
    StaleChannel(u32),
    /// A uid resolved to two different (mode, category, group, name) tuples.
    LocationCollision(u32),
    /// Config store (rusqlite) failure.
    ConfigStore(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
            Error::CorruptMetadata(msg) => write!(f, "corrupt metadata: {msg}"),
            Error::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Error::UnsupportedVersion(version) => write!(f, "unsupported version: {version}"),
            Error::PayloadTooLarge => write!(f, "payload too large"),
            Error::QueueFull => write!(f, "queue full"),
            Error::WriterAlreadyActive => write!(f, "writer already active"),
            Error::InvalidPartition(msg) => write!(f, "invalid partition: {msg}"),
            Error::AlreadyLive(uid) => write!(f, "location {uid:#x} already has a live session"),
            Error::UnknownLocation(uid) => write!(f, "uid {uid:#x} not in location registry"),
            Error::StaleChannel(uid) => write!(f, "channel for {uid:#x} was never joined"),
            Error::LocationCollision(uid) => write!(f, "uid {uid:#x} collides with a different location"),
            Error::ConfigStore(msg) => write!(f, "config store error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Error::ConfigStore(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
