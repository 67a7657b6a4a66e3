//! Identity and filesystem resolution for every participant in the system:
//! `Location` names a (mode, category, group, name) tuple; `uid` is its
//! 32-bit content hash, used everywhere a compact identifier is needed on
//! the wire. `Locator` resolves a `Location` to a directory; `FsLocator` is
//! the default, root-directory-relative implementation (grounded on the
//! path-component validation the teacher applies to its own stream/order
//! layouts).

use std::env;
use std::path::{Path, PathBuf};

use crate::core::{Error, Result};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Live = 0,
    Data = 1,
    Replay = 2,
    Backtest = 3,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::Data => "data",
            Mode::Replay => "replay",
            Mode::Backtest => "backtest",
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Md = 0,
    Td = 1,
    Strategy = 2,
    System = 3,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Md => "md",
            Category::Td => "td",
            Category::Strategy => "strategy",
            Category::System => "system",
        }
    }
}

pub const PUBLIC_UID: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub mode: Mode,
    pub category: Category,
    pub group: String,
    pub name: String,
}

impl Location {
    pub fn new(mode: Mode, category: Category, group: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let group = group.into();
        let name = name.into();
        validate_component("group", &group)?;
        validate_component("name", &name)?;
        Ok(Self { mode, category, group, name })
    }

    /// `"{mode}/{category}/{group}/{name}"`, lowercase — the canonical
    /// string hashed to produce `uid` (spec.md §3).
    pub fn canonical_string(&self) -> String {
        format!("{}/{}/{}/{}", self.mode.as_str(), self.category.as_str(), self.group, self.name)
    }

    pub fn uid(&self) -> u32 {
        hash_uid(&self.canonical_string())
    }

    pub fn master() -> Self {
        Self::new(Mode::Live, Category::System, "master", "master").expect("master location is always valid")
    }
}

/// 32-bit non-cryptographic content hash of a canonical identity string.
pub fn hash_uid(canonical: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(canonical.to_ascii_lowercase().as_bytes());
    hasher.finalize()
}

fn validate_component(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." {
        return Err(Error::InvalidPartition(format!("{field} must not be empty, '.' or '..'")));
    }
    if value.bytes().any(|b| matches!(b, b'/' | b'\\' | 0)) {
        return Err(Error::InvalidPartition(format!("{field} may not contain path separators or NUL")));
    }
    Ok(())
}

/// Resolves a `Location` to a directory on disk. `FsLocator` is the only
/// implementation shipped; a `Locator` is still a trait so tests can swap in
/// an in-memory double.
pub trait Locator: Send + Sync {
    fn layout_dir(&self, location: &Location, layout: &str) -> PathBuf;

    fn layout_file(&self, location: &Location, layout: &str, name: &str) -> PathBuf {
        self.layout_dir(location, layout).join(name)
    }

    fn has_location(&self, location: &Location) -> bool {
        self.layout_dir(location, "journal").exists()
    }
}

/// `$YIJINJING_HOME/{mode}/{category}/{group}/{name}/{layout}`.
pub struct FsLocator {
    home: PathBuf,
}

impl FsLocator {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolves the home directory from `YIJINJING_HOME`, falling back to
    /// `default` if the environment variable is unset (spec.md §6: "the
    /// locator may consult environment variables").
    pub fn from_env_or(default: impl Into<PathBuf>) -> Self {
        let home = env::var_os("YIJINJING_HOME").map(PathBuf::from).unwrap_or_else(|| default.into());
        Self { home }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}

impl Locator for FsLocator {
    fn layout_dir(&self, location: &Location, layout: &str) -> PathBuf {
        self.home
            .join(location.mode.as_str())
            .join(location.category.as_str())
            .join(&location.group)
            .join(&location.name)
            .join(layout)
    }
}

/// Maps uids back to `Location`s. A second insertion whose identity differs
/// under the same uid is a configuration error (hash collision), not
/// silently overwritten (spec.md §3).
#[derive(Default)]
pub struct LocationRegistry {
    by_uid: std::collections::HashMap<u32, Location>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: Location) -> Result<u32> {
        let uid = location.uid();
        match self.by_uid.get(&uid) {
            Some(existing) if *existing != location => Err(Error::LocationCollision(uid)),
            Some(_) => Ok(uid),
            None => {
                self.by_uid.insert(uid, location);
                Ok(uid)
            }
        }
    }

    pub fn get(&self, uid: u32) -> Option<&Location> {
        self.by_uid.get(&uid)
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.by_uid.contains_key(&uid)
    }

    pub fn remove(&mut self, uid: u32) -> Option<Location> {
        self.by_uid.remove(&uid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &Location)> {
        self.by_uid.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_uid_is_stable() {
        let master = Location::master();
        assert_eq!(master.canonical_string(), "live/system/master/master");
        assert_eq!(master.uid(), hash_uid("live/system/master/master"));
    }

    #[test]
    fn rejects_empty_or_dotted_components() {
        assert!(Location::new(Mode::Live, Category::Strategy, "", "x").is_err());
        assert!(Location::new(Mode::Live, Category::Strategy, "..", "x").is_err());
        assert!(Location::new(Mode::Live, Category::Strategy, "a/b", "x").is_err());
    }

    #[test]
    fn registry_detects_uid_collision() {
        let mut registry = LocationRegistry::new();
        let loc_a = Location::new(Mode::Live, Category::Strategy, "g", "a").unwrap();
        registry.insert(loc_a.clone()).unwrap();
        // same uid, different identity: force a collision artificially
        // by inserting the same location twice (idempotent) then a distinct one under a
        // uid we pick to equal loc_a's uid is infeasible without a crafted hash, so instead
        // verify idempotent re-insertion succeeds.
        let uid = registry.insert(loc_a.clone()).unwrap();
        assert_eq!(uid, loc_a.uid());
    }

    #[test]
    fn fs_locator_resolves_nested_path() {
        let locator = FsLocator::new("/tmp/yjj");
        let loc = Location::new(Mode::Live, Category::Strategy, "g1", "n1").unwrap();
        let dir = locator.layout_dir(&loc, "journal");
        assert_eq!(dir, Path::new("/tmp/yjj/live/strategy/g1/n1/journal"));
    }
}
