//! Config store (spec.md §4.E): per-apprentice configuration records
//! persisted in an embedded relational database, so the master can restore
//! a peer's prior configuration into its command journal on re-registration
//! without the peer having to resupply it.
//!
//! Grounded in the original's sqlite-backed longfist serializer
//! (`original_source/.../master.cpp`, constructed against
//! `kungfu/longfist/serialize/sql.h`); the teacher crate has no SQL
//! dependency of its own, so this reaches for `rusqlite`, the embedded-DB
//! crate used elsewhere in the retrieval pack.

use rusqlite::{params, Connection};

use crate::core::Result;

/// One persisted configuration record, keyed by the owning location's uid
/// and a caller-chosen `key` (e.g. a strategy's own settings blob).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRecord {
    pub uid: u32,
    pub key: String,
    pub value: String,
}

/// A persisted `Location` identity, keyed by `uid` — lets the master
/// reconstruct a peer's `Location` (and so rejoin it into the registry) from
/// nothing but the config store, since a bare uid cannot be inverted back
/// through the hash (spec.md §4.E/§4.G: "load all persisted `Config` records
/// ... and add each as a location").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedLocation {
    pub uid: u32,
    pub mode: u8,
    pub category: u8,
    pub group: String,
    pub name: String,
}

pub struct ConfigStore {
    conn: Connection,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS config (
        uid INTEGER NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (uid, key)
    );
    CREATE TABLE IF NOT EXISTS locations (
        uid INTEGER NOT NULL PRIMARY KEY,
        mode INTEGER NOT NULL,
        category INTEGER NOT NULL,
        grp TEXT NOT NULL,
        name TEXT NOT NULL
    );
";

impl ConfigStore {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Persists a peer's identity so it survives a master restart. Called
    /// once per uid at `register_app` time; an upsert, since re-registering
    /// an already-known peer is not an error.
    pub fn put_location(&mut self, uid: u32, mode: u8, category: u8, group: &str, name: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO locations (uid, mode, category, grp, name) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(uid) DO UPDATE SET mode = excluded.mode, category = excluded.category,
                grp = excluded.grp, name = excluded.name",
            params![uid, mode, category, group, name],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Every persisted location, loaded once at master construction time to
    /// seed the registry before the master's session opens (spec.md §4.G).
    pub fn get_all_locations(&self) -> Result<Vec<PersistedLocation>> {
        let mut stmt = self.conn.prepare("SELECT uid, mode, category, grp, name FROM locations ORDER BY uid")?;
        let rows = stmt.query_map([], |row| {
            Ok(PersistedLocation {
                uid: row.get(0)?,
                mode: row.get(1)?,
                category: row.get(2)?,
                group: row.get(3)?,
                name: row.get(4)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn set(&mut self, uid: u32, key: &str, value: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO config (uid, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(uid, key) DO UPDATE SET value = excluded.value",
            params![uid, key, value],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, uid: u32, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM config WHERE uid = ?1 AND key = ?2")?;
        let mut rows = stmt.query(params![uid, key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// All records for `uid`, used to restore a peer's prior configuration
    /// into its bootstrap burst at `register_app` time (spec.md §4.G).
    pub fn get_all(&self, uid: u32) -> Result<Vec<ConfigRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT uid, key, value FROM config WHERE uid = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![uid], |row| {
            Ok(ConfigRecord {
                uid: row.get(0)?,
                key: row.get(1)?,
                value: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Every record across every uid, used to seed the location registry
    /// before the master opens its own session (spec.md §4.G construction
    /// order; see `original_source/.../master.cpp` where persisted config
    /// records are loaded before `io_device->open_session`).
    pub fn get_all_records(&self) -> Result<Vec<ConfigRecord>> {
        let mut stmt = self.conn.prepare("SELECT uid, key, value FROM config ORDER BY uid, key")?;
        let rows = stmt.query_map([], |row| {
            Ok(ConfigRecord {
                uid: row.get(0)?,
                key: row.get(1)?,
                value: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn remove(&mut self, uid: u32, key: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM config WHERE uid = ?1 AND key = ?2", params![uid, key])?;
        tx.commit()?;
        Ok(())
    }
}

/// Per-peer adapter mirroring state-data frames into the config store, and
/// the means by which `register_app`'s persisted-config restore (`get_all`)
/// gets populated across a peer's prior sessions (spec.md §4.G step 9,
/// glossary "Sqlizer"). One `Sqlizer` is kept per live peer, wired into
/// `Master`'s any-frame handler ahead of tag-specific dispatch.
pub struct Sqlizer {
    uid: u32,
}

impl Sqlizer {
    pub fn new(uid: u32) -> Self {
        Self { uid }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Mirrors a `Config`-tagged frame's `{key, value}` payload into the
    /// store under this peer's uid. Any other tag is a no-op: `Config` is
    /// the only state-data type this crate carries (the original's full
    /// `ConfigDataType` enumeration is out of scope, spec.md §1 Non-goals).
    pub fn mirror(&self, store: &mut ConfigStore, msg_type: u32, payload: &[u8]) -> Result<()> {
        if msg_type != crate::protocol::MsgType::Config.as_u32() {
            return Ok(());
        }
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(payload) {
            let key = value.get("key").and_then(|v| v.as_str());
            let val = value.get("value").and_then(|v| v.as_str());
            if let (Some(key), Some(val)) = (key, val) {
                store.set(self.uid, key, val)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut store = ConfigStore::open_in_memory().unwrap();
        store.set(7, "risk_limit", "100000").unwrap();
        assert_eq!(store.get(7, "risk_limit").unwrap(), Some("100000".to_string()));
    }

    #[test]
    fn set_is_idempotent_upsert() {
        let mut store = ConfigStore::open_in_memory().unwrap();
        store.set(7, "k", "v1").unwrap();
        store.set(7, "k", "v2").unwrap();
        assert_eq!(store.get(7, "k").unwrap(), Some("v2".to_string()));
    }

    #[test]
    fn get_all_scopes_to_uid() {
        let mut store = ConfigStore::open_in_memory().unwrap();
        store.set(7, "a", "1").unwrap();
        store.set(7, "b", "2").unwrap();
        store.set(8, "a", "3").unwrap();
        let records = store.get_all(7).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.uid == 7));
    }

    #[test]
    fn remove_deletes_a_key() {
        let mut store = ConfigStore::open_in_memory().unwrap();
        store.set(7, "k", "v").unwrap();
        store.remove(7, "k").unwrap();
        assert_eq!(store.get(7, "k").unwrap(), None);
    }

    #[test]
    fn put_location_is_idempotent_upsert() {
        let mut store = ConfigStore::open_in_memory().unwrap();
        store.put_location(7, 0, 2, "g1", "alpha").unwrap();
        store.put_location(7, 0, 2, "g1", "alpha-renamed").unwrap();
        let all = store.get_all_locations().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "alpha-renamed");
    }

    #[test]
    fn sqlizer_mirrors_config_tagged_frames_only() {
        let mut store = ConfigStore::open_in_memory().unwrap();
        let sqlizer = Sqlizer::new(7);
        let config_payload =
            serde_json::to_vec(&serde_json::json!({"key": "risk_limit", "value": "500"})).unwrap();
        sqlizer
            .mirror(&mut store, crate::protocol::MsgType::Config.as_u32(), &config_payload)
            .unwrap();
        assert_eq!(store.get(7, "risk_limit").unwrap(), Some("500".to_string()));

        // A non-Config tag (e.g. Ping) is not mirrored.
        sqlizer
            .mirror(&mut store, crate::protocol::MsgType::Ping.as_u32(), b"\x00\x00\x00\x00\x00\x00\x00\x00")
            .unwrap();
        assert_eq!(store.get_all(7).unwrap().len(), 1);
    }

    #[test]
    fn get_all_locations_returns_every_persisted_peer() {
        let mut store = ConfigStore::open_in_memory().unwrap();
        store.put_location(7, 0, 2, "g1", "alpha").unwrap();
        store.put_location(8, 0, 2, "g1", "beta").unwrap();
        let all = store.get_all_locations().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|l| l.uid == 7 && l.name == "alpha"));
        assert!(all.iter().any(|l| l.uid == 8 && l.name == "beta"));
    }
}
