//! Master coordinator (spec.md §4.G): arbitrates apprentice lifecycle,
//! brokers journal channels between peers, distributes wall-clock time
//! events, and persists per-apprentice configuration. Construction,
//! `register_app`, `deregister_app`, and the event loop follow
//! `original_source/core/cpp/lib/src/yijinjing/practice/master.cpp`
//! step-for-step; see SPEC_FULL.md and DESIGN.md for the exact
//! correspondence.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ConfigStore, Sqlizer};
use crate::core::{Clock, Result};
use crate::journal::{JournalReader, JournalWriter};
use crate::location::{Location, LocationRegistry, PUBLIC_UID};
use crate::pagestore::PageStore;
use crate::protocol::{
    Channel, Deregister, LocationRecord, MsgType, Ping, Register, RequestReadFrom,
    RequestReadFromPublic, RequestStart, RequestWriteTo, SessionEnd, SessionStart, Time,
    TimeRequest, TradingDay, WireRecord,
};

pub struct MasterConfig {
    pub journal_root: PathBuf,
    pub interval_check: Duration,
    pub bus_wait_timeout: Duration,
    pub trading_day: u32,
}

impl MasterConfig {
    pub fn new(journal_root: impl Into<PathBuf>) -> Self {
        Self {
            journal_root: journal_root.into(),
            interval_check: Duration::from_secs(1),
            bus_wait_timeout: Duration::from_millis(10),
            trading_day: 0,
        }
    }
}

struct TimerTask {
    dest_uid: u32,
    duration_ns: u64,
    next_fire_ns: u64,
    repeat_count: u32,
    repeat_limit: u32,
}

/// Hooks a master host can install, standing in for the original's virtual
/// `on_register`/`on_interval_check`/`on_trading_day` overrides (spec.md §9
/// design note: explicit hook function tables instead of inheritance).
#[derive(Default)]
pub struct MasterHooks {
    pub on_register: Option<Box<dyn FnMut(u32, &Location)>>,
    pub on_interval_check: Option<Box<dyn FnMut(u64)>>,
    pub on_trading_day: Option<Box<dyn FnMut(u32)>>,
}

pub struct Master {
    config: MasterConfig,
    clock: Box<dyn Clock>,
    start_time: u64,
    self_uid: u32,
    registry: LocationRegistry,
    live: std::collections::HashSet<u32>,
    known_public_sources: std::collections::HashSet<u32>,
    config_store: ConfigStore,
    page_store: PageStore,
    sqlizers: HashMap<u32, Sqlizer>,
    last_seen_ns: HashMap<u32, u64>,
    writer: JournalWriter,
    reader: JournalReader,
    channels: Vec<Channel>,
    timer_tasks: Vec<TimerTask>,
    last_interval_check_ns: u64,
    hooks: MasterHooks,
}

impl Master {
    pub fn open(config: MasterConfig, clock: Box<dyn Clock>, config_store: ConfigStore) -> Result<Self> {
        let start_time = clock.now();
        let self_uid = Location::master().uid();

        // Seed the registry from persisted config before opening the
        // master's own session, so prior peers are resolvable the instant
        // registration traffic starts arriving (master.cpp constructor order).
        let mut registry = LocationRegistry::new();
        registry.insert(Location::master())?;
        for persisted in config_store.get_all_locations()? {
            let mode = match persisted.mode {
                0 => crate::location::Mode::Live,
                1 => crate::location::Mode::Data,
                2 => crate::location::Mode::Replay,
                _ => crate::location::Mode::Backtest,
            };
            let category = match persisted.category {
                0 => crate::location::Category::Md,
                1 => crate::location::Category::Td,
                2 => crate::location::Category::Strategy,
                _ => crate::location::Category::System,
            };
            let location = Location::new(mode, category, persisted.group, persisted.name)?;
            registry.insert(location)?;
        }

        let mut reader = JournalReader::new();
        // Master-first tie-break: the master's own command journal is
        // always the first source joined.
        reader.join(config.journal_root.clone(), self_uid, self_uid);

        let writer = JournalWriter::new(config.journal_root.clone(), self_uid);

        let mut page_store = PageStore::with_journal_root(config.journal_root.clone());
        page_store.record_session_start(self_uid, start_time);

        Ok(Self {
            start_time,
            self_uid,
            registry,
            live: std::collections::HashSet::new(),
            known_public_sources: std::collections::HashSet::new(),
            config_store,
            page_store,
            sqlizers: HashMap::new(),
            last_seen_ns: HashMap::new(),
            writer,
            reader,
            channels: Vec::new(),
            timer_tasks: Vec::new(),
            last_interval_check_ns: start_time,
            hooks: MasterHooks::default(),
            clock,
            config,
        })
    }

    pub fn is_live(&self, uid: u32) -> bool {
        self.live.contains(&uid)
    }

    pub fn last_seen_ns(&self, uid: u32) -> Option<u64> {
        self.last_seen_ns.get(&uid).copied()
    }

    pub fn set_hooks(&mut self, hooks: MasterHooks) {
        self.hooks = hooks;
    }

    pub fn self_uid(&self) -> u32 {
        self.self_uid
    }

    /// Scans the journal root for apprentices that have started publishing
    /// to their own public mailbox but aren't joined yet (spec.md §4.A/§4.G;
    /// grounded on the teacher's `RouterDiscovery::poll()` filesystem diff).
    pub fn poll_for_new_apprentices(&mut self) -> Result<()> {
        if !self.config.journal_root.exists() {
            return Ok(());
        }
        let suffix = format!(".{PUBLIC_UID:08x}");
        for entry in std::fs::read_dir(&self.config.journal_root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(owner_hex) = name.strip_suffix(&suffix) else { continue };
            let Ok(owner_uid) = u32::from_str_radix(owner_hex, 16) else { continue };
            if owner_uid == self.self_uid || self.known_public_sources.contains(&owner_uid) {
                continue;
            }
            self.known_public_sources.insert(owner_uid);
            self.reader.join(self.config.journal_root.clone(), owner_uid, PUBLIC_UID);
        }
        Ok(())
    }

    pub fn register_app(&mut self, record: &LocationRecord, now: u64) -> Result<u32> {
        let mode = match record.mode {
            0 => crate::location::Mode::Live,
            1 => crate::location::Mode::Data,
            2 => crate::location::Mode::Replay,
            _ => crate::location::Mode::Backtest,
        };
        let category = match record.category {
            0 => crate::location::Category::Md,
            1 => crate::location::Category::Td,
            2 => crate::location::Category::Strategy,
            _ => crate::location::Category::System,
        };
        let location = Location::new(mode, category, record.group(), record.name())?;
        let uid = location.uid();

        if self.live.contains(&uid) {
            log::warn!("rejected register_app for already-live uid {uid:#x}");
            return Err(crate::core::Error::AlreadyLive(uid));
        }
        self.registry.insert(location.clone())?;
        self.live.insert(uid);
        log::info!("registered {} ({:#x})", location.canonical_string(), uid);

        // Persist the peer's identity so it survives a master restart and is
        // re-seeded into the registry on the next `Master::open` (spec.md
        // §4.E/§4.G).
        self.config_store.put_location(uid, record.mode, record.category, &record.group(), &record.name())?;
        self.page_store.record_session_start(uid, now);
        self.sqlizers.insert(uid, Sqlizer::new(uid));

        // The two mandatory channels (spec.md §8 invariant 3): every
        // registered peer can always publish to PUBLIC, and always has a
        // private command channel to the master. `master_cmd(P)`'s uid is
        // the master's own uid: the master's per-peer command journal is
        // already the (owner=self_uid, dest=peer_uid) pair this crate uses.
        let public_channel = Channel { source_uid: uid, dest_uid: PUBLIC_UID };
        let master_cmd_channel = Channel { source_uid: uid, dest_uid: self.self_uid };
        self.channels.push(public_channel);
        self.channels.push(master_cmd_channel);
        self.writer.broadcast(&*self.clock, MsgType::Channel.as_u32(), &public_channel.encode())?;
        self.writer.broadcast(&*self.clock, MsgType::Channel.as_u32(), &master_cmd_channel.encode())?;

        // Session is opened before SessionStart is written, matching the
        // original's `io_device->open_session` ordering.
        self.writer.mark(&*self.clock, uid, MsgType::SessionStart.as_u32(), &SessionStart { uid, _pad: 0 }.encode())?;

        self.writer.mark(
            &*self.clock,
            uid,
            MsgType::TradingDay.as_u32(),
            &TradingDay { trading_day: self.config.trading_day, _pad: 0 }.encode(),
        )?;

        // Bootstrap burst: every known location, this peer's persisted
        // config, RequestStart pinned to the master's own construction
        // time, then every live registration and channel.
        for (&other_uid, other_loc) in self.registry.iter() {
            let rec = location_to_record(other_uid, other_loc);
            self.writer.mark(&*self.clock, uid, MsgType::Location.as_u32(), &rec.encode())?;
        }

        for cfg in self.config_store.get_all(uid)? {
            let payload = serde_json::to_vec(&serde_json::json!({"key": cfg.key, "value": cfg.value}))
                .expect("json serialization of plain strings cannot fail");
            self.writer.mark(&*self.clock, uid, MsgType::Config.as_u32(), &payload)?;
        }

        // `start_time_`, not `now`/`gen_time()`: preserved from
        // original_source/.../master.cpp (`writer->mark(start_time_, RequestStart::tag)`).
        self.writer.mark_with_time(
            &*self.clock,
            uid,
            self.start_time,
            MsgType::RequestStart.as_u32(),
            &RequestStart { start_time: self.start_time }.encode(),
        )?;

        for &live_uid in self.live.iter() {
            if let Some(live_loc) = self.registry.get(live_uid) {
                let rec = Register {
                    location: location_to_record(live_uid, live_loc),
                    pid: 0,
                    checkin_time: now,
                };
                self.writer.mark(&*self.clock, uid, MsgType::Register.as_u32(), &rec.encode())?;
            }
        }

        for channel in &self.channels {
            self.writer.mark(&*self.clock, uid, MsgType::Channel.as_u32(), &channel.encode())?;
        }

        // Broadcast the new location to everyone already connected.
        let rec = location_to_record(uid, &location);
        self.writer.broadcast(&*self.clock, MsgType::Location.as_u32(), &rec.encode())?;

        if let Some(hook) = &mut self.hooks.on_register {
            hook(uid, &location);
        }

        Ok(uid)
    }

    pub fn deregister_app(&mut self, uid: u32) -> Result<()> {
        if !self.live.remove(&uid) {
            return Err(crate::core::Error::UnknownLocation(uid));
        }
        let now = self.clock.now();
        self.writer.mark(&*self.clock, uid, MsgType::SessionEnd.as_u32(), &SessionEnd { uid, _pad: 0 }.encode())?;
        self.page_store.record_session_end(uid, now);
        self.sqlizers.remove(&uid);
        self.last_seen_ns.remove(&uid);
        self.writer.remove_writer(uid)?;
        self.reader.disjoin(uid);
        self.known_public_sources.remove(&uid);
        self.channels.retain(|c| c.source_uid != uid && c.dest_uid != uid);
        self.timer_tasks.retain(|t| t.dest_uid != uid);
        self.writer.broadcast(&*self.clock, MsgType::Deregister.as_u32(), &Deregister { uid, _pad: 0 }.encode())?;
        log::info!("deregistered {uid:#x}");
        Ok(())
    }

    pub fn request_time(&mut self, dest_uid: u32, request: &TimeRequest) -> Result<()> {
        let now = self.clock.now();
        self.timer_tasks.push(TimerTask {
            dest_uid,
            duration_ns: request.duration_ns,
            next_fire_ns: now + request.duration_ns,
            repeat_count: 0,
            repeat_limit: request.repeat_limit,
        });
        Ok(())
    }

    fn fire_due_timers(&mut self) -> Result<()> {
        let now = self.clock.now();
        let mut i = 0;
        while i < self.timer_tasks.len() {
            if self.timer_tasks[i].next_fire_ns > now {
                i += 1;
                continue;
            }
            let (dest_uid, repeat_index, duration_ns, repeat_limit);
            {
                let task = &mut self.timer_tasks[i];
                dest_uid = task.dest_uid;
                repeat_index = task.repeat_count;
                duration_ns = task.duration_ns;
                repeat_limit = task.repeat_limit;
                task.repeat_count += 1;
                task.next_fire_ns += duration_ns.max(1);
            }
            self.writer.mark(
                &*self.clock,
                dest_uid,
                MsgType::Time.as_u32(),
                &Time { trigger_time: now, repeat_index, _pad: 0 }.encode(),
            )?;
            if repeat_limit != 0 && repeat_index + 1 >= repeat_limit {
                self.timer_tasks.remove(i);
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    fn maybe_run_interval_check(&mut self) {
        let now = self.clock.now();
        let elapsed = Duration::from_nanos(now.saturating_sub(self.last_interval_check_ns));
        if elapsed >= self.config.interval_check {
            self.last_interval_check_ns = now;
            if let Some(hook) = &mut self.hooks.on_interval_check {
                hook(now);
            }
        }
    }

    /// Advances the master by one tick: timer tasks, then the 1s
    /// interval-check hook, then apprentice discovery, then one dispatched
    /// frame (spec.md §4.G step order).
    pub fn produce_one(&mut self) -> Result<bool> {
        self.fire_due_timers()?;
        self.maybe_run_interval_check();
        self.poll_for_new_apprentices()?;
        match self.reader.next()? {
            Some(frame) => {
                self.handle_frame(&frame)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Handles one raw control frame already pulled from the bus. Runs the
    /// any-frame trace log first, then dispatches by tag in the order
    /// `react()` wires handlers in the original: Ping, Location (implicit
    /// in `register_app`'s broadcast), Register, RequestWriteTo,
    /// RequestReadFrom, RequestReadFromPublic, TimeRequest.
    pub fn handle_frame(&mut self, frame: &crate::core::ReadFrame) -> Result<()> {
        log::trace!("master dispatch: tag={:#x} source={:#x}", frame.header.msg_type, frame.header.source);
        let tag = frame.header.msg_type;
        let source = frame.header.source;

        // Any-frame handler (spec.md §4.G): update the peer's last-seen
        // timestamp and mirror state-data frames into the embedded DB before
        // any tag-specific dispatch runs.
        self.last_seen_ns.insert(source, frame.header.gen_time);
        if let Some(sqlizer) = self.sqlizers.get(&source) {
            sqlizer.mirror(&mut self.config_store, tag, &frame.payload)?;
        }

        if tag == MsgType::Ping.as_u32() {
            if let Ok(ping) = Ping::decode(&frame.payload) {
                self.writer.mark(&*self.clock, source, MsgType::Ping.as_u32(), &ping.encode())?;
            }
        } else if tag == MsgType::Register.as_u32() {
            if let Ok(reg) = Register::decode(&frame.payload) {
                // Control-plane handlers never throw through the loop
                // (spec.md §7): an already-live uid is logged, not fatal.
                if let Err(err) = self.register_app(&reg.location, frame.header.gen_time) {
                    log::warn!("register_app failed: {err}");
                }
            }
        } else if tag == MsgType::Deregister.as_u32() {
            if let Ok(dereg) = Deregister::decode(&frame.payload) {
                if let Err(err) = self.deregister_app(dereg.uid) {
                    log::warn!("deregister_app failed: {err}");
                }
            }
        } else if tag == MsgType::RequestWriteTo.as_u32() {
            if let Ok(req) = RequestWriteTo::decode(&frame.payload) {
                let dest = req.dest_uid;
                if self.live.contains(&dest) {
                    let channel = Channel { source_uid: source, dest_uid: dest };
                    self.channels.push(channel);
                    self.reader.join(self.config.journal_root.clone(), source, dest);
                    self.writer.broadcast(&*self.clock, MsgType::Channel.as_u32(), &channel.encode())?;
                } else {
                    log::warn!("rejected RequestWriteTo: dest {dest:#x} is not live");
                }
            }
        } else if tag == MsgType::RequestReadFrom.as_u32() {
            if let Ok(req) = RequestReadFrom::decode(&frame.payload) {
                let req_source = req.source_uid;
                if self.live.contains(&req_source) {
                    let channel = Channel { source_uid: req_source, dest_uid: source };
                    self.channels.push(channel);
                    self.reader.join(self.config.journal_root.clone(), req_source, source);
                    self.writer.broadcast(&*self.clock, MsgType::Channel.as_u32(), &channel.encode())?;
                } else {
                    log::warn!("rejected RequestReadFrom: source {req_source:#x} is not live");
                }
            }
        } else if tag == MsgType::RequestReadFromPublic.as_u32() {
            if let Ok(req) = RequestReadFromPublic::decode(&frame.payload) {
                let channel = Channel { source_uid: req.source_uid, dest_uid: PUBLIC_UID };
                self.channels.push(channel);
            }
        } else if tag == MsgType::TimeRequest.as_u32() {
            if let Ok(req) = TimeRequest::decode(&frame.payload) {
                self.request_time(source, &req)?;
            }
        }
        Ok(())
    }

    pub fn bus_wait_timeout(&self) -> Duration {
        self.config.bus_wait_timeout
    }
}

fn location_to_record(uid: u32, location: &Location) -> LocationRecord {
    let mode = match location.mode {
        crate::location::Mode::Live => crate::protocol::Mode::Live,
        crate::location::Mode::Data => crate::protocol::Mode::Data,
        crate::location::Mode::Replay => crate::protocol::Mode::Replay,
        crate::location::Mode::Backtest => crate::protocol::Mode::Backtest,
    };
    let category = match location.category {
        crate::location::Category::Md => crate::protocol::Category::Md,
        crate::location::Category::Td => crate::protocol::Category::Td,
        crate::location::Category::Strategy => crate::protocol::Category::Strategy,
        crate::location::Category::System => crate::protocol::Category::System,
    };
    LocationRecord::new(uid, mode, category, &location.group, &location.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use crate::location::{Category, Mode};
    use tempfile::tempdir;

    fn make_master(dir: &std::path::Path) -> Master {
        let config = MasterConfig::new(dir);
        let store = ConfigStore::open_in_memory().unwrap();
        Master::open(config, Box::new(SystemClock), store).unwrap()
    }

    #[test]
    fn register_then_deregister_round_trips() {
        let dir = tempdir().unwrap();
        let mut master = make_master(dir.path());
        let record = LocationRecord::new(0, Mode::Live, Category::Strategy, "g1", "alpha");
        let uid = master.register_app(&record, 100).unwrap();
        assert!(master.live.contains(&uid));
        master.deregister_app(uid).unwrap();
        assert!(!master.live.contains(&uid));
    }

    #[test]
    fn double_register_is_rejected() {
        let dir = tempdir().unwrap();
        let mut master = make_master(dir.path());
        let record = LocationRecord::new(0, Mode::Live, Category::Strategy, "g1", "alpha");
        master.register_app(&record, 100).unwrap();
        let err = master.register_app(&record, 200).unwrap_err();
        assert!(matches!(err, crate::core::Error::AlreadyLive(_)));
    }

    #[test]
    fn request_start_uses_construction_time_not_now() {
        let dir = tempdir().unwrap();
        let mut master = make_master(dir.path());
        let start_time = master.start_time;
        let record = LocationRecord::new(0, Mode::Live, Category::Strategy, "g1", "alpha");
        let uid = master.register_app(&record, 999_999).unwrap();

        let pair = crate::core::page::pair_dir(&master.config.journal_root, master.self_uid, uid);
        let path = crate::core::page::page_path(&pair, 0);
        let mut reader = crate::core::PageReader::open(&path).unwrap();
        let mut found = false;
        while let Some(frame) = reader.next().unwrap() {
            if frame.header.msg_type == MsgType::RequestStart.as_u32() {
                let rec = RequestStart::decode(&frame.payload).unwrap();
                assert_eq!(rec.start_time, start_time);
                assert_ne!(rec.start_time, 999_999);
                found = true;
            }
        }
        assert!(found, "RequestStart frame was not written");
    }

    #[test]
    fn restart_reseeds_registry_from_persisted_locations() {
        let journal_dir = tempdir().unwrap();
        let db_path = tempdir().unwrap().path().join("config.sqlite3");
        let uid = {
            let store = ConfigStore::open(&db_path).unwrap();
            let mut master = Master::open(MasterConfig::new(journal_dir.path()), Box::new(SystemClock), store).unwrap();
            let record = LocationRecord::new(0, Mode::Live, Category::Strategy, "g1", "alpha");
            master.register_app(&record, 100).unwrap()
        };

        // Simulate a master restart: a fresh `Master::open` against the same
        // config store must rediscover the peer's identity even though it
        // never re-registered.
        let store = ConfigStore::open(&db_path).unwrap();
        let master = Master::open(MasterConfig::new(journal_dir.path()), Box::new(SystemClock), store).unwrap();
        assert!(master.registry.contains(uid));
        assert!(!master.live.contains(&uid), "restart does not resurrect liveness, only identity");
    }

    #[test]
    fn time_request_fires_a_time_mark_once_due() {
        let dir = tempdir().unwrap();
        let mut master = make_master(dir.path());
        let record = LocationRecord::new(0, Mode::Live, Category::Strategy, "g1", "alpha");
        let uid = master.register_app(&record, 100).unwrap();
        master.request_time(uid, &TimeRequest { duration_ns: 0, repeat_count: 0, repeat_limit: 1 }).unwrap();
        master.fire_due_timers().unwrap();
        assert!(master.timer_tasks.is_empty());
    }

    fn make_frame(source: u32, msg_type: u32, payload: Vec<u8>) -> crate::core::ReadFrame {
        use crate::core::frame::FrameHeader;
        crate::core::ReadFrame {
            header: FrameHeader {
                commit_len: payload.len() as u32 + 1,
                _pad0: 0,
                gen_time: 100,
                trigger_time: 100,
                msg_type,
                source,
                dest: 0,
                crc: 0,
                _pad: [0; 24],
            },
            payload,
        }
    }

    #[test]
    fn handle_frame_logs_and_continues_on_double_register() {
        let dir = tempdir().unwrap();
        let mut master = make_master(dir.path());
        let record = LocationRecord::new(0, Mode::Live, Category::Strategy, "g1", "alpha");
        master.register_app(&record, 100).unwrap();

        let frame = make_frame(0, MsgType::Register.as_u32(), Register { location: record, pid: 0, checkin_time: 200 }.encode());
        // Must not propagate Error::AlreadyLive out of handle_frame.
        master.handle_frame(&frame).unwrap();
    }

    #[test]
    fn handle_frame_logs_and_continues_on_stray_deregister() {
        let dir = tempdir().unwrap();
        let mut master = make_master(dir.path());
        let frame = make_frame(0, MsgType::Deregister.as_u32(), Deregister { uid: 0xdead_beef, _pad: 0 }.encode());
        // Must not propagate Error::UnknownLocation out of handle_frame.
        master.handle_frame(&frame).unwrap();
    }

    #[test]
    fn register_app_installs_mandatory_channels() {
        let dir = tempdir().unwrap();
        let mut master = make_master(dir.path());
        let record = LocationRecord::new(0, Mode::Live, Category::Strategy, "g1", "alpha");
        let uid = master.register_app(&record, 100).unwrap();
        assert!(master.channels.iter().any(|c| c.source_uid == uid && c.dest_uid == PUBLIC_UID));
        assert!(master.channels.iter().any(|c| c.source_uid == uid && c.dest_uid == master.self_uid));
    }

    #[test]
    fn request_write_to_rejects_non_live_dest() {
        let dir = tempdir().unwrap();
        let mut master = make_master(dir.path());
        let record = LocationRecord::new(0, Mode::Live, Category::Strategy, "g1", "alpha");
        let uid = master.register_app(&record, 100).unwrap();
        let before = master.channels.len();

        let frame = make_frame(uid, MsgType::RequestWriteTo.as_u32(), RequestWriteTo { dest_uid: 0xdead_beef, _pad: 0 }.encode());
        master.handle_frame(&frame).unwrap();
        assert_eq!(master.channels.len(), before, "no channel should be added for a non-live dest");
    }

    #[test]
    fn request_write_to_accepts_live_dest_and_joins_reader() {
        let dir = tempdir().unwrap();
        let mut master = make_master(dir.path());
        let record_a = LocationRecord::new(0, Mode::Live, Category::Strategy, "g1", "alpha");
        let record_b = LocationRecord::new(0, Mode::Live, Category::Strategy, "g1", "beta");
        let uid_a = master.register_app(&record_a, 100).unwrap();
        let uid_b = master.register_app(&record_b, 100).unwrap();

        let frame = make_frame(uid_a, MsgType::RequestWriteTo.as_u32(), RequestWriteTo { dest_uid: uid_b, _pad: 0 }.encode());
        master.handle_frame(&frame).unwrap();
        assert!(master.channels.iter().any(|c| c.source_uid == uid_a && c.dest_uid == uid_b));
    }

    #[test]
    fn deregister_app_clears_sqlizer_and_disjoins_reader() {
        let dir = tempdir().unwrap();
        let mut master = make_master(dir.path());
        let record = LocationRecord::new(0, Mode::Live, Category::Strategy, "g1", "alpha");
        let uid = master.register_app(&record, 100).unwrap();
        assert!(master.sqlizers.contains_key(&uid));

        master.deregister_app(uid).unwrap();
        assert!(!master.sqlizers.contains_key(&uid));
        assert!(!master.known_public_sources.contains(&uid));
        let sessions = master.page_store.find_sessions(uid);
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].end_ns.is_some());
    }

    #[test]
    fn handle_frame_updates_last_seen_and_mirrors_config() {
        let dir = tempdir().unwrap();
        let mut master = make_master(dir.path());
        let record = LocationRecord::new(0, Mode::Live, Category::Strategy, "g1", "alpha");
        let uid = master.register_app(&record, 100).unwrap();
        assert!(master.last_seen_ns(uid).is_none());

        let payload = serde_json::to_vec(&serde_json::json!({"key": "risk_limit", "value": "250"})).unwrap();
        let frame = make_frame(uid, MsgType::Config.as_u32(), payload);
        master.handle_frame(&frame).unwrap();

        assert_eq!(master.last_seen_ns(uid), Some(100));
        assert_eq!(master.config_store.get(uid, "risk_limit").unwrap(), Some("250".to_string()));
    }
}
