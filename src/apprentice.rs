//! Apprentice peer (spec.md §4.H): the client-side mirror of the master's
//! handshake. Opens its own page store, registers, drains the bootstrap
//! burst, then runs its own dispatch loop. Grounded stylistically on the
//! teacher's `trading::router::RouterChannel` bidirectional-connection
//! pattern (connect, then send/recv against a named channel).

use std::path::PathBuf;

use crate::config::ConfigRecord;
use crate::core::{Clock, ReadFrame, Result};
use crate::journal::{JournalReader, JournalWriter};
use crate::location::{Location, PUBLIC_UID};
use crate::protocol::{
    LocationRecord, MsgType, Ping, Register, RequestReadFrom, RequestReadFromPublic,
    RequestWriteTo, TimeRequest, TradingDay, WireRecord,
};

pub struct ApprenticeConfig {
    pub journal_root: PathBuf,
    pub master_uid: u32,
}

pub struct Apprentice {
    config: ApprenticeConfig,
    clock: Box<dyn Clock>,
    location: Location,
    self_uid: u32,
    writer: JournalWriter,
    reader: JournalReader,
    registered: bool,
    trading_day: Option<u32>,
    config_records: Vec<ConfigRecord>,
    on_trading_day: Option<Box<dyn FnMut(u32)>>,
}

impl Apprentice {
    pub fn new(config: ApprenticeConfig, clock: Box<dyn Clock>, location: Location) -> Self {
        let self_uid = location.uid();
        let mut reader = JournalReader::new();
        // Apprentices read their own private channel from the master first
        // (master-is-priority tie-break, spec.md §4.B), then the shared
        // PUBLIC channel for broadcasts like other peers' Location/Deregister.
        reader.join(config.journal_root.clone(), config.master_uid, self_uid);
        reader.join(config.journal_root.clone(), PUBLIC_UID, PUBLIC_UID);
        let writer = JournalWriter::new(config.journal_root.clone(), self_uid);
        Self {
            config,
            clock,
            location,
            self_uid,
            writer,
            reader,
            registered: false,
            trading_day: None,
            config_records: Vec::new(),
            on_trading_day: None,
        }
    }

    pub fn set_on_trading_day(&mut self, hook: impl FnMut(u32) + 'static) {
        self.on_trading_day = Some(Box::new(hook));
    }

    pub fn self_uid(&self) -> u32 {
        self.self_uid
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn trading_day(&self) -> Option<u32> {
        self.trading_day
    }

    pub fn config_records(&self) -> &[ConfigRecord] {
        &self.config_records
    }

    /// Sends `Register` to the master's well-known uid, over the shared
    /// PUBLIC channel (the master joins every apprentice's PUBLIC mailbox
    /// dynamically; see `Master::poll_for_new_apprentices`).
    pub fn register(&mut self, pid: u32) -> Result<()> {
        let (mode, category) = location_tags(&self.location);
        let record = LocationRecord::new(self.self_uid, mode, category, &self.location.group, &self.location.name);
        let now = self.clock.now();
        let reg = Register { location: record, pid, checkin_time: now };
        self.writer.mark(&*self.clock, PUBLIC_UID, MsgType::Register.as_u32(), &reg.encode())?;
        Ok(())
    }

    pub fn deregister(&mut self) -> Result<()> {
        let dereg = crate::protocol::Deregister { uid: self.self_uid, _pad: 0 };
        self.writer.mark(&*self.clock, PUBLIC_UID, MsgType::Deregister.as_u32(), &dereg.encode())?;
        self.registered = false;
        Ok(())
    }

    pub fn request_read_from(&mut self, source_uid: u32, from_time: u64) -> Result<()> {
        let req = RequestReadFrom { source_uid, from_time };
        self.writer.mark(&*self.clock, PUBLIC_UID, MsgType::RequestReadFrom.as_u32(), &req.encode())?;
        self.reader.join(self.config.journal_root.clone(), source_uid, self.self_uid);
        Ok(())
    }

    pub fn request_read_from_public(&mut self, source_uid: u32, from_time: u64) -> Result<()> {
        let req = RequestReadFromPublic { source_uid, from_time };
        self.writer.mark(&*self.clock, PUBLIC_UID, MsgType::RequestReadFromPublic.as_u32(), &req.encode())?;
        self.reader.join(self.config.journal_root.clone(), source_uid, PUBLIC_UID);
        Ok(())
    }

    pub fn request_write_to(&mut self, dest_uid: u32) -> Result<()> {
        let req = RequestWriteTo { dest_uid, _pad: 0 };
        self.writer.mark(&*self.clock, PUBLIC_UID, MsgType::RequestWriteTo.as_u32(), &req.encode())
    }

    pub fn request_time(&mut self, duration_ns: u64, repeat_limit: u32) -> Result<()> {
        let req = TimeRequest { duration_ns, repeat_count: 0, repeat_limit };
        self.writer.mark(&*self.clock, PUBLIC_UID, MsgType::TimeRequest.as_u32(), &req.encode())
    }

    pub fn ping(&mut self, nonce: u64) -> Result<()> {
        self.writer.mark(&*self.clock, PUBLIC_UID, MsgType::Ping.as_u32(), &Ping { nonce }.encode())
    }

    /// Drains whatever frames are currently available, applying the
    /// bootstrap-burst side effects (`TradingDay`, persisted config,
    /// recognizing our own `Register` echo) and returning every frame seen,
    /// for the caller to inspect further (e.g. market-data subscribers
    /// outside this crate's scope).
    pub fn drain(&mut self) -> Result<Vec<ReadFrame>> {
        let mut seen = Vec::new();
        while let Some(frame) = self.reader.next()? {
            self.apply_bootstrap_side_effects(&frame)?;
            seen.push(frame);
        }
        Ok(seen)
    }

    fn apply_bootstrap_side_effects(&mut self, frame: &ReadFrame) -> Result<()> {
        let tag = frame.header.msg_type;
        if tag == MsgType::TradingDay.as_u32() {
            if let Ok(rec) = TradingDay::decode(&frame.payload) {
                self.trading_day = Some(rec.trading_day);
                if let Some(hook) = &mut self.on_trading_day {
                    hook(rec.trading_day);
                }
            }
        } else if tag == MsgType::Config.as_u32() {
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&frame.payload) {
                if let (Some(key), Some(val)) = (value.get("key").and_then(|v| v.as_str()), value.get("value").and_then(|v| v.as_str())) {
                    self.config_records.push(ConfigRecord { uid: self.self_uid, key: key.to_string(), value: val.to_string() });
                }
            }
        } else if tag == MsgType::Register.as_u32() {
            if let Ok(reg) = Register::decode(&frame.payload) {
                if reg.location.uid == self.self_uid {
                    self.registered = true;
                }
            }
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.writer.flush_all()
    }
}

fn location_tags(location: &Location) -> (crate::protocol::Mode, crate::protocol::Category) {
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
    (mode, category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use crate::location::{Category, Mode};
    use crate::master::{Master, MasterConfig};
    use crate::config::ConfigStore;
    use tempfile::tempdir;

    #[test]
    fn register_then_master_discovers_and_registers_it() {
        let dir = tempdir().unwrap();
        let loc = Location::new(Mode::Live, Category::Strategy, "g1", "alpha").unwrap();
        let mut app = Apprentice::new(
            ApprenticeConfig { journal_root: dir.path().to_path_buf(), master_uid: Location::master().uid() },
            Box::new(SystemClock),
            loc,
        );
        app.register(4242).unwrap();
        app.flush().unwrap();

        let mut master = Master::open(
            MasterConfig::new(dir.path()),
            Box::new(SystemClock),
            ConfigStore::open_in_memory().unwrap(),
        )
        .unwrap();
        master.poll_for_new_apprentices().unwrap();
        // Drain whatever the master can see; the Register frame lives on
        // the apprentice's own PUBLIC mailbox, discovered by directory scan.
        let mut progressed = true;
        while progressed {
            progressed = master.produce_one().unwrap();
        }
        assert!(master.is_live(app.self_uid()));
    }
}
