//! Process-coordination core for a low-latency trading platform: a master
//! process arbitrates apprentice worker lifecycles, brokers shared-memory
//! journal channels between them, distributes wall-clock time events, and
//! persists per-apprentice configuration.
//!
//! Trading semantics, exchange wire protocols, GUI/telemetry surfaces, and
//! market-data persistence live outside this crate; see DESIGN.md for the
//! full boundary.

pub mod apprentice;
pub mod config;
pub mod core;
pub mod dispatcher;
pub mod journal;
pub mod location;
pub mod master;
pub mod notifier;
pub mod pagestore;
pub mod protocol;

pub use apprentice::{Apprentice, ApprenticeConfig};
pub use config::{ConfigRecord, ConfigStore, Sqlizer};
pub use core::{Error, Result};
pub use dispatcher::EventBus;
pub use journal::{JournalReader, JournalWriter};
pub use location::{Category, FsLocator, Location, LocationRegistry, Locator, Mode, PUBLIC_UID};
pub use master::{Master, MasterConfig, MasterHooks};
pub use notifier::{Observer, Publisher};
pub use pagestore::PageStore;
