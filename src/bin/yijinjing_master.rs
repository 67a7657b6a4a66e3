use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use yijinjing::config::ConfigStore;
use yijinjing::core::SystemClock;
use yijinjing::master::{Master, MasterConfig};

#[derive(Parser)]
#[command(name = "yijinjing-master", version, about = "Process-coordination master")]
struct Cli {
    /// Root directory holding every participant's page files.
    journal_root: PathBuf,

    /// Sqlite file backing persisted per-apprentice config. Defaults to
    /// `<journal-root>/config.db`.
    #[arg(long = "config-db")]
    config_db: Option<PathBuf>,

    #[arg(long = "trading-day", default_value_t = 0)]
    trading_day: u32,

    /// Sleep this long between ticks when no frame was dispatched, instead
    /// of busy-polling the journal root.
    #[arg(long = "idle-sleep-ms", default_value_t = 5)]
    idle_sleep_ms: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config_db = cli.config_db.unwrap_or_else(|| cli.journal_root.join("config.db"));
    let config_store = ConfigStore::open(&config_db)?;

    let mut config = MasterConfig::new(&cli.journal_root);
    config.trading_day = cli.trading_day;

    let mut master = Master::open(config, Box::new(SystemClock), config_store)?;
    log::info!("master listening, uid={:#x}, journal_root={}", master.self_uid(), cli.journal_root.display());

    let idle_sleep = Duration::from_millis(cli.idle_sleep_ms);
    loop {
        if !master.produce_one()? {
            thread::sleep(idle_sleep);
        }
    }
}
