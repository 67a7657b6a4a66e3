use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use yijinjing::config::ConfigStore;
use yijinjing::core::page::{list_page_ids, pair_dir};
use yijinjing::core::PageReader;

#[derive(Parser)]
#[command(name = "yijinjing-inspect", version, about = "Journal root inspection tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists every (owner, dest) page-pair directory under a journal root.
    Pairs { journal_root: PathBuf },
    /// Lists the page files published for one (owner, dest) pair.
    Pages {
        journal_root: PathBuf,
        owner_uid: String,
        dest_uid: String,
    },
    /// Dumps every frame in one page file, in commit order.
    Tail {
        journal_root: PathBuf,
        owner_uid: String,
        dest_uid: String,
        page_no: u32,
        #[arg(long = "hexdump")]
        hexdump: bool,
    },
    /// Dumps every persisted config record, or just one uid's.
    Config {
        config_db: PathBuf,
        #[arg(long = "uid")]
        uid: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let mut out = io::BufWriter::new(io::stdout());
    match cli.command {
        Commands::Pairs { journal_root } => cmd_pairs(&journal_root, &mut out)?,
        Commands::Pages { journal_root, owner_uid, dest_uid } => {
            cmd_pages(&journal_root, parse_uid(&owner_uid)?, parse_uid(&dest_uid)?, &mut out)?
        }
        Commands::Tail { journal_root, owner_uid, dest_uid, page_no, hexdump } => {
            cmd_tail(&journal_root, parse_uid(&owner_uid)?, parse_uid(&dest_uid)?, page_no, hexdump, &mut out)?
        }
        Commands::Config { config_db, uid } => cmd_config(&config_db, uid.as_deref(), &mut out)?,
    }
    Ok(())
}

fn parse_uid(raw: &str) -> Result<u32> {
    if let Some(hex) = raw.strip_prefix("0x") {
        Ok(u32::from_str_radix(hex, 16)?)
    } else {
        Ok(raw.parse()?)
    }
}

fn cmd_pairs(journal_root: &std::path::Path, out: &mut dyn Write) -> Result<()> {
    if !journal_root.exists() {
        writeln!(out, "journal root not found: {}", journal_root.display())?;
        return Ok(());
    }
    let mut names: Vec<_> = std::fs::read_dir(journal_root)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    for name in names {
        writeln!(out, "{name}")?;
    }
    Ok(())
}

fn cmd_pages(journal_root: &std::path::Path, owner_uid: u32, dest_uid: u32, out: &mut dyn Write) -> Result<()> {
    let pair = pair_dir(journal_root, owner_uid, dest_uid);
    let ids = list_page_ids(&pair)?;
    writeln!(out, "pair={}", pair.display())?;
    for id in ids {
        writeln!(out, "page {id:010}")?;
    }
    Ok(())
}

fn cmd_tail(
    journal_root: &std::path::Path,
    owner_uid: u32,
    dest_uid: u32,
    page_no: u32,
    hexdump: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let pair = pair_dir(journal_root, owner_uid, dest_uid);
    let path = yijinjing::core::page::page_path(&pair, page_no);
    let mut reader = PageReader::open(&path)?;
    writeln!(out, "page={} sealed={}", path.display(), reader.sealed())?;
    while let Some(frame) = reader.next()? {
        writeln!(
            out,
            "gen_time={} trigger_time={} msg_type={:#x} source={:#x} dest={:#x} len={}",
            frame.header.gen_time,
            frame.header.trigger_time,
            frame.header.msg_type,
            frame.header.source,
            frame.header.dest,
            frame.payload.len()
        )?;
        if hexdump {
            for (index, chunk) in frame.payload.chunks(16).enumerate() {
                write!(out, "  {:04x}:", index * 16)?;
                for byte in chunk {
                    write!(out, " {byte:02x}")?;
                }
                writeln!(out)?;
            }
        }
    }
    Ok(())
}

fn cmd_config(config_db: &std::path::Path, uid: Option<&str>, out: &mut dyn Write) -> Result<()> {
    let store = ConfigStore::open(config_db)?;
    let records = match uid {
        Some(raw) => store.get_all(parse_uid(raw)?)?,
        None => store.get_all_records()?,
    };
    for record in records {
        writeln!(out, "uid={:#x} key={} value={}", record.uid, record.key, record.value)?;
    }
    Ok(())
}
