//! btreekv CLI
//!
//! Command-line interface for inspecting and editing a btreekv file.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::process::ExitCode;

use btreekv::{Config, ErrorKind, RangeFlags, Store, StoreStats};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// btreekv CLI
#[derive(Parser, Debug)]
#[command(name = "btreekv-cli")]
#[command(about = "Ordered key-value store in a single file")]
#[command(version)]
struct Args {
    /// Store file (created if missing)
    #[arg(short, long)]
    file: String,

    /// Page size in bytes for a new store (0 = default)
    #[arg(long, default_value = "0")]
    page_size: u32,

    /// Page cache budget in bytes (0 = default)
    #[arg(long, default_value = "0")]
    cache_size: usize,

    /// Minimum keys per page for a new store (0 = default)
    #[arg(long, default_value = "0")]
    min_keys: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List keys in a range
    Keys(RangeArgs),

    /// List values in a range
    Values(RangeArgs),

    /// List key/value pairs in a range
    Items(RangeArgs),

    /// Show store counters
    Stats,

    /// Check the tree structure
    Verify,
}

#[derive(ClapArgs, Debug)]
struct RangeArgs {
    /// First key (inclusive)
    #[arg(long)]
    start: Option<String>,

    /// Last key (exclusive unless --include-end)
    #[arg(long)]
    end: Option<String>,

    /// Include the end key
    #[arg(long)]
    include_end: bool,

    /// Descending order
    #[arg(long)]
    desc: bool,
}

impl RangeArgs {
    fn flags(&self) -> RangeFlags {
        let mut flags = RangeFlags::empty();
        if self.include_end {
            flags |= RangeFlags::INCLUDE_END;
        }
        if self.desc {
            flags |= RangeFlags::DESCENDING;
        }
        flags
    }
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,btreekv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> btreekv::Result<ExitCode> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&args.file)?;

    let config = Config::builder()
        .page_size(args.page_size)
        .cache_size(args.cache_size)
        .min_keys_per_page(args.min_keys)
        .build();
    let mut store = Store::open(file, config)?;
    tracing::debug!("Opened {}", args.file);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let code = match args.command {
        Commands::Get { key } => match store.lookup(key.as_bytes())? {
            Some(value) => {
                writeln!(out, "{}", String::from_utf8_lossy(&value))?;
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("(not found)");
                ExitCode::from(2)
            }
        },
        Commands::Put { key, value } => {
            store.put(key.as_bytes(), value.as_bytes())?;
            writeln!(out, "OK")?;
            ExitCode::SUCCESS
        }
        Commands::Del { key } => match store.delete(key.as_bytes()) {
            Ok(()) => {
                writeln!(out, "OK")?;
                ExitCode::SUCCESS
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                eprintln!("(not found)");
                ExitCode::from(2)
            }
            Err(e) => return Err(e),
        },
        Commands::Keys(range) => {
            let (start, end) = (range.start.as_deref(), range.end.as_deref());
            for key in store.keys(start.map(str::as_bytes), end.map(str::as_bytes), range.flags())? {
                writeln!(out, "{}", String::from_utf8_lossy(&key?))?;
            }
            ExitCode::SUCCESS
        }
        Commands::Values(range) => {
            let (start, end) = (range.start.as_deref(), range.end.as_deref());
            for value in store.values(start.map(str::as_bytes), end.map(str::as_bytes), range.flags())? {
                writeln!(out, "{}", String::from_utf8_lossy(&value?))?;
            }
            ExitCode::SUCCESS
        }
        Commands::Items(range) => {
            let (start, end) = (range.start.as_deref(), range.end.as_deref());
            for item in store.items(start.map(str::as_bytes), end.map(str::as_bytes), range.flags())? {
                let (key, value) = item?;
                writeln!(
                    out,
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                )?;
            }
            ExitCode::SUCCESS
        }
        Commands::Stats => {
            write_stats(&mut out, &store.stats()?)?;
            ExitCode::SUCCESS
        }
        Commands::Verify => {
            let report = store.verify()?;
            writeln!(
                out,
                "OK: {} entries, depth {}, {} leaf pages, {} internal pages, {} overflow pages, {} free pages",
                report.entries,
                report.depth,
                report.leaf_pages,
                report.internal_pages,
                report.overflow_pages,
                report.free_pages
            )?;
            ExitCode::SUCCESS
        }
    };

    store.close()?;
    Ok(code)
}

fn write_stats(out: &mut impl Write, stats: &StoreStats) -> io::Result<()> {
    writeln!(out, "entries:      {}", stats.entries)?;
    writeln!(out, "depth:        {}", stats.depth)?;
    writeln!(out, "page size:    {}", stats.page_size)?;
    writeln!(out, "pages:        {}", stats.page_count)?;
    writeln!(out, "free pages:   {}", stats.free_pages)?;
    writeln!(out, "cached pages: {}", stats.cached_pages)?;
    writeln!(out, "dirty pages:  {}", stats.dirty_pages)?;
    Ok(())
}
