use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use memory_probe::config::{validate_config, Config, ConfigLoader, DEFAULT_CONFIG_FILE};
use memory_probe::memory::{Pattern, RegionFilter};
use memory_probe::{Address, CheatTable, MemorySource, MemoryValue, Outcome, ProcessHandle, Session, ValueType};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "memory-probe", version, about = "Read-only process memory introspection")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "MEMORY_PROBE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List committed memory regions
    Regions {
        pid: u32,

        /// Only writable regions
        #[arg(long)]
        writable: bool,
    },

    /// List loaded modules
    Modules { pid: u32 },

    /// Hex dump of target memory
    Read {
        pid: u32,
        /// Address (hex with 0x, or decimal)
        address: String,
        #[arg(short, long, default_value = "64")]
        size: usize,
    },

    /// Scan for an exact value
    Scan {
        pid: u32,
        value: String,
        #[arg(short = 't', long, default_value = "u32")]
        value_type: String,
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Scan for a byte pattern such as "48 8B ?? 48 89 05"
    Pattern {
        pid: u32,
        pattern: String,
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Follow a pointer chain
    Resolve {
        pid: u32,
        base: String,
        /// Hex offsets applied in order
        offsets: Vec<String>,
    },

    /// Reverse pointer search for an address
    Pointers { pid: u32, target: String },

    /// Infer the layout of a structure
    Analyze {
        pid: u32,
        address: String,
        #[arg(short, long, default_value = "256")]
        size: usize,
        /// Name for the structure
        #[arg(long)]
        hint: Option<String>,
        /// Follow pointer fields
        #[arg(short, long)]
        recursive: bool,
    },

    /// Describe an address as module and symbol
    Symbol { pid: u32, address: String },

    /// Summarize a cheat table
    Table {
        file: PathBuf,
        /// Print the full table as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: &Path) -> Result<Config> {
    let config = ConfigLoader::new(path)
        .load_or_default()
        .with_context(|| format!("Failed to load {}", path.display()))?;
    validate_config(&config).context("Invalid configuration")?;
    Ok(config)
}

fn parse_offset(text: &str) -> Result<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let digits = digits.trim_start_matches("0x").trim_start_matches("0X");
    let value = i64::from_str_radix(digits, 16).with_context(|| format!("Invalid offset: {}", text))?;
    Ok(if negative { -value } else { value })
}

fn attach(pid: u32, config: Config) -> Result<Session<ProcessHandle>> {
    Session::attach(pid, config).with_context(|| format!("Failed to attach to process {}", pid))
}

fn run(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Regions { pid, writable } => {
            let session = attach(pid, config)?;
            let filter = if writable {
                RegionFilter::new().writable()
            } else {
                RegionFilter::new()
            };
            let regions = filter.apply(&session.source().regions()?);
            for region in &regions {
                println!(
                    "{}  {:>10X}  {:<5} {}",
                    region.base_address,
                    region.size,
                    region.protection,
                    region.path.as_deref().unwrap_or("")
                );
            }
            println!("{} regions", regions.len());
            session.detach()?;
        }

        Commands::Modules { pid } => {
            let session = attach(pid, config)?;
            for module in session.modules()? {
                println!("{}  {:>10X}  {}", module.base_address, module.size, module.name);
            }
            session.detach()?;
        }

        Commands::Read { pid, address, size } => {
            let session = attach(pid, config)?;
            let address: Address = address.parse()?;
            let data = session.reader().read_bytes(address, size)?;
            for (i, line) in data.chunks(16).enumerate() {
                let offset = address.checked_add(i * 16).context("Address overflow")?;
                println!("{}  {}", offset, hex::encode(line));
            }
            session.detach()?;
        }

        Commands::Scan {
            pid,
            value,
            value_type,
            limit,
        } => {
            let session = attach(pid, config)?;
            let value_type: ValueType = value_type.parse()?;
            let value = MemoryValue::parse(&value, value_type)?;
            match session.scanner().scan_value(&value)? {
                Outcome::Completed(report) => {
                    for result in report.results.iter().take(limit) {
                        println!("{}  {}", result.address, result.value);
                    }
                    println!(
                        "{} results ({} regions scanned, {} skipped{})",
                        report.results.len(),
                        report.regions_scanned,
                        report.regions_skipped,
                        if report.truncated { ", truncated" } else { "" }
                    );
                }
                Outcome::Cancelled => println!("Scan cancelled"),
            }
            session.detach()?;
        }

        Commands::Pattern { pid, pattern, limit } => {
            let session = attach(pid, config)?;
            let pattern = Pattern::parse(&pattern)?;
            if let Outcome::Completed(report) = session.scanner().scan_compiled(&pattern)? {
                for result in report.results.iter().take(limit) {
                    println!("{}", result.address);
                }
                println!("{} matches", report.results.len());
            }
            session.detach()?;
        }

        Commands::Resolve { pid, base, offsets } => {
            let session = attach(pid, config)?;
            let base: Address = base.parse()?;
            let offsets = offsets.iter().map(|o| parse_offset(o)).collect::<Result<Vec<_>>>()?;
            let chain = session.pointers().resolve_chain(base, offsets);
            println!("{}", chain);
            session.detach()?;
        }

        Commands::Pointers { pid, target } => {
            let session = attach(pid, config)?;
            let target: Address = target.parse()?;
            let options = session.pointer_search_options();
            if let Outcome::Completed(report) = session.pointers().find_chains(target, &options)? {
                for chain in report.chains() {
                    println!("{}", chain);
                }
                if report.truncated {
                    println!("(truncated at {} steps)", options.max_results);
                }
            }
            session.detach()?;
        }

        Commands::Analyze {
            pid,
            address,
            size,
            hint,
            recursive,
        } => {
            let session = attach(pid, config)?;
            let address: Address = address.parse()?;
            let analyzer = session.analyzer();
            let info = if recursive {
                analyzer.analyze_recursive(address, size, hint.as_deref())?
            } else {
                analyzer.analyze(address, size, hint.as_deref())?
            };
            println!("{}", serde_json::to_string_pretty(&info)?);
            session.detach()?;
        }

        Commands::Symbol { pid, address } => {
            let mut session = attach(pid, config)?;
            let address: Address = address.parse()?;
            let description = session.symbols()?.describe(address);
            println!("{}", description);
            session.detach()?;
        }

        Commands::Table { file, json } => {
            let table = CheatTable::load(&file)?;
            if json {
                println!("{}", table.to_json()?);
            } else {
                println!("{}", serde_json::to_string_pretty(&table.summary())?);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    info!("memory-probe v{}", env!("CARGO_PKG_VERSION"));
    if cli.config.is_file() {
        info!("Using configuration from {}", cli.config.display());
    }

    // Process access blocks; keep it off the async workers
    let command = cli.command;
    match tokio::task::spawn_blocking(move || run(command, config)).await {
        Ok(result) => result,
        Err(e) => bail!("Command panicked: {}", e),
    }
}
