//! protkey: AES over protected keys from the command line
//!
//! Commands:
//!   algs [--json]          - list the algorithms the cipher unit offers
//!   encrypt / decrypt      - transform a file with ECB, CBC, CTR or XTS
//!   selftest               - known-answer vectors, with and without key expiry
//!   config show            - display the active configuration
//!
//! The cipher unit and key-protection service are the software emulation, so
//! output is interchangeable with any AES implementation using the same key.

mod selftest;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rayon::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use protkey_cipher::soft::SoftHsm;
use protkey_cipher::{Provider, SkCipher};
use protkey_core::config::ProtkeyConfig;
use protkey_core::{Direction, Mode, AES_BLOCK_SIZE};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "protkey", version, about = "AES over protected keys")]
struct Cli {
    /// Path to protkey.toml configuration file
    #[arg(long, short = 'c', env = "PROTKEY_CONFIG", default_value = "protkey.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "PROTKEY_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "PROTKEY_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered algorithms
    Algs {
        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Encrypt a file
    Encrypt(CryptArgs),

    /// Decrypt a file
    Decrypt(CryptArgs),

    /// Run known-answer self-tests
    Selftest,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct CryptArgs {
    /// Cipher mode: ecb, cbc, ctr or xts (algorithm names like cbc(paes) work too)
    #[arg(long, short = 'm')]
    mode: Mode,

    /// Key as hex: 16/24/32 bytes, 32/64 for XTS, or an opaque key blob
    #[arg(long, env = "PROTKEY_KEY", hide_env_values = true)]
    key_hex: String,

    /// IV as hex (defaults to zeros; ignored for ECB)
    #[arg(long)]
    iv_hex: Option<String>,

    /// Input file (stdin when omitted)
    #[arg(long = "in")]
    input: Option<PathBuf>,

    /// Output file (stdout when omitted)
    #[arg(long = "out")]
    output: Option<PathBuf>,

    /// Treat a 32/64-byte XTS key as one full XTS key
    #[arg(long)]
    full_xts: bool,

    /// XTS only: process independent sectors of this size in parallel, each
    /// tweaked with its little-endian sector number
    #[arg(long)]
    sector_size: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ProtkeyConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = match cli.log_format {
        Some(f) => f,
        None if config.log.format.eq_ignore_ascii_case("json") => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(level, format);

    match cli.command {
        Commands::Algs { json } => cmd_algs(&config, json),
        Commands::Encrypt(args) => cmd_crypt(&config, Direction::Encrypt, args),
        Commands::Decrypt(args) => cmd_crypt(&config, Direction::Decrypt, args),
        Commands::Selftest => selftest::run(&config).map(|n| println!("{n} checks passed")),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(std::io::stderr)).init(),
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
}

fn provider(config: &ProtkeyConfig) -> Provider {
    SoftHsm::new(&config.soft).provider(config)
}

// ── `protkey algs` ────────────────────────────────────────────────────────────

fn cmd_algs(config: &ProtkeyConfig, json: bool) -> Result<()> {
    let provider = provider(config);
    let algs = provider.algorithms();

    if json {
        println!("{}", serde_json::to_string_pretty(algs)?);
        return Ok(());
    }

    println!(
        "{:<12} {:<20} {:>8} {:>5} {:>4} {:>9}",
        "name", "driver", "priority", "block", "iv", "keysize"
    );
    for a in algs {
        println!(
            "{:<12} {:<20} {:>8} {:>5} {:>4} {:>4}..{:<4}",
            a.name, a.driver_name, a.priority, a.block_size, a.iv_size, a.min_key_size, a.max_key_size
        );
    }
    if algs.is_empty() {
        eprintln!("no algorithms offered by the cipher unit");
    }
    Ok(())
}

// ── `protkey encrypt` / `protkey decrypt` ─────────────────────────────────────

fn cmd_crypt(config: &ProtkeyConfig, direction: Direction, args: CryptArgs) -> Result<()> {
    let key_hex = SecretString::from(args.key_hex);
    let key = Zeroizing::new(
        hex::decode(key_hex.expose_secret().trim()).context("decoding --key-hex")?,
    );
    let iv = args
        .iv_hex
        .as_deref()
        .map(|s| hex::decode(s.trim()).context("decoding --iv-hex"))
        .transpose()?;

    let mut data = read_input(args.input.as_deref())?;
    let provider = provider(config);
    let cipher = keyed_cipher(&provider, args.mode, &key, args.full_xts)?;

    match args.sector_size {
        Some(size) => {
            if args.mode != Mode::Xts {
                bail!("--sector-size applies to xts only");
            }
            if iv.is_some() {
                bail!("--iv-hex cannot be combined with --sector-size");
            }
            crypt_sectors(cipher.as_ref(), direction, &mut data, size)?;
        }
        None => {
            let mut iv = iv.unwrap_or_else(|| vec![0u8; cipher.info().iv_size]);
            if cipher.info().iv_size == 0 {
                iv.clear();
            }
            cipher
                .crypt(direction, &mut data, &mut iv)
                .with_context(|| format!("{} {:?} failed", cipher.info().name, direction))?;
            if !iv.is_empty() {
                tracing::info!(iv = %hex::encode(&iv), "final IV");
            }
        }
    }

    tracing::debug!(mode = %args.mode, bytes = data.len(), "done");
    write_output(args.output.as_deref(), &data)
}

fn keyed_cipher(
    provider: &Provider,
    mode: Mode,
    key: &[u8],
    full_xts: bool,
) -> Result<Box<dyn SkCipher>> {
    if full_xts {
        if mode != Mode::Xts {
            bail!("--full-xts applies to xts only");
        }
        let mut xts = provider.xts()?;
        xts.set_full_key(key).context("setting full XTS key")?;
        return Ok(Box::new(xts));
    }
    let mut cipher = provider.alloc(mode)?;
    cipher.set_key(key).context("setting key")?;
    Ok(cipher)
}

/// Transform `data` as independent XTS sectors; sector `n` uses `n` in
/// little-endian order as its tweak.
fn crypt_sectors(
    cipher: &dyn SkCipher,
    direction: Direction,
    data: &mut [u8],
    sector_size: usize,
) -> Result<()> {
    if sector_size == 0 || sector_size % AES_BLOCK_SIZE != 0 {
        bail!("sector size {sector_size} is not a positive multiple of {AES_BLOCK_SIZE}");
    }
    data.par_chunks_mut(sector_size)
        .enumerate()
        .try_for_each(|(n, sector)| {
            let mut tweak = (n as u128).to_le_bytes();
            cipher
                .crypt(direction, sector, &mut tweak)
                .with_context(|| format!("sector {n}"))
        })
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(p) => std::fs::read(p).with_context(|| format!("reading {}", p.display())),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf).context("reading stdin")?;
            Ok(buf)
        }
    }
}

fn write_output(path: Option<&Path>, data: &[u8]) -> Result<()> {
    match path {
        Some(p) => std::fs::write(p, data).with_context(|| format!("writing {}", p.display())),
        None => {
            let mut out = std::io::stdout().lock();
            out.write_all(data).context("writing stdout")?;
            out.flush().context("flushing stdout")
        }
    }
}

// ── `protkey config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &ProtkeyConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
