mod export;
mod info;

use std::fs::{self, File};
use std::io::{stderr, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sbw::config::{self, DecodeConfig};
use sbw::decode::{Decoded, Decoder};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a capture file and export its records.
    ///
    /// Runs the full pipeline (frame, decrypt, decompress, TLV scan) and
    /// writes one file per record kind to the output directory. Corrupt
    /// blocks are skipped and reported in the summary; the run only fails
    /// outright for I/O errors, bad configuration, or a key that fails on
    /// every block.
    Decode {
        /// Input capture file.
        input: PathBuf,

        /// Output directory for exported files.
        #[arg(short, long, default_value = "decoded", value_name = "dir")]
        output: PathBuf,

        /// Export per-kind CSV files.
        #[arg(long, action)]
        csv: bool,

        /// Export per-kind JSON files plus a capture-level document.
        #[arg(long, action)]
        json: bool,

        /// Decryption key, hex or base64 encoded. Overrides the key from
        /// --config.
        #[arg(short, long, value_name = "key")]
        key: Option<String>,

        /// Path to a JSON configuration file.
        #[arg(short, long, value_name = "path")]
        config: Option<PathBuf>,

        /// Overwrite existing export files.
        #[arg(long, action)]
        clobber: bool,
    },
    /// Show summary information about a capture file.
    ///
    /// Decodes the file without exporting and prints block and record
    /// totals, skip reasons, and the observed timestamp range.
    Info {
        /// Input capture file.
        input: PathBuf,

        /// Output format.
        #[arg(short, long, default_value = "text")]
        format: info::Format,

        /// Decryption key, hex or base64 encoded. Overrides the key from
        /// --config.
        #[arg(short, long, value_name = "key")]
        key: Option<String>,

        /// Path to a JSON configuration file.
        #[arg(short, long, value_name = "path")]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>, key: Option<&String>) -> Result<DecodeConfig> {
    match (path, key) {
        (Some(path), None) => {
            DecodeConfig::load(path).with_context(|| format!("loading config {path:?}"))
        }
        (Some(path), Some(key)) => {
            let mut cfg =
                DecodeConfig::load(path).with_context(|| format!("loading config {path:?}"))?;
            cfg.key = config::parse_key(key).context("parsing --key")?;
            Ok(cfg)
        }
        (None, Some(key)) => {
            let key = config::parse_key(key).context("parsing --key")?;
            Ok(DecodeConfig::new(&key)?)
        }
        (None, None) => bail!("a key is required; pass --key or --config with crypto.key"),
    }
}

/// Validate the input path against the configured size limit before
/// reading any of it.
fn check_input(input: &Path, max_file_size: u64) -> Result<()> {
    let meta = fs::metadata(input).with_context(|| format!("reading metadata of {input:?}"))?;
    if !meta.is_file() {
        bail!("{input:?} is not a regular file");
    }
    if meta.len() == 0 {
        bail!("{input:?} is empty");
    }
    if meta.len() > max_file_size {
        bail!(
            "{input:?} is {} bytes, over the configured limit of {} bytes",
            meta.len(),
            max_file_size
        );
    }
    Ok(())
}

fn run_pipeline(input: &Path, cfg: &DecodeConfig) -> Result<Decoded> {
    check_input(input, cfg.max_file_size)?;
    let file = BufReader::new(File::open(input).with_context(|| format!("opening {input:?}"))?);
    match Decoder::from_config(cfg)?.decode(file) {
        Ok(decoded) => Ok(decoded),
        Err(sbw::Error::KeyLikelyWrong { failures, partial }) => bail!(
            "aborted after {failures} authentication failures across {} blocks; \
             the key is likely wrong",
            partial.ledger.len()
        ),
        Err(err) => Err(err).context("decoding"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("SBW_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Decode {
            input,
            output,
            csv,
            json,
            key,
            config,
            clobber,
        } => {
            let cfg = load_config(config.as_ref(), key.as_ref())?;
            let decoded = run_pipeline(input, &cfg)?;

            info!(
                blocks = decoded.summary.blocks_seen,
                ok = decoded.summary.blocks_ok,
                skipped = decoded.summary.blocks_skipped,
                records = decoded.summary.total_records,
                "decode complete"
            );

            let mut created = 0usize;
            if *csv || *json {
                fs::create_dir_all(output)
                    .with_context(|| format!("creating output directory {output:?}"))?;
            }
            if *csv {
                created += export::export_csv(&decoded, output, *clobber)?.len();
            }
            if *json {
                created += export::export_json(&decoded, output, *clobber)?.len();
            }
            if created > 0 {
                info!(files = created, output = ?output, "export complete");
            }

            info::report(&input.to_string_lossy(), &decoded, &info::Format::Text)
        }
        Commands::Info {
            input,
            format,
            key,
            config,
        } => {
            let cfg = load_config(config.as_ref(), key.as_ref())?;
            let decoded = run_pipeline(input, &cfg)?;
            info::report(&input.to_string_lossy(), &decoded, format)
        }
    }
}
