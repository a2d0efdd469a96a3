//! CLI entry point for the nullscan tool.
//!
//! Counts occurrences of a sentinel byte (zero by default) in every file
//! named on the command line, or found in the directories named there.
//!
//! # Usage
//!
//! ```bash
//! nullscan [OPTIONS] <TARGETS>...
//!
//! # Count zero bytes in a disk image
//! nullscan disk.img
//!
//! # Count 0xFF bytes in every file under a directory tree
//! nullscan --sentinel 0xff --recursive ./dumps
//!
//! # Write a JSON report
//! nullscan --format json --output report.json ./dumps
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, ValueEnum};
use color_eyre::eyre::{WrapErr, eyre};
use ns_core::{Config, ScanConfig};
use ns_scanner::{ScanReport, Scanner, StatsSnapshot};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Count a sentinel byte in files using a pool of worker threads.
///
/// Each file is split into fixed-size chunks that are counted in parallel.
/// Files are processed one at a time, in the order given.
#[derive(Parser)]
#[command(name = "nullscan", version, about, long_about = None)]
struct Cli {
    /// Files or directories to scan.
    #[arg(required = true)]
    targets: Vec<Utf8PathBuf>,

    /// Descend into subdirectories of directory targets.
    #[arg(short, long)]
    recursive: bool,

    /// Byte value to count, decimal or `0x`-prefixed hex.
    #[arg(short, long, value_parser = parse_byte, env = "NULLSCAN_SENTINEL")]
    sentinel: Option<u8>,

    /// Chunk size in bytes.
    #[arg(long, env = "NULLSCAN_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Number of counting workers (defaults to CPU count minus one).
    #[arg(short = 'j', long, env = "NULLSCAN_WORKERS")]
    workers: Option<usize>,

    /// Give up on a file after this many milliseconds.
    #[arg(long, env = "NULLSCAN_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// JSON configuration file. Command-line options override its values.
    #[arg(short, long, env = "NULLSCAN_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Output file (defaults to stdout).
    #[arg(short, long)]
    output: Option<Utf8PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
}

/// Report output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One `path: count` line per file, then a summary.
    Text,
    /// Pretty-printed JSON.
    Json,
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
/// Logs go to stderr so stdout carries only the report.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(level)
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Parses a byte given as decimal (`255`) or hex (`0xff`).
fn parse_byte(value: &str) -> Result<u8, String> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse::<u8>(),
    };
    parsed.map_err(|e| format!("'{value}' is not a byte value (0-255 or 0x00-0xff): {e}"))
}

/// Builds the scanner configuration.
///
/// Defaults, then the configuration file, then command-line options.
///
/// # Errors
///
/// Returns an error if the configuration file cannot be loaded or the
/// resulting configuration is invalid.
fn build_config(cli: &Cli) -> color_eyre::Result<ScanConfig> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .wrap_err_with(|| format!("Failed to load configuration from {path}"))?
            .scan,
        None => ScanConfig::default(),
    };

    if let Some(sentinel) = cli.sentinel {
        config.sentinel_byte = sentinel;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size_bytes = chunk_size;
    }
    if cli.workers.is_some() {
        config.worker_count = cli.workers;
    }
    if cli.timeout_ms.is_some() {
        config.scan_timeout_ms = cli.timeout_ms;
    }
    config.recursive |= cli.recursive;

    config.validate()?;
    Ok(config)
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// Renders the per-file lines followed by a summary.
fn render_text(report: &ScanReport, sentinel: u8) -> String {
    use std::fmt::Write;

    let mut output = String::new();

    for file in &report.files {
        // Failures keep the tool's historical `Error` marker.
        let _ = match &file.outcome {
            Ok(count) => writeln!(output, "{}: {count}", file.path),
            Err(_) => writeln!(output, "{}: Error", file.path),
        };
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Errors ({}):", failures.len());
        for file in failures {
            if let Err(e) = &file.outcome {
                let _ = writeln!(output, "  {} - {e}", file.path);
            }
        }
    }

    write_summary(&mut output, &report.stats, sentinel);
    output
}

fn write_summary(output: &mut String, stats: &StatsSnapshot, sentinel: u8) {
    use std::fmt::Write;

    let _ = writeln!(output);
    let _ = writeln!(output, "Scan Summary");
    let _ = writeln!(output, "============");
    let _ = writeln!(output);
    let _ = writeln!(output, "Files scanned:    {}", stats.files_scanned);
    let _ = writeln!(output, "Files failed:     {}", stats.files_failed);
    let _ = writeln!(output, "Bytes scanned:    {}", stats.bytes_scanned);
    let _ = writeln!(
        output,
        "Sentinel 0x{sentinel:02x}:    {}",
        stats.sentinels_found
    );
    let _ = writeln!(output, "Success rate:     {:.1}%", stats.success_rate());
}

/// Renders the report as JSON.
fn render_json(report: &ScanReport, sentinel: u8) -> color_eyre::Result<String> {
    #[derive(serde::Serialize)]
    struct FileEntry<'a> {
        path: &'a Utf8Path,
        #[serde(skip_serializing_if = "Option::is_none")]
        count: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    }

    #[derive(serde::Serialize)]
    struct Report<'a> {
        sentinel: u8,
        files: Vec<FileEntry<'a>>,
        stats: &'a StatsSnapshot,
    }

    let files = report
        .files
        .iter()
        .map(|file| FileEntry {
            path: &file.path,
            count: file.count(),
            error: file.outcome.as_ref().err().map(ToString::to_string),
        })
        .collect();

    let report = Report {
        sentinel,
        files,
        stats: &report.stats,
    };
    serde_json::to_string_pretty(&report)
        .map_err(|e| eyre!("Failed to serialize JSON: {}", e))
}

/// Scans every target and writes the report.
///
/// # Errors
///
/// Returns an error if the scanner cannot start, the report cannot be
/// written, or any target failed to scan.
fn run(cli: &Cli) -> color_eyre::Result<()> {
    let config = build_config(cli)?;
    let scanner =
        Scanner::new(config).map_err(|e| eyre!("Failed to create scanner: {}", e))?;

    let report = scanner.scan_targets(&cli.targets);

    let content = match cli.format {
        OutputFormat::Text => render_text(&report, config.sentinel_byte),
        OutputFormat::Json => {
            let mut json = render_json(&report, config.sentinel_byte)?;
            json.push('\n');
            json
        }
    };

    if let Some(output_path) = &cli.output {
        std::fs::write(output_path.as_std_path(), &content)
            .wrap_err_with(|| format!("Failed to write report to {output_path}"))?;
        info!(path = %output_path, "Report written");
    } else {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        write!(handle, "{content}")?;
        handle.flush()?;
    }

    stop_scanner(scanner);

    let failed = report.failures().count();
    if failed > 0 {
        return Err(eyre!(
            "{failed} of {} file(s) could not be scanned",
            report.files.len()
        ));
    }
    Ok(())
}

/// Joins the worker pool, warning if any worker died by panicking.
fn stop_scanner(scanner: Scanner) -> usize {
    let panicked = scanner.shutdown();
    if panicked > 0 {
        warn!(panicked, "Worker threads panicked during the run");
    }
    panicked
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Scan and report
    run(&cli)
}
