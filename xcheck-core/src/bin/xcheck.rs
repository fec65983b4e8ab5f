//! xcheck CLI - record, compare and inspect cross-check streams
//!
//! Usage:
//!     xcheck record run.log baseline.jsonl
//!     xcheck compare baseline.jsonl run2.log
//!     xcheck compare --diagnostic --json rust.log c.log
//!     xcheck verify run.log
//!     xcheck tag main foo
//!
//! Exit status: 0 on success or match, 1 on divergence, 2 for configuration,
//! format and I/O errors, 3 for protocol nesting errors, 4 for baseline
//! integrity failures.

use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xcheck::compare::{CompareOptions, Comparator, NestingVerifier};
use xcheck::record::{decode, RecordStream, StreamFormat};
use xcheck::storage::{read_baseline, write_baseline};
use xcheck::{tag_of, Result, SymbolTable, XCheckError};

#[derive(Parser, Debug)]
#[command(name = "xcheck")]
#[command(about = "Record and compare cross-check checksum streams")]
#[command(version)]
struct Cli {
    /// Print results and errors as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Input stream format (detected from content by default)
    #[arg(long, global = true, value_enum, default_value_t = FormatArg::Auto)]
    format: FormatArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify a stream and store it as a baseline
    Record {
        /// Stream to record ("-" for stdin)
        stream: PathBuf,

        /// Baseline file to write
        baseline: PathBuf,

        /// Baseline name (defaults to the baseline file stem)
        #[arg(long)]
        name: Option<String>,
    },

    /// Compare a stream against a baseline or another stream
    Compare {
        /// Baseline file or reference stream
        expected: PathBuf,

        /// Stream under test ("-" for stdin)
        actual: PathBuf,

        /// Keep scanning after the first divergence
        #[arg(long)]
        diagnostic: bool,

        /// Divergences reported before giving up (diagnostic mode)
        #[arg(long, default_value_t = 64)]
        max_divergences: usize,

        /// File of function names, one per line, for readable diagnostics
        #[arg(long)]
        symbols: Option<PathBuf>,
    },

    /// Check that a stream is well nested
    Verify {
        /// Stream to check ("-" for stdin)
        stream: PathBuf,

        /// Accept calls left open at the end (truncated stream)
        #[arg(long)]
        prefix: bool,
    },

    /// Print the identity tag of function names
    Tag {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Auto,
    Text,
    Binary,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("XCHECK_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| "xcheck=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            if json {
                match serde_json::to_string_pretty(&e.to_error_response()) {
                    Ok(out) => println!("{}", out),
                    Err(_) => eprintln!("Error: {}", e),
                }
            } else {
                eprintln!("Error: {}", e);
            }
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Record {
            stream,
            baseline,
            name,
        } => {
            let records = load_stream(&stream, cli.format)?;
            NestingVerifier::check(&records)?;
            let name = name.unwrap_or_else(|| baseline_name(&baseline));
            let header = write_baseline(&baseline, &name, &records)?;
            tracing::info!(baseline = %baseline.display(), records = header.record_count, "Baseline written");
            if cli.json {
                print_json(&header)?;
            } else {
                println!(
                    "recorded '{}': {} records across {} thread(s) (run {})",
                    header.name, header.record_count, header.thread_count, header.run_id
                );
            }
            Ok(0)
        }

        Command::Compare {
            expected,
            actual,
            diagnostic,
            max_divergences,
            symbols,
        } => {
            let expected = load_expected(&expected, cli.format)?;
            let actual = load_stream(&actual, cli.format)?;

            let options = if diagnostic {
                CompareOptions::diagnostic().with_max_divergences(max_divergences)
            } else {
                CompareOptions::strict()
            };
            let mut comparator = Comparator::new(options);
            if let Some(path) = symbols {
                comparator = comparator.with_symbols(load_symbols(&path)?);
            }

            let report = comparator.compare(&expected, &actual)?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!("{}", report);
            }
            Ok(report.exit_code())
        }

        Command::Verify { stream, prefix } => {
            let records = load_stream(&stream, cli.format)?;
            let verification = if prefix {
                NestingVerifier::verify_prefix(&records)
            } else {
                NestingVerifier::verify(&records)
            };
            if cli.json {
                print_json(&verification)?;
            } else if verification.is_valid {
                println!(
                    "well nested: {} records across {} thread(s)",
                    verification.records_checked, verification.threads_checked
                );
                for (thread, open) in &verification.open_frames {
                    println!("  thread {} ends inside {} call(s)", thread, open.len());
                }
            } else {
                println!(
                    "invalid: {}",
                    verification.error_message.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(if verification.is_valid { 0 } else { 3 })
        }

        Command::Tag { names } => {
            if cli.json {
                let tags: Vec<_> = names
                    .iter()
                    .map(|n| serde_json::json!({ "name": n, "tag": tag_of(n) }))
                    .collect();
                print_json(&tags)?;
            } else {
                for name in &names {
                    let tag = tag_of(name);
                    println!("{}\t{}\t{:#010x}", name, tag, tag);
                }
            }
            Ok(0)
        }
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read(path).map_err(|e| XCheckError::IoError {
        message: format!("{}: {}", path.display(), e),
    })
}

fn load_stream(path: &Path, format: FormatArg) -> Result<RecordStream> {
    let bytes = read_input(path)?;
    let format = match format {
        FormatArg::Auto => StreamFormat::detect(&bytes),
        FormatArg::Text => StreamFormat::Text,
        FormatArg::Binary => StreamFormat::Binary,
    };
    tracing::debug!(path = %path.display(), %format, bytes = bytes.len(), "Loading stream");
    decode(&bytes, format)
}

/// A baseline file (JSON header line) or a raw stream
fn load_expected(path: &Path, format: FormatArg) -> Result<RecordStream> {
    if path.as_os_str() != "-" && format == FormatArg::Auto && is_baseline_file(path)? {
        let baseline = read_baseline(path)?;
        tracing::debug!(
            baseline = %baseline.header.name,
            run_id = %baseline.header.run_id,
            recorded_at = %baseline.header.recorded_at,
            "Loaded baseline"
        );
        return Ok(baseline.stream);
    }
    load_stream(path, format)
}

fn is_baseline_file(path: &Path) -> Result<bool> {
    let mut first = [0u8; 1];
    let mut file = std::fs::File::open(path).map_err(|e| XCheckError::IoError {
        message: format!("{}: {}", path.display(), e),
    })?;
    let n = file.read(&mut first)?;
    Ok(n == 1 && first[0] == b'{')
}

fn load_symbols(path: &Path) -> Result<SymbolTable> {
    let content = String::from_utf8_lossy(&read_input(path)?).into_owned();
    SymbolTable::from_names(
        content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#')),
    )
}

fn baseline_name(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "baseline".to_string());
    file.split('.').next().unwrap_or("baseline").to_string()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
