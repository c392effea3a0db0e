//! tarsau CLI
//!
//! Pack text files into a `.sau` archive (`-b`) and unpack one (`-a`).

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use std::path::{Path, PathBuf};
use tarsau::limits::{DEFAULT_MAX_FILES, DEFAULT_MAX_TOTAL_SIZE};
use tarsau::{Decoder, Encoder, FsBackend, Limits};
use tracing_subscriber::EnvFilter;

const DEFAULT_OUTPUT: &str = "a.sau";
const DEFAULT_DIRECTORY: &str = ".";

#[derive(Parser, Debug)]
#[command(name = "tarsau")]
#[command(version)]
#[command(about = "Pack text files into a .sau archive and unpack them")]
#[command(group(ArgGroup::new("mode").required(true).args(["pack", "extract", "list"])))]
struct Cli {
    /// Files to pack into an archive
    #[arg(short = 'b', num_args = 1.., value_name = "FILE")]
    pack: Vec<PathBuf>,

    /// Output archive (default: a.sau)
    #[arg(short = 'o', value_name = "ARCHIVE", requires = "pack")]
    output: Option<PathBuf>,

    /// Archive to unpack, optionally followed by the destination directory (default: .)
    #[arg(short = 'a', num_args = 1..=2, value_names = ["ARCHIVE", "DIR"])]
    extract: Vec<PathBuf>,

    /// List the records of an archive
    #[arg(short = 't', value_name = "ARCHIVE")]
    list: Option<PathBuf>,

    /// Maximum number of input files
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_FILES)]
    max_files: usize,

    /// Maximum total input size in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_TOTAL_SIZE)]
    max_size: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let limits = Limits {
        max_files: cli.max_files,
        max_total_size: cli.max_size,
    };

    if !cli.pack.is_empty() {
        let output = cli.output.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
        create_archive(&cli.pack, &output, limits, cli.verbose)?;
    } else if let Some((archive, rest)) = cli.extract.split_first() {
        let directory = rest
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DIRECTORY));
        extract_archive(archive, &directory, cli.verbose)?;
    } else if let Some(archive) = cli.list {
        list_archive(&archive, cli.verbose)?;
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "tarsau=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn create_archive(inputs: &[PathBuf], output: &Path, limits: Limits, verbose: bool) -> Result<()> {
    let total = limits
        .check(&FsBackend, inputs)
        .context("Input files failed pre-flight checks")?;

    let summary = Encoder::new()
        .encode_to_path(&FsBackend, inputs, output)
        .with_context(|| format!("Failed to create: {}", output.display()))?;

    if verbose {
        for record in &summary.records {
            println!("Added: {} ({} bytes)", record.name, record.size);
        }
    }
    println!(
        "Created: {} ({} files, {} input bytes)",
        output.display(),
        summary.records.len(),
        total
    );
    Ok(())
}

fn extract_archive(archive: &Path, directory: &Path, verbose: bool) -> Result<()> {
    let summary = Decoder::new()
        .extract_path(archive, directory)
        .with_context(|| format!("Failed to extract: {}", archive.display()))?;

    println!("Extracted {} files into {}", summary.files.len(), directory.display());
    for path in &summary.files {
        if verbose {
            println!("Extracted: {}", path.display());
        } else if let Some(name) = path.file_name() {
            println!("{}", name.to_string_lossy());
        }
    }
    Ok(())
}

fn list_archive(archive: &Path, verbose: bool) -> Result<()> {
    let records = Decoder::new()
        .list_path(archive)
        .with_context(|| format!("Failed to read: {}", archive.display()))?;

    for record in &records {
        if verbose {
            println!("{}  {:03o}  {}", record.name, record.mode, record.size);
        } else {
            println!("{}", record.name);
        }
    }
    Ok(())
}
