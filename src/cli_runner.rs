//! Executes the parsed command line. Kept apart from `cli` so the argument
//! definitions stay free of I/O.

use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::archive::{Archive, ArchiveHeader, ArchiveType, Timestamp};
use crate::cli::{self, Commands};
use crate::config::BuildPlan;
use crate::extract::NullMaterializer;
use crate::manifest::Manifest;
use crate::record::{Compression, FileKind, Record};

/// Environment variable holding a log filter, e.g. `C64CAR_LOG=c64car=debug`.
pub const LOG_ENV: &str = "C64CAR_LOG";

/// Public entry for running CLI logic.
pub fn run_cli_app() -> Result<(), Box<dyn Error>> {
    let args = cli::run();
    init_logging(args.verbose);

    match &args.command {
        Commands::Create {
            paths,
            output,
            directory,
            base,
            prefix,
            archive_type,
            compression,
            note,
            config,
        } => {
            let archive = match config {
                Some(plan) => BuildPlan::load(plan)?.build()?,
                None => build_from_args(paths, directory.as_deref(), base.as_deref(), prefix, *archive_type, *compression, note)?,
            };
            write_archive(&archive, output)?;
        }
        Commands::Extract { archive, output } => {
            let mut input = open_input(archive)?;
            let extracted = Archive::extract(&mut input, output)?;
            info!(
                target_dir = %output.display(),
                files = extracted.manifest().files().count(),
                "extracted archive"
            );
        }
        Commands::List { archive, json } => {
            let mut input = open_input(archive)?;
            let mut sink = NullMaterializer::new();
            let listed = Archive::deserialize(&mut input, &mut sink)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            if *json {
                writeln!(out, "{}", serde_json::to_string_pretty(&listed.manifest().to_json())?)?;
            } else {
                print_listing(&mut out, &listed, &sink)?;
            }
        }
    }

    Ok(())
}

/// Installs the stderr log subscriber. Verbosity picks the default level,
/// `C64CAR_LOG` overrides it.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();
    // a second initialisation (tests calling this twice) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn build_from_args(
    paths: &[PathBuf],
    directory: Option<&Path>,
    base: Option<&Path>,
    prefix: &str,
    archive_type: ArchiveType,
    compression: Compression,
    note: &str,
) -> Result<Archive, Box<dyn Error>> {
    let root = match directory {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let mut manifest = Manifest::new(root);
    if let Some(base) = base {
        manifest = manifest.with_archive_base(base)?;
    }
    for path in paths {
        manifest.insert_tree(path, prefix, compression)?;
    }
    let header = ArchiveHeader::new(archive_type, Timestamp::now()?, note)?;
    Ok(Archive::new(header, manifest))
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn open_input(path: &Path) -> io::Result<Box<dyn Read>> {
    if is_stdio(path) {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}

/// Writes to a temporary file next to `output` and renames it into place, so
/// a failed write never leaves a half-written archive behind.
fn write_archive(archive: &Archive, output: &Path) -> Result<(), Box<dyn Error>> {
    if is_stdio(output) {
        let stdout = io::stdout();
        let mut out = BufWriter::new(stdout.lock());
        archive.serialize(&mut out)?;
        out.flush()?;
        return Ok(());
    }

    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(parent)?;
    {
        let mut out = BufWriter::new(temp.as_file_mut());
        archive.serialize(&mut out)?;
        out.flush()?;
    }
    temp.persist(output)?;
    info!(output = %output.display(), "wrote archive");
    Ok(())
}

fn print_listing<W: Write>(out: &mut W, archive: &Archive, sink: &NullMaterializer) -> io::Result<()> {
    let header = archive.header();
    writeln!(out, "{} archive, {}", header.archive_type(), header.timestamp())?;
    if !header.note().is_empty() {
        writeln!(out, "note: {}", header.note())?;
    }
    if let Some(root) = archive.manifest().root() {
        print_record(out, root, 0, sink)?;
    }
    writeln!(out, "{} files, {} bytes", archive.manifest().files().count(), sink.bytes())
}

fn print_record<W: Write>(out: &mut W, record: &Record, depth: usize, sink: &NullMaterializer) -> io::Result<()> {
    let indent = "  ".repeat(depth);
    match record {
        Record::Directory(dir) => {
            writeln!(out, "{indent}{}/ ({} entries)", dir.name(), dir.size())?;
            for child in dir.children() {
                print_record(out, child, depth + 1, sink)?;
            }
        }
        Record::File(file) => {
            let kind = match file.kind() {
                FileKind::Prg => "prg",
                FileKind::Seq => "seq",
            };
            let size = sink.size_of(file.source()).unwrap_or(0);
            writeln!(out, "{indent}{} [{kind}] {size} bytes", file.name())?;
        }
    }
    Ok(())
}
