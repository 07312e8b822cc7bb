use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::archive::ArchiveType;
use crate::record::Compression;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase log output (-v info, -vv debug). C64CAR_LOG overrides this.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Create a .car archive from files and directories.
    #[command(alias = "c")]
    Create {
        /// Files and/or directories to add. Directories are added recursively.
        #[arg(required_unless_present = "config", conflicts_with = "config")]
        paths: Vec<PathBuf>,

        /// The output archive path, or `-` for standard output.
        #[arg(short, long)]
        output: PathBuf,

        /// Directory the input paths are relative to. Defaults to the current directory.
        #[arg(short = 'C', long)]
        directory: Option<PathBuf>,

        /// Base directory stripped from paths inside the archive.
        #[arg(short, long)]
        base: Option<PathBuf>,

        /// Path prefix for the root of the archive.
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Archive type.
        #[arg(short = 't', long = "type", value_enum, default_value_t = ArchiveType::General)]
        archive_type: ArchiveType,

        /// Compression type for every added file.
        #[arg(short, long, value_enum, default_value_t = Compression::None)]
        compression: Compression,

        /// A note stored in the archive header (at most 31 characters).
        #[arg(short, long, default_value = "")]
        note: String,

        /// Build the archive from a JSON build plan instead of the command line.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Extract an archive.
    #[command(alias = "x")]
    Extract {
        /// The archive file to extract, or `-` for standard input.
        #[arg(required = true)]
        archive: PathBuf,

        /// The directory where files will be extracted.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List the contents of an archive without extracting it.
    #[command(alias = "l")]
    List {
        /// The archive file to list contents of, or `-` for standard input.
        #[arg(required = true)]
        archive: PathBuf,

        /// Print the manifest as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Parses command-line arguments using `clap`.
///
/// On invalid arguments clap prints its own message and exits.
pub fn run() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_defaults() {
        let args = Args::try_parse_from(["c64car", "create", "-o", "out.car", "app.prg"]).unwrap();
        match args.command {
            Commands::Create { paths, archive_type, compression, prefix, .. } => {
                assert_eq!(paths, [PathBuf::from("app.prg")]);
                assert_eq!(archive_type, ArchiveType::General);
                assert_eq!(compression, Compression::None);
                assert_eq!(prefix, "");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_create_requires_inputs() {
        assert!(Args::try_parse_from(["c64car", "create", "-o", "out.car"]).is_err());
        assert!(Args::try_parse_from(["c64car", "create", "-o", "out.car", "--config", "plan.json"]).is_ok());
        assert!(Args::try_parse_from(["c64car", "create", "-o", "x", "--config", "p.json", "a.prg"]).is_err());
    }

    #[test]
    fn test_value_enums() {
        let args = Args::try_parse_from(["c64car", "-vv", "c", "-o", "x", "-t", "install", "-c", "rle", "a"]).unwrap();
        assert_eq!(args.verbose, 2);
        match args.command {
            Commands::Create { archive_type, compression, .. } => {
                assert_eq!(archive_type, ArchiveType::Install);
                assert_eq!(compression, Compression::Rle);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
