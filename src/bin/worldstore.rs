//! worldstore Binary
//!
//! Inspect, convert, import and export world flatfiles.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use worldstore::flatfile::{read_snapshot, write_snapshot};
use worldstore::{Config, Result, Store, WriteOptions};

/// worldstore
#[derive(Parser, Debug)]
#[command(name = "worldstore")]
#[command(about = "Object store and flatfile tool for text-based virtual worlds")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the dialect, version, flags and object count of a flatfile
    Info {
        /// Flatfile to inspect
        flatfile: PathBuf,
    },

    /// Rewrite a flatfile of any dialect in the current dialect
    Convert {
        /// Flatfile to read
        input: PathBuf,

        /// Flatfile to write
        output: PathBuf,

        /// Compact user attribute numbers
        #[arg(long)]
        clean: bool,
    },

    /// Load a flatfile into a file-backed store and checkpoint it
    Import {
        /// Flatfile to read
        flatfile: PathBuf,

        /// Data directory of the store
        #[arg(short, long, default_value = "./worldstore_data")]
        data_dir: PathBuf,
    },

    /// Write the checkpointed world of a file-backed store as a flatfile
    Export {
        /// Data directory of the store
        #[arg(short, long, default_value = "./worldstore_data")]
        data_dir: PathBuf,

        /// Flatfile to write
        output: PathBuf,

        /// Compact user attribute numbers
        #[arg(long)]
        clean: bool,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,worldstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = Args::parse();
    tracing::debug!("worldstore v{}", worldstore::VERSION);

    if let Err(e) = run(args.command) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn write_options(clean: bool) -> WriteOptions {
    if clean {
        WriteOptions::clean_export()
    } else {
        WriteOptions::export()
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Info { flatfile } => {
            let snapshot = read_snapshot(BufReader::new(File::open(&flatfile)?), 0)?;
            let report = snapshot.report();
            println!("dialect:  {}", report.dialect);
            println!("version:  {}", report.version);
            println!("flags:    {:#x}", report.flags);
            println!("objects:  {}", report.objects);
            println!("db_top:   {}", snapshot.db_top());
            println!("attr_next: {}", snapshot.attrs.next_free());
        }

        Commands::Convert { input, output, clean } => {
            let mut snapshot = read_snapshot(BufReader::new(File::open(&input)?), 0)?;
            let out = BufWriter::new(File::create(&output)?);
            let report = write_snapshot(out, &mut snapshot, write_options(clean))?;
            tracing::info!(
                objects = report.objects,
                renumbered = report.attrs_renumbered,
                deleted = report.attrs_deleted,
                "converted {} -> {}",
                input.display(),
                output.display()
            );
        }

        Commands::Import { flatfile, data_dir } => {
            let store = Store::open(Config::builder().data_dir(data_dir).build())?;
            let report = store.load_flatfile(BufReader::new(File::open(&flatfile)?))?;
            store.close()?;
            tracing::info!(objects = report.objects, dialect = %report.dialect, "imported");
        }

        Commands::Export { data_dir, output, clean } => {
            let store = Store::open(Config::builder().data_dir(data_dir).build())?;
            let out = BufWriter::new(File::create(&output)?);
            let report = store.write_flatfile(out, write_options(clean))?;
            tracing::info!(objects = report.objects, "exported");
        }
    }
    Ok(())
}
