use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use bitgarten::backfill::backfill;
use bitgarten::config::{parse_blob_size, Config};
use bitgarten::dedup::{self, IndexOptions, ResolveOptions};
use bitgarten::ingest::{self, AlbumMode, IngestOptions, RunContext};
use bitgarten::report::RunSummary;
use bitgarten::scanner::{ExcludeFilter, HashKind, Thumbnailer};
use bitgarten::{export, logging, validate, Database};

#[derive(Parser)]
#[command(name = "bitgarten")]
#[command(about = "Batch tools for a photo and video archive")]
#[command(version)]
struct Cli {
    /// Configuration file (default: $BITGARTEN_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Flags shared by every tool.
#[derive(Args, Clone, Copy)]
struct Common {
    /// Stop after this many records (0 = unlimited)
    #[arg(short = 'l', long, default_value_t = 0)]
    limit: u64,

    /// Print the summary as one JSON object
    #[arg(short = 'j', long)]
    json: bool,
}

impl Common {
    fn limit(&self) -> Option<u64> {
        (self.limit > 0).then_some(self.limit)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init {
        #[command(flatten)]
        common: Common,
    },

    /// Store files and their locations
    Ingest {
        #[command(flatten)]
        common: Common,

        /// Directories to ingest (default: $BITGARTEN_DIRECTORIES)
        roots: Vec<PathBuf>,

        /// Reader threads
        #[arg(short = 't', long)]
        readers: Option<usize>,

        /// Storer threads
        #[arg(short = 'T', long)]
        storers: Option<usize>,

        /// Comma-separated exclude regular expressions (replaces the configured list)
        #[arg(short = 'F', long)]
        filter: Option<String>,

        /// Attach stored pictures to an album named after each root
        #[arg(short = 'A', long, conflicts_with = "album")]
        create_album: bool,

        /// Attach stored pictures to an existing album
        #[arg(short = 'a', long)]
        album: Option<i64>,

        /// Store only the last directory component
        #[arg(short = 's', long)]
        shorten: bool,

        /// Ingest a single file
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,

        /// Largest file stored, e.g. 500MB
        #[arg(short = 'b', long)]
        max_blob_size: Option<String>,

        /// Stop at the first failed record
        #[arg(short = 'E', long)]
        exit_on_error: bool,

        /// Remove locations of paths matched by the exclude filters
        #[arg(short = 'D', long)]
        delete_excluded: bool,
    },

    /// Compute perceptual hashes for stored images
    #[command(disable_help_flag = true)]
    Hash {
        #[command(flatten)]
        common: Common,

        /// Hash kind to store (default: average, perception and difference)
        #[arg(short = 'h', long = "hash")]
        kind: Option<HashKind>,

        /// Only pictures whose title starts with this prefix
        #[arg(short = 'p', long)]
        prefix: Option<String>,

        #[arg(long, action = ArgAction::Help)]
        help: Option<bool>,
    },

    /// Resolve near-duplicate groups
    #[command(disable_help_flag = true)]
    Clean {
        #[command(flatten)]
        common: Common,

        /// averageHash, perceptHash or diffHash
        #[arg(short = 'h', long = "hash", default_value = "perceptHash")]
        kind: HashKind,

        /// Commit changes (dry run otherwise)
        #[arg(short = 'c', long)]
        commit: bool,

        /// Smallest group considered
        #[arg(short = 'm', long, default_value_t = 2)]
        min_count: i64,

        /// Number of largest groups processed
        #[arg(short = 'n', long, default_value_t = 20)]
        top: i64,

        /// Also mark untagged HEIC aliases
        #[arg(long)]
        aliases: bool,

        #[arg(long, action = ArgAction::Help)]
        help: Option<bool>,
    },

    /// Check stored media against their digests
    Validate {
        #[command(flatten)]
        common: Common,
    },

    /// Write stored pictures to a dated directory tree
    Export {
        #[command(flatten)]
        common: Common,

        /// Export root
        #[arg(short = 'o', long)]
        output: PathBuf,
    },

    /// Fill missing thumbnails and EXIF from stored media
    Backfill {
        #[command(flatten)]
        common: Common,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Init { .. } => "init",
            Command::Ingest { .. } => "ingest",
            Command::Hash { .. } => "hash",
            Command::Clean { .. } => "clean",
            Command::Validate { .. } => "validate",
            Command::Export { .. } => "export",
            Command::Backfill { .. } => "backfill",
        }
    }

    fn common(&self) -> Common {
        match self {
            Command::Init { common }
            | Command::Ingest { common, .. }
            | Command::Hash { common, .. }
            | Command::Clean { common, .. }
            | Command::Validate { common }
            | Command::Export { common, .. }
            | Command::Backfill { common } => *common,
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => Ok(Config::load()?),
    }
}

fn open_database(config: &Config, workers: usize) -> Result<Database> {
    let db = Database::open(&config.database, workers as u32)
        .with_context(|| format!("opening database {}", config.database.url))?;
    db.initialize().context("initializing schema")?;
    Ok(db)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&config.logging.path, config.logging.level) {
        eprintln!("Warning: logging disabled: {}", e);
    }

    let summary = RunSummary::begin(cli.command.name());
    let json = cli.command.common().json;
    match run(cli.command, config, &summary) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{} failed: {:#}", summary.tool(), e);
            if let Err(print_error) = summary.print::<()>(json, None, Some(&format!("{:#}", e))) {
                eprintln!("Error: {}", print_error);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, mut config: Config, summary: &RunSummary) -> Result<ExitCode> {
    match command {
        Command::Init { common } => {
            let db = open_database(&config, 1)?;
            let counts = serde_json::json!({
                "pictures": db.count_pictures()?,
                "locations": db.count_locations()?,
            });
            summary.print(common.json, Some(&counts), None)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Ingest {
            common,
            roots,
            readers,
            storers,
            filter,
            create_album,
            album,
            shorten,
            input,
            max_blob_size,
            exit_on_error,
            delete_excluded,
        } => {
            if let Some(readers) = readers {
                config.ingest.reader_threads = readers;
            }
            if let Some(storers) = storers {
                config.ingest.storer_threads = storers;
            }
            if let Some(size) = max_blob_size {
                config.ingest.max_blob_size = parse_blob_size(&size)?;
            }
            if shorten {
                config.ingest.shorten_directory = true;
            }
            let filter = match filter {
                Some(list) => ExcludeFilter::from_comma_list(&list)?,
                None => ExcludeFilter::new(&config.ingest.exclude_filters)?,
            };

            let roots = match input {
                Some(file) => vec![file],
                None if roots.is_empty() => config.directories.clone(),
                None => roots,
            };
            if roots.is_empty() {
                anyhow::bail!("no ingest roots given and BITGARTEN_DIRECTORIES is unset");
            }

            let workers = config.ingest.reader_threads + config.ingest.storer_threads;
            let db = Arc::new(open_database(&config, workers)?);
            let ctx = Arc::new(RunContext::new(db, &config, exit_on_error)?);
            let options = IngestOptions {
                exit_on_error,
                delete_excluded,
                limit: common.limit(),
                album: match (create_album, album) {
                    (_, Some(id)) => AlbumMode::Existing(id),
                    (true, None) => AlbumMode::PerRoot,
                    (false, None) => AlbumMode::None,
                },
                progress: true,
            };

            match ingest::run(ctx.clone(), &config, &roots, &filter, &options) {
                Ok(counters) => {
                    summary.print(common.json, Some(&counters), None)?;
                    Ok(if counters.errors > 0 && exit_on_error {
                        ExitCode::FAILURE
                    } else {
                        ExitCode::SUCCESS
                    })
                }
                Err(e) => {
                    tracing::error!(error = %e, "ingest aborted");
                    let counters = ctx.stats.snapshot();
                    summary.print(common.json, Some(&counters), Some(&e.to_string()))?;
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Command::Hash {
            common,
            kind,
            prefix,
            ..
        } => {
            let db = open_database(&config, 1)?;
            let options = IndexOptions {
                kinds: match kind {
                    Some(kind) => vec![kind],
                    None => HashKind::IMPLEMENTED.to_vec(),
                },
                title_prefix: prefix,
                limit: common.limit(),
            };
            let report = dedup::index(&db, &options)?;
            summary.print(common.json, Some(&report), None)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Clean {
            common,
            kind,
            commit,
            min_count,
            top,
            aliases,
            ..
        } => {
            let db = open_database(&config, 1)?;
            let top = match common.limit() {
                Some(limit) => top.min(limit as i64),
                None => top,
            };
            let options = ResolveOptions {
                kind,
                min_count,
                top,
                commit,
                aliases,
            };
            let report = dedup::resolve(&db, &options)?;
            summary.print(common.json, Some(&report), None)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Validate { common } => {
            let db = open_database(&config, 1)?;
            let report = validate::validate(&db, common.limit())?;
            for issue in &report.issues {
                eprintln!("{}", issue);
            }
            summary.print(common.json, Some(&report), None)?;
            Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Export { common, output } => {
            let db = open_database(&config, 1)?;
            let report = export::export(&db, &output, common.limit())?;
            summary.print(common.json, Some(&report), None)?;
            Ok(if report.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }

        Command::Backfill { common } => {
            let db = open_database(&config, 1)?;
            let thumbnailer = Thumbnailer::new(&config.thumbnails)?;
            let report = backfill(&db, &thumbnailer, common.limit())?;
            summary.print(common.json, Some(&report), None)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
