//! Parallel ingest: walk → readers → storers → database.
//!
//! Readers load, digest and classify each file, derive thumbnail and EXIF for
//! new content and hand a [`StoreRequest`] to the storers, which write it in a
//! single transaction. Both queues are bounded, so a fast walk blocks on a
//! slow database instead of buffering files in memory.

pub mod existence;
pub mod stats;

pub use existence::{classify, Availability};
pub use stats::{Counters, Statistics, Ticker, TICK_INTERVAL};

use crossbeam_channel::{bounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Config;
use crate::db::{AlbumEntry, Database, Location, NewPicture, StorageOption, StoreRequest};
use crate::error::{DbErrorKind, Error, Result};
use crate::scanner::reader::{basename_of, directory_of};
use crate::scanner::{walk, Discovered, ExcludeFilter, FileReader, LoadedFile, Thumbnailer};

/// Attempts per record when the database reports a transient failure.
const STORE_ATTEMPTS: u32 = 3;

/// How stored pictures are attached to albums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlbumMode {
    #[default]
    None,
    /// One album per root, titled after the root directory.
    PerRoot,
    Existing(i64),
}

/// Per-run switches that do not come from the configuration file.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub exit_on_error: bool,
    pub delete_excluded: bool,
    /// Stop after this many checked files.
    pub limit: Option<u64>,
    pub album: AlbumMode,
    /// Print the progress ticker to stderr.
    pub progress: bool,
}

/// Dependencies shared by every worker of one run.
pub struct RunContext {
    pub db: Arc<Database>,
    pub stats: Arc<Statistics>,
    reader: FileReader,
    thumbnailer: Thumbnailer,
    host: String,
    shorten_directory: bool,
    exit_on_error: bool,
    stop: AtomicBool,
    next_index: AtomicU64,
    fatal: Mutex<Option<Error>>,
}

impl RunContext {
    pub fn new(db: Arc<Database>, config: &Config, exit_on_error: bool) -> Result<Self> {
        Ok(Self {
            db,
            stats: Arc::new(Statistics::new()),
            reader: FileReader::new(config.ingest.max_blob_size, config.ingest.shorten_directory),
            thumbnailer: Thumbnailer::new(&config.thumbnails)?,
            host: config.ingest.host.clone(),
            shorten_directory: config.ingest.shorten_directory,
            exit_on_error,
            stop: AtomicBool::new(false),
            next_index: AtomicU64::new(0),
            fatal: Mutex::new(None),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Advisory sequence number; not an ordering guarantee across storers.
    fn next_index(&self) -> i64 {
        self.next_index.fetch_add(1, Ordering::Relaxed) as i64 + 1
    }

    /// Stop the run and keep the first fatal error for the driver.
    fn abort(&self, error: Error) {
        tracing::error!(error = %error, "aborting ingest");
        if let Ok(mut fatal) = self.fatal.lock() {
            fatal.get_or_insert(error);
        }
        self.request_stop();
    }

    fn take_fatal(&self) -> Option<Error> {
        self.fatal.lock().ok().and_then(|mut f| f.take())
    }

    /// Count a per-record failure; stops the run on fatal database errors and,
    /// with `exit_on_error`, on the first real error.
    fn record_failure(&self, path: &Path, error: Error) {
        if error.is_fatal_db() {
            self.stats.rejected(&error);
            self.abort(error);
            return;
        }
        let is_error = self.stats.rejected(&error);
        if is_error {
            tracing::warn!(path = %path.display(), error = %error, "record failed");
            if self.exit_on_error {
                self.abort(error);
            }
        } else {
            tracing::debug!(path = %path.display(), error = %error, "record skipped");
        }
    }

    /// Read, classify and derive one file. `None` means nothing to store.
    fn prepare(&self, job: &Job) -> Result<Option<StoreRequest>> {
        let file = self.reader.read(&job.path)?;
        self.stats.loaded(file.size);

        let rows = self.db.locations(&file.digest.md5)?;
        let availability = classify(
            &rows,
            &file.digest.sha256,
            &self.host,
            &file.directory,
            &file.basename,
        );

        let location = Location {
            md5: file.digest.md5.clone(),
            host: self.host.clone(),
            directory: file.directory.clone(),
            basename: file.basename.clone(),
        };

        let picture = match availability {
            Availability::FullyPresent => {
                tracing::debug!(path = %job.path.display(), "already stored here");
                self.stats.duplicate();
                return Ok(None);
            }
            Availability::ContentPresent => {
                self.stats.found();
                None
            }
            Availability::ShaMismatch => {
                tracing::error!(
                    md5 = %file.digest.md5,
                    path = %job.path.display(),
                    "stored sha256 differs from file; possible corruption"
                );
                Some(self.new_picture(file))
            }
            Availability::Absent => Some(self.new_picture(file)),
        };

        let album = job.album.map(|album_id| AlbumEntry {
            album_id,
            index: self.next_index(),
        });

        Ok(Some(StoreRequest {
            picture,
            location,
            album,
        }))
    }

    fn new_picture(&self, file: LoadedFile) -> NewPicture {
        let derived = self
            .thumbnailer
            .derive(&file.media, file.mime_type, Some(&file.path));
        NewPicture {
            md5: file.digest.md5,
            sha256: file.digest.sha256,
            title: file.basename,
            directory: file.directory,
            mime_type: file.mime_type.to_string(),
            media: file.media,
            fill: derived.is_filled(),
            thumbnail: derived.thumbnail,
            exif: derived.exif,
            option: StorageOption::SqlStore,
        }
    }

    /// Store with a bounded retry on transient database failures.
    fn store(&self, request: &StoreRequest) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.db.store(request) {
                Ok(outcome) => {
                    self.stats.stored(outcome);
                    return Ok(());
                }
                Err(Error::Db {
                    kind: DbErrorKind::Transient,
                    message,
                }) if attempt < STORE_ATTEMPTS => {
                    tracing::warn!(
                        md5 = %request.location.md5,
                        attempt,
                        error = %message,
                        "transient store failure, retrying"
                    );
                    thread::sleep(Duration::from_millis(200 * attempt as u64));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop location rows recorded for a path that is now excluded.
    fn remove_excluded(&self, path: &Path) {
        let directory = directory_of(path, self.shorten_directory);
        let basename = basename_of(path);
        match self.db.remove_location(&self.host, &directory, &basename) {
            Ok(0) => {}
            Ok(rows) => {
                tracing::info!(path = %path.display(), rows, "removed excluded location");
                self.stats.deleted(rows);
            }
            Err(e) => self.record_failure(path, e),
        }
    }
}

/// A path queued for the readers.
#[derive(Debug, Clone)]
struct Job {
    path: PathBuf,
    album: Option<i64>,
}

fn reader_loop(ctx: &RunContext, jobs: Receiver<Job>, store: Sender<(PathBuf, StoreRequest)>) {
    for job in jobs.iter() {
        // Drain without work once stopped.
        if ctx.stopped() {
            continue;
        }
        match ctx.prepare(&job) {
            Ok(Some(request)) => {
                if store.send((job.path, request)).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => ctx.record_failure(&job.path, e),
        }
    }
}

fn storer_loop(ctx: &RunContext, requests: Receiver<(PathBuf, StoreRequest)>) {
    for (path, request) in requests.iter() {
        if ctx.stopped() {
            continue;
        }
        if let Err(e) = ctx.store(&request) {
            ctx.record_failure(&path, e);
        }
    }
}

/// The two worker pools and the queue feeding them.
pub struct Pipeline {
    ctx: Arc<RunContext>,
    reader_in: Sender<Job>,
    readers: Vec<JoinHandle<()>>,
    storers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn start(ctx: Arc<RunContext>, reader_threads: usize, storer_threads: usize, storer_queue: usize) -> Self {
        let reader_threads = reader_threads.max(1);
        let storer_threads = storer_threads.max(1);
        let (reader_in, reader_rx) = bounded::<Job>(reader_threads);
        let (storer_tx, storer_rx) = bounded::<(PathBuf, StoreRequest)>(storer_queue.max(1));

        let readers = (0..reader_threads)
            .map(|_| {
                let ctx = ctx.clone();
                let rx = reader_rx.clone();
                let tx = storer_tx.clone();
                thread::spawn(move || reader_loop(&ctx, rx, tx))
            })
            .collect();

        let storers = (0..storer_threads)
            .map(|_| {
                let ctx = ctx.clone();
                let rx = storer_rx.clone();
                thread::spawn(move || storer_loop(&ctx, rx))
            })
            .collect();

        Self {
            ctx,
            reader_in,
            readers,
            storers,
        }
    }

    /// Queue a path, blocking while the readers are busy. Returns `false`
    /// once the run has been stopped.
    pub fn submit(&self, path: PathBuf, album: Option<i64>) -> bool {
        if self.ctx.stopped() {
            return false;
        }
        self.reader_in.send(Job { path, album }).is_ok()
    }

    /// Close the queues in order and wait for every worker to drain.
    pub fn finish(self) -> Result<()> {
        let Pipeline {
            ctx,
            reader_in,
            readers,
            storers,
        } = self;

        drop(reader_in);
        for handle in readers {
            if handle.join().is_err() {
                tracing::error!("reader worker panicked");
            }
        }
        // Readers held the last storer senders; the storer queue is now closed.
        for handle in storers {
            if handle.join().is_err() {
                tracing::error!("storer worker panicked");
            }
        }

        match ctx.take_fatal() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Album for `root` according to `mode`.
fn resolve_album(db: &Database, root: &Path, mode: AlbumMode) -> Result<Option<i64>> {
    match mode {
        AlbumMode::None => Ok(None),
        AlbumMode::Existing(id) => match db.album(id)? {
            Some(album) => Ok(Some(album.id)),
            None => Err(Error::Config(format!("album {} does not exist", id))),
        },
        AlbumMode::PerRoot => {
            let dir = if root.is_file() {
                root.parent().unwrap_or(root)
            } else {
                root
            };
            let title = basename_of(dir);
            let title = if title.is_empty() {
                dir.to_string_lossy().to_string()
            } else {
                title
            };
            let album = db.ensure_album(&title, &dir.to_string_lossy())?;
            tracing::info!(album = album.id, %title, "using album");
            Ok(Some(album.id))
        }
    }
}

/// Ingest every file under `roots`. A root may also be a single file.
pub fn run(
    ctx: Arc<RunContext>,
    config: &Config,
    roots: &[PathBuf],
    filter: &ExcludeFilter,
    options: &IngestOptions,
) -> Result<Counters> {
    let ticker = options
        .progress
        .then(|| Ticker::spawn(ctx.stats.clone(), TICK_INTERVAL));

    let pipeline = Pipeline::start(
        ctx.clone(),
        config.ingest.reader_threads,
        config.ingest.storer_threads,
        config.ingest.storer_queue,
    );

    let mut checked = 0u64;
    let mut result = Ok(());
    for root in roots {
        if ctx.stopped() || options.limit.is_some_and(|l| checked >= l) {
            break;
        }
        let album = match resolve_album(&ctx.db, root, options.album) {
            Ok(album) => album,
            Err(e) => {
                result = Err(e);
                ctx.request_stop();
                break;
            }
        };

        tracing::info!(root = %root.display(), "ingesting");
        walk(root, filter, |item| match item {
            Discovered::Included(path) => {
                if options.limit.is_some_and(|l| checked >= l) {
                    return false;
                }
                checked += 1;
                ctx.stats.checked();
                pipeline.submit(path, album)
            }
            Discovered::Excluded(path) => {
                tracing::debug!(path = %path.display(), "excluded");
                if options.delete_excluded {
                    ctx.remove_excluded(&path);
                }
                !ctx.stopped()
            }
        });
    }

    let finished = pipeline.finish();
    if let Some(ticker) = ticker {
        ticker.stop();
    }

    result?;
    finished?;
    Ok(ctx.stats.snapshot())
}
