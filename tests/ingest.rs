use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bitgarten::config::Config;
use bitgarten::db::{Location, NewPicture, StorageOption, StoreRequest};
use bitgarten::ingest::{self, AlbumMode, Counters, IngestOptions, RunContext};
use bitgarten::report::RunSummary;
use bitgarten::scanner::ExcludeFilter;
use bitgarten::{Database, DbErrorKind, Error};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tempfile::tempdir;

fn test_config(max_blob_size: u64) -> Config {
    let mut config = Config::default();
    config.ingest.reader_threads = 2;
    config.ingest.storer_threads = 2;
    config.ingest.max_blob_size = max_blob_size;
    config.ingest.host = "testhost".to_string();
    config
}

fn ingest_with(
    db: &Arc<Database>,
    config: &Config,
    roots: &[PathBuf],
    filter: &ExcludeFilter,
    options: &IngestOptions,
) -> Counters {
    let ctx = Arc::new(RunContext::new(db.clone(), config, options.exit_on_error).unwrap());
    ingest::run(ctx, config, roots, filter, options).unwrap()
}

fn ingest_root(db: &Arc<Database>, config: &Config, root: &Path) -> Counters {
    ingest_with(
        db,
        config,
        &[root.to_path_buf()],
        &ExcludeFilter::new(&config.ingest.exclude_filters).unwrap(),
        &IngestOptions::default(),
    )
}

fn memory_db() -> Arc<Database> {
    Arc::new(Database::open_in_memory().unwrap())
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 40]));
    let mut out = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

#[test]
fn test_empty_and_oversize_files_are_not_errors() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("empty.jpg"), b"").unwrap();
    fs::write(dir.path().join("small.jpg"), b"0123456789").unwrap();
    fs::write(dir.path().join("huge.jpg"), vec![1u8; 65]).unwrap();

    let db = memory_db();
    let c = ingest_root(&db, &test_config(64), dir.path());

    assert_eq!(c.checked, 3);
    assert_eq!(c.empty, 1);
    assert_eq!(c.too_big, 1);
    assert_eq!(c.inserted, 1);
    assert_eq!(c.skipped(), 0);
    assert_eq!(c.errors, 0);
    assert_eq!(c.max_blob_size_seen, 10);
    assert_eq!(db.count_pictures().unwrap(), 1);
}

#[test]
fn test_exact_limit_accepted() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("exact.jpg"), vec![3u8; 64]).unwrap();

    let db = memory_db();
    let c = ingest_root(&db, &test_config(64), dir.path());
    assert_eq!((c.inserted, c.too_big), (1, 0));
}

#[test]
fn test_same_bytes_under_two_paths() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    fs::create_dir_all(&a).unwrap();
    fs::create_dir_all(&b).unwrap();
    fs::write(a.join("x.jpg"), b"0123456789").unwrap();
    fs::write(b.join("x.jpg"), b"0123456789").unwrap();

    let db = memory_db();
    let config = test_config(1024);

    let first = ingest_root(&db, &config, &a);
    assert_eq!(first.inserted, 1);
    assert_eq!(db.count_pictures().unwrap(), 1);
    assert_eq!(db.count_locations().unwrap(), 1);

    let second = ingest_root(&db, &config, &b);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.found, 1);
    assert_eq!(second.locations, 1);
    assert_eq!(db.count_pictures().unwrap(), 1);
    assert_eq!(db.count_locations().unwrap(), 2);
}

#[test]
fn test_reingest_is_idempotent() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("x.jpg"), b"0123456789").unwrap();

    let db = memory_db();
    let config = test_config(1024);
    ingest_root(&db, &config, dir.path());
    let again = ingest_root(&db, &config, dir.path());

    assert_eq!(again.inserted, 0);
    assert_eq!(again.skipped(), 1);
    assert_eq!(db.count_pictures().unwrap(), 1);
    assert_eq!(db.count_locations().unwrap(), 1);

    let summary = RunSummary::begin("ingest");
    let json = summary.to_json(Some(&again), None).unwrap();
    assert_eq!(json["skipped"], 1);
    assert_eq!(json["duplicates"], 1);
    let text = summary.to_text(Some(&again), None).unwrap();
    assert!(text.lines().any(|l| l.trim_start().starts_with("skipped")));
}

#[test]
fn test_sha_mismatch_keeps_stored_row_and_adds_location() {
    let dir = tempdir().unwrap();
    let media = b"bytes whose sha256 was stored wrong".to_vec();
    fs::write(dir.path().join("x.jpg"), &media).unwrap();

    let db = memory_db();
    let md5 = bitgarten::scanner::md5_hex(&media);
    db.store(&StoreRequest {
        picture: Some(NewPicture {
            md5: md5.clone(),
            sha256: "0".repeat(64),
            title: "x.jpg".to_string(),
            directory: "/old".to_string(),
            mime_type: "image/jpeg".to_string(),
            media: media.clone(),
            fill: false,
            thumbnail: None,
            exif: None,
            option: StorageOption::SqlStore,
        }),
        location: Location {
            md5: md5.clone(),
            host: "otherhost".to_string(),
            directory: "/old".to_string(),
            basename: "x.jpg".to_string(),
        },
        album: None,
    })
    .unwrap();

    let c = ingest_root(&db, &test_config(1024), dir.path());
    assert_eq!(c.inserted, 0);
    assert_eq!(c.found, 0);
    assert_eq!(c.locations, 1);
    assert_eq!(c.duplicates, 1);
    assert_eq!(c.errors, 0);
    assert_eq!(db.count_pictures().unwrap(), 1);
    assert_eq!(db.count_locations().unwrap(), 2);
    assert!(db.locations(&md5).unwrap().iter().all(|l| l.sha256 == "0".repeat(64)));
}

#[test]
fn test_fatal_database_error_aborts_run() {
    let dir = tempdir().unwrap();
    let photos = dir.path().join("photos");
    fs::create_dir_all(&photos).unwrap();
    for i in 0..3 {
        fs::write(photos.join(format!("{}.jpg", i)), format!("picture {}", i)).unwrap();
    }

    let db_path = dir.path().join("archive.db");
    let mut config = test_config(1024);
    config.database.url = format!("sqlite:{}", db_path.display());
    let db = Database::open(&config.database, 1).unwrap();
    db.initialize().unwrap();
    let db = Arc::new(db);

    rusqlite::Connection::open(&db_path)
        .unwrap()
        .execute_batch("DROP TABLE picturelocations")
        .unwrap();

    let ctx = Arc::new(RunContext::new(db.clone(), &config, false).unwrap());
    let filter = ExcludeFilter::new(&config.ingest.exclude_filters).unwrap();
    let result = ingest::run(
        ctx.clone(),
        &config,
        &[photos],
        &filter,
        &IngestOptions::default(),
    );

    assert!(matches!(
        result,
        Err(Error::Db {
            kind: DbErrorKind::Fatal,
            ..
        })
    ));
    assert!(ctx.stopped());
    assert!(ctx.stats.snapshot().errors >= 1);
    assert_eq!(db.count_pictures().unwrap(), 0);
}

#[test]
fn test_unsupported_type_is_skipped() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
    fs::write(dir.path().join("x.png"), b"0123456789").unwrap();

    let db = memory_db();
    let c = ingest_root(&db, &test_config(1024), dir.path());
    assert_eq!(c.ignored, 1);
    assert_eq!(c.skipped(), 1);
    assert_eq!(c.errors, 0);
    assert_eq!(c.error_kinds.get("unsupported"), Some(&1));
    assert_eq!(c.inserted, 1);
}

#[test]
fn test_real_image_gets_thumbnail() {
    let dir = tempdir().unwrap();
    let media = jpeg(400, 200);
    fs::write(dir.path().join("photo.jpg"), &media).unwrap();

    let db = memory_db();
    ingest_root(&db, &test_config(1 << 20), dir.path());

    let md5 = bitgarten::scanner::md5_hex(&media);
    let picture = db.picture(&md5).unwrap().unwrap();
    assert!(picture.fill);
    assert!(picture.has_thumbnail);
    assert_eq!((picture.width, picture.height), (Some(200), Some(100)));
    assert_eq!(picture.title, "photo.jpg");
    assert_eq!(picture.option.as_str(), "sqlstore");
}

#[test]
fn test_limit_stops_walk() {
    let dir = tempdir().unwrap();
    for i in 0..4 {
        fs::write(dir.path().join(format!("{}.jpg", i)), format!("content {}", i)).unwrap();
    }

    let db = memory_db();
    let config = test_config(1024);
    let options = IngestOptions {
        limit: Some(2),
        ..IngestOptions::default()
    };
    let filter = ExcludeFilter::new(&config.ingest.exclude_filters).unwrap();
    let c = ingest_with(&db, &config, &[dir.path().to_path_buf()], &filter, &options);
    assert_eq!(c.checked, 2);
    assert_eq!(db.count_pictures().unwrap(), 2);
}

#[test]
fn test_excluded_locations_removed() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("keep.jpg"), b"keep me").unwrap();
    fs::write(dir.path().join("drop.jpg"), b"drop me").unwrap();

    let db = memory_db();
    let config = test_config(1024);
    ingest_root(&db, &config, dir.path());
    assert_eq!(db.count_locations().unwrap(), 2);

    let options = IngestOptions {
        delete_excluded: true,
        ..IngestOptions::default()
    };
    let filter = ExcludeFilter::from_comma_list(".*/drop\\.jpg").unwrap();
    let c = ingest_with(&db, &config, &[dir.path().to_path_buf()], &filter, &options);

    assert_eq!(c.deleted, 1);
    assert_eq!(c.checked, 1);
    assert_eq!(db.count_locations().unwrap(), 1);
    assert_eq!(db.count_pictures().unwrap(), 2);
}

#[test]
fn test_album_per_root() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Summer 2023");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("x.jpg"), b"beach").unwrap();

    let db = memory_db();
    let config = test_config(1024);
    let options = IngestOptions {
        album: AlbumMode::PerRoot,
        ..IngestOptions::default()
    };
    let filter = ExcludeFilter::new(&config.ingest.exclude_filters).unwrap();
    ingest_with(&db, &config, &[root.clone()], &filter, &options);

    let album = db.album(1).unwrap().expect("album created by the run");
    assert_eq!(album.title, "Summer 2023");
    assert_eq!(album.album_key, bitgarten::db::album_key("Summer 2023"));
    assert_eq!(db.ensure_album("Summer 2023", "/elsewhere").unwrap().id, album.id);
}

#[test]
fn test_missing_album_fails_run() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("x.jpg"), b"x").unwrap();

    let db = memory_db();
    let config = test_config(1024);
    let ctx = Arc::new(RunContext::new(db.clone(), &config, false).unwrap());
    let options = IngestOptions {
        album: AlbumMode::Existing(42),
        ..IngestOptions::default()
    };
    let filter = ExcludeFilter::new(&config.ingest.exclude_filters).unwrap();
    let result = ingest::run(ctx, &config, &[dir.path().to_path_buf()], &filter, &options);
    assert!(result.is_err());
    assert_eq!(db.count_pictures().unwrap(), 0);
}

#[cfg(unix)]
#[test]
fn test_video_thumbnail_through_transcoder() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let frame = dir.path().join("frame.jpg");
    fs::write(&frame, jpeg(320, 240)).unwrap();

    // Copies a fixed frame to the last argument, like `ffmpeg ... out.jpg`.
    let script = dir.path().join("fake-ffmpeg");
    fs::write(
        &script,
        format!("#!/bin/sh\nfor last; do :; done\ncp '{}' \"$last\"\n", frame.display()),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let videos = dir.path().join("videos");
    fs::create_dir_all(&videos).unwrap();
    fs::write(videos.join("clip.mp4"), b"not really a video").unwrap();

    let db = memory_db();
    let mut config = test_config(1024);
    config.thumbnails.transcoder = script;
    let c = ingest_root(&db, &config, &videos);
    assert_eq!(c.inserted, 1);

    let md5 = bitgarten::scanner::md5_hex(b"not really a video");
    let picture = db.picture(&md5).unwrap().unwrap();
    assert_eq!(picture.mime_type, "video/mp4");
    assert!(picture.has_thumbnail);
    assert_eq!((picture.width, picture.height), (Some(200), Some(150)));
}
