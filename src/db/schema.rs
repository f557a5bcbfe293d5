pub const SCHEMA: &str = r#"
-- Pictures: one row per distinct content (md5)
CREATE TABLE IF NOT EXISTS pictures (
    md5 TEXT PRIMARY KEY,
    sha256 TEXT NOT NULL,
    title TEXT NOT NULL,
    directory TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    fill INTEGER NOT NULL DEFAULT 0,
    fill_attempts INTEGER NOT NULL DEFAULT 0,
    width INTEGER,
    height INTEGER,
    media BLOB,
    thumbnail BLOB,
    checksum_thumbnail TEXT,

    -- EXIF summary
    exif_model TEXT,
    exif_make TEXT,
    exif_taken TEXT,
    exif_orig_time TEXT,
    exif_x_dim INTEGER,
    exif_y_dim INTEGER,
    exif_orientation TEXT,
    gps_lat REAL,
    gps_lon REAL,
    gps_coords TEXT,

    -- Complete primary-IFD EXIF as JSON
    exif TEXT,

    picture_option TEXT NOT NULL DEFAULT 'sqlstore',
    mark_delete INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_pictures_title ON pictures(title);
CREATE INDEX IF NOT EXISTS idx_pictures_mark_delete ON pictures(mark_delete);

-- Where each picture was seen
CREATE TABLE IF NOT EXISTS picturelocations (
    md5 TEXT NOT NULL,
    picture_host TEXT NOT NULL,
    picture_directory TEXT NOT NULL,
    picture_name TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (md5, picture_host, picture_directory, picture_name),
    FOREIGN KEY (md5) REFERENCES pictures(md5) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_picturelocations_path
    ON picturelocations(picture_host, picture_directory, picture_name);

-- Perceptual hashes, one row per picture and kind
CREATE TABLE IF NOT EXISTS picturehash (
    md5 TEXT NOT NULL,
    kind TEXT NOT NULL,
    hash INTEGER NOT NULL,
    average_hash INTEGER,
    perception_hash INTEGER,
    difference_hash INTEGER,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (md5, kind),
    FOREIGN KEY (md5) REFERENCES pictures(md5) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_picturehash_kind_hash ON picturehash(kind, hash);

-- Free-form tags
CREATE TABLE IF NOT EXISTS picturetags (
    md5 TEXT NOT NULL,
    tag_name TEXT NOT NULL,
    PRIMARY KEY (md5, tag_name),
    FOREIGN KEY (md5) REFERENCES pictures(md5) ON DELETE CASCADE
);

-- Albums, keyed by md5(title)
CREATE TABLE IF NOT EXISTS albums (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    album_key TEXT NOT NULL UNIQUE,
    directory TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS albumpictures (
    album_id INTEGER NOT NULL,
    md5 TEXT NOT NULL,
    "index" INTEGER NOT NULL,
    name TEXT,
    mime_type TEXT,
    width INTEGER,
    height INTEGER,
    PRIMARY KEY (album_id, md5),
    FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE,
    FOREIGN KEY (md5) REFERENCES pictures(md5)
);
"#;

/// Column additions for databases created before the column existed.
/// Failures (column already present) are ignored.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE pictures ADD COLUMN checksum_thumbnail TEXT",
    "ALTER TABLE pictures ADD COLUMN exif TEXT",
    "ALTER TABLE pictures ADD COLUMN picture_option TEXT NOT NULL DEFAULT 'sqlstore'",
    "ALTER TABLE pictures ADD COLUMN fill_attempts INTEGER NOT NULL DEFAULT 0",
];
