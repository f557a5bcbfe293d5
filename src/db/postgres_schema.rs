pub const POSTGRES_SCHEMA: &str = r#"
-- PostgreSQL schema for the bitgarten archive

CREATE TABLE IF NOT EXISTS pictures (
    md5 TEXT PRIMARY KEY,
    sha256 TEXT NOT NULL,
    title TEXT NOT NULL,
    directory TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    fill BOOLEAN NOT NULL DEFAULT FALSE,
    fill_attempts INTEGER NOT NULL DEFAULT 0,
    width INTEGER,
    height INTEGER,
    media BYTEA,
    thumbnail BYTEA,
    checksum_thumbnail TEXT,

    exif_model TEXT,
    exif_make TEXT,
    exif_taken TEXT,
    exif_orig_time TEXT,
    exif_x_dim INTEGER,
    exif_y_dim INTEGER,
    exif_orientation TEXT,
    gps_lat DOUBLE PRECISION,
    gps_lon DOUBLE PRECISION,
    gps_coords TEXT,

    exif TEXT,

    picture_option TEXT NOT NULL DEFAULT 'sqlstore',
    mark_delete BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_pictures_title ON pictures(title);
CREATE INDEX IF NOT EXISTS idx_pictures_mark_delete ON pictures(mark_delete);

CREATE TABLE IF NOT EXISTS picturelocations (
    md5 TEXT NOT NULL REFERENCES pictures(md5) ON DELETE CASCADE,
    picture_host TEXT NOT NULL,
    picture_directory TEXT NOT NULL,
    picture_name TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (md5, picture_host, picture_directory, picture_name)
);

CREATE INDEX IF NOT EXISTS idx_picturelocations_path
    ON picturelocations(picture_host, picture_directory, picture_name);

CREATE TABLE IF NOT EXISTS picturehash (
    md5 TEXT NOT NULL REFERENCES pictures(md5) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    hash BIGINT NOT NULL,
    average_hash BIGINT,
    perception_hash BIGINT,
    difference_hash BIGINT,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (md5, kind)
);

CREATE INDEX IF NOT EXISTS idx_picturehash_kind_hash ON picturehash(kind, hash);

CREATE TABLE IF NOT EXISTS picturetags (
    md5 TEXT NOT NULL REFERENCES pictures(md5) ON DELETE CASCADE,
    tag_name TEXT NOT NULL,
    PRIMARY KEY (md5, tag_name)
);

CREATE TABLE IF NOT EXISTS albums (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL,
    album_key TEXT NOT NULL UNIQUE,
    directory TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS albumpictures (
    album_id BIGINT NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
    md5 TEXT NOT NULL REFERENCES pictures(md5),
    "index" BIGINT NOT NULL,
    name TEXT,
    mime_type TEXT,
    width INTEGER,
    height INTEGER,
    PRIMARY KEY (album_id, md5)
);

ALTER TABLE pictures ADD COLUMN IF NOT EXISTS checksum_thumbnail TEXT;
ALTER TABLE pictures ADD COLUMN IF NOT EXISTS exif TEXT;
ALTER TABLE pictures ADD COLUMN IF NOT EXISTS picture_option TEXT NOT NULL DEFAULT 'sqlstore';
ALTER TABLE pictures ADD COLUMN IF NOT EXISTS fill_attempts INTEGER NOT NULL DEFAULT 0;
"#;
