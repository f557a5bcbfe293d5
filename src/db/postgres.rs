//! PostgreSQL backend implementation.

use postgres::types::ToSql;
use postgres::{NoTls, Row};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;

use super::albums::{album_key, Album};
use super::pictures::{
    BackfillRow, ExportRow, HashCandidate, Location, MediaRow, NewPicture, PageKey,
    PictureSummary, StoreOutcome, StoreRequest, StoredLocation,
};
use super::postgres_schema::POSTGRES_SCHEMA;
use super::similarity::{
    hash_from_db, hash_to_db, parse_tag_list, GroupMember, HashGroup, ResolutionCounts,
    ResolutionPlan, CANONICAL_TAG,
};
use super::{hash_value, DerivedColumns, PAGE_SIZE};
use crate::error::{Error, Result};
use crate::scanner::metadata::parse_stored_time;
use crate::scanner::{Derived, HashKind, PerceptualHashes};

type Param<'a> = &'a (dyn ToSql + Sync);

pub struct PgDb {
    pool: Pool<PostgresConnectionManager<NoTls>>,
}

const MEMBER_COLUMNS: &str = r#"
    SELECT p.md5, p.title, p.mime_type, h.hash,
           COALESCE(p.width, 0), COALESCE(p.height, 0),
           COALESCE(octet_length(p.media), 0)::BIGINT,
           (SELECT string_agg(t.tag_name, chr(31) ORDER BY t.tag_name)
              FROM picturetags t WHERE t.md5 = p.md5)
    FROM picturehash h
    JOIN pictures p ON p.md5 = h.md5
"#;

fn group_member(row: &Row) -> GroupMember {
    let tags: Option<String> = row.get(7);
    GroupMember {
        md5: row.get(0),
        title: row.get(1),
        mime_type: row.get(2),
        hash: hash_from_db(row.get(3)),
        width: row.get::<_, i32>(4) as u32,
        height: row.get::<_, i32>(5) as u32,
        media_size: row.get(6),
        tags: parse_tag_list(tags.as_deref()),
    }
}

fn media_row(row: &Row) -> MediaRow {
    MediaRow {
        md5: row.get(0),
        sha256: row.get(1),
        media: row.get::<_, Option<Vec<u8>>>(2).unwrap_or_default(),
    }
}

fn export_row(row: &Row) -> ExportRow {
    let original_time: Option<String> = row.get(2);
    ExportRow {
        mime_type: row.get(0),
        title: row.get(1),
        original_time: original_time.as_deref().and_then(parse_stored_time),
        md5: row.get(3),
        media: row.get::<_, Option<Vec<u8>>>(4).unwrap_or_default(),
    }
}

fn hash_candidate(row: &Row) -> HashCandidate {
    HashCandidate {
        md5: row.get(0),
        title: row.get(1),
        mime_type: row.get(2),
        media: row.get::<_, Option<Vec<u8>>>(3).unwrap_or_default(),
    }
}

fn backfill_row(row: &Row) -> BackfillRow {
    BackfillRow {
        md5: row.get(0),
        title: row.get(1),
        mime_type: row.get(2),
        media: row.get::<_, Option<Vec<u8>>>(3).unwrap_or_default(),
    }
}

fn insert_picture(tx: &mut postgres::Transaction<'_>, picture: &NewPicture) -> Result<()> {
    let c = DerivedColumns::new(picture.thumbnail.as_ref(), picture.exif.as_ref());
    tx.execute(
        r#"
        INSERT INTO pictures (
            md5, sha256, title, directory, mime_type, fill, width, height, media,
            thumbnail, checksum_thumbnail, exif_model, exif_make, exif_taken,
            exif_orig_time, exif_x_dim, exif_y_dim, exif_orientation,
            gps_lat, gps_lon, gps_coords, exif, picture_option
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23)
        "#,
        &[
            &picture.md5,
            &picture.sha256,
            &picture.title,
            &picture.directory,
            &picture.mime_type,
            &picture.fill,
            &c.width,
            &c.height,
            &picture.media,
            &c.thumbnail,
            &c.checksum,
            &c.model,
            &c.make,
            &c.taken,
            &c.original,
            &c.x_dim,
            &c.y_dim,
            &c.orientation,
            &c.latitude,
            &c.longitude,
            &c.coords,
            &c.raw,
            &picture.option.as_str(),
        ],
    )?;
    Ok(())
}

fn insert_location(tx: &mut postgres::Transaction<'_>, location: &Location) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO picturelocations (md5, picture_host, picture_directory, picture_name)
        VALUES ($1, $2, $3, $4)
        "#,
        &[
            &location.md5,
            &location.host,
            &location.directory,
            &location.basename,
        ],
    )?;
    Ok(())
}

impl PgDb {
    pub fn open(config: postgres::Config, pool_size: u32) -> Result<Self> {
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder().max_size(pool_size).build(manager)?;
        Ok(Self { pool })
    }

    fn client(&self) -> Result<PooledConnection<PostgresConnectionManager<NoTls>>> {
        Ok(self.pool.get()?)
    }

    pub fn initialize(&self) -> Result<()> {
        let mut client = self.client()?;
        client.batch_execute(POSTGRES_SCHEMA)?;
        Ok(())
    }

    /// Keyset-paged query; `$1` is the last md5 seen, `$2` the page size.
    fn for_each_page<T: PageKey>(
        &self,
        sql: &str,
        extra: &[Param<'_>],
        map: fn(&Row) -> T,
        limit: Option<u64>,
        f: &mut dyn FnMut(T) -> Result<bool>,
    ) -> Result<u64> {
        let mut after = String::new();
        let mut seen = 0u64;
        loop {
            let page: Vec<T> = {
                let mut client = self.client()?;
                let mut values: Vec<Param<'_>> = vec![&after, &PAGE_SIZE];
                values.extend_from_slice(extra);
                client.query(sql, &values)?.iter().map(map).collect()
            };
            let last_page = (page.len() as i64) < PAGE_SIZE;

            for row in page {
                after = row.page_key().to_string();
                seen += 1;
                if !f(row)? || limit.is_some_and(|l| seen >= l) {
                    return Ok(seen);
                }
            }
            if last_page {
                return Ok(seen);
            }
        }
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    pub fn locations(&self, md5: &str) -> Result<Vec<StoredLocation>> {
        let mut client = self.client()?;
        let rows = client.query(
            r#"
            SELECT p.sha256, l.picture_host, l.picture_directory, l.picture_name
            FROM pictures p
            LEFT JOIN picturelocations l ON l.md5 = p.md5
            WHERE p.md5 = $1
            "#,
            &[&md5],
        )?;
        Ok(rows
            .iter()
            .map(|row| StoredLocation {
                sha256: row.get(0),
                host: row.get(1),
                directory: row.get(2),
                basename: row.get(3),
            })
            .collect())
    }

    pub fn store(&self, request: &StoreRequest) -> Result<StoreOutcome> {
        let mut client = self.client()?;
        let mut tx = client.transaction()?;

        let mut outcome = StoreOutcome::LocationAdded;
        if let Some(picture) = &request.picture {
            let mut sp = tx.savepoint("picture_insert")?;
            match insert_picture(&mut sp, picture) {
                Ok(()) => {
                    sp.commit()?;
                    outcome = StoreOutcome::Inserted;
                }
                Err(e) if e.is_constraint() => {
                    tracing::debug!(md5 = %picture.md5, "picture row already present");
                    sp.rollback()?;
                    outcome = StoreOutcome::Raced;
                }
                Err(e) => return Err(e),
            }
        }

        match insert_location(&mut tx, &request.location) {
            Ok(()) => {}
            Err(e) if e.is_constraint() => {
                tx.rollback()?;
                return Ok(StoreOutcome::Duplicate);
            }
            Err(e) => return Err(e),
        }

        if let Some(album) = &request.album {
            let (width, height) = request
                .picture
                .as_ref()
                .map(|p| (p.width().map(|v| v as i32), p.height().map(|v| v as i32)))
                .unwrap_or((None, None));
            let mime_type = request.picture.as_ref().map(|p| p.mime_type.as_str());
            tx.execute(
                r#"
                INSERT INTO albumpictures (album_id, md5, "index", name, mime_type, width, height)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT DO NOTHING
                "#,
                &[
                    &album.album_id,
                    &request.location.md5,
                    &album.index,
                    &request.location.basename,
                    &mime_type,
                    &width,
                    &height,
                ],
            )?;
        }

        tx.commit()?;
        Ok(outcome)
    }

    pub fn remove_location(&self, host: &str, directory: &str, basename: &str) -> Result<u64> {
        let mut client = self.client()?;
        let removed = client.execute(
            r#"
            DELETE FROM picturelocations
            WHERE picture_host = $1 AND picture_directory = $2 AND picture_name = $3
            "#,
            &[&host, &directory, &basename],
        )?;
        Ok(removed)
    }

    pub fn ensure_album(&self, title: &str, directory: &str) -> Result<Album> {
        let mut client = self.client()?;
        let key = album_key(title);
        let row = client.query_one(
            r#"
            INSERT INTO albums (title, album_key, directory)
            VALUES ($1, $2, $3)
            ON CONFLICT (album_key) DO UPDATE SET directory = EXCLUDED.directory
            RETURNING id
            "#,
            &[&title, &key, &directory],
        )?;
        Ok(Album {
            id: row.get(0),
            title: title.to_string(),
            album_key: key,
            directory: Some(directory.to_string()),
        })
    }

    pub fn album(&self, id: i64) -> Result<Option<Album>> {
        let mut client = self.client()?;
        let row = client.query_opt(
            "SELECT id, title, album_key, directory FROM albums WHERE id = $1",
            &[&id],
        )?;
        Ok(row.map(|row| Album {
            id: row.get(0),
            title: row.get(1),
            album_key: row.get(2),
            directory: row.get(3),
        }))
    }

    // ========================================================================
    // Perceptual hashes and resolution
    // ========================================================================

    pub fn for_each_hash_candidate(
        &self,
        fresh_kind: HashKind,
        title_pattern: &str,
        limit: Option<u64>,
        f: &mut dyn FnMut(HashCandidate) -> Result<bool>,
    ) -> Result<u64> {
        let kind = fresh_kind.as_str();
        self.for_each_page(
            r#"
            SELECT p.md5, p.title, p.mime_type, p.media
            FROM pictures p
            WHERE p.md5 > $1
              AND p.mark_delete = FALSE
              AND p.mime_type LIKE 'image/%'
              AND p.title LIKE $3 ESCAPE '\'
              AND NOT EXISTS (
                  SELECT 1 FROM picturehash h
                  WHERE h.md5 = p.md5 AND h.kind = $4
                    AND h.updated_at >= NOW() - INTERVAL '7 days'
              )
            ORDER BY p.md5
            LIMIT $2
            "#,
            &[&title_pattern, &kind],
            hash_candidate,
            limit,
            f,
        )
    }

    pub fn upsert_hash(&self, md5: &str, kind: HashKind, hashes: &PerceptualHashes) -> Result<()> {
        let hash = hash_value(kind, hashes)?;
        let mut client = self.client()?;
        client.execute(
            r#"
            INSERT INTO picturehash
                (md5, kind, hash, average_hash, perception_hash, difference_hash, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (md5, kind) DO UPDATE SET
                hash = EXCLUDED.hash,
                average_hash = EXCLUDED.average_hash,
                perception_hash = EXCLUDED.perception_hash,
                difference_hash = EXCLUDED.difference_hash,
                updated_at = NOW()
            "#,
            &[
                &md5,
                &kind.as_str(),
                &hash,
                &hash_to_db(hashes.average),
                &hash_to_db(hashes.perception),
                &hash_to_db(hashes.difference),
            ],
        )?;
        Ok(())
    }

    pub fn top_hash_groups(&self, kind: HashKind, min_count: i64, limit: i64) -> Result<Vec<HashGroup>> {
        let mut client = self.client()?;
        let rows = client.query(
            r#"
            SELECT h.hash, COUNT(*) AS cnt
            FROM picturehash h
            JOIN pictures p ON p.md5 = h.md5
            LEFT JOIN picturetags pin ON pin.md5 = h.md5 AND pin.tag_name = $4
            WHERE h.kind = $1 AND p.mark_delete = FALSE
            GROUP BY h.hash
            HAVING COUNT(*) >= $2 AND COUNT(pin.md5) < COUNT(*)
            ORDER BY cnt DESC, h.hash
            LIMIT $3
            "#,
            &[&kind.as_str(), &min_count, &limit, &CANONICAL_TAG],
        )?;
        Ok(rows
            .iter()
            .map(|row| HashGroup {
                hash: hash_from_db(row.get(0)),
                count: row.get(1),
            })
            .collect())
    }

    pub fn group_members(&self, kind: HashKind, hash: u64) -> Result<Vec<GroupMember>> {
        let mut client = self.client()?;
        let sql = format!(
            "{} WHERE h.kind = $1 AND h.hash = $2 AND p.mark_delete = FALSE ORDER BY p.md5",
            MEMBER_COLUMNS
        );
        let rows = client.query(sql.as_str(), &[&kind.as_str(), &hash_to_db(hash)])?;
        Ok(rows.iter().map(group_member).collect())
    }

    pub fn members_by_title(&self, kind: HashKind, title_pattern: &str) -> Result<Vec<GroupMember>> {
        let mut client = self.client()?;
        let sql = format!(
            r#"{} WHERE h.kind = $1 AND p.title LIKE $2 ESCAPE '\' AND p.mark_delete = FALSE ORDER BY p.md5"#,
            MEMBER_COLUMNS
        );
        let rows = client.query(sql.as_str(), &[&kind.as_str(), &title_pattern])?;
        Ok(rows.iter().map(group_member).collect())
    }

    pub fn apply_resolution(&self, plan: &ResolutionPlan, commit: bool) -> Result<ResolutionCounts> {
        let mut client = self.client()?;
        let mut tx = client.transaction()?;
        let mut counts = ResolutionCounts::default();

        for tag in &plan.add_tags {
            counts.tags_added += tx.execute(
                "INSERT INTO picturetags (md5, tag_name) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&plan.canonical, tag],
            )?;
        }
        for md5 in &plan.delete {
            counts.tags_removed += tx.execute("DELETE FROM picturetags WHERE md5 = $1", &[md5])?;
            counts.marked += tx.execute(
                r#"
                UPDATE pictures SET mark_delete = TRUE, updated_at = NOW()
                WHERE md5 = $1 AND mark_delete = FALSE
                "#,
                &[md5],
            )?;
        }

        if commit {
            tx.commit()?;
        } else {
            tx.rollback()?;
        }
        Ok(counts)
    }

    // ========================================================================
    // Tags
    // ========================================================================

    pub fn add_tag(&self, md5: &str, tag: &str) -> Result<bool> {
        let mut client = self.client()?;
        let added = client.execute(
            "INSERT INTO picturetags (md5, tag_name) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            &[&md5, &tag],
        )?;
        Ok(added > 0)
    }

    pub fn tags(&self, md5: &str) -> Result<Vec<String>> {
        let mut client = self.client()?;
        let rows = client.query(
            "SELECT tag_name FROM picturetags WHERE md5 = $1 ORDER BY tag_name",
            &[&md5],
        )?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    // ========================================================================
    // Validation, export, backfill
    // ========================================================================

    pub fn for_each_media(&self, limit: Option<u64>, f: &mut dyn FnMut(MediaRow) -> Result<bool>) -> Result<u64> {
        self.for_each_page(
            r#"
            SELECT md5, sha256, media FROM pictures
            WHERE md5 > $1
            ORDER BY md5
            LIMIT $2
            "#,
            &[],
            media_row,
            limit,
            f,
        )
    }

    pub fn for_each_export(&self, f: &mut dyn FnMut(ExportRow) -> Result<bool>) -> Result<u64> {
        self.for_each_page(
            r#"
            SELECT mime_type, title, exif_orig_time, md5, media FROM pictures
            WHERE md5 > $1 AND mark_delete = FALSE
            ORDER BY md5
            LIMIT $2
            "#,
            &[],
            export_row,
            None,
            f,
        )
    }

    pub fn for_each_backfill(
        &self,
        max_attempts: i64,
        limit: Option<u64>,
        f: &mut dyn FnMut(BackfillRow) -> Result<bool>,
    ) -> Result<u64> {
        self.for_each_page(
            r#"
            SELECT md5, title, mime_type, media FROM pictures
            WHERE md5 > $1 AND mark_delete = FALSE AND fill = FALSE
              AND fill_attempts < $3::BIGINT
            ORDER BY md5
            LIMIT $2
            "#,
            &[&max_attempts],
            backfill_row,
            limit,
            f,
        )
    }

    pub fn record_fill_failure(&self, md5: &str) -> Result<u64> {
        let mut client = self.client()?;
        let updated = client.execute(
            "UPDATE pictures SET fill_attempts = fill_attempts + 1 WHERE md5 = $1",
            &[&md5],
        )?;
        Ok(updated)
    }

    pub fn update_derived(&self, md5: &str, derived: &Derived) -> Result<u64> {
        let c = DerivedColumns::new(derived.thumbnail.as_ref(), derived.exif.as_ref());
        let mut client = self.client()?;
        let updated = client.execute(
            r#"
            UPDATE pictures SET
                fill = TRUE,
                width = COALESCE($2, width),
                height = COALESCE($3, height),
                thumbnail = COALESCE($4, thumbnail),
                checksum_thumbnail = COALESCE($5, checksum_thumbnail),
                exif_model = COALESCE($6, exif_model),
                exif_make = COALESCE($7, exif_make),
                exif_taken = COALESCE($8, exif_taken),
                exif_orig_time = COALESCE($9, exif_orig_time),
                exif_x_dim = COALESCE($10, exif_x_dim),
                exif_y_dim = COALESCE($11, exif_y_dim),
                exif_orientation = COALESCE($12, exif_orientation),
                gps_lat = COALESCE($13, gps_lat),
                gps_lon = COALESCE($14, gps_lon),
                gps_coords = COALESCE($15, gps_coords),
                exif = COALESCE($16, exif),
                updated_at = NOW()
            WHERE md5 = $1
            "#,
            &[
                &md5,
                &c.width,
                &c.height,
                &c.thumbnail,
                &c.checksum,
                &c.model,
                &c.make,
                &c.taken,
                &c.original,
                &c.x_dim,
                &c.y_dim,
                &c.orientation,
                &c.latitude,
                &c.longitude,
                &c.coords,
                &c.raw,
            ],
        )?;
        Ok(updated)
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn picture(&self, md5: &str) -> Result<Option<PictureSummary>> {
        let mut client = self.client()?;
        let row = client.query_opt(
            r#"
            SELECT md5, title, directory, mime_type, fill, width, height,
                   thumbnail IS NOT NULL, checksum_thumbnail, exif_orig_time,
                   picture_option, mark_delete
            FROM pictures WHERE md5 = $1
            "#,
            &[&md5],
        )?;
        Ok(row.map(|row| {
            let original: Option<String> = row.get(9);
            let option: String = row.get(10);
            PictureSummary {
                md5: row.get(0),
                title: row.get(1),
                directory: row.get(2),
                mime_type: row.get(3),
                fill: row.get(4),
                width: row.get::<_, Option<i32>>(5).map(|v| v as u32),
                height: row.get::<_, Option<i32>>(6).map(|v| v as u32),
                has_thumbnail: row.get(7),
                checksum_thumbnail: row.get(8),
                original_time: original.as_deref().and_then(parse_stored_time),
                option: option.parse().unwrap_or_default(),
                mark_delete: row.get(11),
            }
        }))
    }

    pub fn count_pictures(&self) -> Result<i64> {
        let mut client = self.client()?;
        Ok(client.query_one("SELECT COUNT(*) FROM pictures", &[])?.get(0))
    }

    pub fn count_locations(&self) -> Result<i64> {
        let mut client = self.client()?;
        Ok(client.query_one("SELECT COUNT(*) FROM picturelocations", &[])?.get(0))
    }
}

/// Build the connection config, injecting `password` when the URL has none.
pub fn connection_config(url: &str, password: Option<&str>) -> Result<postgres::Config> {
    let mut config: postgres::Config = url
        .parse()
        .map_err(|e: postgres::Error| Error::Config(format!("bad database url: {}", e)))?;
    if config.get_password().is_none() {
        if let Some(password) = password {
            config.password(password);
        }
    }
    Ok(config)
}
