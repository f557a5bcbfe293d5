//! Perceptual-hash indexing and near-duplicate resolution.
//!
//! Both passes run single-threaded. The streaming query releases its
//! connection between pages, so per-row writes never wait on the cursor.

pub mod indexer;
pub mod resolver;

pub use indexer::{hash_candidate, index, IndexOptions, IndexReport};
pub use resolver::{
    alias_stem, plan_group, resolve, resolve_aliases, ResolveOptions, ResolveReport,
    ALIAS_SUFFIXES, CANONICAL_TAG,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Location, NewPicture, StorageOption, StoreRequest};
    use crate::scanner::{digest, HashKind, PerceptualHashes};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn gradient_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 96])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    /// Same pixels, different file bytes.
    fn with_comment(jpeg: &[u8], text: &str) -> Vec<u8> {
        let len = (text.len() + 2) as u16;
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xFE]);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(text.as_bytes());
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    fn store(db: &Database, title: &str, media: Vec<u8>, width: u32) -> String {
        let d = digest(&media);
        let thumbnail = crate::scanner::Thumbnail {
            jpeg: vec![0xFF, 0xD8],
            width,
            height: width / 2,
            checksum: "00".into(),
        };
        db.store(&StoreRequest {
            picture: Some(NewPicture {
                md5: d.md5.clone(),
                sha256: d.sha256,
                title: title.to_string(),
                directory: "/photos".into(),
                mime_type: "image/jpeg".into(),
                media,
                fill: true,
                thumbnail: Some(thumbnail),
                exif: None,
                option: StorageOption::SqlStore,
            }),
            location: Location {
                md5: d.md5.clone(),
                host: "host".into(),
                directory: "/photos".into(),
                basename: title.to_string(),
            },
            album: None,
        })
        .unwrap();
        d.md5
    }

    fn live(db: &Database, md5s: &[&str]) -> usize {
        md5s.iter()
            .filter(|m| !db.picture(m).unwrap().unwrap().mark_delete)
            .count()
    }

    #[test]
    fn test_identical_pixels_collapse_to_one() {
        let db = Database::open_in_memory().unwrap();
        let jpeg = gradient_jpeg(64, 48);
        let a = store(&db, "a.jpg", with_comment(&jpeg, "first"), 200);
        let b = store(&db, "b.jpg", with_comment(&jpeg, "second camera"), 200);
        assert_ne!(a, b);

        let report = index(&db, &IndexOptions::default()).unwrap();
        assert_eq!(report.hashed, 2);
        assert_eq!(report.failed, 0);

        let groups = db.top_hash_groups(HashKind::Perception, 2, 20).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 2);

        let options = ResolveOptions {
            commit: true,
            ..ResolveOptions::default()
        };
        let report = resolve(&db, &options).unwrap();
        assert_eq!(report.groups, 1);
        assert_eq!(report.marked, 1);
        assert_eq!(live(&db, &[&a, &b]), 1);
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let jpeg = gradient_jpeg(64, 48);
        let a = store(&db, "a.jpg", with_comment(&jpeg, "one"), 200);
        let b = store(&db, "b.jpg", with_comment(&jpeg, "two"), 100);
        db.add_tag(&b, "holiday").unwrap();
        index(&db, &IndexOptions::default()).unwrap();

        let report = resolve(&db, &ResolveOptions::default()).unwrap();
        assert!(!report.committed);
        assert_eq!(report.marked, 1);
        assert_eq!(live(&db, &[&a, &b]), 2);
        assert!(db.tags(&a).unwrap().is_empty());
        assert_eq!(db.tags(&b).unwrap(), vec!["holiday".to_string()]);
    }

    #[test]
    fn test_pinned_picture_survives_wider_sibling() {
        let db = Database::open_in_memory().unwrap();
        let jpeg = gradient_jpeg(64, 48);
        let pinned = store(&db, "pinned.jpg", with_comment(&jpeg, "pinned"), 100);
        let wide = store(&db, "wide.jpg", with_comment(&jpeg, "wide"), 200);
        db.add_tag(&pinned, CANONICAL_TAG).unwrap();
        db.add_tag(&pinned, "family").unwrap();
        db.add_tag(&wide, "beach").unwrap();
        index(&db, &IndexOptions::default()).unwrap();

        let options = ResolveOptions {
            commit: true,
            ..ResolveOptions::default()
        };
        resolve(&db, &options).unwrap();

        assert!(!db.picture(&pinned).unwrap().unwrap().mark_delete);
        assert!(db.picture(&wide).unwrap().unwrap().mark_delete);
        let mut tags = db.tags(&pinned).unwrap();
        tags.sort();
        assert_eq!(tags, vec!["beach", "bitgarten", "family"]);
        assert!(db.tags(&wide).unwrap().is_empty());
    }

    #[test]
    fn test_tag_with_comma_moves_intact() {
        let db = Database::open_in_memory().unwrap();
        let jpeg = gradient_jpeg(64, 48);
        let wide = store(&db, "wide.jpg", with_comment(&jpeg, "wide"), 200);
        let narrow = store(&db, "narrow.jpg", with_comment(&jpeg, "narrow"), 100);
        db.add_tag(&narrow, "Paris, France").unwrap();
        db.add_tag(&narrow, "it's 'quoted'").unwrap();
        index(&db, &IndexOptions::default()).unwrap();

        let options = ResolveOptions {
            commit: true,
            ..ResolveOptions::default()
        };
        let report = resolve(&db, &options).unwrap();
        assert_eq!(report.tags_added, 2);

        let mut tags = db.tags(&wide).unwrap();
        tags.sort();
        assert_eq!(tags, vec!["Paris, France", "it's 'quoted'"]);
        assert!(db.picture(&narrow).unwrap().unwrap().mark_delete);
    }

    #[test]
    fn test_fully_pinned_groups_leave_room_for_others() {
        let db = Database::open_in_memory().unwrap();
        let grouped = |title: &str, hash: u64| {
            let md5 = store(&db, title, title.as_bytes().to_vec(), 200);
            let hashes = PerceptualHashes {
                average: hash,
                perception: hash,
                difference: hash,
            };
            db.upsert_hash(&md5, HashKind::Perception, &hashes).unwrap();
            md5
        };

        let mut pinned = Vec::new();
        for group in 0..3u64 {
            for member in 0..3 {
                let md5 = grouped(&format!("pinned-{}-{}.jpg", group, member), 100 + group);
                db.add_tag(&md5, CANONICAL_TAG).unwrap();
                pinned.push(md5);
            }
        }
        let a = grouped("a.jpg", 500);
        let b = grouped("b.jpg", 500);

        let groups = db.top_hash_groups(HashKind::Perception, 2, 1).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!((groups[0].hash, groups[0].count), (500, 2));

        let options = ResolveOptions {
            commit: true,
            top: 1,
            ..ResolveOptions::default()
        };
        let report = resolve(&db, &options).unwrap();
        assert_eq!((report.groups, report.marked), (1, 1));
        assert_eq!(live(&db, &[&a, &b]), 1);
        let pinned: Vec<&str> = pinned.iter().map(String::as_str).collect();
        assert_eq!(live(&db, &pinned), 9);

        // Nothing left that could lose a member.
        assert!(db.top_hash_groups(HashKind::Perception, 2, 20).unwrap().is_empty());
    }

    #[test]
    fn test_untagged_alias_marked() {
        let db = Database::open_in_memory().unwrap();
        let jpeg = gradient_jpeg(64, 48);
        let original = store(&db, "IMG_0001.heic", with_comment(&jpeg, "orig"), 200);
        let alias = store(&db, "IMG_0001_1_105_c.jpeg", with_comment(&jpeg, "alias"), 100);
        let tagged = store(&db, "IMG_0001_4_5005_c.jpeg", with_comment(&jpeg, "kept"), 50);
        db.add_tag(&tagged, "album").unwrap();
        index(&db, &IndexOptions::default()).unwrap();

        let marked = resolve_aliases(&db, HashKind::Perception, true).unwrap();
        assert_eq!(marked, 1);
        assert!(!db.picture(&original).unwrap().unwrap().mark_delete);
        assert!(db.picture(&alias).unwrap().unwrap().mark_delete);
        assert!(!db.picture(&tagged).unwrap().unwrap().mark_delete);
    }

    #[test]
    fn test_wavelet_rejected() {
        let db = Database::open_in_memory().unwrap();
        let options = ResolveOptions {
            kind: HashKind::Wavelet,
            ..ResolveOptions::default()
        };
        assert!(matches!(
            resolve(&db, &options),
            Err(crate::error::Error::Unimplemented(_))
        ));
        let options = IndexOptions {
            kinds: vec![HashKind::Wavelet],
            ..IndexOptions::default()
        };
        assert!(index(&db, &options).is_err());
    }
}
