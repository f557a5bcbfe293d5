//! Near-duplicate resolution over perceptual-hash groups.
//!
//! Each group keeps one canonical picture. The canonical receives the union
//! of the group's tags; every other member loses its tags and is marked
//! deleted. A group is written in one transaction, rolled back on dry runs.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::db::{Database, GroupMember, ResolutionPlan};
use crate::error::Result;
use crate::scanner::HashKind;

pub use crate::db::CANONICAL_TAG;

/// Title suffixes of derived copies produced by photo apps for HEIC originals.
pub const ALIAS_SUFFIXES: [&str; 3] = ["_4_5005_c.jpeg", "_1_105_c.jpeg", "_1_201_a.heic"];

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub kind: HashKind,
    /// Smallest group considered.
    pub min_count: i64,
    /// Largest groups first, at most this many.
    pub top: i64,
    pub commit: bool,
    /// Also run the HEIC alias pass.
    pub aliases: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            kind: HashKind::Perception,
            min_count: 2,
            top: 20,
            commit: false,
            aliases: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolveReport {
    pub groups: u64,
    pub marked: u64,
    pub tags_added: u64,
    pub tags_removed: u64,
    pub aliases_marked: u64,
    pub committed: bool,
    /// The all-zero hash was reached and the pass stopped.
    pub sentinel: bool,
}

/// Larger thumbnail width first, then larger media.
fn rank(a: &GroupMember, b: &GroupMember) -> Ordering {
    b.width
        .cmp(&a.width)
        .then_with(|| b.media_size.cmp(&a.media_size))
}

fn outranks(a: &GroupMember, b: &GroupMember) -> bool {
    rank(a, b) == Ordering::Less
}

/// Pick the canonical member of a group and schedule the rest.
///
/// Members are ranked widest first. A `bitgarten`-tagged member always wins
/// (the widest of them when several); otherwise the widest HEIC member;
/// otherwise the widest member. Other tagged-`bitgarten` members are kept.
pub fn plan_group(members: &[GroupMember]) -> Option<ResolutionPlan> {
    if members.len() < 2 {
        return None;
    }
    let mut ranked: Vec<&GroupMember> = members.iter().collect();
    ranked.sort_by(|a, b| rank(a, b));

    let canonical = ranked
        .iter()
        .find(|m| m.has_tag(CANONICAL_TAG))
        .or_else(|| ranked.iter().find(|m| m.is_heic()))
        .or_else(|| ranked.first())
        .copied()?;

    let union: BTreeSet<&str> = members
        .iter()
        .flat_map(|m| m.tags.iter().map(String::as_str))
        .filter(|t| *t != CANONICAL_TAG)
        .collect();
    let add_tags = union
        .into_iter()
        .filter(|t| !canonical.has_tag(t))
        .map(str::to_string)
        .collect();

    let delete = ranked
        .iter()
        .filter(|m| m.md5 != canonical.md5 && !m.has_tag(CANONICAL_TAG))
        .map(|m| m.md5.clone())
        .collect();

    Some(ResolutionPlan {
        canonical: canonical.md5.clone(),
        add_tags,
        delete,
    })
}

/// Resolve the largest hash groups.
pub fn resolve(db: &Database, options: &ResolveOptions) -> Result<ResolveReport> {
    let kind = options.kind.ensure_implemented()?;
    let mut report = ResolveReport {
        committed: options.commit,
        ..ResolveReport::default()
    };

    let groups = db.top_hash_groups(kind, options.min_count.max(2), options.top.max(1))?;
    for group in groups {
        if group.hash == 0 {
            tracing::info!("reached the all-zero hash; stopping");
            report.sentinel = true;
            break;
        }

        let members = db.group_members(kind, group.hash)?;
        let Some(plan) = plan_group(&members) else {
            continue;
        };
        let counts = db.apply_resolution(&plan, options.commit)?;
        tracing::info!(
            hash = %format_args!("{:016x}", group.hash),
            members = members.len(),
            canonical = %plan.canonical,
            marked = counts.marked,
            commit = options.commit,
            "resolved group"
        );

        report.groups += 1;
        report.marked += counts.marked;
        report.tags_added += counts.tags_added;
        report.tags_removed += counts.tags_removed;
    }

    if options.aliases {
        report.aliases_marked = resolve_aliases(db, kind, options.commit)?;
    }
    Ok(report)
}

/// Title of the original an alias was derived from, without extension.
pub fn alias_stem(title: &str) -> Option<&str> {
    ALIAS_SUFFIXES.iter().find_map(|suffix| {
        let split = title.len().checked_sub(suffix.len())?;
        if split == 0 || !title.is_char_boundary(split) {
            return None;
        }
        title[split..]
            .eq_ignore_ascii_case(suffix)
            .then(|| &title[..split])
    })
}

/// Mark untagged aliases deleted when a wider original with the same hash exists.
pub fn resolve_aliases(db: &Database, kind: HashKind, commit: bool) -> Result<u64> {
    let mut marked = 0;
    for suffix in ALIAS_SUFFIXES {
        for alias in db.members_with_title_suffix(kind, suffix)? {
            let Some(stem) = alias_stem(&alias.title) else {
                continue;
            };
            if !alias.tags.is_empty() {
                tracing::debug!(md5 = %alias.md5, title = %alias.title, "tagged alias kept");
                continue;
            }

            let original = db
                .members_with_title_stem(kind, stem)?
                .into_iter()
                .filter(|m| m.md5 != alias.md5 && m.hash == alias.hash && outranks(m, &alias))
                .min_by(rank);
            let Some(original) = original else {
                continue;
            };

            let plan = ResolutionPlan {
                canonical: original.md5.clone(),
                add_tags: Vec::new(),
                delete: vec![alias.md5.clone()],
            };
            let counts = db.apply_resolution(&plan, commit)?;
            tracing::info!(
                alias = %alias.title,
                original = %original.title,
                commit,
                "alias marked"
            );
            marked += counts.marked;
        }
    }
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(md5: &str, mime: &str, width: u32, tags: &[&str]) -> GroupMember {
        GroupMember {
            md5: md5.to_string(),
            title: format!("{}.jpg", md5),
            mime_type: mime.to_string(),
            hash: 42,
            width,
            height: width / 2,
            media_size: 1000,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_single_member_needs_nothing() {
        assert!(plan_group(&[member("A", "image/jpeg", 200, &[])]).is_none());
    }

    #[test]
    fn test_widest_wins() {
        let plan = plan_group(&[
            member("A", "image/jpeg", 100, &["x"]),
            member("B", "image/jpeg", 200, &[]),
        ])
        .unwrap();
        assert_eq!(plan.canonical, "B");
        assert_eq!(plan.delete, vec!["A".to_string()]);
        assert_eq!(plan.add_tags, vec!["x".to_string()]);
    }

    #[test]
    fn test_heic_beats_wider_jpeg() {
        let plan = plan_group(&[
            member("A", "image/jpeg", 200, &[]),
            member("H1", "image/heic", 100, &[]),
            member("H2", "image/heic", 150, &[]),
        ])
        .unwrap();
        assert_eq!(plan.canonical, "H2");
        assert_eq!(plan.delete, vec!["A".to_string(), "H1".to_string()]);
    }

    #[test]
    fn test_bitgarten_tag_pins_canonical() {
        let plan = plan_group(&[
            member("WIDE", "image/jpeg", 200, &["summer"]),
            member("PINNED", "image/jpeg", 100, &["bitgarten", "family"]),
            member("HEIC", "image/heic", 150, &[]),
        ])
        .unwrap();
        assert_eq!(plan.canonical, "PINNED");
        assert_eq!(plan.add_tags, vec!["summer".to_string()]);
        assert_eq!(plan.delete, vec!["WIDE".to_string(), "HEIC".to_string()]);
    }

    #[test]
    fn test_other_pinned_members_survive() {
        let plan = plan_group(&[
            member("P1", "image/jpeg", 200, &["bitgarten"]),
            member("P2", "image/jpeg", 100, &["bitgarten"]),
            member("X", "image/jpeg", 50, &[]),
        ])
        .unwrap();
        assert_eq!(plan.canonical, "P1");
        assert_eq!(plan.delete, vec!["X".to_string()]);
        assert!(plan.add_tags.is_empty());
    }

    #[test]
    fn test_equal_width_prefers_larger_media() {
        let mut small = member("S", "image/jpeg", 200, &[]);
        small.media_size = 10;
        let big = member("B", "image/jpeg", 200, &[]);
        let plan = plan_group(&[small, big]).unwrap();
        assert_eq!(plan.canonical, "B");
    }

    #[test]
    fn test_alias_stem() {
        assert_eq!(alias_stem("IMG_1234_1_105_c.jpeg"), Some("IMG_1234"));
        assert_eq!(alias_stem("IMG_1234_4_5005_c.jpeg"), Some("IMG_1234"));
        assert_eq!(alias_stem("IMG_1234_1_201_a.HEIC"), Some("IMG_1234"));
        assert_eq!(alias_stem("IMG_1234.heic"), None);
        assert_eq!(alias_stem("_1_105_c.jpeg"), None);
    }
}
