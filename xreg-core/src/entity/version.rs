//! Version/latest-pointer machinery for a Resource's Version collection.
//! Pure decision logic over an abstract `VersionRecord`; storage supplies
//! the concrete rows and performs the actual eviction. Grounded in
//! `xreg-storage/src/postgres/versioning.rs`'s `apply_partitioned_versioning`
//! retention-horizon pattern, adapted from a time horizon to a version-count
//! cap (§4.3).

/// A minimal view of a Version row sufficient to decide latest-selection
/// and cap eviction, independent of the storage layer's row type.
pub trait VersionRecord {
    fn id(&self) -> &str;
    /// Monotonically increasing creation order; need not be wall-clock
    /// time, only a total order consistent with insertion.
    fn seq(&self) -> i64;
}

/// Picks the "latest" version of a Resource.
///
/// If `sticky_id` is `Some` and it names an existing version, that version
/// wins (sticky mode, set via `Resource::set_default`). Otherwise the
/// newest version wins (by `seq`, ties broken by `id` descending so the
/// choice is deterministic).
pub fn select_latest<'a, T: VersionRecord>(versions: &'a [T], sticky_id: Option<&str>) -> Option<&'a T> {
    if let Some(sid) = sticky_id {
        if let Some(found) = versions.iter().find(|v| v.id() == sid) {
            return Some(found);
        }
    }
    versions.iter().max_by(|a, b| a.seq().cmp(&b.seq()).then_with(|| a.id().cmp(b.id())))
}

/// §4.3 version-cap eviction: when `cap > 0` and the number of versions
/// exceeds it, the oldest *non-latest* version is evicted (ties broken by
/// `VersionID` lexicographically, smallest first). Returns `None` when no
/// eviction is due (`cap == 0` means unlimited retention).
pub fn evict_candidate<'a, T: VersionRecord>(versions: &'a [T], cap: u32, latest_id: &str) -> Option<&'a T> {
    if cap == 0 || (versions.len() as u32) <= cap {
        return None;
    }
    versions
        .iter()
        .filter(|v| v.id() != latest_id)
        .min_by(|a, b| a.seq().cmp(&b.seq()).then_with(|| a.id().cmp(b.id())))
}

/// §4.3 `delete_version`: when the deleted version was latest, the newest
/// remaining version becomes latest; `None` if no versions remain (the
/// caller must then delete the Resource itself).
pub fn successor_after_delete<'a, T: VersionRecord>(remaining: &'a [T]) -> Option<&'a T> {
    remaining.iter().max_by(|a, b| a.seq().cmp(&b.seq()).then_with(|| a.id().cmp(b.id())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone)]
    struct V {
        id: &'static str,
        seq: i64,
    }
    impl VersionRecord for V {
        fn id(&self) -> &str {
            self.id
        }
        fn seq(&self) -> i64 {
            self.seq
        }
    }

    #[test]
    fn newest_wins_without_sticky() {
        let versions = vec![V { id: "1", seq: 1 }, V { id: "2", seq: 2 }];
        assert_eq!(select_latest(&versions, None).unwrap().id, "2");
    }

    #[test]
    fn sticky_id_overrides_newest() {
        let versions = vec![V { id: "1", seq: 1 }, V { id: "2", seq: 2 }];
        assert_eq!(select_latest(&versions, Some("1")).unwrap().id, "1");
    }

    #[test]
    fn eviction_below_cap_is_noop() {
        let versions = vec![V { id: "1", seq: 1 }, V { id: "2", seq: 2 }];
        assert!(evict_candidate(&versions, 2, "2").is_none());
    }

    #[test]
    fn eviction_picks_oldest_non_latest() {
        let versions = vec![V { id: "1", seq: 1 }, V { id: "2", seq: 2 }, V { id: "3", seq: 3 }];
        let victim = evict_candidate(&versions, 2, "3").unwrap();
        assert_eq!(victim.id, "1");
    }

    #[test]
    fn eviction_never_picks_the_latest() {
        let versions = vec![V { id: "1", seq: 5 }, V { id: "2", seq: 1 }];
        // "2" is oldest by seq but if it were latest it must be spared.
        let victim = evict_candidate(&versions, 1, "2").unwrap();
        assert_eq!(victim.id, "1");
    }

    #[test]
    fn successor_is_newest_remaining() {
        let remaining = vec![V { id: "1", seq: 1 }, V { id: "2", seq: 2 }];
        assert_eq!(successor_after_delete(&remaining).unwrap().id, "2");
    }
}
