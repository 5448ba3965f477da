//! Merge policies: deciding which segments to merge at commit.

use std::fmt::Debug;

use ahash::AHashMap;

use crate::segment::{SegmentId, SegmentMeta};

/// Selects groups of segments to merge. Returned groups are disjoint;
/// each group merges into one new segment.
pub trait MergePolicy: Send + Sync + Debug {
    /// Choose merge groups over the current segment list.
    fn select_merges(&self, segments: &[SegmentMeta]) -> Vec<Vec<SegmentId>>;
}

/// Never merges.
#[derive(Debug, Clone, Default)]
pub struct NoMergePolicy;

impl MergePolicy for NoMergePolicy {
    fn select_merges(&self, _segments: &[SegmentMeta]) -> Vec<Vec<SegmentId>> {
        Vec::new()
    }
}

/// Tiered merging: segments are bucketed into size tiers; a tier holding
/// more than `max_segments_per_tier` segments merges its smallest
/// members. Segments with a high deletion ratio are merged early to
/// reclaim space.
#[derive(Debug, Clone)]
pub struct TieredMergePolicy {
    /// Segments tolerated per size tier before a merge triggers.
    pub max_segments_per_tier: usize,
    /// Segments merged at once.
    pub segments_per_merge: usize,
    /// Ceiling on a merged segment's size in bytes.
    pub max_merged_segment_bytes: u64,
    /// Deletion ratio beyond which a segment is merged regardless of
    /// tier pressure.
    pub deletion_threshold: f64,
}

impl Default for TieredMergePolicy {
    fn default() -> Self {
        TieredMergePolicy {
            max_segments_per_tier: 4,
            segments_per_merge: 4,
            max_merged_segment_bytes: 512 * 1024 * 1024,
            deletion_threshold: 0.2,
        }
    }
}

impl TieredMergePolicy {
    /// Size tier of a segment: doubling-quadrupling byte buckets.
    fn tier(&self, meta: &SegmentMeta) -> u32 {
        let size = meta.byte_size.max(1024);
        // Each tier covers a 4x size range.
        ((64 - size.leading_zeros() as u64) / 2) as u32
    }
}

impl MergePolicy for TieredMergePolicy {
    fn select_merges(&self, segments: &[SegmentMeta]) -> Vec<Vec<SegmentId>> {
        let mut groups: Vec<Vec<SegmentId>> = Vec::new();
        let mut claimed: Vec<&SegmentId> = Vec::new();

        // High-deletion segments merge first to drop dead documents.
        let mut deleted: Vec<&SegmentMeta> = segments
            .iter()
            .filter(|meta| meta.deletion_ratio() > self.deletion_threshold)
            .collect();
        deleted.sort_by_key(|meta| meta.byte_size);
        if deleted.len() >= 2 {
            let group: Vec<SegmentId> = deleted
                .iter()
                .take(self.segments_per_merge)
                .map(|meta| meta.id.clone())
                .collect();
            claimed.extend(deleted.iter().take(self.segments_per_merge).map(|m| &m.id));
            groups.push(group);
        }

        // Tier pressure.
        let mut tiers: AHashMap<u32, Vec<&SegmentMeta>> = AHashMap::new();
        for meta in segments {
            if claimed.contains(&&meta.id) {
                continue;
            }
            tiers.entry(self.tier(meta)).or_default().push(meta);
        }

        let mut tier_keys: Vec<u32> = tiers.keys().copied().collect();
        tier_keys.sort();
        for tier in tier_keys {
            let members = tiers.get_mut(&tier).expect("tier exists");
            if members.len() <= self.max_segments_per_tier {
                continue;
            }
            members.sort_by_key(|meta| meta.byte_size);
            let group: Vec<&SegmentMeta> = members
                .iter()
                .take(self.segments_per_merge)
                .copied()
                .collect();
            let merged_size: u64 = group.iter().map(|meta| meta.byte_size).sum();
            if group.len() >= 2 && merged_size <= self.max_merged_segment_bytes {
                groups.push(group.iter().map(|meta| meta.id.clone()).collect());
            }
        }

        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, byte_size: u64, max_doc: u64, deleted: u64) -> SegmentMeta {
        let mut meta = SegmentMeta::new(id.to_string(), max_doc);
        meta.byte_size = byte_size;
        meta.deletion_count = deleted;
        meta.doc_count = max_doc - deleted;
        meta
    }

    #[test]
    fn test_no_merge_when_few_segments() {
        let policy = TieredMergePolicy::default();
        let segments = vec![meta("a", 10_000, 100, 0), meta("b", 12_000, 100, 0)];
        assert!(policy.select_merges(&segments).is_empty());
    }

    #[test]
    fn test_tier_pressure_triggers_merge() {
        let policy = TieredMergePolicy {
            max_segments_per_tier: 2,
            segments_per_merge: 3,
            ..Default::default()
        };
        // Four same-tier segments exceed the tier limit of two.
        let segments = vec![
            meta("a", 10_000, 100, 0),
            meta("b", 11_000, 100, 0),
            meta("c", 12_000, 100, 0),
            meta("d", 13_000, 100, 0),
        ];
        let groups = policy.select_merges(&segments);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
        // Smallest first.
        assert_eq!(groups[0][0], "a");
    }

    #[test]
    fn test_deletion_ratio_triggers_merge() {
        let policy = TieredMergePolicy::default();
        let segments = vec![
            meta("a", 10_000, 100, 40),
            meta("b", 1_000_000, 1000, 300),
            meta("c", 12_000, 100, 0),
        ];
        let groups = policy.select_merges(&segments);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].contains(&"a".to_string()));
        assert!(groups[0].contains(&"b".to_string()));
        assert!(!groups[0].contains(&"c".to_string()));
    }

    #[test]
    fn test_groups_are_disjoint() {
        let policy = TieredMergePolicy {
            max_segments_per_tier: 1,
            segments_per_merge: 2,
            ..Default::default()
        };
        let segments = vec![
            meta("a", 10_000, 100, 50),
            meta("b", 11_000, 100, 50),
            meta("c", 12_000, 100, 0),
            meta("d", 13_000, 100, 0),
        ];
        let groups = policy.select_merges(&segments);
        let mut seen = std::collections::HashSet::new();
        for group in &groups {
            for id in group {
                assert!(seen.insert(id.clone()), "segment {id} in two groups");
            }
        }
    }
}
