//! Detect module - exact and perceptual duplicate grouping
//!
//! Exact mode partitions by (size, optional dates, full hash). Perceptual
//! mode clusters the "similar enough" relation with union-find, using a
//! BK-tree candidate index once the input outgrows brute force.

pub mod bktree;

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::{DuplicateGroup, FileEntry, GroupKind};
use bktree::{hamming, BkTree};

/// Weights of the structural and chrominance channels in image similarity.
const W_STRUCT: f64 = 0.7;
const W_CHROMA: f64 = 0.3;

/// Above this many candidates the BK-tree index replaces pairwise search.
const INDEX_THRESHOLD: usize = 1_000;

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

/// Similarity percentage of two single 64-bit hashes.
pub fn hash_similarity(a: u64, b: u64) -> f64 {
    100.0 * (1.0 - hamming(a, b) as f64 / 64.0)
}

/// Weighted similarity percentage of two images combining structural and
/// chrominance Hamming distances.
pub fn image_similarity(a_structural: u64, a_chroma: u64, b_structural: u64, b_chroma: u64) -> f64 {
    let hs = hamming(a_structural, b_structural) as f64;
    let hc = hamming(a_chroma, b_chroma) as f64;
    100.0 * (1.0 - (W_STRUCT * hs + W_CHROMA * hc) / (64.0 * (W_STRUCT + W_CHROMA)))
}

// ---------------------------------------------------------------------------
// Keeper selection
// ---------------------------------------------------------------------------

/// How the suggested keeper (first member) of a group is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeepStrategy {
    /// Keep the most recently modified file.
    #[default]
    Newest,
    /// Keep the oldest file (likely the original).
    Oldest,
    /// Keep the highest-resolution file (media only).
    HighestResolution,
    /// Keep the file whose name looks cleanest (no copy/backup suffixes).
    CleanestName,
}

/// Returns true if the filename looks like a copy or backup.
fn is_copy_name(entry: &FileEntry) -> bool {
    let lower = entry.name().to_lowercase();
    lower.contains(" - copy")
        || lower.contains("_copy")
        || lower.contains("_backup")
        || lower.contains("(1)")
        || lower.contains("(2)")
        || lower.contains("(3)")
        || lower.ends_with("~")
        || lower.ends_with(".bak")
}

fn keeper_score(entry: &FileEntry, strategy: KeepStrategy) -> i64 {
    let mut score = match strategy {
        KeepStrategy::Newest => entry.modified.map(|d| d.timestamp()).unwrap_or(0),
        KeepStrategy::Oldest => -entry.modified.map(|d| d.timestamp()).unwrap_or(i64::MAX),
        KeepStrategy::HighestResolution => entry.pixel_count().unwrap_or(0) as i64,
        KeepStrategy::CleanestName => 0,
    };
    // Non-copy names win ties under every strategy.
    if !is_copy_name(entry) {
        score += if strategy == KeepStrategy::CleanestName {
            1_000_000
        } else {
            1
        };
    }
    score
}

/// Order members keeper-first, deterministically (score, then path).
fn order_members(mut members: Vec<FileEntry>, strategy: KeepStrategy) -> Vec<FileEntry> {
    members.sort_by(|a, b| {
        keeper_score(b, strategy)
            .cmp(&keeper_score(a, strategy))
            .then_with(|| a.path.cmp(&b.path))
    });
    members
}

// ---------------------------------------------------------------------------
// Exact mode
// ---------------------------------------------------------------------------

/// Options shared by both detection modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectOptions {
    pub match_created_date: bool,
    pub match_modified_date: bool,
    pub keep: KeepStrategy,
}

type ExactKey = (u64, Option<NaiveDate>, Option<NaiveDate>, String);

/// Group entries whose full hash (and size, and configured dates) agree.
/// Entries without a full hash are ignored.
pub fn find_exact_groups(entries: Vec<FileEntry>, options: &DetectOptions) -> Vec<DuplicateGroup> {
    let mut partitions: HashMap<ExactKey, Vec<FileEntry>> = HashMap::new();

    for entry in entries {
        let Some(hash) = entry.full_hash.clone() else {
            continue;
        };
        let key = (
            entry.size,
            options.match_created_date.then(|| entry.created_day()).flatten(),
            options
                .match_modified_date
                .then(|| entry.modified_day())
                .flatten(),
            hash,
        );
        partitions.entry(key).or_default().push(entry);
    }

    collect_groups(partitions.into_values(), GroupKind::ExactMatch, 100, options)
}

type EquivalenceKey = (u64, Option<NaiveDate>, Option<NaiveDate>, Option<(u32, u32)>);

/// Degenerate exact grouping used when hash comparison is disabled: the
/// configured equivalence set (size, dates, resolution) is all we have.
pub fn find_equivalence_groups(
    entries: Vec<FileEntry>,
    options: &DetectOptions,
    use_resolution: bool,
) -> Vec<DuplicateGroup> {
    let mut partitions: HashMap<EquivalenceKey, Vec<FileEntry>> = HashMap::new();

    for entry in entries {
        let key = (
            entry.size,
            options.match_created_date.then(|| entry.created_day()).flatten(),
            options
                .match_modified_date
                .then(|| entry.modified_day())
                .flatten(),
            use_resolution
                .then(|| entry.width.zip(entry.height))
                .flatten(),
        );
        partitions.entry(key).or_default().push(entry);
    }

    collect_groups(partitions.into_values(), GroupKind::ExactMatch, 100, options)
}

fn collect_groups<I>(
    partitions: I,
    kind: GroupKind,
    similarity: u8,
    options: &DetectOptions,
) -> Vec<DuplicateGroup>
where
    I: IntoIterator<Item = Vec<FileEntry>>,
{
    let mut groups: Vec<DuplicateGroup> = partitions
        .into_iter()
        .filter(|members| members.len() >= 2)
        .map(|members| {
            DuplicateGroup::new(kind, similarity, order_members(members, options.keep))
        })
        .collect();

    groups.sort_by(|a, b| b.potential_savings().cmp(&a.potential_savings()));
    groups
}

// ---------------------------------------------------------------------------
// Perceptual mode
// ---------------------------------------------------------------------------

/// Which descriptor family the perceptual pass compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerceptualKind {
    Image,
    Video,
    Audio,
}

impl PerceptualKind {
    fn group_kind(self) -> GroupKind {
        match self {
            PerceptualKind::Image => GroupKind::SimilarImage,
            PerceptualKind::Video => GroupKind::SimilarVideo,
            PerceptualKind::Audio => GroupKind::SimilarAudio,
        }
    }

    /// Primary (indexable) hash of an entry, when present.
    fn primary_hash(self, entry: &FileEntry) -> Option<u64> {
        match self {
            PerceptualKind::Image | PerceptualKind::Video => entry.perceptual_hash,
            PerceptualKind::Audio => entry.audio_fingerprint,
        }
    }

    fn similarity(self, a: &FileEntry, b: &FileEntry) -> Option<f64> {
        match self {
            PerceptualKind::Image => Some(image_similarity(
                a.perceptual_hash?,
                a.color_hash?,
                b.perceptual_hash?,
                b.color_hash?,
            )),
            PerceptualKind::Video => Some(hash_similarity(a.perceptual_hash?, b.perceptual_hash?)),
            PerceptualKind::Audio => {
                Some(hash_similarity(a.audio_fingerprint?, b.audio_fingerprint?))
            }
        }
    }

    /// Loosest primary-hash distance any pair within `threshold` can have.
    /// For images the chrominance distance may be zero, so the structural
    /// budget stretches by 1/w_s.
    fn search_radius(self, threshold: u8) -> u32 {
        let budget = 64.0 * (1.0 - threshold as f64 / 100.0);
        let radius = match self {
            PerceptualKind::Image => budget * (W_STRUCT + W_CHROMA) / W_STRUCT,
            PerceptualKind::Video | PerceptualKind::Audio => budget,
        };
        (radius.floor() as u32).min(64)
    }
}

/// Union-find with path compression for similarity clustering.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

/// Cluster entries whose pairwise similarity meets the threshold.
///
/// A group's reported similarity is the minimum pairwise similarity within
/// it (conservative). Entries missing the needed descriptors are ignored.
pub fn find_perceptual_groups(
    entries: Vec<FileEntry>,
    kind: PerceptualKind,
    threshold: u8,
    options: &DetectOptions,
) -> Vec<DuplicateGroup> {
    let candidates: Vec<FileEntry> = entries
        .into_iter()
        .filter(|e| kind.primary_hash(e).is_some())
        .filter(|e| kind != PerceptualKind::Image || e.color_hash.is_some())
        .collect();

    if candidates.len() < 2 {
        return Vec::new();
    }

    let threshold_f = threshold as f64;
    let mut uf = UnionFind::new(candidates.len());

    if candidates.len() > INDEX_THRESHOLD {
        // Indexed path: BK-tree prefilter on the primary hash, exact
        // similarity verification per candidate pair.
        let mut tree = BkTree::new();
        for (i, entry) in candidates.iter().enumerate() {
            tree.insert(kind.primary_hash(entry).unwrap_or(0), i);
        }

        let radius = kind.search_radius(threshold);
        for (i, entry) in candidates.iter().enumerate() {
            let hash = kind.primary_hash(entry).unwrap_or(0);
            for (j, _) in tree.find_within(hash, radius) {
                if j <= i {
                    continue;
                }
                if let Some(sim) = kind.similarity(entry, &candidates[j]) {
                    if sim >= threshold_f {
                        uf.union(i, j);
                    }
                }
            }
        }
    } else {
        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                if let Some(sim) = kind.similarity(&candidates[i], &candidates[j]) {
                    if sim >= threshold_f {
                        uf.union(i, j);
                    }
                }
            }
        }
    }

    let mut clusters: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..candidates.len() {
        let root = uf.find(i);
        clusters.entry(root).or_default().push(i);
    }

    let mut groups = Vec::new();
    for indices in clusters.into_values() {
        if indices.len() < 2 {
            continue;
        }

        // Conservative group similarity: the worst pair in the cluster.
        let mut min_sim = 100.0f64;
        for (a, &i) in indices.iter().enumerate() {
            for &j in &indices[a + 1..] {
                if let Some(sim) = kind.similarity(&candidates[i], &candidates[j]) {
                    min_sim = min_sim.min(sim);
                }
            }
        }

        let members: Vec<FileEntry> = indices.iter().map(|&i| candidates[i].clone()).collect();
        groups.push(DuplicateGroup::new(
            kind.group_kind(),
            min_sim.clamp(0.0, 100.0) as u8,
            order_members(members, options.keep),
        ));
    }

    groups.sort_by(|a, b| b.potential_savings().cmp(&a.potential_savings()));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MediaKind;
    use std::path::PathBuf;

    fn entry(path: &str, size: u64) -> FileEntry {
        FileEntry {
            path: PathBuf::from(path),
            size,
            kind: MediaKind::Other,
            extension: String::new(),
            created: None,
            modified: None,
            width: None,
            height: None,
            quick_hash: None,
            full_hash: None,
            perceptual_hash: None,
            color_hash: None,
            audio_fingerprint: None,
            thumbnail: None,
            thumbnail_cached: false,
        }
    }

    fn hashed(path: &str, size: u64, hash: &str) -> FileEntry {
        FileEntry {
            full_hash: Some(hash.to_string()),
            ..entry(path, size)
        }
    }

    fn image(path: &str, structural: u64, chroma: u64) -> FileEntry {
        FileEntry {
            kind: MediaKind::Image,
            perceptual_hash: Some(structural),
            color_hash: Some(chroma),
            ..entry(path, 100)
        }
    }

    #[test]
    fn test_similarity_formulas() {
        assert_eq!(hash_similarity(0, 0), 100.0);
        assert_eq!(hash_similarity(u64::MAX, 0), 0.0);
        // 32 differing bits -> 50%
        assert_eq!(hash_similarity(0xFFFF_FFFF, 0), 50.0);

        assert_eq!(image_similarity(0, 0, 0, 0), 100.0);
        // Structural identical, chroma fully different:
        // 100 * (1 - 0.3*64 / 64) = 70
        let sim = image_similarity(0, 0, 0, u64::MAX);
        assert!((sim - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_groups_require_matching_hash_and_size() {
        let entries = vec![
            hashed("/a/x.bin", 10, "h1"),
            hashed("/b/x.bin", 10, "h1"),
            hashed("/c/y.bin", 10, "h2"),
            hashed("/d/z.bin", 20, "h1"), // same hash, different size
        ];

        let groups = find_exact_groups(entries, &DetectOptions::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].file_count(), 2);
        assert_eq!(groups[0].similarity, 100);
        assert_eq!(groups[0].kind, GroupKind::ExactMatch);
    }

    #[test]
    fn test_entries_without_full_hash_are_ignored() {
        let entries = vec![entry("/a", 10), entry("/b", 10)];
        assert!(find_exact_groups(entries, &DetectOptions::default()).is_empty());
    }

    #[test]
    fn test_date_constraint_splits_groups() {
        use chrono::{Duration, Utc};
        let today = Utc::now();
        let last_week = today - Duration::days(7);

        let mut a = hashed("/a", 10, "same");
        let mut b = hashed("/b", 10, "same");
        a.modified = Some(today);
        b.modified = Some(last_week);

        let plain = find_exact_groups(
            vec![a.clone(), b.clone()],
            &DetectOptions::default(),
        );
        assert_eq!(plain.len(), 1);

        let dated = find_exact_groups(
            vec![a, b],
            &DetectOptions {
                match_modified_date: true,
                ..Default::default()
            },
        );
        assert!(dated.is_empty());
    }

    #[test]
    fn test_equivalence_groups_without_hash() {
        let entries = vec![entry("/a", 10), entry("/b", 10), entry("/c", 11)];
        let groups =
            find_equivalence_groups(entries, &DetectOptions::default(), false);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].file_count(), 2);
    }

    #[test]
    fn test_perceptual_groups_similar_images() {
        // b differs from a by one structural bit (sim 98.9); c is far away.
        let entries = vec![
            image("/a.jpg", 0b0000, 0),
            image("/b.jpg", 0b0001, 0),
            image("/c.jpg", u64::MAX, u64::MAX),
        ];

        let groups = find_perceptual_groups(
            entries,
            PerceptualKind::Image,
            90,
            &DetectOptions::default(),
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].file_count(), 2);
        assert_eq!(groups[0].kind, GroupKind::SimilarImage);
        assert!(groups[0].similarity >= 90);
    }

    #[test]
    fn test_threshold_100_only_groups_exact_perceptual_matches() {
        let entries = vec![
            image("/a.jpg", 7, 3),
            image("/b.jpg", 7, 3),
            image("/c.jpg", 7, 2), // one chroma bit off
        ];

        let groups = find_perceptual_groups(
            entries,
            PerceptualKind::Image,
            100,
            &DetectOptions::default(),
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].file_count(), 2);
        assert_eq!(groups[0].similarity, 100);
    }

    #[test]
    fn test_threshold_0_forms_one_cluster() {
        let entries = vec![
            image("/a.jpg", 0, 0),
            image("/b.jpg", u64::MAX, 0),
            image("/c.jpg", 0, u64::MAX),
        ];

        let groups = find_perceptual_groups(
            entries,
            PerceptualKind::Image,
            0,
            &DetectOptions::default(),
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].file_count(), 3);
    }

    #[test]
    fn test_group_similarity_is_min_pairwise() {
        // Chain: a~b close, b~c close, a~c further. Transitive closure puts
        // all three together; reported similarity reflects the worst pair.
        let entries = vec![
            image("/a.jpg", 0b0000_0000, 0),
            image("/b.jpg", 0b0000_1111, 0),
            image("/c.jpg", 0b1111_1111, 0),
        ];

        let groups = find_perceptual_groups(
            entries,
            PerceptualKind::Image,
            90,
            &DetectOptions::default(),
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].file_count(), 3);

        let worst = image_similarity(0b0000_0000, 0, 0b1111_1111, 0);
        assert_eq!(groups[0].similarity, worst as u8);
    }

    #[test]
    fn test_indexed_path_matches_brute_force() {
        // Enough candidates to engage the BK-tree; clusters of 3 around
        // well-separated centers.
        let mut entries = Vec::new();
        for c in 0..400u64 {
            let center = c.wrapping_mul(0x9E37_79B9_7F4A_7C15);
            entries.push(image(&format!("/{}_0.jpg", c), center, 0));
            entries.push(image(&format!("/{}_1.jpg", c), center ^ 1, 0));
            entries.push(image(&format!("/{}_2.jpg", c), center ^ 2, 0));
        }
        assert!(entries.len() > INDEX_THRESHOLD);

        let groups = find_perceptual_groups(
            entries,
            PerceptualKind::Image,
            95,
            &DetectOptions::default(),
        );

        // Every center should produce one group of 3 (some centers may
        // collide by chance; at least all items must be grouped).
        let grouped: usize = groups.iter().map(|g| g.file_count()).sum();
        assert_eq!(grouped, 1200);
    }

    #[test]
    fn test_video_uses_structural_only() {
        let mut a = entry("/a.mp4", 10);
        a.perceptual_hash = Some(0);
        let mut b = entry("/b.mp4", 10);
        b.perceptual_hash = Some(0b11); // 2 bits -> 96.9%

        let groups = find_perceptual_groups(
            vec![a, b],
            PerceptualKind::Video,
            95,
            &DetectOptions::default(),
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].kind, GroupKind::SimilarVideo);
    }

    #[test]
    fn test_audio_uses_fingerprint() {
        let mut a = entry("/a.mp3", 10);
        a.audio_fingerprint = Some(42);
        let mut b = entry("/b.mp3", 10);
        b.audio_fingerprint = Some(42);
        let mut c = entry("/c.mp3", 10);
        c.audio_fingerprint = Some(!42);

        let groups = find_perceptual_groups(
            vec![a, b, c],
            PerceptualKind::Audio,
            90,
            &DetectOptions::default(),
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].kind, GroupKind::SimilarAudio);
        assert_eq!(groups[0].file_count(), 2);
    }

    #[test]
    fn test_keeper_ordering_newest_first() {
        use chrono::{Duration, Utc};
        let mut old = hashed("/old.bin", 10, "h");
        old.modified = Some(Utc::now() - Duration::hours(5));
        let mut new = hashed("/new.bin", 10, "h");
        new.modified = Some(Utc::now());

        let groups = find_exact_groups(
            vec![old, new],
            &DetectOptions {
                keep: KeepStrategy::Newest,
                ..Default::default()
            },
        );
        assert_eq!(groups[0].members[0].path, PathBuf::from("/new.bin"));
    }

    #[test]
    fn test_keeper_ordering_cleanest_name() {
        let clean = hashed("/photo.jpg", 10, "h");
        let copy = hashed("/photo - Copy.jpg", 10, "h");

        let groups = find_exact_groups(
            vec![copy, clean],
            &DetectOptions {
                keep: KeepStrategy::CleanestName,
                ..Default::default()
            },
        );
        assert_eq!(groups[0].members[0].path, PathBuf::from("/photo.jpg"));
    }
}
