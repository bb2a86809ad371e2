//! Weighted stratified sampling by conversation length
//!
//! Conversations are split into four exclusive length buckets. Each bucket's
//! quota is proportional to `size × weight`, so longer conversations are
//! over-represented relative to their raw share. Rounding shortfalls are
//! redistributed one item at a time, highest weight first.

use rand::Rng;
use std::collections::HashSet;

use crate::models::BucketCount;

/// Length bucket by message count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LengthBucket {
    SingleTurn,
    Short,
    Medium,
    Long,
}

impl LengthBucket {
    /// Ascending weight order
    pub const ALL: [LengthBucket; 4] = [
        LengthBucket::SingleTurn,
        LengthBucket::Short,
        LengthBucket::Medium,
        LengthBucket::Long,
    ];

    /// `None` for empty conversations, which must be filtered before bucketing
    pub fn for_message_count(count: usize) -> Option<Self> {
        match count {
            0 => None,
            1 => Some(LengthBucket::SingleTurn),
            2..=5 => Some(LengthBucket::Short),
            6..=10 => Some(LengthBucket::Medium),
            _ => Some(LengthBucket::Long),
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            LengthBucket::SingleTurn => 0.5,
            LengthBucket::Short => 1.0,
            LengthBucket::Medium => 1.5,
            LengthBucket::Long => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LengthBucket::SingleTurn => "single_turn",
            LengthBucket::Short => "short",
            LengthBucket::Medium => "medium",
            LengthBucket::Long => "long",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Sampler output
#[derive(Debug, Clone, PartialEq)]
pub struct StratifiedSample<T> {
    /// Selected items, highest-weight bucket first
    pub items: Vec<(LengthBucket, T)>,
    /// `(available, sampled)` per bucket in ascending weight order
    pub buckets: Vec<BucketCount>,
}

/// Split items into the four buckets, dropping empty conversations.
///
/// Returns the buckets in ascending weight order and the number dropped.
pub fn assign_to_buckets<T>(
    items: Vec<T>,
    message_count: impl Fn(&T) -> usize,
) -> ([Vec<T>; 4], usize) {
    let mut buckets: [Vec<T>; 4] = Default::default();
    let mut dropped = 0;
    for item in items {
        match LengthBucket::for_message_count(message_count(&item)) {
            Some(bucket) => buckets[bucket.index()].push(item),
            None => dropped += 1,
        }
    }
    (buckets, dropped)
}

/// Weighted quota per bucket: `round(size × weight / total_weight × target)`,
/// capped at the bucket size
pub fn compute_quotas(sizes: [usize; 4], target: usize) -> [usize; 4] {
    let weights: Vec<f64> = LengthBucket::ALL
        .iter()
        .map(|b| sizes[b.index()] as f64 * b.weight())
        .collect();
    let total_weight: f64 = weights.iter().sum();

    let mut quotas = [0usize; 4];
    if total_weight <= 0.0 {
        return quotas;
    }
    for bucket in LengthBucket::ALL {
        let i = bucket.index();
        let share = (weights[i] / total_weight * target as f64).round() as usize;
        quotas[i] = share.min(sizes[i]);
    }
    quotas
}

/// Draw one unseen index in `0..size`
fn draw_unseen<R: Rng>(size: usize, seen: &mut HashSet<usize>, rng: &mut R) -> Option<usize> {
    if seen.len() >= size {
        return None;
    }
    loop {
        let candidate = rng.gen_range(0..size);
        if seen.insert(candidate) {
            return Some(candidate);
        }
    }
}

/// Select up to `target` items.
///
/// When there are no more items than `target` every non-empty item is
/// returned in input order and no stratification happens. Otherwise the
/// result holds exactly `min(target, available)` items; if every bucket is
/// exhausted before the quota is met, fewer are returned.
pub fn stratified_sample<T, R: Rng>(
    items: Vec<T>,
    target: usize,
    message_count: impl Fn(&T) -> usize,
    rng: &mut R,
) -> StratifiedSample<T> {
    let non_empty: Vec<T> = items
        .into_iter()
        .filter(|item| message_count(item) > 0)
        .collect();

    if non_empty.len() <= target {
        let mut buckets: Vec<BucketCount> = LengthBucket::ALL
            .iter()
            .map(|b| BucketCount {
                bucket: b.as_str().to_string(),
                available: 0,
                sampled: 0,
            })
            .collect();
        let items = non_empty
            .into_iter()
            .filter_map(|item| {
                let bucket = LengthBucket::for_message_count(message_count(&item))?;
                buckets[bucket.index()].available += 1;
                buckets[bucket.index()].sampled += 1;
                Some((bucket, item))
            })
            .collect();
        return StratifiedSample { items, buckets };
    }

    let (buckets, _) = assign_to_buckets(non_empty, &message_count);
    let sizes = [
        buckets[0].len(),
        buckets[1].len(),
        buckets[2].len(),
        buckets[3].len(),
    ];
    let quotas = compute_quotas(sizes, target);

    let mut seen: [HashSet<usize>; 4] = Default::default();
    for bucket in LengthBucket::ALL {
        let i = bucket.index();
        for _ in 0..quotas[i] {
            if draw_unseen(sizes[i], &mut seen[i], rng).is_none() {
                break;
            }
        }
    }

    // Fill rounding shortfall round-robin, highest weight first
    let mut total: usize = seen.iter().map(|s| s.len()).sum();
    while total < target {
        let mut progressed = false;
        for bucket in LengthBucket::ALL.iter().rev() {
            if total >= target {
                break;
            }
            let i = bucket.index();
            if draw_unseen(sizes[i], &mut seen[i], rng).is_some() {
                total += 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    let mut selected: Vec<(LengthBucket, T)> = Vec::with_capacity(total);
    for (i, bucket_items) in buckets.into_iter().enumerate().rev() {
        let bucket = LengthBucket::ALL[i];
        selected.extend(
            bucket_items
                .into_iter()
                .enumerate()
                .filter(|(index, _)| seen[i].contains(index))
                .map(|(_, item)| (bucket, item)),
        );
    }

    // Rounding can over-allocate; drop from the lowest-weight end
    selected.truncate(target);

    let mut counts: Vec<BucketCount> = LengthBucket::ALL
        .iter()
        .map(|b| BucketCount {
            bucket: b.as_str().to_string(),
            available: sizes[b.index()],
            sampled: 0,
        })
        .collect();
    for (bucket, _) in &selected {
        counts[bucket.index()].sampled += 1;
    }

    StratifiedSample {
        items: selected,
        buckets: counts,
    }
}
