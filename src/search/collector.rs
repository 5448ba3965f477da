//! Collectors: consumers of matchers that produce result sets.
//!
//! The search driver walks one matcher per segment and feeds each matching
//! document to the collector. Collectors that prune publish a minimum
//! quality (their current heap floor); the driver forwards it to the
//! matcher's `skip_to_quality`, which is the block-max early-termination
//! path.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use ahash::AHashMap;

use crate::error::{Result, SalixError};
use crate::query::matcher::Matcher;
use crate::query::{SearchContext, Term};
use crate::reader::SegmentReader;
use crate::search::facet::{
    sort_key, Categorizer, FacetGroups, FacetKey, SortKey,
};
use crate::search::{Hit, Results, TotalHits};

/// Consumes matched documents, segment by segment.
pub trait Collector: Send {
    /// Point the collector at the next segment.
    fn set_segment(
        &mut self,
        base: u64,
        reader: &SegmentReader,
        ctx: &SearchContext<'_>,
    ) -> Result<()>;

    /// Offer one matching document. The matcher is positioned on it.
    fn collect(&mut self, local_doc: u64, matcher: &mut dyn Matcher) -> Result<()>;

    /// The score a candidate must beat to be collected; 0 disables
    /// pruning.
    fn min_quality(&self) -> f32 {
        0.0
    }

    /// Finish and build the result set.
    fn into_results(self: Box<Self>) -> Result<Results>;
}

#[derive(Debug, Clone, Copy)]
struct ScoredEntry {
    score: f32,
    doc_id: u64,
}

impl PartialEq for ScoredEntry {
    fn eq(&self, other: &Self) -> bool {
        self.doc_id == other.doc_id && self.score == other.score
    }
}

impl Eq for ScoredEntry {}

impl PartialOrd for ScoredEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // The max-heap pops the worst entry: lowest score first, ties by
        // highest document id, making equal-score order deterministic by
        // ascending docnum.
        other
            .score
            .total_cmp(&self.score)
            .then(self.doc_id.cmp(&other.doc_id))
    }
}

/// Keeps the top K documents by score.
pub struct TopDocsCollector {
    limit: usize,
    base: u64,
    heap: BinaryHeap<ScoredEntry>,
    total: u64,
}

impl TopDocsCollector {
    /// Collect the best `limit` documents.
    pub fn new(limit: usize) -> Self {
        TopDocsCollector {
            limit: limit.max(1),
            base: 0,
            heap: BinaryHeap::new(),
            total: 0,
        }
    }
}

impl Collector for TopDocsCollector {
    fn set_segment(
        &mut self,
        base: u64,
        _reader: &SegmentReader,
        _ctx: &SearchContext<'_>,
    ) -> Result<()> {
        self.base = base;
        Ok(())
    }

    fn collect(&mut self, local_doc: u64, matcher: &mut dyn Matcher) -> Result<()> {
        self.total += 1;
        let entry = ScoredEntry {
            score: matcher.score(),
            doc_id: self.base + local_doc,
        };
        if self.heap.len() < self.limit {
            self.heap.push(entry);
        } else if let Some(mut worst) = self.heap.peek_mut() {
            // Documents arrive in ascending id order, so an equal score
            // never displaces: the earlier document wins ties.
            if entry.score > worst.score {
                *worst = entry;
            }
        }
        Ok(())
    }

    fn min_quality(&self) -> f32 {
        if self.heap.len() >= self.limit {
            self.heap.peek().map(|entry| entry.score).unwrap_or(0.0)
        } else {
            0.0
        }
    }

    fn into_results(self: Box<Self>) -> Result<Results> {
        let mut entries: Vec<ScoredEntry> = self.heap.into_vec();
        entries.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.doc_id.cmp(&b.doc_id))
        });
        let hits = entries
            .into_iter()
            .map(|entry| Hit::scored(entry.doc_id, entry.score))
            .collect::<Vec<_>>();
        let scored_len = hits.len();
        Ok(Results {
            hits,
            total: TotalHits::Exact(self.total),
            scored_len,
            ..Results::empty()
        })
    }
}

/// Collects every matching document in order, scored.
pub struct UnlimitedCollector {
    base: u64,
    hits: Vec<Hit>,
}

impl UnlimitedCollector {
    /// Collect everything.
    pub fn new() -> Self {
        UnlimitedCollector {
            base: 0,
            hits: Vec::new(),
        }
    }
}

impl Default for UnlimitedCollector {
    fn default() -> Self {
        UnlimitedCollector::new()
    }
}

impl Collector for UnlimitedCollector {
    fn set_segment(
        &mut self,
        base: u64,
        _reader: &SegmentReader,
        _ctx: &SearchContext<'_>,
    ) -> Result<()> {
        self.base = base;
        Ok(())
    }

    fn collect(&mut self, local_doc: u64, matcher: &mut dyn Matcher) -> Result<()> {
        self.hits
            .push(Hit::scored(self.base + local_doc, matcher.score()));
        Ok(())
    }

    fn into_results(self: Box<Self>) -> Result<Results> {
        let mut hits = self.hits;
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.doc_id.cmp(&b.doc_id))
        });
        let total = hits.len() as u64;
        let scored_len = hits.len();
        Ok(Results {
            hits,
            total: TotalHits::Exact(total),
            scored_len,
            ..Results::empty()
        })
    }
}

/// Counts matches without keeping them.
pub struct CountCollector {
    count: u64,
}

impl CountCollector {
    /// Count matches.
    pub fn new() -> Self {
        CountCollector { count: 0 }
    }

    /// The count so far.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Default for CountCollector {
    fn default() -> Self {
        CountCollector::new()
    }
}

impl Collector for CountCollector {
    fn set_segment(
        &mut self,
        _base: u64,
        _reader: &SegmentReader,
        _ctx: &SearchContext<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn collect(&mut self, _local_doc: u64, _matcher: &mut dyn Matcher) -> Result<()> {
        self.count += 1;
        Ok(())
    }

    fn into_results(self: Box<Self>) -> Result<Results> {
        Ok(Results {
            total: TotalHits::Exact(self.count),
            ..Results::empty()
        })
    }
}

#[derive(Debug)]
struct SortEntry {
    key: SortKey,
    doc_id: u64,
}

impl PartialEq for SortEntry {
    fn eq(&self, other: &Self) -> bool {
        self.doc_id == other.doc_id
    }
}

impl Eq for SortEntry {}

impl PartialOrd for SortEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap pops the worst: the largest key (ties by largest doc).
        self.key
            .cmp(&other.key)
            .then(self.doc_id.cmp(&other.doc_id))
    }
}

/// Keeps the top K documents by a facet sort key.
pub struct SortedCollector {
    categorizers: Vec<Box<dyn Categorizer>>,
    limit: Option<usize>,
    reverse: bool,
    base: u64,
    heap: BinaryHeap<SortEntry>,
    total: u64,
}

impl SortedCollector {
    /// Sort by the given categorizer chain; `limit = None` keeps all.
    /// `reverse` flips the final order.
    pub fn new(
        categorizers: Vec<Box<dyn Categorizer>>,
        limit: Option<usize>,
        reverse: bool,
    ) -> Self {
        SortedCollector {
            categorizers,
            limit,
            reverse,
            base: 0,
            heap: BinaryHeap::new(),
            total: 0,
        }
    }
}

impl Collector for SortedCollector {
    fn set_segment(
        &mut self,
        base: u64,
        reader: &SegmentReader,
        ctx: &SearchContext<'_>,
    ) -> Result<()> {
        self.base = base;
        for categorizer in &mut self.categorizers {
            categorizer.set_segment(reader, base, ctx)?;
        }
        Ok(())
    }

    fn collect(&mut self, local_doc: u64, matcher: &mut dyn Matcher) -> Result<()> {
        self.total += 1;
        let score = matcher.score();
        let mut key = sort_key(&mut self.categorizers, local_doc, score)?;
        if self.reverse {
            for part in &mut key.parts {
                part.1 = !part.1;
            }
        }
        let entry = SortEntry {
            key,
            doc_id: self.base + local_doc,
        };
        match self.limit {
            Some(limit) if self.heap.len() >= limit => {
                if let Some(mut worst) = self.heap.peek_mut() {
                    if entry < *worst {
                        *worst = entry;
                    }
                }
            }
            _ => self.heap.push(entry),
        }
        Ok(())
    }

    fn into_results(self: Box<Self>) -> Result<Results> {
        let mut entries = self.heap.into_vec();
        entries.sort();
        let hits = entries
            .into_iter()
            .map(|entry| Hit {
                doc_id: entry.doc_id,
                score: 0.0,
                sort_key: Some(entry.key),
                matched_terms: None,
            })
            .collect::<Vec<_>>();
        Ok(Results {
            hits,
            total: TotalHits::Exact(self.total),
            ..Results::empty()
        })
    }
}

/// Wraps another collector, additionally assigning documents to facet
/// groups.
pub struct FacetCollector {
    inner: Box<dyn Collector>,
    facets: Vec<(String, Box<dyn Categorizer>, FacetGroups)>,
    base: u64,
}

impl FacetCollector {
    /// Wrap `inner` with named facet groupings.
    pub fn new(
        inner: Box<dyn Collector>,
        facets: Vec<(String, Box<dyn Categorizer>, FacetGroups)>,
    ) -> Self {
        FacetCollector {
            inner,
            facets,
            base: 0,
        }
    }
}

impl Collector for FacetCollector {
    fn set_segment(
        &mut self,
        base: u64,
        reader: &SegmentReader,
        ctx: &SearchContext<'_>,
    ) -> Result<()> {
        self.base = base;
        for (_, categorizer, _) in &mut self.facets {
            categorizer.set_segment(reader, base, ctx)?;
        }
        self.inner.set_segment(base, reader, ctx)
    }

    fn collect(&mut self, local_doc: u64, matcher: &mut dyn Matcher) -> Result<()> {
        let score = matcher.score();
        let mut keys = Vec::with_capacity(1);
        for (_, categorizer, groups) in &mut self.facets {
            keys.clear();
            categorizer.keys(local_doc, score, &mut keys)?;
            for key in keys.drain(..) {
                groups.add(key, self.base + local_doc, score);
            }
        }
        self.inner.collect(local_doc, matcher)
    }

    fn min_quality(&self) -> f32 {
        // Grouping observes every match, so pruning must stay off.
        0.0
    }

    fn into_results(self: Box<Self>) -> Result<Results> {
        let mut results = self.inner.into_results()?;
        for (name, _, groups) in self.facets {
            results.groups.insert(name, groups);
        }
        Ok(results)
    }
}

enum CollapseOrder {
    Score,
    Key(Vec<Box<dyn Categorizer>>),
}

struct CollapseEntry {
    doc_id: u64,
    score: f32,
    collapse_key: FacetKey,
    sort: Option<SortKey>,
}

/// For each collapse key, keeps at most N best documents; the rest are
/// removed and tallied.
pub struct CollapseCollector {
    collapse: Box<dyn Categorizer>,
    order: CollapseOrder,
    per_key_limit: usize,
    limit: Option<usize>,
    entries: Vec<CollapseEntry>,
    base: u64,
    total: u64,
}

impl CollapseCollector {
    /// Collapse on `collapse`, ordering by score.
    pub fn by_score(
        collapse: Box<dyn Categorizer>,
        per_key_limit: usize,
        limit: Option<usize>,
    ) -> Self {
        CollapseCollector {
            collapse,
            order: CollapseOrder::Score,
            per_key_limit: per_key_limit.max(1),
            limit,
            entries: Vec::new(),
            base: 0,
            total: 0,
        }
    }

    /// Collapse on `collapse`, ordering by a sort-key chain.
    pub fn by_key(
        collapse: Box<dyn Categorizer>,
        order: Vec<Box<dyn Categorizer>>,
        per_key_limit: usize,
        limit: Option<usize>,
    ) -> Self {
        CollapseCollector {
            collapse,
            order: CollapseOrder::Key(order),
            per_key_limit: per_key_limit.max(1),
            limit,
            entries: Vec::new(),
            base: 0,
            total: 0,
        }
    }
}

impl Collector for CollapseCollector {
    fn set_segment(
        &mut self,
        base: u64,
        reader: &SegmentReader,
        ctx: &SearchContext<'_>,
    ) -> Result<()> {
        self.base = base;
        self.collapse.set_segment(reader, base, ctx)?;
        if let CollapseOrder::Key(categorizers) = &mut self.order {
            for categorizer in categorizers {
                categorizer.set_segment(reader, base, ctx)?;
            }
        }
        Ok(())
    }

    fn collect(&mut self, local_doc: u64, matcher: &mut dyn Matcher) -> Result<()> {
        self.total += 1;
        let score = matcher.score();
        let mut keys = Vec::with_capacity(1);
        self.collapse.keys(local_doc, score, &mut keys)?;
        let collapse_key = keys.into_iter().next().unwrap_or(FacetKey::Missing);
        let sort = match &mut self.order {
            CollapseOrder::Score => None,
            CollapseOrder::Key(categorizers) => {
                Some(sort_key(categorizers, local_doc, score)?)
            }
        };
        self.entries.push(CollapseEntry {
            doc_id: self.base + local_doc,
            score,
            collapse_key,
            sort,
        });
        Ok(())
    }

    fn into_results(self: Box<Self>) -> Result<Results> {
        let mut entries = self.entries;
        match self.order {
            CollapseOrder::Score => entries.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then(a.doc_id.cmp(&b.doc_id))
            }),
            CollapseOrder::Key(_) => entries.sort_by(|a, b| {
                a.sort
                    .as_ref()
                    .expect("sort key present")
                    .cmp(b.sort.as_ref().expect("sort key present"))
                    .then(a.doc_id.cmp(&b.doc_id))
            }),
        }

        let mut kept_per_key: AHashMap<FacetKey, usize> = AHashMap::new();
        let mut collapsed: AHashMap<FacetKey, usize> = AHashMap::new();
        let mut hits = Vec::new();
        for entry in entries {
            let kept = kept_per_key.entry(entry.collapse_key.clone()).or_insert(0);
            if *kept < self.per_key_limit {
                *kept += 1;
                hits.push(Hit {
                    doc_id: entry.doc_id,
                    score: entry.score,
                    sort_key: entry.sort,
                    matched_terms: None,
                });
            } else {
                *collapsed.entry(entry.collapse_key).or_insert(0) += 1;
            }
        }
        if let Some(limit) = self.limit {
            hits.truncate(limit);
        }
        let scored_len = hits.len();
        Ok(Results {
            hits,
            total: TotalHits::Exact(self.total),
            scored_len,
            collapsed_counts: {
                let mut counts: Vec<(FacetKey, usize)> = collapsed.into_iter().collect();
                counts.sort();
                counts
            },
            ..Results::empty()
        })
    }
}

/// Wraps a collector, recording which query terms matched each hit.
pub struct TermsCollector {
    inner: Box<dyn Collector>,
    base: u64,
    terms: AHashMap<u64, Vec<Term>>,
}

impl TermsCollector {
    /// Wrap `inner`.
    pub fn new(inner: Box<dyn Collector>) -> Self {
        TermsCollector {
            inner,
            base: 0,
            terms: AHashMap::new(),
        }
    }
}

impl Collector for TermsCollector {
    fn set_segment(
        &mut self,
        base: u64,
        reader: &SegmentReader,
        ctx: &SearchContext<'_>,
    ) -> Result<()> {
        self.base = base;
        self.inner.set_segment(base, reader, ctx)
    }

    fn collect(&mut self, local_doc: u64, matcher: &mut dyn Matcher) -> Result<()> {
        let mut matched = Vec::new();
        matcher.matching_terms(local_doc, &mut matched);
        matched.sort();
        matched.dedup();
        self.terms.insert(self.base + local_doc, matched);
        self.inner.collect(local_doc, matcher)
    }

    fn min_quality(&self) -> f32 {
        self.inner.min_quality()
    }

    fn into_results(self: Box<Self>) -> Result<Results> {
        let mut results = self.inner.into_results()?;
        let mut terms = self.terms;
        for hit in &mut results.hits {
            hit.matched_terms = terms.remove(&hit.doc_id);
        }
        Ok(results)
    }
}

/// Wraps a collector with a deadline on a monotonic clock. Collection
/// past the deadline fails with `TimeLimit`; the results collected so far
/// remain retrievable.
pub struct TimeLimitCollector {
    inner: Box<dyn Collector>,
    deadline: Instant,
}

impl TimeLimitCollector {
    /// Enforce `deadline` on `inner`.
    pub fn new(inner: Box<dyn Collector>, deadline: Instant) -> Self {
        TimeLimitCollector { inner, deadline }
    }
}

impl Collector for TimeLimitCollector {
    fn set_segment(
        &mut self,
        base: u64,
        reader: &SegmentReader,
        ctx: &SearchContext<'_>,
    ) -> Result<()> {
        self.inner.set_segment(base, reader, ctx)
    }

    fn collect(&mut self, local_doc: u64, matcher: &mut dyn Matcher) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(SalixError::TimeLimit);
        }
        self.inner.collect(local_doc, matcher)
    }

    fn min_quality(&self) -> f32 {
        self.inner.min_quality()
    }

    fn into_results(self: Box<Self>) -> Result<Results> {
        self.inner.into_results()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scored_entry_ordering() {
        let worse = ScoredEntry {
            score: 1.0,
            doc_id: 5,
        };
        let better = ScoredEntry {
            score: 2.0,
            doc_id: 9,
        };
        // Max-heap pops the worst.
        assert!(worse > better);

        // Equal scores: the later document is worse.
        let early = ScoredEntry {
            score: 1.0,
            doc_id: 3,
        };
        assert!(worse > early);
    }

    #[test]
    fn test_top_docs_heap_behavior() {
        let mut heap = BinaryHeap::new();
        for (score, doc_id) in [(1.0f32, 0u64), (3.0, 1), (2.0, 2)] {
            heap.push(ScoredEntry { score, doc_id });
        }
        // The worst (lowest score) pops first.
        assert_eq!(heap.pop().unwrap().doc_id, 0);
        assert_eq!(heap.pop().unwrap().doc_id, 2);
        assert_eq!(heap.pop().unwrap().doc_id, 1);
    }
}
