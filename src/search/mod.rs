//! Searching: the high-level driver from query to results.
//!
//! A [`Searcher`] borrows a reader snapshot and executes queries against
//! it: it builds one matcher tree per segment, feeds matches to a
//! collector stack assembled from the [`SearchRequest`], and applies
//! block-max pruning when the collector publishes a quality floor.

pub mod collector;
pub mod facet;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::analysis::AnalyzerRegistry;
use crate::document::FieldValue;
use crate::error::{Result, SalixError};
use crate::query::matcher::{ExcludeMatcher, FilterMatcher, Matcher};
use crate::query::{matcher_to_bitset, Query, SearchContext, Term, DEFAULT_TERM_CAP};
use crate::reader::MultiReader;
use crate::scoring::{Bm25F, WeightingModel};
use crate::search::collector::{
    CollapseCollector, Collector, CountCollector, FacetCollector, SortedCollector,
    TermsCollector, TimeLimitCollector, TopDocsCollector, UnlimitedCollector,
};
use crate::search::facet::{Facet, FacetGroups, FacetKey, FacetMapKind, SortKey};

/// The total-hits estimate of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalHits {
    /// Every matching document was seen.
    Exact(u64),
    /// Early termination skipped documents; at least this many matched.
    AtLeast(u64),
}

impl TotalHits {
    /// The count, exact or lower bound.
    pub fn value(&self) -> u64 {
        match self {
            TotalHits::Exact(count) | TotalHits::AtLeast(count) => *count,
        }
    }
}

/// One search hit.
#[derive(Debug, Clone)]
pub struct Hit {
    /// Global document number.
    pub doc_id: u64,
    /// Score (0 for unscored sorts).
    pub score: f32,
    /// The sort key, for sorted searches.
    pub sort_key: Option<SortKey>,
    /// The query terms that matched, when requested.
    pub matched_terms: Option<Vec<Term>>,
}

impl Hit {
    fn scored(doc_id: u64, score: f32) -> Self {
        Hit {
            doc_id,
            score,
            sort_key: None,
            matched_terms: None,
        }
    }
}

/// A search's result set.
#[derive(Debug, Clone)]
pub struct Results {
    /// The hits, in rank order.
    pub hits: Vec<Hit>,
    /// Total matching documents (exact or lower bound).
    pub total: TotalHits,
    /// How many hits were scored.
    pub scored_len: usize,
    /// Facet groupings by name.
    pub groups: HashMap<String, FacetGroups>,
    /// Documents removed per collapse key.
    pub collapsed_counts: Vec<(FacetKey, usize)>,
    /// True when a time limit cut the search short.
    pub partial: bool,
}

impl Results {
    pub(crate) fn empty() -> Self {
        Results {
            hits: Vec::new(),
            total: TotalHits::Exact(0),
            scored_len: 0,
            groups: HashMap::new(),
            collapsed_counts: Vec::new(),
            partial: false,
        }
    }

    /// Number of hits returned.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// True when no hits were returned.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// The hit document ids in rank order.
    pub fn doc_ids(&self) -> Vec<u64> {
        self.hits.iter().map(|hit| hit.doc_id).collect()
    }

    /// The groups recorded under a facet name.
    pub fn groups(&self, name: &str) -> Option<&FacetGroups> {
        self.groups.get(name)
    }
}

/// Search parameters beyond the query itself.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Maximum hits to return; `None` collects everything.
    pub limit: Option<usize>,
    /// Sort by a facet instead of by score.
    pub sorted_by: Option<Facet>,
    /// Reverse the final order (sorted searches).
    pub reverse: bool,
    /// Facet groupings to record: `(name, facet, map kind)`.
    pub grouped_by: Vec<(String, Facet, FacetMapKind)>,
    /// Restrict results to documents matching this query.
    pub filter: Option<Query>,
    /// Exclude documents matching this query.
    pub mask: Option<Query>,
    /// Collapse results on a facet key.
    pub collapse: Option<Facet>,
    /// Best documents kept per collapse key.
    pub collapse_limit: usize,
    /// Abort collection after this much wall-clock time.
    pub time_limit: Option<Duration>,
    /// Record which query terms matched each hit.
    pub with_terms: bool,
    /// Count every match exactly (disables early termination).
    pub exact_total: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            limit: Some(10),
            sorted_by: None,
            reverse: false,
            grouped_by: Vec::new(),
            filter: None,
            mask: None,
            collapse: None,
            collapse_limit: 1,
            time_limit: None,
            with_terms: false,
            exact_total: false,
        }
    }
}

impl SearchRequest {
    /// A request returning up to `limit` hits by score.
    pub fn with_limit(limit: usize) -> Self {
        SearchRequest {
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// A request collecting every match.
    pub fn unlimited() -> Self {
        SearchRequest {
            limit: None,
            ..Default::default()
        }
    }
}

/// Executes queries against a reader snapshot.
pub struct Searcher {
    reader: Arc<MultiReader>,
    weighting: Arc<dyn WeightingModel>,
    analyzers: AnalyzerRegistry,
    term_cap: usize,
}

impl Searcher {
    /// A searcher with the default BM25F weighting.
    pub fn new(reader: Arc<MultiReader>, analyzers: AnalyzerRegistry) -> Self {
        Searcher {
            reader,
            weighting: Arc::new(Bm25F::new()),
            analyzers,
            term_cap: DEFAULT_TERM_CAP,
        }
    }

    /// A searcher with a custom weighting model.
    pub fn with_weighting(
        reader: Arc<MultiReader>,
        analyzers: AnalyzerRegistry,
        weighting: Arc<dyn WeightingModel>,
    ) -> Self {
        Searcher {
            reader,
            weighting,
            analyzers,
            term_cap: DEFAULT_TERM_CAP,
        }
    }

    /// Override the expanding-query term cap.
    pub fn set_term_cap(&mut self, cap: usize) {
        self.term_cap = cap;
    }

    /// The underlying reader snapshot.
    pub fn reader(&self) -> &Arc<MultiReader> {
        &self.reader
    }

    fn context(&self) -> SearchContext<'_> {
        SearchContext {
            reader: &self.reader,
            weighting: self.weighting.as_ref(),
            analyzers: &self.analyzers,
            term_cap: self.term_cap,
        }
    }

    /// Execute `query` under `request`.
    pub fn search(&self, query: &Query, request: &SearchRequest) -> Result<Results> {
        let query = query.clone().normalize();
        let ctx = self.context();

        // Assemble the collector stack, innermost first.
        let mut stack: Box<dyn Collector> = if let Some(collapse) = &request.collapse {
            let collapse_cat = collapse.categorizer(&ctx)?;
            match &request.sorted_by {
                Some(facet) => Box::new(CollapseCollector::by_key(
                    collapse_cat,
                    facet::sort_categorizers(facet, &ctx)?,
                    request.collapse_limit,
                    request.limit,
                )),
                None => Box::new(CollapseCollector::by_score(
                    collapse_cat,
                    request.collapse_limit,
                    request.limit,
                )),
            }
        } else if let Some(facet) = &request.sorted_by {
            Box::new(SortedCollector::new(
                facet::sort_categorizers(facet, &ctx)?,
                request.limit,
                request.reverse,
            ))
        } else if let Some(limit) = request.limit {
            Box::new(TopDocsCollector::new(limit))
        } else {
            Box::new(UnlimitedCollector::new())
        };

        if !request.grouped_by.is_empty() {
            let mut facets = Vec::with_capacity(request.grouped_by.len());
            for (name, facet, kind) in &request.grouped_by {
                facets.push((
                    name.clone(),
                    facet.categorizer(&ctx)?,
                    FacetGroups::new(*kind),
                ));
            }
            stack = Box::new(FacetCollector::new(stack, facets));
        }
        if request.with_terms {
            stack = Box::new(TermsCollector::new(stack));
        }
        if let Some(limit) = request.time_limit {
            stack = Box::new(TimeLimitCollector::new(stack, Instant::now() + limit));
        }

        let mut pruned = false;
        let mut timed_out = false;

        'segments: for (base, leaf) in self.reader.leaves() {
            stack.set_segment(base, leaf, &ctx)?;

            let mut matcher = query.matcher(leaf, &ctx)?;
            if let Some(filter) = &request.filter {
                let allow = matcher_to_bitset(
                    filter.clone().normalize().matcher(leaf, &ctx)?,
                    leaf.max_doc(),
                )?;
                matcher = Box::new(FilterMatcher::new(matcher, Arc::new(allow))?);
            }
            if let Some(mask) = &request.mask {
                let deny = matcher_to_bitset(
                    mask.clone().normalize().matcher(leaf, &ctx)?,
                    leaf.max_doc(),
                )?;
                matcher = Box::new(ExcludeMatcher::new(matcher, Arc::new(deny))?);
            }

            while !matcher.is_exhausted() {
                let local_doc = matcher.doc_id();
                match stack.collect(local_doc, &mut matcher) {
                    Ok(()) => {}
                    Err(SalixError::TimeLimit) => {
                        timed_out = true;
                        break 'segments;
                    }
                    Err(e) => return Err(e),
                }

                let floor = stack.min_quality();
                let advanced = if floor > 0.0
                    && !request.exact_total
                    && matcher.supports_block_quality()
                {
                    pruned = true;
                    matcher.skip_to_quality(floor)?
                } else {
                    matcher.next()?
                };
                if !advanced {
                    break;
                }
            }
        }

        let mut results = stack.into_results()?;
        results.partial = timed_out;
        if pruned || timed_out {
            results.total = TotalHits::AtLeast(results.total.value());
        }
        Ok(results)
    }

    /// Shorthand: top `limit` hits by score.
    pub fn search_top(&self, query: &Query, limit: usize) -> Result<Results> {
        self.search(query, &SearchRequest::with_limit(limit))
    }

    /// The stored fields of one document.
    pub fn document(&self, doc_id: u64) -> Result<HashMap<String, FieldValue>> {
        self.reader.stored_fields(doc_id)
    }

    /// The stored fields of every document matching `query`, in document
    /// order.
    pub fn documents(&self, query: &Query) -> Result<Vec<(u64, HashMap<String, FieldValue>)>> {
        let query = query.clone().normalize();
        let ctx = self.context();
        let mut out = Vec::new();
        for (base, leaf) in self.reader.leaves() {
            let mut matcher = query.matcher(leaf, &ctx)?;
            while !matcher.is_exhausted() {
                let doc_id = matcher.doc_id();
                out.push((base + doc_id, leaf.stored_fields(doc_id)?));
                if !matcher.next()? {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Count the documents matching `query` exactly (an unscored pass
    /// with no early termination).
    pub fn count(&self, query: &Query) -> Result<u64> {
        let query = query.clone().normalize();
        let ctx = self.context();
        let mut collector = CountCollector::new();
        for (base, leaf) in self.reader.leaves() {
            collector.set_segment(base, leaf, &ctx)?;
            let mut matcher = query.matcher(leaf, &ctx)?;
            while !matcher.is_exhausted() {
                collector.collect(matcher.doc_id(), &mut matcher)?;
                if !matcher.next()? {
                    break;
                }
            }
        }
        Ok(collector.count())
    }

    /// The highest tf·idf terms of `field` in one document, from its
    /// forward vector.
    pub fn key_terms(
        &self,
        doc_id: u64,
        field: &str,
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        let Some(vector) = self.reader.vector(doc_id, field)? else {
            return Err(SalixError::field(format!(
                "field '{field}' has no vector for document {doc_id}"
            )));
        };
        let max_doc = self.reader.stats().max_doc;
        let mut scored: Vec<(String, f32)> = Vec::with_capacity(vector.len());
        for (term, positions) in vector {
            let doc_freq = self.reader.doc_frequency(field, &term)?;
            let idf = crate::scoring::idf(doc_freq, max_doc);
            let tf = positions.len().max(1) as f32;
            let text = String::from_utf8_lossy(&term).into_owned();
            scored.push((text, tf * idf));
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(limit);
        Ok(scored)
    }
}

impl std::fmt::Debug for Searcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Searcher")
            .field("generation", &self.reader.generation())
            .field("doc_count", &self.reader.doc_count())
            .finish()
    }
}
