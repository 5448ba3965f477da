//! Weighting models and per-term scorers.
//!
//! A [`WeightingModel`] holds model configuration (for example BM25F's `k1`
//! and `b`) and creates one [`TermScorer`] per query term, pre-computing
//! the idf-like factors from collection statistics at matcher build time.
//! Scorers also provide the per-block upper bounds that drive block-max
//! pruning.

use std::fmt::Debug;
use std::sync::Arc;

use ahash::AHashMap;

use crate::reader::CollectionStats;

/// Global statistics of one term.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermStats {
    /// Documents containing the term, across the whole index.
    pub doc_freq: u64,
    /// Total occurrences across the whole index.
    pub total_freq: u64,
}

/// Scores one term's postings.
pub trait TermScorer: Send + Debug {
    /// Score a posting given its raw weight and the document's field
    /// length.
    fn score(&self, weight: f32, field_length: u32) -> f32;

    /// An upper bound on [`score`](Self::score) over any posting whose
    /// weight is at most `block_max_weight`.
    fn max_score(&self, block_max_weight: f32) -> f32;

    /// Whether [`max_score`](Self::max_score) is a usable bound. Models
    /// that cannot bound their scores opt out of block-max pruning.
    fn supports_block_quality(&self) -> bool {
        true
    }
}

/// Creates term scorers from collection statistics.
pub trait WeightingModel: Send + Sync + Debug {
    /// Build the scorer for one `(field, term)`.
    fn scorer(
        &self,
        field: &str,
        stats: TermStats,
        collection: &CollectionStats,
        field_boost: f32,
    ) -> Box<dyn TermScorer>;
}

/// The idf flavor the original uses: `ln(N / (df + 1)) + 1`.
pub fn idf(doc_freq: u64, doc_count: u64) -> f32 {
    if doc_count == 0 {
        return 1.0;
    }
    (doc_count as f32 / (doc_freq as f32 + 1.0)).ln() + 1.0
}

/// Field-weighted BM25: the default model.
///
/// `k1` is global; `b` has a global default and per-field overrides.
#[derive(Debug, Clone)]
pub struct Bm25F {
    /// Term-frequency saturation parameter.
    pub k1: f32,
    /// Length-normalization parameter.
    pub b: f32,
    field_b: AHashMap<String, f32>,
}

impl Bm25F {
    /// The conventional parameters `k1 = 1.2`, `b = 0.75`.
    pub fn new() -> Self {
        Bm25F {
            k1: 1.2,
            b: 0.75,
            field_b: AHashMap::new(),
        }
    }

    /// Custom global parameters.
    pub fn with_params(k1: f32, b: f32) -> Self {
        Bm25F {
            k1,
            b,
            field_b: AHashMap::new(),
        }
    }

    /// Override `b` for one field.
    pub fn field_b<S: Into<String>>(mut self, field: S, b: f32) -> Self {
        self.field_b.insert(field.into(), b);
        self
    }
}

impl Default for Bm25F {
    fn default() -> Self {
        Bm25F::new()
    }
}

impl WeightingModel for Bm25F {
    fn scorer(
        &self,
        field: &str,
        stats: TermStats,
        collection: &CollectionStats,
        field_boost: f32,
    ) -> Box<dyn TermScorer> {
        let b = self.field_b.get(field).copied().unwrap_or(self.b);
        Box::new(Bm25Scorer {
            idf: idf(stats.doc_freq, collection.max_doc),
            avg_length: collection.avg_field_length(field).max(1.0),
            k1: self.k1,
            b,
            boost: field_boost,
        })
    }
}

#[derive(Debug)]
struct Bm25Scorer {
    idf: f32,
    avg_length: f32,
    k1: f32,
    b: f32,
    boost: f32,
}

impl TermScorer for Bm25Scorer {
    fn score(&self, weight: f32, field_length: u32) -> f32 {
        if weight <= 0.0 {
            return 0.0;
        }
        let length = if field_length == 0 {
            self.avg_length
        } else {
            field_length as f32
        };
        let norm = (1.0 - self.b) + self.b * (length / self.avg_length);
        self.boost * self.idf * ((weight * (self.k1 + 1.0)) / (weight + self.k1 * norm))
    }

    fn max_score(&self, block_max_weight: f32) -> f32 {
        if block_max_weight <= 0.0 {
            return 0.0;
        }
        // Best case: the shortest possible field, norm -> (1 - b).
        let norm = 1.0 - self.b;
        self.boost
            * self.idf
            * ((block_max_weight * (self.k1 + 1.0)) / (block_max_weight + self.k1 * norm))
    }
}

/// Classic tf·idf.
#[derive(Debug, Clone, Default)]
pub struct TfIdf;

impl WeightingModel for TfIdf {
    fn scorer(
        &self,
        _field: &str,
        stats: TermStats,
        collection: &CollectionStats,
        field_boost: f32,
    ) -> Box<dyn TermScorer> {
        Box::new(TfIdfScorer {
            idf: idf(stats.doc_freq, collection.max_doc),
            boost: field_boost,
        })
    }
}

#[derive(Debug)]
struct TfIdfScorer {
    idf: f32,
    boost: f32,
}

impl TermScorer for TfIdfScorer {
    fn score(&self, weight: f32, _field_length: u32) -> f32 {
        self.boost * self.idf * weight
    }

    fn max_score(&self, block_max_weight: f32) -> f32 {
        self.boost * self.idf * block_max_weight
    }
}

/// Raw term frequency.
#[derive(Debug, Clone, Default)]
pub struct Frequency;

impl WeightingModel for Frequency {
    fn scorer(
        &self,
        _field: &str,
        _stats: TermStats,
        _collection: &CollectionStats,
        field_boost: f32,
    ) -> Box<dyn TermScorer> {
        Box::new(FrequencyScorer { boost: field_boost })
    }
}

#[derive(Debug)]
struct FrequencyScorer {
    boost: f32,
}

impl TermScorer for FrequencyScorer {
    fn score(&self, weight: f32, _field_length: u32) -> f32 {
        self.boost * weight
    }

    fn max_score(&self, block_max_weight: f32) -> f32 {
        self.boost * block_max_weight
    }
}

/// Chooses a model per field, with a fallback.
#[derive(Debug, Clone)]
pub struct MultiWeighting {
    default: Arc<dyn WeightingModel>,
    per_field: AHashMap<String, Arc<dyn WeightingModel>>,
}

impl MultiWeighting {
    /// Create with a fallback model.
    pub fn new(default: Arc<dyn WeightingModel>) -> Self {
        MultiWeighting {
            default,
            per_field: AHashMap::new(),
        }
    }

    /// Use `model` for `field`.
    pub fn field<S: Into<String>>(mut self, field: S, model: Arc<dyn WeightingModel>) -> Self {
        self.per_field.insert(field.into(), model);
        self
    }
}

impl WeightingModel for MultiWeighting {
    fn scorer(
        &self,
        field: &str,
        stats: TermStats,
        collection: &CollectionStats,
        field_boost: f32,
    ) -> Box<dyn TermScorer> {
        self.per_field
            .get(field)
            .unwrap_or(&self.default)
            .scorer(field, stats, collection, field_boost)
    }
}

/// Negates another model's scores, turning best matches into worst.
#[derive(Debug, Clone)]
pub struct ReverseWeighting {
    inner: Arc<dyn WeightingModel>,
}

impl ReverseWeighting {
    /// Wrap a model.
    pub fn new(inner: Arc<dyn WeightingModel>) -> Self {
        ReverseWeighting { inner }
    }
}

impl WeightingModel for ReverseWeighting {
    fn scorer(
        &self,
        field: &str,
        stats: TermStats,
        collection: &CollectionStats,
        field_boost: f32,
    ) -> Box<dyn TermScorer> {
        Box::new(ReverseScorer {
            inner: self.inner.scorer(field, stats, collection, field_boost),
        })
    }
}

#[derive(Debug)]
struct ReverseScorer {
    inner: Box<dyn TermScorer>,
}

impl TermScorer for ReverseScorer {
    fn score(&self, weight: f32, field_length: u32) -> f32 {
        -self.inner.score(weight, field_length)
    }

    fn max_score(&self, _block_max_weight: f32) -> f32 {
        f32::INFINITY
    }

    fn supports_block_quality(&self) -> bool {
        false
    }
}

/// Scores through a user callback on `(weight, field_length)`.
#[derive(Clone)]
pub struct FunctionWeighting {
    function: Arc<dyn Fn(f32, u32) -> f32 + Send + Sync>,
}

impl FunctionWeighting {
    /// Wrap a scoring function.
    pub fn new<F>(function: F) -> Self
    where
        F: Fn(f32, u32) -> f32 + Send + Sync + 'static,
    {
        FunctionWeighting {
            function: Arc::new(function),
        }
    }
}

impl Debug for FunctionWeighting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FunctionWeighting")
    }
}

impl WeightingModel for FunctionWeighting {
    fn scorer(
        &self,
        _field: &str,
        _stats: TermStats,
        _collection: &CollectionStats,
        field_boost: f32,
    ) -> Box<dyn TermScorer> {
        Box::new(FunctionScorer {
            function: Arc::clone(&self.function),
            boost: field_boost,
        })
    }
}

struct FunctionScorer {
    function: Arc<dyn Fn(f32, u32) -> f32 + Send + Sync>,
    boost: f32,
}

impl Debug for FunctionScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FunctionScorer")
    }
}

impl TermScorer for FunctionScorer {
    fn score(&self, weight: f32, field_length: u32) -> f32 {
        self.boost * (self.function)(weight, field_length)
    }

    fn max_score(&self, _block_max_weight: f32) -> f32 {
        f32::INFINITY
    }

    fn supports_block_quality(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total_len: u64, docs: u64) -> CollectionStats {
        let mut collection = CollectionStats {
            max_doc: docs,
            doc_count: docs,
            ..Default::default()
        };
        collection
            .field_totals
            .insert("body".to_string(), (total_len, docs));
        collection
    }

    #[test]
    fn test_idf_monotonic() {
        assert!(idf(1, 1000) > idf(10, 1000));
        assert!(idf(10, 1000) > idf(500, 1000));
        assert_eq!(idf(0, 0), 1.0);
    }

    #[test]
    fn test_bm25_tf_saturation() {
        let collection = stats(10_000, 1000);
        let scorer = Bm25F::new().scorer(
            "body",
            TermStats {
                doc_freq: 10,
                total_freq: 50,
            },
            &collection,
            1.0,
        );

        let s1 = scorer.score(1.0, 10);
        let s2 = scorer.score(2.0, 10);
        let s10 = scorer.score(10.0, 10);
        assert!(s2 > s1);
        assert!(s10 > s2);
        // Saturating: the gain flattens out.
        assert!(s10 - s2 < (s2 - s1) * 9.0);
        assert_eq!(scorer.score(0.0, 10), 0.0);
    }

    #[test]
    fn test_bm25_length_normalization() {
        let collection = stats(10_000, 1000);
        let scorer = Bm25F::new().scorer(
            "body",
            TermStats {
                doc_freq: 10,
                total_freq: 50,
            },
            &collection,
            1.0,
        );
        // Shorter fields score higher for equal weight.
        assert!(scorer.score(2.0, 5) > scorer.score(2.0, 50));
    }

    #[test]
    fn test_bm25_max_score_is_upper_bound() {
        let collection = stats(10_000, 1000);
        let scorer = Bm25F::new().scorer(
            "body",
            TermStats {
                doc_freq: 10,
                total_freq: 50,
            },
            &collection,
            1.0,
        );
        for weight in [0.5f32, 1.0, 3.0, 8.0] {
            let bound = scorer.max_score(weight);
            for length in [1u32, 5, 10, 100] {
                assert!(scorer.score(weight, length) <= bound + 1e-6);
            }
        }
    }

    #[test]
    fn test_field_boost_scales() {
        let collection = stats(10_000, 1000);
        let term = TermStats {
            doc_freq: 10,
            total_freq: 50,
        };
        let plain = Bm25F::new().scorer("body", term, &collection, 1.0);
        let boosted = Bm25F::new().scorer("body", term, &collection, 2.0);
        let score = plain.score(2.0, 10);
        assert!((boosted.score(2.0, 10) - score * 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_per_field_b() {
        let collection = stats(10_000, 1000);
        let term = TermStats {
            doc_freq: 10,
            total_freq: 50,
        };
        // b = 0 disables length normalization entirely.
        let flat = Bm25F::new().field_b("body", 0.0).scorer("body", term, &collection, 1.0);
        assert!((flat.score(2.0, 5) - flat.score(2.0, 500)).abs() < 1e-6);
    }

    #[test]
    fn test_other_models() {
        let collection = stats(10_000, 1000);
        let term = TermStats {
            doc_freq: 10,
            total_freq: 50,
        };

        let tfidf = TfIdf.scorer("body", term, &collection, 1.0);
        assert!((tfidf.score(4.0, 7) - 2.0 * tfidf.score(2.0, 7)).abs() < 1e-6);

        let freq = Frequency.scorer("body", term, &collection, 1.0);
        assert_eq!(freq.score(3.0, 1), 3.0);

        let reverse = ReverseWeighting::new(Arc::new(Frequency)).scorer(
            "body",
            term,
            &collection,
            1.0,
        );
        assert_eq!(reverse.score(3.0, 1), -3.0);
        assert!(!reverse.supports_block_quality());

        let function = FunctionWeighting::new(|weight, length| weight / (length as f32 + 1.0));
        let scorer = function.scorer("body", term, &collection, 1.0);
        assert_eq!(scorer.score(4.0, 1), 2.0);
    }

    #[test]
    fn test_multi_weighting_routes_by_field() {
        let collection = stats(10_000, 1000);
        let term = TermStats {
            doc_freq: 10,
            total_freq: 50,
        };
        let model = MultiWeighting::new(Arc::new(Bm25F::new()))
            .field("count", Arc::new(Frequency));
        assert_eq!(model.scorer("count", term, &collection, 1.0).score(5.0, 3), 5.0);
        // Other fields fall back to BM25.
        assert_ne!(model.scorer("body", term, &collection, 1.0).score(5.0, 3), 5.0);
    }
}
