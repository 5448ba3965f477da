//! Facets: rules assigning each document a key, used for sorting and
//! grouping.
//!
//! A facet produces one categorizer per search; the categorizer is pointed
//! at each segment in turn and maps local document numbers to keys. Field
//! facets read the segment's column, query facets pre-evaluate their
//! queries into per-segment bitmaps, range facets bucket a numeric column,
//! function facets call back into user code, and multi facets compose.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::Arc;

use ahash::AHashMap;

use crate::document::FieldValue;
use crate::error::Result;
use crate::query::{matcher_to_bitset, Query, SearchContext};
use crate::reader::SegmentReader;
use crate::util::bitset::BitSet;

/// A grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FacetKey {
    /// No value.
    Missing,
    /// Boolean key.
    Bool(bool),
    /// Integer key.
    Int(i64),
    /// Text key.
    Text(String),
}

impl std::fmt::Display for FacetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FacetKey::Missing => write!(f, "<missing>"),
            FacetKey::Bool(value) => write!(f, "{value}"),
            FacetKey::Int(value) => write!(f, "{value}"),
            FacetKey::Text(value) => write!(f, "{value}"),
        }
    }
}

impl FacetKey {
    fn from_value(value: Option<FieldValue>) -> FacetKey {
        match value {
            None => FacetKey::Missing,
            Some(FieldValue::Text(text)) => FacetKey::Text(text),
            Some(FieldValue::Integer(value)) => FacetKey::Int(value),
            Some(FieldValue::Boolean(value)) => FacetKey::Bool(value),
            Some(FieldValue::DateTime(value)) => FacetKey::Int(value.timestamp_millis()),
            Some(FieldValue::Float(value)) => FacetKey::Int(value as i64),
            Some(FieldValue::Bytes(bytes)) => {
                FacetKey::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            Some(FieldValue::Null) => FacetKey::Missing,
        }
    }
}

/// One component of a sort key.
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    /// Absent value; sorts after everything present.
    Missing,
    /// Boolean.
    Bool(bool),
    /// Integer (also datetimes as epoch milliseconds).
    Int(i64),
    /// Float (scores).
    Float(f64),
    /// Text.
    Text(String),
}

impl SortValue {
    fn rank(&self) -> u8 {
        match self {
            SortValue::Bool(_) => 0,
            SortValue::Int(_) => 1,
            SortValue::Float(_) => 2,
            SortValue::Text(_) => 3,
            SortValue::Missing => 4,
        }
    }
}

impl Eq for SortValue {}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortValue::Bool(a), SortValue::Bool(b)) => a.cmp(b),
            (SortValue::Int(a), SortValue::Int(b)) => a.cmp(b),
            (SortValue::Float(a), SortValue::Float(b)) => a.total_cmp(b),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            // Mixed types order by kind; Missing sorts last.
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

/// A composite sort key with per-part reversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// `(value, reverse)` pairs in facet order.
    pub parts: Vec<(SortValue, bool)>,
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for ((a, reverse), (b, _)) in self.parts.iter().zip(other.parts.iter()) {
            let ordering = a.cmp(b);
            let ordering = if *reverse { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        self.parts.len().cmp(&other.parts.len())
    }
}

/// A rule assigning each document to a facet key.
#[derive(Clone)]
pub enum Facet {
    /// Key by a field's column value.
    Field {
        /// Field name (must carry a column).
        field: String,
        /// Reverse this part when sorting.
        reverse: bool,
    },
    /// Key by score (sorting only; grouping by score is meaningless).
    Score {
        /// Reverse: ascending score instead of the default descending.
        reverse: bool,
    },
    /// Key by which of several queries match. A document can land in
    /// multiple buckets.
    Queries {
        /// `(label, query)` buckets.
        buckets: Vec<(String, Query)>,
    },
    /// Bucket a numeric column into ranges of width `gap` starting at
    /// `start`.
    NumericRanges {
        /// Field name (numeric column).
        field: String,
        /// First bucket's lower bound.
        start: i64,
        /// End of the last bucket.
        end: i64,
        /// Bucket width.
        gap: i64,
    },
    /// Key by a user function of `(global doc id, score)`.
    Function(Arc<dyn Fn(u64, f32) -> FacetKey + Send + Sync>),
    /// Compose several facets into one composite key.
    Multi(Vec<Facet>),
}

impl Debug for Facet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facet::Field { field, reverse } => f
                .debug_struct("Field")
                .field("field", field)
                .field("reverse", reverse)
                .finish(),
            Facet::Score { reverse } => {
                f.debug_struct("Score").field("reverse", reverse).finish()
            }
            Facet::Queries { buckets } => f
                .debug_struct("Queries")
                .field("buckets", &buckets.len())
                .finish(),
            Facet::NumericRanges {
                field, start, end, gap,
            } => f
                .debug_struct("NumericRanges")
                .field("field", field)
                .field("start", start)
                .field("end", end)
                .field("gap", gap)
                .finish(),
            Facet::Function(_) => f.write_str("Function"),
            Facet::Multi(parts) => f.debug_tuple("Multi").field(&parts.len()).finish(),
        }
    }
}

impl Facet {
    /// A field facet.
    pub fn field<S: Into<String>>(field: S) -> Facet {
        Facet::Field {
            field: field.into(),
            reverse: false,
        }
    }

    /// A reversed field facet.
    pub fn field_reversed<S: Into<String>>(field: S) -> Facet {
        Facet::Field {
            field: field.into(),
            reverse: true,
        }
    }

    /// A score facet (descending).
    pub fn score() -> Facet {
        Facet::Score { reverse: false }
    }

    /// Build this facet's categorizer for one search.
    pub fn categorizer(&self, ctx: &SearchContext<'_>) -> Result<Box<dyn Categorizer>> {
        match self {
            Facet::Field { field, reverse } => Ok(Box::new(FieldCategorizer {
                field: field.clone(),
                reverse: *reverse,
                column_missing: true,
                values: Vec::new(),
            })),
            Facet::Score { reverse } => Ok(Box::new(ScoreCategorizer { reverse: *reverse })),
            Facet::Queries { buckets } => {
                let queries: Vec<(String, Query)> = buckets
                    .iter()
                    .map(|(label, query)| (label.clone(), query.clone().normalize()))
                    .collect();
                Ok(Box::new(QueryCategorizer {
                    queries,
                    bitsets: Vec::new(),
                }))
            }
            Facet::NumericRanges {
                field, start, end, gap,
            } => Ok(Box::new(RangeCategorizer {
                field: field.clone(),
                start: *start,
                end: *end,
                gap: (*gap).max(1),
                values: Vec::new(),
            })),
            Facet::Function(function) => Ok(Box::new(FunctionCategorizer {
                function: Arc::clone(function),
                base: 0,
            })),
            Facet::Multi(parts) => {
                let mut categorizers = Vec::with_capacity(parts.len());
                for part in parts {
                    categorizers.push(part.categorizer(ctx)?);
                }
                Ok(Box::new(MultiCategorizer { categorizers }))
            }
        }
    }
}

/// Per-search state mapping local documents to keys, segment by segment.
pub trait Categorizer: Send {
    /// Point the categorizer at a new segment. `ctx` allows query facets
    /// to evaluate their buckets.
    fn set_segment(
        &mut self,
        reader: &SegmentReader,
        base: u64,
        ctx: &SearchContext<'_>,
    ) -> Result<()>;

    /// The grouping keys of `local_doc` (usually exactly one).
    fn keys(&mut self, local_doc: u64, score: f32, out: &mut Vec<FacetKey>) -> Result<()>;

    /// The sort-key part of `local_doc`.
    fn sort_part(&mut self, local_doc: u64, score: f32) -> Result<(SortValue, bool)>;
}

struct FieldCategorizer {
    field: String,
    reverse: bool,
    column_missing: bool,
    values: Vec<Option<FieldValue>>,
}

impl Categorizer for FieldCategorizer {
    fn set_segment(
        &mut self,
        reader: &SegmentReader,
        _base: u64,
        _ctx: &SearchContext<'_>,
    ) -> Result<()> {
        self.values.clear();
        match reader.column(&self.field)? {
            Some(column) => {
                self.column_missing = false;
                let count = reader.max_doc();
                self.values.reserve(count as usize);
                for doc_id in 0..count {
                    self.values.push(column.value(doc_id));
                }
            }
            None => self.column_missing = true,
        }
        Ok(())
    }

    fn keys(&mut self, local_doc: u64, _score: f32, out: &mut Vec<FacetKey>) -> Result<()> {
        let value = if self.column_missing {
            None
        } else {
            self.values.get(local_doc as usize).cloned().flatten()
        };
        out.push(FacetKey::from_value(value));
        Ok(())
    }

    fn sort_part(&mut self, local_doc: u64, _score: f32) -> Result<(SortValue, bool)> {
        let value = if self.column_missing {
            None
        } else {
            self.values.get(local_doc as usize).cloned().flatten()
        };
        let part = match value {
            None => SortValue::Missing,
            Some(FieldValue::Integer(value)) => SortValue::Int(value),
            Some(FieldValue::Text(text)) => SortValue::Text(text),
            Some(FieldValue::Boolean(value)) => SortValue::Bool(value),
            Some(FieldValue::DateTime(value)) => SortValue::Int(value.timestamp_millis()),
            Some(FieldValue::Float(value)) => SortValue::Float(value),
            Some(FieldValue::Bytes(bytes)) => {
                SortValue::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            Some(FieldValue::Null) => SortValue::Missing,
        };
        Ok((part, self.reverse))
    }
}

struct ScoreCategorizer {
    reverse: bool,
}

impl Categorizer for ScoreCategorizer {
    fn set_segment(
        &mut self,
        _reader: &SegmentReader,
        _base: u64,
        _ctx: &SearchContext<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn keys(&mut self, _local_doc: u64, score: f32, out: &mut Vec<FacetKey>) -> Result<()> {
        out.push(FacetKey::Int(score as i64));
        Ok(())
    }

    fn sort_part(&mut self, _local_doc: u64, score: f32) -> Result<(SortValue, bool)> {
        // Scores sort descending by default, so the part is reversed
        // unless the facet itself is reversed.
        Ok((SortValue::Float(score as f64), !self.reverse))
    }
}

struct QueryCategorizer {
    queries: Vec<(String, Query)>,
    bitsets: Vec<(String, BitSet)>,
}

impl Categorizer for QueryCategorizer {
    fn set_segment(
        &mut self,
        reader: &SegmentReader,
        _base: u64,
        ctx: &SearchContext<'_>,
    ) -> Result<()> {
        self.bitsets.clear();
        for (label, query) in &self.queries {
            let matcher = query.matcher(reader, ctx)?;
            let bits = matcher_to_bitset(matcher, reader.max_doc())?;
            self.bitsets.push((label.clone(), bits));
        }
        Ok(())
    }

    fn keys(&mut self, local_doc: u64, _score: f32, out: &mut Vec<FacetKey>) -> Result<()> {
        let mut any = false;
        for (label, bits) in &self.bitsets {
            if bits.contains(local_doc as usize) {
                out.push(FacetKey::Text(label.clone()));
                any = true;
            }
        }
        if !any {
            out.push(FacetKey::Missing);
        }
        Ok(())
    }

    fn sort_part(&mut self, local_doc: u64, score: f32) -> Result<(SortValue, bool)> {
        let mut keys = Vec::with_capacity(1);
        self.keys(local_doc, score, &mut keys)?;
        let part = match keys.into_iter().next() {
            Some(FacetKey::Text(label)) => SortValue::Text(label),
            _ => SortValue::Missing,
        };
        Ok((part, false))
    }
}

struct RangeCategorizer {
    field: String,
    start: i64,
    end: i64,
    gap: i64,
    values: Vec<Option<i64>>,
}

impl RangeCategorizer {
    fn bucket(&self, value: i64) -> FacetKey {
        if value < self.start || value >= self.end {
            return FacetKey::Missing;
        }
        let bucket = (value - self.start) / self.gap;
        FacetKey::Int(self.start + bucket * self.gap)
    }
}

impl Categorizer for RangeCategorizer {
    fn set_segment(
        &mut self,
        reader: &SegmentReader,
        _base: u64,
        _ctx: &SearchContext<'_>,
    ) -> Result<()> {
        self.values.clear();
        if let Some(column) = reader.column(&self.field)? {
            for doc_id in 0..reader.max_doc() {
                self.values
                    .push(column.value(doc_id).and_then(|v| v.numeric_key()));
            }
        }
        Ok(())
    }

    fn keys(&mut self, local_doc: u64, _score: f32, out: &mut Vec<FacetKey>) -> Result<()> {
        let key = match self.values.get(local_doc as usize).copied().flatten() {
            Some(value) => self.bucket(value),
            None => FacetKey::Missing,
        };
        out.push(key);
        Ok(())
    }

    fn sort_part(&mut self, local_doc: u64, _score: f32) -> Result<(SortValue, bool)> {
        let part = match self.values.get(local_doc as usize).copied().flatten() {
            Some(value) => SortValue::Int(value),
            None => SortValue::Missing,
        };
        Ok((part, false))
    }
}

struct FunctionCategorizer {
    function: Arc<dyn Fn(u64, f32) -> FacetKey + Send + Sync>,
    base: u64,
}

impl Categorizer for FunctionCategorizer {
    fn set_segment(
        &mut self,
        _reader: &SegmentReader,
        base: u64,
        _ctx: &SearchContext<'_>,
    ) -> Result<()> {
        self.base = base;
        Ok(())
    }

    fn keys(&mut self, local_doc: u64, score: f32, out: &mut Vec<FacetKey>) -> Result<()> {
        out.push((self.function)(self.base + local_doc, score));
        Ok(())
    }

    fn sort_part(&mut self, local_doc: u64, score: f32) -> Result<(SortValue, bool)> {
        let part = match (self.function)(self.base + local_doc, score) {
            FacetKey::Missing => SortValue::Missing,
            FacetKey::Bool(value) => SortValue::Bool(value),
            FacetKey::Int(value) => SortValue::Int(value),
            FacetKey::Text(text) => SortValue::Text(text),
        };
        Ok((part, false))
    }
}

struct MultiCategorizer {
    categorizers: Vec<Box<dyn Categorizer>>,
}

impl Categorizer for MultiCategorizer {
    fn set_segment(
        &mut self,
        reader: &SegmentReader,
        base: u64,
        ctx: &SearchContext<'_>,
    ) -> Result<()> {
        for categorizer in &mut self.categorizers {
            categorizer.set_segment(reader, base, ctx)?;
        }
        Ok(())
    }

    fn keys(&mut self, local_doc: u64, score: f32, out: &mut Vec<FacetKey>) -> Result<()> {
        // Composite key: the parts joined as text.
        let mut parts = Vec::with_capacity(self.categorizers.len());
        for categorizer in &mut self.categorizers {
            let mut keys = Vec::with_capacity(1);
            categorizer.keys(local_doc, score, &mut keys)?;
            parts.push(
                keys.into_iter()
                    .next()
                    .unwrap_or(FacetKey::Missing)
                    .to_string(),
            );
        }
        out.push(FacetKey::Text(parts.join("/")));
        Ok(())
    }

    fn sort_part(&mut self, local_doc: u64, score: f32) -> Result<(SortValue, bool)> {
        // The first part decides; full multi-key sorting uses sort_key().
        match self.categorizers.first_mut() {
            Some(categorizer) => categorizer.sort_part(local_doc, score),
            None => Ok((SortValue::Missing, false)),
        }
    }
}

/// Build the full multi-part sort key of a document under a facet.
pub fn sort_key(
    facet_categorizers: &mut [Box<dyn Categorizer>],
    local_doc: u64,
    score: f32,
) -> Result<SortKey> {
    let mut parts = Vec::with_capacity(facet_categorizers.len());
    for categorizer in facet_categorizers.iter_mut() {
        parts.push(categorizer.sort_part(local_doc, score)?);
    }
    Ok(SortKey { parts })
}

/// Flatten a facet into the list of categorizers forming a sort key
/// (multi facets contribute one per part).
pub fn sort_categorizers(
    facet: &Facet,
    ctx: &SearchContext<'_>,
) -> Result<Vec<Box<dyn Categorizer>>> {
    match facet {
        Facet::Multi(parts) => {
            let mut out = Vec::with_capacity(parts.len());
            for part in parts {
                out.push(part.categorizer(ctx)?);
            }
            Ok(out)
        }
        single => Ok(vec![single.categorizer(ctx)?]),
    }
}

/// How a facet's groups accumulate documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacetMapKind {
    /// Documents in descending-score order.
    #[default]
    OrderedList,
    /// Documents in collection order.
    UnorderedList,
    /// Only a count per key.
    Count,
    /// Only the best-scoring document per key.
    Best,
}

/// The grouping result for one facet name.
#[derive(Debug, Clone)]
pub struct FacetGroups {
    kind: FacetMapKind,
    entries: AHashMap<FacetKey, Vec<(u64, f32)>>,
}

impl FacetGroups {
    /// Create an empty grouping accumulator.
    pub fn new(kind: FacetMapKind) -> Self {
        FacetGroups {
            kind,
            entries: AHashMap::new(),
        }
    }

    /// Record `(doc, score)` under `key`.
    pub fn add(&mut self, key: FacetKey, doc_id: u64, score: f32) {
        match self.kind {
            FacetMapKind::Best => {
                let entry = self.entries.entry(key).or_default();
                match entry.first() {
                    Some(&(_, best)) if best >= score => {}
                    _ => {
                        entry.clear();
                        entry.push((doc_id, score));
                    }
                }
            }
            _ => self.entries.entry(key).or_default().push((doc_id, score)),
        }
    }

    /// The accumulation flavor.
    pub fn kind(&self) -> FacetMapKind {
        self.kind
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<&FacetKey> {
        let mut keys: Vec<&FacetKey> = self.entries.keys().collect();
        keys.sort();
        keys
    }

    /// The documents under `key`, ordered per the map kind.
    pub fn docs(&self, key: &FacetKey) -> Vec<u64> {
        let Some(entry) = self.entries.get(key) else {
            return Vec::new();
        };
        match self.kind {
            FacetMapKind::OrderedList => {
                let mut docs = entry.clone();
                docs.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
                docs.into_iter().map(|(doc, _)| doc).collect()
            }
            _ => entry.iter().map(|&(doc, _)| doc).collect(),
        }
    }

    /// Number of documents under `key`.
    pub fn count(&self, key: &FacetKey) -> usize {
        self.entries.get(key).map(Vec::len).unwrap_or(0)
    }

    /// The best document under `key`, when tracked.
    pub fn best(&self, key: &FacetKey) -> Option<u64> {
        self.entries
            .get(key)
            .and_then(|entry| entry.first())
            .map(|&(doc, _)| doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_value_ordering() {
        assert!(SortValue::Int(1) < SortValue::Int(2));
        assert!(SortValue::Text("a".into()) < SortValue::Text("b".into()));
        assert!(SortValue::Int(5) < SortValue::Missing);
        assert!(SortValue::Float(1.5) < SortValue::Float(2.0));
    }

    #[test]
    fn test_sort_key_reverse_parts() {
        let a = SortKey {
            parts: vec![(SortValue::Int(1), true)],
        };
        let b = SortKey {
            parts: vec![(SortValue::Int(2), true)],
        };
        // Reversed: the larger value sorts first.
        assert!(b < a);
    }

    #[test]
    fn test_sort_key_lexicographic() {
        let a = SortKey {
            parts: vec![(SortValue::Int(1), false), (SortValue::Text("z".into()), false)],
        };
        let b = SortKey {
            parts: vec![(SortValue::Int(1), false), (SortValue::Text("a".into()), false)],
        };
        assert!(b < a);
    }

    #[test]
    fn test_facet_groups_count_and_best() {
        let mut groups = FacetGroups::new(FacetMapKind::Best);
        groups.add(FacetKey::Text("x".into()), 1, 0.5);
        groups.add(FacetKey::Text("x".into()), 2, 0.9);
        groups.add(FacetKey::Text("x".into()), 3, 0.7);
        assert_eq!(groups.best(&FacetKey::Text("x".into())), Some(2));

        let mut groups = FacetGroups::new(FacetMapKind::Count);
        groups.add(FacetKey::Int(1), 1, 0.0);
        groups.add(FacetKey::Int(1), 2, 0.0);
        assert_eq!(groups.count(&FacetKey::Int(1)), 2);
    }

    #[test]
    fn test_facet_groups_ordered_docs() {
        let mut groups = FacetGroups::new(FacetMapKind::OrderedList);
        groups.add(FacetKey::Missing, 1, 0.2);
        groups.add(FacetKey::Missing, 2, 0.9);
        groups.add(FacetKey::Missing, 3, 0.9);
        assert_eq!(groups.docs(&FacetKey::Missing), vec![2, 3, 1]);
    }

    #[test]
    fn test_range_bucketing() {
        let categorizer = RangeCategorizer {
            field: "price".into(),
            start: 0,
            end: 100,
            gap: 25,
            values: Vec::new(),
        };
        assert_eq!(categorizer.bucket(0), FacetKey::Int(0));
        assert_eq!(categorizer.bucket(24), FacetKey::Int(0));
        assert_eq!(categorizer.bucket(25), FacetKey::Int(25));
        assert_eq!(categorizer.bucket(99), FacetKey::Int(75));
        assert_eq!(categorizer.bucket(100), FacetKey::Missing);
        assert_eq!(categorizer.bucket(-1), FacetKey::Missing);
    }
}
