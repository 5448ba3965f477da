//! Read-side views over segments.
//!
//! A [`SegmentReader`] answers term, posting, stored-field, length, column
//! and vector lookups for one segment. A [`MultiReader`] composes several
//! segment readers by assigning each a document-number base in
//! table-of-contents order; external document ids are `base + local`.
//!
//! Readers are snapshots: they pin the segments enumerated by the table of
//! contents they were opened from and are unaffected by later commits.

use std::collections::HashMap;
use std::sync::Arc;

use ahash::AHashMap;

use crate::codec::columns::ColumnReader;
use crate::codec::postings::PostingsCursor;
use crate::codec::terms::TermDictCursor;
use crate::codec::vectors::DocVector;
use crate::codec::{term_key, TermInfo};
use crate::document::FieldValue;
use crate::error::{Result, SalixError};
use crate::schema::Schema;
use crate::segment::{Segment, SegmentMeta};
use crate::storage::Storage;
use crate::util::bitset::BitSet;

/// A read view over one segment.
#[derive(Debug, Clone)]
pub struct SegmentReader {
    segment: Arc<Segment>,
    schema: Arc<Schema>,
}

impl SegmentReader {
    /// Open the segment described by `meta`.
    pub fn open(storage: &dyn Storage, schema: Arc<Schema>, meta: SegmentMeta) -> Result<Self> {
        let segment = Segment::open(storage, &schema, meta)?;
        Ok(SegmentReader {
            segment: Arc::new(segment),
            schema,
        })
    }

    /// The schema this reader was opened with.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The segment record.
    pub fn meta(&self) -> &SegmentMeta {
        self.segment.meta()
    }

    /// Total document slots, including deleted ones.
    pub fn max_doc(&self) -> u64 {
        self.segment.meta().max_doc
    }

    /// Live documents.
    pub fn doc_count(&self) -> u64 {
        self.segment.meta().doc_count
    }

    /// True when the segment carries deletions.
    pub fn has_deletions(&self) -> bool {
        self.segment.meta().has_deletions()
    }

    /// True when `doc_id` is deleted.
    pub fn is_deleted(&self, doc_id: u64) -> bool {
        self.segment.is_deleted(doc_id)
    }

    /// The live-docs bitmap; `None` means all documents are live.
    pub fn live_docs(&self) -> Option<&BitSet> {
        self.segment.live_docs()
    }

    /// Term statistics, or `None` when the term is absent.
    pub fn term_info(&self, field: &str, term: &[u8]) -> Result<Option<TermInfo>> {
        let field_id = self.schema.expect_field_id(field)?;
        self.segment.term_info(field_id, term)
    }

    /// A posting cursor for `(field, term)`, filtered by live docs.
    /// `None` when the term does not occur in this segment.
    pub fn postings(&self, field: &str, term: &[u8]) -> Result<Option<SegmentPostings>> {
        let field_id = self.schema.expect_field_id(field)?;
        self.postings_by_id(field_id, term)
    }

    /// Posting cursor lookup by field id, for code that works on raw
    /// dictionary keys (the merger).
    pub fn postings_by_id(&self, field_id: u16, term: &[u8]) -> Result<Option<SegmentPostings>> {
        let def = self
            .schema
            .field_by_id(field_id)
            .ok_or_else(|| SalixError::NoSuchField(format!("field id {field_id}")))?;
        let Some(info) = self.segment.term_info(field_id, term)? else {
            return Ok(None);
        };
        let cursor = PostingsCursor::open(self.segment.postings_input()?, &info, def.format)?;
        let mut postings = SegmentPostings {
            segment: Arc::clone(&self.segment),
            cursor,
        };
        postings.skip_deleted()?;
        Ok(Some(postings))
    }

    /// A cursor over the whole term dictionary of this segment.
    pub fn all_terms(&self) -> Result<crate::codec::terms::TermDictCursor> {
        self.segment.terms().iter()
    }

    /// A dictionary cursor positioned at the first term of `field` that is
    /// `>= start`.
    pub fn term_cursor(&self, field: &str, start: &[u8]) -> Result<FieldTermCursor> {
        let field_id = self.schema.expect_field_id(field)?;
        let cursor = self.segment.terms().iter_from(&term_key(field_id, start))?;
        Ok(FieldTermCursor { field_id, cursor })
    }

    /// The stored field map of `doc_id`.
    pub fn stored_fields(&self, doc_id: u64) -> Result<HashMap<String, FieldValue>> {
        self.segment.stored().get(doc_id)
    }

    /// Length of `field` in `doc_id` (0 when absent).
    pub fn doc_field_length(&self, doc_id: u64, field: &str) -> Result<u32> {
        let field_id = self.schema.expect_field_id(field)?;
        Ok(self.segment.lengths().length(field_id, doc_id))
    }

    /// Length lookup by field id, for scorers on the hot path.
    pub fn field_length_by_id(&self, field_id: u16, doc_id: u64) -> u32 {
        self.segment.lengths().length(field_id, doc_id)
    }

    /// Ascending live document ids.
    pub fn all_doc_ids(&self) -> impl Iterator<Item = u64> + '_ {
        let max_doc = self.max_doc();
        (0..max_doc).filter(move |&doc| !self.is_deleted(doc))
    }

    /// The sort/group column of `field`, if one was written.
    pub fn column(&self, field: &str) -> Result<Option<&ColumnReader>> {
        let field_id = self.schema.expect_field_id(field)?;
        Ok(self.segment.column(field_id))
    }

    /// The forward vector of `(doc, field)`, if recorded.
    pub fn vector(&self, doc_id: u64, field: &str) -> Result<Option<DocVector>> {
        let field_id = self.schema.expect_field_id(field)?;
        match self.segment.vectors() {
            Some(vectors) => vectors.vector(field_id, doc_id),
            None => Ok(None),
        }
    }

    /// True when `doc_id` carries `field`: its length is non-zero, or its
    /// column holds a value.
    pub fn doc_has_field(&self, doc_id: u64, field: &str) -> Result<bool> {
        let field_id = self.schema.expect_field_id(field)?;
        if self.segment.lengths().has_field(field_id, doc_id) {
            return Ok(true);
        }
        Ok(self
            .segment
            .column(field_id)
            .map(|column| column.has_value(doc_id))
            .unwrap_or(false))
    }
}

/// A live-docs-filtered posting cursor for one term in one segment.
pub struct SegmentPostings {
    segment: Arc<Segment>,
    cursor: PostingsCursor,
}

impl SegmentPostings {
    /// True when the cursor has run off the end.
    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_exhausted()
    }

    /// Current document id, `u64::MAX` when exhausted.
    pub fn doc_id(&self) -> u64 {
        self.cursor.doc_id()
    }

    /// Weight of the current posting.
    pub fn weight(&self) -> f32 {
        self.cursor.weight()
    }

    /// Frequency of the current posting.
    pub fn frequency(&self) -> u32 {
        self.cursor.frequency()
    }

    /// Positions of the current posting.
    pub fn positions(&self) -> &[u32] {
        self.cursor.positions()
    }

    /// Character offsets of the current posting.
    pub fn characters(&self) -> &[(u32, u32)] {
        self.cursor.characters()
    }

    /// Per-position boosts of the current posting.
    pub fn boosts(&self) -> &[f32] {
        self.cursor.boosts()
    }

    /// Upper bound on weight within the current block.
    pub fn block_max_weight(&self) -> f32 {
        self.cursor.block_max_weight()
    }

    /// Estimated iteration cost.
    pub fn cost(&self) -> u64 {
        self.cursor.cost()
    }

    /// Advance to the next live posting.
    pub fn advance(&mut self) -> Result<bool> {
        if self.cursor.is_exhausted() {
            return Ok(false);
        }
        if !self.cursor.advance()? {
            return Ok(false);
        }
        self.skip_deleted()
    }

    /// Advance to the first live posting with `doc_id >= target`.
    pub fn skip_to(&mut self, target: u64) -> Result<bool> {
        if !self.cursor.skip_to(target)? {
            return Ok(false);
        }
        self.skip_deleted()
    }

    /// Skip the rest of the current block; used by quality pruning.
    pub fn skip_past_block(&mut self) -> Result<bool> {
        if !self.cursor.skip_past_block()? {
            return Ok(false);
        }
        self.skip_deleted()
    }

    /// Field length accessor for scorers.
    pub fn field_length(&self, field_id: u16, doc_id: u64) -> u32 {
        self.segment.lengths().length(field_id, doc_id)
    }

    fn skip_deleted(&mut self) -> Result<bool> {
        while !self.cursor.is_exhausted() && self.segment.is_deleted(self.cursor.doc_id()) {
            if !self.cursor.advance()? {
                return Ok(false);
            }
        }
        Ok(!self.cursor.is_exhausted())
    }
}

impl std::fmt::Debug for SegmentPostings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentPostings")
            .field("doc_id", &self.doc_id())
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}

/// A dictionary cursor restricted to one field, yielding
/// `(term_bytes, info)`.
pub struct FieldTermCursor {
    field_id: u16,
    cursor: TermDictCursor,
}

impl FieldTermCursor {
    /// The next term of the field, or `None` when the field's range ends.
    pub fn next_term(&mut self) -> Result<Option<(Vec<u8>, TermInfo)>> {
        match self.cursor.next_entry()? {
            Some((key, info)) => match crate::codec::split_term_key(&key) {
                Some((field_id, term)) if field_id == self.field_id => {
                    Ok(Some((term.to_vec(), info)))
                }
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }
}

/// Aggregated collection statistics used by scorers.
#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
    /// Total document slots across segments (including deleted).
    pub max_doc: u64,
    /// Live documents across segments.
    pub doc_count: u64,
    /// Per-field `(total_length, docs_with_field)`.
    pub field_totals: AHashMap<String, (u64, u64)>,
}

impl CollectionStats {
    /// Average length of `field`, or 1.0 when unknown.
    pub fn avg_field_length(&self, field: &str) -> f32 {
        match self.field_totals.get(field) {
            Some(&(total, docs)) if docs > 0 => total as f32 / docs as f32,
            _ => 1.0,
        }
    }
}

/// A reader over every segment of one generation.
#[derive(Debug, Clone)]
pub struct MultiReader {
    schema: Arc<Schema>,
    readers: Vec<SegmentReader>,
    bases: Vec<u64>,
    generation: u64,
    stats: CollectionStats,
}

impl MultiReader {
    /// Compose segment readers in table-of-contents order.
    pub fn new(schema: Arc<Schema>, readers: Vec<SegmentReader>, generation: u64) -> Self {
        let mut bases = Vec::with_capacity(readers.len());
        let mut base = 0u64;
        let mut stats = CollectionStats::default();
        for reader in &readers {
            bases.push(base);
            base += reader.max_doc();
            stats.doc_count += reader.doc_count();
            for total in &reader.meta().field_totals {
                let entry = stats
                    .field_totals
                    .entry(total.field.clone())
                    .or_insert((0, 0));
                entry.0 += total.total_length;
                entry.1 += total.docs_with_field;
            }
        }
        stats.max_doc = base;
        MultiReader {
            schema,
            readers,
            bases,
            generation,
            stats,
        }
    }

    /// Open every segment in `metas` from `storage`.
    pub fn open(
        storage: &dyn Storage,
        schema: Arc<Schema>,
        metas: Vec<SegmentMeta>,
        generation: u64,
    ) -> Result<Self> {
        let mut readers = Vec::with_capacity(metas.len());
        for meta in metas {
            readers.push(SegmentReader::open(storage, Arc::clone(&schema), meta)?);
        }
        Ok(MultiReader::new(schema, readers, generation))
    }

    /// The schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The generation this reader was opened from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Collection statistics.
    pub fn stats(&self) -> &CollectionStats {
        &self.stats
    }

    /// Live documents.
    pub fn doc_count(&self) -> u64 {
        self.stats.doc_count
    }

    /// Total document slots.
    pub fn max_doc(&self) -> u64 {
        self.stats.max_doc
    }

    /// True when any segment carries deletions.
    pub fn has_deletions(&self) -> bool {
        self.readers.iter().any(SegmentReader::has_deletions)
    }

    /// The `(base, segment reader)` leaves in order.
    pub fn leaves(&self) -> impl Iterator<Item = (u64, &SegmentReader)> {
        self.bases.iter().copied().zip(self.readers.iter())
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.readers.len()
    }

    /// Map a global document id to `(leaf index, local id)`.
    pub fn locate(&self, doc_id: u64) -> Result<(usize, u64)> {
        if self.readers.is_empty() || doc_id >= self.stats.max_doc {
            return Err(SalixError::ReadTooFar);
        }
        let idx = match self.bases.binary_search(&doc_id) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        Ok((idx, doc_id - self.bases[idx]))
    }

    /// Summed term statistics across segments; `None` when absent
    /// everywhere.
    pub fn term_info(&self, field: &str, term: &[u8]) -> Result<Option<(u64, u64)>> {
        let mut doc_freq = 0u64;
        let mut total_freq = 0u64;
        let mut found = false;
        for reader in &self.readers {
            if let Some(info) = reader.term_info(field, term)? {
                doc_freq += info.doc_freq;
                total_freq += info.total_freq;
                found = true;
            }
        }
        Ok(found.then_some((doc_freq, total_freq)))
    }

    /// Document frequency of a term across the index.
    pub fn doc_frequency(&self, field: &str, term: &[u8]) -> Result<u64> {
        Ok(self.term_info(field, term)?.map(|(df, _)| df).unwrap_or(0))
    }

    /// Rebased posting iteration across all segments: ascending global
    /// document ids.
    pub fn postings(&self, field: &str, term: &[u8]) -> Result<MultiPostings> {
        let mut legs = Vec::new();
        for (base, reader) in self.leaves() {
            if let Some(postings) = reader.postings(field, term)? {
                if !postings.is_exhausted() {
                    legs.push((base, postings));
                }
            }
        }
        Ok(MultiPostings { legs, current: 0 })
    }

    /// Stored fields of a global document id.
    pub fn stored_fields(&self, doc_id: u64) -> Result<HashMap<String, FieldValue>> {
        let (idx, local) = self.locate(doc_id)?;
        self.readers[idx].stored_fields(local)
    }

    /// Field length of a global document id.
    pub fn doc_field_length(&self, doc_id: u64, field: &str) -> Result<u32> {
        let (idx, local) = self.locate(doc_id)?;
        self.readers[idx].doc_field_length(local, field)
    }

    /// Forward vector of a global document id.
    pub fn vector(&self, doc_id: u64, field: &str) -> Result<Option<DocVector>> {
        let (idx, local) = self.locate(doc_id)?;
        self.readers[idx].vector(local, field)
    }

    /// True when the global document id is deleted.
    pub fn is_deleted(&self, doc_id: u64) -> bool {
        match self.locate(doc_id) {
            Ok((idx, local)) => self.readers[idx].is_deleted(local),
            Err(_) => false,
        }
    }

    /// Ascending live global document ids.
    pub fn all_doc_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.leaves()
            .flat_map(|(base, reader)| reader.all_doc_ids().map(move |local| base + local))
    }
}

/// The rebased concatenation of one term's postings across segments.
///
/// Segment bases are assigned in reader order, so concatenation preserves
/// ascending global document ids.
#[derive(Debug)]
pub struct MultiPostings {
    legs: Vec<(u64, SegmentPostings)>,
    current: usize,
}

impl MultiPostings {
    /// True when every leg is exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.current >= self.legs.len()
    }

    /// Current global document id.
    pub fn doc_id(&self) -> u64 {
        match self.legs.get(self.current) {
            Some((base, postings)) => base + postings.doc_id(),
            None => u64::MAX,
        }
    }

    /// Weight of the current posting.
    pub fn weight(&self) -> f32 {
        self.legs
            .get(self.current)
            .map(|(_, postings)| postings.weight())
            .unwrap_or(0.0)
    }

    /// Advance to the next posting.
    pub fn advance(&mut self) -> Result<bool> {
        let Some((_, postings)) = self.legs.get_mut(self.current) else {
            return Ok(false);
        };
        if !postings.advance()? {
            self.current += 1;
        }
        Ok(!self.is_exhausted())
    }

    /// Advance to the first posting with global id `>= target`.
    pub fn skip_to(&mut self, target: u64) -> Result<bool> {
        while let Some((base, postings)) = self.legs.get_mut(self.current) {
            if *base + postings.doc_id() >= target {
                return Ok(true);
            }
            let local_target = target.saturating_sub(*base);
            if postings.skip_to(local_target)? {
                return Ok(true);
            }
            self.current += 1;
        }
        Ok(false)
    }
}
