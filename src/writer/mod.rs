//! The index writer: buffering, flushing, deleting, merging, committing.
//!
//! A writer holds the single advisory write lock for its whole life.
//! Added documents accumulate in one or more segment buffers (one per
//! `procs`); a buffer's posting pool is bounded by the memory budget and
//! spills sorted runs to temporary files, which the flush merges back in
//! one pass. `commit` turns buffers into immutable segments, applies
//! queued deletions copy-on-write, runs the merge policy, atomically
//! rotates the table of contents and sweeps unreferenced files. `cancel`
//! (or dropping an unfinished writer) discards everything and releases
//! the lock.

pub mod policy;

use std::collections::HashMap;
use std::sync::Arc;

use ahash::AHashMap;
use rayon::prelude::*;

use crate::analysis::{AnalyzerRegistry, TokenStream};
use crate::codec::columns::ColumnWriter;
use crate::codec::lengths::write_lengths;
use crate::codec::postings::PostingsWriter;
use crate::codec::stored::StoredWriter;
use crate::codec::terms::TermDictWriter;
use crate::codec::vectors::{write_vectors, DocVector};
use crate::codec::{term_key, write_live_docs, Posting};
use crate::document::{Document, FieldValue};
use crate::error::{Result, SalixError};
use crate::index::Toc;
use crate::query::{Query, SearchContext, DEFAULT_TERM_CAP};
use crate::reader::{MultiReader, SegmentReader};
use crate::schema::{numeric_key_bytes, FieldDef, FieldKind, Schema};
use crate::scoring::Frequency;
use crate::segment::{new_segment_id, FieldTotal, SegmentMeta};
use crate::storage::{Storage, StorageInput, StructReader, StructWriter};
use crate::util::bitset::BitSet;
use crate::writer::policy::{MergePolicy, TieredMergePolicy};

/// Writer tuning knobs.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Memory budget for the in-memory posting pools, in megabytes.
    pub buffer_mb: usize,
    /// Number of independent segment buffers filled round-robin and
    /// flushed in parallel. Each produces its own segment.
    pub procs: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            buffer_mb: 64,
            procs: 1,
        }
    }
}

/// What a commit does beyond flushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Flush, apply deletions, run the merge policy.
    #[default]
    Normal,
    /// Replace the whole index with only this writer's new content.
    Clear,
    /// Force a full merge down to one segment.
    Optimize,
}

/// One term's accumulating posting list in the pool.
#[derive(Debug, Default)]
struct PostingBuilder {
    postings: Vec<Posting>,
}

/// An independent in-memory segment under construction.
#[derive(Debug, Default)]
struct SegmentBuffer {
    pool: AHashMap<(u16, Vec<u8>), PostingBuilder>,
    pool_bytes: usize,
    spill_runs: Vec<String>,
    next_doc: u64,
    stored: Vec<HashMap<String, FieldValue>>,
    lengths: AHashMap<u16, Vec<u32>>,
    columns: AHashMap<u16, Vec<Option<FieldValue>>>,
    vectors: AHashMap<u16, Vec<Option<DocVector>>>,
    unique_terms: AHashMap<(u16, Vec<u8>), u64>,
    deleted: Vec<u64>,
    field_totals: AHashMap<u16, (u64, u64)>,
}

/// Token accumulation for one term within one document.
#[derive(Debug, Default)]
struct TermAccumulator {
    frequency: u32,
    weight: f32,
    positions: Vec<u32>,
    characters: Vec<(u32, u32)>,
    boosts: Vec<f32>,
}

impl SegmentBuffer {
    /// Index one document; returns the unique terms it carries.
    fn add_document(
        &mut self,
        schema: &Schema,
        analyzers: &AnalyzerRegistry,
        doc: &Document,
    ) -> Result<Vec<(u16, Vec<u8>)>> {
        for (name, _) in doc.iter() {
            if schema.field(name).is_none() {
                return Err(SalixError::NoSuchField(name.clone()));
            }
        }

        let doc_id = self.next_doc;
        self.next_doc += 1;

        let mut stored_map = HashMap::new();
        let mut unique_terms = Vec::new();

        for (field_id, name, def) in schema.iter() {
            let value = doc.get_field(name);

            if def.column.is_some() {
                let column = self.columns.entry(field_id).or_default();
                pad_to(column, doc_id as usize, None);
                column.push(value.cloned());
            }

            let Some(value) = value else {
                continue;
            };

            if def.stored {
                stored_map.insert(name.to_string(), value.clone());
            }

            if !def.indexed {
                continue;
            }

            let terms = self.index_field_value(field_id, name, def, value, analyzers)?;
            if def.unique {
                if let Some((term, _)) = terms.first() {
                    let key = (field_id, term.clone());
                    if let Some(previous) = self.unique_terms.insert(key, doc_id) {
                        self.deleted.push(previous);
                    }
                    unique_terms.push((field_id, term.clone()));
                }
            }

            let token_count: u32 = terms.iter().map(|(_, acc)| acc.frequency).sum();
            let lengths = self.lengths.entry(field_id).or_default();
            pad_to(lengths, doc_id as usize, 0);
            lengths.push(token_count);
            let totals = self.field_totals.entry(field_id).or_insert((0, 0));
            totals.0 += token_count as u64;
            totals.1 += 1;

            if def.vectors {
                let mut entries: DocVector = terms
                    .iter()
                    .map(|(term, acc)| (term.clone(), acc.positions.clone()))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                let vectors = self.vectors.entry(field_id).or_default();
                pad_to(vectors, doc_id as usize, None);
                vectors.push(Some(entries));
            }

            for (term, acc) in terms {
                self.pool_bytes += 48 + term.len() + acc.positions.len() * 6;
                let builder = self
                    .pool
                    .entry((field_id, term))
                    .or_default();
                builder.postings.push(Posting {
                    doc_id,
                    frequency: acc.frequency,
                    weight: acc.weight,
                    positions: if def.format.positions {
                        acc.positions
                    } else {
                        Vec::new()
                    },
                    characters: if def.format.characters {
                        acc.characters
                    } else {
                        Vec::new()
                    },
                    boosts: if def.format.position_boosts {
                        acc.boosts
                    } else {
                        Vec::new()
                    },
                });
            }
        }

        self.stored.push(stored_map);
        Ok(unique_terms)
    }

    /// Analyze one field value into per-term accumulators, in first-seen
    /// order.
    fn index_field_value(
        &mut self,
        _field_id: u16,
        name: &str,
        def: &FieldDef,
        value: &FieldValue,
        analyzers: &AnalyzerRegistry,
    ) -> Result<Vec<(Vec<u8>, TermAccumulator)>> {
        let mut order: Vec<Vec<u8>> = Vec::new();
        let mut accs: AHashMap<Vec<u8>, TermAccumulator> = AHashMap::new();

        match def.kind {
            FieldKind::Text | FieldKind::Id => {
                let text = value.to_text().ok_or_else(|| {
                    SalixError::field(format!(
                        "field '{name}' expects text, got {value}"
                    ))
                })?;
                let analyzer_name = def.analyzer.as_deref().ok_or_else(|| {
                    SalixError::field(format!("field '{name}' has no analyzer"))
                })?;
                let analyzer = analyzers.get(analyzer_name)?;
                let mut stream = analyzer.analyze(&text);
                while let Some(token) = stream.next_token() {
                    let term = token.text.as_bytes().to_vec();
                    let acc = accs.entry(term.clone()).or_insert_with(|| {
                        order.push(term.clone());
                        TermAccumulator::default()
                    });
                    acc.frequency += 1;
                    acc.weight += token.boost;
                    acc.positions.push(token.position);
                    acc.characters.push((token.start_offset, token.end_offset));
                    acc.boosts.push(token.boost);
                }
            }
            FieldKind::Numeric | FieldKind::DateTime | FieldKind::Boolean => {
                let key = value.numeric_key().ok_or_else(|| {
                    SalixError::field(format!(
                        "field '{name}' expects a numeric value, got {value}"
                    ))
                })?;
                let term = numeric_key_bytes(key).to_vec();
                order.push(term.clone());
                accs.insert(
                    term,
                    TermAccumulator {
                        frequency: 1,
                        weight: 1.0,
                        positions: vec![0],
                        characters: Vec::new(),
                        boosts: vec![1.0],
                    },
                );
            }
            FieldKind::Stored => {
                return Err(SalixError::field(format!(
                    "field '{name}' is stored-only but marked indexed"
                )))
            }
        }

        Ok(order
            .into_iter()
            .map(|term| {
                let acc = accs.remove(&term).expect("accumulated term");
                (term, acc)
            })
            .collect())
    }

    /// Spill the pool to a sorted run file.
    fn spill(&mut self, storage: &dyn Storage) -> Result<()> {
        if self.pool.is_empty() {
            return Ok(());
        }
        let mut entries: Vec<((u16, Vec<u8>), PostingBuilder)> =
            std::mem::take(&mut self.pool).into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let (name, output) = storage.create_temp_output("spill_")?;
        let mut writer = StructWriter::new(output);
        writer.write_varint(entries.len() as u64)?;
        for ((field_id, term), builder) in entries {
            writer.write_bytes(&term_key(field_id, &term))?;
            write_run_postings(&mut writer, &builder.postings)?;
        }
        writer.close_unchecked()?;

        log::debug!("spilled posting pool to {name}");
        self.spill_runs.push(name);
        self.pool_bytes = 0;
        Ok(())
    }

    /// True when nothing was buffered.
    fn is_empty(&self) -> bool {
        self.next_doc == 0 && self.spill_runs.is_empty()
    }

    /// Flush this buffer into a new segment.
    fn flush(mut self, storage: &dyn Storage, schema: &Schema) -> Result<Option<SegmentMeta>> {
        if self.is_empty() {
            return Ok(None);
        }
        let max_doc = self.next_doc;

        // Sorted in-memory entries.
        let mut entries: Vec<(Vec<u8>, Vec<Posting>)> = std::mem::take(&mut self.pool)
            .into_iter()
            .map(|((field_id, term), builder)| (term_key(field_id, &term), builder.postings))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        // Merge spill runs with the live pool.
        let mut runs = Vec::with_capacity(self.spill_runs.len());
        for run in &self.spill_runs {
            runs.push(RunCursor::open(storage.open_input(run)?)?);
        }
        let mut source = MergedPostingSource::new(runs, entries);

        let mut lengths: Vec<(u16, Vec<u32>)> = Vec::new();
        for (field_id, _, def) in schema.iter() {
            if def.indexed && !matches!(def.kind, FieldKind::Stored) {
                let mut field_lengths = self.lengths.remove(&field_id).unwrap_or_default();
                pad_to(&mut field_lengths, max_doc as usize, 0);
                lengths.push((field_id, field_lengths));
            }
        }

        let mut stored = std::mem::take(&mut self.stored);
        pad_to(&mut stored, max_doc as usize, HashMap::new());

        let mut columns: Vec<(String, ColumnWriter)> = Vec::new();
        for (field_id, name, def) in schema.iter() {
            if let Some(kind) = def.column {
                let mut values = self.columns.remove(&field_id).unwrap_or_default();
                pad_to(&mut values, max_doc as usize, None);
                let mut writer = ColumnWriter::new(kind);
                for value in &values {
                    writer.push(value.as_ref())?;
                }
                columns.push((name.to_string(), writer));
            }
        }

        let mut vectors: Vec<(u16, Vec<Option<DocVector>>)> = Vec::new();
        for (field_id, _, def) in schema.iter() {
            if def.vectors {
                let mut docs = self.vectors.remove(&field_id).unwrap_or_default();
                pad_to(&mut docs, max_doc as usize, None);
                vectors.push((field_id, docs));
            }
        }

        let field_totals = schema
            .iter()
            .filter_map(|(field_id, name, _)| {
                self.field_totals.get(&field_id).map(|&(total, docs)| FieldTotal {
                    field: name.to_string(),
                    total_length: total,
                    docs_with_field: docs,
                })
            })
            .collect();

        let data = SegmentDocData {
            max_doc,
            lengths,
            stored,
            columns,
            vectors,
            deleted: std::mem::take(&mut self.deleted),
            field_totals,
        };
        let meta = write_segment_files(storage, schema, &mut source, data)?;

        for run in &self.spill_runs {
            if let Err(e) = storage.delete_file(run) {
                log::warn!("could not remove spill run {run}: {e}");
            }
        }
        Ok(Some(meta))
    }
}

fn pad_to<T: Clone>(values: &mut Vec<T>, len: usize, fill: T) {
    while values.len() < len {
        values.push(fill.clone());
    }
}

fn write_run_postings(
    writer: &mut StructWriter<dyn crate::storage::StorageOutput>,
    postings: &[Posting],
) -> Result<()> {
    writer.write_varint(postings.len() as u64)?;
    let mut previous = 0u64;
    for posting in postings {
        writer.write_varint(posting.doc_id - previous)?;
        previous = posting.doc_id;
        writer.write_varint(posting.frequency as u64)?;
        writer.write_f32(posting.weight)?;
        writer.write_delta_u32s(&posting.positions)?;
        writer.write_varint(posting.characters.len() as u64)?;
        let mut prev_start = 0u32;
        for &(start, end) in &posting.characters {
            writer.write_varint((start - prev_start) as u64)?;
            writer.write_varint((end - start) as u64)?;
            prev_start = start;
        }
        writer.write_varint(posting.boosts.len() as u64)?;
        for &boost in &posting.boosts {
            writer.write_f32(boost)?;
        }
    }
    Ok(())
}

/// A cursor over one spill run, peeking one entry ahead.
struct RunCursor {
    reader: StructReader<dyn StorageInput>,
    remaining: u64,
    current: Option<(Vec<u8>, Vec<Posting>)>,
}

impl RunCursor {
    fn open(input: Box<dyn StorageInput>) -> Result<Self> {
        let mut reader = StructReader::new(input);
        let remaining = reader.read_varint()?;
        let mut cursor = RunCursor {
            reader,
            remaining,
            current: None,
        };
        cursor.advance()?;
        Ok(cursor)
    }

    fn advance(&mut self) -> Result<()> {
        if self.remaining == 0 {
            self.current = None;
            return Ok(());
        }
        self.remaining -= 1;
        let key = self.reader.read_bytes()?;
        let count = self.reader.read_varint()? as usize;
        let mut postings = Vec::with_capacity(count);
        let mut doc_id = 0u64;
        for _ in 0..count {
            doc_id += self.reader.read_varint()?;
            let frequency = self.reader.read_varint()? as u32;
            let weight = self.reader.read_f32()?;
            let positions = self.reader.read_delta_u32s()?;
            let char_count = self.reader.read_varint()? as usize;
            let mut characters = Vec::with_capacity(char_count);
            let mut start = 0u32;
            for _ in 0..char_count {
                start += self.reader.read_varint()? as u32;
                let len = self.reader.read_varint()? as u32;
                characters.push((start, start + len));
            }
            let boost_count = self.reader.read_varint()? as usize;
            let mut boosts = Vec::with_capacity(boost_count);
            for _ in 0..boost_count {
                boosts.push(self.reader.read_f32()?);
            }
            postings.push(Posting {
                doc_id,
                frequency,
                weight,
                positions,
                characters,
                boosts,
            });
        }
        self.current = Some((key, postings));
        Ok(())
    }
}

/// A stream of `(dictionary key, postings)` pairs in strictly ascending
/// key order.
trait PostingSource {
    /// The next term, or `None` at the end.
    fn next_term(&mut self) -> Result<Option<(Vec<u8>, Vec<Posting>)>>;
}

/// K-way merge of spill runs and the live pool. Runs were written in
/// chronological order and document ids only grow, so concatenating
/// same-key lists source-by-source keeps postings ascending.
struct MergedPostingSource {
    runs: Vec<RunCursor>,
    pool: std::vec::IntoIter<(Vec<u8>, Vec<Posting>)>,
    pool_current: Option<(Vec<u8>, Vec<Posting>)>,
}

impl MergedPostingSource {
    fn new(runs: Vec<RunCursor>, pool: Vec<(Vec<u8>, Vec<Posting>)>) -> Self {
        let mut pool = pool.into_iter();
        let pool_current = pool.next();
        MergedPostingSource {
            runs,
            pool,
            pool_current,
        }
    }
}

impl PostingSource for MergedPostingSource {
    fn next_term(&mut self) -> Result<Option<(Vec<u8>, Vec<Posting>)>> {
        // The minimum key over all sources.
        let mut min_key: Option<Vec<u8>> = None;
        for run in &self.runs {
            if let Some((key, _)) = &run.current {
                if min_key.as_ref().map_or(true, |min| key < min) {
                    min_key = Some(key.clone());
                }
            }
        }
        if let Some((key, _)) = &self.pool_current {
            if min_key.as_ref().map_or(true, |min| key < min) {
                min_key = Some(key.clone());
            }
        }
        let Some(key) = min_key else {
            return Ok(None);
        };

        let mut postings = Vec::new();
        for run in &mut self.runs {
            if run.current.as_ref().is_some_and(|(k, _)| *k == key) {
                let (_, mut chunk) = run.current.take().expect("checked");
                postings.append(&mut chunk);
                run.advance()?;
            }
        }
        if self.pool_current.as_ref().is_some_and(|(k, _)| *k == key) {
            let (_, mut chunk) = self.pool_current.take().expect("checked");
            postings.append(&mut chunk);
            self.pool_current = self.pool.next();
        }
        Ok(Some((key, postings)))
    }
}

/// Everything but the postings of a segment about to be written.
struct SegmentDocData {
    max_doc: u64,
    lengths: Vec<(u16, Vec<u32>)>,
    stored: Vec<HashMap<String, FieldValue>>,
    columns: Vec<(String, ColumnWriter)>,
    vectors: Vec<(u16, Vec<Option<DocVector>>)>,
    deleted: Vec<u64>,
    field_totals: Vec<FieldTotal>,
}

/// Write every file of one segment and return its record.
fn write_segment_files(
    storage: &dyn Storage,
    schema: &Schema,
    source: &mut dyn PostingSource,
    data: SegmentDocData,
) -> Result<SegmentMeta> {
    let id = new_segment_id();
    let mut meta = SegmentMeta::new(id.clone(), data.max_doc);

    // Postings and the term dictionary advance in lockstep.
    let mut postings_writer = PostingsWriter::new(storage.create_output(&meta.postings_file())?);
    let mut terms_writer = TermDictWriter::new(storage.create_output(&meta.terms_file())?);
    while let Some((key, postings)) = source.next_term()? {
        if postings.is_empty() {
            continue;
        }
        let (field_id, _) = crate::codec::split_term_key(&key)
            .ok_or_else(|| SalixError::indexing("malformed dictionary key"))?;
        let format = schema
            .field_by_id(field_id)
            .map(|def| def.format)
            .ok_or_else(|| SalixError::indexing(format!("unknown field id {field_id}")))?;
        let info = postings_writer.write_posting_list(format, &postings)?;
        terms_writer.add(&key, &info)?;
    }
    postings_writer.close()?;
    terms_writer.finish()?;

    write_lengths(storage.create_output(&meta.lengths_file())?, &data.lengths)?;

    let mut stored_writer = StoredWriter::new(storage.create_output(&meta.stored_file())?);
    for fields in &data.stored {
        stored_writer.append(fields)?;
    }
    stored_writer.finish()?;

    for (field, writer) in data.columns {
        writer.write(storage.create_output(&meta.column_file(&field))?)?;
    }

    if !data.vectors.is_empty() {
        write_vectors(storage.create_output(&meta.vectors_file())?, &data.vectors)?;
    }

    if !data.deleted.is_empty() {
        let mut live = BitSet::full(data.max_doc as usize);
        for &doc_id in &data.deleted {
            live.remove(doc_id as usize);
        }
        meta.del_gen = 1;
        meta.deletion_count = data.deleted.len() as u64;
        meta.doc_count = data.max_doc - meta.deletion_count;
        write_live_docs(storage, &meta.live_docs_file().expect("del gen set"), &live)?;
    }

    meta.field_totals = data.field_totals;
    let mut byte_size = 0;
    for file in meta.files(schema) {
        if storage.file_exists(&file) {
            byte_size += storage.file_size(&file)?;
        }
    }
    meta.byte_size = byte_size;

    log::debug!(
        "wrote segment {id}: {} docs ({} deleted), {} bytes",
        meta.max_doc,
        meta.deletion_count,
        meta.byte_size
    );
    Ok(meta)
}

/// Streams the k-way merge of several segments' dictionaries, renumbering
/// documents and dropping deleted ones.
struct DictMergeSource<'a> {
    readers: &'a [SegmentReader],
    doc_maps: &'a [Vec<Option<u64>>],
    cursors: Vec<Option<(Vec<u8>, crate::codec::TermInfo)>>,
    dict_cursors: Vec<crate::codec::terms::TermDictCursor>,
}

impl<'a> DictMergeSource<'a> {
    fn new(readers: &'a [SegmentReader], doc_maps: &'a [Vec<Option<u64>>]) -> Result<Self> {
        let mut dict_cursors = Vec::with_capacity(readers.len());
        let mut cursors = Vec::with_capacity(readers.len());
        for reader in readers {
            let mut cursor = reader.all_terms()?;
            cursors.push(cursor.next_entry()?);
            dict_cursors.push(cursor);
        }
        Ok(DictMergeSource {
            readers,
            doc_maps,
            cursors,
            dict_cursors,
        })
    }
}

impl PostingSource for DictMergeSource<'_> {
    fn next_term(&mut self) -> Result<Option<(Vec<u8>, Vec<Posting>)>> {
        loop {
            let mut min_key: Option<Vec<u8>> = None;
            for entry in self.cursors.iter().flatten() {
                if min_key.as_ref().map_or(true, |min| entry.0 < *min) {
                    min_key = Some(entry.0.clone());
                }
            }
            let Some(key) = min_key else {
                return Ok(None);
            };

            let (field_id, term) = crate::codec::split_term_key(&key)
                .ok_or_else(|| SalixError::indexing("malformed dictionary key"))?;
            let term = term.to_vec();

            let mut postings = Vec::new();
            for idx in 0..self.cursors.len() {
                let at_key = self.cursors[idx]
                    .as_ref()
                    .is_some_and(|(k, _)| *k == key);
                if !at_key {
                    continue;
                }
                // Re-read this term's postings through the live filter.
                if let Some(mut cursor) = self.readers[idx].postings_by_id(field_id, &term)? {
                    while !cursor.is_exhausted() {
                        let local = cursor.doc_id();
                        if let Some(new_doc) = self.doc_maps[idx][local as usize] {
                            postings.push(Posting {
                                doc_id: new_doc,
                                frequency: cursor.frequency(),
                                weight: cursor.weight(),
                                positions: cursor.positions().to_vec(),
                                characters: cursor.characters().to_vec(),
                                boosts: cursor.boosts().to_vec(),
                            });
                        }
                        if !cursor.advance()? {
                            break;
                        }
                    }
                }
                self.cursors[idx] = self.dict_cursors[idx].next_entry()?;
            }

            if postings.is_empty() {
                // Every posting belonged to deleted documents.
                continue;
            }
            return Ok(Some((key, postings)));
        }
    }
}

/// Merge `metas` into one new segment, dropping deleted documents and
/// recomputing statistics.
pub(crate) fn merge_segments(
    storage: &dyn Storage,
    schema: &Arc<Schema>,
    metas: &[SegmentMeta],
) -> Result<SegmentMeta> {
    let mut readers = Vec::with_capacity(metas.len());
    for meta in metas {
        readers.push(SegmentReader::open(storage, Arc::clone(schema), meta.clone())?);
    }

    // Compact renumbering over live documents, in segment order.
    let mut doc_maps: Vec<Vec<Option<u64>>> = Vec::with_capacity(readers.len());
    let mut next_doc = 0u64;
    for reader in &readers {
        let mut map = Vec::with_capacity(reader.max_doc() as usize);
        for local in 0..reader.max_doc() {
            if reader.is_deleted(local) {
                map.push(None);
            } else {
                map.push(Some(next_doc));
                next_doc += 1;
            }
        }
        doc_maps.push(map);
    }
    let max_doc = next_doc;

    // Per-document data of live documents.
    let mut lengths: Vec<(u16, Vec<u32>)> = Vec::new();
    for (field_id, _, def) in schema.iter() {
        if def.indexed && !matches!(def.kind, FieldKind::Stored) {
            let mut merged = Vec::with_capacity(max_doc as usize);
            for reader in &readers {
                for local in 0..reader.max_doc() {
                    if !reader.is_deleted(local) {
                        merged.push(reader.field_length_by_id(field_id, local));
                    }
                }
            }
            lengths.push((field_id, merged));
        }
    }

    let mut stored = Vec::with_capacity(max_doc as usize);
    for reader in &readers {
        for local in 0..reader.max_doc() {
            if !reader.is_deleted(local) {
                stored.push(reader.stored_fields(local)?);
            }
        }
    }

    let mut columns: Vec<(String, ColumnWriter)> = Vec::new();
    for (_, name, def) in schema.iter() {
        if let Some(kind) = def.column {
            let mut writer = ColumnWriter::new(kind);
            for reader in &readers {
                let column = reader.column(name)?;
                for local in 0..reader.max_doc() {
                    if !reader.is_deleted(local) {
                        let value = column.and_then(|c| c.value(local));
                        writer.push(value.as_ref())?;
                    }
                }
            }
            columns.push((name.to_string(), writer));
        }
    }

    let mut vectors: Vec<(u16, Vec<Option<DocVector>>)> = Vec::new();
    for (field_id, name, def) in schema.iter() {
        if def.vectors {
            let mut merged = Vec::with_capacity(max_doc as usize);
            for reader in &readers {
                for local in 0..reader.max_doc() {
                    if !reader.is_deleted(local) {
                        merged.push(reader.vector(local, name)?);
                    }
                }
            }
            vectors.push((field_id, merged));
        }
    }

    // Recompute length totals from the merged arrays; this sheds the
    // statistics drift deleted documents caused.
    let mut field_totals = Vec::new();
    for (field_id, field_lengths) in &lengths {
        let total: u64 = field_lengths.iter().map(|&len| len as u64).sum();
        let docs = field_lengths.iter().filter(|&&len| len > 0).count() as u64;
        if docs > 0 {
            if let Some(name) = schema.field_name(*field_id) {
                field_totals.push(FieldTotal {
                    field: name.to_string(),
                    total_length: total,
                    docs_with_field: docs,
                });
            }
        }
    }

    let mut source = DictMergeSource::new(&readers, &doc_maps)?;
    let data = SegmentDocData {
        max_doc,
        lengths,
        stored,
        columns,
        vectors,
        deleted: Vec::new(),
        field_totals,
    };
    let merged = write_segment_files(storage, schema, &mut source, data)?;
    log::info!(
        "merged {} segments into {} ({} live docs)",
        metas.len(),
        merged.id,
        merged.doc_count
    );
    Ok(merged)
}

/// The single-writer handle on an index.
pub struct IndexWriter {
    storage: Arc<dyn Storage>,
    name: String,
    schema: Schema,
    analyzers: AnalyzerRegistry,
    config: WriterConfig,
    lock: Option<Box<dyn crate::storage::StorageLock>>,
    generation: u64,
    segments: Vec<SegmentMeta>,
    buffers: Vec<SegmentBuffer>,
    next_buffer: usize,
    pinned_buffer: Option<usize>,
    group_depth: usize,
    pending_deletes: Vec<Query>,
    merge_policy: Box<dyn MergePolicy>,
    schema_dirty: bool,
    finished: bool,
}

impl IndexWriter {
    /// Acquire the write lock and load the current generation.
    pub(crate) fn open(
        storage: Arc<dyn Storage>,
        name: String,
        analyzers: AnalyzerRegistry,
        config: WriterConfig,
    ) -> Result<Self> {
        let lock = storage.acquire_lock(&format!("{name}_WRITELOCK"))?;
        let toc = Toc::load_latest(storage.as_ref(), &name)?;

        let procs = config.procs.max(1);
        let buffers = (0..procs).map(|_| SegmentBuffer::default()).collect();

        Ok(IndexWriter {
            storage,
            name,
            schema: toc.schema,
            analyzers,
            config,
            lock: Some(lock),
            generation: toc.generation,
            segments: toc.segments,
            buffers,
            next_buffer: 0,
            pinned_buffer: None,
            group_depth: 0,
            pending_deletes: Vec::new(),
            merge_policy: Box::new(TieredMergePolicy::default()),
            schema_dirty: false,
            finished: false,
        })
    }

    /// Replace the merge policy.
    pub fn set_merge_policy(&mut self, policy: Box<dyn MergePolicy>) {
        self.merge_policy = policy;
    }

    /// The writer's view of the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Add a field to the schema; persisted at the next commit.
    pub fn add_field(&mut self, name: &str, def: FieldDef) -> Result<()> {
        self.schema.add_field(name, def)?;
        self.schema_dirty = true;
        Ok(())
    }

    /// Remove a field from the schema going forward.
    pub fn remove_field(&mut self, name: &str) -> Result<()> {
        self.schema.remove_field(name)?;
        self.schema_dirty = true;
        Ok(())
    }

    /// Number of documents buffered and not yet committed.
    pub fn buffered_docs(&self) -> u64 {
        self.buffers.iter().map(|buffer| buffer.next_doc).sum()
    }

    fn budget_per_buffer(&self) -> usize {
        (self.config.buffer_mb * 1024 * 1024 / self.buffers.len().max(1)).max(64 * 1024)
    }

    fn pick_buffer(&mut self) -> usize {
        if let Some(pinned) = self.pinned_buffer {
            return pinned;
        }
        let idx = self.next_buffer;
        self.next_buffer = (self.next_buffer + 1) % self.buffers.len();
        idx
    }

    /// Buffer one document for indexing.
    pub fn add_document(&mut self, doc: Document) -> Result<()> {
        let idx = self.pick_buffer();
        let unique_terms = {
            let buffer = &mut self.buffers[idx];
            buffer.add_document(&self.schema, &self.analyzers, &doc)?
        };

        // A unique term displaces buffered twins in *other* buffers too.
        for (field_id, term) in &unique_terms {
            for (other_idx, buffer) in self.buffers.iter_mut().enumerate() {
                if other_idx == idx {
                    continue;
                }
                if let Some(previous) = buffer.unique_terms.remove(&(*field_id, term.clone())) {
                    buffer.deleted.push(previous);
                }
            }
        }

        let budget = self.budget_per_buffer();
        let buffer = &mut self.buffers[idx];
        if buffer.pool_bytes > budget {
            buffer.spill(self.storage.as_ref())?;
        }
        Ok(())
    }

    /// Delete committed and buffered documents carrying any of this
    /// document's unique terms, then add it.
    pub fn update_document(&mut self, doc: Document) -> Result<()> {
        let unique_fields: Vec<String> = self
            .schema
            .unique_fields()
            .map(str::to_string)
            .collect();
        for field in unique_fields {
            if let Some(value) = doc.get_field(&field) {
                if let Some(text) = value.to_text() {
                    self.delete_by_term(&field, &text)?;
                }
            }
        }
        self.add_document(doc)
    }

    /// Queue a deletion of every document containing `(field, text)`.
    pub fn delete_by_term(&mut self, field: &str, text: &str) -> Result<()> {
        let def = self.schema.expect_field(field)?;
        if def.unique {
            // Drop buffered documents carrying the term right away, so
            // later adds within this session win.
            if let Some(bytes) = self.term_bytes(field, text)? {
                let field_id = self.schema.expect_field_id(field)?;
                for buffer in &mut self.buffers {
                    if let Some(previous) = buffer.unique_terms.remove(&(field_id, bytes.clone()))
                    {
                        buffer.deleted.push(previous);
                    }
                }
            }
        }
        self.pending_deletes.push(Query::term(field, text));
        Ok(())
    }

    /// Queue a deletion of every document matching `query` in the
    /// committed segments.
    pub fn delete_by_query(&mut self, query: Query) -> Result<()> {
        self.pending_deletes.push(query);
        Ok(())
    }

    fn term_bytes(&self, field: &str, text: &str) -> Result<Option<Vec<u8>>> {
        let def = self.schema.expect_field(field)?;
        match def.kind {
            FieldKind::Text | FieldKind::Id => {
                let Some(name) = def.analyzer.as_deref() else {
                    return Ok(Some(text.as_bytes().to_vec()));
                };
                let analyzer = self.analyzers.get(name)?;
                let mut stream = analyzer.analyze(text);
                Ok(stream
                    .next_token()
                    .map(|token| token.text.as_bytes().to_vec()))
            }
            FieldKind::Numeric | FieldKind::DateTime | FieldKind::Boolean => {
                let value: i64 = text
                    .parse()
                    .map_err(|_| SalixError::query(format!("'{text}' is not numeric")))?;
                Ok(Some(numeric_key_bytes(value).to_vec()))
            }
            FieldKind::Stored => Err(SalixError::field(format!(
                "field '{field}' is stored-only"
            ))),
        }
    }

    /// Open a nested-group scope: documents added through the guard land
    /// contiguously in one segment. Groups cannot span commits.
    pub fn group(&mut self) -> GroupGuard<'_> {
        if self.group_depth == 0 {
            let idx = self.pick_buffer();
            self.pinned_buffer = Some(idx);
        }
        self.group_depth += 1;
        GroupGuard { writer: self }
    }

    fn end_group(&mut self) {
        self.group_depth = self.group_depth.saturating_sub(1);
        if self.group_depth == 0 {
            self.pinned_buffer = None;
        }
    }

    /// Evaluate queued deletions against the committed segments and
    /// rewrite their live-docs files copy-on-write.
    fn apply_deletes(&self, segments: &mut [SegmentMeta]) -> Result<bool> {
        if self.pending_deletes.is_empty() || segments.is_empty() {
            return Ok(false);
        }
        let schema = Arc::new(self.schema.clone());
        let reader = MultiReader::open(
            self.storage.as_ref(),
            schema,
            segments.to_vec(),
            self.generation,
        )?;
        let weighting = Frequency;
        let ctx = SearchContext {
            reader: &reader,
            weighting: &weighting,
            analyzers: &self.analyzers,
            term_cap: DEFAULT_TERM_CAP,
        };

        let mut hit_sets: Vec<BitSet> = segments
            .iter()
            .map(|meta| BitSet::new(meta.max_doc as usize))
            .collect();
        for query in &self.pending_deletes {
            let query = query.clone().normalize();
            for (idx, (_base, leaf)) in reader.leaves().enumerate() {
                let mut matcher = query.matcher(leaf, &ctx)?;
                while !matcher.is_exhausted() {
                    hit_sets[idx].insert(matcher.doc_id() as usize);
                    if !matcher.next()? {
                        break;
                    }
                }
            }
        }

        let mut changed = false;
        for (idx, hits) in hit_sets.into_iter().enumerate() {
            let new_deletions = hits.count();
            if new_deletions == 0 {
                continue;
            }
            let meta = &mut segments[idx];
            let mut live = match reader
                .leaves()
                .nth(idx)
                .and_then(|(_, leaf)| leaf.live_docs().cloned())
            {
                Some(live) => live,
                None => BitSet::full(meta.max_doc as usize),
            };
            for bit in hits.iter() {
                live.remove(bit);
            }
            meta.del_gen += 1;
            meta.deletion_count = meta.max_doc - live.count() as u64;
            meta.doc_count = live.count() as u64;
            write_live_docs(
                self.storage.as_ref(),
                &meta.live_docs_file().expect("del gen bumped"),
                &live,
            )?;
            changed = true;
            log::debug!(
                "segment {}: {} deletions (gen {})",
                meta.id,
                meta.deletion_count,
                meta.del_gen
            );
        }
        Ok(changed)
    }

    /// Flush, apply deletions, merge, and atomically publish a new
    /// generation. A commit with nothing to do leaves the generation
    /// unchanged. Consumes the writer and releases the lock.
    pub fn commit(mut self, mode: CommitMode) -> Result<u64> {
        if self.group_depth > 0 {
            return Err(SalixError::indexing("commit inside an open group"));
        }

        let mut dirty = self.schema_dirty;

        // Flush buffers to new segments, in parallel when configured.
        let buffers = std::mem::take(&mut self.buffers);
        let storage = Arc::clone(&self.storage);
        let schema = self.schema.clone();
        let flushed: Result<Vec<Option<SegmentMeta>>> = if buffers.len() > 1 {
            buffers
                .into_par_iter()
                .map(|buffer| buffer.flush(storage.as_ref(), &schema))
                .collect()
        } else {
            buffers
                .into_iter()
                .map(|buffer| buffer.flush(storage.as_ref(), &schema))
                .collect()
        };
        let new_metas: Vec<SegmentMeta> = flushed?.into_iter().flatten().collect();
        dirty |= !new_metas.is_empty();

        // Deletions against the pre-commit segments.
        let mut segments = self.segments.clone();
        dirty |= self.apply_deletes(&mut segments)?;

        match mode {
            CommitMode::Clear => {
                dirty |= !segments.is_empty();
                segments = new_metas;
            }
            CommitMode::Normal | CommitMode::Optimize => segments.extend(new_metas),
        }

        // Drop segments that became empty.
        let before = segments.len();
        segments.retain(|meta| meta.doc_count > 0);
        dirty |= segments.len() != before;

        let schema_arc = Arc::new(self.schema.clone());
        match mode {
            CommitMode::Optimize if segments.len() > 1 => {
                let merged = merge_segments(self.storage.as_ref(), &schema_arc, &segments)?;
                segments = vec![merged];
                dirty = true;
            }
            CommitMode::Normal => {
                for group in self.merge_policy.select_merges(&segments) {
                    let (to_merge, rest): (Vec<SegmentMeta>, Vec<SegmentMeta>) = segments
                        .into_iter()
                        .partition(|meta| group.contains(&meta.id));
                    segments = rest;
                    if to_merge.len() >= 2 {
                        let merged =
                            merge_segments(self.storage.as_ref(), &schema_arc, &to_merge)?;
                        if merged.doc_count > 0 {
                            segments.push(merged);
                        }
                        dirty = true;
                    } else {
                        segments.extend(to_merge);
                    }
                }
            }
            _ => {}
        }

        if !dirty {
            log::debug!("commit with no changes; staying at generation {}", self.generation);
            self.release_lock();
            self.finished = true;
            return Ok(self.generation);
        }

        // Publish the new generation atomically.
        let generation = self.generation + 1;
        let toc = Toc {
            generation,
            schema: self.schema.clone(),
            segments,
        };
        toc.write(self.storage.as_ref(), &self.name)?;

        self.sweep(&toc);
        log::info!(
            "committed generation {generation}: {} segments, {} docs",
            toc.segments.len(),
            toc.segments.iter().map(|meta| meta.doc_count).sum::<u64>()
        );

        self.release_lock();
        self.finished = true;
        Ok(generation)
    }

    /// Discard all buffered state, remove temp files and release the
    /// lock without writing a new generation.
    pub fn cancel(mut self) -> Result<()> {
        self.discard();
        self.release_lock();
        self.finished = true;
        Ok(())
    }

    fn discard(&mut self) {
        for buffer in &self.buffers {
            for run in &buffer.spill_runs {
                if let Err(e) = self.storage.delete_file(run) {
                    log::warn!("could not remove spill run {run}: {e}");
                }
            }
        }
        self.buffers.clear();
        self.pending_deletes.clear();
    }

    /// Delete files no current table of contents references: old TOC
    /// generations, replaced live-docs files and merged-away segments.
    fn sweep(&self, toc: &Toc) {
        let mut keep: std::collections::HashSet<String> = std::collections::HashSet::new();
        keep.insert(toc.file_name(&self.name));
        keep.insert(format!("{}_WRITELOCK", self.name));
        for meta in &toc.segments {
            for file in meta.files(&self.schema) {
                keep.insert(file);
            }
        }

        let files = match self.storage.list_files() {
            Ok(files) => files,
            Err(e) => {
                log::warn!("sweep could not list files: {e}");
                return;
            }
        };
        for file in files {
            if keep.contains(&file) {
                continue;
            }
            let stale_toc =
                file.starts_with(&format!("{}_", self.name)) && file.ends_with(".toc");
            let stale_segment = is_segment_file(&file);
            let stale_temp = file.ends_with(".tmp");
            if stale_toc || stale_segment || stale_temp {
                if let Err(e) = self.storage.delete_file(&file) {
                    log::warn!("sweep could not delete {file}: {e}");
                } else {
                    log::debug!("swept {file}");
                }
            }
        }
    }

    fn release_lock(&mut self) {
        if let Some(mut lock) = self.lock.take() {
            if let Err(e) = lock.release() {
                log::warn!("could not release write lock: {e}");
            }
        }
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.discard();
            self.release_lock();
        }
    }
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriter")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("segments", &self.segments.len())
            .field("buffered_docs", &self.buffered_docs())
            .finish()
    }
}

/// Does a file name look like it belongs to a segment (16 hex digits
/// followed by a role suffix)?
fn is_segment_file(name: &str) -> bool {
    let Some(prefix) = name.get(..16) else {
        return false;
    };
    if !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    matches!(name.as_bytes().get(16), Some(b'.') | Some(b'_'))
}

/// Scope guard for a nested document group.
pub struct GroupGuard<'a> {
    writer: &'a mut IndexWriter,
}

impl GroupGuard<'_> {
    /// Add a document inside the group.
    pub fn add_document(&mut self, doc: Document) -> Result<()> {
        self.writer.add_document(doc)
    }
}

impl Drop for GroupGuard<'_> {
    fn drop(&mut self) {
        self.writer.end_group();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_segment_file() {
        assert!(is_segment_file("00ff00ff00ff00ff.trm"));
        assert!(is_segment_file("00ff00ff00ff00ff.col.price"));
        assert!(is_segment_file("00ff00ff00ff00ff_2.del"));
        assert!(!is_segment_file("main_3.toc"));
        assert!(!is_segment_file("main_WRITELOCK"));
        assert!(!is_segment_file("short.bin"));
    }

    #[test]
    fn test_pad_to() {
        let mut values = vec![1u32];
        pad_to(&mut values, 4, 0);
        assert_eq!(values, vec![1, 0, 0, 0]);
        pad_to(&mut values, 2, 9);
        assert_eq!(values.len(), 4);
    }
}
