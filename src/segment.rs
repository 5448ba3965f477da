//! Segments: the immutable units of the index.
//!
//! A segment is written once by a flush or a merge and never rewritten.
//! Deletions attach a copy-on-write live-docs file; the segment's data
//! files are untouched until the segment is merged away and garbage
//! collected.

use rand::Rng;

use crate::codec::columns::ColumnReader;
use crate::codec::lengths::LengthsReader;
use crate::codec::stored::StoredReader;
use crate::codec::terms::TermDictReader;
use crate::codec::vectors::VectorsReader;
use crate::codec::{read_live_docs, TermInfo};
use crate::error::Result;
use crate::schema::Schema;
use crate::storage::{Storage, StorageInput};
use crate::util::bitset::BitSet;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// A globally unique segment identifier: 16 hex digits of a random u64.
pub type SegmentId = String;

/// Generate a fresh segment id.
pub fn new_segment_id() -> SegmentId {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

/// Per-field collection statistics carried in the segment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTotal {
    /// Field name.
    pub field: String,
    /// Sum of field lengths over all documents (including deleted ones;
    /// statistics drift from deletions is reclaimed at merge).
    pub total_length: u64,
    /// Number of documents carrying the field.
    pub docs_with_field: u64,
}

/// The table-of-contents record for one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Segment id.
    pub id: SegmentId,
    /// Total document slots, including deleted ones.
    pub max_doc: u64,
    /// Live (undeleted) documents.
    pub doc_count: u64,
    /// Generation of the live-docs file; 0 means no deletions file.
    pub del_gen: u64,
    /// Number of deleted documents.
    pub deletion_count: u64,
    /// Total size of the segment's files in bytes.
    pub byte_size: u64,
    /// Per-field length totals for scoring.
    pub field_totals: Vec<FieldTotal>,
}

impl SegmentMeta {
    /// A fresh record for a newly written segment.
    pub fn new(id: SegmentId, max_doc: u64) -> Self {
        SegmentMeta {
            id,
            max_doc,
            doc_count: max_doc,
            del_gen: 0,
            deletion_count: 0,
            byte_size: 0,
            field_totals: Vec::new(),
        }
    }

    /// Name of the term-dictionary file.
    pub fn terms_file(&self) -> String {
        format!("{}.trm", self.id)
    }

    /// Name of the postings file.
    pub fn postings_file(&self) -> String {
        format!("{}.pst", self.id)
    }

    /// Name of the lengths file.
    pub fn lengths_file(&self) -> String {
        format!("{}.len", self.id)
    }

    /// Name of the stored-fields file.
    pub fn stored_file(&self) -> String {
        format!("{}.fld", self.id)
    }

    /// Name of a column file.
    pub fn column_file(&self, field: &str) -> String {
        format!("{}.col.{}", self.id, field)
    }

    /// Name of the vectors file.
    pub fn vectors_file(&self) -> String {
        format!("{}.vec", self.id)
    }

    /// Name of the current live-docs file, if deletions exist.
    pub fn live_docs_file(&self) -> Option<String> {
        (self.del_gen > 0).then(|| format!("{}_{}.del", self.id, self.del_gen))
    }

    /// True when some documents are deleted.
    pub fn has_deletions(&self) -> bool {
        self.deletion_count > 0
    }

    /// Every file belonging to this segment under `schema`, including the
    /// current live-docs file.
    pub fn files(&self, schema: &Schema) -> Vec<String> {
        let mut files = vec![
            self.terms_file(),
            self.postings_file(),
            self.lengths_file(),
            self.stored_file(),
        ];
        let mut vectored = false;
        for (_, name, def) in schema.iter() {
            if def.column.is_some() {
                files.push(self.column_file(name));
            }
            vectored |= def.vectors;
        }
        if vectored {
            files.push(self.vectors_file());
        }
        if let Some(live) = self.live_docs_file() {
            files.push(live);
        }
        files
    }

    /// Fraction of the segment that is deleted.
    pub fn deletion_ratio(&self) -> f64 {
        if self.max_doc == 0 {
            0.0
        } else {
            self.deletion_count as f64 / self.max_doc as f64
        }
    }
}

/// The opened, read-side bundle of one segment's codec readers.
///
/// Immutable and safe to share across threads; posting cursors clone their
/// own input views.
pub struct Segment {
    meta: SegmentMeta,
    terms: TermDictReader,
    postings_input: Box<dyn StorageInput>,
    lengths: LengthsReader,
    stored: StoredReader,
    columns: AHashMap<u16, ColumnReader>,
    vectors: Option<VectorsReader>,
    live_docs: Option<BitSet>,
}

impl Segment {
    /// Open every file of `meta` from `storage`.
    pub fn open(storage: &dyn Storage, schema: &Schema, meta: SegmentMeta) -> Result<Self> {
        let terms = TermDictReader::open(storage.open_input(&meta.terms_file())?)?;
        let postings_input = storage.open_input(&meta.postings_file())?;
        let lengths = LengthsReader::open(storage.open_input(&meta.lengths_file())?)?;
        let stored = StoredReader::open(storage.open_input(&meta.stored_file())?)?;

        let mut columns = AHashMap::new();
        let mut any_vectors = false;
        for (field_id, name, def) in schema.iter() {
            if def.column.is_some() {
                let file = meta.column_file(name);
                if storage.file_exists(&file) {
                    columns.insert(field_id, ColumnReader::open(storage.open_input(&file)?)?);
                }
            }
            any_vectors |= def.vectors;
        }

        let vectors = if any_vectors && storage.file_exists(&meta.vectors_file()) {
            Some(VectorsReader::open(
                storage.open_input(&meta.vectors_file())?,
            )?)
        } else {
            None
        };

        let live_docs = match meta.live_docs_file() {
            Some(file) => Some(read_live_docs(storage, &file)?),
            None => None,
        };

        Ok(Segment {
            meta,
            terms,
            postings_input,
            lengths,
            stored,
            columns,
            vectors,
            live_docs,
        })
    }

    /// The segment record.
    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    /// The term dictionary.
    pub fn terms(&self) -> &TermDictReader {
        &self.terms
    }

    /// A fresh input view over the postings file.
    pub fn postings_input(&self) -> Result<Box<dyn StorageInput>> {
        self.postings_input.clone_input()
    }

    /// The lengths reader.
    pub fn lengths(&self) -> &LengthsReader {
        &self.lengths
    }

    /// The stored-fields reader.
    pub fn stored(&self) -> &StoredReader {
        &self.stored
    }

    /// The column for a field, if any.
    pub fn column(&self, field_id: u16) -> Option<&ColumnReader> {
        self.columns.get(&field_id)
    }

    /// The vectors reader, if the segment has one.
    pub fn vectors(&self) -> Option<&VectorsReader> {
        self.vectors.as_ref()
    }

    /// The live-docs bitmap; `None` means every document is live.
    pub fn live_docs(&self) -> Option<&BitSet> {
        self.live_docs.as_ref()
    }

    /// True when `doc_id` has been deleted.
    pub fn is_deleted(&self, doc_id: u64) -> bool {
        match &self.live_docs {
            Some(live) => !live.contains(doc_id as usize),
            None => false,
        }
    }

    /// Exact term statistics, if the term exists.
    pub fn term_info(&self, field_id: u16, term: &[u8]) -> Result<Option<TermInfo>> {
        self.terms.get(&crate::codec::term_key(field_id, term))
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.meta.id)
            .field("max_doc", &self.meta.max_doc)
            .field("doc_count", &self.meta.doc_count)
            .field("del_gen", &self.meta.del_gen)
            .finish()
    }
}
