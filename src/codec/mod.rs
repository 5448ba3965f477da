//! The codec: on-disk byte layouts for segment files.
//!
//! One codec version corresponds to one file-format version; the version is
//! recorded in the table of contents and readers refuse generations written
//! by a different version. Every writer here is deterministic: identical
//! input ordering produces identical bytes.
//!
//! Per-segment files, keyed by segment id and role:
//!
//! | file | role |
//! |------|------|
//! | `<seg>.trm` | term dictionary (prefix-coded blocks + skip index) |
//! | `<seg>.pst` | postings (delta blocks with block-max headers) |
//! | `<seg>.len` | per-document field lengths |
//! | `<seg>.fld` | stored fields |
//! | `<seg>.col.<field>` | per-field sort/group column |
//! | `<seg>.vec` | forward term vectors |
//! | `<seg>_<delgen>.del` | live-docs bitmap (copy-on-write) |

pub mod columns;
pub mod lengths;
pub mod postings;
pub mod stored;
pub mod terms;
pub mod vectors;

use crate::error::Result;
use crate::storage::{Storage, StructReader, StructWriter};
use crate::util::bitset::BitSet;

/// Magic number at the head of a table of contents.
pub const TOC_MAGIC: u32 = 0x534C_5831;

/// The file-format version this codec reads and writes.
pub const FORMAT_VERSION: u32 = 1;

/// Maximum documents per posting block.
pub const POSTING_BLOCK_SIZE: usize = 128;

/// Maximum keys per term-dictionary block.
pub const TERM_BLOCK_SIZE: usize = 32;

/// Build the dictionary key for `(field, term)`: big-endian field id bytes
/// followed by the term bytes, so byte order equals `(field, term)` order.
pub fn term_key(field_id: u16, term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + term.len());
    key.extend_from_slice(&field_id.to_be_bytes());
    key.extend_from_slice(term);
    key
}

/// Split a dictionary key back into `(field_id, term_bytes)`.
pub fn split_term_key(key: &[u8]) -> Option<(u16, &[u8])> {
    if key.len() < 2 {
        return None;
    }
    let field_id = u16::from_be_bytes([key[0], key[1]]);
    Some((field_id, &key[2..]))
}

/// Statistics and location of one term's posting list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermInfo {
    /// Number of documents containing the term.
    pub doc_freq: u64,
    /// Sum of the term's frequencies over all documents.
    pub total_freq: u64,
    /// Byte offset of the posting list in the postings file.
    pub postings_offset: u64,
    /// Maximum posting weight across the whole list.
    pub max_weight: f32,
}

/// One term-in-document entry as held in memory by the writer pool and the
/// merger.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    /// Document number (segment-local).
    pub doc_id: u64,
    /// Occurrence count.
    pub frequency: u32,
    /// Scoring weight: the sum of token boosts, equal to `frequency` when
    /// no boosts are in play.
    pub weight: f32,
    /// Token positions, ascending. Empty unless the format records them.
    pub positions: Vec<u32>,
    /// Character `(start, end)` offsets per position.
    pub characters: Vec<(u32, u32)>,
    /// Per-position boosts.
    pub boosts: Vec<f32>,
}

impl Posting {
    /// A minimal presence-only posting.
    pub fn new(doc_id: u64) -> Self {
        Posting {
            doc_id,
            frequency: 1,
            weight: 1.0,
            positions: Vec::new(),
            characters: Vec::new(),
            boosts: Vec::new(),
        }
    }
}

/// Write a live-docs bitmap file.
pub fn write_live_docs(storage: &dyn Storage, name: &str, live: &BitSet) -> Result<()> {
    let output = storage.create_output(name)?;
    let mut writer = StructWriter::new(output);
    writer.write_varint(live.len() as u64)?;
    for &word in live.words() {
        writer.write_u64(word)?;
    }
    writer.close()
}

/// Read a live-docs bitmap file.
pub fn read_live_docs(storage: &dyn Storage, name: &str) -> Result<BitSet> {
    let input = storage.open_input(name)?;
    let mut reader = StructReader::new(input);
    let len = reader.read_varint()? as usize;
    let word_count = len.div_ceil(64);
    let mut words = Vec::with_capacity(word_count);
    for _ in 0..word_count {
        words.push(reader.read_u64()?);
    }
    reader.verify_checksum()?;
    Ok(BitSet::from_words(words, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_term_key_ordering() {
        let a = term_key(0, b"zebra");
        let b = term_key(1, b"apple");
        assert!(a < b);

        let (field, term) = split_term_key(&a).unwrap();
        assert_eq!(field, 0);
        assert_eq!(term, b"zebra");
    }

    #[test]
    fn test_live_docs_roundtrip() {
        let storage = MemoryStorage::default();
        let mut live = BitSet::full(100);
        live.remove(13);
        live.remove(99);

        write_live_docs(&storage, "seg_1.del", &live).unwrap();
        let back = read_live_docs(&storage, "seg_1.del").unwrap();
        assert_eq!(back, live);
        assert_eq!(back.count(), 98);
    }
}
