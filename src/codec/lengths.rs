//! Per-document field lengths.
//!
//! One dense u32 array per indexed field; a length of zero means the field
//! is absent from the document. Readers answer in O(1), which the BM25F
//! length normalization depends on.

use ahash::AHashMap;

use crate::error::{Result, SalixError};
use crate::storage::{StorageInput, StorageOutput, StructReader, StructWriter};

/// Write the lengths file: `(field_id, lengths)` pairs, each array holding
/// `max_doc` entries.
pub fn write_lengths(
    output: Box<dyn StorageOutput>,
    fields: &[(u16, Vec<u32>)],
) -> Result<()> {
    let mut writer = StructWriter::new(output);
    writer.write_varint(fields.len() as u64)?;
    for (field_id, lengths) in fields {
        writer.write_varint(*field_id as u64)?;
        writer.write_varint(lengths.len() as u64)?;
        for &length in lengths {
            writer.write_u32(length)?;
        }
    }
    writer.close()
}

/// The lengths of every indexed field in one segment.
#[derive(Debug)]
pub struct LengthsReader {
    fields: AHashMap<u16, Vec<u32>>,
}

impl LengthsReader {
    /// Load a lengths file into memory.
    pub fn open(input: Box<dyn StorageInput>) -> Result<Self> {
        let mut reader = StructReader::new(input);
        let field_count = reader.read_varint()? as usize;
        let mut fields = AHashMap::with_capacity(field_count);
        for _ in 0..field_count {
            let field_id = reader.read_varint()? as u16;
            let doc_count = reader.read_varint()? as usize;
            let mut lengths = Vec::with_capacity(doc_count);
            for _ in 0..doc_count {
                lengths.push(reader.read_u32()?);
            }
            if fields.insert(field_id, lengths).is_some() {
                return Err(SalixError::storage("duplicate field in lengths file"));
            }
        }
        reader.verify_checksum()?;
        Ok(LengthsReader { fields })
    }

    /// An empty reader for segments with no indexed fields.
    pub fn empty() -> Self {
        LengthsReader {
            fields: AHashMap::new(),
        }
    }

    /// Length of `field` in `doc`; 0 when the field is absent.
    pub fn length(&self, field_id: u16, doc_id: u64) -> u32 {
        self.fields
            .get(&field_id)
            .and_then(|lengths| lengths.get(doc_id as usize))
            .copied()
            .unwrap_or(0)
    }

    /// True if `doc` has any tokens in `field`.
    pub fn has_field(&self, field_id: u16, doc_id: u64) -> bool {
        self.length(field_id, doc_id) > 0
    }

    /// The raw array for a field, if present.
    pub fn field_lengths(&self, field_id: u16) -> Option<&[u32]> {
        self.fields.get(&field_id).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;

    #[test]
    fn test_roundtrip() {
        let storage = MemoryStorage::default();
        let output = storage.create_output("seg.len").unwrap();
        write_lengths(output, &[(0, vec![5, 0, 12]), (2, vec![1, 1, 1])]).unwrap();

        let input = storage.open_input("seg.len").unwrap();
        let reader = LengthsReader::open(input).unwrap();

        assert_eq!(reader.length(0, 0), 5);
        assert_eq!(reader.length(0, 1), 0);
        assert_eq!(reader.length(0, 2), 12);
        assert_eq!(reader.length(2, 1), 1);
        assert_eq!(reader.length(7, 0), 0);
        assert!(!reader.has_field(0, 1));
        assert!(reader.has_field(0, 2));
        assert_eq!(reader.length(0, 99), 0);
    }
}
