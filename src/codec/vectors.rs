//! Forward term vectors.
//!
//! For vector-enabled fields, the per-document list of `(term, positions)`
//! pairs, in term order. Vectors power the vector-based phrase matcher and
//! key-term extraction without touching the inverted postings.
//!
//! ```text
//! varint field_count
//! per field: varint field_id, varint doc_count,
//!            varint entry offsets (doc_count + 1, delta into field heap),
//!            heap of per-doc entries
//! per entry: varint term_count,
//!            per term: varint term_len, bytes, varint pos_count,
//!                      varint position deltas
//! ```

use ahash::AHashMap;

use crate::error::Result;
use crate::storage::{StorageInput, StorageOutput, StructReader, StructWriter};
use crate::util::varint;

/// One document's forward vector for one field: `(term, positions)` pairs
/// in term order.
pub type DocVector = Vec<(Vec<u8>, Vec<u32>)>;

/// Write the vectors file. `fields` maps field id to one optional vector
/// per document, and must be sorted by field id.
pub fn write_vectors(
    output: Box<dyn StorageOutput>,
    fields: &[(u16, Vec<Option<DocVector>>)],
) -> Result<()> {
    let mut writer = StructWriter::new(output);
    writer.write_varint(fields.len() as u64)?;

    for (field_id, docs) in fields {
        // Serialize entries first so offsets are known.
        let mut heap = Vec::new();
        let mut offsets = Vec::with_capacity(docs.len() + 1);
        for entry in docs {
            offsets.push(heap.len() as u64);
            if let Some(terms) = entry {
                varint::write_u64(&mut heap, terms.len() as u64)?;
                for (term, positions) in terms {
                    varint::write_u64(&mut heap, term.len() as u64)?;
                    heap.extend_from_slice(term);
                    varint::write_u64(&mut heap, positions.len() as u64)?;
                    let mut previous = 0u32;
                    for &pos in positions {
                        varint::write_u64(&mut heap, (pos - previous) as u64)?;
                        previous = pos;
                    }
                }
            } else {
                varint::write_u64(&mut heap, 0)?;
            }
        }
        offsets.push(heap.len() as u64);

        writer.write_varint(*field_id as u64)?;
        writer.write_varint(docs.len() as u64)?;
        for &offset in &offsets {
            writer.write_varint(offset)?;
        }
        writer.write_raw(&heap)?;
    }
    writer.close()
}

/// Random access to per-document forward vectors.
#[derive(Debug)]
pub struct VectorsReader {
    fields: AHashMap<u16, FieldVectors>,
}

#[derive(Debug)]
struct FieldVectors {
    offsets: Vec<u64>,
    heap: Vec<u8>,
}

impl VectorsReader {
    /// Load a vectors file into memory.
    pub fn open(input: Box<dyn StorageInput>) -> Result<Self> {
        let mut reader = StructReader::new(input);
        let field_count = reader.read_varint()? as usize;
        let mut fields = AHashMap::with_capacity(field_count);
        for _ in 0..field_count {
            let field_id = reader.read_varint()? as u16;
            let doc_count = reader.read_varint()? as usize;
            let mut offsets = Vec::with_capacity(doc_count + 1);
            for _ in 0..=doc_count {
                offsets.push(reader.read_varint()?);
            }
            let heap_len = *offsets.last().unwrap_or(&0) as usize;
            let heap = reader.read_raw(heap_len)?;
            fields.insert(field_id, FieldVectors { offsets, heap });
        }
        reader.verify_checksum()?;
        Ok(VectorsReader { fields })
    }

    /// True when `field` has vectors in this segment.
    pub fn has_field(&self, field_id: u16) -> bool {
        self.fields.contains_key(&field_id)
    }

    /// The vector of `(field, doc)`, or `None` when absent or empty.
    pub fn vector(&self, field_id: u16, doc_id: u64) -> Result<Option<DocVector>> {
        let Some(field) = self.fields.get(&field_id) else {
            return Ok(None);
        };
        let idx = doc_id as usize;
        if idx + 1 >= field.offsets.len() {
            return Ok(None);
        }
        let start = field.offsets[idx] as usize;
        let end = field.offsets[idx + 1] as usize;
        let mut slice = &field.heap[start..end];

        let term_count = varint::read_u64(&mut slice)? as usize;
        if term_count == 0 {
            return Ok(None);
        }
        let mut terms = Vec::with_capacity(term_count);
        for _ in 0..term_count {
            let term_len = varint::read_u64(&mut slice)? as usize;
            let term = slice[..term_len].to_vec();
            slice = &slice[term_len..];
            let pos_count = varint::read_u64(&mut slice)? as usize;
            let mut positions = Vec::with_capacity(pos_count);
            let mut pos = 0u32;
            for _ in 0..pos_count {
                pos += varint::read_u64(&mut slice)? as u32;
                positions.push(pos);
            }
            terms.push((term, positions));
        }
        Ok(Some(terms))
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
        let output = storage.create_output("seg.vec").unwrap();

        let doc0: DocVector = vec![
            (b"lamb".to_vec(), vec![4]),
            (b"little".to_vec(), vec![3]),
            (b"mary".to_vec(), vec![0, 7]),
        ];
        write_vectors(output, &[(1, vec![Some(doc0.clone()), None])]).unwrap();

        let input = storage.open_input("seg.vec").unwrap();
        let reader = VectorsReader::open(input).unwrap();

        assert!(reader.has_field(1));
        assert!(!reader.has_field(0));
        assert_eq!(reader.vector(1, 0).unwrap(), Some(doc0));
        assert_eq!(reader.vector(1, 1).unwrap(), None);
        assert_eq!(reader.vector(1, 9).unwrap(), None);
        assert_eq!(reader.vector(3, 0).unwrap(), None);
    }
}
