//! Stored fields: the retrievable per-document field maps.
//!
//! Each document's stored map is serialized as JSON; a fixed-width offset
//! table at the tail gives random access by document number.
//!
//! ```text
//! per doc:  varint len, JSON bytes
//! table:    u64 offset per doc
//! footer:   u64 table_offset | u64 doc_count
//! ```

use std::collections::HashMap;
use std::io::SeekFrom;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::document::FieldValue;
use crate::error::{Result, SalixError};
use crate::storage::{StorageInput, StorageOutput, StructWriter};
use crate::util::varint;

/// Appends stored-field maps in document order.
pub struct StoredWriter {
    writer: StructWriter<dyn StorageOutput>,
    offsets: Vec<u64>,
}

impl StoredWriter {
    /// Wrap an output stream.
    pub fn new(output: Box<dyn StorageOutput>) -> Self {
        StoredWriter {
            writer: StructWriter::new(output),
            offsets: Vec::new(),
        }
    }

    /// Append one document's stored map (may be empty).
    pub fn append(&mut self, fields: &HashMap<String, FieldValue>) -> Result<()> {
        self.offsets.push(self.writer.position());
        let payload = serde_json::to_vec(fields)?;
        self.writer.write_bytes(&payload)?;
        Ok(())
    }

    /// Number of documents appended so far.
    pub fn doc_count(&self) -> usize {
        self.offsets.len()
    }

    /// Write the offset table and footer, then close.
    pub fn finish(mut self) -> Result<()> {
        let table_offset = self.writer.position();
        for &offset in &self.offsets {
            self.writer.write_u64(offset)?;
        }
        self.writer.write_u64(table_offset)?;
        self.writer.write_u64(self.offsets.len() as u64)?;
        self.writer.close_unchecked()
    }
}

/// Random access to stored-field maps.
pub struct StoredReader {
    input: Box<dyn StorageInput>,
    offsets: Vec<u64>,
}

impl StoredReader {
    /// Open a stored-fields file.
    pub fn open(mut input: Box<dyn StorageInput>) -> Result<Self> {
        let size = input.size();
        if size < 16 {
            return Err(SalixError::storage("stored-fields file too short"));
        }
        input.seek(SeekFrom::Start(size - 16))?;
        let table_offset = input.read_u64::<LittleEndian>()?;
        let doc_count = input.read_u64::<LittleEndian>()? as usize;

        input.seek(SeekFrom::Start(table_offset))?;
        let mut offsets = Vec::with_capacity(doc_count);
        for _ in 0..doc_count {
            offsets.push(input.read_u64::<LittleEndian>()?);
        }

        Ok(StoredReader { input, offsets })
    }

    /// Number of documents.
    pub fn doc_count(&self) -> u64 {
        self.offsets.len() as u64
    }

    /// The stored map of `doc_id`.
    pub fn get(&self, doc_id: u64) -> Result<HashMap<String, FieldValue>> {
        let offset = *self
            .offsets
            .get(doc_id as usize)
            .ok_or(SalixError::ReadTooFar)?;
        let mut input = self.input.clone_input()?;
        input.seek(SeekFrom::Start(offset))?;
        let len = varint::read_u64(&mut input)? as usize;
        let mut payload = vec![0u8; len];
        input.read_exact(&mut payload)?;
        Ok(serde_json::from_slice(&payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;

    fn map(pairs: &[(&str, FieldValue)]) -> HashMap<String, FieldValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_roundtrip() {
        let storage = MemoryStorage::default();
        let output = storage.create_output("seg.fld").unwrap();
        let mut writer = StoredWriter::new(output);

        let doc0 = map(&[
            ("title", FieldValue::Text("First".to_string())),
            ("year", FieldValue::Integer(2001)),
        ]);
        let doc1 = HashMap::new();
        let doc2 = map(&[("path", FieldValue::Text("/a".to_string()))]);

        writer.append(&doc0).unwrap();
        writer.append(&doc1).unwrap();
        writer.append(&doc2).unwrap();
        writer.finish().unwrap();

        let input = storage.open_input("seg.fld").unwrap();
        let reader = StoredReader::open(input).unwrap();
        assert_eq!(reader.doc_count(), 3);
        assert_eq!(reader.get(0).unwrap(), doc0);
        assert_eq!(reader.get(1).unwrap(), doc1);
        assert_eq!(reader.get(2).unwrap(), doc2);
        assert!(matches!(reader.get(3), Err(SalixError::ReadTooFar)));
    }
}
