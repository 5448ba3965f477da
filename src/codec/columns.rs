//! Columns: dense per-document values for sorting, grouping and faceting.
//!
//! One file per column field, `<seg>.col.<field>`. The element format is
//! chosen by the schema's [`ColumnKind`]; every format answers
//! `value(doc_id)` from memory.

use crate::document::FieldValue;
use crate::error::{Result, SalixError};
use crate::schema::ColumnKind;
use crate::storage::{StorageInput, StorageOutput, StructReader, StructWriter};
use crate::util::bitset::BitSet;

/// Accumulates one column's values in document order, then writes the file.
#[derive(Debug)]
pub struct ColumnWriter {
    kind: ColumnKind,
    numeric: Vec<i64>,
    bytes: Vec<Option<Vec<u8>>>,
    bits: Vec<bool>,
    present: Vec<bool>,
}

impl ColumnWriter {
    /// Create a writer for the given element format.
    pub fn new(kind: ColumnKind) -> Self {
        ColumnWriter {
            kind,
            numeric: Vec::new(),
            bytes: Vec::new(),
            bits: Vec::new(),
            present: Vec::new(),
        }
    }

    /// The element format.
    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    /// Append one document's value (`None` = absent). The value must match
    /// the element format.
    pub fn push(&mut self, value: Option<&FieldValue>) -> Result<()> {
        match (self.kind, value) {
            (_, None) => {
                self.present.push(false);
                match self.kind {
                    ColumnKind::Numeric => self.numeric.push(0),
                    ColumnKind::Bit => self.bits.push(false),
                    _ => self.bytes.push(None),
                }
            }
            (ColumnKind::Numeric, Some(value)) => {
                let key = value.numeric_key().or_else(|| {
                    value.as_float().map(|f| f as i64)
                });
                match key {
                    Some(key) => {
                        self.present.push(true);
                        self.numeric.push(key);
                    }
                    None => {
                        return Err(SalixError::field(format!(
                            "numeric column cannot hold {value}"
                        )))
                    }
                }
            }
            (ColumnKind::Bit, Some(value)) => {
                let bit = value
                    .as_boolean()
                    .or_else(|| value.numeric_key().map(|k| k != 0))
                    .ok_or_else(|| {
                        SalixError::field(format!("bit column cannot hold {value}"))
                    })?;
                self.present.push(true);
                self.bits.push(bit);
            }
            (ColumnKind::FixedBytes(width), Some(value)) => {
                let bytes = value_bytes(value)?;
                if bytes.len() != width as usize {
                    return Err(SalixError::field(format!(
                        "fixed column expects {width} bytes, got {}",
                        bytes.len()
                    )));
                }
                self.present.push(true);
                self.bytes.push(Some(bytes));
            }
            (ColumnKind::VarBytes | ColumnKind::RefDict, Some(value)) => {
                self.present.push(true);
                self.bytes.push(Some(value_bytes(value)?));
            }
        }
        Ok(())
    }

    /// Number of documents appended.
    pub fn doc_count(&self) -> usize {
        self.present.len()
    }

    /// Serialize the column.
    pub fn write(self, output: Box<dyn StorageOutput>) -> Result<()> {
        let mut writer = StructWriter::new(output);
        writer.write_u8(kind_tag(self.kind))?;
        if let ColumnKind::FixedBytes(width) = self.kind {
            writer.write_u32(width)?;
        }
        let doc_count = self.present.len();
        writer.write_varint(doc_count as u64)?;

        let mut present = BitSet::new(doc_count);
        for (doc, &p) in self.present.iter().enumerate() {
            if p {
                present.insert(doc);
            }
        }
        for &word in present.words() {
            writer.write_u64(word)?;
        }

        match self.kind {
            ColumnKind::Numeric => {
                for &value in &self.numeric {
                    writer.write_u64(value as u64)?;
                }
            }
            ColumnKind::Bit => {
                let mut values = BitSet::new(doc_count);
                for (doc, &bit) in self.bits.iter().enumerate() {
                    if bit {
                        values.insert(doc);
                    }
                }
                for &word in values.words() {
                    writer.write_u64(word)?;
                }
            }
            ColumnKind::FixedBytes(_) | ColumnKind::VarBytes => {
                // Offsets into the heap, one per doc plus the end sentinel.
                let mut offset = 0u64;
                for value in &self.bytes {
                    writer.write_varint(offset)?;
                    offset += value.as_ref().map_or(0, |v| v.len() as u64);
                }
                writer.write_varint(offset)?;
                for value in self.bytes.iter().flatten() {
                    writer.write_raw(value)?;
                }
            }
            ColumnKind::RefDict => {
                let mut dict: Vec<&[u8]> = self
                    .bytes
                    .iter()
                    .flatten()
                    .map(Vec::as_slice)
                    .collect();
                dict.sort();
                dict.dedup();
                writer.write_varint(dict.len() as u64)?;
                for entry in &dict {
                    writer.write_bytes(entry)?;
                }
                for value in &self.bytes {
                    // Reference = dictionary index + 1; 0 means absent.
                    let reference = match value {
                        Some(v) => {
                            dict.binary_search(&v.as_slice()).expect("value in dict") as u64 + 1
                        }
                        None => 0,
                    };
                    writer.write_varint(reference)?;
                }
            }
        }
        writer.close()
    }
}

fn value_bytes(value: &FieldValue) -> Result<Vec<u8>> {
    match value {
        FieldValue::Text(text) => Ok(text.as_bytes().to_vec()),
        FieldValue::Bytes(bytes) => Ok(bytes.clone()),
        other => other
            .to_text()
            .map(String::into_bytes)
            .ok_or_else(|| SalixError::field(format!("byte column cannot hold {other}"))),
    }
}

fn kind_tag(kind: ColumnKind) -> u8 {
    match kind {
        ColumnKind::Numeric => 0,
        ColumnKind::VarBytes => 1,
        ColumnKind::FixedBytes(_) => 2,
        ColumnKind::RefDict => 3,
        ColumnKind::Bit => 4,
    }
}

/// A loaded column with random access by document number.
#[derive(Debug)]
pub enum ColumnReader {
    /// Sign-preserved integers.
    Numeric {
        /// Presence bitmap.
        present: BitSet,
        /// Dense values (0 where absent).
        values: Vec<i64>,
    },
    /// Byte strings in a shared heap.
    Bytes {
        /// Presence bitmap.
        present: BitSet,
        /// Offsets, one per doc plus end sentinel.
        offsets: Vec<u64>,
        /// Concatenated values.
        heap: Vec<u8>,
    },
    /// Dictionary-compressed byte strings.
    RefDict {
        /// Sorted distinct values.
        dict: Vec<Vec<u8>>,
        /// Per-doc reference (index + 1, 0 = absent).
        refs: Vec<u32>,
    },
    /// Booleans.
    Bit {
        /// Presence bitmap.
        present: BitSet,
        /// Value bitmap.
        values: BitSet,
    },
}

impl ColumnReader {
    /// Load a column file.
    pub fn open(input: Box<dyn StorageInput>) -> Result<Self> {
        let mut reader = StructReader::new(input);
        let tag = reader.read_u8()?;
        let fixed_width = if tag == 2 { reader.read_u32()? } else { 0 };
        let doc_count = reader.read_varint()? as usize;
        let present = read_bitset(&mut reader, doc_count)?;

        let column = match tag {
            0 => {
                let mut values = Vec::with_capacity(doc_count);
                for _ in 0..doc_count {
                    values.push(reader.read_u64()? as i64);
                }
                ColumnReader::Numeric { present, values }
            }
            1 | 2 => {
                let _ = fixed_width;
                let mut offsets = Vec::with_capacity(doc_count + 1);
                for _ in 0..=doc_count {
                    offsets.push(reader.read_varint()?);
                }
                let heap_len = *offsets.last().unwrap_or(&0) as usize;
                let heap = reader.read_raw(heap_len)?;
                ColumnReader::Bytes {
                    present,
                    offsets,
                    heap,
                }
            }
            3 => {
                let dict_len = reader.read_varint()? as usize;
                let mut dict = Vec::with_capacity(dict_len);
                for _ in 0..dict_len {
                    dict.push(reader.read_bytes()?);
                }
                let mut refs = Vec::with_capacity(doc_count);
                for _ in 0..doc_count {
                    refs.push(reader.read_varint()? as u32);
                }
                ColumnReader::RefDict { dict, refs }
            }
            4 => {
                let values = read_bitset(&mut reader, doc_count)?;
                ColumnReader::Bit { present, values }
            }
            other => {
                return Err(SalixError::storage(format!(
                    "unknown column format tag {other}"
                )))
            }
        };
        reader.verify_checksum()?;
        Ok(column)
    }

    /// Number of documents covered.
    pub fn doc_count(&self) -> u64 {
        match self {
            ColumnReader::Numeric { present, .. } => present.len() as u64,
            ColumnReader::Bytes { present, .. } => present.len() as u64,
            ColumnReader::RefDict { refs, .. } => refs.len() as u64,
            ColumnReader::Bit { present, .. } => present.len() as u64,
        }
    }

    /// True when `doc_id` carries a value.
    pub fn has_value(&self, doc_id: u64) -> bool {
        match self {
            ColumnReader::Numeric { present, .. }
            | ColumnReader::Bytes { present, .. }
            | ColumnReader::Bit { present, .. } => present.contains(doc_id as usize),
            ColumnReader::RefDict { refs, .. } => {
                refs.get(doc_id as usize).copied().unwrap_or(0) != 0
            }
        }
    }

    /// The value of `doc_id`, reconstructed as a field value.
    pub fn value(&self, doc_id: u64) -> Option<FieldValue> {
        if !self.has_value(doc_id) {
            return None;
        }
        match self {
            ColumnReader::Numeric { values, .. } => {
                values.get(doc_id as usize).map(|&v| FieldValue::Integer(v))
            }
            ColumnReader::Bytes { offsets, heap, .. } => {
                let idx = doc_id as usize;
                let start = *offsets.get(idx)? as usize;
                let end = *offsets.get(idx + 1)? as usize;
                Some(bytes_value(&heap[start..end]))
            }
            ColumnReader::RefDict { dict, refs } => {
                let reference = *refs.get(doc_id as usize)? as usize;
                dict.get(reference - 1).map(|bytes| bytes_value(bytes))
            }
            ColumnReader::Bit { values, .. } => {
                Some(FieldValue::Boolean(values.contains(doc_id as usize)))
            }
        }
    }
}

fn bytes_value(bytes: &[u8]) -> FieldValue {
    match std::str::from_utf8(bytes) {
        Ok(text) => FieldValue::Text(text.to_string()),
        Err(_) => FieldValue::Bytes(bytes.to_vec()),
    }
}

fn read_bitset(
    reader: &mut StructReader<dyn StorageInput>,
    len: usize,
) -> Result<BitSet> {
    let word_count = len.div_ceil(64);
    let mut words = Vec::with_capacity(word_count);
    for _ in 0..word_count {
        words.push(reader.read_u64()?);
    }
    Ok(BitSet::from_words(words, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;

    fn roundtrip(writer: ColumnWriter) -> ColumnReader {
        let storage = MemoryStorage::default();
        let output = storage.create_output("seg.col.f").unwrap();
        writer.write(output).unwrap();
        let input = storage.open_input("seg.col.f").unwrap();
        ColumnReader::open(input).unwrap()
    }

    #[test]
    fn test_numeric_column() {
        let mut writer = ColumnWriter::new(ColumnKind::Numeric);
        writer.push(Some(&FieldValue::Integer(20))).unwrap();
        writer.push(Some(&FieldValue::Integer(-10))).unwrap();
        writer.push(None).unwrap();
        writer.push(Some(&FieldValue::Integer(15))).unwrap();

        let reader = roundtrip(writer);
        assert_eq!(reader.doc_count(), 4);
        assert_eq!(reader.value(0), Some(FieldValue::Integer(20)));
        assert_eq!(reader.value(1), Some(FieldValue::Integer(-10)));
        assert_eq!(reader.value(2), None);
        assert_eq!(reader.value(3), Some(FieldValue::Integer(15)));
    }

    #[test]
    fn test_varbytes_column() {
        let mut writer = ColumnWriter::new(ColumnKind::VarBytes);
        writer.push(Some(&FieldValue::Text("beta".to_string()))).unwrap();
        writer.push(None).unwrap();
        writer.push(Some(&FieldValue::Text("alpha".to_string()))).unwrap();

        let reader = roundtrip(writer);
        assert_eq!(reader.value(0), Some(FieldValue::Text("beta".to_string())));
        assert_eq!(reader.value(1), None);
        assert_eq!(reader.value(2), Some(FieldValue::Text("alpha".to_string())));
    }

    #[test]
    fn test_refdict_column() {
        let mut writer = ColumnWriter::new(ColumnKind::RefDict);
        for value in ["red", "blue", "red", "red", "green"] {
            writer.push(Some(&FieldValue::Text(value.to_string()))).unwrap();
        }
        writer.push(None).unwrap();

        let reader = roundtrip(writer);
        assert_eq!(reader.value(0), Some(FieldValue::Text("red".to_string())));
        assert_eq!(reader.value(1), Some(FieldValue::Text("blue".to_string())));
        assert_eq!(reader.value(4), Some(FieldValue::Text("green".to_string())));
        assert_eq!(reader.value(5), None);
        match reader {
            ColumnReader::RefDict { dict, .. } => assert_eq!(dict.len(), 3),
            _ => panic!("expected refdict"),
        }
    }

    #[test]
    fn test_bit_column() {
        let mut writer = ColumnWriter::new(ColumnKind::Bit);
        writer.push(Some(&FieldValue::Boolean(true))).unwrap();
        writer.push(Some(&FieldValue::Boolean(false))).unwrap();
        writer.push(None).unwrap();

        let reader = roundtrip(writer);
        assert_eq!(reader.value(0), Some(FieldValue::Boolean(true)));
        assert_eq!(reader.value(1), Some(FieldValue::Boolean(false)));
        assert_eq!(reader.value(2), None);
    }

    #[test]
    fn test_fixed_bytes_rejects_wrong_width() {
        let mut writer = ColumnWriter::new(ColumnKind::FixedBytes(2));
        writer.push(Some(&FieldValue::Bytes(vec![1, 2]))).unwrap();
        assert!(writer.push(Some(&FieldValue::Bytes(vec![1]))).is_err());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut writer = ColumnWriter::new(ColumnKind::Numeric);
        assert!(writer
            .push(Some(&FieldValue::Text("x".to_string())))
            .is_err());
    }
}
