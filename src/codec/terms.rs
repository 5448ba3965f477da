//! The term dictionary: prefix-coded blocks with a skip index.
//!
//! Keys (field id + term bytes) are written in strictly ascending order in
//! blocks of up to [`TERM_BLOCK_SIZE`](crate::codec::TERM_BLOCK_SIZE)
//! entries. Within a block each key stores only the length of the prefix it
//! shares with its predecessor plus its suffix. A skip index of block
//! first-keys at the tail of the file makes exact lookup a binary search
//! over blocks followed by a scan of at most one block.
//!
//! ```text
//! blocks:    varint entry_count, entries...
//! entry:     varint shared_prefix, varint suffix_len, suffix,
//!            varint doc_freq, varint total_freq, varint postings_offset,
//!            f32 max_weight
//! skip idx:  varint block_count, per block: varint key_len, key,
//!            varint block_offset
//! footer:    u64 skip_offset | u64 term_count | u32 format version
//! ```

use std::io::SeekFrom;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::{TermInfo, FORMAT_VERSION, TERM_BLOCK_SIZE};
use crate::error::{Result, SalixError};
use crate::storage::{StorageInput, StorageOutput, StructWriter};
use crate::util::varint;

/// Writes a segment's term dictionary. Keys must arrive strictly ascending.
pub struct TermDictWriter {
    writer: StructWriter<dyn StorageOutput>,
    block: Vec<u8>,
    block_count_in_block: usize,
    block_first_key: Vec<u8>,
    previous_key: Vec<u8>,
    skip_entries: Vec<(Vec<u8>, u64)>,
    term_count: u64,
}

impl TermDictWriter {
    /// Wrap an output stream.
    pub fn new(output: Box<dyn StorageOutput>) -> Self {
        TermDictWriter {
            writer: StructWriter::new(output),
            block: Vec::new(),
            block_count_in_block: 0,
            block_first_key: Vec::new(),
            previous_key: Vec::new(),
            skip_entries: Vec::new(),
            term_count: 0,
        }
    }

    /// Append one `(key, info)` entry.
    pub fn add(&mut self, key: &[u8], info: &TermInfo) -> Result<()> {
        if self.term_count > 0 && key <= self.previous_key.as_slice() {
            return Err(SalixError::indexing("term dictionary keys out of order"));
        }

        if self.block_count_in_block == 0 {
            self.block_first_key = key.to_vec();
        }

        let shared = shared_prefix_len(&self.previous_key, key);
        varint::write_u64(&mut self.block, shared as u64)?;
        varint::write_u64(&mut self.block, (key.len() - shared) as u64)?;
        self.block.extend_from_slice(&key[shared..]);
        varint::write_u64(&mut self.block, info.doc_freq)?;
        varint::write_u64(&mut self.block, info.total_freq)?;
        varint::write_u64(&mut self.block, info.postings_offset)?;
        self.block.write_f32::<LittleEndian>(info.max_weight)?;

        self.previous_key = key.to_vec();
        self.block_count_in_block += 1;
        self.term_count += 1;

        if self.block_count_in_block >= TERM_BLOCK_SIZE {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Write the skip index and footer, then close the file.
    pub fn finish(mut self) -> Result<u64> {
        if self.block_count_in_block > 0 {
            self.flush_block()?;
        }

        let skip_offset = self.writer.position();
        self.writer.write_varint(self.skip_entries.len() as u64)?;
        for (first_key, offset) in &self.skip_entries {
            self.writer.write_bytes(first_key)?;
            self.writer.write_varint(*offset)?;
        }

        self.writer.write_u64(skip_offset)?;
        self.writer.write_u64(self.term_count)?;
        self.writer.write_u32(FORMAT_VERSION)?;

        let term_count = self.term_count;
        self.writer.close_unchecked()?;
        Ok(term_count)
    }

    fn flush_block(&mut self) -> Result<()> {
        let offset = self.writer.position();
        self.skip_entries
            .push((std::mem::take(&mut self.block_first_key), offset));
        self.writer.write_varint(self.block_count_in_block as u64)?;
        self.writer.write_raw(&self.block)?;
        self.block.clear();
        self.block_count_in_block = 0;
        // Prefix coding restarts at each block so a block is decodable on
        // its own.
        self.previous_key.clear();
        Ok(())
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// A segment's term dictionary, with the skip index resident in memory.
pub struct TermDictReader {
    input: Box<dyn StorageInput>,
    skip_entries: Vec<(Vec<u8>, u64)>,
    term_count: u64,
}

impl TermDictReader {
    /// Open a dictionary file.
    pub fn open(mut input: Box<dyn StorageInput>) -> Result<Self> {
        let size = input.size();
        if size < 20 {
            return Err(SalixError::storage("term dictionary too short"));
        }
        input.seek(SeekFrom::Start(size - 20))?;
        let skip_offset = input.read_u64::<LittleEndian>()?;
        let term_count = input.read_u64::<LittleEndian>()?;
        let version = input.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(SalixError::IncompatibleFormat {
                found: version,
                expected: FORMAT_VERSION,
            });
        }

        input.seek(SeekFrom::Start(skip_offset))?;
        let block_count = varint::read_u64(&mut input)? as usize;
        let mut skip_entries = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            let key_len = varint::read_u64(&mut input)? as usize;
            let mut key = vec![0u8; key_len];
            input.read_exact(&mut key)?;
            let offset = varint::read_u64(&mut input)?;
            skip_entries.push((key, offset));
        }

        Ok(TermDictReader {
            input,
            skip_entries,
            term_count,
        })
    }

    /// Total number of terms.
    pub fn term_count(&self) -> u64 {
        self.term_count
    }

    /// Exact lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<TermInfo>> {
        let Some(block_idx) = self.block_for(key) else {
            return Ok(None);
        };
        let mut cursor = self.cursor_at_block(block_idx)?;
        while let Some((entry_key, info)) = cursor.next_entry()? {
            match entry_key.as_slice().cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(info)),
                std::cmp::Ordering::Greater => return Ok(None),
            }
        }
        Ok(None)
    }

    /// A cursor positioned at the first entry with key `>= start`.
    pub fn iter_from(&self, start: &[u8]) -> Result<TermDictCursor> {
        if self.skip_entries.is_empty() {
            return Ok(TermDictCursor {
                input: self.input.clone_input()?,
                remaining_blocks: 0,
                remaining_in_block: 0,
                previous_key: Vec::new(),
                pending: None,
            });
        }
        let block_idx = self.block_for(start).unwrap_or(0);
        let mut cursor = self.cursor_at_block(block_idx)?;
        cursor.pending = None;
        loop {
            match cursor.next_entry()? {
                Some((key, info)) => {
                    if key.as_slice() >= start {
                        cursor.pending = Some((key, info));
                        break;
                    }
                }
                None => break,
            }
        }
        Ok(cursor)
    }

    /// A cursor over the whole dictionary.
    pub fn iter(&self) -> Result<TermDictCursor> {
        self.iter_from(&[])
    }

    /// Index of the last block whose first key is `<= key`.
    fn block_for(&self, key: &[u8]) -> Option<usize> {
        if self.skip_entries.is_empty() {
            return None;
        }
        match self
            .skip_entries
            .binary_search_by(|(first, _)| first.as_slice().cmp(key))
        {
            Ok(idx) => Some(idx),
            Err(0) => None,
            Err(idx) => Some(idx - 1),
        }
    }

    fn cursor_at_block(&self, block_idx: usize) -> Result<TermDictCursor> {
        let mut input = self.input.clone_input()?;
        let offset = self.skip_entries[block_idx].1;
        input.seek(SeekFrom::Start(offset))?;
        let remaining_in_block = varint::read_u64(&mut input)? as usize;
        Ok(TermDictCursor {
            input,
            remaining_blocks: self.skip_entries.len() - block_idx - 1,
            remaining_in_block,
            previous_key: Vec::new(),
            pending: None,
        })
    }
}

/// Sequential cursor over dictionary entries in key order.
pub struct TermDictCursor {
    input: Box<dyn StorageInput>,
    remaining_blocks: usize,
    remaining_in_block: usize,
    previous_key: Vec<u8>,
    pending: Option<(Vec<u8>, TermInfo)>,
}

impl TermDictCursor {
    /// The next `(key, info)` pair, or `None` at the end.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, TermInfo)>> {
        if let Some(entry) = self.pending.take() {
            return Ok(Some(entry));
        }

        if self.remaining_in_block == 0 {
            if self.remaining_blocks == 0 {
                return Ok(None);
            }
            self.remaining_blocks -= 1;
            self.remaining_in_block = varint::read_u64(&mut self.input)? as usize;
            self.previous_key.clear();
        }
        self.remaining_in_block -= 1;

        let shared = varint::read_u64(&mut self.input)? as usize;
        let suffix_len = varint::read_u64(&mut self.input)? as usize;
        let mut key = Vec::with_capacity(shared + suffix_len);
        key.extend_from_slice(&self.previous_key[..shared]);
        let start = key.len();
        key.resize(start + suffix_len, 0);
        self.input.read_exact(&mut key[start..])?;

        let doc_freq = varint::read_u64(&mut self.input)?;
        let total_freq = varint::read_u64(&mut self.input)?;
        let postings_offset = varint::read_u64(&mut self.input)?;
        let max_weight = self.input.read_f32::<LittleEndian>()?;

        self.previous_key = key.clone();
        Ok(Some((
            key,
            TermInfo {
                doc_freq,
                total_freq,
                postings_offset,
                max_weight,
            },
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::term_key;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;

    fn info(offset: u64) -> TermInfo {
        TermInfo {
            doc_freq: offset + 1,
            total_freq: (offset + 1) * 2,
            postings_offset: offset,
            max_weight: 1.0,
        }
    }

    fn build(keys: &[Vec<u8>]) -> (MemoryStorage, TermDictReader) {
        let storage = MemoryStorage::default();
        let output = storage.create_output("seg.trm").unwrap();
        let mut writer = TermDictWriter::new(output);
        for (i, key) in keys.iter().enumerate() {
            writer.add(key, &info(i as u64)).unwrap();
        }
        writer.finish().unwrap();
        let input = storage.open_input("seg.trm").unwrap();
        let reader = TermDictReader::open(input).unwrap();
        (storage, reader)
    }

    #[test]
    fn test_exact_lookup() {
        let keys: Vec<Vec<u8>> = (0..200)
            .map(|i| term_key(0, format!("term{i:04}").as_bytes()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        let (_storage, reader) = build(&sorted);

        assert_eq!(reader.term_count(), 200);
        for (i, key) in sorted.iter().enumerate() {
            let found = reader.get(key).unwrap().unwrap();
            assert_eq!(found.postings_offset, i as u64);
        }
        assert!(reader
            .get(&term_key(0, b"missing-term"))
            .unwrap()
            .is_none());
        assert!(reader.get(&term_key(0, b"aaaa")).unwrap().is_none());
        assert!(reader.get(&term_key(9, b"zzzz")).unwrap().is_none());
    }

    #[test]
    fn test_out_of_order_rejected() {
        let storage = MemoryStorage::default();
        let output = storage.create_output("seg.trm").unwrap();
        let mut writer = TermDictWriter::new(output);
        writer.add(&term_key(0, b"beta"), &info(0)).unwrap();
        assert!(writer.add(&term_key(0, b"alpha"), &info(1)).is_err());
        assert!(writer.add(&term_key(0, b"beta"), &info(1)).is_err());
    }

    #[test]
    fn test_iter_from_and_prefix_scan() {
        let words = ["apple", "applied", "apply", "banana", "band", "candle"];
        let keys: Vec<Vec<u8>> = words.iter().map(|w| term_key(2, w.as_bytes())).collect();
        let (_storage, reader) = build(&keys);

        // Everything at or after "app".
        let mut cursor = reader.iter_from(&term_key(2, b"app")).unwrap();
        let mut seen = Vec::new();
        while let Some((key, _)) = cursor.next_entry().unwrap() {
            seen.push(key);
        }
        assert_eq!(seen, keys);

        // Prefix scan for "app".
        let prefix = term_key(2, b"app");
        let mut cursor = reader.iter_from(&prefix).unwrap();
        let mut matched = Vec::new();
        while let Some((key, _)) = cursor.next_entry().unwrap() {
            if !key.starts_with(&prefix) {
                break;
            }
            matched.push(String::from_utf8(key[2..].to_vec()).unwrap());
        }
        assert_eq!(matched, vec!["apple", "applied", "apply"]);
    }

    #[test]
    fn test_iter_from_before_first_key() {
        let keys = vec![term_key(1, b"m")];
        let (_storage, reader) = build(&keys);

        let mut cursor = reader.iter_from(&term_key(0, b"a")).unwrap();
        assert_eq!(cursor.next_entry().unwrap().unwrap().0, keys[0]);
        assert!(cursor.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_multi_field_separation() {
        let keys = vec![
            term_key(0, b"zebra"),
            term_key(1, b"apple"),
            term_key(1, b"pie"),
        ];
        let (_storage, reader) = build(&keys);

        assert!(reader.get(&term_key(0, b"apple")).unwrap().is_none());
        assert!(reader.get(&term_key(1, b"apple")).unwrap().is_some());
        assert!(reader.get(&term_key(1, b"zebra")).unwrap().is_none());
    }
}
