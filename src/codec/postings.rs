//! Posting-list encoding and the block cursor.
//!
//! A posting list is a sequence of blocks of up to
//! [`POSTING_BLOCK_SIZE`](crate::codec::POSTING_BLOCK_SIZE) documents.
//! Each block carries its byte length, its first and last document id and
//! its maximum weight in a small header, so a cursor can skip whole blocks
//! during `skip_to` and block-max quality pruning without decoding them.
//!
//! Block layout:
//!
//! ```text
//! varint body_len
//! varint first_doc | varint last_doc_delta | varint doc_count
//! f32 max_weight | u8 flags
//! varint doc deltas (doc_count - 1 of them)
//! [flags&FREQ]  varint frequency per doc
//! [flags&POS]   per doc: varint count, varint position deltas
//! [flags&CHAR]  per position: varint start delta, varint len
//! [flags&BOOST] per position: f32 boost
//! ```

use std::io::SeekFrom;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::{Posting, TermInfo, POSTING_BLOCK_SIZE};
use crate::error::{Result, SalixError};
use crate::schema::PostingFormat;
use crate::storage::{StorageInput, StorageOutput, StructWriter};
use crate::util::varint;

/// Sequentially writes posting lists into a segment's `.pst` file.
pub struct PostingsWriter {
    writer: StructWriter<dyn StorageOutput>,
}

impl PostingsWriter {
    /// Wrap an output stream.
    pub fn new(output: Box<dyn StorageOutput>) -> Self {
        PostingsWriter {
            writer: StructWriter::new(output),
        }
    }

    /// Write one term's posting list (ascending doc ids) and return its
    /// [`TermInfo`]. Statistics are computed here so every writer agrees on
    /// them.
    pub fn write_posting_list(
        &mut self,
        format: PostingFormat,
        postings: &[Posting],
    ) -> Result<TermInfo> {
        debug_assert!(!postings.is_empty());
        let offset = self.writer.position();

        let block_count = postings.len().div_ceil(POSTING_BLOCK_SIZE);
        self.writer.write_varint(block_count as u64)?;

        let mut total_freq = 0u64;
        let mut max_weight = 0f32;

        for block in postings.chunks(POSTING_BLOCK_SIZE) {
            let body = encode_block(format, block)?;
            self.writer.write_varint(body.len() as u64)?;
            self.writer.write_raw(&body)?;

            for posting in block {
                total_freq += posting.frequency as u64;
                max_weight = max_weight.max(posting.weight);
            }
        }

        Ok(TermInfo {
            doc_freq: postings.len() as u64,
            total_freq,
            postings_offset: offset,
            max_weight,
        })
    }

    /// Current byte position.
    pub fn position(&self) -> u64 {
        self.writer.position()
    }

    /// Flush and close the file.
    pub fn close(self) -> Result<()> {
        self.writer.close_unchecked()
    }
}

fn encode_block(format: PostingFormat, block: &[Posting]) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(block.len() * 4);

    let first_doc = block[0].doc_id;
    let last_doc = block[block.len() - 1].doc_id;
    let block_max = block.iter().fold(0f32, |acc, p| acc.max(p.weight));

    varint::write_u64(&mut body, first_doc)?;
    varint::write_u64(&mut body, last_doc - first_doc)?;
    varint::write_u64(&mut body, block.len() as u64)?;
    body.write_f32::<LittleEndian>(block_max)?;
    body.push(format.flags());

    let mut previous = first_doc;
    for posting in &block[1..] {
        if posting.doc_id <= previous {
            return Err(SalixError::indexing("posting doc ids out of order"));
        }
        varint::write_u64(&mut body, posting.doc_id - previous)?;
        previous = posting.doc_id;
    }

    if format.frequencies {
        for posting in block {
            varint::write_u64(&mut body, posting.frequency as u64)?;
        }
    }

    if format.positions {
        for posting in block {
            varint::write_u64(&mut body, posting.positions.len() as u64)?;
            let mut prev_pos = 0u32;
            for &pos in &posting.positions {
                varint::write_u64(&mut body, (pos - prev_pos) as u64)?;
                prev_pos = pos;
            }
        }
    }

    if format.characters {
        for posting in block {
            let mut prev_start = 0u32;
            for &(start, end) in &posting.characters {
                varint::write_u64(&mut body, (start - prev_start) as u64)?;
                varint::write_u64(&mut body, (end - start) as u64)?;
                prev_start = start;
            }
        }
    }

    if format.position_boosts {
        for posting in block {
            for &boost in &posting.boosts {
                body.write_f32::<LittleEndian>(boost)?;
            }
        }
    }

    Ok(body)
}

/// A decoded-on-demand cursor over one term's posting list.
///
/// The cursor is positioned on its first posting after `open`; `advance`
/// past the end returns the [`ReadTooFar`](SalixError::ReadTooFar) error.
pub struct PostingsCursor {
    input: Box<dyn StorageInput>,
    format: PostingFormat,
    doc_freq: u64,

    remaining_blocks: u64,
    // Current block header.
    block_first_doc: u64,
    block_last_doc: u64,
    block_doc_count: usize,
    block_max_weight: f32,
    block_body_start: u64,
    block_body_len: u64,
    body_decoded: bool,

    // Decoded block contents.
    docs: Vec<u64>,
    frequencies: Vec<u32>,
    weights: Vec<f32>,
    positions: Vec<Vec<u32>>,
    characters: Vec<Vec<(u32, u32)>>,
    boosts: Vec<Vec<f32>>,

    index: usize,
    exhausted: bool,
}

impl PostingsCursor {
    /// Open a cursor at `info.postings_offset`.
    pub fn open(
        mut input: Box<dyn StorageInput>,
        info: &TermInfo,
        format: PostingFormat,
    ) -> Result<Self> {
        input.seek(SeekFrom::Start(info.postings_offset))?;
        let block_count = varint::read_u64(&mut input)?;

        let mut cursor = PostingsCursor {
            input,
            format,
            doc_freq: info.doc_freq,
            remaining_blocks: block_count,
            block_first_doc: 0,
            block_last_doc: 0,
            block_doc_count: 0,
            block_max_weight: 0.0,
            block_body_start: 0,
            block_body_len: 0,
            body_decoded: false,
            docs: Vec::new(),
            frequencies: Vec::new(),
            weights: Vec::new(),
            positions: Vec::new(),
            characters: Vec::new(),
            boosts: Vec::new(),
            index: 0,
            exhausted: false,
        };
        if !cursor.load_block_header()? {
            cursor.exhausted = true;
        } else {
            cursor.decode_body()?;
        }
        Ok(cursor)
    }

    /// True when the cursor has run off the end.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Current document id, `u64::MAX` when exhausted.
    pub fn doc_id(&self) -> u64 {
        if self.exhausted {
            u64::MAX
        } else {
            self.docs[self.index]
        }
    }

    /// Scoring weight of the current posting.
    pub fn weight(&self) -> f32 {
        if self.exhausted {
            0.0
        } else {
            self.weights[self.index]
        }
    }

    /// Frequency of the current posting.
    pub fn frequency(&self) -> u32 {
        if self.exhausted {
            0
        } else {
            self.frequencies[self.index]
        }
    }

    /// Positions of the current posting (empty unless recorded).
    pub fn positions(&self) -> &[u32] {
        if self.exhausted {
            &[]
        } else {
            &self.positions[self.index]
        }
    }

    /// Character offsets of the current posting (empty unless recorded).
    pub fn characters(&self) -> &[(u32, u32)] {
        if self.exhausted {
            &[]
        } else {
            &self.characters[self.index]
        }
    }

    /// Per-position boosts of the current posting (empty unless
    /// recorded).
    pub fn boosts(&self) -> &[f32] {
        if self.exhausted {
            &[]
        } else {
            &self.boosts[self.index]
        }
    }

    /// Upper bound on weight within the current block.
    pub fn block_max_weight(&self) -> f32 {
        if self.exhausted {
            0.0
        } else {
            self.block_max_weight
        }
    }

    /// Last document id of the current block.
    pub fn block_last_doc(&self) -> u64 {
        self.block_last_doc
    }

    /// Estimated iteration cost (document frequency).
    pub fn cost(&self) -> u64 {
        self.doc_freq
    }

    /// Advance one posting. Returns false when the list ends.
    pub fn advance(&mut self) -> Result<bool> {
        if self.exhausted {
            return Err(SalixError::ReadTooFar);
        }
        self.index += 1;
        if self.index < self.block_doc_count {
            return Ok(true);
        }
        self.next_block()
    }

    /// Advance to the first posting with `doc_id >= target`, skipping
    /// whole blocks by header.
    pub fn skip_to(&mut self, target: u64) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if self.doc_id() >= target {
            return Ok(true);
        }

        // Skip whole blocks while the block cannot contain the target.
        while self.block_last_doc < target {
            if !self.skip_block()? {
                return Ok(false);
            }
        }

        if !self.body_decoded {
            self.decode_body()?;
        }
        while self.index < self.block_doc_count && self.docs[self.index] < target {
            self.index += 1;
        }
        if self.index >= self.block_doc_count {
            // target fell in a gap at the end of the block
            return self.next_block();
        }
        Ok(true)
    }

    /// Move past the current block entirely. Positions the cursor on the
    /// first posting of the next block. Used by quality skipping.
    pub fn skip_past_block(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if !self.skip_block()? {
            return Ok(false);
        }
        self.decode_body()?;
        Ok(true)
    }

    /// Load the next block header without decoding its body; the cursor is
    /// left logically before the block's first posting.
    fn skip_block(&mut self) -> Result<bool> {
        self.input
            .seek(SeekFrom::Start(self.block_body_start + self.block_body_len))?;
        if !self.load_block_header()? {
            self.exhausted = true;
            return Ok(false);
        }
        Ok(true)
    }

    fn next_block(&mut self) -> Result<bool> {
        if !self.skip_block()? {
            return Ok(false);
        }
        self.decode_body()?;
        Ok(true)
    }

    /// Read the header of the block at the current input position.
    fn load_block_header(&mut self) -> Result<bool> {
        if self.remaining_blocks == 0 {
            return Ok(false);
        }
        self.remaining_blocks -= 1;

        let body_len = varint::read_u64(&mut self.input)?;
        let header_start = self.input.seek(SeekFrom::Current(0))?;

        self.block_first_doc = varint::read_u64(&mut self.input)?;
        self.block_last_doc = self.block_first_doc + varint::read_u64(&mut self.input)?;
        self.block_doc_count = varint::read_u64(&mut self.input)? as usize;
        self.block_max_weight = self.input.read_f32::<LittleEndian>()?;
        let _flags = self.input.read_u8()?;

        self.block_body_start = header_start;
        self.block_body_len = body_len;
        self.body_decoded = false;
        self.index = 0;
        Ok(true)
    }

    /// Decode the current block's body into the column vectors.
    fn decode_body(&mut self) -> Result<()> {
        debug_assert!(!self.body_decoded);
        let count = self.block_doc_count;

        self.docs.clear();
        self.docs.reserve(count);
        self.docs.push(self.block_first_doc);
        let mut doc = self.block_first_doc;
        for _ in 1..count {
            doc += varint::read_u64(&mut self.input)?;
            self.docs.push(doc);
        }

        self.frequencies.clear();
        if self.format.frequencies {
            for _ in 0..count {
                self.frequencies.push(varint::read_u64(&mut self.input)? as u32);
            }
        } else {
            self.frequencies.resize(count, 1);
        }

        self.positions.clear();
        if self.format.positions {
            for _ in 0..count {
                let pos_count = varint::read_u64(&mut self.input)? as usize;
                let mut positions = Vec::with_capacity(pos_count);
                let mut pos = 0u32;
                for _ in 0..pos_count {
                    pos += varint::read_u64(&mut self.input)? as u32;
                    positions.push(pos);
                }
                self.positions.push(positions);
            }
        } else {
            self.positions.resize(count, Vec::new());
        }

        self.characters.clear();
        if self.format.characters {
            for i in 0..count {
                let pos_count = self.positions[i].len();
                let mut chars = Vec::with_capacity(pos_count);
                let mut start = 0u32;
                for _ in 0..pos_count {
                    start += varint::read_u64(&mut self.input)? as u32;
                    let len = varint::read_u64(&mut self.input)? as u32;
                    chars.push((start, start + len));
                }
                self.characters.push(chars);
            }
        } else {
            self.characters.resize(count, Vec::new());
        }

        self.boosts.clear();
        self.weights.clear();
        if self.format.position_boosts {
            for i in 0..count {
                let pos_count = self.positions[i].len();
                let mut boosts = Vec::with_capacity(pos_count);
                let mut weight = 0f32;
                for _ in 0..pos_count {
                    let boost = self.input.read_f32::<LittleEndian>()?;
                    weight += boost;
                    boosts.push(boost);
                }
                self.boosts.push(boosts);
                self.weights.push(weight);
            }
        } else {
            self.boosts.resize(count, Vec::new());
            for i in 0..count {
                self.weights.push(self.frequencies[i] as f32);
            }
        }

        self.body_decoded = true;
        Ok(())
    }
}
