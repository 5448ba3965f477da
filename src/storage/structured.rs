//! Structured binary I/O over storage streams.
//!
//! Little-endian fixed-width integers, varints and length-prefixed byte
//! strings are the primitives every segment file is built from. Writers keep
//! a running crc32 so sequentially written files can carry a trailing
//! checksum.

use std::io::SeekFrom;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, SalixError};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint;

/// A structured writer over a storage output stream.
pub struct StructWriter<W: StorageOutput + ?Sized> {
    writer: Box<W>,
    hasher: crc32fast::Hasher,
    position: u64,
}

impl<W: StorageOutput + ?Sized> StructWriter<W> {
    /// Wrap an output stream.
    pub fn new(writer: Box<W>) -> Self {
        StructWriter {
            writer,
            hasher: crc32fast::Hasher::new(),
            position: 0,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.track(&[value]);
        Ok(())
    }

    /// Write a u16 value (little-endian).
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.writer.write_u16::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write an f32 value (little-endian).
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.writer.write_f32::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write an f64 value (little-endian).
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.writer.write_f64::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let bytes = varint::encode_u64(value);
        self.writer.write_all(&bytes)?;
        self.track(&bytes);
        Ok(())
    }

    /// Write raw bytes with a varint length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.writer.write_all(value)?;
        self.track(value);
        Ok(())
    }

    /// Write a string with a varint length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes without a length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.track(value);
        Ok(())
    }

    /// Write a slice of u32 values as varint deltas.
    pub fn write_delta_u32s(&mut self, values: &[u32]) -> Result<()> {
        self.write_varint(values.len() as u64)?;
        let mut previous = 0u32;
        for &value in values {
            self.write_varint(value.wrapping_sub(previous) as u64)?;
            previous = value;
        }
        Ok(())
    }

    /// Current write position in bytes.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Append the running crc32, flush and sync.
    pub fn close(mut self) -> Result<()> {
        let checksum = self.hasher.finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(())
    }

    /// Flush and sync without appending a checksum. Used for files whose
    /// tail is an offset table read by seeking.
    pub fn close_unchecked(mut self) -> Result<()> {
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(())
    }

    fn track(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
        self.position += bytes.len() as u64;
    }
}

/// A structured reader over a storage input stream.
pub struct StructReader<R: StorageInput + ?Sized> {
    reader: Box<R>,
    hasher: crc32fast::Hasher,
    size: u64,
}

impl<R: StorageInput + ?Sized> StructReader<R> {
    /// Wrap an input stream.
    pub fn new(reader: Box<R>) -> Self {
        let size = reader.size();
        StructReader {
            reader,
            hasher: crc32fast::Hasher::new(),
            size,
        }
    }

    /// Total stream size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.reader.read_u8()?;
        self.hasher.update(&[value]);
        Ok(value)
    }

    /// Read a u16 value (little-endian).
    pub fn read_u16(&mut self) -> Result<u16> {
        let value = self.reader.read_u16::<LittleEndian>()?;
        self.hasher.update(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.reader.read_u32::<LittleEndian>()?;
        self.hasher.update(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let value = self.reader.read_u64::<LittleEndian>()?;
        self.hasher.update(&value.to_le_bytes());
        Ok(value)
    }

    /// Read an f32 value (little-endian).
    pub fn read_f32(&mut self) -> Result<f32> {
        let value = self.reader.read_f32::<LittleEndian>()?;
        self.hasher.update(&value.to_le_bytes());
        Ok(value)
    }

    /// Read an f64 value (little-endian).
    pub fn read_f64(&mut self) -> Result<f64> {
        let value = self.reader.read_f64::<LittleEndian>()?;
        self.hasher.update(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0;
        loop {
            if shift >= 64 {
                return Err(SalixError::storage("varint overflow"));
            }
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if (byte & 0x80) == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Read length-prefixed raw bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varint()? as usize;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        self.hasher.update(&buf);
        Ok(buf)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| SalixError::storage("invalid UTF-8 string"))
    }

    /// Read exactly `len` raw bytes.
    pub fn read_raw(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        self.hasher.update(&buf);
        Ok(buf)
    }

    /// Read a delta-compressed u32 slice written by
    /// [`StructWriter::write_delta_u32s`].
    pub fn read_delta_u32s(&mut self) -> Result<Vec<u32>> {
        let count = self.read_varint()? as usize;
        let mut values = Vec::with_capacity(count);
        let mut previous = 0u32;
        for _ in 0..count {
            let delta = self.read_varint()? as u32;
            previous = previous.wrapping_add(delta);
            values.push(previous);
        }
        Ok(values)
    }

    /// Seek to an absolute position. Seeking resets checksum tracking, so
    /// [`verify_checksum`](Self::verify_checksum) is only meaningful for
    /// fully sequential reads.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(pos))?;
        self.hasher = crc32fast::Hasher::new();
        Ok(())
    }

    /// After sequentially reading a whole file body, read the trailing
    /// crc32 and compare it with the running checksum.
    pub fn verify_checksum(&mut self) -> Result<()> {
        let computed = self.hasher.clone().finalize();
        let stored = self.reader.read_u32::<LittleEndian>()?;
        if computed != stored {
            return Err(SalixError::storage("checksum mismatch"));
        }
        Ok(())
    }
}
