//! Little-endian binary stream reader and writer.
//!
//! All Farsight wire traffic, offload payloads and replay segments are built
//! from these two types. Strings and blobs are u32-length-prefixed. Short
//! reads surface as [`WireError::UnexpectedEof`] rather than panicking, so a
//! corrupt peer payload can never take the process down.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::WireError;

/// Growable little-endian binary writer.
#[derive(Debug, Default, Clone)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Creates a writer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the writer and returns the accumulated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Borrows the accumulated bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes raw bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a u32-length-prefixed blob.
    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a u32-length-prefixed UTF-8 string.
    pub fn write_string(&mut self, s: &str) {
        self.write_blob(s.as_bytes());
    }
}

/// Cursor-based little-endian reader over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, WireError> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap_or([0; 8])))
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f64(&mut self) -> Result<f64, WireError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap_or([0; 8])))
    }

    /// Reads raw bytes with no length prefix.
    pub fn read_raw(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.take(n)
    }

    /// Reads a u32-length-prefixed blob, rejecting lengths the stream
    /// cannot hold.
    pub fn read_blob(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_u32()? as usize;
        if len > self.remaining() {
            return Err(WireError::BadLength {
                declared: len,
                remaining: self.remaining(),
            });
        }
        self.take(len)
    }

    /// Reads a u32-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, WireError> {
        let bytes = self.read_blob()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

/// Deflate-compressed sub-stream writer.
///
/// Bulky payloads such as create-entity property blocks are written through
/// one of these: callers fill the inner writer, then `finish()` deflates the
/// region and appends it to the outer stream as a length-prefixed blob with
/// its raw length recorded up front.
pub struct CompressionWriter<'a> {
    out: &'a mut BinaryWriter,
    inner: BinaryWriter,
}

impl<'a> CompressionWriter<'a> {
    pub fn new(out: &'a mut BinaryWriter) -> Self {
        Self {
            out,
            inner: BinaryWriter::new(),
        }
    }

    /// The uncompressed sub-stream being filled.
    pub fn writer(&mut self) -> &mut BinaryWriter {
        &mut self.inner
    }

    /// Compresses the sub-stream into the outer writer.
    pub fn finish(self) -> Result<(), WireError> {
        let raw = self.inner.into_bytes();
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        let packed = encoder.finish()?;
        self.out.write_u32(raw.len() as u32);
        self.out.write_blob(&packed);
        Ok(())
    }
}

/// Inflating counterpart of [`CompressionWriter`].
pub struct CompressionReader {
    raw: Vec<u8>,
}

impl CompressionReader {
    /// Reads and inflates a compressed region from the stream.
    pub fn new(reader: &mut BinaryReader<'_>) -> Result<Self, WireError> {
        let raw_len = reader.read_u32()? as usize;
        let packed = reader.read_blob()?;
        let mut raw = Vec::with_capacity(raw_len);
        DeflateDecoder::new(packed).read_to_end(&mut raw)?;
        if raw.len() != raw_len {
            return Err(WireError::BadLength {
                declared: raw_len,
                remaining: raw.len(),
            });
        }
        Ok(Self { raw })
    }

    /// A reader over the inflated bytes.
    pub fn reader(&self) -> BinaryReader<'_> {
        BinaryReader::new(&self.raw)
    }

    /// The inflated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_scalars() {
        let mut w = BinaryWriter::new();
        w.write_u8(0xAB);
        w.write_u16(0xBEEF);
        w.write_u32(0xDEADBEEF);
        w.write_u64(0x0123_4567_89AB_CDEF);
        w.write_f32(3.5);
        w.write_i32(-42);

        let bytes = w.into_bytes();
        let mut r = BinaryReader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), 0xAB);
        assert_eq!(r.read_u16().unwrap(), 0xBEEF);
        assert_eq!(r.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(r.read_u64().unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(r.read_f32().unwrap(), 3.5);
        assert_eq!(r.read_i32().unwrap(), -42);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_strings_and_blobs() {
        let mut w = BinaryWriter::new();
        w.write_string("");
        w.write_string("hello");
        w.write_blob(&[]);
        w.write_blob(&[1, 2, 3]);

        let bytes = w.into_bytes();
        let mut r = BinaryReader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), "");
        assert_eq!(r.read_string().unwrap(), "hello");
        assert_eq!(r.read_blob().unwrap(), &[] as &[u8]);
        assert_eq!(r.read_blob().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_short_read_is_an_error() {
        let bytes = [0x01u8, 0x02];
        let mut r = BinaryReader::new(&bytes);
        assert!(matches!(
            r.read_u32(),
            Err(WireError::UnexpectedEof {
                needed: 4,
                remaining: 2
            })
        ));
    }

    #[test]
    fn test_truncated_length_prefix_rejected() {
        let mut w = BinaryWriter::new();
        w.write_u32(1000);
        w.write_raw(&[0; 4]);
        let bytes = w.into_bytes();
        let mut r = BinaryReader::new(&bytes);
        assert!(matches!(r.read_blob(), Err(WireError::BadLength { .. })));
    }

    #[test]
    fn test_compressed_round_trip() {
        let mut out = BinaryWriter::new();
        let mut cw = CompressionWriter::new(&mut out);
        for i in 0..256u32 {
            cw.writer().write_u32(i % 7);
        }
        cw.finish().unwrap();
        out.write_u8(0x55);

        let bytes = out.into_bytes();
        let mut r = BinaryReader::new(&bytes);
        let cr = CompressionReader::new(&mut r).unwrap();
        let mut inner = cr.reader();
        for i in 0..256u32 {
            assert_eq!(inner.read_u32().unwrap(), i % 7);
        }
        assert_eq!(r.read_u8().unwrap(), 0x55);
    }

    #[test]
    fn test_compressed_empty_payload() {
        let mut out = BinaryWriter::new();
        CompressionWriter::new(&mut out).finish().unwrap();
        let bytes = out.into_bytes();
        let mut r = BinaryReader::new(&bytes);
        let cr = CompressionReader::new(&mut r).unwrap();
        assert_eq!(cr.into_bytes().len(), 0);
    }
}
