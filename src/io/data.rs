//! Big-endian primitives and modified UTF-8 strings.
//!
//! All binary formats in this crate share the same primitive layout:
//! integers and IEEE floats in network byte order, strings as a `u16`
//! byte length followed by modified UTF-8 (NUL as `C0 80`, characters
//! outside the BMP as surrogate pairs), and char arrays as UTF-16 code
//! units.

use std::io::{self, ErrorKind, Read, Write};

use super::FormatError;

// ============================================================================
// DataReader
// ============================================================================

/// Reads big-endian primitives from a byte stream.
#[derive(Debug)]
pub struct DataReader<R> {
    inner: R,
}

impl<R: Read> DataReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], FormatError> {
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf).map_err(|e| eof_as(e, what))?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.read_array::<1>("byte")?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16, FormatError> {
        Ok(i16::from_be_bytes(self.read_array("short")?))
    }

    pub fn read_u16(&mut self) -> Result<u16, FormatError> {
        Ok(u16::from_be_bytes(self.read_array("unsigned short")?))
    }

    pub fn read_i32(&mut self) -> Result<i32, FormatError> {
        Ok(i32::from_be_bytes(self.read_array("int")?))
    }

    pub fn read_u32(&mut self) -> Result<u32, FormatError> {
        Ok(u32::from_be_bytes(self.read_array("int")?))
    }

    pub fn read_f32(&mut self) -> Result<f32, FormatError> {
        Ok(f32::from_be_bytes(self.read_array("float")?))
    }

    /// Read an int, or `None` if the stream ends cleanly before it.
    pub fn try_read_i32(&mut self) -> Result<Option<i32>, FormatError> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(FormatError::Truncated("int")),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(i32::from_be_bytes(buf)))
    }

    /// Read a length-checked count of records.
    pub fn read_count(&mut self, what: &'static str) -> Result<usize, FormatError> {
        let n = self.read_i32()?;
        usize::try_from(n).map_err(|_| FormatError::value(what, n.to_string()))
    }

    /// Read exactly `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize, what: &'static str) -> Result<Vec<u8>, FormatError> {
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).map_err(|e| eof_as(e, what))?;
        Ok(buf)
    }

    /// Read a `u16`-prefixed modified UTF-8 string.
    pub fn read_utf(&mut self) -> Result<String, FormatError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len, "string")?;
        decode_modified_utf8(&bytes)
    }

    /// Read `len` UTF-16 code units.
    pub fn read_chars(&mut self, len: usize) -> Result<String, FormatError> {
        let units = (0..len)
            .map(|_| self.read_u16())
            .collect::<Result<Vec<u16>, _>>()?;
        String::from_utf16(&units).map_err(|_| FormatError::value("char array", format!("{units:?}")))
    }
}

fn eof_as(err: io::Error, what: &'static str) -> FormatError {
    if err.kind() == ErrorKind::UnexpectedEof {
        FormatError::Truncated(what)
    } else {
        FormatError::Io(err)
    }
}

/// Decode modified UTF-8 into a string.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, FormatError> {
    let invalid = || FormatError::value("modified UTF-8 string", String::from_utf8_lossy(bytes));
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let (unit, width) = match b >> 4 {
            0..=7 => (u16::from(b), 1),
            12 | 13 => {
                let b2 = continuation(bytes, i + 1).ok_or_else(invalid)?;
                ((u16::from(b & 0x1f) << 6) | b2, 2)
            }
            14 => {
                let b2 = continuation(bytes, i + 1).ok_or_else(invalid)?;
                let b3 = continuation(bytes, i + 2).ok_or_else(invalid)?;
                ((u16::from(b & 0x0f) << 12) | (b2 << 6) | b3, 3)
            }
            _ => return Err(invalid()),
        };
        units.push(unit);
        i += width;
    }
    String::from_utf16(&units).map_err(|_| invalid())
}

fn continuation(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at)
        .filter(|&&b| b & 0xc0 == 0x80)
        .map(|&b| u16::from(b & 0x3f))
}

/// Encode a string as modified UTF-8 (without the length prefix).
pub fn encode_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}

// ============================================================================
// DataWriter
// ============================================================================

/// Writes big-endian primitives to a byte stream.
#[derive(Debug)]
pub struct DataWriter<W> {
    inner: W,
}

impl<W: Write> DataWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn write_u8(&mut self, v: u8) -> io::Result<()> {
        self.inner.write_all(&[v])
    }

    pub fn write_i16(&mut self, v: i16) -> io::Result<()> {
        self.inner.write_all(&v.to_be_bytes())
    }

    pub fn write_u16(&mut self, v: u16) -> io::Result<()> {
        self.inner.write_all(&v.to_be_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> io::Result<()> {
        self.inner.write_all(&v.to_be_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> io::Result<()> {
        self.inner.write_all(&v.to_be_bytes())
    }

    pub fn write_f32(&mut self, v: f32) -> io::Result<()> {
        self.inner.write_all(&v.to_be_bytes())
    }

    /// Write a collection length as an int.
    pub fn write_len(&mut self, len: usize) -> io::Result<()> {
        let len = i32::try_from(len)
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, format!("length {len} exceeds int range")))?;
        self.write_i32(len)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)
    }

    /// Write a `u16`-prefixed modified UTF-8 string.
    pub fn write_utf(&mut self, s: &str) -> io::Result<()> {
        let encoded = encode_modified_utf8(s);
        let len = u16::try_from(encoded.len()).map_err(|_| {
            io::Error::new(
                ErrorKind::InvalidInput,
                format!("encoded string too long: {} bytes", encoded.len()),
            )
        })?;
        self.write_u16(len)?;
        self.inner.write_all(&encoded)
    }

    /// Write a string as UTF-16 code units, without a length.
    pub fn write_chars(&mut self, s: &str) -> io::Result<()> {
        for unit in s.encode_utf16() {
            self.write_u16(unit)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_big_endian() {
        let mut w = DataWriter::new(Vec::new());
        w.write_i32(0x0102_0304).unwrap();
        w.write_i16(-2).unwrap();
        w.write_f32(1.0).unwrap();
        let bytes = w.into_inner();
        assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
        assert_eq!(&bytes[4..6], &[0xff, 0xfe]);
        assert_eq!(&bytes[6..], &[0x3f, 0x80, 0, 0]);

        let mut r = DataReader::new(bytes.as_slice());
        assert_eq!(r.read_i32().unwrap(), 0x0102_0304);
        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.read_f32().unwrap(), 1.0);
        assert!(matches!(r.read_i32(), Err(FormatError::Truncated("int"))));
    }

    #[test]
    fn modified_utf8_special_cases() {
        assert_eq!(encode_modified_utf8("a\0"), vec![b'a', 0xc0, 0x80]);
        assert_eq!(encode_modified_utf8("é"), vec![0xc3, 0xa9]);
        // U+1F600 becomes a surrogate pair of three-byte sequences
        let emoji = encode_modified_utf8("\u{1F600}");
        assert_eq!(emoji.len(), 6);
        assert_eq!(decode_modified_utf8(&emoji).unwrap(), "\u{1F600}");
        assert_eq!(decode_modified_utf8(&[0xc0, 0x80]).unwrap(), "\0");
        assert!(decode_modified_utf8(&[0xc3]).is_err());
        assert!(decode_modified_utf8(&[0xf0, 0x9f, 0x98, 0x80]).is_err());
    }

    #[test]
    fn utf_and_chars_roundtrip() {
        let mut w = DataWriter::new(Vec::new());
        w.write_utf("Größe").unwrap();
        w.write_chars("ab").unwrap();
        let bytes = w.into_inner();
        let mut r = DataReader::new(bytes.as_slice());
        assert_eq!(r.read_utf().unwrap(), "Größe");
        assert_eq!(r.read_chars(2).unwrap(), "ab");
        assert_eq!(r.try_read_i32().unwrap(), None);
    }

    #[test]
    fn partial_int_is_truncation() {
        let mut r = DataReader::new(&[0u8, 1][..]);
        assert!(matches!(r.try_read_i32(), Err(FormatError::Truncated(_))));
    }
}
