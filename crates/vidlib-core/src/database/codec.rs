//! Little-endian primitive codec used by the database file format.
//!
//! Strings are a 7-bit variable-length byte count followed by UTF-8 bytes.

use std::io::{Read, Write};

use crate::error::{Result, VidlibError};

/// Reads primitives from a decompressed database stream.
pub(crate) struct Reader<R>
{
    inner: R,
}

impl<R: Read> Reader<R>
{
    pub(crate) fn new(inner: R) -> Self
    {
        Self { inner }
    }

    fn fill(&mut self, buf: &mut [u8], what: &str) -> Result<()>
    {
        self.inner.read_exact(buf).map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                VidlibError::CorruptDatabase(format!("unexpected end of stream while reading {what}"))
            }
            _ => VidlibError::Io(err),
        })
    }

    pub(crate) fn u8(&mut self) -> Result<u8>
    {
        let mut buf = [0u8; 1];
        self.fill(&mut buf, "u8")?;
        Ok(buf[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16>
    {
        let mut buf = [0u8; 2];
        self.fill(&mut buf, "u16")?;
        Ok(u16::from_le_bytes(buf))
    }

    pub(crate) fn u32(&mut self) -> Result<u32>
    {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, "u32")?;
        Ok(u32::from_le_bytes(buf))
    }

    pub(crate) fn i32(&mut self) -> Result<i32>
    {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, "i32")?;
        Ok(i32::from_le_bytes(buf))
    }

    pub(crate) fn u64(&mut self) -> Result<u64>
    {
        let mut buf = [0u8; 8];
        self.fill(&mut buf, "u64")?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Section or list count; negative counts are corrupt.
    pub(crate) fn count(&mut self, what: &str) -> Result<usize>
    {
        let raw = self.i32()?;
        usize::try_from(raw).map_err(|_| VidlibError::CorruptDatabase(format!("negative {what} count {raw}")))
    }

    fn var_len(&mut self) -> Result<usize>
    {
        let mut value: u32 = 0;
        let mut shift = 0;
        loop {
            if shift >= 35 {
                return Err(VidlibError::CorruptDatabase("string length prefix too long".to_string()));
            }
            let byte = self.u8()?;
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        usize::try_from(value).map_err(|_| VidlibError::CorruptDatabase(format!("string length {value}")))
    }

    pub(crate) fn string(&mut self) -> Result<String>
    {
        let len = self.var_len()?;
        let mut buf = vec![0u8; len];
        self.fill(&mut buf, "string")?;
        String::from_utf8(buf).map_err(|err| VidlibError::CorruptDatabase(format!("invalid UTF-8 in string: {err}")))
    }
}

/// Writes primitives into a database stream.
pub(crate) struct Writer<W>
{
    inner: W,
}

impl<W: Write> Writer<W>
{
    pub(crate) fn new(inner: W) -> Self
    {
        Self { inner }
    }

    pub(crate) fn into_inner(self) -> W
    {
        self.inner
    }

    pub(crate) fn u8(&mut self, value: u8) -> Result<()>
    {
        Ok(self.inner.write_all(&[value])?)
    }

    pub(crate) fn u16(&mut self, value: u16) -> Result<()>
    {
        Ok(self.inner.write_all(&value.to_le_bytes())?)
    }

    pub(crate) fn u32(&mut self, value: u32) -> Result<()>
    {
        Ok(self.inner.write_all(&value.to_le_bytes())?)
    }

    pub(crate) fn i32(&mut self, value: i32) -> Result<()>
    {
        Ok(self.inner.write_all(&value.to_le_bytes())?)
    }

    pub(crate) fn u64(&mut self, value: u64) -> Result<()>
    {
        Ok(self.inner.write_all(&value.to_le_bytes())?)
    }

    pub(crate) fn count(&mut self, count: usize, what: &str) -> Result<()>
    {
        let value = i32::try_from(count)
            .map_err(|_| VidlibError::InvalidArgument(format!("too many {what} entries ({count})")))?;
        self.i32(value)
    }

    pub(crate) fn string(&mut self, value: &str) -> Result<()>
    {
        let mut len = u32::try_from(value.len())
            .map_err(|_| VidlibError::InvalidArgument(format!("string of {} bytes is too long", value.len())))?;
        while len >= 0x80 {
            self.u8((len as u8) | 0x80)?;
            len >>= 7;
        }
        self.u8(len as u8)?;
        Ok(self.inner.write_all(value.as_bytes())?)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_string_length_prefix()
    {
        let long = "x".repeat(300);
        let mut writer = Writer::new(Vec::new());
        writer.string("abc").unwrap();
        writer.string(&long).unwrap();
        let bytes = writer.into_inner();

        // 300 = 0b10_0101100 -> 0xAC 0x02
        assert_eq!(&bytes[..4], &[3, b'a', b'b', b'c']);
        assert_eq!(&bytes[4..6], &[0xAC, 0x02]);

        let mut reader = Reader::new(bytes.as_slice());
        assert_eq!(reader.string().unwrap(), "abc");
        assert_eq!(reader.string().unwrap(), long);
    }

    #[test]
    fn test_truncated_stream_is_corrupt()
    {
        let mut reader = Reader::new(&[1u8, 2][..]);
        let err = reader.i32().unwrap_err();
        assert!(matches!(err, VidlibError::CorruptDatabase(_)));
    }

    #[test]
    fn test_negative_count_is_corrupt()
    {
        let bytes = (-1i32).to_le_bytes();
        let mut reader = Reader::new(&bytes[..]);
        assert!(reader.count("types").unwrap_err().is_format_error());
    }
}
