//! Packed primitive encoding shared by op bytes and the module format.
//!
//! Integers are zig-zag LEB128 ("packed"): small magnitudes of either sign take one byte.

use crate::error::{DecodeError, EncodeError};

#[derive(Debug, Default)]
pub(crate) struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn write_bool(&mut self, v: bool) {
        self.write_u8(if v { 1 } else { 0 });
    }

    pub(crate) fn write_packed(&mut self, v: i64) {
        let mut zz = ((v << 1) ^ (v >> 63)) as u64;
        loop {
            let byte = (zz & 0x7f) as u8;
            zz >>= 7;
            if zz == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub(crate) fn write_u32(&mut self, v: u32) {
        self.write_packed(i64::from(v));
    }

    pub(crate) fn write_len(&mut self, len: usize) -> Result<(), EncodeError> {
        let len: u32 = len
            .try_into()
            .map_err(|_| EncodeError::Overflow("length"))?;
        self.write_u32(len);
        Ok(())
    }

    pub(crate) fn write_string(&mut self, s: &str) -> Result<(), EncodeError> {
        self.write_len(s.len())?;
        self.write_bytes(s.as_bytes());
        Ok(())
    }

    pub(crate) fn write_blob(&mut self, b: &[u8]) -> Result<(), EncodeError> {
        self.write_len(b.len())?;
        self.write_bytes(b);
        Ok(())
    }
}

pub(crate) struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn err(&self, message: impl Into<String>) -> DecodeError {
        DecodeError {
            message: message.into(),
            offset: self.pos,
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub(crate) fn read_exact(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or_else(|| self.err("offset overflow"))?;
        if end > self.bytes.len() {
            return Err(self.err("unexpected EOF"));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn expect_bytes(&mut self, expected: &[u8]) -> Result<(), DecodeError> {
        let got = self.read_exact(expected.len())?;
        if got != expected {
            return Err(self.err("bad magic"));
        }
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_exact(1)?[0])
    }

    pub(crate) fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.err(format!("invalid bool tag {other}"))),
        }
    }

    pub(crate) fn read_packed(&mut self) -> Result<i64, DecodeError> {
        let mut zz: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift == 63 && byte > 1 {
                return Err(self.err("packed integer overflow"));
            }
            zz |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 63 {
                return Err(self.err("packed integer overflow"));
            }
        }
        Ok((zz >> 1) as i64 ^ -((zz & 1) as i64))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let v = self.read_packed()?;
        u32::try_from(v).map_err(|_| self.err(format!("{v} out of u32 range")))
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let v = self.read_packed()?;
        i32::try_from(v).map_err(|_| self.err(format!("{v} out of i32 range")))
    }

    pub(crate) fn read_len(&mut self) -> Result<usize, DecodeError> {
        let n = self.read_u32()?;
        let n = usize::try_from(n).map_err(|_| self.err("length overflow"))?;
        // Every element takes at least one byte.
        if n > self.remaining() {
            return Err(self.err(format!("length {n} exceeds the remaining input")));
        }
        Ok(n)
    }

    pub(crate) fn read_string(&mut self) -> Result<String, DecodeError> {
        let n = self.read_len()?;
        let b = self.read_exact(n)?;
        let s = std::str::from_utf8(b).map_err(|e| self.err(format!("invalid utf-8: {e}")))?;
        Ok(s.to_string())
    }

    pub(crate) fn read_blob(&mut self) -> Result<Vec<u8>, DecodeError> {
        let n = self.read_len()?;
        Ok(self.read_exact(n)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_integers_are_compact() {
        let mut enc = Encoder::new();
        enc.write_packed(0);
        enc.write_packed(-1);
        enc.write_packed(63);
        enc.write_packed(64);
        assert_eq!(enc.finish(), vec![0x00, 0x01, 0x7e, 0x80, 0x01]);
    }

    #[test]
    fn packed_extremes_decode() {
        let mut enc = Encoder::new();
        enc.write_packed(i64::MIN);
        enc.write_packed(i64::MAX);
        let bytes = enc.finish();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.read_packed().unwrap(), i64::MIN);
        assert_eq!(dec.read_packed().unwrap(), i64::MAX);
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn unterminated_packed_integer_is_rejected() {
        let mut dec = Decoder::new(&[0x80, 0x80]);
        let err = dec.read_packed().unwrap_err();
        assert_eq!(err.message, "unexpected EOF");
        assert_eq!(err.offset, 2);
    }
}
