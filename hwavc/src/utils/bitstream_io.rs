//! Bitstream I/O utilities for parameter set parsing.
//!
//! Provides a bit reader and a bit writer over `bitstream-io` with the
//! Exp-Golomb codes used throughout H.264 syntax.

use std::io;

use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter, UnsignedInteger};

/// Longest Exp-Golomb prefix a 32-bit syntax element can carry.
const MAX_EXP_GOLOMB_PREFIX: u32 = 31;

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, BigEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    #[inline(always)]
    pub fn get_n<I: UnsignedInteger>(&mut self, n: u32) -> io::Result<I> {
        match self.bs.read_unsigned_var(n) {
            Ok(val) => Ok(val),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "get_n({}): out of bounds bits at {}",
                    n,
                    self.bs.position_in_bits().unwrap_or(0)
                ),
            )),
            Err(e) => Err(e),
        }
    }

    /// Reads an unsigned Exp-Golomb code, `ue(v)`.
    pub fn get_ue(&mut self) -> io::Result<u32> {
        let mut leading_zeros = 0;
        while !self.get()? {
            leading_zeros += 1;
            if leading_zeros > MAX_EXP_GOLOMB_PREFIX {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "get_ue: prefix longer than {MAX_EXP_GOLOMB_PREFIX} bits at {}",
                        self.position()?
                    ),
                ));
            }
        }

        if leading_zeros == 0 {
            return Ok(0);
        }

        let suffix: u32 = self.get_n(leading_zeros)?;
        Ok((1u32 << leading_zeros) - 1 + suffix)
    }

    /// Reads a signed Exp-Golomb code, `se(v)`.
    pub fn get_se(&mut self) -> io::Result<i32> {
        let code = i64::from(self.get_ue()?);
        let value = if code & 1 == 1 {
            (code + 1) / 2
        } else {
            -(code / 2)
        };

        Ok(value as i32)
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs
            .position_in_bits()
            .map(|pos| self.len.saturating_sub(pos))
    }

    #[inline(always)]
    pub fn skip_n(&mut self, n: u32) -> io::Result<()> {
        if n as u64 > self.available()? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "skip_n: out of bounds bits",
            ));
        }

        self.bs.skip(n)
    }

    #[inline(always)]
    pub fn position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        let read = io::Cursor::new(buf);

        Self::new(read, len)
    }
}

impl Default for BsIoSliceReader<'_> {
    fn default() -> Self {
        Self::from_slice(&[])
    }
}

/// Big-endian bit writer producing an RBSP byte vector.
pub struct BitstreamIoWriter {
    bs: BitWriter<Vec<u8>, BigEndian>,
    bits: u64,
}

impl BitstreamIoWriter {
    pub fn new() -> Self {
        Self {
            bs: BitWriter::new(Vec::new()),
            bits: 0,
        }
    }

    #[inline(always)]
    pub fn put(&mut self, bit: bool) -> io::Result<()> {
        self.bits += 1;
        self.bs.write_bit(bit)
    }

    #[inline(always)]
    pub fn put_n<U: UnsignedInteger>(&mut self, n: u32, value: U) -> io::Result<()> {
        self.bits += n as u64;
        self.bs.write_unsigned_var(n, value)
    }

    /// Writes an unsigned Exp-Golomb code, `ue(v)`.
    pub fn put_ue(&mut self, value: u32) -> io::Result<()> {
        let code = u64::from(value) + 1;
        let code_len = u64::BITS - code.leading_zeros();

        for _ in 1..code_len {
            self.put(false)?;
        }

        self.put_n(code_len, code)
    }

    /// Writes a signed Exp-Golomb code, `se(v)`.
    pub fn put_se(&mut self, value: i32) -> io::Result<()> {
        let value = i64::from(value);
        let code = if value > 0 {
            2 * value - 1
        } else {
            -2 * value
        };

        self.put_ue(code as u32)
    }

    /// Writes `rbsp_trailing_bits()`: a stop bit followed by zero alignment.
    pub fn put_trailing_bits(&mut self) -> io::Result<()> {
        self.put(true)?;
        while self.bits & 7 != 0 {
            self.put(false)?;
        }

        Ok(())
    }

    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.bits
    }

    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        self.bs.byte_align()?;
        Ok(self.bs.into_writer())
    }
}

impl Default for BitstreamIoWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exp_golomb_known_codes() -> io::Result<()> {
        // ue: 0 -> 1, 1 -> 010, 2 -> 011, 3 -> 00100
        let data = [0b1010_0110, 0b0100_0000];
        let mut reader = BsIoSliceReader::from_slice(&data);
        assert_eq!(reader.get_ue()?, 0);
        assert_eq!(reader.get_ue()?, 1);
        assert_eq!(reader.get_ue()?, 2);
        assert_eq!(reader.get_ue()?, 3);
        assert_eq!(reader.position()?, 12);
        Ok(())
    }

    #[test]
    fn signed_codes_match_writer() -> io::Result<()> {
        let values = [0, 1, -1, 2, -2, 17, -300, i32::from(i16::MAX)];

        let mut writer = BitstreamIoWriter::new();
        for &value in &values {
            writer.put_se(value)?;
        }
        writer.put_trailing_bits()?;
        let bytes = writer.into_bytes()?;

        let mut reader = BsIoSliceReader::from_slice(&bytes);
        for &value in &values {
            assert_eq!(reader.get_se()?, value);
        }
        assert!(reader.get()?, "stop bit");
        Ok(())
    }

    #[test]
    fn trailing_bits_align_output() -> io::Result<()> {
        let mut writer = BitstreamIoWriter::new();
        writer.put_n(3, 0b101u8)?;
        writer.put_trailing_bits()?;
        assert_eq!(writer.position(), 8);
        assert_eq!(writer.into_bytes()?, vec![0b1011_0000]);
        Ok(())
    }

    #[test]
    fn overlong_prefix_is_rejected() {
        let data = [0u8; 8];
        let mut reader = BsIoSliceReader::from_slice(&data);
        let err = reader.get_ue().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
