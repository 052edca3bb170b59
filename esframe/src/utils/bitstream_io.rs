//! Bitstream I/O utilities for header and descriptor parsing.
//!
//! Wraps a big-endian [`BitReader`] with bounds-checked reads that report
//! the failing bit position, plus the variable-length integer codings used
//! by the DTS-UHD, AC-4 and MPEG-H syntaxes.

use std::io;
use std::io::SeekFrom;

use bitstream_io::{BigEndian, BitRead, BitReader, UnsignedInteger};

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, BigEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

fn out_of_bounds(op: &str, n: u64, position: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("{op}({n}): out of bounds bits at {position}"),
    )
}

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
        let avail = self.available()?;
        if n as u64 > avail {
            return Err(out_of_bounds("get_n", n as u64, self.len - avail));
        }

        self.bs.read_unsigned_var(n)
    }

    /// Reads an escaped value as used by MPEG-H: `b1` bits, extended by
    /// `b2` bits when all ones, extended again by `b3` bits when those are
    /// all ones too.
    pub fn get_escaped(&mut self, b1: u32, b2: u32, b3: u32) -> io::Result<u64> {
        let mut value = self.get_n::<u64>(b1)?;

        if value == (1 << b1) - 1 {
            let add = self.get_n::<u64>(b2)?;
            value += add;

            if add == (1 << b2) - 1 && b3 > 0 {
                value += self.get_n::<u64>(b3)?;
            }
        }

        Ok(value)
    }

    /// Reads a DTS-UHD variable-length field.
    ///
    /// A unary prefix of up to three bits selects one of four field widths
    /// from `lengths`. When `additive` is set the capacity of every shorter
    /// width is added to the value, making the coding unambiguous.
    pub fn get_var_len_field(&mut self, lengths: &[u32; 4], additive: bool) -> io::Result<u32> {
        let mut index = 0;
        while index < 3 && self.get()? {
            index += 1;
        }

        let mut value = 0u32;
        if additive {
            value = lengths[..index].iter().map(|&len| 1u32 << len).sum();
        }

        Ok(value + self.get_n::<u32>(lengths[index])?)
    }

    /// Reads an AC-4 `variable_bits()` field, bounded to `max_num_groups`
    /// continuation groups.
    #[inline(always)]
    pub fn get_variable_bits_max(&mut self, n: u32, max_num_groups: u32) -> io::Result<u32> {
        let mut value = 0u32;
        let mut num_group = 0;

        loop {
            value = value.saturating_add(self.get_n::<u32>(n)?);
            if !self.get()? || num_group >= max_num_groups {
                break;
            }
            value = value.saturating_add(1) << n;
            num_group += 1;
        }

        Ok(value)
    }

    /// Reads `out.len()` bytes; the reader does not have to be byte aligned.
    pub fn get_bytes(&mut self, out: &mut [u8]) -> io::Result<()> {
        let avail = self.available()?;
        let bits = (out.len() as u64) << 3;
        if bits > avail {
            return Err(out_of_bounds("get_bytes", bits, self.len - avail));
        }

        self.bs.read_bytes(out)
    }

    #[inline(always)]
    pub fn seek(&mut self, offset: i64) -> io::Result<u64> {
        if (offset < 0 && self.position()? as i64 + offset >= 0)
            || (offset >= 0 && self.available()? as i64 >= offset)
        {
            return self.bs.seek_bits(SeekFrom::Current(offset));
        }

        Err(out_of_bounds(
            "seek",
            offset.unsigned_abs(),
            self.position()?,
        ))
    }

    #[inline(always)]
    pub fn skip_n(&mut self, n: u32) -> io::Result<()> {
        self.skip_bits(n as u64)
    }

    /// Skips `n` bits, checking the remaining budget first so that large
    /// declared counts never run past the end of the buffer.
    pub fn skip_bits(&mut self, n: u64) -> io::Result<()> {
        let avail = self.available()?;
        if n > avail {
            return Err(out_of_bounds("skip_bits", n, self.len - avail));
        }

        self.bs.seek_bits(SeekFrom::Current(n as i64)).map(|_| ())
    }

    #[inline(always)]
    pub fn skip_bytes(&mut self, n: u64) -> io::Result<()> {
        self.skip_bits(n << 3)
    }

    #[inline(always)]
    pub fn byte_align(&mut self) {
        self.bs.byte_align();
    }

    #[inline(always)]
    pub fn is_byte_aligned(&self) -> bool {
        self.bs.byte_aligned()
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs
            .position_in_bits()
            .map(|pos| self.len.saturating_sub(pos))
    }

    #[inline(always)]
    pub fn position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }

    /// Number of whole bytes touched so far, rounding a partial byte up.
    pub fn consumed_bytes(&mut self) -> io::Result<usize> {
        self.position().map(|pos| pos.div_ceil(8) as usize)
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

#[test]
fn escaped_values() -> anyhow::Result<()> {
    // 3 bits all ones, then 8 bits = 0x05
    let data = [0b1110_0000, 0b1010_0000];
    let mut reader = BsIoSliceReader::from_slice(&data);
    assert_eq!(reader.get_escaped(3, 8, 8)?, 7 + 5);

    let data = [0b0100_0000];
    let mut reader = BsIoSliceReader::from_slice(&data);
    assert_eq!(reader.get_escaped(3, 8, 8)?, 2);
    assert_eq!(reader.position()?, 3);

    // 8 bits all ones, 16 bits all ones, no third stage
    let data = [0xFF, 0xFF, 0xFF, 0x80];
    let mut reader = BsIoSliceReader::from_slice(&data);
    assert_eq!(reader.get_escaped(8, 16, 0)?, 0xFF + 0xFFFF);
    assert_eq!(reader.position()?, 24);
    Ok(())
}

#[test]
fn var_len_fields() -> anyhow::Result<()> {
    // prefix 0, 5 bits = 0b10101
    let data = [0b0101_0100];
    let mut reader = BsIoSliceReader::from_slice(&data);
    assert_eq!(reader.get_var_len_field(&[5, 8, 10, 12], true)?, 21);
    assert_eq!(reader.position()?, 6);

    // prefix 10, 8 bits = 3 -> 32 + 3
    let data = [0b1000_0000, 0b1100_0000];
    let mut reader = BsIoSliceReader::from_slice(&data);
    assert_eq!(reader.get_var_len_field(&[5, 8, 10, 12], true)?, 35);
    assert_eq!(reader.position()?, 10);

    // prefix 111, 12 bits = 1 -> 32 + 256 + 1024 + 1
    let data = [0b1110_0000, 0b0000_0010];
    let mut reader = BsIoSliceReader::from_slice(&data);
    assert_eq!(reader.get_var_len_field(&[5, 8, 10, 12], true)?, 1313);
    assert_eq!(reader.position()?, 15);
    Ok(())
}

#[test]
fn variable_bits() -> anyhow::Result<()> {
    // 2 bits = 1, more = 1, 2 bits = 2, more = 0 -> ((1 + 1) << 2) + 2
    let data = [0b0111_0000];
    let mut reader = BsIoSliceReader::from_slice(&data);
    assert_eq!(reader.get_variable_bits_max(2, 8)?, 10);
    Ok(())
}

#[test]
fn bounded_reads() {
    let data = [0u8; 2];
    let mut reader = BsIoSliceReader::from_slice(&data);
    assert!(reader.get_n::<u32>(17).is_err());
    assert!(reader.skip_bits(17).is_err());
    assert!(reader.skip_bits(16).is_ok());
    assert!(reader.get().is_err());
}
