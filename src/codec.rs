//! The on-disk encoding of chunk and attribute headers.
//!
//! Everything multi-byte in an OMRX file is little-endian, whatever the
//! host byte order. The codec only ever needs four primitives from its
//! byte source: read-exact, absolute seek, forward skip, and write-exact;
//! a short read surfaces as [`std::io::ErrorKind::UnexpectedEof`], which
//! the engine reports separately from other I/O failures.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::types::{dtype::DataType, tag::Tag};
use std::{convert::TryInto, io};

/// Size of an encoded chunk header.
pub const CHUNK_HEADER_SIZE: u32 = 6;
/// Size of an encoded attribute header.
pub const ATTR_HEADER_SIZE: u32 = 8;
/// Size of the column-count subheader that precedes array payloads.
pub const ARRAY_SUBHEADER_SIZE: u32 = 2;

/// `SeekExt` provides convenience functions for working with seekable
/// streams.
pub trait SeekExt: io::Seek {
    /// The current position of the stream.
    fn pos(&mut self) -> io::Result<u64> {
        self.seek(io::SeekFrom::Current(0))
    }

    /// Reset the stream position to the beginning.
    fn reset(&mut self) -> io::Result<u64> {
        self.seek(io::SeekFrom::Start(0))
    }

    /// Skips ahead `bytes` bytes.
    fn skip(&mut self, bytes: u64) -> io::Result<u64> {
        self.seek(io::SeekFrom::Current(bytes.try_into().unwrap()))
    }
}
impl<T: io::Seek + ?Sized> SeekExt for T {}

/// The 6-byte header that starts every chunk: the tag, then an unsigned
/// count of the attributes that follow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChunkHeader {
    pub tag: Tag,
    pub attr_count: u16,
}

impl ChunkHeader {
    pub fn read_from(input: &mut impl io::Read) -> io::Result<Self> {
        let mut tag = [0; 4];
        input.read_exact(&mut tag)?;
        let attr_count = input.read_u16::<LittleEndian>()?;
        Ok(Self { tag: Tag::new(tag), attr_count })
    }

    pub fn write_to(self, output: &mut impl io::Write) -> io::Result<()> {
        output.write_all(self.tag.as_bytes())?;
        output.write_u16::<LittleEndian>(self.attr_count)
    }
}

/// The 8-byte header of one attribute. `size` is the on-disk payload size
/// and so *includes* the 2-byte array subheader for array data types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AttrHeader {
    pub id: u16,
    pub dtype: DataType,
    pub size: u32,
}

impl AttrHeader {
    pub fn read_from(input: &mut impl io::Read) -> io::Result<Self> {
        let id = input.read_u16::<LittleEndian>()?;
        let dtype = DataType::from_raw(input.read_u16::<LittleEndian>()?);
        let size = input.read_u32::<LittleEndian>()?;
        Ok(Self { id, dtype, size })
    }

    pub fn write_to(self, output: &mut impl io::Write) -> io::Result<()> {
        output.write_u16::<LittleEndian>(self.id)?;
        output.write_u16::<LittleEndian>(self.dtype.raw())?;
        output.write_u32::<LittleEndian>(self.size)
    }
}

pub fn read_array_cols(input: &mut impl io::Read) -> io::Result<u16> {
    input.read_u16::<LittleEndian>()
}

pub fn write_array_cols(output: &mut impl io::Write, cols: u16) -> io::Result<()> {
    output.write_u16::<LittleEndian>(cols)
}
