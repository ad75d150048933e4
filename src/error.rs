use crate::{chunk::ChunkHandle, container::FormatVersion, types::{dtype::DataType, tag::Tag}};
use derive_more::Display;
use num_derive::FromPrimitive;
use std::io;

pub type Result<T> = core::result::Result<T, Error>;

/// The numeric status vocabulary of the format's reference API.
///
/// Codes fall into bands: success is 0, informational results are small
/// positive values, warnings are `0x1000` and above, and errors are
/// negative. Warnings never abort an operation; errors do. The container
/// records every operation's status (see [`Omrx::last_result`] and
/// [`Omrx::status`]).
///
/// `BadApi` and `NotInitialized` belong to the vocabulary for parity with
/// the format's C binding, which has a global initialization step; this
/// library has none and never produces them.
///
/// [`Omrx::last_result`]: crate::Omrx::last_result
/// [`Omrx::status`]: crate::Omrx::status
#[derive(Clone, Copy, Debug, Display, Eq, FromPrimitive, Hash, PartialEq)]
#[repr(i32)]
pub enum Status {
    #[display(fmt = "ok")]
    Ok = 0,
    #[display(fmt = "not found")]
    NotFound = 1,
    #[display(fmt = "duplicate")]
    Duplicate = 2,
    #[display(fmt = "newer file version (warning)")]
    VersionWarning = 0x1000,
    #[display(fmt = "bad attribute (warning)")]
    AttrWarning = 0x1001,
    #[display(fmt = "os error (warning)")]
    OsWarning = 0x1002,
    #[display(fmt = "api version mismatch")]
    BadApi = -1,
    #[display(fmt = "library not initialized")]
    NotInitialized = -2,
    #[display(fmt = "os error")]
    OsError = -3,
    #[display(fmt = "allocation failed")]
    AllocFailed = -4,
    #[display(fmt = "unexpected end of file")]
    UnexpectedEof = -5,
    #[display(fmt = "container not open")]
    NotOpen = -6,
    #[display(fmt = "container already open")]
    AlreadyOpen = -7,
    #[display(fmt = "bad magic")]
    BadMagic = -8,
    #[display(fmt = "incompatible file version")]
    BadVersion = -9,
    #[display(fmt = "bad chunk")]
    BadChunk = -10,
    #[display(fmt = "wrong data type")]
    WrongDataType = -11,
    #[display(fmt = "wrong chunk type")]
    WrongChunkType = -12,
    #[display(fmt = "bad index")]
    BadIndex = -13,
    #[display(fmt = "bad size")]
    BadSize = -14,
    #[display(fmt = "internal error")]
    Internal = -500,
}

impl Status {
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_code(code: i32) -> Option<Status> {
        num_traits::FromPrimitive::from_i32(code)
    }

    #[must_use]
    pub const fn is_error(self) -> bool {
        (self as i32) < 0
    }

    #[must_use]
    pub const fn is_warning(self) -> bool {
        (self as i32) >= 0x1000
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("unknown i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("container is not open")]
    NotOpen,
    #[error("container is already open")]
    AlreadyOpen,
    #[error("bad data at beginning of file (not an OMRX file?)")]
    BadMagic([u8; 4]),
    #[error("file version {file} is unsupported by this library (library version is {library})")]
    UnsupportedVersion { file: FormatVersion, library: FormatVersion },
    #[error("invalid chunk tag {0:#010x}; file likely corrupted")]
    BadChunkTag(u32),
    #[error("attribute {id:#06x} of {tag} has type {have}, not {want}")]
    WrongDataType { tag: Tag, id: u16, have: DataType, want: DataType },
    #[error("attribute {id:#06x} of {tag} is not valid UTF-8")]
    BadString { tag: Tag, id: u16 },
    #[error("{tag} chunk is not a {want} chunk")]
    WrongChunkType { tag: Tag, want: Tag },
    #[error("stale or invalid chunk handle ({0})")]
    BadHandle(ChunkHandle),
    #[error("the root chunk cannot be deleted")]
    DeleteRoot,
    #[error("attribute {id:#06x} of {tag} has bad size {size}")]
    BadSize { tag: Tag, id: u16, size: u32 },
    #[error("attribute {id:#06x} of {tag} has no data to load")]
    NoData { tag: Tag, id: u16 },
}

impl Error {
    /// The status code this error reports through the container's status
    /// accumulators.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Io(error) if error.kind() == io::ErrorKind::UnexpectedEof => Status::UnexpectedEof,
            Self::Io(_) => Status::OsError,
            Self::NotOpen => Status::NotOpen,
            Self::AlreadyOpen => Status::AlreadyOpen,
            Self::BadMagic(_) => Status::BadMagic,
            Self::UnsupportedVersion { .. } => Status::BadVersion,
            Self::BadChunkTag(_) => Status::BadChunk,
            Self::WrongDataType { .. } | Self::BadString { .. } => Status::WrongDataType,
            Self::WrongChunkType { .. } => Status::WrongChunkType,
            Self::BadHandle(_) | Self::DeleteRoot => Status::BadIndex,
            Self::BadSize { .. } => Status::BadSize,
            Self::NoData { .. } => Status::Internal,
        }
    }
}
