// https://github.com/rust-lang/cargo/issues/5034
#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::map_err_ignore,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::verbose_bit_mask,
)]
#![warn(rust_2018_idioms)]

//! Reading, building, and writing OMRX model container files.
//!
//! An OMRX file is a tree of tagged chunks, each carrying typed
//! attributes; nesting is delimited by close markers flagged in the tag
//! itself. [`Omrx`] is the container engine: it scans a file's structure
//! up front, loads attribute payloads lazily, and writes the in-memory
//! tree back out. The [`model`] module layers the model/LOD/mesh schema
//! over the chunk tree.

pub mod codec;
pub mod model;

mod attr;
mod chunk;
mod container;
mod error;
mod index;
mod types;

pub use attr::{ArrayData, AttrInfo, ATTR_DATA, ATTR_ID, ATTR_VERSION};
pub use chunk::ChunkHandle;
pub use container::{FormatVersion, LogFn, Omrx, MAGIC};
pub use error::{Error, Result, Status};
pub use types::dtype::DataType;
pub use types::reader::Reader;
pub use types::tag::{Tag, TagFlags};
