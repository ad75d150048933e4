//! In-memory attribute storage.

use crate::types::dtype::DataType;

/// Attribute id of the format version (root chunk only).
pub const ATTR_VERSION: u16 = 0x0000;
/// Attribute id of a chunk's string identifier.
pub const ATTR_ID: u16 = 0x0001;
/// Attribute id of a chunk's primary data payload.
pub const ATTR_DATA: u16 = 0xffff;

/// One typed attribute of a chunk.
///
/// An attribute is either *file-backed* (`file_pos` is set; the payload may
/// be absent until loaded, and a loaded payload is only a cache) or
/// *in-memory-only* (`file_pos` is unset; the payload buffer is
/// authoritative). Any mutation makes the attribute in-memory-only for
/// good: the old file backing can no longer describe its contents.
///
/// Payload buffers hold the on-disk little-endian byte layout; the typed
/// accessors on the container convert to and from host values at the API
/// boundary.
#[derive(Clone, Debug)]
pub(crate) struct Attr {
    id: u16,
    dtype: DataType,
    size: u32,
    cols: u16,
    file_pos: Option<u64>,
    data: Option<Vec<u8>>,
}

impl Attr {
    pub fn from_file(id: u16, dtype: DataType, size: u32, cols: u16, file_pos: u64) -> Self {
        Self { id, dtype, size, cols, file_pos: Some(file_pos), data: None }
    }

    pub fn in_memory(id: u16, dtype: DataType, cols: u16, data: Vec<u8>) -> Self {
        Self { id, dtype, size: data.len() as u32, cols, file_pos: None, data: Some(data) }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn file_pos(&self) -> Option<u64> {
        self.file_pos
    }

    pub fn is_file_backed(&self) -> bool {
        self.file_pos.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Stores bytes read from the file backing. The attribute stays
    /// file-backed; the cache can be dropped again with [`Attr::release`].
    pub fn cache(&mut self, data: Vec<u8>) {
        debug_assert_eq!(data.len() as u32, self.size);
        self.data = Some(data);
    }

    /// Replaces the payload, discarding any file backing permanently.
    pub fn replace(&mut self, cols: u16, data: Vec<u8>) {
        self.size = data.len() as u32;
        self.cols = cols;
        self.file_pos = None;
        self.data = Some(data);
    }

    /// Drops a cached file-backed payload. Returns whether anything was
    /// released; in-memory-only payloads are never dropped here.
    pub fn release(&mut self) -> bool {
        if self.file_pos.is_some() && self.data.is_some() {
            self.data = None;
            true
        } else {
            false
        }
    }

    pub fn info(&self) -> AttrInfo {
        let mut elem_size = self.dtype.elem_size(self.size);
        if self.dtype.is_array() {
            let rows = if elem_size == 0 {
                // unknown element width, so the row count is unknowable
                0
            } else {
                (self.size / u32::from(self.cols)) / elem_size
            };
            AttrInfo {
                exists: true,
                encoded_type: self.dtype,
                elem_type: self.dtype.elem_type(),
                size: self.size,
                elem_size,
                is_array: true,
                cols: self.cols,
                rows,
            }
        } else {
            if elem_size == 0 {
                // not an array, so assume the element spans the payload
                elem_size = self.size;
            }
            AttrInfo {
                exists: true,
                encoded_type: self.dtype,
                elem_type: self.dtype,
                size: self.size,
                elem_size,
                is_array: false,
                cols: 1,
                rows: 1,
            }
        }
    }
}

/// A description of one attribute, as returned by
/// [`Omrx::attr_info`](crate::Omrx::attr_info).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AttrInfo {
    pub exists: bool,
    pub encoded_type: DataType,
    pub elem_type: DataType,
    pub size: u32,
    pub elem_size: u32,
    pub is_array: bool,
    pub cols: u16,
    pub rows: u32,
}

impl AttrInfo {
    #[must_use]
    pub fn missing() -> Self {
        Self {
            exists: false,
            encoded_type: DataType::INVALID,
            elem_type: DataType::INVALID,
            size: 0,
            elem_size: 0,
            is_array: false,
            cols: 0,
            rows: 0,
        }
    }
}

/// A typed array payload in host order, with its column and row counts.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayData<T> {
    pub cols: u16,
    pub rows: u32,
    pub values: Vec<T>,
}
