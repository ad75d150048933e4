//! The OMRX container engine.
//!
//! An [`Omrx`] owns the chunk tree, the id index, the optional byte source
//! it was scanned from, and the status accumulators. Scanning records
//! where every attribute payload lives instead of reading it; payloads are
//! loaded on first access and can be released again while the source stays
//! open, so a large file costs little memory until its data is wanted.

use byteorder::{ByteOrder, LittleEndian};
use crate::{
    attr::{Attr, AttrInfo, ArrayData, ATTR_ID, ATTR_VERSION},
    chunk::{Chunk, ChunkHandle},
    codec::{read_array_cols, write_array_cols, AttrHeader, ChunkHeader, SeekExt, ARRAY_SUBHEADER_SIZE},
    error::{Error, Result, Status},
    index::{IdIndex, Registration},
    types::{dtype::DataType, reader::Reader, tag::{Tag, TagFlags}},
};
use slab::Slab;
use std::{borrow::Cow, fmt, fs::File, io::{self, Read, Seek, SeekFrom, Write}, path::Path};

/// The file magic, which doubles as the root chunk's tag.
pub const MAGIC: Tag = Tag::new(*b"OMRX");

/// A format version constant: major version in the upper 16 bits, minor
/// in the lower. Files with a newer major version are rejected; a newer
/// minor version is readable with a warning.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct FormatVersion(u32);

impl FormatVersion {
    /// The newest format version this library understands.
    pub const CURRENT: FormatVersion = FormatVersion(0x0000_0001);
    /// The version declared on freshly created containers.
    pub const MINIMUM: FormatVersion = FormatVersion(0x0000_0001);

    #[must_use]
    pub const fn new(raw: u32) -> FormatVersion {
        FormatVersion(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[must_use]
    pub const fn minor(self) -> u16 {
        self.0 as u16
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

impl fmt::Debug for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FormatVersion({}.{})", self.major(), self.minor())
    }
}

/// Signature of the warning and error callbacks: the status being reported
/// and the formatted message.
pub type LogFn = dyn Fn(Status, &str);

fn default_log_warning(status: Status, message: &str) {
    log::warn!(target: "omrx", "{} ({})", message, status.code());
}

fn default_log_error(status: Status, message: &str) {
    log::error!(target: "omrx", "{} ({})", message, status.code());
}

/// Status accumulators and log sinks.
///
/// `status` is sticky: warnings overwrite it only while it is not already
/// an error, and it survives until read with reset. `last_result` is
/// overwritten by every operation, so a caller can tell a not-found apart
/// from a plain success after the fact.
struct Log {
    status: Status,
    last_result: Status,
    message: String,
    source: Option<String>,
    warn: Option<Box<LogFn>>,
    error: Option<Box<LogFn>>,
}

impl Log {
    fn new() -> Self {
        Self {
            status: Status::Ok,
            last_result: Status::Ok,
            message: String::new(),
            source: None,
            warn: Some(Box::new(default_log_warning)),
            error: Some(Box::new(default_log_error)),
        }
    }

    fn api_result(&mut self, status: Status) {
        self.last_result = status;
    }

    fn warning(&mut self, status: Status, message: String) {
        self.message = match &self.source {
            Some(source) => format!("{}: {}", source, message),
            None => message,
        };
        if let Some(callback) = &self.warn {
            callback(status, &self.message);
        }
        // an earlier error keeps priority
        if !self.status.is_error() {
            self.status = status;
        }
        self.last_result = status;
    }

    fn failure(&mut self, error: &Error) {
        let status = error.status();
        self.message = match &self.source {
            Some(source) => format!("{}: {}", source, error),
            None => error.to_string(),
        };
        if let Some(callback) = &self.error {
            callback(status, &self.message);
        }
        self.status = status;
        self.last_result = status;
    }
}

/// Copied-out attribute metadata, so payload loading can borrow the input
/// stream without keeping the chunk arena borrowed.
#[derive(Clone, Copy)]
struct AttrMeta {
    index: usize,
    tag: Tag,
    id: u16,
    dtype: DataType,
    size: u32,
    cols: u16,
}

/// An OMRX container: a chunk tree, its id index, and (once opened) the
/// byte source it was scanned from.
///
/// A container is single-threaded; use one container per thread. Distinct
/// containers are independent.
pub struct Omrx {
    input: Option<Box<dyn Reader>>,
    chunks: Slab<Chunk>,
    root: ChunkHandle,
    /// The currently open parent while a scan is in progress.
    context: Option<ChunkHandle>,
    index: IdIndex,
    log: Log,
}

impl Omrx {
    /// Creates an empty container: a root chunk tagged with the magic,
    /// carrying the minimum supported version.
    #[must_use]
    pub fn new() -> Self {
        let mut chunks = Slab::new();
        let mut root_chunk = Chunk::new(MAGIC);
        let mut version = vec![0; 4];
        LittleEndian::write_u32(&mut version, FormatVersion::MINIMUM.raw());
        root_chunk.insert_attr(Attr::in_memory(ATTR_VERSION, DataType::U32, 1, version));
        let root = ChunkHandle(chunks.insert(root_chunk));
        Self {
            input: None,
            chunks,
            root,
            context: None,
            index: IdIndex::default(),
            log: Log::new(),
        }
    }

    // Status, messages, log sinks

    /// The accumulated (sticky) status, optionally reset to ok.
    pub fn status(&mut self, reset: bool) -> Status {
        let status = self.log.status;
        if reset {
            self.log.status = Status::Ok;
        }
        status
    }

    /// The status of the most recent operation only.
    #[must_use]
    pub fn last_result(&self) -> Status {
        self.log.last_result
    }

    /// The most recently formatted warning or error message.
    #[must_use]
    pub fn last_message(&self) -> &str {
        &self.log.message
    }

    /// Replaces the warning sink. `None` silences warnings; the default
    /// sink forwards to the `log` crate under the `omrx` target.
    pub fn set_log_warning(&mut self, callback: Option<Box<LogFn>>) {
        self.log.warn = callback;
    }

    /// Replaces the error sink. `None` silences errors; the default sink
    /// forwards to the `log` crate under the `omrx` target.
    pub fn set_log_error(&mut self, callback: Option<Box<LogFn>>) {
        self.log.error = callback;
    }

    pub(crate) fn failed(&mut self, error: Error) -> Error {
        self.log.failure(&error);
        error
    }

    pub(crate) fn warn(&mut self, status: Status, message: String) {
        self.log.warning(status, message);
    }

    pub(crate) fn note_result(&mut self, status: Status) {
        self.log.api_result(status);
    }

    // Opening, closing, writing

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.input.is_some()
    }

    /// Opens `path` and scans its structure. Attribute payloads are left
    /// on disk to be loaded on demand, so the file must stay open (do not
    /// [`close`](Omrx::close)) until all wanted data has been read.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let result = self.open_impl(path.as_ref());
        self.finish_unit(result)
    }

    /// Like [`open`](Omrx::open), for a caller-supplied stream. The
    /// container takes the stream; it is dropped on close.
    pub fn open_reader(&mut self, reader: impl Reader + 'static) -> Result<()> {
        let result = self.open_reader_impl(Box::new(reader), None);
        self.finish_unit(result)
    }

    /// Like [`open_reader`](Omrx::open_reader), with a name to use in
    /// warning and error messages.
    pub fn open_named_reader(&mut self, name: impl Into<String>, reader: impl Reader + 'static) -> Result<()> {
        let result = self.open_reader_impl(Box::new(reader), Some(name.into()));
        self.finish_unit(result)
    }

    fn open_impl(&mut self, path: &Path) -> Result<()> {
        if self.input.is_some() {
            return Err(Error::AlreadyOpen);
        }
        let file = File::open(path)?;
        self.open_reader_impl(Box::new(io::BufReader::new(file)), Some(path.display().to_string()))
    }

    fn open_reader_impl(&mut self, reader: Box<dyn Reader>, name: Option<String>) -> Result<()> {
        if self.input.is_some() {
            return Err(Error::AlreadyOpen);
        }
        self.log.source = name;
        self.input = Some(reader);
        self.scan()
    }

    /// Drops the byte source. Payloads already loaded stay readable;
    /// anything still on disk becomes unreachable.
    pub fn close(&mut self) -> Result<()> {
        if self.input.is_none() {
            let error = Error::NotOpen;
            return Err(self.failed(error));
        }
        self.input = None;
        self.log.api_result(Status::Ok);
        Ok(())
    }

    /// Serializes the tree to `path`.
    pub fn write(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let result = self.write_impl(path.as_ref());
        self.finish_unit(result)
    }

    /// Serializes the tree to a caller-supplied sink.
    pub fn write_to<W: Write>(&mut self, output: &mut W) -> Result<()> {
        let root = self.root;
        let result = self.write_chunk(root, output);
        self.finish_unit(result)
    }

    fn write_impl(&mut self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut output = io::BufWriter::new(file);
        let root = self.root;
        self.write_chunk(root, &mut output)?;
        match output.into_inner() {
            Ok(file) => {
                if let Err(error) = file.sync_all() {
                    self.log.warning(Status::OsWarning, format!("close failed: {}", error));
                }
            }
            Err(error) => {
                self.log.warning(Status::OsWarning, format!("close failed: {}", error));
            }
        }
        Ok(())
    }

    fn write_chunk<W: Write>(&mut self, chunk: ChunkHandle, output: &mut W) -> Result<()> {
        let (tag, attr_count, first_child) = {
            let node = self.node(chunk)?;
            (node.tag, node.attrs.len() as u16, node.first_child)
        };
        ChunkHeader { tag, attr_count }.write_to(output)?;

        for index in 0..usize::from(attr_count) {
            let (id, dtype, size, cols, file_pos, loaded) = {
                let attr = &self.chunks[chunk.0].attrs[index];
                (attr.id(), attr.dtype(), attr.size(), attr.cols(), attr.file_pos(), attr.is_loaded())
            };
            // the on-disk size covers the array subheader
            let disk_size = if dtype.is_array() { size + ARRAY_SUBHEADER_SIZE } else { size };
            AttrHeader { id, dtype, size: disk_size }.write_to(output)?;
            if dtype.is_array() {
                write_array_cols(output, cols)?;
            }
            if loaded {
                output.write_all(self.chunks[chunk.0].attrs[index].data().unwrap_or(&[]))?;
            } else {
                // materialize the file-backed payload just for this write
                let file_pos = file_pos.ok_or(Error::NoData { tag, id })?;
                let input = self.input.as_mut().ok_or(Error::NotOpen)?;
                input.seek(SeekFrom::Start(file_pos))?;
                let mut buf = vec![0; size as usize];
                input.read_exact(&mut buf)?;
                output.write_all(&buf)?;
            }
        }

        // a leaf tag (end flag already set) cannot delimit children on
        // disk, so only container chunks emit children and a close marker
        if !tag.is_end() {
            let mut next = first_child;
            while let Some(child) = next {
                next = self.chunks[child.0].next;
                self.write_chunk(child, output)?;
            }
            ChunkHeader { tag: tag.to_end(), attr_count: 0 }.write_to(output)?;
        }
        Ok(())
    }

    // Scanning

    fn scan(&mut self) -> Result<()> {
        let input = self.input.as_mut().ok_or(Error::NotOpen)?;
        let start = input.pos()?;
        let mut magic = [0; 4];
        input.read_exact(&mut magic)?;
        if magic != *MAGIC.as_bytes() {
            return Err(Error::BadMagic(magic));
        }
        input.seek(SeekFrom::Start(start))?;

        // discard any prior tree
        self.chunks.clear();
        self.index.clear();
        self.root = ChunkHandle(self.chunks.insert(Chunk::new(MAGIC)));
        self.context = None;

        self.read_next_chunk()?;

        // checking the version lazily loads the root's version attribute,
        // which moves the stream; put it back before continuing the scan
        let resume = self.input.as_mut().ok_or(Error::NotOpen)?.pos()?;
        self.check_version()?;
        self.input.as_mut().ok_or(Error::NotOpen)?.seek(SeekFrom::Start(resume))?;

        while self.context.is_some() {
            self.read_next_chunk()?;
        }
        Ok(())
    }

    fn check_version(&mut self) -> Result<()> {
        let root = self.root;
        let file = match self.attr_u32_impl(root, ATTR_VERSION)? {
            Some(raw) => FormatVersion::new(raw),
            None => return Ok(()),
        };
        let library = FormatVersion::CURRENT;
        if file.raw() > library.raw() {
            if file.major() > library.major() {
                return Err(Error::UnsupportedVersion { file, library });
            }
            self.log.warning(Status::VersionWarning, format!(
                "file version ({}) is greater than supported version ({}); some features may be unavailable",
                file, library,
            ));
        }
        Ok(())
    }

    fn read_next_chunk(&mut self) -> Result<()> {
        let input = self.input.as_mut().ok_or(Error::NotOpen)?;
        let header = ChunkHeader::read_from(input)?;
        let attr_region_pos = input.pos()?;

        if !header.tag.is_well_formed() {
            return Err(Error::BadChunkTag(header.tag.as_u32()));
        }

        let mut chunk = Chunk::new(header.tag);
        chunk.attr_region_pos = Some(attr_region_pos);
        let mut id_string = None;

        for _ in 0..header.attr_count {
            let attr_header = AttrHeader::read_from(input)?;
            let mut size = attr_header.size;
            let mut file_pos = input.pos()?;
            let mut cols = 1;

            if attr_header.dtype.is_array() {
                if size < ARRAY_SUBHEADER_SIZE {
                    self.log.warning(Status::AttrWarning, format!(
                        "{}:{:#06x} attribute has bad length",
                        header.tag, attr_header.id,
                    ));
                    input.skip(size.into())?;
                    size = 0;
                } else {
                    cols = read_array_cols(input)?;
                    if cols == 0 {
                        cols = 1;
                    }
                    file_pos += u64::from(ARRAY_SUBHEADER_SIZE);
                    size -= ARRAY_SUBHEADER_SIZE;
                }
            }

            if attr_header.id == ATTR_ID {
                // the id is indexed, so it is the one payload read eagerly
                if attr_header.dtype == DataType::UTF8 {
                    let mut buf = vec![0; size as usize];
                    input.read_exact(&mut buf)?;
                    match String::from_utf8(buf) {
                        Ok(string) => id_string = Some(string),
                        Err(_) => self.log.warning(Status::AttrWarning, format!(
                            "{}:id attribute is not valid UTF-8; ignored",
                            header.tag,
                        )),
                    }
                } else {
                    self.log.warning(Status::AttrWarning, format!(
                        "{}:id attribute has wrong type ({}); ignored",
                        header.tag, attr_header.dtype,
                    ));
                    input.skip(size.into())?;
                }
            } else {
                input.skip(size.into())?;
            }

            if chunk.find_attr(attr_header.id).is_some() {
                self.log.warning(Status::AttrWarning, format!(
                    "{}:{:#06x} attribute appears more than once; ignored",
                    header.tag, attr_header.id,
                ));
            } else {
                chunk.insert_attr(Attr::from_file(attr_header.id, attr_header.dtype, size, cols, file_pos));
            }
        }

        let tagint = header.tag.as_u32();
        match self.context {
            None => {
                // the first chunk of the file becomes the root
                self.chunks[self.root.0] = chunk;
                self.context = Some(self.root);
                if let Some(id) = id_string {
                    self.register_scanned_id(self.root, id);
                }
            }
            Some(context) => {
                if tagint == self.chunks[context.0].tagint | TagFlags::END.bits() {
                    // close marker for the open chunk: pop a nesting level
                    // and do not retain the marker
                    self.context = self.chunks[context.0].parent;
                } else {
                    let handle = ChunkHandle(self.chunks.insert(chunk));
                    self.chunks[handle.0].parent = Some(context);
                    self.link_last_child(context, handle);
                    if tagint & TagFlags::END.bits() == 0 {
                        // a start tag: children follow until its close marker
                        self.context = Some(handle);
                    }
                    if let Some(id) = id_string {
                        self.register_scanned_id(handle, id);
                    }
                }
            }
        }
        Ok(())
    }

    fn register_scanned_id(&mut self, chunk: ChunkHandle, id: String) {
        match self.index.register(&id, chunk) {
            Registration::Registered => self.chunks[chunk.0].id = Some(id),
            Registration::Duplicate => {
                let tag = self.chunks[chunk.0].tag;
                self.log.warning(Status::AttrWarning, format!(
                    "{}:id \"{}\" is already registered; first registration kept",
                    tag, id,
                ));
            }
        }
    }

    // Navigation

    /// The root chunk. Always valid.
    #[must_use]
    pub fn root(&self) -> ChunkHandle {
        self.root
    }

    /// The first child of `chunk` with the given tag, or its first child
    /// of any tag when none is given.
    pub fn get_child(&mut self, chunk: ChunkHandle, tag: impl Into<Option<Tag>>) -> Option<ChunkHandle> {
        let tag = tag.into();
        let node = match self.chunks.get(chunk.0) {
            Some(node) => node,
            None => {
                self.log.api_result(Status::BadIndex);
                return None;
            }
        };
        let mut next = node.first_child;
        while let Some(handle) = next {
            let child = &self.chunks[handle.0];
            if tag.map_or(true, |tag| child.tagint == tag.as_u32()) {
                self.log.api_result(Status::Ok);
                return Some(handle);
            }
            next = child.next;
        }
        self.log.api_result(Status::NotFound);
        None
    }

    /// The first later sibling of `chunk` with the given tag, or the
    /// immediately next sibling when none is given.
    pub fn get_next(&mut self, chunk: ChunkHandle, tag: impl Into<Option<Tag>>) -> Option<ChunkHandle> {
        let tag = tag.into();
        let node = match self.chunks.get(chunk.0) {
            Some(node) => node,
            None => {
                self.log.api_result(Status::BadIndex);
                return None;
            }
        };
        let mut next = node.next;
        while let Some(handle) = next {
            let sibling = &self.chunks[handle.0];
            if tag.map_or(true, |tag| sibling.tagint == tag.as_u32()) {
                self.log.api_result(Status::Ok);
                return Some(handle);
            }
            next = sibling.next;
        }
        self.log.api_result(Status::NotFound);
        None
    }

    pub fn get_parent(&mut self, chunk: ChunkHandle) -> Option<ChunkHandle> {
        match self.chunks.get(chunk.0) {
            None => {
                self.log.api_result(Status::BadIndex);
                None
            }
            Some(node) => match node.parent {
                Some(parent) => {
                    self.log.api_result(Status::Ok);
                    Some(parent)
                }
                None => {
                    self.log.api_result(Status::NotFound);
                    None
                }
            },
        }
    }

    /// Looks `id` up in the id index. When a tag is given, an indexed
    /// chunk of a different kind reports not-found.
    pub fn chunk_by_id(&mut self, id: &str, tag: impl Into<Option<Tag>>) -> Option<ChunkHandle> {
        let tag = tag.into();
        match self.index.lookup(id) {
            None => {
                self.log.api_result(Status::NotFound);
                None
            }
            Some(handle) => {
                if let Some(tag) = tag {
                    if self.chunks[handle.0].tagint != tag.as_u32() {
                        self.log.api_result(Status::NotFound);
                        return None;
                    }
                }
                self.log.api_result(Status::Ok);
                Some(handle)
            }
        }
    }

    /// Linear search of `chunk`'s children for one with the given id
    /// (and tag, when given).
    pub fn child_by_id(&mut self, chunk: ChunkHandle, tag: impl Into<Option<Tag>>, id: &str) -> Option<ChunkHandle> {
        let tag = tag.into();
        let node = match self.chunks.get(chunk.0) {
            Some(node) => node,
            None => {
                self.log.api_result(Status::BadIndex);
                return None;
            }
        };
        let mut next = node.first_child;
        while let Some(handle) = next {
            let child = &self.chunks[handle.0];
            if tag.map_or(true, |tag| child.tagint == tag.as_u32())
                && child.id.as_deref() == Some(id)
            {
                self.log.api_result(Status::Ok);
                return Some(handle);
            }
            next = child.next;
        }
        self.log.api_result(Status::NotFound);
        None
    }

    /// The tag of a chunk, or `None` for a stale handle.
    #[must_use]
    pub fn chunk_tag(&self, chunk: ChunkHandle) -> Option<Tag> {
        self.chunks.get(chunk.0).map(|node| node.tag)
    }

    /// The cached id string of a chunk, if it owns one.
    #[must_use]
    pub fn chunk_id(&self, chunk: ChunkHandle) -> Option<&str> {
        self.chunks.get(chunk.0).and_then(|node| node.id.as_deref())
    }

    /// The ids of a chunk's attributes, ascending.
    #[must_use]
    pub fn attr_ids(&self, chunk: ChunkHandle) -> Vec<u16> {
        match self.chunks.get(chunk.0) {
            Some(node) => node.attrs.iter().map(Attr::id).collect(),
            None => Vec::new(),
        }
    }

    // Tree mutation

    /// Appends a new chunk at the end of `parent`'s children.
    pub fn add_chunk(&mut self, parent: ChunkHandle, tag: Tag) -> Result<ChunkHandle> {
        if self.chunks.get(parent.0).is_none() {
            let error = Error::BadHandle(parent);
            return Err(self.failed(error));
        }
        let handle = ChunkHandle(self.chunks.insert(Chunk::new(tag)));
        self.chunks[handle.0].parent = Some(parent);
        self.link_last_child(parent, handle);
        self.log.api_result(Status::Ok);
        Ok(handle)
    }

    /// Detaches `chunk` from its parent and frees its whole subtree,
    /// dropping any id registrations it held.
    pub fn del_chunk(&mut self, chunk: ChunkHandle) -> Result<()> {
        let parent = match self.chunks.get(chunk.0) {
            None => {
                let error = Error::BadHandle(chunk);
                return Err(self.failed(error));
            }
            Some(node) => match node.parent {
                None => {
                    let error = Error::DeleteRoot;
                    return Err(self.failed(error));
                }
                Some(parent) => parent,
            },
        };
        self.unlink_child(parent, chunk);
        self.free_subtree(chunk);
        self.log.api_result(Status::Ok);
        Ok(())
    }

    fn link_last_child(&mut self, parent: ChunkHandle, child: ChunkHandle) {
        match self.chunks[parent.0].last_child {
            None => {
                let node = &mut self.chunks[parent.0];
                node.first_child = Some(child);
                node.last_child = Some(child);
            }
            Some(last) => {
                self.chunks[last.0].next = Some(child);
                self.chunks[parent.0].last_child = Some(child);
            }
        }
    }

    fn unlink_child(&mut self, parent: ChunkHandle, chunk: ChunkHandle) {
        let next = self.chunks[chunk.0].next;
        if self.chunks[parent.0].first_child == Some(chunk) {
            self.chunks[parent.0].first_child = next;
            if self.chunks[parent.0].last_child == Some(chunk) {
                self.chunks[parent.0].last_child = None;
            }
            return;
        }
        let mut prev = self.chunks[parent.0].first_child;
        while let Some(handle) = prev {
            if self.chunks[handle.0].next == Some(chunk) {
                self.chunks[handle.0].next = next;
                if self.chunks[parent.0].last_child == Some(chunk) {
                    self.chunks[parent.0].last_child = Some(handle);
                }
                return;
            }
            prev = self.chunks[handle.0].next;
        }
    }

    fn free_subtree(&mut self, chunk: ChunkHandle) {
        let mut stack = vec![chunk];
        while let Some(handle) = stack.pop() {
            let mut child = self.chunks[handle.0].first_child;
            while let Some(next) = child {
                stack.push(next);
                child = self.chunks[next.0].next;
            }
            if let Some(id) = self.chunks[handle.0].id.take() {
                self.index.deregister(&id, handle);
            }
            self.chunks.remove(handle.0);
        }
    }

    // Attributes

    /// Describes the attribute `id` of `chunk`. A missing attribute is not
    /// an error; it reports `exists: false` and a not-found result.
    pub fn attr_info(&mut self, chunk: ChunkHandle, id: u16) -> Result<AttrInfo> {
        let node = match self.node(chunk) {
            Ok(node) => node,
            Err(error) => return Err(self.failed(error)),
        };
        match node.attr(id) {
            Some(attr) => {
                let info = attr.info();
                self.log.api_result(Status::Ok);
                Ok(info)
            }
            None => {
                self.log.api_result(Status::NotFound);
                Ok(AttrInfo::missing())
            }
        }
    }

    /// Whether the payload of attribute `id` is currently in memory.
    #[must_use]
    pub fn attr_is_loaded(&self, chunk: ChunkHandle, id: u16) -> bool {
        self.chunks
            .get(chunk.0)
            .and_then(|node| node.attr(id))
            .map_or(false, Attr::is_loaded)
    }

    /// The raw payload bytes (on-disk little-endian layout), loading them
    /// from the file if necessary.
    pub fn attr_raw(&mut self, chunk: ChunkHandle, id: u16) -> Result<Option<&[u8]>> {
        let meta = match self.attr_meta(chunk, id) {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                self.log.api_result(Status::NotFound);
                return Ok(None);
            }
            Err(error) => return Err(self.failed(error)),
        };
        if let Err(error) = self.ensure_loaded_at(chunk, meta.index) {
            return Err(self.failed(error));
        }
        self.log.api_result(Status::Ok);
        Ok(self.chunks[chunk.0].attrs[meta.index].data())
    }

    /// The payload of a UTF-8 attribute.
    pub fn attr_str(&mut self, chunk: ChunkHandle, id: u16) -> Result<Option<String>> {
        let result = self.attr_str_impl(chunk, id);
        self.finish_opt(result)
    }

    pub fn attr_u32(&mut self, chunk: ChunkHandle, id: u16) -> Result<Option<u32>> {
        let result = self.attr_u32_impl(chunk, id);
        self.finish_opt(result)
    }

    pub fn attr_f32(&mut self, chunk: ChunkHandle, id: u16) -> Result<Option<f32>> {
        let result = self.attr_f32_impl(chunk, id);
        self.finish_opt(result)
    }

    /// A float32 array attribute, converted to host order.
    pub fn attr_f32_array(&mut self, chunk: ChunkHandle, id: u16) -> Result<Option<ArrayData<f32>>> {
        let result = self.attr_array_impl(chunk, id, DataType::F32_ARRAY, |bytes, len| {
            let mut values = vec![0_f32; len];
            LittleEndian::read_f32_into(bytes, &mut values);
            values
        });
        self.finish_opt(result)
    }

    /// A uint32 array attribute, converted to host order.
    pub fn attr_u32_array(&mut self, chunk: ChunkHandle, id: u16) -> Result<Option<ArrayData<u32>>> {
        let result = self.attr_array_impl(chunk, id, DataType::U32_ARRAY, |bytes, len| {
            let mut values = vec![0_u32; len];
            LittleEndian::read_u32_into(bytes, &mut values);
            values
        });
        self.finish_opt(result)
    }

    /// Sets a UTF-8 attribute. Pass an owned `String` to hand the buffer
    /// over, or a `&str` to have the engine take a copy. Setting the id
    /// attribute also (re)registers the chunk in the id index; a duplicate
    /// id leaves the previous owner registered and reports a duplicate
    /// result.
    pub fn set_attr_str<'a>(&mut self, chunk: ChunkHandle, id: u16, value: impl Into<Cow<'a, str>>) -> Result<()> {
        let data = value.into().into_owned().into_bytes();
        let result = self.set_attr_bytes(chunk, id, DataType::UTF8, 1, data);
        self.finish_set(result)
    }

    pub fn set_attr_u32(&mut self, chunk: ChunkHandle, id: u16, value: u32) -> Result<()> {
        let mut data = vec![0; 4];
        LittleEndian::write_u32(&mut data, value);
        let result = self.set_attr_bytes(chunk, id, DataType::U32, 1, data);
        self.finish_set(result)
    }

    pub fn set_attr_f32(&mut self, chunk: ChunkHandle, id: u16, value: f32) -> Result<()> {
        let mut data = vec![0; 4];
        LittleEndian::write_f32(&mut data, value);
        let result = self.set_attr_bytes(chunk, id, DataType::F32, 1, data);
        self.finish_set(result)
    }

    /// Sets a raw (uninterpreted bytes) attribute.
    pub fn set_attr_raw<'a>(&mut self, chunk: ChunkHandle, id: u16, value: impl Into<Cow<'a, [u8]>>) -> Result<()> {
        let data = value.into().into_owned();
        let result = self.set_attr_bytes(chunk, id, DataType::RAW, 1, data);
        self.finish_set(result)
    }

    /// Sets a float32 array attribute with `cols` values per row. Pass an
    /// owned `Vec` to hand the buffer over, or a slice to have the engine
    /// take a copy.
    pub fn set_attr_f32_array<'a>(
        &mut self,
        chunk: ChunkHandle,
        id: u16,
        cols: u16,
        values: impl Into<Cow<'a, [f32]>>,
    ) -> Result<()> {
        let values = values.into();
        let cols = if cols == 0 { 1 } else { cols };
        if let Err(error) = self.check_array_shape(chunk, id, cols, values.len()) {
            return Err(self.failed(error));
        }
        let mut data = vec![0; values.len() * 4];
        LittleEndian::write_f32_into(&values, &mut data);
        let result = self.set_attr_bytes(chunk, id, DataType::F32_ARRAY, cols, data);
        self.finish_set(result)
    }

    /// Sets a uint32 array attribute with `cols` values per row.
    pub fn set_attr_u32_array<'a>(
        &mut self,
        chunk: ChunkHandle,
        id: u16,
        cols: u16,
        values: impl Into<Cow<'a, [u32]>>,
    ) -> Result<()> {
        let values = values.into();
        let cols = if cols == 0 { 1 } else { cols };
        if let Err(error) = self.check_array_shape(chunk, id, cols, values.len()) {
            return Err(self.failed(error));
        }
        let mut data = vec![0; values.len() * 4];
        LittleEndian::write_u32_into(&values, &mut data);
        let result = self.set_attr_bytes(chunk, id, DataType::U32_ARRAY, cols, data);
        self.finish_set(result)
    }

    /// Drops the cached payload of a file-backed attribute; it can be
    /// loaded again from the file later. In-memory-only attributes have
    /// nothing to release and report not-found.
    pub fn release_attr_data(&mut self, chunk: ChunkHandle, id: u16) -> Result<()> {
        let status = match self.node_mut(chunk) {
            Err(error) => return Err(self.failed(error)),
            Ok(node) => match node.attr_mut(id) {
                None => Status::NotFound,
                Some(attr) if !attr.is_file_backed() => Status::NotFound,
                Some(attr) => {
                    attr.release();
                    Status::Ok
                }
            },
        };
        self.log.api_result(status);
        Ok(())
    }

    /// Removes attribute `id` from `chunk`, dropping an id registration if
    /// it was the id attribute.
    pub fn del_attr(&mut self, chunk: ChunkHandle, id: u16) -> Result<()> {
        let removed = match self.node_mut(chunk) {
            Ok(node) => node.remove_attr(id).is_some(),
            Err(error) => return Err(self.failed(error)),
        };
        if !removed {
            self.log.api_result(Status::NotFound);
            return Ok(());
        }
        if id == ATTR_ID {
            if let Some(old) = self.chunks[chunk.0].id.take() {
                self.index.deregister(&old, chunk);
            }
        }
        self.log.api_result(Status::Ok);
        Ok(())
    }

    /// The format version recorded on the root chunk.
    pub fn version(&mut self) -> Result<Option<FormatVersion>> {
        let root = self.root;
        let result = self
            .attr_u32_impl(root, ATTR_VERSION)
            .map(|raw| raw.map(FormatVersion::new));
        self.finish_opt(result)
    }

    // Internals

    fn node(&self, chunk: ChunkHandle) -> Result<&Chunk> {
        self.chunks.get(chunk.0).ok_or(Error::BadHandle(chunk))
    }

    fn node_mut(&mut self, chunk: ChunkHandle) -> Result<&mut Chunk> {
        self.chunks.get_mut(chunk.0).ok_or(Error::BadHandle(chunk))
    }

    fn attr_meta(&self, chunk: ChunkHandle, id: u16) -> Result<Option<AttrMeta>> {
        let node = self.node(chunk)?;
        Ok(node.find_attr(id).map(|index| {
            let attr = &node.attrs[index];
            AttrMeta {
                index,
                tag: node.tag,
                id,
                dtype: attr.dtype(),
                size: attr.size(),
                cols: attr.cols(),
            }
        }))
    }

    fn expect_dtype(meta: &AttrMeta, want: DataType) -> Result<()> {
        if meta.dtype == want {
            Ok(())
        } else {
            Err(Error::WrongDataType { tag: meta.tag, id: meta.id, have: meta.dtype, want })
        }
    }

    fn check_array_shape(&self, chunk: ChunkHandle, id: u16, cols: u16, len: usize) -> Result<()> {
        let tag = self.node(chunk)?.tag;
        if len % usize::from(cols) == 0 {
            Ok(())
        } else {
            Err(Error::BadSize { tag, id, size: len as u32 })
        }
    }

    /// Loads the payload of a file-backed attribute into its cache. A
    /// no-op when already in memory.
    fn ensure_loaded_at(&mut self, chunk: ChunkHandle, index: usize) -> Result<()> {
        let (loaded, file_pos, size, tag, id) = {
            let node = &self.chunks[chunk.0];
            let attr = &node.attrs[index];
            (attr.is_loaded(), attr.file_pos(), attr.size(), node.tag, attr.id())
        };
        if loaded {
            return Ok(());
        }
        // an unloaded attribute without file backing means a set operation
        // was never given data; that is a bug in the calling code
        let file_pos = file_pos.ok_or(Error::NoData { tag, id })?;
        let input = self.input.as_mut().ok_or(Error::NotOpen)?;
        input.seek(SeekFrom::Start(file_pos))?;
        let mut buf = vec![0; size as usize];
        input.read_exact(&mut buf)?;
        self.chunks[chunk.0].attrs[index].cache(buf);
        Ok(())
    }

    fn loaded_bytes(&mut self, meta: &AttrMeta, chunk: ChunkHandle) -> Result<&[u8]> {
        self.ensure_loaded_at(chunk, meta.index)?;
        match self.chunks[chunk.0].attrs[meta.index].data() {
            Some(bytes) => Ok(bytes),
            None => Err(Error::NoData { tag: meta.tag, id: meta.id }),
        }
    }

    fn attr_str_impl(&mut self, chunk: ChunkHandle, id: u16) -> Result<Option<String>> {
        let meta = match self.attr_meta(chunk, id)? {
            Some(meta) => meta,
            None => return Ok(None),
        };
        Self::expect_dtype(&meta, DataType::UTF8)?;
        let bytes = self.loaded_bytes(&meta, chunk)?.to_vec();
        match String::from_utf8(bytes) {
            Ok(string) => Ok(Some(string)),
            Err(_) => Err(Error::BadString { tag: meta.tag, id }),
        }
    }

    fn attr_u32_impl(&mut self, chunk: ChunkHandle, id: u16) -> Result<Option<u32>> {
        let meta = match self.attr_meta(chunk, id)? {
            Some(meta) => meta,
            None => return Ok(None),
        };
        Self::expect_dtype(&meta, DataType::U32)?;
        if meta.size != 4 {
            return Err(Error::BadSize { tag: meta.tag, id, size: meta.size });
        }
        let bytes = self.loaded_bytes(&meta, chunk)?;
        Ok(Some(LittleEndian::read_u32(bytes)))
    }

    fn attr_f32_impl(&mut self, chunk: ChunkHandle, id: u16) -> Result<Option<f32>> {
        let meta = match self.attr_meta(chunk, id)? {
            Some(meta) => meta,
            None => return Ok(None),
        };
        Self::expect_dtype(&meta, DataType::F32)?;
        if meta.size != 4 {
            return Err(Error::BadSize { tag: meta.tag, id, size: meta.size });
        }
        let bytes = self.loaded_bytes(&meta, chunk)?;
        Ok(Some(LittleEndian::read_f32(bytes)))
    }

    fn attr_array_impl<T>(
        &mut self,
        chunk: ChunkHandle,
        id: u16,
        want: DataType,
        convert: impl FnOnce(&[u8], usize) -> Vec<T>,
    ) -> Result<Option<ArrayData<T>>> {
        let meta = match self.attr_meta(chunk, id)? {
            Some(meta) => meta,
            None => return Ok(None),
        };
        Self::expect_dtype(&meta, want)?;
        let elem_size = want.elem_size(meta.size);
        if meta.size % elem_size != 0 {
            return Err(Error::BadSize { tag: meta.tag, id, size: meta.size });
        }
        let cols = meta.cols;
        let rows = (meta.size / u32::from(cols)) / elem_size;
        let bytes = self.loaded_bytes(&meta, chunk)?;
        let values = convert(bytes, (meta.size / elem_size) as usize);
        Ok(Some(ArrayData { cols, rows, values }))
    }

    fn set_attr_bytes(
        &mut self,
        chunk: ChunkHandle,
        id: u16,
        dtype: DataType,
        cols: u16,
        data: Vec<u8>,
    ) -> Result<Status> {
        let tag = self.node(chunk)?.tag;
        let node = &mut self.chunks[chunk.0];
        match node.attr_mut(id) {
            Some(attr) => {
                if attr.dtype() != dtype {
                    let have = attr.dtype();
                    return Err(Error::WrongDataType { tag, id, have, want: dtype });
                }
                attr.replace(cols, data);
            }
            None => node.insert_attr(Attr::in_memory(id, dtype, cols, data)),
        }
        if id == ATTR_ID && dtype == DataType::UTF8 {
            return Ok(self.reregister_id(chunk));
        }
        Ok(Status::Ok)
    }

    /// Rebuilds the cached id and index entry after the id attribute was
    /// set. The first registration of an id wins; a loser keeps its
    /// attribute but owns no index entry.
    fn reregister_id(&mut self, chunk: ChunkHandle) -> Status {
        let id_string = {
            let node = &self.chunks[chunk.0];
            node.attr(ATTR_ID)
                .and_then(Attr::data)
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        };
        let id_string = match id_string {
            Some(id_string) => id_string,
            None => return Status::Ok,
        };
        if let Some(old) = self.chunks[chunk.0].id.take() {
            self.index.deregister(&old, chunk);
        }
        match self.index.register(&id_string, chunk) {
            Registration::Registered => {
                self.chunks[chunk.0].id = Some(id_string);
                Status::Ok
            }
            Registration::Duplicate => Status::Duplicate,
        }
    }

    fn finish_unit(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                self.log.api_result(Status::Ok);
                Ok(())
            }
            Err(error) => Err(self.failed(error)),
        }
    }

    fn finish_set(&mut self, result: Result<Status>) -> Result<()> {
        match result {
            Ok(status) => {
                self.log.api_result(status);
                Ok(())
            }
            Err(error) => Err(self.failed(error)),
        }
    }

    fn finish_opt<T>(&mut self, result: Result<Option<T>>) -> Result<Option<T>> {
        match result {
            Ok(Some(value)) => {
                self.log.api_result(Status::Ok);
                Ok(Some(value))
            }
            Ok(None) => {
                self.log.api_result(Status::NotFound);
                Ok(None)
            }
            Err(error) => Err(self.failed(error)),
        }
    }
}

impl Default for Omrx {
    fn default() -> Self {
        Self::new()
    }
}
