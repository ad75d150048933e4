use crate::{attr::Attr, types::tag::Tag};
use derive_more::Display;

/// A reference to a chunk owned by an [`Omrx`](crate::Omrx) container.
///
/// Handles are plain indices into the container's chunk arena: cheap to
/// copy, but stale once the chunk they name has been deleted (or the
/// container rescanned). Using a stale handle reports a bad-index status
/// rather than touching freed memory.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[display(fmt = "chunk #{}", _0)]
pub struct ChunkHandle(pub(crate) usize);

/// One node of the chunk tree.
#[derive(Clone, Debug)]
pub(crate) struct Chunk {
    pub tag: Tag,
    /// Cached packed form of `tag` for fast comparison.
    pub tagint: u32,
    pub parent: Option<ChunkHandle>,
    pub first_child: Option<ChunkHandle>,
    pub last_child: Option<ChunkHandle>,
    pub next: Option<ChunkHandle>,
    /// Attributes, ascending by id, no duplicates.
    pub attrs: Vec<Attr>,
    /// Cached id string; set iff the chunk owns an entry in the id index.
    pub id: Option<String>,
    /// Where this chunk's attribute region began in the source file.
    pub attr_region_pos: Option<u64>,
}

impl Chunk {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            tagint: tag.as_u32(),
            parent: None,
            first_child: None,
            last_child: None,
            next: None,
            attrs: Vec::new(),
            id: None,
            attr_region_pos: None,
        }
    }

    pub fn find_attr(&self, id: u16) -> Option<usize> {
        self.attrs.binary_search_by_key(&id, Attr::id).ok()
    }

    pub fn attr(&self, id: u16) -> Option<&Attr> {
        self.find_attr(id).map(|index| &self.attrs[index])
    }

    pub fn attr_mut(&mut self, id: u16) -> Option<&mut Attr> {
        match self.find_attr(id) {
            Some(index) => Some(&mut self.attrs[index]),
            None => None,
        }
    }

    /// Inserts at the position that keeps the list ascending by id. An
    /// attribute with the same id is replaced wholesale.
    pub fn insert_attr(&mut self, attr: Attr) {
        match self.attrs.binary_search_by_key(&attr.id(), Attr::id) {
            Ok(index) => self.attrs[index] = attr,
            Err(index) => self.attrs.insert(index, attr),
        }
    }

    pub fn remove_attr(&mut self, id: u16) -> Option<Attr> {
        self.find_attr(id).map(|index| self.attrs.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::dtype::DataType;

    fn raw_attr(id: u16) -> Attr {
        Attr::in_memory(id, DataType::RAW, 1, vec![id as u8])
    }

    #[test]
    fn attrs_stay_sorted() {
        let mut chunk = Chunk::new(Tag::new(*b"MoDL"));
        for id in [0xffff, 0x0001, 0x0010, 0x0000, 0x0004].iter() {
            chunk.insert_attr(raw_attr(*id));
        }
        let ids = chunk.attrs.iter().map(Attr::id).collect::<Vec<_>>();
        assert_eq!(ids, vec![0x0000, 0x0001, 0x0004, 0x0010, 0xffff]);
    }

    #[test]
    fn insert_replaces_duplicates() {
        let mut chunk = Chunk::new(Tag::new(*b"MoDL"));
        chunk.insert_attr(raw_attr(0x0004));
        chunk.insert_attr(Attr::in_memory(0x0004, DataType::RAW, 1, vec![7, 7]));
        assert_eq!(chunk.attrs.len(), 1);
        assert_eq!(chunk.attr(0x0004).unwrap().size(), 2);
    }

    #[test]
    fn remove_keeps_order() {
        let mut chunk = Chunk::new(Tag::new(*b"MoDL"));
        for id in 0..4 {
            chunk.insert_attr(raw_attr(id));
        }
        assert!(chunk.remove_attr(2).is_some());
        assert!(chunk.remove_attr(2).is_none());
        let ids = chunk.attrs.iter().map(Attr::id).collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 1, 3]);
    }
}
