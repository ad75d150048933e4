//! Typed views over the model/LOD/mesh chunk schema.
//!
//! The overlay does not add state of its own: a [`Model`] or [`Mesh`] is a
//! checked [`ChunkHandle`], and every accessor is a thin wrapper over the
//! container's chunk and attribute operations.
//!
//! A model's `MLOd` children list its level-of-detail variants from
//! highest to lowest PPSU ("pixels per scene unit"); each names the mesh
//! it stands for by id. Meshes live at the top level and carry `VDat`
//! vertex tables and a `PoLy` polygon-index table.

use byteorder::{ByteOrder, LittleEndian};
use crate::{
    attr::{ATTR_DATA, ATTR_ID},
    chunk::ChunkHandle,
    container::Omrx,
    error::{Error, Result, Status},
    types::{dtype::DataType, tag::Tag},
};
use derive_more::Display;
use num_derive::FromPrimitive;
use std::borrow::Cow;

pub const TAG_MODEL: Tag = Tag::new(*b"MoDL");
pub const TAG_LOD: Tag = Tag::new(*b"MLOd");
pub const TAG_MESH: Tag = Tag::new(*b"MesH");
pub const TAG_VERTEX_DATA: Tag = Tag::new(*b"VDat");
pub const TAG_POLYS: Tag = Tag::new(*b"PoLy");

/// Attribute id of a human-readable name (UTF-8).
pub const ATTR_NAME: u16 = 0x0002;
/// Attribute id of a model's scene-unit scale (f32).
pub const ATTR_SCALE: u16 = 0x0003;
/// Attribute id of an LOD entry's pixels-per-scene-unit density (f32).
pub const ATTR_PPSU: u16 = 0x0004;
/// Attribute id of a vertex table's data kind (u32).
pub const ATTR_VDATA_TYPE: u16 = 0x0005;
/// Attribute id disambiguating multiple vertex tables of one kind (u32).
pub const ATTR_VDATA_INDEX: u16 = 0x0006;

/// What a `VDat` table holds.
#[derive(Clone, Copy, Debug, Display, Eq, FromPrimitive, Hash, PartialEq)]
pub enum MeshDataKind {
    #[display(fmt = "vertices")]
    Vertices = 1,
    #[display(fmt = "normals")]
    Normals = 2,
    #[display(fmt = "material indices")]
    MatIndex = 3,
    #[display(fmt = "texture coordinates")]
    TexCoords = 4,
}

/// How a `PoLy` table's indices group into polygons. The kind is encoded
/// by the table's column count.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum PolyKind {
    #[display(fmt = "triangle strips")]
    Tristrips,
    #[display(fmt = "triangles")]
    Triangles,
    #[display(fmt = "quads")]
    Quads,
}

impl PolyKind {
    #[must_use]
    pub fn from_cols(cols: u16) -> Option<PolyKind> {
        match cols {
            1 => Some(PolyKind::Tristrips),
            3 => Some(PolyKind::Triangles),
            4 => Some(PolyKind::Quads),
            _ => None,
        }
    }

    #[must_use]
    pub fn cols(self) -> u16 {
        match self {
            PolyKind::Tristrips => 1,
            PolyKind::Triangles => 3,
            PolyKind::Quads => 4,
        }
    }
}

/// One vertex table's payload, with its declared shape.
#[derive(Clone, Debug)]
pub struct MeshData {
    pub kind: MeshDataKind,
    pub dtype: DataType,
    pub cols: u16,
    pub rows: u32,
    /// Payload bytes in the on-disk little-endian layout.
    pub data: Vec<u8>,
}

impl MeshData {
    /// The values in host order, when the table holds float32 elements.
    #[must_use]
    pub fn floats(&self) -> Option<Vec<f32>> {
        if self.dtype.elem_type() != DataType::F32 || self.data.len() % 4 != 0 {
            return None;
        }
        let mut values = vec![0_f32; self.data.len() / 4];
        LittleEndian::read_f32_into(&self.data, &mut values);
        Some(values)
    }
}

/// A mesh's polygon-index table.
#[derive(Clone, Debug)]
pub struct Polys {
    pub kind: PolyKind,
    pub dtype: DataType,
    /// Total number of indices (rows × columns).
    pub count: u32,
    /// Payload bytes in the on-disk little-endian layout.
    pub data: Vec<u8>,
}

impl Polys {
    /// The indices in host order, when the table holds uint32 elements.
    #[must_use]
    pub fn indices(&self) -> Option<Vec<u32>> {
        if self.dtype.elem_type() != DataType::U32 || self.data.len() % 4 != 0 {
            return None;
        }
        let mut values = vec![0_u32; self.data.len() / 4];
        LittleEndian::read_u32_into(&self.data, &mut values);
        Some(values)
    }
}

/// A `MoDL` chunk viewed as a model.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Model {
    chunk: ChunkHandle,
}

impl Model {
    /// Wraps a chunk, verifying it is a model chunk.
    pub fn from_chunk(omrx: &mut Omrx, chunk: ChunkHandle) -> Result<Model> {
        check_tag(omrx, chunk, TAG_MODEL)?;
        Ok(Model { chunk })
    }

    #[must_use]
    pub fn chunk(self) -> ChunkHandle {
        self.chunk
    }

    /// Adds a new model at the end of the root's children.
    pub fn add(omrx: &mut Omrx) -> Result<Model> {
        let root = omrx.root();
        let chunk = omrx.add_chunk(root, TAG_MODEL)?;
        Ok(Model { chunk })
    }

    pub fn by_id(omrx: &mut Omrx, id: &str) -> Result<Option<Model>> {
        match omrx.chunk_by_id(id, TAG_MODEL) {
            Some(chunk) => Ok(Some(Model { chunk })),
            None => Ok(None),
        }
    }

    /// The `index`th model under the root, in file order.
    pub fn by_index(omrx: &mut Omrx, index: usize) -> Result<Option<Model>> {
        let root = omrx.root();
        let mut chunk = match omrx.get_child(root, TAG_MODEL) {
            Some(chunk) => chunk,
            None => return Ok(None),
        };
        for _ in 0..index {
            chunk = match omrx.get_next(chunk, TAG_MODEL) {
                Some(chunk) => chunk,
                None => return Ok(None),
            };
        }
        Ok(Some(Model { chunk }))
    }

    pub fn id(self, omrx: &mut Omrx) -> Result<Option<String>> {
        omrx.attr_str(self.chunk, ATTR_ID)
    }

    pub fn set_id(self, omrx: &mut Omrx, id: &str) -> Result<()> {
        omrx.set_attr_str(self.chunk, ATTR_ID, id)
    }

    pub fn name(self, omrx: &mut Omrx) -> Result<Option<String>> {
        omrx.attr_str(self.chunk, ATTR_NAME)
    }

    pub fn set_name(self, omrx: &mut Omrx, name: &str) -> Result<()> {
        omrx.set_attr_str(self.chunk, ATTR_NAME, name)
    }

    pub fn scale(self, omrx: &mut Omrx) -> Result<Option<f32>> {
        omrx.attr_f32(self.chunk, ATTR_SCALE)
    }

    pub fn set_scale(self, omrx: &mut Omrx, scale: f32) -> Result<()> {
        omrx.set_attr_f32(self.chunk, ATTR_SCALE, scale)
    }

    /// How many LOD entries the model lists.
    pub fn lod_count(self, omrx: &mut Omrx) -> Result<usize> {
        let mut count = 0;
        let mut next = omrx.get_child(self.chunk, TAG_LOD);
        while let Some(lod) = next {
            count += 1;
            next = omrx.get_next(lod, TAG_LOD);
        }
        Ok(count)
    }

    /// The PPSU of the `index`th LOD entry.
    pub fn lod_ppsu(self, omrx: &mut Omrx, index: usize) -> Result<Option<f32>> {
        let mut chunk = match omrx.get_child(self.chunk, TAG_LOD) {
            Some(chunk) => chunk,
            None => return Ok(None),
        };
        for _ in 0..index {
            chunk = match omrx.get_next(chunk, TAG_LOD) {
                Some(chunk) => chunk,
                None => return Ok(None),
            };
        }
        omrx.attr_f32(chunk, ATTR_PPSU)
    }

    /// Appends an LOD entry referencing `mesh_id`. Entries must be added
    /// highest-PPSU first; the order is preserved as given.
    pub fn add_lod(self, omrx: &mut Omrx, ppsu: f32, mesh_id: &str) -> Result<()> {
        let lod = omrx.add_chunk(self.chunk, TAG_LOD)?;
        omrx.set_attr_f32(lod, ATTR_PPSU, ppsu)?;
        // the id here is a reference to the mesh, so a duplicate result
        // from the register path is expected and harmless
        omrx.set_attr_str(lod, ATTR_ID, mesh_id)
    }

    /// Selects the mesh for a requested PPSU: the least-detailed LOD entry
    /// that still meets it. Entries with a bad or missing PPSU are skipped
    /// with a warning. When no entry meets the request there is no match.
    pub fn mesh_by_ppsu(self, omrx: &mut Omrx, ppsu: f32) -> Result<Option<Mesh>> {
        let lod = match self.find_lod(omrx, ppsu) {
            Some(lod) => lod,
            None => {
                omrx.note_result(Status::NotFound);
                return Ok(None);
            }
        };
        let mesh_id = match omrx.attr_str(lod, ATTR_ID)? {
            Some(mesh_id) => mesh_id,
            None => return Ok(None),
        };
        match omrx.chunk_by_id(&mesh_id, TAG_MESH) {
            Some(chunk) => Ok(Some(Mesh { chunk })),
            None => Ok(None),
        }
    }

    fn find_lod(self, omrx: &mut Omrx, ppsu: f32) -> Option<ChunkHandle> {
        // entries are listed highest PPSU first: keep walking while they
        // still meet the request, and take the last one that did
        let mut best = None;
        let mut next = omrx.get_child(self.chunk, TAG_LOD);
        while let Some(lod) = next {
            next = omrx.get_next(lod, TAG_LOD);
            let lod_ppsu = match checked_ppsu(omrx, lod) {
                Some(lod_ppsu) => lod_ppsu,
                None => {
                    omrx.warn(Status::AttrWarning, String::from(
                        "model LOD entry has bad or missing ppsu attribute; entry ignored",
                    ));
                    continue;
                }
            };
            if lod_ppsu < ppsu {
                break;
            }
            best = Some(lod);
        }
        best
    }
}

/// Reads an LOD entry's PPSU without raising an error for a bad entry;
/// a missing, mistyped, or non-positive value is `None`.
fn checked_ppsu(omrx: &mut Omrx, lod: ChunkHandle) -> Option<f32> {
    let info = omrx.attr_info(lod, ATTR_PPSU).ok()?;
    if !info.exists || info.encoded_type != DataType::F32 {
        return None;
    }
    match omrx.attr_f32(lod, ATTR_PPSU) {
        Ok(Some(value)) if value > 0.0 => Some(value),
        _ => None,
    }
}

/// A `MesH` chunk viewed as a mesh.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Mesh {
    chunk: ChunkHandle,
}

impl Mesh {
    /// Wraps a chunk, verifying it is a mesh chunk.
    pub fn from_chunk(omrx: &mut Omrx, chunk: ChunkHandle) -> Result<Mesh> {
        check_tag(omrx, chunk, TAG_MESH)?;
        Ok(Mesh { chunk })
    }

    #[must_use]
    pub fn chunk(self) -> ChunkHandle {
        self.chunk
    }

    /// Adds a new top-level mesh registered under `id`.
    pub fn add(omrx: &mut Omrx, id: &str) -> Result<Mesh> {
        let root = omrx.root();
        let chunk = omrx.add_chunk(root, TAG_MESH)?;
        omrx.set_attr_str(chunk, ATTR_ID, id)?;
        Ok(Mesh { chunk })
    }

    pub fn by_id(omrx: &mut Omrx, id: &str) -> Result<Option<Mesh>> {
        match omrx.chunk_by_id(id, TAG_MESH) {
            Some(chunk) => Ok(Some(Mesh { chunk })),
            None => Ok(None),
        }
    }

    /// The vertex table of the given kind and set index.
    pub fn vertex_data(self, omrx: &mut Omrx, kind: MeshDataKind, index: u32) -> Result<Option<MeshData>> {
        let vdat = match self.find_vdat(omrx, kind, index)? {
            Some(vdat) => vdat,
            None => {
                omrx.note_result(Status::NotFound);
                return Ok(None);
            }
        };
        let info = omrx.attr_info(vdat, ATTR_DATA)?;
        if !info.exists {
            return Ok(None);
        }
        let data = match omrx.attr_raw(vdat, ATTR_DATA)? {
            Some(bytes) => bytes.to_vec(),
            None => return Ok(None),
        };
        Ok(Some(MeshData {
            kind,
            dtype: info.encoded_type,
            cols: info.cols,
            rows: info.rows,
            data,
        }))
    }

    /// Stores a float32 vertex table of the given kind and set index,
    /// replacing an existing one.
    pub fn set_vertex_data<'a>(
        self,
        omrx: &mut Omrx,
        kind: MeshDataKind,
        index: u32,
        cols: u16,
        values: impl Into<Cow<'a, [f32]>>,
    ) -> Result<()> {
        let vdat = match self.find_vdat(omrx, kind, index)? {
            Some(vdat) => vdat,
            None => {
                let vdat = omrx.add_chunk(self.chunk, TAG_VERTEX_DATA)?;
                omrx.set_attr_u32(vdat, ATTR_VDATA_TYPE, kind as u32)?;
                omrx.set_attr_u32(vdat, ATTR_VDATA_INDEX, index)?;
                vdat
            }
        };
        omrx.set_attr_f32_array(vdat, ATTR_DATA, cols, values)
    }

    /// The mesh's polygon table. The table's column count names its kind;
    /// an unrecognized column count is reported as a bad attribute.
    pub fn polys(self, omrx: &mut Omrx) -> Result<Option<Polys>> {
        let poly = match omrx.get_child(self.chunk, TAG_POLYS) {
            Some(poly) => poly,
            None => return Ok(None),
        };
        let info = omrx.attr_info(poly, ATTR_DATA)?;
        if !info.exists {
            return Ok(None);
        }
        let kind = match PolyKind::from_cols(info.cols) {
            Some(kind) => kind,
            None => {
                omrx.warn(Status::AttrWarning, format!(
                    "polygon table has unrecognized column count {}; table ignored",
                    info.cols,
                ));
                return Ok(None);
            }
        };
        let data = match omrx.attr_raw(poly, ATTR_DATA)? {
            Some(bytes) => bytes.to_vec(),
            None => return Ok(None),
        };
        Ok(Some(Polys {
            kind,
            dtype: info.encoded_type,
            count: info.rows * u32::from(info.cols),
            data,
        }))
    }

    /// Stores a uint32 polygon-index table of the given kind, replacing an
    /// existing one.
    pub fn set_polys<'a>(
        self,
        omrx: &mut Omrx,
        kind: PolyKind,
        indices: impl Into<Cow<'a, [u32]>>,
    ) -> Result<()> {
        let poly = match omrx.get_child(self.chunk, TAG_POLYS) {
            Some(poly) => poly,
            None => omrx.add_chunk(self.chunk, TAG_POLYS)?,
        };
        omrx.set_attr_u32_array(poly, ATTR_DATA, kind.cols(), indices)
    }

    fn find_vdat(self, omrx: &mut Omrx, kind: MeshDataKind, index: u32) -> Result<Option<ChunkHandle>> {
        let mut next = omrx.get_child(self.chunk, TAG_VERTEX_DATA);
        while let Some(vdat) = next {
            next = omrx.get_next(vdat, TAG_VERTEX_DATA);
            if vdat_matches(omrx, vdat, kind, index) {
                return Ok(Some(vdat));
            }
        }
        Ok(None)
    }
}

/// Whether a `VDat` chunk declares the given kind and set index. Tables
/// with missing or mistyped declarations never match.
fn vdat_matches(omrx: &mut Omrx, vdat: ChunkHandle, kind: MeshDataKind, index: u32) -> bool {
    let declared_kind = match checked_u32(omrx, vdat, ATTR_VDATA_TYPE) {
        Some(value) => value,
        None => return false,
    };
    if declared_kind != kind as u32 {
        return false;
    }
    match checked_u32(omrx, vdat, ATTR_VDATA_INDEX) {
        Some(value) => value == index,
        None => false,
    }
}

fn checked_u32(omrx: &mut Omrx, chunk: ChunkHandle, id: u16) -> Option<u32> {
    let info = omrx.attr_info(chunk, id).ok()?;
    if !info.exists || info.encoded_type != DataType::U32 {
        return None;
    }
    omrx.attr_u32(chunk, id).ok().flatten()
}

fn check_tag(omrx: &mut Omrx, chunk: ChunkHandle, want: Tag) -> Result<()> {
    let tag = match omrx.chunk_tag(chunk) {
        Some(tag) => tag,
        None => return Err(omrx.failed(Error::BadHandle(chunk))),
    };
    if tag.as_u32() == want.as_u32() {
        Ok(())
    } else {
        Err(omrx.failed(Error::WrongChunkType { tag, want }))
    }
}
