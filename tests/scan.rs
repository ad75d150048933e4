use libomrx::{tag, DataType, Error, Omrx, Status, ATTR_DATA, ATTR_ID};
use std::{cell::RefCell, io::Cursor, rc::Rc};

fn chunk_header(tag: &[u8; 4], attr_count: u16) -> Vec<u8> {
    let mut bytes = tag.to_vec();
    bytes.extend_from_slice(&attr_count.to_le_bytes());
    bytes
}

fn attr_header(id: u16, dtype: u16, size: u32) -> Vec<u8> {
    let mut bytes = id.to_le_bytes().to_vec();
    bytes.extend_from_slice(&dtype.to_le_bytes());
    bytes.extend_from_slice(&size.to_le_bytes());
    bytes
}

fn id_attr(id_str: &str) -> Vec<u8> {
    let mut bytes = attr_header(0x0001, 0xf000, id_str.len() as u32);
    bytes.extend_from_slice(id_str.as_bytes());
    bytes
}

fn root_with_version(raw: u32) -> Vec<u8> {
    let mut bytes = chunk_header(b"OMRX", 1);
    bytes.extend(attr_header(0x0000, 0x0002, 4));
    bytes.extend_from_slice(&raw.to_le_bytes());
    bytes
}

fn root_close() -> Vec<u8> {
    chunk_header(b"OMRx", 0)
}

fn minimal_file() -> Vec<u8> {
    let mut bytes = root_with_version(1);
    bytes.extend(root_close());
    bytes
}

fn capture_warnings(omrx: &mut Omrx) -> Rc<RefCell<Vec<(Status, String)>>> {
    let warnings = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&warnings);
    omrx.set_log_warning(Some(Box::new(move |status: Status, message: &str| {
        sink.borrow_mut().push((status, message.to_owned()));
    })));
    warnings
}

#[test]
fn minimal_file_scans_clean() {
    let mut omrx = Omrx::new();
    omrx.open_reader(Cursor::new(minimal_file())).unwrap();
    assert_eq!(omrx.status(false), Status::Ok);
    assert_eq!(omrx.get_child(omrx.root(), None), None);
}

#[test]
fn bad_magic_is_rejected() {
    let mut omrx = Omrx::new();
    omrx.set_log_error(None);
    match omrx.open_reader(Cursor::new(b"XXXX\x00\x00".to_vec())) {
        Err(Error::BadMagic(magic)) => assert_eq!(&magic, b"XXXX"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(omrx.last_result(), Status::BadMagic);
    assert!(omrx.status(false).is_error());
    assert_eq!(omrx.get_child(omrx.root(), None), None);
}

#[test]
fn newer_minor_version_warns_and_scans() {
    let mut bytes = root_with_version(0x0000_0002);
    bytes.extend(root_close());
    let mut omrx = Omrx::new();
    let warnings = capture_warnings(&mut omrx);
    omrx.open_reader(Cursor::new(bytes)).unwrap();
    assert_eq!(warnings.borrow().len(), 1);
    assert_eq!(warnings.borrow()[0].0, Status::VersionWarning);
    // sticky until read with reset
    assert_eq!(omrx.status(true), Status::VersionWarning);
    assert_eq!(omrx.status(false), Status::Ok);
}

#[test]
fn newer_major_version_is_rejected() {
    let mut bytes = root_with_version(0x0001_0000);
    bytes.extend(root_close());
    let mut omrx = Omrx::new();
    omrx.set_log_error(None);
    match omrx.open_reader(Cursor::new(bytes)) {
        Err(Error::UnsupportedVersion { .. }) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(omrx.last_result(), Status::BadVersion);
    assert_eq!(omrx.get_child(omrx.root(), None), None);
}

#[test]
fn trailing_garbage_after_close_marker_is_ignored() {
    let mut bytes = minimal_file();
    bytes.extend_from_slice(b"garbage after the end");
    let mut omrx = Omrx::new();
    omrx.open_reader(Cursor::new(bytes)).unwrap();
    assert_eq!(omrx.status(false), Status::Ok);
}

#[test]
fn truncated_file_reports_eof() {
    let mut bytes = root_with_version(1);
    // no close marker: the scan runs off the end of the stream
    bytes.extend(chunk_header(b"MesH", 0));
    let mut omrx = Omrx::new();
    omrx.set_log_error(None);
    assert!(omrx.open_reader(Cursor::new(bytes)).is_err());
    assert_eq!(omrx.last_result(), Status::UnexpectedEof);
}

#[test]
fn invalid_tag_bytes_are_rejected() {
    let mut bytes = root_with_version(1);
    bytes.extend(chunk_header(b"AB\x01D", 0));
    bytes.extend(root_close());
    let mut omrx = Omrx::new();
    omrx.set_log_error(None);
    match omrx.open_reader(Cursor::new(bytes)) {
        Err(Error::BadChunkTag(_)) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(omrx.last_result(), Status::BadChunk);
}

#[test]
fn duplicate_programmatic_id_keeps_first() {
    let mut omrx = Omrx::new();
    let root = omrx.root();
    let first = omrx.add_chunk(root, tag!(b"MesH")).unwrap();
    let second = omrx.add_chunk(root, tag!(b"MesH")).unwrap();
    omrx.set_attr_str(first, ATTR_ID, "dup").unwrap();
    assert_eq!(omrx.last_result(), Status::Ok);
    omrx.set_attr_str(second, ATTR_ID, "dup").unwrap();
    assert_eq!(omrx.last_result(), Status::Duplicate);
    assert_eq!(omrx.chunk_by_id("dup", None), Some(first));
    // the losing chunk still carries its attribute, but owns no id
    assert_eq!(omrx.attr_str(second, ATTR_ID).unwrap().as_deref(), Some("dup"));
    assert_eq!(omrx.chunk_id(second), None);
}

#[test]
fn duplicate_scanned_id_warns_and_keeps_first() {
    let mut bytes = root_with_version(1);
    bytes.extend(chunk_header(b"MesH", 1));
    bytes.extend(id_attr("dup"));
    bytes.extend(chunk_header(b"Mesh", 0));
    bytes.extend(chunk_header(b"MoDL", 1));
    bytes.extend(id_attr("dup"));
    bytes.extend(chunk_header(b"MoDl", 0));
    bytes.extend(root_close());

    let mut omrx = Omrx::new();
    let warnings = capture_warnings(&mut omrx);
    omrx.open_reader(Cursor::new(bytes)).unwrap();
    assert_eq!(warnings.borrow().len(), 1);
    assert_eq!(warnings.borrow()[0].0, Status::AttrWarning);
    let winner = omrx.chunk_by_id("dup", None).expect("id not registered");
    assert_eq!(omrx.chunk_tag(winner), Some(tag!(b"MesH")));
    assert_eq!(omrx.status(false), Status::AttrWarning);
}

#[test]
fn mistyped_id_attribute_warns_and_skips_registration() {
    let mut bytes = root_with_version(1);
    bytes.extend(chunk_header(b"VDat", 1));
    bytes.extend(attr_header(0x0001, 0x0002, 4));
    bytes.extend_from_slice(&7_u32.to_le_bytes());
    bytes.extend(root_close());

    let mut omrx = Omrx::new();
    let warnings = capture_warnings(&mut omrx);
    omrx.open_reader(Cursor::new(bytes)).unwrap();
    assert_eq!(warnings.borrow().len(), 1);
    let vdat = omrx.get_child(omrx.root(), tag!(b"VDat")).expect("chunk missing");
    assert_eq!(omrx.chunk_id(vdat), None);
    // the attribute itself is kept, with its (wrong) declared type
    let info = omrx.attr_info(vdat, ATTR_ID).unwrap();
    assert!(info.exists);
    assert_eq!(info.encoded_type, DataType::U32);
}

#[test]
fn zero_cols_normalizes_to_one() {
    let mut bytes = root_with_version(1);
    bytes.extend(chunk_header(b"VDat", 1));
    bytes.extend(attr_header(0xffff, 0x1022, 26));
    bytes.extend_from_slice(&0_u16.to_le_bytes());
    for value in [1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0].iter() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes.extend(root_close());

    let mut omrx = Omrx::new();
    omrx.open_reader(Cursor::new(bytes)).unwrap();
    assert_eq!(omrx.status(false), Status::Ok);
    let vdat = omrx.get_child(omrx.root(), tag!(b"VDat")).expect("chunk missing");
    let info = omrx.attr_info(vdat, ATTR_DATA).unwrap();
    assert_eq!(info.cols, 1);
    assert_eq!(info.rows, 6);
    assert_eq!(info.size, 24);
    let data = omrx.attr_f32_array(vdat, ATTR_DATA).unwrap().expect("no data");
    assert_eq!(data.values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn undersized_array_attribute_warns() {
    let mut bytes = root_with_version(1);
    bytes.extend(chunk_header(b"VDat", 1));
    // an array attribute too small to hold its own subheader
    bytes.extend(attr_header(0xffff, 0x1022, 1));
    bytes.push(0xaa);
    bytes.extend(root_close());

    let mut omrx = Omrx::new();
    let warnings = capture_warnings(&mut omrx);
    omrx.open_reader(Cursor::new(bytes)).unwrap();
    assert_eq!(warnings.borrow().len(), 1);
    let vdat = omrx.get_child(omrx.root(), tag!(b"VDat")).expect("chunk missing");
    let info = omrx.attr_info(vdat, ATTR_DATA).unwrap();
    assert!(info.exists);
    assert_eq!(info.size, 0);
}

#[test]
fn nested_chunks_follow_the_context() {
    let mut bytes = root_with_version(1);
    bytes.extend(chunk_header(b"MoDL", 0));
    // a leaf child inside the model; its end flag means no nesting
    bytes.extend(chunk_header(b"MLOd", 0));
    bytes.extend(chunk_header(b"MLOd", 0));
    bytes.extend(chunk_header(b"MoDl", 0));
    bytes.extend(chunk_header(b"MesH", 0));
    bytes.extend(chunk_header(b"Mesh", 0));
    bytes.extend(root_close());

    let mut omrx = Omrx::new();
    omrx.open_reader(Cursor::new(bytes)).unwrap();
    let root = omrx.root();
    let model = omrx.get_child(root, tag!(b"MoDL")).expect("no model");
    let first_lod = omrx.get_child(model, tag!(b"MLOd")).expect("no lod");
    assert!(omrx.get_next(first_lod, tag!(b"MLOd")).is_some());
    let mesh = omrx.get_next(model, None).expect("no mesh sibling");
    assert_eq!(omrx.chunk_tag(mesh), Some(tag!(b"MesH")));
    // close markers are consumed, never retained as children
    assert_eq!(omrx.get_child(mesh, None), None);
    assert_eq!(omrx.get_next(mesh, None), None);
}

#[test]
fn close_requires_open() {
    let mut omrx = Omrx::new();
    omrx.set_log_error(None);
    match omrx.close() {
        Err(Error::NotOpen) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(omrx.last_result(), Status::NotOpen);
}

#[test]
fn open_twice_fails_until_closed() {
    let mut omrx = Omrx::new();
    omrx.set_log_error(None);
    omrx.open_reader(Cursor::new(minimal_file())).unwrap();
    match omrx.open_reader(Cursor::new(minimal_file())) {
        Err(Error::AlreadyOpen) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(omrx.last_result(), Status::AlreadyOpen);
    omrx.close().unwrap();
    assert!(!omrx.is_open());
    omrx.open_reader(Cursor::new(minimal_file())).unwrap();
}

#[test]
fn rescanning_discards_the_previous_tree() {
    let mut omrx = Omrx::new();
    let root = omrx.root();
    let mesh = omrx.add_chunk(root, tag!(b"MesH")).unwrap();
    omrx.set_attr_str(mesh, ATTR_ID, "old").unwrap();
    omrx.open_reader(Cursor::new(minimal_file())).unwrap();
    assert_eq!(omrx.get_child(omrx.root(), None), None);
    assert_eq!(omrx.chunk_by_id("old", None), None);
}
