use libomrx::{tag, ArrayData, DataType, Error, Omrx, Status, ATTR_DATA, ATTR_ID};
use std::io::Cursor;

#[test]
fn write_then_read_back_float_array() -> anyhow::Result<()> {
    let mut omrx = Omrx::new();
    let root = omrx.root();
    let mesh = omrx.add_chunk(root, tag!(b"mESH"))?;
    omrx.set_attr_str(mesh, ATTR_ID, "test")?;
    let vrtx = omrx.add_chunk(mesh, tag!(b"VRTx"))?;
    omrx.set_attr_f32_array(vrtx, ATTR_DATA, 3, vec![0.0, 1.0, 2.0, 1.0, 2.0, 3.0])?;

    let file = tempfile::NamedTempFile::new()?;
    omrx.write(file.path())?;

    let mut omrx = Omrx::new();
    omrx.open(file.path())?;
    let mesh = omrx.chunk_by_id("test", tag!(b"mESH")).expect("mesh not found");
    let vrtx = omrx.get_child(mesh, tag!(b"VRTx")).expect("vertex chunk not found");
    let info = omrx.attr_info(vrtx, ATTR_DATA)?;
    assert!(info.exists);
    assert!(info.is_array);
    assert_eq!(info.elem_type, DataType::F32);
    assert_eq!(info.encoded_type, DataType::F32_ARRAY);
    assert_eq!(info.cols, 3);
    assert_eq!(info.rows, 2);
    assert_eq!(info.size, 24);
    let data = omrx.attr_f32_array(vrtx, ATTR_DATA)?.expect("no data");
    assert_eq!(
        data,
        ArrayData { cols: 3, rows: 2, values: vec![0.0, 1.0, 2.0, 1.0, 2.0, 3.0] },
    );
    Ok(())
}

#[test]
fn structure_survives_round_trip() -> anyhow::Result<()> {
    let mut omrx = Omrx::new();
    let root = omrx.root();
    let model = omrx.add_chunk(root, tag!(b"MoDL"))?;
    omrx.set_attr_str(model, ATTR_ID, "car")?;
    omrx.set_attr_str(model, 0x0002, "A car")?;
    let lod = omrx.add_chunk(model, tag!(b"MLOd"))?;
    omrx.set_attr_f32(lod, 0x0004, 60.0)?;
    let mesh = omrx.add_chunk(root, tag!(b"MesH"))?;
    omrx.set_attr_raw(mesh, 0x0100, vec![1, 2, 3])?;
    // zero-size attributes are legal and must survive
    omrx.set_attr_raw(mesh, 0x0099, Vec::new())?;
    omrx.set_attr_u32_array(mesh, ATTR_DATA, 1, vec![5, 6, 7])?;

    let mut bytes = Vec::new();
    omrx.write_to(&mut bytes)?;

    let mut reread = Omrx::new();
    reread.open_reader(Cursor::new(bytes))?;
    let root = reread.root();
    let model = reread.get_child(root, tag!(b"MoDL")).expect("no model chunk");
    assert_eq!(reread.chunk_id(model), Some("car"));
    assert_eq!(reread.attr_ids(model), vec![ATTR_ID, 0x0002]);
    let lod = reread.get_child(model, tag!(b"MLOd")).expect("no lod chunk");
    assert_eq!(reread.attr_f32(lod, 0x0004)?, Some(60.0));
    let mesh = reread.get_child(root, tag!(b"MesH")).expect("no mesh chunk");
    assert_eq!(reread.attr_ids(mesh), vec![0x0099, 0x0100, ATTR_DATA]);
    assert_eq!(reread.attr_raw(mesh, 0x0100)?, Some(&[1, 2, 3][..]));
    assert_eq!(reread.attr_raw(mesh, 0x0099)?, Some(&[][..]));
    let indices = reread.attr_u32_array(mesh, ATTR_DATA)?.expect("no index data");
    assert_eq!(indices.cols, 1);
    assert_eq!(indices.values, vec![5, 6, 7]);
    assert_eq!(reread.get_next(mesh, None), None);
    assert_eq!(reread.status(false), Status::Ok);
    Ok(())
}

#[test]
fn copy_keeps_payload_isolated() {
    let mut omrx = Omrx::new();
    let root = omrx.root();
    let mesh = omrx.add_chunk(root, tag!(b"MesH")).unwrap();
    let mut source = vec![1.0_f32, 2.0, 3.0];
    omrx.set_attr_f32_array(mesh, ATTR_DATA, 3, &source[..]).unwrap();
    source[0] = 9.0;
    let data = omrx.attr_f32_array(mesh, ATTR_DATA).unwrap().unwrap();
    assert_eq!(data.values, vec![1.0, 2.0, 3.0]);
}

#[test]
fn transfer_and_copy_read_back_equal() {
    let mut omrx = Omrx::new();
    let root = omrx.root();
    let mesh = omrx.add_chunk(root, tag!(b"MesH")).unwrap();
    let values = vec![4.0_f32, 5.0, 6.0];
    omrx.set_attr_f32_array(mesh, 0x0010, 3, &values[..]).unwrap();
    omrx.set_attr_f32_array(mesh, 0x0011, 3, values.clone()).unwrap();
    let copied = omrx.attr_f32_array(mesh, 0x0010).unwrap().unwrap();
    let transferred = omrx.attr_f32_array(mesh, 0x0011).unwrap().unwrap();
    assert_eq!(copied, transferred);
    assert_eq!(copied.values, values);
}

#[test]
fn second_set_with_different_type_fails() {
    let mut omrx = Omrx::new();
    omrx.set_log_error(None);
    let root = omrx.root();
    let mesh = omrx.add_chunk(root, tag!(b"MesH")).unwrap();
    omrx.set_attr_u32(mesh, 0x0010, 42).unwrap();
    match omrx.set_attr_str(mesh, 0x0010, "nope") {
        Err(Error::WrongDataType { .. }) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(omrx.last_result(), Status::WrongDataType);
    // the first value must be untouched
    assert_eq!(omrx.attr_u32(mesh, 0x0010).unwrap(), Some(42));
}

#[test]
fn lazy_load_and_release() -> anyhow::Result<()> {
    let mut omrx = Omrx::new();
    let root = omrx.root();
    let mesh = omrx.add_chunk(root, tag!(b"MesH"))?;
    omrx.set_attr_str(mesh, ATTR_ID, "big")?;
    omrx.set_attr_f32_array(mesh, ATTR_DATA, 4, vec![0.5_f32; 4096])?;
    let mut bytes = Vec::new();
    omrx.write_to(&mut bytes)?;

    let mut omrx = Omrx::new();
    omrx.open_reader(Cursor::new(bytes))?;
    let mesh = omrx.chunk_by_id("big", None).expect("mesh not found");
    // the id string was read eagerly, but its payload is not cached...
    assert!(!omrx.attr_is_loaded(mesh, ATTR_ID));
    // ...and neither is the data payload until somebody asks for it
    assert!(!omrx.attr_is_loaded(mesh, ATTR_DATA));

    let first = omrx.attr_f32_array(mesh, ATTR_DATA)?.expect("no data");
    assert!(omrx.attr_is_loaded(mesh, ATTR_DATA));

    omrx.release_attr_data(mesh, ATTR_DATA)?;
    assert!(!omrx.attr_is_loaded(mesh, ATTR_DATA));

    let second = omrx.attr_f32_array(mesh, ATTR_DATA)?.expect("no data");
    assert_eq!(first, second);

    // in-memory-only attributes have nothing to release
    omrx.set_attr_u32(mesh, 0x0010, 1)?;
    omrx.release_attr_data(mesh, 0x0010)?;
    assert_eq!(omrx.last_result(), Status::NotFound);
    assert!(omrx.attr_is_loaded(mesh, 0x0010));
    Ok(())
}

#[test]
fn mutation_discards_file_backing() -> anyhow::Result<()> {
    let mut omrx = Omrx::new();
    let root = omrx.root();
    let mesh = omrx.add_chunk(root, tag!(b"MesH"))?;
    omrx.set_attr_str(mesh, ATTR_ID, "m")?;
    omrx.set_attr_u32(mesh, 0x0010, 1)?;
    let mut bytes = Vec::new();
    omrx.write_to(&mut bytes)?;

    let mut omrx = Omrx::new();
    omrx.open_reader(Cursor::new(bytes))?;
    let mesh = omrx.chunk_by_id("m", None).expect("mesh not found");
    omrx.set_attr_u32(mesh, 0x0010, 2)?;
    // a set makes the attribute in-memory-only, so release is a no-op
    omrx.release_attr_data(mesh, 0x0010)?;
    assert_eq!(omrx.last_result(), Status::NotFound);
    assert_eq!(omrx.attr_u32(mesh, 0x0010)?, Some(2));
    Ok(())
}

#[test]
fn attr_ids_stay_sorted_across_mutations() {
    let mut omrx = Omrx::new();
    let root = omrx.root();
    let mesh = omrx.add_chunk(root, tag!(b"MesH")).unwrap();
    omrx.set_attr_u32(mesh, 0x0500, 5).unwrap();
    omrx.set_attr_u32(mesh, 0x0003, 3).unwrap();
    omrx.set_attr_raw(mesh, 0xffff, vec![0]).unwrap();
    omrx.set_attr_u32(mesh, 0x0002, 2).unwrap();
    omrx.del_attr(mesh, 0x0500).unwrap();
    assert_eq!(omrx.attr_ids(mesh), vec![0x0002, 0x0003, 0xffff]);
}

#[test]
fn deleting_the_id_attribute_unregisters() {
    let mut omrx = Omrx::new();
    let root = omrx.root();
    let mesh = omrx.add_chunk(root, tag!(b"MesH")).unwrap();
    omrx.set_attr_str(mesh, ATTR_ID, "gone").unwrap();
    assert_eq!(omrx.chunk_by_id("gone", None), Some(mesh));
    omrx.del_attr(mesh, ATTR_ID).unwrap();
    assert_eq!(omrx.chunk_by_id("gone", None), None);
    assert_eq!(omrx.chunk_id(mesh), None);
}
