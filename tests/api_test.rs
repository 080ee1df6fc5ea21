#![allow(missing_docs)]

use objstream::{
    Array, ObjStream, ObjectRef, ProtocolVersion, Serializable, StreamConfig, StreamError, Value,
};

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Inventory", suid = 1)]
struct Inventory {
    owner: String,
    counts: Vec<i64>,
    tags: Vec<String>,
    parent: Option<ObjectRef>,
}

// Generator of data
fn create_inventory() -> Value {
    let root = ObjectRef::new(Inventory {
        owner: "root".into(),
        counts: (0..50_000).collect(),
        tags: vec!["a".into(), "b".into()],
        parent: None,
    });
    Value::object(Inventory {
        owner: "child".into(),
        counts: vec![1, 2, 3],
        tags: Vec::new(),
        parent: Some(root),
    })
}

fn owner_chain(v: &Value) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = v.as_object().cloned();
    while let Some(obj) = cur {
        let Some(inv) = obj.borrow::<Inventory>() else { break };
        out.push(inv.owner.clone());
        cur = inv.parent.clone();
    }
    out
}

// --- TESTS ---

/// Standard File IO
/// Validate `ObjStream::save`, `ObjStream::load` (memory-mapped)
#[test]
fn test_standard_file_io() -> objstream::Result<()> {
    let dir = tempfile::tempdir()?;
    let file_path = dir.path().join("inventory.ser");
    let data = create_inventory();

    ObjStream::save(&file_path, &data)?;
    let loaded = ObjStream::load(&file_path)?;

    assert_eq!(owner_chain(&loaded), vec!["child".to_string(), "root".to_string()]);
    let root = loaded
        .as_object()
        .and_then(|o| o.borrow::<Inventory>().and_then(|i| i.parent.clone()))
        .expect("parent");
    let counts = root.borrow::<Inventory>().map(|i| i.counts.len());
    assert_eq!(counts, Some(50_000));
    Ok(())
}

/// Pure Memory IO
/// Validate `ObjStream::to_bytes`, `ObjStream::from_bytes`
#[test]
fn test_memory_io() -> objstream::Result<()> {
    let data = create_inventory();
    let bytes = ObjStream::to_bytes(&data)?;
    assert_eq!(&bytes[..4], &[0xAC, 0xED, 0x00, 0x05]);

    let loaded = ObjStream::from_bytes(&bytes)?;
    assert_eq!(owner_chain(&loaded), vec!["child".to_string(), "root".to_string()]);
    Ok(())
}

/// Files written by `save` and bytes from `to_bytes` are identical.
#[test]
fn test_file_matches_memory() -> objstream::Result<()> {
    let data = Value::from(Array::Short(vec![1, -2, 3]));
    let dir = tempfile::tempdir()?;
    let file_path = dir.path().join("shorts.ser");

    ObjStream::save(&file_path, &data)?;
    assert_eq!(std::fs::read(&file_path)?, ObjStream::to_bytes(&data)?);
    Ok(())
}

/// Explicit settings flow through the file entry points.
#[test]
fn test_file_io_with_config() -> objstream::Result<()> {
    let dir = tempfile::tempdir()?;
    let file_path = dir.path().join("config.ser");
    let config = StreamConfig::default()
        .with_protocol(ProtocolVersion::V1)
        .with_filter("maxarray=2");

    ObjStream::save_with(&file_path, &Value::from(Array::Int(vec![1, 2, 3])), &config)?;
    let res = ObjStream::load_with(&file_path, &config);
    assert!(matches!(res, Err(StreamError::InvalidClass { .. })));

    let relaxed = StreamConfig::default();
    let loaded = ObjStream::load_with(&file_path, &relaxed)?;
    assert_eq!(
        *loaded.as_array().expect("array").borrow(),
        Array::Int(vec![1, 2, 3])
    );
    Ok(())
}

/// Empty and truncated files report a premature end of input.
#[test]
fn test_empty_and_truncated_files() -> objstream::Result<()> {
    let dir = tempfile::tempdir()?;
    let empty = dir.path().join("empty.ser");
    std::fs::write(&empty, [])?;
    assert!(ObjStream::load(&empty).is_err_and(|e| e.is_eof()));

    let bytes = ObjStream::to_bytes(&create_inventory())?;
    let truncated = dir.path().join("truncated.ser");
    std::fs::write(&truncated, &bytes[..bytes.len() / 2])?;
    assert!(ObjStream::load(&truncated).is_err_and(|e| e.is_eof()));
    Ok(())
}

/// Loading a missing file is an I/O error.
#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let res = ObjStream::load(dir.path().join("nope.ser"));
    assert!(matches!(res, Err(StreamError::Io(_))));
}

/// Deep copies share nothing with the original but keep internal sharing.
#[test]
fn test_deep_copy() -> objstream::Result<()> {
    let shared = Value::from("shared");
    let array = Value::from(Array::of_objects(vec![shared.clone(), shared]));
    let copy = ObjStream::deep_copy(&array)?;
    assert!(!copy.ptr_eq(&array));

    let copy = copy.as_array().expect("array").borrow();
    let elems = copy.elements().expect("elements");
    assert!(elems[0].ptr_eq(&elems[1]));
    assert_eq!(elems[0].as_str(), Some("shared"));
    Ok(())
}
