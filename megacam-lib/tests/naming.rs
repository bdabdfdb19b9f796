mod common;
use common::*;

use megacam_lib::naming::FileNamer;

#[test]
fn test_names_are_numbered_after_first_use() {
    let dir = scratch_dir();
    let path = dir.path().join("names_numbered.json");
    let mut namer = FileNamer::open(&path).unwrap();

    assert_eq!(namer.next_name(Some("garden")).unwrap(), "garden");
    assert_eq!(namer.next_name(Some("garden")).unwrap(), "garden_1");
    assert_eq!(namer.next_name(None).unwrap(), "garden_2");
    assert_eq!(namer.next_jpeg_name(Some("porch")).unwrap(), "porch.jpg");
    assert_eq!(namer.next_jpeg_name(None).unwrap(), "porch_1.jpg");
    assert_eq!(namer.uses("garden"), 3);
    assert_eq!(namer.uses("attic"), 0);
}

#[test]
fn test_counts_survive_reopen() {
    let dir = scratch_dir();
    let path = dir.path().join("names_persist.json");
    {
        let mut namer = FileNamer::open(&path).unwrap();
        namer.next_name(Some("shot")).unwrap();
        namer.next_name(Some("shot")).unwrap();
    }
    assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"shot":1}"#);

    let mut namer = FileNamer::open(&path).unwrap();
    assert_eq!(namer.next_name(Some("shot")).unwrap(), "shot_2");
}

#[test]
fn test_first_use_requires_a_name() {
    let dir = scratch_dir();
    let path = dir.path().join("names_missing.json");
    let mut namer = FileNamer::open(&path).unwrap();

    assert!(matches!(namer.next_name(None), Err(CamError::InvalidArgument(_))));
    assert!(path.exists(), "Empty map is created on open");
}

#[test]
fn test_corrupt_map_is_reported() {
    let dir = scratch_dir();
    let path = dir.path().join("names_corrupt.json");
    std::fs::write(&path, "not json").unwrap();

    assert!(matches!(FileNamer::open(&path), Err(CamError::Json(_))));
}

#[test]
fn test_name_map_is_removed_with_scratch_dir() {
    let dir = scratch_dir();
    let root = dir.path().to_path_buf();
    let path = root.join("names_cleanup.json");
    {
        let mut namer = FileNamer::open(&path).unwrap();
        namer.next_name(Some("yard")).unwrap();
        assert_eq!(namer.path(), path.as_path());
    }
    assert!(path.exists());

    drop(dir);

    assert!(!path.exists(), "Name map must not outlive the test");
    assert!(!root.exists(), "Scratch directory must not outlive the test");
}
