//! State survives a restart, and the on-disk file is what operators expect.

mod common;

use common::Fixture;
use vmapfs_fuse::Node;
use vmapfs_state::BACKUP_DIR_NAME;

#[test]
fn test_reload_reproduces_namespace() {
    let fx = Fixture::new(&["a/b.txt", "c.txt"]);
    fx.mkdir("/", "movies");
    fx.mkdir("/movies", "new");
    fx.place("a/b.txt", "/movies/new", "b.txt").unwrap();
    let Node::File(c) = fx.resolve("/_UNSORTED/c.txt") else {
        panic!("expected a file");
    };
    c.set_xattr("user.note", &[0, 159, 255]).unwrap();

    let before = fx.fs.to_state().unwrap();
    let reopened = fx.reopen();
    let after = reopened.to_state().unwrap();

    assert_eq!(before.mappings, after.mappings);
    assert_eq!(before.directories, after.directories);
    match reopened.resolve("/movies/new/b.txt").unwrap() {
        Node::File(f) => assert_eq!(f.source_path().as_str(), "a/b.txt"),
        other => panic!("unexpected node {:?}", other),
    }
    match reopened.resolve("/_UNSORTED/c.txt").unwrap() {
        Node::File(f) => assert_eq!(f.get_xattr("user.note").unwrap(), vec![0, 159, 255]),
        other => panic!("unexpected node {:?}", other),
    }
}

#[test]
fn test_state_file_layout() {
    let fx = Fixture::new(&["f"]);
    fx.mkdir("/", "x");
    fx.place("f", "/x", "f").unwrap();

    let raw = std::fs::read_to_string(fx.state_path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["version"], 1);
    assert_eq!(json["directories"]["/"], true);
    assert_eq!(json["directories"]["/x"], true);
    assert_eq!(json["mappings"]["f"]["virtual_path"], "/x/f");
    // Human-formatted output.
    assert!(raw.contains('\n'));
}

#[test]
fn test_every_mutation_leaves_a_backup() {
    let fx = Fixture::new(&["f"]);
    fx.mkdir("/", "a");
    fx.mkdir("/", "b");

    let backups = fx.state_dir.path().join(BACKUP_DIR_NAME);
    let count = std::fs::read_dir(&backups).unwrap().count();
    assert!(count >= 1, "expected backups in {}", backups.display());
}

#[test]
fn test_backups_are_capped() {
    let fx = Fixture::new(&[]);
    for i in 0..9 {
        fx.mkdir("/", &format!("d{}", i));
    }
    let backups = fx.state_dir.path().join(BACKUP_DIR_NAME);
    let count = std::fs::read_dir(&backups).unwrap().count();
    assert_eq!(count, vmapfs_state::BACKUP_COUNT);
}

#[test]
fn test_loaded_duplicate_placement_is_resolved() {
    let source = tempfile::tempdir().unwrap();
    common::write_source(source.path(), "a.txt");
    common::write_source(source.path(), "b.txt");
    let state_dir = tempfile::tempdir().unwrap();
    let state_path = state_dir.path().join("state.json");
    std::fs::write(
        &state_path,
        r#"{
  "mappings": {
    "b.txt": { "virtual_path": "/same" },
    "a.txt": { "virtual_path": "/same" }
  },
  "directories": { "/": true },
  "version": 1
}"#,
    )
    .unwrap();

    let fs = vmapfs_fuse::VmapFs::load(
        source.path(),
        &state_path,
        vmapfs_fuse::Identity { uid: 0, gid: 0 },
    )
    .unwrap();
    match fs.resolve("/same").unwrap() {
        Node::File(f) => assert_eq!(f.source_path().as_str(), "a.txt"),
        other => panic!("unexpected node {:?}", other),
    }
    let unsorted: Vec<String> = fs
        .unsorted_root()
        .list_children()
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .filter(|n| n != "." && n != "..")
        .collect();
    assert_eq!(unsorted, vec!["b.txt".to_string()]);
    match fs.resolve("/_UNSORTED/b.txt").unwrap() {
        Node::File(f) => assert_eq!(f.source_path().as_str(), "b.txt"),
        other => panic!("unexpected node {:?}", other),
    }
}

#[test]
fn test_corrupt_state_refuses_to_start() {
    let source = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    let state_path = state_dir.path().join("state.json");
    std::fs::write(&state_path, "{ not json").unwrap();

    let result = vmapfs_fuse::VmapFs::load(
        source.path(),
        &state_path,
        vmapfs_fuse::Identity { uid: 0, gid: 0 },
    );
    assert!(result.is_err());
    assert_eq!(std::fs::read_to_string(&state_path).unwrap(), "{ not json");
}
