use std::{fs, os::unix::fs::symlink, path::Path, process::Command};

use similar_asserts::assert_eq;

fn ustar_stream() -> Command {
    Command::new(env!("CARGO_BIN_EXE_ustar-stream"))
}

fn populate(root: &Path) {
    fs::create_dir_all(root.join("tree/sub")).unwrap();
    fs::write(root.join("tree/a.txt"), b"alpha").unwrap();
    fs::write(root.join("tree/sub/b.bin"), vec![9u8; 1000]).unwrap();
    symlink("a.txt", root.join("tree/link")).unwrap();
}

#[test]
fn test_create_and_size_agree() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());
    let output = dir.path().join("out.tar");

    let status = ustar_stream()
        .current_dir(dir.path())
        .args(["create", "--mtime", "0", "-o"])
        .arg(&output)
        .arg("tree")
        .status()
        .unwrap();
    assert!(status.success());

    let size = ustar_stream()
        .current_dir(dir.path())
        .args(["size", "tree"])
        .output()
        .unwrap();
    assert!(size.status.success());
    let reported: u64 = String::from_utf8(size.stdout).unwrap().trim().parse().unwrap();

    let bytes = fs::read(&output).unwrap();
    assert_eq!(bytes.len() as u64, reported);

    let mut archive = tar::Archive::new(&bytes[..]);
    let listed: Vec<(String, u64)> = archive
        .entries()
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            (
                entry.path().unwrap().to_string_lossy().into_owned(),
                entry.header().mtime().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        listed,
        [
            ("tree/".to_string(), 0),
            ("tree/a.txt".to_string(), 0),
            ("tree/link".to_string(), 0),
            ("tree/sub/".to_string(), 0),
            ("tree/sub/b.bin".to_string(), 0),
        ]
    );
}

#[test]
fn test_create_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());

    let out = ustar_stream()
        .arg("create")
        .arg(dir.path().join("tree/a.txt"))
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(out.stdout.len(), 512 + 512 + 1024);
    assert_eq!(&out.stdout[512..517], b"alpha");
}

#[test]
fn test_missing_input_fails() {
    let out = ustar_stream()
        .args(["create", "/nonexistent/ustar-stream/input"])
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Failed to stat"));
}
