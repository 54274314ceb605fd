//! ---
//! cairn_section: "05-networking-external-interfaces"
//! cairn_subsection: "tests"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Control CLI for administrators of Cairn memento stores."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use tempfile::tempdir;

fn cairnctl() -> Command {
    let mut cmd = Command::cargo_bin("cairnctl").unwrap();
    cmd.env_remove("CAIRN_CONFIG");
    cmd
}

fn seed(root: &Path) {
    fs::create_dir_all(root.join("plane")).unwrap();
    seed_mementos(root);
}

/// Memento directories only, as an older store without `plane/` would have.
fn seed_mementos(root: &Path) {
    for dir in ["entities", "locations", "policies"] {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
    fs::write(
        root.join("entities").join("e1"),
        r#"{"category":"entity","id":"e1","type":"AppServer","top_level":true}"#,
    )
    .unwrap();
    fs::write(
        root.join("policies").join("p1"),
        r#"{"category":"policy","id":"p1","type":"Restarter","entity":"e1"}"#,
    )
    .unwrap();
}

#[test]
fn manifest_prints_json_inventory() {
    let dir = tempdir().unwrap();
    seed(dir.path());
    let output = cairnctl()
        .args(["manifest", "--json", "--dir"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let manifest: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(manifest["entities"]["e1"], "AppServer");
    assert_eq!(manifest["policies"]["p1"], "Restarter");
}

#[test]
fn remove_deletes_the_file() {
    let dir = tempdir().unwrap();
    seed(dir.path());
    cairnctl()
        .args(["remove", "--category", "policies", "--id", "p1", "--dir"])
        .arg(dir.path())
        .assert()
        .success();
    assert!(!dir.path().join("policies").join("p1").exists());
    assert!(dir.path().join("entities").join("e1").exists());
}

#[test]
fn remove_rejects_the_plane() {
    let dir = tempdir().unwrap();
    seed(dir.path());
    cairnctl()
        .args(["remove", "--category", "plane", "--id", "x", "--dir"])
        .arg(dir.path())
        .assert()
        .failure();
}

#[test]
fn sweep_reports_removed_temp_files() {
    let dir = tempdir().unwrap();
    seed(dir.path());
    fs::write(dir.path().join("entities").join("e2.tmp"), "{").unwrap();
    let output = cairnctl()
        .args(["sweep", "--dir"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "removed 1 temporary file(s)"
    );
    assert!(!dir.path().join("entities").join("e2.tmp").exists());
}

fn tree(root: &Path) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(root).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            for child in fs::read_dir(&path).unwrap() {
                names.insert(child.unwrap().path().display().to_string());
            }
        }
        names.insert(path.display().to_string());
    }
    names
}

#[test]
fn inspect_reports_graph_without_touching_the_store() {
    let dir = tempdir().unwrap();
    seed_mementos(dir.path());
    fs::write(dir.path().join("entities").join("e2.tmp"), "{").unwrap();
    let before = tree(dir.path());

    let output = cairnctl()
        .args(["inspect", "--dir"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("entities:     1"), "{stdout}");
    assert!(stdout.contains("locations:    0"), "{stdout}");
    assert!(stdout.contains("policies:     1"), "{stdout}");
    assert!(stdout.contains("applications: e1"), "{stdout}");
    assert!(stdout.contains("dangling:     none"), "{stdout}");

    cairnctl()
        .args(["manifest", "--dir"])
        .arg(dir.path())
        .assert()
        .success();
    assert_eq!(tree(dir.path()), before);
}

#[test]
fn inspect_lists_dangling_references() {
    let dir = tempdir().unwrap();
    seed_mementos(dir.path());
    fs::remove_file(dir.path().join("entities").join("e1")).unwrap();
    let output = cairnctl()
        .args(["inspect", "--dir"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("dangling:     1"), "{stdout}");
    assert!(stdout.contains("policies/p1 -> entities/e1"), "{stdout}");
}

#[test]
fn missing_store_fails() {
    let dir = tempdir().unwrap();
    cairnctl()
        .args(["inspect", "--dir"])
        .arg(dir.path().join("absent"))
        .assert()
        .failure();
}
