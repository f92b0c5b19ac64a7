mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use common::write_csv;
use predicates::prelude::*;
use std::process::Command;

fn inputs() -> (tempfile::NamedTempFile, tempfile::NamedTempFile) {
    let catalog = write_csv(&[
        "course,tutor,price,currency,status",
        "rust-101,t1,90000,NGN,published",
    ]);
    let activity = write_csv(&[
        "op,reference,course,learner,tutor,email,amount,status,at",
        "init,ref-1,rust-101,ada,,ada@example.com,90000,,",
        "confirm,ref-1,,,,,90000,success,",
    ]);
    (catalog, activity)
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let (catalog, activity) = inputs();

    let mut cmd = Command::new(cargo_bin!("coursepay"));
    cmd.arg(catalog.path())
        .arg(activity.path())
        .arg("--db-path")
        .arg("some_db");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("ada,rust-101,active,90000,90000,full"))
        .stderr(predicate::str::contains(
            "Falling back to in-memory storage",
        ));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let (catalog, activity) = inputs();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("coursepay"));
    cmd.arg(catalog.path())
        .arg(activity.path())
        .arg("--db-path")
        .arg(&db_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Falling back").not());
}
