//! End-to-end tests for the vidlib binary

use std::path::Path;
use std::process::{Command, Output};

use vidlib_core::database::{FunctionInfo, GlobalInfo, TypeInfo};
use vidlib_core::{FileVersion, LoadOptions, SymbolDatabase};

fn write_database(path: &Path)
{
    let mut builder = SymbolDatabase::builder();
    builder.file_version(FileVersion::new(1, 5, 97, 0)).library_version(4);
    builder
        .add_function(FunctionInfo {
            vid: 11,
            begin: 0x1000,
            end: 0x1100,
            short_name: Some("Update".to_string()),
            full_name: Some("World::Update".to_string()),
        })
        .unwrap();
    builder
        .add_global(GlobalInfo {
            vid: 12,
            begin: 0x8000,
            short_name: Some("g_world".to_string()),
            type_name: None,
        })
        .unwrap();
    builder
        .add_type(TypeInfo {
            vid: 13,
            vtable: 0x4000,
            name: "class World".to_string(),
            size: Some(0x100),
            fields: Vec::new(),
        })
        .unwrap();
    builder.build(LoadOptions::default()).unwrap().save(path).unwrap();
}

fn vidlib(args: &[&str]) -> Output
{
    Command::new(env!("CARGO_BIN_EXE_vidlib"))
        .args(args)
        .env("RUST_LOG", "error")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String
{
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_info_and_lookups()
{
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("game_1_5_97_0.vdb");
    write_database(&db);
    let db = db.to_str().unwrap();

    let output = vidlib(&["info", db, "--expect", "1.5.97"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("1.5.97.0"));

    let output = vidlib(&["function", db, "0x1080"]);
    assert!(stdout(&output).contains("World::Update"));

    let output = vidlib(&["function", db, "0x1_4000_1080", "--base", "0x1_4000_0000"]);
    assert!(stdout(&output).contains("VID:   11"));

    let output = vidlib(&["type", db, "--vtable", "0x4000"]);
    assert!(stdout(&output).contains("class World"));

    let output = vidlib(&["global", db, "12"]);
    assert!(stdout(&output).contains("g_world"));

    let output = vidlib(&["dump-vids", db, "-"]);
    assert_eq!(stdout(&output), "11\t0x1000\n12\t0x8000\n");
}

#[test]
fn test_errors_exit_non_zero()
{
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("game_1_5_97_0.vdb");
    write_database(&db);
    let db = db.to_str().unwrap();

    let output = vidlib(&["info", db, "--expect", "1.5.98"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("file version"));

    let missing = dir.path().join("missing.vdb");
    let output = vidlib(&["info", missing.to_str().unwrap()]);
    assert!(!output.status.success());
}
