//! Black-box CLI integration tests (§6 "CLI surface (collaborator)"),
//! grounded on the teacher's `crates/cli/tests/run.rs` (`assert_cmd`
//! against the built `wrun` binary). The teacher drives fixtures
//! compiled from `.wat`; this crate has no WAT toolchain available, so
//! fixtures are hand-assembled Wasm binaries written to a `tempfile`
//! `NamedTempFile`, the same fixture idiom the wider Wasm-runtime
//! ecosystem (e.g. wasmtime's own CLI tests) uses for this purpose.

use assert_cmd::Command;
use tempfile::NamedTempFile;
use std::io::Write;

/// `(i32, i32) -> i32`, exported as `add`.
fn add_module_bytes() -> Vec<u8> {
    let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
    bytes.extend_from_slice(&[1, 7, 1, 0x60, 2, 0x7F, 0x7F, 1, 0x7F]);
    bytes.extend_from_slice(&[3, 2, 1, 0]);
    bytes.extend_from_slice(&[7, 7, 1, 3, b'a', b'd', b'd', 0x00, 0x00]);
    bytes.extend_from_slice(&[10, 9, 1, 7, 0, 0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B]);
    bytes
}

fn write_fixture(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create fixture file");
    file.write_all(bytes).expect("write fixture bytes");
    file
}

#[test]
fn run_invokes_the_named_export_and_prints_its_result() {
    let fixture = write_fixture(&add_module_bytes());
    let mut cmd = get_cmd();
    let assert = cmd
        .arg(fixture.path())
        .arg("--invoke")
        .arg("add")
        .arg("19")
        .arg("23")
        .assert();
    assert.success().stdout("42\n");
}

#[test]
fn validate_reports_ok_for_a_well_formed_module() {
    let fixture = write_fixture(&add_module_bytes());
    let mut cmd = get_cmd();
    let assert = cmd.arg("validate").arg(fixture.path()).assert();
    assert.success();
}

#[test]
fn validate_fails_on_a_truncated_module() {
    let fixture = write_fixture(&[0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00]);
    let mut cmd = get_cmd();
    let assert = cmd.arg("validate").arg(fixture.path()).assert();
    assert.failure().code(1);
}

#[test]
fn inspect_lists_the_exported_function() {
    let fixture = write_fixture(&add_module_bytes());
    let mut cmd = get_cmd();
    let assert = cmd.arg("inspect").arg(fixture.path()).assert();
    let output = assert.get_output();
    assert!(contains_slice(&output.stdout, b"add"));
}

fn contains_slice<T: Eq>(slice: &[T], other: &[T]) -> bool {
    if other.is_empty() {
        return true;
    }
    slice.windows(other.len()).any(|window| window == other)
}

fn get_cmd() -> assert_cmd::Command {
    Command::cargo_bin("wrun").expect("could not create wrun command")
}
